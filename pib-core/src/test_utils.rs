//! Test fixtures
//!
//! Factory functions for certificates, signed commands and TPM doubles,
//! shared by unit and integration tests. ECDSA keys keep the fixtures
//! fast; the verification paths are the same as for RSA.

use crate::cert::{IdentityCertificate, SignatureInfo, SubjectDescription};
use crate::keys::KeyParams;
use crate::name::Name;
use crate::req;
use crate::tpm::{MemoryTpm, Tpm};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

pub fn memory_tpm() -> MemoryTpm {
    MemoryTpm::new()
}

/// A fresh key id component, unique within the process.
pub fn fresh_key_id() -> String {
    format!("dsk-{}", NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed))
}

/// Generate a key under `key_name` and self-sign a certificate for it,
/// valid for one day around now.
pub fn self_signed_cert(tpm: &dyn Tpm, key_name: &Name) -> IdentityCertificate {
    tpm.generate_key_pair(key_name, &KeyParams::Ecdsa)
        .expect("key generation");
    certificate_for_key(tpm, key_name)
}

/// Self-sign a (new, uniquely versioned) certificate over a key that
/// already exists in the TPM.
pub fn certificate_for_key(tpm: &dyn Tpm, key_name: &Name) -> IdentityCertificate {
    let public_key = tpm.get_public_key(key_name).expect("public key");
    let version = NEXT_VERSION.fetch_add(1, Ordering::Relaxed);
    let cert_name = IdentityCertificate::certificate_name_for_key(key_name, version);
    let now = now_millis();

    let mut certificate = IdentityCertificate::new(
        cert_name.clone(),
        now.saturating_sub(1_000),
        now + 24 * 60 * 60 * 1_000,
        vec![SubjectDescription::attribute_name(
            key_name.prefix(-1).to_uri(),
        )],
        public_key,
        SignatureInfo::sha256_with_ecdsa(cert_name.prefix(-1)),
        Vec::new(),
    );
    let signature = tpm
        .sign(key_name, &certificate.signed_portion())
        .expect("certificate signing");
    certificate.set_signature_value(signature);
    certificate
}

/// Root management certificate: key name `/localhost/pib/user/<keyId>`.
pub fn root_mgmt_cert(tpm: &dyn Tpm) -> IdentityCertificate {
    let key_name = Name::from_uri("/localhost/pib/user")
        .expect("static name")
        .append_str(&fresh_key_id());
    self_signed_cert(tpm, &key_name)
}

/// User management certificate: key name
/// `/localhost/pib/user/<user>/<keyId>`.
pub fn user_mgmt_cert(tpm: &dyn Tpm, user: &str) -> IdentityCertificate {
    let key_name = Name::from_uri("/localhost/pib/user")
        .expect("static name")
        .append_str(user)
        .append_str(&fresh_key_id());
    self_signed_cert(tpm, &key_name)
}

/// A certificate for a regular (non-management) key under `identity`.
pub fn regular_cert(tpm: &dyn Tpm, identity: &str) -> IdentityCertificate {
    let key_name = Name::from_uri(identity)
        .expect("identity uri")
        .append_str(&fresh_key_id());
    self_signed_cert(tpm, &key_name)
}

/// Sign a command in `user`'s namespace with the key behind `cert`.
/// The key locator is the certificate name without its version.
pub fn signed_command(
    tpm: &dyn Tpm,
    cert: &IdentityCertificate,
    user: &str,
    verb: &str,
    param: &[u8],
) -> Name {
    let signing_key = cert.public_key_name().expect("certificate key name");
    req::sign_command(tpm, &signing_key, cert.name().prefix(-1), user, verb, param)
        .expect("command signing")
}

pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}
