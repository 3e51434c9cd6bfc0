//! Service lifecycle
//!
//! Bootstrapping binds the store to one owner and one TPM, reconciles
//! the service management certificate with the keys actually present in
//! the TPM, and publishes that certificate on the face. A fresh
//! management key is minted whenever the stored certificate is missing
//! or its private half has disappeared (TPM migration or loss).

use crate::cert::{IdentityCertificate, KeyLocator, SignatureInfo, SubjectDescription};
use crate::db::{DbError, PibDb};
use crate::face::{Face, FaceError, FilterHandle};
use crate::keys::{KeyParams, KeyType};
use crate::name::Name;
use crate::req;
use crate::tpm::{create_tpm, Tpm, TpmError};
use crate::validator::PibValidator;
use crate::wire::{sig_types, WireError};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

pub const MGMT_LABEL: &str = "mgmt";

/// Default lifetime of a freshly minted management certificate.
pub const DEFAULT_MGMT_CERT_VALIDITY_DAYS: u64 = 7_300;

const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1_000;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Tpm(#[from] TpmError),

    #[error(transparent)]
    Face(#[from] FaceError),

    #[error("malformed certificate: {0}")]
    Wire(#[from] WireError),

    #[error("owner argument '{given}' differs from owner name '{stored}' in database")]
    OwnerMismatch { stored: String, given: String },

    #[error("tpm locator argument '{given}' differs from locator '{stored}' in database")]
    TpmMismatch { stored: String, given: String },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// The PIB service instance. Owns the store, the validator, the TPM and
/// the face registrations for its lifetime.
pub struct Pib {
    db: Arc<PibDb>,
    validator: Arc<PibValidator>,
    tpm: Box<dyn Tpm>,
    face: Arc<dyn Face>,
    owner: String,
    mgmt_cert: IdentityCertificate,
    prefix: Name,
    mgmt_filter: FilterHandle,
}

impl Pib {
    pub fn new(
        face: Arc<dyn Face>,
        db_dir: &str,
        tpm_locator: &str,
        owner: &str,
    ) -> ServiceResult<Self> {
        Self::with_validity(face, db_dir, tpm_locator, owner, DEFAULT_MGMT_CERT_VALIDITY_DAYS)
    }

    /// Bootstrap with an explicit management-certificate lifetime.
    pub fn with_validity(
        face: Arc<dyn Face>,
        db_dir: &str,
        tpm_locator: &str,
        owner: &str,
        mgmt_validity_days: u64,
    ) -> ServiceResult<Self> {
        let db = Arc::new(PibDb::open(db_dir)?);

        if let Some(stored) = db.owner_name()? {
            if stored != owner {
                return Err(ServiceError::OwnerMismatch {
                    stored,
                    given: owner.to_string(),
                });
            }
        }
        if let Some(stored) = db.tpm_locator()? {
            if stored != tpm_locator {
                return Err(ServiceError::TpmMismatch {
                    stored,
                    given: tpm_locator.to_string(),
                });
            }
        }

        let tpm = create_tpm(tpm_locator)?;
        let validator = PibValidator::new(&db)?;

        let mgmt_cert = initialize_mgmt_cert(&db, tpm.as_ref(), owner, mgmt_validity_days)?;

        db.set_owner_name(owner)?;
        db.set_tpm_locator(tpm_locator)?;

        let prefix = req::command_prefix().append_str(owner);
        face.register_prefix(&prefix)?;

        let mgmt_prefix = prefix.clone().append_str(MGMT_LABEL);
        let cert_bytes = mgmt_cert.wire_encode();
        let publish_face = Arc::clone(&face);
        let mgmt_filter = face.set_interest_filter(
            mgmt_prefix,
            Box::new(move |_interest| {
                publish_face.put(cert_bytes.clone());
            }),
        );
        info!(owner, prefix = %prefix, "PIB service registered");

        Ok(Pib {
            db,
            validator,
            tpm,
            face,
            owner: owner.to_string(),
            mgmt_cert,
            prefix,
            mgmt_filter,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn mgmt_certificate(&self) -> &IdentityCertificate {
        &self.mgmt_cert
    }

    pub fn db(&self) -> &Arc<PibDb> {
        &self.db
    }

    pub fn validator(&self) -> &Arc<PibValidator> {
        &self.validator
    }

    pub fn tpm(&self) -> &dyn Tpm {
        self.tpm.as_ref()
    }
}

impl Drop for Pib {
    fn drop(&mut self) {
        self.face.unset_interest_filter(self.mgmt_filter);
        self.face.unregister_prefix(&self.prefix);
    }
}

/// Adopt the stored management certificate, or mint a new one when it is
/// absent or its private key is gone from the TPM.
fn initialize_mgmt_cert(
    db: &PibDb,
    tpm: &dyn Tpm,
    owner: &str,
    validity_days: u64,
) -> ServiceResult<IdentityCertificate> {
    if let Some(stored) = db.mgmt_certificate()? {
        let key_name = stored.public_key_name()?;
        if tpm.has_key(&key_name) {
            debug!(owner, cert = %stored.name(), "adopting stored management certificate");
            return Ok(stored);
        }
        info!(owner, key = %key_name, "management key missing from TPM, reissuing");
    }

    let key_name = req::command_prefix()
        .append_str(owner)
        .append_str(MGMT_LABEL)
        .append_str(&format!("dsk-{}", unix_micros()));

    let now = unix_millis();
    let cert = prepare_certificate(
        tpm,
        &key_name,
        &KeyParams::default(),
        now,
        now + validity_days * MILLIS_PER_DAY,
        None,
    )?;
    db.update_mgmt_certificate(&cert)?;
    info!(owner, cert = %cert.name(), "management certificate issued");
    Ok(cert)
}

/// Generate a key pair in the TPM and issue a certificate for it.
///
/// The certificate name is the key name with its final component wrapped
/// as `KEY/<keyId>/ID-CERT/<version>`. With no `signer_name` the
/// certificate is self-signed and the key locator is its own name minus
/// the version; otherwise the named signer's key signs it.
pub fn prepare_certificate(
    tpm: &dyn Tpm,
    key_name: &Name,
    params: &KeyParams,
    not_before: u64,
    not_after: u64,
    signer_name: Option<&Name>,
) -> ServiceResult<IdentityCertificate> {
    tpm.generate_key_pair(key_name, params)?;
    let public_key = tpm.get_public_key(key_name)?;

    let cert_name = IdentityCertificate::certificate_name_for_key(key_name, unix_millis());
    let subject = SubjectDescription::attribute_name(key_name.prefix(-1).to_uri());

    let (signing_key_name, locator) = match signer_name {
        None => (key_name.clone(), cert_name.prefix(-1)),
        Some(signer) => (
            IdentityCertificate::certificate_name_to_public_key_name(signer)?,
            signer.prefix(-1),
        ),
    };

    let signature_type = match tpm.get_public_key(&signing_key_name)?.key_type() {
        KeyType::Rsa => sig_types::SHA256_WITH_RSA,
        KeyType::Ecdsa => sig_types::SHA256_WITH_ECDSA,
    };
    let signature_info = SignatureInfo {
        signature_type,
        key_locator: Some(KeyLocator { name: locator }),
    };

    let mut certificate = IdentityCertificate::new(
        cert_name,
        not_before,
        not_after,
        vec![subject],
        public_key,
        signature_info,
        Vec::new(),
    );
    let signature = tpm.sign(&signing_key_name, &certificate.signed_portion())?;
    certificate.set_signature_value(signature);
    Ok(certificate)
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

pub(crate) fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpm::MemoryTpm;

    #[test]
    fn self_signed_certificate_verifies() {
        let tpm = MemoryTpm::new();
        let key_name = Name::from_uri("/localhost/pib/owner/mgmt/dsk-1").unwrap();

        let cert =
            prepare_certificate(&tpm, &key_name, &KeyParams::Ecdsa, 1_000, 2_000, None)
                .unwrap();

        assert_eq!(cert.public_key_name().unwrap(), key_name);
        assert_eq!(cert.not_before(), 1_000);
        assert_eq!(cert.not_after(), 2_000);

        // Key locator is the certificate's own name minus the version.
        let locator = cert.signature_info().key_locator.clone().unwrap();
        assert_eq!(locator.name, cert.name().prefix(-1));

        // The subject names the identity.
        assert_eq!(
            cert.subject_descriptions()[0].value,
            key_name.prefix(-1).to_uri()
        );

        assert!(cert
            .public_key_info()
            .verify(&cert.signed_portion(), cert.signature_value()));
    }

    #[test]
    fn signer_issued_certificate_verifies_under_signer_key() {
        let tpm = MemoryTpm::new();
        let signer_key = Name::from_uri("/localhost/pib/owner/mgmt/dsk-1").unwrap();
        let signer_cert =
            prepare_certificate(&tpm, &signer_key, &KeyParams::Ecdsa, 0, 10_000, None)
                .unwrap();

        let subject_key = Name::from_uri("/test/id/dsk-2").unwrap();
        let cert = prepare_certificate(
            &tpm,
            &subject_key,
            &KeyParams::Ecdsa,
            0,
            10_000,
            Some(signer_cert.name()),
        )
        .unwrap();

        let locator = cert.signature_info().key_locator.clone().unwrap();
        assert_eq!(locator.name, signer_cert.name().prefix(-1));
        assert!(signer_cert
            .public_key_info()
            .verify(&cert.signed_portion(), cert.signature_value()));
        assert!(!cert
            .public_key_info()
            .verify(&cert.signed_portion(), cert.signature_value()));
    }
}
