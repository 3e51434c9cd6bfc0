//! Trusted platform module interface
//!
//! The TPM owns every private key; the rest of the service only ever
//! handles public halves. Backends are selected by a locator string of
//! the form `<scheme>[:<location>]`.

use crate::keys::{KeyParams, KeyType, PublicKey};
use crate::name::Name;
use p256::ecdsa::signature::Signer as _;
use p256::elliptic_curve::sec1::ToEncodedPoint as _;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::Pkcs1v15Sign;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

pub mod file;
pub mod memory;

pub use file::FileTpm;
pub use memory::MemoryTpm;

#[derive(Debug, Error)]
pub enum TpmError {
    #[error("TPM is not supported: {0}")]
    Unsupported(String),

    #[error("key not found in TPM: {0}")]
    KeyNotFound(String),

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type TpmResult<T> = Result<T, TpmError>;

/// Private-key holder and signer.
pub trait Tpm: Send + Sync {
    /// Generate and persist a key pair under `name`, replacing any
    /// existing pair of the same name.
    fn generate_key_pair(&self, name: &Name, params: &KeyParams) -> TpmResult<()>;

    fn delete_key_pair(&self, name: &Name) -> TpmResult<()>;

    fn get_public_key(&self, name: &Name) -> TpmResult<PublicKey>;

    fn has_key(&self, name: &Name) -> bool;

    /// Sign `data` with the named private key (SHA-256 digest,
    /// PKCS#1 v1.5 for RSA, P-256 ECDSA otherwise).
    fn sign(&self, name: &Name, data: &[u8]) -> TpmResult<Vec<u8>>;
}

/// Build a TPM backend from a locator string.
pub fn create_tpm(locator: &str) -> TpmResult<Box<dyn Tpm>> {
    let (scheme, location) = parse_locator(locator);
    match scheme {
        "tpm-file" | "file" => Ok(Box::new(FileTpm::new(location)?)),
        "tpm-osxkeychain" | "osx-keychain" => Err(TpmError::Unsupported(
            "the OS keychain backend is not available in this build".into(),
        )),
        other => Err(TpmError::Unsupported(format!("unknown scheme '{}'", other))),
    }
}

/// Split a locator into `(scheme, location)`; the location may be empty.
pub fn parse_locator(locator: &str) -> (&str, &str) {
    match locator.split_once(':') {
        Some((scheme, location)) => (scheme, location),
        None => (locator, ""),
    }
}

/// On-disk / in-memory form of one key pair.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct KeyRecord {
    type_code: u8,
    public_bits: Vec<u8>,
    private_bits: Vec<u8>,
}

impl KeyRecord {
    pub(crate) fn generate(params: &KeyParams) -> TpmResult<Self> {
        match params {
            KeyParams::Rsa { modulus_bits } => {
                let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), *modulus_bits)
                    .map_err(|e| TpmError::Crypto(e.to_string()))?;
                let public = rsa::RsaPublicKey::from(&private);
                let private_bits = private
                    .to_pkcs1_der()
                    .map_err(|e| TpmError::Crypto(e.to_string()))?
                    .as_bytes()
                    .to_vec();
                let public_bits = public
                    .to_pkcs1_der()
                    .map_err(|e| TpmError::Crypto(e.to_string()))?
                    .as_bytes()
                    .to_vec();
                Ok(KeyRecord {
                    type_code: KeyType::Rsa.code() as u8,
                    public_bits,
                    private_bits,
                })
            }
            KeyParams::Ecdsa => {
                let signing = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
                let public_bits = p256::ecdsa::VerifyingKey::from(&signing)
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                Ok(KeyRecord {
                    type_code: KeyType::Ecdsa.code() as u8,
                    public_bits,
                    private_bits: signing.to_bytes().to_vec(),
                })
            }
        }
    }

    pub(crate) fn public_key(&self) -> TpmResult<PublicKey> {
        let key_type = KeyType::from_code(u64::from(self.type_code))
            .map_err(|e| TpmError::Serialization(e.to_string()))?;
        Ok(PublicKey::new(key_type, self.public_bits.clone()))
    }

    pub(crate) fn sign(&self, data: &[u8]) -> TpmResult<Vec<u8>> {
        match KeyType::from_code(u64::from(self.type_code))
            .map_err(|e| TpmError::Serialization(e.to_string()))?
        {
            KeyType::Rsa => {
                let private = rsa::RsaPrivateKey::from_pkcs1_der(&self.private_bits)
                    .map_err(|e| TpmError::Crypto(e.to_string()))?;
                let digest = Sha256::digest(data);
                private
                    .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|e| TpmError::Crypto(e.to_string()))
            }
            KeyType::Ecdsa => {
                let signing = p256::ecdsa::SigningKey::from_slice(&self.private_bits)
                    .map_err(|e| TpmError::Crypto(e.to_string()))?;
                let signature: p256::ecdsa::Signature = signing.sign(data);
                Ok(signature.to_bytes().to_vec())
            }
        }
    }

    pub(crate) fn encode(&self) -> TpmResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TpmError::Serialization(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> TpmResult<Self> {
        bincode::deserialize(bytes).map_err(|e| TpmError::Serialization(e.to_string()))
    }
}

impl Drop for KeyRecord {
    fn drop(&mut self) {
        self.private_bits.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_parsing() {
        assert_eq!(parse_locator("tpm-file:/tmp/x"), ("tpm-file", "/tmp/x"));
        assert_eq!(parse_locator("file"), ("file", ""));
        assert_eq!(parse_locator(""), ("", ""));
    }

    #[test]
    fn unknown_scheme_is_unsupported() {
        assert!(matches!(
            create_tpm("tpm-hsm:/dev/null"),
            Err(TpmError::Unsupported(_))
        ));
        assert!(matches!(
            create_tpm("osx-keychain"),
            Err(TpmError::Unsupported(_))
        ));
    }

    #[test]
    fn ecdsa_record_signs_and_verifies() {
        let record = KeyRecord::generate(&KeyParams::Ecdsa).unwrap();
        let key = record.public_key().unwrap();
        let sig = record.sign(b"payload").unwrap();
        assert!(key.verify(b"payload", &sig));
        assert!(!key.verify(b"other payload", &sig));
    }

    #[test]
    fn rsa_record_signs_and_verifies() {
        let record = KeyRecord::generate(&KeyParams::Rsa { modulus_bits: 2048 }).unwrap();
        let key = record.public_key().unwrap();
        let sig = record.sign(b"payload").unwrap();
        assert!(key.verify(b"payload", &sig));
        assert!(!key.verify(b"tampered", &sig));
    }

    #[test]
    fn record_roundtrip() {
        let record = KeyRecord::generate(&KeyParams::Ecdsa).unwrap();
        let bytes = record.encode().unwrap();
        let loaded = KeyRecord::decode(&bytes).unwrap();
        let sig = loaded.sign(b"x").unwrap();
        assert!(record.public_key().unwrap().verify(b"x", &sig));
    }
}
