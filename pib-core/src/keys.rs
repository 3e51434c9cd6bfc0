//! Public key material
//!
//! The store and the validator only ever see public halves. Key bits are
//! carried in DER form: PKCS#1 for RSA, an uncompressed SEC1 point for
//! ECDSA P-256. Verification dispatches on the recorded key type.

use crate::wire::{self, types, WireError, WireResult};
use p256::ecdsa::signature::Verifier as _;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("unknown key type code {0}")]
    UnknownType(u64),
}

/// Supported public key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Rsa,
    Ecdsa,
}

impl KeyType {
    pub fn code(self) -> u64 {
        match self {
            KeyType::Rsa => 0,
            KeyType::Ecdsa => 1,
        }
    }

    pub fn from_code(code: u64) -> Result<Self, KeyError> {
        match code {
            0 => Ok(KeyType::Rsa),
            1 => Ok(KeyType::Ecdsa),
            other => Err(KeyError::UnknownType(other)),
        }
    }
}

/// Parameters for key pair generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParams {
    Rsa { modulus_bits: usize },
    Ecdsa,
}

impl KeyParams {
    pub fn key_type(&self) -> KeyType {
        match self {
            KeyParams::Rsa { .. } => KeyType::Rsa,
            KeyParams::Ecdsa => KeyType::Ecdsa,
        }
    }
}

impl Default for KeyParams {
    fn default() -> Self {
        KeyParams::Rsa { modulus_bits: 2048 }
    }
}

/// A stored public key: algorithm plus DER bits.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    key_type: KeyType,
    bits: Vec<u8>,
}

impl PublicKey {
    pub fn new(key_type: KeyType, bits: Vec<u8>) -> Self {
        Self { key_type, bits }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    /// Verify `signature` over `message`. Any parse failure counts as a
    /// verification failure, not an error.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self.key_type {
            KeyType::Rsa => {
                let key = match rsa::RsaPublicKey::from_pkcs1_der(&self.bits) {
                    Ok(k) => k,
                    Err(_) => return false,
                };
                let digest = Sha256::digest(message);
                key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
                    .is_ok()
            }
            KeyType::Ecdsa => {
                let key = match p256::ecdsa::VerifyingKey::from_sec1_bytes(&self.bits) {
                    Ok(k) => k,
                    Err(_) => return false,
                };
                let sig = match p256::ecdsa::Signature::from_slice(signature) {
                    Ok(s) => s,
                    Err(_) => return false,
                };
                key.verify(message, &sig).is_ok()
            }
        }
    }

    /// Encode as the inner fields of a PublicKeyInfo block.
    pub fn encode_into(&self, w: &mut wire::Writer) {
        let mut inner = wire::Writer::new();
        inner.write_number(types::KEY_TYPE, self.key_type.code());
        inner.write_block(types::KEY_BITS, &self.bits);
        w.write_block(types::PUBLIC_KEY_INFO, inner.as_slice());
    }

    /// Decode from the value of a PublicKeyInfo block.
    pub fn decode_value(value: &[u8]) -> WireResult<Self> {
        let mut r = wire::Reader::new(value);
        let code = wire::tlv::decode_nonneg(r.expect(types::KEY_TYPE)?)?;
        let key_type =
            KeyType::from_code(code).map_err(|e| WireError::BadValue(e.to_string()))?;
        let bits = r.expect(types::KEY_BITS)?.to_vec();
        Ok(PublicKey { key_type, bits })
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("key_type", &self.key_type)
            .field("bits", &hex::encode(&self.bits[..self.bits.len().min(8)]))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_type_codes() {
        assert_eq!(KeyType::from_code(0).unwrap(), KeyType::Rsa);
        assert_eq!(KeyType::from_code(1).unwrap(), KeyType::Ecdsa);
        assert!(KeyType::from_code(9).is_err());
    }

    #[test]
    fn verify_rejects_garbage_bits() {
        let key = PublicKey::new(KeyType::Rsa, vec![1, 2, 3]);
        assert!(!key.verify(b"msg", b"sig"));
        let key = PublicKey::new(KeyType::Ecdsa, vec![1, 2, 3]);
        assert!(!key.verify(b"msg", b"sig"));
    }

    #[test]
    fn wire_roundtrip() {
        let key = PublicKey::new(KeyType::Ecdsa, vec![4; 65]);
        let mut w = wire::Writer::new();
        key.encode_into(&mut w);
        let bytes = w.into_bytes();

        let mut r = wire::Reader::new(&bytes);
        let value = r.expect(types::PUBLIC_KEY_INFO).unwrap();
        let decoded = PublicKey::decode_value(value).unwrap();
        assert_eq!(decoded, key);
    }
}
