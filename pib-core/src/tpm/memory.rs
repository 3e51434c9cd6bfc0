//! In-memory TPM (non-persistent, for tests)

use super::{KeyRecord, Tpm, TpmError, TpmResult};
use crate::keys::{KeyParams, PublicKey};
use crate::name::Name;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Default)]
pub struct MemoryTpm {
    keys: RwLock<HashMap<Name, KeyRecord>>,
}

impl MemoryTpm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tpm for MemoryTpm {
    fn generate_key_pair(&self, name: &Name, params: &KeyParams) -> TpmResult<()> {
        let record = KeyRecord::generate(params)?;
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), record);
        Ok(())
    }

    fn delete_key_pair(&self, name: &Name) -> TpmResult<()> {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(())
    }

    fn get_public_key(&self, name: &Name) -> TpmResult<PublicKey> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .ok_or_else(|| TpmError::KeyNotFound(name.to_uri()))?
            .public_key()
    }

    fn has_key(&self, name: &Name) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    fn sign(&self, name: &Name, data: &[u8]) -> TpmResult<Vec<u8>> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .ok_or_else(|| TpmError::KeyNotFound(name.to_uri()))?
            .sign(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_sign() {
        let tpm = MemoryTpm::new();
        let name = Name::from_uri("/mem/key").unwrap();

        tpm.generate_key_pair(&name, &KeyParams::Ecdsa).unwrap();
        let key = tpm.get_public_key(&name).unwrap();
        let sig = tpm.sign(&name, b"hello").unwrap();
        assert!(key.verify(b"hello", &sig));

        tpm.delete_key_pair(&name).unwrap();
        assert!(!tpm.has_key(&name));
    }
}
