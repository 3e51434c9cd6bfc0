//! File-backed TPM
//!
//! One file per key pair under the base directory, named by the SHA-256
//! of the key name. Writes go through a temp file and rename so a crash
//! never leaves a half-written key.

use super::{KeyRecord, Tpm, TpmError, TpmResult};
use crate::keys::{KeyParams, PublicKey};
use crate::name::Name;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub struct FileTpm {
    base_dir: PathBuf,
}

impl FileTpm {
    /// Open a file TPM at `location`; empty selects `$HOME/.ndn/tpm-file`.
    pub fn new(location: &str) -> TpmResult<Self> {
        let base_dir = if location.is_empty() {
            let home = std::env::var("HOME").map_err(|_| {
                TpmError::Unsupported("HOME is not set and no TPM location given".into())
            })?;
            Path::new(&home).join(".ndn").join("tpm-file")
        } else {
            PathBuf::from(location)
        };
        fs::create_dir_all(&base_dir)?;
        Ok(FileTpm { base_dir })
    }

    fn key_path(&self, name: &Name) -> PathBuf {
        let digest = Sha256::digest(name.to_uri().as_bytes());
        self.base_dir.join(format!("{}.key", hex::encode(digest)))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> TpmResult<()> {
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, data)?;
        fs::rename(temp_path, path)?;
        Ok(())
    }

    fn load(&self, name: &Name) -> TpmResult<KeyRecord> {
        let path = self.key_path(name);
        if !path.exists() {
            return Err(TpmError::KeyNotFound(name.to_uri()));
        }
        KeyRecord::decode(&fs::read(path)?)
    }
}

impl Tpm for FileTpm {
    fn generate_key_pair(&self, name: &Name, params: &KeyParams) -> TpmResult<()> {
        let record = KeyRecord::generate(params)?;
        self.write_atomic(&self.key_path(name), &record.encode()?)
    }

    fn delete_key_pair(&self, name: &Name) -> TpmResult<()> {
        let path = self.key_path(name);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn get_public_key(&self, name: &Name) -> TpmResult<PublicKey> {
        self.load(name)?.public_key()
    }

    fn has_key(&self, name: &Name) -> bool {
        self.key_path(name).exists()
    }

    fn sign(&self, name: &Name, data: &[u8]) -> TpmResult<Vec<u8>> {
        self.load(name)?.sign(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generate_sign_verify() {
        let dir = TempDir::new().unwrap();
        let tpm = FileTpm::new(dir.path().to_str().unwrap()).unwrap();
        let name = Name::from_uri("/test/key/k0").unwrap();

        assert!(!tpm.has_key(&name));
        tpm.generate_key_pair(&name, &KeyParams::Ecdsa).unwrap();
        assert!(tpm.has_key(&name));

        let key = tpm.get_public_key(&name).unwrap();
        let sig = tpm.sign(&name, b"data").unwrap();
        assert!(key.verify(b"data", &sig));
    }

    #[test]
    fn keys_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let name = Name::from_uri("/test/key/k1").unwrap();

        {
            let tpm = FileTpm::new(dir.path().to_str().unwrap()).unwrap();
            tpm.generate_key_pair(&name, &KeyParams::Ecdsa).unwrap();
        }

        let tpm = FileTpm::new(dir.path().to_str().unwrap()).unwrap();
        assert!(tpm.has_key(&name));
        let sig = tpm.sign(&name, b"again").unwrap();
        assert!(tpm.get_public_key(&name).unwrap().verify(b"again", &sig));
    }

    #[test]
    fn missing_key_reported() {
        let dir = TempDir::new().unwrap();
        let tpm = FileTpm::new(dir.path().to_str().unwrap()).unwrap();
        let name = Name::from_uri("/absent").unwrap();
        assert!(matches!(
            tpm.get_public_key(&name),
            Err(TpmError::KeyNotFound(_))
        ));
        assert!(matches!(tpm.sign(&name, b"x"), Err(TpmError::KeyNotFound(_))));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let tpm = FileTpm::new(dir.path().to_str().unwrap()).unwrap();
        let name = Name::from_uri("/test/key/k2").unwrap();

        tpm.generate_key_pair(&name, &KeyParams::Ecdsa).unwrap();
        tpm.delete_key_pair(&name).unwrap();
        assert!(!tpm.has_key(&name));
        tpm.delete_key_pair(&name).unwrap();
    }
}
