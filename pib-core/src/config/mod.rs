//! Service configuration
//!
//! An INI-style file with three required keys:
//!
//! ```ini
//! pib-dir  = /var/lib/pib
//! tpm-dir  = /var/lib/pib/tpm
//! pib-root = root.cert
//! ```
//!
//! `pib-root` points at the root-user management certificate and is
//! resolved relative to the configuration file's own directory. Section
//! headers and `;` / `#` comments are accepted and ignored.

use crate::cert::IdentityCertificate;
use std::fs;
use std::path::{Path, PathBuf};

mod error;

pub use error::ConfigError;

const KEY_PIB_DIR: &str = "pib-dir";
const KEY_TPM_DIR: &str = "tpm-dir";
const KEY_PIB_ROOT: &str = "pib-root";

/// Parsed configuration plus the loaded root certificate.
#[derive(Debug, Clone)]
pub struct PibConfig {
    db_dir: String,
    tpm_dir: String,
    root_cert_path: PathBuf,
    root_cert: IdentityCertificate,
}

impl PibConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(e.to_string()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&contents, base_dir)
    }

    /// Parse configuration text; relative paths resolve against `base_dir`.
    pub fn parse(contents: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut db_dir = None;
        let mut tpm_dir = None;
        let mut root = None;

        for (index, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty()
                || line.starts_with(';')
                || line.starts_with('#')
                || (line.starts_with('[') && line.ends_with(']'))
            {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or(ConfigError::Parse {
                line: index + 1,
                message: "expected key=value".into(),
            })?;
            match key.trim() {
                KEY_PIB_DIR => db_dir = Some(value.trim().to_string()),
                KEY_TPM_DIR => tpm_dir = Some(value.trim().to_string()),
                KEY_PIB_ROOT => root = Some(value.trim().to_string()),
                _ => {} // unknown keys are ignored
            }
        }

        let db_dir = db_dir.ok_or(ConfigError::Missing(KEY_PIB_DIR))?;
        let tpm_dir = tpm_dir.ok_or(ConfigError::Missing(KEY_TPM_DIR))?;
        let root = root.ok_or(ConfigError::Missing(KEY_PIB_ROOT))?;

        let root_cert_path = if Path::new(&root).is_absolute() {
            PathBuf::from(&root)
        } else {
            base_dir.join(&root)
        };
        let bytes =
            fs::read(&root_cert_path).map_err(|e| ConfigError::BadCert(e.to_string()))?;
        let root_cert = IdentityCertificate::wire_decode(&bytes)
            .map_err(|e| ConfigError::BadCert(e.to_string()))?;

        Ok(PibConfig {
            db_dir,
            tpm_dir,
            root_cert_path,
            root_cert,
        })
    }

    pub fn db_dir(&self) -> &str {
        &self.db_dir
    }

    pub fn tpm_dir(&self) -> &str {
        &self.tpm_dir
    }

    pub fn root_cert_path(&self) -> &Path {
        &self.root_cert_path
    }

    pub fn root_cert(&self) -> &IdentityCertificate {
        &self.root_cert
    }

    /// Locator for the file TPM under `tpm-dir`.
    pub fn tpm_locator(&self) -> String {
        format!("tpm-file:{}", self.tpm_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;
    use crate::test_utils;
    use std::fs;
    use tempfile::TempDir;

    fn write_root_cert(dir: &Path) -> PathBuf {
        let tpm = test_utils::memory_tpm();
        let key_name = Name::from_uri("/localhost/pib/user/dsk-0").unwrap();
        let cert = test_utils::self_signed_cert(&tpm, &key_name);
        let path = dir.join("root.cert");
        fs::write(&path, cert.wire_encode()).unwrap();
        path
    }

    #[test]
    fn parse_full_config() {
        let dir = TempDir::new().unwrap();
        write_root_cert(dir.path());

        let contents = "\
; PIB service configuration
tpm-dir = /tmp/pib/tpm
pib-root = root.cert
pib-dir = /tmp/pib
";
        let config = PibConfig::parse(contents, dir.path()).unwrap();
        assert_eq!(config.db_dir(), "/tmp/pib");
        assert_eq!(config.tpm_dir(), "/tmp/pib/tpm");
        assert_eq!(config.root_cert_path(), dir.path().join("root.cert"));
        assert_eq!(config.tpm_locator(), "tpm-file:/tmp/pib/tpm");
    }

    #[test]
    fn each_key_is_required() {
        let dir = TempDir::new().unwrap();
        write_root_cert(dir.path());

        let complete = [
            ("pib-dir", "pib-dir = /tmp/pib"),
            ("tpm-dir", "tpm-dir = /tmp/pib/tpm"),
            ("pib-root", "pib-root = root.cert"),
        ];
        for skip in 0..complete.len() {
            let contents: String = complete
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, (_, line))| format!("{}\n", line))
                .collect();
            let err = PibConfig::parse(&contents, dir.path()).unwrap_err();
            assert!(
                matches!(err, ConfigError::Missing(key) if key == complete[skip].0),
                "expected missing {}",
                complete[skip].0
            );
        }
    }

    #[test]
    fn sections_and_comments_ignored() {
        let dir = TempDir::new().unwrap();
        write_root_cert(dir.path());

        let contents = "\
[pib]
# database location
pib-dir = /data/pib
tpm-dir = /data/tpm
pib-root = root.cert
";
        assert!(PibConfig::parse(contents, dir.path()).is_ok());
    }

    #[test]
    fn malformed_line_rejected() {
        let dir = TempDir::new().unwrap();
        let err = PibConfig::parse("pib-dir /tmp/pib\n", dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 1, .. }));
    }

    #[test]
    fn absolute_root_path_kept() {
        let dir = TempDir::new().unwrap();
        let cert_path = write_root_cert(dir.path());

        let contents = format!(
            "pib-dir = /tmp/pib\ntpm-dir = /tmp/tpm\npib-root = {}\n",
            cert_path.display()
        );
        let config = PibConfig::parse(&contents, Path::new("/elsewhere")).unwrap();
        assert_eq!(config.root_cert_path(), cert_path);
    }

    #[test]
    fn unreadable_root_cert_fails() {
        let dir = TempDir::new().unwrap();
        let contents = "pib-dir = /tmp/pib\ntpm-dir = /tmp/tpm\npib-root = missing.cert\n";
        let err = PibConfig::parse(contents, dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::BadCert(_)));
    }
}
