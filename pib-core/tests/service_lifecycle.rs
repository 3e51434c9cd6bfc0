//! End-to-end service bootstrap scenarios against a file TPM and a
//! loopback face.

use pib_core::face::Face;
use pib_core::name::Name;
use pib_core::service::{Pib, ServiceError};
use pib_core::test_utils;
use pib_core::tpm::TpmError;
use pib_core::{MemoryFace, RejectReason};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn tpm_locator(dir: &TempDir) -> String {
    format!("tpm-file:{}/tpm", dir.path().display())
}

#[test]
fn bootstrap_idempotence_and_binding_checks() {
    let dir = TempDir::new().unwrap();
    let db_dir = dir.path().join("pib");
    let db_dir = db_dir.to_str().unwrap();
    let locator = tpm_locator(&dir);

    let face: Arc<MemoryFace> = Arc::new(MemoryFace::new());
    let face_dyn: Arc<dyn Face> = face.clone();

    let first_cert = {
        let pib = Pib::new(face_dyn.clone(), db_dir, &locator, "testUser").unwrap();

        // A fresh management certificate under the owner's mgmt branch.
        let cert_name = pib.mgmt_certificate().name();
        assert!(Name::from_uri("/localhost/pib/testUser/mgmt/KEY")
            .unwrap()
            .is_prefix_of(cert_name));
        let key_name = pib.mgmt_certificate().public_key_name().unwrap();
        assert!(pib.tpm().has_key(&key_name));
        assert!(key_name.last().unwrap().to_uri().starts_with("dsk-"));

        // Prefix and mgmt filter are installed.
        let prefix = Name::from_uri("/localhost/pib/testUser").unwrap();
        assert_eq!(face.registered_prefixes(), vec![prefix.clone()]);
        assert_eq!(
            face.filter_prefixes(),
            vec![prefix.append_str("mgmt")]
        );

        // Any interest under /mgmt publishes the certificate.
        face.express_interest(&Name::from_uri("/localhost/pib/testUser/mgmt").unwrap());
        let published = face.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0], pib.mgmt_certificate().wire_encode());

        pib.mgmt_certificate().wire_encode()
    };

    // Destruction unregisters everything.
    assert!(face.registered_prefixes().is_empty());
    assert!(face.filter_prefixes().is_empty());

    // Reconstruction with the same arguments adopts the stored
    // certificate unchanged.
    {
        let pib = Pib::new(face_dyn.clone(), db_dir, &locator, "testUser").unwrap();
        assert_eq!(pib.mgmt_certificate().wire_encode(), first_cert);
    }

    // A different owner or TPM locator is refused.
    assert!(matches!(
        Pib::new(face_dyn.clone(), db_dir, &locator, "wrongUser"),
        Err(ServiceError::OwnerMismatch { .. })
    ));
    assert!(matches!(
        Pib::new(face_dyn.clone(), db_dir, "tpm-file:/somewhere/else", "testUser"),
        Err(ServiceError::TpmMismatch { .. })
    ));
}

#[test]
fn unsupported_tpm_scheme_fails_construction() {
    let dir = TempDir::new().unwrap();
    let db_dir = dir.path().join("pib");
    let face: Arc<dyn Face> = Arc::new(MemoryFace::new());

    let result = Pib::new(face, db_dir.to_str().unwrap(), "tpm-hsm:/dev/null", "testUser");
    assert!(matches!(
        result,
        Err(ServiceError::Tpm(TpmError::Unsupported(_)))
    ));
}

#[test]
fn lost_private_key_triggers_reissue() {
    let dir = TempDir::new().unwrap();
    let db_dir = dir.path().join("pib");
    let db_dir = db_dir.to_str().unwrap();
    let tpm_dir = dir.path().join("tpm");
    let locator = format!("tpm-file:{}", tpm_dir.display());
    let face: Arc<dyn Face> = Arc::new(MemoryFace::new());

    let first_cert = {
        let pib = Pib::new(face.clone(), db_dir, &locator, "testUser").unwrap();
        pib.mgmt_certificate().wire_encode()
    };

    // Simulate key loss: wipe the TPM directory.
    fs::remove_dir_all(&tpm_dir).unwrap();

    let pib = Pib::new(face.clone(), db_dir, &locator, "testUser").unwrap();
    assert_ne!(pib.mgmt_certificate().wire_encode(), first_cert);

    let key_name = pib.mgmt_certificate().public_key_name().unwrap();
    assert!(pib.tpm().has_key(&key_name));

    // The reissued certificate is also what the store now records.
    let stored = pib.db().mgmt_certificate().unwrap().unwrap();
    assert_eq!(stored.wire_encode(), pib.mgmt_certificate().wire_encode());
}

#[test]
fn bootstrap_wires_validator_to_store() {
    let dir = TempDir::new().unwrap();
    let db_dir = dir.path().join("pib");
    let db_dir = db_dir.to_str().unwrap();
    let locator = tpm_locator(&dir);
    let face: Arc<dyn Face> = Arc::new(MemoryFace::new());

    let pib = Pib::new(face, db_dir, &locator, "testUser").unwrap();

    // Install a root and a user through the store; the validator sees
    // them without reconstruction.
    let tpm = test_utils::memory_tpm();
    pib.db().add_root_user(&test_utils::root_mgmt_cert(&tpm)).unwrap();
    let alice = test_utils::user_mgmt_cert(&tpm, "alice");
    pib.db().add_user(&alice).unwrap();

    let param = pib_core::params::GetParam {
        target: pib_core::params::PibType::User,
        name: None,
    }
    .wire_encode();
    let command = test_utils::signed_command(&tpm, &alice, "alice", "get", &param);
    assert!(pib.validator().validate_command(&command).is_ok());

    pib.db().delete_user("alice").unwrap();
    assert!(matches!(
        pib.validator().validate_command(&command),
        Err(RejectReason::UnknownUser(_))
    ));
}
