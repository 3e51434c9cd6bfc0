use super::*;
use crate::cert::SignatureInfo;
use crate::params::{DefaultOpt, Entity, GetParam, PibIdentity, PibType, PibUser, UpdateParam};
use crate::req;
use crate::test_utils;
use crate::tpm::Tpm;
use crate::wire;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    db: Arc<PibDb>,
    tpm: crate::tpm::MemoryTpm,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(PibDb::open(dir.path().to_str().unwrap()).unwrap());
        Self {
            _dir: dir,
            db,
            tpm: test_utils::memory_tpm(),
        }
    }

    fn validator(&self) -> Arc<PibValidator> {
        PibValidator::new(&self.db).unwrap()
    }
}

fn get_param_bytes() -> Vec<u8> {
    GetParam {
        target: PibType::Identity,
        name: Some(Name::from_uri("/test/id").unwrap()),
    }
    .wire_encode()
}

fn self_registration_param(cert: &IdentityCertificate) -> Vec<u8> {
    UpdateParam {
        entity: Entity::User(PibUser {
            mgmt_certificate: cert.clone(),
        }),
        default_opt: DefaultOpt::No,
    }
    .wire_encode()
}

/// Sign a command with an explicit SignatureInfo (for locator edge cases).
fn command_with_sig_info(
    tpm: &dyn Tpm,
    signing_key: &Name,
    sig_info: &SignatureInfo,
    user: &str,
    verb: &str,
    param: &[u8],
) -> Name {
    let unsigned = req::command_prefix()
        .append_str(user)
        .append_str(verb)
        .append_bytes(param.to_vec())
        .append_bytes(sig_info.wire_encode());

    let mut to_sign = wire::Writer::new();
    for c in unsigned.components() {
        to_sign.write_block(wire::types::COMPONENT, c.as_bytes());
    }
    let signature = tpm.sign(signing_key, to_sign.as_slice()).unwrap();
    unsigned.append_bytes(signature)
}

#[test]
fn root_entry_always_present() {
    let fx = Fixture::new();
    let validator = fx.validator();
    assert_eq!(validator.trusted_users(), vec!["root".to_string()]);
    assert!(validator.cached_mgmt_certificate("root").is_none());
}

#[test]
fn short_name_is_not_signed() {
    let fx = Fixture::new();
    let validator = fx.validator();
    let name = Name::from_uri("/localhost/pib/alice/get").unwrap();
    assert!(matches!(
        validator.validate_command(&name),
        Err(RejectReason::NotSigned(_))
    ));
}

#[test]
fn unknown_user_rejected() {
    let fx = Fixture::new();
    let validator = fx.validator();

    let bob = test_utils::user_mgmt_cert(&fx.tpm, "bob");
    let command = test_utils::signed_command(&fx.tpm, &bob, "bob", "get", &get_param_bytes());
    assert!(matches!(
        validator.validate_command(&command),
        Err(RejectReason::UnknownUser(_))
    ));
}

#[test]
fn owner_signed_command_accepted() {
    let fx = Fixture::new();
    fx.db.add_root_user(&test_utils::root_mgmt_cert(&fx.tpm)).unwrap();
    let alice = test_utils::user_mgmt_cert(&fx.tpm, "alice");
    fx.db.add_user(&alice).unwrap();

    let validator = fx.validator();
    let command =
        test_utils::signed_command(&fx.tpm, &alice, "alice", "get", &get_param_bytes());
    assert!(validator.validate_command(&command).is_ok());
}

#[test]
fn root_signed_command_accepted_for_any_user() {
    let fx = Fixture::new();
    let root = test_utils::root_mgmt_cert(&fx.tpm);
    fx.db.add_root_user(&root).unwrap();
    fx.db
        .add_user(&test_utils::user_mgmt_cert(&fx.tpm, "alice"))
        .unwrap();

    let validator = fx.validator();
    let command =
        test_utils::signed_command(&fx.tpm, &root, "alice", "delete", &get_param_bytes());
    assert!(validator.validate_command(&command).is_ok());
}

#[test]
fn foreign_mgmt_key_is_untrusted() {
    let fx = Fixture::new();
    fx.db.add_root_user(&test_utils::root_mgmt_cert(&fx.tpm)).unwrap();
    fx.db
        .add_user(&test_utils::user_mgmt_cert(&fx.tpm, "alice"))
        .unwrap();

    // Bob is not in the store; his certificate's key resolves like a
    // regular key and misses.
    let bob = test_utils::user_mgmt_cert(&fx.tpm, "bob");
    let validator = fx.validator();
    let command =
        test_utils::signed_command(&fx.tpm, &bob, "alice", "get", &get_param_bytes());
    assert!(matches!(
        validator.validate_command(&command),
        Err(RejectReason::UntrustedKey(_))
    ));
}

#[test]
fn regular_key_accepted_and_cached() {
    let fx = Fixture::new();
    let alice = test_utils::user_mgmt_cert(&fx.tpm, "alice");
    fx.db.add_user(&alice).unwrap();

    let regular = test_utils::regular_cert(&fx.tpm, "/test/id");
    fx.db.add_certificate("alice", &regular).unwrap();

    let validator = fx.validator();
    let command =
        test_utils::signed_command(&fx.tpm, &regular, "alice", "get", &get_param_bytes());
    assert!(validator.validate_command(&command).is_ok());
    // Second validation is served from the regular-key cache.
    assert!(validator.validate_command(&command).is_ok());

    // Deleting the key invalidates the cache synchronously.
    let key_name = regular.public_key_name().unwrap();
    fx.db
        .delete_key("alice", &key_name.prefix(-1), key_name.last().unwrap())
        .unwrap();
    assert!(matches!(
        validator.validate_command(&command),
        Err(RejectReason::UntrustedKey(_))
    ));
}

#[test]
fn self_registration_accepted_for_unknown_user() {
    let fx = Fixture::new();
    let validator = fx.validator();

    let dave = test_utils::user_mgmt_cert(&fx.tpm, "dave");
    let param = self_registration_param(&dave);
    let command = test_utils::signed_command(&fx.tpm, &dave, "dave", "update", &param);
    assert!(validator.validate_command(&command).is_ok());
}

#[test]
fn self_registration_rejects_mismatched_signature() {
    let fx = Fixture::new();
    let validator = fx.validator();

    // The parameter embeds dave's certificate, but the command is signed
    // by a different key.
    let dave = test_utils::user_mgmt_cert(&fx.tpm, "dave");
    let mallory = test_utils::user_mgmt_cert(&fx.tpm, "mallory");
    let param = self_registration_param(&dave);
    let command = test_utils::signed_command(&fx.tpm, &mallory, "dave", "update", &param);
    assert!(matches!(
        validator.validate_command(&command),
        Err(RejectReason::BadSignature)
    ));
}

#[test]
fn self_registration_requires_update_verb() {
    let fx = Fixture::new();
    let validator = fx.validator();

    let dave = test_utils::user_mgmt_cert(&fx.tpm, "dave");
    let param = self_registration_param(&dave);
    let command = test_utils::signed_command(&fx.tpm, &dave, "dave", "get", &param);
    assert!(matches!(
        validator.validate_command(&command),
        Err(RejectReason::UnknownUser(_))
    ));
}

#[test]
fn self_registration_requires_user_entity() {
    let fx = Fixture::new();
    let validator = fx.validator();

    let dave = test_utils::user_mgmt_cert(&fx.tpm, "dave");
    let param = UpdateParam {
        entity: Entity::Identity(PibIdentity {
            name: Name::from_uri("/test/id").unwrap(),
        }),
        default_opt: DefaultOpt::No,
    }
    .wire_encode();
    let command = test_utils::signed_command(&fx.tpm, &dave, "dave", "update", &param);
    assert!(matches!(
        validator.validate_command(&command),
        Err(RejectReason::UnknownUser(_))
    ));
}

#[test]
fn self_registration_rejects_garbage_param() {
    let fx = Fixture::new();
    let validator = fx.validator();

    let dave = test_utils::user_mgmt_cert(&fx.tpm, "dave");
    let command =
        test_utils::signed_command(&fx.tpm, &dave, "dave", "update", b"not a parameter");
    assert!(matches!(
        validator.validate_command(&command),
        Err(RejectReason::BadParam(_))
    ));
}

#[test]
fn missing_key_locator_rejected() {
    let fx = Fixture::new();
    let alice = test_utils::user_mgmt_cert(&fx.tpm, "alice");
    fx.db.add_user(&alice).unwrap();
    let validator = fx.validator();

    let signing_key = alice.public_key_name().unwrap();
    let sig_info = SignatureInfo {
        signature_type: wire::sig_types::SHA256_WITH_ECDSA,
        key_locator: None,
    };
    let command = command_with_sig_info(
        &fx.tpm,
        &signing_key,
        &sig_info,
        "alice",
        "get",
        &get_param_bytes(),
    );
    assert!(matches!(
        validator.validate_command(&command),
        Err(RejectReason::NoKeyLocator)
    ));
}

#[test]
fn malformed_locator_rejected() {
    let fx = Fixture::new();
    let alice = test_utils::user_mgmt_cert(&fx.tpm, "alice");
    fx.db.add_user(&alice).unwrap();
    let validator = fx.validator();

    // A locator that is neither a management key name nor a certificate
    // name cannot be resolved to a key.
    let signing_key = alice.public_key_name().unwrap();
    let sig_info = SignatureInfo {
        signature_type: wire::sig_types::SHA256_WITH_ECDSA,
        key_locator: Some(crate::cert::KeyLocator {
            name: Name::from_uri("/no/such/certificate").unwrap(),
        }),
    };
    let command = command_with_sig_info(
        &fx.tpm,
        &signing_key,
        &sig_info,
        "alice",
        "get",
        &get_param_bytes(),
    );
    assert!(matches!(
        validator.validate_command(&command),
        Err(RejectReason::BadKeyLocator(_))
    ));
}

#[test]
fn tampered_signature_rejected() {
    let fx = Fixture::new();
    let alice = test_utils::user_mgmt_cert(&fx.tpm, "alice");
    fx.db.add_user(&alice).unwrap();
    let validator = fx.validator();

    let command =
        test_utils::signed_command(&fx.tpm, &alice, "alice", "get", &get_param_bytes());
    // Flip a byte in the signature component.
    let mut broken_sig = command.last().unwrap().as_bytes().to_vec();
    broken_sig[0] ^= 0xFF;
    let tampered = command.prefix(-1).append_bytes(broken_sig);

    assert!(matches!(
        validator.validate_command(&tampered),
        Err(RejectReason::BadSignature)
    ));
}

#[test]
fn deleted_user_disappears_from_cache() {
    let fx = Fixture::new();
    let alice = test_utils::user_mgmt_cert(&fx.tpm, "alice");
    fx.db.add_user(&alice).unwrap();
    let validator = fx.validator();

    let command =
        test_utils::signed_command(&fx.tpm, &alice, "alice", "get", &get_param_bytes());
    assert!(validator.validate_command(&command).is_ok());

    fx.db.delete_user("alice").unwrap();
    assert!(matches!(
        validator.validate_command(&command),
        Err(RejectReason::UnknownUser(_))
    ));
}

#[test]
fn replaced_mgmt_certificate_takes_effect() {
    let fx = Fixture::new();
    let old_cert = test_utils::user_mgmt_cert(&fx.tpm, "alice");
    fx.db.add_user(&old_cert).unwrap();
    let validator = fx.validator();

    let new_cert = test_utils::user_mgmt_cert(&fx.tpm, "alice");
    fx.db.add_user(&new_cert).unwrap();

    let with_new =
        test_utils::signed_command(&fx.tpm, &new_cert, "alice", "get", &get_param_bytes());
    assert!(validator.validate_command(&with_new).is_ok());

    // The old locator no longer names the management key; it resolves as
    // a regular key and misses.
    let with_old =
        test_utils::signed_command(&fx.tpm, &old_cert, "alice", "get", &get_param_bytes());
    assert!(matches!(
        validator.validate_command(&with_old),
        Err(RejectReason::UntrustedKey(_))
    ));
}

#[test]
fn data_packets_always_rejected() {
    let fx = Fixture::new();
    let validator = fx.validator();
    assert_eq!(
        validator.validate_data(b"any data").unwrap_err(),
        RejectReason::BadUsage
    );
}

#[test]
fn event_driven_cache_matches_fresh_construction() {
    let fx = Fixture::new();
    let live = fx.validator();

    // Apply a mutation sequence with the live validator attached.
    fx.db.add_root_user(&test_utils::root_mgmt_cert(&fx.tpm)).unwrap();
    let alice = test_utils::user_mgmt_cert(&fx.tpm, "alice");
    let bob = test_utils::user_mgmt_cert(&fx.tpm, "bob");
    fx.db.add_user(&alice).unwrap();
    fx.db.add_user(&bob).unwrap();
    fx.db.add_user(&test_utils::user_mgmt_cert(&fx.tpm, "carol")).unwrap();
    fx.db.delete_user("bob").unwrap();
    fx.db.add_root_user(&test_utils::root_mgmt_cert(&fx.tpm)).unwrap();

    // A validator built from scratch over the final state must agree.
    let fresh = fx.validator();
    assert_eq!(live.trusted_users(), fresh.trusted_users());
    for user in live.trusted_users() {
        let a = live.cached_mgmt_certificate(&user).map(|c| c.wire_encode());
        let b = fresh.cached_mgmt_certificate(&user).map(|c| c.wire_encode());
        assert_eq!(a, b, "cache mismatch for {}", user);
    }
}

#[test]
fn bounded_cache_evicts_oldest() {
    let mut cache = BoundedKeyCache::new(2);
    let k = |s: &str| Name::from_uri(s).unwrap();
    let key = PublicKey::new(crate::keys::KeyType::Ecdsa, vec![4; 65]);

    cache.insert(k("/a"), key.clone());
    cache.insert(k("/b"), key.clone());
    // Touch /a so /b becomes the eviction candidate.
    assert!(cache.get(&k("/a")).is_some());
    cache.insert(k("/c"), key.clone());

    assert!(cache.get(&k("/a")).is_some());
    assert!(cache.get(&k("/b")).is_none());
    assert!(cache.get(&k("/c")).is_some());
}
