//! Signed management commands
//!
//! A command is a seven-component name:
//! `/localhost/pib/<user>/<verb>/<param>/<sigInfo>/<sigValue>`.
//! The signature covers the TLV encoding of every component before the
//! final one, so the parameter and the signature metadata are both
//! bound by it.

use crate::cert::SignatureInfo;
use crate::keys::KeyType;
use crate::name::Name;
use crate::tpm::{Tpm, TpmResult};
use crate::wire::{self, sig_types, types, WireError, WireResult};

pub const SIGNED_COMMAND_SIZE: usize = 7;

pub const OFFSET_USER: usize = 2;
pub const OFFSET_VERB: usize = 3;
pub const OFFSET_PARAM: usize = 4;
pub const OFFSET_SIG_INFO: usize = 5;
pub const OFFSET_SIG_VALUE: usize = 6;

/// `/localhost/pib`, the root of the command namespace.
pub fn command_prefix() -> Name {
    Name::new().append_str("localhost").append_str("pib")
}

/// A parsed signed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    name: Name,
}

impl SignedRequest {
    pub fn from_name(name: Name) -> WireResult<Self> {
        if name.len() != SIGNED_COMMAND_SIZE {
            return Err(WireError::BadValue(format!(
                "not a signed command: {}",
                name
            )));
        }
        Ok(SignedRequest { name })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn user(&self) -> String {
        self.component_uri(OFFSET_USER)
    }

    pub fn verb(&self) -> String {
        self.component_uri(OFFSET_VERB)
    }

    pub fn param_bytes(&self) -> &[u8] {
        self.component_bytes(OFFSET_PARAM)
    }

    pub fn signature_info(&self) -> WireResult<SignatureInfo> {
        SignatureInfo::wire_decode(self.component_bytes(OFFSET_SIG_INFO))
    }

    pub fn signature_value(&self) -> &[u8] {
        self.component_bytes(OFFSET_SIG_VALUE)
    }

    /// Bytes covered by the signature.
    pub fn signed_portion(&self) -> Vec<u8> {
        signed_portion(&self.name)
    }

    fn component_bytes(&self, index: usize) -> &[u8] {
        self.name
            .get(index)
            .map(|c| c.as_bytes())
            .unwrap_or_default()
    }

    fn component_uri(&self, index: usize) -> String {
        self.name
            .get(index)
            .map(|c| c.to_uri())
            .unwrap_or_default()
    }
}

/// TLV encoding of every component of `name` except the last.
pub fn signed_portion(name: &Name) -> Vec<u8> {
    let mut w = wire::Writer::new();
    for c in name.components().take(name.len().saturating_sub(1)) {
        w.write_block(types::COMPONENT, c.as_bytes());
    }
    w.into_bytes()
}

/// Build and sign a command name. The key locator names the signing
/// certificate without its version component.
pub fn sign_command(
    tpm: &dyn Tpm,
    signing_key: &Name,
    locator: Name,
    user: &str,
    verb: &str,
    param: &[u8],
) -> TpmResult<Name> {
    let signature_type = match tpm.get_public_key(signing_key)?.key_type() {
        KeyType::Rsa => sig_types::SHA256_WITH_RSA,
        KeyType::Ecdsa => sig_types::SHA256_WITH_ECDSA,
    };
    let sig_info = SignatureInfo {
        signature_type,
        key_locator: Some(crate::cert::KeyLocator { name: locator }),
    };

    let unsigned = command_prefix()
        .append_str(user)
        .append_str(verb)
        .append_bytes(param.to_vec())
        .append_bytes(sig_info.wire_encode());

    // The signature covers everything up to and including the sigInfo
    // component; appending sigValue afterwards leaves it outside.
    let mut to_sign = wire::Writer::new();
    for c in unsigned.components() {
        to_sign.write_block(types::COMPONENT, c.as_bytes());
    }
    let signature = tpm.sign(signing_key, to_sign.as_slice())?;

    Ok(unsigned.append_bytes(signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyParams;
    use crate::tpm::MemoryTpm;

    #[test]
    fn rejects_short_names() {
        let name = Name::from_uri("/localhost/pib/alice/get").unwrap();
        assert!(SignedRequest::from_name(name).is_err());
    }

    #[test]
    fn sign_and_reparse() {
        let tpm = MemoryTpm::new();
        let key_name = Name::from_uri("/localhost/pib/alice/mgmt/dsk-1").unwrap();
        tpm.generate_key_pair(&key_name, &KeyParams::Ecdsa).unwrap();

        let locator = Name::from_uri("/localhost/pib/alice/mgmt/KEY/dsk-1/ID-CERT").unwrap();
        let name =
            sign_command(&tpm, &key_name, locator.clone(), "alice", "get", b"param").unwrap();

        let request = SignedRequest::from_name(name).unwrap();
        assert_eq!(request.user(), "alice");
        assert_eq!(request.verb(), "get");
        assert_eq!(request.param_bytes(), b"param");

        let info = request.signature_info().unwrap();
        assert_eq!(info.key_locator.unwrap().name, locator);

        let key = tpm.get_public_key(&key_name).unwrap();
        assert!(key.verify(&request.signed_portion(), request.signature_value()));
    }

    #[test]
    fn tampered_verb_fails_verification() {
        let tpm = MemoryTpm::new();
        let key_name = Name::from_uri("/localhost/pib/alice/mgmt/dsk-1").unwrap();
        tpm.generate_key_pair(&key_name, &KeyParams::Ecdsa).unwrap();
        let locator = Name::from_uri("/localhost/pib/alice/mgmt/KEY/dsk-1/ID-CERT").unwrap();

        let signed =
            sign_command(&tpm, &key_name, locator, "alice", "get", b"param").unwrap();

        // Rebuild the name with a different verb but the original signature.
        let mut tampered = Name::new();
        for (i, c) in signed.components().enumerate() {
            if i == OFFSET_VERB {
                tampered = tampered.append_str("delete");
            } else {
                tampered = tampered.append(c.clone());
            }
        }

        let request = SignedRequest::from_name(tampered).unwrap();
        let key = tpm.get_public_key(&key_name).unwrap();
        assert!(!key.verify(&request.signed_portion(), request.signature_value()));
    }
}
