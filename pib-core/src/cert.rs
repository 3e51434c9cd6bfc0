//! Identity certificates
//!
//! A certificate binds a public key to a key name, inside a validity
//! window, under a signature whose key locator names the signing
//! certificate. Certificate names follow the fixed shape
//! `<identity>/KEY/<keyId>/ID-CERT/<version>`; the public-key name is
//! recovered by stripping the `KEY`, `ID-CERT` and version components.

use crate::keys::PublicKey;
use crate::name::{Component, Name};
use crate::wire::{self, sig_types, types, WireError, WireResult};

/// X.509 attribute-name OID, used for the subject of self-issued certificates.
pub const ATTRIBUTE_NAME_OID: &str = "2.5.4.41";

pub const KEY_COMPONENT: &str = "KEY";
pub const ID_CERT_COMPONENT: &str = "ID-CERT";

/// One subject description entry (OID, value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectDescription {
    pub oid: String,
    pub value: String,
}

impl SubjectDescription {
    pub fn attribute_name(value: impl Into<String>) -> Self {
        Self {
            oid: ATTRIBUTE_NAME_OID.to_string(),
            value: value.into(),
        }
    }
}

/// Signature key locator; only the name form is supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLocator {
    pub name: Name,
}

/// Signature metadata: algorithm plus optional key locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature_type: u64,
    pub key_locator: Option<KeyLocator>,
}

impl SignatureInfo {
    pub fn sha256_with_rsa(locator: Name) -> Self {
        Self {
            signature_type: sig_types::SHA256_WITH_RSA,
            key_locator: Some(KeyLocator { name: locator }),
        }
    }

    pub fn sha256_with_ecdsa(locator: Name) -> Self {
        Self {
            signature_type: sig_types::SHA256_WITH_ECDSA,
            key_locator: Some(KeyLocator { name: locator }),
        }
    }

    pub fn encode_into(&self, w: &mut wire::Writer) {
        let mut inner = wire::Writer::new();
        inner.write_number(types::SIGNATURE_TYPE, self.signature_type);
        if let Some(locator) = &self.key_locator {
            inner.write_block(types::KEY_LOCATOR, &locator.name.wire_encode());
        }
        w.write_block(types::SIGNATURE_INFO, inner.as_slice());
    }

    pub fn wire_encode(&self) -> Vec<u8> {
        let mut w = wire::Writer::new();
        self.encode_into(&mut w);
        w.into_bytes()
    }

    pub fn wire_decode(bytes: &[u8]) -> WireResult<Self> {
        let mut r = wire::Reader::new(bytes);
        let value = r.expect(types::SIGNATURE_INFO)?;
        Self::decode_value(value)
    }

    pub fn decode_value(value: &[u8]) -> WireResult<Self> {
        let mut r = wire::Reader::new(value);
        let signature_type = wire::tlv::decode_nonneg(r.expect(types::SIGNATURE_TYPE)?)?;
        let key_locator = match r.read_optional(types::KEY_LOCATOR)? {
            Some(inner) => Some(KeyLocator {
                name: Name::wire_decode(inner)?,
            }),
            None => None,
        };
        Ok(SignatureInfo {
            signature_type,
            key_locator,
        })
    }
}

/// A decoded identity certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityCertificate {
    name: Name,
    not_before: u64,
    not_after: u64,
    subject_descriptions: Vec<SubjectDescription>,
    public_key: PublicKey,
    signature_info: SignatureInfo,
    signature_value: Vec<u8>,
}

impl IdentityCertificate {
    pub fn new(
        name: Name,
        not_before: u64,
        not_after: u64,
        subject_descriptions: Vec<SubjectDescription>,
        public_key: PublicKey,
        signature_info: SignatureInfo,
        signature_value: Vec<u8>,
    ) -> Self {
        Self {
            name,
            not_before,
            not_after,
            subject_descriptions,
            public_key,
            signature_info,
            signature_value,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn not_before(&self) -> u64 {
        self.not_before
    }

    pub fn not_after(&self) -> u64 {
        self.not_after
    }

    pub fn subject_descriptions(&self) -> &[SubjectDescription] {
        &self.subject_descriptions
    }

    pub fn public_key_info(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn signature_info(&self) -> &SignatureInfo {
        &self.signature_info
    }

    pub fn signature_value(&self) -> &[u8] {
        &self.signature_value
    }

    /// Attach the signature computed over `signed_portion()`.
    pub fn set_signature_value(&mut self, signature: Vec<u8>) {
        self.signature_value = signature;
    }

    /// Name of the certified key, derived from the certificate name.
    pub fn public_key_name(&self) -> WireResult<Name> {
        Self::certificate_name_to_public_key_name(&self.name)
    }

    /// Strip the version, `ID-CERT` and `KEY` components from a
    /// certificate name, leaving `<identity>/<keyId>`.
    pub fn certificate_name_to_public_key_name(cert_name: &Name) -> WireResult<Name> {
        let id_cert = Component::from_str_component(ID_CERT_COMPONENT);
        let key = Component::from_str_component(KEY_COMPONENT);

        let id_cert_index = (0..cert_name.len())
            .rev()
            .find(|&i| cert_name.get(i) == Some(&id_cert))
            .ok_or_else(|| {
                WireError::BadValue(format!("not a certificate name: {}", cert_name))
            })?;

        let mut result = Name::new();
        let mut key_seen = false;
        for component in cert_name.components().take(id_cert_index) {
            if !key_seen && component == &key {
                key_seen = true;
                continue;
            }
            result = result.append(component.clone());
        }
        if !key_seen {
            return Err(WireError::BadValue(format!(
                "certificate name has no KEY component: {}",
                cert_name
            )));
        }
        Ok(result)
    }

    /// Certificate name for a key: `<identity>/KEY/<keyId>/ID-CERT/<version>`.
    pub fn certificate_name_for_key(key_name: &Name, version_millis: u64) -> Name {
        let key_id = key_name.last().cloned().unwrap_or_else(|| {
            Component::from_bytes(Vec::new())
        });
        key_name
            .prefix(-1)
            .append_str(KEY_COMPONENT)
            .append(key_id)
            .append_str(ID_CERT_COMPONENT)
            .append_version(version_millis)
    }

    pub fn is_within_validity(&self, now_millis: u64) -> bool {
        self.not_before <= now_millis && now_millis <= self.not_after
    }

    /// Bytes covered by the signature: every field except SignatureValue.
    pub fn signed_portion(&self) -> Vec<u8> {
        let mut w = wire::Writer::new();
        self.encode_signed_fields(&mut w);
        w.into_bytes()
    }

    fn encode_signed_fields(&self, w: &mut wire::Writer) {
        w.write_block(types::NAME, &name_value(&self.name));

        let mut validity = wire::Writer::new();
        validity.write_number(types::NOT_BEFORE, self.not_before);
        validity.write_number(types::NOT_AFTER, self.not_after);
        w.write_block(types::VALIDITY, validity.as_slice());

        for sd in &self.subject_descriptions {
            let mut inner = wire::Writer::new();
            inner.write_block(types::DESCRIPTION_TYPE, sd.oid.as_bytes());
            inner.write_block(types::DESCRIPTION_VALUE, sd.value.as_bytes());
            w.write_block(types::SUBJECT_DESCRIPTION, inner.as_slice());
        }

        self.public_key.encode_into(w);
        self.signature_info.encode_into(w);
    }

    pub fn wire_encode(&self) -> Vec<u8> {
        let mut inner = wire::Writer::new();
        self.encode_signed_fields(&mut inner);
        inner.write_block(types::SIGNATURE_VALUE, &self.signature_value);

        let mut w = wire::Writer::new();
        w.write_block(types::CERTIFICATE, inner.as_slice());
        w.into_bytes()
    }

    pub fn wire_decode(bytes: &[u8]) -> WireResult<Self> {
        let mut outer = wire::Reader::new(bytes);
        let value = outer.expect(types::CERTIFICATE)?;
        let mut r = wire::Reader::new(value);

        let name = Name::decode_value(r.expect(types::NAME)?)?;

        let validity = r.expect(types::VALIDITY)?;
        let mut vr = wire::Reader::new(validity);
        let not_before = wire::tlv::decode_nonneg(vr.expect(types::NOT_BEFORE)?)?;
        let not_after = wire::tlv::decode_nonneg(vr.expect(types::NOT_AFTER)?)?;

        let mut subject_descriptions = Vec::new();
        while let Some(inner) = r.read_optional(types::SUBJECT_DESCRIPTION)? {
            let mut sr = wire::Reader::new(inner);
            let oid = String::from_utf8(sr.expect(types::DESCRIPTION_TYPE)?.to_vec())
                .map_err(|e| WireError::BadValue(e.to_string()))?;
            let value = String::from_utf8(sr.expect(types::DESCRIPTION_VALUE)?.to_vec())
                .map_err(|e| WireError::BadValue(e.to_string()))?;
            subject_descriptions.push(SubjectDescription { oid, value });
        }

        let public_key = PublicKey::decode_value(r.expect(types::PUBLIC_KEY_INFO)?)?;
        let signature_info = SignatureInfo::decode_value(r.expect(types::SIGNATURE_INFO)?)?;
        let signature_value = r.expect(types::SIGNATURE_VALUE)?.to_vec();

        Ok(IdentityCertificate {
            name,
            not_before,
            not_after,
            subject_descriptions,
            public_key,
            signature_info,
            signature_value,
        })
    }
}

/// Inner value of a NAME block (components only, no outer framing).
fn name_value(name: &Name) -> Vec<u8> {
    let mut w = wire::Writer::new();
    for c in name.components() {
        w.write_block(types::COMPONENT, c.as_bytes());
    }
    w.into_bytes()
}
