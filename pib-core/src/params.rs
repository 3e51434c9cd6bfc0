//! Management command parameters
//!
//! Every signed command carries one parameter block as a name component:
//! get / update / delete / list / default. The five share the outer TLV
//! framing and differ in payload; update carries a tagged variant over
//! the four entity kinds. Error replies are a single code.

use crate::cert::IdentityCertificate;
use crate::keys::PublicKey;
use crate::name::Name;
use crate::wire::{self, types, WireError, WireResult};

/// Entity kind selector used by get / delete / list / default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PibType {
    User,
    Identity,
    Key,
    Certificate,
}

impl PibType {
    pub fn code(self) -> u64 {
        match self {
            PibType::User => 1,
            PibType::Identity => 2,
            PibType::Key => 3,
            PibType::Certificate => 4,
        }
    }

    pub fn from_code(code: u64) -> WireResult<Self> {
        match code {
            1 => Ok(PibType::User),
            2 => Ok(PibType::Identity),
            3 => Ok(PibType::Key),
            4 => Ok(PibType::Certificate),
            other => Err(WireError::BadValue(format!("bad entity selector {}", other))),
        }
    }
}

/// Whether an update should also become the new default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultOpt {
    #[default]
    No,
    Yes,
}

impl DefaultOpt {
    fn code(self) -> u64 {
        match self {
            DefaultOpt::No => 0,
            DefaultOpt::Yes => 1,
        }
    }

    fn from_code(code: u64) -> WireResult<Self> {
        match code {
            0 => Ok(DefaultOpt::No),
            1 => Ok(DefaultOpt::Yes),
            other => Err(WireError::BadValue(format!("bad default option {}", other))),
        }
    }
}

/// User entity payload: the management certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PibUser {
    pub mgmt_certificate: IdentityCertificate,
}

/// Identity entity payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PibIdentity {
    pub name: Name,
}

/// Public key entity payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PibPublicKey {
    pub key_name: Name,
    pub key: PublicKey,
}

/// Certificate entity payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PibCertificate {
    pub certificate: IdentityCertificate,
}

/// Tagged entity payload carried by update commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    User(PibUser),
    Identity(PibIdentity),
    PublicKey(PibPublicKey),
    Certificate(PibCertificate),
}

impl Entity {
    pub fn pib_type(&self) -> PibType {
        match self {
            Entity::User(_) => PibType::User,
            Entity::Identity(_) => PibType::Identity,
            Entity::PublicKey(_) => PibType::Key,
            Entity::Certificate(_) => PibType::Certificate,
        }
    }

    fn encode_into(&self, w: &mut wire::Writer) {
        match self {
            Entity::User(u) => {
                w.write_block(types::PIB_USER, &u.mgmt_certificate.wire_encode());
            }
            Entity::Identity(i) => {
                w.write_block(types::PIB_IDENTITY, &i.name.wire_encode());
            }
            Entity::PublicKey(k) => {
                let mut inner = wire::Writer::new();
                inner.write_block(types::NAME, &name_value(&k.key_name));
                k.key.encode_into(&mut inner);
                w.write_block(types::PIB_PUBLIC_KEY, inner.as_slice());
            }
            Entity::Certificate(c) => {
                w.write_block(types::PIB_CERTIFICATE, &c.certificate.wire_encode());
            }
        }
    }

    fn decode(r: &mut wire::Reader<'_>) -> WireResult<Self> {
        let (typ, value) = r.read_block()?;
        match typ {
            types::PIB_USER => Ok(Entity::User(PibUser {
                mgmt_certificate: IdentityCertificate::wire_decode(value)?,
            })),
            types::PIB_IDENTITY => Ok(Entity::Identity(PibIdentity {
                name: Name::wire_decode(value)?,
            })),
            types::PIB_PUBLIC_KEY => {
                let mut ir = wire::Reader::new(value);
                let key_name = Name::decode_value(ir.expect(types::NAME)?)?;
                let key = PublicKey::decode_value(ir.expect(types::PUBLIC_KEY_INFO)?)?;
                Ok(Entity::PublicKey(PibPublicKey { key_name, key }))
            }
            types::PIB_CERTIFICATE => Ok(Entity::Certificate(PibCertificate {
                certificate: IdentityCertificate::wire_decode(value)?,
            })),
            found => Err(WireError::BadValue(format!("bad entity block type {}", found))),
        }
    }
}

/// `get`: read one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetParam {
    pub target: PibType,
    pub name: Option<Name>,
}

/// `update`: install or replace one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateParam {
    pub entity: Entity,
    pub default_opt: DefaultOpt,
}

/// `delete`: remove one entity (and its subtree). A user is identified
/// by the command's own user component, so no name is carried for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteParam {
    pub target: PibType,
    pub name: Option<Name>,
}

/// `list`: enumerate children of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParam {
    pub target: PibType,
    pub name: Option<Name>,
}

/// `default`: read a default pointer. Reading a user's default identity
/// needs no name; the other targets name the entity holding the pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultParam {
    pub target: PibType,
    pub name: Option<Name>,
}

impl GetParam {
    pub const VERB: &'static str = "get";

    pub fn wire_encode(&self) -> Vec<u8> {
        encode_selector_param(types::GET_PARAM, self.target, self.name.as_ref())
    }

    pub fn wire_decode(bytes: &[u8]) -> WireResult<Self> {
        let (target, name) = decode_selector_param(types::GET_PARAM, bytes)?;
        if target != PibType::User && name.is_none() {
            return Err(WireError::BadValue("get requires a target name".into()));
        }
        Ok(Self { target, name })
    }
}

impl UpdateParam {
    pub const VERB: &'static str = "update";

    pub fn wire_encode(&self) -> Vec<u8> {
        let mut inner = wire::Writer::new();
        self.entity.encode_into(&mut inner);
        inner.write_number(types::DEFAULT_OPT, self.default_opt.code());

        let mut w = wire::Writer::new();
        w.write_block(types::UPDATE_PARAM, inner.as_slice());
        w.into_bytes()
    }

    pub fn wire_decode(bytes: &[u8]) -> WireResult<Self> {
        let mut outer = wire::Reader::new(bytes);
        let value = outer.expect(types::UPDATE_PARAM)?;
        let mut r = wire::Reader::new(value);
        let entity = Entity::decode(&mut r)?;
        let default_opt = match r.read_optional(types::DEFAULT_OPT)? {
            Some(v) => DefaultOpt::from_code(wire::tlv::decode_nonneg(v)?)?,
            None => DefaultOpt::No,
        };
        Ok(Self { entity, default_opt })
    }
}

impl DeleteParam {
    pub const VERB: &'static str = "delete";

    pub fn wire_encode(&self) -> Vec<u8> {
        encode_selector_param(types::DELETE_PARAM, self.target, self.name.as_ref())
    }

    pub fn wire_decode(bytes: &[u8]) -> WireResult<Self> {
        let (target, name) = decode_selector_param(types::DELETE_PARAM, bytes)?;
        if target != PibType::User && name.is_none() {
            return Err(WireError::BadValue("delete requires a target name".into()));
        }
        Ok(Self { target, name })
    }
}

impl ListParam {
    pub const VERB: &'static str = "list";

    pub fn wire_encode(&self) -> Vec<u8> {
        encode_selector_param(types::LIST_PARAM, self.target, self.name.as_ref())
    }

    pub fn wire_decode(bytes: &[u8]) -> WireResult<Self> {
        let (target, name) = decode_selector_param(types::LIST_PARAM, bytes)?;
        Ok(Self { target, name })
    }
}

impl DefaultParam {
    pub const VERB: &'static str = "default";

    pub fn wire_encode(&self) -> Vec<u8> {
        encode_selector_param(types::DEFAULT_PARAM, self.target, self.name.as_ref())
    }

    pub fn wire_decode(bytes: &[u8]) -> WireResult<Self> {
        let (target, name) = decode_selector_param(types::DEFAULT_PARAM, bytes)?;
        if target != PibType::User && name.is_none() {
            return Err(WireError::BadValue("default requires a target name".into()));
        }
        Ok(Self { target, name })
    }
}

/// Reply codes for failed (or successful) command dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success,
    NonExistingId,
    NonExistingKey,
    NonExistingCert,
    WrongParam,
    VerificationFailed,
}

impl ErrorCode {
    pub fn code(self) -> u64 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::NonExistingId => 1,
            ErrorCode::NonExistingKey => 2,
            ErrorCode::NonExistingCert => 3,
            ErrorCode::WrongParam => 4,
            ErrorCode::VerificationFailed => 5,
        }
    }

    pub fn from_code(code: u64) -> WireResult<Self> {
        match code {
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::NonExistingId),
            2 => Ok(ErrorCode::NonExistingKey),
            3 => Ok(ErrorCode::NonExistingCert),
            4 => Ok(ErrorCode::WrongParam),
            5 => Ok(ErrorCode::VerificationFailed),
            other => Err(WireError::BadValue(format!("bad error code {}", other))),
        }
    }
}

/// Wire form of a command reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PibErrorResponse {
    pub code: ErrorCode,
}

impl PibErrorResponse {
    pub fn wire_encode(&self) -> Vec<u8> {
        let mut inner = wire::Writer::new();
        inner.write_number(types::ERROR_CODE, self.code.code());
        let mut w = wire::Writer::new();
        w.write_block(types::PIB_ERROR, inner.as_slice());
        w.into_bytes()
    }

    pub fn wire_decode(bytes: &[u8]) -> WireResult<Self> {
        let mut outer = wire::Reader::new(bytes);
        let value = outer.expect(types::PIB_ERROR)?;
        let mut r = wire::Reader::new(value);
        let code = ErrorCode::from_code(wire::tlv::decode_nonneg(r.expect(types::ERROR_CODE)?)?)?;
        Ok(Self { code })
    }
}

fn encode_selector_param(outer_type: u64, target: PibType, name: Option<&Name>) -> Vec<u8> {
    let mut inner = wire::Writer::new();
    inner.write_number(types::PIB_TYPE, target.code());
    if let Some(name) = name {
        inner.write_block(types::NAME, &name_value(name));
    }
    let mut w = wire::Writer::new();
    w.write_block(outer_type, inner.as_slice());
    w.into_bytes()
}

fn decode_selector_param(outer_type: u64, bytes: &[u8]) -> WireResult<(PibType, Option<Name>)> {
    let mut outer = wire::Reader::new(bytes);
    let value = outer.expect(outer_type)?;
    let mut r = wire::Reader::new(value);
    let target = PibType::from_code(wire::tlv::decode_nonneg(r.expect(types::PIB_TYPE)?)?)?;
    let name = match r.read_optional(types::NAME)? {
        Some(v) => Some(Name::decode_value(v)?),
        None => None,
    };
    Ok((target, name))
}

fn name_value(name: &Name) -> Vec<u8> {
    let mut w = wire::Writer::new();
    for c in name.components() {
        w.write_block(types::COMPONENT, c.as_bytes());
    }
    w.into_bytes()
}
