//! Wire encoding layer
//!
//! Everything the service puts on the wire is framed as TLV blocks:
//! varint type, varint length, value. The assigned type numbers are
//! stable; changing them breaks every previously issued certificate.

use thiserror::Error;

pub mod tlv;

pub use tlv::{Reader, Writer};

/// Assigned TLV type numbers.
pub mod types {
    pub const NAME: u64 = 7;
    pub const COMPONENT: u64 = 8;

    pub const SIGNATURE_INFO: u64 = 22;
    pub const SIGNATURE_VALUE: u64 = 23;
    pub const KEY_LOCATOR: u64 = 28;

    pub const CERTIFICATE: u64 = 32;
    pub const VALIDITY: u64 = 33;
    pub const NOT_BEFORE: u64 = 34;
    pub const NOT_AFTER: u64 = 35;
    pub const SUBJECT_DESCRIPTION: u64 = 36;
    pub const DESCRIPTION_TYPE: u64 = 37;
    pub const DESCRIPTION_VALUE: u64 = 38;
    pub const PUBLIC_KEY_INFO: u64 = 39;
    pub const KEY_TYPE: u64 = 40;
    pub const KEY_BITS: u64 = 41;
    pub const SIGNATURE_TYPE: u64 = 42;

    pub const PIB_USER: u64 = 128;
    pub const PIB_IDENTITY: u64 = 129;
    pub const PIB_PUBLIC_KEY: u64 = 130;
    pub const PIB_CERTIFICATE: u64 = 131;

    pub const GET_PARAM: u64 = 132;
    pub const DEFAULT_PARAM: u64 = 133;
    pub const LIST_PARAM: u64 = 134;
    pub const UPDATE_PARAM: u64 = 135;
    pub const DELETE_PARAM: u64 = 136;

    pub const PIB_ERROR: u64 = 137;
    pub const PIB_TYPE: u64 = 138;
    pub const DEFAULT_OPT: u64 = 139;
    pub const ERROR_CODE: u64 = 140;
}

/// Signature algorithm codes carried in SignatureType.
pub mod sig_types {
    pub const SHA256_WITH_RSA: u64 = 1;
    pub const SHA256_WITH_ECDSA: u64 = 3;
}

/// Errors raised while decoding TLV blocks
#[derive(Debug, Error)]
pub enum WireError {
    #[error("truncated block")]
    Truncated,

    #[error("unexpected TLV type: expected {expected}, found {found}")]
    UnexpectedType { expected: u64, found: u64 },

    #[error("bad value: {0}")]
    BadValue(String),
}

pub type WireResult<T> = Result<T, WireError>;
