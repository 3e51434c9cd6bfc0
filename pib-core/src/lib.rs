//! Public-key Information Base
//!
//! A per-host service that stores and serves the public cryptographic
//! material of a named-data networking stack: users, identities, public
//! keys and certificates, with default pointers at every level. Private
//! keys live in a TPM behind the [`tpm::Tpm`] trait; signed management
//! commands are authenticated by the [`validator::PibValidator`] against
//! a trust hierarchy rooted at a single management certificate.

pub mod cert;
pub mod config;
pub mod db;
pub mod face;
pub mod keys;
pub mod logging;
pub mod name;
pub mod params;
pub mod req;
pub mod service;
pub mod test_utils;
pub mod tpm;
pub mod validator;
pub mod wire;

pub use cert::IdentityCertificate;
pub use config::{ConfigError, PibConfig};
pub use db::{DbError, DbObserver, PibDb};
pub use face::{Face, MemoryFace};
pub use keys::{KeyParams, KeyType, PublicKey};
pub use logging::{init_logging, LogConfig, LogLevel};
pub use name::{Component, Name};
pub use service::{Pib, ServiceError};
pub use tpm::{FileTpm, MemoryTpm, Tpm, TpmError};
pub use validator::{PibValidator, RejectReason};
