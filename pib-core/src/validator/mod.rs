//! Management command authentication
//!
//! The validator keeps an in-memory trust view of the store: one entry
//! per user holding the management certificate plus a bounded cache of
//! regular keys seen in recent commands. The view is preloaded at
//! construction and kept consistent through store notifications, so a
//! command is always judged against the database as of the latest
//! committed write.
//!
//! Trust model: a command is accepted when its signature verifies under
//! the root management key, the target user's management key, or a
//! regular key already stored under that user. The single exception is
//! self-registration: an `update` of a User entity from an unknown
//! user, verified against the management certificate embedded in the
//! parameter itself.

use crate::cert::IdentityCertificate;
use crate::db::{DbObserver, PibDb};
use crate::keys::PublicKey;
use crate::name::{Component, Name};
use crate::params::{Entity, UpdateParam};
use crate::req::SignedRequest;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tracing::{debug, warn};

const ROOT: &str = "root";
const REGULAR_KEY_CACHE_CAPACITY: usize = 100;

/// Why a command (or data packet) was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RejectReason {
    #[error("command is not signed: {0}")]
    NotSigned(String),

    #[error("user does not exist: {0}")]
    UnknownUser(String),

    #[error("cannot decode parameter: {0}")]
    BadParam(String),

    #[error("signature carries no key locator")]
    NoKeyLocator,

    #[error("bad key locator: {0}")]
    BadKeyLocator(String),

    #[error("public key is not trusted: {0}")]
    UntrustedKey(String),

    #[error("cannot verify signature")]
    BadSignature,

    #[error("the PIB does not validate data packets")]
    BadUsage,
}

/// Per-user slice of the trust cache.
struct UserKeyCache {
    mgmt_certificate: Option<IdentityCertificate>,
    regular_keys: BoundedKeyCache,
}

impl UserKeyCache {
    fn empty() -> Self {
        Self {
            mgmt_certificate: None,
            regular_keys: BoundedKeyCache::new(REGULAR_KEY_CACHE_CAPACITY),
        }
    }

    fn with_certificate(cert: Option<IdentityCertificate>) -> Self {
        Self {
            mgmt_certificate: cert,
            regular_keys: BoundedKeyCache::new(REGULAR_KEY_CACHE_CAPACITY),
        }
    }
}

/// LRU-bounded map of regular keys by public-key name.
struct BoundedKeyCache {
    capacity: usize,
    map: HashMap<Name, PublicKey>,
    order: VecDeque<Name>,
}

impl BoundedKeyCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, name: &Name) -> Option<PublicKey> {
        let key = self.map.get(name).cloned()?;
        self.touch(name);
        Some(key)
    }

    fn insert(&mut self, name: Name, key: PublicKey) {
        if self.map.insert(name.clone(), key).is_none() {
            self.order.push_back(name);
        } else {
            self.touch(&name);
        }
        while self.map.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn remove(&mut self, name: &Name) {
        if self.map.remove(name).is_some() {
            self.order.retain(|n| n != name);
        }
    }

    fn touch(&mut self, name: &Name) {
        self.order.retain(|n| n != name);
        self.order.push_back(name.clone());
    }
}

/// The command authenticator.
pub struct PibValidator {
    db: Arc<PibDb>,
    cache: Mutex<HashMap<String, UserKeyCache>>,
}

impl PibValidator {
    /// Build a validator over `db`, preload one cache entry per stored
    /// user, and register for store notifications.
    pub fn new(db: &Arc<PibDb>) -> Result<Arc<Self>, crate::db::DbError> {
        let validator = Arc::new(PibValidator {
            db: Arc::clone(db),
            cache: Mutex::new(HashMap::new()),
        });

        {
            let mut cache = validator.lock_cache();
            cache.insert(ROOT.to_string(), UserKeyCache::empty());
            for user in db.list_users()? {
                let cert = db.get_user_mgmt_certificate(&user)?;
                if cert.is_some() {
                    cache.insert(user, UserKeyCache::with_certificate(cert));
                }
            }
        }

        db.register_observer(Arc::downgrade(&validator) as Weak<dyn DbObserver>);
        Ok(validator)
    }

    /// Decide whether a signed command is acceptable.
    pub fn validate_command(&self, name: &Name) -> Result<(), RejectReason> {
        let request = SignedRequest::from_name(name.clone())
            .map_err(|_| RejectReason::NotSigned(name.to_uri()))?;
        let user = request.user();

        let user_known = self.lock_cache().contains_key(&user);
        if !user_known {
            return self.validate_self_registration(&request, &user);
        }

        let sig_info = request
            .signature_info()
            .map_err(|e| RejectReason::NotSigned(e.to_string()))?;
        let locator = sig_info.key_locator.ok_or(RejectReason::NoKeyLocator)?;

        let public_key = self.resolve_key(&user, &locator.name)?;
        if public_key.verify(&request.signed_portion(), request.signature_value()) {
            Ok(())
        } else {
            debug!(user, command = %name, "signature verification failed");
            Err(RejectReason::BadSignature)
        }
    }

    /// The PIB never expresses interests expecting authenticated replies.
    pub fn validate_data(&self, _data: &[u8]) -> Result<(), RejectReason> {
        Err(RejectReason::BadUsage)
    }

    /// Users currently present in the trust cache, sorted.
    pub fn trusted_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.lock_cache().keys().cloned().collect();
        users.sort();
        users
    }

    /// Management certificate currently cached for `user`.
    pub fn cached_mgmt_certificate(&self, user: &str) -> Option<IdentityCertificate> {
        self.lock_cache()
            .get(user)
            .and_then(|entry| entry.mgmt_certificate.clone())
    }

    /// The one path that accepts a command from an unknown user: an
    /// `update` installing that user's own management certificate,
    /// signed by the matching private key.
    fn validate_self_registration(
        &self,
        request: &SignedRequest,
        user: &str,
    ) -> Result<(), RejectReason> {
        if request.verb() != UpdateParam::VERB {
            return Err(RejectReason::UnknownUser(user.to_string()));
        }

        let param = UpdateParam::wire_decode(request.param_bytes())
            .map_err(|e| RejectReason::BadParam(e.to_string()))?;
        let embedded = match &param.entity {
            Entity::User(pib_user) => &pib_user.mgmt_certificate,
            _ => return Err(RejectReason::UnknownUser(user.to_string())),
        };

        // Decoding the signature must still succeed even though the
        // verification key comes from the parameter.
        request
            .signature_info()
            .map_err(|e| RejectReason::NotSigned(e.to_string()))?;

        if embedded
            .public_key_info()
            .verify(&request.signed_portion(), request.signature_value())
        {
            debug!(user, "self-registration accepted");
            Ok(())
        } else {
            Err(RejectReason::BadSignature)
        }
    }

    /// Pick the verification key for a locator: root management key,
    /// then the user's management key, then a regular key (cached or
    /// fetched from the store).
    fn resolve_key(&self, user: &str, locator: &Name) -> Result<PublicKey, RejectReason> {
        let mut cache = self.lock_cache();

        if let Some(root_cert) = cache.get(ROOT).and_then(|e| e.mgmt_certificate.as_ref()) {
            if *locator == root_cert.name().prefix(-1) {
                return Ok(root_cert.public_key_info().clone());
            }
        }

        if let Some(user_cert) = cache.get(user).and_then(|e| e.mgmt_certificate.as_ref()) {
            if *locator == user_cert.name().prefix(-1) {
                return Ok(user_cert.public_key_info().clone());
            }
        }

        let key_name = IdentityCertificate::certificate_name_to_public_key_name(locator)
            .map_err(|e| RejectReason::BadKeyLocator(e.to_string()))?;

        if let Some(entry) = cache.get_mut(user) {
            if let Some(key) = entry.regular_keys.get(&key_name) {
                return Ok(key);
            }
        }

        let identity = key_name.prefix(-1);
        let key_id = key_name
            .last()
            .ok_or_else(|| RejectReason::BadKeyLocator("empty key name".into()))?;

        match self.db.get_key(user, &identity, key_id) {
            Ok(Some(key)) => {
                if let Some(entry) = cache.get_mut(user) {
                    entry.regular_keys.insert(key_name, key.clone());
                }
                Ok(key)
            }
            Ok(None) => Err(RejectReason::UntrustedKey(key_name.to_uri())),
            Err(e) => {
                warn!(user, error = %e, "key lookup failed during validation");
                Err(RejectReason::UntrustedKey(key_name.to_uri()))
            }
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<String, UserKeyCache>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DbObserver for PibValidator {
    fn on_user_changed(&self, user: &str) {
        match self.db.has_user(user) {
            Ok(true) => {
                let cert = match self.db.get_user_mgmt_certificate(user) {
                    Ok(cert) => cert,
                    Err(e) => {
                        warn!(user, error = %e, "cannot refresh management certificate");
                        return;
                    }
                };
                let mut cache = self.lock_cache();
                cache
                    .entry(user.to_string())
                    .or_insert_with(UserKeyCache::empty)
                    .mgmt_certificate = cert;
            }
            Ok(false) => {
                let mut cache = self.lock_cache();
                cache.remove(user);
                // The root entry stays resident even with no certificate.
                if user == ROOT {
                    cache.insert(ROOT.to_string(), UserKeyCache::empty());
                }
            }
            Err(e) => warn!(user, error = %e, "cannot refresh trust cache"),
        }
    }

    fn on_key_deleted(&self, user: &str, identity: &Name, key_id: &Component) {
        let still_present = self.db.has_key(user, identity, key_id).unwrap_or(false);
        if !still_present {
            let key_name = identity.clone().append(key_id.clone());
            if let Some(entry) = self.lock_cache().get_mut(user) {
                entry.regular_keys.remove(&key_name);
            }
        }
    }
}

#[cfg(test)]
mod tests;
