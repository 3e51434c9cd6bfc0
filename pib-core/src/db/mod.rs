//! Persistent public-key store
//!
//! Four tables under `<db_dir>/pib.db`: users, identities, keys,
//! certificates, keyed by (user), (user, identity), (user, identity,
//! key_id) and (user, certificate_name). A fifth single-row table holds
//! the service bindings: owner name, TPM locator and the service
//! management certificate.
//!
//! Mutations that change the trust view notify registered observers
//! synchronously, after the write has committed.

use crate::cert::IdentityCertificate;
use crate::keys::{KeyType, PublicKey};
use crate::name::{Component, Name};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, Weak};
use thiserror::Error;
use tracing::debug;

mod observer;

pub use observer::DbObserver;

const DB_FILE: &str = "pib.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user                  TEXT NOT NULL,
    default_identity      BLOB,
    local_management_cert BLOB NOT NULL,
    PRIMARY KEY (user)
);

CREATE TABLE IF NOT EXISTS identities (
    user           TEXT NOT NULL,
    identity       BLOB NOT NULL,
    default_key_id BLOB,
    PRIMARY KEY (user, identity)
);

CREATE TABLE IF NOT EXISTS keys (
    user              TEXT NOT NULL,
    identity          BLOB NOT NULL,
    key_id            BLOB NOT NULL,
    key_type          INTEGER NOT NULL,
    key_bits          BLOB NOT NULL,
    default_cert_name BLOB,
    PRIMARY KEY (user, identity, key_id)
);

CREATE TABLE IF NOT EXISTS certificates (
    user             TEXT NOT NULL,
    certificate_name BLOB NOT NULL,
    identity         BLOB NOT NULL,
    key_id           BLOB NOT NULL,
    certificate_data BLOB NOT NULL,
    PRIMARY KEY (user, certificate_name)
);

CREATE TABLE IF NOT EXISTS service_info (
    id               INTEGER PRIMARY KEY CHECK (id = 1),
    owner            TEXT,
    tpm_locator      TEXT,
    mgmt_certificate BLOB
);

INSERT OR IGNORE INTO service_info (id) VALUES (1);
"#;

/// Errors raised by the store
#[derive(Debug, Error)]
pub enum DbError {
    #[error("cannot open PIB database: {0}")]
    Open(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupted record: {0}")]
    Corrupted(String),

    #[error("bad name shape: {0}")]
    BadShape(String),

    #[error("{0}")]
    NoDefault(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::Storage(err.to_string())
    }
}

impl From<r2d2::Error> for DbError {
    fn from(err: r2d2::Error) -> Self {
        DbError::Storage(err.to_string())
    }
}

/// File locking discipline selected at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockingMode {
    /// The engine's native file locking.
    #[default]
    Native,
    /// A `pib.db.lock` dot file held for the lifetime of the handle, for
    /// filesystems where native locking is unavailable.
    DotFile,
}

/// The persistent store.
pub struct PibDb {
    pool: Pool<SqliteConnectionManager>,
    observers: Mutex<Vec<Weak<dyn DbObserver>>>,
    lock_file: Option<PathBuf>,
}

impl PibDb {
    /// Open (creating if needed) the database under `db_dir`. An empty
    /// `db_dir` selects `$HOME/.ndn`.
    pub fn open(db_dir: &str) -> DbResult<Self> {
        Self::open_with_locking(db_dir, LockingMode::Native)
    }

    pub fn open_with_locking(db_dir: &str, locking: LockingMode) -> DbResult<Self> {
        let dir = resolve_db_dir(db_dir)?;
        fs::create_dir_all(&dir).map_err(|e| DbError::Open(e.to_string()))?;
        let db_path = dir.join(DB_FILE);

        let lock_file = match locking {
            LockingMode::Native => None,
            LockingMode::DotFile => Some(acquire_dot_lock(&db_path)?),
        };

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| DbError::Open(e.to_string()))?;

        let db = PibDb {
            pool,
            observers: Mutex::new(Vec::new()),
            lock_file,
        };
        db.conn()?
            .execute_batch(SCHEMA)
            .map_err(|e| DbError::Open(e.to_string()))?;
        debug!(path = %db_path.display(), "PIB database open");
        Ok(db)
    }

    /// Register an observer for user and key change events. Dead weak
    /// references are pruned on each notification.
    pub fn register_observer(&self, observer: Weak<dyn DbObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    // ===== User management =====

    /// Install or replace the root user. The certified key name must have
    /// the four-component shape `/localhost/pib/user/<KeyId>`.
    pub fn add_root_user(&self, certificate: &IdentityCertificate) -> DbResult<()> {
        let key_name = certified_key_name(certificate)?;
        if key_name.len() != 4 || !user_branch().is_prefix_of(&key_name) {
            return Err(DbError::BadShape(format!(
                "root management key must be /localhost/pib/user/<KeyId>, got {}",
                key_name
            )));
        }

        self.upsert_user("root", certificate)?;
        self.notify_user_changed("root");
        Ok(())
    }

    /// Install or replace an ordinary user, named by the fourth component
    /// of the certified key name `/localhost/pib/user/<UserName>/<KeyId>`.
    /// The explicit name `root` is reserved.
    pub fn add_user(&self, certificate: &IdentityCertificate) -> DbResult<()> {
        let key_name = certified_key_name(certificate)?;
        if key_name.len() != 5 || !user_branch().is_prefix_of(&key_name) {
            return Err(DbError::BadShape(format!(
                "user management key must be /localhost/pib/user/<UserName>/<KeyId>, got {}",
                key_name
            )));
        }

        let user = key_name.get(3).map(|c| c.to_uri()).unwrap_or_default();
        if user.eq_ignore_ascii_case("root") {
            return Err(DbError::BadShape("user name 'root' is reserved".into()));
        }

        self.upsert_user(&user, certificate)?;
        self.notify_user_changed(&user);
        Ok(())
    }

    fn upsert_user(&self, user: &str, certificate: &IdentityCertificate) -> DbResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO users (user, local_management_cert) VALUES (?1, ?2)",
            params![user, certificate.wire_encode()],
        )?;
        debug!(user, "management certificate stored");
        Ok(())
    }

    /// Delete a user and everything below it, atomically. No-op for an
    /// unknown user.
    pub fn delete_user(&self, user: &str) -> DbResult<()> {
        if !self.has_user(user)? {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM certificates WHERE user=?1", params![user])?;
        tx.execute("DELETE FROM keys WHERE user=?1", params![user])?;
        tx.execute("DELETE FROM identities WHERE user=?1", params![user])?;
        tx.execute("DELETE FROM users WHERE user=?1", params![user])?;
        tx.commit()?;
        debug!(user, "user deleted");

        self.notify_user_changed(user);
        Ok(())
    }

    pub fn has_user(&self, user: &str) -> DbResult<bool> {
        let present = self
            .conn()?
            .query_row(
                "SELECT 1 FROM users WHERE user=?1",
                params![user],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(present)
    }

    pub fn get_user_mgmt_certificate(
        &self,
        user: &str,
    ) -> DbResult<Option<IdentityCertificate>> {
        let blob: Option<Vec<u8>> = self
            .conn()?
            .query_row(
                "SELECT local_management_cert FROM users WHERE user=?1",
                params![user],
                |row| row.get(0),
            )
            .optional()?;
        blob.map(|b| decode_certificate(&b)).transpose()
    }

    pub fn list_users(&self) -> DbResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT user FROM users")?;
        let users = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    // ===== Identity management =====

    pub fn add_identity(&self, user: &str, identity: &Name) -> DbResult<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO identities (user, identity) VALUES (?1, ?2)",
            params![user, identity.wire_encode()],
        )?;
        Ok(())
    }

    /// Delete an identity and its keys and certificates.
    pub fn delete_identity(&self, user: &str, identity: &Name) -> DbResult<()> {
        let identity_blob = identity.wire_encode();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM certificates WHERE identity=?1 AND user=?2",
            params![identity_blob, user],
        )?;
        tx.execute(
            "DELETE FROM keys WHERE identity=?1 AND user=?2",
            params![identity_blob, user],
        )?;
        tx.execute(
            "DELETE FROM identities WHERE identity=?1 AND user=?2",
            params![identity_blob, user],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn has_identity(&self, user: &str, identity: &Name) -> DbResult<bool> {
        let present = self
            .conn()?
            .query_row(
                "SELECT 1 FROM identities WHERE identity=?1 AND user=?2",
                params![identity.wire_encode(), user],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(present)
    }

    /// Point the user's default at `identity`. Silently a no-op when the
    /// user row does not exist.
    pub fn set_default_identity_of_user(&self, user: &str, identity: &Name) -> DbResult<()> {
        self.conn()?.execute(
            "UPDATE users SET default_identity=?1 WHERE user=?2",
            params![identity.wire_encode(), user],
        )?;
        Ok(())
    }

    pub fn get_default_identity_of_user(&self, user: &str) -> DbResult<Name> {
        let blob: Option<Option<Vec<u8>>> = self
            .conn()?
            .query_row(
                "SELECT default_identity FROM users WHERE user=?1",
                params![user],
                |row| row.get(0),
            )
            .optional()?;
        match blob.flatten() {
            Some(b) => Name::wire_decode(&b).map_err(|e| DbError::Corrupted(e.to_string())),
            None => Err(DbError::NoDefault(format!(
                "no default identity for user '{}'",
                user
            ))),
        }
    }

    pub fn list_identities_of_user(&self, user: &str) -> DbResult<Vec<Name>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT identity FROM identities WHERE user=?1")?;
        let rows = stmt
            .query_map(params![user], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|b| Name::wire_decode(b).map_err(|e| DbError::Corrupted(e.to_string())))
            .collect()
    }

    // ===== Key management =====

    /// Insert a key row, creating the parent identity if absent.
    pub fn add_key(
        &self,
        user: &str,
        identity: &Name,
        key_id: &Component,
        key: &PublicKey,
    ) -> DbResult<()> {
        if !self.has_identity(user, identity)? {
            self.add_identity(user, identity)?;
        }
        self.conn()?.execute(
            "INSERT OR IGNORE INTO keys (user, identity, key_id, key_type, key_bits) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user,
                identity.wire_encode(),
                key_id.as_bytes(),
                key.key_type().code() as i64,
                key.bits(),
            ],
        )?;
        Ok(())
    }

    pub fn get_key(
        &self,
        user: &str,
        identity: &Name,
        key_id: &Component,
    ) -> DbResult<Option<PublicKey>> {
        let row: Option<(i64, Vec<u8>)> = self
            .conn()?
            .query_row(
                "SELECT key_type, key_bits FROM keys \
                 WHERE identity=?1 AND key_id=?2 AND user=?3",
                params![identity.wire_encode(), key_id.as_bytes(), user],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(code, bits)| {
            let key_type = KeyType::from_code(code as u64)
                .map_err(|e| DbError::Corrupted(e.to_string()))?;
            Ok(PublicKey::new(key_type, bits))
        })
        .transpose()
    }

    /// Delete a key and its certificates. Notifies observers only when a
    /// key row was actually removed.
    pub fn delete_key(&self, user: &str, identity: &Name, key_id: &Component) -> DbResult<()> {
        let identity_blob = identity.wire_encode();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM certificates WHERE identity=?1 AND key_id=?2 AND user=?3",
            params![identity_blob, key_id.as_bytes(), user],
        )?;
        let removed = tx.execute(
            "DELETE FROM keys WHERE identity=?1 AND key_id=?2 AND user=?3",
            params![identity_blob, key_id.as_bytes(), user],
        )?;
        tx.commit()?;

        if removed > 0 {
            debug!(user, identity = %identity, "key deleted");
            self.notify_key_deleted(user, identity, key_id);
        }
        Ok(())
    }

    pub fn has_key(&self, user: &str, identity: &Name, key_id: &Component) -> DbResult<bool> {
        let present = self
            .conn()?
            .query_row(
                "SELECT 1 FROM keys WHERE identity=?1 AND key_id=?2 AND user=?3",
                params![identity.wire_encode(), key_id.as_bytes(), user],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(present)
    }

    pub fn set_default_key_id_of_identity(
        &self,
        user: &str,
        identity: &Name,
        key_id: &Component,
    ) -> DbResult<()> {
        self.conn()?.execute(
            "UPDATE identities SET default_key_id=?1 WHERE identity=?2 AND user=?3",
            params![key_id.as_bytes(), identity.wire_encode(), user],
        )?;
        Ok(())
    }

    /// Default key of an identity, returned as the full key name
    /// (identity plus key id component).
    pub fn get_default_key_name_of_identity(
        &self,
        user: &str,
        identity: &Name,
    ) -> DbResult<Name> {
        let blob: Option<Option<Vec<u8>>> = self
            .conn()?
            .query_row(
                "SELECT default_key_id FROM identities WHERE identity=?1 AND user=?2",
                params![identity.wire_encode(), user],
                |row| row.get(0),
            )
            .optional()?;
        match blob.flatten() {
            Some(b) => Ok(identity.clone().append(Component::from_bytes(b))),
            None => Err(DbError::NoDefault(format!(
                "no default key for identity '{}'",
                identity
            ))),
        }
    }

    pub fn list_key_names_of_identity(
        &self,
        user: &str,
        identity: &Name,
    ) -> DbResult<Vec<Name>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key_id FROM keys WHERE identity=?1 AND user=?2")?;
        let rows = stmt
            .query_map(params![identity.wire_encode(), user], |row| {
                row.get::<_, Vec<u8>>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|b| identity.clone().append(Component::from_bytes(b)))
            .collect())
    }

    // ===== Certificate management =====

    /// Insert a certificate row, creating the parent key (from the
    /// certificate's own public-key info) if absent.
    pub fn add_certificate(
        &self,
        user: &str,
        certificate: &IdentityCertificate,
    ) -> DbResult<()> {
        let key_name = certified_key_name(certificate)?;
        let identity = key_name.prefix(-1);
        let key_id = key_name
            .last()
            .cloned()
            .ok_or_else(|| DbError::BadShape("certified key name is empty".into()))?;

        if !self.has_key(user, &identity, &key_id)? {
            self.add_key(user, &identity, &key_id, certificate.public_key_info())?;
        }

        self.conn()?.execute(
            "INSERT OR IGNORE INTO certificates \
             (user, certificate_name, identity, key_id, certificate_data) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user,
                certificate.name().wire_encode(),
                identity.wire_encode(),
                key_id.as_bytes(),
                certificate.wire_encode(),
            ],
        )?;
        Ok(())
    }

    pub fn get_certificate(
        &self,
        user: &str,
        certificate_name: &Name,
    ) -> DbResult<Option<IdentityCertificate>> {
        let blob: Option<Vec<u8>> = self
            .conn()?
            .query_row(
                "SELECT certificate_data FROM certificates \
                 WHERE certificate_name=?1 AND user=?2",
                params![certificate_name.wire_encode(), user],
                |row| row.get(0),
            )
            .optional()?;
        blob.map(|b| decode_certificate(&b)).transpose()
    }

    pub fn delete_certificate(&self, user: &str, certificate_name: &Name) -> DbResult<()> {
        self.conn()?.execute(
            "DELETE FROM certificates WHERE certificate_name=?1 AND user=?2",
            params![certificate_name.wire_encode(), user],
        )?;
        Ok(())
    }

    pub fn has_certificate(&self, user: &str, certificate_name: &Name) -> DbResult<bool> {
        let present = self
            .conn()?
            .query_row(
                "SELECT 1 FROM certificates WHERE certificate_name=?1 AND user=?2",
                params![certificate_name.wire_encode(), user],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(present)
    }

    pub fn set_default_cert_name_of_key(
        &self,
        user: &str,
        identity: &Name,
        key_id: &Component,
        certificate_name: &Name,
    ) -> DbResult<()> {
        self.conn()?.execute(
            "UPDATE keys SET default_cert_name=?1 \
             WHERE identity=?2 AND key_id=?3 AND user=?4",
            params![
                certificate_name.wire_encode(),
                identity.wire_encode(),
                key_id.as_bytes(),
                user,
            ],
        )?;
        Ok(())
    }

    pub fn get_default_cert_name_of_key(
        &self,
        user: &str,
        identity: &Name,
        key_id: &Component,
    ) -> DbResult<Name> {
        let blob: Option<Option<Vec<u8>>> = self
            .conn()?
            .query_row(
                "SELECT default_cert_name FROM keys \
                 WHERE identity=?1 AND key_id=?2 AND user=?3",
                params![identity.wire_encode(), key_id.as_bytes(), user],
                |row| row.get(0),
            )
            .optional()?;
        match blob.flatten() {
            Some(b) => Name::wire_decode(&b).map_err(|e| DbError::Corrupted(e.to_string())),
            None => Err(DbError::NoDefault(format!(
                "no default certificate for key '{}' of '{}'",
                key_id.to_uri(),
                identity
            ))),
        }
    }

    pub fn list_cert_names_of_key(
        &self,
        user: &str,
        identity: &Name,
        key_id: &Component,
    ) -> DbResult<Vec<Name>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT certificate_name FROM certificates \
             WHERE identity=?1 AND key_id=?2 AND user=?3",
        )?;
        let rows = stmt
            .query_map(
                params![identity.wire_encode(), key_id.as_bytes(), user],
                |row| row.get::<_, Vec<u8>>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|b| Name::wire_decode(b).map_err(|e| DbError::Corrupted(e.to_string())))
            .collect()
    }

    // ===== Service bindings =====

    pub fn owner_name(&self) -> DbResult<Option<String>> {
        self.service_text("owner")
    }

    pub fn set_owner_name(&self, owner: &str) -> DbResult<()> {
        self.conn()?.execute(
            "UPDATE service_info SET owner=?1 WHERE id=1",
            params![owner],
        )?;
        Ok(())
    }

    pub fn tpm_locator(&self) -> DbResult<Option<String>> {
        self.service_text("tpm_locator")
    }

    pub fn set_tpm_locator(&self, locator: &str) -> DbResult<()> {
        self.conn()?.execute(
            "UPDATE service_info SET tpm_locator=?1 WHERE id=1",
            params![locator],
        )?;
        Ok(())
    }

    /// The service's own management certificate, if one has been issued.
    pub fn mgmt_certificate(&self) -> DbResult<Option<IdentityCertificate>> {
        let blob: Option<Option<Vec<u8>>> = self
            .conn()?
            .query_row(
                "SELECT mgmt_certificate FROM service_info WHERE id=1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        blob.flatten().map(|b| decode_certificate(&b)).transpose()
    }

    pub fn update_mgmt_certificate(&self, certificate: &IdentityCertificate) -> DbResult<()> {
        self.conn()?.execute(
            "UPDATE service_info SET mgmt_certificate=?1 WHERE id=1",
            params![certificate.wire_encode()],
        )?;
        Ok(())
    }

    fn service_text(&self, column: &str) -> DbResult<Option<String>> {
        let value: Option<Option<String>> = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM service_info WHERE id=1", column),
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten().filter(|s| !s.is_empty()))
    }

    // ===== Internals =====

    fn conn(&self) -> DbResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn notify_user_changed(&self, user: &str) {
        for observer in self.live_observers() {
            observer.on_user_changed(user);
        }
    }

    fn notify_key_deleted(&self, user: &str, identity: &Name, key_id: &Component) {
        for observer in self.live_observers() {
            observer.on_key_deleted(user, identity, key_id);
        }
    }

    fn live_observers(&self) -> Vec<std::sync::Arc<dyn DbObserver>> {
        let mut guard = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.retain(|w| w.strong_count() > 0);
        guard.iter().filter_map(Weak::upgrade).collect()
    }
}

impl Drop for PibDb {
    fn drop(&mut self) {
        if let Some(path) = &self.lock_file {
            let _ = fs::remove_file(path);
        }
    }
}

fn resolve_db_dir(db_dir: &str) -> DbResult<PathBuf> {
    if db_dir.is_empty() {
        let home = std::env::var("HOME")
            .map_err(|_| DbError::Open("HOME is not set and no db directory given".into()))?;
        Ok(Path::new(&home).join(".ndn"))
    } else {
        Ok(PathBuf::from(db_dir))
    }
}

fn acquire_dot_lock(db_path: &Path) -> DbResult<PathBuf> {
    let lock_path = db_path.with_extension("db.lock");
    match File::options().write(true).create_new(true).open(&lock_path) {
        Ok(_) => Ok(lock_path),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(DbError::Open(format!(
            "database is locked by another process ({})",
            lock_path.display()
        ))),
        Err(e) => Err(DbError::Open(e.to_string())),
    }
}

fn certified_key_name(certificate: &IdentityCertificate) -> DbResult<Name> {
    certificate
        .public_key_name()
        .map_err(|e| DbError::BadShape(e.to_string()))
}

fn user_branch() -> Name {
    Name::new()
        .append_str("localhost")
        .append_str("pib")
        .append_str("user")
}

fn decode_certificate(blob: &[u8]) -> DbResult<IdentityCertificate> {
    IdentityCertificate::wire_decode(blob).map_err(|e| DbError::Corrupted(e.to_string()))
}
