//! Store change notifications
//!
//! The store calls into this trait after each committed write that
//! changes the trust view. Handlers run synchronously on the caller's
//! thread, in operation order, and observe the database after the
//! mutation. They must not issue further writes from inside a handler.

use crate::name::{Component, Name};

pub trait DbObserver: Send + Sync {
    /// A user row was inserted, replaced or deleted.
    fn on_user_changed(&self, user: &str);

    /// A key row was actually removed (together with its certificates).
    fn on_key_deleted(&self, user: &str, identity: &Name, key_id: &Component);
}
