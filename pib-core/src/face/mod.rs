//! Network face abstraction
//!
//! The service talks to the network through this capability interface:
//! prefix registration, interest filters and data publication. The
//! in-memory `MemoryFace` records everything and can inject interests,
//! standing in for a real forwarder in tests and local tooling.

use crate::name::Name;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaceError {
    #[error("cannot register prefix {0}")]
    Registration(String),
}

pub type FaceResult<T> = Result<T, FaceError>;

/// Handle to an installed interest filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterHandle(u64);

pub type InterestHandler = Box<dyn Fn(&Name) + Send + Sync>;

pub trait Face: Send + Sync {
    fn register_prefix(&self, prefix: &Name) -> FaceResult<()>;

    fn unregister_prefix(&self, prefix: &Name);

    fn set_interest_filter(&self, prefix: Name, handler: InterestHandler) -> FilterHandle;

    fn unset_interest_filter(&self, handle: FilterHandle);

    /// Publish an encoded data block.
    fn put(&self, data: Vec<u8>);
}

struct Filter {
    handle: FilterHandle,
    prefix: Name,
    handler: std::sync::Arc<dyn Fn(&Name) + Send + Sync>,
}

#[derive(Default)]
struct MemoryFaceState {
    prefixes: Vec<Name>,
    filters: Vec<Filter>,
    published: Vec<Vec<u8>>,
}

/// Loopback face: records registrations and published data, dispatches
/// injected interests to matching filters.
#[derive(Default)]
pub struct MemoryFace {
    state: Mutex<MemoryFaceState>,
    next_handle: AtomicU64,
}

impl MemoryFace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an interest to every filter whose prefix matches.
    pub fn express_interest(&self, name: &Name) {
        // Handlers may call back into the face (e.g. put), so they run
        // outside the state lock.
        let handlers: Vec<_> = {
            let state = self.lock();
            state
                .filters
                .iter()
                .filter(|f| f.prefix.is_prefix_of(name))
                .map(|f| f.handler.clone())
                .collect()
        };
        for handler in handlers {
            handler(name);
        }
    }

    pub fn registered_prefixes(&self) -> Vec<Name> {
        self.lock().prefixes.clone()
    }

    pub fn filter_prefixes(&self) -> Vec<Name> {
        self.lock().filters.iter().map(|f| f.prefix.clone()).collect()
    }

    pub fn published(&self) -> Vec<Vec<u8>> {
        self.lock().published.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryFaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Face for MemoryFace {
    fn register_prefix(&self, prefix: &Name) -> FaceResult<()> {
        self.lock().prefixes.push(prefix.clone());
        Ok(())
    }

    fn unregister_prefix(&self, prefix: &Name) {
        self.lock().prefixes.retain(|p| p != prefix);
    }

    fn set_interest_filter(&self, prefix: Name, handler: InterestHandler) -> FilterHandle {
        let handle = FilterHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.lock().filters.push(Filter {
            handle,
            prefix,
            handler: handler.into(),
        });
        handle
    }

    fn unset_interest_filter(&self, handle: FilterHandle) {
        self.lock().filters.retain(|f| f.handle != handle);
    }

    fn put(&self, data: Vec<u8>) {
        self.lock().published.push(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn filters_match_by_prefix() {
        let face = MemoryFace::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        face.set_interest_filter(
            Name::from_uri("/a/b").unwrap(),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        face.express_interest(&Name::from_uri("/a/b/c").unwrap());
        face.express_interest(&Name::from_uri("/a/x").unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unset_filter_stops_dispatch() {
        let face = MemoryFace::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let handle = face.set_interest_filter(
            Name::from_uri("/a").unwrap(),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        face.unset_interest_filter(handle);
        face.express_interest(&Name::from_uri("/a/b").unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prefix_registration_tracked() {
        let face = MemoryFace::new();
        let prefix = Name::from_uri("/localhost/pib/alice").unwrap();
        face.register_prefix(&prefix).unwrap();
        assert_eq!(face.registered_prefixes(), vec![prefix.clone()]);
        face.unregister_prefix(&prefix);
        assert!(face.registered_prefixes().is_empty());
    }
}
