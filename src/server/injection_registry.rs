//! Injection Registry (C3, spec §4.3).
//!
//! A mutex-guarded set of image names currently being added by push,
//! consulted by the pull path to avoid races. Per the §9 design note
//! ("avoid leaking the registry handle"), only `mark`/`unmark`/
//! `is_marked` are exposed; the handle itself is `Clone` (backed by
//! `Arc`) so it can be shared across the RPC-handler tasks and the
//! replicator task.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct InjectionRegistry {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl InjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, name: &str) {
        self.inner.lock().unwrap().insert(name.to_string());
    }

    pub fn unmark(&self, name: &str) {
        self.inner.lock().unwrap().remove(name);
    }

    pub fn is_marked(&self, name: &str) -> bool {
        self.inner.lock().unwrap().contains(name)
    }

    /// A bracket that marks `name` on construction and unmarks it on
    /// drop, so every exit path of the add-image algorithm (§4.4 step 4)
    /// restores the registry, including early returns via `?`.
    pub fn guard(&self, name: &str) -> InjectionGuard {
        self.mark(name);
        InjectionGuard {
            registry: self.clone(),
            name: name.to_string(),
        }
    }
}

pub struct InjectionGuard {
    registry: InjectionRegistry,
    name: String,
}

impl Drop for InjectionGuard {
    fn drop(&mut self) {
        self.registry.unmark(&self.name);
    }
}
