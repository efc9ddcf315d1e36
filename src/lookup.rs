//! Memoizing user/group name resolution over a [`System`].

use std::collections::HashMap;
use std::io;
use std::sync::RwLock;

use crate::system::System;

/// Caches name→id lookups for the duration of one Apply.
///
/// Many worker threads read concurrently; the occasional miss takes the
/// write lock only to insert. The underlying lookup runs outside any lock,
/// so two concurrent misses on the same name may both reach the system;
/// last insert wins, which is harmless for a stable name database.
#[derive(Debug, Default)]
pub struct OwnerCache {
    users: RwLock<HashMap<String, u32>>,
    groups: RwLock<HashMap<String, u32>>,
}

impl OwnerCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a user name, consulting the system on a miss.
    ///
    /// # Errors
    ///
    /// Propagates the system's lookup failure.
    pub fn user(&self, sys: &dyn System, name: &str) -> io::Result<u32> {
        Self::resolve(&self.users, name, || sys.lookup_user(name))
    }

    /// Resolve a group name, consulting the system on a miss.
    ///
    /// # Errors
    ///
    /// Propagates the system's lookup failure.
    pub fn group(&self, sys: &dyn System, name: &str) -> io::Result<u32> {
        Self::resolve(&self.groups, name, || sys.lookup_group(name))
    }

    fn resolve(
        cache: &RwLock<HashMap<String, u32>>,
        name: &str,
        lookup: impl FnOnce() -> io::Result<u32>,
    ) -> io::Result<u32> {
        {
            let read = cache
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(&id) = read.get(name) {
                return Ok(id);
            }
        }
        let id = lookup()?;
        cache
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.to_string(), id);
        Ok(id)
    }
}
