//! Bounded pool of player identities
//!
//! Identities come back most-recently-released first. When nothing has been
//! released, fresh identities are handed out in ascending order. The pool
//! never hands out an identity that is currently assigned, and refuses to take
//! back one that is not.

use shared::Identity;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("identity pool exhausted ({capacity} identities in use)")]
    Exhausted { capacity: usize },
    #[error("identity {0} is not currently assigned")]
    NotAssigned(Identity),
}

#[derive(Debug)]
pub struct IdentityPool {
    /// Released identities, most recent last
    released: Vec<Identity>,
    /// Lowest identity never handed out so far
    next_unused: usize,
    assigned: HashSet<Identity>,
    capacity: usize,
}

impl IdentityPool {
    /// Creates a pool seeded with every identity in `0..=max_clients`.
    pub fn new(max_clients: u8) -> Self {
        let capacity = max_clients as usize + 1;
        Self {
            released: Vec::with_capacity(capacity),
            next_unused: 0,
            assigned: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub fn allocate(&mut self) -> Result<Identity, PoolError> {
        let identity = if let Some(identity) = self.released.pop() {
            identity
        } else if self.next_unused < self.capacity {
            // capacity is at most 256, so next_unused always fits in a u8 here
            let identity = Identity(self.next_unused as u8);
            self.next_unused += 1;
            identity
        } else {
            return Err(PoolError::Exhausted {
                capacity: self.capacity,
            });
        };

        self.assigned.insert(identity);
        Ok(identity)
    }

    /// Returns `identity` to the pool.
    ///
    /// Releasing an identity that is not assigned is rejected so a duplicate
    /// disconnect can never put the same identity in the pool twice.
    pub fn release(&mut self, identity: Identity) -> Result<(), PoolError> {
        if !self.assigned.remove(&identity) {
            return Err(PoolError::NotAssigned(identity));
        }
        self.released.push(identity);
        Ok(())
    }

    pub fn is_assigned(&self, identity: Identity) -> bool {
        self.assigned.contains(&identity)
    }

    pub fn assigned_len(&self) -> usize {
        self.assigned.len()
    }

    pub fn available_len(&self) -> usize {
        self.released.len() + (self.capacity - self.next_unused)
    }

    /// Total number of identities the pool manages (`max_clients + 1`).
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
