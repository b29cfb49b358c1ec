//! `handle -> Request` table with O(1) lookup (§3 `HandleTable`).
//!
//! Allocation is guarded by a single mutex around the monotonic counter
//! (§4.2); lookup/remove go through a reader-writer lock, matching the
//! locking split called out in §5 ("Shared resources").

use crate::request::{Request, INVALID_HANDLE};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug)]
pub struct HandleExhausted;

impl std::fmt::Display for HandleExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "monotonic handle counter exhausted")
    }
}

impl std::error::Error for HandleExhausted {}

#[derive(Default)]
pub struct HandleTable {
    next_handle: Mutex<u64>,
    requests: RwLock<HashMap<u64, Arc<Request>>>,
}

impl HandleTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_handle: Mutex::new(1),
            requests: RwLock::new(HashMap::new()),
        }
    }

    /// Allocates the next monotonic handle. Handles are never reused for the
    /// lifetime of the process and form a strictly increasing sequence
    /// across successful submits (§4.2, §8 property 3).
    pub fn allocate(&self) -> Result<u64, HandleExhausted> {
        let mut next = self.next_handle.lock().unwrap();
        if *next >= INVALID_HANDLE {
            return Err(HandleExhausted);
        }
        let handle = *next;
        *next += 1;
        Ok(handle)
    }

    pub fn insert(&self, request: Arc<Request>) {
        self.requests.write().unwrap().insert(request.handle, request);
    }

    #[must_use]
    pub fn get(&self, handle: u64) -> Option<Arc<Request>> {
        self.requests.read().unwrap().get(&handle).cloned()
    }

    pub fn remove(&self, handle: u64) -> Option<Arc<Request>> {
        self.requests.write().unwrap().remove(&handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
