//! Names that a lifecycle operation is currently working on.
//!
//! An operation claims every logical name it touches before its first physical step and
//! releases them when it returns, after the metadata commit or the compensation. The sweep
//! leaves claimed names alone, so it never adopts a file whose row is about to be written.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::paths::LogicalName;

#[derive(Debug, Default, Clone)]
pub struct InFlightNames {
    inner: Arc<Mutex<HashMap<String, usize>>>,
}

impl InFlightNames {
    pub fn new() -> Self { Self::default() }

    /// Register `names` until the returned guard is dropped. Claims are counted, not exclusive.
    pub fn claim(&self, names: &[&LogicalName]) -> InFlightClaim {
        let mut map = self.inner.lock();
        let names: Vec<String> = names.iter().map(|n| n.as_str().to_string()).collect();
        for n in &names {
            *map.entry(n.clone()).or_insert(0) += 1;
        }
        InFlightClaim { owner: self.inner.clone(), names }
    }

    pub fn is_claimed(&self, name: &LogicalName) -> bool { self.claims(name) > 0 }

    /// Number of operations currently holding `name`.
    pub fn claims(&self, name: &LogicalName) -> usize { self.inner.lock().get(name.as_str()).copied().unwrap_or(0) }
}

#[must_use]
pub struct InFlightClaim {
    owner: Arc<Mutex<HashMap<String, usize>>>,
    names: Vec<String>,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        let mut map = self.owner.lock();
        for n in &self.names {
            if let Some(count) = map.get_mut(n) {
                *count -= 1;
                if *count == 0 {
                    map.remove(n);
                }
            }
        }
    }
}
