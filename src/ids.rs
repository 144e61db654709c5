use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::HookError;

/// Identifier of a registered hook. Unique for the lifetime of the process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookId(pub u32);

/// Identifier of a running mission or event instance. `0` never names a live instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u32);

impl HookId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl InstanceId {
    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues strictly increasing hook ids, starting at 1.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    last: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next_id(&mut self) -> Result<HookId, HookError> {
        let next = self.last.checked_add(1).ok_or(HookError::AllocatorExhausted)?;
        self.last = next;
        Ok(HookId(next))
    }

    /// Raises the high-water mark so that every later id is greater than `id`.
    /// Never lowers it.
    pub fn reseed(&mut self, id: HookId) {
        self.last = self.last.max(id.0);
    }

    /// Highest id handed out (or seeded) so far.
    pub fn high_water(&self) -> u32 {
        self.last
    }
}
