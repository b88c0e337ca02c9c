//! Shared helpers for unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::env::Environment;
use crate::value::Value;

/// Deterministic environment: counting "random" bytes and a fixed clock.
///
/// Each `random_bytes` call fills the buffer with a fresh counter value, so
/// successive IVs differ but runs are reproducible.
#[derive(Clone, Default)]
pub struct FixedEnv {
    counter: Arc<AtomicU8>,
    clock_secs: u64,
}

impl FixedEnv {
    /// Environment whose wall clock is pinned to `secs`.
    pub fn at(secs: u64) -> Self {
        Self { counter: Arc::new(AtomicU8::new(0)), clock_secs: secs }
    }
}

impl Environment for FixedEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        let fill = self.counter.fetch_add(1, Ordering::Relaxed);
        buffer.fill(fill);
    }

    fn wall_clock_secs(&self) -> u64 {
        self.clock_secs
    }
}

/// Build a mapping value from string-keyed entries.
pub fn mapping(entries: &[(&str, Value)]) -> Value {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect::<BTreeMap<String, Value>>()
        .into()
}
