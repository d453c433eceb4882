// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Process-wide monotonic clock.
//!
//! Latency counters and ingest phase stamps all read the same source so
//! deltas between stamps taken on different threads stay comparable.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the first call in this process.
///
/// Monotone and never zero after the first sample.
#[must_use]
pub fn monotonic_ns() -> u64 {
    #[cfg(test)]
    {
        if let Some(cell) = NOW_OVERRIDE.get() {
            #[allow(clippy::expect_used)]
            if let Some(override_val) = *cell.lock().expect("lock is poisoned") {
                return override_val;
            }
        }
    }

    let epoch = EPOCH.get_or_init(Instant::now);

    // u64 nanoseconds cover ~584 years of process uptime
    #[allow(clippy::cast_possible_truncation)]
    let ns = epoch.elapsed().as_nanos() as u64;

    ns + 1
}

#[cfg(test)]
use std::sync::Mutex;

#[cfg(test)]
static NOW_OVERRIDE: OnceLock<Mutex<Option<u64>>> = OnceLock::new();

#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) fn set_monotonic_ns_for_test(value: Option<u64>) {
    let cell = NOW_OVERRIDE.get_or_init(|| Mutex::new(None));
    *cell.lock().expect("lock is poisoned") = value;
}
