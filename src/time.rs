// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Monotonic millisecond clock. Every deadline and `ready_at_ms` stamp in
// this crate is measured against a single process-wide epoch so that
// slots compare directly as `u64` without re-reading `Instant::now()`
// relative to different origins.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Milliseconds elapsed since the first call to any clock function in this
/// process. Monotonic: never goes backwards, immune to wall-clock changes.
pub fn now_ms() -> u64 {
    epoch().elapsed().as_millis() as u64
}

/// `now_ms() + delta_ms`, saturating instead of wrapping.
pub fn deadline_ms(delta_ms: u64) -> u64 {
    now_ms().saturating_add(delta_ms)
}
