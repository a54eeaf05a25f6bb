// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Compile-time tunables for the packet-transport simulator core.
// LATENCY_MS is derived from a round-trip figure, so the one-way
// propagation delay used by the wire buffer is half of it.

/// Maximum payload bytes a single DATA packet may carry.
pub const MAX_PAYLOAD_BYTES: usize = 1024;

/// Largest packet the arena must ever lay out: payload plus generous header
/// headroom. Used only for the `send_packet` overflow guard.
pub const MAX_PACKET_BYTES: usize = MAX_PAYLOAD_BYTES + 64;

/// Round-trip latency the wire models (milliseconds).
pub const ROUND_TRIP_LATENCY_MS: u64 = 20;

/// One-way propagation delay stamped on wire slots (milliseconds).
pub const LATENCY_MS: u64 = ROUND_TRIP_LATENCY_MS / 2;

/// Simulated link bandwidth, bits per second. Only consulted when
/// `Config::enforce_bandwidth_delay` is set.
pub const BANDWIDTH_BPS: u64 = 100_000_000;

/// Idle-wait timeout for the two Channel worker threads (milliseconds).
pub const NET_RETRY_MS: u64 = 5;
/// Idle-wait timeout used when polling the outbound NIC specifically.
pub const NIC_RETRY_MS: u64 = 5;

/// Default timeout applied by the harness when the caller does not specify
/// one for `receive_packet`.
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 500;

/// Number of metadata slots in a NIC buffer.
pub const NIC_BUFFER_SLOTS: usize = 256;
/// Byte arena size backing a NIC buffer: the bandwidth-delay product,
/// i.e. how many bytes can be "in flight" during one round trip.
pub const NIC_BUFFER_BYTES: usize =
    ((BANDWIDTH_BPS / 8) * ROUND_TRIP_LATENCY_MS / 1000) as usize;

/// Number of metadata slots in the wire buffer (much larger than a NIC).
pub const WIRE_BUFFER_SLOTS: usize = 16 * 1024;
/// Byte arena size backing the wire buffer (16 MiB).
pub const WIRE_BUFFER_BYTES: usize = 16 * 1024 * 1024;

/// Bound on the spin performed by `acquire_arena_space` while waiting for a
/// RESERVED predecessor slot to leave that state. Exhausting the bound
/// drops the packet rather than blocking, per DESIGN.md.
pub const MAX_ARENA_SPIN_ATTEMPTS: u32 = 20;

/// Capacity of the bounded DATA packet cache feeding the reassembly worker.
pub const PACKET_CACHE_CAPACITY: usize = 128;

/// Which side of a directional pair an endpoint identifies as.
///
/// `SENDER` enqueues onto the S→R channel and drains the R→S channel;
/// `RECEIVER` is the mirror image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

/// Declared-but-off-by-default network unreliability knobs.
/// None of these are consulted unless explicitly enabled; the Channel's
/// own no-duplication guarantee only ever holds when this is default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultInjectionConfig {
    /// Percentage chance [0, 100] a delivered packet is silently dropped.
    pub drop_rate: u8,
    /// Percentage chance [0, 100] a delivered packet is duplicated.
    pub duplicate_rate: u8,
    /// Percentage chance [0, 100] a delivered packet's payload is corrupted.
    pub corrupt_rate: u8,
    /// Whether packets may be reordered in the wire→NIC delivery scan.
    pub reorder_enabled: bool,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            drop_rate: 0,
            duplicate_rate: 0,
            corrupt_rate: 0,
            reorder_enabled: false,
        }
    }
}

/// Per-Channel runtime configuration. Everything here has a sensible
/// default; only tests and the demo harness are expected to override it.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    pub nic_slots: usize,
    pub nic_bytes: usize,
    pub wire_slots: usize,
    pub wire_bytes: usize,
    pub latency_ms: u64,
    /// Optional bandwidth-delay enforcement, per DESIGN.md. Off by default
    /// — no correctness property depends on it.
    pub enforce_bandwidth_delay: bool,
    pub bandwidth_bps: u64,
    pub faults: FaultInjectionConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            nic_slots: NIC_BUFFER_SLOTS,
            nic_bytes: NIC_BUFFER_BYTES,
            wire_slots: WIRE_BUFFER_SLOTS,
            wire_bytes: WIRE_BUFFER_BYTES,
            latency_ms: LATENCY_MS,
            enforce_bandwidth_delay: false,
            bandwidth_bps: BANDWIDTH_BPS,
            faults: FaultInjectionConfig::default(),
        }
    }
}
