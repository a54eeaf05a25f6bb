// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A concurrent, latency-aware, in-memory packet-transport simulator core:
// a pair of directional Network Channels (outbound NIC -> wire -> inbound
// NIC) plus a Receiver reassembly engine, sitting between a
// user-implemented transport layer and a simulated wire with realistic
// propagation and bandwidth behavior.

pub mod config;
pub mod time;

pub mod packet;

mod spin_lock;
pub use spin_lock::SpinLock;

mod rw_lock;
pub use rw_lock::RwLock;

mod waiter;
pub use waiter::Waiter;

pub mod buffer;
pub use buffer::{ClaimOutcome, PacketBuffer, ReserveOutcome, SlotStatus};

pub mod channel;
pub use channel::{Channel, ReceiveOutcome, SendOutcome};

pub mod receiver;
pub use receiver::{CacheOutcome, DocumentOutcome, PacketCache, Receiver, TransmissionInfo, TransmissionRegistry};

pub mod network_layer;
pub use network_layer::NetworkLayer;

pub use config::{ChannelConfig, FaultInjectionConfig, Role};
