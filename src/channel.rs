// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A directional three-stage packet pipeline: outbound NIC buffer -> wire
// buffer -> inbound NIC buffer, driven by two long-lived mover threads
// chaining three in-process `PacketBuffer`s together.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::buffer::{ClaimOutcome, PacketBuffer, ReserveOutcome};
use crate::config::{ChannelConfig, FaultInjectionConfig};
use crate::packet;
use crate::time;

/// Minimal linear-congruential generator for the fault-injection dice rolls
/// below, so this crate needs no `rand` dependency for a few percentage-chance
/// draws.
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Next value in `[0, 100)`, used as a percentage-chance dice roll.
    fn next_percent(&mut self) -> u8 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 32) % 100) as u8
    }
}

/// Outcome of [`Channel::send_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    Rejected,
}

/// Outcome of [`Channel::receive_packet`] / [`Channel::try_receive_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Received,
    NoPacketAvailable,
}

/// Move one packet between two buffers, handling the shared
/// reserve/acquire/write/ready dance and the drop-on-exhaustion paths
/// common to both worker loops below.
fn forward_one(
    payload: &[u8],
    dest: &PacketBuffer,
    ready_at_ms: u64,
    drop_reason: &str,
) -> bool {
    match dest.reserve_write_slot() {
        ReserveOutcome::Reserved { slot_index, cursor } => {
            if !dest.acquire_arena_space(slot_index, cursor, payload.len() as u32) {
                eprintln!("[channel] {drop_reason}: arena exhausted, dropping packet");
                dest.abandon_reserved(slot_index);
                return false;
            }
            dest.begin_write(slot_index);
            if !dest.write_payload(slot_index, payload) {
                eprintln!("[channel] {drop_reason}: payload size mismatch, dropping packet");
                dest.abandon_writing(slot_index);
                return false;
            }
            dest.mark_ready(slot_index, ready_at_ms);
            dest.signal_available();
            true
        }
        ReserveOutcome::NoSlot => {
            eprintln!("[channel] {drop_reason}: destination full, dropping packet");
            false
        }
    }
}

/// Optional serialization-delay extension point: hold the worker for the
/// time it would take to push `payload_bytes` onto a link of `bandwidth_bps`.
/// Off by default; no correctness property depends on it beyond the delay
/// being non-negative.
fn simulate_bandwidth_delay(config: &ChannelConfig, payload_len: usize) {
    if !config.enforce_bandwidth_delay {
        return;
    }
    let bits = payload_len as f64 * 8.0;
    let secs = bits / config.bandwidth_bps.max(1) as f64;
    if secs > 0.0 {
        thread_sleep_secs(secs);
    }
}

fn thread_sleep_secs(secs: f64) {
    std::thread::sleep(Duration::from_secs_f64(secs));
}

fn nic_to_wire_worker(
    outbound: Arc<PacketBuffer>,
    wire: Arc<PacketBuffer>,
    shutdown: Arc<AtomicBool>,
    config: ChannelConfig,
    retry_ms: u64,
) {
    loop {
        loop {
            match outbound.try_claim_read_slot(time::now_ms()) {
                ClaimOutcome::Claimed(idx) => {
                    let payload = outbound.read_payload(idx);
                    simulate_bandwidth_delay(&config, payload.len());
                    let ready_at = time::now_ms() + config.latency_ms;
                    forward_one(&payload, &wire, ready_at, "nic->wire");
                    outbound.release_read_slot(idx);
                }
                ClaimOutcome::NoPacket | ClaimOutcome::NotYetReady(_) => break,
            }
        }
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        outbound
            .waiter()
            .wait_if(|| !shutdown.load(Ordering::Acquire), Some(retry_ms));
        if shutdown.load(Ordering::Acquire) {
            return;
        }
    }
}

/// Apply the declared-but-off-by-default network-unreliability knobs to one
/// packet already pulled off the wire, then forward (possibly zero, one, or
/// two copies of) it to `inbound`. Never consulted when `faults` is the
/// all-zero/all-false default, so the Channel's own no-duplication guarantee
/// holds unless a caller opts in.
fn deliver_with_faults(
    mut payload: Vec<u8>,
    inbound: &PacketBuffer,
    faults: &FaultInjectionConfig,
    rng: &mut Lcg,
) {
    if faults.drop_rate > 0 && rng.next_percent() < faults.drop_rate {
        eprintln!("[channel] wire->nic: fault injection dropped a packet");
        return;
    }
    if faults.corrupt_rate > 0 && rng.next_percent() < faults.corrupt_rate {
        if let Some(byte) = payload.last_mut() {
            *byte ^= 0xFF;
        }
        eprintln!("[channel] wire->nic: fault injection corrupted a packet");
    }
    forward_one(&payload, inbound, time::now_ms(), "wire->nic");
    if faults.duplicate_rate > 0 && rng.next_percent() < faults.duplicate_rate {
        eprintln!("[channel] wire->nic: fault injection duplicated a packet");
        forward_one(&payload, inbound, time::now_ms(), "wire->nic (duplicate)");
    }
}

fn wire_to_nic_worker(
    wire: Arc<PacketBuffer>,
    inbound: Arc<PacketBuffer>,
    shutdown: Arc<AtomicBool>,
    faults: FaultInjectionConfig,
    retry_ms: u64,
) {
    let mut rng = Lcg::new(0x9E37_79B9_7F4A_7C15);
    loop {
        let mut next_eta: Option<u64> = None;
        let mut batch: Vec<Vec<u8>> = Vec::new();
        loop {
            match wire.try_claim_read_slot(time::now_ms()) {
                ClaimOutcome::Claimed(idx) => {
                    batch.push(wire.read_payload(idx));
                    wire.release_read_slot(idx);
                }
                ClaimOutcome::NoPacket => break,
                ClaimOutcome::NotYetReady(eta) => {
                    next_eta = Some(eta);
                    break;
                }
            }
        }
        // Reordering is only ever applied here, after every packet in this
        // pass has already left the wire ring in FIFO order: the head-of-line
        // rule governs consumption from the wire buffer, not final arrival
        // order at the inbound NIC.
        if faults.reorder_enabled && batch.len() > 1 {
            for i in (1..batch.len()).rev() {
                let j = (rng.next_percent() as usize) % (i + 1);
                batch.swap(i, j);
            }
        }
        for payload in batch {
            deliver_with_faults(payload, &inbound, &faults, &mut rng);
        }
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        let now = time::now_ms();
        let timeout = match next_eta {
            Some(eta) if eta > now => retry_ms.min(eta - now).max(1),
            _ => retry_ms,
        };
        wire.waiter()
            .wait_if(|| !shutdown.load(Ordering::Acquire), Some(timeout));
        if shutdown.load(Ordering::Acquire) {
            return;
        }
    }
}

/// A directional Network Channel: outbound NIC -> wire -> inbound NIC,
/// driven by two long-lived worker threads.
pub struct Channel {
    outbound: Arc<PacketBuffer>,
    inbound: Arc<PacketBuffer>,
    shutdown: Arc<AtomicBool>,
    nic_to_wire: Option<JoinHandle<()>>,
    wire_to_nic: Option<JoinHandle<()>>,
}

impl Channel {
    /// Allocate the three buffers and spawn both worker threads. A
    /// thread-spawn failure is a fatal setup error, not a panic.
    pub fn new(name: &'static str, config: ChannelConfig) -> io::Result<Self> {
        let outbound = Arc::new(PacketBuffer::new(config.nic_slots, config.nic_bytes));
        let wire = Arc::new(PacketBuffer::new(config.wire_slots, config.wire_bytes));
        let inbound = Arc::new(PacketBuffer::new(config.nic_slots, config.nic_bytes));
        let shutdown = Arc::new(AtomicBool::new(false));

        let nic_to_wire = {
            let outbound = outbound.clone();
            let wire = wire.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name(format!("{name}-nic-to-wire"))
                .spawn(move || {
                    nic_to_wire_worker(outbound, wire, shutdown, config, crate::config::NIC_RETRY_MS)
                })
                .map_err(|e| {
                    io::Error::new(io::ErrorKind::Other, format!("failed to spawn nic->wire worker thread: {e}"))
                })?
        };

        let wire_to_nic = {
            let wire = wire.clone();
            let inbound = inbound.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name(format!("{name}-wire-to-nic"))
                .spawn(move || {
                    wire_to_nic_worker(wire, inbound, shutdown, config.faults, crate::config::NET_RETRY_MS)
                })
                .map_err(|e| {
                    io::Error::new(io::ErrorKind::Other, format!("failed to spawn wire->nic worker thread: {e}"))
                })?
        };

        Ok(Self {
            outbound,
            inbound,
            shutdown,
            nic_to_wire: Some(nic_to_wire),
            wire_to_nic: Some(wire_to_nic),
        })
    }

    /// Validate and enqueue `pkt_bytes` onto the outbound NIC.
    pub fn send_packet(&self, pkt_bytes: &[u8]) -> SendOutcome {
        if packet::validate_packet(pkt_bytes).is_err() {
            return SendOutcome::Rejected;
        }
        match self.outbound.reserve_write_slot() {
            ReserveOutcome::Reserved { slot_index, cursor } => {
                if !self
                    .outbound
                    .acquire_arena_space(slot_index, cursor, pkt_bytes.len() as u32)
                {
                    self.outbound.abandon_reserved(slot_index);
                    return SendOutcome::Rejected;
                }
                self.outbound.begin_write(slot_index);
                if !self.outbound.write_payload(slot_index, pkt_bytes) {
                    self.outbound.abandon_writing(slot_index);
                    return SendOutcome::Rejected;
                }
                self.outbound.mark_ready(slot_index, time::now_ms());
                self.outbound.signal_available();
                SendOutcome::Accepted
            }
            ReserveOutcome::NoSlot => SendOutcome::Rejected,
        }
    }

    /// Dequeue one packet from the inbound NIC, waiting up to `timeout_ms`.
    pub fn receive_packet(&self, buf: &mut Vec<u8>, timeout_ms: u64) -> ReceiveOutcome {
        let deadline = time::deadline_ms(timeout_ms);
        loop {
            match self.inbound.try_claim_read_slot(time::now_ms()) {
                ClaimOutcome::Claimed(idx) => {
                    let payload = self.inbound.read_payload(idx);
                    buf.clear();
                    buf.extend_from_slice(&payload);
                    self.inbound.release_read_slot(idx);
                    return ReceiveOutcome::Received;
                }
                ClaimOutcome::NoPacket | ClaimOutcome::NotYetReady(_) => {
                    let now = time::now_ms();
                    if now >= deadline {
                        return ReceiveOutcome::NoPacketAvailable;
                    }
                    let wait = (deadline - now).min(crate::config::NET_RETRY_MS).max(1);
                    let shutdown = &self.shutdown;
                    self.inbound
                        .waiter()
                        .wait_if(|| !shutdown.load(Ordering::Acquire), Some(wait));
                    if self.shutdown.load(Ordering::Acquire) {
                        return ReceiveOutcome::NoPacketAvailable;
                    }
                }
            }
        }
    }

    /// Non-blocking variant: `receive_packet(buf, 0)`.
    pub fn try_receive_packet(&self, buf: &mut Vec<u8>) -> ReceiveOutcome {
        self.receive_packet(buf, 0)
    }

    /// Signal shutdown and join both worker threads.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.outbound.waiter().broadcast();
        self.inbound.waiter().broadcast();
        if let Some(h) = self.nic_to_wire.take() {
            let _ = h.join();
        }
        if let Some(h) = self.wire_to_nic.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
