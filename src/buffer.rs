// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The slot allocator and byte arena behind every stage of a Channel
// (outbound NIC, wire, inbound NIC): a CAS-guarded ring of metadata slots
// over a circular byte arena, re-targeted from a fixed-size slot to a
// variable-length packet with its own byte arena, since packets here range
// up to `MAX_PAYLOAD_BYTES` rather than a single fixed size.
//
// Slot lifecycle: EMPTY -> RESERVED -> WRITING -> READY -> READING -> EMPTY,
// with early-exit paths RESERVED -> EMPTY and WRITING -> EMPTY on failure.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::config::MAX_ARENA_SPIN_ATTEMPTS;
use crate::spin_lock::adaptive_yield_pub;
use crate::waiter::Waiter;

/// Forces `write_cursor` and `read_cursor` onto separate cache lines so
/// producers and consumers never false-share.
#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> CachePadded<T> {
    const fn new(v: T) -> Self {
        Self(v)
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

/// Lifecycle state of one `PacketMetadata` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotStatus {
    Empty = 0,
    Reserved = 1,
    Writing = 2,
    Ready = 3,
    Reading = 4,
}

impl From<u8> for SlotStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => SlotStatus::Empty,
            1 => SlotStatus::Reserved,
            2 => SlotStatus::Writing,
            3 => SlotStatus::Ready,
            4 => SlotStatus::Reading,
            other => panic!("invalid slot status byte {other}"),
        }
    }
}

/// One descriptor per ring slot. Only the slot's current owner (the thread
/// that holds it in a non-terminal status) may mutate the non-status
/// fields; every status transition below is a CAS or a release-store, and
/// every read of the other fields is paired with an acquire load of status.
struct Slot {
    status: AtomicU8,
    start_offset: AtomicU64,
    size_bytes: AtomicU32,
    ready_at_ms: AtomicU64,
}

impl Slot {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(SlotStatus::Empty as u8),
            start_offset: AtomicU64::new(0),
            size_bytes: AtomicU32::new(0),
            ready_at_ms: AtomicU64::new(0),
        }
    }

    fn status(&self) -> SlotStatus {
        SlotStatus::from(self.status.load(Ordering::Acquire))
    }
}

/// The circular byte region backing a `PacketBuffer`. Disjoint ranges are
/// handed out by `acquire_arena_space`'s overlap avoidance, so concurrent
/// writers never touch the same bytes; the `UnsafeCell` just lets two
/// slot-owning threads hold `&Arena` at once without a buffer-wide lock.
struct Arena {
    bytes: UnsafeCell<Box<[u8]>>,
    len: u64,
}

unsafe impl Sync for Arena {}
unsafe impl Send for Arena {}

impl Arena {
    fn new(len: usize) -> Self {
        Self {
            bytes: UnsafeCell::new(vec![0u8; len].into_boxed_slice()),
            len: len as u64,
        }
    }

    /// Safety: caller must own exclusive access to `[offset, offset+data.len())`,
    /// i.e. hold the slot in WRITING with that range freshly granted by
    /// `acquire_arena_space`.
    fn write_at(&self, offset: u64, data: &[u8]) {
        debug_assert!(offset + data.len() as u64 <= self.len);
        unsafe {
            let base = (*self.bytes.get()).as_mut_ptr().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), base, data.len());
        }
    }

    /// Safety: caller must own the range via a READY/READING slot.
    fn read_at(&self, offset: u64, len: u32) -> Vec<u8> {
        let mut out = vec![0u8; len as usize];
        unsafe {
            let base = (*self.bytes.get()).as_ptr().add(offset as usize);
            std::ptr::copy_nonoverlapping(base, out.as_mut_ptr(), len as usize);
        }
        out
    }
}

/// Result of [`PacketBuffer::reserve_write_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved { slot_index: usize, cursor: u64 },
    NoSlot,
}

/// Result of [`PacketBuffer::try_claim_read_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(usize),
    NoPacket,
    /// The head-of-line slot is READY but its `ready_at_ms` is still in the
    /// future; carries that deadline so the caller can sleep precisely.
    NotYetReady(u64),
}

fn ranges_overlap(a_start: u64, a_len: u64, b_start: u64, b_len: u64) -> bool {
    if a_len == 0 || b_len == 0 {
        return false;
    }
    a_start < b_start + b_len && b_start < a_start + a_len
}

/// A ring of `N` packet-metadata descriptors plus a circular byte arena of
/// `B` bytes. One `PacketBuffer` backs each of the three stages
/// of a Channel (outbound NIC, wire, inbound NIC).
pub struct PacketBuffer {
    slots: Vec<Slot>,
    arena: Arena,
    capacity_slots: u64,
    write_cursor: CachePadded<AtomicU64>,
    read_cursor: CachePadded<AtomicU64>,
    available: Waiter,
}

impl PacketBuffer {
    pub fn new(capacity_slots: usize, arena_bytes: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity_slots);
        slots.resize_with(capacity_slots, Slot::new);
        Self {
            slots,
            arena: Arena::new(arena_bytes),
            capacity_slots: capacity_slots as u64,
            write_cursor: CachePadded::new(AtomicU64::new(0)),
            read_cursor: CachePadded::new(AtomicU64::new(0)),
            available: Waiter::new(),
        }
    }

    /// The "packets-available" signal producers notify and consumers wait
    /// on.
    pub fn waiter(&self) -> &Waiter {
        &self.available
    }

    pub fn signal_available(&self) {
        self.available.notify();
    }

    /// Claim the slot at `write_cursor mod N` by EMPTY -> RESERVED CAS.
    pub fn reserve_write_slot(&self) -> ReserveOutcome {
        let n = self.capacity_slots;
        loop {
            let cursor = self.write_cursor.load(Ordering::Acquire);
            let idx = (cursor % n) as usize;
            let slot = &self.slots[idx];
            if slot
                .status
                .compare_exchange(
                    SlotStatus::Empty as u8,
                    SlotStatus::Reserved as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.write_cursor.fetch_add(1, Ordering::AcqRel);
                return ReserveOutcome::Reserved {
                    slot_index: idx,
                    cursor,
                };
            }
            let w = self.write_cursor.load(Ordering::Acquire);
            let r = self.read_cursor.load(Ordering::Acquire);
            if w.wrapping_sub(r) >= n {
                return ReserveOutcome::NoSlot;
            }
            // Another producer claimed this slot's cursor value first; retry
            // against the now-advanced cursor.
        }
    }

    /// Move a slot whose arena space has already been laid out by
    /// `acquire_arena_space` into WRITING. Must only be called on a slot
    /// still in RESERVED, after `acquire_arena_space` has returned `true`
    /// for it — a predecessor spinning on this slot's RESERVED status (see
    /// `acquire_arena_space` below) relies on `start_offset`/`size_bytes`
    /// being finalized by the time this slot leaves RESERVED.
    pub fn begin_write(&self, slot_index: usize) {
        self.slots[slot_index]
            .status
            .store(SlotStatus::Writing as u8, Ordering::Release);
    }

    /// Abandon a slot whose `acquire_arena_space` call failed, before it
    /// ever reached WRITING (RESERVED -> EMPTY). Clears `size_bytes` so a
    /// later producer using this slot as its predecessor sees "no real
    /// layout" rather than a stale range from a prior lap.
    pub fn abandon_reserved(&self, slot_index: usize) {
        let slot = &self.slots[slot_index];
        slot.size_bytes.store(0, Ordering::Release);
        slot.start_offset.store(0, Ordering::Release);
        slot.status.store(SlotStatus::Empty as u8, Ordering::Release);
    }

    /// Drop a slot whose payload copy failed `write_payload`'s length
    /// check (WRITING -> EMPTY) — the fault-isolation path for a caller
    /// whose payload no longer matches the range `acquire_arena_space`
    /// reserved for it. Clears `size_bytes` for the same reason as
    /// `abandon_reserved`: this slot's range is no longer real.
    pub fn abandon_writing(&self, slot_index: usize) {
        let slot = &self.slots[slot_index];
        slot.size_bytes.store(0, Ordering::Release);
        slot.start_offset.store(0, Ordering::Release);
        slot.status.store(SlotStatus::Empty as u8, Ordering::Release);
    }

    /// Lay out `size_bytes` contiguous bytes for `slot_index`, whose ring
    /// position is `cursor`. Called while `slot_index` is still RESERVED
    /// (before `begin_write`): spins (bounded by `MAX_ARENA_SPIN_ATTEMPTS`)
    /// on a RESERVED predecessor, computes the start offset from that
    /// predecessor's range, rejects on overlap with the current read
    /// packet, and wraps once on arena overflow before re-checking overlap.
    /// A predecessor is only ever observed outside RESERVED once its own
    /// `start_offset`/`size_bytes` are finalized, since callers are
    /// required to call this before `begin_write`.
    ///
    /// "Has a real layout" is tracked by `size_bytes != 0` rather than by
    /// `cursor == 0`: a fresh slot starts with `size_bytes == 0`, and
    /// `abandon_reserved`/`abandon_writing` reset it back to 0, so a
    /// predecessor that never finished laying out a range in its current
    /// lap (because the arena was exhausted under load) is never mistaken
    /// for one whose stale `start_offset`/`size_bytes` from an earlier lap
    /// still applies.
    pub fn acquire_arena_space(&self, slot_index: usize, cursor: u64, size_bytes: u32) -> bool {
        let size = size_bytes as u64;
        if size == 0 || size > self.arena.len {
            return false;
        }
        let n = self.capacity_slots;
        debug_assert_eq!((cursor % n) as usize, slot_index);
        let prev_index = ((slot_index as u64 + n - 1) % n) as usize;
        let prev = &self.slots[prev_index];

        let mut attempts = 0u32;
        let mut k = 0u32;
        while prev.status() == SlotStatus::Reserved {
            if attempts >= MAX_ARENA_SPIN_ATTEMPTS {
                return false;
            }
            attempts += 1;
            adaptive_yield_pub(&mut k);
        }

        let prev_size = prev.size_bytes.load(Ordering::Acquire);
        let prev_start = if prev_size == 0 {
            0
        } else {
            prev.start_offset.load(Ordering::Acquire) + prev_size as u64
        };

        let read_idx = (self.read_cursor.load(Ordering::Acquire) % n) as usize;
        let read_slot = &self.slots[read_idx];
        let read_range = match read_slot.status() {
            SlotStatus::Ready | SlotStatus::Reading => Some((
                read_slot.start_offset.load(Ordering::Acquire),
                read_slot.size_bytes.load(Ordering::Acquire) as u64,
            )),
            _ => None,
        };

        let overlaps = |start: u64| {
            read_range
                .map(|(r_start, r_len)| ranges_overlap(start, size, r_start, r_len))
                .unwrap_or(false)
        };

        let mut start = prev_start;
        if overlaps(start) {
            return false;
        }
        if start + size > self.arena.len {
            start = 0;
            if overlaps(start) {
                return false;
            }
        }

        let slot = &self.slots[slot_index];
        slot.start_offset.store(start, Ordering::Release);
        slot.size_bytes.store(size_bytes, Ordering::Release);
        true
    }

    /// Copy `payload` into the range `acquire_arena_space` laid out for
    /// `slot_index`. Guards against a caller whose payload length no
    /// longer matches the `size_bytes` reserved for it — there's no way
    /// for the arena copy itself to fault, so this length check stands in
    /// for that isolation boundary. Returns `false` without copying on a
    /// mismatch; the caller must then route the slot through
    /// `abandon_writing` rather than `mark_ready`.
    pub fn write_payload(&self, slot_index: usize, payload: &[u8]) -> bool {
        let slot = &self.slots[slot_index];
        let size = slot.size_bytes.load(Ordering::Acquire) as usize;
        if payload.len() != size {
            return false;
        }
        let offset = slot.start_offset.load(Ordering::Acquire);
        self.arena.write_at(offset, payload);
        true
    }

    /// Stamp `ready_at_ms` and transition WRITING -> READY, then wake
    /// waiters on this buffer.
    pub fn mark_ready(&self, slot_index: usize, ready_at_ms: u64) {
        let slot = &self.slots[slot_index];
        slot.ready_at_ms.store(ready_at_ms, Ordering::Release);
        slot.status.store(SlotStatus::Ready as u8, Ordering::Release);
    }

    /// Attempt to claim the head-of-line slot at `read_cursor mod N` for
    /// consumption. READY-but-not-yet-due slots report their deadline
    /// rather than being claimed (the time gate).
    pub fn try_claim_read_slot(&self, now_ms: u64) -> ClaimOutcome {
        let n = self.capacity_slots;
        let idx = (self.read_cursor.load(Ordering::Acquire) % n) as usize;
        let slot = &self.slots[idx];
        if slot.status() != SlotStatus::Ready {
            return ClaimOutcome::NoPacket;
        }
        let ready_at = slot.ready_at_ms.load(Ordering::Acquire);
        if ready_at > now_ms {
            return ClaimOutcome::NotYetReady(ready_at);
        }
        match slot.status.compare_exchange(
            SlotStatus::Ready as u8,
            SlotStatus::Reading as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => ClaimOutcome::Claimed(idx),
            Err(_) => ClaimOutcome::NoPacket,
        }
    }

    /// Copy a claimed slot's payload out. Caller must have gotten
    /// `slot_index` from `try_claim_read_slot`.
    pub fn read_payload(&self, slot_index: usize) -> Vec<u8> {
        let slot = &self.slots[slot_index];
        let offset = slot.start_offset.load(Ordering::Acquire);
        let size = slot.size_bytes.load(Ordering::Acquire);
        self.arena.read_at(offset, size)
    }

    /// Finish consuming a claimed slot: READING -> EMPTY, advance
    /// `read_cursor`.
    pub fn release_read_slot(&self, slot_index: usize) {
        self.slots[slot_index]
            .status
            .store(SlotStatus::Empty as u8, Ordering::Release);
        self.read_cursor.fetch_add(1, Ordering::AcqRel);
    }

    pub fn capacity_slots(&self) -> usize {
        self.capacity_slots as usize
    }

    pub fn write_cursor(&self) -> u64 {
        self.write_cursor.load(Ordering::Acquire)
    }

    pub fn read_cursor(&self) -> u64 {
        self.read_cursor.load(Ordering::Acquire)
    }
}

unsafe impl Send for PacketBuffer {}
unsafe impl Sync for PacketBuffer {}
