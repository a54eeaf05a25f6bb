// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The Receiver reassembly engine: a sparse registry of in-flight
// transmissions fed by a bounded packet cache and a single reassembly
// worker thread. The registry is sharded and guarded by the crate's own
// `RwLock` rather than a reserved-address-space trick, so memory footprint
// scales with live transmissions instead of the id space.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::config::{MAX_PAYLOAD_BYTES, PACKET_CACHE_CAPACITY};
use crate::packet::{self, PacketError};
use crate::rw_lock::RwLock;
use crate::waiter::Waiter;

const SHARD_COUNT: usize = 16;

fn bitmap_words_for(packets: u32) -> usize {
    ((packets as usize) + 63) / 64
}

fn shard_for(id: u32) -> usize {
    (id as usize) % SHARD_COUNT
}

/// One in-flight transmission's reassembly state. Fields past construction
/// are mutated only by the single reassembly worker except `status_bitmap`
/// (atomic test-and-set, may race with a concurrent duplicate) and
/// `packets_remaining` (atomic decrement).
pub struct TransmissionInfo {
    packets_in_transmission: u32,
    status_bitmap: Vec<AtomicU64>,
    data_region: UnsafeCell<Box<[u8]>>,
    packets_remaining: AtomicU32,
    complete: Waiter,
}

unsafe impl Sync for TransmissionInfo {}
unsafe impl Send for TransmissionInfo {}

impl TransmissionInfo {
    fn new(packets_in_transmission: u32) -> Self {
        let words = bitmap_words_for(packets_in_transmission);
        let mut bitmap: Vec<AtomicU64> = (0..words).map(|_| AtomicU64::new(0)).collect();
        // Pre-set the tail bits
        // beyond `packets_in_transmission` in the last word so a caller
        // scanning for "all received" can test a whole word against
        // `u64::MAX` instead of masking off the unused tail every time.
        let used_bits_in_last_word = packets_in_transmission as usize % 64;
        if used_bits_in_last_word != 0 {
            if let Some(last) = bitmap.last() {
                let pad_mask = !0u64 << used_bits_in_last_word;
                last.store(pad_mask, Ordering::Relaxed);
            }
        }
        Self {
            packets_in_transmission,
            status_bitmap: bitmap,
            data_region: UnsafeCell::new(
                vec![0u8; packets_in_transmission as usize * MAX_PAYLOAD_BYTES].into_boxed_slice(),
            ),
            packets_remaining: AtomicU32::new(packets_in_transmission),
            complete: Waiter::new(),
        }
    }

    /// Test-and-set the bit for `index`. Returns `true` if this call was
    /// the one that set it (i.e. not a duplicate).
    fn test_and_set(&self, index: u32) -> bool {
        let word = index as usize / 64;
        let bit = 1u64 << (index as usize % 64);
        let prev = self.status_bitmap[word].fetch_or(bit, Ordering::AcqRel);
        prev & bit == 0
    }

    fn copy_payload(&self, index: u32, payload: &[u8]) {
        let offset = index as usize * MAX_PAYLOAD_BYTES;
        unsafe {
            let base = (*self.data_region.get()).as_mut_ptr().add(offset);
            std::ptr::copy_nonoverlapping(payload.as_ptr(), base, payload.len());
        }
    }

    /// `popcount(status_bitmap) + packets_remaining == packets_in_transmission`
    /// is the invariant this pair of accessors lets a caller check.
    pub fn packets_remaining(&self) -> u32 {
        self.packets_remaining.load(Ordering::Acquire)
    }

    pub fn received_count(&self) -> u32 {
        let total: u32 = self
            .status_bitmap
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones())
            .sum();
        // The last word's tail bits past `packets_in_transmission` are
        // pre-set in `new` so "all received" can test a word against
        // `u64::MAX`; they were never really received, so they don't
        // count here.
        let used_bits_in_last_word = self.packets_in_transmission as usize % 64;
        let padding_bits = if used_bits_in_last_word == 0 {
            0
        } else {
            64 - used_bits_in_last_word as u32
        };
        total - padding_bits
    }

    pub fn is_complete(&self) -> bool {
        self.packets_remaining() == 0
    }

    /// Block until this transmission's last packet has been documented.
    pub fn wait_complete(&self, timeout_ms: Option<u64>) -> bool {
        self.complete.wait_if(|| !self.is_complete(), timeout_ms);
        self.is_complete()
    }

    /// Snapshot of the assembled bytes for packet `index`.
    pub fn packet_bytes(&self, index: u32) -> &[u8] {
        let offset = index as usize * MAX_PAYLOAD_BYTES;
        unsafe { &(*self.data_region.get())[offset..offset + MAX_PAYLOAD_BYTES] }
    }

    pub fn packets_in_transmission(&self) -> u32 {
        self.packets_in_transmission
    }

    /// Indices not yet observed. A word that is all-ones (including the tail
    /// padding above) contributes no missing indices and is skipped without
    /// inspecting its bits.
    pub fn missing_indices(&self) -> Vec<u32> {
        let mut missing = Vec::new();
        for (word_idx, word) in self.status_bitmap.iter().enumerate() {
            let bits = word.load(Ordering::Acquire);
            if bits == u64::MAX {
                continue;
            }
            for bit in 0..64 {
                let index = (word_idx * 64 + bit) as u32;
                if index >= self.packets_in_transmission {
                    break;
                }
                if bits & (1 << bit) == 0 {
                    missing.push(index);
                }
            }
        }
        missing
    }
}

/// A sharded map from `transmission_id` to `TransmissionInfo`, guarded per
/// shard by the crate's own `RwLock` so lookups of unrelated transmissions
/// never contend.
pub struct TransmissionRegistry {
    shards: Vec<(RwLock, UnsafeCell<HashMap<u32, Arc<TransmissionInfo>>>)>,
}

unsafe impl Sync for TransmissionRegistry {}
unsafe impl Send for TransmissionRegistry {}

impl TransmissionRegistry {
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        shards.resize_with(SHARD_COUNT, || (RwLock::new(), UnsafeCell::new(HashMap::new())));
        Self { shards }
    }

    pub fn get(&self, id: u32) -> Option<Arc<TransmissionInfo>> {
        let (lock, map) = &self.shards[shard_for(id)];
        lock.lock_shared();
        let found = unsafe { (*map.get()).get(&id).cloned() };
        lock.unlock_shared();
        found
    }

    /// Idempotent per id: returns the existing entry if one is already
    /// registered, otherwise creates and inserts one.
    pub fn get_or_init(&self, id: u32, packets_in_transmission: u32) -> Arc<TransmissionInfo> {
        if let Some(existing) = self.get(id) {
            return existing;
        }
        let (lock, map) = &self.shards[shard_for(id)];
        lock.lock();
        let entry = unsafe {
            (*map.get())
                .entry(id)
                .or_insert_with(|| Arc::new(TransmissionInfo::new(packets_in_transmission)))
                .clone()
        };
        lock.unlock();
        entry
    }
}

impl Default for TransmissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A bounded single-producer/single-consumer cache of raw DATA packet
/// bytes, decoupling the NIC intake thread from the reassembly worker.
pub struct PacketCache {
    slots: Mutex<Vec<Option<Vec<u8>>>>,
    write_index: AtomicU64,
    read_index: AtomicU64,
    capacity: u64,
    available: Waiter,
}

/// Result of [`PacketCache::cache_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Cached,
    Full,
    Invalid,
}

impl PacketCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; capacity]),
            write_index: AtomicU64::new(0),
            read_index: AtomicU64::new(0),
            capacity: capacity as u64,
            available: Waiter::new(),
        }
    }

    pub fn waiter(&self) -> &Waiter {
        &self.available
    }

    /// Producer side: push `pkt` into the next free slot. `FAIL` (here
    /// `CacheOutcome::Full`) when the cache has `capacity` undrained
    /// packets already queued.
    pub fn cache_packet(&self, pkt: Vec<u8>) -> CacheOutcome {
        let w = self.write_index.load(Ordering::Acquire);
        let r = self.read_index.load(Ordering::Acquire);
        if w.wrapping_sub(r) >= self.capacity {
            return CacheOutcome::Full;
        }
        let idx = (w % self.capacity) as usize;
        self.slots.lock().unwrap()[idx] = Some(pkt);
        self.write_index.fetch_add(1, Ordering::AcqRel);
        self.available.notify();
        CacheOutcome::Cached
    }

    /// Consumer side: pop the next packet, if any is queued.
    fn drain_one(&self) -> Option<Vec<u8>> {
        let r = self.read_index.load(Ordering::Acquire);
        let w = self.write_index.load(Ordering::Acquire);
        if r == w {
            return None;
        }
        let idx = (r % self.capacity) as usize;
        let pkt = self.slots.lock().unwrap()[idx].take();
        self.read_index.fetch_add(1, Ordering::AcqRel);
        pkt
    }
}

/// Why `document_packet` dropped a packet without applying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    Applied,
    Duplicate,
    ProtocolViolation,
}

/// Look up (or first-touch-create) the transmission for `pkt`, test-and-set
/// its bitmap bit, copy the payload, and decrement `packets_remaining`
/// Duplicates and out-of-range indices are dropped without effect.
pub fn document_packet(registry: &TransmissionRegistry, pkt: &[u8]) -> DocumentOutcome {
    let (uh, dh, payload) = match packet::decode_data_packet(pkt) {
        Ok(v) => v,
        Err(_) => return DocumentOutcome::ProtocolViolation,
    };
    let info = registry.get_or_init(uh.transmission_id, dh.packets_in_transmission);
    if dh.packets_in_transmission != info.packets_in_transmission()
        || dh.index_in_transmission >= info.packets_in_transmission()
    {
        eprintln!(
            "[reassembly] protocol violation: transmission {} index {} of {} (registered {})",
            uh.transmission_id,
            dh.index_in_transmission,
            dh.packets_in_transmission,
            info.packets_in_transmission()
        );
        return DocumentOutcome::ProtocolViolation;
    }
    if !info.test_and_set(dh.index_in_transmission) {
        return DocumentOutcome::Duplicate;
    }
    info.copy_payload(dh.index_in_transmission, payload);
    let remaining = info.packets_remaining.fetch_sub(1, Ordering::AcqRel) - 1;
    if remaining == 0 {
        info.complete.broadcast();
    }
    DocumentOutcome::Applied
}

fn validate_as_data(pkt: &[u8]) -> Result<(), PacketError> {
    let uh = packet::validate_packet(pkt)?;
    match uh.kind {
        packet::PacketKind::Data => Ok(()),
        packet::PacketKind::Comm => Err(PacketError::KindHeaderMismatch),
    }
}

/// Owns the packet cache, the transmission registry, and the single
/// reassembly worker thread that drains one into the other.
pub struct Receiver {
    registry: Arc<TransmissionRegistry>,
    cache: Arc<PacketCache>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Receiver {
    pub fn new(name: &'static str) -> io::Result<Self> {
        Self::with_capacity(name, PACKET_CACHE_CAPACITY)
    }

    /// Construction mirrors `Channel::new`'s `io::Result` convention: the
    /// reassembly worker's thread spawn is the only OS-level way this can
    /// fail.
    pub fn with_capacity(name: &'static str, cache_capacity: usize) -> io::Result<Self> {
        let registry = Arc::new(TransmissionRegistry::new());
        let cache = Arc::new(PacketCache::new(cache_capacity));
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let worker = {
            let registry = registry.clone();
            let cache = cache.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name(format!("{name}-reassembly"))
                .spawn(move || reassembly_worker(registry, cache, shutdown))
                .map_err(|e| {
                    io::Error::new(io::ErrorKind::Other, format!("failed to spawn reassembly worker thread: {e}"))
                })?
        };

        Ok(Self {
            registry,
            cache,
            shutdown,
            worker: Some(worker),
        })
    }

    /// Intake path entry point: validate and enqueue a raw DATA packet for
    /// the reassembly worker to pick up.
    pub fn cache_packet(&self, pkt: Vec<u8>) -> CacheOutcome {
        if validate_as_data(&pkt).is_err() {
            eprintln!("[receiver] dropping malformed/non-DATA packet at intake");
            return CacheOutcome::Invalid;
        }
        self.cache.cache_packet(pkt)
    }

    pub fn registry(&self) -> &TransmissionRegistry {
        &self.registry
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.cache.waiter().broadcast();
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reassembly_worker(
    registry: Arc<TransmissionRegistry>,
    cache: Arc<PacketCache>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) {
    loop {
        while let Some(pkt) = cache.drain_one() {
            document_packet(&registry, &pkt);
        }
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        cache
            .waiter()
            .wait_if(|| !shutdown.load(Ordering::Acquire), Some(crate::config::NET_RETRY_MS));
        if shutdown.load(Ordering::Acquire) {
            return;
        }
    }
}
