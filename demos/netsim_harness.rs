// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Application-layer test harness for the packet-transport simulator core.
// Deliberately thin: it only calls the public `NetworkLayer` API, encodes
// and decodes packets, and validates the `byte[i] = transmission_id mod 256`
// data pattern. ARQ, statistics, and CLI-parsing concerns live entirely in
// this file, never in the library.
//
// Usage:
//   netsim_harness [sending_threads] [receiving_threads] [transmission_count] [max_transmission_kb]
//   netsim_harness                      (all defaults)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use packetlab::config::MAX_PAYLOAD_BYTES;
use packetlab::packet::{self, PacketKind};
use packetlab::{NetworkLayer, Role};

const DEFAULT_SENDING_THREADS: u32 = 2;
const DEFAULT_RECEIVING_THREADS: u32 = 2;
const DEFAULT_TRANSMISSION_COUNT: u32 = 16;
const DEFAULT_MAX_TRANSMISSION_KB: u32 = 4;

struct Args {
    sending_threads: u32,
    receiving_threads: u32,
    transmission_count: u32,
    max_transmission_kb: u32,
}

fn parse_args() -> Args {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let field = |i: usize, default: u32| -> u32 {
        raw.get(i)
            .map(|s| s.parse().unwrap_or_else(|_| panic!("argument {i} ({s:?}) is not a valid count")))
            .unwrap_or(default)
    };
    Args {
        sending_threads: field(0, DEFAULT_SENDING_THREADS).max(1),
        receiving_threads: field(1, DEFAULT_RECEIVING_THREADS).max(1),
        transmission_count: field(2, DEFAULT_TRANSMISSION_COUNT).max(1),
        max_transmission_kb: field(3, DEFAULT_MAX_TRANSMISSION_KB).max(1),
    }
}

/// How many DATA packets cover `max_transmission_kb` at `MAX_PAYLOAD_BYTES`
/// each.
fn packets_per_transmission(max_transmission_kb: u32) -> u32 {
    let bytes = (max_transmission_kb as usize) * 1024;
    ((bytes + MAX_PAYLOAD_BYTES - 1) / MAX_PAYLOAD_BYTES).max(1) as u32
}

/// The canonical data pattern: every payload byte is `transmission_id mod 256`.
fn fill_pattern(transmission_id: u32, len: usize) -> Vec<u8> {
    vec![(transmission_id % 256) as u8; len]
}

fn send_one_transmission(net: &NetworkLayer, transmission_id: u32, packets_in_transmission: u32) {
    let payload = fill_pattern(transmission_id, MAX_PAYLOAD_BYTES);
    for index in 0..packets_in_transmission {
        let pkt = packet::encode_data_packet(transmission_id, index, packets_in_transmission, &payload)
            .expect("harness-generated packet is always well-formed");
        let mut retries = 0u32;
        loop {
            match net.send_packet(&pkt, Role::Sender) {
                packetlab::channel::SendOutcome::Accepted => break,
                packetlab::channel::SendOutcome::Rejected => {
                    retries += 1;
                    if retries % 200 == 0 {
                        eprintln!(
                            "send: transmission {transmission_id} packet {index} still REJECTED after {retries} retries"
                        );
                    }
                    thread::yield_now();
                }
            }
        }
    }
}

fn sender_loop(net: Arc<NetworkLayer>, transmission_ids: Vec<u32>, packets_in_transmission: u32) {
    for id in transmission_ids {
        send_one_transmission(&net, id, packets_in_transmission);
    }
}

fn receiver_loop(net: Arc<NetworkLayer>, done: Arc<std::sync::atomic::AtomicBool>, delivered: Arc<AtomicUsize>) {
    let mut buf = Vec::new();
    while !done.load(Ordering::Acquire) {
        match net.receive_packet(&mut buf, 50, Role::Receiver) {
            packetlab::channel::ReceiveOutcome::Received => {
                if let Ok(uh) = packet::decode_universal_header(&buf) {
                    if uh.kind == PacketKind::Data {
                        net.cache_for_reassembly(buf.clone());
                        delivered.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
            packetlab::channel::ReceiveOutcome::NoPacketAvailable => {}
        }
    }
    // Drain whatever is still in flight once told to stop, matching the
    // graceful-shutdown scenario's "no packet in transit is guaranteed to
    // be delivered after shutdown" — a final non-blocking sweep, no more.
    while let packetlab::channel::ReceiveOutcome::Received = net.try_receive_packet(&mut buf, Role::Receiver) {
        if let Ok(uh) = packet::decode_universal_header(&buf) {
            if uh.kind == PacketKind::Data {
                net.cache_for_reassembly(buf.clone());
                delivered.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}

fn main() {
    let args = parse_args();
    let packets_in_transmission = packets_per_transmission(args.max_transmission_kb);

    println!(
        "netsim_harness: {} sender thread(s), {} receiver thread(s), {} transmission(s) of {} packet(s) each ({} KB)",
        args.sending_threads,
        args.receiving_threads,
        args.transmission_count,
        packets_in_transmission,
        args.max_transmission_kb
    );

    let net = Arc::new(NetworkLayer::create().expect("failed to create network layer"));

    // Assign transmission ids round-robin across sender threads so ids stay
    // dense and distinct.
    let mut per_thread: Vec<Vec<u32>> = vec![Vec::new(); args.sending_threads as usize];
    for id in 0..args.transmission_count {
        per_thread[(id % args.sending_threads) as usize].push(id);
    }

    let delivered = Arc::new(AtomicUsize::new(0));
    let receivers_done = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let receiver_handles: Vec<_> = (0..args.receiving_threads)
        .map(|_| {
            let net = net.clone();
            let done = receivers_done.clone();
            let delivered = delivered.clone();
            thread::Builder::new()
                .name("harness-receiver".into())
                .spawn(move || receiver_loop(net, done, delivered))
                .expect("failed to spawn receiver thread")
        })
        .collect();

    let sender_handles: Vec<_> = per_thread
        .into_iter()
        .enumerate()
        .map(|(t, ids)| {
            let net = net.clone();
            thread::Builder::new()
                .name(format!("harness-sender-{t}"))
                .spawn(move || sender_loop(net, ids, packets_in_transmission))
                .expect("failed to spawn sender thread")
        })
        .collect();

    for h in sender_handles {
        h.join().expect("sender thread panicked");
    }
    println!("netsim_harness: all senders finished enqueueing");

    // Wait for every transmission to reassemble, bounded so the harness
    // never hangs if packets were dropped by design (e.g. fault injection).
    let deadline = packetlab::time::deadline_ms(10_000);
    let mut completed: HashMap<u32, bool> = (0..args.transmission_count).map(|id| (id, false)).collect();
    loop {
        let mut all_done = true;
        for (id, done) in completed.iter_mut() {
            if *done {
                continue;
            }
            match net.registry().get(*id) {
                Some(info) if info.is_complete() => *done = true,
                _ => all_done = false,
            }
        }
        if all_done || packetlab::time::now_ms() >= deadline {
            break;
        }
        thread::sleep(std::time::Duration::from_millis(10));
    }

    receivers_done.store(true, Ordering::Release);
    for h in receiver_handles {
        h.join().expect("receiver thread panicked");
    }

    let validated = Arc::new(Mutex::new(0u32));
    let mismatches = AtomicU32::new(0);
    for id in 0..args.transmission_count {
        let info = match net.registry().get(id) {
            Some(info) => info,
            None => {
                eprintln!("transmission {id}: never observed");
                continue;
            }
        };
        if !info.is_complete() {
            eprintln!(
                "transmission {id}: incomplete, missing indices {:?}",
                info.missing_indices()
            );
            continue;
        }
        let expected = fill_pattern(id, MAX_PAYLOAD_BYTES);
        let mut ok = true;
        for index in 0..packets_in_transmission {
            if info.packet_bytes(index) != expected.as_slice() {
                mismatches.fetch_add(1, Ordering::AcqRel);
                ok = false;
            }
        }
        if ok {
            *validated.lock().unwrap() += 1;
        }
    }

    let validated_count = *validated.lock().unwrap();
    let delivered_count = delivered.load(Ordering::Acquire);
    println!(
        "netsim_harness: delivered {} DATA packet(s), validated {}/{} transmission(s), {} pattern mismatch(es)",
        delivered_count,
        validated_count,
        args.transmission_count,
        mismatches.load(Ordering::Acquire)
    );

    let net = Arc::try_unwrap(net).unwrap_or_else(|_| panic!("network layer still referenced by a lingering thread"));
    net.free();

    if validated_count != args.transmission_count {
        eprintln!("netsim_harness: FAILED — not every transmission validated");
        std::process::exit(1);
    }
    println!("netsim_harness: OK");
}
