// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The root owned value tying together both directional Channels and a
// Receiver: a single struct tests can instantiate many independent copies
// of, rather than file-scope global state.

use std::io;

use crate::channel::{Channel, ReceiveOutcome, SendOutcome};
use crate::config::{ChannelConfig, Role};
use crate::receiver::Receiver;

/// Owns the sender->receiver Channel, the receiver->sender Channel, and the
/// Receiver reassembly engine that drains the inbound side. Mirrors the
/// `create_network_layer`/`free_network_layer` lifecycle contract.
pub struct NetworkLayer {
    sender_to_receiver: Channel,
    receiver_to_sender: Channel,
    receiver: Receiver,
}

impl NetworkLayer {
    /// `create_network_layer()`: starts both Channels' worker threads and
    /// the reassembly worker.
    pub fn create() -> io::Result<Self> {
        Self::with_config(ChannelConfig::default())
    }

    pub fn with_config(config: ChannelConfig) -> io::Result<Self> {
        Ok(Self {
            sender_to_receiver: Channel::new("s2r", config)?,
            receiver_to_sender: Channel::new("r2s", config)?,
            receiver: Receiver::new("net")?,
        })
    }

    fn outbound_channel(&self, role: Role) -> &Channel {
        match role {
            Role::Sender => &self.sender_to_receiver,
            Role::Receiver => &self.receiver_to_sender,
        }
    }

    fn inbound_channel(&self, role: Role) -> &Channel {
        match role {
            // SENDER reads what flows R->S; RECEIVER reads what flows S->R.
            Role::Sender => &self.receiver_to_sender,
            Role::Receiver => &self.sender_to_receiver,
        }
    }

    /// `send_packet(bytes, role)`: enqueues on the outbound Channel
    /// for `role`'s direction.
    pub fn send_packet(&self, pkt_bytes: &[u8], role: Role) -> SendOutcome {
        self.outbound_channel(role).send_packet(pkt_bytes)
    }

    /// `receive_packet(buf, timeout_ms, role)`: dequeues one packet from
    /// the Channel opposite `role`'s direction into `buf`. Does not itself
    /// feed the Receiver's reassembly engine — callers that want DATA
    /// packets reassembled must pass `buf` to `cache_for_reassembly`
    /// themselves once this returns `Received`.
    pub fn receive_packet(&self, buf: &mut Vec<u8>, timeout_ms: u64, role: Role) -> ReceiveOutcome {
        self.inbound_channel(role).receive_packet(buf, timeout_ms)
    }

    pub fn try_receive_packet(&self, buf: &mut Vec<u8>, role: Role) -> ReceiveOutcome {
        self.receive_packet(buf, 0, role)
    }

    /// Route a DATA packet already pulled off the wire into reassembly.
    /// Kept separate from `receive_packet` since the reassembly engine
    /// and the transport layer's own `receive_packet` calls are both
    /// legitimate, independent consumers of the inbound NIC.
    pub fn cache_for_reassembly(&self, pkt_bytes: Vec<u8>) -> crate::receiver::CacheOutcome {
        self.receiver.cache_packet(pkt_bytes)
    }

    pub fn registry(&self) -> &crate::receiver::TransmissionRegistry {
        self.receiver.registry()
    }

    /// `free_network_layer()`: signals shutdown and joins every worker
    /// thread across both Channels and the Receiver.
    pub fn free(mut self) {
        self.sender_to_receiver.shutdown();
        self.receiver_to_sender.shutdown();
        self.receiver.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet;

    fn tiny_config() -> ChannelConfig {
        ChannelConfig {
            nic_slots: 4,
            nic_bytes: 4096,
            wire_slots: 8,
            wire_bytes: 8192,
            latency_ms: 5,
            ..ChannelConfig::default()
        }
    }

    #[test]
    fn sender_and_receiver_use_opposite_channels() {
        let net = NetworkLayer::with_config(tiny_config()).unwrap();
        let pkt = packet::encode_data_packet(1, 0, 1, b"hi").unwrap();
        assert_eq!(net.send_packet(&pkt, Role::Sender), SendOutcome::Accepted);
        let mut buf = Vec::new();
        assert_eq!(
            net.receive_packet(&mut buf, 500, Role::Receiver),
            ReceiveOutcome::Received
        );
        assert_eq!(buf, pkt);
        net.free();
    }

    #[test]
    fn multithreaded_fan_in_fan_out_delivers_every_packet() {
        use std::collections::HashSet;
        use std::sync::{Arc, Mutex};

        let net = Arc::new(NetworkLayer::with_config(tiny_config()).unwrap());
        const SENDERS: u32 = 4;
        const PER_SENDER: u32 = 64;

        let senders: Vec<_> = (0..SENDERS)
            .map(|t| {
                let net = net.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_SENDER {
                        let id = t * PER_SENDER + i;
                        let payload = [t as u8; 1];
                        loop {
                            let pkt = packet::encode_data_packet(id, 0, 1, &payload).unwrap();
                            if net.send_packet(&pkt, Role::Sender) == SendOutcome::Accepted {
                                break;
                            }
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let seen = Arc::new(Mutex::new(HashSet::new()));
        let receivers: Vec<_> = (0..4)
            .map(|_| {
                let net = net.clone();
                let seen = seen.clone();
                std::thread::spawn(move || {
                    let mut buf = Vec::new();
                    loop {
                        match net.receive_packet(&mut buf, 200, Role::Receiver) {
                            ReceiveOutcome::Received => {
                                let (uh, _, _) = packet::decode_data_packet(&buf).unwrap();
                                let mut seen = seen.lock().unwrap();
                                assert!(seen.insert(uh.transmission_id), "duplicate delivery");
                                if seen.len() as u32 == SENDERS * PER_SENDER {
                                    return;
                                }
                            }
                            ReceiveOutcome::NoPacketAvailable => {
                                if seen.lock().unwrap().len() as u32 == SENDERS * PER_SENDER {
                                    return;
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        for h in senders {
            h.join().unwrap();
        }
        for h in receivers {
            h.join().unwrap();
        }

        assert_eq!(seen.lock().unwrap().len() as u32, SENDERS * PER_SENDER);
        Arc::try_unwrap(net).unwrap_or_else(|_| panic!("net still shared")).free();
    }
}
