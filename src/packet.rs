// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wire format for packets moved through a Channel.
//
//   [ universal header ][ kind-specific header ][ payload ]
//
// The universal header begins with its own byte size so the layout can grow
// without breaking older readers. All integer fields are little-endian
// regardless of host endianness.

use crate::config::MAX_PAYLOAD_BYTES;

/// Size in bytes of the universal header: `universal_header_bytes` (u64) +
/// packed `transmission_id`/`kind` (u32) + `payload_bytes` (u32).
pub const UNIVERSAL_HEADER_BYTES: u64 = 16;
/// Size in bytes of either kind-specific header: its own size (u64) + two
/// u32 fields.
pub const KIND_HEADER_BYTES: u64 = 16;

/// Bit 31 of the packed transmission-id/kind field marks a COMM packet.
const KIND_BIT: u32 = 0x8000_0000;
/// Mask for the 31-bit transmission id sharing that field.
const TRANSMISSION_ID_MASK: u32 = 0x7FFF_FFFF;

/// The two packet kinds carried by the Channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Data = 0,
    Comm = 1,
}

impl PacketKind {
    fn from_bit(bit: bool) -> Self {
        if bit {
            PacketKind::Comm
        } else {
            PacketKind::Data
        }
    }
}

/// Decoded universal header, common to both packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniversalHeader {
    pub universal_header_bytes: u64,
    pub transmission_id: u32,
    pub kind: PacketKind,
    pub payload_bytes: u32,
}

/// Kind-specific header for a DATA packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub kind_header_bytes: u64,
    pub index_in_transmission: u32,
    pub packets_in_transmission: u32,
}

/// Kind-specific header for a COMM (ACK/NACK bitmap) packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommHeader {
    pub kind_header_bytes: u64,
    pub first_packet_index: u32,
    pub bits_in_bitmap: u32,
}

/// Why a packet was rejected by validation or decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer too short to contain a declared header.
    Truncated,
    /// `universal_header_bytes + kind_header_bytes + payload_bytes`
    /// overflowed `u64`, or exceeded the largest packet the arena can ever
    /// lay out.
    SizeOverflow,
    /// `payload_bytes` exceeded `MAX_PAYLOAD_BYTES`.
    PayloadTooLarge,
    /// The kind bit did not match the header size the sender declared for
    /// it — a protocol violation.
    KindHeaderMismatch,
}

/// Number of bytes needed to pack `bits` one-bit flags.
pub const fn bitmap_bytes_for(bits: u32) -> u32 {
    (bits + 7) / 8
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn get_u64(bytes: &[u8], at: usize) -> Option<u64> {
    bytes
        .get(at..at + 8)
        .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}
fn get_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
}

/// Checked sum of the three region sizes: must not overflow `u64`
/// and must not exceed the largest packet the arena will ever lay out.
pub fn total_size(
    universal_header_bytes: u64,
    kind_header_bytes: u64,
    payload_bytes: u32,
) -> Result<u64, PacketError> {
    let a = universal_header_bytes
        .checked_add(kind_header_bytes)
        .ok_or(PacketError::SizeOverflow)?;
    let total = a
        .checked_add(payload_bytes as u64)
        .ok_or(PacketError::SizeOverflow)?;
    if total > crate::config::MAX_PACKET_BYTES as u64 {
        return Err(PacketError::SizeOverflow);
    }
    Ok(total)
}

/// Encode a DATA packet. `payload.len()` must be `<= MAX_PAYLOAD_BYTES`.
pub fn encode_data_packet(
    transmission_id: u32,
    index_in_transmission: u32,
    packets_in_transmission: u32,
    payload: &[u8],
) -> Result<Vec<u8>, PacketError> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(PacketError::PayloadTooLarge);
    }
    let payload_bytes = payload.len() as u32;
    total_size(UNIVERSAL_HEADER_BYTES, KIND_HEADER_BYTES, payload_bytes)?;

    let mut buf = Vec::with_capacity((UNIVERSAL_HEADER_BYTES + KIND_HEADER_BYTES) as usize + payload.len());
    put_u64(&mut buf, UNIVERSAL_HEADER_BYTES);
    put_u32(&mut buf, transmission_id & TRANSMISSION_ID_MASK);
    put_u32(&mut buf, payload_bytes);
    put_u64(&mut buf, KIND_HEADER_BYTES);
    put_u32(&mut buf, index_in_transmission);
    put_u32(&mut buf, packets_in_transmission);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Encode a COMM packet carrying a packed ACK/NACK bitmap.
pub fn encode_comm_packet(
    transmission_id: u32,
    first_packet_index: u32,
    bits_in_bitmap: u32,
    bitmap: &[u8],
) -> Result<Vec<u8>, PacketError> {
    let expected_bytes = bitmap_bytes_for(bits_in_bitmap);
    if bitmap.len() != expected_bytes as usize {
        return Err(PacketError::Truncated);
    }
    let payload_bytes = bitmap.len() as u32;
    total_size(UNIVERSAL_HEADER_BYTES, KIND_HEADER_BYTES, payload_bytes)?;

    let mut buf = Vec::with_capacity((UNIVERSAL_HEADER_BYTES + KIND_HEADER_BYTES) as usize + bitmap.len());
    put_u64(&mut buf, UNIVERSAL_HEADER_BYTES);
    put_u32(&mut buf, (transmission_id & TRANSMISSION_ID_MASK) | KIND_BIT);
    put_u32(&mut buf, payload_bytes);
    put_u64(&mut buf, KIND_HEADER_BYTES);
    put_u32(&mut buf, first_packet_index);
    put_u32(&mut buf, bits_in_bitmap);
    buf.extend_from_slice(bitmap);
    Ok(buf)
}

/// Decode and validate the universal header at the start of `bytes`.
/// Does not validate the kind-specific header or payload bounds; see
/// [`decode_data_packet`] / [`decode_comm_packet`] for that.
pub fn decode_universal_header(bytes: &[u8]) -> Result<UniversalHeader, PacketError> {
    let universal_header_bytes = get_u64(bytes, 0).ok_or(PacketError::Truncated)?;
    if universal_header_bytes < UNIVERSAL_HEADER_BYTES {
        return Err(PacketError::Truncated);
    }
    let packed = get_u32(bytes, 8).ok_or(PacketError::Truncated)?;
    let payload_bytes = get_u32(bytes, 12).ok_or(PacketError::Truncated)?;
    let kind = PacketKind::from_bit(packed & KIND_BIT != 0);
    let transmission_id = packed & TRANSMISSION_ID_MASK;

    total_size(universal_header_bytes, KIND_HEADER_BYTES, payload_bytes)?;
    if bytes.len() < universal_header_bytes as usize {
        return Err(PacketError::Truncated);
    }

    Ok(UniversalHeader {
        universal_header_bytes,
        transmission_id,
        kind,
        payload_bytes,
    })
}

/// Decode a full DATA packet: universal header, DATA header, and a payload
/// slice borrowed from `bytes`.
pub fn decode_data_packet(bytes: &[u8]) -> Result<(UniversalHeader, DataHeader, &[u8]), PacketError> {
    let uh = decode_universal_header(bytes)?;
    if uh.kind != PacketKind::Data {
        return Err(PacketError::KindHeaderMismatch);
    }
    if uh.payload_bytes as usize > MAX_PAYLOAD_BYTES {
        return Err(PacketError::PayloadTooLarge);
    }
    let base = uh.universal_header_bytes as usize;
    let kind_header_bytes = get_u64(bytes, base).ok_or(PacketError::Truncated)?;
    if kind_header_bytes != KIND_HEADER_BYTES {
        return Err(PacketError::KindHeaderMismatch);
    }
    let index_in_transmission = get_u32(bytes, base + 8).ok_or(PacketError::Truncated)?;
    let packets_in_transmission = get_u32(bytes, base + 12).ok_or(PacketError::Truncated)?;
    let payload_start = base + kind_header_bytes as usize;
    let payload_end = payload_start + uh.payload_bytes as usize;
    let payload = bytes.get(payload_start..payload_end).ok_or(PacketError::Truncated)?;

    Ok((
        uh,
        DataHeader {
            kind_header_bytes,
            index_in_transmission,
            packets_in_transmission,
        },
        payload,
    ))
}

/// Decode a full COMM packet: universal header, COMM header, and the packed
/// bitmap slice borrowed from `bytes`.
pub fn decode_comm_packet(bytes: &[u8]) -> Result<(UniversalHeader, CommHeader, &[u8]), PacketError> {
    let uh = decode_universal_header(bytes)?;
    if uh.kind != PacketKind::Comm {
        return Err(PacketError::KindHeaderMismatch);
    }
    let base = uh.universal_header_bytes as usize;
    let kind_header_bytes = get_u64(bytes, base).ok_or(PacketError::Truncated)?;
    if kind_header_bytes != KIND_HEADER_BYTES {
        return Err(PacketError::KindHeaderMismatch);
    }
    let first_packet_index = get_u32(bytes, base + 8).ok_or(PacketError::Truncated)?;
    let bits_in_bitmap = get_u32(bytes, base + 12).ok_or(PacketError::Truncated)?;
    if uh.payload_bytes != bitmap_bytes_for(bits_in_bitmap) {
        return Err(PacketError::KindHeaderMismatch);
    }
    let payload_start = base + kind_header_bytes as usize;
    let payload_end = payload_start + uh.payload_bytes as usize;
    let payload = bytes.get(payload_start..payload_end).ok_or(PacketError::Truncated)?;

    Ok((
        uh,
        CommHeader {
            kind_header_bytes,
            first_packet_index,
            bits_in_bitmap,
        },
        payload,
    ))
}

/// Whether `bytes` is a well-formed packet, regardless of kind.
/// This is the check `send_packet` performs before touching any buffer.
pub fn validate_packet(bytes: &[u8]) -> Result<UniversalHeader, PacketError> {
    let uh = decode_universal_header(bytes)?;
    if uh.payload_bytes == 0 {
        return Err(PacketError::Truncated);
    }
    match uh.kind {
        PacketKind::Data => {
            decode_data_packet(bytes)?;
        }
        PacketKind::Comm => {
            decode_comm_packet(bytes)?;
        }
    }
    Ok(uh)
}
