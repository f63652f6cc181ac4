//!
//! Wire records exchanged between the two endpoints.
//!
//! All records are packed little-endian and begin with an 8-bit opcode
//! followed by one 32-bit word: the connection id, or the symbol id for data
//! packets. A reader validates the opcode before touching the rest; records
//! with an unknown opcode are dropped.
//!

use crate::tools::error::{FerryError, Result};

/// Opcode of [`HandshakeReq`].
pub const HANDSHAKE_REQ: u8 = 5;
/// Opcode of [`HandshakeResp`].
pub const HANDSHAKE_RESP: u8 = 6;
/// Opcode of a data packet.
pub const DATA_PACKET: u8 = 7;
/// Opcode of [`Ack`].
pub const ACK: u8 = 8;

/// Fixed length of the NUL-padded file name field.
pub const FILE_NAME_LEN: usize = 64;
/// Encoded length of a [`HandshakeReq`].
pub const HANDSHAKE_REQ_LEN: usize = 1 + 4 + FILE_NAME_LEN + 8 + 8 + 4;
/// Encoded length of a [`HandshakeResp`].
pub const HANDSHAKE_RESP_LEN: usize = 1 + 4;
/// Encoded length of an [`Ack`].
pub const ACK_LEN: usize = 1 + 4 + 32 + 4;
/// Header bytes preceding the payload of a data packet.
pub const DATA_PACKET_OVERHEAD: usize = 1 + 4;

/// Repair-interval value that suspends repair-symbol emission.
pub const REPAIR_SUSPEND: u32 = u32::MAX;
/// Repair interval in effect until the first feedback arrives.
pub const INITIAL_REPAIR_INTERVAL: u32 = 9;

/// Pack a block number and an encoding symbol identifier into a symbol id.
/// The high 8 bits carry the SBN, the low 24 bits the ESI.
pub fn symbol_id(sbn: u8, esi: u32) -> u32 {
    (u32::from(sbn) << 24) | (esi & 0x00FF_FFFF)
}

/// Split a symbol id back into `(sbn, esi)`.
pub fn split_symbol_id(id: u32) -> (u8, u32) {
    ((id >> 24) as u8, id & 0x00FF_FFFF)
}

/// Opcode of a raw datagram, if it carries at least one byte.
pub fn opcode(buf: &[u8]) -> Option<u8> {
    buf.first().copied()
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

///
/// Connection parameters announced by the sender.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReq {
    /// Random id chosen by the sender, echoed in every later record.
    pub connection_id: u32,
    /// Name under which the receiver stores the file, at most 64 bytes.
    pub file_name: String,
    /// Exact length of the file in bytes, before padding.
    pub file_size: u64,
    /// RFC 6330 Common FEC OTI.
    pub oti_common: u64,
    /// RFC 6330 Scheme-Specific FEC OTI.
    pub oti_scheme: u32,
}

impl HandshakeReq {
    /// Serialize into a wire datagram.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let name = self.file_name.as_bytes();
        if name.is_empty() || name.len() > FILE_NAME_LEN {
            return Err(FerryError::new(format!(
                "file name must be 1..={} bytes, got {}",
                FILE_NAME_LEN,
                name.len()
            )));
        }
        let mut buf = Vec::with_capacity(HANDSHAKE_REQ_LEN);
        buf.push(HANDSHAKE_REQ);
        buf.extend_from_slice(&self.connection_id.to_le_bytes());
        let mut field = [0u8; FILE_NAME_LEN];
        field[..name.len()].copy_from_slice(name);
        buf.extend_from_slice(&field);
        buf.extend_from_slice(&self.file_size.to_le_bytes());
        buf.extend_from_slice(&self.oti_common.to_le_bytes());
        buf.extend_from_slice(&self.oti_scheme.to_le_bytes());
        debug_assert_eq!(buf.len(), HANDSHAKE_REQ_LEN);
        Ok(buf)
    }

    /// Parse a wire datagram.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != HANDSHAKE_REQ_LEN {
            return Err(FerryError::new("handshake request has a wrong size"));
        }
        if buf[0] != HANDSHAKE_REQ {
            return Err(FerryError::new("not a handshake request"));
        }
        let name = &buf[5..5 + FILE_NAME_LEN];
        let end = name.iter().position(|&b| b == 0).unwrap_or(FILE_NAME_LEN);
        let file_name = std::str::from_utf8(&name[..end])
            .map_err(|_| FerryError::new("file name is not valid UTF-8"))?
            .to_owned();
        Ok(HandshakeReq {
            connection_id: read_u32(buf, 1),
            file_name,
            file_size: read_u64(buf, 5 + FILE_NAME_LEN),
            oti_common: read_u64(buf, 5 + FILE_NAME_LEN + 8),
            oti_scheme: read_u32(buf, 5 + FILE_NAME_LEN + 16),
        })
    }
}

///
/// Acceptance of a connection, echoing the id of the request.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeResp {
    /// Id echoed from the [`HandshakeReq`].
    pub connection_id: u32,
}

impl HandshakeResp {
    /// Serialize into a wire datagram.
    pub fn encode(&self) -> [u8; HANDSHAKE_RESP_LEN] {
        let mut buf = [0u8; HANDSHAKE_RESP_LEN];
        buf[0] = HANDSHAKE_RESP;
        buf[1..5].copy_from_slice(&self.connection_id.to_le_bytes());
        buf
    }

    /// Parse a wire datagram.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != HANDSHAKE_RESP_LEN || buf[0] != HANDSHAKE_RESP {
            return Err(FerryError::new("not a handshake response"));
        }
        Ok(HandshakeResp {
            connection_id: read_u32(buf, 1),
        })
    }
}

///
/// One encoding symbol, owned so it can cross the receiver's symbol queue.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Packed `(sbn, esi)` of the symbol, see [`symbol_id`].
    pub symbol_id: u32,
    /// Symbol bytes, exactly one symbol long.
    pub payload: Vec<u8>,
}

impl DataPacket {
    /// Parse a wire datagram, taking ownership of the payload bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < DATA_PACKET_OVERHEAD || buf[0] != DATA_PACKET {
            return Err(FerryError::new_kind(
                std::io::ErrorKind::InvalidData,
                "not a data packet",
            ));
        }
        Ok(DataPacket {
            symbol_id: read_u32(buf, 1),
            payload: buf[DATA_PACKET_OVERHEAD..].to_vec(),
        })
    }

    /// Block number carried by the symbol id.
    pub fn sbn(&self) -> u8 {
        split_symbol_id(self.symbol_id).0
    }

    /// Encoding symbol identifier carried by the symbol id.
    pub fn esi(&self) -> u32 {
        split_symbol_id(self.symbol_id).1
    }
}

/// Write a data-packet header in front of a symbol scratch buffer.
/// `buf` must be at least [`DATA_PACKET_OVERHEAD`] bytes.
pub fn encode_data_header(buf: &mut [u8], id: u32) {
    buf[0] = DATA_PACKET;
    buf[1..5].copy_from_slice(&id.to_le_bytes());
}

///
/// Receiver feedback: which blocks are decoded, and the repair-interval hint.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Id echoed from the [`HandshakeReq`].
    pub connection_id: u32,
    /// Bit `i` set when block `i` has been decoded.
    pub bitmap: [u64; 4],
    /// Source symbols per repair symbol, [`REPAIR_SUSPEND`] to suspend repair.
    pub repair_interval: u32,
}

impl Ack {
    /// Serialize into a wire datagram.
    pub fn encode(&self) -> [u8; ACK_LEN] {
        let mut buf = [0u8; ACK_LEN];
        buf[0] = ACK;
        buf[1..5].copy_from_slice(&self.connection_id.to_le_bytes());
        for (i, word) in self.bitmap.iter().enumerate() {
            buf[5 + i * 8..13 + i * 8].copy_from_slice(&word.to_le_bytes());
        }
        buf[37..41].copy_from_slice(&self.repair_interval.to_le_bytes());
        buf
    }

    /// Parse a wire datagram.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != ACK_LEN || buf[0] != ACK {
            return Err(FerryError::new_kind(
                std::io::ErrorKind::InvalidData,
                "not an acknowledgement",
            ));
        }
        let mut bitmap = [0u64; 4];
        for (i, word) in bitmap.iter_mut().enumerate() {
            *word = read_u64(buf, 5 + i * 8);
        }
        Ok(Ack {
            connection_id: read_u32(buf, 1),
            bitmap,
            repair_interval: read_u32(buf, 37),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_symbol_id_roundtrip() {
        for sbn in [0u8, 1, 7, 128, 255] {
            for esi in [0u32, 1, 63, 0x1234, 0x00FF_FFFF] {
                assert_eq!(split_symbol_id(symbol_id(sbn, esi)), (sbn, esi));
            }
        }
        // ESI is truncated to 24 bits
        assert_eq!(split_symbol_id(symbol_id(3, 0x0100_0001)), (3, 1));
    }

    #[test]
    pub fn test_handshake_req_roundtrip() {
        crate::tests::init();
        let req = HandshakeReq {
            connection_id: 0xDEAD_BEEF,
            file_name: "payload.bin".to_owned(),
            file_size: 123_456_789,
            oti_common: 0x0000_7B2D_0000_0570,
            oti_scheme: 0x0C00_0104,
        };
        let buf = req.encode().unwrap();
        assert_eq!(buf.len(), HANDSHAKE_REQ_LEN);
        assert_eq!(HandshakeReq::decode(&buf).unwrap(), req);
    }

    #[test]
    pub fn test_handshake_req_name_too_long() {
        crate::tests::init();
        let req = HandshakeReq {
            connection_id: 1,
            file_name: "x".repeat(FILE_NAME_LEN + 1),
            file_size: 1,
            oti_common: 0,
            oti_scheme: 0,
        };
        assert!(req.encode().is_err());
    }

    #[test]
    pub fn test_handshake_resp_roundtrip() {
        let resp = HandshakeResp {
            connection_id: 0x0102_0304,
        };
        let buf = resp.encode();
        assert_eq!(buf, [HANDSHAKE_RESP, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(HandshakeResp::decode(&buf).unwrap(), resp);
    }

    #[test]
    pub fn test_ack_roundtrip() {
        let ack = Ack {
            connection_id: 42,
            bitmap: [u64::MAX, 0, 0x8000_0000_0000_0001, 7],
            repair_interval: REPAIR_SUSPEND,
        };
        let buf = ack.encode();
        assert_eq!(buf.len(), ACK_LEN);
        assert_eq!(Ack::decode(&buf).unwrap(), ack);
    }

    #[test]
    pub fn test_data_packet_roundtrip() {
        let mut buf = vec![0u8; DATA_PACKET_OVERHEAD + 16];
        encode_data_header(&mut buf, symbol_id(9, 1000));
        buf[DATA_PACKET_OVERHEAD..].copy_from_slice(&[0xAB; 16]);
        let pkt = DataPacket::decode(&buf).unwrap();
        assert_eq!(pkt.sbn(), 9);
        assert_eq!(pkt.esi(), 1000);
        assert_eq!(pkt.payload, vec![0xAB; 16]);
    }

    #[test]
    pub fn test_unknown_opcode_rejected() {
        crate::tests::init();
        let mut buf = [0u8; ACK_LEN];
        buf[0] = 0xFF;
        assert!(Ack::decode(&buf).is_err());
        assert!(HandshakeResp::decode(&buf[..HANDSHAKE_RESP_LEN]).is_err());
        assert!(DataPacket::decode(&buf).is_err());
        assert_eq!(opcode(&buf), Some(0xFF));
        assert_eq!(opcode(&[]), None);
    }
}
