//! TCP wire format: little-endian, packed, no padding. Header fields are followed by the
//! payload (row-major doubles) and a trailing CRC32 over the payload only.

use usbl_core::{ChannelFrame, UsblError, UsblResult};

pub const SIGNAL_TYPE_HEARTBEAT: i32 = 0;
pub const SIGNAL_TYPE_DATA: i32 = 1;
pub const SIGNAL_TYPE_HEARTBEAT_ACK: i32 = 9;

/// Byte length of a payload-less frame (heartbeat / heartbeat-ack): `4+4+1+4+4+4`.
const HEADER_AND_CRC_LEN: usize = 21;

#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    pub signal_type: i32,
    pub is_init: u8,
    pub channel_num: i32,
    pub signal_length: i32,
    /// Row-major `channel_num * signal_length` doubles. Empty for heartbeat/ack frames.
    pub payload: Vec<f64>,
}

impl WireFrame {
    pub fn heartbeat() -> Self {
        Self {
            signal_type: SIGNAL_TYPE_HEARTBEAT,
            is_init: 0,
            channel_num: 0,
            signal_length: 0,
            payload: Vec::new(),
        }
    }

    pub fn heartbeat_ack() -> Self {
        Self {
            signal_type: SIGNAL_TYPE_HEARTBEAT_ACK,
            is_init: 0,
            channel_num: 0,
            signal_length: 0,
            payload: Vec::new(),
        }
    }

    pub fn data(frame: &ChannelFrame) -> Self {
        let mut payload = Vec::with_capacity(frame.channel_count() * frame.samples_per_channel());
        for row in frame.rows() {
            payload.extend_from_slice(row);
        }
        Self {
            signal_type: SIGNAL_TYPE_DATA,
            is_init: 0,
            channel_num: frame.channel_count() as i32,
            signal_length: frame.samples_per_channel() as i32,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload_bytes = Vec::with_capacity(self.payload.len() * 8);
        for v in &self.payload {
            payload_bytes.extend_from_slice(&v.to_le_bytes());
        }
        let packet_length = (HEADER_AND_CRC_LEN + payload_bytes.len()) as i32;

        let mut buf = Vec::with_capacity(packet_length as usize);
        buf.extend_from_slice(&packet_length.to_le_bytes());
        buf.extend_from_slice(&self.signal_type.to_le_bytes());
        buf.push(self.is_init);
        buf.extend_from_slice(&self.channel_num.to_le_bytes());
        buf.extend_from_slice(&self.signal_length.to_le_bytes());
        buf.extend_from_slice(&payload_bytes);
        let crc = crc32fast::hash(&payload_bytes);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode one frame from its own exact byte slice (not a stream with trailing garbage).
    pub fn decode(buf: &[u8]) -> UsblResult<Self> {
        if buf.len() < HEADER_AND_CRC_LEN {
            return Err(UsblError::InvalidArgument(
                "wire frame shorter than the fixed header".into(),
            ));
        }
        let packet_length = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        let signal_type = i32::from_le_bytes(buf[4..8].try_into().unwrap());
        let is_init = buf[8];
        let channel_num = i32::from_le_bytes(buf[9..13].try_into().unwrap());
        let signal_length = i32::from_le_bytes(buf[13..17].try_into().unwrap());

        let payload_len = (packet_length as usize)
            .checked_sub(HEADER_AND_CRC_LEN)
            .ok_or_else(|| UsblError::InvalidArgument("negative payload length".into()))?;
        if buf.len() < 17 + payload_len + 4 {
            return Err(UsblError::InvalidArgument(
                "wire frame shorter than its declared packetLength".into(),
            ));
        }

        let payload_bytes = &buf[17..17 + payload_len];
        let crc_offset = 17 + payload_len;
        let crc_read = u32::from_le_bytes(buf[crc_offset..crc_offset + 4].try_into().unwrap());
        let crc_computed = crc32fast::hash(payload_bytes);
        if crc_read != crc_computed {
            return Err(UsblError::ProtocolMismatch);
        }

        let payload = payload_bytes
            .chunks_exact(8)
            .map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap()))
            .collect();

        Ok(Self {
            signal_type,
            is_init,
            channel_num,
            signal_length,
            payload,
        })
    }

    pub fn packet_length(&self) -> usize {
        HEADER_AND_CRC_LEN + self.payload.len() * 8
    }
}
