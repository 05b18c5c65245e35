//! Produced message and its on-segment wire format.
//!
//! ```text
//! [u8 key flag][u16 key len][key bytes][u32 payload len][payload bytes]
//!              └─ only when flag = 1 ─┘
//! ```
//!
//! All integers are big-endian. A record is always written whole into a
//! single segment, so a reader that sees the flag byte sees the full frame.

use std::fmt;

const KEY_ABSENT: u8 = 0;
const KEY_PRESENT: u8 = 1;

/// Smallest possible frame: keyless, empty payload.
pub const MIN_FRAME_LEN: usize = 1 + 4;

/// A message as produced: optional routing key plus opaque payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: None,
            payload: payload.into(),
        }
    }

    pub fn with_key(key: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Some(key.into()),
            payload: payload.into(),
        }
    }

    /// Key used for partition routing. An empty key counts as no key.
    pub fn routing_key(&self) -> Option<&[u8]> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }

    /// Size of the encoded frame in bytes.
    pub fn encoded_len(&self) -> usize {
        let key = self.routing_key().map_or(0, |k| 2 + k.len());
        1 + key + 4 + self.payload.len()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        if self.payload.len() > u32::MAX as usize {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }
        buf.reserve(self.encoded_len());
        match self.routing_key() {
            Some(key) => {
                let key_len = u16::try_from(key.len()).map_err(|_| WireError::KeyTooLarge(key.len()))?;
                buf.push(KEY_PRESENT);
                buf.extend_from_slice(&key_len.to_be_bytes());
                buf.extend_from_slice(key);
            }
            None => buf.push(KEY_ABSENT),
        }
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    pub fn encode_to_vec(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

/// How much of a frame is known from a buffer prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLen {
    /// Total frame length.
    Complete(usize),
    /// The header is cut short; at least this many bytes are needed to size the frame.
    NeedHeader(usize),
}

/// Size the frame starting at `buf[0]` from as much header as is present.
pub fn frame_len(buf: &[u8]) -> Result<FrameLen, WireError> {
    let Some(&flag) = buf.first() else {
        return Ok(FrameLen::NeedHeader(MIN_FRAME_LEN));
    };
    let key_section = match flag {
        KEY_ABSENT => 0,
        KEY_PRESENT => {
            if buf.len() < 3 {
                return Ok(FrameLen::NeedHeader(3 + 4));
            }
            2 + u16::from_be_bytes([buf[1], buf[2]]) as usize
        }
        other => return Err(WireError::InvalidKeyFlag(other)),
    };
    let len_at = 1 + key_section;
    if buf.len() < len_at + 4 {
        return Ok(FrameLen::NeedHeader(len_at + 4));
    }
    let payload_len = u32::from_be_bytes([
        buf[len_at],
        buf[len_at + 1],
        buf[len_at + 2],
        buf[len_at + 3],
    ]) as usize;
    Ok(FrameLen::Complete(len_at + 4 + payload_len))
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` holds only part of a frame, otherwise the
/// message and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<Option<(Message, usize)>, WireError> {
    let total = match frame_len(buf)? {
        FrameLen::Complete(total) if buf.len() >= total => total,
        _ => return Ok(None),
    };
    let (key, payload_at) = if buf[0] == KEY_PRESENT {
        let key_len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        (Some(buf[3..3 + key_len].to_vec()), 3 + key_len + 4)
    } else {
        (None, 1 + 4)
    };
    let payload = buf[payload_at..total].to_vec();
    Ok(Some((Message { key, payload }, total)))
}

/// Malformed or unencodable frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    KeyTooLarge(usize),
    PayloadTooLarge(usize),
    InvalidKeyFlag(u8),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::KeyTooLarge(n) => write!(f, "key too large: {n} bytes (max {})", u16::MAX),
            WireError::PayloadTooLarge(n) => write!(f, "payload too large: {n} bytes (max {})", u32::MAX),
            WireError::InvalidKeyFlag(b) => write!(f, "invalid key flag byte: {b:#04x}"),
        }
    }
}

impl std::error::Error for WireError {}
