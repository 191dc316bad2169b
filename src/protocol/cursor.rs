//! Binary cursor channel framing carried over the peer data channel (§6).
//!
//! Every frame is little-endian: `op:u8 ‖ len:u16 ‖ body`, where `len` is
//! the *total* frame length including the three-byte header itself (this
//! is what makes the worked example in §8 scenario 6 come out to `0x0E`
//! for an 11-byte fixed header plus a 3-byte image payload).

use crate::error::{AppError, Result};

pub const OP_CURSOR_POSITION: u8 = 0x01;
pub const OP_CURSOR_IMAGE: u8 = 0x02;

/// One decoded cursor frame (§6, P5: `encode(decode(b)) == b`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorFrame {
    Position {
        x: u16,
        y: u16,
    },
    Image {
        width: u16,
        height: u16,
        xhot: u16,
        yhot: u16,
        img: Vec<u8>,
    },
}

impl CursorFrame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            CursorFrame::Position { x, y } => {
                let mut buf = Vec::with_capacity(7);
                buf.push(OP_CURSOR_POSITION);
                buf.extend_from_slice(&7u16.to_le_bytes());
                buf.extend_from_slice(&x.to_le_bytes());
                buf.extend_from_slice(&y.to_le_bytes());
                buf
            }
            CursorFrame::Image { width, height, xhot, yhot, img } => {
                let total_len = 11 + img.len();
                let mut buf = Vec::with_capacity(total_len);
                buf.push(OP_CURSOR_IMAGE);
                buf.extend_from_slice(&(total_len as u16).to_le_bytes());
                buf.extend_from_slice(&width.to_le_bytes());
                buf.extend_from_slice(&height.to_le_bytes());
                buf.extend_from_slice(&xhot.to_le_bytes());
                buf.extend_from_slice(&yhot.to_le_bytes());
                buf.extend_from_slice(img);
                buf
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 3 {
            return Err(AppError::BadPayload("cursor frame shorter than header".into()));
        }
        let op = buf[0];
        let len = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        if buf.len() != len {
            return Err(AppError::BadPayload(format!(
                "cursor frame length mismatch: header says {len}, got {}",
                buf.len()
            )));
        }
        let body = &buf[3..];
        match op {
            OP_CURSOR_POSITION => {
                if body.len() != 4 {
                    return Err(AppError::BadPayload("cursor position frame must carry 4 bytes".into()));
                }
                Ok(CursorFrame::Position {
                    x: u16::from_le_bytes([body[0], body[1]]),
                    y: u16::from_le_bytes([body[2], body[3]]),
                })
            }
            OP_CURSOR_IMAGE => {
                if body.len() < 8 {
                    return Err(AppError::BadPayload("cursor image frame too short".into()));
                }
                Ok(CursorFrame::Image {
                    width: u16::from_le_bytes([body[0], body[1]]),
                    height: u16::from_le_bytes([body[2], body[3]]),
                    xhot: u16::from_le_bytes([body[4], body[5]]),
                    yhot: u16::from_le_bytes([body[6], body[7]]),
                    img: body[8..].to_vec(),
                })
            }
            other => Err(AppError::BadPayload(format!("unknown cursor opcode {other:#x}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_frame_matches_worked_example() {
        let frame = CursorFrame::Image {
            width: 16,
            height: 16,
            xhot: 1,
            yhot: 2,
            img: vec![0xAA, 0xBB, 0xCC],
        };
        let encoded = frame.encode();
        assert_eq!(
            encoded,
            vec![0x02, 0x0E, 0x00, 0x10, 0x00, 0x10, 0x00, 0x01, 0x00, 0x02, 0x00, 0xAA, 0xBB, 0xCC]
        );
    }

    #[test]
    fn position_frame_round_trips() {
        let frame = CursorFrame::Position { x: 640, y: 480 };
        let encoded = frame.encode();
        assert_eq!(CursorFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn image_frame_round_trips() {
        let frame = CursorFrame::Image {
            width: 32,
            height: 32,
            xhot: 0,
            yhot: 0,
            img: vec![1, 2, 3, 4, 5],
        };
        let encoded = frame.encode();
        assert_eq!(CursorFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        let frame = CursorFrame::Position { x: 1, y: 2 };
        let mut encoded = frame.encode();
        encoded.truncate(5);
        assert!(CursorFrame::decode(&encoded).is_err());
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        let buf = vec![0xFF, 0x03, 0x00];
        assert!(CursorFrame::decode(&buf).is_err());
    }
}
