use crate::types::SensorSample;
use drumstick_config::Hand;
use glam::DVec3;
use std::collections::VecDeque;
use thiserror::Error;

/// Frame start marker from the sensor bridge.
pub const SYNC: [u8; 2] = [0xD5, 0x5A];
/// sync (2) + hand (1) + registers (14) + timestamp (4) + checksum (1).
pub const FRAME_LEN: usize = 22;

const HAND_OFFSET: usize = 2;
const REGISTER_OFFSET: usize = 3;
const REGISTER_LEN: usize = 14;
const TIMESTAMP_OFFSET: usize = REGISTER_OFFSET + REGISTER_LEN;

/// LSB per g at the ±2 g range.
const ACCEL_LSB_PER_G: f64 = 16384.0;
/// LSB per deg/s at the ±250 deg/s range.
const GYRO_LSB_PER_DPS: f64 = 131.0;

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("Checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    Checksum { expected: u8, actual: u8 },
    #[error("Unknown hand id {0}")]
    UnknownHand(u8),
}

/// One decoded register dump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub hand: Hand,
    pub sample: SensorSample,
    pub temperature_c: f64,
}

/// Streaming decoder for the bridge's framed MPU6050 register dumps.
///
/// Feed raw TCP bytes via `push_data`, then drain frames via `next_frame`.
pub struct FrameParser {
    buffer: VecDeque<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::with_capacity(1024),
        }
    }

    pub fn push_data(&mut self, data: &[u8]) {
        self.buffer.extend(data);
    }

    /// Bytes held waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Extract the next frame, or `None` if no complete frame is buffered.
    ///
    /// Bytes before a sync marker are discarded. On a checksum error only the
    /// first sync byte is dropped, so a real frame hiding inside the bad one
    /// is still found.
    pub fn next_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
        let (frame, sync_pos) = {
            let buf = self.buffer.make_contiguous();
            let Some(sync_pos) = find_sync(buf) else {
                // Keep a trailing first sync byte; its partner may be in flight.
                let keep = usize::from(buf.last() == Some(&SYNC[0]));
                let drop = buf.len() - keep;
                self.buffer.drain(..drop);
                return None;
            };
            if buf.len() - sync_pos < FRAME_LEN {
                self.buffer.drain(..sync_pos);
                return None;
            }
            let mut frame = [0u8; FRAME_LEN];
            frame.copy_from_slice(&buf[sync_pos..sync_pos + FRAME_LEN]);
            (frame, sync_pos)
        };

        let result = decode_frame(&frame);
        let consumed = match result {
            Err(ProtocolError::Checksum { .. }) => sync_pos + 1,
            _ => sync_pos + FRAME_LEN,
        };
        self.buffer.drain(..consumed);
        Some(result)
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

fn find_sync(data: &[u8]) -> Option<usize> {
    data.windows(SYNC.len()).position(|window| window == SYNC)
}

/// XOR of every byte between the sync marker and the checksum.
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0, |acc, b| acc ^ b)
}

fn decode_frame(frame: &[u8; FRAME_LEN]) -> Result<Frame, ProtocolError> {
    let expected = frame[FRAME_LEN - 1];
    let actual = checksum(&frame[HAND_OFFSET..FRAME_LEN - 1]);
    if expected != actual {
        return Err(ProtocolError::Checksum { expected, actual });
    }

    let hand = match frame[HAND_OFFSET] {
        0 => Hand::Right,
        1 => Hand::Left,
        other => return Err(ProtocolError::UnknownHand(other)),
    };

    // ACCEL_XOUT_H .. GYRO_ZOUT_L, big-endian pairs.
    let reg = |i: usize| -> f64 {
        let at = REGISTER_OFFSET + i * 2;
        f64::from(i16::from_be_bytes([frame[at], frame[at + 1]]))
    };
    let accel = DVec3::new(reg(0), reg(1), reg(2)) / ACCEL_LSB_PER_G;
    let temperature_c = reg(3) / 340.0 + 36.53;
    let gyro = DVec3::new(reg(4), reg(5), reg(6)) / GYRO_LSB_PER_DPS;

    let t = &frame[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4];
    let millis = u32::from_le_bytes([t[0], t[1], t[2], t[3]]);

    Ok(Frame {
        hand,
        sample: SensorSample::from_vectors(accel, gyro, f64::from(millis) / 1000.0),
        temperature_c,
    })
}
