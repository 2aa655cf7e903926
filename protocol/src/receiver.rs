//! Reassembly of frames from an unframed byte stream.

use crate::frame::{self, ESCAPE, HEADER_LEN, MARKER, MAX_BODY_LEN, Message, ProtocolVariant};
use alloc::vec::Vec;
use core::time::Duration;
use log::{debug, trace, warn};

/// Incremental frame receiver.
///
/// Bytes can be fed in chunks of any size. Noise between frames is skipped,
/// incomplete frames are dropped once no byte arrived for the frame timeout
/// and frames failing validation are logged and discarded.
#[derive(Debug)]
pub struct Receiver {
    variant: ProtocolVariant,
    timeout: Duration,
    markers: u8,
    body: Vec<u8>,
    receiving: bool,
    after_marker: bool,
    last_byte_at: Duration,
}

impl Receiver {
    /// Constructs a new receiver.
    #[must_use]
    pub const fn new(variant: ProtocolVariant, timeout: Duration) -> Self {
        Self {
            variant,
            timeout,
            markers: 0,
            body: Vec::new(),
            receiving: false,
            after_marker: false,
            last_byte_at: Duration::ZERO,
        }
    }

    /// Returns whether a frame is partially received.
    #[must_use]
    pub const fn is_receiving(&self) -> bool {
        self.receiving
    }

    /// Feeds received bytes and returns all messages completed by them.
    pub fn feed(&mut self, data: &[u8], now: Duration) -> Vec<Message> {
        let mut messages = Vec::new();

        self.poll_timeout(now);

        for &byte in data {
            if let Some(msg) = self.push(byte) {
                messages.push(msg);
            }
        }

        if !data.is_empty() {
            self.last_byte_at = now;
        }

        messages
    }

    /// Drops a partially received frame or stray start markers
    /// if the frame timeout has expired.
    pub fn poll_timeout(&mut self, now: Duration) {
        if now.saturating_sub(self.last_byte_at) <= self.timeout {
            return;
        }

        if self.receiving {
            warn!(
                "Frame timeout, dropping {} received bytes: {:02x?}",
                self.body.len(),
                self.body
            );

            self.reset();
        } else if self.markers > 0 {
            trace!("Frame timeout, forgetting {} start markers", self.markers);

            self.reset();
        }
    }

    fn reset(&mut self) {
        self.markers = 0;
        self.body.clear();
        self.receiving = false;
        self.after_marker = false;
    }

    fn push(&mut self, byte: u8) -> Option<Message> {
        if !self.receiving {
            self.seek(byte);

            return None;
        }

        if self.after_marker {
            self.after_marker = false;

            match byte {
                ESCAPE => return None,
                MARKER => {
                    warn!("Frame start inside frame, dropping {:02x?}", self.body);

                    self.reset();
                    self.markers = 2;

                    return None;
                }
                _ => {}
            }
        }

        self.body.push(byte);

        if byte == MARKER && self.variant.escapes_markers() {
            self.after_marker = true;
        }

        let &[len, flags, ..] = self.body.as_slice() else {
            return None;
        };

        if self.body.len() < frame::body_len(self.variant, len, flags) {
            return None;
        }

        trace!("Received frame: {:02x?}", self.body);

        let res = frame::decode_body(self.variant, &self.body);

        self.reset();

        match res {
            Ok(msg) => Some(msg),
            Err(err) => {
                warn!("Dropping invalid frame: {err}");

                None
            }
        }
    }

    fn seek(&mut self, byte: u8) {
        if byte == MARKER {
            self.markers = self.markers.saturating_add(1);

            return;
        }

        if self.markers >= 2 {
            // Room for the checksum and an optional CRC
            if usize::from(byte) >= HEADER_LEN && usize::from(byte) + 3 <= MAX_BODY_LEN {
                self.body.push(byte);
                self.receiving = true;
            } else {
                debug!("Ignoring frame with invalid length {byte:#04x}");
            }
        }

        self.markers = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameError, FrameType, subcommand};

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn status_frame(variant: ProtocolVariant, use_crc: bool) -> Result<Vec<u8>, FrameError> {
        Message::new(FrameType::STATUS)
            .with_payload([
                0x6d, 0x01, 0x08, 0x0c, 0x45, 0x00, 0x02, 0x01, 0x00, 0x00, 0x00, 0xff, 0x2c,
                0x37, 0x44,
            ])
            .encode(variant, use_crc)
    }

    #[test]
    fn single_frame() -> Result<(), FrameError> {
        let mut rx = Receiver::new(ProtocolVariant::Extended, TIMEOUT);
        let wire = status_frame(ProtocolVariant::Extended, true)?;
        let msgs = rx.feed(&wire, Duration::ZERO);

        assert_eq!(msgs.len(), 1, "one message should be received");
        assert_eq!(msgs[0].frame_type, FrameType::STATUS, "type should be correct");
        assert!(!rx.is_receiving(), "receiver should be idle");

        Ok(())
    }

    #[test]
    fn arbitrary_chunks() -> Result<(), FrameError> {
        for variant in [ProtocolVariant::Extended, ProtocolVariant::ExtendedStuffed] {
            let wire = status_frame(variant, true)?;
            let expected = frame::decode(variant, &wire)?;

            for chunk_size in 1..=wire.len() {
                let mut rx = Receiver::new(variant, TIMEOUT);
                let mut msgs = Vec::new();

                for chunk in wire.chunks(chunk_size) {
                    msgs.extend(rx.feed(chunk, Duration::ZERO));
                }

                assert_eq!(msgs, [expected.clone()], "exactly one message should be emitted");
            }
        }

        Ok(())
    }

    #[test]
    fn noise_between_frames() -> Result<(), FrameError> {
        let mut rx = Receiver::new(ProtocolVariant::Extended, TIMEOUT);
        let first = Message::new(FrameType::GET_DEVICE_ID_RESPONSE).encode(ProtocolVariant::Extended, false)?;
        let second = status_frame(ProtocolVariant::Extended, false)?;
        let mut stream = Vec::from([0x12, 0xff, 0x34, 0x00]);

        stream.extend_from_slice(&first);
        stream.extend_from_slice(&[0x55, 0xff, 0x01]);
        stream.extend_from_slice(&second);

        let msgs = rx.feed(&stream, Duration::ZERO);
        let types: Vec<_> = msgs.iter().map(|msg| msg.frame_type).collect();

        assert_eq!(
            types,
            [FrameType::GET_DEVICE_ID_RESPONSE, FrameType::STATUS],
            "both frames should be received"
        );

        Ok(())
    }

    #[test]
    fn corrupted_frame_skipped() -> Result<(), FrameError> {
        let mut rx = Receiver::new(ProtocolVariant::Extended, TIMEOUT);
        let mut bad = status_frame(ProtocolVariant::Extended, false)?;
        let good = Message::control(subcommand::GET_USER_DATA).encode(ProtocolVariant::Extended, false)?;

        bad[12] ^= 0x10;

        assert!(rx.feed(&bad, Duration::ZERO).is_empty(), "bad frame should be dropped");

        let msgs = rx.feed(&good, Duration::ZERO);

        assert_eq!(msgs.len(), 1, "next frame should be received");
        assert_eq!(
            msgs[0].subcommand,
            Some(subcommand::GET_USER_DATA),
            "subcommand should be correct"
        );

        Ok(())
    }

    #[test]
    fn frame_timeout() -> Result<(), FrameError> {
        let mut rx = Receiver::new(ProtocolVariant::Extended, TIMEOUT);
        let wire = status_frame(ProtocolVariant::Extended, false)?;
        let (head, tail) = wire.split_at(10);

        assert!(rx.feed(head, Duration::ZERO).is_empty(), "frame should be incomplete");
        assert!(rx.is_receiving(), "receiver should wait for the rest");

        rx.poll_timeout(Duration::from_millis(600));

        assert!(!rx.is_receiving(), "partial frame should be dropped");
        assert!(
            rx.feed(tail, Duration::from_millis(700)).is_empty(),
            "remaining bytes should be ignored"
        );

        let msgs = rx.feed(&wire, Duration::from_millis(800));

        assert_eq!(msgs.len(), 1, "complete frame should be received");

        Ok(())
    }

    #[test]
    fn slow_bytes_within_timeout() -> Result<(), FrameError> {
        let mut rx = Receiver::new(ProtocolVariant::Extended, TIMEOUT);
        let wire = status_frame(ProtocolVariant::Extended, false)?;
        let mut msgs = Vec::new();

        for (i, byte) in (0_u64..).zip(&wire) {
            msgs.extend(rx.feed(&[*byte], Duration::from_millis(i * 400)));
        }

        assert_eq!(msgs.len(), 1, "slow frame should be received");

        Ok(())
    }

    #[test]
    fn marker_pair_restarts_stuffed_frame() -> Result<(), FrameError> {
        let mut rx = Receiver::new(ProtocolVariant::ExtendedStuffed, TIMEOUT);
        let wire = status_frame(ProtocolVariant::ExtendedStuffed, false)?;
        let mut stream = Vec::from(&wire[..8]);

        stream.extend_from_slice(&wire);

        let msgs = rx.feed(&stream, Duration::ZERO);

        assert_eq!(msgs.len(), 1, "restarted frame should be received");
        assert_eq!(msgs[0], frame::decode(ProtocolVariant::ExtendedStuffed, &wire)?, "message should be intact");

        Ok(())
    }

    #[test]
    fn stale_marker_forgotten() -> Result<(), FrameError> {
        let wire = Message::new(FrameType::GET_DEVICE_ID).encode(ProtocolVariant::Extended, false)?;
        let mut rx = Receiver::new(ProtocolVariant::Extended, TIMEOUT);

        assert!(rx.feed(&wire[..1], Duration::ZERO).is_empty(), "single marker should be kept");
        assert!(
            rx.feed(&wire[1..], Duration::from_secs(2)).is_empty(),
            "marker from before the timeout should not start a frame"
        );

        let mut rx = Receiver::new(ProtocolVariant::Extended, TIMEOUT);

        assert!(rx.feed(&wire[..1], Duration::ZERO).is_empty(), "single marker should be kept");
        assert_eq!(
            rx.feed(&wire[1..], Duration::from_millis(400)).len(),
            1,
            "marker within the timeout should start a frame"
        );

        Ok(())
    }

    #[test]
    fn markers_inside_payload() -> Result<(), FrameError> {
        for variant in [
            ProtocolVariant::Legacy,
            ProtocolVariant::Extended,
            ProtocolVariant::ExtendedStuffed,
        ] {
            let report = Message::new(FrameType::REPORT).with_payload([0x01, 0xff, 0xff, 0x02, 0xff]);
            let control = Message::control(subcommand::SET_GROUP_PARAMETERS).with_payload([0xff, 0xff]);
            let mut stream = Vec::from([0x00, 0xff, 0x12]);

            stream.extend(report.encode(variant, true)?);
            stream.extend_from_slice(&[0x34, 0x56]);
            stream.extend(control.encode(variant, true)?);
            stream.extend(report.encode(variant, false)?);

            let control = if variant == ProtocolVariant::Legacy {
                // Legacy frames carry the subcommand as part of the payload
                let [hi, lo] = subcommand::SET_GROUP_PARAMETERS.to_be_bytes();

                Message::new(FrameType::CONTROL).with_payload([hi, lo, 0xff, 0xff])
            } else {
                control
            };
            let expected = [report.clone(), control, report];

            let mut rx = Receiver::new(variant, TIMEOUT);

            assert_eq!(
                rx.feed(&stream, Duration::ZERO),
                expected,
                "{variant} frames should be received in one chunk"
            );

            let mut rx = Receiver::new(variant, TIMEOUT);
            let mut msgs = Vec::new();

            for byte in &stream {
                msgs.extend(rx.feed(&[*byte], Duration::ZERO));
            }

            assert_eq!(msgs, expected, "{variant} frames should be received byte by byte");
        }

        Ok(())
    }

    #[test]
    fn invalid_length_ignored() {
        let mut rx = Receiver::new(ProtocolVariant::Extended, TIMEOUT);

        assert!(
            rx.feed(&[0xff, 0xff, 0x03, 0x00], Duration::ZERO).is_empty(),
            "short length should be ignored"
        );
        assert!(!rx.is_receiving(), "receiver should keep seeking");

        rx.feed(&[0xff, 0xff, 0xf0], Duration::ZERO);

        assert!(!rx.is_receiving(), "oversized length should be ignored");
    }
}
