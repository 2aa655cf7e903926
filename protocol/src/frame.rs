//! Wire frame codec.
//!
//! Every frame starts with two `0xff` marker bytes followed by the frame body:
//!
//! ```text
//! +------+------+-----+-------+----------+------+------------+---------+----------+---------+
//! | 0xff | 0xff | len | flags | reserved | type | subcommand | payload | checksum | crc16   |
//! +------+------+-----+-------+----------+------+------------+---------+----------+---------+
//!                 1      1       5 bytes    1     0 or 2       n         1          0 or 2
//! ```
//!
//! The length byte counts the bytes from itself up to the end of the payload.
//! The checksum is the 8-bit sum of the same range. If bit `0x40` of the flags
//! byte is set, a big-endian CRC16 of that range follows the checksum.
//!
//! With [`ProtocolVariant::ExtendedStuffed`], every `0xff` inside the body is
//! followed by an extra `0x55` byte on the wire. Lengths, checksums and CRCs
//! always cover the unescaped body.

use alloc::vec::Vec;
use core::{
    fmt::{Debug, Display, Formatter},
    num::Wrapping,
};
use crc::{CRC_16_ARC, Crc};
use strum::{Display as StrumDisplay, EnumString, VariantNames};

/// Frame start marker, sent twice before every frame.
pub const MARKER: u8 = 0xff;

/// Byte inserted after a marker byte inside a stuffed frame body.
pub const ESCAPE: u8 = 0x55;

/// Size of the fixed frame header (length, flags, reserved bytes and type).
pub const HEADER_LEN: usize = 8;

/// Maximum size of an unescaped frame body, including checksum and CRC.
pub const MAX_BODY_LEN: usize = 128;

/// CRC16 of the extended variants: reflected polynomial `0xa001`, initial value `0x0000`.
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

const CRC_FLAG: u8 = 0x40;
const TYPE_OFFSET: usize = 7;

/// Error type for frame decoding and encoding.
#[non_exhaustive]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum FrameError {
    /// The frame ended before its declared length.
    Truncated,
    /// The frame does not start with the two marker bytes.
    MissingMarkers,
    /// The 8-bit checksum does not match the frame contents.
    ChecksumMismatch {
        /// Checksum carried by the frame.
        received: u8,
        /// Checksum computed over the frame contents.
        computed: u8,
    },
    /// The CRC16 does not match the frame contents.
    CrcMismatch {
        /// CRC carried by the frame.
        received: u16,
        /// CRC computed over the frame contents.
        computed: u16,
    },
    /// The message does not fit into a single frame.
    Oversized,
    /// Bytes follow the checksum (and CRC, if present).
    TrailingBytes,
}

impl Display for FrameError {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated frame"),
            Self::MissingMarkers => write!(f, "missing frame markers"),
            Self::ChecksumMismatch { received, computed } => write!(
                f,
                "checksum mismatch (received {received:#04x}, computed {computed:#04x})"
            ),
            Self::CrcMismatch { received, computed } => write!(
                f,
                "CRC mismatch (received {received:#06x}, computed {computed:#06x})"
            ),
            Self::Oversized => write!(f, "message too large for a frame"),
            Self::TrailingBytes => write!(f, "trailing bytes after frame"),
        }
    }
}

impl core::error::Error for FrameError {}

/// Framing variant spoken by the indoor unit.
#[derive(
    StrumDisplay, EnumString, VariantNames, PartialEq, Eq, Copy, Clone, Default, Debug,
)]
#[strum(serialize_all = "snake_case")]
pub enum ProtocolVariant {
    /// Older units: checksum only, payload starts right after the type byte.
    Legacy,
    /// Newer units: optional CRC16 and a 16-bit subcommand for control frames.
    #[default]
    Extended,
    /// Same as [`ProtocolVariant::Extended`] with marker bytes escaped in the body.
    ExtendedStuffed,
}

impl ProtocolVariant {
    /// Returns whether control frames carry a 16-bit subcommand.
    #[must_use]
    pub const fn has_subcommands(self) -> bool {
        !matches!(self, Self::Legacy)
    }

    /// Returns whether frames may carry a CRC16.
    #[must_use]
    pub const fn supports_crc(self) -> bool {
        !matches!(self, Self::Legacy)
    }

    /// Returns whether marker bytes inside the body are escaped.
    #[must_use]
    pub const fn escapes_markers(self) -> bool {
        matches!(self, Self::ExtendedStuffed)
    }

    /// Returns whether the unit understands the "away" (10 °C) preset.
    #[must_use]
    pub const fn supports_away_preset(self) -> bool {
        matches!(self, Self::Legacy)
    }
}

/// Frame type byte.
///
/// Unknown values are preserved so that they can be logged and rejected
/// by the dispatcher instead of failing to decode.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub struct FrameType(pub u8);

impl FrameType {
    /// Control request, also used to request the device status.
    pub const CONTROL: Self = Self(0x01);
    /// Device status answer.
    pub const STATUS: Self = Self(0x02);
    /// Invalid request answer.
    pub const INVALID: Self = Self(0x03);
    /// Unsolicited alarm status.
    pub const ALARM_STATUS: Self = Self(0x04);
    /// Confirmation without payload.
    pub const CONFIRM: Self = Self(0x05);
    /// Unsolicited report.
    pub const REPORT: Self = Self(0x06);
    /// Stop fault alarm.
    pub const STOP_FAULT_ALARM: Self = Self(0x09);
    /// System downlink.
    pub const SYSTEM_DOWNLINK: Self = Self(0x11);
    /// Device uplink.
    pub const DEVICE_UPLINK: Self = Self(0x12);
    /// System query.
    pub const SYSTEM_QUERY: Self = Self(0x13);
    /// System query answer.
    pub const SYSTEM_QUERY_RESPONSE: Self = Self(0x14);
    /// Device query.
    pub const DEVICE_QUERY: Self = Self(0x15);
    /// Device query answer.
    pub const DEVICE_QUERY_RESPONSE: Self = Self(0x16);
    /// Group command.
    pub const GROUP_COMMAND: Self = Self(0x60);
    /// Device version request.
    pub const GET_DEVICE_VERSION: Self = Self(0x61);
    /// Device version answer.
    pub const GET_DEVICE_VERSION_RESPONSE: Self = Self(0x62);
    /// Bus address enumeration.
    pub const GET_ALL_ADDRESSES: Self = Self(0x67);
    /// Bus address enumeration answer.
    pub const GET_ALL_ADDRESSES_RESPONSE: Self = Self(0x68);
    /// Handset change notification.
    pub const HANDSET_CHANGE: Self = Self(0x69);
    /// Device identifier request.
    pub const GET_DEVICE_ID: Self = Self(0x70);
    /// Device identifier answer.
    pub const GET_DEVICE_ID_RESPONSE: Self = Self(0x71);
    /// Alarm status request.
    pub const GET_ALARM_STATUS: Self = Self(0x73);
    /// Alarm status answer.
    pub const GET_ALARM_STATUS_RESPONSE: Self = Self(0x74);
    /// Device configuration request.
    pub const GET_DEVICE_CONFIGURATION: Self = Self(0x7c);
    /// Device configuration answer.
    pub const GET_DEVICE_CONFIGURATION_RESPONSE: Self = Self(0x7d);
    /// Network status request.
    pub const GET_NETWORK_STATUS: Self = Self(0xf0);
    /// Network status answer.
    pub const GET_NETWORK_STATUS_RESPONSE: Self = Self(0xf1);
    /// Network status report (signal level).
    pub const REPORT_NETWORK_STATUS: Self = Self(0xf7);
    /// Management information request.
    pub const GET_MANAGEMENT_INFORMATION: Self = Self(0xfc);
    /// Management information answer.
    pub const GET_MANAGEMENT_INFORMATION_RESPONSE: Self = Self(0xfd);
    /// Wake up.
    pub const WAKE_UP: Self = Self(0xfe);

    /// Returns the name of a known frame type.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0x01 => "Control",
            0x02 => "Status",
            0x03 => "Invalid",
            0x04 => "AlarmStatus",
            0x05 => "Confirm",
            0x06 => "Report",
            0x09 => "StopFaultAlarm",
            0x11 => "SystemDownlink",
            0x12 => "DeviceUplink",
            0x13 => "SystemQuery",
            0x14 => "SystemQueryResponse",
            0x15 => "DeviceQuery",
            0x16 => "DeviceQueryResponse",
            0x60 => "GroupCommand",
            0x61 => "GetDeviceVersion",
            0x62 => "GetDeviceVersionResponse",
            0x67 => "GetAllAddresses",
            0x68 => "GetAllAddressesResponse",
            0x69 => "HandsetChange",
            0x70 => "GetDeviceId",
            0x71 => "GetDeviceIdResponse",
            0x73 => "GetAlarmStatus",
            0x74 => "GetAlarmStatusResponse",
            0x7c => "GetDeviceConfiguration",
            0x7d => "GetDeviceConfigurationResponse",
            0xf0 => "GetNetworkStatus",
            0xf1 => "GetNetworkStatusResponse",
            0xf7 => "ReportNetworkStatus",
            0xfc => "GetManagementInformation",
            0xfd => "GetManagementInformationResponse",
            0xfe => "WakeUp",
            _ => return None,
        })
    }

    /// Returns the answer type expected for a request of this type.
    #[must_use]
    pub const fn answer(self) -> Option<Self> {
        Some(match self.0 {
            0x01 => Self::STATUS,
            0x13 => Self::SYSTEM_QUERY_RESPONSE,
            0x15 => Self::DEVICE_QUERY_RESPONSE,
            0x61 => Self::GET_DEVICE_VERSION_RESPONSE,
            0x67 => Self::GET_ALL_ADDRESSES_RESPONSE,
            0x70 => Self::GET_DEVICE_ID_RESPONSE,
            0x73 => Self::GET_ALARM_STATUS_RESPONSE,
            0x7c => Self::GET_DEVICE_CONFIGURATION_RESPONSE,
            0xf0 => Self::GET_NETWORK_STATUS_RESPONSE,
            0xf7 => Self::CONFIRM,
            0xfc => Self::GET_MANAGEMENT_INFORMATION_RESPONSE,
            _ => return None,
        })
    }

    /// Returns whether frames of this type start with a subcommand.
    const fn has_subcommand(self) -> bool {
        self.0 == Self::CONTROL.0
    }
}

impl Debug for FrameType {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "FrameType({:#04x})", self.0),
        }
    }
}

/// Control frame subcommands.
pub mod subcommand {
    /// Requests the complete user data (device status).
    pub const GET_USER_DATA: u16 = 0x4d01;
    /// Requests the big data block.
    pub const GET_BIG_DATA: u16 = 0x4dfe;
    /// Requests the user data of the previous generation.
    pub const GET_USER_DATA_LEGACY: u16 = 0x4c01;
    /// Sets a single parameter.
    pub const SET_SINGLE_PARAMETER: u16 = 0x5d00;
    /// Sets the complete user data block.
    pub const SET_USER_DATA: u16 = 0x5c01;
    /// Sets the group parameters (full control block).
    pub const SET_GROUP_PARAMETERS: u16 = 0x6001;
}

/// Logical protocol message carried by a frame.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Message {
    /// Frame type.
    pub frame_type: FrameType,
    /// Subcommand of control frames in the extended variants.
    pub subcommand: Option<u16>,
    /// Payload following the type (and subcommand, if any).
    pub payload: Vec<u8>,
}

impl Message {
    /// Constructs a message without subcommand and payload.
    #[must_use]
    pub const fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            subcommand: None,
            payload: Vec::new(),
        }
    }

    /// Constructs a control message with the given subcommand.
    #[must_use]
    pub const fn control(subcommand: u16) -> Self {
        Self {
            frame_type: FrameType::CONTROL,
            subcommand: Some(subcommand),
            payload: Vec::new(),
        }
    }

    /// Replaces the message payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Encodes the message into a wire frame.
    pub fn encode(&self, variant: ProtocolVariant, use_crc: bool) -> Result<Vec<u8>, FrameError> {
        encode(
            variant,
            self.frame_type,
            self.subcommand,
            &self.payload,
            use_crc,
        )
    }
}

/// Computes the 8-bit additive checksum of the given bytes.
pub fn compute_checksum(data: &[u8]) -> u8 {
    data.iter().map(|&x| Wrapping(x)).sum::<Wrapping<_>>().0
}

/// Returns the unescaped body size announced by a frame's length and flags bytes.
///
/// The CRC is only counted if the variant supports it and the flag is set.
#[must_use]
pub fn body_len(variant: ProtocolVariant, len: u8, flags: u8) -> usize {
    let crc_len = if variant.supports_crc() && flags & CRC_FLAG != 0 {
        2
    } else {
        0
    };

    usize::from(len) + 1 + crc_len
}

/// Encodes a frame, including markers and, for stuffed variants, escape bytes.
///
/// In the legacy variant a subcommand is written as the first two payload
/// bytes and `use_crc` is ignored.
pub fn encode(
    variant: ProtocolVariant,
    frame_type: FrameType,
    subcommand: Option<u16>,
    payload: &[u8],
    use_crc: bool,
) -> Result<Vec<u8>, FrameError> {
    let use_crc = use_crc && variant.supports_crc();
    let len = HEADER_LEN + subcommand.map_or(0, |_| 2) + payload.len();
    let len_byte = u8::try_from(len).map_err(|_| FrameError::Oversized)?;

    if body_len(variant, len_byte, if use_crc { CRC_FLAG } else { 0x00 }) > MAX_BODY_LEN {
        return Err(FrameError::Oversized);
    }

    let mut body = Vec::with_capacity(len + 3);

    body.push(len_byte);
    body.push(if use_crc { CRC_FLAG } else { 0x00 });
    body.extend_from_slice(&[0x00; 5]);
    body.push(frame_type.0);

    if let Some(sub) = subcommand {
        body.extend_from_slice(&sub.to_be_bytes());
    }

    body.extend_from_slice(payload);
    body.push(compute_checksum(&body));

    if use_crc {
        body.extend_from_slice(&CRC16.checksum(&body[..len]).to_be_bytes());
    }

    let mut wire = Vec::with_capacity(body.len() + 4);

    wire.extend_from_slice(&[MARKER, MARKER]);

    for &byte in &body {
        wire.push(byte);

        if byte == MARKER && variant.escapes_markers() {
            wire.push(ESCAPE);
        }
    }

    Ok(wire)
}

/// Decodes a complete wire frame, including markers and escape bytes.
pub fn decode(variant: ProtocolVariant, wire: &[u8]) -> Result<Message, FrameError> {
    let body = wire
        .strip_prefix(&[MARKER, MARKER])
        .ok_or(FrameError::MissingMarkers)?;

    if !variant.escapes_markers() {
        return decode_body(variant, body);
    }

    let mut unescaped = Vec::with_capacity(body.len());
    let mut after_marker = false;

    for &byte in body {
        if after_marker && byte == ESCAPE {
            after_marker = false;
            continue;
        }

        after_marker = byte == MARKER;
        unescaped.push(byte);
    }

    decode_body(variant, &unescaped)
}

/// Decodes an unescaped frame body starting at the length byte.
///
/// The body has to end right after the checksum (and CRC, if present).
pub fn decode_body(variant: ProtocolVariant, body: &[u8]) -> Result<Message, FrameError> {
    let (&len, &flags) = match body {
        [len, flags, ..] => (len, flags),
        _ => return Err(FrameError::Truncated),
    };
    let len_usize = usize::from(len);

    let expected_len = body_len(variant, len, flags);

    if len_usize < HEADER_LEN || body.len() < expected_len {
        return Err(FrameError::Truncated);
    }

    if body.len() > expected_len {
        return Err(FrameError::TrailingBytes);
    }

    let computed = compute_checksum(&body[..len_usize]);

    if body[len_usize] != computed {
        return Err(FrameError::ChecksumMismatch {
            received: body[len_usize],
            computed,
        });
    }

    if variant.supports_crc() && flags & CRC_FLAG != 0 {
        let received = u16::from_be_bytes([body[len_usize + 1], body[len_usize + 2]]);
        let computed = CRC16.checksum(&body[..len_usize]);

        if received != computed {
            return Err(FrameError::CrcMismatch { received, computed });
        }
    }

    let frame_type = FrameType(body[TYPE_OFFSET]);
    let data = &body[HEADER_LEN..len_usize];

    let (subcommand, payload) =
        if variant.has_subcommands() && frame_type.has_subcommand() && data.len() >= 2 {
            (Some(u16::from_be_bytes([data[0], data[1]])), &data[2..])
        } else {
            (None, data)
        };

    Ok(Message {
        frame_type,
        subcommand,
        payload: payload.to_vec(),
    })
}
