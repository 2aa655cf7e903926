//! Device status and control block layout.

use crate::{
    ProtocolError,
    climate::{FanMode, MAX_TARGET_TEMPERATURE, MIN_TARGET_TEMPERATURE, Mode, Preset, SwingMode},
    frame::ProtocolVariant,
};
use alloc::string::String;
use bitflags::bitflags;
use bitflags_derive::{FlagsDebug, FlagsDisplay};
use strum::{Display, FromRepr};

/// Size of the control block.
pub const CONTROL_LEN: usize = 10;

/// Size of the sensor block following the control block in status answers.
pub const SENSORS_LEN: usize = 18;

/// Minimum size of a status answer payload (subcommand, control and sensor blocks).
pub const STATUS_LEN: usize = 2 + CONTROL_LEN + SENSORS_LEN;

/// Size of the device version answer payload.
pub const DEVICE_VERSION_LEN: usize = 38;

const OUTDOOR_TEMPERATURE_OFFSET: i16 = -64;

// Control block byte offsets
const SET_POINT: usize = 0;
const VERTICAL_SWING: usize = 1;
const MODES: usize = 2;
const OPTIONS: usize = 4;
const SWITCHES: usize = 5;
const HORIZONTAL_SWING: usize = 7;

// Sensor block byte offsets
const ROOM_TEMPERATURE: usize = 0;
const ROOM_HUMIDITY: usize = 1;
const OUTDOOR_TEMPERATURE: usize = 2;
const ERROR_STATUS: usize = 4;

/// Conditioning mode field of the control block.
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum ConditioningMode {
    /// Automatic.
    Auto = 0x00,
    /// Cooling.
    Cool = 0x01,
    /// Dehumidification.
    Dry = 0x02,
    /// Healthy dehumidification.
    HealthyDry = 0x03,
    /// Heating.
    Heat = 0x04,
    /// Energy saving.
    EnergySaving = 0x05,
    /// Ventilation only.
    Fan = 0x06,
}

/// Fan speed field of the control block.
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum FanSpeed {
    /// High speed.
    High = 0x01,
    /// Medium speed.
    Mid = 0x02,
    /// Low speed.
    Low = 0x03,
    /// Automatic speed.
    Auto = 0x05,
}

/// Vertical louver field of the control block.
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum VerticalSwing {
    /// Health mode, upwards.
    HealthUp = 0x01,
    /// Maximum up.
    MaxUp = 0x02,
    /// Health mode, downwards.
    HealthDown = 0x03,
    /// Up.
    Up = 0x04,
    /// Center.
    Center = 0x06,
    /// Down.
    Down = 0x08,
    /// Maximum down.
    MaxDown = 0x0a,
    /// Swinging.
    Auto = 0x0c,
}

/// Horizontal louver field of the control block.
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum HorizontalSwing {
    /// Center.
    Center = 0x00,
    /// Maximum left.
    MaxLeft = 0x03,
    /// Left.
    Left = 0x04,
    /// Right.
    Right = 0x05,
    /// Maximum right.
    MaxRight = 0x06,
    /// Swinging.
    Auto = 0x07,
}

/// The 10-byte control block shared by status answers and control requests.
///
/// Accessors only touch the bits of their field, all other bits are kept as
/// received from the device.
#[derive(PartialEq, Eq, Copy, Clone, Default, Debug)]
pub struct ControlRegion([u8; CONTROL_LEN]);

impl ControlRegion {
    /// Constructs a control block from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; CONTROL_LEN]) -> Self {
        Self(bytes)
    }

    /// Constructs a control block from the start of a byte slice.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        data.get(..CONTROL_LEN)?.try_into().ok().map(Self)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CONTROL_LEN] {
        &self.0
    }

    const fn field(&self, index: usize, shift: u8, mask: u8) -> u8 {
        (self.0[index] >> shift) & mask
    }

    const fn set_field(&mut self, index: usize, shift: u8, mask: u8, val: u8) {
        self.0[index] = (self.0[index] & !(mask << shift)) | ((val & mask) << shift);
    }

    const fn bit(&self, index: usize, bit: u8) -> bool {
        self.field(index, bit, 0x01) != 0
    }

    const fn set_bit(&mut self, index: usize, bit: u8, val: bool) {
        self.set_field(index, bit, 0x01, val as u8);
    }

    /// Returns the target temperature in °C.
    #[must_use]
    pub const fn target_temperature(&self) -> u8 {
        self.0[SET_POINT].saturating_add(MIN_TARGET_TEMPERATURE)
    }

    /// Sets the target temperature in °C, clamped to the supported range.
    pub fn set_target_temperature(&mut self, celsius: u8) {
        self.0[SET_POINT] =
            celsius.clamp(MIN_TARGET_TEMPERATURE, MAX_TARGET_TEMPERATURE) - MIN_TARGET_TEMPERATURE;
    }

    /// Returns the vertical louver setting.
    #[must_use]
    pub fn vertical_swing(&self) -> Option<VerticalSwing> {
        VerticalSwing::from_repr(self.field(VERTICAL_SWING, 0, 0x0f))
    }

    /// Sets the vertical louver setting.
    pub const fn set_vertical_swing(&mut self, swing: VerticalSwing) {
        self.set_field(VERTICAL_SWING, 0, 0x0f, swing as u8);
    }

    /// Returns the fan speed.
    #[must_use]
    pub fn fan_speed(&self) -> Option<FanSpeed> {
        FanSpeed::from_repr(self.field(MODES, 0, 0x07))
    }

    /// Sets the fan speed.
    pub const fn set_fan_speed(&mut self, speed: FanSpeed) {
        self.set_field(MODES, 0, 0x07, speed as u8);
    }

    /// Returns the conditioning mode.
    #[must_use]
    pub fn conditioning_mode(&self) -> Option<ConditioningMode> {
        ConditioningMode::from_repr(self.field(MODES, 5, 0x07))
    }

    /// Sets the conditioning mode.
    pub const fn set_conditioning_mode(&mut self, mode: ConditioningMode) {
        self.set_field(MODES, 5, 0x07, mode as u8);
    }

    /// Returns whether the 10 °C frost protection is enabled.
    #[must_use]
    pub const fn ten_degree(&self) -> bool {
        self.bit(OPTIONS, 0)
    }

    /// Enables or disables the 10 °C frost protection.
    pub const fn set_ten_degree(&mut self, val: bool) {
        self.set_bit(OPTIONS, 0, val);
    }

    /// Returns whether the display is enabled.
    #[must_use]
    pub const fn display(&self) -> bool {
        self.bit(OPTIONS, 1)
    }

    /// Enables or disables the display.
    pub const fn set_display(&mut self, val: bool) {
        self.set_bit(OPTIONS, 1, val);
    }

    /// Returns whether temperatures are shown in Fahrenheit.
    #[must_use]
    pub const fn use_fahrenheit(&self) -> bool {
        self.bit(OPTIONS, 5)
    }

    /// Returns whether the unit is powered on.
    #[must_use]
    pub const fn power(&self) -> bool {
        self.bit(SWITCHES, 0)
    }

    /// Powers the unit on or off.
    pub const fn set_power(&mut self, val: bool) {
        self.set_bit(SWITCHES, 0, val);
    }

    /// Returns whether the ionizer (health mode) is enabled.
    #[must_use]
    pub const fn health(&self) -> bool {
        self.bit(SWITCHES, 1)
    }

    /// Returns whether fast mode is enabled.
    #[must_use]
    pub const fn fast(&self) -> bool {
        self.bit(SWITCHES, 3)
    }

    /// Returns whether quiet mode is enabled.
    #[must_use]
    pub const fn quiet(&self) -> bool {
        self.bit(SWITCHES, 4)
    }

    /// Returns whether sleep mode is enabled.
    #[must_use]
    pub const fn sleep(&self) -> bool {
        self.bit(SWITCHES, 5)
    }

    /// Sets the quiet, fast and sleep mode bits at once.
    pub const fn set_special_modes(&mut self, quiet: bool, fast: bool, sleep: bool) {
        self.set_bit(SWITCHES, 4, quiet);
        self.set_bit(SWITCHES, 3, fast);
        self.set_bit(SWITCHES, 5, sleep);
    }

    /// Returns whether the command feedback beeper is disabled.
    #[must_use]
    pub const fn beeper_disabled(&self) -> bool {
        self.bit(SWITCHES, 7)
    }

    /// Disables or enables the command feedback beeper.
    pub const fn set_beeper_disabled(&mut self, val: bool) {
        self.set_bit(SWITCHES, 7, val);
    }

    /// Returns the horizontal louver setting.
    #[must_use]
    pub fn horizontal_swing(&self) -> Option<HorizontalSwing> {
        HorizontalSwing::from_repr(self.field(HORIZONTAL_SWING, 0, 0x07))
    }

    /// Sets the horizontal louver setting.
    pub const fn set_horizontal_swing(&mut self, swing: HorizontalSwing) {
        self.set_field(HORIZONTAL_SWING, 0, 0x07, swing as u8);
    }

    /// Returns the operating mode, taking the power state into account.
    #[must_use]
    pub fn mode(&self) -> Option<Mode> {
        if !self.power() {
            return Some(Mode::Off);
        }

        match self.conditioning_mode()? {
            ConditioningMode::Auto => Some(Mode::Auto),
            ConditioningMode::Cool => Some(Mode::Cool),
            ConditioningMode::Dry => Some(Mode::Dry),
            ConditioningMode::Heat => Some(Mode::Heat),
            ConditioningMode::Fan => Some(Mode::FanOnly),
            ConditioningMode::HealthyDry | ConditioningMode::EnergySaving => None,
        }
    }

    /// Returns the fan mode.
    #[must_use]
    pub fn fan_mode(&self) -> Option<FanMode> {
        Some(match self.fan_speed()? {
            FanSpeed::Auto => FanMode::Auto,
            FanSpeed::Low => FanMode::Low,
            FanSpeed::Mid => FanMode::Medium,
            FanSpeed::High => FanMode::High,
        })
    }

    /// Returns the swing mode.
    #[must_use]
    pub fn swing_mode(&self) -> SwingMode {
        let vertical = self.vertical_swing() == Some(VerticalSwing::Auto);
        let horizontal = self.horizontal_swing() == Some(HorizontalSwing::Auto);

        match (vertical, horizontal) {
            (true, true) => SwingMode::Both,
            (true, false) => SwingMode::Vertical,
            (false, true) => SwingMode::Horizontal,
            (false, false) => SwingMode::Off,
        }
    }

    /// Returns the active preset.
    ///
    /// Quiet takes precedence over fast, fast over sleep.
    #[must_use]
    pub const fn preset(&self, variant: ProtocolVariant) -> Preset {
        if self.quiet() {
            Preset::Eco
        } else if self.fast() {
            Preset::Boost
        } else if self.sleep() {
            Preset::Sleep
        } else if self.ten_degree() && variant.supports_away_preset() {
            Preset::Away
        } else {
            Preset::None
        }
    }
}

/// Decoded device status.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct DeviceStatus {
    /// Operating mode, `None` for modes without a user-facing counterpart.
    pub mode: Option<Mode>,
    /// Fan mode.
    pub fan_mode: Option<FanMode>,
    /// Swing mode.
    pub swing_mode: SwingMode,
    /// Active preset.
    pub preset: Preset,
    /// Target temperature in °C.
    pub target_temperature: u8,
    /// Room temperature in °C.
    pub current_temperature: f32,
    /// Outdoor temperature in °C.
    pub outdoor_temperature: i16,
    /// Room humidity in %.
    pub humidity: u8,
    /// Whether the display is enabled.
    pub display: bool,
    /// Whether the ionizer (health mode) is enabled.
    pub health: bool,
    /// Device error code, zero if there is no error.
    pub error_code: u8,
}

impl DeviceStatus {
    /// Decodes a status answer payload.
    ///
    /// The payload starts with the echoed subcommand, followed by the
    /// control and sensor blocks.
    pub fn decode(
        payload: &[u8],
        variant: ProtocolVariant,
    ) -> Result<(ControlRegion, Self), ProtocolError> {
        if payload.len() < STATUS_LEN {
            return Err(ProtocolError::WrongMessageStructure);
        }

        let control =
            ControlRegion::from_slice(&payload[2..]).ok_or(ProtocolError::WrongMessageStructure)?;
        let sensors = &payload[2 + CONTROL_LEN..];

        let status = Self {
            mode: control.mode(),
            fan_mode: control.fan_mode(),
            swing_mode: control.swing_mode(),
            preset: control.preset(variant),
            target_temperature: control.target_temperature(),
            current_temperature: f32::from(sensors[ROOM_TEMPERATURE]) / 2.0,
            outdoor_temperature: i16::from(sensors[OUTDOOR_TEMPERATURE])
                + OUTDOOR_TEMPERATURE_OFFSET,
            humidity: sensors[ROOM_HUMIDITY],
            display: control.display(),
            health: control.health(),
            error_code: sensors[ERROR_STATUS],
        };

        Ok((control, status))
    }
}

static ERROR_MESSAGES: [&str; 52] = [
    "Alarm clear",
    "Outdoor module failure",
    "Faulty outdoor defrost sensor",
    "Outdoor compressor discharge sensor fault",
    "Outdoor EEPROM abnormal",
    "Indoor coil sensor failure",
    "Indoor and outdoor communication failure",
    "Power supply overvoltage protection",
    "Communication failure between panel and indoor unit",
    "Outdoor compressor overheating protection",
    "Abnormal outdoor environment sensor",
    "Full water protection",
    "Indoor EEPROM fault",
    "Outdoor return air sensor failure",
    "CBD and module communication failure",
    "Indoor DC fan failure",
    "Outdoor DC fan failure",
    "Door switch failure",
    "Dust filter needs cleaning",
    "Water shortage protection",
    "Humidity sensor failure",
    "Indoor temperature sensor failure",
    "Robot limit fault",
    "Indoor PM2.5 sensor failure",
    "Outdoor PM2.5 sensor failure",
    "Indoor heating overload/high load alarm",
    "Outdoor AC current protection",
    "Outdoor compressor running abnormally",
    "Outdoor DC current protection",
    "Outdoor no load fault",
    "Abnormal CT current",
    "Indoor refrigeration freeze protection",
    "High and low pressure protection",
    "Compressor return air temperature too high",
    "Faulty outdoor evaporation sensor",
    "Outdoor cooling overload",
    "Water pump drainage failure",
    "Three-phase power failure",
    "Four-way valve failure",
    "External alarm/rake switch failure",
    "Temperature cut-off protection alarm",
    "Idiosyncratic operation failure",
    "Electronic expansion valve failure",
    "Dual heat source sensor Tw failure",
    "Communication failure with the wired controller",
    "Indoor unit address duplicate fault",
    "50 Hz zero crossing fault",
    "Outdoor unit failure",
    "Formaldehyde sensor failure",
    "VOC sensor failure",
    "CO2 sensor failure",
    "Firewall failure",
];

/// Returns the description of a device error code.
#[must_use]
pub fn error_message(code: u8) -> Option<&'static str> {
    ERROR_MESSAGES.get(usize::from(code)).copied()
}

bitflags! {
    /// Optional protocol features announced by the device.
    #[derive(FlagsDisplay, FlagsDebug, PartialEq, Eq, Copy, Clone)]
    pub struct Features: u8 {
        /// Interactive mode.
        const Interactive = 0x01;
        /// Controller-device mode.
        const MasterSlave = 0x02;
        /// CRC16 on frames.
        const Crc = 0x04;
        /// Multiple devices on the bus.
        const MultipleDevices = 0x08;
        /// Multiple roles.
        const Roles = 0x20;
    }
}

/// Device identification from the device version answer.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct DeviceInfo {
    /// Protocol version.
    pub protocol_version: String,
    /// Software version.
    pub software_version: String,
    /// Hardware version.
    pub hardware_version: String,
    /// Device name.
    pub device_name: String,
    /// Announced protocol features.
    pub features: Features,
}

impl DeviceInfo {
    /// Parses a device version answer payload.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < DEVICE_VERSION_LEN {
            return Err(ProtocolError::WrongMessageStructure);
        }

        Ok(Self {
            protocol_version: field_string(&payload[0..8]),
            software_version: field_string(&payload[8..16]),
            // 3 bytes of encryption info
            hardware_version: field_string(&payload[19..27]),
            device_name: field_string(&payload[28..36]),
            features: Features::from_bits_truncate(payload[37]),
        })
    }
}

fn field_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0x00).unwrap_or(data.len());

    String::from_utf8_lossy(&data[..end]).trim_end().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_payload(control: [u8; CONTROL_LEN]) -> [u8; STATUS_LEN] {
        let mut payload = [0x00; STATUS_LEN];

        payload[..2].copy_from_slice(&[0x6d, 0x01]);
        payload[2..12].copy_from_slice(&control);
        payload[12] = 0x2d; // 22.5 °C
        payload[13] = 0x37;
        payload[14] = 0x54; // 20 °C

        payload
    }

    #[test]
    fn decode_status() -> Result<(), ProtocolError> {
        let payload = status_payload([
            0x06, 0x0c, 0x22, 0x00, 0x02, 0x11, 0x00, 0x00, 0x00, 0x00,
        ]);
        let (control, status) = DeviceStatus::decode(&payload, ProtocolVariant::Extended)?;

        assert_eq!(control.as_bytes(), &payload[2..12], "control block should be kept");
        assert_eq!(
            status,
            DeviceStatus {
                mode: Some(Mode::Cool),
                fan_mode: Some(FanMode::Medium),
                swing_mode: SwingMode::Vertical,
                preset: Preset::Eco,
                target_temperature: 22,
                current_temperature: 22.5,
                outdoor_temperature: 20,
                humidity: 0x37,
                display: true,
                health: false,
                error_code: 0,
            },
            "status should be decoded"
        );

        Ok(())
    }

    #[test]
    fn power_off_overrides_mode() -> Result<(), ProtocolError> {
        let payload = status_payload([0x00, 0x06, 0x85, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00]);
        let (_, status) = DeviceStatus::decode(&payload, ProtocolVariant::Extended)?;

        assert_eq!(status.mode, Some(Mode::Off), "mode should be off");
        assert_eq!(status.fan_mode, Some(FanMode::Auto), "fan mode should be auto");
        assert_eq!(status.swing_mode, SwingMode::Horizontal, "swing should be horizontal");

        Ok(())
    }

    #[test]
    fn away_preset_on_legacy_only() -> Result<(), ProtocolError> {
        let payload = status_payload([0x00, 0x00, 0x81, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00]);
        let (_, legacy) = DeviceStatus::decode(&payload, ProtocolVariant::Legacy)?;
        let (_, extended) = DeviceStatus::decode(&payload, ProtocolVariant::Extended)?;

        assert_eq!(legacy.preset, Preset::Away, "legacy should report away");
        assert_eq!(extended.preset, Preset::None, "extended should ignore the bit");

        Ok(())
    }

    #[test]
    fn short_status() {
        assert_eq!(
            DeviceStatus::decode(&[0x6d, 0x01, 0x00], ProtocolVariant::Extended),
            Err(ProtocolError::WrongMessageStructure),
            "short payload should be rejected"
        );
    }

    #[test]
    fn field_setters_keep_other_bits() {
        let mut control = ControlRegion::from_bytes([0xff; CONTROL_LEN]);

        control.set_fan_speed(FanSpeed::Low);
        control.set_conditioning_mode(ConditioningMode::Heat);
        control.set_vertical_swing(VerticalSwing::Center);
        control.set_horizontal_swing(HorizontalSwing::Left);
        control.set_power(false);
        control.set_target_temperature(40);

        assert_eq!(
            control.as_bytes(),
            &[0x0e, 0xf6, 0x9b, 0xff, 0xff, 0xfe, 0xff, 0xfc, 0xff, 0xff],
            "only the targeted bits should change"
        );
        assert_eq!(control.target_temperature(), 30, "temperature should be clamped");
    }

    #[test]
    fn device_info() -> Result<(), ProtocolError> {
        let mut payload = [0x00; DEVICE_VERSION_LEN];

        payload[0..8].copy_from_slice(b"E_V2.0.0");
        payload[8..16].copy_from_slice(b"17122700");
        payload[19..23].copy_from_slice(b"U-AC");
        payload[28..33].copy_from_slice(b"HAIER");
        payload[37] = 0x05;

        let info = DeviceInfo::parse(&payload)?;

        assert_eq!(info.protocol_version, "E_V2.0.0", "protocol version should be correct");
        assert_eq!(info.software_version, "17122700", "software version should be correct");
        assert_eq!(info.hardware_version, "U-AC", "hardware version should be correct");
        assert_eq!(info.device_name, "HAIER", "device name should be correct");
        assert_eq!(
            info.features,
            Features::Interactive | Features::Crc,
            "features should be correct"
        );
        assert_eq!(
            DeviceInfo::parse(&payload[..20]),
            Err(ProtocolError::WrongMessageStructure),
            "short payload should be rejected"
        );

        Ok(())
    }

    #[test]
    fn error_messages() {
        assert_eq!(error_message(0x00), Some("Alarm clear"), "zero should clear");
        assert_eq!(
            error_message(0x01),
            Some("Outdoor module failure"),
            "message should be correct"
        );
        assert_eq!(error_message(0x33), Some("Firewall failure"), "last code should be known");
        assert_eq!(error_message(0x34), None, "unknown code should have no message");
    }
}
