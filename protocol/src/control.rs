//! Building control requests from the last device status.
//!
//! A control request always carries the complete control block. It is built
//! by taking the control block of the last status answer and overwriting only
//! the fields the user asked to change, so that settings the user never
//! touched (and bits without a known meaning) are sent back unchanged.

use crate::{
    climate::{FanMode, HorizontalAirflow, Mode, Preset, SwingMode, VerticalAirflow},
    frame::ProtocolVariant,
    status::{ConditioningMode, ControlRegion, FanSpeed, HorizontalSwing, VerticalSwing},
};
use core::{
    fmt::{Display, Formatter},
    str::FromStr,
};

/// Requested changes to the climate settings.
///
/// Fields left as `None` keep their current value.
#[derive(PartialEq, Eq, Copy, Clone, Default, Debug)]
pub struct ControlRequest {
    /// Operating mode.
    pub mode: Option<Mode>,
    /// Fan mode.
    pub fan_mode: Option<FanMode>,
    /// Swing mode.
    pub swing_mode: Option<SwingMode>,
    /// Target temperature in °C.
    pub target_temperature: Option<u8>,
    /// Preset.
    pub preset: Option<Preset>,
}

impl ControlRequest {
    /// Sets the requested operating mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the requested fan mode.
    #[must_use]
    pub const fn with_fan_mode(mut self, fan_mode: FanMode) -> Self {
        self.fan_mode = Some(fan_mode);
        self
    }

    /// Sets the requested swing mode.
    #[must_use]
    pub const fn with_swing_mode(mut self, swing_mode: SwingMode) -> Self {
        self.swing_mode = Some(swing_mode);
        self
    }

    /// Sets the requested target temperature in °C.
    #[must_use]
    pub const fn with_target_temperature(mut self, celsius: u8) -> Self {
        self.target_temperature = Some(celsius);
        self
    }

    /// Sets the requested preset.
    #[must_use]
    pub const fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = Some(preset);
        self
    }

    /// Returns whether no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.fan_mode.is_none()
            && self.swing_mode.is_none()
            && self.target_temperature.is_none()
            && self.preset.is_none()
    }
}

/// Error type for parsing a [`ControlRequest`].
#[non_exhaustive]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ParseRequestError {
    /// A token is not of the form `key=value`.
    InvalidToken,
    /// The key is unknown.
    UnknownKey,
    /// The value is invalid for its key.
    InvalidValue,
}

impl Display for ParseRequestError {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::InvalidToken => write!(f, "expected key=value"),
            Self::UnknownKey => write!(f, "unknown key"),
            Self::InvalidValue => write!(f, "invalid value"),
        }
    }
}

impl core::error::Error for ParseRequestError {}

impl FromStr for ControlRequest {
    type Err = ParseRequestError;

    /// Parses whitespace-separated `key=value` pairs, e.g. `mode=cool temperature=22`.
    ///
    /// Known keys are `mode`, `fan`, `swing`, `temperature` and `preset`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut req = Self::default();

        for token in s.split_whitespace() {
            let (key, val) = token
                .split_once('=')
                .ok_or(ParseRequestError::InvalidToken)?;

            match key {
                "mode" => {
                    req.mode = Some(val.parse().map_err(|_| ParseRequestError::InvalidValue)?);
                }
                "fan" => {
                    req.fan_mode = Some(val.parse().map_err(|_| ParseRequestError::InvalidValue)?);
                }
                "swing" => {
                    req.swing_mode = Some(val.parse().map_err(|_| ParseRequestError::InvalidValue)?);
                }
                "temperature" => {
                    req.target_temperature =
                        Some(val.parse().map_err(|_| ParseRequestError::InvalidValue)?);
                }
                "preset" => {
                    req.preset = Some(val.parse().map_err(|_| ParseRequestError::InvalidValue)?);
                }
                _ => return Err(ParseRequestError::UnknownKey),
            }
        }

        Ok(req)
    }
}

/// Settings requested by the user that were not yet confirmed by the device.
#[derive(PartialEq, Eq, Copy, Clone, Default, Debug)]
pub struct PendingSettings {
    request: ControlRequest,
    valid: bool,
}

impl PendingSettings {
    /// Merges a request into the pending settings.
    ///
    /// Fields set in the request overwrite pending values,
    /// all other pending values are kept.
    pub const fn merge(&mut self, req: &ControlRequest) {
        if req.mode.is_some() {
            self.request.mode = req.mode;
        }

        if req.fan_mode.is_some() {
            self.request.fan_mode = req.fan_mode;
        }

        if req.swing_mode.is_some() {
            self.request.swing_mode = req.swing_mode;
        }

        if req.target_temperature.is_some() {
            self.request.target_temperature = req.target_temperature;
        }

        if req.preset.is_some() {
            self.request.preset = req.preset;
        }

        self.valid = true;
    }

    /// Clears all pending settings.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns whether there are pending settings.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns the merged pending request.
    #[must_use]
    pub const fn request(&self) -> &ControlRequest {
        &self.request
    }
}

/// Fan speeds last seen by mode class.
///
/// Switching modes restores the fan speed last used in the target mode class.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct FanMemory {
    /// Fan speed used in fan-only mode.
    pub fan_only: FanSpeed,
    /// Fan speed used in all other modes.
    pub other_modes: FanSpeed,
}

impl Default for FanMemory {
    fn default() -> Self {
        Self {
            fan_only: FanSpeed::Mid,
            other_modes: FanSpeed::Auto,
        }
    }
}

impl FanMemory {
    /// Remembers the fan speed of a received control block.
    pub fn remember(&mut self, control: &ControlRegion) {
        let Some(speed) = control.fan_speed() else {
            return;
        };

        if control.conditioning_mode() == Some(ConditioningMode::Fan) {
            // Auto is not available in fan-only mode
            if speed != FanSpeed::Auto {
                self.fan_only = speed;
            }
        } else {
            self.other_modes = speed;
        }
    }
}

/// Engine-level settings applied to every control request.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct ControlFlags {
    /// Display state, `None` keeps the device state.
    pub display: Option<bool>,
    /// Fixed vertical direction, `None` keeps the device state.
    pub vertical_airflow: Option<VerticalAirflow>,
    /// Fixed horizontal direction, `None` keeps the device state.
    pub horizontal_airflow: Option<HorizontalAirflow>,
    /// Whether the device should beep when accepting user changes.
    pub beeper_echo: bool,
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self {
            display: None,
            vertical_airflow: None,
            horizontal_airflow: None,
            beeper_echo: true,
        }
    }
}

impl From<VerticalAirflow> for VerticalSwing {
    fn from(dir: VerticalAirflow) -> Self {
        match dir {
            VerticalAirflow::Up => Self::Up,
            VerticalAirflow::Center => Self::Center,
            VerticalAirflow::Down => Self::Down,
        }
    }
}

impl From<HorizontalAirflow> for HorizontalSwing {
    fn from(dir: HorizontalAirflow) -> Self {
        match dir {
            HorizontalAirflow::Left => Self::Left,
            HorizontalAirflow::Center => Self::Center,
            HorizontalAirflow::Right => Self::Right,
        }
    }
}

/// Builds the control block of the next control request.
#[must_use]
pub fn build_control(
    snapshot: &ControlRegion,
    pending: &PendingSettings,
    fan_memory: &FanMemory,
    flags: &ControlFlags,
    variant: ProtocolVariant,
) -> ControlRegion {
    let mut out = *snapshot;

    if pending.is_valid() {
        apply_request(&mut out, snapshot, pending.request(), fan_memory, flags, variant);
    } else {
        if let Some(dir) = flags.vertical_airflow {
            if out.vertical_swing() != Some(VerticalSwing::Auto) {
                out.set_vertical_swing(dir.into());
            }
        }

        if let Some(dir) = flags.horizontal_airflow {
            if out.horizontal_swing() != Some(HorizontalSwing::Auto) {
                out.set_horizontal_swing(dir.into());
            }
        }
    }

    out.set_beeper_disabled(!flags.beeper_echo || !pending.is_valid());

    if let Some(display) = flags.display {
        out.set_display(display);
    }

    out
}

fn apply_request(
    out: &mut ControlRegion,
    snapshot: &ControlRegion,
    req: &ControlRequest,
    fan_memory: &FanMemory,
    flags: &ControlFlags,
    variant: ProtocolVariant,
) {
    if let Some(mode) = req.mode {
        let (conditioning, speed) = match mode {
            Mode::Off => (None, None),
            Mode::Auto => (Some(ConditioningMode::Auto), Some(fan_memory.other_modes)),
            Mode::Cool => (Some(ConditioningMode::Cool), Some(fan_memory.other_modes)),
            Mode::Heat => (Some(ConditioningMode::Heat), Some(fan_memory.other_modes)),
            Mode::Dry => (Some(ConditioningMode::Dry), Some(fan_memory.other_modes)),
            Mode::FanOnly => (Some(ConditioningMode::Fan), Some(fan_memory.fan_only)),
        };

        out.set_power(conditioning.is_some());

        if let Some(conditioning) = conditioning {
            out.set_conditioning_mode(conditioning);
        }

        if let Some(speed) = speed {
            out.set_fan_speed(speed);
        }
    }

    if let Some(fan_mode) = req.fan_mode {
        let fan_only = req.mode.or_else(|| snapshot.mode()) == Some(Mode::FanOnly);

        match fan_mode {
            FanMode::Low => out.set_fan_speed(FanSpeed::Low),
            FanMode::Medium => out.set_fan_speed(FanSpeed::Mid),
            FanMode::High => out.set_fan_speed(FanSpeed::High),
            FanMode::Auto if !fan_only => out.set_fan_speed(FanSpeed::Auto),
            FanMode::Auto => {}
        }
    }

    if let Some(swing_mode) = req.swing_mode {
        let vertical = matches!(swing_mode, SwingMode::Vertical | SwingMode::Both);
        let horizontal = matches!(swing_mode, SwingMode::Horizontal | SwingMode::Both);

        out.set_vertical_swing(if vertical {
            VerticalSwing::Auto
        } else {
            flags.vertical_airflow.unwrap_or_default().into()
        });
        out.set_horizontal_swing(if horizontal {
            HorizontalSwing::Auto
        } else {
            flags.horizontal_airflow.unwrap_or_default().into()
        });
    }

    if let Some(celsius) = req.target_temperature {
        out.set_target_temperature(celsius);
    }

    if let Some(preset) = req.preset {
        out.set_special_modes(
            preset == Preset::Eco,
            preset == Preset::Boost,
            preset == Preset::Sleep,
        );

        if variant.supports_away_preset() {
            out.set_ten_degree(preset == Preset::Away);
        }
    }
}
