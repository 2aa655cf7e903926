//! Climate settings as seen by the user.

use strum::{Display, EnumString, VariantNames};

/// Lowest settable target temperature in °C.
pub const MIN_TARGET_TEMPERATURE: u8 = 16;

/// Highest settable target temperature in °C.
pub const MAX_TARGET_TEMPERATURE: u8 = 30;

/// Operating mode.
#[derive(Display, EnumString, VariantNames, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    /// The unit is switched off.
    Off,
    /// Automatic heating or cooling.
    Auto,
    /// Cooling.
    Cool,
    /// Heating.
    Heat,
    /// Dehumidification.
    Dry,
    /// Ventilation only.
    FanOnly,
}

/// Fan speed setting.
#[derive(Display, EnumString, VariantNames, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum FanMode {
    /// Speed chosen by the unit.
    Auto,
    /// Low speed.
    Low,
    /// Medium speed.
    Medium,
    /// High speed.
    High,
}

/// Airflow swing setting.
#[derive(Display, EnumString, VariantNames, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum SwingMode {
    /// Fixed louvers.
    Off,
    /// Vertical swing only.
    Vertical,
    /// Horizontal swing only.
    Horizontal,
    /// Vertical and horizontal swing.
    Both,
}

/// Special operating preset.
#[derive(Display, EnumString, VariantNames, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum Preset {
    /// No preset.
    None,
    /// Quiet operation.
    Eco,
    /// Fast operation.
    Boost,
    /// Night mode.
    Sleep,
    /// Frost protection at 10 °C, legacy units only.
    Away,
}

/// Fixed vertical louver direction used while vertical swing is off.
#[derive(Display, EnumString, VariantNames, PartialEq, Eq, Copy, Clone, Default, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum VerticalAirflow {
    /// Upwards.
    Up,
    /// Straight ahead.
    #[default]
    Center,
    /// Downwards.
    Down,
}

/// Fixed horizontal louver direction used while horizontal swing is off.
#[derive(Display, EnumString, VariantNames, PartialEq, Eq, Copy, Clone, Default, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum HorizontalAirflow {
    /// To the left.
    Left,
    /// Straight ahead.
    #[default]
    Center,
    /// To the right.
    Right,
}
