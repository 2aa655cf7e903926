//! Session configuration.

use crate::frame::ProtocolVariant;
use core::time::Duration;

/// Timing and feature configuration of a [`Session`](crate::session::Session).
///
/// The defaults match the timing expected by the indoor units.
///
/// # Examples
///
/// ```
/// use core::time::Duration;
/// use haier_ac::{Config, frame::ProtocolVariant};
///
/// let cfg = Config::default()
///     .with_variant(ProtocolVariant::ExtendedStuffed)
///     .with_status_interval(Duration::from_secs(10))
///     .with_signal_report(true);
///
/// assert_eq!(cfg.variant(), ProtocolVariant::ExtendedStuffed);
/// ```
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Config {
    variant: ProtocolVariant,
    frame_timeout: Duration,
    answer_timeout: Duration,
    communication_timeout: Duration,
    status_interval: Duration,
    message_interval: Duration,
    control_interval: Duration,
    signal_interval: Duration,
    control_timeout: Duration,
    signal_report: bool,
    beeper_echo: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::Extended,
            frame_timeout: Duration::from_millis(500),
            answer_timeout: Duration::from_millis(1000),
            communication_timeout: Duration::from_secs(60),
            status_interval: Duration::from_secs(5),
            message_interval: Duration::from_millis(2000),
            control_interval: Duration::from_millis(400),
            signal_interval: Duration::from_secs(10),
            control_timeout: Duration::from_secs(7),
            signal_report: false,
            beeper_echo: true,
        }
    }
}

impl Config {
    /// Sets the framing variant.
    #[must_use]
    pub const fn with_variant(mut self, variant: ProtocolVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Sets the time after which a partially received frame is dropped.
    #[must_use]
    pub const fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    /// Sets the time to wait for an answer to a request.
    #[must_use]
    pub const fn with_answer_timeout(mut self, timeout: Duration) -> Self {
        self.answer_timeout = timeout;
        self
    }

    /// Sets the time without a valid status after which the session restarts.
    #[must_use]
    pub const fn with_communication_timeout(mut self, timeout: Duration) -> Self {
        self.communication_timeout = timeout;
        self
    }

    /// Sets the status polling interval.
    #[must_use]
    pub const fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Sets the minimum interval between regular requests.
    #[must_use]
    pub const fn with_message_interval(mut self, interval: Duration) -> Self {
        self.message_interval = interval;
        self
    }

    /// Sets the minimum interval between control requests.
    #[must_use]
    pub const fn with_control_interval(mut self, interval: Duration) -> Self {
        self.control_interval = interval;
        self
    }

    /// Sets the signal level reporting interval.
    #[must_use]
    pub const fn with_signal_interval(mut self, interval: Duration) -> Self {
        self.signal_interval = interval;
        self
    }

    /// Sets the time after which unconfirmed control settings are dropped.
    #[must_use]
    pub const fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    /// Enables or disables reporting the network signal level to the device.
    #[must_use]
    pub const fn with_signal_report(mut self, enabled: bool) -> Self {
        self.signal_report = enabled;
        self
    }

    /// Sets the initial beeper echo state.
    #[must_use]
    pub const fn with_beeper_echo(mut self, enabled: bool) -> Self {
        self.beeper_echo = enabled;
        self
    }

    /// Returns the framing variant.
    #[must_use]
    pub const fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Returns the frame timeout.
    #[must_use]
    pub const fn frame_timeout(&self) -> Duration {
        self.frame_timeout
    }

    /// Returns the answer timeout.
    #[must_use]
    pub const fn answer_timeout(&self) -> Duration {
        self.answer_timeout
    }

    /// Returns the communication timeout.
    #[must_use]
    pub const fn communication_timeout(&self) -> Duration {
        self.communication_timeout
    }

    /// Returns the status polling interval.
    #[must_use]
    pub const fn status_interval(&self) -> Duration {
        self.status_interval
    }

    /// Returns the minimum interval between regular requests.
    #[must_use]
    pub const fn message_interval(&self) -> Duration {
        self.message_interval
    }

    /// Returns the minimum interval between control requests.
    #[must_use]
    pub const fn control_interval(&self) -> Duration {
        self.control_interval
    }

    /// Returns the signal level reporting interval.
    #[must_use]
    pub const fn signal_interval(&self) -> Duration {
        self.signal_interval
    }

    /// Returns the control timeout.
    #[must_use]
    pub const fn control_timeout(&self) -> Duration {
        self.control_timeout
    }

    /// Returns whether the signal level is reported to the device.
    #[must_use]
    pub const fn signal_report(&self) -> bool {
        self.signal_report
    }

    /// Returns the initial beeper echo state.
    #[must_use]
    pub const fn beeper_echo(&self) -> bool {
        self.beeper_echo
    }
}
