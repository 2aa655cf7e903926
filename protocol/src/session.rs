//! Session state machine.
//!
//! A [`Session`] drives the complete conversation with the indoor unit:
//!
//! 1. Handshake: device version, device identifier, first status, alarm status.
//! 2. Polling: periodic status requests and, if enabled, signal level reports.
//! 3. Control: merged control blocks are sent whenever the user changed settings.
//!
//! The session performs no I/O and never reads a clock. Received bytes are
//! passed to [`Session::handle_bytes`], the state machine is advanced with
//! [`Session::poll`] and frames to be written are taken from
//! [`Session::poll_transmit`]. Every call takes a monotonic timestamp.
//!
//! Errors never stop the session. Failed exchanges return to [`Phase::Idle`]
//! once the handshake completed, or restart the handshake otherwise.

use crate::{
    ProtocolError,
    climate::{FanMode, HorizontalAirflow, Mode, Preset, SwingMode, VerticalAirflow},
    config::Config,
    control::{self, ControlFlags, ControlRequest, FanMemory, PendingSettings},
    dispatch::Dispatcher,
    frame::{FrameType, Message, subcommand},
    receiver::Receiver,
    status::{ControlRegion, DeviceInfo, DeviceStatus, Features, error_message},
};
use alloc::vec::Vec;
use core::time::Duration;
use log::{debug, error, info, warn};
use strum::Display;

/// Capabilities announced to the device in the version request.
const MODULE_CAPABILITIES: [u8; 2] = [0x00, 0x07];

/// Session phase.
///
/// Phases are ordered: every phase before [`Phase::Idle`] belongs to the handshake.
#[derive(Display, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug)]
pub enum Phase {
    /// Sending the device version request.
    SendingInit1,
    /// Waiting for the device version.
    WaitingInit1,
    /// Sending the device identifier request.
    SendingInit2,
    /// Waiting for the device identifier.
    WaitingInit2,
    /// Sending the first status request.
    SendingFirstStatusRequest,
    /// Waiting for the first status.
    WaitingFirstStatusAnswer,
    /// Sending the alarm status request.
    SendingAlarmStatusRequest,
    /// Waiting for the alarm status.
    WaitingAlarmStatusAnswer,
    /// Handshake completed, nothing to do.
    Idle,
    /// Sending a status request.
    SendingStatusRequest,
    /// Waiting for the status.
    WaitingStatusAnswer,
    /// Sending the management information request.
    SendingUpdateSignalRequest,
    /// Waiting for the management information.
    WaitingUpdateSignalAnswer,
    /// Sending the signal level report.
    SendingSignalLevel,
    /// Waiting for the signal level confirmation.
    WaitingSignalLevelAnswer,
    /// Sending a control request.
    SendingControl,
    /// Waiting for the status answering the control request.
    WaitingControlAnswer,
}

/// Protocol session with a single indoor unit.
///
/// # Examples
///
/// ```
/// use core::time::Duration;
/// use haier_ac::{Config, session::{Phase, Session}};
///
/// let mut session = Session::new(Config::default(), Duration::ZERO);
///
/// session.poll(Duration::from_secs(3));
///
/// assert_eq!(session.phase(), Phase::WaitingInit1);
/// assert!(session.poll_transmit().is_some());
/// ```
pub struct Session {
    config: Config,
    phase: Phase,
    receiver: Receiver,
    dispatcher: Dispatcher<Self>,
    now: Duration,
    last_request_at: Duration,
    last_status_request_at: Duration,
    last_signal_request_at: Duration,
    last_valid_status_at: Duration,
    control_started_at: Option<Duration>,
    control_called: bool,
    pending: PendingSettings,
    sent_pending: PendingSettings,
    force_send_control: bool,
    forced_status_request: bool,
    forced_publish: bool,
    updated: bool,
    snapshot: Option<ControlRegion>,
    status: Option<DeviceStatus>,
    fan_memory: FanMemory,
    flags: ControlFlags,
    device: Option<DeviceInfo>,
    alarms: u64,
    signal_strength: Option<i8>,
}

impl Session {
    /// Constructs a new session.
    ///
    /// The first request is sent one message interval after `now`,
    /// giving the device time to boot.
    #[must_use]
    pub fn new(config: Config, now: Duration) -> Self {
        let mut dispatcher = Dispatcher::new(
            config.variant(),
            config.answer_timeout(),
            Self::answer_timeout_handler,
        );

        dispatcher.register(FrameType::GET_DEVICE_VERSION, Self::device_version_handler);
        dispatcher.register(FrameType::GET_DEVICE_ID, Self::device_id_handler);
        dispatcher.register(FrameType::CONTROL, Self::status_handler);
        dispatcher.register(FrameType::GET_ALARM_STATUS, Self::alarm_status_handler);
        dispatcher.register(
            FrameType::GET_MANAGEMENT_INFORMATION,
            Self::management_information_handler,
        );
        dispatcher.register(
            FrameType::REPORT_NETWORK_STATUS,
            Self::network_status_handler,
        );

        Self {
            config,
            phase: Phase::SendingInit1,
            receiver: Receiver::new(config.variant(), config.frame_timeout()),
            dispatcher,
            now,
            last_request_at: now,
            last_status_request_at: now,
            last_signal_request_at: now,
            last_valid_status_at: now,
            control_started_at: None,
            control_called: false,
            pending: PendingSettings::default(),
            sent_pending: PendingSettings::default(),
            force_send_control: false,
            forced_status_request: false,
            forced_publish: false,
            updated: false,
            snapshot: None,
            status: None,
            fan_memory: FanMemory::default(),
            flags: ControlFlags {
                beeper_echo: config.beeper_echo(),
                ..ControlFlags::default()
            },
            device: None,
            alarms: 0,
            signal_strength: None,
        }
    }

    /// Returns the session configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns whether outgoing frames carry a CRC.
    #[must_use]
    pub const fn use_crc(&self) -> bool {
        self.dispatcher.use_crc()
    }

    /// Processes bytes received from the device.
    pub fn handle_bytes(&mut self, data: &[u8], now: Duration) {
        self.now = now;

        for msg in self.receiver.feed(data, now) {
            self.handle_message(msg);
        }
    }

    /// Takes the next frame to be written to the device.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.dispatcher.poll_transmit()
    }

    /// Advances the state machine.
    ///
    /// Should be called regularly, at least every few hundred milliseconds.
    pub fn poll(&mut self, now: Duration) {
        self.now = now;
        self.receiver.poll_timeout(now);

        if let Some(dispatch) = self.dispatcher.poll_timeout(now) {
            let phase = self.phase;

            if let Err(err) = dispatch.invoke(self) {
                warn!("Request failed in phase {phase}: {err}");
            }
        }

        if self.elapsed(self.last_valid_status_at) > self.config.communication_timeout() {
            if self.phase >= Phase::Idle {
                warn!("No valid status received, restarting session");
                self.restart();

                return;
            }

            self.last_valid_status_at = now;
        }

        if (self.pending.is_valid() || self.force_send_control)
            && matches!(
                self.phase,
                Phase::Idle
                    | Phase::SendingStatusRequest
                    | Phase::SendingUpdateSignalRequest
                    | Phase::SendingSignalLevel
            )
        {
            self.set_phase(Phase::SendingControl);
        }

        match self.phase {
            Phase::SendingInit1 => {
                if self.can_send(self.config.message_interval()) {
                    self.device = None;
                    self.send_request(
                        Message::new(FrameType::GET_DEVICE_VERSION)
                            .with_payload(MODULE_CAPABILITIES),
                        Phase::WaitingInit1,
                    );
                }
            }
            Phase::SendingInit2 => {
                if self.can_send(self.config.message_interval()) {
                    self.send_request(Message::new(FrameType::GET_DEVICE_ID), Phase::WaitingInit2);
                }
            }
            Phase::SendingFirstStatusRequest | Phase::SendingStatusRequest => {
                if self.can_send(self.config.message_interval()) {
                    let next = if self.phase == Phase::SendingFirstStatusRequest {
                        Phase::WaitingFirstStatusAnswer
                    } else {
                        Phase::WaitingStatusAnswer
                    };

                    self.send_request(Message::control(subcommand::GET_USER_DATA), next);
                }
            }
            Phase::SendingAlarmStatusRequest => {
                if self.can_send(self.config.message_interval()) {
                    self.send_request(
                        Message::new(FrameType::GET_ALARM_STATUS),
                        Phase::WaitingAlarmStatusAnswer,
                    );
                }
            }
            Phase::SendingUpdateSignalRequest => {
                if self.can_send(self.config.message_interval()) {
                    self.send_request(
                        Message::new(FrameType::GET_MANAGEMENT_INFORMATION),
                        Phase::WaitingUpdateSignalAnswer,
                    );
                }
            }
            Phase::SendingSignalLevel => {
                if self.can_send(self.config.message_interval()) {
                    self.send_request(
                        Message::new(FrameType::REPORT_NETWORK_STATUS)
                            .with_payload(self.signal_level_payload()),
                        Phase::WaitingSignalLevelAnswer,
                    );
                }
            }
            Phase::SendingControl | Phase::WaitingControlAnswer => self.poll_control(),
            Phase::Idle => self.poll_idle(),
            Phase::WaitingInit1
            | Phase::WaitingInit2
            | Phase::WaitingFirstStatusAnswer
            | Phase::WaitingAlarmStatusAnswer
            | Phase::WaitingStatusAnswer
            | Phase::WaitingUpdateSignalAnswer
            | Phase::WaitingSignalLevelAnswer => {}
        }
    }

    /// Requests a change of the climate settings.
    ///
    /// The request is merged into the pending settings and sent with the
    /// next control request. Requests made before the handshake completed
    /// are dropped.
    pub fn control(&mut self, req: &ControlRequest) {
        if self.phase < Phase::Idle {
            warn!("Session not ready, dropping control request: {req:?}");

            return;
        }

        if self.pending.is_valid() {
            debug!("Merging control request into pending settings: {req:?}");
        }

        self.pending.merge(req);
        self.control_called = true;
    }

    /// Returns the settings not yet confirmed by the device.
    #[must_use]
    pub const fn pending(&self) -> &PendingSettings {
        &self.pending
    }

    /// Returns whether the decoded status changed since the last call.
    pub fn take_update(&mut self) -> bool {
        core::mem::take(&mut self.updated)
    }

    /// Returns the last decoded status.
    #[must_use]
    pub const fn status(&self) -> Option<&DeviceStatus> {
        self.status.as_ref()
    }

    /// Returns the control block of the last status.
    #[must_use]
    pub const fn control_region(&self) -> Option<&ControlRegion> {
        self.snapshot.as_ref()
    }

    /// Returns the operating mode.
    #[must_use]
    pub fn mode(&self) -> Option<Mode> {
        self.status?.mode
    }

    /// Returns the fan mode.
    #[must_use]
    pub fn fan_mode(&self) -> Option<FanMode> {
        self.status?.fan_mode
    }

    /// Returns the swing mode.
    #[must_use]
    pub fn swing_mode(&self) -> Option<SwingMode> {
        Some(self.status?.swing_mode)
    }

    /// Returns the active preset.
    #[must_use]
    pub fn preset(&self) -> Option<Preset> {
        Some(self.status?.preset)
    }

    /// Returns the target temperature in °C.
    #[must_use]
    pub fn target_temperature(&self) -> Option<u8> {
        Some(self.status?.target_temperature)
    }

    /// Returns the room temperature in °C.
    #[must_use]
    pub fn current_temperature(&self) -> Option<f32> {
        Some(self.status?.current_temperature)
    }

    /// Returns the outdoor temperature in °C.
    #[must_use]
    pub fn outdoor_temperature(&self) -> Option<i16> {
        Some(self.status?.outdoor_temperature)
    }

    /// Returns the device identification.
    #[must_use]
    pub const fn device_info(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    /// Returns the features announced by the device.
    #[must_use]
    pub fn features(&self) -> Features {
        self.device
            .as_ref()
            .map_or(Features::empty(), |info| info.features)
    }

    /// Returns the active alarm bitmask.
    #[must_use]
    pub const fn active_alarms(&self) -> u64 {
        self.alarms
    }

    /// Returns the display state, as requested or as last reported.
    #[must_use]
    pub fn display(&self) -> Option<bool> {
        self.flags
            .display
            .or_else(|| self.status.map(|status| status.display))
    }

    /// Turns the display on or off.
    pub fn set_display(&mut self, on: bool) {
        if self.flags.display != Some(on) {
            self.flags.display = Some(on);
            self.force_send_control = true;
        }
    }

    /// Returns whether the device beeps when accepting user changes.
    #[must_use]
    pub const fn beeper_echo(&self) -> bool {
        self.flags.beeper_echo
    }

    /// Sets whether the device beeps when accepting user changes.
    pub const fn set_beeper_echo(&mut self, on: bool) {
        self.flags.beeper_echo = on;
    }

    /// Returns the fixed vertical airflow direction.
    #[must_use]
    pub const fn vertical_airflow(&self) -> Option<VerticalAirflow> {
        self.flags.vertical_airflow
    }

    /// Sets the vertical airflow direction used while vertical swing is off.
    pub fn set_vertical_airflow(&mut self, dir: VerticalAirflow) {
        if self.flags.vertical_airflow != Some(dir) {
            self.flags.vertical_airflow = Some(dir);
            self.force_send_control = true;
        }
    }

    /// Returns the fixed horizontal airflow direction.
    #[must_use]
    pub const fn horizontal_airflow(&self) -> Option<HorizontalAirflow> {
        self.flags.horizontal_airflow
    }

    /// Sets the horizontal airflow direction used while horizontal swing is off.
    pub fn set_horizontal_airflow(&mut self, dir: HorizontalAirflow) {
        if self.flags.horizontal_airflow != Some(dir) {
            self.flags.horizontal_airflow = Some(dir);
            self.force_send_control = true;
        }
    }

    /// Sets the network signal strength in dBm reported to the device.
    ///
    /// `None` reports a disconnected network.
    pub const fn set_signal_strength(&mut self, rssi: Option<i8>) {
        self.signal_strength = rssi;
    }

    fn elapsed(&self, since: Duration) -> Duration {
        self.now.saturating_sub(since)
    }

    fn can_send(&self, interval: Duration) -> bool {
        self.dispatcher.can_send() && self.elapsed(self.last_request_at) > interval
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("Phase transition: {} => {phase}", self.phase);
            self.phase = phase;
        }
    }

    /// Returns to idle after the handshake, restarts the handshake otherwise.
    fn demote(&mut self) {
        self.set_phase(if self.phase >= Phase::Idle {
            Phase::Idle
        } else {
            Phase::SendingInit1
        });
    }

    fn restart(&mut self) {
        self.dispatcher.abandon();
        self.pending.reset();
        self.force_send_control = false;
        self.forced_status_request = false;
        self.control_started_at = None;
        self.control_called = false;
        self.last_valid_status_at = self.now;
        self.set_phase(Phase::SendingInit1);
    }

    fn send_request(&mut self, msg: Message, next: Phase) {
        match self.dispatcher.send(&msg, self.now) {
            Ok(()) => {
                self.last_request_at = self.now;
                self.set_phase(next);
            }
            Err(err) => warn!("Failed to send {:?} request: {err}", msg.frame_type),
        }
    }

    fn poll_idle(&mut self) {
        if self.forced_status_request
            || self.elapsed(self.last_status_request_at) > self.config.status_interval()
        {
            self.forced_status_request = false;
            self.last_status_request_at = self.now;
            self.set_phase(Phase::SendingStatusRequest);
        } else if self.config.signal_report()
            && self.elapsed(self.last_signal_request_at) > self.config.signal_interval()
        {
            self.last_signal_request_at = self.now;
            self.set_phase(Phase::SendingUpdateSignalRequest);
        }
    }

    fn poll_control(&mut self) {
        if self.control_called {
            self.control_called = false;
            self.control_started_at = Some(self.now);
        }

        let started = *self.control_started_at.get_or_insert(self.now);

        if self.elapsed(started) > self.config.control_timeout() {
            warn!("Control request not confirmed in time, dropping pending settings");

            if self.phase == Phase::WaitingControlAnswer {
                self.dispatcher.abandon();
            }

            self.pending.reset();
            self.force_send_control = false;
            self.control_started_at = None;
            self.forced_status_request = true;
            self.forced_publish = true;
            self.set_phase(Phase::Idle);

            return;
        }

        if self.phase != Phase::SendingControl || !self.can_send(self.config.control_interval()) {
            return;
        }

        let Some(snapshot) = self.snapshot else {
            warn!("No device status available, dropping pending settings");

            self.pending.reset();
            self.force_send_control = false;
            self.control_started_at = None;
            self.set_phase(Phase::Idle);

            return;
        };
        let control = control::build_control(
            &snapshot,
            &self.pending,
            &self.fan_memory,
            &self.flags,
            self.config.variant(),
        );

        self.sent_pending = self.pending;
        self.send_request(
            Message::control(subcommand::SET_GROUP_PARAMETERS).with_payload(*control.as_bytes()),
            Phase::WaitingControlAnswer,
        );
    }

    fn signal_level_payload(&self) -> [u8; 4] {
        match self.signal_strength {
            Some(rssi) => {
                let percent = ((i16::from(rssi) + 128) * 100 / 128).clamp(0, 100);

                [0x00, 0x00, 0x00, u8::try_from(percent).unwrap_or(100)]
            }
            None => [0x00, 0x01, 0x00, 0x00],
        }
    }

    fn handle_message(&mut self, msg: Message) {
        let frame_type = msg.frame_type;
        let phase = self.phase;

        match self.dispatcher.receive(msg) {
            Ok(dispatch) => {
                if let Err(err) = dispatch.invoke(self) {
                    warn!("Failed to handle {frame_type:?} in phase {phase}: {err}");
                }
            }
            Err(err) => warn!("Dropping {frame_type:?} in phase {phase}: {err}"),
        }
    }

    fn answer_preprocess(
        &self,
        request: FrameType,
        expected_request: FrameType,
        answer: FrameType,
        expected_answer: FrameType,
        expected_phase: Option<Phase>,
    ) -> Result<(), ProtocolError> {
        if answer == FrameType::INVALID {
            return Err(ProtocolError::InvalidAnswer);
        }

        if expected_phase.is_some_and(|phase| phase != self.phase) {
            return Err(ProtocolError::UnexpectedMessage);
        }

        if request != expected_request || answer != expected_answer {
            return Err(ProtocolError::UnsupportedMessage);
        }

        Ok(())
    }

    fn device_version_handler(
        &mut self,
        request: FrameType,
        answer: FrameType,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let res = self
            .answer_preprocess(
                request,
                FrameType::GET_DEVICE_VERSION,
                answer,
                FrameType::GET_DEVICE_VERSION_RESPONSE,
                Some(Phase::WaitingInit1),
            )
            .and_then(|()| DeviceInfo::parse(payload));

        let info = match res {
            Ok(info) => info,
            Err(err) => {
                self.demote();

                return Err(err);
            }
        };

        let use_crc =
            self.config.variant().supports_crc() && info.features.contains(Features::Crc);

        info!(
            "Connected to {} (protocol {}, software {}, hardware {}), features: {}",
            info.device_name,
            info.protocol_version,
            info.software_version,
            info.hardware_version,
            info.features
        );

        self.dispatcher.set_use_crc(use_crc);
        self.device = Some(info);
        self.set_phase(Phase::SendingInit2);

        Ok(())
    }

    fn device_id_handler(
        &mut self,
        request: FrameType,
        answer: FrameType,
        _payload: &[u8],
    ) -> Result<(), ProtocolError> {
        if let Err(err) = self.answer_preprocess(
            request,
            FrameType::GET_DEVICE_ID,
            answer,
            FrameType::GET_DEVICE_ID_RESPONSE,
            Some(Phase::WaitingInit2),
        ) {
            self.demote();

            return Err(err);
        }

        self.set_phase(Phase::SendingFirstStatusRequest);

        Ok(())
    }

    fn status_handler(
        &mut self,
        request: FrameType,
        answer: FrameType,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let res = self
            .answer_preprocess(
                request,
                FrameType::CONTROL,
                answer,
                FrameType::STATUS,
                None,
            )
            .and_then(|()| DeviceStatus::decode(payload, self.config.variant()));

        let (control, status) = match res {
            Ok(res) => res,
            Err(err) => {
                self.demote();

                return Err(err);
            }
        };

        self.apply_status(control, status);

        match self.phase {
            Phase::WaitingFirstStatusAnswer => {
                info!("First status received");
                self.set_phase(Phase::SendingAlarmStatusRequest);
            }
            Phase::WaitingStatusAnswer => self.set_phase(Phase::Idle),
            Phase::WaitingControlAnswer => {
                // Settings merged after the request was built are sent next
                if self.pending == self.sent_pending {
                    self.pending.reset();
                }

                self.force_send_control = false;
                self.control_started_at = None;
                self.set_phase(Phase::Idle);
            }
            _ => {}
        }

        Ok(())
    }

    fn apply_status(&mut self, control: ControlRegion, status: DeviceStatus) {
        if status.error_code != 0 {
            error!(
                "Device error {:#04x}: {}",
                status.error_code,
                error_message(status.error_code).unwrap_or("unknown error")
            );
        }

        let changed = self.status != Some(status);

        if changed {
            info!("Status changed: {status:?}");
        } else {
            debug!("Status: {status:?}");
        }

        self.fan_memory.remember(&control);
        self.updated |= changed || self.forced_publish;
        self.forced_publish = false;
        self.snapshot = Some(control);
        self.status = Some(status);
        self.last_valid_status_at = self.now;
    }

    fn alarm_status_handler(
        &mut self,
        request: FrameType,
        answer: FrameType,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let res = self
            .answer_preprocess(
                request,
                FrameType::GET_ALARM_STATUS,
                answer,
                FrameType::GET_ALARM_STATUS_RESPONSE,
                Some(Phase::WaitingAlarmStatusAnswer),
            )
            .and_then(|()| {
                payload
                    .get(2..10)
                    .and_then(|data| <[u8; 8]>::try_from(data).ok())
                    .map(u64::from_be_bytes)
                    .ok_or(ProtocolError::WrongMessageStructure)
            });

        let alarms = match res {
            Ok(alarms) => alarms,
            Err(err) => {
                self.demote();

                return Err(err);
            }
        };

        if alarms != self.alarms {
            if alarms == 0 {
                info!("Alarms cleared");
            } else {
                warn!("Active alarms: {alarms:#018x}");
            }
        }

        self.alarms = alarms;
        self.set_phase(Phase::Idle);

        Ok(())
    }

    fn management_information_handler(
        &mut self,
        request: FrameType,
        answer: FrameType,
        _payload: &[u8],
    ) -> Result<(), ProtocolError> {
        if let Err(err) = self.answer_preprocess(
            request,
            FrameType::GET_MANAGEMENT_INFORMATION,
            answer,
            FrameType::GET_MANAGEMENT_INFORMATION_RESPONSE,
            Some(Phase::WaitingUpdateSignalAnswer),
        ) {
            self.demote();

            return Err(err);
        }

        self.set_phase(Phase::SendingSignalLevel);

        Ok(())
    }

    fn network_status_handler(
        &mut self,
        request: FrameType,
        answer: FrameType,
        _payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let res = self.answer_preprocess(
            request,
            FrameType::REPORT_NETWORK_STATUS,
            answer,
            FrameType::CONFIRM,
            Some(Phase::WaitingSignalLevelAnswer),
        );

        self.set_phase(Phase::Idle);

        res
    }

    fn answer_timeout_handler(&mut self, request: FrameType) -> Result<(), ProtocolError> {
        debug!("No answer to {request:?}");
        self.demote();

        Err(ProtocolError::Timeout)
    }
}
