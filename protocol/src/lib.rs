//! Control Haier split air conditioners via the serial bus of their indoor unit.
//!
//! # Overview
//!
//! The `haier-ac` crate implements the serial protocol spoken by Haier
//! indoor units and their Wi-Fi modules. It consists of several layers:
//!
//! - The [`frame`] codec encodes and validates single frames.
//! - The [`receiver`] reassembles frames from an arbitrarily chunked byte stream.
//! - The [`dispatch`] module matches answers to the request in flight.
//! - The [`session`] state machine performs the handshake, polls the device
//!   status and sends merged [`control`] requests.
//!
//! The [`Session`] is free of I/O and timers, so it can be driven from any
//! environment. The [`Interface`] connects it to an asynchronous port.
//!
//! # Getting started
//!
//! The indoor unit exposes a UART on its Wi-Fi module connector,
//! configured as follows:
//!
//! - **Baud rate:** 9600
//! - **Parity:** None
//! - **Data bits:** 8
//! - **Stop bits:** 1
//!
//! If you enable the `native-serial` feature, you can obtain a compatible
//! serial port instance using [`serial::open`]:
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> haier_ac::Result<(), haier_ac::serial::PortError> {
//! let mut port = haier_ac::serial::open("/dev/ttyUSB0")?;
//! # Ok(())
//! # }
//! ```
//!
//! <div class="warning">
//! The connector carries 5 V. Most USB–UART adapters
//! need a level shifter to be connected safely.
//! </div>
//!
//! # Examples
//!
//! The [`Interface`] has to be driven by the application. Received bytes are
//! handled by [`Interface::receive`], while [`Interface::process`] advances the
//! session and writes pending requests:
//!
//! ```no_run
//! use haier_ac::{Config, Interface, climate::Mode, control::ControlRequest};
//! use tokio::time::{Duration, Instant, sleep};
//!
//! # #[tokio::main]
//! # async fn main() -> haier_ac::Result<(), haier_ac::serial::PortError> {
//! # let port = haier_ac::serial::open("/dev/ttyUSB0")?;
//! let start = Instant::now();
//! let mut intf = Interface::new(port, Config::default(), start.elapsed());
//!
//! loop {
//!     tokio::select! {
//!         res = intf.receive(start.elapsed()) => res?,
//!         () = sleep(Duration::from_millis(50)) => {}
//!     }
//!
//!     intf.process(start.elapsed()).await?;
//!
//!     if intf.session_mut().take_update() {
//!         println!("Status: {:?}", intf.session().status());
//!         intf.session_mut().control(&ControlRequest::default().with_mode(Mode::Cool));
//!     }
//! }
//! # }
//! ```
//!
//! # Protocol details
//!
//! Every exchange is initiated by the Wi-Fi module, with at most one request
//! in flight. The device answers each request with a frame of the expected
//! answer type or with an invalid-command frame. Newer units optionally
//! protect frames with a CRC16, which is negotiated during the handshake.

#![no_std]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod climate;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod frame;
pub mod receiver;
pub mod session;
pub mod status;

#[cfg(feature = "native-serial")]
#[cfg_attr(docsrs, doc(cfg(feature = "native-serial")))]
pub mod serial;

pub use config::Config;
pub use embedded_io_async;
pub use session::{Phase, Session};

use core::{
    fmt::{Debug, Display, Formatter},
    time::Duration,
};
use embedded_io_async::{Read, Write};
use frame::FrameError;
use log::trace;

/// Size of the buffer used for a single port read.
const READ_BUF_LEN: usize = 64;

/// Error raised while exchanging messages with the device.
///
/// Protocol errors never end a [`Session`], they are logged and
/// the session recovers on its own.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ProtocolError {
    /// No handler exists for the message, or the answer type is not the expected one.
    UnsupportedMessage,
    /// The message arrived while no answer was expected.
    UnexpectedMessage,
    /// The device rejected the request.
    InvalidAnswer,
    /// The answer payload is too short or malformed.
    WrongMessageStructure,
    /// Another request is still waiting for its answer.
    Busy,
    /// The device did not answer in time.
    Timeout,
    /// The frame could not be encoded or decoded.
    Frame(FrameError),
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::UnsupportedMessage => write!(f, "unsupported message"),
            Self::UnexpectedMessage => write!(f, "unexpected message"),
            Self::InvalidAnswer => write!(f, "invalid answer"),
            Self::WrongMessageStructure => write!(f, "wrong message structure"),
            Self::Busy => write!(f, "request already in flight"),
            Self::Timeout => write!(f, "answer timeout"),
            Self::Frame(err) => write!(f, "frame error: {err}"),
        }
    }
}

impl core::error::Error for ProtocolError {}

impl From<FrameError> for ProtocolError {
    fn from(err: FrameError) -> Self {
        Self::Frame(err)
    }
}

/// A specialized [`Result`] type for [`Interface`] operations.
///
/// Uses [`Error<E>`] as the error variant, which can include port-specific errors.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Error type for [`Interface`] operations.
///
/// The generic parameter `E` allows the error type to carry a port-specific error.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum Error<E> {
    /// The port encountered an unexpected end-of-file.
    UnexpectedEof,
    /// A port-specific input/output error.
    Io(E),
}

impl<E: core::error::Error> Display for Error<E> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end-of-file"),
            Self::Io(err) => write!(f, "input/output error: {err}"),
        }
    }
}

impl<E: core::error::Error> core::error::Error for Error<E> {}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Self::Io(err)
    }
}

/// Connects a [`Session`] to an asynchronous port.
///
/// Timestamps passed to the methods must be monotonic,
/// measured from an arbitrary starting point.
pub struct Interface<P> {
    port: P,
    session: Session,
}

impl<P: Read + Write> Interface<P> {
    /// Constructs a new interface with a fresh session.
    pub fn new(port: P, config: Config, now: Duration) -> Self {
        Self {
            port,
            session: Session::new(config, now),
        }
    }

    /// Returns the session.
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the session mutably, e.g. to request control changes.
    pub const fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Returns the underlying port.
    pub const fn port(&self) -> &P {
        &self.port
    }

    /// Returns the underlying port mutably.
    pub const fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Waits for bytes from the port and hands them to the session.
    ///
    /// Cancel-safe as long as the port's `read` is, so it can be raced
    /// against a timer.
    pub async fn receive(&mut self, now: Duration) -> Result<(), P::Error> {
        let mut buf = [0x00; READ_BUF_LEN];
        let len = self.port.read(&mut buf).await?;

        if len == 0 {
            return Err(Error::UnexpectedEof);
        }

        trace!("Read from port: {:02x?}", &buf[..len]);

        self.session.handle_bytes(&buf[..len], now);

        Ok(())
    }

    /// Advances the session and writes all frames it queued.
    pub async fn process(&mut self, now: Duration) -> Result<(), P::Error> {
        self.session.poll(now);

        while let Some(frame) = self.session.poll_transmit() {
            trace!("Write to port: {frame:02x?}");

            self.port.write_all(&frame).await?;
        }

        self.port.flush().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::{FrameType, ProtocolVariant},
        status::DEVICE_VERSION_LEN,
    };
    use alloc::collections::vec_deque::VecDeque;
    use core::convert::Infallible;
    use log::LevelFilter;

    pub fn init_logger() {
        let _ = env_logger::builder()
            .filter_level(LevelFilter::max())
            .is_test(true)
            .try_init();
    }

    #[tokio::test]
    async fn handshake_request() -> Result<(), Infallible> {
        init_logger();

        let mut deque = VecDeque::new();
        let mut intf = Interface::new(&mut deque, Config::default(), Duration::ZERO);

        intf.process(Duration::from_secs(1)).await?;

        assert!(intf.port().is_empty(), "nothing should be written before the boot delay");

        intf.process(Duration::from_secs(3)).await?;

        assert_eq!(
            **intf.port(),
            [
                0xff, 0xff, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x61, 0x00, 0x07, 0x72
            ],
            "deque contents should be correct"
        );
        assert_eq!(
            intf.session().phase(),
            Phase::WaitingInit1,
            "version answer should be awaited"
        );

        Ok(())
    }

    #[tokio::test]
    async fn version_answer() -> Result<(), Infallible> {
        init_logger();

        let mut payload = [0x00; DEVICE_VERSION_LEN];

        payload[0..8].copy_from_slice(b"E_V2.0.0");
        payload[28..33].copy_from_slice(b"HAIER");

        let answer = frame::encode(
            ProtocolVariant::Extended,
            FrameType::GET_DEVICE_VERSION_RESPONSE,
            None,
            &payload,
            false,
        )
        .expect("answer should fit into a frame");

        let mut deque = VecDeque::new();
        let mut intf = Interface::new(&mut deque, Config::default(), Duration::ZERO);

        intf.process(Duration::from_secs(3)).await?;
        intf.port_mut().clear();
        intf.port_mut().extend(answer);
        intf.receive(Duration::from_millis(3100)).await?;
        intf.process(Duration::from_millis(3100)).await?;

        assert!(intf.port().is_empty(), "request interval should be respected");
        assert_eq!(
            intf.session().phase(),
            Phase::SendingInit2,
            "identifier should be requested next"
        );

        intf.process(Duration::from_millis(5200)).await?;

        assert_eq!(
            **intf.port(),
            [0xff, 0xff, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x70, 0x78],
            "deque contents should be correct"
        );

        Ok(())
    }

    #[tokio::test]
    async fn receive_eof() {
        init_logger();

        let mut deque = VecDeque::new();
        let mut intf = Interface::new(&mut deque, Config::default(), Duration::ZERO);

        assert_eq!(
            intf.receive(Duration::ZERO).await,
            Err(Error::<Infallible>::UnexpectedEof),
            "empty port should report end-of-file"
        );
    }
}
