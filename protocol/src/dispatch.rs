//! Request/answer bookkeeping.
//!
//! The [`Dispatcher`] keeps at most one request in flight. Answers are routed
//! to the handler registered for the outstanding request type, and requests
//! that stay unanswered for longer than the answer timeout are resolved
//! through a timeout handler.
//!
//! Handlers are not invoked by the dispatcher itself. Instead, a [`Dispatch`]
//! is returned that the owner of the context invokes, so the handler can get
//! mutable access to the owner without aliasing the dispatcher.

use crate::{
    ProtocolError,
    frame::{FrameType, Message, ProtocolVariant},
};
use alloc::{collections::BTreeMap, collections::VecDeque, vec::Vec};
use core::time::Duration;
use log::{debug, trace};

/// Handler for an answer to a request.
///
/// Receives the request type, the answer type and the answer payload.
pub type AnswerHandler<C> = fn(&mut C, FrameType, FrameType, &[u8]) -> Result<(), ProtocolError>;

/// Handler for a request that was not answered in time.
pub type TimeoutHandler<C> = fn(&mut C, FrameType) -> Result<(), ProtocolError>;

/// Outstanding request.
#[derive(Debug)]
pub struct InFlight {
    /// Type of the request.
    pub frame_type: FrameType,
    /// Answer type expected for the request, if known.
    pub expected_answer: Option<FrameType>,
    /// Time at which the request was queued for transmission.
    pub sent_at: Duration,
}

/// Handler call resolved by the [`Dispatcher`].
pub enum Dispatch<C> {
    /// An answer to the outstanding request.
    Answer {
        /// Handler registered for the request type.
        handler: AnswerHandler<C>,
        /// Type of the answered request.
        request: FrameType,
        /// Answer message.
        answer: Message,
    },
    /// The outstanding request timed out.
    Timeout {
        /// Default timeout handler.
        handler: TimeoutHandler<C>,
        /// Type of the timed out request.
        request: FrameType,
    },
}

impl<C> Dispatch<C> {
    /// Invokes the resolved handler on the given context.
    pub fn invoke(self, ctx: &mut C) -> Result<(), ProtocolError> {
        match self {
            Self::Answer {
                handler,
                request,
                answer,
            } => handler(ctx, request, answer.frame_type, &answer.payload),
            Self::Timeout { handler, request } => handler(ctx, request),
        }
    }
}

/// Single in-flight request dispatcher.
pub struct Dispatcher<C> {
    variant: ProtocolVariant,
    use_crc: bool,
    answer_timeout: Duration,
    answer_handlers: BTreeMap<FrameType, AnswerHandler<C>>,
    timeout_handler: TimeoutHandler<C>,
    in_flight: Option<InFlight>,
    outbox: VecDeque<Vec<u8>>,
}

impl<C> Dispatcher<C> {
    /// Constructs a new dispatcher.
    ///
    /// The timeout handler runs for every request left unanswered.
    pub const fn new(
        variant: ProtocolVariant,
        answer_timeout: Duration,
        timeout_handler: TimeoutHandler<C>,
    ) -> Self {
        Self {
            variant,
            use_crc: false,
            answer_timeout,
            answer_handlers: BTreeMap::new(),
            timeout_handler,
            in_flight: None,
            outbox: VecDeque::new(),
        }
    }

    /// Registers the handler for answers to requests of the given type.
    pub fn register(&mut self, request: FrameType, handler: AnswerHandler<C>) {
        self.answer_handlers.insert(request, handler);
    }

    /// Enables or disables the CRC on outgoing frames.
    pub const fn set_use_crc(&mut self, use_crc: bool) {
        self.use_crc = use_crc;
    }

    /// Returns whether outgoing frames carry a CRC.
    #[must_use]
    pub const fn use_crc(&self) -> bool {
        self.use_crc
    }

    /// Returns the outstanding request, if any.
    #[must_use]
    pub const fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    /// Returns whether a new request can be sent.
    #[must_use]
    pub const fn can_send(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Queues a request and marks it as in flight.
    pub fn send(&mut self, message: &Message, now: Duration) -> Result<(), ProtocolError> {
        if self.in_flight.is_some() {
            return Err(ProtocolError::Busy);
        }

        let frame = message.encode(self.variant, self.use_crc)?;

        debug!(
            "Sending {:?} (subcommand {:04x?}): {:02x?}",
            message.frame_type, message.subcommand, message.payload
        );
        trace!("Queued frame: {frame:02x?}");

        self.outbox.push_back(frame);
        self.in_flight = Some(InFlight {
            frame_type: message.frame_type,
            expected_answer: message.frame_type.answer(),
            sent_at: now,
        });

        Ok(())
    }

    /// Resolves a received message against the outstanding request.
    ///
    /// The request is no longer in flight after this call, even if
    /// no handler is registered for it.
    pub fn receive(&mut self, answer: Message) -> Result<Dispatch<C>, ProtocolError> {
        let in_flight = self
            .in_flight
            .take()
            .ok_or(ProtocolError::UnexpectedMessage)?;
        let handler = self
            .answer_handlers
            .get(&in_flight.frame_type)
            .copied()
            .ok_or(ProtocolError::UnsupportedMessage)?;

        if in_flight.expected_answer.is_some_and(|ty| ty != answer.frame_type) {
            debug!(
                "Expected {:?} for {:?}, received {:?}",
                in_flight.expected_answer, in_flight.frame_type, answer.frame_type
            );
        }

        debug!(
            "Received {:?} for {:?}: {:02x?}",
            answer.frame_type, in_flight.frame_type, answer.payload
        );

        Ok(Dispatch::Answer {
            handler,
            request: in_flight.frame_type,
            answer,
        })
    }

    /// Resolves the outstanding request if its answer timeout has expired.
    pub fn poll_timeout(&mut self, now: Duration) -> Option<Dispatch<C>> {
        let expired = self
            .in_flight
            .as_ref()
            .is_some_and(|req| now.saturating_sub(req.sent_at) > self.answer_timeout);

        if !expired {
            return None;
        }

        let in_flight = self.in_flight.take()?;

        Some(Dispatch::Timeout {
            handler: self.timeout_handler,
            request: in_flight.frame_type,
        })
    }

    /// Forgets the outstanding request without invoking any handler.
    pub fn abandon(&mut self) {
        if let Some(req) = self.in_flight.take() {
            debug!("Abandoning {:?} request", req.frame_type);
        }
    }

    /// Takes the next frame to be written to the port.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[derive(Default)]
    struct Recorder {
        answers: Vec<(FrameType, FrameType, Vec<u8>)>,
        timeouts: Vec<FrameType>,
    }

    impl Recorder {
        fn on_answer(
            &mut self,
            request: FrameType,
            answer: FrameType,
            payload: &[u8],
        ) -> Result<(), ProtocolError> {
            self.answers.push((request, answer, payload.to_vec()));

            Ok(())
        }

        fn on_timeout(&mut self, request: FrameType) -> Result<(), ProtocolError> {
            self.timeouts.push(request);

            Err(ProtocolError::Timeout)
        }
    }

    fn dispatcher() -> Dispatcher<Recorder> {
        let mut disp = Dispatcher::new(
            ProtocolVariant::Extended,
            Duration::from_secs(1),
            Recorder::on_timeout,
        );

        disp.register(FrameType::GET_DEVICE_ID, Recorder::on_answer);

        disp
    }

    #[test]
    fn single_request_in_flight() -> Result<(), ProtocolError> {
        let mut disp = dispatcher();
        let req = Message::new(FrameType::GET_DEVICE_ID);

        disp.send(&req, Duration::ZERO)?;

        assert!(!disp.can_send(), "dispatcher should be busy");
        assert_eq!(
            disp.send(&req, Duration::from_millis(100)),
            Err(ProtocolError::Busy),
            "second request should be rejected"
        );
        assert!(disp.poll_transmit().is_some(), "first frame should be queued");
        assert!(disp.poll_transmit().is_none(), "second frame should not be queued");

        Ok(())
    }

    #[test]
    fn answer_routed_to_handler() -> Result<(), ProtocolError> {
        let mut disp = dispatcher();
        let mut rec = Recorder::default();

        disp.send(&Message::new(FrameType::GET_DEVICE_ID), Duration::ZERO)?;
        disp.receive(Message::new(FrameType::GET_DEVICE_ID_RESPONSE).with_payload([0x01]))?
            .invoke(&mut rec)?;

        assert_eq!(
            rec.answers,
            [(
                FrameType::GET_DEVICE_ID,
                FrameType::GET_DEVICE_ID_RESPONSE,
                vec![0x01]
            )],
            "handler should be called once"
        );
        assert!(disp.can_send(), "request should be resolved");

        Ok(())
    }

    #[test]
    fn answer_without_request() {
        let mut disp = dispatcher();

        assert!(
            matches!(
                disp.receive(Message::new(FrameType::STATUS)),
                Err(ProtocolError::UnexpectedMessage)
            ),
            "unsolicited message should be rejected"
        );
    }

    #[test]
    fn answer_without_handler() -> Result<(), ProtocolError> {
        let mut disp = dispatcher();

        disp.send(&Message::new(FrameType::GET_ALARM_STATUS), Duration::ZERO)?;

        assert!(
            matches!(
                disp.receive(Message::new(FrameType::GET_ALARM_STATUS_RESPONSE)),
                Err(ProtocolError::UnsupportedMessage)
            ),
            "unregistered answer should be rejected"
        );
        assert!(disp.can_send(), "request should be resolved");

        Ok(())
    }

    #[test]
    fn default_timeout() -> Result<(), ProtocolError> {
        let mut disp = dispatcher();
        let mut rec = Recorder::default();

        disp.send(&Message::new(FrameType::GET_DEVICE_ID), Duration::from_secs(2))?;

        assert!(
            disp.poll_timeout(Duration::from_millis(3000)).is_none(),
            "timeout should not expire early"
        );

        let res = disp
            .poll_timeout(Duration::from_millis(3001))
            .map(|dispatch| dispatch.invoke(&mut rec));

        assert_eq!(res, Some(Err(ProtocolError::Timeout)), "timeout should fire");
        assert_eq!(rec.timeouts, [FrameType::GET_DEVICE_ID], "default handler should run");
        assert!(disp.can_send(), "request should be resolved");

        Ok(())
    }

    #[test]
    fn abandon() -> Result<(), ProtocolError> {
        let mut disp = dispatcher();

        disp.send(&Message::new(FrameType::GET_DEVICE_ID), Duration::ZERO)?;
        disp.abandon();

        assert!(disp.can_send(), "request should be forgotten");
        assert!(
            disp.poll_timeout(Duration::from_secs(10)).is_none(),
            "abandoned request should not time out"
        );

        Ok(())
    }
}
