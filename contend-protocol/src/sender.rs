//! Reliable send loop
//!
//! Drives one message at a time through
//! `Idle -> Sending -> AwaitingAck -> {Acked | TimedOut}`, backing off between
//! attempts until the message is acknowledged or the retry ceiling abandons
//! it.
//!
//! The loop performs no I/O and never sleeps. Each event handler returns a
//! [`SendAction`] telling the driver what to do next: hand the payload to the
//! transport, arm an ack deadline, wait out a backoff, or stop. Any driver
//! that can schedule "resume after D" (a discrete-event queue, a blocking
//! socket with a read timeout, an async runtime) can run it unchanged.

use crate::backoff::{BackoffConfig, BackoffController};
use crate::config::ConfigError;
use crate::metrics::MetricsRecorder;
use crate::random::RandomSource;
use crate::rto::{secs_to_duration, RtoConfig, RtoEstimator};
use crate::window::ContentionWindow;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Send loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// No message in flight
    Idle,
    /// Attempt handed to the transport, write not yet complete
    Sending,
    /// Waiting for an ack or the deadline
    AwaitingAck,
    /// Waiting out a backoff before the next attempt
    BackingOff,
    /// Message acknowledged
    Acked,
    /// Message abandoned at the retry ceiling
    Abandoned,
    /// Message cancelled by the caller
    Cancelled,
}

impl SendState {
    /// Check if no message is in flight
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SendState::Idle | SendState::Acked | SendState::Abandoned | SendState::Cancelled
        )
    }
}

/// How one attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Acked,
    TimedOut,
    ConnectionClosed,
}

/// One finished attempt of the current message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    /// When the attempt entered `Sending`
    pub sent_at: Instant,
    /// When the ack arrived, if it did
    pub acked_at: Option<Instant>,
    pub outcome: AttemptOutcome,
}

/// Terminal result of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Acknowledged after `attempts` attempts
    Delivered { attempts: u32, rtt: Duration },
    /// Retry ceiling exceeded; the message is permanently lost
    Abandoned { attempts: u32 },
    /// Cancelled while in flight
    Cancelled { attempts: u32 },
}

impl SendOutcome {
    /// Check if the message was delivered
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }

    /// Attempts made for the message
    pub fn attempts(&self) -> u32 {
        match *self {
            SendOutcome::Delivered { attempts, .. }
            | SendOutcome::Abandoned { attempts }
            | SendOutcome::Cancelled { attempts } => attempts,
        }
    }
}

/// What the driver must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAction {
    /// Hand the payload to the transport, then call `on_transmitted`
    Transmit { attempt: u32, retransmission: bool },
    /// Arm a deadline; call `on_ack`, `on_closed` or `on_timeout`
    AwaitAck { timeout: Duration },
    /// Wait, then call `on_backoff_elapsed`
    Backoff { delay: Duration },
    /// The message is finished
    Complete(SendOutcome),
}

/// Send loop errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SendError {
    #[error("Cannot handle {event} in state {state:?}")]
    InvalidState {
        state: SendState,
        event: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Parameters of one sender
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SenderConfig {
    pub backoff: BackoffConfig,
    pub rto: RtoConfig,
}

impl SenderConfig {
    /// Check all parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backoff.validate()?;
        self.rto.validate()
    }
}

/// Reliable send loop for one sender
///
/// Backoff and RTO state live for the whole session; the retry counter is
/// reset at the start of every message while the RTT history carries over.
#[derive(Debug)]
pub struct ReliableSendLoop<R> {
    backoff: BackoffController,
    rto: RtoEstimator,
    rng: R,
    state: SendState,
    /// Consecutive timed-out attempts, reset on ack
    retransmissions: u32,
    payload_len: usize,
    attempt: u32,
    attempt_sent_at: Option<Instant>,
    history: Vec<AttemptRecord>,
}

impl<R: RandomSource> ReliableSendLoop<R> {
    /// Create a send loop
    pub fn new(config: SenderConfig, rng: R) -> Result<Self, SendError> {
        Ok(ReliableSendLoop {
            backoff: BackoffController::new(config.backoff)?,
            rto: RtoEstimator::new(config.rto)?,
            rng,
            state: SendState::Idle,
            retransmissions: 0,
            payload_len: 0,
            attempt: 0,
            attempt_sent_at: None,
            history: Vec::new(),
        })
    }

    /// Start a new message of `payload_len` bytes
    pub fn begin<M: MetricsRecorder + ?Sized>(
        &mut self,
        payload_len: usize,
        now: Instant,
        metrics: &mut M,
    ) -> Result<SendAction, SendError> {
        if !self.state.is_terminal() {
            return Err(self.invalid("begin"));
        }

        self.backoff.reset();
        self.history.clear();
        self.payload_len = payload_len;
        self.attempt = 1;
        self.attempt_sent_at = Some(now);
        self.state = SendState::Sending;

        metrics.record_sent(payload_len);
        tracing::debug!("Sending message of {} bytes", payload_len);

        Ok(SendAction::Transmit {
            attempt: 1,
            retransmission: false,
        })
    }

    /// The transport accepted the attempt; arm the ack deadline
    pub fn on_transmitted(&mut self) -> Result<SendAction, SendError> {
        if self.state != SendState::Sending {
            return Err(self.invalid("on_transmitted"));
        }

        let rto = self.rto.rto();
        let adjusted = self.rto.adjust(rto, self.retransmissions, &mut self.rng);
        let timeout = secs_to_duration(adjusted);

        self.state = SendState::AwaitingAck;
        tracing::debug!(
            "Attempt {} awaiting ack for {:?} (rto {:.3}s)",
            self.attempt,
            timeout,
            rto
        );

        Ok(SendAction::AwaitAck { timeout })
    }

    /// The peer acknowledged the outstanding attempt
    pub fn on_ack<M: MetricsRecorder + ?Sized>(
        &mut self,
        now: Instant,
        metrics: &mut M,
    ) -> Result<SendAction, SendError> {
        if self.state != SendState::AwaitingAck {
            return Err(self.invalid("on_ack"));
        }

        let sent_at = self.attempt_sent_at.unwrap_or(now);
        let rtt = now.saturating_duration_since(sent_at);
        self.rto.sample_duration(rtt);
        self.retransmissions = 0;

        self.history.push(AttemptRecord {
            attempt: self.attempt,
            sent_at,
            acked_at: Some(now),
            outcome: AttemptOutcome::Acked,
        });
        self.state = SendState::Acked;
        metrics.record_received(self.payload_len, rtt);

        tracing::debug!("Message acked on attempt {} (rtt {:?})", self.attempt, rtt);

        Ok(SendAction::Complete(SendOutcome::Delivered {
            attempts: self.attempt,
            rtt,
        }))
    }

    /// The ack deadline elapsed
    pub fn on_timeout<M: MetricsRecorder + ?Sized>(
        &mut self,
        now: Instant,
        metrics: &mut M,
    ) -> Result<SendAction, SendError> {
        if self.state != SendState::AwaitingAck {
            return Err(self.invalid("on_timeout"));
        }
        Ok(self.fail_attempt(AttemptOutcome::TimedOut, now, metrics))
    }

    /// The peer closed the connection while an attempt was outstanding
    ///
    /// Handled exactly like a timeout.
    pub fn on_closed<M: MetricsRecorder + ?Sized>(
        &mut self,
        now: Instant,
        metrics: &mut M,
    ) -> Result<SendAction, SendError> {
        if !matches!(self.state, SendState::Sending | SendState::AwaitingAck) {
            return Err(self.invalid("on_closed"));
        }
        Ok(self.fail_attempt(AttemptOutcome::ConnectionClosed, now, metrics))
    }

    fn fail_attempt<M: MetricsRecorder + ?Sized>(
        &mut self,
        outcome: AttemptOutcome,
        now: Instant,
        metrics: &mut M,
    ) -> SendAction {
        self.retransmissions = self.retransmissions.saturating_add(1);
        self.backoff.increment_retry();

        self.history.push(AttemptRecord {
            attempt: self.attempt,
            sent_at: self.attempt_sent_at.unwrap_or(now),
            acked_at: None,
            outcome,
        });

        if self.backoff.max_retries_reached() {
            self.state = SendState::Abandoned;
            metrics.record_lost();
            tracing::warn!(
                "Message abandoned after {} attempts ({} retries)",
                self.attempt,
                self.backoff.retry_count()
            );
            return SendAction::Complete(SendOutcome::Abandoned {
                attempts: self.attempt,
            });
        }

        let delay = self.backoff.next_backoff_delay(&mut self.rng);
        self.state = SendState::BackingOff;
        tracing::debug!(
            "Attempt {} {:?}, backing off {:?}",
            self.attempt,
            outcome,
            delay
        );

        SendAction::Backoff { delay }
    }

    /// The backoff delay elapsed; start the next attempt
    pub fn on_backoff_elapsed<M: MetricsRecorder + ?Sized>(
        &mut self,
        now: Instant,
        metrics: &mut M,
    ) -> Result<SendAction, SendError> {
        if self.state != SendState::BackingOff {
            return Err(self.invalid("on_backoff_elapsed"));
        }

        self.attempt += 1;
        self.attempt_sent_at = Some(now);
        self.state = SendState::Sending;
        metrics.record_retransmission(self.payload_len);

        Ok(SendAction::Transmit {
            attempt: self.attempt,
            retransmission: true,
        })
    }

    /// Cancel the message in flight
    ///
    /// Records nothing in the metrics: the message was counted as sent by
    /// `begin` and is neither received nor lost. The driver must drop any
    /// pending deadline or backoff timer.
    pub fn cancel(&mut self) -> Result<SendOutcome, SendError> {
        if self.state.is_terminal() {
            return Err(self.invalid("cancel"));
        }

        self.state = SendState::Cancelled;
        tracing::debug!("Message cancelled on attempt {}", self.attempt);

        Ok(SendOutcome::Cancelled {
            attempts: self.attempt,
        })
    }

    /// Swap the contention window, e.g. after a regime change
    pub fn set_window(&mut self, window: ContentionWindow) {
        self.backoff.set_window(window);
    }

    fn invalid(&self, event: &'static str) -> SendError {
        SendError::InvalidState {
            state: self.state,
            event,
        }
    }

    /// Current state
    pub fn state(&self) -> SendState {
        self.state
    }

    /// Consecutive timed-out attempts since the last ack
    pub fn retransmissions(&self) -> u32 {
        self.retransmissions
    }

    /// Attempts made for the current message
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Finished attempts of the current message
    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    /// Backoff controller
    pub fn backoff(&self) -> &BackoffController {
        &self.backoff
    }

    /// RTO estimator
    pub fn rto_estimator(&self) -> &RtoEstimator {
        &self.rto
    }

    /// Random source
    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }
}
