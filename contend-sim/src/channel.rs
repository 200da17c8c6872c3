//! Lossy channel model
//!
//! Each attempt handed to a [`LossyChannel`] is given a [`Fate`] up front:
//! acknowledged after one round trip, silently lost, or answered by a close.
//! The driver collects the fate with [`LossyChannel::take_fate`] and
//! schedules the matching event.

use crate::SimError;
use bytes::Bytes;
use contend_protocol::random::RandomSource;
use contend_protocol::transport::{TransmitStatus, Transport, TransportError};
use std::time::Duration;

/// Probability that an attempt gets through
pub const DEFAULT_DELIVERY_PROBABILITY: f64 = 0.9;

/// Largest payload of a single UDP datagram
pub const DEFAULT_MAX_PAYLOAD: usize = 65507;

/// Channel parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    /// Chance an attempt is acknowledged
    pub delivery_probability: f64,
    /// Chance a failed attempt is reported as a close instead of silence
    pub close_probability: f64,
    /// Minimum round-trip time
    pub base_rtt: Duration,
    /// Uniform extra delay added to each round trip, `[0, jitter)`
    pub jitter: Duration,
    pub max_payload: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            delivery_probability: DEFAULT_DELIVERY_PROBABILITY,
            close_probability: 0.0,
            base_rtt: Duration::from_millis(10),
            jitter: Duration::from_millis(2),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ChannelConfig {
    /// Check the probabilities
    pub fn validate(&self) -> Result<(), SimError> {
        check_probability("delivery_probability", self.delivery_probability)?;
        check_probability("close_probability", self.close_probability)
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<(), SimError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimError::InvalidProbability { name, value })
    }
}

/// What happens to one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    /// The ack arrives `after` the send
    Ack { after: Duration },
    /// The peer reports a close `after` the send
    Closed { after: Duration },
    /// Nothing comes back
    Lost,
}

/// Transport that decides each attempt's fate at random
#[derive(Debug)]
pub struct LossyChannel<R> {
    config: ChannelConfig,
    rng: R,
    fate: Option<Fate>,
    attempts: u64,
}

impl<R: RandomSource> LossyChannel<R> {
    /// Create a channel
    pub fn new(config: ChannelConfig, rng: R) -> Result<Self, SimError> {
        config.validate()?;
        Ok(LossyChannel {
            config,
            rng,
            fate: None,
            attempts: 0,
        })
    }

    /// Fate of the last attempt, if not yet taken
    pub fn take_fate(&mut self) -> Option<Fate> {
        self.fate.take()
    }

    /// Attempts accepted so far
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Channel parameters
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn draw_rtt(&mut self) -> Duration {
        if self.config.jitter.is_zero() {
            return self.config.base_rtt;
        }
        self.config.base_rtt + self.config.jitter.mul_f64(self.rng.uniform_float())
    }

    fn draw_fate(&mut self) -> Fate {
        if self.rng.uniform_float() < self.config.delivery_probability {
            return Fate::Ack {
                after: self.draw_rtt(),
            };
        }
        if self.config.close_probability > 0.0
            && self.rng.uniform_float() < self.config.close_probability
        {
            // The close notice only travels one way
            return Fate::Closed {
                after: self.draw_rtt() / 2,
            };
        }
        Fate::Lost
    }
}

impl<R: RandomSource> Transport for LossyChannel<R> {
    fn attempt_send(&mut self, payload: &Bytes) -> Result<TransmitStatus, TransportError> {
        if payload.len() > self.config.max_payload {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload,
            });
        }

        self.attempts += 1;
        let fate = self.draw_fate();
        tracing::trace!("Attempt {} fate {:?}", self.attempts, fate);
        self.fate = Some(fate);

        Ok(TransmitStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contend_protocol::random::SlotRng;

    fn channel(delivery: f64, close: f64) -> LossyChannel<SlotRng> {
        let config = ChannelConfig {
            delivery_probability: delivery,
            close_probability: close,
            ..ChannelConfig::default()
        };
        LossyChannel::new(config, SlotRng::seeded(9)).unwrap()
    }

    #[test]
    fn test_perfect_channel_always_acks() {
        let mut channel = channel(1.0, 0.0);
        let payload = Bytes::from_static(b"data");

        for _ in 0..100 {
            assert_eq!(
                channel.attempt_send(&payload).unwrap(),
                TransmitStatus::Pending
            );
            match channel.take_fate() {
                Some(Fate::Ack { after }) => {
                    assert!(after >= Duration::from_millis(10));
                    assert!(after < Duration::from_millis(12));
                }
                other => panic!("unexpected fate {:?}", other),
            }
        }
        assert_eq!(channel.attempts(), 100);
    }

    #[test]
    fn test_dead_channel_loses_or_closes() {
        let mut lossy = channel(0.0, 0.0);
        let mut closing = channel(0.0, 1.0);
        let payload = Bytes::from_static(b"data");

        lossy.attempt_send(&payload).unwrap();
        assert_eq!(lossy.take_fate(), Some(Fate::Lost));
        assert_eq!(lossy.take_fate(), None);

        closing.attempt_send(&payload).unwrap();
        assert!(matches!(closing.take_fate(), Some(Fate::Closed { .. })));
    }

    #[test]
    fn test_delivery_rate_tracks_probability() {
        let mut channel = channel(DEFAULT_DELIVERY_PROBABILITY, 0.0);
        let payload = Bytes::from_static(b"x");

        let acked = (0..10_000)
            .filter(|_| {
                channel.attempt_send(&payload).unwrap();
                matches!(channel.take_fate(), Some(Fate::Ack { .. }))
            })
            .count();

        assert!((8_800..=9_200).contains(&acked), "acked {}", acked);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut channel = LossyChannel::new(
            ChannelConfig {
                max_payload: 4,
                ..ChannelConfig::default()
            },
            SlotRng::seeded(1),
        )
        .unwrap();

        let err = channel
            .attempt_send(&Bytes::from_static(b"too long"))
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::PayloadTooLarge { size: 8, max: 4 }
        ));
        assert_eq!(channel.attempts(), 0);
    }

    #[test]
    fn test_invalid_probability_rejected() {
        let config = ChannelConfig {
            delivery_probability: 1.5,
            ..ChannelConfig::default()
        };
        assert_eq!(
            LossyChannel::new(config, SlotRng::seeded(1)).unwrap_err(),
            SimError::InvalidProbability {
                name: "delivery_probability",
                value: 1.5
            }
        );

        let config = ChannelConfig {
            close_probability: f64::NAN,
            ..ChannelConfig::default()
        };
        assert!(LossyChannel::new(config, SlotRng::seeded(1)).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_ack_delay_within_jitter(
            base_ms in 0u64..500,
            jitter_ms in 0u64..100,
            seed in proptest::prelude::any::<u64>(),
        ) {
            let config = ChannelConfig {
                delivery_probability: 1.0,
                base_rtt: Duration::from_millis(base_ms),
                jitter: Duration::from_millis(jitter_ms),
                ..ChannelConfig::default()
            };
            let mut channel = LossyChannel::new(config, SlotRng::seeded(seed)).unwrap();
            let payload = Bytes::from_static(b"p");

            for _ in 0..16 {
                channel.attempt_send(&payload).unwrap();
                match channel.take_fate() {
                    Some(Fate::Ack { after }) => {
                        proptest::prop_assert!(after >= config.base_rtt);
                        proptest::prop_assert!(after <= config.base_rtt + config.jitter);
                    }
                    other => proptest::prop_assert!(false, "unexpected fate {:?}", other),
                }
            }
        }
    }
}
