//! Delivery metrics
//!
//! Counters are the only mutable state. Every rate in [`MetricsState`] is
//! derived from them on demand, so a snapshot can never disagree with the
//! counters it was computed from.

use crate::config::ConfigError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default energy cost per sent message (joules)
pub const DEFAULT_ENERGY_PER_PACKET_J: f64 = 0.001;

/// Sink for delivery events
///
/// Implemented by the plain aggregator and by the mutex-guarded
/// [`SharedMetrics`] handle.
pub trait MetricsRecorder {
    /// A new message left the sender (first transmission)
    fn record_sent(&mut self, bytes: usize);

    /// A message was transmitted again
    fn record_retransmission(&mut self, bytes: usize);

    /// A message was acknowledged
    fn record_received(&mut self, bytes: usize, rtt: Duration);

    /// A message was abandoned
    fn record_lost(&mut self);
}

/// Derived metrics at one point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsState {
    /// Messages sent
    pub sent: u64,
    /// Messages acknowledged
    pub received: u64,
    /// Messages abandoned
    pub lost: u64,
    /// Retransmitted attempts
    pub retransmissions: u64,
    /// Bytes put on the wire, retransmissions included
    pub sent_bytes: u64,
    /// Bytes acknowledged
    pub received_bytes: u64,
    /// Window the rates were computed over
    pub elapsed: Duration,
    /// Goodput in megabits per second
    pub throughput_mbps: f64,
    /// `lost / sent`
    pub packet_loss_ratio: f64,
    /// `received_bytes / sent_bytes * 100`
    pub overhead_efficiency_pct: f64,
    /// `lost / (sent + lost)`
    pub collision_ratio: f64,
    /// Linear energy proxy, `k * sent`
    pub energy_consumed_j: f64,
    /// Mean RTT of acknowledged messages
    pub mean_rtt: Option<Duration>,
}

impl MetricsState {
    /// Multi-line summary in the style of a simulation run report
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Total Packets Sent: {}\n", self.sent));
        out.push_str(&format!("Total Packets Received: {}\n", self.received));
        out.push_str(&format!("Total Packets Lost: {}\n", self.lost));
        out.push_str(&format!("Retransmissions: {}\n", self.retransmissions));
        out.push_str(&format!(
            "Packet Loss Ratio: {:.2} %\n",
            self.packet_loss_ratio * 100.0
        ));
        out.push_str(&format!("Throughput: {:.6} Mbps\n", self.throughput_mbps));
        out.push_str(&format!(
            "Total Energy Consumed: {:.4} J\n",
            self.energy_consumed_j
        ));
        out.push_str(&format!(
            "Overhead Efficiency: {:.2} %\n",
            self.overhead_efficiency_pct
        ));
        out.push_str(&format!("Collision Ratio: {:.4}\n", self.collision_ratio));
        if let Some(rtt) = self.mean_rtt {
            out.push_str(&format!("Mean RTT: {:?}\n", rtt));
        }
        out
    }
}

impl fmt::Display for MetricsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent={} received={} lost={} plr={:.4} tput={:.4}Mbps eff={:.2}% coll={:.4}",
            self.sent,
            self.received,
            self.lost,
            self.packet_loss_ratio,
            self.throughput_mbps,
            self.overhead_efficiency_pct,
            self.collision_ratio
        )
    }
}

/// Running delivery counters
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsAggregator {
    sent: u64,
    received: u64,
    lost: u64,
    retransmissions: u64,
    sent_bytes: u64,
    received_bytes: u64,
    rtt_total: Duration,
    energy_per_packet_j: f64,
}

impl MetricsAggregator {
    /// Create an aggregator with the default energy cost
    pub fn new() -> Self {
        MetricsAggregator {
            sent: 0,
            received: 0,
            lost: 0,
            retransmissions: 0,
            sent_bytes: 0,
            received_bytes: 0,
            rtt_total: Duration::ZERO,
            energy_per_packet_j: DEFAULT_ENERGY_PER_PACKET_J,
        }
    }

    /// Create an aggregator with a custom per-message energy cost
    pub fn with_energy_cost(energy_per_packet_j: f64) -> Result<Self, ConfigError> {
        if !energy_per_packet_j.is_finite() || energy_per_packet_j < 0.0 {
            return Err(ConfigError::InvalidEnergyCost(energy_per_packet_j));
        }
        Ok(MetricsAggregator {
            energy_per_packet_j,
            ..Self::new()
        })
    }

    /// Compute derived metrics over `elapsed`
    pub fn snapshot(&self, elapsed: Duration) -> MetricsState {
        let elapsed_secs = elapsed.as_secs_f64();

        let throughput_mbps = if elapsed_secs > 0.0 {
            (self.received_bytes as f64 * 8.0) / (elapsed_secs * 1e6)
        } else {
            0.0
        };

        let packet_loss_ratio = ratio(self.lost, self.sent);
        let overhead_efficiency_pct = ratio(self.received_bytes, self.sent_bytes) * 100.0;
        let collision_ratio = ratio(self.lost, self.sent + self.lost);

        let mean_rtt = (self.received > 0).then(|| {
            let nanos = self.rtt_total.as_nanos() / self.received as u128;
            Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
        });

        MetricsState {
            sent: self.sent,
            received: self.received,
            lost: self.lost,
            retransmissions: self.retransmissions,
            sent_bytes: self.sent_bytes,
            received_bytes: self.received_bytes,
            elapsed,
            throughput_mbps,
            packet_loss_ratio,
            overhead_efficiency_pct,
            collision_ratio,
            energy_consumed_j: self.energy_per_packet_j * self.sent as f64,
            mean_rtt,
        }
    }

    /// Fold another aggregator's counters into this one
    pub fn merge(&mut self, other: &MetricsAggregator) {
        self.sent += other.sent;
        self.received += other.received;
        self.lost += other.lost;
        self.retransmissions += other.retransmissions;
        self.sent_bytes += other.sent_bytes;
        self.received_bytes += other.received_bytes;
        self.rtt_total += other.rtt_total;
    }

    /// Messages sent
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Messages acknowledged
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Messages abandoned
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Retransmitted attempts
    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    /// Clear all counters, keeping the energy cost
    pub fn reset(&mut self) {
        *self = MetricsAggregator {
            energy_per_packet_j: self.energy_per_packet_j,
            ..Self::new()
        };
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder for MetricsAggregator {
    fn record_sent(&mut self, bytes: usize) {
        self.sent += 1;
        self.sent_bytes += bytes as u64;
    }

    fn record_retransmission(&mut self, bytes: usize) {
        self.retransmissions += 1;
        self.sent_bytes += bytes as u64;
    }

    fn record_received(&mut self, bytes: usize, rtt: Duration) {
        self.received += 1;
        self.received_bytes += bytes as u64;
        self.rtt_total = self.rtt_total.saturating_add(rtt);
    }

    fn record_lost(&mut self) {
        self.lost += 1;
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Aggregator shared between senders
///
/// Cloning yields another handle to the same counters; increments are
/// serialized by a mutex.
#[derive(Debug, Clone, Default)]
pub struct SharedMetrics {
    inner: Arc<Mutex<MetricsAggregator>>,
}

impl SharedMetrics {
    /// Wrap an aggregator
    pub fn new(aggregator: MetricsAggregator) -> Self {
        SharedMetrics {
            inner: Arc::new(Mutex::new(aggregator)),
        }
    }

    /// Compute derived metrics over `elapsed`
    pub fn snapshot(&self, elapsed: Duration) -> MetricsState {
        self.inner.lock().snapshot(elapsed)
    }

    /// Copy out the current counters
    pub fn aggregator(&self) -> MetricsAggregator {
        self.inner.lock().clone()
    }
}

impl MetricsRecorder for SharedMetrics {
    fn record_sent(&mut self, bytes: usize) {
        self.inner.lock().record_sent(bytes);
    }

    fn record_retransmission(&mut self, bytes: usize) {
        self.inner.lock().record_retransmission(bytes);
    }

    fn record_received(&mut self, bytes: usize, rtt: Duration) {
        self.inner.lock().record_received(bytes, rtt);
    }

    fn record_lost(&mut self) {
        self.inner.lock().record_lost();
    }
}
