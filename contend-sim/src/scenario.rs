//! Fleet scenario
//!
//! N independent senders, each with its own backoff, RTO estimator, random
//! stream and channel, share one [`EventQueue`] and one metrics aggregator.
//! The contention window for every sender comes from the scenario's
//! `(density, speed)` regime.

use crate::channel::{ChannelConfig, Fate, LossyChannel};
use crate::SimError;
use bytes::Bytes;
use contend_io::time::{EventQueue, Scheduler, TimerHandle, Timestamp};
use contend_protocol::metrics::{
    MetricsAggregator, MetricsState, SharedMetrics, DEFAULT_ENERGY_PER_PACKET_J,
};
use contend_protocol::random::SlotRng;
use contend_protocol::sender::{ReliableSendLoop, SendAction, SendOutcome, SenderConfig};
use contend_protocol::transport::{TransmitStatus, Transport};
use contend_protocol::window::{select_window, ContentionWindow};
use std::time::{Duration, Instant};

/// Scenario parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioConfig {
    /// Number of senders in the fleet
    pub senders: usize,
    /// Messages each sender delivers, one at a time
    pub messages_per_sender: u32,
    pub payload_size: usize,
    /// Pause between a sender's messages
    pub message_interval: Duration,
    /// Node density of the topology
    pub density: f64,
    /// Mean node speed
    pub speed: f64,
    pub seed: u64,
    /// Per-sender parameters; the window is replaced by the regime's
    pub sender: SenderConfig,
    pub channel: ChannelConfig,
    pub energy_per_packet_j: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            senders: 5,
            messages_per_sender: 1000,
            payload_size: 1024,
            message_interval: Duration::from_millis(100),
            density: 50.0,
            speed: 10.0,
            seed: 0,
            sender: SenderConfig::default(),
            channel: ChannelConfig::default(),
            energy_per_packet_j: DEFAULT_ENERGY_PER_PACKET_J,
        }
    }
}

impl ScenarioConfig {
    /// Check every parameter
    pub fn validate(&self) -> Result<(), SimError> {
        if self.senders == 0 {
            return Err(SimError::NoSenders);
        }
        self.sender.validate()?;
        self.channel.validate()?;
        MetricsAggregator::with_energy_cost(self.energy_per_packet_j)?;
        select_window(self.density, self.speed)?;
        Ok(())
    }
}

/// Kind of simulation event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEventKind {
    /// Start the sender's next message
    Start,
    Ack,
    Closed,
    /// Ack deadline of the outstanding attempt
    Deadline,
    BackoffElapsed,
}

/// Event addressed to one sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimEvent {
    pub sender: usize,
    pub kind: SimEventKind,
}

/// Outcome counts of one sender
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SenderReport {
    pub delivered: u64,
    pub abandoned: u64,
    /// Messages cancelled in flight when the run was cut short
    pub cancelled: u64,
    /// Attempts across all messages
    pub attempts: u64,
    /// RTO estimate at the end of the run (seconds)
    pub final_rto: f64,
}

/// Result of a simulation run
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    /// Fleet-wide metrics over the simulated duration
    pub metrics: MetricsState,
    /// Messages abandoned across the fleet
    pub abandoned: u64,
    /// Messages cancelled in flight across the fleet
    pub cancelled: u64,
    pub per_sender: Vec<SenderReport>,
    /// Window every sender used
    pub window: ContentionWindow,
    /// Simulated time from start to the last event
    pub elapsed: Duration,
}

struct SimSender {
    send_loop: ReliableSendLoop<SlotRng>,
    channel: LossyChannel<SlotRng>,
    metrics: SharedMetrics,
    remaining: u32,
    timers: Vec<TimerHandle>,
    report: SenderReport,
}

impl SimSender {
    fn track(&mut self, handle: TimerHandle) {
        self.timers.push(handle);
    }

    fn cancel_timers(&mut self, queue: &mut EventQueue<SimEvent>) {
        for handle in self.timers.drain(..) {
            queue.cancel(handle);
        }
    }
}

/// Discrete-event run of a sender fleet
pub struct FleetSimulation {
    config: ScenarioConfig,
    window: ContentionWindow,
    payload: Bytes,
    queue: EventQueue<SimEvent>,
    senders: Vec<SimSender>,
    metrics: SharedMetrics,
}

impl FleetSimulation {
    /// Build the fleet and schedule every sender's first message
    pub fn new(config: ScenarioConfig) -> Result<Self, SimError> {
        config.validate()?;

        let window = select_window(config.density, config.speed)?;
        let metrics = SharedMetrics::new(MetricsAggregator::with_energy_cost(
            config.energy_per_packet_j,
        )?);

        let mut root = SlotRng::seeded(config.seed);
        let mut queue = EventQueue::with_origin(Timestamp::now());
        let mut senders = Vec::with_capacity(config.senders);

        let mut sender_config = config.sender;
        sender_config.backoff.window = window;

        for id in 0..config.senders {
            senders.push(SimSender {
                send_loop: ReliableSendLoop::new(sender_config, root.fork())?,
                channel: LossyChannel::new(config.channel, root.fork())?,
                metrics: metrics.clone(),
                remaining: config.messages_per_sender,
                timers: Vec::new(),
                report: SenderReport::default(),
            });

            if config.messages_per_sender > 0 {
                queue.schedule_after(
                    Duration::ZERO,
                    SimEvent {
                        sender: id,
                        kind: SimEventKind::Start,
                    },
                );
            }
        }

        Ok(FleetSimulation {
            config,
            window,
            payload: Bytes::from(vec![0u8; config.payload_size]),
            queue,
            senders,
            metrics,
        })
    }

    /// Run until every sender has finished its messages
    pub fn run(mut self) -> Result<SimulationReport, SimError> {
        self.log_start();
        while let Some((at, event)) = self.queue.pop_next() {
            self.handle(at.as_instant(), event)?;
        }
        Ok(self.report())
    }

    /// Run for at most `limit` of simulated time, then cancel whatever is
    /// still in flight
    pub fn run_for(mut self, limit: Duration) -> Result<SimulationReport, SimError> {
        self.log_start();
        self.advance_until(limit)?;
        let cancelled = self.shutdown();
        if cancelled > 0 {
            tracing::info!("Stopped at {:?} with {} messages in flight", limit, cancelled);
        }
        Ok(self.report())
    }

    /// Process every event due at or before `limit` after the start
    pub fn advance_until(&mut self, limit: Duration) -> Result<(), SimError> {
        while self.queue.next_due().is_some_and(|due| due <= limit) {
            let Some((at, event)) = self.queue.pop_next() else {
                break;
            };
            self.handle(at.as_instant(), event)?;
        }
        Ok(())
    }

    /// Cancel every in-flight message and release all pending timers
    ///
    /// Returns the number of messages cancelled. Cancelled messages stay
    /// counted as sent and are never counted as lost; the senders' unstarted
    /// messages are dropped.
    pub fn shutdown(&mut self) -> u64 {
        let mut cancelled = 0;
        for (id, sender) in self.senders.iter_mut().enumerate() {
            sender.cancel_timers(&mut self.queue);
            sender.remaining = 0;

            if sender.send_loop.state().is_terminal() {
                continue;
            }
            match sender.send_loop.cancel() {
                Ok(outcome) => {
                    tracing::debug!("Sender {} {:?}", id, outcome);
                    sender.report.cancelled += 1;
                    cancelled += 1;
                }
                Err(e) => tracing::warn!("Sender {} could not cancel: {}", id, e),
            }
        }
        cancelled
    }

    /// Live events still scheduled
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Metrics and per-sender counts as of the last processed event
    pub fn report(&self) -> SimulationReport {
        let elapsed = self.queue.elapsed();
        let metrics = self.metrics.snapshot(elapsed);
        let per_sender: Vec<SenderReport> = self
            .senders
            .iter()
            .map(|s| SenderReport {
                final_rto: s.send_loop.rto_estimator().rto(),
                ..s.report
            })
            .collect();
        let abandoned = per_sender.iter().map(|r| r.abandoned).sum();
        let cancelled = per_sender.iter().map(|r| r.cancelled).sum();

        tracing::info!("Simulation finished after {:?}: {}", elapsed, metrics);

        SimulationReport {
            metrics,
            abandoned,
            cancelled,
            per_sender,
            window: self.window,
            elapsed,
        }
    }

    fn log_start(&self) {
        tracing::info!(
            "Simulating {} senders x {} messages, window {}",
            self.config.senders,
            self.config.messages_per_sender,
            self.window
        );
    }

    fn handle(&mut self, now: Instant, event: SimEvent) -> Result<(), SimError> {
        let sender = &mut self.senders[event.sender];
        // Whatever fired, the sender's other timers are now stale
        sender.cancel_timers(&mut self.queue);

        let action = match event.kind {
            SimEventKind::Start => {
                sender.remaining = sender.remaining.saturating_sub(1);
                sender
                    .send_loop
                    .begin(self.payload.len(), now, &mut sender.metrics)?
            }
            SimEventKind::Ack => sender.send_loop.on_ack(now, &mut sender.metrics)?,
            SimEventKind::Closed => sender.send_loop.on_closed(now, &mut sender.metrics)?,
            SimEventKind::Deadline => sender.send_loop.on_timeout(now, &mut sender.metrics)?,
            SimEventKind::BackoffElapsed => sender
                .send_loop
                .on_backoff_elapsed(now, &mut sender.metrics)?,
        };

        self.drive(event.sender, now, action)
    }

    /// Apply actions until the sender has to wait for an event
    fn drive(&mut self, id: usize, now: Instant, mut action: SendAction) -> Result<(), SimError> {
        let sender = &mut self.senders[id];
        let queue = &mut self.queue;
        let at = |kind| SimEvent { sender: id, kind };

        loop {
            action = match action {
                SendAction::Transmit { .. } => {
                    sender.report.attempts += 1;
                    match sender.channel.attempt_send(&self.payload) {
                        Ok(TransmitStatus::Pending) => sender.send_loop.on_transmitted()?,
                        Ok(TransmitStatus::Delivered) => {
                            sender.send_loop.on_transmitted()?;
                            sender.send_loop.on_ack(now, &mut sender.metrics)?
                        }
                        Err(e) => {
                            tracing::debug!("Sender {} transmit failed: {}", id, e);
                            sender.send_loop.on_closed(now, &mut sender.metrics)?
                        }
                    }
                }
                SendAction::AwaitAck { timeout } => {
                    // Scheduled before the deadline so an ack landing exactly
                    // on it still counts
                    match sender.channel.take_fate() {
                        Some(Fate::Ack { after }) => {
                            let handle = queue.schedule_after(after, at(SimEventKind::Ack));
                            sender.track(handle);
                        }
                        Some(Fate::Closed { after }) => {
                            let handle = queue.schedule_after(after, at(SimEventKind::Closed));
                            sender.track(handle);
                        }
                        Some(Fate::Lost) | None => {}
                    }
                    let deadline = queue.schedule_after(timeout, at(SimEventKind::Deadline));
                    sender.track(deadline);
                    return Ok(());
                }
                SendAction::Backoff { delay } => {
                    let handle = queue.schedule_after(delay, at(SimEventKind::BackoffElapsed));
                    sender.track(handle);
                    return Ok(());
                }
                SendAction::Complete(outcome) => {
                    match outcome {
                        SendOutcome::Delivered { .. } => sender.report.delivered += 1,
                        SendOutcome::Abandoned { .. } => sender.report.abandoned += 1,
                        SendOutcome::Cancelled { .. } => {}
                    }
                    if sender.remaining > 0 {
                        let interval = self.config.message_interval;
                        let handle = queue.schedule_after(interval, at(SimEventKind::Start));
                        sender.track(handle);
                    }
                    return Ok(());
                }
            };
        }
    }

    /// Contention window the fleet runs with
    pub fn window(&self) -> ContentionWindow {
        self.window
    }

    /// Scenario parameters
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }
}
