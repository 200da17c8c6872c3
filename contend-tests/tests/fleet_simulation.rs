//! Fleet simulation tests
//!
//! Whole-fleet runs through the facade crate.

use contend::protocol::BackoffMode;
use contend::sim::ChannelConfig;
use contend::{ContentionWindow, FleetSimulation, ScenarioConfig};
use std::time::Duration;

fn scenario(seed: u64) -> ScenarioConfig {
    ScenarioConfig {
        senders: 8,
        messages_per_sender: 100,
        seed,
        ..ScenarioConfig::default()
    }
}

#[test]
fn test_reproducible_from_seed() {
    let first = FleetSimulation::new(scenario(1234)).unwrap().run().unwrap();
    let second = FleetSimulation::new(scenario(1234)).unwrap().run().unwrap();

    assert_eq!(first.per_sender, second.per_sender);
    assert_eq!(first.elapsed, second.elapsed);
    assert_eq!(first.abandoned, second.abandoned);
    assert_eq!(first.metrics.sent_bytes, second.metrics.sent_bytes);
    assert_eq!(
        first.metrics.throughput_mbps.to_bits(),
        second.metrics.throughput_mbps.to_bits()
    );
}

#[test]
fn test_seeds_change_the_run() {
    let a = FleetSimulation::new(scenario(1)).unwrap().run().unwrap();
    let b = FleetSimulation::new(scenario(2)).unwrap().run().unwrap();

    assert_ne!(a.per_sender, b.per_sender);
}

#[test]
fn test_fleet_counters_add_up() {
    let report = FleetSimulation::new(scenario(99)).unwrap().run().unwrap();
    let m = report.metrics;

    assert_eq!(m.sent, 800);
    assert_eq!(m.received + m.lost, m.sent);
    assert_eq!(m.lost, report.abandoned);
    assert_eq!(
        report.per_sender.iter().map(|s| s.delivered).sum::<u64>(),
        m.received
    );
    assert_eq!(m.sent_bytes, (m.sent + m.retransmissions) * 1024);
    assert!((m.energy_consumed_j - 0.8).abs() < 1e-9);

    // 90% delivery per attempt over five attempts: losses are rare
    assert!(m.packet_loss_ratio < 0.01);
    assert!(m.retransmissions > 0);
}

#[test]
fn test_each_sender_paces_its_messages() {
    let report = FleetSimulation::new(scenario(5)).unwrap().run().unwrap();

    // 99 gaps of 100ms between each sender's 100 messages
    assert!(report.elapsed >= Duration::from_millis(9_900));
    for sender in &report.per_sender {
        assert_eq!(sender.delivered + sender.abandoned, 100);
        assert!(sender.attempts >= 100);
    }
}

#[test]
fn test_exponential_mode_runs() {
    let mut config = scenario(17);
    config.sender.backoff.mode = BackoffMode::Exponential { ceiling: 10 };
    config.density = 80.0;
    config.speed = 12.0;

    let report = FleetSimulation::new(config).unwrap().run().unwrap();

    assert_eq!(report.window, ContentionWindow::new(384, 512).unwrap());
    assert_eq!(report.metrics.sent, 800);
}

#[test]
fn test_closing_channel_abandons_like_timeouts() {
    let config = ScenarioConfig {
        senders: 2,
        messages_per_sender: 10,
        channel: ChannelConfig {
            delivery_probability: 0.0,
            close_probability: 1.0,
            ..ChannelConfig::default()
        },
        ..scenario(3)
    };

    let report = FleetSimulation::new(config).unwrap().run().unwrap();

    assert_eq!(report.abandoned, 20);
    assert_eq!(report.metrics.lost, 20);
    // Closes arrive long before the 1s deadline
    assert!(report.elapsed < Duration::from_secs(10));
}
