//! Reliable delivery over loopback UDP
//!
//! Real sockets and real time: a responder thread that drops part of the
//! traffic, and a blocking sender that retries through it.

use bytes::Bytes;
use contend::io::{BlockingSender, EchoResponder, ResponderConfig, UdpTransport};
use contend::protocol::{RtoConfig, SharedMetrics};
use contend::{BackoffConfig, ReliableSendLoop, SenderConfig, SlotRng};
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn patient_sender() -> SenderConfig {
    SenderConfig {
        backoff: BackoffConfig {
            max_retries: 30,
            ..BackoffConfig::default()
        },
        rto: RtoConfig {
            initial_rto: Duration::from_millis(50),
            ..RtoConfig::default()
        },
    }
}

#[test]
fn test_delivery_through_lossy_responder() {
    let responder = EchoResponder::spawn(ResponderConfig {
        drop_rate: 0.3,
        seed: 8,
        ..ResponderConfig::default()
    })
    .unwrap();

    let transport = UdpTransport::connect(loopback(), responder.local_addr()).unwrap();
    let send_loop = ReliableSendLoop::new(patient_sender(), SlotRng::seeded(8)).unwrap();
    let metrics = SharedMetrics::default();
    let mut sender = BlockingSender::new(send_loop, transport, metrics.clone());

    let start = Instant::now();
    for i in 0..20 {
        let outcome = sender
            .send(Bytes::from(format!("message {}", i)))
            .unwrap();
        assert!(outcome.is_delivered(), "message {} {:?}", i, outcome);
    }

    let state = metrics.snapshot(start.elapsed());
    let stats = responder.stop();

    assert_eq!(state.sent, 20);
    assert_eq!(state.received, 20);
    assert_eq!(state.lost, 0);
    assert!(stats.dropped > 0);
    assert_eq!(stats.received, stats.acked + stats.dropped);
}

#[test]
fn test_senders_share_one_aggregator() {
    let responder = EchoResponder::spawn(ResponderConfig::default()).unwrap();
    let peer = responder.local_addr();
    let metrics = SharedMetrics::default();

    let handles: Vec<_> = (0..3u64)
        .map(|seed| {
            let metrics = metrics.clone();
            thread::spawn(move || {
                let transport = UdpTransport::connect(loopback(), peer).unwrap();
                let send_loop =
                    ReliableSendLoop::new(patient_sender(), SlotRng::seeded(seed)).unwrap();
                let mut sender = BlockingSender::new(send_loop, transport, metrics);
                for _ in 0..10 {
                    assert!(sender.send(Bytes::from_static(b"ping")).unwrap().is_delivered());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    responder.stop();

    let state = metrics.snapshot(Duration::from_secs(1));
    assert_eq!(state.sent, 30);
    assert_eq!(state.received, 30);
    assert_eq!(state.lost, 0);
}
