//! Contention I/O and timing
//!
//! Drivers for the send loop: clocks and a discrete-event timer queue for
//! simulation, plus a UDP socket wrapper and blocking transport for running
//! over a real network.

pub mod socket;
pub mod time;
pub mod udp;

pub use socket::{DatagramSocket, SocketError};
pub use time::{Clock, EventQueue, MonotonicClock, Scheduler, TimerHandle, Timestamp};
pub use udp::{
    BlockingSender, EchoResponder, EventSource, Reply, ResponderConfig, ResponderStats,
    UdpTransport,
};
