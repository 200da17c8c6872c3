//! Reliable delivery over UDP
//!
//! A toy end-to-end setup for the send loop on a real network stack:
//!
//! - [`UdpTransport`] sends each attempt as one datagram and waits for the
//!   peer's `ACK` (or `FIN`, meaning the peer is gone).
//! - [`EchoResponder`] runs the peer on its own thread, acknowledging every
//!   datagram, optionally dropping a fraction of them and closing after a
//!   budget.
//! - [`BlockingSender`] drives a [`ReliableSendLoop`] against wall-clock time,
//!   blocking on the socket for acks and sleeping through backoffs.
//!
//! Every attempt carries a fresh 32-bit attempt number in front of the
//! payload, and replies echo it:
//!
//! ```text
//! data:  [attempt: u32 BE][payload]
//! reply: ["ACK" | "FIN"][attempt: u32 BE]
//! ```
//!
//! Replies for any other attempt (duplicates, or late acks for an attempt
//! that already timed out) are discarded.

use crate::socket::{DatagramSocket, SocketError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use contend_protocol::metrics::MetricsRecorder;
use contend_protocol::random::{RandomSource, SlotRng};
use contend_protocol::sender::{ReliableSendLoop, SendAction, SendError, SendOutcome};
use contend_protocol::transport::{TransmitStatus, Transport, TransportError, TransportEvent};
use crossbeam::channel::{self, Receiver, Sender};
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Acknowledgment tag
pub const ACK: &[u8] = b"ACK";

/// Close notification tag
pub const FIN: &[u8] = b"FIN";

/// Size of the attempt number in front of each datagram
pub const ATTEMPT_HEADER_LEN: usize = 4;

/// Size of a reply datagram
pub const REPLY_LEN: usize = 3 + ATTEMPT_HEADER_LEN;

/// Largest payload carried in one datagram
pub const MAX_DATAGRAM_PAYLOAD: usize = 1472;

/// Peer reply to one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Fin,
}

impl Reply {
    fn tag(self) -> &'static [u8] {
        match self {
            Reply::Ack => ACK,
            Reply::Fin => FIN,
        }
    }
}

/// Encode a reply for `attempt`
pub fn encode_reply(reply: Reply, attempt: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(REPLY_LEN);
    buf.put_slice(reply.tag());
    buf.put_u32(attempt);
    buf.freeze()
}

/// Decode a reply datagram; `None` if malformed
pub fn decode_reply(datagram: &[u8]) -> Option<(Reply, u32)> {
    if datagram.len() != REPLY_LEN {
        return None;
    }
    let (tag, mut attempt) = datagram.split_at(3);
    let reply = match tag {
        ACK => Reply::Ack,
        FIN => Reply::Fin,
        _ => return None,
    };
    Some((reply, attempt.get_u32()))
}

/// Attempt number of a data datagram; `None` if too short
pub fn attempt_number(datagram: &[u8]) -> Option<u32> {
    let mut header = datagram.get(..ATTEMPT_HEADER_LEN)?;
    Some(header.get_u32())
}

/// Transport that can block until its next notification
pub trait EventSource {
    /// Wait up to `timeout` for an ack or close; `None` on timeout
    fn wait_event(&mut self, timeout: Duration) -> Result<Option<TransportEvent>, TransportError>;
}

/// Datagram transport to a single peer
#[derive(Debug)]
pub struct UdpTransport {
    socket: DatagramSocket,
    peer: SocketAddr,
    recv_buf: Vec<u8>,
    next_attempt: u32,
    outstanding: Option<u32>,
}

impl UdpTransport {
    /// Bind locally and target `peer`
    pub fn connect(bind: SocketAddr, peer: SocketAddr) -> Result<Self, SocketError> {
        Ok(UdpTransport {
            socket: DatagramSocket::bind(bind)?,
            peer,
            recv_buf: vec![0u8; MAX_DATAGRAM_PAYLOAD + ATTEMPT_HEADER_LEN],
            next_attempt: 0,
            outstanding: None,
        })
    }

    /// Local address of the transport's socket
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.socket.local_addr()
    }

    /// Attempt number of the datagram awaiting a reply
    pub fn outstanding(&self) -> Option<u32> {
        self.outstanding
    }
}

impl Transport for UdpTransport {
    fn attempt_send(&mut self, payload: &Bytes) -> Result<TransmitStatus, TransportError> {
        if payload.len() > MAX_DATAGRAM_PAYLOAD {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_DATAGRAM_PAYLOAD,
            });
        }

        let attempt = self.next_attempt;
        self.next_attempt = self.next_attempt.wrapping_add(1);

        let mut datagram = BytesMut::with_capacity(ATTEMPT_HEADER_LEN + payload.len());
        datagram.put_u32(attempt);
        datagram.put_slice(payload);

        // A reply to an earlier attempt must not match once this one is out
        self.outstanding = None;
        self.socket
            .send_to(&datagram, self.peer)
            .map_err(socket_to_transport)?;
        self.outstanding = Some(attempt);
        Ok(TransmitStatus::Pending)
    }
}

impl EventSource for UdpTransport {
    fn wait_event(&mut self, timeout: Duration) -> Result<Option<TransportEvent>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let received = self
                .socket
                .recv_from_timeout(&mut self.recv_buf, remaining)
                .map_err(socket_to_transport)?;

            let Some((n, from)) = received else {
                return Ok(None);
            };
            if from != self.peer {
                tracing::debug!("Ignoring datagram from unexpected peer {}", from);
                continue;
            }

            let Some((reply, attempt)) = decode_reply(&self.recv_buf[..n]) else {
                tracing::debug!("Ignoring malformed {}-byte reply", n);
                continue;
            };
            if self.outstanding != Some(attempt) {
                tracing::debug!(
                    "Ignoring stale {:?} for attempt {} (waiting on {:?})",
                    reply,
                    attempt,
                    self.outstanding
                );
                continue;
            }

            self.outstanding = None;
            return Ok(Some(match reply {
                Reply::Ack => TransportEvent::Ack,
                Reply::Fin => TransportEvent::Closed,
            }));
        }
    }
}

fn socket_to_transport(err: SocketError) -> TransportError {
    match err {
        SocketError::Io(e) => TransportError::Io(e),
    }
}

/// Runs a [`ReliableSendLoop`] on wall-clock time
pub struct BlockingSender<T, R, M> {
    send_loop: ReliableSendLoop<R>,
    transport: T,
    metrics: M,
}

impl<T, R, M> BlockingSender<T, R, M>
where
    T: Transport + EventSource,
    R: RandomSource,
    M: MetricsRecorder,
{
    /// Create a sender
    pub fn new(send_loop: ReliableSendLoop<R>, transport: T, metrics: M) -> Self {
        BlockingSender {
            send_loop,
            transport,
            metrics,
        }
    }

    /// Deliver one message, retrying until acked or abandoned
    ///
    /// Transport failures count as a closed connection for the attempt in
    /// progress; they never abort the call.
    pub fn send(&mut self, payload: Bytes) -> Result<SendOutcome, SendError> {
        self.drive(payload, None)
    }

    /// Like [`send`](Self::send), but cancel the message if it is still in
    /// flight at `deadline`
    ///
    /// A cancelled message counts as sent and never as lost.
    pub fn send_before(
        &mut self,
        payload: Bytes,
        deadline: Instant,
    ) -> Result<SendOutcome, SendError> {
        self.drive(payload, Some(deadline))
    }

    fn drive(
        &mut self,
        payload: Bytes,
        deadline: Option<Instant>,
    ) -> Result<SendOutcome, SendError> {
        let mut action = self
            .send_loop
            .begin(payload.len(), Instant::now(), &mut self.metrics)?;

        loop {
            action = match action {
                SendAction::Transmit { attempt, .. } => {
                    match self.transport.attempt_send(&payload) {
                        Ok(TransmitStatus::Pending) => self.send_loop.on_transmitted()?,
                        Ok(TransmitStatus::Delivered) => {
                            self.send_loop.on_transmitted()?;
                            self.send_loop.on_ack(Instant::now(), &mut self.metrics)?
                        }
                        Err(e) => {
                            tracing::warn!("Attempt {} failed to send: {}", attempt, e);
                            self.send_loop.on_closed(Instant::now(), &mut self.metrics)?
                        }
                    }
                }
                SendAction::AwaitAck { timeout } => {
                    let (wait, cut) = bounded_wait(timeout, deadline);
                    match self.transport.wait_event(wait) {
                        Ok(Some(TransportEvent::Ack)) => {
                            self.send_loop.on_ack(Instant::now(), &mut self.metrics)?
                        }
                        Ok(Some(TransportEvent::Closed)) => {
                            tracing::info!("Peer closed the connection");
                            self.send_loop.on_closed(Instant::now(), &mut self.metrics)?
                        }
                        Ok(None) if cut => return self.cancel(),
                        Ok(None) => self.send_loop.on_timeout(Instant::now(), &mut self.metrics)?,
                        Err(e) => {
                            tracing::warn!("Waiting for ack failed: {}", e);
                            self.send_loop.on_closed(Instant::now(), &mut self.metrics)?
                        }
                    }
                }
                SendAction::Backoff { delay } => {
                    let (wait, cut) = bounded_wait(delay, deadline);
                    thread::sleep(wait);
                    if cut {
                        return self.cancel();
                    }
                    self.send_loop
                        .on_backoff_elapsed(Instant::now(), &mut self.metrics)?
                }
                SendAction::Complete(outcome) => return Ok(outcome),
            };
        }
    }

    fn cancel(&mut self) -> Result<SendOutcome, SendError> {
        let outcome = self.send_loop.cancel()?;
        tracing::info!("Message cancelled at its deadline: {:?}", outcome);
        Ok(outcome)
    }

    /// The underlying send loop
    pub fn send_loop(&self) -> &ReliableSendLoop<R> {
        &self.send_loop
    }

    /// The metrics sink
    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    /// Take back the parts
    pub fn into_parts(self) -> (ReliableSendLoop<R>, T, M) {
        (self.send_loop, self.transport, self.metrics)
    }
}

/// Clip `wait` to the time left before `deadline`; true when clipped
fn bounded_wait(wait: Duration, deadline: Option<Instant>) -> (Duration, bool) {
    match deadline {
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            if left < wait {
                (left, true)
            } else {
                (wait, false)
            }
        }
        None => (wait, false),
    }
}

/// Responder behaviour
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Address to listen on
    pub bind: SocketAddr,
    /// Fraction of datagrams silently dropped, in `[0, 1]`
    pub drop_rate: f64,
    /// Reply `FIN` to everything after this many datagrams
    pub close_after: Option<u64>,
    /// Seed for the drop decisions
    pub seed: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        ResponderConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            drop_rate: 0.0,
            close_after: None,
            seed: 0,
        }
    }
}

/// What the responder saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponderStats {
    pub received: u64,
    pub acked: u64,
    pub dropped: u64,
    pub closed: u64,
}

/// Peer that acknowledges datagrams on a background thread
pub struct EchoResponder {
    addr: SocketAddr,
    shutdown: Sender<()>,
    handle: JoinHandle<ResponderStats>,
}

impl EchoResponder {
    /// Bind and start the responder thread
    pub fn spawn(config: ResponderConfig) -> Result<Self, SocketError> {
        let socket = DatagramSocket::bind(config.bind)?;
        let addr = socket.local_addr()?;
        let (shutdown, stop) = channel::bounded(1);

        tracing::info!("Responder listening on {}", addr);
        let handle = thread::spawn(move || respond(socket, config, stop));

        Ok(EchoResponder {
            addr,
            shutdown,
            handle,
        })
    }

    /// Address senders should target
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop the thread and collect its statistics
    pub fn stop(self) -> ResponderStats {
        let _ = self.shutdown.send(());
        match self.handle.join() {
            Ok(stats) => stats,
            Err(_) => {
                tracing::error!("Responder thread panicked");
                ResponderStats::default()
            }
        }
    }
}

fn respond(socket: DatagramSocket, config: ResponderConfig, stop: Receiver<()>) -> ResponderStats {
    let mut rng = SlotRng::seeded(config.seed);
    let mut stats = ResponderStats::default();
    let mut buf = vec![0u8; 65536];

    while stop.try_recv().is_err() {
        let received = match socket.recv_from_timeout(&mut buf, Duration::from_millis(20)) {
            Ok(Some(received)) => received,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!("Responder receive failed: {}", e);
                break;
            }
        };
        let (n, from) = received;
        let Some(attempt) = attempt_number(&buf[..n]) else {
            tracing::debug!("Ignoring {}-byte datagram from {}", n, from);
            continue;
        };
        stats.received += 1;

        let reply = if config.close_after.is_some_and(|budget| stats.received > budget) {
            stats.closed += 1;
            Reply::Fin
        } else if rng.uniform_float() < config.drop_rate {
            stats.dropped += 1;
            tracing::debug!("Dropping attempt {} from {}", attempt, from);
            continue;
        } else {
            stats.acked += 1;
            Reply::Ack
        };

        if let Err(e) = socket.send_to(&encode_reply(reply, attempt), from) {
            tracing::warn!("Failed to reply to {}: {}", from, e);
        }
    }

    tracing::info!(
        "Responder stopping: {} received, {} acked, {} dropped",
        stats.received,
        stats.acked,
        stats.dropped
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use contend_protocol::backoff::BackoffConfig;
    use contend_protocol::metrics::MetricsAggregator;
    use contend_protocol::rto::RtoConfig;
    use contend_protocol::sender::SenderConfig;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn sender_config(max_retries: u32) -> SenderConfig {
        SenderConfig {
            backoff: BackoffConfig {
                max_retries,
                ..BackoffConfig::default()
            },
            rto: RtoConfig {
                initial_rto: Duration::from_millis(200),
                ..RtoConfig::default()
            },
        }
    }

    #[test]
    fn test_delivery_over_loopback() {
        let responder = EchoResponder::spawn(ResponderConfig::default()).unwrap();
        let transport = UdpTransport::connect(loopback(), responder.local_addr()).unwrap();
        let send_loop = ReliableSendLoop::new(sender_config(5), SlotRng::seeded(1)).unwrap();
        let mut sender = BlockingSender::new(send_loop, transport, MetricsAggregator::new());

        for i in 0..10 {
            let outcome = sender.send(Bytes::from(format!("Packet {}", i + 1))).unwrap();
            assert!(outcome.is_delivered());
        }

        assert_eq!(sender.metrics().received(), 10);
        assert_eq!(sender.metrics().lost(), 0);

        // Spurious timeouts on a busy host may add retransmissions
        let stats = responder.stop();
        assert!(stats.acked >= 10);
    }

    #[test]
    fn test_silent_peer_abandons() {
        // A bound socket that never replies
        let silent = DatagramSocket::bind(loopback()).unwrap();
        let transport = UdpTransport::connect(loopback(), silent.local_addr().unwrap()).unwrap();
        let config = SenderConfig {
            rto: RtoConfig {
                initial_rto: Duration::from_millis(10),
                ..RtoConfig::default()
            },
            ..sender_config(3)
        };
        let send_loop = ReliableSendLoop::new(config, SlotRng::seeded(2)).unwrap();
        let mut sender = BlockingSender::new(send_loop, transport, MetricsAggregator::new());

        let outcome = sender.send(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(outcome, SendOutcome::Abandoned { attempts: 3 });
        assert_eq!(sender.metrics().lost(), 1);
    }

    #[test]
    fn test_closed_peer_is_retried_then_abandoned() {
        let responder = EchoResponder::spawn(ResponderConfig {
            close_after: Some(0),
            ..ResponderConfig::default()
        })
        .unwrap();
        let transport = UdpTransport::connect(loopback(), responder.local_addr()).unwrap();
        let send_loop = ReliableSendLoop::new(sender_config(2), SlotRng::seeded(3)).unwrap();
        let mut sender = BlockingSender::new(send_loop, transport, MetricsAggregator::new());

        let outcome = sender.send(Bytes::from_static(b"x")).unwrap();
        assert_eq!(outcome, SendOutcome::Abandoned { attempts: 2 });

        let stats = responder.stop();
        assert_eq!(stats.closed, 2);
    }

    #[test]
    fn test_deadline_cancels_message_in_flight() {
        let silent = DatagramSocket::bind(loopback()).unwrap();
        let transport = UdpTransport::connect(loopback(), silent.local_addr().unwrap()).unwrap();
        let config = SenderConfig {
            rto: RtoConfig {
                initial_rto: Duration::from_secs(2),
                ..RtoConfig::default()
            },
            ..sender_config(3)
        };
        let send_loop = ReliableSendLoop::new(config, SlotRng::seeded(7)).unwrap();
        let mut sender = BlockingSender::new(send_loop, transport, MetricsAggregator::new());

        let start = Instant::now();
        let outcome = sender
            .send_before(Bytes::from_static(b"hello"), start + Duration::from_millis(100))
            .unwrap();

        assert_eq!(outcome, SendOutcome::Cancelled { attempts: 1 });
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(sender.metrics().sent(), 1);
        assert_eq!(sender.metrics().lost(), 0);
        assert_eq!(sender.metrics().received(), 0);

        // The loop is free for the next message
        assert!(sender.send_loop().state().is_terminal());
    }

    /// Peer on its own thread that records every attempt number it sees
    fn scripted_peer<F>(script: F) -> (SocketAddr, JoinHandle<Vec<u32>>)
    where
        F: FnMut(&DatagramSocket, u32, SocketAddr, usize) + Send + 'static,
    {
        let socket = DatagramSocket::bind(loopback()).unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let mut script = script;
            let mut buf = vec![0u8; 2048];
            let mut seen = Vec::new();
            while let Some((n, from)) = socket
                .recv_from_timeout(&mut buf, Duration::from_millis(500))
                .unwrap()
            {
                let attempt = attempt_number(&buf[..n]).unwrap();
                seen.push(attempt);
                script(&socket, attempt, from, seen.len());
            }
            seen
        });
        (addr, handle)
    }

    #[test]
    fn test_reply_encoding() {
        let ack = encode_reply(Reply::Ack, 7);
        assert_eq!(&ack[..], b"ACK\x00\x00\x00\x07");
        assert_eq!(decode_reply(&ack), Some((Reply::Ack, 7)));
        assert_eq!(
            decode_reply(&encode_reply(Reply::Fin, u32::MAX)),
            Some((Reply::Fin, u32::MAX))
        );

        assert_eq!(decode_reply(b"ACK"), None);
        assert_eq!(decode_reply(b"NAK\x00\x00\x00\x01"), None);
        assert_eq!(attempt_number(b"\x00\x00\x01\x00payload"), Some(256));
        assert_eq!(attempt_number(b"\x00\x01"), None);
    }

    #[test]
    fn test_duplicate_ack_does_not_confirm_next_message() {
        // Acks the very first datagram twice, then goes silent
        let (peer, handle) = scripted_peer(|socket, attempt, from, count| {
            if count == 1 {
                let ack = encode_reply(Reply::Ack, attempt);
                socket.send_to(&ack, from).unwrap();
                socket.send_to(&ack, from).unwrap();
            }
        });

        let transport = UdpTransport::connect(loopback(), peer).unwrap();
        let send_loop = ReliableSendLoop::new(sender_config(2), SlotRng::seeded(5)).unwrap();
        let mut sender = BlockingSender::new(send_loop, transport, MetricsAggregator::new());

        let first = sender.send(Bytes::from_static(b"one")).unwrap();
        assert!(matches!(first, SendOutcome::Delivered { attempts: 1, .. }));

        let second = sender.send(Bytes::from_static(b"two")).unwrap();
        assert_eq!(second, SendOutcome::Abandoned { attempts: 2 });

        assert_eq!(sender.metrics().received(), 1);
        assert_eq!(sender.metrics().lost(), 1);
        assert_eq!(handle.join().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_late_ack_for_timed_out_attempt_ignored() {
        // Answers the retry with an ack for the first attempt only
        let (peer, handle) = scripted_peer(|socket, _, from, count| {
            if count == 2 {
                socket.send_to(&encode_reply(Reply::Ack, 0), from).unwrap();
            }
        });

        let transport = UdpTransport::connect(loopback(), peer).unwrap();
        let config = SenderConfig {
            rto: RtoConfig {
                initial_rto: Duration::from_millis(50),
                ..RtoConfig::default()
            },
            ..sender_config(2)
        };
        let send_loop = ReliableSendLoop::new(config, SlotRng::seeded(6)).unwrap();
        let mut sender = BlockingSender::new(send_loop, transport, MetricsAggregator::new());

        let outcome = sender.send(Bytes::from_static(b"late")).unwrap();
        assert_eq!(outcome, SendOutcome::Abandoned { attempts: 2 });
        assert_eq!(sender.metrics().received(), 0);
        assert_eq!(sender.send_loop().rto_estimator().sample_count(), 0);
        assert_eq!(handle.join().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_large_stray_reply_is_skipped() {
        // A full-size junk datagram lands before the real ack
        let (peer, handle) = scripted_peer(|socket, attempt, from, _| {
            socket.send_to(&[0xAB; MAX_DATAGRAM_PAYLOAD], from).unwrap();
            socket.send_to(&encode_reply(Reply::Ack, attempt), from).unwrap();
        });

        let transport = UdpTransport::connect(loopback(), peer).unwrap();
        let send_loop = ReliableSendLoop::new(sender_config(1), SlotRng::seeded(8)).unwrap();
        let mut sender = BlockingSender::new(send_loop, transport, MetricsAggregator::new());

        let outcome = sender.send(Bytes::from_static(b"x")).unwrap();
        assert!(matches!(outcome, SendOutcome::Delivered { attempts: 1, .. }));
        assert_eq!(handle.join().unwrap(), vec![0]);
    }

    #[test]
    fn test_oversized_payload_counts_as_failed_attempt() {
        let responder = EchoResponder::spawn(ResponderConfig::default()).unwrap();
        let transport = UdpTransport::connect(loopback(), responder.local_addr()).unwrap();
        let send_loop = ReliableSendLoop::new(sender_config(1), SlotRng::seeded(4)).unwrap();
        let mut sender = BlockingSender::new(send_loop, transport, MetricsAggregator::new());

        let outcome = sender
            .send(Bytes::from(vec![0u8; MAX_DATAGRAM_PAYLOAD + 1]))
            .unwrap();
        assert_eq!(outcome, SendOutcome::Abandoned { attempts: 1 });
        responder.stop();
    }
}
