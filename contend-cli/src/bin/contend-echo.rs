//! Contend Echo - reliable delivery over a local UDP socket pair
//!
//! Starts a responder that acknowledges datagrams (dropping a configurable
//! fraction) and delivers messages to it with the reliable send loop.

use bytes::Bytes;
use clap::Parser;
use contend::io::{BlockingSender, EchoResponder, ResponderConfig, UdpTransport};
use contend::{MetricsAggregator, ReliableSendLoop, SlotRng};
use contend_cli::{format_duration, Config, EchoConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "contend-echo")]
#[command(about = "Reliable delivery over a lossy local UDP peer", long_about = None)]
struct Args {
    /// TOML configuration file with an [echo] table
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Messages to deliver
    #[arg(short, long)]
    messages: Option<u32>,

    /// Fraction of datagrams the responder drops
    #[arg(short, long)]
    loss: Option<f64>,

    /// Responder listen address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Payload size in bytes
    #[arg(long)]
    payload_size: Option<usize>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let mut config = match &args.config {
        Some(path) => match Config::from_file(path)?.echo {
            Some(echo) => echo,
            None => anyhow::bail!("{} has no [echo] table", path.display()),
        },
        None => EchoConfig::default(),
    };

    if let Some(messages) = args.messages {
        config.messages = messages;
    }
    if let Some(loss) = args.loss {
        config.loss = loss;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(payload_size) = args.payload_size {
        config.payload_size = payload_size;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.validate()?;

    let responder = EchoResponder::spawn(ResponderConfig {
        bind: config.bind,
        drop_rate: config.loss,
        close_after: config.close_after,
        seed: config.seed,
    })?;

    let local: SocketAddr = if responder.local_addr().is_ipv4() {
        SocketAddr::from(([127, 0, 0, 1], 0))
    } else {
        SocketAddr::from(([0u16, 0, 0, 0, 0, 0, 0, 1], 0))
    };
    let transport = UdpTransport::connect(local, responder.local_addr())?;
    tracing::info!(
        "Contend Echo starting: {} -> {}, {} messages, loss {}",
        transport.local_addr()?,
        responder.local_addr(),
        config.messages,
        config.loss
    );

    let send_loop = ReliableSendLoop::new(
        config.retry.sender_config(),
        SlotRng::seeded(config.seed.wrapping_add(1)),
    )?;
    let mut sender = BlockingSender::new(send_loop, transport, MetricsAggregator::new());

    let payload = Bytes::from(vec![0xAB; config.payload_size]);
    let start = Instant::now();
    for i in 0..config.messages {
        let outcome = sender.send(payload.clone())?;
        if !outcome.is_delivered() {
            tracing::warn!("Message {} not delivered: {:?}", i + 1, outcome);
        }
    }
    let elapsed = start.elapsed();

    let stats = responder.stop();
    let state = sender.metrics().snapshot(elapsed);

    println!("\nRan for {}", format_duration(elapsed));
    print!("{}", state.report());
    println!(
        "Responder: {} received, {} acked, {} dropped, {} closed",
        stats.received, stats.acked, stats.dropped, stats.closed
    );

    Ok(())
}
