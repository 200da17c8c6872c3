//! Statistics display and formatting

use contend_protocol::rto::secs_to_duration;
use contend_sim::{SenderReport, SimulationReport};
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a rate given in megabits per second
pub fn format_bandwidth(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.2} Gbps", mbps / 1000.0)
    } else if mbps >= 1.0 {
        format!("{:.2} Mbps", mbps)
    } else if mbps >= 0.001 {
        format!("{:.2} Kbps", mbps * 1000.0)
    } else {
        format!("{:.0} bps", mbps * 1e6)
    }
}

/// Format RTT in human-readable form
pub fn format_rtt(rtt: Duration) -> String {
    let us = rtt.as_micros();
    if us >= 1_000_000 {
        format!("{:.2}s", us as f64 / 1_000_000.0)
    } else if us >= 1_000 {
        format!("{:.2}ms", us as f64 / 1_000.0)
    } else {
        format!("{}µs", us)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Display a simulation summary followed by per-sender rows
pub fn display_simulation_report(report: &SimulationReport) {
    let m = &report.metrics;

    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ FLEET SIMULATION                                            │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Senders: {}   Window: {}   Simulated: {}",
        report.per_sender.len(),
        report.window,
        format_duration(report.elapsed)
    );
    println!(
        "│ Bytes:   {} sent / {} acknowledged",
        format_bytes(m.sent_bytes),
        format_bytes(m.received_bytes)
    );
    println!(
        "│ Goodput: {}   Mean RTT: {}",
        format_bandwidth(m.throughput_mbps),
        m.mean_rtt.map_or_else(|| "N/A".to_string(), format_rtt)
    );
    if report.cancelled > 0 {
        println!("│ Cancelled in flight: {}", report.cancelled);
    }
    println!("└─────────────────────────────────────────────────────────────┘");

    print!("{}", m.report());

    if !report.per_sender.is_empty() {
        println!("\n┌────────┬───────────┬───────────┬──────────┬──────────┐");
        println!("│ Sender │ Delivered │ Abandoned │ Attempts │ RTO      │");
        println!("├────────┼───────────┼───────────┼──────────┼──────────┤");

        for (id, sender) in report.per_sender.iter().enumerate() {
            display_sender_row(id, sender);
        }

        println!("└────────┴───────────┴───────────┴──────────┴──────────┘");
    }
}

fn display_sender_row(id: usize, sender: &SenderReport) {
    let rto = format_rtt(secs_to_duration(sender.final_rto));
    println!(
        "│ {:6} │ {:9} │ {:9} │ {:8} │ {:8} │",
        id, sender.delivered, sender.abandoned, sender.attempts, rto
    );
}
