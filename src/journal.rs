//! The per-datagram transfer journal written to stdout.
//!
//! One line per exchanged datagram plus the final outcome line, each prefixed
//! with a local-time millisecond timestamp. Diagnostics go through `tracing`
//! to stderr instead; stdout belongs to this journal and the prompt.

use std::net::SocketAddr;

use chrono::Local;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
    Resent,
}

impl Direction {
    fn verb(&self) -> &'static str {
        match self {
            Direction::Sent => "Sent",
            Direction::Received => "Received",
            Direction::Resent => "Re-sent",
        }
    }

    fn preposition(&self) -> &'static str {
        match self {
            Direction::Sent | Direction::Resent => "to",
            Direction::Received => "from",
        }
    }
}

fn timestamp() -> String {
    Local::now().format("[%Y-%m-%d %H:%M:%S%.3f]").to_string()
}

/// `[ts] Sent DATA packet to 10.0.0.1:69 - block number 1, 512 bytes`
pub fn datagram(dir: Direction, opcode: &str, addr: SocketAddr, details: &str) {
    if details.is_empty() {
        println!(
            "{} {} {} packet {} {}",
            timestamp(),
            dir.verb(),
            opcode,
            dir.preposition(),
            addr
        );
    } else {
        println!(
            "{} {} {} packet {} {} - {}",
            timestamp(),
            dir.verb(),
            opcode,
            dir.preposition(),
            addr,
            details
        );
    }
}

/// Timestamped free-form journal line (final outcome, timeout notes).
pub fn note(message: &str) {
    println!("{} {}", timestamp(), message);
}
