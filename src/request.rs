//! The transfer request record and the parser for the interactive flag
//! syntax (`-R|-W -d /path [-t N] [-s N] [-c mode] [-a addr[,port]] [-m]`).

use std::net::{IpAddr, SocketAddr};

use crate::config::TransferDefaults;
use crate::error::{Result, TftpError};
use crate::{Mode, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

/// One transfer as requested at the console. Immutable for the lifetime of
/// the session it drives.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub direction: Direction,
    /// Absolute path as presented to the server
    pub filename: String,
    pub mode: Mode,
    /// Proposed block size; negotiated down by the server or the MTU check
    pub block_size: usize,
    /// Proposed retransmission timeout, only sent when the user asked for one
    pub timeout_secs: Option<u8>,
    pub server_ip: IpAddr,
    pub port: u16,
    /// Accepted for syntactic compatibility; multicast is never requested
    pub multicast: bool,
}

impl TransferRequest {
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.port)
    }

    /// The local file name: the last segment of the request path, used in the
    /// current working directory.
    pub fn local_filename(&self) -> &str {
        self.filename.rsplit('/').next().unwrap_or(&self.filename)
    }

    /// Parses one tokenised console line into a request, seeding unspecified
    /// fields from the configured defaults.
    pub fn parse(tokens: &[&str], defaults: &TransferDefaults) -> Result<Self> {
        let mut direction: Option<Direction> = None;
        let mut filename: Option<String> = None;
        let mut mode = Mode::from_str(&defaults.mode)?;
        let mut block_size = defaults.block_size;
        let mut timeout_secs: Option<u8> = None;
        let mut server_ip = defaults.address;
        let mut port = defaults.port;
        let mut multicast = false;

        let mut iter = tokens.iter();
        while let Some(&token) = iter.next() {
            match token {
                "-R" => set_direction(&mut direction, Direction::Read)?,
                "-W" => set_direction(&mut direction, Direction::Write)?,
                "-m" => multicast = true,
                "-d" => {
                    let arg = require_arg(&mut iter, "-d")?;
                    if !arg.starts_with('/') {
                        return Err(TftpError::Tftp(
                            "argument for -d must be an absolute path".to_string(),
                        ));
                    }
                    if arg.ends_with('/') {
                        return Err(TftpError::Tftp(
                            "argument for -d must name a file, not a directory".to_string(),
                        ));
                    }
                    filename = Some(arg.to_string());
                }
                "-t" => {
                    let value = parse_number(require_arg(&mut iter, "-t")?, "-t")?;
                    if !(1..=255).contains(&value) {
                        return Err(TftpError::Tftp(
                            "argument for -t must be between 1 and 255".to_string(),
                        ));
                    }
                    timeout_secs = Some(value as u8);
                }
                "-s" => {
                    let value = parse_number(require_arg(&mut iter, "-s")?, "-s")?;
                    if !(MIN_BLOCK_SIZE as u64..=MAX_BLOCK_SIZE as u64).contains(&value) {
                        return Err(TftpError::Tftp(format!(
                            "argument for -s must be between {} and {}",
                            MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
                        )));
                    }
                    block_size = value as usize;
                }
                "-c" => {
                    mode = Mode::from_str(require_arg(&mut iter, "-c")?)?;
                }
                "-a" => {
                    let arg = require_arg(&mut iter, "-a")?;
                    let (ip, maybe_port) = parse_addr_port(arg)?;
                    server_ip = ip;
                    if let Some(p) = maybe_port {
                        port = p;
                    }
                }
                other => {
                    return Err(TftpError::Tftp(format!("Invalid option \"{}\"", other)));
                }
            }
        }

        let direction = direction.ok_or_else(|| {
            TftpError::Tftp("missing request type: specify -R (read) or -W (write)".to_string())
        })?;
        let filename = filename
            .ok_or_else(|| TftpError::Tftp("missing file: specify -d /path/to/file".to_string()))?;

        Ok(Self {
            direction,
            filename,
            mode,
            block_size,
            timeout_secs,
            server_ip,
            port,
            multicast,
        })
    }
}

fn set_direction(slot: &mut Option<Direction>, wanted: Direction) -> Result<()> {
    match slot {
        Some(existing) if *existing != wanted => Err(TftpError::Tftp(
            "cannot combine -R with -W in one request".to_string(),
        )),
        _ => {
            *slot = Some(wanted);
            Ok(())
        }
    }
}

fn require_arg<'a>(iter: &mut std::slice::Iter<'_, &'a str>, flag: &str) -> Result<&'a str> {
    iter.next()
        .copied()
        .ok_or_else(|| TftpError::Tftp(format!("option {} requires an argument (see help)", flag)))
}

/// Digits only, strictly positive.
fn parse_number(s: &str, flag: &str) -> Result<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TftpError::Tftp(format!(
            "argument for option {} may consist of digits only",
            flag
        )));
    }
    let value: u64 = s
        .parse()
        .map_err(|_| TftpError::Tftp(format!("argument for option {} is out of range", flag)))?;
    if value == 0 {
        return Err(TftpError::Tftp(format!(
            "argument for option {} must be a number larger than 0",
            flag
        )));
    }
    Ok(value)
}

/// `addr` or `addr,port`; the comma keeps IPv6 colons unambiguous.
fn parse_addr_port(s: &str) -> Result<(IpAddr, Option<u16>)> {
    let (addr_part, port_part) = match s.split_once(',') {
        Some((a, p)) => (a, Some(p)),
        None => (s, None),
    };
    let ip: IpAddr = addr_part
        .parse()
        .map_err(|_| TftpError::Tftp(format!("invalid address \"{}\" (IPv4 nor IPv6)", addr_part)))?;
    let port = match port_part {
        Some(p) => {
            let value = parse_number(p, "-a")?;
            let port = u16::try_from(value)
                .map_err(|_| TftpError::Tftp("port must be between 1 and 65535".to_string()))?;
            Some(port)
        }
        None => None,
    };
    Ok((ip, port))
}
