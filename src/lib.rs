pub mod config;
pub mod error;
pub mod journal;
pub mod mtu;
pub mod netascii;
pub mod peer;
pub mod request;
pub mod session;
pub mod shell;
pub mod transport;
pub mod wire;

// Re-export commonly used types
pub use error::{Result, TftpError};
pub use request::TransferRequest;

// RFC 1350 - The TFTP Protocol (Revision 2)
pub const DEFAULT_BLOCK_SIZE: usize = 512; // RFC 1350 standard for compatibility
pub const MIN_BLOCK_SIZE: usize = 8; // RFC 2348 minimum block size
pub const MAX_BLOCK_SIZE: usize = 65464; // RFC 2348 maximum block size
pub const HEADER_SIZE: usize = 4; // opcode + block number
pub const INITIAL_BUFFER_SIZE: usize = 1024; // regrown after blksize negotiation
pub const DEFAULT_PORT: u16 = 69;
pub const DEFAULT_RETRY_SECS: u64 = 5;

/// Hard session deadline derived from the single-shot retry interval.
pub fn hard_deadline_secs(retry_secs: u64) -> u64 {
    3 * retry_secs + 1
}

// TFTP Opcodes (RFC 1350, OACK from RFC 2347)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,   // Read Request
    Wrq = 2,   // Write Request
    Data = 3,  // Data
    Ack = 4,   // Acknowledgment
    Error = 5, // Error
    Oack = 6,  // Option Acknowledgment (RFC 2347)
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Opcode::Rrq),
            2 => Some(Opcode::Wrq),
            3 => Some(Opcode::Data),
            4 => Some(Opcode::Ack),
            5 => Some(Opcode::Error),
            6 => Some(Opcode::Oack),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Opcode::Rrq => "RRQ",
            Opcode::Wrq => "WRQ",
            Opcode::Data => "DATA",
            Opcode::Ack => "ACK",
            Opcode::Error => "ERROR",
            Opcode::Oack => "OACK",
        }
    }
}

// TFTP Error Codes (RFC 1350, code 8 from RFC 2347)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
    OptionNegotiationFailed = 8, // RFC 2347
}

impl ErrorCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ErrorCode::NotDefined),
            1 => Some(ErrorCode::FileNotFound),
            2 => Some(ErrorCode::AccessViolation),
            3 => Some(ErrorCode::DiskFull),
            4 => Some(ErrorCode::IllegalOperation),
            5 => Some(ErrorCode::UnknownTransferId),
            6 => Some(ErrorCode::FileAlreadyExists),
            7 => Some(ErrorCode::NoSuchUser),
            8 => Some(ErrorCode::OptionNegotiationFailed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotDefined => "Not defined",
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::AccessViolation => "Access violation",
            ErrorCode::DiskFull => "Disk full or allocation exceeded",
            ErrorCode::IllegalOperation => "Illegal TFTP operation",
            ErrorCode::UnknownTransferId => "Unknown transfer ID",
            ErrorCode::FileAlreadyExists => "File already exists",
            ErrorCode::NoSuchUser => "No such user",
            ErrorCode::OptionNegotiationFailed => "Option negotiation failed",
        }
    }
}

// Transfer Mode (RFC 1350; MAIL is obsolete and rejected at the flag parser)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// NETASCII mode - 8-bit ASCII with network line ending conversion
    Netascii,
    /// OCTET mode - binary transfer without conversion
    Octet,
}

impl Mode {
    /// Accepts the console spellings (`ascii`/`binary`) as well as the wire
    /// names, case-insensitively.
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ascii" | "netascii" => Ok(Mode::Netascii),
            "binary" | "octet" => Ok(Mode::Octet),
            _ => Err(TftpError::Tftp(format!("Unknown transfer mode: {}", s))),
        }
    }

    /// The lowercase on-wire mode string.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Mode::Netascii => "netascii",
            Mode::Octet => "octet",
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Mode::Octet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_conversions() {
        assert_eq!(Opcode::from_u16(1), Some(Opcode::Rrq));
        assert_eq!(Opcode::from_u16(6), Some(Opcode::Oack));
        assert_eq!(Opcode::from_u16(0), None);
        assert_eq!(Opcode::from_u16(7), None);
    }

    #[test]
    fn error_code_conversions() {
        assert_eq!(ErrorCode::from_u16(5), Some(ErrorCode::UnknownTransferId));
        assert_eq!(ErrorCode::from_u16(8), Some(ErrorCode::OptionNegotiationFailed));
        assert_eq!(ErrorCode::from_u16(9), None);
    }

    #[test]
    fn mode_spellings() {
        assert_eq!(Mode::from_str("ascii").unwrap(), Mode::Netascii);
        assert_eq!(Mode::from_str("NETASCII").unwrap(), Mode::Netascii);
        assert_eq!(Mode::from_str("binary").unwrap(), Mode::Octet);
        assert_eq!(Mode::from_str("Octet").unwrap(), Mode::Octet);
        assert!(Mode::from_str("mail").is_err());
    }
}
