//! The TFTP session engine: one state machine instance drives a single read
//! or write transfer end to end.
//!
//! The exchange is lock-step (RFC 1350): the client never has more than one
//! unacknowledged packet outstanding. Each round sends the packet the state
//! calls for, then waits for the one legal reply under two timers - the
//! single-shot retransmit interval and the hard session deadline.

use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TimerConfig;
use crate::error::{Result, TftpError};
use crate::journal::{self, Direction as Dir};
use crate::mtu;
use crate::netascii::{Decoder, Encoder};
use crate::peer::{Peer, SourceCheck};
use crate::request::{Direction, TransferRequest};
use crate::transport::Transport;
use crate::wire::{self, OptionList, RecvBuf, SendBuf};
use crate::{hard_deadline_secs, ErrorCode, Opcode, DEFAULT_BLOCK_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE};

/// What the session emits next. `Nothing` covers both the wait-again case
/// after a duplicate and the no-more-to-send terminal case.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NextSend {
    Rrq,
    Wrq,
    Data,
    Ack,
    Error(ErrorCode),
    Nothing,
}

/// The opcode the peer owes us. `Initial` is the reply to RRQ/WRQ, where an
/// OACK, the no-options DATA(1)/ACK(0), or an ERROR are all legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpectedRecv {
    Initial,
    Data,
    Ack,
}

/// Outcome of one accepted datagram: the session advanced to its next send,
/// or it stays waiting on the same reply (duplicates, interlopers).
enum Step {
    Advance,
    Stay,
}

/// Runs one complete transfer and reports the outcome on the journal.
///
/// Resources are acquired in the order socket, block-size validation, local
/// file, and released in reverse on every path. Precondition failures are
/// reported before any exchange starts and produce no outcome line.
pub async fn communicate(
    request: &TransferRequest,
    timers: &TimerConfig,
    local_dir: &Path,
) -> Result<()> {
    let server = request.server_addr();
    let transport = match Transport::bind(server) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("cannot start transfer: {}", e);
            return Err(e);
        }
    };

    // The negotiated block must clear the smallest local interface.
    let block_size_proposal = mtu::clamp_block_size(request.block_size, server.is_ipv4());

    let local_path = local_dir.join(request.local_filename());
    let opened = match request.direction {
        Direction::Read => File::create(&local_path).await.map(|f| (Some(f), Vec::new())),
        Direction::Write => tokio::fs::read(&local_path).await.map(|data| (None, data)),
    };
    let (sink, source) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("cannot open {}: {}", local_path.display(), e);
            return Err(e.into());
        }
    };

    info!(
        "{} {} <-> {} ({}, blksize {})",
        request.direction.as_str(),
        local_path.display(),
        server,
        request.mode.wire_name(),
        block_size_proposal
    );

    let mut session = Session::new(request, block_size_proposal, timers, sink, source);
    let result = session.run(&transport).await;
    match &result {
        Ok(()) => journal::note("Transfer completed without errors."),
        Err(e) => {
            warn!(
                "{} transfer of {} failed: {}",
                request.direction.as_str(),
                request.filename,
                e
            );
            journal::note("Transfer didn't complete successfully!");
        }
    }
    result
}

struct Session<'a> {
    request: &'a TransferRequest,
    peer: Peer,
    next_send: NextSend,
    expected: ExpectedRecv,
    /// For reads: the last block number acknowledged. For writes: the block
    /// number of the DATA in flight (0 while the WRQ itself awaits its ACK).
    block_num: u16,
    binary: bool,
    block_size: usize,
    /// Block size the request proposed; the ceiling for an OACK reply.
    proposed_block_size: usize,
    tsize: u64,
    cur_size: u64,
    options_proposed: OptionList,
    options_confirmed: OptionList,
    send_buf: SendBuf,
    recv_buf: RecvBuf,
    /// Verbatim copy of the last transmitted datagram plus its journal text,
    /// for timer-driven and duplicate-driven retransmission.
    last_outbound: Vec<u8>,
    last_opcode: &'static str,
    last_details: String,
    retry: Duration,
    resend_deadline: Instant,
    hard_deadline: Instant,
    terminal: bool,
    failure: Option<TftpError>,
    /// The next request send is the option-rejection re-issue.
    reissued: bool,
    // read side
    decoder: Decoder,
    sink: Option<File>,
    data_accepted: bool,
    // write side
    encoder: Encoder,
    source: Vec<u8>,
    src_pos: usize,
    pending_payload: Vec<u8>,
    final_sent: bool,
}

impl<'a> Session<'a> {
    fn new(
        request: &'a TransferRequest,
        block_size_proposal: usize,
        timers: &TimerConfig,
        sink: Option<File>,
        source: Vec<u8>,
    ) -> Self {
        let binary = request.mode.is_binary();
        let tsize = match request.direction {
            Direction::Write => source.len() as u64,
            Direction::Read => 0,
        };

        let mut options_proposed = OptionList::new();
        if block_size_proposal != DEFAULT_BLOCK_SIZE {
            options_proposed.push("blksize", block_size_proposal.to_string());
        }
        if let Some(secs) = request.timeout_secs {
            options_proposed.push("timeout", secs.to_string());
        }
        // RFC 2349: transfer size is only meaningful without mode conversion.
        // A request with no other option stays a plain RFC 1350 request; once
        // negotiating anyway, the size comes along for free.
        if binary && !options_proposed.is_empty() {
            let value = match request.direction {
                Direction::Write => tsize.to_string(),
                Direction::Read => "0".to_string(),
            };
            options_proposed.push("tsize", value);
        }

        let now = Instant::now();
        Self {
            request,
            peer: Peer::new(request.server_ip, request.port),
            next_send: match request.direction {
                Direction::Read => NextSend::Rrq,
                Direction::Write => NextSend::Wrq,
            },
            expected: ExpectedRecv::Initial,
            block_num: 0,
            binary,
            block_size: DEFAULT_BLOCK_SIZE,
            proposed_block_size: block_size_proposal,
            tsize,
            cur_size: 0,
            options_proposed,
            options_confirmed: OptionList::new(),
            send_buf: SendBuf::new(),
            recv_buf: RecvBuf::new(),
            last_outbound: Vec::new(),
            last_opcode: "",
            last_details: String::new(),
            retry: Duration::from_secs(timers.retry_secs),
            resend_deadline: now,
            hard_deadline: now,
            terminal: false,
            failure: None,
            reissued: false,
            decoder: Decoder::new(binary),
            sink,
            data_accepted: false,
            encoder: Encoder::new(binary),
            source,
            src_pos: 0,
            pending_payload: Vec::new(),
            final_sent: false,
        }
    }

    async fn run(&mut self, transport: &Transport) -> Result<()> {
        loop {
            self.send_next(transport).await?;
            if self.terminal {
                return match self.failure.take() {
                    Some(e) => Err(e),
                    None => Ok(()),
                };
            }
            self.await_reply(transport).await?;
        }
    }

    // -- sending ------------------------------------------------------------

    async fn send_next(&mut self, transport: &Transport) -> Result<()> {
        let (opcode, details) = match &self.next_send {
            NextSend::Rrq | NextSend::Wrq => {
                let opcode = if self.next_send == NextSend::Rrq {
                    Opcode::Rrq
                } else {
                    Opcode::Wrq
                };
                wire::fill_request(
                    &mut self.send_buf,
                    opcode,
                    &self.request.filename,
                    self.request.mode.wire_name(),
                    &self.options_proposed,
                )?;
                let mut details = format!(
                    "file: {}, mode: {}",
                    self.request.filename,
                    self.request.mode.wire_name()
                );
                if !self.options_proposed.is_empty() {
                    details.push_str(&format!(", options: {}", self.options_proposed));
                } else if self.reissued {
                    details.push_str(", without options");
                }
                (opcode, details)
            }
            NextSend::Data => {
                wire::fill_data(&mut self.send_buf, self.block_num, &self.pending_payload)?;
                let details = self.data_details(self.block_num, self.pending_payload.len());
                (Opcode::Data, details)
            }
            NextSend::Ack => {
                wire::fill_ack(&mut self.send_buf, self.block_num)?;
                (Opcode::Ack, format!("block number {}", self.block_num))
            }
            NextSend::Error(code) => {
                wire::fill_error(&mut self.send_buf, *code, code.as_str())?;
                let details = format!("code: {}, msg: {}", *code as u16, code.as_str());
                (Opcode::Error, details)
            }
            NextSend::Nothing => return Ok(()),
        };

        transport
            .send_to(self.send_buf.as_slice(), self.peer.addr())
            .await?;

        let dir = if self.reissued { Dir::Resent } else { Dir::Sent };
        self.reissued = false;
        journal::datagram(dir, opcode.as_str(), self.peer.addr(), &details);

        self.last_outbound = self.send_buf.as_slice().to_vec();
        self.last_opcode = opcode.as_str();
        self.last_details = details;
        self.resend_deadline = Instant::now() + self.retry;
        Ok(())
    }

    async fn resend_last(&mut self, transport: &Transport) -> Result<()> {
        transport.send_to(&self.last_outbound, self.peer.addr()).await?;
        journal::datagram(Dir::Resent, self.last_opcode, self.peer.addr(), &self.last_details);
        self.resend_deadline = Instant::now() + self.retry;
        Ok(())
    }

    // -- receiving ----------------------------------------------------------

    /// Waits for one legal reply that advances the session. Retransmits the
    /// last datagram on each retry-timer expiry; fails on the hard deadline.
    async fn await_reply(&mut self, transport: &Transport) -> Result<()> {
        self.hard_deadline =
            Instant::now() + Duration::from_secs(hard_deadline_secs(self.retry.as_secs()));

        loop {
            let now = Instant::now();
            if now >= self.hard_deadline {
                return Err(TftpError::Timeout);
            }
            let wake = self.resend_deadline.min(self.hard_deadline);
            let wait = wake.saturating_duration_since(now);

            match transport.recv_from(&mut self.recv_buf, wait).await? {
                None => {
                    let now = Instant::now();
                    if now >= self.hard_deadline {
                        return Err(TftpError::Timeout);
                    }
                    if now >= self.resend_deadline {
                        self.resend_last(transport).await?;
                    }
                }
                Some((_, src)) => match self.peer.check_source(src) {
                    SourceCheck::ForeignAddress => {
                        warn!("ignoring datagram from unexpected host {}", src);
                    }
                    SourceCheck::UnknownTid(interloper) => {
                        // Answer the stray port without touching the session.
                        let mut scratch = SendBuf::with_capacity(64);
                        wire::fill_error(
                            &mut scratch,
                            ErrorCode::UnknownTransferId,
                            ErrorCode::UnknownTransferId.as_str(),
                        )?;
                        transport.send_to(scratch.as_slice(), interloper).await?;
                        journal::datagram(
                            Dir::Sent,
                            "ERROR",
                            interloper,
                            &format!(
                                "code: {}, msg: {}",
                                ErrorCode::UnknownTransferId as u16,
                                ErrorCode::UnknownTransferId.as_str()
                            ),
                        );
                    }
                    SourceCheck::Accepted => match self.process_datagram(transport).await? {
                        Step::Advance => return Ok(()),
                        Step::Stay => {}
                    },
                },
            }
        }
    }

    async fn process_datagram(&mut self, transport: &Transport) -> Result<Step> {
        let opcode_raw = match wire::read_opcode(&mut self.recv_buf) {
            Ok(op) => op,
            Err(e) => return Ok(self.violation(e.to_string())),
        };
        let Some(opcode) = Opcode::from_u16(opcode_raw) else {
            return Ok(self.violation(format!("unknown opcode {}", opcode_raw)));
        };

        match (opcode, self.expected, self.request.direction) {
            (Opcode::Error, _, _) => self.on_error(),
            (Opcode::Oack, ExpectedRecv::Initial, _) if !self.options_proposed.is_empty() => {
                self.on_oack()
            }
            (Opcode::Data, ExpectedRecv::Initial, Direction::Read) => {
                if !self.options_proposed.is_empty() {
                    debug!("server ignored the proposed options");
                    self.options_proposed.clear();
                }
                self.on_data(transport).await
            }
            (Opcode::Data, ExpectedRecv::Data, _) => self.on_data(transport).await,
            (Opcode::Ack, ExpectedRecv::Initial, Direction::Write) => {
                if !self.options_proposed.is_empty() {
                    debug!("server ignored the proposed options");
                    self.options_proposed.clear();
                }
                self.on_ack()
            }
            (Opcode::Ack, ExpectedRecv::Ack, _) => self.on_ack(),
            (opcode, expected, _) => Ok(self.violation(format!(
                "unexpected {} packet while awaiting {:?}",
                opcode.as_str(),
                expected
            ))),
        }
    }

    fn on_error(&mut self) -> Result<Step> {
        let (code, message) = match wire::parse_error(&mut self.recv_buf) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(self.violation(e.to_string())),
        };
        journal::datagram(
            Dir::Received,
            "ERROR",
            self.peer.addr(),
            &format!("code: {}, msg: {}", code, message),
        );

        // RFC 2347: a server that cannot live with the proposed options
        // answers error 8; the request is repeated without them. This is the
        // only path that forgets a learned TID.
        if code == ErrorCode::OptionNegotiationFailed as u16
            && self.expected == ExpectedRecv::Initial
            && !self.options_proposed.is_empty()
        {
            debug!("server rejected options, repeating the request without them");
            self.peer.reset_tid();
            self.options_proposed.clear();
            self.options_confirmed.clear();
            self.reissued = true;
            self.next_send = match self.request.direction {
                Direction::Read => NextSend::Rrq,
                Direction::Write => NextSend::Wrq,
            };
            return Ok(Step::Advance);
        }

        self.terminal = true;
        self.next_send = NextSend::Nothing;
        self.failure = Some(TftpError::Peer { code, message });
        Ok(Step::Advance)
    }

    fn on_oack(&mut self) -> Result<Step> {
        let oack = match wire::parse_oack(&mut self.recv_buf) {
            Ok(oack) => oack,
            Err(e) => return Ok(self.violation(e.to_string())),
        };
        if let Err(e) = wire::check_oack_against_proposed(&oack, &self.options_proposed) {
            return Ok(self.violation(e.to_string()));
        }
        journal::datagram(
            Dir::Received,
            "OACK",
            self.peer.addr(),
            &format!("options: {}", oack),
        );

        if let Some(value) = oack.get("blksize") {
            match value.parse::<usize>() {
                Ok(size) if (MIN_BLOCK_SIZE..=self.proposed_block_size).contains(&size) => {
                    self.block_size = size;
                    self.send_buf.ensure_capacity(size + HEADER_SIZE);
                    self.recv_buf.ensure_capacity(size + HEADER_SIZE);
                    debug!("negotiated block size {}", size);
                }
                _ => {
                    return Ok(self.violation(format!(
                        "OACK blksize '{}' outside 8..={}",
                        value, self.proposed_block_size
                    )));
                }
            }
        }
        if let Some(value) = oack.get("timeout") {
            // byte-exact echo already enforced, and the proposal was 1-255
            if let Ok(secs) = value.parse::<u64>() {
                self.retry = Duration::from_secs(secs);
                debug!("negotiated retransmit timeout {}s", secs);
            }
        }
        if let Some(value) = oack.get("tsize") {
            match self.request.direction {
                Direction::Read => match value.parse::<u64>() {
                    Ok(size) => {
                        self.tsize = size;
                        debug!("server reports transfer size {}", size);
                    }
                    Err(_) => {
                        return Ok(self.violation(format!("OACK tsize '{}' is not a number", value)));
                    }
                },
                // for a write the server just echoes the size we measured
                Direction::Write => {}
            }
        }
        self.options_confirmed = oack;

        match self.request.direction {
            Direction::Read => {
                // acknowledge the OACK with ACK 0 and wait for the first block
                self.block_num = 0;
                self.next_send = NextSend::Ack;
                self.expected = ExpectedRecv::Data;
            }
            Direction::Write => {
                self.block_num = 1;
                self.build_next_data();
            }
        }
        Ok(Step::Advance)
    }

    async fn on_data(&mut self, transport: &Transport) -> Result<Step> {
        let block = match wire::parse_data(&mut self.recv_buf) {
            Ok(block) => block,
            Err(e) => return Ok(self.violation(e.to_string())),
        };
        let payload_len = self.recv_buf.rest().len();
        if payload_len > self.block_size {
            return Ok(self.violation(format!(
                "DATA payload of {} bytes exceeds block size {}",
                payload_len, self.block_size
            )));
        }

        let expected_block = self.block_num.wrapping_add(1);
        if block == expected_block {
            self.cur_size += payload_len as u64;
            let details = self.data_details(block, payload_len);
            journal::datagram(Dir::Received, "DATA", self.peer.addr(), &details);

            let mut local = Vec::with_capacity(payload_len + 1);
            if let Err(e) = self.decoder.decode_block(self.recv_buf.rest(), &mut local) {
                self.cur_size -= payload_len as u64;
                return Ok(self.violation(e.to_string()));
            }
            if let Some(sink) = self.sink.as_mut() {
                sink.write_all(&local).await?;
            }

            self.block_num = block;
            self.data_accepted = true;
            self.next_send = NextSend::Ack;
            self.expected = ExpectedRecv::Data;

            if payload_len < self.block_size {
                // final block: resolve any dangling CR, flush, then the ACK
                // below closes the session
                if let Err(e) = self.decoder.finish() {
                    return Ok(self.violation(e.to_string()));
                }
                if let Some(sink) = self.sink.as_mut() {
                    sink.flush().await?;
                }
                self.terminal = true;
            }
            Ok(Step::Advance)
        } else if self.data_accepted && block == self.block_num {
            // retransmitted block: repeat the matching ACK, take nothing
            journal::datagram(
                Dir::Received,
                "DATA",
                self.peer.addr(),
                &format!("block number {}, {} bytes (duplicate)", block, payload_len),
            );
            self.resend_last(transport).await?;
            Ok(Step::Stay)
        } else {
            Ok(self.violation(format!(
                "DATA block {} while awaiting block {}",
                block, expected_block
            )))
        }
    }

    fn on_ack(&mut self) -> Result<Step> {
        let block = match wire::parse_ack(&mut self.recv_buf) {
            Ok(block) => block,
            Err(e) => return Ok(self.violation(e.to_string())),
        };

        if block == self.block_num {
            journal::datagram(
                Dir::Received,
                "ACK",
                self.peer.addr(),
                &format!("block number {}", block),
            );

            if self.expected == ExpectedRecv::Initial {
                // the WRQ itself was acknowledged; start with block 1
                self.block_num = 1;
                self.build_next_data();
                return Ok(Step::Advance);
            }
            if self.final_sent {
                self.terminal = true;
                self.next_send = NextSend::Nothing;
                return Ok(Step::Advance);
            }
            self.block_num = self.block_num.wrapping_add(1);
            self.build_next_data();
            Ok(Step::Advance)
        } else if self.expected != ExpectedRecv::Initial && block == self.block_num.wrapping_sub(1) {
            // stale ACK: never re-send here, the retry timer owns that
            journal::datagram(
                Dir::Received,
                "ACK",
                self.peer.addr(),
                &format!("block number {} (duplicate)", block),
            );
            Ok(Step::Stay)
        } else {
            Ok(self.violation(format!(
                "ACK for block {} while awaiting block {}",
                block, self.block_num
            )))
        }
    }

    // -- helpers ------------------------------------------------------------

    /// Pulls the next outbound payload through the netascii encoder and
    /// decides whether it is the final block.
    fn build_next_data(&mut self) {
        self.pending_payload =
            self.encoder
                .encode_block(&self.source, &mut self.src_pos, self.block_size);
        self.final_sent = self.pending_payload.len() < self.block_size;
        self.cur_size += self.pending_payload.len() as u64;
        self.next_send = NextSend::Data;
        self.expected = ExpectedRecv::Ack;
    }

    fn data_details(&self, block: u16, payload_len: usize) -> String {
        let mut details = format!("block number {}, {} bytes", block, payload_len);
        if self.binary && self.tsize > 0 {
            details.push_str(&format!(" (total {}/{})", self.cur_size, self.tsize));
        }
        details
    }

    /// Protocol violation: answer ERROR 4 and stop.
    fn violation(&mut self, detail: String) -> Step {
        warn!("protocol violation: {}", detail);
        self.next_send = NextSend::Error(ErrorCode::IllegalOperation);
        self.terminal = true;
        self.failure = Some(TftpError::Protocol(detail));
        Step::Advance
    }
}
