//! The interactive console: prompt, tokenizer, and per-line dispatch.
//!
//! `help` and `quit` are commands of their own; anything else is parsed as a
//! transfer request. A failed transfer reports its outcome and the shell
//! keeps running; only `quit` or end of input ends it.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::request::TransferRequest;
use crate::session;

const HELP_TEXT: &str = "\
Commands:
  help                      show this text
  quit                      leave the shell
  -R|-W -d /path [options]  transfer a file

Transfer flags:
  -R                 read the file from the server
  -W                 write the file to the server
  -d /path/to/file   file as named on the server (absolute path);
                     locally the last path segment in the current directory
  -t N               propose a retransmission timeout of N seconds (1-255)
  -s N               propose a block size of N bytes (8-65464)
  -c MODE            transfer mode: ascii|netascii or binary|octet
  -a ADDR[,PORT]     server IPv4 or IPv6 address, optional port (default 69)
  -m                 accepted for compatibility, has no effect";

/// Runs the console until `quit` or end of input. Returns an error only for
/// unrecoverable I/O on the console itself.
pub async fn run(config: &ClientConfig) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break; // EOF
        };
        if !dispatch(&line, config).await {
            break;
        }
    }
    Ok(())
}

/// Handles one console line. Returns false when the shell should exit.
async fn dispatch(line: &str, config: &ClientConfig) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&first) = tokens.first() else {
        return true;
    };

    match first.to_lowercase().as_str() {
        "help" => {
            if tokens.len() == 1 {
                println!("{}", HELP_TEXT);
            } else {
                eprintln!("help cannot be combined with other options");
            }
            true
        }
        "quit" => {
            if tokens.len() == 1 {
                false
            } else {
                eprintln!("quit cannot be combined with other options");
                true
            }
        }
        _ => {
            transfer(&tokens, config).await;
            true
        }
    }
}

async fn transfer(tokens: &[&str], config: &ClientConfig) {
    let request = match TransferRequest::parse(tokens, &config.defaults) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{}", e);
            return;
        }
    };

    if request.multicast {
        warn!("-m accepted but multicast is not supported; transferring unicast");
    }

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("cannot determine working directory: {}", e);
            return;
        }
    };

    // outcome goes to the journal; a failed transfer never ends the shell
    let _ = session::communicate(&request, &config.timers, &cwd).await;
}
