//! Thin control-channel client behind the status/get/sources/persist/stop
//! subcommands.
//!
//! Exit code convention: 0 when the daemon replied `OK`, non-zero on a
//! connection failure or an `ERR` reply.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::process::ExitCode;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

fn exchange(port: u16, command: &str) -> std::io::Result<(String, BufReader<TcpStream>)> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    stream.set_read_timeout(Some(REPLY_TIMEOUT))?;

    stream.write_all(command.as_bytes())?;
    stream.write_all(b"\n")?;

    let mut reader = BufReader::new(stream);
    let mut header = String::new();
    reader.read_line(&mut header)?;
    Ok((header.trim_end().to_string(), reader))
}

/// Send a one-line command and print the daemon's reply verbatim.
pub fn simple(port: u16, command: &str) -> ExitCode {
    match exchange(port, command) {
        Ok((header, mut reader)) => {
            println!("{header}");
            // Multi-line replies (sources) carry extra lines after the header.
            let mut rest = String::new();
            if reader.read_to_string(&mut rest).is_ok() && !rest.is_empty() {
                print!("{rest}");
            }
            if header.starts_with("OK") {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("entropyd: cannot reach daemon on port {port}: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Withdraw entropy: header goes to stderr, the payload to stdout (raw, or
/// hex with `--hex`).
pub fn get(port: u16, n: usize, hex: bool) -> ExitCode {
    let (header, mut reader) = match exchange(port, &format!("getentropy {n}")) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("entropyd: cannot reach daemon on port {port}: {e}");
            return ExitCode::FAILURE;
        }
    };
    if !header.starts_with("OK") {
        eprintln!("{header}");
        return ExitCode::FAILURE;
    }

    let count = header_field(&header, "bytes=").unwrap_or(0);
    let mut payload = vec![0u8; count];
    if let Err(e) = reader.read_exact(&mut payload) {
        eprintln!("entropyd: short entropy payload: {e}");
        return ExitCode::FAILURE;
    }

    eprintln!("{header}");
    if hex {
        let encoded: String = payload.iter().map(|b| format!("{b:02x}")).collect();
        println!("{encoded}");
    } else {
        let mut stdout = std::io::stdout().lock();
        if stdout.write_all(&payload).and_then(|()| stdout.flush()).is_err() {
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn header_field(header: &str, key: &str) -> Option<usize> {
    header
        .split_whitespace()
        .find_map(|word| word.strip_prefix(key))
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_field_extracts_counts() {
        let header = "OK bytes=500 bits=400";
        assert_eq!(header_field(header, "bytes="), Some(500));
        assert_eq!(header_field(header, "bits="), Some(400));
        assert_eq!(header_field(header, "chunks="), None);
    }

    #[test]
    fn header_field_ignores_clamp_note() {
        let header = "OK bytes=16777216 bits=0 clamped=16777216";
        assert_eq!(header_field(header, "bytes="), Some(16777216));
    }
}
