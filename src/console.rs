//! Console bridge between the radio link and the terminal.
//!
//! Packet traffic is printed to stdout in the same shape as the reference
//! demo: `<== from to rssi payload` for received packets, `==> payload` for
//! transmissions, and bare status tags for send-path outcomes. Input is
//! read from stdin, which the main program switches to non-blocking at
//! startup so an empty console never stalls the polling loop.

use log::warn;
use std::io::{self, Read};

/// I/O seam for the main loop. The real implementation talks to
/// stdin/stdout; tests script input and record display calls.
pub trait Console {
    /// Attempts a non-blocking read of up to `max_len` bytes from the
    /// console. `None` means nothing was available (or end of input).
    fn try_read_line(&mut self, max_len: usize) -> Option<Vec<u8>>;

    fn display_received(&mut self, from: u8, to: u8, rssi: i16, payload: &[u8]);
    fn display_sent(&mut self, payload: &[u8]);
    fn display_status(&mut self, tag: &str);
}

/// Switches stdin to non-blocking mode so `try_read_line` polls instead of
/// waiting for the user.
pub fn set_stdin_nonblocking() -> io::Result<()> {
    let flags = unsafe { libc::fcntl(libc::STDIN_FILENO, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let result = unsafe { libc::fcntl(libc::STDIN_FILENO, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Console bridge over the process's stdin/stdout.
#[derive(Default)]
pub struct StdioConsole;

impl StdioConsole {
    pub fn new() -> Self {
        Self
    }
}

/// Reads at most `max_len` bytes from `input`. Longer console lines are
/// truncated here; the remainder is picked up by a later read.
fn read_bounded(input: &mut impl Read, max_len: usize) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; max_len];
    match input.read(&mut buf) {
        Ok(0) => None,
        Ok(len) => {
            buf.truncate(len);
            // Strip the newline the terminal appends; packets carry raw bytes.
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            Some(buf)
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
        Err(err) => {
            warn!("console read failed: {err}");
            None
        }
    }
}

fn format_payload(payload: &[u8]) -> String {
    payload
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Console for StdioConsole {
    fn try_read_line(&mut self, max_len: usize) -> Option<Vec<u8>> {
        read_bounded(&mut io::stdin().lock(), max_len)
    }

    fn display_received(&mut self, from: u8, to: u8, rssi: i16, payload: &[u8]) {
        println!("<== {from}\t{to}\t{rssi}dB\t{}", format_payload(payload));
    }

    fn display_sent(&mut self, payload: &[u8]) {
        println!("==> {}", format_payload(payload));
    }

    fn display_status(&mut self, tag: &str) {
        println!("{tag}");
    }
}
