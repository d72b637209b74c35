//! Minimal TCP request helper for `aptaskd`'s integration tests.
//!
//! Plays the part of a CLI client talking to the daemon: it exists purely
//! as test tooling, never installed alongside `aptaskd`/`aptask-worker`.

use serde_json::Value;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};

/// Connects to `host:port`, writes `body`, half-closes the write side so
/// the daemon's frontend sees EOF, and parses the full response as JSON.
pub fn request(host: &str, port: u16, body: &str) -> std::io::Result<Value> {
    let mut stream = TcpStream::connect((host, port))?;
    stream.write_all(body.as_bytes())?;
    stream.shutdown(Shutdown::Write)?;

    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    serde_json::from_str(&response)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
