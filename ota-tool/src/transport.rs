// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Line-based transport over the device's USB CDC console.
//!
//! Every command the device accepts produces zero or more response lines
//! followed by a fixed `--END--` sentinel; `command` collects everything up
//! to that sentinel as one reply.

use std::io::{Read, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
const END_SENTINEL: &str = "--END--";

/// USB CDC transport for the firmware console.
pub struct Transport {
    port: Box<dyn serialport::SerialPort>,
    rx_buf: Vec<u8>,
}

impl Transport {
    pub fn new(port_name: &str) -> Result<Self> {
        Self::with_timeout(port_name, DEFAULT_TIMEOUT_MS)
    }

    pub fn with_timeout(port_name: &str, timeout_ms: u64) -> Result<Self> {
        let port = serialport::new(port_name, 115200)
            .timeout(Duration::from_millis(timeout_ms))
            .open()
            .with_context(|| format!("Failed to open serial port {}", port_name))?;

        Ok(Self {
            port,
            rx_buf: Vec::with_capacity(4096),
        })
    }

    pub fn port_name(&self) -> String {
        self.port.name().unwrap_or_else(|| "?".to_string())
    }

    /// Send one line (the device echoes it back; `command` discards the echo).
    fn send_line(&mut self, line: &str) -> Result<()> {
        self.port
            .write_all(line.as_bytes())
            .and_then(|_| self.port.write_all(b"\r\n"))
            .map_err(|e| anyhow::anyhow!("failed to write to serial port: {e}"))?;
        self.port.flush()?;
        Ok(())
    }

    /// Read until the `--END--` sentinel line, returning every line before it.
    fn read_response(&mut self) -> Result<Vec<String>> {
        self.rx_buf.clear();
        let mut byte = [0u8; 1];
        let mut lines = Vec::new();

        loop {
            match self.port.read(&mut byte) {
                Ok(1) => {
                    if byte[0] == b'\n' {
                        let line = String::from_utf8_lossy(&self.rx_buf).trim().to_string();
                        self.rx_buf.clear();
                        if line == END_SENTINEL {
                            return Ok(lines);
                        }
                        if !line.is_empty() {
                            lines.push(line);
                        }
                    } else if byte[0] != b'\r' {
                        self.rx_buf.push(byte[0]);
                    }
                }
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    bail!("timeout waiting for device response");
                }
                Err(e) => bail!("serial read error: {e}"),
            }
        }
    }

    fn drain_rx(&mut self) {
        let mut buf = [0u8; 64];
        let old_timeout = self.port.timeout();
        let _ = self.port.set_timeout(Duration::from_millis(10));
        while self.port.read(&mut buf).unwrap_or(0) > 0 {}
        let _ = self.port.set_timeout(old_timeout);
    }

    /// Send `line` and collect the device's response lines.
    pub fn command(&mut self, line: &str) -> Result<Vec<String>> {
        self.send_line(line)?;
        self.read_response()
    }

    /// Same as [`Transport::command`] but with a custom timeout, for commands
    /// whose device-side work (bank erase) can run well past the default.
    pub fn command_timeout(&mut self, line: &str, timeout_ms: u64) -> Result<Vec<String>> {
        let old_timeout = self.port.timeout();
        self.port
            .set_timeout(Duration::from_millis(timeout_ms))
            .map_err(|e| anyhow::anyhow!("failed to set timeout: {e}"))?;
        let result = self.command(line);
        let _ = self.port.set_timeout(old_timeout);
        result
    }

    /// Drop any pending input, then greet the console to sync framing
    /// (the very first line after device boot may be banner text, not a
    /// response to any command we sent).
    pub fn sync(&mut self) -> Result<()> {
        self.drain_rx();
        Ok(())
    }
}
