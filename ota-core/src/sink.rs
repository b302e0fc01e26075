// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Thin adapters that feed bytes from HTTP into a [`FirmwareManager`]: a
//! push-style upload sink for server-pushed bodies, and a pull-style sink
//! that parses a URL, resolves it, opens a connection, and drives the GET
//! itself. Neither sink owns the transport; `DnsResolver` and
//! `TcpConnector` are supplied by the caller so the state machine here is
//! exercisable under `std` with fakes.

use embedded_io::{Read, Write};

use crate::error::{ManagerError, SinkError};
use crate::flash::FlashDevice;
use crate::manager::FirmwareManager;

const DEFAULT_HTTP_PORT: u16 = 80;
const HEADER_BUF_SIZE: usize = 512;
const BODY_CHUNK_SIZE: usize = 512;

/// An IPv4 address as resolved by a [`DnsResolver`]. Kept as raw octets
/// rather than pulling in a socket-address type so this module stays
/// usable from a `no_std` target without committing to one network stack.
pub type Ipv4Addr = [u8; 4];

/// Resolves a hostname to an address. Implemented by the network stack
/// integration; faked in tests.
pub trait DnsResolver {
    fn resolve(&mut self, host: &str) -> Result<Ipv4Addr, SinkError>;
}

/// Opens a TCP connection to a resolved address. The returned connection
/// must support blocking reads and writes.
pub trait TcpConnector {
    type Connection: Read + Write;

    fn connect(&mut self, addr: Ipv4Addr, port: u16) -> Result<Self::Connection, SinkError>;
}

/// `http://host[:port]/path` split into its parts. Borrows from the input
/// URL; no allocation.
#[derive(Debug, PartialEq, Eq)]
pub struct UrlParts<'u> {
    pub host: &'u str,
    pub port: u16,
    pub path: &'u str,
}

/// Parses `http://host[:port]/path`. Any other scheme is rejected. A
/// missing path defaults to `/`; a missing port defaults to 80.
pub fn parse_url(url: &str) -> Result<UrlParts<'_>, SinkError> {
    let rest = url.strip_prefix("http://").ok_or(SinkError::BadUrl)?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(SinkError::BadUrl);
    }
    let (host, port) = match authority.split_once(':') {
        Some((h, p)) => {
            let port: u16 = p.parse().map_err(|_| SinkError::BadUrl)?;
            (h, port)
        }
        None => (authority, DEFAULT_HTTP_PORT),
    };
    if host.is_empty() {
        return Err(SinkError::BadUrl);
    }
    Ok(UrlParts { host, port, path })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Case-insensitive search for a `name: value` header, returning the
/// trimmed value.
fn find_header_value<'h>(headers: &'h str, name: &str) -> Option<&'h str> {
    for line in headers.split("\r\n") {
        if let Some((key, value)) = line.split_once(':') {
            if key.eq_ignore_ascii_case(name) {
                return Some(value.trim());
            }
        }
    }
    None
}

fn parse_status_ok(status_line: &str) -> bool {
    status_line.starts_with("HTTP/1.") && status_line.contains(" 200 ")
}

/// Reads from `conn` until the header terminator, returning the parsed
/// `Content-Length` and whatever body bytes arrived in the same read as
/// the terminator (copied into `spill`, which must be at least as large
/// as `HEADER_BUF_SIZE`).
fn read_headers<C: Read>(
    conn: &mut C,
    spill: &mut [u8; BODY_CHUNK_SIZE.max(HEADER_BUF_SIZE)],
) -> Result<(u32, usize), SinkError> {
    let mut buf = [0u8; HEADER_BUF_SIZE];
    let mut total = 0usize;
    let header_end = loop {
        let n = conn.read(&mut buf[total..]).map_err(|_| SinkError::Connection)?;
        if n == 0 {
            return Err(SinkError::BadResponse);
        }
        total += n;
        if let Some(end) = find_header_end(&buf[..total]) {
            break end;
        }
        if total == buf.len() {
            return Err(SinkError::BadResponse);
        }
    };

    let text = core::str::from_utf8(&buf[..header_end]).map_err(|_| SinkError::BadResponse)?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().ok_or(SinkError::BadResponse)?;
    if !parse_status_ok(status_line) {
        return Err(SinkError::BadResponse);
    }

    let content_length = find_header_value(text, "Content-Length")
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or(SinkError::MissingContentLength)?;

    let spill_len = total - header_end;
    spill[..spill_len].copy_from_slice(&buf[header_end..total]);
    Ok((content_length, spill_len))
}

/// Push-style sink: the caller already has an open connection or HTTP
/// server handler and simply forwards header/body/close events as they
/// arrive. Used by a `POST upload` handler.
pub struct UploadSink<'a, 'm, F> {
    manager: &'m mut FirmwareManager<'a, F>,
}

impl<'a, 'm, F: FlashDevice> UploadSink<'a, 'm, F> {
    pub fn new(manager: &'m mut FirmwareManager<'a, F>) -> Self {
        UploadSink { manager }
    }

    /// Called once `Content-Length` (and optionally a version string) is
    /// known, before any body bytes arrive.
    pub fn on_headers(&mut self, content_length: u32, version: Option<&str>) -> Result<(), SinkError> {
        self.manager.start_update(content_length, version)?;
        Ok(())
    }

    /// Forwards a chunk of the request body.
    pub fn on_body(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.manager.write_chunk(data)?;
        Ok(())
    }

    /// Called on a clean connection close, with the CRC32 the caller
    /// expects (from a trailer or out-of-band field).
    pub fn on_complete(&mut self, expected_crc32: u32) -> Result<(), SinkError> {
        self.manager.finalize_update(expected_crc32)?;
        Ok(())
    }

    /// Called on any lower-layer transport error.
    pub fn on_error(&mut self) -> Result<(), SinkError> {
        match self.manager.cancel_update() {
            Ok(()) | Err(ManagerError::WrongState) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// `GET firmware_download?url=...` state, mirrored 1:1 against the
/// download sink's state machine so a status endpoint can report exactly
/// where a pull is stuck.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    ParsingUrl,
    ResolvingDns,
    Connecting,
    SendingRequest,
    ReceivingHeaders,
    ReceivingBody,
    Validating,
    Complete,
    Error,
}

/// Pull-style sink: parses a URL, resolves it, opens the connection, and
/// drives the whole GET + stream-to-flash sequence itself.
pub struct UrlPullSink<'a, 'm, F, D, T> {
    manager: &'m mut FirmwareManager<'a, F>,
    dns: D,
    tcp: T,
    state: DownloadState,
}

impl<'a, 'm, F, D, T> UrlPullSink<'a, 'm, F, D, T>
where
    F: FlashDevice,
    D: DnsResolver,
    T: TcpConnector,
{
    pub fn new(manager: &'m mut FirmwareManager<'a, F>, dns: D, tcp: T) -> Self {
        UrlPullSink { manager, dns, tcp, state: DownloadState::Idle }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    fn fail(&mut self) {
        self.state = DownloadState::Error;
        // Best effort: the target bank may already be partway erased or
        // written; cancel_update leaves it for the next start_update to
        // re-erase rather than trying to unwind it here.
        let _ = self.manager.cancel_update();
    }

    /// Downloads `url`, streaming the body into the firmware manager, and
    /// validates it against `expected_crc32` once complete.
    pub fn run(
        &mut self,
        url: &str,
        expected_crc32: u32,
        expected_version: Option<&str>,
    ) -> Result<(), SinkError> {
        self.state = DownloadState::ParsingUrl;
        let parts = match parse_url(url) {
            Ok(p) => p,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };

        self.state = DownloadState::ResolvingDns;
        let addr = match self.dns.resolve(parts.host) {
            Ok(a) => a,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };

        self.state = DownloadState::Connecting;
        let mut conn = match self.tcp.connect(addr, parts.port) {
            Ok(c) => c,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };

        self.state = DownloadState::SendingRequest;
        if let Err(e) = send_request(&mut conn, parts.host, parts.path) {
            self.fail();
            return Err(e);
        }

        self.state = DownloadState::ReceivingHeaders;
        let mut spill = [0u8; BODY_CHUNK_SIZE.max(HEADER_BUF_SIZE)];
        let (content_length, spill_len) = match read_headers(&mut conn, &mut spill) {
            Ok(v) => v,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };

        if let Err(e) = self.manager.start_update(content_length, expected_version) {
            self.state = DownloadState::Error;
            return Err(e.into());
        }

        self.state = DownloadState::ReceivingBody;
        if spill_len > 0 {
            if let Err(e) = self.manager.write_chunk(&spill[..spill_len]) {
                self.state = DownloadState::Error;
                return Err(e.into());
            }
        }

        let mut buf = [0u8; BODY_CHUNK_SIZE];
        loop {
            let n = match conn.read(&mut buf) {
                Ok(n) => n,
                Err(_) => {
                    self.fail();
                    return Err(SinkError::Connection);
                }
            };
            if n == 0 {
                break;
            }
            if let Err(e) = self.manager.write_chunk(&buf[..n]) {
                self.state = DownloadState::Error;
                return Err(e.into());
            }
        }

        self.state = DownloadState::Validating;
        if let Err(e) = self.manager.finalize_update(expected_crc32) {
            self.state = DownloadState::Error;
            return Err(e.into());
        }

        self.state = DownloadState::Complete;
        Ok(())
    }
}

fn send_request<C: Write>(conn: &mut C, host: &str, path: &str) -> Result<(), SinkError> {
    conn.write_all(b"GET ").map_err(|_| SinkError::Connection)?;
    conn.write_all(path.as_bytes()).map_err(|_| SinkError::Connection)?;
    conn.write_all(b" HTTP/1.1\r\nHost: ").map_err(|_| SinkError::Connection)?;
    conn.write_all(host.as_bytes()).map_err(|_| SinkError::Connection)?;
    conn.write_all(b"\r\nConnection: close\r\n\r\n").map_err(|_| SinkError::Connection)?;
    Ok(())
}
