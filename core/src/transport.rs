//! Blocking HTTP/1.1 transport over TCP, optionally wrapped in rustls.
//!
//! # Design
//! `execute` encodes and checks the request head, opens the socket, drives
//! the TLS handshake to completion with the requested trust policy already
//! installed, writes the head and body, then reads the response head. A
//! malformed header field or a connect-phase fault is returned as `Err`;
//! from the first written byte onwards every fault is recorded on the
//! `ResponseRecord` and the caller still receives the `Connection`, so the
//! reader can salvage whatever the server sent.
//!
//! The `Connection` is owned by exactly one execution attempt and is closed
//! by `Connection::close`, which `reader::read` always calls.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Shutdown, TcpStream};
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, StreamOwned};
use url::{Host, Position, Url};

use crate::descriptor::RequestDescriptor;
use crate::error::RequestError;
use crate::http::{self, HeaderList, ResponseHeaders, ResponseRecord};
use crate::tls::TrustPolicy;

/// Upper bound on the size of a response head.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Per-attempt settings resolved from the descriptor and the client
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSettings {
    pub trust_policy: TrustPolicy,
    /// `User-Agent` value, or `None` to stay anonymous.
    pub user_agent: Option<String>,
    /// Decode `Content-Encoding: deflate` instead of passing it through.
    pub decode_deflate: bool,
}

pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.read(buf),
            Stream::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.write(buf),
            Stream::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(tcp) => tcp.flush(),
            Stream::Tls(tls) => tls.flush(),
        }
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: ResponseHeaders,
}

impl ResponseHead {
    /// Last value of a header; later values win for single-valued headers.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.last())
            .map(String::as_str)
    }
}

/// A live connection with its response head, if one was received.
pub struct Connection {
    reader: BufReader<Stream>,
    head: Option<ResponseHead>,
}

impl Connection {
    pub fn head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.reader.get_ref(), Stream::Tls(_))
    }

    pub(crate) fn tls_session(&self) -> Option<&ClientConnection> {
        match self.reader.get_ref() {
            Stream::Tls(tls) => Some(&tls.conn),
            Stream::Plain(_) => None,
        }
    }

    pub(crate) fn body_reader(&mut self) -> &mut BufReader<Stream> {
        &mut self.reader
    }

    /// Send `close_notify` for TLS and shut the socket down. Errors are
    /// ignored: the peer may already be gone.
    pub fn close(self) {
        match self.reader.into_inner() {
            Stream::Plain(tcp) => {
                let _ = tcp.shutdown(Shutdown::Both);
            }
            Stream::Tls(mut tls) => {
                tls.conn.send_close_notify();
                while tls.conn.wants_write() {
                    if tls.conn.write_tls(&mut tls.sock).is_err() {
                        break;
                    }
                }
                let _ = tls.sock.shutdown(Shutdown::Both);
            }
        }
    }
}

/// Open the connection, send the request and read the response head.
pub fn execute(
    descriptor: &RequestDescriptor,
    settings: &ExecutionSettings,
) -> Result<(Connection, ResponseRecord), RequestError> {
    let url = descriptor.url();
    tracing::debug!(
        id = %descriptor.id(),
        method = %descriptor.method(),
        url = %url,
        "executing request"
    );
    let mut record = ResponseRecord::new(url.as_str());

    let payload = payload(descriptor);
    let head = encode_head(descriptor, settings, payload.len())?;

    let tcp = connect(url, descriptor.connect_timeout())?;
    tcp.set_read_timeout(Some(descriptor.read_timeout()))?;
    let _ = tcp.set_nodelay(true);

    let stream = if descriptor.is_tls() {
        Stream::Tls(Box::new(handshake(tcp, url, &settings.trust_policy)?))
    } else {
        Stream::Plain(tcp)
    };
    let mut reader = BufReader::new(stream);

    if let Err(err) = write_request(reader.get_mut(), head.as_bytes(), payload) {
        tracing::warn!(id = %descriptor.id(), error = %err, "request write failed");
        record.record_failure(RequestError::transport("write request", err));
    }

    let head = match read_head(&mut reader) {
        Ok(head) => Some(head),
        Err(err) => {
            tracing::warn!(id = %descriptor.id(), error = %err, "no response head");
            record.record_failure(RequestError::transport("read response head", err));
            None
        }
    };

    Ok((Connection { reader, head }, record))
}

fn connect(url: &Url, timeout: Duration) -> Result<TcpStream, RequestError> {
    let host = url.host_str().unwrap_or_default();
    let addrs = url
        .socket_addrs(|| None)
        .map_err(|e| RequestError::Connect(format!("resolve {host}: {e}")))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(err) => {
                tracing::debug!(%addr, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(err) if err.kind() == io::ErrorKind::TimedOut => Err(RequestError::ConnectTimeout(timeout)),
        Some(err) => Err(RequestError::Connect(format!("{host}: {err}"))),
        None => Err(RequestError::Connect(format!("{host}: no addresses resolved"))),
    }
}

fn server_name(url: &Url) -> Result<ServerName<'static>, RequestError> {
    match url.host() {
        Some(Host::Domain(domain)) => ServerName::try_from(domain.to_string())
            .map_err(|e| RequestError::transport("tls server name", e)),
        Some(Host::Ipv4(ip)) => Ok(ServerName::from(IpAddr::V4(ip))),
        Some(Host::Ipv6(ip)) => Ok(ServerName::from(IpAddr::V6(ip))),
        None => Err(RequestError::Validation(format!("missing host in {url}"))),
    }
}

/// The trust policy is part of the config the session is created from, so
/// it is in force before the first ClientHello byte.
fn handshake(
    mut tcp: TcpStream,
    url: &Url,
    policy: &TrustPolicy,
) -> Result<StreamOwned<ClientConnection, TcpStream>, RequestError> {
    let config = policy.client_config()?;
    let mut session = ClientConnection::new(config, server_name(url)?)
        .map_err(|e| RequestError::transport("tls setup", e))?;
    while session.is_handshaking() {
        session
            .complete_io(&mut tcp)
            .map_err(|e| RequestError::transport("tls handshake", e))?;
    }
    Ok(StreamOwned::new(session, tcp))
}

/// Bytes to transmit after the head. GET and DELETE never carry a body.
fn payload(descriptor: &RequestDescriptor) -> &[u8] {
    if descriptor.method().sends_body() && descriptor.writes_body() {
        descriptor.body().as_bytes()
    } else {
        &[]
    }
}

/// Header set in wire order. Descriptor headers replace same-named standard
/// headers; `Content-Length` always reflects the payload actually sent.
pub(crate) fn request_headers(
    descriptor: &RequestDescriptor,
    settings: &ExecutionSettings,
    content_length: usize,
) -> HeaderList {
    let url = descriptor.url();
    let mut headers = HeaderList::new();
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => headers.set("Host", format!("{host}:{port}")),
        None => headers.set("Host", host),
    }
    headers.set("Accept-Encoding", "gzip, deflate");
    headers.set("Connection", "keep-alive");
    headers.set("Accept", "*/*");
    if let Some(agent) = &settings.user_agent {
        headers.set("User-Agent", agent.as_str());
    }
    if let Some(content_type) = descriptor.content_type() {
        headers.set("Content-Type", content_type.as_str());
    }
    for (name, value) in descriptor.headers().iter() {
        headers.set(name, value);
    }
    if descriptor.method().sends_body() {
        headers.set("Content-Length", content_length.to_string());
    }
    headers
}

/// Every field is checked, the user agent from the environment included.
pub(crate) fn encode_head(
    descriptor: &RequestDescriptor,
    settings: &ExecutionSettings,
    content_length: usize,
) -> Result<String, RequestError> {
    let url = descriptor.url();
    let target = &url[Position::BeforePath..Position::AfterQuery];
    let mut head = format!("{} {} HTTP/1.1\r\n", descriptor.method(), target);
    for (name, value) in request_headers(descriptor, settings, content_length).iter() {
        http::check_header(name, value)?;
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    Ok(head)
}

fn write_request(stream: &mut Stream, head: &[u8], payload: &[u8]) -> io::Result<()> {
    stream.write_all(head)?;
    if !payload.is_empty() {
        stream.write_all(payload)?;
    }
    stream.flush()
}

/// Read one line of the head, without its terminator.
fn read_head_line<R: BufRead>(reader: &mut R, budget: &mut usize) -> io::Result<String> {
    let mut line = Vec::new();
    let n = reader.by_ref().take(*budget as u64 + 1).read_until(b'\n', &mut line)?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before response head",
        ));
    }
    if n > *budget {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "response head too large"));
    }
    *budget -= n;
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Read the status line and headers, skipping interim `1xx` responses.
pub(crate) fn read_head<R: BufRead>(reader: &mut R) -> io::Result<ResponseHead> {
    let mut budget = MAX_HEAD_BYTES;
    loop {
        let status_line = read_head_line(reader, &mut budget)?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed status line: {status_line:?}"),
            ));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|code| (100..1000).contains(code))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("malformed status code: {status_line:?}"),
                )
            })?;
        let reason = parts.next().unwrap_or_default().trim().to_string();

        let mut headers = ResponseHeaders::new();
        loop {
            let line = read_head_line(reader, &mut budget)?;
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers
                    .entry(name.trim().to_ascii_lowercase())
                    .or_default()
                    .push(value.trim().to_string());
            }
        }

        if (100..200).contains(&status) && status != 101 {
            continue;
        }
        return Ok(ResponseHead {
            status,
            reason,
            headers,
        });
    }
}
