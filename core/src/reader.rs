//! Response body reading: framing, content decoding and text assembly.
//!
//! # Design
//! Framing (`Content-Length`, chunked, read-to-close) is undone first, then
//! the content encoding, then the bytes are decoded as UTF-8 line by line.
//! TLS metadata is captured opportunistically; its absence never counts as
//! a failure.

use std::io::{self, BufRead, BufReader, Read};

use flate2::read::{GzDecoder, ZlibDecoder};

use crate::descriptor::RequestDescriptor;
use crate::error::RequestError;
use crate::http::ResponseRecord;
use crate::tls;
use crate::transport::{Connection, ExecutionSettings, ResponseHead};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

impl Framing {
    fn of(head: &ResponseHead) -> Self {
        if (100..200).contains(&head.status) || head.status == 204 || head.status == 304 {
            return Framing::Empty;
        }
        let chunked = head
            .header("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return Framing::Chunked;
        }
        match head.header("content-length").and_then(|len| len.trim().parse::<u64>().ok()) {
            Some(0) => Framing::Empty,
            Some(len) => Framing::Length(len),
            None => Framing::UntilClose,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Identity,
    Gzip,
    Deflate,
}

impl Encoding {
    fn of(head: &ResponseHead, decode_deflate: bool) -> Self {
        match head.header("content-encoding").map(|e| e.trim().to_ascii_lowercase()) {
            Some(e) if e == "gzip" => Encoding::Gzip,
            Some(e) if e == "deflate" && decode_deflate => Encoding::Deflate,
            _ => Encoding::Identity,
        }
    }
}

/// Fill `record` from the connection, then close it.
///
/// Status, content type and headers are copied whenever a head arrived.
/// The body is read only when the descriptor asks for it; a read fault
/// leaves the body empty and is stored in `record.failure`.
pub fn read(
    mut connection: Connection,
    record: &mut ResponseRecord,
    descriptor: &RequestDescriptor,
    settings: &ExecutionSettings,
) {
    if let Some(head) = connection.head() {
        record.status_code = head.status;
        record.content_type = head.header("content-type").map(str::to_string);
        record.headers = head.headers.clone();
    }

    if let Some(session) = connection.tls_session() {
        record.cipher_suite = tls::cipher_suite(session);
        record.certificate_chain = tls::peer_chain(session);
    }

    if descriptor.reads_response() && connection.head().is_some() {
        match read_body(&mut connection, settings.decode_deflate) {
            Ok(body) => record.body = body,
            Err(err) => {
                tracing::warn!(id = %descriptor.id(), error = %err, "response body read failed");
                record.body.clear();
                record.record_failure(RequestError::transport("read body", err));
            }
        }
    }

    connection.close();
}

fn read_body(connection: &mut Connection, decode_deflate: bool) -> io::Result<String> {
    let (framing, encoding) = match connection.head() {
        Some(head) => (Framing::of(head), Encoding::of(head, decode_deflate)),
        None => return Ok(String::new()),
    };
    let source = connection.body_reader();
    let framed: Box<dyn Read + '_> = match framing {
        Framing::Empty => return Ok(String::new()),
        Framing::Length(len) => Box::new(LengthReader::new(source, len)),
        Framing::Chunked => Box::new(ChunkedReader::new(source)),
        Framing::UntilClose => Box::new(source),
    };
    decode_text(framed, encoding)
}

fn decode_text<R: Read>(framed: R, encoding: Encoding) -> io::Result<String> {
    match encoding {
        Encoding::Identity => accumulate_lines(BufReader::new(framed)),
        Encoding::Gzip => accumulate_lines(BufReader::new(GzDecoder::new(framed))),
        Encoding::Deflate => accumulate_lines(BufReader::new(ZlibDecoder::new(framed))),
    }
}

/// Join lines with a single `\n`. Invalid UTF-8 becomes U+FFFD.
fn accumulate_lines<R: BufRead>(mut reader: R) -> io::Result<String> {
    let mut text = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(text);
        }
        let terminated = line.last() == Some(&b'\n');
        if terminated {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        text.push_str(&String::from_utf8_lossy(&line));
        if terminated {
            text.push('\n');
        }
    }
}

/// Exactly `remaining` bytes of body. A peer that closes early is an
/// `UnexpectedEof`, not a short success.
struct LengthReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> LengthReader<R> {
    fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
        }
    }
}

impl<R: Read> Read for LengthReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(buf.len());
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("body ended {} bytes short of Content-Length", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Decoder for `Transfer-Encoding: chunked`. Chunk extensions and trailer
/// fields are read and dropped.
struct ChunkedReader<R> {
    inner: R,
    remaining: u64,
    done: bool,
}

impl<R: BufRead> ChunkedReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            done: false,
        }
    }

    fn line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        if self.inner.read_until(b'\n', &mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunked body ended early",
            ));
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Ok(line)
    }

    fn chunk_size(&mut self) -> io::Result<u64> {
        let line = self.line()?;
        let line = String::from_utf8_lossy(&line);
        let size = line.split(';').next().unwrap_or_default().trim();
        u64::from_str_radix(size, 16).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid chunk size {size:?}"),
            )
        })
    }

    fn skip_trailers(&mut self) -> io::Result<()> {
        while !self.line()?.is_empty() {}
        Ok(())
    }
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            let size = self.chunk_size()?;
            if size == 0 {
                self.skip_trailers()?;
                self.done = true;
                return Ok(0);
            }
            self.remaining = size;
        }
        let max = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(buf.len());
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunk truncated",
            ));
        }
        self.remaining -= n as u64;
        if self.remaining == 0 && !self.line()?.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing CRLF after chunk",
            ));
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;

    use super::*;
    use crate::http::ResponseHeaders;

    fn head(status: u16, headers: &[(&str, &str)]) -> ResponseHead {
        let mut map = ResponseHeaders::new();
        for (name, value) in headers {
            map.entry(name.to_ascii_lowercase())
                .or_default()
                .push(value.to_string());
        }
        ResponseHead {
            status,
            reason: String::new(),
            headers: map,
        }
    }

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn framing_rules() {
        assert_eq!(Framing::of(&head(204, &[("Content-Length", "10")])), Framing::Empty);
        assert_eq!(Framing::of(&head(304, &[])), Framing::Empty);
        assert_eq!(Framing::of(&head(200, &[("Content-Length", "0")])), Framing::Empty);
        assert_eq!(Framing::of(&head(200, &[("Content-Length", "42")])), Framing::Length(42));
        assert_eq!(
            Framing::of(&head(200, &[("Transfer-Encoding", "Chunked"), ("Content-Length", "3")])),
            Framing::Chunked
        );
        assert_eq!(Framing::of(&head(200, &[])), Framing::UntilClose);
    }

    #[test]
    fn only_gzip_is_decoded_by_default() {
        assert_eq!(Encoding::of(&head(200, &[("Content-Encoding", "GZIP")]), false), Encoding::Gzip);
        assert_eq!(Encoding::of(&head(200, &[("Content-Encoding", "deflate")]), false), Encoding::Identity);
        assert_eq!(Encoding::of(&head(200, &[("Content-Encoding", "deflate")]), true), Encoding::Deflate);
        assert_eq!(Encoding::of(&head(200, &[("Content-Encoding", "br")]), true), Encoding::Identity);
        assert_eq!(Encoding::of(&head(200, &[]), true), Encoding::Identity);
    }

    #[test]
    fn lines_are_joined_with_single_newlines() {
        let text = accumulate_lines(&b"first\r\nsecond\nthird"[..]).unwrap();
        assert_eq!(text, "first\nsecond\nthird");
        let text = accumulate_lines(&b"{\"a\":1}\n"[..]).unwrap();
        assert_eq!(text, "{\"a\":1}\n");
        assert_eq!(accumulate_lines(&b""[..]).unwrap(), "");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let text = accumulate_lines(&b"ok \xff end"[..]).unwrap();
        assert_eq!(text, "ok \u{fffd} end");
    }

    #[test]
    fn gzip_body_is_decompressed() {
        let compressed = gzip("{\"hello\":\"world\"}");
        let text = decode_text(&compressed[..], Encoding::Gzip).unwrap();
        assert_eq!(text, "{\"hello\":\"world\"}");
    }

    #[test]
    fn deflate_body_is_decompressed_when_enabled() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"zlib data").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decode_text(&compressed[..], Encoding::Deflate).unwrap(), "zlib data");
    }

    #[test]
    fn corrupt_gzip_is_an_error() {
        let err = decode_text(&b"definitely not gzip"[..], Encoding::Gzip);
        assert!(err.is_err());
    }

    #[test]
    fn length_bounds_the_body() {
        let mut source = &b"hello, trailing bytes"[..];
        let mut body = String::new();
        LengthReader::new(&mut source, 5).read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello");
        assert_eq!(source, b", trailing bytes");
    }

    #[test]
    fn short_length_body_is_an_error() {
        let framed = LengthReader::new(&b"hello"[..], 100);
        let err = decode_text(framed, Encoding::Identity).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn chunked_body_is_reassembled() {
        let raw = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: yes\r\n\r\nleftover";
        let mut source = &raw[..];
        let mut body = String::new();
        ChunkedReader::new(&mut source).read_to_string(&mut body).unwrap();
        assert_eq!(body, "Wikipedia");
        assert_eq!(source, b"leftover");
    }

    #[test]
    fn chunked_gzip_roundtrip() {
        let compressed = gzip("line one\nline two");
        let mut raw = format!("{:x}\r\n", compressed.len()).into_bytes();
        raw.extend_from_slice(&compressed);
        raw.extend_from_slice(b"\r\n0\r\n\r\n");
        let text = decode_text(ChunkedReader::new(&raw[..]), Encoding::Gzip).unwrap();
        assert_eq!(text, "line one\nline two");
    }

    #[test]
    fn truncated_chunk_is_an_error() {
        let mut body = Vec::new();
        let err = ChunkedReader::new(&b"a\r\nshort"[..]).read_to_end(&mut body).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err = ChunkedReader::new(&b"zz\r\n"[..]).read_to_end(&mut body).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
