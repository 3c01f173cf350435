//! Peer protocol codec.
//!
//! A line-based ASCII request/response protocol over a fresh TCP
//! connection per request. This module only deals with
//! encoding/parsing the protocol's grammar; it knows nothing about
//! sockets, threads, or the filesystem — those live in [`crate::server`],
//! [`crate::discovery`] and [`crate::download`].

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::net;
use crate::{ChunkIndex, ChunkSize, FileSize};

/// A parsed client request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    List,
    Meta { filename: String },
    Get { filename: String, index: ChunkIndex },
}

impl Request {
    /// Encodes this request as the exact bytes to write to the wire,
    /// including the trailing `\n`.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::List => b"LIST\n".to_vec(),
            Self::Meta { filename } => format!("META {}\n", filename).into_bytes(),
            Self::Get { filename, index } => {
                format!("GET {} {}\n", filename, index).into_bytes()
            }
        }
    }

    /// Parses a request line (without the trailing newline, which
    /// [`net::read_line`] already strips). Unknown first tokens yield
    /// [`Error::Protocol`], which the server maps to `<BAD_REQUEST>`.
    pub fn parse(line: &[u8]) -> Result<Self> {
        let line = std::str::from_utf8(line)
            .map_err(|_| Error::Protocol("request line is not valid UTF-8".into()))?;

        if line == "LIST" {
            return Ok(Self::List);
        }
        if let Some(rest) = line.strip_prefix("META ") {
            if rest.is_empty() {
                return Err(Error::Protocol("META missing filename".into()));
            }
            return Ok(Self::Meta {
                filename: rest.to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("GET ") {
            // the filename may itself contain spaces, so the index is the
            // *last* space-separated token and the filename is everything
            // before it.
            let rest = rest.trim_end();
            let split_at = rest
                .rfind(' ')
                .ok_or_else(|| Error::Protocol("GET missing index".into()))?;
            let (filename, index_str) = (&rest[..split_at], &rest[split_at + 1..]);
            if filename.is_empty() {
                return Err(Error::Protocol("GET missing filename".into()));
            }
            let index: ChunkIndex = index_str
                .parse()
                .map_err(|_| Error::Protocol("GET index is not a non-negative integer".into()))?;
            return Ok(Self::Get {
                filename: filename.to_string(),
                index,
            });
        }

        Err(Error::Protocol(format!("unknown request: {:?}", line)))
    }
}

/// Writes the `<LIST>` header, one `FILE <name>` line per entry, and the
/// `<END>` trailer. If any `FILE <name>` line would exceed
/// `max_header_len` bytes, writes `<BAD_REQUEST>` instead and writes
/// nothing else.
pub fn write_list_response<W: Write>(
    stream: &mut W,
    filenames: &[String],
    max_header_len: usize,
) -> Result<()> {
    let lines: Vec<String> = filenames.iter().map(|name| format!("FILE {}\n", name)).collect();
    if lines.iter().any(|line| line.len() > max_header_len) {
        return write_bad_request(stream);
    }

    net::write_all(stream, b"<LIST>\n")?;
    for line in &lines {
        net::write_all(stream, line.as_bytes())?;
    }
    net::write_all(stream, b"<END>\n")
}

/// Reads a `LIST` response, returning the filenames in the order they
/// were sent. A missing `<LIST>` header or a response that never reaches
/// `<END>` is a protocol violation and yields an error (callers such as
/// [`crate::discovery`] treat this as "skip this peer", not a hang).
pub fn read_list_response<R: Read>(stream: &mut R, max_header_len: usize) -> Result<Vec<String>> {
    let header = net::read_line(stream, max_header_len)?;
    if header != b"<LIST>" {
        return Err(Error::Protocol(format!(
            "expected <LIST> header, got {:?}",
            String::from_utf8_lossy(&header)
        )));
    }

    let mut names = Vec::new();
    loop {
        let line = net::read_line(stream, max_header_len)?;
        if line == b"<END>" {
            return Ok(names);
        }
        if line.is_empty() {
            // EOF before <END>: the peer hung up mid-list.
            return Err(Error::Protocol("LIST response truncated before <END>".into()));
        }
        let line = std::str::from_utf8(&line)
            .map_err(|_| Error::Protocol("LIST entry is not valid UTF-8".into()))?;
        let name = line
            .strip_prefix("FILE ")
            .ok_or_else(|| Error::Protocol(format!("malformed LIST entry: {:?}", line)))?;
        names.push(name.to_string());
    }
}

/// Writes a successful `<META> size` response. If the encoded line would
/// exceed `max_header_len` bytes, writes `<BAD_REQUEST>` instead.
pub fn write_meta_ok<W: Write>(stream: &mut W, size: FileSize, max_header_len: usize) -> Result<()> {
    let line = format!("<META> {}\n", size);
    if line.len() > max_header_len {
        return write_bad_request(stream);
    }
    net::write_all(stream, line.as_bytes())
}

/// Writes `<FILE_NOT_FOUND>`.
pub fn write_not_found<W: Write>(stream: &mut W) -> Result<()> {
    net::write_all(stream, b"<FILE_NOT_FOUND>\n")
}

/// Writes `<BAD_REQUEST>`.
pub fn write_bad_request<W: Write>(stream: &mut W) -> Result<()> {
    net::write_all(stream, b"<BAD_REQUEST>\n")
}

/// Writes `<RANGE_ERROR>`.
pub fn write_range_error<W: Write>(stream: &mut W) -> Result<()> {
    net::write_all(stream, b"<RANGE_ERROR>\n")
}

/// Reads a `META` response, translating `<FILE_NOT_FOUND>` /
/// `<BAD_REQUEST>` into [`Error::NotFound`] / [`Error::RangeOrBad`] and
/// any other unparsable header into [`Error::Protocol`].
pub fn read_meta_response<R: Read>(stream: &mut R, max_header_len: usize) -> Result<FileSize> {
    let line = net::read_line(stream, max_header_len)?;
    let line = std::str::from_utf8(&line)
        .map_err(|_| Error::Protocol("META response is not valid UTF-8".into()))?;

    if line == "<FILE_NOT_FOUND>" {
        return Err(Error::NotFound);
    }
    if line == "<BAD_REQUEST>" {
        return Err(Error::RangeOrBad);
    }
    let size_str = line
        .strip_prefix("<META> ")
        .ok_or_else(|| Error::Protocol(format!("malformed META response: {:?}", line)))?;
    size_str
        .parse()
        .map_err(|_| Error::Protocol(format!("malformed META size: {:?}", size_str)))
}

/// Writes a `<CHUNK> index n\n` header followed by exactly `data.len()`
/// raw bytes. If the header line would exceed `max_header_len` bytes,
/// writes `<BAD_REQUEST>` instead and skips the payload.
pub fn write_chunk_response<W: Write>(
    stream: &mut W,
    index: ChunkIndex,
    data: &[u8],
    max_header_len: usize,
) -> Result<()> {
    let header = format!("<CHUNK> {} {}\n", index, data.len());
    if header.len() > max_header_len {
        return write_bad_request(stream);
    }
    net::write_all(stream, header.as_bytes())?;
    net::write_all(stream, data)
}

/// The parsed payload of a successful `GET` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReply {
    pub index: ChunkIndex,
    pub data: Vec<u8>,
}

/// Reads a `GET` response. `<FILE_NOT_FOUND>` becomes [`Error::NotFound`],
/// `<RANGE_ERROR>`/`<BAD_REQUEST>` become [`Error::RangeOrBad`], and any
/// other unparsable header, an `N` exceeding `cs`, or a short read of the
/// payload becomes [`Error::Protocol`] (classified `Temp` by
/// [`Error::fail_kind`]).
pub fn read_get_response<R: Read>(
    stream: &mut R,
    cs: ChunkSize,
    max_header_len: usize,
) -> Result<ChunkReply> {
    let line = net::read_line(stream, max_header_len)?;
    let line = std::str::from_utf8(&line)
        .map_err(|_| Error::Protocol("GET response is not valid UTF-8".into()))?;

    if line == "<FILE_NOT_FOUND>" {
        return Err(Error::NotFound);
    }
    if line == "<RANGE_ERROR>" || line == "<BAD_REQUEST>" {
        return Err(Error::RangeOrBad);
    }

    let rest = line
        .strip_prefix("<CHUNK> ")
        .ok_or_else(|| Error::Protocol(format!("malformed GET response: {:?}", line)))?;
    let mut parts = rest.split(' ');
    let index: ChunkIndex = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("malformed CHUNK index: {:?}", rest)))?;
    let n: u64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("malformed CHUNK length: {:?}", rest)))?;
    if parts.next().is_some() {
        return Err(Error::Protocol(format!("trailing tokens in CHUNK header: {:?}", rest)));
    }
    if n > cs as u64 {
        return Err(Error::Protocol(format!("CHUNK length {} exceeds chunk size {}", n, cs)));
    }

    let data = net::read_exact(stream, n as usize)?;
    Ok(ChunkReply { index, data })
}
