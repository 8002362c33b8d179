//! Response head parsing and body framing.
//!
//! Head and chunk-size syntax is left to `httparse`; this module only
//! tracks where each piece of the body stream begins and ends.

use httparse::Status;

use crate::HttpError;

/// Upper bound on the status line plus headers.
pub const MAX_HEAD: usize = 64 * 1024;

const MAX_HEADERS: usize = 64;

/// Upper bound on a chunk-size or trailer line.
const MAX_CHUNK_LINE: usize = 4096;

// ============================================================================
// Response Head
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,

    /// Header fields in arrival order; names keep their original case
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Parses the head at the front of `buf`.
    ///
    /// Returns the head and its length in bytes, or `None` while the
    /// terminating blank line has not arrived yet.
    ///
    /// # Errors
    ///
    /// * `HttpError::Head` - the status line or a header line is malformed
    /// * `HttpError::HeadTooLarge` - no complete head within `MAX_HEAD` bytes
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, HttpError> {
        let mut fields = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut fields);

        let len = match response.parse(buf)? {
            Status::Complete(len) => len,
            Status::Partial if buf.len() > MAX_HEAD => return Err(HttpError::HeadTooLarge(MAX_HEAD)),
            Status::Partial => return Ok(None),
        };

        let Some(status) = response.code else {
            return Err(HttpError::MalformedHead("missing status code".to_string()));
        };
        let headers = response
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).trim().to_string(),
                )
            })
            .collect();

        let head = Self {
            status,
            reason: response.reason.unwrap_or_default().to_string(),
            headers,
        };
        Ok(Some((head, len)))
    }

    /// First value of the header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Chooses how the body is framed.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::MalformedHead` for an unparsable `Content-Length`.
    pub fn body_decoder(&self) -> Result<BodyDecoder, HttpError> {
        if self.status == 204 || self.status == 304 || (100..200).contains(&self.status) {
            return Ok(BodyDecoder::Length { remaining: 0 });
        }

        let chunked = self
            .header("transfer-encoding")
            .is_some_and(|te| te.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")));
        if chunked {
            return Ok(BodyDecoder::Chunked(ChunkedDecoder::new()));
        }

        match self.header("content-length") {
            Some(len) => {
                let remaining = len.parse::<u64>().map_err(|_| {
                    HttpError::MalformedHead(format!("bad Content-Length {len:?}"))
                })?;
                Ok(BodyDecoder::Length { remaining })
            }
            None => Ok(BodyDecoder::UntilClose),
        }
    }
}

// ============================================================================
// Body Decoding
// ============================================================================

/// Strips transfer framing from body bytes as they arrive.
#[derive(Debug)]
pub enum BodyDecoder {
    Chunked(ChunkedDecoder),
    Length { remaining: u64 },
    UntilClose,
}

impl BodyDecoder {
    /// Appends the payload slices of `input` to `out`.
    ///
    /// Bytes past the end of the body are dropped.
    pub fn decode<'a>(&mut self, input: &'a [u8], out: &mut Vec<&'a [u8]>) -> Result<(), HttpError> {
        match self {
            Self::Chunked(chunked) => chunked.decode(input, out),
            Self::Length { remaining } => {
                let take = usize::try_from(*remaining).unwrap_or(usize::MAX).min(input.len());
                if take > 0 {
                    out.push(&input[..take]);
                    *remaining -= take as u64;
                }
                Ok(())
            }
            Self::UntilClose => {
                if !input.is_empty() {
                    out.push(input);
                }
                Ok(())
            }
        }
    }

    /// Whether the whole body has been seen.
    pub fn is_done(&self) -> bool {
        match self {
            Self::Chunked(chunked) => chunked.is_done(),
            Self::Length { remaining } => *remaining == 0,
            Self::UntilClose => false,
        }
    }

    /// Whether the peer closing the connection now ends the body cleanly.
    pub fn accepts_eof(&self) -> bool {
        matches!(self, Self::UntilClose) || self.is_done()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Reading a chunk-size line
    Size,
    /// Inside chunk data
    Data { remaining: u64 },
    /// Expecting the CRLF after chunk data
    DataEnd,
    /// Reading trailer lines after the last chunk
    Trailer,
    Done,
}

/// Incremental `Transfer-Encoding: chunked` decoder.
///
/// Control lines may be split across reads; they are accumulated in a small
/// buffer. Chunk data is handed out as slices of the input.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
    line: Vec<u8>,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: ChunkState::Size,
            line: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    pub fn decode<'a>(&mut self, mut input: &'a [u8], out: &mut Vec<&'a [u8]>) -> Result<(), HttpError> {
        while !input.is_empty() {
            match self.state {
                ChunkState::Done => return Ok(()),
                ChunkState::Data { remaining } => {
                    let take = usize::try_from(remaining).unwrap_or(usize::MAX).min(input.len());
                    out.push(&input[..take]);
                    input = &input[take..];
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data { remaining }
                    };
                }
                ChunkState::Size | ChunkState::DataEnd | ChunkState::Trailer => {
                    let Some(consumed) = self.take_line(input)? else {
                        return Ok(());
                    };
                    input = &input[consumed..];
                    self.finish_line()?;
                }
            }
        }
        Ok(())
    }

    /// Moves bytes up to and including the next `\n` into `self.line`.
    ///
    /// Returns how many bytes were consumed if a full line is now buffered.
    fn take_line(&mut self, input: &[u8]) -> Result<Option<usize>, HttpError> {
        let (part, complete) = match input.iter().position(|&b| b == b'\n') {
            Some(idx) => (&input[..=idx], true),
            None => (input, false),
        };
        if self.line.len() + part.len() > MAX_CHUNK_LINE {
            return Err(HttpError::Chunked("control line too long".to_string()));
        }
        self.line.extend_from_slice(part);
        Ok(complete.then_some(part.len()))
    }

    /// Acts on the complete control line in `self.line`, terminator included.
    fn finish_line(&mut self) -> Result<(), HttpError> {
        let line = std::mem::take(&mut self.line);
        let blank = matches!(line.as_slice(), b"\n" | b"\r\n");

        self.state = match self.state {
            ChunkState::Size => match httparse::parse_chunk_size(&line) {
                Ok(Status::Complete((_, 0))) => ChunkState::Trailer,
                Ok(Status::Complete((_, size))) => ChunkState::Data { remaining: size },
                Ok(Status::Partial) | Err(_) => {
                    return Err(HttpError::Chunked(format!(
                        "bad chunk size line {:?}",
                        String::from_utf8_lossy(&line)
                    )));
                }
            },
            ChunkState::DataEnd if blank => ChunkState::Size,
            ChunkState::DataEnd => {
                return Err(HttpError::Chunked("missing CRLF after chunk data".to_string()));
            }
            ChunkState::Trailer if blank => ChunkState::Done,
            other => other,
        };
        Ok(())
    }
}
