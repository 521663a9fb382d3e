//! RESP2 encoder and decoder.
//!
//! Commands are written as arrays of bulk strings. Replies are decoded
//! straight into [`Reply`], with error lines classified on the way.

use bytes::{Buf, BufMut, BytesMut};

use crate::core::command::Cmd;
use crate::error::TransportError;
use crate::proto::reply::Reply;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Encodes commands into RESP bytes.
///
/// # Example
///
/// ```
/// use slotmux::proto::codec::Encoder;
/// use slotmux::Cmd;
///
/// let mut encoder = Encoder::new();
/// encoder.encode(&Cmd::new("GET").arg("foo"));
/// assert_eq!(&encoder.take()[..], b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
/// ```
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates a new encoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one command to the buffer.
    pub fn encode(&mut self, cmd: &Cmd) {
        let parts = cmd.to_parts();
        self.buf.put_u8(b'*');
        self.buf.extend_from_slice(parts.len().to_string().as_bytes());
        self.buf.extend_from_slice(b"\r\n");
        for part in parts {
            self.buf.put_u8(b'$');
            self.buf.extend_from_slice(part.len().to_string().as_bytes());
            self.buf.extend_from_slice(b"\r\n");
            self.buf.extend_from_slice(&part);
            self.buf.extend_from_slice(b"\r\n");
        }
    }

    /// Takes the encoded bytes, leaving the buffer empty.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }
}

/// Incremental RESP decoder.
///
/// Call [`append`](Decoder::append) as data arrives, then
/// [`decode`](Decoder::decode) until it returns `Ok(None)`.
///
/// ```
/// use slotmux::proto::codec::Decoder;
/// use slotmux::Reply;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+OK\r\n");
/// assert_eq!(decoder.decode().unwrap(), Some(Reply::Status("OK".to_string())));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Appends raw bytes to the internal buffer.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decodes one complete reply, or returns `Ok(None)` if more data is needed.
    ///
    /// Nothing is consumed until a whole reply, including nested array
    /// elements, is available.
    pub fn decode(&mut self) -> Result<Option<Reply>, TransportError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf.len() > self.max_frame_size {
            return Err(protocol("buffer size exceeded maximum frame size"));
        }

        let mut pos = 0;
        match parse(&self.buf, &mut pos, self.max_frame_size)? {
            Some(reply) => {
                self.buf.advance(pos);
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn protocol(message: impl Into<String>) -> TransportError {
    TransportError::Protocol {
        message: message.into(),
    }
}

fn parse(buf: &[u8], pos: &mut usize, max: usize) -> Result<Option<Reply>, TransportError> {
    let Some(line) = read_line(buf, pos) else {
        return Ok(None);
    };
    let Some((&tag, body)) = line.split_first() else {
        return Err(protocol("empty frame"));
    };
    let text = std::str::from_utf8(body).map_err(|e| protocol(e.to_string()))?;

    match tag {
        b'+' => Ok(Some(Reply::Status(text.to_string()))),
        b'-' => Ok(Some(Reply::from_error_line(text))),
        b':' => Ok(Some(Reply::Integer(parse_int(text)?))),
        b'$' => {
            let len = parse_int(text)?;
            if len < 0 {
                return Ok(Some(Reply::Nil));
            }
            let len = len as usize;
            if len > max {
                return Err(protocol("bulk string length exceeds maximum frame size"));
            }
            if buf.len() < *pos + len + 2 {
                return Ok(None);
            }
            if &buf[*pos + len..*pos + len + 2] != b"\r\n" {
                return Err(protocol("bulk string not terminated by CRLF"));
            }
            let data = bytes::Bytes::copy_from_slice(&buf[*pos..*pos + len]);
            *pos += len + 2;
            Ok(Some(Reply::Bulk(data)))
        }
        b'*' => {
            let len = parse_int(text)?;
            if len < 0 {
                return Ok(Some(Reply::Nil));
            }
            let len = len as usize;
            if len > max / 16 {
                return Err(protocol("array length exceeds reasonable maximum"));
            }
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                match parse(buf, pos, max)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            Ok(Some(Reply::Array(items)))
        }
        other => Err(protocol(format!("unknown frame type: {}", other as char))),
    }
}

/// Returns the line starting at `pos` without its CRLF and moves `pos` past it.
fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let start = *pos;
    let end = buf[start..].windows(2).position(|w| w == b"\r\n")? + start;
    *pos = end + 2;
    Some(&buf[start..end])
}

fn parse_int(text: &str) -> Result<i64, TransportError> {
    text.parse::<i64>().map_err(|e| protocol(e.to_string()))
}
