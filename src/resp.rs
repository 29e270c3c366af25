//! RESP protocol utilities, client side.
//!
//! Command encoding and reply parsing for the handful of commands the
//! topology manager speaks: `PING`, `AUTH`, and the `SENTINEL` queries.

use bytes::Bytes;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(Bytes),
    /// Error: -ERR message\r\n
    Error(Bytes),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $5\r\nhello\r\n
    BulkString(Bytes),
    /// Null bulk string ($-1) or null array (*-1)
    Null,
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    /// String view of simple or bulk string replies.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) | RespValue::BulkString(s) => std::str::from_utf8(s).ok(),
            _ => None,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Serialize to RESP wire format.
    pub fn serialize(&self) -> Bytes {
        let mut buf = Vec::with_capacity(64);
        self.write_to(&mut buf);
        Bytes::from(buf)
    }

    /// Write to buffer (avoids allocation if buffer exists).
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s);
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Error(e) => {
                buf.push(b'-');
                buf.extend_from_slice(e);
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(itoa::Buffer::new().format(*n).as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(s) => {
                buf.push(b'$');
                buf.extend_from_slice(itoa::Buffer::new().format(s.len()).as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(s);
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Null => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::Array(items) => {
                buf.push(b'*');
                buf.extend_from_slice(itoa::Buffer::new().format(items.len()).as_bytes());
                buf.extend_from_slice(b"\r\n");
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }
}

/// Parse error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Need more data to complete parsing
    Incomplete,
    /// Invalid RESP format
    Invalid(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incomplete => write!(f, "incomplete data"),
            Self::Invalid(msg) => write!(f, "invalid format: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Bytes {
    let mut buf = Vec::with_capacity(32 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    buf.push(b'*');
    buf.extend_from_slice(itoa::Buffer::new().format(args.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");
    for arg in args {
        buf.push(b'$');
        buf.extend_from_slice(itoa::Buffer::new().format(arg.len()).as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
    Bytes::from(buf)
}

/// Parse a single RESP reply from a buffer.
///
/// Returns (value, bytes_consumed) on success.
pub fn parse_reply(buffer: &[u8]) -> Result<(RespValue, usize), ParseError> {
    if buffer.is_empty() {
        return Err(ParseError::Incomplete);
    }

    match buffer[0] {
        b'+' => {
            let (line, consumed) = parse_line(&buffer[1..])?;
            Ok((
                RespValue::SimpleString(Bytes::copy_from_slice(line)),
                1 + consumed,
            ))
        }
        b'-' => {
            let (line, consumed) = parse_line(&buffer[1..])?;
            Ok((RespValue::Error(Bytes::copy_from_slice(line)), 1 + consumed))
        }
        b':' => {
            let (value, consumed) = parse_integer(&buffer[1..])?;
            Ok((RespValue::Integer(value), 1 + consumed))
        }
        b'$' => {
            let (len, len_bytes) = parse_integer(&buffer[1..])?;
            let mut pos = 1 + len_bytes;
            if len < 0 {
                return Ok((RespValue::Null, pos));
            }
            let len = len as usize;
            if pos + len + 2 > buffer.len() {
                return Err(ParseError::Incomplete);
            }
            let data = Bytes::copy_from_slice(&buffer[pos..pos + len]);
            pos += len + 2; // +2 for \r\n
            Ok((RespValue::BulkString(data), pos))
        }
        b'*' => {
            let (len, len_bytes) = parse_integer(&buffer[1..])?;
            let mut pos = 1 + len_bytes;
            if len < 0 {
                return Ok((RespValue::Null, pos));
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let (item, consumed) = parse_reply(&buffer[pos..])?;
                items.push(item);
                pos += consumed;
            }
            Ok((RespValue::Array(items), pos))
        }
        other => Err(ParseError::Invalid(format!(
            "unexpected reply type byte {:#04x}",
            other
        ))),
    }
}

/// Read up to CRLF, returning (line, bytes_consumed incl. terminator).
fn parse_line(buffer: &[u8]) -> Result<(&[u8], usize), ParseError> {
    let newline_pos = buffer
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(ParseError::Incomplete)?;

    let line_end = if newline_pos > 0 && buffer[newline_pos - 1] == b'\r' {
        newline_pos - 1
    } else {
        newline_pos
    };

    Ok((&buffer[..line_end], newline_pos + 1))
}

/// Parse a RESP integer line and return (value, bytes_consumed).
fn parse_integer(buffer: &[u8]) -> Result<(i64, usize), ParseError> {
    let (line, consumed) = parse_line(buffer)?;
    let num_str = std::str::from_utf8(line)
        .map_err(|_| ParseError::Invalid("invalid utf8 in integer".to_string()))?;
    let value: i64 = num_str
        .parse()
        .map_err(|_| ParseError::Invalid("invalid integer".to_string()))?;
    Ok((value, consumed))
}
