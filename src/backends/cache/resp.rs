/// RESP (REdis Serialization Protocol) parsing and generation
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str;

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n); None is the NULL bulk string
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...); None is the NULL array
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Text content of a simple or bulk string
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::SimpleString(s) => Some(s.clone()),
            RespValue::BulkString(Some(data)) => Some(String::from_utf8_lossy(data).into_owned()),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(Some(elements)) => Some(elements),
            _ => None,
        }
    }
}

/// RESP parser for reading server replies
pub struct RespParser;

/// RESP encoder for writing commands
pub struct RespEncoder;

/// Parse error types
#[derive(Debug, thiserror::Error)]
pub enum RespParseError {
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("Invalid integer: {0}")]
    InvalidInteger(String),
}

impl RespParser {
    /// Parse one RESP value from the front of `buf`
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the value is not
    /// complete yet; bytes are consumed only once a whole value is decoded.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespParseError> {
        match Self::decode(&buf[..])? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Parse every complete value in `buf`
    pub fn parse_all(buf: &mut BytesMut) -> Result<Vec<RespValue>, RespParseError> {
        let mut values = Vec::new();
        while let Some(value) = Self::parse(buf)? {
            values.push(value);
        }
        Ok(values)
    }

    fn decode(data: &[u8]) -> Result<Option<(RespValue, usize)>, RespParseError> {
        let Some(&first_byte) = data.first() else {
            return Ok(None);
        };
        let Some((line, mut pos)) = Self::line(data) else {
            return Ok(None);
        };
        let body = line.get(1..).unwrap_or_default();

        let value = match first_byte {
            b'+' => RespValue::SimpleString(str::from_utf8(body)?.to_string()),
            b'-' => RespValue::Error(str::from_utf8(body)?.to_string()),
            b':' => RespValue::Integer(Self::integer(body)?),
            b'$' => {
                let size = Self::integer(body)?;
                if size == -1 {
                    return Ok(Some((RespValue::BulkString(None), pos)));
                }
                if size < 0 {
                    return Err(RespParseError::InvalidFormat(
                        "Invalid bulk string size".to_string(),
                    ));
                }

                let size = size as usize;
                if data.len() < pos + size + 2 {
                    return Ok(None);
                }
                if &data[pos + size..pos + size + 2] != b"\r\n" {
                    return Err(RespParseError::InvalidFormat(
                        "Missing \\r\\n after bulk string".to_string(),
                    ));
                }
                let content = Bytes::copy_from_slice(&data[pos..pos + size]);
                pos += size + 2;
                RespValue::BulkString(Some(content))
            }
            b'*' => {
                let size = Self::integer(body)?;
                if size == -1 {
                    return Ok(Some((RespValue::Array(None), pos)));
                }
                if size < 0 {
                    return Err(RespParseError::InvalidFormat(
                        "Invalid array size".to_string(),
                    ));
                }

                let mut elements = Vec::with_capacity((size as usize).min(1024));
                for _ in 0..size {
                    match Self::decode(&data[pos..])? {
                        Some((element, consumed)) => {
                            elements.push(element);
                            pos += consumed;
                        }
                        None => return Ok(None),
                    }
                }
                RespValue::Array(Some(elements))
            }
            _ => {
                return Err(RespParseError::InvalidFormat(format!(
                    "Unknown RESP type: {}",
                    first_byte as char
                )))
            }
        };

        Ok(Some((value, pos)))
    }

    /// Line up to `\r\n` (excluded) and the offset just past it
    fn line(data: &[u8]) -> Option<(&[u8], usize)> {
        let end = data.windows(2).position(|w| w == b"\r\n")?;
        Some((&data[..end], end + 2))
    }

    fn integer(digits: &[u8]) -> Result<i64, RespParseError> {
        btoi::btoi::<i64>(digits).map_err(|e| RespParseError::InvalidInteger(e.to_string()))
    }
}

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_into(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_u8(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(Some(data)) => {
                buf.put_u8(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(None) => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::Array(Some(elements)) => {
                buf.put_u8(b'*');
                buf.extend_from_slice(elements.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for element in elements {
                    Self::encode_into(buf, element);
                }
            }
            RespValue::Array(None) => {
                buf.extend_from_slice(b"*-1\r\n");
            }
        }
    }

    /// Create a command from its name and arguments
    pub fn create_command(command: &str, args: &[&str]) -> RespValue {
        let mut elements = vec![RespValue::BulkString(Some(Bytes::from(command.to_string())))];

        for arg in args {
            elements.push(RespValue::BulkString(Some(Bytes::from(arg.to_string()))));
        }

        RespValue::Array(Some(elements))
    }
}
