//! Length-prefixed framing for requests and responses
//!
//! Every message is `u32 LE body length` followed by the body.
//!
//! * Request body: `u32 LE window id` then the ASCII command string.
//! * Response body: one tag byte then a tag-specific payload:
//!   `0` OK (`"OK"`), `1` window id (`u32 LE`), `2` screen size
//!   (`u32 LE` width, `u32 LE` height), `3` error text.

use crate::error::ProtocolError;
use crate::scene::WindowId;

pub const HEADER_LEN: usize = 4;

/// Default cap on a request body, in bytes.
pub const DEFAULT_MAX_REQUEST: usize = 1024;

const TAG_OK: u8 = 0;
const TAG_WINDOW: u8 = 1;
const TAG_SCREEN: u8 = 2;
const TAG_ERROR: u8 = 3;

fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
}

/// One client request, fully value-typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub window: u32,
    pub command: String,
}

impl Request {
    pub fn new(window: u32, command: impl Into<String>) -> Self {
        Self {
            window,
            command: command.into(),
        }
    }

    /// Frame for the wire, header included.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(4 + self.command.len());
        body.extend_from_slice(&self.window.to_le_bytes());
        body.extend_from_slice(self.command.as_bytes());
        frame(&body)
    }

    pub fn decode_body(body: &[u8]) -> Result<Self, ProtocolError> {
        let window = read_u32(body, 0).ok_or(ProtocolError::Truncated(body.len()))?;
        let text = &body[4..];
        if !text.iter().all(|b| (0x20..0x7f).contains(b)) {
            return Err(ProtocolError::InvalidEncoding);
        }
        let command = String::from_utf8(text.to_vec()).map_err(|_| ProtocolError::InvalidEncoding)?;
        Ok(Self { window, command })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Window(WindowId),
    ScreenSize { width: u32, height: u32 },
    Error(String),
}

impl Response {
    /// Error response with the conventional `ERROR: ` prefix.
    pub fn error(reason: &str) -> Self {
        Response::Error(format!("ERROR: {reason}"))
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Response::Error(_))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(16);
        match self {
            Response::Ok => {
                body.push(TAG_OK);
                body.extend_from_slice(b"OK");
            }
            Response::Window(id) => {
                body.push(TAG_WINDOW);
                body.extend_from_slice(&id.0.to_le_bytes());
            }
            Response::ScreenSize { width, height } => {
                body.push(TAG_SCREEN);
                body.extend_from_slice(&width.to_le_bytes());
                body.extend_from_slice(&height.to_le_bytes());
            }
            Response::Error(text) => {
                body.push(TAG_ERROR);
                body.extend_from_slice(text.as_bytes());
            }
        }
        frame(&body)
    }

    pub fn decode_body(body: &[u8]) -> Result<Self, ProtocolError> {
        let (&tag, payload) = body.split_first().ok_or(ProtocolError::Truncated(0))?;
        let truncated = || ProtocolError::Truncated(body.len());
        match tag {
            TAG_OK => Ok(Response::Ok),
            TAG_WINDOW => Ok(Response::Window(WindowId(
                read_u32(payload, 0).ok_or_else(truncated)?,
            ))),
            TAG_SCREEN => Ok(Response::ScreenSize {
                width: read_u32(payload, 0).ok_or_else(truncated)?,
                height: read_u32(payload, 4).ok_or_else(truncated)?,
            }),
            TAG_ERROR => Ok(Response::Error(String::from_utf8_lossy(payload).into_owned())),
            other => Err(ProtocolError::UnknownResponse(other)),
        }
    }
}

/// Reassembles frames from a byte stream that may split or merge them.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_body: usize,
}

impl FrameDecoder {
    pub fn new(max_body: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_body,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete body. An oversized length header is an error
    /// and the stream cannot be resynchronized after it.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(len) = read_u32(&self.buf, 0) else {
            return Ok(None);
        };
        let len = len as usize;
        if len > self.max_body {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                limit: self.max_body,
            });
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let body = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..HEADER_LEN + len);
        Ok(Some(body))
    }
}
