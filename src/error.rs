//! Error types for the Flux compositor
//!
//! Each component reports failures through its own `thiserror` enum so the
//! event loop can tell request-local problems (answered with an error
//! response) from frame-fatal ones (stop the loop, run teardown). Startup
//! code and the binary wrap these in `anyhow` with context.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::scene::WindowId;

/// Failures of scene mutations. All of them are request-local.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("window {0} not found")]
    UnknownWindow(WindowId),

    #[error("widget '{0}' not found")]
    UnknownWidget(String),

    #[error("{what} capacity of {limit} exceeded")]
    CapacityExceeded { what: &'static str, limit: usize },

    #[error("widget id '{0}' already used under a different parent")]
    DuplicateWidget(String),

    #[error("invalid widget id '{0}'")]
    InvalidWidgetId(String),

    #[error("invalid color '{0}', expected #RRGGBBAA")]
    InvalidColor(String),

    #[error("cannot allocate a {width}x{height} render target")]
    TargetAllocation { width: u32, height: u32 },
}

/// Failures while decoding or framing control-protocol traffic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(String),

    #[error("malformed arguments for {opcode}: {reason}")]
    MalformedArguments { opcode: &'static str, reason: String },

    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("frame of {0} bytes is too short")]
    Truncated(usize),

    #[error("command is not printable ASCII")]
    InvalidEncoding,

    #[error("unknown response tag {0}")]
    UnknownResponse(u8),
}

/// Failures of the presentation pipeline.
#[derive(Error, Debug)]
pub enum PresentError {
    #[error("display device error during {op}: {source}")]
    Device {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("no connected display connector found")]
    NoConnector,

    #[error("connector has no usable mode, encoder or CRTC")]
    NoCrtc,

    #[error("page flip did not complete after {attempts} wait cycles")]
    FlipTimeout { attempts: u32 },

    #[error("page flip wait cancelled")]
    Cancelled,

    #[error("no free buffer in the swap chain")]
    NoFreeBuffer,

    #[error("presentation engine is not configured (state {0})")]
    NotConfigured(&'static str),

    #[error("a page flip is already pending")]
    FlipPending,

    #[error("frame size {got:?} does not match display mode {expected:?}")]
    FrameSize {
        got: (u32, u32),
        expected: (u32, u32),
    },
}

impl PresentError {
    pub fn device(op: &'static str, source: io::Error) -> Self {
        Self::Device { op, source }
    }
}

/// Failures of the font and image loaders.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode PNG {path}: {source}")]
    Png {
        path: PathBuf,
        #[source]
        source: png::DecodingError,
    },

    #[error("unsupported PNG layout in {path}: {detail}")]
    UnsupportedImage { path: PathBuf, detail: String },

    #[error("invalid font manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid font {path}: {detail}")]
    InvalidFont { path: PathBuf, detail: String },
}

/// Failures of the input collaborator.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("failed to assign seat '{0}'")]
    Seat(String),

    #[error("input dispatch failed: {0}")]
    Dispatch(#[source] io::Error),
}

/// Failures seen by the client library.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("compositor connection failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("compositor rejected request: {0}")]
    Rejected(String),

    #[error("unexpected response {0:?}")]
    UnexpectedResponse(crate::protocol::Response),
}
