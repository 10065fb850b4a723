//! Widget control protocol
//!
//! Clients talk to the compositor over a local socket with length-prefixed
//! frames. This module owns the three layers of that conversation:
//!
//! - [`wire`]: framing of requests and responses on the byte stream
//! - [`command`]: the typed, escaped `OPCODE:arg:...` command schema
//! - [`dispatch`]: applying a command to the scene and building the reply
//!
//! # Usage
//!
//! ```
//! use flux::protocol::{Command, Request};
//!
//! let cmd = Command::SetWidgetText { id: "clock".into(), text: "12:30 pm".into() };
//! let frame = Request::new(0, cmd.to_wire()).encode();
//! assert_eq!(&frame[4..8], &0u32.to_le_bytes());
//! ```

pub mod command;
pub mod dispatch;
pub mod wire;

pub use command::Command;
pub use dispatch::{DispatchTarget, Reply};
pub use wire::{FrameDecoder, Request, Response, DEFAULT_MAX_REQUEST, HEADER_LEN};
