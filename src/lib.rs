//! # Flux Compositor Library
//!
//! A minimal full-screen compositor for embedded Linux. One privileged
//! process owns the display through KMS and presents composited frames
//! directly; unprivileged clients create windows and fill them with simple
//! widgets over a local socket.
//!
//! ## Architecture
//!
//! - `scene`: windows, widget trees and the bounded window registry
//! - `renderer`: software rasterizer painting widget trees and compositing frames
//! - `present`: swap chain and page-flip state machine over a display device
//! - `protocol`: wire framing, typed commands and the request dispatcher
//! - `ipc`: non-blocking Unix socket server
//! - `input`: abstract input events and the libinput source
//! - `shell`: built-in default window, menu overlay and cursor
//! - `compositor`: the event loop tying everything together
//! - `client`: blocking client library
//!
//! ## Usage
//!
//! ```rust,no_run
//! use flux::{Compositor, FluxConfig};
//! use flux::assets::FileAssets;
//! use flux::present::KmsDevice;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = FluxConfig::default();
//!     let device = KmsDevice::open(&config.display.device)?;
//!     let mut compositor = Compositor::new(device, &config, Box::new(FileAssets::new()))?;
//!     compositor.run()
//! }
//! ```

pub mod assets;
pub mod client;
pub mod compositor;
pub mod config;
pub mod error;
pub mod input;
pub mod ipc;
pub mod logging;
pub mod present;
pub mod protocol;
pub mod renderer;
pub mod scene;
pub mod shell;

// Re-export main types for easy access
pub use client::FluxClient;
pub use compositor::{Compositor, Tick};
pub use config::FluxConfig;
pub use ipc::IpcServer;
pub use present::{DisplayDevice, HeadlessDevice, KmsDevice, Presenter};
pub use scene::{Scene, Window, WindowId};

// Re-export common error types
pub use anyhow::{Context, Error, Result};

/// Version information for Flux
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
