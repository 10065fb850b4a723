//! Input events and sources
//!
//! Hardware input reaches the compositor as a small set of abstract events.
//! Pointer positions are absolute and already clamped to the screen; the
//! modifier mask is tracked by the source from raw key codes.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, Receiver, Sender};

use bitflags::bitflags;

use crate::error::InputError;

pub mod libinput;

pub use libinput::LibinputSource;

/// Linux evdev key codes the compositor cares about.
pub mod keys {
    pub const KEY_LEFTCTRL: u32 = 29;
    pub const KEY_LEFTSHIFT: u32 = 42;
    pub const KEY_RIGHTSHIFT: u32 = 54;
    pub const KEY_LEFTALT: u32 = 56;
    pub const KEY_RIGHTCTRL: u32 = 97;
    pub const KEY_RIGHTALT: u32 = 100;
    pub const KEY_LEFTMETA: u32 = 125;
    pub const KEY_RIGHTMETA: u32 = 126;

    pub const BTN_LEFT: u32 = 272;
    pub const BTN_RIGHT: u32 = 273;
    pub const BTN_MIDDLE: u32 = 274;
}

bitflags! {
    /// Held keyboard modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
        const META = 1 << 3;
    }
}

impl Modifiers {
    /// Modifier bit driven by a key code, if it is a modifier key.
    pub fn for_key(code: u32) -> Option<Modifiers> {
        use keys::*;
        match code {
            KEY_LEFTSHIFT | KEY_RIGHTSHIFT => Some(Modifiers::SHIFT),
            KEY_LEFTCTRL | KEY_RIGHTCTRL => Some(Modifiers::CTRL),
            KEY_LEFTALT | KEY_RIGHTALT => Some(Modifiers::ALT),
            KEY_LEFTMETA | KEY_RIGHTMETA => Some(Modifiers::META),
            _ => None,
        }
    }

    /// Apply a key transition to the mask.
    pub fn track(&mut self, code: u32, pressed: bool) {
        if let Some(bit) = Self::for_key(code) {
            self.set(bit, pressed);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Pointer moved to absolute `(x, y)` by `(dx, dy)`.
    PointerMotion { x: f64, y: f64, dx: f64, dy: f64 },
    Button { button: u32, pressed: bool },
    Scroll { dx: f64, dy: f64 },
    Key {
        code: u32,
        pressed: bool,
        modifiers: Modifiers,
    },
}

/// Pointer position clamped to the screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pointer {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl Pointer {
    /// Starts in the middle of a `width` x `height` screen.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = (width as f64, height as f64);
        Self {
            x: width / 2.0,
            y: height / 2.0,
            width,
            height,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    fn max(&self) -> (f64, f64) {
        ((self.width - 1.0).max(0.0), (self.height - 1.0).max(0.0))
    }

    /// Accumulate relative motion.
    pub fn move_by(&mut self, dx: f64, dy: f64) -> InputEvent {
        let (max_x, max_y) = self.max();
        self.x = (self.x + dx).clamp(0.0, max_x);
        self.y = (self.y + dy).clamp(0.0, max_y);
        InputEvent::PointerMotion {
            x: self.x,
            y: self.y,
            dx,
            dy,
        }
    }

    /// Jump to an absolute position.
    pub fn move_to(&mut self, x: f64, y: f64) -> InputEvent {
        let (dx, dy) = (x - self.x, y - self.y);
        self.move_by(dx, dy)
    }
}

/// A pollable producer of input events.
pub trait InputSource {
    /// Readable when events are waiting.
    fn poll_fd(&self) -> BorrowedFd<'_>;

    /// Collect every pending event without blocking.
    fn drain(&mut self) -> Result<Vec<InputEvent>, InputError>;
}

/// Input source fed from another part of the program through a
/// [`InputFeeder`]. Used headless and in tests.
#[derive(Debug)]
pub struct QueuedInput {
    rx: Receiver<InputEvent>,
    signal: UnixStream,
    pending: VecDeque<InputEvent>,
}

/// Sending half of a [`QueuedInput`].
#[derive(Debug)]
pub struct InputFeeder {
    tx: Sender<InputEvent>,
    signal: UnixStream,
}

impl QueuedInput {
    pub fn channel() -> io::Result<(QueuedInput, InputFeeder)> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        let (tx, rx) = mpsc::channel();
        Ok((
            QueuedInput {
                rx,
                signal: reader,
                pending: VecDeque::new(),
            },
            InputFeeder { tx, signal: writer },
        ))
    }
}

impl InputFeeder {
    /// Queue an event and wake the reader. Returns false once the source
    /// has been dropped.
    pub fn send(&mut self, event: InputEvent) -> bool {
        self.tx.send(event).is_ok() && self.signal.write_all(&[1]).is_ok()
    }
}

impl InputSource for QueuedInput {
    fn poll_fd(&self) -> BorrowedFd<'_> {
        self.signal.as_fd()
    }

    fn drain(&mut self) -> Result<Vec<InputEvent>, InputError> {
        let mut buf = [0u8; 64];
        loop {
            match self.signal.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(InputError::Dispatch(e)),
            }
        }
        self.pending.extend(self.rx.try_iter());
        Ok(self.pending.drain(..).collect())
    }
}
