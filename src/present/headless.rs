//! In-memory display device
//!
//! Buffers live in device memory addressed by handle, like dumb buffers on
//! a real card. A queued flip signals the event fd immediately (or when
//! released, if flips are held) and completes on the next event read. The
//! scanned-out buffer can be inspected pixel by pixel.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;

use log::{debug, trace};
use tiny_skia::Pixmap;

use super::{copy_frame_xrgb, DisplayDevice};
use crate::error::PresentError;

/// Handle to a headless buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadlessBuffer(usize);

/// Observable device calls, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Write { buffer: usize },
    Register { fb: u32, buffer: usize },
    SetCrtc { fb: u32 },
    Flip { fb: u32 },
    FlipComplete { fb: u32 },
    Release { buffer: usize },
    Restore,
}

#[derive(Debug)]
pub struct HeadlessDevice {
    width: u32,
    height: u32,
    memory: Vec<Option<Vec<u8>>>,
    framebuffers: HashMap<u32, usize>,
    next_fb: u32,
    scanned_out: Option<u32>,
    pending: Option<u32>,
    hold_flips: bool,
    buffer_budget: Option<usize>,
    signal_tx: UnixStream,
    signal_rx: UnixStream,
    trace: Vec<DeviceEvent>,
}

impl HeadlessDevice {
    pub fn new(width: u32, height: u32) -> Result<Self, PresentError> {
        let (signal_tx, signal_rx) =
            UnixStream::pair().map_err(|e| PresentError::device("socketpair", e))?;
        signal_rx
            .set_nonblocking(true)
            .map_err(|e| PresentError::device("socketpair", e))?;

        debug!("headless display {}x{}", width, height);
        Ok(Self {
            width,
            height,
            memory: Vec::new(),
            framebuffers: HashMap::new(),
            next_fb: 1,
            scanned_out: None,
            pending: None,
            hold_flips: false,
            buffer_budget: None,
            signal_tx,
            signal_rx,
            trace: Vec::new(),
        })
    }

    fn pitch(&self) -> usize {
        self.width as usize * 4
    }

    /// While held, queued flips do not signal completion.
    pub fn hold_flips(&mut self, hold: bool) {
        self.hold_flips = hold;
    }

    /// Fail allocations once `budget` buffers are live.
    pub fn limit_buffers(&mut self, budget: usize) {
        self.buffer_budget = Some(budget);
    }

    /// Signal a flip queued while flips were held.
    pub fn release_held_flip(&mut self) -> Result<(), PresentError> {
        if self.pending.is_some() {
            self.signal()?;
        }
        Ok(())
    }

    fn signal(&mut self) -> Result<(), PresentError> {
        self.signal_tx
            .write_all(&[1])
            .map_err(|e| PresentError::device("signal", e))
    }

    pub fn scanned_out_fb(&self) -> Option<u32> {
        self.scanned_out
    }

    pub fn pending_fb(&self) -> Option<u32> {
        self.pending
    }

    /// Buffer handle currently backing the screen.
    pub fn scanned_out_buffer(&self) -> Option<usize> {
        self.scanned_out
            .and_then(|fb| self.framebuffers.get(&fb).copied())
    }

    /// RGB of the scanned-out pixel at `(x, y)`.
    pub fn scanout_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let buffer = self.scanned_out_buffer()?;
        let mem = self.memory.get(buffer)?.as_ref()?;
        let i = y as usize * self.pitch() + x as usize * 4;
        Some([mem[i + 2], mem[i + 1], mem[i]])
    }

    pub fn trace(&self) -> &[DeviceEvent] {
        &self.trace
    }

    pub fn live_buffers(&self) -> usize {
        self.memory.iter().filter(|m| m.is_some()).count()
    }
}

impl AsFd for HeadlessDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.signal_rx.as_fd()
    }
}

impl DisplayDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Framebuffer = u32;

    fn mode(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn allocate_buffer(&mut self) -> Result<HeadlessBuffer, PresentError> {
        if self.buffer_budget.is_some_and(|budget| self.live_buffers() >= budget) {
            return Err(PresentError::device(
                "allocate",
                io::Error::from_raw_os_error(libc::ENOMEM),
            ));
        }
        self.memory.push(Some(vec![0; self.pitch() * self.height as usize]));
        Ok(HeadlessBuffer(self.memory.len() - 1))
    }

    fn write_frame(&mut self, buffer: &mut HeadlessBuffer, frame: &Pixmap) -> Result<(), PresentError> {
        let pitch = self.pitch();
        let mem = self
            .memory
            .get_mut(buffer.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| PresentError::device("write", io::Error::from(io::ErrorKind::NotFound)))?;
        copy_frame_xrgb(frame, mem, pitch);
        self.trace.push(DeviceEvent::Write { buffer: buffer.0 });
        Ok(())
    }

    fn add_framebuffer(&mut self, buffer: &HeadlessBuffer) -> Result<u32, PresentError> {
        let fb = self.next_fb;
        self.next_fb += 1;
        self.framebuffers.insert(fb, buffer.0);
        self.trace.push(DeviceEvent::Register {
            fb,
            buffer: buffer.0,
        });
        Ok(fb)
    }

    fn set_crtc(&mut self, fb: u32) -> Result<(), PresentError> {
        self.scanned_out = Some(fb);
        self.trace.push(DeviceEvent::SetCrtc { fb });
        Ok(())
    }

    fn page_flip(&mut self, fb: u32) -> Result<(), PresentError> {
        if self.pending.is_some() {
            return Err(PresentError::device(
                "page_flip",
                io::Error::from_raw_os_error(libc::EBUSY),
            ));
        }
        self.pending = Some(fb);
        self.trace.push(DeviceEvent::Flip { fb });
        if !self.hold_flips {
            self.signal()?;
        }
        Ok(())
    }

    fn event_fd(&self) -> BorrowedFd<'_> {
        self.as_fd()
    }

    fn read_flip_events(&mut self) -> Result<usize, PresentError> {
        let mut buf = [0u8; 16];
        let mut signals = 0;
        loop {
            match self.signal_rx.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => signals += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(PresentError::device("read_events", e)),
            }
        }

        if signals == 0 {
            return Ok(0);
        }
        match self.pending.take() {
            Some(fb) => {
                self.scanned_out = Some(fb);
                self.trace.push(DeviceEvent::FlipComplete { fb });
                trace!("headless flip to fb {} complete", fb);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn restore(&mut self) -> Result<(), PresentError> {
        self.scanned_out = None;
        self.pending = None;
        self.trace.push(DeviceEvent::Restore);
        Ok(())
    }

    fn release_buffer(&mut self, buffer: HeadlessBuffer, fb: Option<u32>) -> Result<(), PresentError> {
        if let Some(fb) = fb {
            self.framebuffers.remove(&fb);
        }
        if let Some(slot) = self.memory.get_mut(buffer.0) {
            *slot = None;
        }
        self.trace.push(DeviceEvent::Release { buffer: buffer.0 });
        Ok(())
    }
}
