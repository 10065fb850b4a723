//! Presentation engine
//!
//! Turns composited frames into scanout. The [`Presenter`] owns the swap
//! chain and the page-flip state machine; a [`DisplayDevice`] implements
//! the kernel side. Two devices exist: [`KmsDevice`] drives a real DRM card
//! and [`HeadlessDevice`] keeps everything in memory.
//!
//! ```text
//! Uninitialized ──configure──▶ Configured ──present──▶ Submit ─┐
//!                                                              ├─▶ Stable ──present──▶ Flip ─▶ Stable
//!                                       (any state) ──shutdown──▶ Shutdown
//! ```

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use log::{debug, error, info, warn};
use tiny_skia::Pixmap;

use crate::error::PresentError;

pub mod flip;
pub mod headless;
pub mod kms;
pub mod swapchain;

pub use flip::{FlipWait, FlipWaitState};
pub use headless::HeadlessDevice;
pub use kms::KmsDevice;
pub use swapchain::{Slot, SlotState, SwapChain};

/// Kernel side of presentation.
///
/// Buffers are device memory the CPU can write; framebuffers are the
/// scanout objects registered for them. Implementations must only report a
/// flip completion from [`DisplayDevice::read_flip_events`].
pub trait DisplayDevice {
    type Buffer;
    type Framebuffer: Copy + std::fmt::Debug;

    /// Active mode resolution.
    fn mode(&self) -> (u32, u32);

    fn allocate_buffer(&mut self) -> Result<Self::Buffer, PresentError>;

    /// Upload an opaque RGBA frame of exactly [`DisplayDevice::mode`] size.
    fn write_frame(&mut self, buffer: &mut Self::Buffer, frame: &Pixmap) -> Result<(), PresentError>;

    fn add_framebuffer(&mut self, buffer: &Self::Buffer) -> Result<Self::Framebuffer, PresentError>;

    /// Synchronous mode-set onto `fb`.
    fn set_crtc(&mut self, fb: Self::Framebuffer) -> Result<(), PresentError>;

    /// Queue an asynchronous flip to `fb` with a completion event.
    fn page_flip(&mut self, fb: Self::Framebuffer) -> Result<(), PresentError>;

    /// Descriptor that becomes readable when events are pending.
    fn event_fd(&self) -> BorrowedFd<'_>;

    /// Read pending events. Returns the number of flip completions seen.
    /// Only call when [`DisplayDevice::event_fd`] is readable.
    fn read_flip_events(&mut self) -> Result<usize, PresentError>;

    /// Put back the controller configuration found at open.
    fn restore(&mut self) -> Result<(), PresentError>;

    fn release_buffer(
        &mut self,
        buffer: Self::Buffer,
        fb: Option<Self::Framebuffer>,
    ) -> Result<(), PresentError>;

    /// Block until the event fd is readable or `timeout` passes.
    fn wait_readable(&self, timeout: Duration) -> Result<bool, PresentError> {
        poll_readable(self.event_fd(), timeout).map_err(|e| PresentError::device("poll", e))
    }
}

/// `poll(2)` for readability. Interrupted waits report "not ready".
pub fn poll_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

    // SAFETY: `pfd` is a valid pollfd for the duration of the call and the
    // borrowed descriptor outlives it.
    let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ret > 0 && pfd.revents & libc::POLLIN != 0)
}

/// Convert an RGBA frame into little-endian XRGB8888 rows of `pitch` bytes.
pub fn copy_frame_xrgb(frame: &Pixmap, dst: &mut [u8], pitch: usize) {
    let width = frame.width() as usize;
    let src = frame.data();
    for (y, row) in src.chunks_exact(width * 4).enumerate() {
        let Some(out) = dst.get_mut(y * pitch..y * pitch + width * 4) else {
            break;
        };
        for (s, d) in row.chunks_exact(4).zip(out.chunks_exact_mut(4)) {
            d[0] = s[2];
            d[1] = s[1];
            d[2] = s[0];
            d[3] = 0xff;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentState {
    Uninitialized,
    Configured,
    Submit,
    Flip,
    Stable,
    Shutdown,
}

impl PresentState {
    pub fn name(self) -> &'static str {
        match self {
            PresentState::Uninitialized => "uninitialized",
            PresentState::Configured => "configured",
            PresentState::Submit => "submit",
            PresentState::Flip => "flip",
            PresentState::Stable => "stable",
            PresentState::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentOptions {
    /// Swap-chain depth, at least 2
    pub buffers: usize,
    pub flip_timeout: Duration,
    pub flip_timeout_cycles: u32,
}

impl Default for PresentOptions {
    fn default() -> Self {
        Self {
            buffers: 3,
            flip_timeout: Duration::from_millis(100),
            flip_timeout_cycles: 10,
        }
    }
}

/// What a call to [`Presenter::present`] achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    /// First frame, set synchronously.
    ModeSet,
    /// Flipped and completion observed.
    Flipped,
}

pub struct Presenter<D: DisplayDevice> {
    device: D,
    state: PresentState,
    options: PresentOptions,
    chain: SwapChain<D::Buffer, D::Framebuffer>,
    frames: u64,
}

impl<D: DisplayDevice> Presenter<D> {
    pub fn new(device: D, options: PresentOptions) -> Self {
        Self {
            device,
            state: PresentState::Uninitialized,
            options,
            chain: SwapChain::new(Vec::new()),
            frames: 0,
        }
    }

    /// Allocate the swap chain.
    pub fn configure(&mut self) -> Result<(), PresentError> {
        if self.state != PresentState::Uninitialized {
            return Err(PresentError::NotConfigured(self.state.name()));
        }

        let count = self.options.buffers.max(2);
        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            match self.device.allocate_buffer() {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    for buffer in buffers {
                        if let Err(e) = self.device.release_buffer(buffer, None) {
                            warn!("failed to release display buffer: {}", e);
                        }
                    }
                    return Err(e);
                }
            }
        }
        self.chain = SwapChain::new(buffers);
        self.state = PresentState::Configured;

        let (w, h) = self.device.mode();
        info!("presentation configured: {}x{}, {} buffers", w, h, count);
        Ok(())
    }

    pub fn state(&self) -> PresentState {
        self.state
    }

    pub fn mode(&self) -> (u32, u32) {
        self.device.mode()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn swap_chain(&self) -> &SwapChain<D::Buffer, D::Framebuffer> {
        &self.chain
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    pub fn flip_pending(&self) -> bool {
        self.chain.in_flight().is_some()
    }

    fn flip_wait(&self) -> FlipWait {
        FlipWait::new(self.options.flip_timeout_cycles, self.options.flip_timeout)
    }

    /// Hand a composited frame to the display.
    ///
    /// The first frame is set synchronously. Later frames are flipped and
    /// waited for within the bounded budget; on timeout the flip stays
    /// pending and [`Presenter::wait_for_flip`] may be retried.
    pub fn present(&mut self, frame: &Pixmap, keep_running: &AtomicBool) -> Result<Presented, PresentError> {
        match self.state {
            PresentState::Configured | PresentState::Stable => {}
            PresentState::Submit | PresentState::Flip => return Err(PresentError::FlipPending),
            other => return Err(PresentError::NotConfigured(other.name())),
        }
        if self.flip_pending() {
            return Err(PresentError::FlipPending);
        }

        let expected = self.device.mode();
        let got = (frame.width(), frame.height());
        if got != expected {
            return Err(PresentError::FrameSize { got, expected });
        }

        let index = self.chain.acquire()?;
        let fb = match self.prepare(index, frame) {
            Ok(fb) => fb,
            Err(e) => {
                self.chain.abandon(index);
                return Err(e);
            }
        };

        if self.chain.on_screen().is_none() {
            self.state = PresentState::Submit;
            if let Err(e) = self.device.set_crtc(fb) {
                self.chain.abandon(index);
                self.state = PresentState::Configured;
                return Err(e);
            }
            self.chain.mark_scanned_out(index);
            self.state = PresentState::Stable;
            self.frames += 1;
            debug!("mode set onto slot {} (fb {:?})", index, fb);
            return Ok(Presented::ModeSet);
        }

        self.state = PresentState::Flip;
        if let Err(e) = self.device.page_flip(fb) {
            self.chain.abandon(index);
            self.state = PresentState::Stable;
            return Err(e);
        }
        self.chain.mark_in_flight(index)?;
        self.wait_for_flip(keep_running)?;
        Ok(Presented::Flipped)
    }

    /// Upload the frame into a slot and make sure it has a framebuffer.
    fn prepare(&mut self, index: usize, frame: &Pixmap) -> Result<D::Framebuffer, PresentError> {
        let slot = self.chain.slot_mut(index);
        self.device.write_frame(&mut slot.buffer, frame)?;
        match slot.framebuffer {
            Some(fb) => Ok(fb),
            None => {
                let fb = self.device.add_framebuffer(&slot.buffer)?;
                slot.framebuffer = Some(fb);
                Ok(fb)
            }
        }
    }

    /// Wait, within the bounded budget, for the pending flip to complete.
    /// A no-op when nothing is in flight.
    pub fn wait_for_flip(&mut self, keep_running: &AtomicBool) -> Result<(), PresentError> {
        if !self.flip_pending() {
            return Ok(());
        }

        let mut wait = self.flip_wait();
        let device = &mut self.device;
        let outcome = wait.run(keep_running, |timeout| {
            if !device.wait_readable(timeout)? {
                return Ok(false);
            }
            Ok(device.read_flip_events()? > 0)
        })?;

        match outcome {
            FlipWaitState::Completed => {
                self.complete_flip();
                Ok(())
            }
            FlipWaitState::Cancelled => Err(PresentError::Cancelled),
            _ => Err(PresentError::FlipTimeout {
                attempts: self.options.flip_timeout_cycles,
            }),
        }
    }

    /// Consume ready display events without blocking. Returns true when a
    /// pending flip completed.
    pub fn dispatch_events(&mut self) -> Result<bool, PresentError> {
        if !self.device.wait_readable(Duration::ZERO)? {
            return Ok(false);
        }
        let completions = self.device.read_flip_events()?;
        if completions > 0 && self.flip_pending() {
            self.complete_flip();
            return Ok(true);
        }
        Ok(false)
    }

    fn complete_flip(&mut self) {
        let freed = self.chain.complete_flip();
        self.state = PresentState::Stable;
        self.frames += 1;
        debug!("flip complete, slot {:?} returned to pool", freed);
    }

    /// Restore the original controller configuration and release every
    /// buffer. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<(), PresentError> {
        if self.state == PresentState::Shutdown {
            return Ok(());
        }
        let was_configured = self.state != PresentState::Uninitialized;
        self.state = PresentState::Shutdown;

        let mut first_err = None;
        if was_configured {
            if let Err(e) = self.device.restore() {
                warn!("failed to restore display configuration: {}", e);
                first_err.get_or_insert(e);
            }
        }
        for slot in self.chain.drain() {
            if let Err(e) = self.device.release_buffer(slot.buffer, slot.framebuffer) {
                warn!("failed to release display buffer: {}", e);
                first_err.get_or_insert(e);
            }
        }
        info!("presentation shut down after {} frames", self.frames);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<D: DisplayDevice> Drop for Presenter<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("presentation teardown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests;
