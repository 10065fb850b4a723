//! DRM/KMS display device
//!
//! Legacy mode-setting on the first connected connector: CPU-mapped dumb
//! buffers in XRGB8888, `set_crtc` for the first frame and event-signalled
//! page flips after that. The CRTC configuration found at open is saved
//! and put back by [`DisplayDevice::restore`].

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use drm::buffer::{Buffer as _, DrmFourcc};
use drm::control::{
    connector, crtc, dumbbuffer::DumbBuffer, framebuffer, Device as ControlDevice, Event, Mode,
    ModeTypeFlags, PageFlipFlags,
};
use log::{debug, info, warn};
use tiny_skia::Pixmap;

use super::{copy_frame_xrgb, DisplayDevice};
use crate::error::PresentError;

/// Open DRM card node.
#[derive(Debug)]
struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for Card {}
impl ControlDevice for Card {}

#[derive(Debug)]
pub struct KmsDevice {
    card: Card,
    connector: connector::Handle,
    crtc: crtc::Handle,
    mode: Mode,
    saved_crtc: crtc::Info,
}

impl KmsDevice {
    /// Open the card, become DRM master and pick a connector, mode and CRTC.
    pub fn open(path: &Path) -> Result<Self, PresentError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| PresentError::device("open", e))?;
        let card = Card(file);

        drm::Device::acquire_master_lock(&card)
            .map_err(|e| PresentError::device("acquire_master_lock", e))?;

        let resources = card
            .resource_handles()
            .map_err(|e| PresentError::device("resource_handles", e))?;

        let connector = resources
            .connectors()
            .iter()
            .filter_map(|h| card.get_connector(*h, false).ok())
            .find(|c| c.state() == connector::State::Connected && !c.modes().is_empty())
            .ok_or(PresentError::NoConnector)?;

        let mode = connector
            .modes()
            .iter()
            .find(|m| m.mode_type().contains(ModeTypeFlags::PREFERRED))
            .or_else(|| connector.modes().first())
            .copied()
            .ok_or(PresentError::NoCrtc)?;

        // Prefer the CRTC already driving the connector, then any the
        // connector's encoders can reach.
        let current = connector
            .current_encoder()
            .and_then(|e| card.get_encoder(e).ok())
            .and_then(|e| e.crtc());
        let crtc = current
            .or_else(|| {
                connector
                    .encoders()
                    .iter()
                    .filter_map(|e| card.get_encoder(*e).ok())
                    .flat_map(|e| resources.filter_crtcs(e.possible_crtcs()))
                    .next()
            })
            .ok_or(PresentError::NoCrtc)?;

        let saved_crtc = card
            .get_crtc(crtc)
            .map_err(|e| PresentError::device("get_crtc", e))?;

        let (w, h) = mode.size();
        info!(
            "display {}: connector {:?}, crtc {:?}, mode {}x{}@{}",
            path.display(),
            connector.handle(),
            crtc,
            w,
            h,
            mode.vrefresh()
        );

        Ok(Self {
            card,
            connector: connector.handle(),
            crtc,
            mode,
            saved_crtc,
        })
    }
}

impl DisplayDevice for KmsDevice {
    type Buffer = DumbBuffer;
    type Framebuffer = framebuffer::Handle;

    fn mode(&self) -> (u32, u32) {
        let (w, h) = self.mode.size();
        (w as u32, h as u32)
    }

    fn allocate_buffer(&mut self) -> Result<DumbBuffer, PresentError> {
        self.card
            .create_dumb_buffer(self.mode(), DrmFourcc::Xrgb8888, 32)
            .map_err(|e| PresentError::device("create_dumb_buffer", e))
    }

    fn write_frame(&mut self, buffer: &mut DumbBuffer, frame: &Pixmap) -> Result<(), PresentError> {
        let pitch = buffer.pitch() as usize;
        let mut mapping = self
            .card
            .map_dumb_buffer(buffer)
            .map_err(|e| PresentError::device("map_dumb_buffer", e))?;
        copy_frame_xrgb(frame, &mut mapping, pitch);
        Ok(())
    }

    fn add_framebuffer(&mut self, buffer: &DumbBuffer) -> Result<framebuffer::Handle, PresentError> {
        let fb = self
            .card
            .add_framebuffer(buffer, 24, 32)
            .map_err(|e| PresentError::device("add_framebuffer", e))?;
        debug!("registered framebuffer {:?}", fb);
        Ok(fb)
    }

    fn set_crtc(&mut self, fb: framebuffer::Handle) -> Result<(), PresentError> {
        self.card
            .set_crtc(self.crtc, Some(fb), (0, 0), &[self.connector], Some(self.mode))
            .map_err(|e| PresentError::device("set_crtc", e))
    }

    fn page_flip(&mut self, fb: framebuffer::Handle) -> Result<(), PresentError> {
        self.card
            .page_flip(self.crtc, fb, PageFlipFlags::EVENT, None)
            .map_err(|e| PresentError::device("page_flip", e))
    }

    fn event_fd(&self) -> BorrowedFd<'_> {
        self.card.as_fd()
    }

    fn read_flip_events(&mut self) -> Result<usize, PresentError> {
        let events = self
            .card
            .receive_events()
            .map_err(|e| PresentError::device("receive_events", e))?;
        let crtc = self.crtc;
        Ok(events
            .filter(|event| matches!(event, Event::PageFlip(flip) if flip.crtc == crtc))
            .count())
    }

    fn restore(&mut self) -> Result<(), PresentError> {
        let saved = &self.saved_crtc;
        self.card
            .set_crtc(
                saved.handle(),
                saved.framebuffer(),
                saved.position(),
                &[self.connector],
                saved.mode(),
            )
            .map_err(|e| PresentError::device("restore_crtc", e))?;
        info!("restored original display configuration");
        Ok(())
    }

    fn release_buffer(
        &mut self,
        buffer: DumbBuffer,
        fb: Option<framebuffer::Handle>,
    ) -> Result<(), PresentError> {
        if let Some(fb) = fb {
            self.card
                .destroy_framebuffer(fb)
                .map_err(|e| PresentError::device("destroy_framebuffer", e))?;
        }
        self.card
            .destroy_dumb_buffer(buffer)
            .map_err(|e| PresentError::device("destroy_dumb_buffer", e))
    }
}

impl Drop for KmsDevice {
    fn drop(&mut self) {
        if let Err(e) = drm::Device::release_master_lock(&self.card) {
            warn!("failed to drop DRM master: {}", e);
        }
    }
}
