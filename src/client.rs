//! Blocking client for the control protocol
//!
//! ```no_run
//! use flux::client::FluxClient;
//! use flux::scene::{GeometryPatch, WidgetKind};
//!
//! # fn main() -> Result<(), flux::error::ClientError> {
//! let mut client = FluxClient::connect("/tmp/flux_comp.sock")?;
//! let window = client.create_window()?;
//! client.create_widget(window, "bg", WidgetKind::Rect, None)?;
//! client.set_widget_geometry(window, "bg", GeometryPatch::from_raw(0.0, 0.0, 200.0, 100.0, 8.0, 0.0))?;
//! client.set_widget_color(window, "bg", "#ff0000ff")?;
//! client.render(window)?;
//! client.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::error::{ClientError, ProtocolError};
use crate::protocol::{Command, Request, Response, HEADER_LEN};
use crate::scene::{GeometryPatch, WidgetKind, WindowId};

/// Responses are small; anything larger is a broken stream.
const MAX_RESPONSE: usize = 4096;

pub struct FluxClient {
    stream: UnixStream,
}

impl FluxClient {
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path.as_ref())?;
        debug!("connected to {}", path.as_ref().display());
        Ok(Self { stream })
    }

    /// Bound every read so a stalled compositor cannot hang the caller.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send one command and wait for its response. Error responses are
    /// returned as values, not as `Err`.
    pub fn request(&mut self, window: WindowId, command: &Command) -> Result<Response, ClientError> {
        self.request_raw(window.0, &command.to_wire())
    }

    /// Send a command string verbatim.
    pub fn request_raw(&mut self, window: u32, command: &str) -> Result<Response, ClientError> {
        self.stream.write_all(&Request::new(window, command).encode())?;
        self.read_response()
    }

    fn read_response(&mut self) -> Result<Response, ClientError> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header)?;
        let len = u32::from_le_bytes(header) as usize;
        if len > MAX_RESPONSE {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                limit: MAX_RESPONSE,
            }
            .into());
        }
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body)?;
        Ok(Response::decode_body(&body)?)
    }

    fn expect_ok(&mut self, window: WindowId, command: Command) -> Result<(), ClientError> {
        match self.request(window, &command)? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn create_window(&mut self) -> Result<WindowId, ClientError> {
        match self.request(WindowId(0), &Command::CreateWindow)? {
            Response::Window(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    pub fn screen_size(&mut self) -> Result<(u32, u32), ClientError> {
        match self.request(WindowId(0), &Command::GetScreenSize)? {
            Response::ScreenSize { width, height } => Ok((width, height)),
            other => Err(unexpected(other)),
        }
    }

    pub fn show(&mut self, window: WindowId) -> Result<(), ClientError> {
        self.expect_ok(window, Command::Show)
    }

    pub fn hide(&mut self, window: WindowId) -> Result<(), ClientError> {
        self.expect_ok(window, Command::Hide)
    }

    /// Make `window` visible and give it the screen.
    pub fn render(&mut self, window: WindowId) -> Result<(), ClientError> {
        self.expect_ok(window, Command::Render)
    }

    pub fn destroy(&mut self, window: WindowId) -> Result<(), ClientError> {
        self.expect_ok(window, Command::Destroy)
    }

    pub fn create_widget(
        &mut self,
        window: WindowId,
        id: &str,
        kind: WidgetKind,
        parent: Option<&str>,
    ) -> Result<(), ClientError> {
        self.expect_ok(
            window,
            Command::CreateWidget {
                id: id.to_string(),
                kind,
                parent: parent.map(str::to_string),
            },
        )
    }

    pub fn set_widget_geometry(
        &mut self,
        window: WindowId,
        id: &str,
        patch: GeometryPatch,
    ) -> Result<(), ClientError> {
        self.expect_ok(
            window,
            Command::SetWidgetGeometry {
                id: id.to_string(),
                patch,
            },
        )
    }

    pub fn set_widget_color(&mut self, window: WindowId, id: &str, hex: &str) -> Result<(), ClientError> {
        self.expect_ok(
            window,
            Command::SetWidgetColor {
                id: id.to_string(),
                color: hex.to_string(),
            },
        )
    }

    pub fn set_widget_text(&mut self, window: WindowId, id: &str, text: &str) -> Result<(), ClientError> {
        self.expect_ok(
            window,
            Command::SetWidgetText {
                id: id.to_string(),
                text: text.to_string(),
            },
        )
    }

    pub fn set_widget_font(
        &mut self,
        window: WindowId,
        id: &str,
        path: &str,
        size: f32,
    ) -> Result<(), ClientError> {
        self.expect_ok(
            window,
            Command::SetWidgetFont {
                id: id.to_string(),
                path: path.to_string(),
                size,
            },
        )
    }

    pub fn set_widget_image(&mut self, window: WindowId, id: &str, path: &str) -> Result<(), ClientError> {
        self.expect_ok(
            window,
            Command::SetWidgetImage {
                id: id.to_string(),
                path: path.to_string(),
            },
        )
    }

    pub fn remove_widget(&mut self, window: WindowId, id: &str) -> Result<(), ClientError> {
        self.expect_ok(window, Command::RemoveWidget { id: id.to_string() })
    }

    /// Say goodbye. The compositor acknowledges and closes the connection.
    pub fn shutdown(mut self) -> Result<(), ClientError> {
        self.expect_ok(WindowId(0), Command::Shutdown)
    }
}

fn unexpected(response: Response) -> ClientError {
    match response {
        Response::Error(text) => ClientError::Rejected(text),
        other => ClientError::UnexpectedResponse(other),
    }
}
