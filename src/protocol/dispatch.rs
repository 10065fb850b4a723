//! Request dispatcher
//!
//! One synchronous entry point: a decoded [`Request`] is parsed into a
//! [`Command`], applied to the scene and answered. Every failure here is
//! request-local and becomes an `ERROR: ...` response; nothing escapes to
//! the event loop.

use std::path::Path;

use log::{debug, warn};

use super::command::{summarize, Command};
use super::wire::{Request, Response};
use crate::assets::AssetLoader;
use crate::error::{ProtocolError, SceneError};
use crate::renderer::Resources;
use crate::scene::{Mutation, Scene, TextureId, Widget, WidgetKind, Window, WindowId};

/// Response to send plus whether the connection should be closed after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    pub close: bool,
}

impl Reply {
    fn send(response: Response) -> Self {
        Self {
            response,
            close: false,
        }
    }
}

impl From<&SceneError> for Response {
    fn from(err: &SceneError) -> Self {
        Response::error(match err {
            SceneError::UnknownWindow(_) => "invalid window",
            SceneError::UnknownWidget(_) => "invalid widget",
            SceneError::CapacityExceeded { .. } => "capacity exceeded",
            SceneError::DuplicateWidget(_) => "duplicate widget",
            SceneError::InvalidWidgetId(_) => "invalid widget id",
            SceneError::InvalidColor(_) => "invalid color",
            SceneError::TargetAllocation { .. } => "out of memory",
        })
    }
}

impl From<&ProtocolError> for Response {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownOpcode(_) => Response::error("invalid command"),
            _ => Response::error("malformed request"),
        }
    }
}

/// Everything a request may touch, borrowed from the compositor context for
/// the duration of one dispatch.
pub struct DispatchTarget<'a> {
    pub scene: &'a mut Scene,
    pub resources: &'a mut Resources,
    pub assets: &'a dyn AssetLoader,
    pub focus: &'a mut Option<WindowId>,
}

impl DispatchTarget<'_> {
    pub fn dispatch(&mut self, request: &Request) -> Reply {
        debug!("request window={} {}", request.window, summarize(&request.command));

        let command = match Command::parse(&request.command) {
            Ok(command) => command,
            Err(e) => {
                warn!("rejected request: {}", e);
                return Reply::send(Response::from(&e));
            }
        };

        match command {
            Command::CreateWindow => {
                return match self.scene.create_window() {
                    Ok(id) => Reply::send(Response::Window(id)),
                    Err(e) => self.fail(&e),
                };
            }
            Command::GetScreenSize => {
                let (width, height) = self.scene.screen_size();
                return Reply::send(Response::ScreenSize { width, height });
            }
            Command::Shutdown => {
                debug!("client said goodbye");
                return Reply {
                    response: Response::Ok,
                    close: true,
                };
            }
            _ => {}
        }

        let id = WindowId(request.window);
        if !self.scene.contains(id) {
            return self.fail(&SceneError::UnknownWindow(id));
        }

        match self.apply(id, command) {
            Ok(()) => Reply::send(Response::Ok),
            Err(e) => self.fail(&e),
        }
    }

    fn fail(&self, err: &SceneError) -> Reply {
        warn!("request failed: {}", err);
        Reply::send(Response::from(err))
    }

    fn window(&mut self, id: WindowId) -> Result<&mut Window, SceneError> {
        self.scene.window_mut(id).ok_or(SceneError::UnknownWindow(id))
    }

    fn apply(&mut self, id: WindowId, command: Command) -> Result<(), SceneError> {
        let drops_fonts = matches!(
            command,
            Command::Destroy
                | Command::CreateWidget { .. }
                | Command::SetWidgetFont { .. }
                | Command::RemoveWidget { .. }
        );
        let result = self.apply_command(id, command);
        if drops_fonts {
            let in_use = self.scene.fonts_in_use();
            self.resources.retain_fonts(&in_use);
        }
        result
    }

    fn apply_command(&mut self, id: WindowId, command: Command) -> Result<(), SceneError> {
        match command {
            Command::Show => self.scene.set_visible(id, true)?,
            Command::Hide => self.scene.set_visible(id, false)?,
            Command::Render => {
                self.scene.set_visible(id, true)?;
                *self.focus = Some(id);
            }
            Command::Destroy => {
                let textures = self.scene.destroy_window(id)?;
                self.resources.release_textures(textures);
                if *self.focus == Some(id) {
                    *self.focus = None;
                }
            }
            Command::CreateWidget {
                id: widget_id,
                kind,
                parent,
            } => {
                let widget = Widget::new(widget_id, kind)?;
                let window = self.window(id)?;
                let replaced = match parent {
                    Some(parent) => window.append_child(&parent, widget)?,
                    None => window.append_widget(widget)?,
                };
                self.resources.release_textures(replaced);
            }
            Command::SetWidgetGeometry { id: widget_id, patch } => {
                self.window(id)?.set_geometry(&widget_id, patch)?;
            }
            Command::SetWidgetColor { id: widget_id, color } => {
                self.window(id)?.set_color(&widget_id, &color)?;
            }
            Command::SetWidgetText { id: widget_id, text } => {
                self.window(id)?.set_text(&widget_id, &text)?;
            }
            Command::SetWidgetFont {
                id: widget_id,
                path,
                size,
            } => self.set_font(id, &widget_id, Path::new(&path), size)?,
            Command::SetWidgetImage { id: widget_id, path } => {
                self.set_image(id, &widget_id, Path::new(&path))?
            }
            Command::RemoveWidget { id: widget_id } => {
                let textures = self.window(id)?.remove_widget(&widget_id)?;
                self.resources.release_textures(textures);
            }
            Command::CreateWindow | Command::GetScreenSize | Command::Shutdown => {}
        }
        Ok(())
    }

    /// Kind check before touching the loader, so a mismatched request never
    /// loads anything.
    fn expect_kind(
        &mut self,
        window: WindowId,
        widget_id: &str,
        kind: WidgetKind,
    ) -> Result<bool, SceneError> {
        let widget = self
            .window(window)?
            .widget(widget_id)
            .ok_or_else(|| SceneError::UnknownWidget(widget_id.to_string()))?;
        if widget.kind() != kind {
            warn!(
                "ignoring {} content for {} widget '{}'",
                kind,
                widget.kind(),
                widget_id
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn set_font(
        &mut self,
        window: WindowId,
        widget_id: &str,
        path: &Path,
        size: f32,
    ) -> Result<(), SceneError> {
        if !self.expect_kind(window, widget_id, WidgetKind::Text)? {
            return Ok(());
        }

        let font = match self.resources.cached_font(path, size) {
            Some(font) => font,
            None => match self.assets.load_font(path, size) {
                Ok(font) => self.resources.insert_font(path, size, font),
                Err(e) => {
                    // Asset failures leave the widget untouched.
                    warn!("font load failed: {}", e);
                    return Ok(());
                }
            },
        };
        self.window(window)?.set_font(widget_id, font)?;
        Ok(())
    }

    fn set_image(&mut self, window: WindowId, widget_id: &str, path: &Path) -> Result<(), SceneError> {
        if !self.expect_kind(window, widget_id, WidgetKind::Image)? {
            return Ok(());
        }

        let texture = match self.assets.load_image(path) {
            Ok(texture) => self.resources.insert_texture(texture),
            Err(e) => {
                warn!("image load failed: {}", e);
                return Ok(());
            }
        };
        let released: Option<TextureId> = match self.window(window)?.set_image(widget_id, texture)? {
            Mutation::Replaced(old) => Some(old),
            Mutation::Ignored => Some(texture),
            Mutation::Applied => None,
        };
        self.resources.release_textures(released);
        Ok(())
    }
}
