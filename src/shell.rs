//! Built-in shell windows
//!
//! The compositor always has something to show: a home window with a
//! background, a clock and an optional picture, a menu overlay toggled from
//! the keyboard, and a cursor that follows the pointer. None of these live in the client
//! registry, so clients can neither address nor destroy them.

use std::path::Path;
use std::time::Duration;

use chrono::{Local, Timelike};
use log::{debug, info, warn};

use crate::assets::AssetLoader;
use crate::config::ShellConfig;
use crate::error::SceneError;
use crate::input::InputEvent;
use crate::renderer::Resources;
use crate::scene::{
    Color, FontId, FrameContext, FrameHook, Geometry, GeometryPatch, SceneLimits, Widget,
    WidgetKind, Window,
};

const HOME_BACKGROUND: &str = "sys-background";
const HOME_CLOCK: &str = "sys-clock";
const HOME_IMAGE: &str = "sys-home-image";
const MENU_SCRIM: &str = "menu-background";
const MENU_BODY: &str = "menu-body";
const MENU_CLOCK: &str = "menu-clock";
const MENU_TITLE: &str = "menu-title";
const CURSOR: &str = "sys-cursor";

/// Distance of the clock from the top-right corner.
const CLOCK_MARGIN_X: f32 = 40.0;
const CLOCK_MARGIN_Y: f32 = 20.0;

const MENU_MARGIN: f32 = 40.0;
const MENU_HEIGHT: f32 = 400.0;
/// Title inset inside the menu panel.
const MENU_TITLE_PAD: f32 = 20.0;

const HOME_IMAGE_GEOMETRY: Geometry = Geometry {
    x: 100.0,
    y: 500.0,
    w: 200.0,
    h: 200.0,
    radius: 10.0,
    border_width: 0.0,
};

/// How often the clock reads the wall time.
const CLOCK_POLL: Duration = Duration::from_secs(1);

/// 12-hour clock text, e.g. `09:05 pm`.
pub fn clock_text<T: Timelike>(time: &T) -> String {
    let (pm, hour) = time.hour12();
    format!(
        "{:02}:{:02} {}",
        hour,
        time.minute(),
        if pm { "pm" } else { "am" }
    )
}

/// Frame hook keeping a text widget showing the local time, anchored to the
/// top-right corner. Reads the time at most once per [`CLOCK_POLL`] of frame
/// time and only touches the widget when the minute changes.
fn clock_hook(widget_id: &'static str, font: FontId) -> FrameHook {
    let mut shown = String::new();
    let mut since_poll = CLOCK_POLL;
    Box::new(move |window: &mut Window, ctx: &FrameContext<'_>| {
        since_poll += ctx.dt;
        if since_poll < CLOCK_POLL {
            return;
        }
        since_poll = Duration::ZERO;

        let now = clock_text(&Local::now());
        if now == shown {
            return;
        }
        if let Some(m) = ctx.text.measure(font, &now) {
            let x = ctx.screen.0 as f32 - (m.width + CLOCK_MARGIN_X);
            let y = m.height + CLOCK_MARGIN_Y;
            if let Err(e) = window.set_geometry(widget_id, GeometryPatch::position(x, y)) {
                warn!("clock: {}", e);
            }
        }
        if let Err(e) = window.set_text(widget_id, &now) {
            warn!("clock: {}", e);
        }
        shown = now;
    })
}

fn color(hex: &str) -> Result<Color, SceneError> {
    Color::parse_hex(hex)
}

fn load_font(
    resources: &mut Resources,
    assets: &dyn AssetLoader,
    path: &Path,
    size: f32,
) -> Option<FontId> {
    let id = match resources.cached_font(path, size) {
        Some(id) => id,
        None => match assets.load_font(path, size) {
            Ok(font) => resources.insert_font(path, size, font),
            Err(e) => {
                warn!("shell font unavailable: {}", e);
                return None;
            }
        },
    };
    // No client widget refers to shell fonts.
    resources.pin_font(id);
    Some(id)
}

#[derive(Debug)]
pub struct Shell {
    home: Window,
    menu: Window,
    cursor: Window,
    menu_open: bool,
    menu_key: u32,
}

impl Shell {
    pub fn new(
        screen: (u32, u32),
        limits: SceneLimits,
        config: &ShellConfig,
        resources: &mut Resources,
        assets: &dyn AssetLoader,
    ) -> Result<Self, SceneError> {
        let (w, h) = (screen.0 as f32, screen.1 as f32);
        let heading = config
            .font
            .as_deref()
            .and_then(|path| load_font(resources, assets, path, config.heading_size));
        let body = config
            .font
            .as_deref()
            .and_then(|path| load_font(resources, assets, path, config.body_size));

        let clock = |id: &'static str| -> Result<Widget, SceneError> {
            let mut widget = Widget::new(id, WidgetKind::Text)?.with_color(Color::WHITE);
            if let Some(font) = heading {
                widget.set_font(font);
            }
            Ok(widget)
        };

        let mut home = Window::new(screen.0, screen.1, limits)?;
        home.append_widget(
            Widget::new(HOME_BACKGROUND, WidgetKind::Rect)?
                .with_geometry(Geometry {
                    w,
                    h,
                    ..Geometry::default()
                })
                .with_color(color(&config.background_color)?),
        )?;
        if let Some(path) = config.home_image.as_deref() {
            match assets.load_image(path) {
                Ok(texture) => {
                    let mut widget = Widget::new(HOME_IMAGE, WidgetKind::Image)?
                        .with_geometry(HOME_IMAGE_GEOMETRY)
                        .with_color(Color::WHITE);
                    widget.set_image(resources.insert_texture(texture));
                    home.append_widget(widget)?;
                }
                Err(e) => warn!("home image unavailable: {}", e),
            }
        }
        home.append_widget(clock(HOME_CLOCK)?)?;
        home.set_visible(true);

        let mut menu = Window::new(screen.0, screen.1, limits)?;
        menu.append_widget(
            Widget::new(MENU_SCRIM, WidgetKind::Rect)?
                .with_geometry(Geometry {
                    w,
                    h,
                    ..Geometry::default()
                })
                .with_color(color(&config.menu_scrim_color)?),
        )?;
        menu.append_widget(
            Widget::new(MENU_BODY, WidgetKind::Rect)?
                .with_geometry(Geometry {
                    x: MENU_MARGIN,
                    y: (h - MENU_MARGIN - MENU_HEIGHT).max(0.0),
                    w: (w - 2.0 * MENU_MARGIN).max(0.0),
                    h: MENU_HEIGHT.min(h),
                    radius: 10.0,
                    border_width: 0.0,
                })
                .with_color(color(&config.menu_color)?),
        )?;
        let mut title = Widget::new(MENU_TITLE, WidgetKind::Text)?
            .with_geometry(Geometry {
                x: MENU_TITLE_PAD,
                y: MENU_TITLE_PAD + config.body_size,
                ..Geometry::default()
            })
            .with_color(Color::WHITE);
        title.set_text(&config.menu_title);
        if let Some(font) = body {
            title.set_font(font);
        }
        menu.append_child(MENU_BODY, title)?;
        menu.append_widget(clock(MENU_CLOCK)?)?;

        if let Some(font) = heading {
            home.set_frame_hook(clock_hook(HOME_CLOCK, font));
            menu.set_frame_hook(clock_hook(MENU_CLOCK, font));
        }

        let cursor = Self::cursor_window(screen, limits, config, resources, assets)?;

        info!("shell ready ({}x{})", screen.0, screen.1);
        Ok(Self {
            home,
            menu,
            cursor,
            menu_open: false,
            menu_key: config.menu_key,
        })
    }

    fn cursor_window(
        screen: (u32, u32),
        limits: SceneLimits,
        config: &ShellConfig,
        resources: &mut Resources,
        assets: &dyn AssetLoader,
    ) -> Result<Window, SceneError> {
        let size = config.cursor_size;
        let geometry = Geometry {
            x: screen.0 as f32 / 2.0,
            y: screen.1 as f32 / 2.0,
            w: size,
            h: size,
            ..Geometry::default()
        };

        let texture = config
            .cursor_image
            .as_deref()
            .and_then(|path| match assets.load_image(path) {
                Ok(texture) => Some(resources.insert_texture(texture)),
                Err(e) => {
                    warn!("cursor image unavailable, drawing a square: {}", e);
                    None
                }
            });

        let widget = match texture {
            Some(texture) => {
                let mut widget = Widget::new(CURSOR, WidgetKind::Image)?.with_geometry(geometry);
                widget.set_image(texture);
                widget
            }
            None => Widget::new(CURSOR, WidgetKind::Rect)?.with_geometry(Geometry {
                radius: 2.0,
                ..geometry
            }),
        };

        let mut window = Window::new(screen.0, screen.1, limits)?;
        window.append_widget(widget.with_color(Color::WHITE))?;
        Ok(window)
    }

    /// React to an input event. Returns true when shell state changed.
    pub fn handle_input(&mut self, event: &InputEvent) -> bool {
        match *event {
            InputEvent::PointerMotion { x, y, .. } => {
                if let Err(e) = self
                    .cursor
                    .set_geometry(CURSOR, GeometryPatch::position(x as f32, y as f32))
                {
                    warn!("cursor: {}", e);
                }
                self.cursor.set_visible(true);
                true
            }
            InputEvent::Key {
                code,
                pressed: true,
                ..
            } if code == self.menu_key => {
                self.toggle_menu();
                true
            }
            InputEvent::Key {
                code, pressed: true, ..
            } => {
                debug!("key pressed: {}", code);
                false
            }
            _ => false,
        }
    }

    pub fn toggle_menu(&mut self) {
        self.menu_open = !self.menu_open;
        self.menu.set_visible(self.menu_open);
        debug!("menu {}", if self.menu_open { "opened" } else { "closed" });
    }

    pub fn menu_open(&self) -> bool {
        self.menu_open
    }

    pub fn home(&self) -> &Window {
        &self.home
    }

    pub fn home_mut(&mut self) -> &mut Window {
        &mut self.home
    }

    pub fn menu(&self) -> &Window {
        &self.menu
    }

    pub fn menu_mut(&mut self) -> &mut Window {
        &mut self.menu
    }

    pub fn cursor(&self) -> &Window {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut Window {
        &mut self.cursor
    }
}
