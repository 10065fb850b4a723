//! libinput/udev backed input source

use std::fs::OpenOptions;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use input::event::keyboard::{KeyState, KeyboardEvent, KeyboardEventTrait};
use input::event::pointer::{Axis, ButtonState, PointerEvent, PointerScrollEvent};
use input::event::Event;
use input::{Libinput, LibinputInterface};
use log::{debug, info};

use super::{InputEvent, InputSource, Modifiers, Pointer};
use crate::error::InputError;

/// Scroll values are reported ten times the libinput value.
const SCROLL_SCALE: f64 = 10.0;

struct Interface;

impl LibinputInterface for Interface {
    fn open_restricted(&mut self, path: &Path, flags: i32) -> Result<OwnedFd, i32> {
        let access = flags & libc::O_ACCMODE;
        OpenOptions::new()
            .custom_flags(flags)
            .read(access == libc::O_RDONLY || access == libc::O_RDWR)
            .write(access == libc::O_WRONLY || access == libc::O_RDWR)
            .open(path)
            .map(OwnedFd::from)
            .map_err(|e| e.raw_os_error().unwrap_or(libc::EIO))
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        drop(fd);
    }
}

pub struct LibinputSource {
    li: Libinput,
    pointer: Pointer,
    modifiers: Modifiers,
    screen: (u32, u32),
}

impl LibinputSource {
    /// Open every input device on `seat` through udev.
    pub fn new(seat: &str, screen: (u32, u32)) -> Result<Self, InputError> {
        let mut li = Libinput::new_with_udev(Interface);
        li.udev_assign_seat(seat)
            .map_err(|()| InputError::Seat(seat.to_string()))?;
        info!("libinput: assigned seat {}", seat);

        Ok(Self {
            li,
            pointer: Pointer::new(screen.0, screen.1),
            modifiers: Modifiers::empty(),
            screen,
        })
    }

    fn scroll<E: PointerScrollEvent>(event: &E) -> Option<InputEvent> {
        let value = |axis| {
            if event.has_axis(axis) {
                event.scroll_value(axis) * SCROLL_SCALE
            } else {
                0.0
            }
        };
        let (dx, dy) = (value(Axis::Horizontal), value(Axis::Vertical));
        (dx != 0.0 || dy != 0.0).then_some(InputEvent::Scroll { dx, dy })
    }

    fn translate(&mut self, event: Event) -> Option<InputEvent> {
        match event {
            Event::Keyboard(KeyboardEvent::Key(k)) => {
                let code = k.key();
                let pressed = matches!(k.key_state(), KeyState::Pressed);
                self.modifiers.track(code, pressed);
                Some(InputEvent::Key {
                    code,
                    pressed,
                    modifiers: self.modifiers,
                })
            }
            Event::Pointer(PointerEvent::Motion(m)) => Some(self.pointer.move_by(m.dx(), m.dy())),
            Event::Pointer(PointerEvent::MotionAbsolute(m)) => {
                let x = m.absolute_x_transformed(self.screen.0);
                let y = m.absolute_y_transformed(self.screen.1);
                Some(self.pointer.move_to(x, y))
            }
            Event::Pointer(PointerEvent::Button(b)) => Some(InputEvent::Button {
                button: b.button(),
                pressed: matches!(b.button_state(), ButtonState::Pressed),
            }),
            Event::Pointer(PointerEvent::ScrollWheel(e)) => Self::scroll(&e),
            Event::Pointer(PointerEvent::ScrollFinger(e)) => Self::scroll(&e),
            Event::Pointer(PointerEvent::ScrollContinuous(e)) => Self::scroll(&e),
            _ => None,
        }
    }
}

impl InputSource for LibinputSource {
    fn poll_fd(&self) -> BorrowedFd<'_> {
        self.li.as_fd()
    }

    fn drain(&mut self) -> Result<Vec<InputEvent>, InputError> {
        self.li.dispatch().map_err(InputError::Dispatch)?;
        let mut out = Vec::new();
        while let Some(event) = self.li.next() {
            if let Some(ev) = self.translate(event) {
                out.push(ev);
            }
        }
        if !out.is_empty() {
            debug!("libinput: {} events", out.len());
        }
        Ok(out)
    }
}
