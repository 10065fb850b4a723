//! Typed command schema
//!
//! Commands travel as `OPCODE[:arg[:arg...]]`. Arguments are separated by
//! `:`; a literal colon, backslash or newline inside an argument is written
//! `\:`, `\\` or `\n`. Free-form trailing arguments (widget text, file
//! paths) take the rest of the command, so an unescaped colon there is kept
//! as-is. `SET_WIDGET_FONT` is the exception: its size is always the last
//! field and the path is everything between the id and the size.

use std::fmt::Write as _;

use crate::error::ProtocolError;
use crate::scene::{GeometryPatch, WidgetKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateWindow,
    Show,
    Hide,
    Render,
    Destroy,
    CreateWidget {
        id: String,
        kind: WidgetKind,
        parent: Option<String>,
    },
    SetWidgetGeometry {
        id: String,
        patch: GeometryPatch,
    },
    SetWidgetColor {
        id: String,
        color: String,
    },
    SetWidgetText {
        id: String,
        text: String,
    },
    SetWidgetFont {
        id: String,
        path: String,
        size: f32,
    },
    SetWidgetImage {
        id: String,
        path: String,
    },
    RemoveWidget {
        id: String,
    },
    GetScreenSize,
    Shutdown,
}

/// Split at the first unescaped `:`. Returns the unescaped field and the
/// raw remainder after the separator, if there was one.
fn next_field(s: &str) -> (String, Option<&str>) {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => push_escape(&mut out, chars.next().map(|(_, c)| c)),
            ':' => return (out, Some(&s[i + 1..])),
            c => out.push(c),
        }
    }
    (out, None)
}

fn push_escape(out: &mut String, next: Option<char>) {
    match next {
        Some(':') => out.push(':'),
        Some('\\') => out.push('\\'),
        Some('n') => out.push('\n'),
        Some(other) => {
            out.push('\\');
            out.push(other);
        }
        None => out.push('\\'),
    }
}

/// Unescape a free-form remainder. Unescaped colons stay literal.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            push_escape(&mut out, chars.next());
        } else {
            out.push(c);
        }
    }
    out
}

/// Every field, split on unescaped colons.
fn all_fields(s: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut rest = Some(s);
    while let Some(r) = rest {
        let (field, tail) = next_field(r);
        fields.push(field);
        rest = tail;
    }
    fields
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ':' => out.push_str("\\:"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn malformed(opcode: &'static str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedArguments {
        opcode,
        reason: reason.into(),
    }
}

fn widget_id(opcode: &'static str, id: String) -> Result<String, ProtocolError> {
    if id.is_empty() {
        return Err(malformed(opcode, "empty widget id"));
    }
    Ok(id)
}

fn number(opcode: &'static str, field: &str) -> Result<f32, ProtocolError> {
    field
        .trim()
        .parse::<f32>()
        .map_err(|_| malformed(opcode, format!("'{field}' is not a number")))
}

impl Command {
    pub fn opcode(&self) -> &'static str {
        match self {
            Command::CreateWindow => "CREATE_WINDOW",
            Command::Show => "SHOW",
            Command::Hide => "HIDE",
            Command::Render => "RENDER",
            Command::Destroy => "DESTROY",
            Command::CreateWidget { .. } => "CREATE_WIDGET",
            Command::SetWidgetGeometry { .. } => "SET_WIDGET_GEOMETRY",
            Command::SetWidgetColor { .. } => "SET_WIDGET_COLOR",
            Command::SetWidgetText { .. } => "SET_WIDGET_TEXT",
            Command::SetWidgetFont { .. } => "SET_WIDGET_FONT",
            Command::SetWidgetImage { .. } => "SET_WIDGET_IMAGE",
            Command::RemoveWidget { .. } => "REMOVE_WIDGET",
            Command::GetScreenSize => "GET_SCREEN_SIZE",
            Command::Shutdown => "SHUTDOWN",
        }
    }

    /// Whether the request's window id must resolve in the registry.
    pub fn targets_window(&self) -> bool {
        !matches!(
            self,
            Command::CreateWindow | Command::GetScreenSize | Command::Shutdown
        )
    }

    pub fn parse(command: &str) -> Result<Self, ProtocolError> {
        let (opcode, args) = match command.split_once(':') {
            Some((op, args)) => (op, Some(args)),
            None => (command, None),
        };

        let simple = |cmd: Command| match args {
            None => Ok(cmd),
            Some(_) => Err(malformed(cmd.opcode(), "takes no arguments")),
        };

        match opcode {
            "CREATE_WINDOW" => simple(Command::CreateWindow),
            "SHOW" => simple(Command::Show),
            "HIDE" => simple(Command::Hide),
            "RENDER" => simple(Command::Render),
            "DESTROY" => simple(Command::Destroy),
            "GET_SCREEN_SIZE" => simple(Command::GetScreenSize),
            "SHUTDOWN" => simple(Command::Shutdown),
            "CREATE_WIDGET" => Self::parse_create_widget(args),
            "SET_WIDGET_GEOMETRY" => Self::parse_geometry(args),
            "SET_WIDGET_COLOR" => {
                const OP: &str = "SET_WIDGET_COLOR";
                let fields = all_fields(args.ok_or_else(|| malformed(OP, "missing arguments"))?);
                match <[String; 2]>::try_from(fields) {
                    Ok([id, color]) => Ok(Command::SetWidgetColor {
                        id: widget_id(OP, id)?,
                        color,
                    }),
                    Err(_) => Err(malformed(OP, "expected <id>:<#RRGGBBAA>")),
                }
            }
            "SET_WIDGET_TEXT" => {
                const OP: &str = "SET_WIDGET_TEXT";
                let (id, rest) = next_field(args.ok_or_else(|| malformed(OP, "missing arguments"))?);
                Ok(Command::SetWidgetText {
                    id: widget_id(OP, id)?,
                    text: rest.map(unescape).unwrap_or_default(),
                })
            }
            "SET_WIDGET_FONT" => Self::parse_font(args),
            "SET_WIDGET_IMAGE" => {
                const OP: &str = "SET_WIDGET_IMAGE";
                let (id, rest) = next_field(args.ok_or_else(|| malformed(OP, "missing arguments"))?);
                let path = rest.map(unescape).unwrap_or_default();
                if path.is_empty() {
                    return Err(malformed(OP, "missing file"));
                }
                Ok(Command::SetWidgetImage {
                    id: widget_id(OP, id)?,
                    path,
                })
            }
            "REMOVE_WIDGET" => {
                const OP: &str = "REMOVE_WIDGET";
                let fields = all_fields(args.ok_or_else(|| malformed(OP, "missing arguments"))?);
                match <[String; 1]>::try_from(fields) {
                    Ok([id]) => Ok(Command::RemoveWidget {
                        id: widget_id(OP, id)?,
                    }),
                    Err(_) => Err(malformed(OP, "expected <id>")),
                }
            }
            other => Err(ProtocolError::UnknownOpcode(other.to_string())),
        }
    }

    fn parse_create_widget(args: Option<&str>) -> Result<Self, ProtocolError> {
        const OP: &str = "CREATE_WIDGET";
        let fields = all_fields(args.ok_or_else(|| malformed(OP, "missing arguments"))?);
        let mut fields = fields.into_iter();
        let (Some(id), Some(kind)) = (fields.next(), fields.next()) else {
            return Err(malformed(OP, "expected <id>:<type>[:<parent>]"));
        };
        let parent = fields.next();
        if fields.next().is_some() {
            return Err(malformed(OP, "too many arguments"));
        }

        Ok(Command::CreateWidget {
            id: widget_id(OP, id)?,
            kind: kind.parse().map_err(|e: String| malformed(OP, e))?,
            parent: parent.map(|p| widget_id(OP, p)).transpose()?,
        })
    }

    fn parse_geometry(args: Option<&str>) -> Result<Self, ProtocolError> {
        const OP: &str = "SET_WIDGET_GEOMETRY";
        let fields = all_fields(args.ok_or_else(|| malformed(OP, "missing arguments"))?);
        if !(6..=7).contains(&fields.len()) {
            return Err(malformed(OP, "expected <id>:<x>:<y>:<w>:<h>:<radius>[:<border>]"));
        }

        let mut v = [-1.0f32; 6];
        for (slot, field) in v.iter_mut().zip(&fields[1..]) {
            *slot = number(OP, field)?;
        }
        let mut fields = fields.into_iter();
        let id = fields.next().unwrap_or_default();

        Ok(Command::SetWidgetGeometry {
            id: widget_id(OP, id)?,
            patch: GeometryPatch::from_raw(v[0], v[1], v[2], v[3], v[4], v[5]),
        })
    }

    fn parse_font(args: Option<&str>) -> Result<Self, ProtocolError> {
        const OP: &str = "SET_WIDGET_FONT";
        let mut fields = all_fields(args.ok_or_else(|| malformed(OP, "missing arguments"))?);
        if fields.len() < 3 {
            return Err(malformed(OP, "expected <id>:<file>:<size>"));
        }
        let size = number(OP, &fields.pop().unwrap_or_default())?;
        if !(size > 0.0) {
            return Err(malformed(OP, "size must be positive"));
        }
        let id = fields.remove(0);
        let path = fields.join(":");
        if path.is_empty() {
            return Err(malformed(OP, "missing file"));
        }

        Ok(Command::SetWidgetFont {
            id: widget_id(OP, id)?,
            path,
            size,
        })
    }

    /// Encode as a command string with all arguments escaped.
    pub fn to_wire(&self) -> String {
        let mut out = String::from(self.opcode());
        let mut arg = |s: &str| {
            out.push(':');
            out.push_str(&escape(s));
        };

        match self {
            Command::CreateWidget { id, kind, parent } => {
                arg(id);
                arg(kind.name());
                if let Some(parent) = parent {
                    arg(parent);
                }
            }
            Command::SetWidgetGeometry { id, patch } => {
                arg(id);
                let fields = [patch.x, patch.y, patch.w, patch.h, patch.radius, patch.border_width];
                for v in fields {
                    arg(&v.unwrap_or(-1.0).to_string());
                }
            }
            Command::SetWidgetColor { id, color } => {
                arg(id);
                arg(color);
            }
            Command::SetWidgetText { id, text } => {
                arg(id);
                arg(text);
            }
            Command::SetWidgetFont { id, path, size } => {
                arg(id);
                arg(path);
                arg(&size.to_string());
            }
            Command::SetWidgetImage { id, path } => {
                arg(id);
                arg(path);
            }
            Command::RemoveWidget { id } => arg(id),
            _ => {}
        }
        out
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Human-readable summary for logs, truncated for long text payloads.
pub fn summarize(command: &str) -> String {
    const LIMIT: usize = 64;
    if command.len() <= LIMIT {
        return command.to_string();
    }
    let mut out = String::with_capacity(LIMIT + 16);
    let cut = (0..=LIMIT)
        .rev()
        .find(|&i| command.is_char_boundary(i))
        .unwrap_or(0);
    let _ = write!(out, "{}... ({} bytes)", &command[..cut], command.len());
    out
}
