//! Remote display capability and the console wrapper protocols drive.
//!
//! The remote display exposes only pixels and raw input events; there is no
//! semantic UI tree. `DisplayDriver` is the opaque transport capability
//! (screenshot + keyboard/mouse injection) and `RemoteConsole` layers the
//! reference-frame coordinate mapping and shift-aware character typing on
//! top, so protocol code never deals with surface sizes or key modifiers.

pub mod synthetic;

use std::time::Duration;

use crate::geometry::{CoordinateMap, Point};

pub use synthetic::{Framebuffer, SyntheticConnector, SyntheticConsole};

/// Result type for display operations
pub type DisplayResult<T> = Result<T, DisplayError>;

/// Errors that can occur on the remote display transport
#[derive(Debug)]
pub enum DisplayError {
    /// Failed to establish or keep the display connection
    Connection(String),
    /// Screenshot capture failed
    Capture(String),
    /// Keyboard/mouse injection failed
    Input(String),
}

impl std::fmt::Display for DisplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayError::Connection(msg) => write!(f, "Display connection error: {}", msg),
            DisplayError::Capture(msg) => write!(f, "Capture error: {}", msg),
            DisplayError::Input(msg) => write!(f, "Input injection error: {}", msg),
        }
    }
}

impl std::error::Error for DisplayError {}

/// Transport capability for one live remote-display session.
///
/// Implementations forward raw key events and pointer clicks and return PNG
/// screenshots. `screenshot` must return within the deployment's capture
/// timeout rather than blocking indefinitely; a slow frame is a `Capture`
/// error, not a hang. Coordinates passed to `click` are surface coordinates;
/// callers go through [`RemoteConsole`] for reference-frame input.
pub trait DisplayDriver {
    /// Capture the current frame as PNG bytes
    fn screenshot(&mut self) -> DisplayResult<Vec<u8>>;

    /// Press and release a key or chord (e.g. "Enter", "Control+A", "Meta+R")
    fn send_key(&mut self, key: &str) -> DisplayResult<()>;

    /// Hold a modifier key down
    fn key_down(&mut self, key: &str) -> DisplayResult<()>;

    /// Release a held modifier key
    fn key_up(&mut self, key: &str) -> DisplayResult<()>;

    /// Type plain text as individual keystrokes (no modifier handling)
    fn type_text(&mut self, text: &str) -> DisplayResult<()>;

    /// Click at surface coordinates
    fn click(&mut self, x: f64, y: f64) -> DisplayResult<()>;

    /// Rendered surface size in pixels
    fn surface_size(&mut self) -> DisplayResult<(u32, u32)>;

    /// Issue the wake gesture (Ctrl+Alt+Del equivalent)
    fn wake(&mut self) -> DisplayResult<()>;
}

/// Capability to open a display session from a connection URL.
///
/// Connecting blocks for the given settle time; implementations should abort
/// early when `is_cancelled` reports true.
pub trait DisplayConnector {
    fn connect(
        &self,
        url: &str,
        settle: Duration,
        is_cancelled: &dyn Fn() -> bool,
    ) -> DisplayResult<Box<dyn DisplayDriver>>;
}

/// Characters that need the Shift modifier on a US keyboard, mapped to the
/// base key that produces them.
fn shift_base(c: char) -> Option<char> {
    match c {
        '!' => Some('1'),
        '@' => Some('2'),
        '#' => Some('3'),
        '$' => Some('4'),
        '%' => Some('5'),
        '^' => Some('6'),
        '&' => Some('7'),
        '*' => Some('8'),
        '(' => Some('9'),
        ')' => Some('0'),
        '_' => Some('-'),
        '+' => Some('='),
        '{' => Some('['),
        '}' => Some(']'),
        '|' => Some('\\'),
        ':' => Some(';'),
        '"' => Some('\''),
        '<' => Some(','),
        '>' => Some('.'),
        '?' => Some('/'),
        '~' => Some('`'),
        _ => None,
    }
}

/// Whether typing `c` requires the Shift modifier
pub fn needs_shift(c: char) -> bool {
    c.is_ascii_uppercase() || shift_base(c).is_some()
}

/// The console protocols type into and click on.
///
/// Owns the transport driver for the lifetime of the session and rescales
/// every reference-frame coordinate to the rendered surface.
pub struct RemoteConsole {
    driver: Box<dyn DisplayDriver>,
    map: CoordinateMap,
}

impl RemoteConsole {
    /// Wrap a connected driver, probing the rendered surface size once.
    pub fn new(mut driver: Box<dyn DisplayDriver>) -> DisplayResult<Self> {
        let (w, h) = driver.surface_size()?;
        Ok(Self {
            driver,
            map: CoordinateMap::new(w, h),
        })
    }

    /// Rendered surface size the coordinate map targets
    pub fn surface_size(&self) -> (u32, u32) {
        self.map.surface_size()
    }

    /// Capture the current frame as PNG bytes
    pub fn screenshot(&mut self) -> DisplayResult<Vec<u8>> {
        self.driver.screenshot()
    }

    /// Press and release a key or chord
    pub fn send_key(&mut self, key: &str) -> DisplayResult<()> {
        self.driver.send_key(key)
    }

    /// Issue the wake gesture
    pub fn wake(&mut self) -> DisplayResult<()> {
        self.driver.wake()
    }

    /// Click a reference-frame point, rescaled to the surface
    pub fn click_at(&mut self, p: Point) -> DisplayResult<()> {
        let (x, y) = self.map.map_point(p);
        log::debug!("click at ({}, {}) -> surface ({:.1}, {:.1})", p.x, p.y, x, y);
        self.driver.click(x, y)
    }

    /// Type a single character, routing shift characters through explicit
    /// press-hold/release of the modifier. The transport forwards raw key
    /// events only, so a composed keystroke would lose the modifier.
    pub fn type_char(&mut self, c: char) -> DisplayResult<()> {
        if c.is_ascii_uppercase() {
            self.driver.key_down("Shift")?;
            std::thread::sleep(Duration::from_millis(50));
            self.driver.type_text(&c.to_ascii_lowercase().to_string())?;
            std::thread::sleep(Duration::from_millis(50));
            self.driver.key_up("Shift")
        } else if let Some(base) = shift_base(c) {
            self.driver.key_down("Shift")?;
            std::thread::sleep(Duration::from_millis(50));
            self.driver.type_text(&base.to_string())?;
            std::thread::sleep(Duration::from_millis(50));
            self.driver.key_up("Shift")
        } else {
            self.driver.type_text(&c.to_string())
        }
    }

    /// Type plain text without per-character pacing (labels, program names)
    pub fn type_text(&mut self, text: &str) -> DisplayResult<()> {
        self.driver.type_text(text)
    }

    /// Select all and erase the focused input field
    pub fn clear_field(&mut self) -> DisplayResult<()> {
        self.driver.send_key("Control+A")?;
        std::thread::sleep(Duration::from_millis(300));
        self.driver.send_key("Backspace")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_shift_uppercase() {
        assert!(needs_shift('A'));
        assert!(needs_shift('Z'));
        assert!(!needs_shift('a'));
    }

    #[test]
    fn test_needs_shift_specials() {
        for c in "!@#$%^&*()_+{}|:\"<>?~".chars() {
            assert!(needs_shift(c), "expected shift for {:?}", c);
        }
        for c in "1234567890-=[]\\;',./`".chars() {
            assert!(!needs_shift(c), "no shift expected for {:?}", c);
        }
    }

    #[test]
    fn test_shift_base_pipe() {
        assert_eq!(shift_base('|'), Some('\\'));
        assert_eq!(shift_base('?'), Some('/'));
        assert_eq!(shift_base('x'), None);
    }
}
