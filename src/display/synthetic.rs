//! Synthetic console: an in-memory display transport for tests and smoke runs.
//!
//! Simulates a minimal guest console behind the [`DisplayDriver`] trait: a
//! lock screen that wakes to a login screen, a desktop, a run dialog and a
//! shell window, each rendered as a real PNG frame. Every injected input is
//! recorded so tests can assert on exactly what the protocols sent.

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageBuffer, RgbImage};

use super::{DisplayConnector, DisplayDriver, DisplayError, DisplayResult};

/// An RGB framebuffer with simple drawing primitives
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    buffer: Vec<u8>,
}

impl Framebuffer {
    /// Create a framebuffer initialized to black
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            buffer: vec![0u8; (width * height * 3) as usize],
        }
    }

    /// Create a framebuffer initialized to a specific color
    pub fn with_color(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut fb = Self::new(width, height);
        fb.fill(color);
        fb
    }

    /// Decode a framebuffer from PNG bytes
    pub fn from_png_bytes(data: &[u8]) -> DisplayResult<Self> {
        let img = image::load_from_memory(data)
            .map_err(|e| DisplayError::Capture(format!("Failed to decode PNG: {}", e)))?;
        let rgb = img.to_rgb8();
        Ok(Self {
            width: rgb.width(),
            height: rgb.height(),
            buffer: rgb.into_raw(),
        })
    }

    /// Fill the entire framebuffer with a color
    pub fn fill(&mut self, color: [u8; 3]) {
        for chunk in self.buffer.chunks_exact_mut(3) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Draw a filled rectangle
    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        for py in y..(y + h).min(self.height) {
            for px in x..(x + w).min(self.width) {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Draw text using font8x8 glyphs; does not wrap
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
        let mut cursor_x = x;
        for ch in text.chars() {
            self.draw_char(cursor_x, y, ch, fg, bg);
            cursor_x += 8;
            if cursor_x >= self.width {
                break;
            }
        }
    }

    fn draw_char(&mut self, x: u32, y: u32, ch: char, fg: [u8; 3], bg: [u8; 3]) {
        let glyph = BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
        for (row_idx, row) in glyph.iter().enumerate() {
            let py = y + row_idx as u32;
            if py >= self.height {
                break;
            }
            for bit in 0..8 {
                let px = x + bit;
                if px >= self.width {
                    break;
                }
                // font8x8 stores LSB as leftmost pixel
                let color = if (row >> bit) & 1 == 1 { fg } else { bg };
                self.set_pixel(px, py, color);
            }
        }
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let idx = ((y * self.width + x) * 3) as usize;
        [self.buffer[idx], self.buffer[idx + 1], self.buffer[idx + 2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.buffer[idx..idx + 3].copy_from_slice(&color);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Encode the framebuffer as PNG bytes
    pub fn to_png(&self) -> DisplayResult<Vec<u8>> {
        let img: RgbImage = ImageBuffer::from_raw(self.width, self.height, self.buffer.clone())
            .expect("buffer size matches dimensions");
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| DisplayError::Capture(format!("Failed to encode PNG: {}", e)))?;
        Ok(bytes)
    }
}

/// One input event injected into the console
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Key(String),
    KeyDown(String),
    KeyUp(String),
    Text(String),
    Click(f64, f64),
    Wake,
}

/// Shared recorder for injected input, inspectable after the console has
/// been moved behind the driver trait.
#[derive(Debug, Clone, Default)]
pub struct InputRecorder {
    inner: Arc<Mutex<Vec<InputEvent>>>,
}

impl InputRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: InputEvent) {
        self.inner.lock().expect("recorder poisoned").push(event);
    }

    /// Snapshot of all events recorded so far
    pub fn events(&self) -> Vec<InputEvent> {
        self.inner.lock().expect("recorder poisoned").clone()
    }

    /// All plain text typed, concatenated
    pub fn typed_text(&self) -> String {
        self.events()
            .iter()
            .filter_map(|e| match e {
                InputEvent::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Number of wake gestures issued
    pub fn wake_count(&self) -> usize {
        self.events().iter().filter(|e| matches!(e, InputEvent::Wake)).count()
    }

    /// All click positions, in surface coordinates
    pub fn clicks(&self) -> Vec<(f64, f64)> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                InputEvent::Click(x, y) => Some((*x, *y)),
                _ => None,
            })
            .collect()
    }
}

/// What the simulated guest is currently showing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestStage {
    Locked,
    LoginScreen,
    Desktop,
    RunDialog,
    Shell,
}

/// A scripted in-memory guest console.
///
/// Renders its current stage as a PNG frame and advances through a small
/// state machine on input: wake unlocks to the login screen, Enter on the
/// login screen lands on the desktop, Meta+R opens the run dialog, Enter
/// there opens the shell, Alt+F4 closes it.
pub struct SyntheticConsole {
    width: u32,
    height: u32,
    stage: GuestStage,
    typed: String,
    username: String,
    recorder: InputRecorder,
}

impl SyntheticConsole {
    /// Console starting at the lock screen, at the given surface size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stage: GuestStage::Locked,
            typed: String::new(),
            username: "Administrator".to_string(),
            recorder: InputRecorder::new(),
        }
    }

    /// Console starting at a specific stage
    pub fn at_stage(width: u32, height: u32, stage: GuestStage) -> Self {
        let mut console = Self::new(width, height);
        console.stage = stage;
        console
    }

    /// Username shown on the simulated login screen
    pub fn with_displayed_username(mut self, username: &str) -> Self {
        self.username = username.to_string();
        self
    }

    /// Handle to the input recorder, kept by tests before the console moves
    /// behind the driver trait
    pub fn recorder(&self) -> InputRecorder {
        self.recorder.clone()
    }

    pub fn stage(&self) -> GuestStage {
        self.stage
    }

    fn render(&self) -> DisplayResult<Vec<u8>> {
        let mut fb = Framebuffer::with_color(self.width, self.height, [12, 30, 60]);
        match self.stage {
            GuestStage::Locked => {
                fb.draw_text(40, 40, "Press Ctrl+Alt+Del to unlock", [220, 220, 220], [12, 30, 60]);
            }
            GuestStage::LoginScreen => {
                fb.draw_text(40, 40, &self.username, [255, 255, 255], [12, 30, 60]);
                fb.draw_rect(40, 60, 200, 14, [240, 240, 240]);
                fb.draw_text(44, 63, "Password", [120, 120, 120], [240, 240, 240]);
            }
            GuestStage::Desktop => {
                fb.fill([20, 90, 140]);
                fb.draw_rect(0, self.height.saturating_sub(20), self.width, 20, [40, 40, 40]);
                fb.draw_text(8, self.height.saturating_sub(16), "Start", [230, 230, 230], [40, 40, 40]);
            }
            GuestStage::RunDialog => {
                fb.fill([20, 90, 140]);
                fb.draw_rect(60, 60, 260, 80, [230, 230, 230]);
                fb.draw_text(68, 68, "Run", [20, 20, 20], [230, 230, 230]);
                fb.draw_text(68, 84, "Open:", [20, 20, 20], [230, 230, 230]);
                fb.draw_text(68, 120, "OK     Cancel", [20, 20, 20], [230, 230, 230]);
            }
            GuestStage::Shell => {
                fb.fill([0, 0, 0]);
                fb.draw_text(8, 8, "PS C:\\Users\\Administrator>", [200, 200, 200], [0, 0, 0]);
                let tail: String = self.typed.chars().rev().take(40).collect::<Vec<_>>()
                    .into_iter().rev().collect();
                fb.draw_text(8, 24, &tail, [200, 200, 200], [0, 0, 0]);
            }
        }
        fb.to_png()
    }

    fn advance(&mut self, key: &str) {
        match (self.stage, key) {
            (GuestStage::LoginScreen, "Enter") => self.stage = GuestStage::Desktop,
            (GuestStage::Desktop, "Meta+R") => self.stage = GuestStage::RunDialog,
            (GuestStage::RunDialog, "Enter") => {
                self.stage = GuestStage::Shell;
                self.typed.clear();
            }
            (GuestStage::Shell, "Alt+F4") => self.stage = GuestStage::Desktop,
            _ => {}
        }
    }
}

impl DisplayDriver for SyntheticConsole {
    fn screenshot(&mut self) -> DisplayResult<Vec<u8>> {
        self.render()
    }

    fn send_key(&mut self, key: &str) -> DisplayResult<()> {
        self.recorder.push(InputEvent::Key(key.to_string()));
        self.advance(key);
        Ok(())
    }

    fn key_down(&mut self, key: &str) -> DisplayResult<()> {
        self.recorder.push(InputEvent::KeyDown(key.to_string()));
        Ok(())
    }

    fn key_up(&mut self, key: &str) -> DisplayResult<()> {
        self.recorder.push(InputEvent::KeyUp(key.to_string()));
        Ok(())
    }

    fn type_text(&mut self, text: &str) -> DisplayResult<()> {
        self.recorder.push(InputEvent::Text(text.to_string()));
        self.typed.push_str(text);
        Ok(())
    }

    fn click(&mut self, x: f64, y: f64) -> DisplayResult<()> {
        self.recorder.push(InputEvent::Click(x, y));
        Ok(())
    }

    fn surface_size(&mut self) -> DisplayResult<(u32, u32)> {
        Ok((self.width, self.height))
    }

    fn wake(&mut self) -> DisplayResult<()> {
        self.recorder.push(InputEvent::Wake);
        if self.stage == GuestStage::Locked {
            self.stage = GuestStage::LoginScreen;
        }
        Ok(())
    }
}

/// Connector producing synthetic consoles, for tests and `run --synthetic`.
pub struct SyntheticConnector {
    width: u32,
    height: u32,
    recorder: InputRecorder,
}

impl SyntheticConnector {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            recorder: InputRecorder::new(),
        }
    }

    /// Recorder shared with every console this connector hands out
    pub fn recorder(&self) -> InputRecorder {
        self.recorder.clone()
    }
}

impl DisplayConnector for SyntheticConnector {
    fn connect(
        &self,
        _url: &str,
        _settle: Duration,
        _is_cancelled: &dyn Fn() -> bool,
    ) -> DisplayResult<Box<dyn DisplayDriver>> {
        let mut console = SyntheticConsole::new(self.width, self.height);
        console.recorder = self.recorder.clone();
        Ok(Box::new(console))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framebuffer_roundtrip() {
        let mut fb = Framebuffer::new(100, 100);
        fb.fill([128, 128, 128]);
        fb.draw_rect(10, 10, 20, 20, [255, 0, 0]);
        assert_eq!(fb.get_pixel(15, 15), [255, 0, 0]);

        let png = fb.to_png().expect("encode");
        let decoded = Framebuffer::from_png_bytes(&png).expect("decode");
        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.get_pixel(15, 15), [255, 0, 0]);
    }

    #[test]
    fn test_console_wakes_to_login_screen() {
        let mut console = SyntheticConsole::new(640, 360);
        assert_eq!(console.stage(), GuestStage::Locked);
        console.wake().unwrap();
        assert_eq!(console.stage(), GuestStage::LoginScreen);
        // A second wake is a no-op once unlocked
        console.wake().unwrap();
        assert_eq!(console.stage(), GuestStage::LoginScreen);
    }

    #[test]
    fn test_console_login_and_shell_flow() {
        let mut console = SyntheticConsole::at_stage(640, 360, GuestStage::LoginScreen);
        console.type_text("hunter2").unwrap();
        console.send_key("Enter").unwrap();
        assert_eq!(console.stage(), GuestStage::Desktop);

        console.send_key("Meta+R").unwrap();
        assert_eq!(console.stage(), GuestStage::RunDialog);
        console.type_text("cmd.exe").unwrap();
        console.send_key("Enter").unwrap();
        assert_eq!(console.stage(), GuestStage::Shell);
        console.send_key("Alt+F4").unwrap();
        assert_eq!(console.stage(), GuestStage::Desktop);
    }

    #[test]
    fn test_recorder_captures_events() {
        let mut console = SyntheticConsole::new(640, 360);
        let recorder = console.recorder();
        console.wake().unwrap();
        console.type_text("abc").unwrap();
        console.click(10.0, 20.0).unwrap();

        assert_eq!(recorder.wake_count(), 1);
        assert_eq!(recorder.typed_text(), "abc");
        assert_eq!(recorder.clicks(), vec![(10.0, 20.0)]);
    }

    #[test]
    fn test_screenshot_is_valid_png() {
        let mut console = SyntheticConsole::at_stage(320, 200, GuestStage::LoginScreen)
            .with_displayed_username("CORP\\Administrator");
        let png = console.screenshot().expect("frame");
        let fb = Framebuffer::from_png_bytes(&png).expect("decode");
        assert_eq!((fb.width(), fb.height()), (320, 200));
    }
}
