//! Reference-frame coordinates and mapping to the rendered display surface.
//!
//! All protocol code speaks a fixed logical resolution (1920x1080). The
//! remote display may render at any size; `CoordinateMap` rescales per axis
//! before input events are injected. Screen locations of OS controls are
//! collected in a `CoordinateProfile` so a different theme or resolution is a
//! data change, not a code change.

/// Width of the logical reference frame in pixels
pub const REFERENCE_WIDTH: u32 = 1920;

/// Height of the logical reference frame in pixels
pub const REFERENCE_HEIGHT: u32 = 1080;

/// A point in the reference frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Linear per-axis mapping from the reference frame to a rendered surface
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMap {
    reference: (u32, u32),
    surface: (u32, u32),
}

impl CoordinateMap {
    /// Create a map onto a surface of the given rendered size
    pub fn new(surface_width: u32, surface_height: u32) -> Self {
        Self {
            reference: (REFERENCE_WIDTH, REFERENCE_HEIGHT),
            surface: (surface_width, surface_height),
        }
    }

    /// Create a map with an explicit reference frame (tests use small frames)
    pub fn with_reference(
        reference_width: u32,
        reference_height: u32,
        surface_width: u32,
        surface_height: u32,
    ) -> Self {
        Self {
            reference: (reference_width, reference_height),
            surface: (surface_width, surface_height),
        }
    }

    /// Map a reference-frame point to surface coordinates
    pub fn map(&self, x: u32, y: u32) -> (f64, f64) {
        let scale_x = self.surface.0 as f64 / self.reference.0 as f64;
        let scale_y = self.surface.1 as f64 / self.reference.1 as f64;
        (x as f64 * scale_x, y as f64 * scale_y)
    }

    /// Map a surface coordinate back into the reference frame
    pub fn unmap(&self, x: f64, y: f64) -> (u32, u32) {
        let scale_x = self.surface.0 as f64 / self.reference.0 as f64;
        let scale_y = self.surface.1 as f64 / self.reference.1 as f64;
        ((x / scale_x).round() as u32, (y / scale_y).round() as u32)
    }

    pub fn map_point(&self, p: Point) -> (f64, f64) {
        self.map(p.x, p.y)
    }

    /// Rendered surface size this map targets
    pub fn surface_size(&self) -> (u32, u32) {
        self.surface
    }
}

/// Named screen locations of guest OS controls, in the reference frame.
///
/// The exact positions depend on OS theme; the defaults match the reference
/// deployment (a server OS at 1920x1080). Override per target if needed.
#[derive(Debug, Clone)]
pub struct CoordinateProfile {
    /// Center of the console, clicked to take keyboard focus
    pub canvas_center: Point,
    /// Approximate location of the password input on the login screen
    pub password_field: Point,
    /// Candidate locations of the "other user" control on the login screen.
    /// Clicked in order; the control's exact position varies by theme, so a
    /// small sweep beats a single guess.
    pub other_user_candidates: Vec<Point>,
}

impl Default for CoordinateProfile {
    fn default() -> Self {
        Self {
            canvas_center: Point::new(960, 540),
            password_field: Point::new(960, 560),
            other_user_candidates: vec![
                Point::new(150, 1000),
                Point::new(200, 950),
                Point::new(150, 950),
                Point::new(200, 1020),
                Point::new(100, 1000),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_identity_at_reference_size() {
        let map = CoordinateMap::new(REFERENCE_WIDTH, REFERENCE_HEIGHT);
        assert_eq!(map.map(960, 540), (960.0, 540.0));
    }

    #[test]
    fn test_map_scales_per_axis() {
        let map = CoordinateMap::new(960, 1080);
        let (x, y) = map.map(960, 540);
        assert_eq!(x, 480.0);
        assert_eq!(y, 540.0);
    }

    #[test]
    fn test_map_with_explicit_reference() {
        let map = CoordinateMap::with_reference(100, 100, 200, 50);
        assert_eq!(map.map(50, 50), (100.0, 25.0));
    }

    #[test]
    fn test_map_is_linear() {
        let map = CoordinateMap::new(1280, 720);
        let (x1, y1) = map.map(100, 100);
        let (x2, y2) = map.map(200, 200);
        assert!((x2 - 2.0 * x1).abs() < 1e-9);
        assert!((y2 - 2.0 * y1).abs() < 1e-9);
    }

    #[test]
    fn test_map_invertible_up_to_rounding() {
        let map = CoordinateMap::new(1366, 768);
        for &(x, y) in &[(0, 0), (1, 1), (960, 540), (1919, 1079), (150, 1000)] {
            let (sx, sy) = map.map(x, y);
            let (rx, ry) = map.unmap(sx, sy);
            assert!((rx as i64 - x as i64).abs() <= 1, "x roundtrip: {} -> {}", x, rx);
            assert!((ry as i64 - y as i64).abs() <= 1, "y roundtrip: {} -> {}", y, ry);
        }
    }

    #[test]
    fn test_default_profile_candidates() {
        let profile = CoordinateProfile::default();
        assert_eq!(profile.other_user_candidates.len(), 5);
        assert_eq!(profile.password_field, Point::new(960, 560));
    }
}
