//! Pointer geometry for the rotary key.
//!
//! Screen coordinates grow rightwards and downwards. Angles are measured
//! clockwise in degrees with "straight up" from the pivot at 0.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Point at `radius` from `self` in the direction of `degrees`.
    pub fn offset_at(self, degrees: f64, radius: f64) -> Self {
        let radians = (degrees - 90.0).to_radians();
        Self {
            x: self.x + radius * radians.cos(),
            y: self.y + radius * radians.sin(),
        }
    }
}

/// Direction from `pivot` to `point`, in `[0, 360)`.
///
/// A point equal to the pivot yields 90.
pub fn angle_of(point: Point, pivot: Point) -> f64 {
    let dx = point.x - pivot.x;
    let dy = point.y - pivot.y;
    normalize_degrees(dy.atan2(dx).to_degrees() + 90.0)
}

pub fn normalize_degrees(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Maps `[0, 360)` onto `(-180, 180]` so angles left of vertical are negative.
pub fn to_signed(degrees: f64) -> f64 {
    let normalized = normalize_degrees(degrees);
    if normalized > 180.0 {
        normalized - 360.0
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIVOT: Point = Point::new(100.0, 100.0);

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn cardinal_directions_map_clockwise_from_up() {
        assert!(approx(angle_of(Point::new(100.0, 50.0), PIVOT), 0.0));
        assert!(approx(angle_of(Point::new(150.0, 100.0), PIVOT), 90.0));
        assert!(approx(angle_of(Point::new(100.0, 150.0), PIVOT), 180.0));
        assert!(approx(angle_of(Point::new(50.0, 100.0), PIVOT), 270.0));
    }

    #[test]
    fn degenerate_point_is_stable() {
        assert_eq!(angle_of(PIVOT, PIVOT), 90.0);
        assert_eq!(angle_of(PIVOT, PIVOT), angle_of(PIVOT, PIVOT));
    }

    #[test]
    fn normalizes_into_half_open_range() {
        assert!(approx(normalize_degrees(-30.0), 330.0));
        assert!(approx(normalize_degrees(720.0), 0.0));
        assert!(approx(normalize_degrees(359.5), 359.5));
        assert!(normalize_degrees(-1e-18) < 360.0);
        assert_eq!(normalize_degrees(f64::NAN), 0.0);
    }

    #[test]
    fn signed_form_puts_left_of_vertical_below_zero() {
        assert!(approx(to_signed(330.0), -30.0));
        assert!(approx(to_signed(90.0), 90.0));
        assert!(approx(to_signed(180.0), 180.0));
    }

    #[test]
    fn offset_at_inverts_angle_of() {
        for degrees in [-30.0, 0.0, 45.0, 90.0] {
            let point = PIVOT.offset_at(degrees, 40.0);
            assert!(approx(to_signed(angle_of(point, PIVOT)), degrees));
        }
    }
}
