use crate::config::WorldParams;

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector2 {
    ///Value along the x-axis.
    /// Positive direction is to the right.
    pub x: f64,
    ///Value along the y-axis.
    /// Positive direction is down, matching screen coordinates.
    pub y: f64,
}

impl Vector2 {
    pub fn new(x: f64, y: f64) -> Self {
        Vector2 { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2 { x: 0.0, y: 0.0 }
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f64) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the difference `self - other`.
    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

///Axis-aligned square around a center point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn around(center: Vector2, width: f64) -> Self {
        let half = width / 2.0;
        Rect {
            left: center.x - half,
            right: center.x + half,
            top: center.y - half,
            bottom: center.y + half,
        }
    }

    ///True when the point lies strictly inside the rectangle.
    pub fn contains_point(&self, point: Vector2) -> bool {
        point.x > self.left && point.x < self.right && point.y > self.top && point.y < self.bottom
    }

    ///True when the interiors of both rectangles intersect.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.left < other.right
            && self.right > other.left
            && self.top < other.bottom
            && self.bottom > other.top
    }
}

///Fixed rectangle spanning `[0, width] x [0, height]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(width: f64, height: f64) -> Self {
        Bounds { width, height }
    }

    pub fn contains_rect(&self, rect: &Rect) -> bool {
        rect.left >= 0.0 && rect.top >= 0.0 && rect.right <= self.width && rect.bottom <= self.height
    }

    ///Returns the center that keeps a square of `width` fully inside the bounds.
    ///
    /// Squares wider than the world are centered on the offending axis.
    pub fn clamp_center(&self, center: Vector2, width: f64) -> Vector2 {
        let half = width / 2.0;
        let clamp_axis = |value: f64, extent: f64| {
            if width >= extent {
                extent / 2.0
            } else {
                value.clamp(half, extent - half)
            }
        };
        Vector2 {
            x: clamp_axis(center.x, self.width),
            y: clamp_axis(center.y, self.height),
        }
    }

    ///Step along each axis, suppressed where it would push an edge outside.
    pub fn constrain_step(&self, rect: &Rect, step: Vector2) -> Vector2 {
        let x = if rect.left + step.x < 0.0 || rect.right + step.x > self.width {
            0.0
        } else {
            step.x
        };
        let y = if rect.top + step.y < 0.0 || rect.bottom + step.y > self.height {
            0.0
        } else {
            step.y
        };
        Vector2 { x, y }
    }
}

///Linear mass-to-speed mapping clamped to `[min_speed, max_speed]`.
///
/// The line passes through `max_speed` at the starting mass and through
/// `min_speed` at the mass where attrition alone would halve a cell in ten
/// ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedCurve {
    pub slope: f64,
    pub intercept: f64,
    pub min_speed: f64,
    pub max_speed: f64,
}

impl SpeedCurve {
    pub fn from_params(params: &WorldParams) -> Self {
        let heavy_mass = 1.0 / (10.0 * params.attrition_rate);
        let start = params.player_start_mass;
        let slope = (params.min_speed - params.max_speed) / (heavy_mass - start);
        let intercept = (params.max_speed - params.min_speed * (start / heavy_mass))
            / (1.0 - start / heavy_mass);

        SpeedCurve {
            slope,
            intercept,
            min_speed: params.min_speed,
            max_speed: params.max_speed,
        }
    }

    pub fn speed(&self, mass: f64) -> f64 {
        (self.slope * mass + self.intercept).clamp(self.min_speed, self.max_speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_normalize_unit_length() {
        let v = Vector2::new(3.0, 4.0).normalize();
        assert_approx_eq!(v.x, 0.6);
        assert_approx_eq!(v.y, 0.8);
        assert_approx_eq!(v.magnitude(), 1.0);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(Vector2::default().normalize(), Vector2::default());
    }

    #[test]
    fn test_rect_contains_point_is_strict() {
        let rect = Rect::around(Vector2::new(10.0, 10.0), 4.0);
        assert!(rect.contains_point(Vector2::new(11.0, 9.0)));
        assert!(!rect.contains_point(Vector2::new(12.0, 10.0)));
        assert!(!rect.contains_point(Vector2::new(10.0, 8.0)));
    }

    #[test]
    fn test_rect_overlap_excludes_touching_edges() {
        let a = Rect::around(Vector2::new(0.0, 0.0), 2.0);
        let b = Rect::around(Vector2::new(2.0, 0.0), 2.0);
        let c = Rect::around(Vector2::new(1.5, 0.5), 2.0);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&a));
    }

    #[test]
    fn test_clamp_center_pulls_square_inside() {
        let bounds = Bounds::new(100.0, 50.0);
        let clamped = bounds.clamp_center(Vector2::new(-5.0, 60.0), 10.0);
        assert_eq!(clamped, Vector2::new(5.0, 45.0));
        assert!(bounds.contains_rect(&Rect::around(clamped, 10.0)));
    }

    #[test]
    fn test_constrain_step_suppresses_offending_axis_only() {
        let bounds = Bounds::new(100.0, 100.0);
        let rect = Rect::around(Vector2::new(2.0, 50.0), 2.0);
        let step = bounds.constrain_step(&rect, Vector2::new(-1.5, 0.7));
        assert_eq!(step, Vector2::new(0.0, 0.7));
    }

    #[test]
    fn test_speed_curve_hits_both_ends() {
        let params = WorldParams::default();
        let curve = SpeedCurve::from_params(&params);

        assert_approx_eq!(curve.speed(params.player_start_mass), params.max_speed);
        assert_approx_eq!(curve.speed(1.0 / (10.0 * params.attrition_rate)), params.min_speed);
        assert_approx_eq!(curve.speed(1.0), params.max_speed);
        assert_approx_eq!(curve.speed(1.0e6), params.min_speed);
    }

    #[test]
    fn test_speed_decreases_with_mass() {
        let curve = SpeedCurve::from_params(&WorldParams::default());
        assert!(curve.speed(50.0) > curve.speed(150.0));
    }
}
