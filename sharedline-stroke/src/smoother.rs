//! Point acceptance, simplification, and bounded subdivision.

use crate::biquad::Vec3Filter;
use sharedline_types::Point3;

/// Cutoff of the per-axis "wet" point filter, as a fraction of the sample rate.
pub const WET_CUTOFF: f64 = 0.07;

/// Cutoff of the scalar animated-length filter used for remote strokes.
pub const ANIMATION_CUTOFF: f64 = 0.025;

/// Accepted points must be farther than `line_width / MIN_DISTANCE_DIVISOR`
/// from the previous accepted point.
pub const MIN_DISTANCE_DIVISOR: f32 = 10.0;

/// Interior points turning less than this (radians) are dropped.
pub const DROP_ANGLE: f32 = 0.05;

/// Windows turning more than this (radians) are subdivided.
pub const SUBDIVIDE_ANGLE: f32 = 0.3;

/// Hard cap on subdivision recursion.
pub const MAX_SUBDIVISION_DEPTH: u32 = 6;

/// Result of feeding one raw sample to a [`PointSmoother`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedPoint {
    /// Filter output for this sample.
    pub point: Point3,
    /// Whether the filtered point was appended to the polyline.
    pub accepted: bool,
}

/// Turns raw samples into a filtered, angle-simplified polyline.
///
/// The filter runs on every call whether or not the sample is accepted, so
/// rejected samples still advance filter state.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSmoother {
    filter: Vec3Filter,
    min_distance: f32,
}

impl PointSmoother {
    pub fn new(line_width: f32) -> Self {
        Self {
            filter: Vec3Filter::new(WET_CUTOFF),
            min_distance: line_width / MIN_DISTANCE_DIVISOR,
        }
    }

    /// Minimum distance between consecutive accepted points.
    pub fn min_distance(&self) -> f32 {
        self.min_distance
    }

    /// Filters `raw` and, if accepted, appends it to `points` and updates
    /// `total_length`.
    pub fn process(
        &mut self,
        points: &mut Vec<Point3>,
        total_length: &mut f32,
        raw: Point3,
    ) -> SmoothedPoint {
        let filtered = self.filter.update(raw);

        if let Some(last) = points.last() {
            let step = filtered.distance(last);
            if step <= self.min_distance {
                return SmoothedPoint {
                    point: filtered,
                    accepted: false,
                };
            }
            *total_length += step;
        }
        points.push(filtered);

        let n = points.len();
        if n >= 4 {
            let mid = n - 3;
            let angle = turn_angle(points[mid - 1], points[mid], points[mid + 1]);
            if angle < DROP_ANGLE {
                let (a, b, c) = (points[mid - 1], points[mid], points[mid + 1]);
                points.remove(mid);
                *total_length += a.distance(&c) - a.distance(&b) - b.distance(&c);
            } else {
                subdivide_section(points, mid - 1, SUBDIVIDE_ANGLE, 0);
            }
        }

        SmoothedPoint {
            point: filtered,
            accepted: true,
        }
    }
}

/// Turn angle at `b` between segments `a -> b` and `b -> c`.
fn turn_angle(a: Point3, b: Point3, c: Point3) -> f32 {
    (b - a).angle_to(&(c - b))
}

/// Subdivides the three-point window starting at `start` while its turn
/// angle exceeds `max_angle`, stopping at [`MAX_SUBDIVISION_DEPTH`].
///
/// Each subdividing call inserts exactly two points: the midpoints of both
/// segments. The right half-window is refined before the left one so the
/// left window's indices stay valid. Returns the number of inserted points.
pub fn subdivide_section(
    points: &mut Vec<Point3>,
    start: usize,
    max_angle: f32,
    depth: u32,
) -> usize {
    if depth >= MAX_SUBDIVISION_DEPTH || start + 2 >= points.len() {
        return 0;
    }

    let p1 = points[start];
    let p2 = points[start + 1];
    let p3 = points[start + 2];
    let n1 = p2 - p1;
    let n2 = p3 - p2;

    if n1.angle_to(&n2) <= max_angle {
        return 0;
    }

    points.insert(start + 1, p1 + n1 * 0.5);
    points.insert(start + 3, p2 + n2 * 0.5);

    2 + subdivide_section(points, start + 2, max_angle, depth + 1)
        + subdivide_section(points, start, max_angle, depth + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_angle_of_collinear_points_is_zero() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(2.0, 0.0, 0.0);
        assert!(turn_angle(a, b, c) < 1e-6);
    }

    #[test]
    fn subdivide_out_of_range_window_is_noop() {
        let mut points = vec![Point3::ZERO, Point3::new(1.0, 0.0, 0.0)];
        assert_eq!(subdivide_section(&mut points, 0, 0.0, 0), 0);
        assert_eq!(points.len(), 2);
    }
}
