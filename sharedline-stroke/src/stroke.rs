//! A single freehand stroke.

use crate::biquad::BiquadFilter;
use crate::error::{StrokeError, StrokeResult};
use crate::record::StrokeRecord;
use crate::smoother::{ANIMATION_CUTOFF, PointSmoother, SmoothedPoint};
use sharedline_types::{AnchorTransform, ParticipantId, Point3, StrokeKey};

/// Width used when the caller does not pick one.
pub const DEFAULT_LINE_WIDTH: f32 = 0.011;

/// Minimum animated-length change that requires a redraw.
const ANIMATION_EPSILON: f32 = 0.001;

/// An ordered polyline plus its smoothing and sync bookkeeping.
///
/// Locally drawn strokes grow through [`Stroke::add_point`]; strokes
/// received from the partner are replaced wholesale through
/// [`Stroke::replace_points`] and never re-filtered.
#[derive(Debug, Clone)]
pub struct Stroke {
    key: StrokeKey,
    points: Vec<Point3>,
    line_width: f32,
    total_length: f32,
    animated_length: f32,
    smoother: PointSmoother,
    animation_filter: BiquadFilter,
    taper_slope: f32,
    taper_lookup: Vec<f32>,
    anchor: Option<AnchorTransform>,
    creator: Option<ParticipantId>,
    drawn_locally: bool,
}

impl Stroke {
    /// Starts a new locally authored stroke with a freshly allocated key.
    pub fn new(line_width: f32) -> Self {
        Self::with_key(StrokeKey::generate(), line_width)
    }

    pub fn with_key(key: StrokeKey, line_width: f32) -> Self {
        Self {
            key,
            points: Vec::new(),
            line_width,
            total_length: 0.0,
            animated_length: 0.0,
            smoother: PointSmoother::new(line_width),
            animation_filter: BiquadFilter::new(ANIMATION_CUTOFF),
            taper_slope: 0.0,
            taper_lookup: Vec::new(),
            anchor: None,
            creator: None,
            drawn_locally: true,
        }
    }

    /// Builds a mirrored stroke from a decoded remote record.
    ///
    /// Points are made relative to the first point, which becomes the
    /// stroke's anchor origin.
    pub fn from_record(key: StrokeKey, record: &StrokeRecord) -> StrokeResult<Self> {
        let origin = *record.points.first().ok_or(StrokeError::NoPoints)?;
        let mut stroke = Self::with_key(key, record.line_width);
        stroke.creator = Some(record.creator.clone());
        stroke.drawn_locally = false;
        stroke.anchor = Some(AnchorTransform::from_translation(origin));
        stroke.replace_points(record.points.iter().map(|p| *p - origin).collect());
        Ok(stroke)
    }

    /// Encodes the stroke in world space for upload.
    pub fn to_record(&self) -> StrokeResult<StrokeRecord> {
        let anchor = self.anchor.ok_or(StrokeError::NoAnchor)?;
        if self.points.is_empty() {
            return Err(StrokeError::NoPoints);
        }
        let creator = self
            .creator
            .clone()
            .ok_or(StrokeError::MissingField("creator"))?;
        let origin = anchor.translation();
        Ok(StrokeRecord {
            creator,
            line_width: self.line_width,
            points: self.points.iter().map(|p| *p + origin).collect(),
        })
    }

    /// Feeds one raw sample through the smoother.
    pub fn add_point(&mut self, raw: Point3) -> SmoothedPoint {
        self.smoother
            .process(&mut self.points, &mut self.total_length, raw)
    }

    /// Overwrites the polyline verbatim and recomputes the total length.
    pub fn replace_points(&mut self, points: Vec<Point3>) {
        self.total_length = points.windows(2).map(|w| w[0].distance(&w[1])).sum();
        self.points = points;
    }

    /// Advances the animated length toward the total length.
    ///
    /// Only remote strokes animate. Returns true when the change is large
    /// enough to need a redraw.
    pub fn update_animated_length(&mut self) -> bool {
        if self.drawn_locally {
            return false;
        }
        let previous = self.animated_length;
        self.animated_length = self.animation_filter.process(self.total_length);
        (self.animated_length - previous).abs() > ANIMATION_EPSILON
    }

    /// Rebuilds the taper lookup when slope or length changes.
    ///
    /// Entry `i` holds `slope^(n - i)`, so the width fades toward the ends.
    pub fn set_taper(&mut self, slope: f32, num_points: usize) {
        if self.taper_slope == slope && self.taper_lookup.len() == num_points {
            return;
        }
        self.taper_slope = slope;
        self.taper_lookup = vec![0.0; num_points];
        let mut v = 1.0f32;
        for entry in self.taper_lookup.iter_mut().rev() {
            v *= slope;
            *entry = v;
        }
    }

    /// Line width at point `i`, tapered at both ends and clamped to
    /// `[0, line_width]`.
    pub fn width_at(&self, i: usize) -> f32 {
        let taper_points = self.taper_lookup.len();
        let size = self.points.len();
        let width = if i < taper_points {
            self.line_width * self.taper_lookup[i]
        } else if i < size && size - i < taper_points {
            self.line_width * self.taper_lookup[size - i]
        } else {
            self.line_width
        };
        width.clamp(0.0, self.line_width)
    }

    pub fn key(&self) -> &StrokeKey {
        &self.key
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn line_width(&self) -> f32 {
        self.line_width
    }

    pub fn total_length(&self) -> f32 {
        self.total_length
    }

    pub fn animated_length(&self) -> f32 {
        self.animated_length
    }

    pub fn anchor(&self) -> Option<&AnchorTransform> {
        self.anchor.as_ref()
    }

    pub fn set_anchor(&mut self, anchor: AnchorTransform) {
        self.anchor = Some(anchor);
    }

    /// Detaches the stroke from its anchor; an unanchored stroke cannot be uploaded.
    pub fn clear_anchor(&mut self) {
        self.anchor = None;
    }

    pub fn creator(&self) -> Option<&ParticipantId> {
        self.creator.as_ref()
    }

    pub fn set_creator(&mut self, creator: ParticipantId) {
        self.creator = Some(creator);
    }

    pub fn drawn_locally(&self) -> bool {
        self.drawn_locally
    }
}

impl Default for Stroke {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_WIDTH)
    }
}
