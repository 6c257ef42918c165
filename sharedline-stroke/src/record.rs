//! Wire form of a stroke record.
//!
//! ```text
//! { "creator": "<participant id>",
//!   "lineWidth": 0.011,
//!   "points": { "0": {"x":..,"y":..,"z":..}, "1": {..}, ... } }
//! ```
//!
//! Points are keyed by their decimal index. Stores that coerce dense integer
//! keys into arrays hand the collection back as a JSON array, so decoding
//! accepts either form. Individual malformed points are skipped; a record
//! without creator, line width, or any usable point is rejected.

use crate::error::{StrokeError, StrokeResult};
use serde_json::{Map, Value, json};
use sharedline_types::{ParticipantId, Point3};
use tracing::debug;

pub const CREATOR_KEY: &str = "creator";
pub const LINE_WIDTH_KEY: &str = "lineWidth";
pub const POINTS_KEY: &str = "points";

/// A stroke as stored in the room's stroke collection, in world space.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeRecord {
    pub creator: ParticipantId,
    pub line_width: f32,
    pub points: Vec<Point3>,
}

impl StrokeRecord {
    /// Decodes a record from its JSON value.
    pub fn from_value(value: &Value) -> StrokeResult<Self> {
        let creator = value
            .get(CREATOR_KEY)
            .and_then(Value::as_str)
            .ok_or(StrokeError::MissingField(CREATOR_KEY))?;
        let line_width = value
            .get(LINE_WIDTH_KEY)
            .and_then(Value::as_f64)
            .ok_or(StrokeError::MissingField(LINE_WIDTH_KEY))?;

        let mut indexed: Vec<(usize, Point3)> = match value.get(POINTS_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(i, v)| parse_point(v).map(|p| (i, p)))
                .collect(),
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| Some((k.parse::<usize>().ok()?, parse_point(v)?)))
                .collect(),
            _ => return Err(StrokeError::MissingField(POINTS_KEY)),
        };
        if indexed.is_empty() {
            return Err(StrokeError::NoPoints);
        }
        indexed.sort_by_key(|(i, _)| *i);

        Ok(Self {
            creator: ParticipantId::new(creator),
            line_width: line_width as f32,
            points: indexed.into_iter().map(|(_, p)| p).collect(),
        })
    }

    /// Encodes the full record.
    pub fn to_value(&self) -> Value {
        let mut record = Map::new();
        record.insert(CREATOR_KEY.into(), Value::from(self.creator.as_str()));
        record.insert(LINE_WIDTH_KEY.into(), Value::from(self.line_width));
        record.insert(POINTS_KEY.into(), Value::Object(points_map(&self.points)));
        Value::Object(record)
    }
}

/// Index-keyed map of every point.
pub fn points_map(points: &[Point3]) -> Map<String, Value> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| (i.to_string(), point_value(p)))
        .collect()
}

/// Children to merge into the `points` collection to turn `previous` into
/// `current`.
///
/// Only indices whose coordinates changed are included. Indices past the new
/// end map to `null`, which deletes them.
pub fn diff_points(previous: &[Point3], current: &[Point3]) -> Map<String, Value> {
    let mut changes = Map::new();
    for (i, point) in current.iter().enumerate() {
        if previous.get(i) != Some(point) {
            changes.insert(i.to_string(), point_value(point));
        }
    }
    for i in current.len()..previous.len() {
        changes.insert(i.to_string(), Value::Null);
    }
    changes
}

fn point_value(p: &Point3) -> Value {
    json!({ "x": p.x, "y": p.y, "z": p.z })
}

fn parse_point(value: &Value) -> Option<Point3> {
    match serde_json::from_value::<Point3>(value.clone()) {
        Ok(p) => Some(p),
        Err(e) => {
            debug!("skipping malformed stroke point {}: {}", value, e);
            None
        }
    }
}
