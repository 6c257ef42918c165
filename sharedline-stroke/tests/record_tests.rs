use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use sharedline_stroke::record::points_map;
use sharedline_stroke::{StrokeError, StrokeRecord, diff_points};
use sharedline_types::{ParticipantId, Point3};

// ── Decoding ─────────────────────────────────────────────────────

#[test]
fn decodes_index_keyed_points_in_numeric_order() {
    let mut points = serde_json::Map::new();
    for i in (0..12).rev() {
        points.insert(i.to_string(), json!({"x": i as f32, "y": 0.0, "z": 0.0}));
    }
    let value = json!({"creator": "a", "lineWidth": 0.011, "points": points});

    let record = StrokeRecord::from_value(&value).unwrap();
    let xs: Vec<f32> = record.points.iter().map(|p| p.x).collect();
    assert_eq!(xs, (0..12).map(|i| i as f32).collect::<Vec<_>>());
}

#[test]
fn decodes_array_points() {
    let value = json!({
        "creator": "a",
        "lineWidth": 0.02,
        "points": [{"x": 1.0, "y": 2.0, "z": 3.0}]
    });
    let record = StrokeRecord::from_value(&value).unwrap();
    assert_eq!(record.points, vec![Point3::new(1.0, 2.0, 3.0)]);
    assert_eq!(record.line_width, 0.02);
    assert_eq!(record.creator, ParticipantId::new("a"));
}

#[test]
fn skips_malformed_points() {
    let value = json!({
        "creator": "a",
        "lineWidth": 0.011,
        "points": {
            "0": {"x": 0.0, "y": 0.0, "z": 0.0},
            "1": {"x": "oops"},
            "2": {"x": 1.0, "y": 0.0, "z": 0.0},
            "tail": {"x": 9.0, "y": 9.0, "z": 9.0}
        }
    });
    let record = StrokeRecord::from_value(&value).unwrap();
    assert_eq!(
        record.points,
        vec![Point3::ZERO, Point3::new(1.0, 0.0, 0.0)]
    );
}

#[test]
fn rejects_missing_creator() {
    let value = json!({"lineWidth": 0.011, "points": [{"x": 0.0, "y": 0.0, "z": 0.0}]});
    assert!(matches!(
        StrokeRecord::from_value(&value),
        Err(StrokeError::MissingField("creator"))
    ));
}

#[test]
fn rejects_missing_line_width() {
    let value = json!({"creator": "a", "points": [{"x": 0.0, "y": 0.0, "z": 0.0}]});
    assert!(matches!(
        StrokeRecord::from_value(&value),
        Err(StrokeError::MissingField("lineWidth"))
    ));
}

#[test]
fn rejects_record_with_only_bad_points() {
    let value = json!({"creator": "a", "lineWidth": 0.011, "points": {"0": 5}});
    assert!(matches!(
        StrokeRecord::from_value(&value),
        Err(StrokeError::NoPoints)
    ));
}

#[test]
fn encodes_points_as_index_keyed_object() {
    let record = StrokeRecord {
        creator: ParticipantId::new("a"),
        line_width: 0.5,
        points: vec![Point3::ZERO, Point3::new(1.0, 0.0, 0.0)],
    };
    let value = record.to_value();
    assert_eq!(value["creator"], json!("a"));
    assert_eq!(value["lineWidth"], json!(0.5));
    assert_eq!(value["points"]["1"]["x"], json!(1.0));
    assert_eq!(StrokeRecord::from_value(&value).unwrap(), record);
}

// ── Incremental updates ──────────────────────────────────────────

#[test]
fn diff_of_appended_points_only_has_new_indices() {
    let previous = vec![Point3::ZERO, Point3::new(1.0, 0.0, 0.0)];
    let mut current = previous.clone();
    current.push(Point3::new(2.0, 0.0, 0.0));

    let diff = diff_points(&previous, &current);
    assert_eq!(diff.keys().cloned().collect::<Vec<_>>(), vec!["2".to_string()]);
}

#[test]
fn diff_includes_rewritten_interior_points() {
    let previous = vec![Point3::ZERO, Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)];
    let current = vec![Point3::ZERO, Point3::new(1.0, 1.0, 0.0), Point3::new(2.0, 0.0, 0.0)];
    let diff = diff_points(&previous, &current);
    assert_eq!(diff.len(), 1);
    assert!(diff.contains_key("1"));
}

#[test]
fn diff_nulls_out_truncated_tail() {
    let previous = vec![Point3::ZERO, Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)];
    let current = vec![Point3::ZERO];
    let diff = diff_points(&previous, &current);
    assert_eq!(diff.get("1"), Some(&Value::Null));
    assert_eq!(diff.get("2"), Some(&Value::Null));
    assert!(!diff.contains_key("0"));
}

#[test]
fn diff_from_empty_matches_full_map() {
    let current = vec![Point3::ZERO, Point3::new(0.0, 1.0, 0.0)];
    assert_eq!(diff_points(&[], &current), points_map(&current));
}
