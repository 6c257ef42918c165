use proptest::prelude::*;
use sharedline_types::{AnchorTransform, Point3, Timestamp};

#[test]
fn distance_is_euclidean() {
    let a = Point3::new(0.0, 0.0, 0.0);
    let b = Point3::new(3.0, 4.0, 0.0);
    assert!((a.distance(&b) - 5.0).abs() < 1e-6);
}

#[test]
fn angle_of_straight_line_is_zero() {
    let n = Point3::new(1.0, 0.0, 0.0);
    assert!(n.angle_to(&n) < 1e-6);
}

#[test]
fn angle_of_right_turn_is_half_pi() {
    let n1 = Point3::new(1.0, 0.0, 0.0);
    let n2 = Point3::new(0.0, 1.0, 0.0);
    assert!((n1.angle_to(&n2) - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
}

#[test]
fn angle_of_reversal_is_pi() {
    let n1 = Point3::new(0.0, 0.0, 1.0);
    let n2 = Point3::new(0.0, 0.0, -1.0);
    assert!((n1.angle_to(&n2) - std::f32::consts::PI).abs() < 1e-6);
}

#[test]
fn transform_translation_roundtrip() {
    let t = AnchorTransform::from_translation(Point3::new(1.0, 2.0, 3.0));
    assert_eq!(t.translation(), Point3::new(1.0, 2.0, 3.0));
    assert_eq!(AnchorTransform::default().translation(), Point3::ZERO);
}

#[test]
fn timestamp_parse() {
    assert_eq!(Timestamp::parse("1530000000000").unwrap().as_millis(), 1_530_000_000_000);
    assert!(Timestamp::parse("soon").is_err());
}

proptest! {
    #[test]
    fn angle_is_within_zero_and_pi(
        ax in -10.0f32..10.0, ay in -10.0f32..10.0, az in -10.0f32..10.0,
        bx in -10.0f32..10.0, by in -10.0f32..10.0, bz in -10.0f32..10.0,
    ) {
        let a = Point3::new(ax, ay, az);
        let b = Point3::new(bx, by, bz);
        let angle = a.angle_to(&b);
        prop_assert!(angle >= 0.0);
        prop_assert!(angle <= std::f32::consts::PI + 1e-5);
    }
}
