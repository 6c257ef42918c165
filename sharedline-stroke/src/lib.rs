//! Stroke geometry for Shared Line.
//!
//! Raw touch samples are turned into the compact polyline that is actually
//! sent to the partner device:
//!
//! 1. **Filter**: a per-axis second-order low-pass (biquad) removes jitter
//! 2. **Accept**: samples closer than `line_width / 10` to the last accepted
//!    point are dropped
//! 3. **Simplify**: nearly straight interior points are removed
//! 4. **Subdivide**: sharp turns get midpoints inserted, bounded to a fixed
//!    recursion depth
//!
//! The result is sparse on straight runs and dense on curves. Remote strokes
//! skip all of this and take the received polyline verbatim.
//!
//! # Example
//!
//! ```
//! use sharedline_stroke::Stroke;
//! use sharedline_types::Point3;
//!
//! let mut stroke = Stroke::new(0.011);
//! let sample = stroke.add_point(Point3::new(0.0, 0.0, 0.0));
//! assert!(sample.accepted);
//! assert_eq!(stroke.len(), 1);
//! ```

mod biquad;
mod error;
pub mod record;
pub mod smoother;
mod stroke;

pub use biquad::{BiquadFilter, Vec3Filter};
pub use error::{StrokeError, StrokeResult};
pub use record::{StrokeRecord, diff_points};
pub use smoother::{PointSmoother, SmoothedPoint, subdivide_section};
pub use stroke::{DEFAULT_LINE_WIDTH, Stroke};
