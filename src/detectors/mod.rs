//! Hazard detectors: transform raw observations into canonical hazards
//!
//! Each detector implements the narrow [`Detector`] interface. Detection
//! is pure and non-suspending: once observations are in memory a detector
//! only computes. New hazard kinds are new implementations, not changes
//! to existing ones.

mod cyclone;
mod flood;
mod landslide;

pub use cyclone::CycloneDetector;
pub use flood::FloodDetector;
pub use landslide::LandslideDetector;

use crate::sources::{FetchWindow, RawObservation};
use crate::types::Hazard;

/// Capability interface for one hazard family
pub trait Detector: Send + Sync {
    /// Detector tag for the run log
    fn name(&self) -> &'static str;

    /// Transform the cycle's observations into hazards.
    ///
    /// Detectors ignore observation variants that are not theirs, and
    /// drop (with a logged reason) any record failing their invariants.
    /// Observation ids are carried through so re-running a window yields
    /// hazards with matching ids.
    fn detect(&self, observations: &[RawObservation], window: FetchWindow) -> Vec<Hazard>;
}
