//! Descriptor matching: decides whether a candidate image shows a reference identity.

use crate::types::{confidence, Descriptor, ReferenceSet, Tolerance};

/// Worst possible distance, and the value reported when nothing was compared.
pub const WORST_DISTANCE: f32 = 1.0;

/// Outcome of matching one candidate image against a reference set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome {
    pub matched: bool,
    /// Smallest distance over every (candidate, reference) pair, capped at [`WORST_DISTANCE`].
    pub best_distance: f32,
}

impl MatchOutcome {
    pub const NO_FACES: MatchOutcome = MatchOutcome {
        matched: false,
        best_distance: WORST_DISTANCE,
    };

    /// Confidence percentage derived from the best distance, in [0, 100].
    pub fn confidence(&self) -> f32 {
        confidence(self.best_distance)
    }
}

/// Strategy for comparing the faces of one candidate image against a reference set.
pub trait Matcher {
    fn match_candidate(
        &self,
        candidate: &[Descriptor],
        reference: &ReferenceSet,
        tolerance: Tolerance,
    ) -> MatchOutcome;
}

/// Euclidean-distance matcher.
///
/// Always visits every (candidate, reference) pair, so `best_distance` is the
/// global minimum even when a qualifying pair was found early.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceMatcher;

impl Matcher for DistanceMatcher {
    fn match_candidate(
        &self,
        candidate: &[Descriptor],
        reference: &ReferenceSet,
        tolerance: Tolerance,
    ) -> MatchOutcome {
        let mut best_distance = WORST_DISTANCE;
        let mut matched = false;

        for face in candidate {
            for known in reference.descriptors() {
                let distance = face.distance(known);
                best_distance = best_distance.min(distance);
                matched |= tolerance.accepts(distance);
            }
        }

        MatchOutcome {
            matched,
            best_distance,
        }
    }
}
