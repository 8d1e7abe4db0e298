//! The evaluator seam: given a finished conversation's timeslot/transition
//! matrix, learn a per-host baseline during the learning phase, or score
//! deviation from that baseline during detection. Chebyshev's inequality is
//! the only implementation today; the trait keeps the engine from assuming
//! that's the only way to score a conversation.

pub mod chebyshev;

use crate::statemachine::{AnomalyLocation, FinishedConversation};

pub trait Evaluator {
    /// Per-host accumulator built up across the learning phase.
    type LearnProfile: Default + Clone;
    /// Per-host baseline derived from a `LearnProfile` once learning ends.
    type DetectProfile: Default + Clone;

    fn name(&self) -> &'static str;

    fn init(&mut self) {}
    fn finish(&mut self) {}

    /// Fold one finished conversation into the host's learning accumulator.
    fn learn(&mut self, profile: &mut Self::LearnProfile, conv: &FinishedConversation);

    /// Derive a detection baseline from everything learned for this host.
    fn create_profile(&mut self, learn: &Self::LearnProfile, detect: &mut Self::DetectProfile);

    /// Score a finished conversation against the host's baseline. Returns an
    /// anomaly score in `[0, 1]` and records where the worst deviation was
    /// found.
    fn detect(
        &mut self,
        profile: &Self::DetectProfile,
        conv: &FinishedConversation,
        loc: &mut AnomalyLocation,
    ) -> f64;
}
