//! The state-machine seam: anything that buckets packets into conversations,
//! tracks per-timeslot transition counts, and eventually yields finished
//! conversations for evaluation implements this trait. TCP is the only
//! implementation today; the trait exists so the engine never has to know
//! that.

pub mod tcp;

use statetrans_common::PacketInfo;

/// A timeslot/transition-label cell: the running count for the window
/// currently open (`value`), and the accumulated sum/count of prior closed
/// windows (`aggr_value`, `aggr_cnt`) used to derive a per-window mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeslotCell {
    pub value: f64,
    pub aggr_value: f64,
    pub aggr_cnt: u64,
}

/// A conversation handed to an evaluator once its state machine has
/// terminated it (or its idle timeout elapsed). Evaluator-agnostic: only the
/// per-timeslot, per-label count matrix and enough identity to report an
/// anomaly.
#[derive(Debug, Clone)]
pub struct FinishedConversation {
    pub id: statetrans_common::ConversationId,
    pub first_pkt_ts: u64,
    pub last_pkt_ts: u64,
    pub final_state_name: &'static str,
    /// `[timeslot][transition_label]`.
    pub timeslots: Vec<Vec<TimeslotCell>>,
}

/// Where, in the timeslot/label matrix, an evaluator found its worst
/// anomaly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnomalyLocation {
    pub timeslot: usize,
    pub transition: usize,
}

pub trait StateMachine {
    fn name(&self) -> &'static str;

    /// Width of the transition-label alphabet this state machine emits.
    fn transition_count(&self) -> usize;

    fn init(&mut self) {}
    fn finish(&mut self) {}

    /// Classify one packet, updating (or creating) its conversation entry.
    fn on_packet(&mut self, pkt: &PacketInfo);

    /// Pop the next conversation ready for evaluation (terminated by a
    /// protocol event or by idle timeout), if one is available without an
    /// expensive scan. Call in a loop until it returns `None`.
    fn next_finished(&mut self, now_us: u64) -> Option<FinishedConversation>;

    /// Sweep for idle conversations whose per-state timeout has elapsed,
    /// marking them terminated so a subsequent `next_finished` picks them up.
    /// Cheap to call once per packet: internally paced to its own interval.
    fn clean_timedout(&mut self, now_us: u64);
}
