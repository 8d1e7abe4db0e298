//! Chebyshev's-inequality evaluator: per (timeslot, transition-label) cell,
//! track a mean and variance of the transition's share of all transitions
//! seen in that window across the learning sample, then at detection time
//! bound how anomalous a fresh share is allowed to be before it counts
//! against the host.

use super::Evaluator;
use crate::statemachine::{AnomalyLocation, FinishedConversation};

/// Minimum deviation treated as distinguishable from the mean; below this,
/// Chebyshev's bound is clamped to 1 (no anomaly) rather than dividing by a
/// near-zero `dev^2`.
const MIN_DEVIATION: f64 = 0.01;

#[derive(Debug, Clone, Default)]
pub struct LearnProfile {
    /// One row-normalized `[timeslot][transition]` matrix per learned
    /// conversation.
    samples: Vec<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct DetectCell {
    mean: f64,
    variance: f64,
}

#[derive(Debug, Clone, Default)]
pub struct DetectProfile {
    cells: Vec<Vec<DetectCell>>,
}

pub struct ChebyshevEvaluator {
    timeslot_cnt: usize,
    transition_cnt: usize,
}

impl ChebyshevEvaluator {
    pub fn new(timeslot_cnt: usize, transition_cnt: usize) -> Self {
        ChebyshevEvaluator {
            timeslot_cnt,
            transition_cnt,
        }
    }

    /// Per-timeslot share of each transition label within the window's
    /// total, row-normalized so within-window share (not raw count) is what
    /// gets compared across conversations of differing size.
    fn normalized_row(&self, conv: &FinishedConversation, ts: usize) -> Vec<f64> {
        let mut row = vec![0.0; self.transition_cnt];
        let mut sum = 0.0;
        for (trans, slot) in row.iter_mut().enumerate() {
            let cell = &conv.timeslots[ts][trans];
            let mean_per_trans = if cell.aggr_cnt == 0 {
                0.0
            } else {
                cell.aggr_value / cell.aggr_cnt as f64
            };
            *slot = mean_per_trans;
            sum += mean_per_trans;
        }
        if sum > 0.0 {
            for v in row.iter_mut() {
                *v /= sum;
            }
        }
        row
    }
}

impl Evaluator for ChebyshevEvaluator {
    type LearnProfile = LearnProfile;
    type DetectProfile = DetectProfile;

    fn name(&self) -> &'static str {
        "chebyshev"
    }

    fn learn(&mut self, profile: &mut LearnProfile, conv: &FinishedConversation) {
        let sample: Vec<Vec<f64>> = (0..self.timeslot_cnt)
            .map(|ts| self.normalized_row(conv, ts))
            .collect();
        profile.samples.push(sample);
    }

    fn create_profile(&mut self, learn: &LearnProfile, detect: &mut DetectProfile) {
        if learn.samples.is_empty() {
            detect.cells = Vec::new();
            return;
        }
        let n = learn.samples.len() as f64;
        let t = self.timeslot_cnt;
        let k = self.transition_cnt;

        let mut mean = vec![vec![0.0; k]; t];
        for sample in &learn.samples {
            for ts in 0..t {
                for trans in 0..k {
                    mean[ts][trans] += sample[ts][trans];
                }
            }
        }
        for row in mean.iter_mut() {
            for v in row.iter_mut() {
                *v /= n;
            }
        }

        let mut variance = vec![vec![0.0; k]; t];
        for sample in &learn.samples {
            for ts in 0..t {
                for trans in 0..k {
                    let dev = sample[ts][trans] - mean[ts][trans];
                    variance[ts][trans] += dev * dev;
                }
            }
        }
        for row in variance.iter_mut() {
            for v in row.iter_mut() {
                *v /= n;
            }
        }

        detect.cells = (0..t)
            .map(|ts| {
                (0..k)
                    .map(|trans| DetectCell {
                        mean: mean[ts][trans],
                        variance: variance[ts][trans],
                    })
                    .collect()
            })
            .collect();
    }

    fn detect(
        &mut self,
        profile: &DetectProfile,
        conv: &FinishedConversation,
        loc: &mut AnomalyLocation,
    ) -> f64 {
        if profile.cells.is_empty() {
            return 0.0;
        }

        let mut max_score = 0.0_f64;
        let mut first = true;

        for ts in 0..self.timeslot_cnt {
            let row = self.normalized_row(conv, ts);
            for trans in 0..self.transition_cnt {
                let value = row[trans];
                let cell = &profile.cells[ts][trans];
                let dev = value - cell.mean;

                let p = if dev.abs() > MIN_DEVIATION {
                    (cell.variance / (dev * dev)).min(1.0)
                } else {
                    1.0
                };
                let score = 1.0 - p;

                if first || score > max_score {
                    max_score = score;
                    *loc = AnomalyLocation {
                        timeslot: ts,
                        transition: trans,
                    };
                    first = false;
                }
            }
        }

        max_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statemachine::TimeslotCell;
    use statetrans_common::ConversationId;

    fn conv_with_single_label_count(label: usize, count: u64, k: usize) -> FinishedConversation {
        let mut row = vec![TimeslotCell::default(); k];
        row[label] = TimeslotCell {
            value: 0.0,
            aggr_value: count as f64,
            aggr_cnt: 1,
        };
        FinishedConversation {
            id: ConversationId {
                v6: false,
                src_ip: vec![10, 0, 0, 1],
                dst_ip: vec![10, 0, 0, 2],
                src_port: 1234,
                dst_port: 80,
                profile_key: vec![1, 2, 3, 4, 5, 6],
            },
            first_pkt_ts: 0,
            last_pkt_ts: 1,
            final_state_name: "CLOSED",
            timeslots: vec![row],
        }
    }

    #[test]
    fn identical_conversation_scores_as_not_anomalous() {
        let mut ev = ChebyshevEvaluator::new(1, 4);
        let mut learn = LearnProfile::default();
        for _ in 0..8 {
            ev.learn(&mut learn, &conv_with_single_label_count(0, 10, 4));
        }
        let mut detect = DetectProfile::default();
        ev.create_profile(&learn, &mut detect);

        let mut loc = AnomalyLocation::default();
        let score = ev.detect(&detect, &conv_with_single_label_count(0, 10, 4), &mut loc);
        assert!(score < 0.5, "expected low anomaly score, got {score}");
    }

    #[test]
    fn sharply_different_conversation_scores_higher_than_identical_one() {
        let mut ev = ChebyshevEvaluator::new(1, 4);
        let mut learn = LearnProfile::default();
        for _ in 0..8 {
            ev.learn(&mut learn, &conv_with_single_label_count(0, 10, 4));
        }
        let mut detect = DetectProfile::default();
        ev.create_profile(&learn, &mut detect);

        let mut loc_same = AnomalyLocation::default();
        let score_same = ev.detect(&detect, &conv_with_single_label_count(0, 10, 4), &mut loc_same);

        let mut loc_diff = AnomalyLocation::default();
        let score_diff = ev.detect(&detect, &conv_with_single_label_count(3, 10, 4), &mut loc_diff);

        assert!(score_diff > score_same);
        assert_eq!(loc_diff.transition, 3);
    }

    #[test]
    fn score_is_always_within_unit_range() {
        let mut ev = ChebyshevEvaluator::new(1, 4);
        let mut learn = LearnProfile::default();
        ev.learn(&mut learn, &conv_with_single_label_count(1, 3, 4));
        ev.learn(&mut learn, &conv_with_single_label_count(2, 7, 4));
        let mut detect = DetectProfile::default();
        ev.create_profile(&learn, &mut detect);

        let mut loc = AnomalyLocation::default();
        let score = ev.detect(&detect, &conv_with_single_label_count(0, 100, 4), &mut loc);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn empty_profile_yields_zero_score() {
        let mut ev = ChebyshevEvaluator::new(1, 4);
        let detect = DetectProfile::default();
        let mut loc = AnomalyLocation::default();
        let score = ev.detect(&detect, &conv_with_single_label_count(0, 10, 4), &mut loc);
        assert_eq!(score, 0.0);
    }
}
