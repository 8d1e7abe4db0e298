//! The engine binds one state machine and one evaluator over a shared
//! timeslot schedule, owns per-host learning/detection profiles, and
//! arbitrates the LEARNING -> DETECTION mode switch.

use std::collections::HashMap;

use log::warn;

use crate::evaluator::Evaluator;
use crate::statemachine::{AnomalyLocation, StateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Learning,
    Detection,
}

/// One emitted anomaly, ready for the wire codec. `timeslot`/`transition`
/// identify the matrix cell that drove the score, for operator diagnostics;
/// they are not part of the wire payload itself.
#[derive(Debug, Clone)]
pub struct AnomalyReport {
    pub score: f64,
    pub v6: bool,
    pub src_ip: Vec<u8>,
    pub dst_ip: Vec<u8>,
    pub src_port: u16,
    pub dst_port: u16,
    pub location: AnomalyLocation,
}

pub struct Engine<SM: StateMachine, EV: Evaluator> {
    statemachine: SM,
    evaluator: EV,
    mode: Mode,
    threshold: f64,
    learning_profiles: HashMap<Vec<u8>, EV::LearnProfile>,
    detection_profiles: HashMap<Vec<u8>, EV::DetectProfile>,
}

impl<SM: StateMachine, EV: Evaluator> Engine<SM, EV> {
    pub fn new(mut statemachine: SM, mut evaluator: EV, threshold: f64) -> Self {
        statemachine.init();
        evaluator.init();
        Engine {
            statemachine,
            evaluator,
            mode: Mode::Learning,
            threshold,
            learning_profiles: HashMap::new(),
            detection_profiles: HashMap::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    pub fn statemachine(&self) -> &SM {
        &self.statemachine
    }

    /// Process one packet: feed the state machine, drain any conversations
    /// it finishes, learn or detect on each, and sweep for timeouts.
    /// Returns anomaly reports triggered by this packet's finished
    /// conversations, in detection order.
    pub fn handle_packet(&mut self, pkt: &statetrans_common::PacketInfo) -> Vec<AnomalyReport> {
        self.statemachine.on_packet(pkt);

        let now = pkt.timestamp_us();
        let mut reports = Vec::new();

        while let Some(mut conv) = self.statemachine.next_finished(now) {
            let key = conv.id.profile_key.clone();

            match self.mode {
                Mode::Learning => {
                    let profile = self.learning_profiles.entry(key).or_default();
                    self.evaluator.learn(profile, &conv);
                }
                Mode::Detection => {
                    let profile = self.detection_profiles.entry(key).or_default();
                    let mut loc = AnomalyLocation::default();
                    let score = self.evaluator.detect(profile, &conv, &mut loc);
                    if score >= self.threshold {
                        reports.push(AnomalyReport {
                            score,
                            v6: conv.id.v6,
                            src_ip: std::mem::take(&mut conv.id.src_ip),
                            dst_ip: std::mem::take(&mut conv.id.dst_ip),
                            src_port: conv.id.src_port,
                            dst_port: conv.id.dst_port,
                            location: loc,
                        });
                    }
                }
            }
        }

        self.statemachine.clean_timedout(now);
        reports
    }

    /// Switch from LEARNING to DETECTION. Any other requested transition is
    /// logged and ignored.
    pub fn change_mode(&mut self, new_mode: Mode) {
        if self.mode != Mode::Learning || new_mode != Mode::Detection {
            warn!(
                "unsupported mode transition {:?} -> {:?}; ignoring",
                self.mode, new_mode
            );
            return;
        }

        self.detection_profiles.clear();
        for (key, learn_profile) in self.learning_profiles.iter() {
            let mut detect_profile = EV::DetectProfile::default();
            self.evaluator
                .create_profile(learn_profile, &mut detect_profile);
            self.detection_profiles.insert(key.clone(), detect_profile);
        }
        self.mode = Mode::Detection;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::chebyshev::ChebyshevEvaluator;
    use crate::statemachine::tcp::TcpStateMachine;
    use statetrans_common::{AppKind, Direction, IpProtocol, LayerKind, PacketInfo, TcpFlags};

    fn schedule() -> Vec<u64> {
        vec![1, 10, 100, 1_000, 10_000, 100_000, 1_000_000]
    }

    fn syn_pkt(ts: u64, direction: Direction) -> PacketInfo {
        PacketInfo {
            iface: "eth0".to_string(),
            timestamp_us: ts,
            direction,
            layer: LayerKind::Ethernet,
            addr_len: 6,
            src_addr: vec![1, 2, 3, 4, 5, 6],
            dst_addr: vec![6, 5, 4, 3, 2, 1],
            src_port: 0,
            dst_port: 0,
            ip_protocol: IpProtocol::Other,
            app_protocol: AppKind::Unknown,
            tcp_flags: TcpFlags::empty(),
            frag_off: 0,
            next: Some(Box::new(PacketInfo {
                iface: "eth0".to_string(),
                timestamp_us: ts,
                direction,
                layer: LayerKind::Ip,
                addr_len: 4,
                src_addr: vec![10, 0, 0, 1],
                dst_addr: vec![10, 0, 0, 2],
                src_port: 1234,
                dst_port: 80,
                ip_protocol: IpProtocol::V4,
                app_protocol: AppKind::Tcp,
                tcp_flags: TcpFlags::SYN,
                frag_off: 0,
                next: None,
            })),
        }
    }

    #[test]
    fn mode_change_ignores_detection_to_learning() {
        let sm = TcpStateMachine::new(schedule());
        let ev = ChebyshevEvaluator::new(7, crate::statemachine::tcp::TRANSITION_COUNT);
        let mut engine = Engine::new(sm, ev, 0.95);

        engine.change_mode(Mode::Detection);
        assert_eq!(engine.mode(), Mode::Detection);

        engine.change_mode(Mode::Learning);
        assert_eq!(engine.mode(), Mode::Detection, "reverse transition must be a no-op");
    }

    #[test]
    fn learning_then_detection_on_identical_traffic_does_not_trigger_on_threshold() {
        let sm = TcpStateMachine::new(schedule());
        let ev = ChebyshevEvaluator::new(7, crate::statemachine::tcp::TRANSITION_COUNT);
        let mut engine = Engine::new(sm, ev, 0.95);

        let mut ts = 0u64;
        for _ in 0..30 {
            engine.handle_packet(&syn_pkt(ts, Direction::Out));
            ts += 1;
            engine.handle_packet(&syn_pkt(ts, Direction::In));
            ts += 1;
            // reset-to-close so each handshake is its own conversation
            let mut rst = syn_pkt(ts, Direction::In);
            rst.next.as_mut().unwrap().tcp_flags = TcpFlags::RST;
            engine.handle_packet(&rst);
            ts += 1;
        }

        engine.change_mode(Mode::Detection);

        engine.handle_packet(&syn_pkt(ts, Direction::Out));
        ts += 1;
        engine.handle_packet(&syn_pkt(ts, Direction::In));
        ts += 1;
        let mut rst = syn_pkt(ts, Direction::In);
        rst.next.as_mut().unwrap().tcp_flags = TcpFlags::RST;
        let reports = engine.handle_packet(&rst);

        assert!(reports.is_empty(), "identical replay must not cross threshold");
    }
}
