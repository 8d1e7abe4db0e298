//! The TCP conversation state machine: 18 states, a fixed alphabet of 32
//! transition labels, a 4-tuple conversation table with LRU eviction order
//! and forward-copy compaction.

use std::collections::HashMap;

use statetrans_common::{ConversationId, Direction, PacketInfo, TcpFlags};

use super::{AnomalyLocation, FinishedConversation, StateMachine, TimeslotCell};

pub const TRANSITION_COUNT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Transition {
    NoTrans = 0,
    T1 = 1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
    T8,
    T9,
    T10,
    T11,
    T12,
    T13,
    T14,
    T15,
    T16,
    T17,
    T18,
    T19,
    T20,
    T21,
    T22,
    T23,
    T24,
    T25,
    T26,
    T27,
    T28,
    T29,
    T30,
    T31,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
    NoState,
    SynSent,
    SynRecd,
    AckWait,
    Established,
    FinWait1,
    FinWait2,
    Closing1,
    Closing2,
    Closing,
    CloseWait1,
    CloseWait,
    LastAck1,
    LastAck,
    LastAck2,
    Closed,
    TimedOut,
    RstSeen,
}

impl TcpState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TcpState::Closed | TcpState::TimedOut | TcpState::RstSeen
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            TcpState::NoState => "NO_STATE",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynRecd => "SYN_RECEIVED",
            TcpState::AckWait => "ACK_WAIT",
            TcpState::Established => "ESTABLISHED",
            TcpState::FinWait1 => "FIN_WAIT_1",
            TcpState::FinWait2 => "FIN_WAIT_2",
            TcpState::Closing1 => "CLOSING_1",
            TcpState::Closing2 => "CLOSING_2",
            TcpState::Closing => "CLOSING",
            TcpState::CloseWait1 => "CLOSE_WAIT_1",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::LastAck1 => "LAST_ACK_1",
            TcpState::LastAck => "LAST_ACK",
            TcpState::LastAck2 => "LAST_ACK_2",
            TcpState::Closed => "CLOSED",
            TcpState::TimedOut => "TIMED_OUT",
            TcpState::RstSeen => "RST_SEEN",
        }
    }

    fn timeout_secs(self, cfg: &TimeoutConfig) -> u64 {
        match self {
            TcpState::SynSent | TcpState::SynRecd | TcpState::AckWait => cfg.syn_timeout_secs,
            TcpState::Established => cfg.estab_timeout_secs,
            TcpState::FinWait1
            | TcpState::FinWait2
            | TcpState::Closing1
            | TcpState::Closing2
            | TcpState::Closing => cfg.fin_timeout_secs,
            TcpState::CloseWait1
            | TcpState::CloseWait
            | TcpState::LastAck1
            | TcpState::LastAck
            | TcpState::LastAck2 => cfg.last_ack_timeout_secs,
            _ => cfg.syn_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub syn_timeout_secs: u64,
    pub estab_timeout_secs: u64,
    pub fin_timeout_secs: u64,
    pub last_ack_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            syn_timeout_secs: 120,
            estab_timeout_secs: 5 * 86_400,
            fin_timeout_secs: 120,
            last_ack_timeout_secs: 30,
        }
    }
}

/// Classify one packet's flags against the conversation's current state and
/// direction, returning the resulting state and the transition label to
/// account (or `NoTrans` if the flag combination doesn't move the state
/// machine, e.g. a mid-stream data ACK on an established connection).
fn classify(state: TcpState, direction: Direction, flags: TcpFlags) -> (TcpState, Transition) {
    // A reset anywhere outside of an already-established conversation closes
    // it immediately and uniformly, regardless of state or direction.
    if flags.rst() && state != TcpState::Established {
        return (TcpState::RstSeen, Transition::T8);
    }

    match state {
        TcpState::NoState => {
            if direction == Direction::In && flags.syn() {
                (TcpState::SynRecd, Transition::T1)
            } else if direction == Direction::Out && flags.syn() {
                (TcpState::SynSent, Transition::T2)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::SynRecd => {
            if direction == Direction::Out && flags.syn() && flags.ack() {
                (TcpState::AckWait, Transition::T3)
            } else if direction == Direction::Out && flags.fin() {
                (TcpState::FinWait1, Transition::T29)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::SynSent => {
            if direction == Direction::In && flags.syn() && flags.ack() && flags.fin() {
                (TcpState::CloseWait1, Transition::T31)
            } else if direction == Direction::In && flags.syn() && flags.ack() {
                (TcpState::Established, Transition::T5)
            } else if direction == Direction::In && flags.syn() {
                (TcpState::SynRecd, Transition::T4)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::AckWait => {
            if direction == Direction::In && flags.ack() && flags.fin() {
                (TcpState::CloseWait1, Transition::T7)
            } else if direction == Direction::In && flags.ack() {
                (TcpState::Established, Transition::T6)
            } else if direction == Direction::Out && flags.fin() {
                (TcpState::FinWait1, Transition::T30)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::Established => {
            if flags.rst() {
                (TcpState::Closed, Transition::T20)
            } else if direction == Direction::Out && flags.fin() {
                (TcpState::FinWait1, Transition::T11)
            } else if direction == Direction::In && flags.fin() {
                (TcpState::CloseWait1, Transition::T10)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::FinWait1 => {
            if direction == Direction::In && flags.fin() && flags.ack() {
                (TcpState::Closing2, Transition::T18)
            } else if direction == Direction::In && flags.fin() {
                (TcpState::Closing1, Transition::T12)
            } else if direction == Direction::In && flags.ack() {
                (TcpState::FinWait2, Transition::T13)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::FinWait2 => {
            if direction == Direction::In && flags.fin() {
                (TcpState::Closing2, Transition::T14)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::Closing1 => {
            if direction == Direction::In && flags.ack() {
                (TcpState::Closing, Transition::T15)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::Closing => {
            if direction == Direction::Out && flags.ack() {
                (TcpState::Closed, Transition::T16)
            } else if direction == Direction::In && flags.ack() {
                (TcpState::Closed, Transition::T17)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::Closing2 => {
            if direction == Direction::Out && flags.ack() {
                (TcpState::Closed, Transition::T19)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::CloseWait1 => {
            if direction == Direction::Out && flags.ack() {
                (TcpState::CloseWait, Transition::T21)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::CloseWait => {
            if direction == Direction::Out && flags.fin() {
                (TcpState::LastAck1, Transition::T22)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::LastAck1 => {
            if direction == Direction::In && flags.ack() {
                (TcpState::LastAck, Transition::T23)
            } else if direction == Direction::Out && flags.fin() {
                (TcpState::LastAck2, Transition::T24)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::LastAck => {
            if direction == Direction::In && flags.ack() {
                (TcpState::Closed, Transition::T25)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::LastAck2 => {
            if direction == Direction::In && flags.ack() {
                (TcpState::LastAck, Transition::T26)
            } else if direction == Direction::Out && flags.fin() {
                (TcpState::LastAck2, Transition::T27)
            } else {
                (state, Transition::NoTrans)
            }
        }
        TcpState::Closed | TcpState::TimedOut | TcpState::RstSeen => (state, Transition::NoTrans),
    }
}

#[derive(Debug, Clone)]
struct Conversation {
    id: ConversationId,
    state: TcpState,
    first_pkt_ts: u64,
    last_pkt_ts: u64,
    terminated: bool,
    deleted: bool,
    timeslots: Vec<Vec<TimeslotCell>>,
    timeslot_starts: Vec<u64>,
    prev: Option<u32>,
    next: Option<u32>,
}

/// Fixed 4-tuple conversation table with LRU eviction order, lazy idle-timeout
/// detection, and forward-copy compaction of emitted entries.
pub struct TcpStateMachine {
    timeslots_us: Vec<u64>,
    timeouts: TimeoutConfig,
    timeout_check_interval_us: u64,
    consolidate_lower_threshold: usize,
    consolidate_threshold_portion: f64,

    slots: Vec<Conversation>,
    key_index: HashMap<Vec<u8>, u32>,
    lru_head: Option<u32>,
    lru_tail: Option<u32>,

    last_timedout_check_ts: Option<u64>,
    delayed_deleted_count: usize,

    walk_cursor: Option<u32>,
    walk_started_this_sweep: bool,
    last_walk_sweep_ts: Option<u64>,
}

impl TcpStateMachine {
    pub fn new(timeslots_us: Vec<u64>) -> Self {
        TcpStateMachine {
            timeslots_us,
            timeouts: TimeoutConfig::default(),
            timeout_check_interval_us: 2_000_000,
            consolidate_lower_threshold: 10_000,
            consolidate_threshold_portion: 0.1,
            slots: Vec::new(),
            key_index: HashMap::new(),
            lru_head: None,
            lru_tail: None,
            last_timedout_check_ts: None,
            delayed_deleted_count: 0,
            walk_cursor: None,
            walk_started_this_sweep: false,
            last_walk_sweep_ts: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|c| !c.deleted).count()
    }

    fn push_new_conversation(&mut self, id: ConversationId, now: u64) -> u32 {
        let t = self.timeslots_us.len();
        let timeslots = vec![vec![TimeslotCell::default(); TRANSITION_COUNT]; t];
        let timeslot_starts = vec![now; t];
        let idx = self.slots.len() as u32;
        let conv = Conversation {
            id,
            state: TcpState::NoState,
            first_pkt_ts: now,
            last_pkt_ts: now,
            terminated: false,
            deleted: false,
            timeslots,
            timeslot_starts,
            prev: self.lru_tail,
            next: None,
        };
        self.slots.push(conv);
        if let Some(tail) = self.lru_tail {
            self.slots[tail as usize].next = Some(idx);
        } else {
            self.lru_head = Some(idx);
        }
        self.lru_tail = Some(idx);
        idx
    }

    fn touch_lru(&mut self, idx: u32) {
        if self.lru_tail == Some(idx) {
            return;
        }
        let (prev, next) = {
            let conv = &self.slots[idx as usize];
            (conv.prev, conv.next)
        };
        if let Some(p) = prev {
            self.slots[p as usize].next = next;
        } else {
            self.lru_head = next;
        }
        if let Some(n) = next {
            self.slots[n as usize].prev = prev;
        }
        let old_tail = self.lru_tail;
        self.slots[idx as usize].prev = old_tail;
        self.slots[idx as usize].next = None;
        if let Some(t) = old_tail {
            self.slots[t as usize].next = Some(idx);
        }
        self.lru_tail = Some(idx);
        if self.lru_head.is_none() {
            self.lru_head = Some(idx);
        }
    }

    /// Find (or create) the live conversation entry for `id`, replacing any
    /// terminated entry that still occupies the slot. Returns its index.
    fn lookup_or_create(&mut self, id: &ConversationId, now: u64) -> u32 {
        let key = id.table_key();
        let rev_key = id.reverse_table_key();

        let found = self
            .key_index
            .get(&key)
            .copied()
            .or_else(|| self.key_index.get(&rev_key).copied());

        if let Some(idx) = found {
            if self.slots[idx as usize].terminated {
                let new_idx = self.push_new_conversation(id.clone(), now);
                self.key_index.remove(&key);
                self.key_index.remove(&rev_key);
                self.key_index.insert(key, new_idx);
                return new_idx;
            }
            self.touch_lru(idx);
            return idx;
        }

        let new_idx = self.push_new_conversation(id.clone(), now);
        self.key_index.insert(key, new_idx);
        new_idx
    }

    fn account_transition(&mut self, idx: u32, now: u64, trans: Transition) {
        let label = trans as usize;
        let t = self.timeslots_us.len();
        for ts in 0..t {
            let interval = self.timeslots_us[ts];
            let conv = &mut self.slots[idx as usize];
            if now >= conv.timeslot_starts[ts] + interval {
                for cell in conv.timeslots[ts].iter_mut() {
                    cell.aggr_value += cell.value;
                    cell.aggr_cnt += 1;
                    cell.value = 0.0;
                }
                conv.timeslot_starts[ts] = now;
            }
            conv.timeslots[ts][label].value += 1.0;
        }
    }

    fn is_timed_out(&self, conv: &Conversation, now: u64) -> bool {
        now > conv.last_pkt_ts + conv.state.timeout_secs(&self.timeouts) * 1_000_000
    }

    fn emit(&mut self, idx: u32) -> FinishedConversation {
        let conv = &mut self.slots[idx as usize];
        for row in conv.timeslots.iter_mut() {
            for cell in row.iter_mut() {
                if cell.value != 0.0 {
                    cell.aggr_value += cell.value;
                    cell.aggr_cnt += 1;
                    cell.value = 0.0;
                }
            }
        }
        conv.deleted = true;
        self.delayed_deleted_count += 1;

        FinishedConversation {
            id: conv.id.clone(),
            first_pkt_ts: conv.first_pkt_ts,
            last_pkt_ts: conv.last_pkt_ts,
            final_state_name: conv.state.name(),
            timeslots: conv.timeslots.clone(),
        }
    }

    fn maybe_compact(&mut self) {
        let total = self.slots.len();
        let threshold = self
            .consolidate_lower_threshold
            .max((self.consolidate_threshold_portion * total as f64) as usize);
        if self.delayed_deleted_count >= threshold {
            self.compact();
        }
    }

    /// Forward-copy compaction: rebuild the slot array from only the
    /// non-deleted entries, in their existing LRU order, and remap the key
    /// index, LRU links, and any in-flight walk cursor onto it.
    fn compact(&mut self) {
        let mut new_slots: Vec<Conversation> = Vec::with_capacity(self.slots.len());
        let mut old_to_new: HashMap<u32, u32> = HashMap::new();

        let mut cur = self.lru_head;
        while let Some(idx) = cur {
            let next = self.slots[idx as usize].next;
            if !self.slots[idx as usize].deleted {
                let new_idx = new_slots.len() as u32;
                old_to_new.insert(idx, new_idx);
                let mut copy = self.slots[idx as usize].clone();
                copy.prev = if new_idx == 0 { None } else { Some(new_idx - 1) };
                copy.next = None;
                new_slots.push(copy);
            }
            cur = next;
        }

        let len = new_slots.len();
        for i in 0..len {
            new_slots[i].next = if i + 1 < len { Some((i + 1) as u32) } else { None };
        }

        let mut new_key_index = HashMap::with_capacity(len);
        for (i, conv) in new_slots.iter().enumerate() {
            new_key_index.insert(conv.id.table_key(), i as u32);
        }

        self.slots = new_slots;
        self.key_index = new_key_index;
        self.lru_head = if len > 0 { Some(0) } else { None };
        self.lru_tail = if len > 0 { Some((len - 1) as u32) } else { None };
        self.walk_cursor = self.walk_cursor.and_then(|old| old_to_new.get(&old).copied());
        self.delayed_deleted_count = 0;
    }
}

impl StateMachine for TcpStateMachine {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn transition_count(&self) -> usize {
        TRANSITION_COUNT
    }

    fn on_packet(&mut self, pkt: &PacketInfo) {
        let id = match ConversationId::from_packet(pkt) {
            Some(id) => id,
            None => return,
        };
        let tcp = match pkt.first_tcp() {
            Some(l) => l,
            None => return,
        };
        let now = pkt.timestamp_us();

        let idx = self.lookup_or_create(&id, now);
        if now > self.slots[idx as usize].last_pkt_ts {
            self.slots[idx as usize].last_pkt_ts = now;
        }

        if tcp.frag_off & 0x1FFF != 0 {
            // non-first fragment: no TCP header to classify on.
            return;
        }
        if self.slots[idx as usize].terminated {
            return;
        }

        let state = self.slots[idx as usize].state;
        let (new_state, trans) = classify(state, tcp.direction, tcp.tcp_flags);
        self.slots[idx as usize].state = new_state;
        if matches!(trans, Transition::NoTrans) {
            return;
        }

        self.account_transition(idx, now, trans);
        if new_state.is_terminal() {
            self.slots[idx as usize].terminated = true;
        }
    }

    fn next_finished(&mut self, now_us: u64) -> Option<FinishedConversation> {
        if let Some(tail) = self.lru_tail {
            let conv = &self.slots[tail as usize];
            if !conv.deleted && conv.terminated {
                return Some(self.emit(tail));
            }
        }

        if self.walk_cursor.is_none() && !self.walk_started_this_sweep {
            let should_start = match self.last_walk_sweep_ts {
                None => true,
                Some(last) => now_us >= last + self.timeout_check_interval_us,
            };
            if !should_start {
                return None;
            }
            self.walk_cursor = self.lru_head;
            self.walk_started_this_sweep = true;
            self.last_walk_sweep_ts = Some(now_us);
        }

        while let Some(cur) = self.walk_cursor {
            let next = self.slots[cur as usize].next;
            let deleted = self.slots[cur as usize].deleted;
            let terminated = self.slots[cur as usize].terminated;
            let timed_out = !terminated && !deleted && self.is_timed_out(&self.slots[cur as usize], now_us);

            self.walk_cursor = next;

            if deleted || !(terminated || timed_out) {
                continue;
            }
            if timed_out {
                self.slots[cur as usize].state = TcpState::TimedOut;
                self.slots[cur as usize].terminated = true;
            }
            return Some(self.emit(cur));
        }

        self.walk_started_this_sweep = false;
        None
    }

    fn clean_timedout(&mut self, now_us: u64) {
        let should_scan = match self.last_timedout_check_ts {
            None => true,
            Some(last) => now_us >= last + self.timeout_check_interval_us,
        };
        if should_scan {
            for conv in self.slots.iter_mut() {
                if conv.deleted || conv.terminated {
                    continue;
                }
                if now_us > conv.last_pkt_ts + conv.state.timeout_secs(&self.timeouts) * 1_000_000 {
                    conv.state = TcpState::TimedOut;
                    conv.terminated = true;
                }
            }
            self.last_timedout_check_ts = Some(now_us);
        }
        self.maybe_compact();
    }
}
