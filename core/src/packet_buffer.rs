//! Fixed-capacity, deep-copying reorder FIFO that sits in front of the
//! engine to tolerate small out-of-order deliveries between two capture
//! directions.

use statetrans_common::PacketInfo;

const DEFAULT_CAPACITY: usize = 20;

pub struct PacketBuffer {
    slots: Vec<Option<PacketInfo>>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Build a buffer holding up to `capacity` in-flight packets before the
    /// oldest is evicted. `capacity` of 0 degenerates to evicting on every
    /// `add`.
    pub fn with_capacity(capacity: usize) -> Self {
        PacketBuffer {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a deep copy of `pkt` into the first free slot. If the buffer is
    /// full after the insert, evict and return the slot with the smallest
    /// timestamp (oldest-first emission); otherwise returns `None`.
    pub fn add(&mut self, pkt: PacketInfo) -> Option<PacketInfo> {
        if self.slots.is_empty() {
            return Some(pkt);
        }

        let free = self.slots.iter().position(|s| s.is_none());
        match free {
            Some(idx) => self.slots[idx] = Some(pkt),
            None => {
                // No free slot at all: the buffer was already full before
                // this call, which should not happen if callers always pull
                // the eviction out before adding again. Evict the oldest to
                // make room rather than silently dropping the new packet.
                let oldest = self.oldest_slot_index();
                return Some(self.slots[oldest].replace(pkt).expect("slot was occupied"));
            }
        }

        if self.slots.iter().all(|s| s.is_some()) {
            let oldest = self.oldest_slot_index();
            return self.slots[oldest].take();
        }
        None
    }

    /// Drain every buffered packet in timestamp order, oldest first. Used to
    /// flush the buffer at shutdown so no in-flight packet is lost.
    pub fn drain_oldest_first(&mut self) -> Vec<PacketInfo> {
        let mut out: Vec<PacketInfo> = self.slots.iter_mut().filter_map(|s| s.take()).collect();
        out.sort_by_key(|p| p.timestamp_us());
        out
    }

    fn oldest_slot_index(&self) -> usize {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|p| (i, p.timestamp_us())))
            .min_by_key(|&(_, ts)| ts)
            .map(|(i, _)| i)
            .expect("oldest_slot_index called on an empty buffer")
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statetrans_common::{AppKind, Direction, IpProtocol, LayerKind, TcpFlags};

    fn pkt(ts: u64) -> PacketInfo {
        PacketInfo {
            iface: "eth0".to_string(),
            timestamp_us: ts,
            direction: Direction::Out,
            layer: LayerKind::Ip,
            addr_len: 4,
            src_addr: vec![10, 0, 0, 1],
            dst_addr: vec![10, 0, 0, 2],
            src_port: 1234,
            dst_port: 80,
            ip_protocol: IpProtocol::V4,
            app_protocol: AppKind::Tcp,
            tcp_flags: TcpFlags::empty(),
            frag_off: 0,
            next: None,
        }
    }

    #[test]
    fn stays_empty_emission_until_full() {
        let mut buf = PacketBuffer::new();
        for ts in 0..19 {
            assert!(buf.add(pkt(ts)).is_none());
        }
        assert_eq!(buf.len(), 19);
    }

    #[test]
    fn emits_oldest_timestamp_once_full() {
        let mut buf = PacketBuffer::new();
        for ts in 0..19 {
            assert!(buf.add(pkt(ts)).is_none());
        }
        let evicted = buf.add(pkt(19)).expect("20th add fills the last slot and must evict");
        assert_eq!(evicted.timestamp_us(), 0);
        assert_eq!(buf.len(), 20);
    }

    #[test]
    fn tolerates_out_of_order_arrival_within_window() {
        let mut buf = PacketBuffer::new();
        let mut timestamps: Vec<u64> = (0..19).collect();
        timestamps.swap(3, 15);
        for ts in &timestamps {
            assert!(buf.add(pkt(*ts)).is_none());
        }
        let evicted = buf.add(pkt(25)).unwrap();
        assert_eq!(evicted.timestamp_us(), 0);
    }

    #[test]
    fn with_capacity_honors_a_configured_window_size() {
        let mut buf = PacketBuffer::with_capacity(3);
        assert_eq!(buf.capacity(), 3);
        assert!(buf.add(pkt(0)).is_none());
        assert!(buf.add(pkt(1)).is_none());
        let evicted = buf.add(pkt(2)).expect("3rd add fills a 3-slot buffer and must evict");
        assert_eq!(evicted.timestamp_us(), 0);
    }
}
