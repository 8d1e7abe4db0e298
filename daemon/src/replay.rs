//! Packet-replay source: stands in for the live capture collaborator (out
//! of scope for this crate per §1) by reading a simple line-oriented text
//! format and producing the same `PacketInfo` chains the engine expects.
//!
//! Line format: `<timestamp_us> <direction> <flags> <src_port> <dst_port>`
//! where `direction` is `out`/`in` and `flags` is any combination of the
//! letters `s` (SYN) `a` (ACK) `f` (FIN) `r` (RST), e.g. `sa` for SYN+ACK.
//! Addresses and the local MAC are fixed per loaded file (single flow per
//! file keeps the demo format trivial); multi-flow replay files are out of
//! scope for this stand-in.

use std::path::Path;

use anyhow::{bail, Context, Result};
use statetrans_common::{AppKind, Direction, IpProtocol, LayerKind, PacketInfo, TcpFlags};

pub struct ReplaySource {
    local_mac: [u8; 6],
    peer_mac: [u8; 6],
    local_ip: Vec<u8>,
    peer_ip: Vec<u8>,
    events: Vec<(u64, Direction, TcpFlags, u16, u16)>,
}

impl ReplaySource {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {:?}", path))?;

        let mut events = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 5 {
                bail!("replay file {:?}, line {}: expected 5 fields", path, lineno + 1);
            }

            let ts: u64 = fields[0]
                .parse()
                .with_context(|| format!("replay file {:?}, line {}: bad timestamp", path, lineno + 1))?;
            let direction = match fields[1] {
                "out" => Direction::Out,
                "in" => Direction::In,
                other => bail!("replay file {:?}, line {}: unknown direction {:?}", path, lineno + 1, other),
            };
            let mut flags = TcpFlags::empty();
            for c in fields[2].chars() {
                flags |= match c {
                    's' => TcpFlags::SYN,
                    'a' => TcpFlags::ACK,
                    'f' => TcpFlags::FIN,
                    'r' => TcpFlags::RST,
                    other => bail!("replay file {:?}, line {}: unknown flag {:?}", path, lineno + 1, other),
                };
            }
            let src_port: u16 = fields[3]
                .parse()
                .with_context(|| format!("replay file {:?}, line {}: bad src_port", path, lineno + 1))?;
            let dst_port: u16 = fields[4]
                .parse()
                .with_context(|| format!("replay file {:?}, line {}: bad dst_port", path, lineno + 1))?;

            events.push((ts, direction, flags, src_port, dst_port));
        }

        Ok(ReplaySource {
            local_mac: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
            peer_mac: [0x02, 0x00, 0x00, 0x00, 0x00, 0x02],
            local_ip: vec![10, 0, 0, 1],
            peer_ip: vec![10, 0, 0, 2],
            events,
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_packets(self) -> Vec<PacketInfo> {
        let local_mac = self.local_mac;
        let peer_mac = self.peer_mac;
        let local_ip = self.local_ip;
        let peer_ip = self.peer_ip;

        self.events
            .into_iter()
            .map(|(ts, direction, flags, src_port, dst_port)| {
                let (eth_src, eth_dst) = match direction {
                    Direction::Out => (local_mac.to_vec(), peer_mac.to_vec()),
                    Direction::In | Direction::Unknown => (peer_mac.to_vec(), local_mac.to_vec()),
                };
                let (ip_src, ip_dst) = match direction {
                    Direction::Out => (local_ip.clone(), peer_ip.clone()),
                    Direction::In | Direction::Unknown => (peer_ip.clone(), local_ip.clone()),
                };

                PacketInfo {
                    iface: "replay0".to_string(),
                    timestamp_us: ts,
                    direction,
                    layer: LayerKind::Ethernet,
                    addr_len: 6,
                    src_addr: eth_src,
                    dst_addr: eth_dst,
                    src_port: 0,
                    dst_port: 0,
                    ip_protocol: IpProtocol::Other,
                    app_protocol: AppKind::Unknown,
                    tcp_flags: TcpFlags::empty(),
                    frag_off: 0,
                    next: Some(Box::new(PacketInfo {
                        iface: "replay0".to_string(),
                        timestamp_us: ts,
                        direction,
                        layer: LayerKind::Ip,
                        addr_len: 4,
                        src_addr: ip_src,
                        dst_addr: ip_dst,
                        src_port,
                        dst_port,
                        ip_protocol: IpProtocol::V4,
                        app_protocol: AppKind::Tcp,
                        tcp_flags: flags,
                        frag_off: 0,
                        next: None,
                    })),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_handshake() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("statetrans-test-replay-{}.txt", std::process::id()));
        std::fs::write(
            &path,
            "# a minimal handshake\n0 out s 1234 80\n1 in sa 80 1234\n2 out a 1234 80\n",
        )
        .unwrap();

        let source = ReplaySource::load(&path).unwrap();
        assert_eq!(source.len(), 3);
        let packets = source.into_packets();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].direction, Direction::Out);
        assert_eq!(packets[0].first_tcp().unwrap().tcp_flags, TcpFlags::SYN);
        assert_eq!(
            packets[1].first_tcp().unwrap().tcp_flags,
            TcpFlags::SYN | TcpFlags::ACK
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_unknown_direction() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("statetrans-test-replay-bad-{}.txt", std::process::id()));
        std::fs::write(&path, "0 sideways s 1234 80\n").unwrap();

        assert!(ReplaySource::load(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
