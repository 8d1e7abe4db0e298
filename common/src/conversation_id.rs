//! `ConversationId` — the canonical identifier for a flow, and its
//! derivation from a decoded packet chain.

use crate::format::format_4tuple;
use crate::packet::{Direction, IpProtocol, PacketInfo};

/// Canonical identifier for a flow: IP version, source/destination IP and
/// port, and the profile key (local-endpoint MAC) used to bucket the flow
/// into a per-host profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationId {
    pub v6: bool,
    pub src_ip: Vec<u8>,
    pub dst_ip: Vec<u8>,
    pub src_port: u16,
    pub dst_port: u16,
    pub profile_key: Vec<u8>,
}

impl ConversationId {
    /// Derive a `ConversationId` from a decoded packet chain.
    ///
    /// Returns `None` if the chain has no Ethernet layer, no TCP-bearing
    /// layer, or the Ethernet layer's direction is `Unknown` (the local
    /// MAC cannot be determined without knowing which side is local).
    pub fn from_packet(pkt: &PacketInfo) -> Option<Self> {
        let eth = pkt.first_ethernet()?;
        let tcp = pkt.first_tcp()?;

        let profile_key = match eth.direction {
            Direction::Out => eth.src_addr.clone(),
            Direction::In => eth.dst_addr.clone(),
            Direction::Unknown => return None,
        };

        let v6 = matches!(tcp.ip_protocol, IpProtocol::V6);

        Some(ConversationId {
            v6,
            src_ip: tcp.src_addr.clone(),
            dst_ip: tcp.dst_addr.clone(),
            src_port: tcp.src_port,
            dst_port: tcp.dst_port,
            profile_key,
        })
    }

    pub fn profile_key_len(&self) -> u8 {
        self.profile_key.len() as u8
    }

    pub fn addr_len(&self) -> usize {
        if self.v6 {
            16
        } else {
            4
        }
    }

    /// Packed bytes used as the conversation-table key: src ip, src port,
    /// dst ip, dst port.
    pub fn table_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.src_ip.len() + self.dst_ip.len() + 4);
        key.extend_from_slice(&self.src_ip);
        key.extend_from_slice(&self.src_port.to_be_bytes());
        key.extend_from_slice(&self.dst_ip);
        key.extend_from_slice(&self.dst_port.to_be_bytes());
        key
    }

    /// The key that the reverse-direction packet of the same flow would hash
    /// to.
    pub fn reverse_table_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.src_ip.len() + self.dst_ip.len() + 4);
        key.extend_from_slice(&self.dst_ip);
        key.extend_from_slice(&self.dst_port.to_be_bytes());
        key.extend_from_slice(&self.src_ip);
        key.extend_from_slice(&self.src_port.to_be_bytes());
        key
    }

    pub fn format_4tuple(&self, arrow: &str) -> String {
        format_4tuple(
            &self.src_ip,
            self.src_port,
            &self.dst_ip,
            self.dst_port,
            self.v6,
            arrow,
        )
    }
}
