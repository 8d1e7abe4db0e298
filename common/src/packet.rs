//! Decoded packet records as delivered by the (external) capture collaborator.
//!
//! The capture and decode step itself is out of scope for this crate; what
//! lands here is the already-decoded layer chain described by the packet
//! input contract.

/// Which side of the capture interface a layer was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    Unknown,
}

/// Coarse tag for a decoded layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Ethernet,
    Ip,
    Sll,
    Other,
}

/// Coarse tag for the protocol carried by a layer ('T'/'U'/'i'/'I'/'4'/'6'/'?').
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppKind {
    Tcp,
    Udp,
    Icmp,
    Icmpv6,
    EncapV4,
    EncapV6,
    Unknown,
}

/// IP version tag ('4', '6', or something else entirely at a non-IP layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    V4,
    V6,
    Other,
}

bitflags::bitflags! {
    /// The TCP flags byte. Kept as a thin newtype rather than the raw u8 so
    /// callers read `flags.syn()` instead of re-deriving the bit positions
    /// at every call site.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

impl TcpFlags {
    pub fn syn(self) -> bool {
        self.contains(TcpFlags::SYN)
    }
    pub fn ack(self) -> bool {
        self.contains(TcpFlags::ACK)
    }
    pub fn fin(self) -> bool {
        self.contains(TcpFlags::FIN)
    }
    pub fn rst(self) -> bool {
        self.contains(TcpFlags::RST)
    }
}

/// One link in the decoded layer chain, outer-to-inner (Ethernet -> IP ->
/// TCP/UDP/...). `next` walks toward the inner layers.
#[derive(Debug, Clone)]
pub struct PacketInfo {
    pub iface: String,
    pub timestamp_us: u64,
    pub direction: Direction,
    pub layer: LayerKind,
    pub addr_len: u8,
    pub src_addr: Vec<u8>,
    pub dst_addr: Vec<u8>,
    pub src_port: u16,
    pub dst_port: u16,
    pub ip_protocol: IpProtocol,
    pub app_protocol: AppKind,
    pub tcp_flags: TcpFlags,
    /// Low 13 bits meaningful; nonzero means this is a non-first IP fragment.
    pub frag_off: u16,
    pub next: Option<Box<PacketInfo>>,
}

impl PacketInfo {
    /// Timestamp attached to the packet by the capture collaborator. Every
    /// layer in one decoded chain shares the same packet timestamp.
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Walk the chain and return the first Ethernet-tagged layer, used to
    /// derive the profile key (local MAC address).
    pub fn first_ethernet(&self) -> Option<&PacketInfo> {
        self.layer_chain().find(|l| l.layer == LayerKind::Ethernet)
    }

    /// Walk the chain and return the first layer carrying a TCP payload.
    pub fn first_tcp(&self) -> Option<&PacketInfo> {
        self.layer_chain()
            .find(|l| l.app_protocol == AppKind::Tcp)
    }

    /// Fragment offset of the first TCP-bearing layer, if any.
    pub fn frag_offset(&self) -> u16 {
        self.first_tcp().map(|l| l.frag_off & 0x1FFF).unwrap_or(0)
    }

    fn layer_chain(&self) -> LayerChainIter<'_> {
        LayerChainIter { cur: Some(self) }
    }
}

struct LayerChainIter<'a> {
    cur: Option<&'a PacketInfo>,
}

impl<'a> Iterator for LayerChainIter<'a> {
    type Item = &'a PacketInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cur.take()?;
        self.cur = cur.next.as_deref();
        Some(cur)
    }
}
