//! Shared packet and conversation-identity types for the statetrans network
//! anomaly detector.
//!
//! This crate only defines data — the packet input contract (`PacketInfo`)
//! and the `ConversationId` derived from it. Packet capture and decode are
//! external collaborators and are not implemented here.

pub mod conversation_id;
pub mod format;
pub mod packet;

pub use conversation_id::ConversationId;
pub use packet::{AppKind, Direction, IpProtocol, LayerKind, PacketInfo, TcpFlags};
