//! Tokio-based uplink client: sends anomaly reports and the initial config
//! request, receives configuration/block/unblock opcodes. I/O only; the
//! byte layouts themselves live in `statetrans_core::wire`.

use anyhow::{bail, Context, Result};
use log::{info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use statetrans_core::engine::AnomalyReport;
use statetrans_core::wire::{self, BlockDirective, InboundMessage};

pub struct UplinkClient {
    stream: TcpStream,
}

impl UplinkClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to uplink at {addr}"))?;
        info!("connected to uplink at {addr}");
        let mut client = UplinkClient { stream };
        client.send_config_request().await?;
        Ok(client)
    }

    async fn send_config_request(&mut self) -> Result<()> {
        self.stream
            .write_all(&wire::encode_config_request())
            .await
            .context("failed to send initial config request")
    }

    pub async fn send_anomaly_report(&mut self, report: &AnomalyReport, unix_time_seconds: u64) -> Result<()> {
        let bytes = wire::encode_anomaly_report(report, unix_time_seconds);
        self.stream
            .write_all(&bytes)
            .await
            .context("failed to send anomaly report")
    }

    /// Read and decode one inbound message. A zero-length read (peer closed
    /// the connection) is treated as fatal, per the protocol-mismatch
    /// policy that an empty message from uplink aborts the process.
    pub async fn recv_message(&mut self) -> Result<InboundMessage> {
        let mut opcode_buf = [0u8; 1];
        let n = self.stream.read(&mut opcode_buf).await.context("uplink read failed")?;
        if n == 0 {
            bail!("uplink closed the connection");
        }
        let opcode = opcode_buf[0];

        let body_len = match wire::expected_len(opcode) {
            Some(total) => total.saturating_sub(1),
            None => {
                // 'B'/'U': 4 or 16 bytes of address, framed by the peer
                // sending exactly one TCP segment per message in practice.
                let mut probe = [0u8; 16];
                let n = self.stream.read(&mut probe).await.context("uplink read failed")?;
                let mut full = vec![opcode];
                full.extend_from_slice(&probe[..n]);
                return wire::decode_inbound(&full)
                    .ok_or_else(|| anyhow::anyhow!("malformed block/unblock message"));
            }
        };

        let mut body = vec![0u8; body_len];
        if body_len > 0 {
            self.stream
                .read_exact(&mut body)
                .await
                .context("uplink read failed")?;
        }

        let mut full = vec![opcode];
        full.extend_from_slice(&body);
        match wire::decode_inbound(&full) {
            Some(msg) => Ok(msg),
            None => {
                warn!("malformed uplink message with opcode {opcode:#x}");
                Ok(InboundMessage::Unknown(opcode))
            }
        }
    }
}

/// Log a decoded block/unblock directive. This crate decodes the opcode but
/// never dispatches the underlying firewall action itself.
pub fn log_block_directive(directive: &BlockDirective) {
    match directive {
        BlockDirective::Block { addr } => {
            info!("uplink requested block of address {addr:?} (not executed: no side-collaborator wired up)")
        }
        BlockDirective::Unblock { addr } => {
            info!("uplink requested unblock of address {addr:?} (not executed: no side-collaborator wired up)")
        }
    }
}
