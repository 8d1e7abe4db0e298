//! Uplink wire codec: encode/decode only, no I/O. The byte layouts are a
//! fixed protocol contract, not `serde` types — see the design notes on why
//! this differs from the ambient config surface.

use crate::engine::AnomalyReport;

/// `'C' <threshold:u32 be> <learn_seconds:u32 be>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigUpdate {
    pub threshold: f64,
    pub learn_millis: u64,
}

/// `'B'`/`'U'` block or unblock an address. Decoded and logged only — see
/// the design note on why this crate never shells out to a firewall.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockDirective {
    Block { addr: Vec<u8> },
    Unblock { addr: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Config(ConfigUpdate),
    Block(BlockDirective),
    Unknown(u8),
}

/// Encode an anomaly report as the fixed 'A' wire message.
///
/// ```text
/// 1  byte   'A'
/// 8  bytes  unix_time_seconds_at_emission   (big-endian u64)
/// 2  bytes  score_times_100                 (big-endian u16)
/// 1  byte   address_family                   (4 or 6)
/// 2  bytes  source_port                      (big-endian u16)
/// 2  bytes  destination_port                 (big-endian u16)
/// L  bytes  source_ip                        (L = 4 or 16)
/// L  bytes  destination_ip                   (L = 4 or 16)
/// ```
pub fn encode_anomaly_report(report: &AnomalyReport, unix_time_seconds_at_emission: u64) -> Vec<u8> {
    let family: u8 = if report.v6 { 6 } else { 4 };
    let score_times_100 = (report.score.clamp(0.0, 1.0) * 100.0).round() as u16;

    let mut out = Vec::with_capacity(1 + 8 + 2 + 1 + 2 + 2 + report.src_ip.len() + report.dst_ip.len());
    out.push(b'A');
    out.extend_from_slice(&unix_time_seconds_at_emission.to_be_bytes());
    out.extend_from_slice(&score_times_100.to_be_bytes());
    out.push(family);
    out.extend_from_slice(&report.src_port.to_be_bytes());
    out.extend_from_slice(&report.dst_port.to_be_bytes());
    out.extend_from_slice(&report.src_ip);
    out.extend_from_slice(&report.dst_ip);
    out
}

/// Encode the one-byte initial config request, sent on first connect.
pub fn encode_config_request() -> Vec<u8> {
    vec![b'C']
}

/// Decode one inbound uplink message. Returns `None` if `buf` does not yet
/// contain a full message for its opcode (caller should wait for more
/// bytes); an unrecognized opcode is reported as `Unknown` rather than an
/// error, per the "log and ignore" protocol-mismatch policy.
pub fn decode_inbound(buf: &[u8]) -> Option<InboundMessage> {
    let (&opcode, rest) = buf.split_first()?;
    match opcode {
        b'C' => {
            if rest.len() < 8 {
                return None;
            }
            let threshold_raw = u32::from_be_bytes(rest[0..4].try_into().ok()?);
            let learn_seconds = u32::from_be_bytes(rest[4..8].try_into().ok()?);
            Some(InboundMessage::Config(ConfigUpdate {
                threshold: threshold_raw as f64 / 100.0,
                learn_millis: learn_seconds as u64 * 1000,
            }))
        }
        b'B' => decode_address(rest).map(|addr| InboundMessage::Block(BlockDirective::Block { addr })),
        b'U' => decode_address(rest).map(|addr| InboundMessage::Block(BlockDirective::Unblock { addr })),
        other => Some(InboundMessage::Unknown(other)),
    }
}

fn decode_address(rest: &[u8]) -> Option<Vec<u8>> {
    match rest.len() {
        4 => Some(rest.to_vec()),
        16 => Some(rest.to_vec()),
        _ => None,
    }
}

/// Number of bytes `decode_inbound` needs to see before it can make
/// progress on `opcode`, or `None` for opcodes whose length it cannot
/// predict in advance (there are none today, but this keeps the adapter's
/// framing logic honest about that).
pub fn expected_len(opcode: u8) -> Option<usize> {
    match opcode {
        b'C' => Some(1 + 8),
        b'B' | b'U' => None, // 4 or 16 bytes of address; framed by the transport.
        _ => Some(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statemachine::AnomalyLocation;

    fn report(v6: bool, score: f64) -> AnomalyReport {
        AnomalyReport {
            score,
            v6,
            src_ip: if v6 { vec![0xAB; 16] } else { vec![10, 0, 0, 1] },
            dst_ip: if v6 { vec![0xCD; 16] } else { vec![10, 0, 0, 2] },
            src_port: 1234,
            dst_port: 80,
            location: AnomalyLocation::default(),
        }
    }

    #[test]
    fn encodes_ipv4_anomaly_report_byte_for_byte() {
        let bytes = encode_anomaly_report(&report(false, 0.973), 1_700_000_000);
        assert_eq!(bytes[0], b'A');
        assert_eq!(u64::from_be_bytes(bytes[1..9].try_into().unwrap()), 1_700_000_000);
        assert_eq!(u16::from_be_bytes(bytes[9..11].try_into().unwrap()), 97);
        assert_eq!(bytes[11], 4);
        assert_eq!(u16::from_be_bytes(bytes[12..14].try_into().unwrap()), 1234);
        assert_eq!(u16::from_be_bytes(bytes[14..16].try_into().unwrap()), 80);
        assert_eq!(&bytes[16..20], &[10, 0, 0, 1]);
        assert_eq!(&bytes[20..24], &[10, 0, 0, 2]);
        assert_eq!(bytes.len(), 24);
    }

    #[test]
    fn encodes_ipv6_anomaly_report_with_16_byte_addresses() {
        let bytes = encode_anomaly_report(&report(true, 1.0), 42);
        assert_eq!(bytes[11], 6);
        assert_eq!(bytes.len(), 1 + 8 + 2 + 1 + 2 + 2 + 16 + 16);
    }

    #[test]
    fn decodes_config_update() {
        let mut buf = vec![b'C'];
        buf.extend_from_slice(&95u32.to_be_bytes());
        buf.extend_from_slice(&90u32.to_be_bytes());
        let msg = decode_inbound(&buf).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Config(ConfigUpdate {
                threshold: 0.95,
                learn_millis: 90_000,
            })
        );
    }

    #[test]
    fn decodes_block_and_unblock() {
        let mut block = vec![b'B'];
        block.extend_from_slice(&[192, 168, 0, 1]);
        assert_eq!(
            decode_inbound(&block).unwrap(),
            InboundMessage::Block(BlockDirective::Block {
                addr: vec![192, 168, 0, 1]
            })
        );

        let mut unblock = vec![b'U'];
        unblock.extend_from_slice(&[0xAB; 16]);
        assert_eq!(
            decode_inbound(&unblock).unwrap(),
            InboundMessage::Block(BlockDirective::Unblock { addr: vec![0xAB; 16] })
        );
    }

    #[test]
    fn unknown_opcode_is_reported_not_rejected() {
        let msg = decode_inbound(&[b'Z', 1, 2, 3]).unwrap();
        assert_eq!(msg, InboundMessage::Unknown(b'Z'));
    }

    #[test]
    fn incomplete_config_message_returns_none() {
        assert!(decode_inbound(&[b'C', 1, 2]).is_none());
    }
}
