//! Elementary-stream packet framing on the video socket.
//!
//! After the handshake, every packet is:
//!   [8 bytes PTS BE][4 bytes length BE][length bytes payload]
//!
//! A PTS of `u64::MAX` marks a codec configuration packet.

use std::io::Read;

use devmirror_types::MediaPacket;
use tracing::trace;

use crate::error::ProtocolError;
use crate::handshake::read_full;

/// Size of the per-packet header.
pub const PACKET_HEADER_SIZE: usize = 12;

/// PTS value carried by configuration packets.
pub const NO_PTS: u64 = u64::MAX;

/// Upper bound on a single packet. Prevents allocation bombs.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Read the next packet.
///
/// Returns `None` if the stream ended cleanly on a packet boundary.
pub fn read_packet<R: Read>(reader: &mut R) -> Result<Option<MediaPacket>, ProtocolError> {
    let mut header = [0u8; PACKET_HEADER_SIZE];

    // distinguish a clean end of stream from a truncated header
    let first = loop {
        match reader.read(&mut header) {
            Ok(n) => break n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    };
    if first == 0 {
        return Ok(None);
    }
    if first < PACKET_HEADER_SIZE {
        read_full(reader, &mut header[first..]).map_err(|e| match e {
            ProtocolError::ShortRead { got, .. } => ProtocolError::ShortRead {
                expected: PACKET_HEADER_SIZE,
                got: first + got,
            },
            other => other,
        })?;
    }

    let mut pts_bytes = [0u8; 8];
    pts_bytes.copy_from_slice(&header[..8]);
    let pts = u64::from_be_bytes(pts_bytes);
    let len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if len > MAX_PACKET_SIZE {
        return Err(ProtocolError::TooLarge {
            size: len,
            max: MAX_PACKET_SIZE,
        });
    }

    let mut data = vec![0u8; len];
    read_full(reader, &mut data)?;
    trace!(pts, len, "read packet");

    Ok(Some(if pts == NO_PTS {
        MediaPacket::config(data)
    } else {
        MediaPacket::frame(pts, data)
    }))
}

/// Encode a packet with its header. Only loopback fakes of the device need this.
pub fn encode_packet(packet: &MediaPacket) -> Vec<u8> {
    let pts = packet.pts.unwrap_or(NO_PTS);
    // packets are bounded by MAX_PACKET_SIZE
    #[allow(clippy::cast_possible_truncation)]
    let len = packet.data.len() as u32;
    let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE + packet.data.len());
    buf.extend_from_slice(&pts.to_be_bytes());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&packet.data);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_config_then_frames() {
        let mut bytes = encode_packet(&MediaPacket::config(vec![0, 0, 0, 1, 0x67]));
        bytes.extend(encode_packet(&MediaPacket::frame(33_333, vec![0, 0, 0, 1, 0x65])));
        let mut reader = &bytes[..];

        let config = read_packet(&mut reader).unwrap().unwrap();
        assert!(config.is_config());
        assert_eq!(&config.data[..], &[0, 0, 0, 1, 0x67]);

        let frame = read_packet(&mut reader).unwrap().unwrap();
        assert_eq!(frame.pts, Some(33_333));

        assert!(read_packet(&mut reader).unwrap().is_none());
    }

    #[test]
    fn truncated_header_is_an_error() {
        let bytes = encode_packet(&MediaPacket::frame(1, vec![1, 2, 3]));
        let mut reader = &bytes[..5];
        assert!(matches!(
            read_packet(&mut reader),
            Err(ProtocolError::ShortRead {
                expected: PACKET_HEADER_SIZE,
                got: 5
            })
        ));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let bytes = encode_packet(&MediaPacket::frame(1, vec![1, 2, 3]));
        let mut reader = &bytes[..bytes.len() - 1];
        assert!(matches!(
            read_packet(&mut reader),
            Err(ProtocolError::ShortRead { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn oversized_packet_is_rejected() {
        let mut bytes = 0u64.to_be_bytes().to_vec();
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        let mut reader = &bytes[..];
        assert!(matches!(
            read_packet(&mut reader),
            Err(ProtocolError::TooLarge { .. })
        ));
    }
}
