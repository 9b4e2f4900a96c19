//! Device-info handshake, read from the video socket right after connecting.
//!
//! Layout:
//!   [64 bytes device name, NUL-padded][2 bytes width BE][2 bytes height BE]

use std::io::Read;

use devmirror_types::{DeviceInfo, Size};
use tracing::debug;

use crate::error::ProtocolError;

/// Size of the NUL-padded device name field.
pub const DEVICE_NAME_FIELD_LENGTH: usize = 64;

/// Total size of the handshake record.
pub const HANDSHAKE_SIZE: usize = DEVICE_NAME_FIELD_LENGTH + 4;

/// Read the handshake record. Any short read is an error: a partial session
/// is never handed to the caller.
pub fn read_device_info<R: Read>(reader: &mut R) -> Result<DeviceInfo, ProtocolError> {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    read_full(reader, &mut buf)?;
    let info = parse_device_info(&buf);
    debug!(name = %info.name, size = %info.frame_size, "read device info");
    Ok(info)
}

/// Parse a complete handshake record.
pub fn parse_device_info(buf: &[u8; HANDSHAKE_SIZE]) -> DeviceInfo {
    // the last byte of the name field is always treated as NUL, in case the
    // device sends garbage
    let name_field = &buf[..DEVICE_NAME_FIELD_LENGTH - 1];
    let name_end = name_field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(name_field.len());
    let name = String::from_utf8_lossy(&name_field[..name_end]).into_owned();

    let dims = &buf[DEVICE_NAME_FIELD_LENGTH..];
    let width = u16::from_be_bytes([dims[0], dims[1]]);
    let height = u16::from_be_bytes([dims[2], dims[3]]);

    DeviceInfo {
        name,
        frame_size: Size::new(width, height),
    }
}

/// Encode a handshake record. Only loopback fakes of the device need this.
pub fn encode_device_info(info: &DeviceInfo) -> [u8; HANDSHAKE_SIZE] {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    let name = crate::wire::truncate_utf8(&info.name, DEVICE_NAME_FIELD_LENGTH - 1);
    buf[..name.len()].copy_from_slice(name.as_bytes());
    buf[DEVICE_NAME_FIELD_LENGTH..DEVICE_NAME_FIELD_LENGTH + 2]
        .copy_from_slice(&info.frame_size.width.to_be_bytes());
    buf[DEVICE_NAME_FIELD_LENGTH + 2..].copy_from_slice(&info.frame_size.height.to_be_bytes());
    buf
}

/// Fill `buf` completely, reporting how much arrived on a short read.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(ProtocolError::ShortRead {
                    expected: buf.len(),
                    got: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
