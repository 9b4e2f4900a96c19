//! H.264 Annex-B helpers shared by the container writers.
//!
//! The device sends access units as Annex-B byte streams (start-code
//! delimited NAL units). Both containers want length-prefixed NAL units and
//! an `AVCDecoderConfigurationRecord` built from the SPS and PPS.

use crate::error::RecordError;

const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;

/// Split an Annex-B byte stream into NAL unit payloads.
///
/// Data without any start code is returned as a single unit.
pub fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    // (start of the start code, start of the payload)
    let mut marks = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let code = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            marks.push((code, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    if marks.is_empty() {
        return if data.is_empty() { Vec::new() } else { vec![data] };
    }

    marks
        .iter()
        .enumerate()
        .filter_map(|(n, &(_, payload))| {
            let end = marks.get(n + 1).map_or(data.len(), |&(code, _)| code);
            (end > payload).then(|| &data[payload..end])
        })
        .collect()
}

fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map_or(0, |b| b & 0x1F)
}

/// Re-frame an Annex-B access unit with 4-byte big-endian length prefixes.
pub fn to_length_prefixed(data: &[u8]) -> Vec<u8> {
    let units = nal_units(data);
    let mut out = Vec::with_capacity(data.len() + 4 * units.len());
    for nal in units {
        // a single NAL unit is bounded by the packet size limit
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// Whether the access unit contains an IDR slice.
pub fn is_keyframe(data: &[u8]) -> bool {
    nal_units(data).iter().any(|nal| nal_type(nal) == NAL_TYPE_IDR)
}

/// Parameter sets extracted from a codec configuration packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

impl AvcConfig {
    /// Extract the first SPS and PPS from an Annex-B configuration packet.
    pub fn parse(data: &[u8]) -> Result<Self, RecordError> {
        let units = nal_units(data);
        let sps = units
            .iter()
            .find(|nal| nal_type(nal) == NAL_TYPE_SPS)
            .ok_or_else(|| RecordError::InvalidConfig("missing SPS".into()))?;
        let pps = units
            .iter()
            .find(|nal| nal_type(nal) == NAL_TYPE_PPS)
            .ok_or_else(|| RecordError::InvalidConfig("missing PPS".into()))?;
        if sps.len() < 4 {
            return Err(RecordError::InvalidConfig(format!(
                "SPS too short ({} bytes)",
                sps.len()
            )));
        }
        if sps.len() > usize::from(u16::MAX) || pps.len() > usize::from(u16::MAX) {
            return Err(RecordError::InvalidConfig("parameter set too large".into()));
        }
        Ok(Self {
            sps: sps.to_vec(),
            pps: pps.to_vec(),
        })
    }

    /// Serialize as an `AVCDecoderConfigurationRecord` (`avcC`).
    pub fn decoder_record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(11 + self.sps.len() + self.pps.len());
        out.push(1); // configurationVersion
        out.extend_from_slice(&self.sps[1..4]); // profile, compat, level
        out.push(0xFF); // 4-byte NAL lengths
        out.push(0xE1); // one SPS
        // lengths checked in parse
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(self.sps.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.sps);
        out.push(1); // one PPS
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(self.pps.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.pps);
        out
    }
}
