use crate::conversions::read_u32_le;
use crate::error::{ProbeError, Result};

const SID_HEADER_LEN: usize = 8;

/// Render a binary SID in `S-R-A-S1-S2...` form.
pub fn format_sid(bytes: &[u8]) -> Result<String> {
    if bytes.len() < SID_HEADER_LEN {
        return Err(ProbeError::Malformed(format!(
            "SID of {} bytes is shorter than its header",
            bytes.len()
        )));
    }

    let revision = bytes[0];
    let count = bytes[1] as usize;
    let needed = SID_HEADER_LEN + count * 4;
    if bytes.len() < needed {
        return Err(ProbeError::Malformed(format!(
            "SID declares {} sub-authorities but has {} bytes",
            count,
            bytes.len()
        )));
    }

    // Identifier authority is a 48-bit big-endian value.
    let authority = bytes[2..8]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);

    let mut out = if authority >= 1 << 32 {
        format!("S-{}-0x{:012X}", revision, authority)
    } else {
        format!("S-{}-{}", revision, authority)
    };

    for i in 0..count {
        if let Some(sub) = read_u32_le(bytes, SID_HEADER_LEN + i * 4) {
            out.push_str(&format!("-{}", sub));
        }
    }

    Ok(out)
}
