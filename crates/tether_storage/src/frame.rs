//! Journal framing.
//!
//! Every record is stored as one frame:
//!
//! ```text
//! magic "TQ" (2) | payload length u32 LE (4) | crc32 of payload u32 LE (4) | payload
//! ```
//!
//! A damaged frame followed by a valid one is skipped: the scan resumes at
//! the next offset holding a frame with a matching checksum. Damage with no
//! valid frame after it is the damaged tail.

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 2] = *b"TQ";

/// Frame header size: magic (2) + length (4) + crc (4).
pub const FRAME_HEADER_SIZE: usize = 10;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Offset of the frame header in the journal.
    pub offset: u64,
    /// Frame payload.
    pub payload: Vec<u8>,
}

/// Why a scan stopped before the end of the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDamage {
    /// The journal ends inside a frame (crash mid-append).
    Truncated {
        /// Offset of the incomplete frame.
        offset: u64,
    },
    /// The bytes at `offset` are not a frame header.
    BadMagic {
        /// Offset of the bad header.
        offset: u64,
    },
    /// The payload does not match its checksum.
    ChecksumMismatch {
        /// Offset of the bad frame.
        offset: u64,
    },
}

impl FrameDamage {
    /// Offset where the damage starts.
    pub fn offset(&self) -> u64 {
        match *self {
            FrameDamage::Truncated { offset }
            | FrameDamage::BadMagic { offset }
            | FrameDamage::ChecksumMismatch { offset } => offset,
        }
    }
}

/// A damaged region inside the journal, skipped because valid frames
/// follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedRegion {
    /// Damage found at the start of the region.
    pub damage: FrameDamage,
    /// Bytes skipped.
    pub len: u64,
}

/// Result of scanning a journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameScan {
    /// Valid frames in journal order.
    pub frames: Vec<Frame>,
    /// End of the last valid frame.
    pub valid_len: u64,
    /// Damaged regions skipped between valid frames.
    pub skipped: Vec<SkippedRegion>,
    /// Damage of the tail after the last valid frame, if any.
    pub damage: Option<FrameDamage>,
}

impl FrameScan {
    /// Bytes lost to skipped regions.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped.iter().map(|r| r.len).sum()
    }
}

/// Wraps a payload in a frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&compute_crc32(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Scans a journal into frames.
pub fn scan_frames(bytes: &[u8]) -> FrameScan {
    let mut scan = FrameScan::default();
    let mut pos = 0usize;

    while pos < bytes.len() {
        match read_frame(bytes, pos) {
            Ok(payload) => {
                let len = payload.len();
                scan.frames.push(Frame {
                    offset: pos as u64,
                    payload: payload.to_vec(),
                });
                pos += FRAME_HEADER_SIZE + len;
                scan.valid_len = pos as u64;
            }
            Err(damage) => match resync(bytes, pos + 1) {
                Some(next) => {
                    scan.skipped.push(SkippedRegion {
                        damage,
                        len: (next - pos) as u64,
                    });
                    pos = next;
                }
                None => {
                    scan.damage = Some(damage);
                    break;
                }
            },
        }
    }

    scan
}

fn read_frame(bytes: &[u8], pos: usize) -> Result<&[u8], FrameDamage> {
    let offset = pos as u64;
    let remaining = &bytes[pos..];

    if remaining.len() < FRAME_HEADER_SIZE {
        return Err(FrameDamage::Truncated { offset });
    }
    if remaining[0..2] != FRAME_MAGIC {
        return Err(FrameDamage::BadMagic { offset });
    }

    let len =
        u32::from_le_bytes([remaining[2], remaining[3], remaining[4], remaining[5]]) as usize;
    let crc = u32::from_le_bytes([remaining[6], remaining[7], remaining[8], remaining[9]]);

    let payload = FRAME_HEADER_SIZE
        .checked_add(len)
        .and_then(|end| remaining.get(FRAME_HEADER_SIZE..end))
        .ok_or(FrameDamage::Truncated { offset })?;
    if compute_crc32(payload) != crc {
        return Err(FrameDamage::ChecksumMismatch { offset });
    }
    Ok(payload)
}

/// First offset at or after `from` that holds a complete, valid frame.
fn resync(bytes: &[u8], from: usize) -> Option<usize> {
    (from..bytes.len())
        .find(|&pos| bytes[pos..].starts_with(&FRAME_MAGIC) && read_frame(bytes, pos).is_ok())
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
