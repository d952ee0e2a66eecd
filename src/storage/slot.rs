//! On-disk layout of the header container.
//!
//! ```text
//! File:  [Magic "TWHC"(4)] [Version(2)] [Reserved(2)] [SlotSize(4)] [Slot]*
//! Slot:  [Active(1)] [Pad(1)] [Type(2)] [Size(2)] [Header record, zero padded]
//! ```
//!
//! All fields are big-endian. Every slot has the same size, large enough for
//! the largest header kind, so a header can always be overwritten in place.

use bytes::{BufMut, BytesMut};

use crate::core::record::{RecordType, MAX_HEADER_LEN};
use crate::core::wire::WireReader;
use crate::error::{constants, ProtocolError, Result};

pub const MAGIC: [u8; 4] = *b"TWHC";

/// Bumped whenever the slot or header layout changes.
pub const FORMAT_VERSION: u16 = 1;

pub const FILE_HEADER_LEN: usize = 12;
pub const SLOT_CONTROL_LEN: usize = 6;
pub const SLOT_PAYLOAD: usize = MAX_HEADER_LEN;
pub const SLOT_LEN: usize = SLOT_CONTROL_LEN + SLOT_PAYLOAD;

const ACTIVE: i8 = 1;
const TOMBSTONE: i8 = 0;

/// Byte offset of slot `index` from the start of the file.
pub fn slot_offset(index: u64) -> u64 {
    FILE_HEADER_LEN as u64 + index * SLOT_LEN as u64
}

pub fn encode_file_header() -> [u8; FILE_HEADER_LEN] {
    let mut buf = BytesMut::with_capacity(FILE_HEADER_LEN);
    buf.put_slice(&MAGIC);
    buf.put_u16(FORMAT_VERSION);
    buf.put_u16(0);
    buf.put_u32(SLOT_LEN as u32);
    let mut out = [0u8; FILE_HEADER_LEN];
    out.copy_from_slice(&buf);
    out
}

/// Check the marker at the start of an existing file.
pub fn check_file_header(buf: &[u8]) -> Result<()> {
    let mut r = WireReader::new(buf);
    if r.take(4)? != MAGIC {
        return Err(ProtocolError::StorageError(constants::ERR_BAD_MAGIC.into()));
    }
    let version = r.u16()?;
    if version != FORMAT_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let _reserved = r.u16()?;
    if r.u32()? as usize != SLOT_LEN {
        return Err(ProtocolError::StorageError(constants::ERR_BAD_SLOT_SIZE.into()));
    }
    Ok(())
}

/// Control structure at the front of each slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotControl {
    pub active: bool,
    pub record_type: u16,
    pub size: u16,
}

impl SlotControl {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let active = r.i8()? == ACTIVE;
        let _pad = r.i8()?;
        let record_type = r.i16()? as u16;
        let size = r.i16()? as u16;
        Ok(Self {
            active,
            record_type,
            size,
        })
    }

    /// Validate an active slot before its payload is decoded.
    pub fn check(&self) -> Result<()> {
        let is_header = RecordType::from_u16(self.record_type)
            .map(RecordType::is_header)
            .unwrap_or(false);
        if !is_header {
            return Err(ProtocolError::StorageError(constants::ERR_NOT_A_HEADER.into()));
        }
        if self.size as usize > SLOT_PAYLOAD {
            return Err(ProtocolError::StorageError(constants::ERR_RECORD_TOO_LARGE.into()));
        }
        Ok(())
    }
}

/// Lay out a full active slot around an encoded header.
pub fn encode_slot(record_type: RecordType, record: &[u8]) -> Result<BytesMut> {
    if record.len() > SLOT_PAYLOAD {
        return Err(ProtocolError::StorageError(constants::ERR_RECORD_TOO_LARGE.into()));
    }
    let mut buf = BytesMut::with_capacity(SLOT_LEN);
    buf.put_i8(ACTIVE);
    buf.put_i8(0);
    buf.put_i16(record_type.as_u16() as i16);
    buf.put_i16(record.len() as i16);
    buf.put_slice(record);
    buf.resize(SLOT_LEN, 0);
    Ok(buf)
}

/// The single byte written over `active` to tombstone a slot.
pub const fn tombstone_marker() -> [u8; 1] {
    [TOMBSTONE as u8]
}
