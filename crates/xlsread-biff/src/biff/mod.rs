//! BIFF record parsing: the record stream, per-record payload decoding, and
//! the sheet content decoder.
//!
//! The entry point is [`sheet::decode_sheet`], which consumes the record
//! stream from a sheet's BOF record through its matching EOF and produces a
//! [`sheet::DecodedSheet`]. Decoding is strictly sequential: one mutable
//! cursor, records in file order.

pub mod cells;
pub mod objects;
pub mod ranges;
pub mod records;
pub mod rows;
pub mod shared;
pub mod sheet;
pub(crate) mod strings;

use thiserror::Error;

/// BOF version numbers stored in the BOF record payload.
const BOF_VERSION_BIFF7: u16 = 0x0500;
const BOF_VERSION_BIFF8: u16 = 0x0600;
/// BOF substream-type value for a worksheet, used as a fallback heuristic
/// when the version field is zero.
const BOF_DT_WORKSHEET: u16 = 0x0010;

/// Stream format version. "Biff7" covers the BIFF5/BIFF7 layouts, which are
/// identical for every record this crate decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiffVersion {
    Biff7,
    Biff8,
}

impl BiffVersion {
    pub fn is_biff8(self) -> bool {
        matches!(self, BiffVersion::Biff8)
    }
}

/// Decide the stream version from a BOF record payload.
///
/// Anything other than the BIFF5/7/8 versions is a fatal
/// [`SheetDecodeError::UnsupportedVersion`].
pub fn detect_version(bof_payload: &[u8]) -> Result<BiffVersion, SheetDecodeError> {
    let version = bof_payload
        .get(..2)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .ok_or_else(|| SheetDecodeError::Truncated("BOF record too short".to_string()))?;
    let dt = bof_payload
        .get(2..4)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .unwrap_or(0);

    match version {
        BOF_VERSION_BIFF7 => Ok(BiffVersion::Biff7),
        BOF_VERSION_BIFF8 => Ok(BiffVersion::Biff8),
        // Some BIFF5 writers store zero; accept it when the substream type
        // says "worksheet".
        0 if dt == BOF_DT_WORKSHEET => {
            log::warn!("BOF version field is zero; assuming BIFF7 from substream type");
            Ok(BiffVersion::Biff7)
        }
        other => Err(SheetDecodeError::UnsupportedVersion(other)),
    }
}

/// A sheet-fatal decode error.
///
/// Malformed individual records degrade to warnings; these conditions are
/// structural and abort the current sheet's decode.
#[derive(Debug, Error)]
pub enum SheetDecodeError {
    #[error("substream nesting imbalance: {0}")]
    UnbalancedSubstream(String),
    #[error("object record sequence violation: {0}")]
    ObjectGrammar(String),
    #[error("unsupported stream version 0x{0:04X}")]
    UnsupportedVersion(u16),
    #[error("stream is encrypted (FILEPASS present)")]
    EncryptedStream,
    #[error("no STRING record follows string formula at {0}")]
    MissingStringRecord(String),
    #[error("malformed record: {0}")]
    Record(String),
    #[error("truncated stream: {0}")]
    Truncated(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_biff8() {
        let payload = [BOF_VERSION_BIFF8.to_le_bytes(), 0x0010u16.to_le_bytes()].concat();
        assert_eq!(detect_version(&payload).unwrap(), BiffVersion::Biff8);
    }

    #[test]
    fn detects_biff7() {
        let payload = [BOF_VERSION_BIFF7.to_le_bytes(), 0x0010u16.to_le_bytes()].concat();
        assert_eq!(detect_version(&payload).unwrap(), BiffVersion::Biff7);
    }

    #[test]
    fn zero_version_worksheet_heuristic() {
        let payload = [0u16.to_le_bytes(), BOF_DT_WORKSHEET.to_le_bytes()].concat();
        assert_eq!(detect_version(&payload).unwrap(), BiffVersion::Biff7);
    }

    #[test]
    fn unsupported_version_is_fatal() {
        let payload = [0x0400u16.to_le_bytes(), 0x0010u16.to_le_bytes()].concat();
        assert!(matches!(
            detect_version(&payload),
            Err(SheetDecodeError::UnsupportedVersion(0x0400))
        ));
    }
}
