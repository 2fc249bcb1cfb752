//! Multi-record object sequences.
//!
//! Cell comments, buttons, check boxes and combo boxes are stored as a
//! fixed record grammar: one drawing-anchor record (MSODRAWING), one
//! object-descriptor record (OBJ), an optional text-object record (TXO),
//! then zero or more CONTINUE records carrying the text and its formatting
//! runs. The grammar is enforced strictly — a violation is a fatal decode
//! error for the sheet, not a warning — while a *missing* drawing record
//! can be reconstructed from a stray CONTINUE record (a known writer
//! quirk), which is only a logged anomaly.

use super::records::{RawRecord, RecordKind, RecordStream};
use super::strings;
use super::{BiffVersion, SheetDecodeError};

/// Object types carried in the OBJ descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Chart,
    Text,
    Button,
    Picture,
    CheckBox,
    ComboBox,
    Comment,
    Other(u16),
}

impl ObjectKind {
    fn from_code(code: u16) -> ObjectKind {
        match code {
            0x05 => ObjectKind::Chart,
            0x06 => ObjectKind::Text,
            0x07 => ObjectKind::Button,
            0x08 => ObjectKind::Picture,
            0x0B => ObjectKind::CheckBox,
            0x14 => ObjectKind::ComboBox,
            0x19 => ObjectKind::Comment,
            other => ObjectKind::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjHeader {
    pub kind: ObjectKind,
    pub object_id: u16,
}

pub fn parse_obj(data: &[u8]) -> Result<ObjHeader, String> {
    let code = data
        .get(4..6)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .ok_or("OBJ record too short")?;
    let object_id = data
        .get(6..8)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .ok_or("OBJ record too short")?;
    Ok(ObjHeader {
        kind: ObjectKind::from_code(code),
        object_id,
    })
}

/// A finished sheet object, associated with its owning cell via the NOTE
/// record (comments) or carried in the sheet's object list (controls).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetObject {
    pub kind: ObjectKind,
    pub object_id: u16,
    pub text: Option<String>,
}

/// A NOTE record. BIFF8 notes reference a comment object by id; BIFF7
/// notes carry the text inline (continued into CONTINUE records when
/// longer than one record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRecord {
    pub row: u16,
    pub col: u16,
    pub object_id: Option<u16>,
    pub inline_text: Option<String>,
}

pub fn parse_note(
    record: &RawRecord<'_>,
    version: BiffVersion,
    codepage: u16,
) -> Result<NoteRecord, String> {
    let data = record.payload();
    let row = data
        .get(..2)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .ok_or("NOTE record too short")?;
    let col = data
        .get(2..4)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .ok_or("NOTE record too short")?;

    match version {
        BiffVersion::Biff8 => {
            let object_id = data
                .get(6..8)
                .map(|v| u16::from_le_bytes([v[0], v[1]]))
                .ok_or("NOTE record too short")?;
            Ok(NoteRecord {
                row,
                col,
                object_id: Some(object_id),
                inline_text: None,
            })
        }
        BiffVersion::Biff7 => {
            let cch = data
                .get(4..6)
                .map(|v| u16::from_le_bytes([v[0], v[1]]) as usize)
                .ok_or("NOTE record too short")?;
            let bytes = data.get(6..).unwrap_or_default();
            let take = cch.min(bytes.len());
            Ok(NoteRecord {
                row,
                col,
                object_id: None,
                inline_text: Some(strings::decode_ansi(codepage, &bytes[..take])),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxoHeader {
    pub text_len: u16,
    pub formatting_len: u16,
}

pub fn parse_txo(data: &[u8]) -> Result<TxoHeader, String> {
    let text_len = data
        .get(10..12)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .ok_or("TXO record too short")?;
    let formatting_len = data
        .get(12..14)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .ok_or("TXO record too short")?;
    Ok(TxoHeader {
        text_len,
        formatting_len,
    })
}

/// Consume the TXO tail of an object sequence from the stream: an optional
/// extra drawing record, the TXO itself, the text CONTINUE and an optional
/// formatting CONTINUE. Returns the decoded text.
///
/// Record-order violations are fatal ([`SheetDecodeError::ObjectGrammar`]).
pub fn read_object_text(
    stream: &mut RecordStream<'_>,
    codepage: u16,
) -> Result<Option<String>, SheetDecodeError> {
    let mut record = next_grammar_record(stream, "text object")?;

    // Some writers emit a rogue drawing (or CONTINUE) record between OBJ
    // and TXO; skip a single one.
    if matches!(record.kind(), RecordKind::MsoDrawing | RecordKind::Continue) {
        record = next_grammar_record(stream, "text object")?;
    }

    if record.kind() != RecordKind::Txo {
        return Err(SheetDecodeError::ObjectGrammar(format!(
            "expected TXO record at offset {}, found 0x{:04X}",
            record.offset(),
            record.opcode()
        )));
    }
    let txo = parse_txo(record.payload()).map_err(SheetDecodeError::Record)?;
    if txo.text_len == 0 {
        return Ok(None);
    }

    let text_record = next_grammar_record(stream, "object text")?;
    if text_record.kind() != RecordKind::Continue {
        return Err(SheetDecodeError::ObjectGrammar(format!(
            "expected text continuation at offset {}, found 0x{:04X}",
            text_record.offset(),
            text_record.opcode()
        )));
    }
    let fragments: Vec<&[u8]> = text_record.fragments().collect();
    let text = strings::read_txo_text(&fragments, usize::from(txo.text_len), codepage)
        .map_err(SheetDecodeError::Record)?;

    // Formatting runs, when present, ride in one more CONTINUE record.
    if stream.peek_kind() == Some(RecordKind::Continue) {
        stream.next_record().map_err(SheetDecodeError::Record)?;
    }

    Ok(Some(text))
}

fn next_grammar_record<'a>(
    stream: &mut RecordStream<'a>,
    expected: &str,
) -> Result<RawRecord<'a>, SheetDecodeError> {
    if !stream.has_next() {
        return Err(SheetDecodeError::ObjectGrammar(format!(
            "stream ended while reading {expected} records"
        )));
    }
    stream.next_record().map_err(SheetDecodeError::Record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + payload.len());
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn obj_payload(kind: u16, id: u16) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&0x0015u16.to_le_bytes()); // ftCmo
        data.extend_from_slice(&18u16.to_le_bytes());
        data.extend_from_slice(&kind.to_le_bytes());
        data.extend_from_slice(&id.to_le_bytes());
        data.extend_from_slice(&[0u8; 14]);
        data
    }

    fn txo_payload(text_len: u16) -> Vec<u8> {
        let mut data = vec![0u8; 10];
        data.extend_from_slice(&text_len.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&[0u8; 4]);
        data
    }

    #[test]
    fn parses_obj_header() {
        let header = parse_obj(&obj_payload(0x19, 42)).unwrap();
        assert_eq!(header.kind, ObjectKind::Comment);
        assert_eq!(header.object_id, 42);
    }

    #[test]
    fn reads_object_text_sequence() {
        let mut text = vec![0u8]; // option flags (compressed)
        text.extend_from_slice(b"hello");
        let stream = [
            record(0x01B6, &txo_payload(5)),
            record(0x003C, &text),
            record(0x003C, &[0u8; 8]), // formatting runs
            record(0x0203, &[0u8; 14]),
        ]
        .concat();

        let mut rs = RecordStream::new(&stream);
        let out = read_object_text(&mut rs, 1252).unwrap();
        assert_eq!(out.as_deref(), Some("hello"));
        // Both CONTINUE records were consumed; the NUMBER record is next.
        assert_eq!(rs.peek_kind(), Some(RecordKind::Number));
    }

    #[test]
    fn skips_rogue_drawing_record_before_txo() {
        let mut text = vec![0u8];
        text.extend_from_slice(b"x");
        let stream = [
            record(0x00EC, &[0u8; 4]), // rogue MSODRAWING
            record(0x01B6, &txo_payload(1)),
            record(0x003C, &text),
        ]
        .concat();

        let mut rs = RecordStream::new(&stream);
        assert_eq!(read_object_text(&mut rs, 1252).unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn empty_text_object_reads_no_continue() {
        let stream = record(0x01B6, &txo_payload(0));
        let mut rs = RecordStream::new(&stream);
        assert_eq!(read_object_text(&mut rs, 1252).unwrap(), None);
    }

    #[test]
    fn wrong_record_order_is_a_grammar_error() {
        let stream = record(0x0203, &[0u8; 14]);
        let mut rs = RecordStream::new(&stream);
        assert!(matches!(
            read_object_text(&mut rs, 1252),
            Err(SheetDecodeError::ObjectGrammar(_))
        ));
    }

    #[test]
    fn missing_text_continuation_is_a_grammar_error() {
        let stream = [record(0x01B6, &txo_payload(4)), record(0x0203, &[0u8; 14])].concat();
        let mut rs = RecordStream::new(&stream);
        assert!(matches!(
            read_object_text(&mut rs, 1252),
            Err(SheetDecodeError::ObjectGrammar(_))
        ));
    }

    #[test]
    fn parses_biff8_note_reference() {
        let stream = record(0x001C, &[2, 0, 3, 0, 0, 0, 7, 0]);
        let mut rs = RecordStream::new(&stream);
        let rec = rs.next_record().unwrap();
        let note = parse_note(&rec, BiffVersion::Biff8, 1252).unwrap();
        assert_eq!((note.row, note.col), (2, 3));
        assert_eq!(note.object_id, Some(7));
        assert_eq!(note.inline_text, None);
    }

    #[test]
    fn parses_biff7_inline_note() {
        let mut payload = vec![1, 0, 0, 0];
        payload.extend_from_slice(&4u16.to_le_bytes());
        payload.extend_from_slice(b"memo");
        let stream = record(0x001C, &payload);
        let mut rs = RecordStream::new(&stream);
        let rec = rs.next_record().unwrap();
        let note = parse_note(&rec, BiffVersion::Biff7, 1252).unwrap();
        assert_eq!(note.inline_text.as_deref(), Some("memo"));
    }
}
