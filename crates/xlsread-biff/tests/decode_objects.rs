mod common;

use common::*;
use pretty_assertions::assert_eq;
use xlsread_model::CellCoord;
use xlsread_biff::SheetDecodeError;

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

fn txo_text(text: &str) -> Vec<u8> {
    let mut out = vec![0u8]; // option flags: compressed
    out.extend_from_slice(text.as_bytes());
    out
}

fn note_payload(col: u16, row: u16, object_id: u16) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&row.to_le_bytes());
    data.extend_from_slice(&col.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(&object_id.to_le_bytes());
    data
}

#[test]
fn comment_sequence_attaches_to_its_cell() {
    let stream = [
        bof_worksheet(),
        record(RECORD_MSODRAWING, &[0u8; 8]),
        record(RECORD_OBJ, &obj_payload(0x19, 1)),
        record(RECORD_TXO, &txo_payload(4)),
        record(RECORD_CONTINUE, &txo_text("memo")),
        record(RECORD_CONTINUE, &[0u8; 8]), // formatting runs
        record(RECORD_NOTE, &note_payload(2, 3, 1)),
        eof(),
    ]
    .concat();
    let sheet = decode(&stream).unwrap();

    let cell = sheet.cells.get(&CellCoord::new(2, 3)).unwrap();
    assert_eq!(cell.comment.as_deref(), Some("memo"));
    assert!(sheet.warnings.is_empty());
}

#[test]
fn dangling_comment_without_note_warns() {
    let stream = [
        bof_worksheet(),
        record(RECORD_MSODRAWING, &[0u8; 8]),
        record(RECORD_OBJ, &obj_payload(0x19, 1)),
        record(RECORD_TXO, &txo_payload(1)),
        record(RECORD_CONTINUE, &txo_text("x")),
        eof(),
    ]
    .concat();
    let sheet = decode(&stream).unwrap();
    assert!(sheet
        .warnings
        .iter()
        .any(|w| w.contains("corresponding NOTE record")));
}

#[test]
fn note_without_comment_warns_and_leaves_cell_alone() {
    let stream = [
        bof_worksheet(),
        record(RECORD_NOTE, &note_payload(0, 0, 9)),
        eof(),
    ]
    .concat();
    let sheet = decode(&stream).unwrap();
    assert!(sheet.cells.is_empty());
    assert!(sheet
        .warnings
        .iter()
        .any(|w| w.contains("cannot find comment for note id 9")));
}

#[test]
fn object_grammar_violation_is_fatal() {
    // OBJ announces a comment but a NUMBER record follows instead of TXO.
    let stream = [
        bof_worksheet(),
        record(RECORD_MSODRAWING, &[0u8; 8]),
        record(RECORD_OBJ, &obj_payload(0x19, 1)),
        number_record(0, 0, 0, 1.0),
        eof(),
    ]
    .concat();
    assert!(matches!(
        decode(&stream),
        Err(SheetDecodeError::ObjectGrammar(_))
    ));
}

#[test]
fn missing_drawing_record_recovers_from_stray_continue() {
    let stream = [
        bof_worksheet(),
        record(RECORD_CONTINUE, &[0u8; 8]), // stray: stands in for the drawing
        record(RECORD_OBJ, &obj_payload(0x0B, 2)), // check box
        record(RECORD_TXO, &txo_payload(2)),
        record(RECORD_CONTINUE, &txo_text("ok")),
        eof(),
    ]
    .concat();
    let sheet = decode(&stream).unwrap();

    assert_eq!(sheet.objects.len(), 1);
    assert_eq!(sheet.objects[0].object_id, 2);
    assert_eq!(sheet.objects[0].text.as_deref(), Some("ok"));
    assert!(sheet
        .warnings
        .iter()
        .any(|w| w.contains("using continue record")));
}

#[test]
fn object_without_any_drawing_record_is_dropped() {
    let stream = [
        bof_worksheet(),
        record(RECORD_OBJ, &obj_payload(0x07, 3)),
        eof(),
    ]
    .concat();
    let sheet = decode(&stream).unwrap();
    assert!(sheet.objects.is_empty());
    assert!(sheet
        .warnings
        .iter()
        .any(|w| w.contains("not associated with a drawing record")));
}

#[test]
fn button_with_empty_text_object_is_kept() {
    let stream = [
        bof_worksheet(),
        record(RECORD_MSODRAWING, &[0u8; 8]),
        record(RECORD_OBJ, &obj_payload(0x07, 4)),
        record(RECORD_TXO, &txo_payload(0)),
        eof(),
    ]
    .concat();
    let sheet = decode(&stream).unwrap();
    assert_eq!(sheet.objects.len(), 1);
    assert_eq!(sheet.objects[0].text, None);
}
