//! Shared builders for synthetic record streams.
#![allow(dead_code)]

use xlsread_model::{FormatClassifier, SharedStrings};
use xlsread_biff::{decode_sheet, DecodeOptions, DecodedSheet, RecordStream, SheetDecodeContext};
use xlsread_biff::{BiffVersion, SheetDecodeError};

pub const RECORD_BOF: u16 = 0x0809;
pub const RECORD_EOF: u16 = 0x000A;
pub const RECORD_CONTINUE: u16 = 0x003C;
pub const RECORD_NUMBER: u16 = 0x0203;
pub const RECORD_FORMULA: u16 = 0x0006;
pub const RECORD_SHAREDFORMULA: u16 = 0x04BC;
pub const RECORD_STRING: u16 = 0x0207;
pub const RECORD_MULRK: u16 = 0x00BD;
pub const RECORD_LABELSST: u16 = 0x00FD;
pub const RECORD_MSODRAWING: u16 = 0x00EC;
pub const RECORD_OBJ: u16 = 0x005D;
pub const RECORD_TXO: u16 = 0x01B6;
pub const RECORD_NOTE: u16 = 0x001C;
pub const RECORD_PLS: u16 = 0x004D;

pub fn record(id: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn bof_worksheet() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&0x0600u16.to_le_bytes());
    payload.extend_from_slice(&0x0010u16.to_le_bytes());
    payload.extend_from_slice(&[0u8; 12]);
    record(RECORD_BOF, &payload)
}

pub fn eof() -> Vec<u8> {
    record(RECORD_EOF, &[])
}

pub fn number_record(col: u16, row: u16, xf: u16, value: f64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&row.to_le_bytes());
    payload.extend_from_slice(&col.to_le_bytes());
    payload.extend_from_slice(&xf.to_le_bytes());
    payload.extend_from_slice(&value.to_le_bytes());
    record(RECORD_NUMBER, &payload)
}

/// A BIFF8 FORMULA record with the given cached-result bytes and flags.
pub fn formula_record(
    col: u16,
    row: u16,
    xf: u16,
    result: [u8; 8],
    flags: u16,
    rgce: &[u8],
) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&row.to_le_bytes());
    payload.extend_from_slice(&col.to_le_bytes());
    payload.extend_from_slice(&xf.to_le_bytes());
    payload.extend_from_slice(&result);
    payload.extend_from_slice(&flags.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes()); // calc chain
    payload.extend_from_slice(&(rgce.len() as u16).to_le_bytes());
    payload.extend_from_slice(rgce);
    record(RECORD_FORMULA, &payload)
}

pub fn string_result() -> [u8; 8] {
    let mut result = [0u8; 8];
    result[6] = 0xFF;
    result[7] = 0xFF;
    result
}

pub fn string_record(text: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(text.len() as u16).to_le_bytes());
    payload.push(0); // compressed
    payload.extend_from_slice(text.as_bytes());
    record(RECORD_STRING, &payload)
}

/// SHAREDFORMULA covering `(first_col,first_row)..=(last_col,last_row)`.
pub fn shared_formula_record(
    first_col: u8,
    first_row: u16,
    last_col: u8,
    last_row: u16,
    rgce: &[u8],
) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&first_row.to_le_bytes());
    payload.extend_from_slice(&last_row.to_le_bytes());
    payload.push(first_col);
    payload.push(last_col);
    payload.extend_from_slice(&0u16.to_le_bytes()); // cUse
    payload.extend_from_slice(&(rgce.len() as u16).to_le_bytes());
    payload.extend_from_slice(rgce);
    record(RECORD_SHAREDFORMULA, &payload)
}

/// Relative single-cell reference token (`PtgRef`, reference class).
pub fn ptg_ref(col: u16, row: u16) -> Vec<u8> {
    let mut out = vec![0x24];
    out.extend_from_slice(&row.to_le_bytes());
    out.extend_from_slice(&(col | 0xC000).to_le_bytes());
    out
}

pub fn ptg_int(value: u16) -> Vec<u8> {
    let mut out = vec![0x1E];
    out.extend_from_slice(&value.to_le_bytes());
    out
}

/// `A1+1` with the reference fully relative.
pub fn rgce_ref_plus_one(col: u16, row: u16) -> Vec<u8> {
    let mut out = ptg_ref(col, row);
    out.extend_from_slice(&ptg_int(1));
    out.push(0x03);
    out
}

pub struct DateXfs(pub Vec<u16>);

impl FormatClassifier for DateXfs {
    fn is_date_format(&self, xf: u16) -> bool {
        self.0.contains(&xf)
    }
}

pub struct Sst(pub Vec<String>);

impl SharedStrings for Sst {
    fn shared_string(&self, index: u32) -> Option<&str> {
        self.0.get(index as usize).map(String::as_str)
    }
}

pub fn decode(stream_bytes: &[u8]) -> Result<DecodedSheet, SheetDecodeError> {
    decode_with(stream_bytes, &DateXfs(Vec::new()), &Sst(Vec::new()))
}

pub fn decode_with(
    stream_bytes: &[u8],
    formats: &dyn FormatClassifier,
    shared_strings: &dyn SharedStrings,
) -> Result<DecodedSheet, SheetDecodeError> {
    let mut stream = RecordStream::new(stream_bytes);
    let ctx = SheetDecodeContext {
        version: BiffVersion::Biff8,
        codepage: 1252,
        formats,
        shared_strings,
        options: DecodeOptions::default(),
    };
    decode_sheet(&mut stream, &ctx)
}
