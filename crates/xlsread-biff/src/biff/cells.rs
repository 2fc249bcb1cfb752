//! Payload decoding for the cell-bearing records.
//!
//! Single-cell records share a six-byte header (row, column, XF index).
//! Multi-cell records (MULRK, MULBLANK) cover a run of consecutive columns
//! in one row. Field widths that differ between BIFF7 and BIFF8 are selected
//! by branching on the [`BiffVersion`] parameter.

use super::records::RawRecord;
use super::strings;
use super::BiffVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellHeader {
    pub row: u16,
    pub col: u16,
    pub xf: u16,
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, String> {
    data.get(offset..offset + 2)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .ok_or_else(|| "record payload too short".to_string())
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, String> {
    data.get(offset..offset + 4)
        .map(|v| u32::from_le_bytes([v[0], v[1], v[2], v[3]]))
        .ok_or_else(|| "record payload too short".to_string())
}

fn read_f64(data: &[u8], offset: usize) -> Result<f64, String> {
    let bytes: [u8; 8] = data
        .get(offset..offset + 8)
        .ok_or_else(|| "record payload too short".to_string())?
        .try_into()
        .map_err(|_| "record payload too short".to_string())?;
    Ok(f64::from_le_bytes(bytes))
}

pub fn read_cell_header(data: &[u8]) -> Result<CellHeader, String> {
    Ok(CellHeader {
        row: read_u16(data, 0)?,
        col: read_u16(data, 2)?,
        xf: read_u16(data, 4)?,
    })
}

/// Decode the packed 30-bit RK number encoding.
///
/// Bit 0 selects divide-by-100, bit 1 selects integer-vs-float; a float RK
/// stores the high 34 bits of an IEEE double with the rest zeroed.
pub fn decode_rk(raw: u32) -> f64 {
    let div100 = raw & 0x01 != 0;
    let value = if raw & 0x02 != 0 {
        // Signed 30-bit integer.
        ((raw as i32) >> 2) as f64
    } else {
        f64::from_bits(u64::from(raw & 0xFFFF_FFFC) << 32)
    };
    if div100 {
        value / 100.0
    } else {
        value
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberCell {
    pub header: CellHeader,
    pub value: f64,
}

pub fn parse_number(data: &[u8]) -> Result<NumberCell, String> {
    Ok(NumberCell {
        header: read_cell_header(data)?,
        value: read_f64(data, 6)?,
    })
}

pub fn parse_rk(data: &[u8]) -> Result<NumberCell, String> {
    Ok(NumberCell {
        header: read_cell_header(data)?,
        value: decode_rk(read_u32(data, 6)?),
    })
}

/// A MULRK run: one row, consecutive columns, each with its own XF and RK
/// value.
#[derive(Debug, Clone, PartialEq)]
pub struct MulRkRun {
    pub row: u16,
    pub first_col: u16,
    pub cells: Vec<(u16, f64)>,
}

pub fn parse_mulrk(data: &[u8]) -> Result<MulRkRun, String> {
    let row = read_u16(data, 0)?;
    let first_col = read_u16(data, 2)?;
    if data.len() < 6 {
        return Err("MULRK record too short".to_string());
    }
    let count = (data.len() - 6) / 6;
    let mut cells = Vec::with_capacity(count);
    for i in 0..count {
        let offset = 4 + i * 6;
        let xf = read_u16(data, offset)?;
        let rk = read_u32(data, offset + 2)?;
        cells.push((xf, decode_rk(rk)));
    }
    let last_col = read_u16(data, data.len() - 2)?;
    if usize::from(last_col.saturating_sub(first_col)) + 1 != count {
        log::warn!(
            "MULRK column span {}..={} disagrees with {} packed values",
            first_col,
            last_col,
            count
        );
    }
    Ok(MulRkRun {
        row,
        first_col,
        cells,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct MulBlankRun {
    pub row: u16,
    pub first_col: u16,
    pub xfs: Vec<u16>,
}

pub fn parse_mulblank(data: &[u8]) -> Result<MulBlankRun, String> {
    let row = read_u16(data, 0)?;
    let first_col = read_u16(data, 2)?;
    if data.len() < 6 {
        return Err("MULBLANK record too short".to_string());
    }
    let count = (data.len() - 6) / 2;
    let mut xfs = Vec::with_capacity(count);
    for i in 0..count {
        xfs.push(read_u16(data, 4 + i * 2)?);
    }
    Ok(MulBlankRun {
        row,
        first_col,
        xfs,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolErrValue {
    Bool(bool),
    Error(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoolErrCell {
    pub header: CellHeader,
    pub value: BoolErrValue,
}

pub fn parse_boolerr(data: &[u8]) -> Result<BoolErrCell, String> {
    let header = read_cell_header(data)?;
    let value = *data.get(6).ok_or("BOOLERR record too short")?;
    let is_error = *data.get(7).ok_or("BOOLERR record too short")?;
    Ok(BoolErrCell {
        header,
        value: if is_error != 0 {
            BoolErrValue::Error(value)
        } else {
            BoolErrValue::Bool(value != 0)
        },
    })
}

pub fn parse_blank(data: &[u8]) -> Result<CellHeader, String> {
    read_cell_header(data)
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelCell {
    pub header: CellHeader,
    pub text: String,
}

pub fn parse_label(
    data: &[u8],
    version: BiffVersion,
    codepage: u16,
) -> Result<LabelCell, String> {
    let header = read_cell_header(data)?;
    let rest = data.get(6..).ok_or("LABEL record too short")?;
    let (text, _) = match version {
        BiffVersion::Biff8 => strings::read_unicode_string(rest, codepage)?,
        BiffVersion::Biff7 => strings::read_byte_string16(rest, codepage)?,
    };
    Ok(LabelCell { header, text })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelSstCell {
    pub header: CellHeader,
    pub sst_index: u32,
}

pub fn parse_labelsst(data: &[u8]) -> Result<LabelSstCell, String> {
    Ok(LabelSstCell {
        header: read_cell_header(data)?,
        sst_index: read_u32(data, 6)?,
    })
}

/// The cached result field of a FORMULA record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CachedResult {
    Number(f64),
    /// A STRING record carrying the text follows the formula record.
    Text,
    Bool(bool),
    Error(u8),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormulaRecord {
    pub header: CellHeader,
    pub result: [u8; 8],
    pub flags: u16,
    pub rgce: Vec<u8>,
}

const FORMULA_FLAG_SHARED: u16 = 0x0008;

impl FormulaRecord {
    /// The record declares itself part of a shared-formula group.
    pub fn is_shared(&self) -> bool {
        self.flags & FORMULA_FLAG_SHARED != 0
    }

    pub fn cached_result(&self) -> CachedResult {
        // A non-numeric result is tagged with 0xFFFF in the exponent bytes;
        // the first byte then discriminates the kind.
        if self.result[6] == 0xFF && self.result[7] == 0xFF {
            match self.result[0] {
                0 => CachedResult::Text,
                1 => CachedResult::Bool(self.result[2] != 0),
                2 => CachedResult::Error(self.result[2]),
                _ => CachedResult::Empty,
            }
        } else {
            CachedResult::Number(f64::from_le_bytes(self.result))
        }
    }
}

pub fn parse_formula(data: &[u8], version: BiffVersion) -> Result<FormulaRecord, String> {
    let header = read_cell_header(data)?;
    let result: [u8; 8] = data
        .get(6..14)
        .ok_or("FORMULA record too short")?
        .try_into()
        .map_err(|_| "FORMULA record too short".to_string())?;
    let flags = read_u16(data, 14)?;

    // BIFF8 inserts a 4-byte calc-chain field before the token length.
    let cce_offset = match version {
        BiffVersion::Biff8 => 20,
        BiffVersion::Biff7 => 16,
    };
    let cce = read_u16(data, cce_offset)? as usize;
    let rgce_start = cce_offset + 2;
    let rgce = data
        .get(rgce_start..rgce_start + cce)
        .ok_or("FORMULA token stream extends past record")?
        .to_vec();

    Ok(FormulaRecord {
        header,
        result,
        flags,
        rgce,
    })
}

/// Sheet extent declared by a DIMENSION record. Used as a capacity hint
/// only; actual cell records are authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetDimension {
    pub first_row: u32,
    pub last_row: u32,
    pub first_col: u16,
    pub last_col: u16,
}

/// Fixed payload sizes of the two DIMENSION layouts, used by the
/// zero-opcode recovery heuristic.
pub(crate) const DIMENSION_LEN_BIFF7: usize = 10;
pub(crate) const DIMENSION_LEN_BIFF8: usize = 14;

pub fn parse_dimension(data: &[u8], version: BiffVersion) -> Result<SheetDimension, String> {
    match version {
        BiffVersion::Biff8 => Ok(SheetDimension {
            first_row: read_u32(data, 0)?,
            last_row: read_u32(data, 4)?,
            first_col: read_u16(data, 8)?,
            last_col: read_u16(data, 10)?,
        }),
        BiffVersion::Biff7 => Ok(SheetDimension {
            first_row: u32::from(read_u16(data, 0)?),
            last_row: u32::from(read_u16(data, 2)?),
            first_col: read_u16(data, 4)?,
            last_col: read_u16(data, 6)?,
        }),
    }
}

/// Decode a STRING record (the out-of-band result of a string formula),
/// including text continued across CONTINUE records.
pub fn parse_string_record(
    record: &RawRecord<'_>,
    version: BiffVersion,
    codepage: u16,
) -> Result<String, String> {
    match version {
        BiffVersion::Biff8 => {
            let fragments: Vec<&[u8]> = record.fragments().collect();
            strings::read_unicode_string_fragments(&fragments, 0, codepage)
        }
        BiffVersion::Biff7 => {
            let (text, _) = strings::read_byte_string16(record.payload(), codepage)?;
            Ok(text)
        }
    }
}
