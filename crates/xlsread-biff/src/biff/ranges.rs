//! Range-bearing side-list records: merged cells, manual page breaks,
//! conditional formats, and autofilter records.

use xlsread_model::{CellCoord, CellRange};

use super::BiffVersion;

fn read_u16(data: &[u8], offset: usize) -> Result<u16, String> {
    data.get(offset..offset + 2)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .ok_or_else(|| "record payload too short".to_string())
}

// High bits of range column fields can carry flags; the index is 14 bits.
const RANGE_COL_MASK: u16 = 0x3FFF;

/// An 8-byte row/row/col/col range block.
fn read_ref8(data: &[u8], offset: usize) -> Result<CellRange, String> {
    let first_row = read_u16(data, offset)?;
    let last_row = read_u16(data, offset + 2)?;
    let first_col = read_u16(data, offset + 4)? & RANGE_COL_MASK;
    let last_col = read_u16(data, offset + 6)? & RANGE_COL_MASK;
    Ok(CellRange::new(
        CellCoord::new(u32::from(first_col), u32::from(first_row)),
        CellCoord::new(u32::from(last_col), u32::from(last_row)),
    ))
}

pub fn parse_merged_cells(data: &[u8]) -> Result<Vec<CellRange>, String> {
    let count = read_u16(data, 0)? as usize;
    let mut ranges = Vec::with_capacity(count.min(1024));
    for i in 0..count {
        ranges.push(read_ref8(data, 2 + i * 8)?);
    }
    Ok(ranges)
}

/// One manual page break: the break sits before `index` (a row for
/// horizontal breaks, a column for vertical ones), spanning `start..=end`
/// on the other axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBreak {
    pub index: u16,
    pub start: u16,
    pub end: u16,
}

pub fn parse_page_breaks(data: &[u8], version: BiffVersion) -> Result<Vec<PageBreak>, String> {
    let count = read_u16(data, 0)? as usize;
    let mut breaks = Vec::with_capacity(count.min(1024));
    match version {
        BiffVersion::Biff8 => {
            for i in 0..count {
                let offset = 2 + i * 6;
                breaks.push(PageBreak {
                    index: read_u16(data, offset)?,
                    start: read_u16(data, offset + 2)?,
                    end: read_u16(data, offset + 4)?,
                });
            }
        }
        BiffVersion::Biff7 => {
            for i in 0..count {
                breaks.push(PageBreak {
                    index: read_u16(data, 2 + i * 2)?,
                    start: 0,
                    end: u16::MAX,
                });
            }
        }
    }
    Ok(breaks)
}

/// One condition of a conditional-format block (a CF record). The rule
/// payload (formulas, format block) is preserved raw; interpreting it is
/// the formatting layer's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalFormatRule {
    pub condition_type: u8,
    pub operator: u8,
    pub raw: Vec<u8>,
}

pub fn parse_cf(data: &[u8]) -> Result<ConditionalFormatRule, String> {
    let condition_type = *data.first().ok_or("CF record too short")?;
    let operator = *data.get(1).ok_or("CF record too short")?;
    Ok(ConditionalFormatRule {
        condition_type,
        operator,
        raw: data.to_vec(),
    })
}

/// A conditional-format block: a CONDFMT record and the CF rules that
/// follow it. CF records always attach to the most recently opened block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalFormatBlock {
    /// Number of CF records the block declared.
    pub declared_rules: u16,
    /// The enclosing range of every target range.
    pub bounding: CellRange,
    pub ranges: Vec<CellRange>,
    pub rules: Vec<ConditionalFormatRule>,
}

pub fn parse_condfmt(data: &[u8]) -> Result<ConditionalFormatBlock, String> {
    let declared_rules = read_u16(data, 0)?;
    // [ccf: u16][flags: u16][bounding ref8][cref: u16][ranges...]
    let bounding = read_ref8(data, 4)?;
    let count = read_u16(data, 12)? as usize;
    let mut ranges = Vec::with_capacity(count.min(1024));
    for i in 0..count {
        ranges.push(read_ref8(data, 14 + i * 8)?);
    }
    Ok(ConditionalFormatBlock {
        declared_rules,
        bounding,
        ranges,
        rules: Vec::new(),
    })
}

/// One AUTOFILTER record: the filter condition for one filtered column.
/// Criteria payloads are preserved raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoFilterColumn {
    pub entry: u16,
    pub flags: u16,
    pub raw: Vec<u8>,
}

pub fn parse_autofilter(data: &[u8]) -> Result<AutoFilterColumn, String> {
    Ok(AutoFilterColumn {
        entry: read_u16(data, 0)?,
        flags: read_u16(data, 2)?,
        raw: data.to_vec(),
    })
}

/// Accumulated autofilter state for one sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoFilterInfo {
    /// Number of filterable columns (AUTOFILTERINFO).
    pub entry_count: u16,
    /// FILTERMODE was present: the sheet is currently filtered.
    pub filter_mode: bool,
    pub columns: Vec<AutoFilterColumn>,
}

pub fn parse_autofilterinfo(data: &[u8]) -> Result<u16, String> {
    read_u16(data, 0)
}

/// A hyperlink record: target range plus the raw payload (URL moniker
/// decoding belongs to the workbook layer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperlink {
    pub range: CellRange,
    pub raw: Vec<u8>,
}

pub fn parse_hlink(data: &[u8]) -> Result<Hyperlink, String> {
    // [rwFirst][rwLast][colFirst][colLast] then a GUID + stream data.
    let first_row = read_u16(data, 0)?;
    let last_row = read_u16(data, 2)?;
    let first_col = read_u16(data, 4)? & RANGE_COL_MASK;
    let last_col = read_u16(data, 6)? & RANGE_COL_MASK;
    Ok(Hyperlink {
        range: CellRange::new(
            CellCoord::new(u32::from(first_col), u32::from(first_row)),
            CellCoord::new(u32::from(last_col), u32::from(last_row)),
        ),
        raw: data.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ref8(first_row: u16, last_row: u16, first_col: u16, last_col: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&first_row.to_le_bytes());
        out.extend_from_slice(&last_row.to_le_bytes());
        out.extend_from_slice(&first_col.to_le_bytes());
        out.extend_from_slice(&last_col.to_le_bytes());
        out
    }

    #[test]
    fn parses_merged_cell_ranges() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&ref8(0, 1, 0, 2));
        data.extend_from_slice(&ref8(4, 4, 1, 1));

        let ranges = parse_merged_cells(&data).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(
            ranges[0],
            CellRange::new(CellCoord::new(0, 0), CellCoord::new(2, 1))
        );
    }

    #[test]
    fn merged_cells_with_short_payload_error() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&ref8(0, 1, 0, 2));
        assert!(parse_merged_cells(&data).is_err());
    }

    #[test]
    fn parses_page_breaks_both_layouts() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&9u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&255u16.to_le_bytes());
        let breaks = parse_page_breaks(&data, BiffVersion::Biff8).unwrap();
        assert_eq!(
            breaks,
            vec![PageBreak {
                index: 9,
                start: 0,
                end: 255
            }]
        );

        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&9u16.to_le_bytes());
        let breaks = parse_page_breaks(&data, BiffVersion::Biff7).unwrap();
        assert_eq!(breaks[0].index, 9);
    }

    #[test]
    fn parses_condfmt_header() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u16.to_le_bytes()); // ccf
        data.extend_from_slice(&0u16.to_le_bytes()); // flags
        data.extend_from_slice(&ref8(0, 9, 0, 3)); // bounding
        data.extend_from_slice(&1u16.to_le_bytes()); // cref
        data.extend_from_slice(&ref8(0, 9, 0, 3));

        let block = parse_condfmt(&data).unwrap();
        assert_eq!(block.declared_rules, 2);
        assert_eq!(block.ranges.len(), 1);
        assert_eq!(block.bounding, block.ranges[0]);
    }

    #[test]
    fn parses_hyperlink_range() {
        let mut data = ref8(2, 2, 1, 1);
        data.extend_from_slice(&[0u8; 16]);
        let link = parse_hlink(&data).unwrap();
        assert!(link.range.contains(CellCoord::new(1, 2)));
    }
}
