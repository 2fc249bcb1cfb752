//! Row and column metadata records.
//!
//! ROW records are emitted for every populated row, but only rows deviating
//! from sheet defaults are worth keeping; the retention test keeps the
//! metadata set proportional to actual customization.

fn read_u16(data: &[u8], offset: usize) -> Result<u16, String> {
    data.get(offset..offset + 2)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .ok_or_else(|| "record payload too short".to_string())
}

// ROW option flags (byte 12 of the payload).
const ROW_OUTLINE_MASK: u32 = 0x0007;
const ROW_COLLAPSED: u32 = 0x0010;
const ROW_HIDDEN: u32 = 0x0020;
const ROW_HEIGHT_SET: u32 = 0x0040;
const ROW_FORMAT_SET: u32 = 0x0080;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowProperties {
    pub row: u16,
    pub first_col: u16,
    pub last_col: u16,
    /// Height in twips.
    pub height: u16,
    pub outline_level: u8,
    pub collapsed: bool,
    pub hidden: bool,
    /// Height explicitly set (doesn't track the font height).
    pub height_set: bool,
    /// A default cell format applies to the whole row.
    pub format_set: bool,
    pub xf: u16,
}

impl RowProperties {
    /// Only rows that differ from the sheet defaults are retained.
    pub fn deviates_from_defaults(&self) -> bool {
        self.height_set
            || self.hidden
            || self.collapsed
            || self.format_set
            || self.outline_level != 0
    }
}

pub fn parse_row(data: &[u8]) -> Result<RowProperties, String> {
    let row = read_u16(data, 0)?;
    let first_col = read_u16(data, 2)?;
    let last_col = read_u16(data, 4)?;
    let height = read_u16(data, 6)? & 0x7FFF;
    // Bytes 8..12 are irrelevant here (reserved / file position hints).
    let flags = u32::from(read_u16(data, 12)?) | (u32::from(read_u16(data, 14)?) << 16);

    Ok(RowProperties {
        row,
        first_col,
        last_col,
        height,
        outline_level: (flags & ROW_OUTLINE_MASK) as u8,
        collapsed: flags & ROW_COLLAPSED != 0,
        hidden: flags & ROW_HIDDEN != 0,
        height_set: flags & ROW_HEIGHT_SET != 0,
        format_set: flags & ROW_FORMAT_SET != 0,
        xf: ((flags >> 16) & 0x0FFF) as u16,
    })
}

// COLINFO option flags.
const COL_HIDDEN: u16 = 0x0001;
const COL_OUTLINE_SHIFT: u16 = 8;
const COL_COLLAPSED: u16 = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnInfo {
    pub first_col: u16,
    pub last_col: u16,
    /// Width in 1/256ths of a character.
    pub width: u16,
    pub xf: u16,
    pub hidden: bool,
    pub outline_level: u8,
    pub collapsed: bool,
}

pub fn parse_colinfo(data: &[u8]) -> Result<ColumnInfo, String> {
    let flags = read_u16(data, 8)?;
    Ok(ColumnInfo {
        first_col: read_u16(data, 0)?,
        last_col: read_u16(data, 2)?,
        width: read_u16(data, 4)?,
        xf: read_u16(data, 6)?,
        hidden: flags & COL_HIDDEN != 0,
        outline_level: ((flags >> COL_OUTLINE_SHIFT) & 0x07) as u8,
        collapsed: flags & COL_COLLAPSED != 0,
    })
}

pub fn parse_defcolwidth(data: &[u8]) -> Result<u16, String> {
    read_u16(data, 0)
}

pub fn parse_default_row_height(data: &[u8]) -> Result<u16, String> {
    // [flags: u16][height: u16]
    read_u16(data, 2)
}

/// Maximum row/column outline levels from a GUTS record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutlineLevels {
    pub max_row_level: u8,
    pub max_col_level: u8,
}

pub fn parse_guts(data: &[u8]) -> Result<OutlineLevels, String> {
    let row_level = read_u16(data, 4)?;
    let col_level = read_u16(data, 6)?;
    Ok(OutlineLevels {
        max_row_level: row_level.saturating_sub(1).min(7) as u8,
        max_col_level: col_level.saturating_sub(1).min(7) as u8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_payload(height: u16, flags: u32) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&5u16.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data.extend_from_slice(&[0u8; 4]);
        data.extend_from_slice(&flags.to_le_bytes());
        data
    }

    #[test]
    fn default_row_is_not_retained() {
        let row = parse_row(&row_payload(255, 0)).unwrap();
        assert!(!row.deviates_from_defaults());
    }

    #[test]
    fn customized_rows_are_retained() {
        for flags in [ROW_HIDDEN, ROW_COLLAPSED, ROW_HEIGHT_SET, ROW_FORMAT_SET, 0x0002] {
            let row = parse_row(&row_payload(255, flags)).unwrap();
            assert!(row.deviates_from_defaults(), "flags={flags:#x}");
        }
    }

    #[test]
    fn row_xf_comes_from_high_flag_bits() {
        let row = parse_row(&row_payload(300, ROW_FORMAT_SET | (42 << 16))).unwrap();
        assert_eq!(row.xf, 42);
        assert_eq!(row.height, 300);
    }

    #[test]
    fn parses_colinfo() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&2048u16.to_le_bytes());
        data.extend_from_slice(&15u16.to_le_bytes());
        data.extend_from_slice(&(COL_HIDDEN | (2 << COL_OUTLINE_SHIFT)).to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());

        let col = parse_colinfo(&data).unwrap();
        assert_eq!((col.first_col, col.last_col), (1, 3));
        assert!(col.hidden);
        assert_eq!(col.outline_level, 2);
        assert!(!col.collapsed);
    }

    #[test]
    fn parses_guts_levels() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0u8; 4]);
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        let levels = parse_guts(&data).unwrap();
        assert_eq!(levels.max_row_level, 2);
        assert_eq!(levels.max_col_level, 0);
    }
}
