//! `xlsread-model` defines the in-memory spreadsheet data structures shared by
//! the BIFF decoder and its consumers.
//!
//! The crate is intentionally self-contained: cell coordinates and ranges,
//! cell values, Excel error values, and the collaborator traits the decoder
//! consumes (number-format classification, the shared-string table, and
//! external-sheet / defined-name resolution). No I/O, no decoding logic.

mod coord;
mod providers;
mod value;

pub use coord::{col_to_name, CellCoord, CellRange};
pub use providers::{DefinedNames, ExternalSheets, FormatClassifier, SharedStrings};
pub use value::{CellValue, ErrorValue};

/// Largest 0-indexed row representable in the legacy binary format.
pub const MAX_ROW: u32 = u16::MAX as u32;
/// Largest 0-indexed column representable in the legacy binary format.
///
/// Column fields are 14 bits wide on the wire; the two high bits carry
/// relative-reference flags.
pub const MAX_COL: u32 = 0x3FFF;
