//! Decoder for the legacy binary spreadsheet container format (a
//! length-prefixed record stream) and the formula bytecode it embeds.
//!
//! The crate reconstructs a faithful in-memory sheet model from arbitrary,
//! sometimes malformed, input streams:
//!
//! - [`biff::records`]: the opcode registry and record stream reader, with
//!   caller-attached CONTINUE stitching;
//! - [`biff::sheet`]: the sheet content decoder ([`biff::sheet::decode_sheet`]);
//! - [`formula`]: the token registry, RPN parser, and parse tree with its
//!   rewrite operations (relative-reference shifting, sheet-index rewrites);
//! - [`biff::shared`]: shared-formula groups and rebasing.
//!
//! The OLE2 container, cell-style rationalization, the shared-string table
//! itself and the drawing object model are external collaborators: the
//! decoder consumes already-extracted workbook stream bytes plus the
//! [`xlsread_model::FormatClassifier`] / [`xlsread_model::SharedStrings`]
//! interfaces, and produces read-only decoded structures.
//!
//! Decoding is best-effort where the format allows it: unknown record
//! opcodes are skipped, malformed individual records degrade to logged
//! warnings, and only structural protocol violations (BOF/EOF imbalance,
//! broken object grammars, unparseable formula bytecode at the stream
//! level) abort a sheet.

pub mod biff;
pub mod formula;

pub use biff::records::{RawRecord, RecordKind, RecordStream};
pub use biff::sheet::{
    decode_sheet, Cell, CellFormula, DecodeOptions, DecodedSheet, SheetDecodeContext,
    SheetSettings,
};
pub use biff::{detect_version, BiffVersion, SheetDecodeError};
pub use formula::{parse_tokens, FormulaError, ParseNode, PtgClass, Token};
