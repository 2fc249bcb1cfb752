//! The sheet content decoder.
//!
//! A stateful loop over the record sequence between a sheet's BOF record and
//! its matching EOF. Embedded substreams (charts) are skipped with a
//! BOF/EOF nesting counter. Cell, row, column, merge, shared-formula and
//! object records accumulate into a [`DecodedSheet`]; everything else the
//! sheet does not model is ignored.
//!
//! Failure semantics: malformed individual records degrade to logged
//! warnings and best-effort recovery; structural protocol violations
//! (BOF/EOF imbalance, a broken object-record grammar, a string formula
//! with no trailing STRING record) abort the sheet decode.

use std::collections::{BTreeMap, HashMap};

use xlsread_model::{CellCoord, CellRange, CellValue, ErrorValue, FormatClassifier, SharedStrings};

use super::cells::{self, CachedResult, SheetDimension};
use super::objects::{self, ObjectKind, SheetObject};
use super::ranges::{self, AutoFilterInfo, ConditionalFormatBlock, Hyperlink, PageBreak};
use super::records::{RawRecord, RecordKind, RecordStream};
use super::rows::{self, ColumnInfo, OutlineLevels, RowProperties};
use super::shared::{self, SharedFormulaGroup};
use super::{cells::FormulaRecord, detect_version, BiffVersion, SheetDecodeError};
use crate::formula::{parse_tokens, ParseNode};

/// Cap on collected warnings so a crafted stream cannot allocate an
/// unbounded number of warning strings.
const MAX_WARNINGS_PER_SHEET: usize = 50;
const WARNINGS_SUPPRESSED_MESSAGE: &str = "additional warnings suppressed";

/// How many records past a string formula the STRING record may trail.
const STRING_LOOKAHEAD_CAP: usize = 4;

/// Decode behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Skip BLANK/MULBLANK cells entirely.
    pub ignore_blanks: bool,
    /// Skip drawing-object sequences (comments, controls).
    pub drawings_disabled: bool,
    /// Skip autofilter records.
    pub autofilter_disabled: bool,
}

/// Collaborators and stream-wide parameters for one sheet decode.
pub struct SheetDecodeContext<'a> {
    pub version: BiffVersion,
    pub codepage: u16,
    pub formats: &'a dyn FormatClassifier,
    pub shared_strings: &'a dyn SharedStrings,
    pub options: DecodeOptions,
}

/// A decoded formula: the parse tree plus its serialized token bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFormula {
    pub tree: ParseNode,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub coord: CellCoord,
    pub xf: u16,
    pub value: CellValue,
    pub formula: Option<CellFormula>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            left: 0.75,
            right: 0.75,
            top: 1.0,
            bottom: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSetup {
    pub paper_size: u16,
    pub scale: u16,
    pub fit_width: u16,
    pub fit_height: u16,
    pub portrait: bool,
    pub header_margin: f64,
    pub footer_margin: f64,
    pub copies: u16,
}

/// Plain sheet-level settings accumulated from view/print records. Style
/// rationalization is out of scope; these are raw values.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetSettings {
    pub protected: bool,
    pub password_hash: u16,
    pub show_grid_lines: bool,
    pub display_zeros: bool,
    pub page_break_preview: bool,
    pub frozen_rows: u16,
    pub frozen_cols: u16,
    /// Zoom as a (numerator, denominator) magnification pair.
    pub zoom: Option<(u16, u16)>,
    pub default_column_width: u16,
    pub default_row_height: u16,
    pub print_grid_lines: bool,
    pub print_headers: bool,
    pub header_text: Option<String>,
    pub footer_text: Option<String>,
    pub margins: Margins,
    pub horizontal_center: bool,
    pub vertical_center: bool,
    pub automatic_recalc: bool,
    pub recalc_on_save: bool,
    pub page_setup: Option<PageSetup>,
}

impl Default for SheetSettings {
    fn default() -> Self {
        Self {
            protected: false,
            password_hash: 0,
            show_grid_lines: true,
            display_zeros: true,
            page_break_preview: false,
            frozen_rows: 0,
            frozen_cols: 0,
            zoom: None,
            default_column_width: 8,
            default_row_height: 0x00FF,
            print_grid_lines: false,
            print_headers: false,
            header_text: None,
            footer_text: None,
            margins: Margins::default(),
            horizontal_center: false,
            vertical_center: false,
            automatic_recalc: true,
            recalc_on_save: true,
            page_setup: None,
        }
    }
}

/// Everything decoded from one sheet substream. Exposed read-only to the
/// workbook layer after decode completes.
#[derive(Debug, Default)]
pub struct DecodedSheet {
    pub cells: BTreeMap<CellCoord, Cell>,
    pub dimension: Option<SheetDimension>,
    pub rows: Vec<RowProperties>,
    pub columns: Vec<ColumnInfo>,
    pub merged: Vec<CellRange>,
    pub row_breaks: Vec<PageBreak>,
    pub col_breaks: Vec<PageBreak>,
    pub conditional_formats: Vec<ConditionalFormatBlock>,
    pub autofilter: Option<AutoFilterInfo>,
    pub hyperlinks: Vec<Hyperlink>,
    pub objects: Vec<SheetObject>,
    pub outline: OutlineLevels,
    pub settings: SheetSettings,
    pub warnings: Vec<String>,
}

impl DecodedSheet {
    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        if self.warnings.len() < MAX_WARNINGS_PER_SHEET {
            self.warnings.push(message);
        } else if self.warnings.len() == MAX_WARNINGS_PER_SHEET {
            self.warnings.push(WARNINGS_SUPPRESSED_MESSAGE.to_string());
        }
    }
}

/// A shared-flagged FORMULA record held as a group-template candidate.
/// String results stay unresolved until the template is consumed by a
/// SHAREDFORMULA record or reverted, at which point the stream is re-read
/// from `resume_pos` to find the trailing STRING record.
#[derive(Debug, Clone)]
struct PendingTemplate {
    coord: CellCoord,
    xf: u16,
    rgce: Vec<u8>,
    result: CachedResult,
    resume_pos: usize,
}

/// Mutable decode-loop state, threaded explicitly instead of being spread
/// across long-lived fields.
#[derive(Default)]
struct DecodeState {
    pending_mso: Option<Vec<u8>>,
    stashed_continue: Option<Vec<u8>>,
    comments: HashMap<u16, String>,
    current_condfmt: Option<usize>,
    filter_mode: bool,
    autofilter_entries: Option<u16>,
    window2_frozen: bool,
    pending_template: Option<PendingTemplate>,
    groups: Vec<SharedFormulaGroup>,
}

/// Decode one sheet substream. The stream cursor must sit on the sheet's
/// BOF record; on success it sits just past the sheet's EOF.
pub fn decode_sheet(
    stream: &mut RecordStream<'_>,
    ctx: &SheetDecodeContext<'_>,
) -> Result<DecodedSheet, SheetDecodeError> {
    let bof = stream.next_record().map_err(SheetDecodeError::Record)?;
    if !bof.kind().is_bof() {
        return Err(SheetDecodeError::Record(format!(
            "expected sheet BOF at offset {}, found 0x{:04X}",
            bof.offset(),
            bof.opcode()
        )));
    }
    // Unsupported stream versions are fatal before any content decoding.
    detect_version(bof.payload())?;

    let mut decoder = SheetDecoder {
        ctx,
        out: DecodedSheet::default(),
        state: DecodeState::default(),
    };
    decoder.run(stream)?;
    Ok(decoder.out)
}

struct SheetDecoder<'a> {
    ctx: &'a SheetDecodeContext<'a>,
    out: DecodedSheet,
    state: DecodeState,
}

impl<'a> SheetDecoder<'a> {
    fn run(&mut self, stream: &mut RecordStream<'_>) -> Result<(), SheetDecodeError> {
        loop {
            if !stream.has_next() {
                return Err(SheetDecodeError::UnbalancedSubstream(
                    "stream ended before the sheet EOF record".to_string(),
                ));
            }
            let mut record = stream.next_record().map_err(SheetDecodeError::Record)?;

            // Corrupt-stream heuristic: an opcode of zero with a payload
            // matching the DIMENSION fixed size is treated as a DIMENSION
            // record; any other zero-opcode record is skipped.
            if record.kind() == RecordKind::Unknown && record.opcode() == 0 {
                if matches!(
                    record.declared_len(),
                    cells::DIMENSION_LEN_BIFF7 | cells::DIMENSION_LEN_BIFF8
                ) {
                    self.out
                        .warn("record opcode zero; payload length matches a DIMENSION record");
                    record.set_kind(RecordKind::Dimension);
                } else {
                    self.out.warn("record opcode zero; ignoring");
                    continue;
                }
            }

            match record.kind() {
                RecordKind::Eof => break,
                RecordKind::Bof | RecordKind::BofBiff7 => self.skip_nested_substream(stream)?,
                RecordKind::FilePass => return Err(SheetDecodeError::EncryptedStream),

                RecordKind::Dimension => {
                    // Trust the payload size over the stream version; the
                    // zero-opcode heuristic can surface either layout.
                    let version = match record.declared_len() {
                        cells::DIMENSION_LEN_BIFF7 => BiffVersion::Biff7,
                        cells::DIMENSION_LEN_BIFF8 => BiffVersion::Biff8,
                        _ => self.ctx.version,
                    };
                    match cells::parse_dimension(record.payload(), version) {
                        Ok(dim) => self.out.dimension = Some(dim),
                        Err(err) => self.out.warn(format!(
                            "failed to parse DIMENSION record at offset {}: {err}",
                            record.offset()
                        )),
                    }
                }

                RecordKind::Number => self.handle_number(&record, cells::parse_number),
                RecordKind::Rk | RecordKind::Rk2 => self.handle_number(&record, cells::parse_rk),
                RecordKind::MulRk => self.handle_mulrk(&record),
                RecordKind::Blank => self.handle_blank(&record),
                RecordKind::MulBlank => self.handle_mulblank(&record),
                RecordKind::BoolErr => self.handle_boolerr(&record),
                RecordKind::Label | RecordKind::RString => self.handle_label(&record),
                RecordKind::LabelSst => self.handle_labelsst(&record),
                RecordKind::Formula | RecordKind::Formula2 => {
                    self.handle_formula(stream, &record)?
                }
                RecordKind::SharedFormula => self.handle_shared_formula(stream, &record)?,
                // A STRING record reached by the main loop belongs to a
                // formula already resolved (or reverted); skip it.
                RecordKind::String => {}
                // Array formula bodies are decoded with the drawing/chart
                // subsystems' help; the anchor FORMULA record already
                // produced the cell.
                RecordKind::Array => {}

                RecordKind::Row => match rows::parse_row(record.payload()) {
                    Ok(row) if row.deviates_from_defaults() => self.out.rows.push(row),
                    Ok(_) => {}
                    Err(err) => self.out.warn(format!(
                        "failed to parse ROW record at offset {}: {err}",
                        record.offset()
                    )),
                },
                RecordKind::ColInfo => match rows::parse_colinfo(record.payload()) {
                    Ok(col) => self.out.columns.push(col),
                    Err(err) => self.out.warn(format!(
                        "failed to parse COLINFO record at offset {}: {err}",
                        record.offset()
                    )),
                },
                RecordKind::DefColWidth => {
                    if let Ok(width) = rows::parse_defcolwidth(record.payload()) {
                        self.out.settings.default_column_width = width;
                    }
                }
                RecordKind::DefaultRowHeight => {
                    if let Ok(height) = rows::parse_default_row_height(record.payload()) {
                        if height != 0 {
                            self.out.settings.default_row_height = height;
                        }
                    }
                }
                RecordKind::Guts => {
                    if let Ok(levels) = rows::parse_guts(record.payload()) {
                        self.out.outline = levels;
                    }
                }

                RecordKind::MergedCells => match ranges::parse_merged_cells(record.payload()) {
                    Ok(mut merged) => self.out.merged.append(&mut merged),
                    Err(err) => self.out.warn(format!(
                        "failed to parse MERGEDCELLS record at offset {}: {err}",
                        record.offset()
                    )),
                },
                RecordKind::HorizontalPageBreaks => {
                    match ranges::parse_page_breaks(record.payload(), self.ctx.version) {
                        Ok(breaks) => self.out.row_breaks = breaks,
                        Err(err) => self.out.warn(format!(
                            "failed to parse HORIZONTALPAGEBREAKS record: {err}"
                        )),
                    }
                }
                RecordKind::VerticalPageBreaks => {
                    match ranges::parse_page_breaks(record.payload(), self.ctx.version) {
                        Ok(breaks) => self.out.col_breaks = breaks,
                        Err(err) => self
                            .out
                            .warn(format!("failed to parse VERTICALPAGEBREAKS record: {err}")),
                    }
                }

                RecordKind::CondFmt => match ranges::parse_condfmt(record.payload()) {
                    Ok(block) => {
                        self.out.conditional_formats.push(block);
                        self.state.current_condfmt =
                            Some(self.out.conditional_formats.len() - 1);
                    }
                    Err(err) => self.out.warn(format!(
                        "failed to parse CONDFMT record at offset {}: {err}",
                        record.offset()
                    )),
                },
                RecordKind::Cf => match ranges::parse_cf(record.payload()) {
                    Ok(rule) => match self.state.current_condfmt {
                        Some(idx) => self.out.conditional_formats[idx].rules.push(rule),
                        None => self.out.warn(format!(
                            "CF record at offset {} has no open CONDFMT; dropping",
                            record.offset()
                        )),
                    },
                    Err(err) => self.out.warn(format!(
                        "failed to parse CF record at offset {}: {err}",
                        record.offset()
                    )),
                },

                RecordKind::FilterMode => self.state.filter_mode = true,
                RecordKind::AutoFilterInfo => {
                    if let Ok(entries) = ranges::parse_autofilterinfo(record.payload()) {
                        self.state.autofilter_entries = Some(entries);
                    }
                }
                RecordKind::AutoFilter => {
                    if self.ctx.options.autofilter_disabled {
                        continue;
                    }
                    match ranges::parse_autofilter(record.payload()) {
                        Ok(column) => {
                            let filter = self.out.autofilter.get_or_insert_with(|| {
                                AutoFilterInfo {
                                    entry_count: self.state.autofilter_entries.take().unwrap_or(0),
                                    filter_mode: self.state.filter_mode,
                                    columns: Vec::new(),
                                }
                            });
                            filter.columns.push(column);
                        }
                        Err(err) => self.out.warn(format!(
                            "failed to parse AUTOFILTER record at offset {}: {err}",
                            record.offset()
                        )),
                    }
                }

                RecordKind::HLink => match ranges::parse_hlink(record.payload()) {
                    Ok(link) => self.out.hyperlinks.push(link),
                    Err(err) => self.out.warn(format!(
                        "failed to parse HLINK record at offset {}: {err}",
                        record.offset()
                    )),
                },

                RecordKind::Continue => {
                    // Keep hold of a stray continuation; a following OBJ
                    // record may need it as its missing drawing record.
                    self.state.stashed_continue = Some(record.payload().to_vec());
                }
                RecordKind::MsoDrawing => {
                    if !self.ctx.options.drawings_disabled {
                        self.state.pending_mso = Some(record.payload().to_vec());
                    }
                }
                RecordKind::Obj => self.handle_obj(stream, &record)?,
                RecordKind::Note => self.handle_note(&record),
                RecordKind::Pls => {
                    // Environment-specific print settings overflow into
                    // CONTINUE records; attach them so the payload stays
                    // logical. The contents themselves are opaque here.
                    let mut record = record;
                    while stream.peek_kind() == Some(RecordKind::Continue) {
                        let cont = stream.next_record().map_err(SheetDecodeError::Record)?;
                        if let Err(err) = record.push_continuation(cont) {
                            self.out.warn(err);
                            break;
                        }
                    }
                }

                RecordKind::Protect => {
                    if let Some(&flag) = record.payload().first() {
                        self.out.settings.protected = flag != 0;
                    }
                }
                RecordKind::Password => {
                    if let Some(hash) = read_u16_opt(record.payload(), 0) {
                        self.out.settings.password_hash = hash;
                    }
                }
                RecordKind::PrintGridLines => {
                    if let Some(&flag) = record.payload().first() {
                        self.out.settings.print_grid_lines = flag != 0;
                    }
                }
                RecordKind::PrintHeaders => {
                    if let Some(&flag) = record.payload().first() {
                        self.out.settings.print_headers = flag != 0;
                    }
                }
                RecordKind::Window2 => {
                    if let Some(flags) = read_u16_opt(record.payload(), 0) {
                        self.out.settings.show_grid_lines = flags & 0x0002 != 0;
                        self.out.settings.display_zeros = flags & 0x0010 != 0;
                        self.out.settings.page_break_preview = flags & 0x0800 != 0;
                        self.state.window2_frozen = flags & 0x0008 != 0;
                    }
                }
                RecordKind::Pane => {
                    if self.state.window2_frozen {
                        let cols = read_u16_opt(record.payload(), 0).unwrap_or(0);
                        let rows = read_u16_opt(record.payload(), 2).unwrap_or(0);
                        self.out.settings.frozen_cols = cols;
                        self.out.settings.frozen_rows = rows;
                    }
                }
                RecordKind::Scl => {
                    let num = read_u16_opt(record.payload(), 0).unwrap_or(1);
                    let den = read_u16_opt(record.payload(), 2).unwrap_or(1);
                    self.out.settings.zoom = Some((num, den));
                }
                RecordKind::Header => {
                    self.out.settings.header_text = self.read_header_footer(&record)
                }
                RecordKind::Footer => {
                    self.out.settings.footer_text = self.read_header_footer(&record)
                }
                RecordKind::LeftMargin => {
                    if let Some(v) = read_f64_opt(record.payload()) {
                        self.out.settings.margins.left = v;
                    }
                }
                RecordKind::RightMargin => {
                    if let Some(v) = read_f64_opt(record.payload()) {
                        self.out.settings.margins.right = v;
                    }
                }
                RecordKind::TopMargin => {
                    if let Some(v) = read_f64_opt(record.payload()) {
                        self.out.settings.margins.top = v;
                    }
                }
                RecordKind::BottomMargin => {
                    if let Some(v) = read_f64_opt(record.payload()) {
                        self.out.settings.margins.bottom = v;
                    }
                }
                RecordKind::HCenter => {
                    if let Some(&flag) = record.payload().first() {
                        self.out.settings.horizontal_center = flag != 0;
                    }
                }
                RecordKind::VCenter => {
                    if let Some(&flag) = record.payload().first() {
                        self.out.settings.vertical_center = flag != 0;
                    }
                }
                RecordKind::CalcMode => {
                    if let Some(mode) = read_u16_opt(record.payload(), 0) {
                        self.out.settings.automatic_recalc = mode == 1;
                    }
                }
                RecordKind::SaveRecalc => {
                    if let Some(flag) = read_u16_opt(record.payload(), 0) {
                        self.out.settings.recalc_on_save = flag != 0;
                    }
                }
                RecordKind::Setup => self.handle_setup(&record),

                // Everything else (including unknown opcodes) is ignored.
                _ => {}
            }
        }

        self.finish(stream)
    }

    /// Consume a nested substream (e.g. an embedded chart) without
    /// interpreting its records as sheet content. An exhausted stream while
    /// nested is a fatal imbalance.
    fn skip_nested_substream(
        &mut self,
        stream: &mut RecordStream<'_>,
    ) -> Result<(), SheetDecodeError> {
        let mut depth = 1usize;
        while depth > 0 {
            if !stream.has_next() {
                return Err(SheetDecodeError::UnbalancedSubstream(format!(
                    "stream ended inside a nested substream (depth {depth})"
                )));
            }
            let record = stream.next_record().map_err(SheetDecodeError::Record)?;
            if record.kind().is_bof() {
                depth += 1;
            } else if record.kind() == RecordKind::Eof {
                depth -= 1;
            }
        }
        // Drawing records accumulated for an embedded chart belong to the
        // excluded drawing subsystem.
        self.state.pending_mso = None;
        Ok(())
    }

    fn finish(&mut self, stream: &mut RecordStream<'_>) -> Result<(), SheetDecodeError> {
        // Expand every shared-formula group into one formula cell per
        // covered coordinate.
        let groups = std::mem::take(&mut self.state.groups);
        for group in groups {
            for expanded in group.expand() {
                self.add_cell(Cell {
                    coord: expanded.coord,
                    xf: expanded.xf,
                    value: expanded.value,
                    formula: Some(CellFormula {
                        tree: expanded.tree,
                        bytes: expanded.bytes,
                    }),
                    comment: None,
                });
            }
        }

        // A template never consumed by a SHAREDFORMULA record still
        // materializes once, at its own coordinate, as an ordinary formula.
        if let Some(template) = self.state.pending_template.take() {
            self.revert_template(stream, template)?;
        }

        if !self.state.comments.is_empty() {
            self.out
                .warn("not all comments have a corresponding NOTE record");
        }
        Ok(())
    }

    fn add_cell(&mut self, cell: Cell) {
        let coord = cell.coord;
        if self.out.cells.insert(coord, cell).is_some() {
            self.out
                .warn(format!("cell {coord} already contains data"));
        }
    }

    fn classify_number(&self, xf: u16, value: f64) -> CellValue {
        if self.ctx.formats.is_date_format(xf) {
            CellValue::DateTime(value)
        } else {
            CellValue::Number(value)
        }
    }

    fn handle_number(
        &mut self,
        record: &RawRecord<'_>,
        parse: fn(&[u8]) -> Result<cells::NumberCell, String>,
    ) {
        match parse(record.payload()) {
            Ok(cell) => {
                let value = self.classify_number(cell.header.xf, cell.value);
                self.add_cell(Cell {
                    coord: coord_of(cell.header.col, cell.header.row),
                    xf: cell.header.xf,
                    value,
                    formula: None,
                    comment: None,
                });
            }
            Err(err) => self.out.warn(format!(
                "failed to parse numeric cell record at offset {}: {err}",
                record.offset()
            )),
        }
    }

    fn handle_mulrk(&mut self, record: &RawRecord<'_>) {
        match cells::parse_mulrk(record.payload()) {
            Ok(run) => {
                for (i, (xf, value)) in run.cells.iter().enumerate() {
                    let col = run.first_col + i as u16;
                    let value = self.classify_number(*xf, *value);
                    self.add_cell(Cell {
                        coord: coord_of(col, run.row),
                        xf: *xf,
                        value,
                        formula: None,
                        comment: None,
                    });
                }
            }
            Err(err) => self.out.warn(format!(
                "failed to parse MULRK record at offset {}: {err}",
                record.offset()
            )),
        }
    }

    fn handle_blank(&mut self, record: &RawRecord<'_>) {
        if self.ctx.options.ignore_blanks {
            return;
        }
        match cells::parse_blank(record.payload()) {
            Ok(header) => self.add_cell(Cell {
                coord: coord_of(header.col, header.row),
                xf: header.xf,
                value: CellValue::Blank,
                formula: None,
                comment: None,
            }),
            Err(err) => self.out.warn(format!(
                "failed to parse BLANK record at offset {}: {err}",
                record.offset()
            )),
        }
    }

    fn handle_mulblank(&mut self, record: &RawRecord<'_>) {
        if self.ctx.options.ignore_blanks {
            return;
        }
        match cells::parse_mulblank(record.payload()) {
            Ok(run) => {
                for (i, xf) in run.xfs.iter().enumerate() {
                    self.add_cell(Cell {
                        coord: coord_of(run.first_col + i as u16, run.row),
                        xf: *xf,
                        value: CellValue::Blank,
                        formula: None,
                        comment: None,
                    });
                }
            }
            Err(err) => self.out.warn(format!(
                "failed to parse MULBLANK record at offset {}: {err}",
                record.offset()
            )),
        }
    }

    fn handle_boolerr(&mut self, record: &RawRecord<'_>) {
        match cells::parse_boolerr(record.payload()) {
            Ok(cell) => {
                let value = match cell.value {
                    cells::BoolErrValue::Bool(b) => CellValue::Boolean(b),
                    cells::BoolErrValue::Error(code) => {
                        CellValue::Error(ErrorValue::from_code(code))
                    }
                };
                self.add_cell(Cell {
                    coord: coord_of(cell.header.col, cell.header.row),
                    xf: cell.header.xf,
                    value,
                    formula: None,
                    comment: None,
                });
            }
            Err(err) => self.out.warn(format!(
                "failed to parse BOOLERR record at offset {}: {err}",
                record.offset()
            )),
        }
    }

    fn handle_label(&mut self, record: &RawRecord<'_>) {
        if record.kind() == RecordKind::RString && self.ctx.version.is_biff8() {
            // RSTRING is obsolete in BIFF8; a conforming writer never emits
            // it there.
            self.out.warn(format!(
                "RSTRING record at offset {} in a BIFF8 stream; skipping",
                record.offset()
            ));
            return;
        }
        let version = if record.kind() == RecordKind::RString {
            BiffVersion::Biff7
        } else {
            self.ctx.version
        };
        match cells::parse_label(record.payload(), version, self.ctx.codepage) {
            Ok(cell) => self.add_cell(Cell {
                coord: coord_of(cell.header.col, cell.header.row),
                xf: cell.header.xf,
                value: CellValue::Text(cell.text),
                formula: None,
                comment: None,
            }),
            Err(err) => self.out.warn(format!(
                "failed to parse LABEL record at offset {}: {err}",
                record.offset()
            )),
        }
    }

    fn handle_labelsst(&mut self, record: &RawRecord<'_>) {
        match cells::parse_labelsst(record.payload()) {
            Ok(cell) => {
                let text = match self.ctx.shared_strings.shared_string(cell.sst_index) {
                    Some(text) => text.to_string(),
                    None => {
                        self.out.warn(format!(
                            "LABELSST index {} is outside the shared string table",
                            cell.sst_index
                        ));
                        String::new()
                    }
                };
                self.add_cell(Cell {
                    coord: coord_of(cell.header.col, cell.header.row),
                    xf: cell.header.xf,
                    value: CellValue::Text(text),
                    formula: None,
                    comment: None,
                });
            }
            Err(err) => self.out.warn(format!(
                "failed to parse LABELSST record at offset {}: {err}",
                record.offset()
            )),
        }
    }

    fn handle_formula(
        &mut self,
        stream: &mut RecordStream<'_>,
        record: &RawRecord<'_>,
    ) -> Result<(), SheetDecodeError> {
        let parsed = match cells::parse_formula(record.payload(), self.ctx.version) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.out.warn(format!(
                    "failed to parse FORMULA record at offset {}: {err}",
                    record.offset()
                ));
                return Ok(());
            }
        };
        let coord = coord_of(parsed.header.col, parsed.header.row);

        if parsed.is_shared() {
            return self.handle_shared_member(stream, coord, parsed);
        }

        let tree = match parse_tokens(&parsed.rgce, coord, self.ctx.codepage) {
            Ok(tree) => tree,
            Err(err) => {
                // A single bad formula does not invalidate the sheet; the
                // offending cell is skipped.
                self.out
                    .warn(format!("failed to decode formula at {coord}: {err}"));
                return Ok(());
            }
        };

        let value = self.resolve_result(stream, coord, &parsed)?;
        self.add_cell(Cell {
            coord,
            xf: parsed.header.xf,
            value,
            formula: Some(CellFormula {
                tree,
                bytes: parsed.rgce,
            }),
            comment: None,
        });
        Ok(())
    }

    /// A shared-flagged formula either joins an open group (a member) or
    /// becomes the new pending template. A pending template displaced before
    /// ever being matched is reverted to an ordinary formula so its value is
    /// never silently dropped. Writers commonly emit
    /// FORMULA-SHAREDFORMULA-FORMULA-SHAREDFORMULA-FORMULA-... — first the
    /// templates, then the member formulas.
    fn handle_shared_member(
        &mut self,
        stream: &mut RecordStream<'_>,
        coord: CellCoord,
        parsed: FormulaRecord,
    ) -> Result<(), SheetDecodeError> {
        if let Some(idx) = self
            .state
            .groups
            .iter()
            .position(|group| group.range.contains(coord))
        {
            let value = self.resolve_result(stream, coord, &parsed)?;
            self.state.groups[idx].try_absorb(coord, parsed.header.xf, value);
            return Ok(());
        }

        let result = parsed.cached_result();
        let replaced = self.state.pending_template.replace(PendingTemplate {
            coord,
            xf: parsed.header.xf,
            rgce: parsed.rgce,
            result,
            resume_pos: stream.pos(),
        });
        if let Some(previous) = replaced {
            self.revert_template(stream, previous)?;
        }
        Ok(())
    }

    fn handle_shared_formula(
        &mut self,
        stream: &mut RecordStream<'_>,
        record: &RawRecord<'_>,
    ) -> Result<(), SheetDecodeError> {
        let def = match shared::parse_shared_formula(record.payload()) {
            Ok(def) => def,
            Err(err) => {
                self.out.warn(format!(
                    "failed to parse SHAREDFORMULA record at offset {}: {err}",
                    record.offset()
                ));
                return Ok(());
            }
        };

        let (anchor, anchor_xf, anchor_value) = match self.state.pending_template.take() {
            Some(template) => {
                let value = self.resolve_deferred(stream, &template)?;
                (template.coord, template.xf, value)
            }
            None => {
                self.out.warn(
                    "SHAREDFORMULA record has no template formula; anchoring at range start",
                );
                (def.range.start, 0, CellValue::Blank)
            }
        };

        match parse_tokens(&def.rgce, anchor, self.ctx.codepage) {
            Ok(template) => self.state.groups.push(SharedFormulaGroup::new(
                anchor,
                anchor_xf,
                anchor_value,
                def.range,
                template,
            )),
            Err(err) => self.out.warn(format!(
                "failed to decode shared formula template at {anchor}: {err}"
            )),
        }
        Ok(())
    }

    /// Revert an unmatched template to an ordinary formula cell at its own
    /// coordinate. String results re-read the stream from the position just
    /// after the original FORMULA record to find the trailing STRING record.
    fn revert_template(
        &mut self,
        stream: &mut RecordStream<'_>,
        template: PendingTemplate,
    ) -> Result<(), SheetDecodeError> {
        let value = self.resolve_deferred(stream, &template)?;
        match parse_tokens(&template.rgce, template.coord, self.ctx.codepage) {
            Ok(tree) => {
                self.add_cell(Cell {
                    coord: template.coord,
                    xf: template.xf,
                    value,
                    formula: Some(CellFormula {
                        tree,
                        bytes: template.rgce,
                    }),
                    comment: None,
                });
            }
            Err(err) => self.out.warn(format!(
                "failed to decode reverted shared formula at {}: {err}",
                template.coord
            )),
        }
        Ok(())
    }

    /// Resolve a FORMULA record's cached result with the stream positioned
    /// just past the record (string results consume the trailing STRING
    /// record and its continuations).
    fn resolve_result(
        &mut self,
        stream: &mut RecordStream<'_>,
        coord: CellCoord,
        parsed: &FormulaRecord,
    ) -> Result<CellValue, SheetDecodeError> {
        match parsed.cached_result() {
            CachedResult::Text => {
                let text = self.find_string_record(stream, coord)?;
                Ok(CellValue::Text(text))
            }
            other => Ok(self.value_from_result(other, parsed.header.xf)),
        }
    }

    /// Resolve a deferred (template) result, seeking back to the record's
    /// saved position for string results and restoring the cursor after.
    fn resolve_deferred(
        &mut self,
        stream: &mut RecordStream<'_>,
        template: &PendingTemplate,
    ) -> Result<CellValue, SheetDecodeError> {
        match template.result {
            CachedResult::Text => {
                let saved = stream.pos();
                stream
                    .set_pos(template.resume_pos)
                    .map_err(SheetDecodeError::Record)?;
                let text = self.find_string_record(stream, template.coord)?;
                stream.set_pos(saved).map_err(SheetDecodeError::Record)?;
                Ok(CellValue::Text(text))
            }
            other => Ok(self.value_from_result(other, template.xf)),
        }
    }

    fn value_from_result(&self, result: CachedResult, xf: u16) -> CellValue {
        match result {
            CachedResult::Number(value) => self.classify_number(xf, value),
            CachedResult::Bool(value) => CellValue::Boolean(value),
            CachedResult::Error(code) => CellValue::Error(ErrorValue::from_code(code)),
            CachedResult::Empty => CellValue::Text(String::new()),
            CachedResult::Text => CellValue::Text(String::new()),
        }
    }

    /// Scan forward for the STRING record carrying a string formula's
    /// result, attaching its continuations. The record may trail by a few
    /// records; a stream where it is missing (or truncated away) is fatal.
    fn find_string_record(
        &mut self,
        stream: &mut RecordStream<'_>,
        coord: CellCoord,
    ) -> Result<String, SheetDecodeError> {
        let mut skipped = 0usize;
        loop {
            if !stream.has_next() || skipped >= STRING_LOOKAHEAD_CAP {
                return Err(SheetDecodeError::MissingStringRecord(coord.to_a1()));
            }
            let mut record = stream.next_record().map_err(SheetDecodeError::Record)?;
            if record.kind() == RecordKind::String {
                while stream.peek_kind() == Some(RecordKind::Continue) {
                    let cont = stream.next_record().map_err(SheetDecodeError::Record)?;
                    record
                        .push_continuation(cont)
                        .map_err(SheetDecodeError::Record)?;
                }
                return cells::parse_string_record(&record, self.ctx.version, self.ctx.codepage)
                    .map_err(SheetDecodeError::Record);
            }
            skipped += 1;
        }
    }

    fn handle_obj(
        &mut self,
        stream: &mut RecordStream<'_>,
        record: &RawRecord<'_>,
    ) -> Result<(), SheetDecodeError> {
        let header = match objects::parse_obj(record.payload()) {
            Ok(header) => header,
            Err(err) => {
                self.out.warn(format!(
                    "failed to parse OBJ record at offset {}: {err}",
                    record.offset()
                ));
                return Ok(());
            }
        };
        if self.ctx.options.drawings_disabled {
            return Ok(());
        }

        if self.state.pending_mso.is_none() {
            // Some writers emit a CONTINUE record where the drawing record
            // belongs; reconstruct from the stashed one.
            if let Some(stashed) = self.state.stashed_continue.take() {
                self.out
                    .warn("cannot find drawing record; using continue record");
                self.state.pending_mso = Some(stashed);
            } else {
                self.out
                    .warn("object record is not associated with a drawing record; ignoring");
                return Ok(());
            }
        }
        self.state.pending_mso = None;

        match header.kind {
            ObjectKind::Comment => {
                let text = objects::read_object_text(stream, self.ctx.codepage)?;
                self.state
                    .comments
                    .insert(header.object_id, text.unwrap_or_default());
            }
            ObjectKind::Button | ObjectKind::CheckBox => {
                let text = objects::read_object_text(stream, self.ctx.codepage)?;
                self.out.objects.push(SheetObject {
                    kind: header.kind,
                    object_id: header.object_id,
                    text,
                });
            }
            ObjectKind::ComboBox | ObjectKind::Picture | ObjectKind::Chart => {
                self.out.objects.push(SheetObject {
                    kind: header.kind,
                    object_id: header.object_id,
                    text: None,
                });
            }
            ObjectKind::Text => {
                self.out
                    .warn("text objects are not supported; omitting");
                objects::read_object_text(stream, self.ctx.codepage)?;
            }
            ObjectKind::Other(code) => {
                self.out
                    .warn(format!("object type {code:#x} is not supported; omitting"));
            }
        }
        Ok(())
    }

    fn handle_note(&mut self, record: &RawRecord<'_>) {
        if self.ctx.options.drawings_disabled {
            return;
        }
        let note = match objects::parse_note(record, self.ctx.version, self.ctx.codepage) {
            Ok(note) => note,
            Err(err) => {
                self.out.warn(format!(
                    "failed to parse NOTE record at offset {}: {err}",
                    record.offset()
                ));
                return;
            }
        };

        let text = match note.object_id {
            Some(object_id) => match self.state.comments.remove(&object_id) {
                Some(text) => text,
                None => {
                    self.out.warn(format!(
                        "cannot find comment for note id {object_id}; ignoring"
                    ));
                    return;
                }
            },
            None => note.inline_text.unwrap_or_default(),
        };

        let coord = coord_of(note.col, note.row);
        self.out
            .cells
            .entry(coord)
            .or_insert_with(|| Cell {
                coord,
                xf: 0,
                value: CellValue::Blank,
                formula: None,
                comment: None,
            })
            .comment = Some(text);
    }

    fn read_header_footer(&mut self, record: &RawRecord<'_>) -> Option<String> {
        let payload = record.payload();
        if payload.is_empty() {
            return None;
        }
        let result = match self.ctx.version {
            BiffVersion::Biff8 => {
                super::strings::read_unicode_string(payload, self.ctx.codepage).map(|(s, _)| s)
            }
            BiffVersion::Biff7 => {
                super::strings::read_byte_string8(payload, self.ctx.codepage).map(|(s, _)| s)
            }
        };
        match result {
            Ok(text) => Some(text),
            Err(err) => {
                self.out.warn(format!(
                    "failed to parse header/footer record at offset {}: {err}",
                    record.offset()
                ));
                None
            }
        }
    }

    fn handle_setup(&mut self, record: &RawRecord<'_>) {
        let data = record.payload();
        let Some(grbit) = read_u16_opt(data, 10) else {
            self.out.warn(format!(
                "failed to parse SETUP record at offset {}",
                record.offset()
            ));
            return;
        };
        // fNoPls: the setup fields were never initialized by the writer.
        if grbit & 0x0004 != 0 {
            return;
        }
        let header_margin = data
            .get(16..24)
            .and_then(|v| v.try_into().ok().map(f64::from_le_bytes))
            .unwrap_or(0.5);
        let footer_margin = data
            .get(24..32)
            .and_then(|v| v.try_into().ok().map(f64::from_le_bytes))
            .unwrap_or(0.5);
        self.out.settings.page_setup = Some(PageSetup {
            paper_size: read_u16_opt(data, 0).unwrap_or(0),
            scale: read_u16_opt(data, 2).unwrap_or(100),
            fit_width: read_u16_opt(data, 6).unwrap_or(1),
            fit_height: read_u16_opt(data, 8).unwrap_or(1),
            portrait: grbit & 0x0002 != 0,
            header_margin,
            footer_margin,
            copies: read_u16_opt(data, 32).unwrap_or(1),
        });
    }
}

fn coord_of(col: u16, row: u16) -> CellCoord {
    CellCoord::new(u32::from(col), u32::from(row))
}

fn read_u16_opt(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
}

fn read_f64_opt(data: &[u8]) -> Option<f64> {
    data.get(..8)
        .and_then(|v| v.try_into().ok())
        .map(f64::from_le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) struct NoDates;
    impl FormatClassifier for NoDates {
        fn is_date_format(&self, _xf: u16) -> bool {
            false
        }
    }

    pub(crate) struct NoStrings;
    impl SharedStrings for NoStrings {
        fn shared_string(&self, _index: u32) -> Option<&str> {
            None
        }
    }

    fn record(id: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + payload.len());
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn bof() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0600u16.to_le_bytes());
        payload.extend_from_slice(&0x0010u16.to_le_bytes());
        payload.extend_from_slice(&[0u8; 12]);
        record(0x0809, &payload)
    }

    fn eof() -> Vec<u8> {
        record(0x000A, &[])
    }

    fn number_record(col: u16, row: u16, xf: u16, value: f64) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&row.to_le_bytes());
        payload.extend_from_slice(&col.to_le_bytes());
        payload.extend_from_slice(&xf.to_le_bytes());
        payload.extend_from_slice(&value.to_le_bytes());
        record(0x0203, &payload)
    }

    fn decode(stream_bytes: &[u8]) -> Result<DecodedSheet, SheetDecodeError> {
        let mut stream = RecordStream::new(stream_bytes);
        let ctx = SheetDecodeContext {
            version: BiffVersion::Biff8,
            codepage: 1252,
            formats: &NoDates,
            shared_strings: &NoStrings,
            options: DecodeOptions::default(),
        };
        decode_sheet(&mut stream, &ctx)
    }

    #[test]
    fn decodes_a_number_cell() {
        let stream = [bof(), number_record(2, 1, 15, 2.5), eof()].concat();
        let sheet = decode(&stream).unwrap();
        let cell = sheet.cells.get(&CellCoord::new(2, 1)).unwrap();
        assert_eq!(cell.value, CellValue::Number(2.5));
        assert_eq!(cell.xf, 15);
    }

    #[test]
    fn duplicate_cell_warns_and_last_write_wins() {
        let stream = [
            bof(),
            number_record(0, 0, 0, 1.0),
            number_record(0, 0, 0, 2.0),
            eof(),
        ]
        .concat();
        let sheet = decode(&stream).unwrap();
        assert_eq!(
            sheet.cells.get(&CellCoord::new(0, 0)).unwrap().value,
            CellValue::Number(2.0)
        );
        assert!(sheet
            .warnings
            .iter()
            .any(|w| w.contains("already contains data")));
    }

    #[test]
    fn missing_eof_is_fatal() {
        let stream = [bof(), number_record(0, 0, 0, 1.0)].concat();
        assert!(matches!(
            decode(&stream),
            Err(SheetDecodeError::UnbalancedSubstream(_))
        ));
    }

    #[test]
    fn nested_substream_is_skipped() {
        let chart_bof = {
            let mut payload = Vec::new();
            payload.extend_from_slice(&0x0600u16.to_le_bytes());
            payload.extend_from_slice(&0x0020u16.to_le_bytes());
            record(0x0809, &payload)
        };
        let stream = [
            bof(),
            chart_bof,
            // Cell-shaped record inside the nested region must not land in
            // the sheet.
            number_record(5, 5, 0, 9.0),
            eof(),
            number_record(1, 1, 0, 4.0),
            eof(),
        ]
        .concat();
        let sheet = decode(&stream).unwrap();
        assert_eq!(sheet.cells.len(), 1);
        assert!(sheet.cells.contains_key(&CellCoord::new(1, 1)));
    }

    #[test]
    fn unbalanced_nested_substream_is_fatal() {
        let stream = [bof(), bof(), number_record(0, 0, 0, 1.0)].concat();
        assert!(matches!(
            decode(&stream),
            Err(SheetDecodeError::UnbalancedSubstream(_))
        ));
    }

    #[test]
    fn unknown_records_are_ignored() {
        let stream = [bof(), record(0x7777, &[1, 2, 3]), eof()].concat();
        let sheet = decode(&stream).unwrap();
        assert!(sheet.cells.is_empty());
        assert!(sheet.warnings.is_empty());
    }

    #[test]
    fn filepass_is_fatal() {
        let stream = [bof(), record(0x002F, &[0, 0]), eof()].concat();
        assert!(matches!(
            decode(&stream),
            Err(SheetDecodeError::EncryptedStream)
        ));
    }

    #[test]
    fn cf_without_condfmt_is_dropped_with_warning() {
        let stream = [bof(), record(0x01B1, &[1, 5, 0, 0]), eof()].concat();
        let sheet = decode(&stream).unwrap();
        assert!(sheet.conditional_formats.is_empty());
        assert!(sheet.warnings.iter().any(|w| w.contains("no open CONDFMT")));
    }
}
