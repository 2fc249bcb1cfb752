//! Record-level primitives: the opcode registry and the record stream reader.
//!
//! A BIFF stream is a flat sequence of records, each a 2-byte little-endian
//! opcode, a 2-byte little-endian payload length, and that many payload
//! bytes. Some record types overflow the 16-bit length and continue into one
//! or more `CONTINUE` records; whether a trailing `CONTINUE` belongs to the
//! preceding record is the *caller's* call (the sheet decoder knows which
//! record types overflow), so the stream reader never stitches on its own —
//! it exposes `push_continuation` on the record instead.

use std::borrow::Cow;
use std::cell::OnceCell;

/// Hard cap for the assembled size of one logical record.
///
/// A malformed stream can chain an arbitrary number of `CONTINUE` records;
/// without a cap the concatenation is an unbounded allocation.
#[cfg(not(test))]
pub(crate) const MAX_ASSEMBLED_RECORD_BYTES: usize = 16 * 1024 * 1024;
#[cfg(test)]
pub(crate) const MAX_ASSEMBLED_RECORD_BYTES: usize = 1024;

/// Hard cap for the number of physical fragments in one logical record
/// (the initial fragment plus all attached continuations).
#[cfg(not(test))]
pub(crate) const MAX_RECORD_FRAGMENTS: usize = 4096;
#[cfg(test)]
pub(crate) const MAX_RECORD_FRAGMENTS: usize = 64;

/// Semantic tag for a record opcode.
///
/// Unknown opcodes map to [`RecordKind::Unknown`]; they are skipped by the
/// decoder, never treated as an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Bof,
    BofBiff7,
    Eof,
    BoundSheet,
    SupBook,
    ExternSheet,
    Dimension,
    Blank,
    MulBlank,
    Row,
    Note,
    Txo,
    Rk,
    Rk2,
    MulRk,
    Index,
    DbCell,
    Sst,
    ColInfo,
    ExtSst,
    Continue,
    Label,
    RString,
    LabelSst,
    Number,
    Name,
    TabId,
    Array,
    String,
    Formula,
    Formula2,
    SharedFormula,
    Format,
    Xf,
    BoolErr,
    InterfaceHdr,
    SaveRecalc,
    InterfaceEnd,
    Xct,
    Crn,
    DefColWidth,
    DefaultRowHeight,
    WriteAccess,
    WsBool,
    CodePage,
    Dsf,
    FnGroupCount,
    FilterMode,
    AutoFilterInfo,
    AutoFilter,
    Country,
    Protect,
    ScenProtect,
    ObjProtect,
    PrintHeaders,
    Header,
    Footer,
    HCenter,
    VCenter,
    FilePass,
    Setup,
    PrintGridLines,
    GridSet,
    Guts,
    WindowProtect,
    Prot4Rev,
    Prot4RevPass,
    Password,
    RefreshAll,
    Window1,
    Window2,
    Backup,
    HideObj,
    NineteenFour,
    Precision,
    BookBool,
    Font,
    Mms,
    CalcMode,
    CalcCount,
    RefMode,
    Template,
    ObjProj,
    Delta,
    MergedCells,
    Iteration,
    Style,
    UsesElfs,
    VerticalPageBreaks,
    HorizontalPageBreaks,
    Selection,
    HLink,
    Obj,
    MsoDrawing,
    MsoDrawingGroup,
    LeftMargin,
    RightMargin,
    TopMargin,
    BottomMargin,
    ExternName,
    Palette,
    Pls,
    Scl,
    Pane,
    Weird1,
    Sort,
    CondFmt,
    Cf,
    Dv,
    DVal,
    ButtonPropertySet,
    Excel9File,
    // Chart substream records we recognize only to skip them cleanly.
    FontX,
    Ifmt,
    Fbi,
    AlRuns,
    Series,
    SeriesList,
    SBaseRef,
    Unknown,
}

impl RecordKind {
    /// Opcode -> kind. This is the whole registry: a compile-time immutable
    /// table, built once, with no failure mode beyond `Unknown`.
    pub fn from_opcode(opcode: u16) -> RecordKind {
        use RecordKind::*;
        match opcode {
            0x0809 => Bof,
            0x0009 => BofBiff7,
            0x000A => Eof,
            0x0085 => BoundSheet,
            0x01AE => SupBook,
            0x0017 => ExternSheet,
            0x0200 => Dimension,
            0x0201 => Blank,
            0x00BE => MulBlank,
            0x0208 => Row,
            0x001C => Note,
            0x01B6 => Txo,
            0x007E => Rk,
            0x027E => Rk2,
            0x00BD => MulRk,
            0x020B => Index,
            0x00D7 => DbCell,
            0x00FC => Sst,
            0x007D => ColInfo,
            0x00FF => ExtSst,
            0x003C => Continue,
            0x0204 => Label,
            0x00D6 => RString,
            0x00FD => LabelSst,
            0x0203 => Number,
            0x0018 => Name,
            0x013D => TabId,
            0x0221 => Array,
            0x0207 => String,
            0x0406 => Formula,
            0x0006 => Formula2,
            0x04BC => SharedFormula,
            0x041E => Format,
            0x00E0 => Xf,
            0x0205 => BoolErr,
            0x00E1 => InterfaceHdr,
            0x005F => SaveRecalc,
            0x00E2 => InterfaceEnd,
            0x0059 => Xct,
            0x005A => Crn,
            0x0055 => DefColWidth,
            0x0225 => DefaultRowHeight,
            0x005C => WriteAccess,
            0x0081 => WsBool,
            0x0042 => CodePage,
            0x0161 => Dsf,
            0x009C => FnGroupCount,
            0x009B => FilterMode,
            0x009D => AutoFilterInfo,
            0x009E => AutoFilter,
            0x008C => Country,
            0x0012 => Protect,
            0x00DD => ScenProtect,
            0x0063 => ObjProtect,
            0x002A => PrintHeaders,
            0x0014 => Header,
            0x0015 => Footer,
            0x0083 => HCenter,
            0x0084 => VCenter,
            0x002F => FilePass,
            0x00A1 => Setup,
            0x002B => PrintGridLines,
            0x0082 => GridSet,
            0x0080 => Guts,
            0x0019 => WindowProtect,
            0x01AF => Prot4Rev,
            0x01BC => Prot4RevPass,
            0x0013 => Password,
            0x01B7 => RefreshAll,
            0x003D => Window1,
            0x023E => Window2,
            0x0040 => Backup,
            0x008D => HideObj,
            0x0022 => NineteenFour,
            0x000E => Precision,
            0x00DA => BookBool,
            0x0031 => Font,
            0x00C1 => Mms,
            0x000D => CalcMode,
            0x000C => CalcCount,
            0x000F => RefMode,
            0x0060 => Template,
            0x00D3 => ObjProj,
            0x0010 => Delta,
            0x00E5 => MergedCells,
            0x0011 => Iteration,
            0x0293 => Style,
            0x0160 => UsesElfs,
            0x001A => VerticalPageBreaks,
            0x001B => HorizontalPageBreaks,
            0x001D => Selection,
            0x01B8 => HLink,
            0x005D => Obj,
            0x00EC => MsoDrawing,
            0x00EB => MsoDrawingGroup,
            0x0026 => LeftMargin,
            0x0027 => RightMargin,
            0x0028 => TopMargin,
            0x0029 => BottomMargin,
            0x0023 => ExternName,
            0x0092 => Palette,
            0x004D => Pls,
            0x00A0 => Scl,
            0x0041 => Pane,
            0x00EF => Weird1,
            0x0090 => Sort,
            0x01B0 => CondFmt,
            0x01B1 => Cf,
            0x01BE => Dv,
            0x01B2 => DVal,
            0x01BA => ButtonPropertySet,
            0x01C0 => Excel9File,
            0x1026 => FontX,
            0x104E => Ifmt,
            0x1060 => Fbi,
            0x1050 => AlRuns,
            0x1003 => Series,
            0x1016 => SeriesList,
            0x1048 => SBaseRef,
            _ => Unknown,
        }
    }

    /// True for either BOF opcode; a BOF opens a (possibly nested) substream.
    pub fn is_bof(self) -> bool {
        matches!(self, RecordKind::Bof | RecordKind::BofBiff7)
    }
}

/// One record as read from the stream.
///
/// The header is parsed eagerly; the payload stays a borrowed slice of the
/// underlying stream until (and unless) continuations force an assembled
/// copy. Assembly happens at most once and the result is cached; attaching
/// further continuations after the payload has been observed is an error.
#[derive(Debug)]
pub struct RawRecord<'a> {
    offset: usize,
    opcode: u16,
    kind: RecordKind,
    data: &'a [u8],
    continuations: Vec<&'a [u8]>,
    assembled: OnceCell<Vec<u8>>,
}

impl<'a> RawRecord<'a> {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Declared payload length (excluding continuations).
    pub fn declared_len(&self) -> usize {
        self.data.len()
    }

    /// Override the semantic kind of a dodgy record so decoding can continue
    /// (the zero-opcode heuristic).
    pub fn set_kind(&mut self, kind: RecordKind) {
        self.kind = kind;
    }

    /// Attach a trailing `CONTINUE` record's payload to this record.
    ///
    /// The continuation never reaches higher layers as a record of its own.
    pub fn push_continuation(&mut self, continuation: RawRecord<'a>) -> Result<(), String> {
        if self.assembled.get().is_some() {
            return Err(format!(
                "record 0x{:04X} at offset {}: continuation attached after payload assembly",
                self.opcode, self.offset
            ));
        }
        if self.continuations.len() + 1 >= MAX_RECORD_FRAGMENTS {
            return Err(format!(
                "record 0x{:04X} at offset {} exceeds {} continuation fragments",
                self.opcode, self.offset, MAX_RECORD_FRAGMENTS
            ));
        }
        let total: usize = self.data.len()
            + self
                .continuations
                .iter()
                .map(|c| c.len())
                .sum::<usize>()
            + continuation.data.len();
        if total > MAX_ASSEMBLED_RECORD_BYTES {
            return Err(format!(
                "record 0x{:04X} at offset {} exceeds assembled size cap ({} bytes)",
                self.opcode, self.offset, MAX_ASSEMBLED_RECORD_BYTES
            ));
        }
        self.continuations.push(continuation.data);
        Ok(())
    }

    pub fn has_continuations(&self) -> bool {
        !self.continuations.is_empty()
    }

    /// The logical payload: the declared-length bytes followed by every
    /// attached continuation's bytes, in record order.
    ///
    /// Without continuations this is the borrowed slice; with continuations
    /// the concatenation is computed once and cached.
    pub fn payload(&self) -> &[u8] {
        if self.continuations.is_empty() {
            return self.data;
        }
        self.assembled.get_or_init(|| {
            let total = self.data.len() + self.continuations.iter().map(|c| c.len()).sum::<usize>();
            let mut out = Vec::with_capacity(total);
            out.extend_from_slice(self.data);
            for cont in &self.continuations {
                out.extend_from_slice(cont);
            }
            out
        })
    }

    /// Same payload as [`payload`](Self::payload), borrowing when possible.
    pub fn payload_cow(&self) -> Cow<'a, [u8]> {
        if self.continuations.is_empty() {
            Cow::Borrowed(self.data)
        } else {
            Cow::Owned(self.payload().to_vec())
        }
    }

    /// Physical fragment view: the declared payload followed by each
    /// continuation payload. Continued BIFF8 strings need the fragment
    /// boundaries because each continued fragment carries a 1-byte option
    /// flags prefix.
    pub fn fragments(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        std::iter::once(self.data).chain(self.continuations.iter().copied())
    }
}

/// A cursor over the physical records of a stream.
///
/// `next()` consumes one record; `peek()` parses the next header without
/// advancing. The cursor can be saved and restored (`pos`/`set_pos`), which
/// the sheet decoder uses to re-find a trailing STRING record when reverting
/// an unmatched shared-formula template.
#[derive(Debug)]
pub struct RecordStream<'a> {
    stream: &'a [u8],
    pos: usize,
}

impl<'a> RecordStream<'a> {
    pub fn new(stream: &'a [u8]) -> Self {
        Self { stream, pos: 0 }
    }

    pub fn from_offset(stream: &'a [u8], offset: usize) -> Result<Self, String> {
        if offset > stream.len() {
            return Err(format!(
                "record stream offset {offset} out of bounds (len={})",
                stream.len()
            ));
        }
        Ok(Self {
            stream,
            pos: offset,
        })
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) -> Result<(), String> {
        if pos > self.stream.len() {
            return Err(format!(
                "record stream position {pos} out of bounds (len={})",
                self.stream.len()
            ));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn has_next(&self) -> bool {
        self.pos < self.stream.len()
    }

    /// Read the record at the cursor and advance past it.
    pub fn next_record(&mut self) -> Result<RawRecord<'a>, String> {
        let record = self.parse_at(self.pos)?;
        self.pos = self.pos + 4 + record.data.len();
        Ok(record)
    }

    /// Read the record at the cursor without advancing.
    pub fn peek(&self) -> Result<RawRecord<'a>, String> {
        self.parse_at(self.pos)
    }

    /// Kind of the next record, or `None` at end of stream / on a malformed
    /// header.
    pub fn peek_kind(&self) -> Option<RecordKind> {
        if !self.has_next() {
            return None;
        }
        self.peek().ok().map(|r| r.kind())
    }

    fn parse_at(&self, offset: usize) -> Result<RawRecord<'a>, String> {
        let header = self
            .stream
            .get(offset..offset.checked_add(4).ok_or("record offset overflow")?)
            .ok_or_else(|| format!("truncated record header at offset {offset}"))?;
        let opcode = u16::from_le_bytes([header[0], header[1]]);
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;

        let data_start = offset + 4;
        let data_end = data_start
            .checked_add(len)
            .ok_or("record length overflow")?;
        let data = self.stream.get(data_start..data_end).ok_or_else(|| {
            format!(
                "record 0x{opcode:04X} at offset {offset} extends past end of stream (len={}, end={data_end})",
                self.stream.len()
            )
        })?;

        Ok(RawRecord {
            offset,
            opcode,
            kind: RecordKind::from_opcode(opcode),
            data,
            continuations: Vec::new(),
            assembled: OnceCell::new(),
        })
    }
}
