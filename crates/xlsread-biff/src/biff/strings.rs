//! BIFF string codecs.
//!
//! BIFF7 stores 8-bit ANSI strings interpreted through the workbook code
//! page; BIFF8 stores `XLUnicodeString` / `ShortXLUnicodeString` values
//! (length, option flags, then compressed 8-bit or UTF-16LE characters,
//! optionally followed by rich-text runs and an extension block).
//!
//! When a BIFF8 string spans a `CONTINUE` boundary, the continued fragment
//! starts with a fresh 1-byte option flags prefix (only `fHighByte`
//! matters), so naive payload concatenation corrupts the character data.
//! [`read_unicode_string_fragments`] walks the physical fragments and strips
//! those prefixes.

use std::collections::BTreeSet;
use std::sync::{Mutex, OnceLock};

use encoding_rs::{
    Encoding, BIG5, EUC_KR, GBK, SHIFT_JIS, UTF_8, WINDOWS_1250, WINDOWS_1251, WINDOWS_1252,
    WINDOWS_1253, WINDOWS_1254, WINDOWS_1255, WINDOWS_1256, WINDOWS_1257, WINDOWS_1258,
    WINDOWS_874,
};

pub(crate) const STR_FLAG_HIGH_BYTE: u8 = 0x01;
pub(crate) const STR_FLAG_EXT: u8 = 0x04;
pub(crate) const STR_FLAG_RICH_TEXT: u8 = 0x08;

fn encoding_for_codepage(codepage: u16) -> Option<&'static Encoding> {
    Some(match codepage as u32 {
        874 => WINDOWS_874,
        932 => SHIFT_JIS,
        936 => GBK,
        949 => EUC_KR,
        950 => BIG5,
        1250 => WINDOWS_1250,
        1251 => WINDOWS_1251,
        1252 => WINDOWS_1252,
        1253 => WINDOWS_1253,
        1254 => WINDOWS_1254,
        1255 => WINDOWS_1255,
        1256 => WINDOWS_1256,
        1257 => WINDOWS_1257,
        1258 => WINDOWS_1258,
        65001 => UTF_8,
        _ => return None,
    })
}

/// Decode 8-bit bytes using the workbook code page, falling back to a
/// lossless byte-to-Unicode mapping for code pages `encoding_rs` lacks.
pub(crate) fn decode_ansi(codepage: u16, bytes: &[u8]) -> String {
    if let Some(encoding) = encoding_for_codepage(codepage) {
        let (cow, _, _) = encoding.decode(bytes);
        return cow.into_owned();
    }

    warn_unsupported_codepage(codepage);
    bytes.iter().copied().map(char::from).collect()
}

fn warn_unsupported_codepage(codepage: u16) {
    static WARNED: OnceLock<Mutex<BTreeSet<u16>>> = OnceLock::new();

    let warned = WARNED.get_or_init(|| Mutex::new(BTreeSet::new()));
    let mut warned = match warned.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if warned.insert(codepage) {
        log::warn!("unsupported CODEPAGE {codepage}; decoding 8-bit strings byte-for-byte");
    }
}

/// BIFF7 string with an 8-bit length prefix. Returns the string and the
/// number of payload bytes consumed.
pub(crate) fn read_byte_string8(input: &[u8], codepage: u16) -> Result<(String, usize), String> {
    let (&len, rest) = input
        .split_first()
        .ok_or_else(|| "unexpected end of string".to_string())?;
    let len = len as usize;
    let bytes = rest
        .get(..len)
        .ok_or_else(|| "unexpected end of string".to_string())?;
    Ok((decode_ansi(codepage, bytes), 1 + len))
}

/// BIFF7 string with a 16-bit length prefix.
pub(crate) fn read_byte_string16(input: &[u8], codepage: u16) -> Result<(String, usize), String> {
    let len_bytes = input
        .get(..2)
        .ok_or_else(|| "unexpected end of string".to_string())?;
    let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let bytes = input
        .get(2..2 + len)
        .ok_or_else(|| "unexpected end of string".to_string())?;
    Ok((decode_ansi(codepage, bytes), 2 + len))
}

/// BIFF8 `ShortXLUnicodeString` (8-bit character count).
pub(crate) fn read_short_unicode_string(
    input: &[u8],
    codepage: u16,
) -> Result<(String, usize), String> {
    if input.len() < 2 {
        return Err("unexpected end of string".to_string());
    }
    read_unicode_payload(input, input[0] as usize, input[1], 2, codepage)
}

/// BIFF8 `XLUnicodeString` (16-bit character count).
pub(crate) fn read_unicode_string(input: &[u8], codepage: u16) -> Result<(String, usize), String> {
    if input.len() < 3 {
        return Err("unexpected end of string".to_string());
    }
    let cch = u16::from_le_bytes([input[0], input[1]]) as usize;
    read_unicode_payload(input, cch, input[2], 3, codepage)
}

fn read_unicode_payload(
    input: &[u8],
    cch: usize,
    flags: u8,
    mut offset: usize,
    codepage: u16,
) -> Result<(String, usize), String> {
    let rich_runs = if flags & STR_FLAG_RICH_TEXT != 0 {
        let bytes = input
            .get(offset..offset + 2)
            .ok_or_else(|| "unexpected end of string".to_string())?;
        offset += 2;
        u16::from_le_bytes([bytes[0], bytes[1]]) as usize
    } else {
        0
    };

    let ext_size = if flags & STR_FLAG_EXT != 0 {
        let bytes = input
            .get(offset..offset + 4)
            .ok_or_else(|| "unexpected end of string".to_string())?;
        offset += 4;
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
    } else {
        0
    };

    let is_unicode = flags & STR_FLAG_HIGH_BYTE != 0;
    let char_bytes = if is_unicode {
        cch.checked_mul(2)
            .ok_or_else(|| "string length overflow".to_string())?
    } else {
        cch
    };
    let chars = input
        .get(offset..offset + char_bytes)
        .ok_or_else(|| "unexpected end of string".to_string())?;
    offset += char_bytes;

    let value = if is_unicode {
        decode_utf16le(chars)
    } else {
        decode_ansi(codepage, chars)
    };

    let trailing = rich_runs
        .checked_mul(4)
        .and_then(|rich| rich.checked_add(ext_size))
        .ok_or_else(|| "string trailer length overflow".to_string())?;
    let end = offset
        .checked_add(trailing)
        .ok_or_else(|| "string trailer length overflow".to_string())?;
    if input.len() < end {
        return Err("unexpected end of string".to_string());
    }

    Ok((value, end))
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Reads a BIFF8 `XLUnicodeString` that may span continuation fragments.
///
/// `fragments` are the physical payloads of a logical record (see
/// [`crate::biff::records::RawRecord::fragments`]); `start` is the byte
/// offset of the string header within the first fragment. Each continued
/// fragment's 1-byte option flags prefix is consumed and the `fHighByte`
/// bit re-read, as the compressed/unicode choice may flip mid-string.
pub(crate) fn read_unicode_string_fragments(
    fragments: &[&[u8]],
    start: usize,
    codepage: u16,
) -> Result<String, String> {
    let mut cursor = FragmentCursor::new(fragments, start);
    cursor.read_unicode_string(codepage)
}

/// Reads text carried in a TXO continuation fragment: a 1-byte option flags
/// prefix followed by `cch` characters (possibly spanning further
/// fragments).
pub(crate) fn read_txo_text(
    fragments: &[&[u8]],
    cch: usize,
    codepage: u16,
) -> Result<String, String> {
    let mut cursor = FragmentCursor::new(fragments, 0);
    let flags = cursor.read_u8()?;
    let mut is_unicode = flags & STR_FLAG_HIGH_BYTE != 0;
    cursor.read_chars(cch, &mut is_unicode, codepage)
}

pub(crate) struct FragmentCursor<'a> {
    fragments: &'a [&'a [u8]],
    index: usize,
    offset: usize,
}

impl<'a> FragmentCursor<'a> {
    pub(crate) fn new(fragments: &'a [&'a [u8]], offset: usize) -> Self {
        Self {
            fragments,
            index: 0,
            offset,
        }
    }

    fn remaining_here(&self) -> usize {
        self.fragments
            .get(self.index)
            .map(|f| f.len().saturating_sub(self.offset))
            .unwrap_or(0)
    }

    fn next_fragment(&mut self) -> Result<(), String> {
        self.index += 1;
        self.offset = 0;
        if self.index >= self.fragments.len() {
            return Err("unexpected end of record".to_string());
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, String> {
        loop {
            let frag = self
                .fragments
                .get(self.index)
                .ok_or_else(|| "unexpected end of record".to_string())?;
            if self.offset < frag.len() {
                let b = frag[self.offset];
                self.offset += 1;
                return Ok(b);
            }
            self.next_fragment()?;
        }
    }

    fn read_u16_le(&mut self) -> Result<u16, String> {
        let lo = self.read_u8()?;
        let hi = self.read_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// Advance into the next fragment of a continued string, consuming the
    /// option flags prefix the format inserts there.
    fn next_string_fragment(&mut self, is_unicode: &mut bool) -> Result<(), String> {
        self.next_fragment()?;
        let flags = self.read_u8()?;
        *is_unicode = flags & STR_FLAG_HIGH_BYTE != 0;
        Ok(())
    }

    fn read_string_bytes(&mut self, mut n: usize, is_unicode: &mut bool) -> Result<Vec<u8>, String> {
        let mut out = Vec::with_capacity(n.min(4096));
        while n > 0 {
            if self.remaining_here() == 0 {
                self.next_string_fragment(is_unicode)?;
                continue;
            }
            let take = n.min(self.remaining_here());
            let frag = self.fragments[self.index];
            out.extend_from_slice(&frag[self.offset..self.offset + take]);
            self.offset += take;
            n -= take;
        }
        Ok(out)
    }

    fn skip_string_bytes(&mut self, mut n: usize, is_unicode: &mut bool) -> Result<(), String> {
        while n > 0 {
            if self.remaining_here() == 0 {
                self.next_string_fragment(is_unicode)?;
                continue;
            }
            let take = n.min(self.remaining_here());
            self.offset += take;
            n -= take;
        }
        Ok(())
    }

    fn read_chars(
        &mut self,
        mut remaining: usize,
        is_unicode: &mut bool,
        codepage: u16,
    ) -> Result<String, String> {
        let mut out = String::new();
        while remaining > 0 {
            if self.remaining_here() == 0 {
                self.next_string_fragment(is_unicode)?;
                continue;
            }
            let bytes_per_char = if *is_unicode { 2 } else { 1 };
            let available = self.remaining_here() / bytes_per_char;
            if available == 0 {
                return Err("string continuation split mid-character".to_string());
            }
            let take_chars = remaining.min(available);
            let take_bytes = take_chars * bytes_per_char;
            let frag = self.fragments[self.index];
            let bytes = &frag[self.offset..self.offset + take_bytes];
            self.offset += take_bytes;

            if *is_unicode {
                out.push_str(&decode_utf16le(bytes));
            } else {
                out.push_str(&decode_ansi(codepage, bytes));
            }
            remaining -= take_chars;
        }
        Ok(out)
    }

    pub(crate) fn read_unicode_string(&mut self, codepage: u16) -> Result<String, String> {
        let cch = self.read_u16_le()? as usize;
        let flags = self.read_u8()?;
        let mut is_unicode = flags & STR_FLAG_HIGH_BYTE != 0;

        let rich_runs = if flags & STR_FLAG_RICH_TEXT != 0 {
            let bytes = self.read_string_bytes(2, &mut is_unicode)?;
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        } else {
            0
        };
        let ext_size = if flags & STR_FLAG_EXT != 0 {
            let bytes = self.read_string_bytes(4, &mut is_unicode)?;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        } else {
            0
        };

        let value = self.read_chars(cch, &mut is_unicode, codepage)?;

        let trailing = rich_runs
            .checked_mul(4)
            .and_then(|rich| rich.checked_add(ext_size))
            .ok_or_else(|| "string trailer length overflow".to_string())?;
        self.skip_string_bytes(trailing, &mut is_unicode)?;

        Ok(value)
    }
}
