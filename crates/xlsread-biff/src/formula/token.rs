//! The formula bytecode token registry.
//!
//! Token opcodes are non-orthogonal: a classed token is serialized with one
//! of up to three byte values depending on the statically inferred result
//! class of the sub-expression (reference / value / array). The registry
//! records all three codes per logical token (unset slots default to the
//! value-class code) and resolves any of them back to the canonical token.
//!
//! Lookups are plain `match` tables: an immutable mapping fixed at compile
//! time, with no registration side effects.

/// The result class a classed token was encoded with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PtgClass {
    Reference,
    Value,
    Array,
}

/// The raw byte codes of one logical token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TokenCodes {
    pub reference: u8,
    pub value: u8,
    pub array: u8,
}

impl TokenCodes {
    const fn single(code: u8) -> Self {
        Self {
            reference: code,
            value: code,
            array: code,
        }
    }

    const fn classed(reference: u8, value: u8, array: u8) -> Self {
        Self {
            reference,
            value,
            array,
        }
    }

    pub fn for_class(&self, class: PtgClass) -> u8 {
        match class {
            PtgClass::Reference => self.reference,
            PtgClass::Value => self.value,
            PtgClass::Array => self.array,
        }
    }

    pub fn class_of(&self, byte: u8) -> Option<PtgClass> {
        if byte == self.reference {
            Some(PtgClass::Reference)
        } else if byte == self.value {
            Some(PtgClass::Value)
        } else if byte == self.array {
            Some(PtgClass::Array)
        } else {
            None
        }
    }
}

/// Logical formula bytecode operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    // Binary operators.
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Concat,
    LessThan,
    LessEqual,
    Equal,
    GreaterEqual,
    GreaterThan,
    NotEqual,
    Intersection,
    Union,
    Range,
    // Unary operators.
    UnaryPlus,
    UnaryMinus,
    Percent,
    // Operands.
    MissingArg,
    Text,
    Err,
    Bool,
    Integer,
    Double,
    Array,
    NamedRange,
    Ref,
    Area,
    MemArea,
    MemErr,
    RefErr,
    AreaErr,
    RefN,
    AreaN,
    NameX,
    Ref3d,
    Area3d,
    RefErr3d,
    AreaErr3d,
    // Function operators.
    Function,
    FunctionVar,
    MacroCommand,
    // Control.
    Exp,
    Tbl,
    Parenthesis,
    Nlr,
    Attribute,
    Sheet,
    EndSheet,
    MemNoMem,
    MemFunc,
    MemAreaN,
    MemNoMemN,
    Unknown,
}

impl Token {
    /// Every token the registry knows, for exhaustive table checks.
    pub const ALL: &'static [Token] = &[
        Token::Add,
        Token::Subtract,
        Token::Multiply,
        Token::Divide,
        Token::Power,
        Token::Concat,
        Token::LessThan,
        Token::LessEqual,
        Token::Equal,
        Token::GreaterEqual,
        Token::GreaterThan,
        Token::NotEqual,
        Token::Intersection,
        Token::Union,
        Token::Range,
        Token::UnaryPlus,
        Token::UnaryMinus,
        Token::Percent,
        Token::MissingArg,
        Token::Text,
        Token::Err,
        Token::Bool,
        Token::Integer,
        Token::Double,
        Token::Array,
        Token::NamedRange,
        Token::Ref,
        Token::Area,
        Token::MemArea,
        Token::MemErr,
        Token::RefErr,
        Token::AreaErr,
        Token::RefN,
        Token::AreaN,
        Token::NameX,
        Token::Ref3d,
        Token::Area3d,
        Token::RefErr3d,
        Token::AreaErr3d,
        Token::Function,
        Token::FunctionVar,
        Token::MacroCommand,
        Token::Exp,
        Token::Tbl,
        Token::Parenthesis,
        Token::Nlr,
        Token::Attribute,
        Token::Sheet,
        Token::EndSheet,
        Token::MemNoMem,
        Token::MemFunc,
        Token::MemAreaN,
        Token::MemNoMemN,
    ];

    /// The reference/value/array byte codes for this token.
    pub fn codes(self) -> TokenCodes {
        match self {
            Token::Add => TokenCodes::single(0x03),
            Token::Subtract => TokenCodes::single(0x04),
            Token::Multiply => TokenCodes::single(0x05),
            Token::Divide => TokenCodes::single(0x06),
            Token::Power => TokenCodes::single(0x07),
            Token::Concat => TokenCodes::single(0x08),
            Token::LessThan => TokenCodes::single(0x09),
            Token::LessEqual => TokenCodes::single(0x0A),
            Token::Equal => TokenCodes::single(0x0B),
            Token::GreaterEqual => TokenCodes::single(0x0C),
            Token::GreaterThan => TokenCodes::single(0x0D),
            Token::NotEqual => TokenCodes::single(0x0E),
            Token::Intersection => TokenCodes::single(0x0F),
            Token::Union => TokenCodes::single(0x10),
            Token::Range => TokenCodes::single(0x11),
            Token::UnaryPlus => TokenCodes::single(0x12),
            Token::UnaryMinus => TokenCodes::single(0x13),
            Token::Percent => TokenCodes::single(0x14),
            Token::Parenthesis => TokenCodes::single(0x15),
            Token::MissingArg => TokenCodes::single(0x16),
            Token::Text => TokenCodes::single(0x17),
            Token::Nlr => TokenCodes::single(0x18),
            Token::Attribute => TokenCodes::single(0x19),
            Token::Sheet => TokenCodes::single(0x1A),
            Token::EndSheet => TokenCodes::single(0x1B),
            Token::Err => TokenCodes::single(0x1C),
            Token::Bool => TokenCodes::single(0x1D),
            Token::Integer => TokenCodes::single(0x1E),
            Token::Double => TokenCodes::single(0x1F),
            Token::Array => TokenCodes::classed(0x20, 0x40, 0x60),
            Token::Function => TokenCodes::classed(0x21, 0x41, 0x61),
            Token::FunctionVar => TokenCodes::classed(0x22, 0x42, 0x62),
            Token::NamedRange => TokenCodes::classed(0x23, 0x43, 0x63),
            Token::Ref => TokenCodes::classed(0x24, 0x44, 0x64),
            Token::Area => TokenCodes::classed(0x25, 0x45, 0x65),
            Token::MemArea => TokenCodes::classed(0x26, 0x46, 0x66),
            Token::MemErr => TokenCodes::classed(0x27, 0x47, 0x67),
            Token::MemNoMem => TokenCodes::classed(0x28, 0x48, 0x68),
            Token::MemFunc => TokenCodes::classed(0x29, 0x49, 0x69),
            Token::RefErr => TokenCodes::classed(0x2A, 0x4A, 0x6A),
            Token::AreaErr => TokenCodes::classed(0x2B, 0x4B, 0x6B),
            Token::RefN => TokenCodes::classed(0x2C, 0x4C, 0x6C),
            Token::AreaN => TokenCodes::classed(0x2D, 0x4D, 0x6D),
            Token::MemAreaN => TokenCodes::classed(0x2E, 0x4E, 0x6E),
            Token::MemNoMemN => TokenCodes::classed(0x2F, 0x4F, 0x6F),
            Token::MacroCommand => TokenCodes::classed(0x38, 0x58, 0x78),
            Token::NameX => TokenCodes::classed(0x39, 0x59, 0x79),
            Token::Ref3d => TokenCodes::classed(0x3A, 0x5A, 0x7A),
            Token::Area3d => TokenCodes::classed(0x3B, 0x5B, 0x7B),
            Token::RefErr3d => TokenCodes::classed(0x3C, 0x5C, 0x7C),
            Token::AreaErr3d => TokenCodes::classed(0x3D, 0x5D, 0x7D),
            Token::Exp => TokenCodes::single(0x01),
            Token::Tbl => TokenCodes::single(0x02),
            Token::Unknown => TokenCodes::single(0xFF),
        }
    }

    /// Resolve any of a token's raw byte codes back to the canonical token.
    ///
    /// An unmapped byte resolves to [`Token::Unknown`]; unlike unknown
    /// *records*, the parser treats that as a hard decode error, since an
    /// unparseable formula cannot be partially trusted.
    pub fn from_byte(byte: u8) -> Token {
        match byte {
            0x01 => Token::Exp,
            0x02 => Token::Tbl,
            0x03 => Token::Add,
            0x04 => Token::Subtract,
            0x05 => Token::Multiply,
            0x06 => Token::Divide,
            0x07 => Token::Power,
            0x08 => Token::Concat,
            0x09 => Token::LessThan,
            0x0A => Token::LessEqual,
            0x0B => Token::Equal,
            0x0C => Token::GreaterEqual,
            0x0D => Token::GreaterThan,
            0x0E => Token::NotEqual,
            0x0F => Token::Intersection,
            0x10 => Token::Union,
            0x11 => Token::Range,
            0x12 => Token::UnaryPlus,
            0x13 => Token::UnaryMinus,
            0x14 => Token::Percent,
            0x15 => Token::Parenthesis,
            0x16 => Token::MissingArg,
            0x17 => Token::Text,
            0x18 => Token::Nlr,
            0x19 => Token::Attribute,
            0x1A => Token::Sheet,
            0x1B => Token::EndSheet,
            0x1C => Token::Err,
            0x1D => Token::Bool,
            0x1E => Token::Integer,
            0x1F => Token::Double,
            0x20 | 0x40 | 0x60 => Token::Array,
            0x21 | 0x41 | 0x61 => Token::Function,
            0x22 | 0x42 | 0x62 => Token::FunctionVar,
            0x23 | 0x43 | 0x63 => Token::NamedRange,
            0x24 | 0x44 | 0x64 => Token::Ref,
            0x25 | 0x45 | 0x65 => Token::Area,
            0x26 | 0x46 | 0x66 => Token::MemArea,
            0x27 | 0x47 | 0x67 => Token::MemErr,
            0x28 | 0x48 | 0x68 => Token::MemNoMem,
            0x29 | 0x49 | 0x69 => Token::MemFunc,
            0x2A | 0x4A | 0x6A => Token::RefErr,
            0x2B | 0x4B | 0x6B => Token::AreaErr,
            0x2C | 0x4C | 0x6C => Token::RefN,
            0x2D | 0x4D | 0x6D => Token::AreaN,
            0x2E | 0x4E | 0x6E => Token::MemAreaN,
            0x2F | 0x4F | 0x6F => Token::MemNoMemN,
            0x38 | 0x58 | 0x78 => Token::MacroCommand,
            0x39 | 0x59 | 0x79 => Token::NameX,
            0x3A | 0x5A | 0x7A => Token::Ref3d,
            0x3B | 0x5B | 0x7B => Token::Area3d,
            0x3C | 0x5C | 0x7C => Token::RefErr3d,
            0x3D | 0x5D | 0x7D => Token::AreaErr3d,
            _ => Token::Unknown,
        }
    }

    /// Class the raw byte encodes, for classed tokens.
    pub fn class_from_byte(byte: u8) -> PtgClass {
        match byte & 0x60 {
            0x40 => PtgClass::Value,
            0x60 => PtgClass::Array,
            _ => PtgClass::Reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_class_code_resolves_to_the_same_token() {
        for &token in Token::ALL {
            let codes = token.codes();
            assert_eq!(Token::from_byte(codes.reference), token, "{token:?} rc");
            assert_eq!(Token::from_byte(codes.value), token, "{token:?} vc");
            assert_eq!(Token::from_byte(codes.array), token, "{token:?} ac");
        }
    }

    #[test]
    fn single_code_tokens_default_value_and_array_slots() {
        let codes = Token::Add.codes();
        assert_eq!(codes.reference, codes.value);
        assert_eq!(codes.value, codes.array);
    }

    #[test]
    fn unmapped_bytes_resolve_to_unknown() {
        assert_eq!(Token::from_byte(0x00), Token::Unknown);
        assert_eq!(Token::from_byte(0x30), Token::Unknown);
        assert_eq!(Token::from_byte(0x80), Token::Unknown);
        assert_eq!(Token::from_byte(0xFE), Token::Unknown);
    }

    #[test]
    fn class_extraction_matches_code_tables() {
        assert_eq!(Token::class_from_byte(0x24), PtgClass::Reference);
        assert_eq!(Token::class_from_byte(0x44), PtgClass::Value);
        assert_eq!(Token::class_from_byte(0x64), PtgClass::Array);
        let codes = Token::Ref.codes();
        assert_eq!(codes.for_class(PtgClass::Array), 0x64);
        assert_eq!(codes.class_of(0x44), Some(PtgClass::Value));
        assert_eq!(codes.class_of(0x24), Some(PtgClass::Reference));
    }
}
