//! The formula bytecode parser.
//!
//! Token streams are postfix (RPN): operands push nodes, operators pop
//! their operands and push one interior node. The scan is a single
//! left-to-right pass over the byte array with an explicit operand stack.
//! Inline memory sub-expressions declare their own byte length and are
//! parsed by bounded recursion with a fresh stack; the irregular IF
//! construct is handled with a side stack of pending ATTRIBUTE markers.
//!
//! Token layouts are the BIFF8 encodings. Streams written by older BIFF
//! versions use different reference widths and are surfaced as decode
//! errors, which the sheet decoder downgrades to a per-cell warning.

use xlsread_model::CellCoord;

use super::funcs::{self, FUNCTION_ATTRIBUTE};
use super::node::{
    AreaReference, BinaryOp, CellReference, Corner, FunctionCall, IfConstruct, ParseNode,
    SubExpression, UnaryOp, ATTR_CHOOSE, ATTR_GOTO, ATTR_IF, ATTR_SUM, COL_INDEX_MASK,
    COL_RELATIVE_BIT, ROW_RELATIVE_BIT,
};
use super::token::{PtgClass, Token};
use super::FormulaError;

/// Recursion limit for nested inline sub-expressions. Depth is data-bounded
/// (each level consumes at least the sub-expression header), so this only
/// guards pathological streams.
const MAX_SUBEXPR_DEPTH: usize = 64;

/// Parse a token byte array into a tree.
///
/// `base` is the cell owning the formula; relative-offset reference tokens
/// (the shared-formula RefN/AreaN forms) resolve against it. `codepage`
/// decodes compressed 8-bit string literals.
pub fn parse_tokens(rgce: &[u8], base: CellCoord, codepage: u16) -> Result<ParseNode, FormulaError> {
    let mut scanner = TokenScanner {
        data: rgce,
        pos: 0,
        base,
        codepage,
        depth: 0,
    };
    let mut stack = scanner.parse_sub_expression(rgce.len())?;
    match stack.len() {
        1 => Ok(stack.remove(0)),
        residual => Err(FormulaError::ResidualStack(residual)),
    }
}

struct PendingIf {
    w: u16,
    gotos: Vec<u16>,
}

struct TokenScanner<'a> {
    data: &'a [u8],
    pos: usize,
    base: CellCoord,
    codepage: u16,
    depth: usize,
}

impl<'a> TokenScanner<'a> {
    fn parse_sub_expression(&mut self, len: usize) -> Result<Vec<ParseNode>, FormulaError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(FormulaError::Truncated)?;

        let mut stack: Vec<ParseNode> = Vec::new();
        let mut if_stack: Vec<PendingIf> = Vec::new();

        while self.pos < end {
            let byte = self.data[self.pos];
            self.pos += 1;

            let token = Token::from_byte(byte);
            let class = Token::class_from_byte(byte);

            match token {
                Token::Unknown => return Err(FormulaError::UnrecognizedToken(byte)),
                // Shared/array pointers and data-table markers are resolved
                // by the sheet decoder before token parsing.
                Token::Exp | Token::Tbl => return Err(FormulaError::UnsupportedToken(byte)),
                Token::Array | Token::MacroCommand | Token::Nlr | Token::Sheet | Token::EndSheet => {
                    return Err(FormulaError::UnsupportedToken(byte))
                }

                Token::Integer => {
                    let value = self.read_u16()?;
                    stack.push(ParseNode::Integer(value));
                }
                Token::Double => {
                    let bytes: [u8; 8] = self.take(8)?.try_into().unwrap_or_default();
                    stack.push(ParseNode::Number(f64::from_le_bytes(bytes)));
                }
                Token::Bool => {
                    let value = self.read_u8()?;
                    stack.push(ParseNode::Bool(value != 0));
                }
                Token::Err => {
                    let code = self.read_u8()?;
                    stack.push(ParseNode::ErrValue(code));
                }
                Token::MissingArg => stack.push(ParseNode::MissingArg),
                Token::Text => stack.push(self.read_string_operand()?),

                Token::Ref => {
                    let r = self.read_cell_ref(class, false)?;
                    stack.push(ParseNode::Ref(r));
                }
                Token::RefN => {
                    let r = self.read_cell_ref(class, true)?;
                    stack.push(ParseNode::Ref(r));
                }
                Token::RefErr => {
                    let raw: [u8; 4] = self.take(4)?.try_into().unwrap_or_default();
                    stack.push(ParseNode::RefErr { class, raw });
                }
                Token::Area => {
                    let a = self.read_area_ref(class, false)?;
                    stack.push(ParseNode::Area(a));
                }
                Token::AreaN => {
                    let a = self.read_area_ref(class, true)?;
                    stack.push(ParseNode::Area(a));
                }
                Token::AreaErr => {
                    let raw: [u8; 8] = self.take(8)?.try_into().unwrap_or_default();
                    stack.push(ParseNode::AreaErr { class, raw });
                }
                Token::Ref3d => {
                    let ixti = self.read_u16()?;
                    let r = self.read_cell_ref(class, false)?;
                    stack.push(ParseNode::Ref3d { ixti, r });
                }
                Token::Area3d => {
                    let ixti = self.read_u16()?;
                    let a = self.read_area_ref(class, false)?;
                    stack.push(ParseNode::Area3d { ixti, a });
                }
                Token::RefErr3d => {
                    let raw: [u8; 6] = self.take(6)?.try_into().unwrap_or_default();
                    stack.push(ParseNode::RefErr3d { class, raw });
                }
                Token::AreaErr3d => {
                    let raw: [u8; 10] = self.take(10)?.try_into().unwrap_or_default();
                    stack.push(ParseNode::AreaErr3d { class, raw });
                }
                Token::NamedRange => {
                    let raw: [u8; 6] = self.take(6)?.try_into().unwrap_or_default();
                    let index = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                    stack.push(ParseNode::Name { class, index, raw });
                }
                Token::NameX => {
                    let raw: [u8; 6] = self.take(6)?.try_into().unwrap_or_default();
                    let ixti = u16::from_le_bytes([raw[0], raw[1]]);
                    let index = u16::from_le_bytes([raw[2], raw[3]]);
                    stack.push(ParseNode::NameX {
                        class,
                        ixti,
                        index,
                        raw,
                    });
                }

                Token::UnaryPlus => push_unary(&mut stack, UnaryOp::Plus)?,
                Token::UnaryMinus => push_unary(&mut stack, UnaryOp::Minus)?,
                Token::Percent => push_unary(&mut stack, UnaryOp::Percent)?,
                Token::Parenthesis => {
                    let inner = stack.pop().ok_or(FormulaError::StackUnderflow)?;
                    stack.push(ParseNode::Paren(Box::new(inner)));
                }

                Token::Add
                | Token::Subtract
                | Token::Multiply
                | Token::Divide
                | Token::Power
                | Token::Concat
                | Token::LessThan
                | Token::LessEqual
                | Token::Equal
                | Token::GreaterEqual
                | Token::GreaterThan
                | Token::NotEqual
                | Token::Intersection
                | Token::Union
                | Token::Range => {
                    // `from_token` covers every arm above.
                    let op = BinaryOp::from_token(token).ok_or(FormulaError::UnsupportedToken(byte))?;
                    let rhs = stack.pop().ok_or(FormulaError::StackUnderflow)?;
                    let lhs = stack.pop().ok_or(FormulaError::StackUnderflow)?;
                    stack.push(ParseNode::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    });
                }

                Token::Attribute => {
                    let grbit = self.read_u8()?;
                    let w = self.read_u16()?;
                    if grbit & ATTR_CHOOSE != 0 {
                        // Jump table for the optimized CHOOSE form; offsets
                        // are evaluator hints only.
                        self.take((w as usize).saturating_mul(2))?;
                    } else if grbit & ATTR_SUM != 0 {
                        let operand = stack.pop().ok_or(FormulaError::StackUnderflow)?;
                        stack.push(ParseNode::AttrSum {
                            w,
                            operand: Box::new(operand),
                        });
                    } else if grbit & ATTR_IF != 0 {
                        if_stack.push(PendingIf { w, gotos: Vec::new() });
                    } else if grbit & ATTR_GOTO != 0 {
                        if let Some(pending) = if_stack.last_mut() {
                            pending.gotos.push(w);
                        }
                    }
                    // Remaining attribute kinds (space, semicolon, volatile)
                    // carry no operands.
                }

                Token::Function => {
                    let id = self.read_u16()?;
                    let argc =
                        funcs::fixed_arity(id).ok_or(FormulaError::UnknownFunction(id))?;
                    let args = pop_args(&mut stack, usize::from(argc))?;
                    stack.push(ParseNode::Call(FunctionCall {
                        class,
                        id,
                        variable: false,
                        args,
                    }));
                }
                Token::FunctionVar => {
                    let argc = usize::from(self.read_u8()? & 0x7F);
                    let id = self.read_u16()?;
                    let args = pop_args(&mut stack, argc)?;
                    if id == FUNCTION_ATTRIBUTE {
                        // The branch token of the IF construct: attach the
                        // operand list to the most recently opened marker.
                        let pending = if_stack.pop().unwrap_or(PendingIf {
                            w: 0,
                            gotos: Vec::new(),
                        });
                        stack.push(ParseNode::If(IfConstruct {
                            class,
                            operands: args,
                            if_w: Some(pending.w),
                            goto_ws: pending.gotos,
                        }));
                    } else {
                        if funcs::function_name(id).is_none() {
                            log::warn!("unmapped function id {id} in formula bytecode");
                        }
                        stack.push(ParseNode::Call(FunctionCall {
                            class,
                            id,
                            variable: true,
                            args,
                        }));
                    }
                }

                Token::MemArea | Token::MemErr | Token::MemNoMem => {
                    let node = self.read_sub_expression(token, class, 4)?;
                    stack.push(node);
                }
                Token::MemFunc | Token::MemAreaN | Token::MemNoMemN => {
                    let node = self.read_sub_expression(token, class, 0)?;
                    stack.push(node);
                }
            }
        }

        if self.pos != end {
            return Err(FormulaError::Truncated);
        }

        Ok(stack)
    }

    /// An inline sub-expression: swap in a fresh stack, scan the declared
    /// byte range, and collect the resulting nodes in stack order.
    fn read_sub_expression(
        &mut self,
        token: Token,
        class: PtgClass,
        prefix_len: usize,
    ) -> Result<ParseNode, FormulaError> {
        if self.depth >= MAX_SUBEXPR_DEPTH {
            return Err(FormulaError::SubExpressionDepth);
        }
        let prefix = self.take(prefix_len)?.to_vec();
        let cce = self.read_u16()? as usize;

        self.depth += 1;
        let items = self.parse_sub_expression(cce)?;
        self.depth -= 1;

        Ok(ParseNode::SubExpr(SubExpression {
            token,
            class,
            prefix,
            items,
        }))
    }

    fn read_string_operand(&mut self) -> Result<ParseNode, FormulaError> {
        // String literals are short unicode strings; keep the raw payload
        // alongside the decoded value so re-serialization is byte-exact.
        let rest = self.data.get(self.pos..).ok_or(FormulaError::Truncated)?;
        let (value, consumed) =
            crate::biff::strings::read_short_unicode_string(rest, self.codepage)
                .map_err(|_| FormulaError::Truncated)?;
        let raw = rest[..consumed].to_vec();
        self.pos += consumed;
        Ok(ParseNode::Text { value, raw })
    }

    fn read_cell_ref(
        &mut self,
        class: PtgClass,
        shared_offset: bool,
    ) -> Result<CellReference, FormulaError> {
        let raw: [u8; 4] = self.take(4)?.try_into().unwrap_or_default();
        let row_field = u16::from_le_bytes([raw[0], raw[1]]);
        let col_field = u16::from_le_bytes([raw[2], raw[3]]);
        let (col, row, col_relative, row_relative) =
            self.resolve_ref_fields(row_field, col_field, shared_offset);
        Ok(CellReference {
            class,
            col,
            row,
            col_relative,
            row_relative,
            shared_offset,
            invalid: false,
            raw,
        })
    }

    fn read_area_ref(
        &mut self,
        class: PtgClass,
        shared_offset: bool,
    ) -> Result<AreaReference, FormulaError> {
        let raw: [u8; 8] = self.take(8)?.try_into().unwrap_or_default();
        let row1 = u16::from_le_bytes([raw[0], raw[1]]);
        let row2 = u16::from_le_bytes([raw[2], raw[3]]);
        let col1 = u16::from_le_bytes([raw[4], raw[5]]);
        let col2 = u16::from_le_bytes([raw[6], raw[7]]);

        let (fc, fr, fcr, frr) = self.resolve_ref_fields(row1, col1, shared_offset);
        let (lc, lr, lcr, lrr) = self.resolve_ref_fields(row2, col2, shared_offset);
        Ok(AreaReference {
            class,
            first: Corner {
                col: fc,
                row: fr,
                col_relative: fcr,
                row_relative: frr,
            },
            last: Corner {
                col: lc,
                row: lr,
                col_relative: lcr,
                row_relative: lrr,
            },
            shared_offset,
            invalid: false,
            raw,
        })
    }

    /// Decode one (row, col+flags) field pair. In the shared-offset forms a
    /// relative axis stores a signed offset from the base cell (16-bit for
    /// rows, 8-bit for columns), wrapping at the grid edges.
    fn resolve_ref_fields(
        &self,
        row_field: u16,
        col_field: u16,
        shared_offset: bool,
    ) -> (u32, u32, bool, bool) {
        let row_relative = col_field & ROW_RELATIVE_BIT != 0;
        let col_relative = col_field & COL_RELATIVE_BIT != 0;

        if !shared_offset {
            return (
                u32::from(col_field & COL_INDEX_MASK),
                u32::from(row_field),
                col_relative,
                row_relative,
            );
        }

        let row = if row_relative {
            (i64::from(self.base.row) + i64::from(row_field as i16)).rem_euclid(0x10000) as u32
        } else {
            u32::from(row_field)
        };
        let col = if col_relative {
            let offset = (col_field & 0x00FF) as u8 as i8;
            (i64::from(self.base.col) + i64::from(offset)).rem_euclid(0x4000) as u32
        } else {
            u32::from(col_field & COL_INDEX_MASK)
        };
        (col, row, col_relative, row_relative)
    }

    fn read_u8(&mut self) -> Result<u8, FormulaError> {
        let byte = *self.data.get(self.pos).ok_or(FormulaError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, FormulaError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FormulaError> {
        let end = self.pos.checked_add(n).ok_or(FormulaError::Truncated)?;
        let out = self.data.get(self.pos..end).ok_or(FormulaError::Truncated)?;
        self.pos = end;
        Ok(out)
    }
}

fn push_unary(stack: &mut Vec<ParseNode>, op: UnaryOp) -> Result<(), FormulaError> {
    let operand = stack.pop().ok_or(FormulaError::StackUnderflow)?;
    stack.push(ParseNode::Unary {
        op,
        operand: Box::new(operand),
    });
    Ok(())
}

fn pop_args(stack: &mut Vec<ParseNode>, argc: usize) -> Result<Vec<ParseNode>, FormulaError> {
    if stack.len() < argc {
        return Err(FormulaError::StackUnderflow);
    }
    Ok(stack.split_off(stack.len() - argc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CP: u16 = 1252;

    fn base() -> CellCoord {
        CellCoord::new(0, 0)
    }

    fn push_num(out: &mut Vec<u8>, value: f64) {
        out.push(0x1F);
        out.extend_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn rpn_add_round_trips() {
        let mut rgce = Vec::new();
        push_num(&mut rgce, 3.0);
        push_num(&mut rgce, 4.0);
        rgce.push(0x03); // add

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "3+4");
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn residual_stack_of_two_is_fatal() {
        let mut rgce = Vec::new();
        push_num(&mut rgce, 1.0);
        push_num(&mut rgce, 2.0);
        assert!(matches!(
            parse_tokens(&rgce, base(), CP),
            Err(FormulaError::ResidualStack(2))
        ));
    }

    #[test]
    fn empty_stream_is_fatal() {
        assert!(matches!(
            parse_tokens(&[], base(), CP),
            Err(FormulaError::ResidualStack(0))
        ));
    }

    #[test]
    fn unrecognized_token_byte_is_fatal() {
        assert!(matches!(
            parse_tokens(&[0x30], base(), CP),
            Err(FormulaError::UnrecognizedToken(0x30))
        ));
    }

    #[test]
    fn operator_without_operands_underflows() {
        assert!(matches!(
            parse_tokens(&[0x03], base(), CP),
            Err(FormulaError::StackUnderflow)
        ));
    }

    #[test]
    fn cell_ref_renders_and_round_trips() {
        // A2, both axes relative.
        let mut rgce = vec![0x24];
        rgce.extend_from_slice(&1u16.to_le_bytes());
        rgce.extend_from_slice(&(0u16 | 0x4000 | 0x8000).to_le_bytes());

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "A2");
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn absolute_ref_keeps_dollar_markers() {
        let mut rgce = vec![0x44];
        rgce.extend_from_slice(&4u16.to_le_bytes());
        rgce.extend_from_slice(&2u16.to_le_bytes());

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "$C$5");
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn shared_offset_ref_resolves_against_base() {
        // RefN with row offset -1, col offset +2, both relative.
        let mut rgce = vec![0x2C];
        rgce.extend_from_slice(&(-1i16 as u16).to_le_bytes());
        let col_field = (2u16 & 0x00FF) | 0x4000 | 0x8000;
        rgce.extend_from_slice(&col_field.to_le_bytes());

        let tree = parse_tokens(&rgce, CellCoord::new(3, 5), CP).unwrap();
        assert_eq!(tree.to_text(), "F5");
        // Offsets are position-independent, so the bytes are unchanged.
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn area_round_trips() {
        // B2:C4 all-relative.
        let mut rgce = vec![0x25];
        rgce.extend_from_slice(&1u16.to_le_bytes());
        rgce.extend_from_slice(&3u16.to_le_bytes());
        rgce.extend_from_slice(&(1u16 | 0xC000).to_le_bytes());
        rgce.extend_from_slice(&(2u16 | 0xC000).to_le_bytes());

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "B2:C4");
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn fixed_arity_function_round_trips() {
        let mut rgce = Vec::new();
        push_num(&mut rgce, 9.0);
        rgce.push(0x41); // value-class FUNCTION
        rgce.extend_from_slice(&20u16.to_le_bytes()); // SQRT

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "SQRT(9)");
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn unknown_fixed_function_is_fatal() {
        let mut rgce = Vec::new();
        push_num(&mut rgce, 9.0);
        rgce.push(0x21);
        rgce.extend_from_slice(&0x7001u16.to_le_bytes());
        assert!(matches!(
            parse_tokens(&rgce, base(), CP),
            Err(FormulaError::UnknownFunction(0x7001))
        ));
    }

    #[test]
    fn variable_arity_function_round_trips() {
        let mut rgce = Vec::new();
        push_num(&mut rgce, 1.0);
        push_num(&mut rgce, 2.0);
        push_num(&mut rgce, 3.0);
        rgce.push(0x42);
        rgce.push(3); // argc
        rgce.extend_from_slice(&4u16.to_le_bytes()); // SUM

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "SUM(1,2,3)");
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn string_operand_round_trips() {
        let mut rgce = vec![0x17, 2, 0];
        rgce.extend_from_slice(b"hi");

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "\"hi\"");
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn attr_sum_round_trips() {
        let mut rgce = Vec::new();
        push_num(&mut rgce, 5.0);
        rgce.push(0x19);
        rgce.push(ATTR_SUM);
        rgce.extend_from_slice(&0u16.to_le_bytes());

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "SUM(5)");
        assert_eq!(tree.to_bytes(), rgce);
    }

    /// Build the encoding of `IF(cond, t, f)` with operands given as their
    /// serialized bytes, using the writer's offset rules.
    fn encode_if(operands: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&operands[0]);
        out.push(0x19);
        out.push(ATTR_IF);
        out.extend_from_slice(&((operands[1].len() + 3) as u16).to_le_bytes());
        for (i, bytes) in operands.iter().enumerate().skip(1) {
            out.extend_from_slice(bytes);
            let rest: usize = operands[i + 1..].iter().map(|b| b.len() + 3).sum();
            out.push(0x19);
            out.push(ATTR_GOTO);
            out.extend_from_slice(&((rest + 3) as u16).to_le_bytes());
        }
        out.push(0x42);
        out.push(operands.len() as u8);
        out.extend_from_slice(&FUNCTION_ATTRIBUTE.to_le_bytes());
        out
    }

    #[test]
    fn if_construct_round_trips_and_renders() {
        let mut cond = Vec::new();
        push_num(&mut cond, 1.0);
        let mut t = Vec::new();
        push_num(&mut t, 2.0);
        let mut f = Vec::new();
        push_num(&mut f, 3.0);

        let rgce = encode_if(&[cond, t, f]);
        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "IF(1,2,3)");
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn nested_if_constructs_attach_lifo() {
        let mut inner_cond = Vec::new();
        push_num(&mut inner_cond, 9.0);
        let mut inner_t = Vec::new();
        push_num(&mut inner_t, 8.0);
        let inner = encode_if(&[inner_cond, inner_t]);

        let mut outer_cond = Vec::new();
        push_num(&mut outer_cond, 1.0);
        let mut outer_f = Vec::new();
        push_num(&mut outer_f, 0.0);
        let rgce = encode_if(&[outer_cond, inner, outer_f]);

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "IF(1,IF(9,8),0)");
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn mem_func_sub_expression_round_trips() {
        // MEM_FUNC wrapping a single area operand.
        let mut body = vec![0x25];
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&(0u16 | 0xC000).to_le_bytes());
        body.extend_from_slice(&(0u16 | 0xC000).to_le_bytes());

        let mut rgce = vec![0x29];
        rgce.extend_from_slice(&(body.len() as u16).to_le_bytes());
        rgce.extend_from_slice(&body);

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "A1:A2");
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn mem_area_carries_reserved_prefix() {
        let mut body = vec![0x24];
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&(0u16 | 0xC000).to_le_bytes());

        let mut rgce = vec![0x26];
        rgce.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        rgce.extend_from_slice(&(body.len() as u16).to_le_bytes());
        rgce.extend_from_slice(&body);

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn sub_expression_longer_than_stream_is_truncated() {
        let mut rgce = vec![0x29];
        rgce.extend_from_slice(&50u16.to_le_bytes());
        push_num(&mut rgce, 1.0);
        assert!(matches!(
            parse_tokens(&rgce, base(), CP),
            Err(FormulaError::Truncated)
        ));
    }

    #[test]
    fn parenthesis_preserved() {
        let mut rgce = Vec::new();
        push_num(&mut rgce, 1.0);
        push_num(&mut rgce, 2.0);
        rgce.push(0x03);
        rgce.push(0x15); // paren
        push_num(&mut rgce, 3.0);
        rgce.push(0x05); // multiply

        let tree = parse_tokens(&rgce, base(), CP).unwrap();
        assert_eq!(tree.to_text(), "(1+2)*3");
        assert_eq!(tree.to_bytes(), rgce);
    }

    #[test]
    fn shift_then_serialize_rebases_relative_refs() {
        // A1+1 anchored at A1.
        let mut rgce = vec![0x24];
        rgce.extend_from_slice(&0u16.to_le_bytes());
        rgce.extend_from_slice(&(0u16 | 0xC000).to_le_bytes());
        rgce.push(0x1E);
        rgce.extend_from_slice(&1u16.to_le_bytes());
        rgce.push(0x03);

        let mut tree = parse_tokens(&rgce, base(), CP).unwrap();
        tree.shift_relative(0, 2);
        assert_eq!(tree.to_text(), "A3+1");

        let rebased = tree.to_bytes();
        let reparsed = parse_tokens(&rebased, CellCoord::new(0, 2), CP).unwrap();
        assert_eq!(reparsed.to_text(), "A3+1");
    }
}
