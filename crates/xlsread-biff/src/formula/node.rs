//! The formula parse tree.
//!
//! Leaves hold operand values or reference coordinates; interior nodes hold
//! an operator or call tag with owned children. Ownership is strictly
//! hierarchical. The tree supports:
//!
//! - rendering to formula text,
//! - re-serialization to token bytes (byte-identical to the input for any
//!   tree the parser produced — required for lossless copy of unmodified
//!   formulas),
//! - shifting every relative reference by a (column, row) delta (shared
//!   formula materialization and row/column insert/remove adjustment),
//! - rewriting external-sheet indices after sheets are inserted, removed or
//!   renamed, and validating that 3-D references remain resolvable.

use xlsread_model::{col_to_name, DefinedNames, ExternalSheets, MAX_COL, MAX_ROW};

use super::funcs::{self, FUNCTION_ATTRIBUTE};
use super::token::{PtgClass, Token};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
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
}

impl BinaryOp {
    pub(crate) fn from_token(token: Token) -> Option<BinaryOp> {
        Some(match token {
            Token::Add => BinaryOp::Add,
            Token::Subtract => BinaryOp::Subtract,
            Token::Multiply => BinaryOp::Multiply,
            Token::Divide => BinaryOp::Divide,
            Token::Power => BinaryOp::Power,
            Token::Concat => BinaryOp::Concat,
            Token::LessThan => BinaryOp::LessThan,
            Token::LessEqual => BinaryOp::LessEqual,
            Token::Equal => BinaryOp::Equal,
            Token::GreaterEqual => BinaryOp::GreaterEqual,
            Token::GreaterThan => BinaryOp::GreaterThan,
            Token::NotEqual => BinaryOp::NotEqual,
            Token::Intersection => BinaryOp::Intersection,
            Token::Union => BinaryOp::Union,
            Token::Range => BinaryOp::Range,
            _ => return None,
        })
    }

    fn token(self) -> Token {
        match self {
            BinaryOp::Add => Token::Add,
            BinaryOp::Subtract => Token::Subtract,
            BinaryOp::Multiply => Token::Multiply,
            BinaryOp::Divide => Token::Divide,
            BinaryOp::Power => Token::Power,
            BinaryOp::Concat => Token::Concat,
            BinaryOp::LessThan => Token::LessThan,
            BinaryOp::LessEqual => Token::LessEqual,
            BinaryOp::Equal => Token::Equal,
            BinaryOp::GreaterEqual => Token::GreaterEqual,
            BinaryOp::GreaterThan => Token::GreaterThan,
            BinaryOp::NotEqual => Token::NotEqual,
            BinaryOp::Intersection => Token::Intersection,
            BinaryOp::Union => Token::Union,
            BinaryOp::Range => Token::Range,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Power => "^",
            BinaryOp::Concat => "&",
            BinaryOp::LessThan => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Equal => "=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::NotEqual => "<>",
            BinaryOp::Intersection => " ",
            BinaryOp::Union => ",",
            BinaryOp::Range => ":",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Percent,
}

impl UnaryOp {
    fn token(self) -> Token {
        match self {
            UnaryOp::Plus => Token::UnaryPlus,
            UnaryOp::Minus => Token::UnaryMinus,
            UnaryOp::Percent => Token::Percent,
        }
    }
}

/// A single-cell reference operand.
///
/// `col`/`row` are the resolved absolute coordinates. For the
/// position-dependent encoding (`shared_offset`, the RefN form used by
/// shared-formula templates) the raw wire fields store offsets from the
/// owning cell, so they survive rebasing unchanged; the resolved coordinates
/// are recomputed instead.
#[derive(Clone, Debug, PartialEq)]
pub struct CellReference {
    pub class: PtgClass,
    pub col: u32,
    pub row: u32,
    pub col_relative: bool,
    pub row_relative: bool,
    pub shared_offset: bool,
    /// Shifted out of the addressable grid; serializes as a reference error.
    pub invalid: bool,
    pub(crate) raw: [u8; 4],
}

#[derive(Clone, Debug, PartialEq)]
pub struct AreaReference {
    pub class: PtgClass,
    pub first: Corner,
    pub last: Corner,
    pub shared_offset: bool,
    pub invalid: bool,
    pub(crate) raw: [u8; 8],
}

/// One corner of an area reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Corner {
    pub col: u32,
    pub row: u32,
    pub col_relative: bool,
    pub row_relative: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCall {
    pub class: PtgClass,
    pub id: u16,
    /// Encoded with the variable-arity token form.
    pub variable: bool,
    pub args: Vec<ParseNode>,
}

/// The irregular IF construct.
///
/// `operands[0]` is the condition; the remainder are the branches. The
/// captured ATTRIBUTE offsets are re-emitted verbatim so unmodified
/// constructs round-trip byte-identically; freshly built nodes recompute
/// them.
#[derive(Clone, Debug, PartialEq)]
pub struct IfConstruct {
    pub class: PtgClass,
    pub operands: Vec<ParseNode>,
    pub if_w: Option<u16>,
    pub goto_ws: Vec<u16>,
}

/// An inline memory sub-expression (MEM_FUNC / MEM_AREA and relatives).
#[derive(Clone, Debug, PartialEq)]
pub struct SubExpression {
    pub token: Token,
    pub class: PtgClass,
    /// Reserved bytes between the opcode and the length field (MEM_AREA
    /// carries four, MEM_FUNC none).
    pub prefix: Vec<u8>,
    pub items: Vec<ParseNode>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParseNode {
    Integer(u16),
    Number(f64),
    Text { value: String, raw: Vec<u8> },
    Bool(bool),
    ErrValue(u8),
    MissingArg,
    Ref(CellReference),
    Area(AreaReference),
    Ref3d { ixti: u16, r: CellReference },
    Area3d { ixti: u16, a: AreaReference },
    RefErr { class: PtgClass, raw: [u8; 4] },
    AreaErr { class: PtgClass, raw: [u8; 8] },
    RefErr3d { class: PtgClass, raw: [u8; 6] },
    AreaErr3d { class: PtgClass, raw: [u8; 10] },
    Name { class: PtgClass, index: u32, raw: [u8; 6] },
    NameX { class: PtgClass, ixti: u16, index: u16, raw: [u8; 6] },
    Unary { op: UnaryOp, operand: Box<ParseNode> },
    Binary { op: BinaryOp, lhs: Box<ParseNode>, rhs: Box<ParseNode> },
    Paren(Box<ParseNode>),
    Call(FunctionCall),
    AttrSum { w: u16, operand: Box<ParseNode> },
    If(IfConstruct),
    SubExpr(SubExpression),
}

/// Optional resolvers used when rendering formula text. Unresolvable
/// references fall back to stable placeholder names.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub extern_sheets: Option<&'a dyn ExternalSheets>,
    pub names: Option<&'a dyn DefinedNames>,
}

impl Default for RenderContext<'_> {
    fn default() -> Self {
        Self {
            extern_sheets: None,
            names: None,
        }
    }
}

impl ParseNode {
    /// Serialize the tree back to token bytes (postfix order).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            ParseNode::Integer(value) => {
                out.push(Token::Integer.codes().value);
                out.extend_from_slice(&value.to_le_bytes());
            }
            ParseNode::Number(value) => {
                out.push(Token::Double.codes().value);
                out.extend_from_slice(&value.to_le_bytes());
            }
            ParseNode::Text { raw, .. } => {
                out.push(Token::Text.codes().value);
                out.extend_from_slice(raw);
            }
            ParseNode::Bool(value) => {
                out.push(Token::Bool.codes().value);
                out.push(u8::from(*value));
            }
            ParseNode::ErrValue(code) => {
                out.push(Token::Err.codes().value);
                out.push(*code);
            }
            ParseNode::MissingArg => out.push(Token::MissingArg.codes().value),
            ParseNode::Ref(r) => write_ref(out, r),
            ParseNode::Area(a) => write_area(out, a),
            ParseNode::Ref3d { ixti, r } => {
                if r.invalid {
                    out.push(Token::RefErr3d.codes().for_class(r.class));
                    out.extend_from_slice(&ixti.to_le_bytes());
                    out.extend_from_slice(&r.raw);
                } else {
                    out.push(Token::Ref3d.codes().for_class(r.class));
                    out.extend_from_slice(&ixti.to_le_bytes());
                    write_ref_fields(out, r);
                }
            }
            ParseNode::Area3d { ixti, a } => {
                if a.invalid {
                    out.push(Token::AreaErr3d.codes().for_class(a.class));
                    out.extend_from_slice(&ixti.to_le_bytes());
                    out.extend_from_slice(&a.raw);
                } else {
                    out.push(Token::Area3d.codes().for_class(a.class));
                    out.extend_from_slice(&ixti.to_le_bytes());
                    write_area_fields(out, a);
                }
            }
            ParseNode::RefErr { class, raw } => {
                out.push(Token::RefErr.codes().for_class(*class));
                out.extend_from_slice(raw);
            }
            ParseNode::AreaErr { class, raw } => {
                out.push(Token::AreaErr.codes().for_class(*class));
                out.extend_from_slice(raw);
            }
            ParseNode::RefErr3d { class, raw } => {
                out.push(Token::RefErr3d.codes().for_class(*class));
                out.extend_from_slice(raw);
            }
            ParseNode::AreaErr3d { class, raw } => {
                out.push(Token::AreaErr3d.codes().for_class(*class));
                out.extend_from_slice(raw);
            }
            ParseNode::Name { class, raw, .. } => {
                out.push(Token::NamedRange.codes().for_class(*class));
                out.extend_from_slice(raw);
            }
            ParseNode::NameX { class, raw, .. } => {
                out.push(Token::NameX.codes().for_class(*class));
                out.extend_from_slice(raw);
            }
            ParseNode::Unary { op, operand } => {
                operand.write(out);
                out.push(op.token().codes().value);
            }
            ParseNode::Binary { op, lhs, rhs } => {
                lhs.write(out);
                rhs.write(out);
                out.push(op.token().codes().value);
            }
            ParseNode::Paren(inner) => {
                inner.write(out);
                out.push(Token::Parenthesis.codes().value);
            }
            ParseNode::Call(call) => {
                for arg in &call.args {
                    arg.write(out);
                }
                if call.variable {
                    out.push(Token::FunctionVar.codes().for_class(call.class));
                    out.push(call.args.len() as u8);
                    out.extend_from_slice(&call.id.to_le_bytes());
                } else {
                    out.push(Token::Function.codes().for_class(call.class));
                    out.extend_from_slice(&call.id.to_le_bytes());
                }
            }
            ParseNode::AttrSum { w, operand } => {
                operand.write(out);
                out.push(Token::Attribute.codes().value);
                out.push(ATTR_SUM);
                out.extend_from_slice(&w.to_le_bytes());
            }
            ParseNode::If(node) => write_if(out, node),
            ParseNode::SubExpr(sub) => {
                out.push(sub.token.codes().for_class(sub.class));
                out.extend_from_slice(&sub.prefix);
                let mut body = Vec::new();
                for item in &sub.items {
                    item.write(&mut body);
                }
                out.extend_from_slice(&(body.len() as u16).to_le_bytes());
                out.extend_from_slice(&body);
            }
        }
    }

    /// Render the formula text (without a leading `=`).
    pub fn to_text(&self) -> String {
        self.to_text_with(RenderContext::default())
    }

    pub fn to_text_with(&self, ctx: RenderContext<'_>) -> String {
        let mut out = String::new();
        self.render(&mut out, &ctx);
        out
    }

    fn render(&self, out: &mut String, ctx: &RenderContext<'_>) {
        match self {
            ParseNode::Integer(value) => out.push_str(&value.to_string()),
            ParseNode::Number(value) => out.push_str(&render_number(*value)),
            ParseNode::Text { value, .. } => {
                out.push('"');
                out.push_str(&value.replace('"', "\"\""));
                out.push('"');
            }
            ParseNode::Bool(value) => out.push_str(if *value { "TRUE" } else { "FALSE" }),
            ParseNode::ErrValue(code) => {
                out.push_str(xlsread_model::ErrorValue::from_code(*code).as_str())
            }
            ParseNode::MissingArg => {}
            ParseNode::Ref(r) => render_ref(out, r),
            ParseNode::Area(a) => render_area(out, a),
            ParseNode::Ref3d { ixti, r } => {
                render_sheet_prefix(out, *ixti, ctx);
                render_ref(out, r);
            }
            ParseNode::Area3d { ixti, a } => {
                render_sheet_prefix(out, *ixti, ctx);
                render_area(out, a);
            }
            ParseNode::RefErr { .. }
            | ParseNode::AreaErr { .. }
            | ParseNode::RefErr3d { .. }
            | ParseNode::AreaErr3d { .. } => out.push_str("#REF!"),
            ParseNode::Name { index, .. } => match ctx.names.and_then(|n| n.name(*index)) {
                Some(name) => out.push_str(&name),
                None => out.push_str(&format!("Name{index}")),
            },
            ParseNode::NameX { index, .. } => {
                match ctx.names.and_then(|n| n.name(u32::from(*index))) {
                    Some(name) => out.push_str(&name),
                    None => out.push_str(&format!("Name{index}")),
                }
            }
            ParseNode::Unary { op, operand } => match op {
                UnaryOp::Plus => {
                    out.push('+');
                    operand.render(out, ctx);
                }
                UnaryOp::Minus => {
                    out.push('-');
                    operand.render(out, ctx);
                }
                UnaryOp::Percent => {
                    operand.render(out, ctx);
                    out.push('%');
                }
            },
            ParseNode::Binary { op, lhs, rhs } => {
                lhs.render(out, ctx);
                out.push_str(op.symbol());
                rhs.render(out, ctx);
            }
            ParseNode::Paren(inner) => {
                out.push('(');
                inner.render(out, ctx);
                out.push(')');
            }
            ParseNode::Call(call) => {
                match funcs::function_name(call.id) {
                    Some(name) => out.push_str(name),
                    None => out.push_str(&format!("FUNC{}", call.id)),
                }
                render_arg_list(out, &call.args, ctx);
            }
            ParseNode::AttrSum { operand, .. } => {
                out.push_str("SUM(");
                operand.render(out, ctx);
                out.push(')');
            }
            ParseNode::If(node) => {
                out.push_str("IF");
                render_arg_list(out, &node.operands, ctx);
            }
            ParseNode::SubExpr(sub) => {
                for (idx, item) in sub.items.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    item.render(out, ctx);
                }
            }
        }
    }

    /// Shift every relative reference by the given delta. References shifted
    /// off the grid become reference errors.
    pub fn shift_relative(&mut self, delta_col: i64, delta_row: i64) {
        match self {
            ParseNode::Ref(r) | ParseNode::Ref3d { r, .. } => {
                shift_ref(r, delta_col, delta_row);
            }
            ParseNode::Area(a) | ParseNode::Area3d { a, .. } => {
                shift_area(a, delta_col, delta_row);
            }
            ParseNode::Unary { operand, .. } | ParseNode::AttrSum { operand, .. } => {
                operand.shift_relative(delta_col, delta_row);
            }
            ParseNode::Binary { lhs, rhs, .. } => {
                lhs.shift_relative(delta_col, delta_row);
                rhs.shift_relative(delta_col, delta_row);
            }
            ParseNode::Paren(inner) => inner.shift_relative(delta_col, delta_row),
            ParseNode::Call(call) => {
                for arg in &mut call.args {
                    arg.shift_relative(delta_col, delta_row);
                }
            }
            ParseNode::If(node) => {
                for operand in &mut node.operands {
                    operand.shift_relative(delta_col, delta_row);
                }
            }
            ParseNode::SubExpr(sub) => {
                for item in &mut sub.items {
                    item.shift_relative(delta_col, delta_row);
                }
            }
            _ => {}
        }
    }

    /// Rewrite external-sheet indices through `map` (used after sheet
    /// insert/remove/rename). A reference whose index maps to `None` becomes
    /// a reference error. Returns false if any index was unresolvable.
    pub fn rewrite_sheet_indices(&mut self, map: &mut dyn FnMut(u16) -> Option<u16>) -> bool {
        let mut ok = true;
        self.visit_sheet_indices(&mut |ixti, invalid| match map(ixti) {
            Some(new) => Some(new),
            None => {
                *invalid = true;
                ok = false;
                None
            }
        });
        ok
    }

    /// True when every 3-D reference in the tree resolves through the
    /// external-sheet table (used to validate imported formulas).
    pub fn sheet_refs_resolvable(&self, sheets: &dyn ExternalSheets) -> bool {
        let mut ok = true;
        self.for_each_sheet_index(&mut |ixti| {
            if sheets.sheet_name(ixti).is_none() {
                ok = false;
            }
        });
        ok
    }

    fn visit_sheet_indices(&mut self, f: &mut dyn FnMut(u16, &mut bool) -> Option<u16>) {
        match self {
            ParseNode::Ref3d { ixti, r } => {
                if let Some(new) = f(*ixti, &mut r.invalid) {
                    *ixti = new;
                }
            }
            ParseNode::Area3d { ixti, a } => {
                if let Some(new) = f(*ixti, &mut a.invalid) {
                    *ixti = new;
                }
            }
            ParseNode::NameX { ixti, .. } => {
                let mut ignored = false;
                if let Some(new) = f(*ixti, &mut ignored) {
                    *ixti = new;
                }
            }
            ParseNode::Unary { operand, .. } | ParseNode::AttrSum { operand, .. } => {
                operand.visit_sheet_indices(f)
            }
            ParseNode::Binary { lhs, rhs, .. } => {
                lhs.visit_sheet_indices(f);
                rhs.visit_sheet_indices(f);
            }
            ParseNode::Paren(inner) => inner.visit_sheet_indices(f),
            ParseNode::Call(call) => {
                for arg in &mut call.args {
                    arg.visit_sheet_indices(f);
                }
            }
            ParseNode::If(node) => {
                for operand in &mut node.operands {
                    operand.visit_sheet_indices(f);
                }
            }
            ParseNode::SubExpr(sub) => {
                for item in &mut sub.items {
                    item.visit_sheet_indices(f);
                }
            }
            _ => {}
        }
    }

    fn for_each_sheet_index(&self, f: &mut dyn FnMut(u16)) {
        match self {
            ParseNode::Ref3d { ixti, .. }
            | ParseNode::Area3d { ixti, .. }
            | ParseNode::NameX { ixti, .. } => f(*ixti),
            ParseNode::Unary { operand, .. } | ParseNode::AttrSum { operand, .. } => {
                operand.for_each_sheet_index(f)
            }
            ParseNode::Binary { lhs, rhs, .. } => {
                lhs.for_each_sheet_index(f);
                rhs.for_each_sheet_index(f);
            }
            ParseNode::Paren(inner) => inner.for_each_sheet_index(f),
            ParseNode::Call(call) => {
                for arg in &call.args {
                    arg.for_each_sheet_index(f);
                }
            }
            ParseNode::If(node) => {
                for operand in &node.operands {
                    operand.for_each_sheet_index(f);
                }
            }
            ParseNode::SubExpr(sub) => {
                for item in &sub.items {
                    item.for_each_sheet_index(f);
                }
            }
            _ => {}
        }
    }
}

// PtgAttr option flags.
pub(crate) const ATTR_IF: u8 = 0x02;
pub(crate) const ATTR_CHOOSE: u8 = 0x04;
pub(crate) const ATTR_GOTO: u8 = 0x08;
pub(crate) const ATTR_SUM: u8 = 0x10;

pub(crate) const COL_INDEX_MASK: u16 = 0x3FFF;
pub(crate) const ROW_RELATIVE_BIT: u16 = 0x4000;
pub(crate) const COL_RELATIVE_BIT: u16 = 0x8000;

fn write_ref(out: &mut Vec<u8>, r: &CellReference) {
    if r.invalid {
        out.push(Token::RefErr.codes().for_class(r.class));
        out.extend_from_slice(&r.raw);
        return;
    }
    let token = if r.shared_offset { Token::RefN } else { Token::Ref };
    out.push(token.codes().for_class(r.class));
    write_ref_fields(out, r);
}

fn write_ref_fields(out: &mut Vec<u8>, r: &CellReference) {
    if r.shared_offset {
        // Offsets from the owning cell; position-independent, emit as read.
        out.extend_from_slice(&r.raw);
        return;
    }
    out.extend_from_slice(&(r.row as u16).to_le_bytes());
    out.extend_from_slice(&pack_col_field(r.col as u16, r.col_relative, r.row_relative).to_le_bytes());
}

fn write_area(out: &mut Vec<u8>, a: &AreaReference) {
    if a.invalid {
        out.push(Token::AreaErr.codes().for_class(a.class));
        out.extend_from_slice(&a.raw);
        return;
    }
    let token = if a.shared_offset { Token::AreaN } else { Token::Area };
    out.push(token.codes().for_class(a.class));
    write_area_fields(out, a);
}

fn write_area_fields(out: &mut Vec<u8>, a: &AreaReference) {
    if a.shared_offset {
        out.extend_from_slice(&a.raw);
        return;
    }
    out.extend_from_slice(&(a.first.row as u16).to_le_bytes());
    out.extend_from_slice(&(a.last.row as u16).to_le_bytes());
    out.extend_from_slice(
        &pack_col_field(a.first.col as u16, a.first.col_relative, a.first.row_relative)
            .to_le_bytes(),
    );
    out.extend_from_slice(
        &pack_col_field(a.last.col as u16, a.last.col_relative, a.last.row_relative).to_le_bytes(),
    );
}

pub(crate) fn pack_col_field(col: u16, col_relative: bool, row_relative: bool) -> u16 {
    let mut field = col & COL_INDEX_MASK;
    if row_relative {
        field |= ROW_RELATIVE_BIT;
    }
    if col_relative {
        field |= COL_RELATIVE_BIT;
    }
    field
}

fn write_if(out: &mut Vec<u8>, node: &IfConstruct) {
    let n = node.operands.len();
    let branch_bytes: Vec<Vec<u8>> = node.operands.iter().map(|op| op.to_bytes()).collect();

    if let Some(first) = branch_bytes.first() {
        out.extend_from_slice(first);
    }

    if n > 1 {
        let if_w = node
            .if_w
            .unwrap_or_else(|| (branch_bytes[1].len() + 3) as u16);
        out.push(Token::Attribute.codes().value);
        out.push(ATTR_IF);
        out.extend_from_slice(&if_w.to_le_bytes());

        for (i, bytes) in branch_bytes.iter().enumerate().skip(1) {
            out.extend_from_slice(bytes);
            let goto_w = node.goto_ws.get(i - 1).copied().unwrap_or_else(|| {
                // Distance past the remaining branches (each followed by its
                // own goto marker) and the trailing call token.
                let rest: usize = branch_bytes[i + 1..].iter().map(|b| b.len() + 3).sum();
                (rest + 3) as u16
            });
            out.push(Token::Attribute.codes().value);
            out.push(ATTR_GOTO);
            out.extend_from_slice(&goto_w.to_le_bytes());
        }
    }

    out.push(Token::FunctionVar.codes().for_class(node.class));
    out.push(n as u8);
    out.extend_from_slice(&FUNCTION_ATTRIBUTE.to_le_bytes());
}

fn shift_ref(r: &mut CellReference, delta_col: i64, delta_row: i64) {
    if r.invalid {
        return;
    }
    let col = if r.col_relative {
        i64::from(r.col) + delta_col
    } else {
        i64::from(r.col)
    };
    let row = if r.row_relative {
        i64::from(r.row) + delta_row
    } else {
        i64::from(r.row)
    };
    if !coord_in_bounds(col, row) {
        r.invalid = true;
        return;
    }
    r.col = col as u32;
    r.row = row as u32;
}

fn shift_area(a: &mut AreaReference, delta_col: i64, delta_row: i64) {
    if a.invalid {
        return;
    }
    let mut corners = [a.first, a.last];
    for corner in &mut corners {
        let col = if corner.col_relative {
            i64::from(corner.col) + delta_col
        } else {
            i64::from(corner.col)
        };
        let row = if corner.row_relative {
            i64::from(corner.row) + delta_row
        } else {
            i64::from(corner.row)
        };
        if !coord_in_bounds(col, row) {
            a.invalid = true;
            return;
        }
        corner.col = col as u32;
        corner.row = row as u32;
    }
    a.first = corners[0];
    a.last = corners[1];
}

fn coord_in_bounds(col: i64, row: i64) -> bool {
    (0..=i64::from(MAX_COL)).contains(&col) && (0..=i64::from(MAX_ROW)).contains(&row)
}

fn render_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn render_ref(out: &mut String, r: &CellReference) {
    if r.invalid {
        out.push_str("#REF!");
        return;
    }
    if !r.col_relative {
        out.push('$');
    }
    out.push_str(&col_to_name(r.col));
    if !r.row_relative {
        out.push('$');
    }
    out.push_str(&(r.row + 1).to_string());
}

fn render_area(out: &mut String, a: &AreaReference) {
    if a.invalid {
        out.push_str("#REF!");
        return;
    }
    render_corner(out, &a.first);
    out.push(':');
    render_corner(out, &a.last);
}

fn render_corner(out: &mut String, c: &Corner) {
    if !c.col_relative {
        out.push('$');
    }
    out.push_str(&col_to_name(c.col));
    if !c.row_relative {
        out.push('$');
    }
    out.push_str(&(c.row + 1).to_string());
}

fn render_sheet_prefix(out: &mut String, ixti: u16, ctx: &RenderContext<'_>) {
    match ctx.extern_sheets.and_then(|s| s.sheet_name(ixti)) {
        Some(name) if name.contains(' ') => {
            out.push('\'');
            out.push_str(&name);
            out.push_str("'!");
        }
        Some(name) => {
            out.push_str(&name);
            out.push('!');
        }
        // Stable placeholder when the external-sheet table is absent.
        None => out.push_str(&format!("Sheet{ixti}!")),
    }
}

fn render_arg_list(out: &mut String, args: &[ParseNode], ctx: &RenderContext<'_>) {
    out.push('(');
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        arg.render(out, ctx);
    }
    out.push(')');
}
