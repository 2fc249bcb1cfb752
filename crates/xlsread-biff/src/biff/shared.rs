//! Shared-formula groups and reference rebasing.
//!
//! A shared formula is stored once as a template anchored at one cell plus
//! the rectangular range it covers; member cells carry only a pointer.
//! Materializing the formula for another coordinate applies the coordinate
//! delta to every relative reference in a structural copy of the template
//! tree. The serialized bytes of the derived tree are computed
//! independently, never copied from the template, because relative
//! reference encodings differ per coordinate.

use std::collections::HashMap;

use xlsread_model::{CellCoord, CellRange, CellValue};

use crate::formula::ParseNode;

/// Safety cap on expansion: a corrupt range declaration must not explode
/// into millions of cells.
const MAX_GROUP_CELLS: u64 = 0x10000;

/// Parsed payload of a SHAREDFORMULA record: the covered range and the
/// template token bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFormulaDef {
    pub range: CellRange,
    pub rgce: Vec<u8>,
}

pub fn parse_shared_formula(data: &[u8]) -> Result<SharedFormulaDef, String> {
    // [rwFirst: u16][rwLast: u16][colFirst: u8][colLast: u8][cUse: u16]
    // [cce: u16][rgce: cce bytes]
    let header = data.get(..10).ok_or("SHAREDFORMULA record too short")?;
    let first_row = u16::from_le_bytes([header[0], header[1]]);
    let last_row = u16::from_le_bytes([header[2], header[3]]);
    let first_col = u16::from(header[4]);
    let last_col = u16::from(header[5]);
    if first_row > last_row || first_col > last_col {
        return Err("SHAREDFORMULA range is inverted".to_string());
    }
    let cce = u16::from_le_bytes([header[8], header[9]]) as usize;
    let rgce = data
        .get(10..10 + cce)
        .ok_or("SHAREDFORMULA token stream extends past record")?
        .to_vec();

    Ok(SharedFormulaDef {
        range: CellRange::new(
            CellCoord::new(u32::from(first_col), u32::from(first_row)),
            CellCoord::new(u32::from(last_col), u32::from(last_row)),
        ),
        rgce,
    })
}

#[derive(Debug, Clone, PartialEq)]
struct Member {
    xf: u16,
    value: CellValue,
}

/// One shared-formula group under construction.
///
/// The group is mutated by absorbing member formula records while its sheet
/// decodes; once the sheet reaches EOF the group is consumed by
/// [`expand`](Self::expand).
#[derive(Debug, Clone, PartialEq)]
pub struct SharedFormulaGroup {
    pub anchor: CellCoord,
    pub anchor_xf: u16,
    pub anchor_value: CellValue,
    pub range: CellRange,
    pub template: ParseNode,
    members: HashMap<CellCoord, Member>,
}

/// One materialized formula cell produced by expanding a group.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedFormula {
    pub coord: CellCoord,
    pub xf: u16,
    pub value: CellValue,
    pub tree: ParseNode,
    pub bytes: Vec<u8>,
}

impl SharedFormulaGroup {
    pub fn new(
        anchor: CellCoord,
        anchor_xf: u16,
        anchor_value: CellValue,
        range: CellRange,
        template: ParseNode,
    ) -> Self {
        Self {
            anchor,
            anchor_xf,
            anchor_value,
            range,
            template,
            members: HashMap::new(),
        }
    }

    /// Absorb a member formula record if its coordinate falls inside the
    /// group's declared range.
    pub fn try_absorb(&mut self, coord: CellCoord, xf: u16, value: CellValue) -> bool {
        if !self.range.contains(coord) {
            return false;
        }
        self.members.insert(coord, Member { xf, value });
        true
    }

    /// Materialize one formula cell per coordinate in the covered range.
    ///
    /// The tree for coordinate `c` is a structural copy of the template with
    /// the delta `c - anchor` applied to every relative reference; absolute
    /// references are untouched. Cached values and XF indices come from the
    /// absorbed member records where present.
    pub fn expand(mut self) -> Vec<ExpandedFormula> {
        let mut out = Vec::new();
        if self.range.cell_count() > MAX_GROUP_CELLS {
            log::warn!(
                "shared formula range {} covers {} cells; truncating expansion",
                self.range,
                self.range.cell_count()
            );
        }

        let coords: Vec<CellCoord> = self
            .range
            .coords()
            .take(MAX_GROUP_CELLS as usize)
            .collect();
        for coord in coords {
            let delta_col = i64::from(coord.col) - i64::from(self.anchor.col);
            let delta_row = i64::from(coord.row) - i64::from(self.anchor.row);

            let mut tree = self.template.clone();
            tree.shift_relative(delta_col, delta_row);
            let bytes = tree.to_bytes();

            let (xf, value) = match self.members.remove(&coord) {
                Some(member) => (member.xf, member.value),
                None if coord == self.anchor => {
                    (self.anchor_xf, self.anchor_value.clone())
                }
                None => (self.anchor_xf, CellValue::Blank),
            };

            out.push(ExpandedFormula {
                coord,
                xf,
                value,
                tree,
                bytes,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parse_tokens;

    fn template_a1_plus_1() -> Vec<u8> {
        // A1 (relative) + 1
        let mut rgce = vec![0x24];
        rgce.extend_from_slice(&0u16.to_le_bytes());
        rgce.extend_from_slice(&(0u16 | 0xC000).to_le_bytes());
        rgce.push(0x1E);
        rgce.extend_from_slice(&1u16.to_le_bytes());
        rgce.push(0x03);
        rgce
    }

    #[test]
    fn parses_shared_formula_payload() {
        let rgce = template_a1_plus_1();
        let mut data = Vec::new();
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        data.push(0);
        data.push(0);
        data.extend_from_slice(&3u16.to_le_bytes()); // cUse
        data.extend_from_slice(&(rgce.len() as u16).to_le_bytes());
        data.extend_from_slice(&rgce);

        let def = parse_shared_formula(&data).unwrap();
        assert_eq!(
            def.range,
            CellRange::new(CellCoord::new(0, 0), CellCoord::new(0, 2))
        );
        assert_eq!(def.rgce, rgce);
    }

    #[test]
    fn rebases_relative_references_per_coordinate() {
        let anchor = CellCoord::new(0, 0);
        let template = parse_tokens(&template_a1_plus_1(), anchor, 1252).unwrap();
        let range = CellRange::new(anchor, CellCoord::new(0, 2));
        let group =
            SharedFormulaGroup::new(anchor, 15, CellValue::Number(1.0), range, template);

        let expanded = group.expand();
        assert_eq!(expanded.len(), 3);
        assert_eq!(expanded[0].tree.to_text(), "A1+1");
        assert_eq!(expanded[2].coord, CellCoord::new(0, 2));
        assert_eq!(expanded[2].tree.to_text(), "A3+1");

        // The derived bytes are computed from the rebased tree, not copied.
        assert_ne!(expanded[2].bytes, expanded[0].bytes);
        let reparsed = parse_tokens(&expanded[2].bytes, expanded[2].coord, 1252).unwrap();
        assert_eq!(reparsed.to_text(), "A3+1");
    }

    #[test]
    fn absolute_references_do_not_move() {
        // $B$5 absolute.
        let mut rgce = vec![0x24];
        rgce.extend_from_slice(&4u16.to_le_bytes());
        rgce.extend_from_slice(&1u16.to_le_bytes());

        let anchor = CellCoord::new(0, 0);
        let template = parse_tokens(&rgce, anchor, 1252).unwrap();
        let range = CellRange::new(anchor, CellCoord::new(1, 1));
        let group = SharedFormulaGroup::new(anchor, 0, CellValue::Blank, range, template);

        for cell in group.expand() {
            assert_eq!(cell.tree.to_text(), "$B$5");
            assert_eq!(cell.bytes, rgce);
        }
    }

    #[test]
    fn members_supply_their_own_xf_and_value() {
        let anchor = CellCoord::new(0, 0);
        let template = parse_tokens(&template_a1_plus_1(), anchor, 1252).unwrap();
        let range = CellRange::new(anchor, CellCoord::new(0, 1));
        let mut group =
            SharedFormulaGroup::new(anchor, 15, CellValue::Number(1.0), range, template);

        assert!(group.try_absorb(CellCoord::new(0, 1), 22, CellValue::Number(2.0)));
        assert!(!group.try_absorb(CellCoord::new(5, 5), 0, CellValue::Blank));

        let expanded = group.expand();
        assert_eq!(expanded[0].xf, 15);
        assert_eq!(expanded[1].xf, 22);
        assert_eq!(expanded[1].value, CellValue::Number(2.0));
    }
}
