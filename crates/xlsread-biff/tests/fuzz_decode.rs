//! Robustness: the decoder and the token parser must never panic, whatever
//! the input. Errors and warnings are fine; aborts are not.

mod common;

use proptest::prelude::*;
use xlsread_model::CellCoord;
use xlsread_biff::parse_tokens;

proptest! {
    #[test]
    fn sheet_decoder_never_panics_on_arbitrary_bytes(
        bytes in proptest::collection::vec(any::<u8>(), 0..2048)
    ) {
        let _ = common::decode(&bytes);
    }

    #[test]
    fn sheet_decoder_never_panics_on_record_shaped_streams(
        records in proptest::collection::vec(
            (any::<u16>(), proptest::collection::vec(any::<u8>(), 0..64)),
            0..32,
        )
    ) {
        let mut stream = common::bof_worksheet();
        for (id, payload) in &records {
            stream.extend(common::record(*id, payload));
        }
        stream.extend(common::eof());
        let _ = common::decode(&stream);
    }

    #[test]
    fn token_parser_never_panics(
        bytes in proptest::collection::vec(any::<u8>(), 0..512),
        col in 0u32..0x4000,
        row in 0u32..0x1_0000,
    ) {
        let _ = parse_tokens(&bytes, CellCoord::new(col, row), 1252);
    }

    #[test]
    fn parsed_token_streams_round_trip(
        // Streams built only from well-formed operand/operator tokens.
        values in proptest::collection::vec(any::<f64>(), 1..8)
    ) {
        let mut rgce = Vec::new();
        for value in &values {
            rgce.push(0x1F);
            rgce.extend_from_slice(&value.to_le_bytes());
        }
        for _ in 1..values.len() {
            rgce.push(0x03);
        }

        let tree = parse_tokens(&rgce, CellCoord::new(0, 0), 1252).unwrap();
        prop_assert_eq!(tree.to_bytes(), rgce);
    }
}
