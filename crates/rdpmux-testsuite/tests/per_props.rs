use proptest::prelude::*;

use rdpmux_core::{ReadCursor, WriteCursor};
use rdpmux_pdu::per;

proptest! {
    #[test]
    fn per_u32_round_trip_is_isomorphic(value in any::<u32>()) {
        let mut buf = [0u8; 5];
        let mut dst = WriteCursor::new(&mut buf);
        per::write_u32(&mut dst, value);
        let written = dst.pos();

        let mut src = ReadCursor::new(&buf[..written]);
        let decoded = per::read_u32(&mut src).unwrap();

        prop_assert_eq!(decoded, value);
        prop_assert!(src.is_empty());
    }

    #[test]
    fn per_u16_round_trip_with_base(value in 1001u16.., base in Just(1001u16)) {
        let mut buf = [0u8; 2];
        let mut dst = WriteCursor::new(&mut buf);
        per::write_u16(&mut dst, value, base).unwrap();

        let mut src = ReadCursor::new(&buf);
        let decoded = per::read_u16(&mut src, base).unwrap();

        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn per_u16_rejects_values_below_base(value in 0u16..1001) {
        let mut buf = [0u8; 2];
        let mut dst = WriteCursor::new(&mut buf);
        prop_assert!(per::write_u16(&mut dst, value, 1001).is_err());
    }
}
