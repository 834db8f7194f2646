use super::*;
use rdpmux_core::decode;

const CHANNEL_ID: u32 = 0x08;
const ENCODED: [u8; 2] = [0x40, 0x08];

#[test]
fn decodes_close() {
    match decode::<DrdynvcServerPdu>(&ENCODED).unwrap() {
        DrdynvcServerPdu::Close(close) => assert_eq!(close.channel_id, CHANNEL_ID),
        _ => panic!("expected Close"),
    }

    match decode::<DrdynvcClientPdu>(&ENCODED).unwrap() {
        DrdynvcClientPdu::Close(close) => assert_eq!(close.channel_id, CHANNEL_ID),
        _ => panic!("expected Close"),
    }
}

#[test]
fn encodes_close() {
    let close = ClosePdu::new(CHANNEL_ID);
    let mut buffer = vec![0x00; close.size()];
    let mut cursor = WriteCursor::new(&mut buffer);
    close.encode(&mut cursor).unwrap();
    assert_eq!(ENCODED.as_slice(), buffer.as_slice());
}

#[test]
fn wide_channel_id_uses_wider_field() {
    let close = ClosePdu::new(0x1_0000);
    let mut buffer = vec![0x00; close.size()];
    let mut cursor = WriteCursor::new(&mut buffer);
    close.encode(&mut cursor).unwrap();
    assert_eq!(buffer, [0x42, 0x00, 0x00, 0x01, 0x00]);
}
