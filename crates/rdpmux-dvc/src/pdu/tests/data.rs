use super::*;
use lazy_static::lazy_static;
use rdpmux_core::decode;

const CHANNEL_ID: u32 = 0x03;
const PREFIX: [u8; 2] = [0x30, 0x03];
const DATA: [u8; 12] = [0x71; 12];

lazy_static! {
    static ref ENCODED: Vec<u8> = {
        let mut result = PREFIX.to_vec();
        result.extend(DATA);
        result
    };
    static ref DECODED: DataPdu = DataPdu::new(CHANNEL_ID, DATA.to_vec());
}

#[test]
fn decodes_data() {
    match decode::<DrdynvcClientPdu>(&ENCODED).unwrap() {
        DrdynvcClientPdu::Data(DrdynvcDataPdu::Data(d)) => assert_eq!(*DECODED, d),
        _ => panic!("expected Data"),
    }

    match decode::<DrdynvcServerPdu>(&ENCODED).unwrap() {
        DrdynvcServerPdu::Data(DrdynvcDataPdu::Data(d)) => assert_eq!(*DECODED, d),
        _ => panic!("expected Data"),
    }
}

#[test]
fn encodes_data() {
    let data = &*DECODED;
    let mut buffer = vec![0x00; data.size()];
    let mut cursor = WriteCursor::new(&mut buffer);
    data.encode(&mut cursor).unwrap();
    assert_eq!(ENCODED.as_slice(), buffer.as_slice());
}

#[test]
fn data_first_round_trip() {
    let pdu = DataFirstPdu::new(CHANNEL_ID, 1593, DATA.to_vec());

    let mut buffer = vec![0x00; pdu.size()];
    let mut cursor = WriteCursor::new(&mut buffer);
    pdu.encode(&mut cursor).unwrap();

    // cmd = DataFirst, sp = u16 length, cbChId = u8
    assert_eq!(buffer[0], 0x24);
    assert_eq!(buffer[1], 0x03);
    assert_eq!(&buffer[2..4], [0x39, 0x06]);

    match decode::<DrdynvcServerPdu>(&buffer).unwrap() {
        DrdynvcServerPdu::Data(DrdynvcDataPdu::DataFirst(d)) => {
            assert_eq!(d.channel_id, CHANNEL_ID);
            assert_eq!(d.length, 1593);
            assert_eq!(d.data, DATA.to_vec());
        }
        _ => panic!("expected DataFirst"),
    }
}
