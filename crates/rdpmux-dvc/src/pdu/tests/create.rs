use super::*;
use lazy_static::lazy_static;
use rdpmux_core::decode;

const CHANNEL_ID: u32 = 0x05;
const REQUEST_ENCODED: [u8; 7] = [0x10, 0x05, b'E', b'C', b'H', b'O', 0x00];
const RESPONSE_OK_ENCODED: [u8; 6] = [0x10, 0x05, 0x00, 0x00, 0x00, 0x00];
const RESPONSE_NO_LISTENER_ENCODED: [u8; 6] = [0x10, 0x05, 0x01, 0x00, 0x00, 0xc0];

lazy_static! {
    static ref REQUEST_DECODED: CreateRequestPdu = CreateRequestPdu::new(CHANNEL_ID, "ECHO".to_owned());
}

#[test]
fn decodes_create_request() {
    match decode::<DrdynvcServerPdu>(&REQUEST_ENCODED).unwrap() {
        DrdynvcServerPdu::Create(request) => assert_eq!(*REQUEST_DECODED, request),
        _ => panic!("expected Create"),
    }
}

#[test]
fn encodes_create_request() {
    let request = &*REQUEST_DECODED;
    let mut buffer = vec![0x00; request.size()];
    let mut cursor = WriteCursor::new(&mut buffer);
    request.encode(&mut cursor).unwrap();
    assert_eq!(REQUEST_ENCODED.as_slice(), buffer.as_slice());
}

#[test]
fn rejects_request_without_name_terminator() {
    let encoded = [0x10, 0x05, b'O', b'V', b'E', b'R', b'L', b'O', b'N', b'G'];
    assert!(decode::<DrdynvcServerPdu>(&encoded).is_err());
}

#[test]
fn encodes_create_response() {
    let response = CreateResponsePdu::new(CHANNEL_ID, CreationStatus::OK);
    let mut buffer = vec![0x00; response.size()];
    let mut cursor = WriteCursor::new(&mut buffer);
    response.encode(&mut cursor).unwrap();
    assert_eq!(RESPONSE_OK_ENCODED.as_slice(), buffer.as_slice());
}

#[test]
fn decodes_create_response() {
    match decode::<DrdynvcClientPdu>(&RESPONSE_NO_LISTENER_ENCODED).unwrap() {
        DrdynvcClientPdu::Create(response) => {
            assert_eq!(response.channel_id, CHANNEL_ID);
            assert_eq!(response.creation_status, CreationStatus::NO_LISTENER);
            assert!(!response.creation_status.is_success());
        }
        _ => panic!("expected Create"),
    }
}
