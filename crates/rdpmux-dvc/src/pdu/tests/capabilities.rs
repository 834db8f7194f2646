use super::*;
use lazy_static::lazy_static;
use rdpmux_core::decode;

const REQUEST_V2_ENCODED: [u8; 12] = [
    0x50, 0x00, 0x02, 0x00, 0x64, 0x00, 0xc8, 0x00, 0x2c, 0x01, 0x90, 0x01,
];
const REQUEST_V1_ENCODED: [u8; 4] = [0x50, 0x00, 0x01, 0x00];
const RESPONSE_ENCODED: [u8; 4] = [0x50, 0x00, 0x02, 0x00];

lazy_static! {
    static ref REQUEST_V2_DECODED: CapabilitiesRequestPdu =
        CapabilitiesRequestPdu::new(CapsVersion::V2, Some([100, 200, 300, 400]));
    static ref RESPONSE_DECODED: CapabilitiesResponsePdu = CapabilitiesResponsePdu::new(CapsVersion::V2);
}

#[test]
fn decodes_request_with_priority_charges() {
    match decode::<DrdynvcServerPdu>(&REQUEST_V2_ENCODED).unwrap() {
        DrdynvcServerPdu::Capabilities(request) => {
            assert_eq!(*REQUEST_V2_DECODED, request);
            assert_eq!(request.version(), CapsVersion::V2);
            assert_eq!(request.charges(), Some(&[100u16, 200, 300, 400]));
        }
        _ => panic!("expected Capabilities"),
    }
}

#[test]
fn decodes_v1_request_without_charges() {
    match decode::<DrdynvcServerPdu>(&REQUEST_V1_ENCODED).unwrap() {
        DrdynvcServerPdu::Capabilities(request) => {
            assert_eq!(request.version(), CapsVersion::V1);
            assert_eq!(request.charges(), None);
        }
        _ => panic!("expected Capabilities"),
    }
}

#[test]
fn encodes_request() {
    let request = &*REQUEST_V2_DECODED;
    let mut buffer = vec![0x00; request.size()];
    let mut cursor = WriteCursor::new(&mut buffer);
    request.encode(&mut cursor).unwrap();
    assert_eq!(REQUEST_V2_ENCODED.as_slice(), buffer.as_slice());
}

#[test]
fn encodes_response() {
    let response = &*RESPONSE_DECODED;
    let mut buffer = vec![0x00; response.size()];
    let mut cursor = WriteCursor::new(&mut buffer);
    response.encode(&mut cursor).unwrap();
    assert_eq!(RESPONSE_ENCODED.as_slice(), buffer.as_slice());
}

#[test]
fn rejects_unknown_version() {
    let encoded = [0x50, 0x00, 0x09, 0x00];
    assert!(decode::<DrdynvcServerPdu>(&encoded).is_err());
}
