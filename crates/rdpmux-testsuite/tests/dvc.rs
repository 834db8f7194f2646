use rdpmux_core::{decode, encode_vec};
use rdpmux_dvc::pdu::{DrdynvcDataPdu, DrdynvcServerPdu};
use rdpmux_dvc::DrdynvcClient;
use rdpmux_echo::client::EchoListener;
use rdpmux_svc::{SvcProcessor as _, SvcMessage};

const CAPS_V2_REQUEST: [u8; 12] = [
    0x50, 0x00, 0x02, 0x00, 0x64, 0x00, 0xc8, 0x00, 0x2c, 0x01, 0x90, 0x01,
];

fn encode_messages(messages: &[SvcMessage]) -> Vec<Vec<u8>> {
    messages
        .iter()
        .map(|message| encode_vec(message.pdu()).unwrap())
        .collect()
}

/// DVC capability negotiation: version 2 with priority charges 100, 200,
/// 300 and 400; the client echoes the version back and becomes ready.
#[test]
fn capability_negotiation_reaches_ready() {
    let mut client = DrdynvcClient::new();

    let responses = client.process(&CAPS_V2_REQUEST).unwrap();

    let encoded = encode_messages(&responses);
    assert_eq!(encoded, [vec![0x50, 0x00, 0x02, 0x00]]);
    assert!(client.is_ready());
}

/// DVC channel open and fragmented send: a 3000-byte write at chunk size
/// 1600 produces exactly one DataFirst PDU carrying 1593 bytes and one Data
/// PDU carrying the remaining 1407.
#[test]
fn open_and_fragmented_send() {
    let mut client = DrdynvcClient::new().with_listener(EchoListener::new());

    client.process(&CAPS_V2_REQUEST).unwrap();

    // CREATE_REQUEST for channel id 5, name "ECHO"
    let create = [0x10, 0x05, b'E', b'C', b'H', b'O', 0x00];
    let responses = client.process(&create).unwrap();

    let encoded = encode_messages(&responses);
    assert_eq!(encoded, [vec![0x10, 0x05, 0x00, 0x00, 0x00, 0x00]]);

    let payload: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
    let messages = client.encode_data(5, vec![Box::new(payload.clone())]).unwrap();

    assert_eq!(messages.len(), 2);

    let first: DrdynvcServerPdu = decode(&encode_vec(messages[0].pdu()).unwrap()).unwrap();
    let DrdynvcServerPdu::Data(DrdynvcDataPdu::DataFirst(first)) = first else {
        panic!("expected a DataFirst PDU");
    };
    assert_eq!(first.channel_id, 5);
    assert_eq!(first.length, 3000);
    assert_eq!(first.data.len(), 1593);

    let second: DrdynvcServerPdu = decode(&encode_vec(messages[1].pdu()).unwrap()).unwrap();
    let DrdynvcServerPdu::Data(DrdynvcDataPdu::Data(second)) = second else {
        panic!("expected a Data PDU");
    };
    assert_eq!(second.channel_id, 5);
    assert_eq!(second.data.len(), 1407);

    let mut reassembled = first.data;
    reassembled.extend(second.data);
    assert_eq!(reassembled, payload);
}

/// The ECHO consumer answers a request with the same payload.
#[test]
fn echo_channel_round_trip() {
    let mut client = DrdynvcClient::new().with_listener(EchoListener::new());

    client.process(&CAPS_V2_REQUEST).unwrap();
    client.process(&[0x10, 0x05, b'E', b'C', b'H', b'O', 0x00]).unwrap();

    // DATA on channel 5
    let responses = client.process(&[0x30, 0x05, 0x11, 0x22, 0x33]).unwrap();

    let encoded = encode_messages(&responses);
    assert_eq!(encoded, [vec![0x30, 0x05, 0x11, 0x22, 0x33]]);
}

/// The emitted PDU count tracks the chunk arithmetic.
#[test]
fn emitted_pdu_count_matches_chunk_arithmetic() {
    const CHUNK_SIZE: usize = 1600;
    const DATA_FIRST_OVERHEAD: usize = 7; // cmd + reserved id + 2-byte length
    const DATA_OVERHEAD: usize = 5; // cmd + reserved id

    let mut client = DrdynvcClient::new().with_listener(EchoListener::new());
    client.process(&CAPS_V2_REQUEST).unwrap();
    client.process(&[0x10, 0x05, b'E', b'C', b'H', b'O', 0x00]).unwrap();

    for n in [1usize, 1595, 1596, 3000, 10_000] {
        let messages = client.encode_data(5, vec![Box::new(vec![0u8; n])]).unwrap();

        let expected = if n <= CHUNK_SIZE - DATA_OVERHEAD {
            1
        } else {
            let first = CHUNK_SIZE - DATA_FIRST_OVERHEAD;
            let rest_capacity = CHUNK_SIZE - DATA_OVERHEAD;
            1 + (n - first).div_ceil(rest_capacity)
        };

        assert_eq!(messages.len(), expected, "payload of {n} bytes");
    }
}
