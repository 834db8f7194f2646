use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use rdpmux_connector::{
    ClientConnector, ClientConnectorState, ConnectorErrorKind, Sequence as _, State as _,
};
use rdpmux_core::{decode, encode_vec, WriteBuf};
use rdpmux_dvc::DrdynvcClient;
use rdpmux_pdu::gcc::{
    ConferenceCreateResponse, EncryptionMethod, ServerCoreData, ServerGccBlocks, ServerNetworkData,
    ServerSecurityData, RDP_VERSION_5_PLUS,
};
use rdpmux_pdu::nego::{
    ConnectionConfirm, FailureCode, NegoRequestData, ResponseFlags, SecurityProtocol,
};
use rdpmux_pdu::x224::X224;
use rdpmux_pdu::{mcs, find_size};
use rdpmux_testsuite::{test_config, server_frame, CliprdrStub, RdpsndStub};

fn confirm_response(flags: ResponseFlags, protocol: SecurityProtocol) -> Vec<u8> {
    encode_vec(&X224(ConnectionConfirm::Response { flags, protocol })).unwrap()
}

fn confirm_failure(code: FailureCode) -> Vec<u8> {
    encode_vec(&X224(ConnectionConfirm::Failure { code })).unwrap()
}

#[test]
fn negotiation_to_nla_with_cookie() {
    let mut config = test_config();
    config.request_data = Some(NegoRequestData::cookie("alice".to_owned()));

    let mut connector = ClientConnector::new(config);
    let mut buf = WriteBuf::new();

    connector.step_no_input(&mut buf).unwrap();

    let request = buf.filled().to_vec();
    let cookie = b"Cookie: mstshash=alice\r\n";
    assert!(request.windows(cookie.len()).any(|window| window == cookie));
    // RDP_NEG_REQ with requestedProtocols = HYBRID | SSL
    assert_eq!(&request[request.len() - 8..], [0x01, 0x00, 0x08, 0x00, 0x03, 0x00, 0x00, 0x00]);

    buf.clear();
    let response = confirm_response(ResponseFlags::EXTENDED_CLIENT_DATA_SUPPORTED, SecurityProtocol::HYBRID);
    connector.step(&response, &mut buf).unwrap();

    assert!(connector.should_perform_security_upgrade());
    match connector.state {
        ClientConnectorState::EnhancedSecurityUpgrade { selected_protocol } => {
            assert_eq!(selected_protocol, SecurityProtocol::HYBRID);
        }
        other => panic!("unexpected state: {other:?}"),
    }
}

#[test]
fn negotiation_failure_surfaces_as_negotiation_error() {
    let mut connector = ClientConnector::new(test_config());
    let mut buf = WriteBuf::new();

    connector.step_no_input(&mut buf).unwrap();

    buf.clear();
    let failure = confirm_failure(FailureCode::HYBRID_REQUIRED_BY_SERVER);
    let e = connector.step(&failure, &mut buf).unwrap_err();

    assert!(matches!(e.kind(), ConnectorErrorKind::Negotiation(_)));
}

/// One scripted connection attempt: the bytes the "server" will answer, and
/// a sink for whatever the client writes.
struct ScriptedStream {
    input: io::Cursor<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn downgrade_ladder_ends_at_rdp_with_legacy_encryption() {
    let mut scripted: VecDeque<Vec<u8>> = VecDeque::from([
        confirm_failure(FailureCode::HYBRID_REQUIRED_BY_SERVER),
        confirm_failure(FailureCode::SSL_NOT_ALLOWED_BY_SERVER),
        confirm_response(ResponseFlags::empty(), SecurityProtocol::RDP),
    ]);

    let written = Arc::new(Mutex::new(Vec::new()));
    let dials = Arc::new(Mutex::new(0u32));

    let factory_written = Arc::clone(&written);
    let factory_dials = Arc::clone(&dials);

    let (_framed, connector, _should_upgrade) = rdpmux_blocking::connect_with_downgrade(
        test_config(),
        ClientConnector::new,
        move || {
            *factory_dials.lock().unwrap() += 1;
            factory_written.lock().unwrap().clear();
            Ok(ScriptedStream {
                input: io::Cursor::new(scripted.pop_front().expect("scripted response")),
                written: Arc::clone(&factory_written),
            })
        },
    )
    .unwrap();

    // The TCP connection was torn down and re-dialed between attempts.
    assert_eq!(*dials.lock().unwrap(), 3);

    // The last request carried no RDP_NEG_REQ body at all (plain RDP).
    let last_request = written.lock().unwrap().clone();
    assert_eq!(last_request, [0x03, 0x00, 0x00, 0x0b, 0x06, 0xe0, 0x00, 0x00, 0x00, 0x00, 0x00]);

    match connector.state {
        ClientConnectorState::EnhancedSecurityUpgrade { selected_protocol } => {
            assert_eq!(selected_protocol, SecurityProtocol::RDP);
        }
        other => panic!("unexpected state: {other:?}"),
    }
}

fn drive_to_basic_settings(connector: &mut ClientConnector, buf: &mut WriteBuf, protocol: SecurityProtocol) {
    connector.step_no_input(buf).unwrap();
    buf.clear();
    let response = confirm_response(ResponseFlags::empty(), protocol);
    connector.step(&response, buf).unwrap();
    connector.mark_security_upgrade_as_done();
}

fn connect_response(io_channel: u16, channel_ids: Vec<u16>, user_id: u16) -> Vec<u8> {
    let response = mcs::ConnectResponse {
        conference_create_response: ConferenceCreateResponse {
            user_id,
            gcc_blocks: ServerGccBlocks {
                core: ServerCoreData {
                    version: RDP_VERSION_5_PLUS,
                },
                security: ServerSecurityData {
                    encryption_method: EncryptionMethod::empty(),
                    encryption_level: 0,
                },
                network: ServerNetworkData {
                    io_channel,
                    channel_ids,
                },
            },
        },
        called_connect_id: 0,
        domain_parameters: mcs::DomainParameters::target(),
    };

    server_frame(&response)
}

fn split_frames(mut bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let length = find_size(bytes).unwrap().expect("whole frame");
        frames.push(bytes[..length].to_vec());
        bytes = &bytes[length..];
    }
    frames
}

#[test]
fn mcs_channel_join_round_trip() {
    let mut connector = ClientConnector::new(test_config())
        .with_static_channel(RdpsndStub)
        .with_static_channel(CliprdrStub)
        .with_static_channel(DrdynvcClient::new());

    let mut buf = WriteBuf::new();
    drive_to_basic_settings(&mut connector, &mut buf, SecurityProtocol::HYBRID);

    // Connect-Initial goes out; answer with ids 1004..=1006 for the three
    // requested channels and user id 1007.
    buf.clear();
    connector.step_no_input(&mut buf).unwrap();
    assert_eq!(connector.state.name(), "BasicSettingsExchangeWaitResponse");

    buf.clear();
    let response = connect_response(1003, vec![1004, 1005, 1006], 1007);
    connector.step(&response, &mut buf).unwrap();

    // Erect domain, then attach user.
    buf.clear();
    connector.step_no_input(&mut buf).unwrap();
    buf.clear();
    connector.step_no_input(&mut buf).unwrap();

    buf.clear();
    let attach_confirm = encode_vec(&X224(mcs::AttachUserConfirm {
        result: 0,
        initiator_id: 1007,
    }))
    .unwrap();
    connector.step(&attach_confirm, &mut buf).unwrap();

    // All join requests go out in one batch: user, I/O, then the statics in
    // request order.
    buf.clear();
    connector.step_no_input(&mut buf).unwrap();

    let join_requests: Vec<u16> = split_frames(buf.filled())
        .into_iter()
        .map(|frame| decode::<X224<mcs::ChannelJoinRequest>>(&frame).unwrap().0)
        .map(|request| {
            assert_eq!(request.initiator_id, 1007);
            request.channel_id
        })
        .collect();

    assert_eq!(join_requests, [1007, 1003, 1004, 1005, 1006]);

    // Confirm each join; each confirm must echo the requested id.
    for channel_id in join_requests {
        buf.clear();
        let confirm = encode_vec(&X224(mcs::ChannelJoinConfirm {
            result: 0,
            initiator_id: 1007,
            requested_channel_id: channel_id,
            channel_id,
        }))
        .unwrap();
        connector.step(&confirm, &mut buf).unwrap();
    }

    let ClientConnectorState::Connected { result } = connector.state else {
        panic!("expected the connector to be connected");
    };

    assert_eq!(result.io_channel_id, 1003);
    assert_eq!(result.user_channel_id, 1007);
    assert_eq!(result.selected_protocol, SecurityProtocol::HYBRID);
    assert!(result.encryption_methods.is_empty());

    // Every requested channel is bound to one of the returned ids.
    let mut bound: Vec<u16> = result.static_channels.channel_ids().collect();
    bound.sort_unstable();
    assert_eq!(bound, [1004, 1005, 1006]);
}

#[test]
fn rdp_selection_enables_legacy_encryption() {
    let mut connector = ClientConnector::new(test_config()).with_static_channel(DrdynvcClient::new());

    let mut buf = WriteBuf::new();
    drive_to_basic_settings(&mut connector, &mut buf, SecurityProtocol::RDP);

    buf.clear();
    connector.step_no_input(&mut buf).unwrap();

    buf.clear();
    connector
        .step(&connect_response(1003, vec![1004], 1007), &mut buf)
        .unwrap();

    buf.clear();
    connector.step_no_input(&mut buf).unwrap();
    buf.clear();
    connector.step_no_input(&mut buf).unwrap();

    buf.clear();
    let attach_confirm = encode_vec(&X224(mcs::AttachUserConfirm {
        result: 0,
        initiator_id: 1007,
    }))
    .unwrap();
    connector.step(&attach_confirm, &mut buf).unwrap();

    buf.clear();
    connector.step_no_input(&mut buf).unwrap();

    for channel_id in [1007u16, 1003, 1004] {
        buf.clear();
        let confirm = encode_vec(&X224(mcs::ChannelJoinConfirm {
            result: 0,
            initiator_id: 1007,
            requested_channel_id: channel_id,
            channel_id,
        }))
        .unwrap();
        connector.step(&confirm, &mut buf).unwrap();
    }

    let ClientConnectorState::Connected { result } = connector.state else {
        panic!("expected the connector to be connected");
    };

    assert_eq!(result.selected_protocol, SecurityProtocol::RDP);
    // 40-bit | 128-bit | FIPS
    assert_eq!(result.encryption_methods.bits(), 0x13);
}

#[test]
fn out_of_range_domain_parameters_fail_the_connection() {
    let mut connector = ClientConnector::new(test_config()).with_static_channel(DrdynvcClient::new());

    let mut buf = WriteBuf::new();
    drive_to_basic_settings(&mut connector, &mut buf, SecurityProtocol::HYBRID);

    buf.clear();
    connector.step_no_input(&mut buf).unwrap();

    let response = mcs::ConnectResponse {
        conference_create_response: ConferenceCreateResponse {
            user_id: 1007,
            gcc_blocks: ServerGccBlocks {
                core: ServerCoreData {
                    version: RDP_VERSION_5_PLUS,
                },
                security: ServerSecurityData {
                    encryption_method: EncryptionMethod::empty(),
                    encryption_level: 0,
                },
                network: ServerNetworkData {
                    io_channel: 1003,
                    channel_ids: vec![1004],
                },
            },
        },
        called_connect_id: 0,
        domain_parameters: mcs::DomainParameters {
            // below the client minimum of 1056
            max_mcs_pdu_size: 100,
            ..mcs::DomainParameters::target()
        },
    };

    buf.clear();
    let e = connector.step(&server_frame(&response), &mut buf).unwrap_err();
    assert!(matches!(e.kind(), ConnectorErrorKind::Reason(_)));
}
