use core::mem;

use tracing::{debug, info, warn};

use rdpmux_core::{decode, WriteBuf};
use rdpmux_pdu::gcc::{
    ChannelDef, ClientClusterData, ClientCoreData, ClientGccBlocks, ClientNetworkData, ClientSecurityData,
    ConferenceCreateRequest, EncryptionMethod, RDP_VERSION_5_PLUS,
};
use rdpmux_pdu::nego::{self, SecurityProtocol};
use rdpmux_pdu::x224::{X224, X224Data};
use rdpmux_pdu::{mcs, PduHint};
use rdpmux_svc::{make_channel_definition, SvcProcessor, StaticChannelSet};

use crate::channel_connection::ChannelConnectionSequence;
use crate::{
    encode_x224_packet, Config, ConnectorError, ConnectorErrorExt as _, ConnectorResult, NegotiationFailure, Sequence,
    State, Written,
};

/// The outcome of a completed connection sequence.
#[derive(Debug)]
pub struct ConnectionResult {
    pub io_channel_id: u16,
    pub user_channel_id: u16,
    pub static_channels: StaticChannelSet,
    /// Ids assigned to the extra channel definitions, in registration order.
    pub extra_channel_ids: Vec<u16>,
    pub selected_protocol: SecurityProtocol,
    /// RDP-layer encryption methods in effect.
    ///
    /// Empty when the transport handles encryption (TLS or NLA); the legacy
    /// 40/128-bit and FIPS mask otherwise.
    pub encryption_methods: EncryptionMethod,
}

#[derive(Default, Debug)]
#[non_exhaustive]
pub enum ClientConnectorState {
    #[default]
    Consumed,

    ConnectionInitiationSendRequest,
    ConnectionInitiationWaitConfirm {
        requested_protocol: SecurityProtocol,
    },
    /// The transport is expected to be upgraded (TLS handshake, CredSSP)
    /// between this state and the next; the upgrade itself is out of scope.
    EnhancedSecurityUpgrade {
        selected_protocol: SecurityProtocol,
    },
    BasicSettingsExchangeSendInitial {
        selected_protocol: SecurityProtocol,
    },
    BasicSettingsExchangeWaitResponse {
        selected_protocol: SecurityProtocol,
        connect_initial: mcs::ConnectInitial,
    },
    ChannelConnection {
        selected_protocol: SecurityProtocol,
        io_channel_id: u16,
        extra_channel_ids: Vec<u16>,
        channel_connection: ChannelConnectionSequence,
    },
    Connected {
        result: ConnectionResult,
    },
}

impl State for ClientConnectorState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::ConnectionInitiationSendRequest => "ConnectionInitiationSendRequest",
            Self::ConnectionInitiationWaitConfirm { .. } => "ConnectionInitiationWaitConfirm",
            Self::EnhancedSecurityUpgrade { .. } => "EnhancedSecurityUpgrade",
            Self::BasicSettingsExchangeSendInitial { .. } => "BasicSettingsExchangeSendInitial",
            Self::BasicSettingsExchangeWaitResponse { .. } => "BasicSettingsExchangeWaitResponse",
            Self::ChannelConnection { channel_connection, .. } => channel_connection.state().name(),
            Self::Connected { .. } => "Connected",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

/// The client-side connection sequence up to the point where every channel
/// is joined.
///
/// Licensing, capability exchange and connection finalization belong to the
/// RDP session layer on top.
#[derive(Debug)]
pub struct ClientConnector {
    pub config: Config,
    pub state: ClientConnectorState,
    pub static_channels: StaticChannelSet,
    /// Channel definitions declared outside the typed channel set (e.g. by
    /// the WTS facade); requested after the typed channels.
    pub extra_channels: Vec<ChannelDef>,
}

impl ClientConnector {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: ClientConnectorState::ConnectionInitiationSendRequest,
            static_channels: StaticChannelSet::new(),
            extra_channels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_extra_channel(mut self, channel: ChannelDef) -> Self {
        self.extra_channels.push(channel);
        self
    }

    pub fn attach_extra_channel(&mut self, channel: ChannelDef) {
        self.extra_channels.push(channel);
    }

    #[must_use]
    pub fn with_static_channel<T>(mut self, channel: T) -> Self
    where
        T: SvcProcessor + 'static,
    {
        self.static_channels.insert(channel);
        self
    }

    pub fn attach_static_channel<T>(&mut self, channel: T)
    where
        T: SvcProcessor + 'static,
    {
        self.static_channels.insert(channel);
    }

    /// True while the sequence is paused for the out-of-band transport
    /// upgrade (TLS/CredSSP).
    pub fn should_perform_security_upgrade(&self) -> bool {
        matches!(self.state, ClientConnectorState::EnhancedSecurityUpgrade { .. })
    }

    /// # Panics
    ///
    /// Panics if state is not [`ClientConnectorState::EnhancedSecurityUpgrade`].
    pub fn mark_security_upgrade_as_done(&mut self) {
        assert!(self.should_perform_security_upgrade());
        self.step(&[], &mut WriteBuf::new()).expect("transition to next state");
        debug_assert!(!self.should_perform_security_upgrade());
    }

    fn build_gcc_blocks(&self) -> ClientGccBlocks {
        let mut channels: Vec<ChannelDef> = self.static_channels.values().map(make_channel_definition).collect();
        channels.extend(self.extra_channels.iter().cloned());

        let config = &self.config;

        ClientGccBlocks {
            core: ClientCoreData {
                version: RDP_VERSION_5_PLUS,
                desktop_width: config.desktop_size.width,
                desktop_height: config.desktop_size.height,
                keyboard_layout: config.keyboard_layout,
                client_build: config.client_build,
                client_name: config.client_name.clone(),
                keyboard_type: config.keyboard_type,
                keyboard_subtype: config.keyboard_subtype,
                keyboard_functional_keys_count: config.keyboard_functional_keys_count,
                ime_file_name: config.ime_file_name.clone(),
            },
            security: ClientSecurityData::no_security(),
            network: (!channels.is_empty()).then_some(ClientNetworkData { channels }),
            cluster: Some(ClientClusterData {
                flags: 0,
                redirected_session_id: 0,
            }),
        }
    }
}

impl Sequence for ClientConnector {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint> {
        match &self.state {
            ClientConnectorState::Consumed => None,
            ClientConnectorState::ConnectionInitiationSendRequest => None,
            ClientConnectorState::ConnectionInitiationWaitConfirm { .. } => Some(&rdpmux_pdu::X224_HINT),
            ClientConnectorState::EnhancedSecurityUpgrade { .. } => None,
            ClientConnectorState::BasicSettingsExchangeSendInitial { .. } => None,
            ClientConnectorState::BasicSettingsExchangeWaitResponse { .. } => Some(&rdpmux_pdu::X224_HINT),
            ClientConnectorState::ChannelConnection { channel_connection, .. } => channel_connection.next_pdu_hint(),
            ClientConnectorState::Connected { .. } => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written> {
        let (written, next_state) = match mem::take(&mut self.state) {
            ClientConnectorState::Consumed => {
                return Err(general_err!("connector sequence state is consumed (this is a bug)"))
            }

            ClientConnectorState::ConnectionInitiationSendRequest => {
                let requested_protocol = self.config.initial_security_protocol();

                let connection_request = nego::ConnectionRequest {
                    nego_data: self.config.request_data.clone(),
                    flags: nego::RequestFlags::empty(),
                    protocol: requested_protocol,
                };

                debug!(message = ?connection_request, "Send");

                let written =
                    rdpmux_core::encode_buf(&X224(connection_request), output).map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::ConnectionInitiationWaitConfirm { requested_protocol },
                )
            }

            ClientConnectorState::ConnectionInitiationWaitConfirm { requested_protocol } => {
                let connection_confirm: nego::ConnectionConfirm =
                    decode::<X224<_>>(input).map_err(ConnectorError::decode)?.0;

                debug!(message = ?connection_confirm, "Received");

                let selected_protocol = match connection_confirm {
                    nego::ConnectionConfirm::Response { flags, protocol } => {
                        debug!(?flags, ?protocol, "Server negotiation response");
                        protocol
                    }
                    nego::ConnectionConfirm::Failure { code } => {
                        return Err(ConnectorError::negotiation(NegotiationFailure::from(code)));
                    }
                };

                if !(selected_protocol == SecurityProtocol::RDP
                    || requested_protocol.contains(selected_protocol))
                {
                    return Err(reason_err!(
                        "Negotiation",
                        "server selected a security protocol that was never requested: {selected_protocol:?}",
                    ));
                }

                (
                    Written::Nothing,
                    ClientConnectorState::EnhancedSecurityUpgrade { selected_protocol },
                )
            }

            ClientConnectorState::EnhancedSecurityUpgrade { selected_protocol } => (
                Written::Nothing,
                ClientConnectorState::BasicSettingsExchangeSendInitial { selected_protocol },
            ),

            ClientConnectorState::BasicSettingsExchangeSendInitial { selected_protocol } => {
                let connect_initial = mcs::ConnectInitial::with_conference_create_request(ConferenceCreateRequest {
                    gcc_blocks: self.build_gcc_blocks(),
                });

                debug!(message = ?connect_initial, "Send");

                let written = encode_x224_packet(&connect_initial, output)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::BasicSettingsExchangeWaitResponse {
                        selected_protocol,
                        connect_initial,
                    },
                )
            }

            ClientConnectorState::BasicSettingsExchangeWaitResponse {
                selected_protocol,
                connect_initial,
            } => {
                let x224_payload: X224<X224Data> = decode(input).map_err(ConnectorError::decode)?;
                let connect_response: mcs::ConnectResponse =
                    decode(&x224_payload.0.data).map_err(ConnectorError::decode)?;

                debug!(message = ?connect_response, "Received");

                let negotiated = &connect_response.domain_parameters;
                if let Err(field) =
                    negotiated.is_within(&connect_initial.min_parameters, &connect_initial.max_parameters)
                {
                    return Err(reason_err!(
                        "BasicSettingsExchange",
                        "negotiated domain parameter `{field}` outside the requested range",
                    ));
                }

                let io_channel_id = connect_response.io_channel_id();
                let joined_channel_ids = connect_response.channel_ids().to_vec();

                let requested_channel_count = connect_initial.channel_names().map(<[_]>::len).unwrap_or(0);

                if joined_channel_ids.len() != requested_channel_count {
                    return Err(reason_err!(
                        "BasicSettingsExchange",
                        "server answered {} channel ids for {} requested channels",
                        joined_channel_ids.len(),
                        requested_channel_count,
                    ));
                }

                // The nth requested channel binds to the nth returned id.
                // The iteration order here must match `build_gcc_blocks`:
                // typed channels first, extra definitions after.
                let type_ids: Vec<_> = self.static_channels.type_ids().collect();
                let typed_count = type_ids.len();
                for (type_id, channel_id) in type_ids.into_iter().zip(joined_channel_ids.iter().copied()) {
                    self.static_channels.attach_channel_id(type_id, channel_id);
                }

                let extra_channel_ids = joined_channel_ids[typed_count..].to_vec();

                (
                    Written::Nothing,
                    ClientConnectorState::ChannelConnection {
                        selected_protocol,
                        io_channel_id,
                        extra_channel_ids,
                        channel_connection: ChannelConnectionSequence::new(io_channel_id, joined_channel_ids),
                    },
                )
            }

            ClientConnectorState::ChannelConnection {
                selected_protocol,
                io_channel_id,
                extra_channel_ids,
                mut channel_connection,
            } => {
                let written = channel_connection.step(input, output)?;

                let next_state = if let crate::channel_connection::ChannelConnectionState::AllJoined {
                    user_channel_id,
                } = channel_connection.state
                {
                    // A final RDP selection downgrades to RDP-layer
                    // encryption; TLS and NLA leave it to the transport.
                    let encryption_methods = if selected_protocol == SecurityProtocol::RDP {
                        warn!("Legacy RDP security selected, RDP-layer encryption is required");
                        EncryptionMethod::BIT_40 | EncryptionMethod::BIT_128 | EncryptionMethod::FIPS
                    } else {
                        EncryptionMethod::empty()
                    };

                    info!(io_channel_id, user_channel_id, "Channel connection finished");

                    ClientConnectorState::Connected {
                        result: ConnectionResult {
                            io_channel_id,
                            user_channel_id,
                            static_channels: self.static_channels.take(),
                            extra_channel_ids,
                            selected_protocol,
                            encryption_methods,
                        },
                    }
                } else {
                    ClientConnectorState::ChannelConnection {
                        selected_protocol,
                        io_channel_id,
                        extra_channel_ids,
                        channel_connection,
                    }
                };

                (written, next_state)
            }

            ClientConnectorState::Connected { .. } => return Err(general_err!("already connected")),
        };

        self.state = next_state;

        Ok(written)
    }
}
