use core::mem;

use tracing::debug;

use rdpmux_core::WriteBuf;
use rdpmux_pdu::x224::X224;
use rdpmux_pdu::{mcs, PduHint};

use crate::{ConnectorError, ConnectorErrorExt as _, ConnectorResult, Sequence, State, Written};

/// The MCS channel connection: erect domain, attach user, then one join per
/// channel.
///
/// Join requests are sent in a single batch (permitted since RDP 8.1) but in
/// deterministic order: user channel, I/O channel, then the static channels
/// in request order. Confirms may arrive in any order; each one must echo an
/// outstanding requested id.
#[derive(Default, Debug)]
#[non_exhaustive]
pub enum ChannelConnectionState {
    #[default]
    Consumed,

    SendErectDomainRequest,
    SendAttachUserRequest,
    WaitAttachUserConfirm,
    SendChannelJoinRequest {
        user_channel_id: u16,
        join_channel_ids: Vec<u16>,
    },
    WaitChannelJoinConfirm {
        user_channel_id: u16,
        remaining_channel_ids: Vec<u16>,
    },
    AllJoined {
        user_channel_id: u16,
    },
}

impl State for ChannelConnectionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::SendErectDomainRequest => "SendErectDomainRequest",
            Self::SendAttachUserRequest => "SendAttachUserRequest",
            Self::WaitAttachUserConfirm => "WaitAttachUserConfirm",
            Self::SendChannelJoinRequest { .. } => "SendChannelJoinRequest",
            Self::WaitChannelJoinConfirm { .. } => "WaitChannelJoinConfirm",
            Self::AllJoined { .. } => "AllJoined",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::AllJoined { .. })
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

#[derive(Debug)]
pub struct ChannelConnectionSequence {
    pub state: ChannelConnectionState,
    channel_ids: Vec<u16>,
}

impl ChannelConnectionSequence {
    pub fn new(io_channel_id: u16, channel_ids: Vec<u16>) -> Self {
        let mut join_channel_ids = vec![io_channel_id];
        join_channel_ids.extend(channel_ids.into_iter().filter(|id| *id != io_channel_id));

        Self {
            state: ChannelConnectionState::SendErectDomainRequest,
            channel_ids: join_channel_ids,
        }
    }
}

impl Sequence for ChannelConnectionSequence {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint> {
        match self.state {
            ChannelConnectionState::Consumed => None,
            ChannelConnectionState::SendErectDomainRequest => None,
            ChannelConnectionState::SendAttachUserRequest => None,
            ChannelConnectionState::WaitAttachUserConfirm => Some(&rdpmux_pdu::X224_HINT),
            ChannelConnectionState::SendChannelJoinRequest { .. } => None,
            ChannelConnectionState::WaitChannelJoinConfirm { .. } => Some(&rdpmux_pdu::X224_HINT),
            ChannelConnectionState::AllJoined { .. } => None,
        }
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written> {
        let (written, next_state) = match mem::take(&mut self.state) {
            ChannelConnectionState::Consumed => {
                return Err(general_err!(
                    "channel connection sequence state is consumed (this is a bug)",
                ))
            }

            ChannelConnectionState::SendErectDomainRequest => {
                let erect_domain_request = mcs::ErectDomainPdu {
                    sub_height: 0,
                    sub_interval: 0,
                };

                debug!(message = ?erect_domain_request, "Send");

                let written = rdpmux_core::encode_buf(&X224(erect_domain_request), output)
                    .map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    ChannelConnectionState::SendAttachUserRequest,
                )
            }

            ChannelConnectionState::SendAttachUserRequest => {
                let attach_user_request = mcs::AttachUserRequest;

                debug!(message = ?attach_user_request, "Send");

                let written =
                    rdpmux_core::encode_buf(&X224(attach_user_request), output).map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    ChannelConnectionState::WaitAttachUserConfirm,
                )
            }

            ChannelConnectionState::WaitAttachUserConfirm => {
                let attach_user_confirm: mcs::AttachUserConfirm =
                    rdpmux_core::decode::<X224<_>>(input).map_err(ConnectorError::decode)?.0;

                if attach_user_confirm.result != 0 {
                    return Err(reason_err!(
                        "AttachUserConfirm",
                        "server rejected the user attachment with result {}",
                        attach_user_confirm.result,
                    ));
                }

                let user_channel_id = attach_user_confirm.initiator_id;

                debug!(message = ?attach_user_confirm, user_channel_id, "Received");

                // The user channel is joined first.
                let mut join_channel_ids = vec![user_channel_id];
                join_channel_ids.extend(self.channel_ids.drain(..).filter(|id| *id != user_channel_id));

                (
                    Written::Nothing,
                    ChannelConnectionState::SendChannelJoinRequest {
                        user_channel_id,
                        join_channel_ids,
                    },
                )
            }

            // Send all the join requests in a single batch.
            // Waiting for each confirm before the next request is the
            // documented behavior up to RDP 8.0; batching is what RDP 8.1+
            // clients do to shorten the connection sequence.
            ChannelConnectionState::SendChannelJoinRequest {
                user_channel_id,
                join_channel_ids,
            } => {
                let mut total_written: usize = 0;

                debug_assert!(!join_channel_ids.is_empty());

                for channel_id in join_channel_ids.iter().copied() {
                    let channel_join_request = mcs::ChannelJoinRequest {
                        initiator_id: user_channel_id,
                        channel_id,
                    };

                    debug!(message = ?channel_join_request, "Send");

                    let written = rdpmux_core::encode_buf(&X224(channel_join_request), output)
                        .map_err(ConnectorError::encode)?;

                    total_written = total_written.checked_add(written).expect("small join request PDUs");
                }

                (
                    Written::from_size(total_written)?,
                    ChannelConnectionState::WaitChannelJoinConfirm {
                        user_channel_id,
                        remaining_channel_ids: join_channel_ids,
                    },
                )
            }

            ChannelConnectionState::WaitChannelJoinConfirm {
                user_channel_id,
                mut remaining_channel_ids,
            } => {
                let channel_join_confirm: mcs::ChannelJoinConfirm =
                    rdpmux_core::decode::<X224<_>>(input).map_err(ConnectorError::decode)?.0;

                debug!(message = ?channel_join_confirm, "Received");

                if channel_join_confirm.result != 0 {
                    return Err(reason_err!(
                        "ChannelJoinConfirm",
                        "server rejected the join of channel {} with result {}",
                        channel_join_confirm.requested_channel_id,
                        channel_join_confirm.result,
                    ));
                }

                if channel_join_confirm.initiator_id != user_channel_id {
                    tracing::warn!(
                        channel_join_confirm.initiator_id,
                        user_channel_id,
                        "Inconsistent initiator ID for MCS Channel Join Confirm",
                    )
                }

                let expected_position = remaining_channel_ids
                    .iter()
                    .position(|id| *id == channel_join_confirm.requested_channel_id);

                match expected_position {
                    Some(position) => {
                        remaining_channel_ids.remove(position);
                    }
                    None => {
                        return Err(reason_err!(
                            "ChannelJoinConfirm",
                            "unexpected requested_channel_id in MCS Channel Join Confirm: got {}, expected one of: {:?}",
                            channel_join_confirm.requested_channel_id,
                            remaining_channel_ids,
                        ))
                    }
                }

                if channel_join_confirm.requested_channel_id != channel_join_confirm.channel_id {
                    // Gracefully remapping the channel set would be possible,
                    // but no server has been observed doing this.
                    return Err(reason_err!(
                        "ChannelJoinConfirm",
                        "a channel was joined with a different channel ID than requested: requested {}, got {}",
                        channel_join_confirm.requested_channel_id,
                        channel_join_confirm.channel_id,
                    ));
                }

                let next_state = if remaining_channel_ids.is_empty() {
                    ChannelConnectionState::AllJoined { user_channel_id }
                } else {
                    ChannelConnectionState::WaitChannelJoinConfirm {
                        user_channel_id,
                        remaining_channel_ids,
                    }
                };

                (Written::Nothing, next_state)
            }

            ChannelConnectionState::AllJoined { .. } => return Err(general_err!("all channels are already joined")),
        };

        self.state = next_state;

        Ok(written)
    }

    fn state(&self) -> &dyn State {
        &self.state
    }
}
