use std::io::Read;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use rdpmux_blocking::Framed;
use rdpmux_core::decode;
use rdpmux_pdu::mcs::McsMessage;
use rdpmux_pdu::x224::X224;

use crate::manager::Shared;
use crate::worker::WorkerMessage;
use crate::{ChannelError, ChannelEvent, ChannelResult};

/// The reader loop: drains the transport one frame at a time and dispatches
/// send-data indications to the channel engines.
///
/// Exits on transport loss, a disconnect ultimatum or a protocol error, and
/// hands the shutdown over to the worker through the quit sentinel.
pub(crate) fn run_reader<R: Read>(stream: R, shared: Arc<Shared>, to_worker: Sender<WorkerMessage>) {
    debug!("Channel reader thread started");

    let mut framed = Framed::new(stream);

    loop {
        let frame = match framed.read_pdu() {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Transport closed");
                break;
            }
        };

        let message: X224<McsMessage> = match decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                // Malformed framing is a protocol error and fails the
                // connection.
                error!(error = %e, "Malformed MCS PDU");
                break;
            }
        };

        match message.0 {
            McsMessage::SendDataIndication(indication) => {
                if let Err(e) = dispatch(&shared, &to_worker, indication.channel_id, &indication.user_data) {
                    error!(
                        channel_id = indication.channel_id,
                        error = %e,
                        "Channel dispatch failed, closing the connection"
                    );
                    break;
                }
            }
            McsMessage::DisconnectProviderUltimatum(ultimatum) => {
                info!(reason = %ultimatum.reason, "Server disconnected");
                break;
            }
            other => {
                warn!(message = ?other, "Unexpected MCS message after the handshake, ignoring");
            }
        }
    }

    let _ = to_worker.send(WorkerMessage::Quit);

    info!("Channel reader thread finished");
}

fn dispatch(
    shared: &Shared,
    to_worker: &Sender<WorkerMessage>,
    channel_id: u16,
    user_data: &[u8],
) -> ChannelResult<()> {
    // Typed channel processors first; this covers the DRDYNVC engine.
    {
        let mut set = shared.static_channels.lock().expect("static channel set poisoned");

        if let Some((processor, chunk_processor)) = set.get_with_chunk_processor_mut(channel_id) {
            let payload = chunk_processor
                .process(user_data)
                .map_err(|e| ChannelError::Pdu(rdpmux_pdu::decode_err!(e)))?;

            if let Some(payload) = payload {
                let responses = processor.process(&payload).map_err(ChannelError::Pdu)?;

                if !responses.is_empty() {
                    let chunks = rdpmux_svc::chunkify(responses, shared.chunk_size)
                        .map_err(|e| ChannelError::Pdu(rdpmux_pdu::encode_err!(e)))?;

                    to_worker
                        .send(WorkerMessage::SendRaw {
                            mcs_channel_id: channel_id,
                            chunks,
                        })
                        .map_err(|_| ChannelError::NotReady)?;
                }
            }

            return Ok(());
        }
    }

    // Facade-registered static channels next.
    let complete = {
        let mut router = shared.router.lock().expect("router poisoned");

        if !router.contains_id(channel_id) {
            // Spurious traffic on ids outside the join set is dropped, never
            // fatal; observed on real servers.
            warn!(channel_id, "Send-data indication for an unknown channel id, dropping");
            return Ok(());
        }

        router
            .process_chunk(channel_id, user_data)
            .map_err(|e| ChannelError::Pdu(rdpmux_pdu::decode_err!(e)))?
    };

    if let Some((event_proc, payload)) = complete {
        let event = ChannelEvent::DataReceived { data: payload };

        if shared.async_dispatch {
            to_worker
                .send(WorkerMessage::Deliver { event_proc, event })
                .map_err(|_| ChannelError::NotReady)?;
        } else {
            event_proc.post(event);
        }
    }

    Ok(())
}
