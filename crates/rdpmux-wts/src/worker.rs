use std::io::{self, Write};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use rdpmux_dvc::DynamicChannelId;
use rdpmux_pdu::mcs::SendDataRequest;
use rdpmux_pdu::x224::X224;
use rdpmux_svc::SvcMessage;

use crate::manager::Shared;
use crate::{ChannelEvent, SharedEventProc};

/// Messages drained by the worker thread, the sole writer to the transport.
pub(crate) enum WorkerMessage {
    /// A plugin write on a dynamic channel; fragmented into DVC data PDUs.
    WriteDynamic {
        channel_id: DynamicChannelId,
        payload: Vec<u8>,
        user_data: usize,
        event_proc: SharedEventProc,
    },
    /// A plugin write on a static channel; split into CHANNEL_PDU chunks.
    WriteStatic {
        mcs_channel_id: u16,
        payload: Vec<u8>,
        user_data: usize,
        event_proc: SharedEventProc,
    },
    /// Pre-chunked channel data (processor responses, control PDUs).
    SendRaw {
        mcs_channel_id: u16,
        chunks: Vec<Vec<u8>>,
    },
    /// An event handed off by the reader when the session dispatches
    /// asynchronously.
    Deliver {
        event_proc: SharedEventProc,
        event: ChannelEvent,
    },
    /// Shutdown sentinel: drain, cancel, close channels, drop the transport.
    Quit,
}

pub(crate) fn run_worker<W: Write>(mut write: W, rx: Receiver<WorkerMessage>, shared: Arc<Shared>) {
    debug!("Channel worker thread started");

    loop {
        let message = match rx.recv() {
            Ok(message) => message,
            Err(_) => break,
        };

        match message {
            WorkerMessage::Quit => {
                drain_cancelled(&rx);
                send_disconnect(&mut write, &shared);
                break;
            }
            message => {
                if let Err(e) = process_message(&mut write, &shared, message) {
                    error!(error = %e, "Transport write failed, shutting the session down");
                    drain_cancelled(&rx);
                    break;
                }
            }
        }
    }

    // Every channel still running observes its close callback before the
    // transport goes away.
    let _ = shared.with_drdynvc(|drdynvc| drdynvc.drain_channels());

    for event_proc in &shared.init_event_procs {
        event_proc.post(ChannelEvent::Disconnected);
    }
    for event_proc in &shared.init_event_procs {
        event_proc.post(ChannelEvent::Terminated);
    }

    info!("Channel worker thread finished");

    // The transport write half drops last.
    drop(write);
}

/// An orderly goodbye: disconnect ultimatum, then the X.224 disconnect.
///
/// Write failures are irrelevant at this point; the transport may already
/// be gone.
fn send_disconnect<W: Write>(write: &mut W, shared: &Shared) {
    use rdpmux_pdu::mcs::{DisconnectProviderUltimatum, DisconnectReason};
    use rdpmux_pdu::x224::X224DisconnectRequest;

    let ultimatum = X224(DisconnectProviderUltimatum::from_reason(DisconnectReason::UserRequested));
    let disconnect = X224(X224DisconnectRequest);

    for pdu in [rdpmux_core::encode_vec(&ultimatum), rdpmux_core::encode_vec(&disconnect)] {
        let Ok(frame) = pdu else { return };

        let mut buffer = shared.pool.take();
        buffer.extend_from_slice(&frame);

        if write.write_all(&buffer).is_err() {
            return;
        }
    }

    let _ = write.flush();
}

/// Cancels whatever was still queued behind the shutdown sentinel.
fn drain_cancelled(rx: &Receiver<WorkerMessage>) {
    for message in rx.try_iter() {
        match message {
            WorkerMessage::WriteDynamic {
                user_data, event_proc, ..
            }
            | WorkerMessage::WriteStatic {
                user_data, event_proc, ..
            } => {
                event_proc.post(ChannelEvent::WriteCancelled { user_data });
            }
            // Data queued behind the shutdown is never delivered; the
            // channels are already closing.
            WorkerMessage::Deliver { .. } | WorkerMessage::SendRaw { .. } | WorkerMessage::Quit => {}
        }
    }
}

fn process_message<W: Write>(write: &mut W, shared: &Shared, message: WorkerMessage) -> io::Result<()> {
    match message {
        WorkerMessage::WriteDynamic {
            channel_id,
            payload,
            user_data,
            event_proc,
        } => {
            let Some(drdynvc_channel_id) = shared.drdynvc_channel_id else {
                event_proc.post(ChannelEvent::WriteCancelled { user_data });
                return Ok(());
            };

            // The channel state is re-checked under the engine lock right
            // before fragmenting: a write racing a close is cancelled here
            // instead of escaping to the wire.
            let chunks = shared
                .with_drdynvc(|drdynvc| drdynvc.encode_data(channel_id, vec![Box::new(payload)]))
                .map_err(io::Error::other)?
                .and_then(|messages| chunkify(shared, messages));

            match chunks {
                Ok(chunks) => {
                    write_chunks(write, shared, drdynvc_channel_id, chunks)?;
                    event_proc.post(ChannelEvent::WriteComplete { user_data });
                }
                Err(e) => {
                    warn!(channel_id, error = %e, "Dynamic channel write cancelled");
                    event_proc.post(ChannelEvent::WriteCancelled { user_data });
                }
            }
        }
        WorkerMessage::WriteStatic {
            mcs_channel_id,
            payload,
            user_data,
            event_proc,
        } => {
            let chunks = rdpmux_svc::chunkify(vec![SvcMessage::from(payload)], shared.chunk_size);

            match chunks {
                Ok(chunks) => {
                    write_chunks(write, shared, mcs_channel_id, chunks)?;
                    event_proc.post(ChannelEvent::WriteComplete { user_data });
                }
                Err(e) => {
                    warn!(mcs_channel_id, error = %e, "Static channel write cancelled");
                    event_proc.post(ChannelEvent::WriteCancelled { user_data });
                }
            }
        }
        WorkerMessage::SendRaw {
            mcs_channel_id,
            chunks,
        } => {
            write_chunks(write, shared, mcs_channel_id, chunks)?;
        }
        WorkerMessage::Deliver { event_proc, event } => {
            event_proc.post(event);
        }
        WorkerMessage::Quit => {}
    }

    Ok(())
}

fn chunkify(shared: &Shared, messages: Vec<SvcMessage>) -> Result<Vec<Vec<u8>>, rdpmux_pdu::PduError> {
    rdpmux_svc::chunkify(messages, shared.chunk_size).map_err(|e| rdpmux_pdu::encode_err!(e))
}

/// Wraps each chunk as an MCS send-data request and writes the frames.
fn write_chunks<W: Write>(
    write: &mut W,
    shared: &Shared,
    mcs_channel_id: u16,
    chunks: Vec<Vec<u8>>,
) -> io::Result<()> {
    for chunk in chunks {
        let pdu = X224(SendDataRequest {
            initiator_id: shared.user_channel_id,
            channel_id: mcs_channel_id,
            user_data: chunk,
        });

        let mut buffer = shared.pool.take();
        buffer.resize(rdpmux_core::Encode::size(&pdu), 0);
        rdpmux_core::encode(&pdu, &mut buffer).map_err(io::Error::other)?;

        write.write_all(&buffer)?;
    }

    write.flush()
}
