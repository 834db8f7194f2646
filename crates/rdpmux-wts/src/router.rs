use tracing::warn;

use rdpmux_core::DecodeResult;
use rdpmux_pdu::gcc::{ChannelDef, ChannelName, ChannelOptions};
use rdpmux_svc::ChunkProcessor;

use crate::{ChannelError, ChannelResult, SharedEventProc};

pub(crate) const STATIC_CHANNELS_MAX: usize = 31;

/// One facade-registered static channel: the declared definition, the MCS id
/// the server bound it to, and the receive state once opened.
struct RouterChannel {
    name: ChannelName,
    options: ChannelOptions,
    channel_id: Option<u16>,
    open: Option<SharedEventProc>,
    chunk: ChunkProcessor,
}

/// Routes static channel traffic for channels registered through the WTS
/// facade, by the MCS channel id the server assigned them.
#[derive(Default)]
pub(crate) struct StaticChannelRouter {
    channels: Vec<RouterChannel>,
}

impl StaticChannelRouter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }

    /// Registers a channel definition ahead of the connection.
    pub(crate) fn register(&mut self, name: ChannelName, options: ChannelOptions) -> ChannelResult<()> {
        if self.channels.iter().any(|channel| channel.name == name) {
            return Err(ChannelError::AlreadyOpen);
        }

        self.channels.push(RouterChannel {
            name,
            options,
            channel_id: None,
            open: None,
            chunk: ChunkProcessor::new(),
        });

        Ok(())
    }

    /// The channel definitions, in registration order.
    pub(crate) fn channel_defs(&self) -> Vec<ChannelDef> {
        self.channels
            .iter()
            .map(|channel| ChannelDef {
                name: channel.name.clone(),
                options: channel.options,
            })
            .collect()
    }

    /// Binds the server-assigned ids, in registration order.
    pub(crate) fn bind_ids(&mut self, channel_ids: &[u16]) {
        if channel_ids.len() != self.channels.len() {
            warn!(
                assigned = channel_ids.len(),
                registered = self.channels.len(),
                "Server assigned a different number of channel ids than registered"
            );
        }

        for (channel, id) in self.channels.iter_mut().zip(channel_ids.iter().copied()) {
            channel.channel_id = Some(id);
        }
    }

    /// Binds the plugin to one previously registered channel.
    pub(crate) fn open(&mut self, name: &ChannelName, event_proc: SharedEventProc) -> ChannelResult<u16> {
        let channel = self
            .channels
            .iter_mut()
            .find(|channel| channel.name == *name)
            .ok_or(ChannelError::UnknownChannelName)?;

        if channel.open.is_some() {
            return Err(ChannelError::AlreadyOpen);
        }

        let channel_id = channel.channel_id.ok_or(ChannelError::NotReady)?;
        channel.open = Some(event_proc);

        Ok(channel_id)
    }

    pub(crate) fn close(&mut self, channel_id: u16) {
        if let Some(channel) = self
            .channels
            .iter_mut()
            .find(|channel| channel.channel_id == Some(channel_id))
        {
            channel.open = None;
        }
    }

    pub(crate) fn is_open(&self, channel_id: u16) -> bool {
        self.channels
            .iter()
            .any(|channel| channel.channel_id == Some(channel_id) && channel.open.is_some())
    }

    /// Feeds one received chunk through the channel's reassembly, returning
    /// the event procedure and the complete payload when the last chunk
    /// arrived.
    ///
    /// Returns `Ok(None)` either while reassembly is still in progress or
    /// when no channel matches the id.
    pub(crate) fn process_chunk(
        &mut self,
        channel_id: u16,
        chunk: &[u8],
    ) -> DecodeResult<Option<(SharedEventProc, Vec<u8>)>> {
        let Some(channel) = self
            .channels
            .iter_mut()
            .find(|channel| channel.channel_id == Some(channel_id))
        else {
            return Ok(None);
        };

        let Some(event_proc) = channel.open.clone() else {
            warn!(channel_id, "Data for a registered but unopened static channel, dropping");
            return Ok(None);
        };

        match channel.chunk.process(chunk)? {
            Some(payload) => Ok(Some((event_proc, payload))),
            None => Ok(None),
        }
    }

    pub(crate) fn contains_id(&self, channel_id: u16) -> bool {
        self.channels.iter().any(|channel| channel.channel_id == Some(channel_id))
    }
}
