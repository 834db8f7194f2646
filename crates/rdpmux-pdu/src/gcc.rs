//! The GCC conference-create blocks carried as MCS connect user data.
//!
//! Only the blocks the channel stack consumes are modelled: client/server
//! core, security and network data plus the optional cluster block. The
//! whole set is wrapped in the T.124 conference-create PER framing.

use bitflags::bitflags;

use rdpmux_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, other_err, Decode, DecodeResult, Encode,
    EncodeResult, ReadCursor, WriteCursor,
};

use crate::{mcs, per};

const CHANNELS_MAX: usize = 31;

const CLIENT_CHANNEL_OPTIONS_SIZE: usize = 4;
const CLIENT_CHANNEL_SIZE: usize = ChannelName::SIZE + CLIENT_CHANNEL_OPTIONS_SIZE;

const SERVER_IO_CHANNEL_SIZE: usize = 2;
const SERVER_CHANNEL_COUNT_SIZE: usize = 2;
const SERVER_CHANNEL_SIZE: usize = 2;

const USER_DATA_HEADER_SIZE: usize = 4;

const CS_CORE: u16 = 0xC001;
const CS_SECURITY: u16 = 0xC002;
const CS_NET: u16 = 0xC003;
const CS_CLUSTER: u16 = 0xC004;

const SC_CORE: u16 = 0x0C01;
const SC_SECURITY: u16 = 0x0C02;
const SC_NET: u16 = 0x0C03;

/// RDP 5.0 and up, the only version this client advertises.
pub const RDP_VERSION_5_PLUS: u32 = 0x0008_0004;

const COLOR_DEPTH_8BPP: u16 = 0xCA01;
const SECURE_ACCESS_SEQUENCE: u16 = 0xAA03;

const CLIENT_NAME_SIZE: usize = 32;
const IME_FILE_NAME_SIZE: usize = 64;

/// An 8-byte array containing a null-terminated collection of seven ANSI characters
/// with the purpose of uniquely identifying a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName {
    inner: [u8; Self::SIZE],
}

impl ChannelName {
    pub const SIZE: usize = 8;

    /// Creates a channel name using the provided array, ensuring the last byte is always the null terminator.
    pub const fn new(mut value: [u8; Self::SIZE]) -> Self {
        value[Self::SIZE - 1] = 0;

        Self { inner: value }
    }

    /// Converts an UTF-8 string into a channel name by copying up to 7 bytes.
    pub fn from_utf8(value: &str) -> Option<Self> {
        let mut inner = [0; Self::SIZE];

        value
            .chars()
            .take(Self::SIZE - 1)
            .zip(inner.iter_mut())
            .try_for_each(|(src, dst)| {
                let c = u8::try_from(src).ok()?;
                c.is_ascii().then(|| *dst = c)
            })?;

        Some(Self { inner })
    }

    /// Converts a static u8 array into a channel name.
    ///
    /// # Panics
    ///
    /// Panics if input is not null-terminated.
    pub const fn from_static(value: &[u8; 8]) -> Self {
        if value[Self::SIZE - 1] != 0 {
            panic!("channel name must be null-terminated")
        }

        Self { inner: *value }
    }

    /// Returns the underlying raw representation of the channel name (an 8-byte array).
    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.inner
    }

    /// Get a `&str` if this channel name is a valid ASCII string.
    pub fn as_str(&self) -> Option<&str> {
        if self.inner.iter().all(u8::is_ascii) {
            let terminator_idx = self
                .inner
                .iter()
                .position(|c| *c == 0)
                .expect("null-terminated ASCII string");
            Some(core::str::from_utf8(&self.inner[..terminator_idx]).expect("ASCII characters"))
        } else {
            None
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ChannelOptions: u32 {
        const INITIALIZED = 0x8000_0000;
        const ENCRYPT_RDP = 0x4000_0000;
        const ENCRYPT_SC = 0x2000_0000;
        const ENCRYPT_CS = 0x1000_0000;
        const PRI_HIGH = 0x0800_0000;
        const PRI_MED = 0x0400_0000;
        const PRI_LOW = 0x0200_0000;
        const COMPRESS_RDP = 0x0080_0000;
        const COMPRESS = 0x0040_0000;
        const SHOW_PROTOCOL = 0x0020_0000;
        const REMOTE_CONTROL_PERSISTENT = 0x0010_0000;
    }
}

/// Channel Definition Structure (CHANNEL_DEF)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDef {
    pub name: ChannelName,
    pub options: ChannelOptions,
}

impl ChannelDef {
    const NAME: &'static str = "ChannelDef";

    const FIXED_PART_SIZE: usize = CLIENT_CHANNEL_SIZE;
}

impl Encode for ChannelDef {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_slice(self.name.as_bytes());
        dst.write_u32(self.options.bits());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ChannelDef {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let name = ChannelName::new(src.read_array());

        let options = ChannelOptions::from_bits(src.read_u32())
            .ok_or_else(|| invalid_field_err!("options", "invalid channel options"))?;

        Ok(Self { name, options })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientNetworkData {
    pub channels: Vec<ChannelDef>,
}

impl ClientNetworkData {
    const NAME: &'static str = "ClientNetworkData";

    const FIXED_PART_SIZE: usize = 4 /* channelCount */;
}

impl Encode for ClientNetworkData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        // Truncating here would declare a channelCount that disagrees with
        // the entries actually written; over-long sets are refused outright,
        // mirroring the decoder.
        if self.channels.len() > CHANNELS_MAX {
            return Err(invalid_field_err!("channelCount", "invalid channel count"));
        }

        dst.write_u32(cast_length!("channelCount", self.channels.len())?);

        for channel in self.channels.iter() {
            channel.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.channels.len() * CLIENT_CHANNEL_SIZE
    }
}

impl<'de> Decode<'de> for ClientNetworkData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let channel_count: usize = cast_length!("channelCount", src.read_u32())?;

        if channel_count > CHANNELS_MAX {
            return Err(invalid_field_err!("channelCount", "invalid channel count"));
        }

        let mut channels = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            channels.push(ChannelDef::decode(src)?);
        }

        Ok(Self { channels })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNetworkData {
    pub io_channel: u16,
    pub channel_ids: Vec<u16>,
}

impl ServerNetworkData {
    const NAME: &'static str = "ServerNetworkData";

    const FIXED_PART_SIZE: usize = SERVER_IO_CHANNEL_SIZE + SERVER_CHANNEL_COUNT_SIZE;

    fn write_padding(&self) -> bool {
        self.channel_ids.len() % 2 != 0
    }
}

impl Encode for ServerNetworkData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.io_channel);
        dst.write_u16(cast_length!("channelCount", self.channel_ids.len())?);

        for channel_id in self.channel_ids.iter() {
            dst.write_u16(*channel_id);
        }

        // The structure size must stay a multiple of 4; an odd channel count
        // leaves a trailing 2-byte pad.
        if self.write_padding() {
            dst.write_u16(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let padding_size = if self.write_padding() { 2 } else { 0 };

        Self::FIXED_PART_SIZE + self.channel_ids.len() * SERVER_CHANNEL_SIZE + padding_size
    }
}

impl<'de> Decode<'de> for ServerNetworkData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let io_channel = src.read_u16();
        let channel_count: usize = cast_length!("channelCount", src.read_u16())?;

        ensure_size!(in: src, size: channel_count * 2);
        let mut channel_ids = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            channel_ids.push(src.read_u16());
        }

        if src.len() >= 2 {
            rdpmux_core::read_padding!(src, 2);
        }

        Ok(Self {
            io_channel,
            channel_ids,
        })
    }
}

/// The fixed part of TS_UD_CS_CORE. The optional trailing fields are not
/// emitted by this client and are ignored on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCoreData {
    pub version: u32,
    pub desktop_width: u16,
    pub desktop_height: u16,
    pub keyboard_layout: u32,
    pub client_build: u32,
    /// Truncated to 15 characters on the wire.
    pub client_name: String,
    pub keyboard_type: u32,
    pub keyboard_subtype: u32,
    pub keyboard_functional_keys_count: u32,
    pub ime_file_name: String,
}

impl ClientCoreData {
    const NAME: &'static str = "ClientCoreData";

    const FIXED_PART_SIZE: usize = 4 /* version */
        + 2 /* desktopWidth */
        + 2 /* desktopHeight */
        + 2 /* colorDepth */
        + 2 /* SASSequence */
        + 4 /* keyboardLayout */
        + 4 /* clientBuild */
        + CLIENT_NAME_SIZE
        + 4 /* keyboardType */
        + 4 /* keyboardSubType */
        + 4 /* keyboardFunctionKey */
        + IME_FILE_NAME_SIZE;
}

impl Encode for ClientCoreData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.version);
        dst.write_u16(self.desktop_width);
        dst.write_u16(self.desktop_height);
        dst.write_u16(COLOR_DEPTH_8BPP);
        dst.write_u16(SECURE_ACCESS_SEQUENCE);
        dst.write_u32(self.keyboard_layout);
        dst.write_u32(self.client_build);
        write_utf16_fixed(dst, &self.client_name, CLIENT_NAME_SIZE);
        dst.write_u32(self.keyboard_type);
        dst.write_u32(self.keyboard_subtype);
        dst.write_u32(self.keyboard_functional_keys_count);
        write_utf16_fixed(dst, &self.ime_file_name, IME_FILE_NAME_SIZE);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ClientCoreData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let version = src.read_u32();
        let desktop_width = src.read_u16();
        let desktop_height = src.read_u16();
        let _color_depth = src.read_u16();
        let _sas_sequence = src.read_u16();
        let keyboard_layout = src.read_u32();
        let client_build = src.read_u32();
        let client_name = read_utf16_fixed(src, CLIENT_NAME_SIZE);
        let keyboard_type = src.read_u32();
        let keyboard_subtype = src.read_u32();
        let keyboard_functional_keys_count = src.read_u32();
        let ime_file_name = read_utf16_fixed(src, IME_FILE_NAME_SIZE);

        Ok(Self {
            version,
            desktop_width,
            desktop_height,
            keyboard_layout,
            client_build,
            client_name,
            keyboard_type,
            keyboard_subtype,
            keyboard_functional_keys_count,
            ime_file_name,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCoreData {
    pub version: u32,
}

impl ServerCoreData {
    const NAME: &'static str = "ServerCoreData";

    const FIXED_PART_SIZE: usize = 4 /* version */;
}

impl Encode for ServerCoreData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.version);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ServerCoreData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let version = src.read_u32();

        // The optional clientRequestedProtocols and earlyCapabilityFlags
        // fields are not consumed by this stack.
        src.advance(src.len());

        Ok(Self { version })
    }
}

bitflags! {
    /// TS_UD_CS_SEC / TS_UD_SC_SEC1 encryption method bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct EncryptionMethod: u32 {
        const BIT_40 = 0x0000_0001;
        const BIT_128 = 0x0000_0002;
        const BIT_56 = 0x0000_0008;
        const FIPS = 0x0000_0010;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecurityData {
    pub encryption_methods: EncryptionMethod,
    pub ext_encryption_methods: u32,
}

impl ClientSecurityData {
    const NAME: &'static str = "ClientSecurityData";

    const FIXED_PART_SIZE: usize = 4 /* encryptionMethods */ + 4 /* extEncryptionMethods */;

    /// Security data for a connection whose encryption is handled by the
    /// transport (TLS or NLA).
    pub fn no_security() -> Self {
        Self {
            encryption_methods: EncryptionMethod::empty(),
            ext_encryption_methods: 0,
        }
    }
}

impl Encode for ClientSecurityData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.encryption_methods.bits());
        dst.write_u32(self.ext_encryption_methods);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ClientSecurityData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let encryption_methods = EncryptionMethod::from_bits(src.read_u32())
            .ok_or_else(|| invalid_field_err!("encryptionMethods", "invalid encryption methods"))?;
        let ext_encryption_methods = src.read_u32();

        Ok(Self {
            encryption_methods,
            ext_encryption_methods,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSecurityData {
    pub encryption_method: EncryptionMethod,
    pub encryption_level: u32,
}

impl ServerSecurityData {
    const NAME: &'static str = "ServerSecurityData";

    const FIXED_PART_SIZE: usize = 4 /* encryptionMethod */ + 4 /* encryptionLevel */;
}

impl Encode for ServerSecurityData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.encryption_method.bits());
        dst.write_u32(self.encryption_level);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ServerSecurityData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let encryption_method = EncryptionMethod::from_bits(src.read_u32())
            .ok_or_else(|| invalid_field_err!("encryptionMethod", "invalid encryption method"))?;
        let encryption_level = src.read_u32();

        // serverRandom and serverCertificate belong to the RDP security
        // layer, which is out of scope here.
        src.advance(src.len());

        Ok(Self {
            encryption_method,
            encryption_level,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientClusterData {
    pub flags: u32,
    pub redirected_session_id: u32,
}

impl ClientClusterData {
    const NAME: &'static str = "ClientClusterData";

    const FIXED_PART_SIZE: usize = 4 /* flags */ + 4 /* redirectedSessionId */;
}

impl Encode for ClientClusterData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.flags);
        dst.write_u32(self.redirected_session_id);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ClientClusterData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags = src.read_u32();
        let redirected_session_id = src.read_u32();

        Ok(Self {
            flags,
            redirected_session_id,
        })
    }
}

/// Client MCS Connect Initial PDU user data blocks.
///
/// Core, security and network blocks are mandatory per MS-RDPBCGR; the
/// network block is kept optional because FreeRDP omits it when there is no
/// channel to join and Windows servers accept that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientGccBlocks {
    pub core: ClientCoreData,
    pub security: ClientSecurityData,
    pub network: Option<ClientNetworkData>,
    pub cluster: Option<ClientClusterData>,
}

impl ClientGccBlocks {
    const NAME: &'static str = "ClientGccBlocks";

    pub fn channel_names(&self) -> Option<&[ChannelDef]> {
        self.network.as_ref().map(|network| network.channels.as_slice())
    }
}

impl Encode for ClientGccBlocks {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        write_user_data_block(dst, CS_CORE, &self.core)?;
        write_user_data_block(dst, CS_SECURITY, &self.security)?;

        if let Some(ref network) = self.network {
            write_user_data_block(dst, CS_NET, network)?;
        }
        if let Some(ref cluster) = self.cluster {
            write_user_data_block(dst, CS_CLUSTER, cluster)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let mut size = USER_DATA_HEADER_SIZE * 2 + self.core.size() + self.security.size();

        if let Some(ref network) = self.network {
            size += USER_DATA_HEADER_SIZE + network.size();
        }
        if let Some(ref cluster) = self.cluster {
            size += USER_DATA_HEADER_SIZE + cluster.size();
        }

        size
    }
}

impl<'de> Decode<'de> for ClientGccBlocks {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let mut core = None;
        let mut security = None;
        let mut network = None;
        let mut cluster = None;

        while src.len() >= USER_DATA_HEADER_SIZE {
            let (block_type, mut block) = read_user_data_block(src)?;

            match block_type {
                CS_CORE => core = Some(ClientCoreData::decode(&mut block)?),
                CS_SECURITY => security = Some(ClientSecurityData::decode(&mut block)?),
                CS_NET => network = Some(ClientNetworkData::decode(&mut block)?),
                CS_CLUSTER => cluster = Some(ClientClusterData::decode(&mut block)?),
                // Monitor, message-channel and multi-transport blocks carry
                // no information for the channel stack.
                _ => {}
            }
        }

        Ok(Self {
            core: core.ok_or_else(|| invalid_field_err!("core", "missing client core data"))?,
            security: security.ok_or_else(|| invalid_field_err!("security", "missing client security data"))?,
            network,
            cluster,
        })
    }
}

/// Server MCS Connect Response PDU user data blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGccBlocks {
    pub core: ServerCoreData,
    pub security: ServerSecurityData,
    pub network: ServerNetworkData,
}

impl ServerGccBlocks {
    const NAME: &'static str = "ServerGccBlocks";

    pub fn channel_ids(&self) -> &[u16] {
        &self.network.channel_ids
    }

    pub fn io_channel_id(&self) -> u16 {
        self.network.io_channel
    }
}

impl Encode for ServerGccBlocks {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        write_user_data_block(dst, SC_CORE, &self.core)?;
        write_user_data_block(dst, SC_SECURITY, &self.security)?;
        write_user_data_block(dst, SC_NET, &self.network)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        USER_DATA_HEADER_SIZE * 3 + self.core.size() + self.security.size() + self.network.size()
    }
}

impl<'de> Decode<'de> for ServerGccBlocks {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let mut core = None;
        let mut security = None;
        let mut network = None;

        while src.len() >= USER_DATA_HEADER_SIZE {
            let (block_type, mut block) = read_user_data_block(src)?;

            match block_type {
                SC_CORE => core = Some(ServerCoreData::decode(&mut block)?),
                SC_SECURITY => security = Some(ServerSecurityData::decode(&mut block)?),
                SC_NET => network = Some(ServerNetworkData::decode(&mut block)?),
                _ => {}
            }
        }

        Ok(Self {
            core: core.ok_or_else(|| invalid_field_err!("core", "missing server core data"))?,
            security: security.ok_or_else(|| invalid_field_err!("security", "missing server security data"))?,
            network: network.ok_or_else(|| invalid_field_err!("network", "missing server network data"))?,
        })
    }
}

fn write_user_data_block<T: Encode>(dst: &mut WriteCursor<'_>, block_type: u16, block: &T) -> EncodeResult<()> {
    dst.write_u16(block_type);
    dst.write_u16(cast_length!("blockLength", block.size() + USER_DATA_HEADER_SIZE)?);
    block.encode(dst)
}

fn read_user_data_block<'a>(src: &mut ReadCursor<'a>) -> DecodeResult<(u16, ReadCursor<'a>)> {
    let block_type = src.read_u16();
    let block_length = usize::from(src.read_u16());

    if block_length < USER_DATA_HEADER_SIZE {
        return Err(invalid_field_err!("blockLength", "user data block shorter than its header"));
    }

    let body_length = block_length - USER_DATA_HEADER_SIZE;
    ensure_size!(in: src, size: body_length);

    Ok((block_type, ReadCursor::new(src.read_slice(body_length))))
}

fn write_utf16_fixed(dst: &mut WriteCursor<'_>, value: &str, total_bytes: usize) {
    let max_chars = total_bytes / 2 - 1;
    let mut written = 0;

    for unit in value.encode_utf16().take(max_chars) {
        dst.write_u16(unit);
        written += 2;
    }

    while written < total_bytes {
        dst.write_u16(0);
        written += 2;
    }
}

fn read_utf16_fixed(src: &mut ReadCursor<'_>, total_bytes: usize) -> String {
    let mut units = Vec::with_capacity(total_bytes / 2);

    for _ in 0..total_bytes / 2 {
        units.push(src.read_u16());
    }

    let terminator = units.iter().position(|c| *c == 0).unwrap_or(units.len());

    String::from_utf16_lossy(&units[..terminator])
}

const CONFERENCE_REQUEST_OBJECT_ID: [u8; 6] = [0, 0, 20, 124, 0, 1];
const CONFERENCE_REQUEST_CLIENT_TO_SERVER_H221_NON_STANDARD: &[u8; 4] = b"Duca";
const CONFERENCE_REQUEST_SERVER_TO_CLIENT_H221_NON_STANDARD: &[u8; 4] = b"McDn";
const CONFERENCE_REQUEST_U16_MIN: u16 = 1001;

const CONFERENCE_REQUEST_CONNECT_PDU_SIZE: usize = 12;
const CONFERENCE_RESPONSE_CONNECT_PDU_SIZE: usize = 13;
const OBJECT_IDENTIFIER_KEY: u8 = 0;
const CONNECT_GCC_PDU_CONFERENCE_REQUEST_CHOICE: u8 = 0;
const CONNECT_GCC_PDU_CONFERENCE_RESPONSE_CHOICE: u8 = 0x14;
const CONFERENCE_REQUEST_USER_DATA_SELECTION: u8 = 8;
const USER_DATA_NUMBER_OF_SETS: u8 = 1;
const USER_DATA_H221_NON_STANDARD_CHOICE: u8 = 0xc0;
const CONFERENCE_RESPONSE_TAG: u32 = 1;
const CONFERENCE_RESPONSE_RESULT: u8 = 0;
const H221_NON_STANDARD_MIN_LENGTH: usize = 4;
const CONFERENCE_NAME: &[u8] = b"1";

/// The T.124 conference-create request wrapping the client user data blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConferenceCreateRequest {
    pub gcc_blocks: ClientGccBlocks,
}

impl ConferenceCreateRequest {
    const NAME: &'static str = "ConferenceCreateRequest";
}

impl Encode for ConferenceCreateRequest {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let gcc_blocks_buffer_length = self.gcc_blocks.size();

        // ConnectData::Key: select type OBJECT_IDENTIFIER
        per::write_choice(dst, OBJECT_IDENTIFIER_KEY);
        per::write_object_id(dst, CONFERENCE_REQUEST_OBJECT_ID);

        // ConnectData::connectPDU: length
        per::write_length(
            dst,
            cast_length!(
                "gccBlocksLen",
                gcc_blocks_buffer_length + CONFERENCE_REQUEST_CONNECT_PDU_SIZE
            )?,
        );
        // ConnectGCCPDU (CHOICE): select conferenceCreateRequest (0)
        per::write_choice(dst, CONNECT_GCC_PDU_CONFERENCE_REQUEST_CHOICE);
        // select optional userData from ConferenceCreateRequest
        per::write_selection(dst, CONFERENCE_REQUEST_USER_DATA_SELECTION);
        per::write_numeric_string(dst, CONFERENCE_NAME, 1).map_err(|e| other_err!("confName", source: e))?;
        per::write_padding(dst, 1);
        // UserData (SET OF SEQUENCE), one set, select h221NonStandard
        per::write_number_of_sets(dst, USER_DATA_NUMBER_OF_SETS);
        per::write_choice(dst, USER_DATA_H221_NON_STANDARD_CHOICE);
        per::write_octet_string(
            dst,
            CONFERENCE_REQUEST_CLIENT_TO_SERVER_H221_NON_STANDARD,
            H221_NON_STANDARD_MIN_LENGTH,
        )
        .map_err(|e| other_err!("client-to-server key", source: e))?;
        per::write_length(dst, cast_length!("gccBlocksLen", gcc_blocks_buffer_length)?);
        self.gcc_blocks.encode(dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let gcc_blocks_buffer_length = self.gcc_blocks.size();
        let connect_pdu_length = CONFERENCE_REQUEST_CONNECT_PDU_SIZE + gcc_blocks_buffer_length;

        per::CHOICE_SIZE
            + CONFERENCE_REQUEST_OBJECT_ID.len()
            + per::sizeof_length(connect_pdu_length as u16)
            + CONFERENCE_REQUEST_CONNECT_PDU_SIZE
            + per::sizeof_length(gcc_blocks_buffer_length as u16)
            + gcc_blocks_buffer_length
    }
}

impl<'de> Decode<'de> for ConferenceCreateRequest {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        // ConnectData::Key: select object (0) of type OBJECT_IDENTIFIER
        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != OBJECT_IDENTIFIER_KEY {
            return Err(invalid_field_err!("ConnectData::Key", "unexpected ConnectData key"));
        }
        if per::read_object_id(src).map_err(|e| other_err!("oid", source: e))? != CONFERENCE_REQUEST_OBJECT_ID {
            return Err(invalid_field_err!("ConnectData::Key", "unexpected ConnectData key value"));
        }

        // ConnectData::connectPDU: length
        let _length = per::read_length(src).map_err(|e| other_err!("len", source: e))?;
        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != CONNECT_GCC_PDU_CONFERENCE_REQUEST_CHOICE {
            return Err(invalid_field_err!(
                "ConnectData::connectPdu",
                "expected the ConferenceCreateRequest choice"
            ));
        }
        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_selection(src) != CONFERENCE_REQUEST_USER_DATA_SELECTION {
            return Err(invalid_field_err!(
                "ConferenceCreateRequest::Selection",
                "expected the userData selection"
            ));
        }
        per::read_numeric_string(src, 1).map_err(|e| other_err!("confName", source: e))?;
        per::read_padding(src, 1);

        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_number_of_sets(src) != USER_DATA_NUMBER_OF_SETS {
            return Err(invalid_field_err!(
                "ConferenceCreateRequest",
                "expected exactly one user data set"
            ));
        }
        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != USER_DATA_H221_NON_STANDARD_CHOICE {
            return Err(invalid_field_err!(
                "ConferenceCreateRequest",
                "expected the h221NonStandard choice"
            ));
        }
        if per::read_octet_string(src, H221_NON_STANDARD_MIN_LENGTH).map_err(|e| other_err!("key", source: e))?
            != CONFERENCE_REQUEST_CLIENT_TO_SERVER_H221_NON_STANDARD
        {
            return Err(invalid_field_err!(
                "ConferenceCreateRequest",
                "invalid h221NonStandard client-to-server key"
            ));
        }
        let _gcc_blocks_buffer_length = per::read_length(src).map_err(|e| other_err!("len", source: e))?;
        let gcc_blocks = ClientGccBlocks::decode(src)?;

        Ok(Self { gcc_blocks })
    }
}

/// The T.124 conference-create response wrapping the server user data blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConferenceCreateResponse {
    pub user_id: u16,
    pub gcc_blocks: ServerGccBlocks,
}

impl ConferenceCreateResponse {
    const NAME: &'static str = "ConferenceCreateResponse";
}

impl Encode for ConferenceCreateResponse {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let gcc_blocks_buffer_length = self.gcc_blocks.size();

        // ConnectData::Key: select type OBJECT_IDENTIFIER
        per::write_choice(dst, OBJECT_IDENTIFIER_KEY);
        per::write_object_id(dst, CONFERENCE_REQUEST_OBJECT_ID);

        // ConnectData::connectPDU: length (ignored by clients per MS-RDPBCGR)
        per::write_length(
            dst,
            cast_length!(
                "gccBlocksLen",
                gcc_blocks_buffer_length + CONFERENCE_RESPONSE_CONNECT_PDU_SIZE
            )?,
        );
        // ConnectGCCPDU (CHOICE): select conferenceCreateResponse (1)
        per::write_choice(dst, CONNECT_GCC_PDU_CONFERENCE_RESPONSE_CHOICE);
        // ConferenceCreateResponse::nodeID (UserID)
        per::write_u16(dst, self.user_id, CONFERENCE_REQUEST_U16_MIN).map_err(|e| other_err!("userId", source: e))?;
        // ConferenceCreateResponse::tag (INTEGER)
        per::write_u32(dst, CONFERENCE_RESPONSE_TAG);
        // ConferenceCreateResponse::result (ENUMERATED)
        per::write_enum(dst, CONFERENCE_RESPONSE_RESULT);
        per::write_number_of_sets(dst, USER_DATA_NUMBER_OF_SETS);
        per::write_choice(dst, USER_DATA_H221_NON_STANDARD_CHOICE);
        per::write_octet_string(
            dst,
            CONFERENCE_REQUEST_SERVER_TO_CLIENT_H221_NON_STANDARD,
            H221_NON_STANDARD_MIN_LENGTH,
        )
        .map_err(|e| other_err!("server-to-client key", source: e))?;
        per::write_length(dst, cast_length!("gccBlocksLen", gcc_blocks_buffer_length)?);
        self.gcc_blocks.encode(dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let gcc_blocks_buffer_length = self.gcc_blocks.size();
        let connect_pdu_length = CONFERENCE_RESPONSE_CONNECT_PDU_SIZE + gcc_blocks_buffer_length;

        per::CHOICE_SIZE
            + CONFERENCE_REQUEST_OBJECT_ID.len()
            + per::sizeof_length(connect_pdu_length as u16)
            + CONFERENCE_RESPONSE_CONNECT_PDU_SIZE
            + per::sizeof_length(gcc_blocks_buffer_length as u16)
            + gcc_blocks_buffer_length
    }
}

impl<'de> Decode<'de> for ConferenceCreateResponse {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != OBJECT_IDENTIFIER_KEY {
            return Err(invalid_field_err!("ConnectData::Key", "unexpected ConnectData key"));
        }
        if per::read_object_id(src).map_err(|e| other_err!("oid", source: e))? != CONFERENCE_REQUEST_OBJECT_ID {
            return Err(invalid_field_err!("ConnectData::Key", "unexpected ConnectData key value"));
        }
        let _length = per::read_length(src).map_err(|e| other_err!("len", source: e))?;
        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != CONNECT_GCC_PDU_CONFERENCE_RESPONSE_CHOICE {
            return Err(invalid_field_err!(
                "ConnectData::connectPdu",
                "expected the ConferenceCreateResponse choice"
            ));
        }
        let user_id =
            per::read_u16(src, CONFERENCE_REQUEST_U16_MIN).map_err(|e| other_err!("userId", source: e))?;
        if per::read_u32(src).map_err(|e| other_err!("tag", source: e))? != CONFERENCE_RESPONSE_TAG {
            return Err(invalid_field_err!(
                "ConferenceCreateResponse::tag",
                "unexpected ConferenceCreateResponse tag"
            ));
        }
        if per::read_enum(src, mcs::RESULT_ENUM_LENGTH).map_err(|e| other_err!("result", source: e))?
            != CONFERENCE_RESPONSE_RESULT
        {
            return Err(invalid_field_err!(
                "ConferenceCreateResponse::result",
                "conference create failed"
            ));
        }
        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_number_of_sets(src) != USER_DATA_NUMBER_OF_SETS {
            return Err(invalid_field_err!(
                "ConferenceCreateResponse",
                "expected exactly one user data set"
            ));
        }
        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != USER_DATA_H221_NON_STANDARD_CHOICE {
            return Err(invalid_field_err!(
                "ConferenceCreateResponse",
                "expected the h221NonStandard choice"
            ));
        }
        if per::read_octet_string(src, H221_NON_STANDARD_MIN_LENGTH).map_err(|e| other_err!("key", source: e))?
            != CONFERENCE_REQUEST_SERVER_TO_CLIENT_H221_NON_STANDARD
        {
            return Err(invalid_field_err!(
                "ConferenceCreateResponse",
                "invalid h221NonStandard server-to-client key"
            ));
        }
        let _gcc_blocks_buffer_length = per::read_length(src).map_err(|e| other_err!("len", source: e))?;
        let gcc_blocks = ServerGccBlocks::decode(src)?;

        Ok(Self { user_id, gcc_blocks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdpmux_core::{decode, encode_vec};

    fn client_blocks() -> ClientGccBlocks {
        ClientGccBlocks {
            core: ClientCoreData {
                version: RDP_VERSION_5_PLUS,
                desktop_width: 1024,
                desktop_height: 768,
                keyboard_layout: 0x409,
                client_build: 2600,
                client_name: "rdpmux".to_owned(),
                keyboard_type: 4,
                keyboard_subtype: 0,
                keyboard_functional_keys_count: 12,
                ime_file_name: String::new(),
            },
            security: ClientSecurityData::no_security(),
            network: Some(ClientNetworkData {
                channels: vec![
                    ChannelDef {
                        name: ChannelName::from_utf8("rdpsnd").unwrap(),
                        options: ChannelOptions::INITIALIZED,
                    },
                    ChannelDef {
                        name: ChannelName::from_utf8("drdynvc").unwrap(),
                        options: ChannelOptions::INITIALIZED | ChannelOptions::COMPRESS_RDP,
                    },
                ],
            }),
            cluster: None,
        }
    }

    fn server_blocks() -> ServerGccBlocks {
        ServerGccBlocks {
            core: ServerCoreData {
                version: RDP_VERSION_5_PLUS,
            },
            security: ServerSecurityData {
                encryption_method: EncryptionMethod::empty(),
                encryption_level: 0,
            },
            network: ServerNetworkData {
                io_channel: 1003,
                channel_ids: vec![1004, 1005],
            },
        }
    }

    #[test]
    fn channel_name_is_null_terminated() {
        let name = ChannelName::from_utf8("drdynvc").unwrap();
        assert_eq!(name.as_bytes(), b"drdynvc\0");
        assert_eq!(name.as_str(), Some("drdynvc"));
    }

    #[test]
    fn channel_name_truncates_to_seven_chars() {
        let name = ChannelName::from_utf8("rdpgfx_long").unwrap();
        assert_eq!(name.as_str(), Some("rdpgfx_"));
    }

    #[test]
    fn channel_def_round_trip() {
        let def = ChannelDef {
            name: ChannelName::from_utf8("cliprdr").unwrap(),
            options: ChannelOptions::INITIALIZED | ChannelOptions::SHOW_PROTOCOL,
        };

        let encoded = encode_vec(&def).unwrap();
        assert_eq!(encoded.len(), 12);

        let decoded: ChannelDef = decode(&encoded).unwrap();
        assert_eq!(decoded, def);
    }

    #[test]
    fn client_blocks_round_trip() {
        let blocks = client_blocks();
        let encoded = encode_vec(&blocks).unwrap();
        let decoded: ClientGccBlocks = decode(&encoded).unwrap();
        assert_eq!(decoded, blocks);
    }

    #[test]
    fn server_blocks_round_trip() {
        let blocks = server_blocks();
        let encoded = encode_vec(&blocks).unwrap();
        let decoded: ServerGccBlocks = decode(&encoded).unwrap();
        assert_eq!(decoded, blocks);
    }

    #[test]
    fn client_network_data_rejects_more_than_31_channels() {
        let channels = (0..32)
            .map(|i| ChannelDef {
                name: ChannelName::from_utf8(&format!("chan{i:02}")).unwrap(),
                options: ChannelOptions::INITIALIZED,
            })
            .collect();

        let network = ClientNetworkData { channels };
        assert!(encode_vec(&network).is_err());
    }

    #[test]
    fn client_network_data_encodes_the_full_31_channel_set() {
        let channels: Vec<ChannelDef> = (0..31)
            .map(|i| ChannelDef {
                name: ChannelName::from_utf8(&format!("chan{i:02}")).unwrap(),
                options: ChannelOptions::INITIALIZED,
            })
            .collect();

        let network = ClientNetworkData { channels };
        let encoded = encode_vec(&network).unwrap();

        let decoded: ClientNetworkData = decode(&encoded).unwrap();
        assert_eq!(decoded, network);
    }

    #[test]
    fn server_network_data_odd_channel_count_is_padded() {
        let network = ServerNetworkData {
            io_channel: 1003,
            channel_ids: vec![1004],
        };

        let encoded = encode_vec(&network).unwrap();
        assert_eq!(encoded.len() % 4, 0);

        let decoded: ServerNetworkData = decode(&encoded).unwrap();
        assert_eq!(decoded, network);
    }

    #[test]
    fn conference_create_request_round_trip() {
        let request = ConferenceCreateRequest {
            gcc_blocks: client_blocks(),
        };

        let encoded = encode_vec(&request).unwrap();
        let decoded: ConferenceCreateRequest = decode(&encoded).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn conference_create_response_round_trip() {
        let response = ConferenceCreateResponse {
            user_id: 1007,
            gcc_blocks: server_blocks(),
        };

        let encoded = encode_vec(&response).unwrap();
        let decoded: ConferenceCreateResponse = decode(&encoded).unwrap();
        assert_eq!(decoded.user_id, 1007);
        assert_eq!(decoded.gcc_blocks, response.gcc_blocks);
    }
}
