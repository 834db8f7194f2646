//! Shared fixtures for the rdpmux integration tests.

use rdpmux_connector::{Config, DesktopSize};
use rdpmux_core::{impl_as_any, encode_vec, Encode};
use rdpmux_pdu::gcc::ChannelName;
use rdpmux_pdu::x224::{X224, X224Data};
use rdpmux_svc::{CompressionCondition, SvcMessage, SvcProcessor};

/// A configuration with every security protocol enabled, mirroring a stock
/// client.
pub fn test_config() -> Config {
    Config {
        desktop_size: DesktopSize { width: 1024, height: 768 },
        server_hostname: "server.example".to_owned(),
        client_name: "rdpmux-test".to_owned(),
        client_build: 2600,
        keyboard_layout: 0x409,
        keyboard_type: 4,
        keyboard_subtype: 0,
        keyboard_functional_keys_count: 12,
        ime_file_name: String::new(),
        tls_security: true,
        nla_security: true,
        rdp_security: true,
        request_data: None,
        virtual_channel_chunk_size: Config::DEFAULT_CHUNK_SIZE,
    }
}

/// Encodes an MCS-level message the way a server would frame it.
pub fn server_frame<T: Encode>(message: &T) -> Vec<u8> {
    let payload = encode_vec(message).expect("encode MCS message");
    encode_vec(&X224(X224Data { data: payload })).expect("frame MCS message")
}

macro_rules! declare_stub_channel {
    ($ty:ident, $name:expr) => {
        /// A static channel stub that swallows every payload.
        #[derive(Debug, Default)]
        pub struct $ty;

        impl_as_any!($ty);

        impl SvcProcessor for $ty {
            fn channel_name(&self) -> ChannelName {
                ChannelName::from_static($name)
            }

            fn compression_condition(&self) -> CompressionCondition {
                CompressionCondition::Never
            }

            fn process(&mut self, _payload: &[u8]) -> rdpmux_pdu::PduResult<Vec<SvcMessage>> {
                Ok(Vec::new())
            }
        }
    };
}

declare_stub_channel!(RdpsndStub, b"rdpsnd\0\0");
declare_stub_channel!(CliprdrStub, b"cliprdr\0");
