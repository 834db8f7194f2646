#![cfg_attr(doc, doc = include_str!("../README.md"))]

/// ECHO dynamic virtual channel name per MS-RDPEECO.
pub const CHANNEL_NAME: &str = "ECHO";

pub mod client;
pub mod pdu;
