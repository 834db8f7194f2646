#![cfg_attr(doc, doc = include_str!("../README.md"))]

mod connector;
mod framed;

pub use connector::*;
pub use framed::*;
