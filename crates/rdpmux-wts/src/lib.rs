#![cfg_attr(doc, doc = include_str!("../README.md"))]

mod error;
mod events;
mod manager;
mod pool;
mod reader;
mod router;
mod worker;

pub use error::*;
pub use events::*;
pub use manager::*;
pub use pool::*;
