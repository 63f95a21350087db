//! Cache-aside key/value client over a relational store.
//!
//! Every operation is rendered from a configurable query template and run
//! against a [`ports::BackingStore`]; reads are served from an in-memory cache
//! that a background task keeps in step with the store.

pub mod codec;
pub mod domain;
pub mod planes;
pub mod ports;
pub mod render;

#[cfg(test)]
pub(crate) mod testing;

pub use codec::Codec;
pub use domain::response::{DeleteResponse, GetResponse};
pub use domain::{CacheValue, Row, ValueOption};
pub use planes::data::client::Client;
pub use ports::{BackingStore, Generator, StoreFactory};
pub use render::{QueryKind, QueryRenderer, QueryVars, render};
