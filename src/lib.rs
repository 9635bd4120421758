//! Alder: an HTTP relay exposing a managed key-value store's remote
//! datapath protocol on top of a local transactional engine.
//!
//! Clients authenticate once at the root endpoint with a long-lived access
//! token and receive a short-lived ephemeral token bound to a database
//! identifier; datapath requests (snapshot range reads, atomic writes, key
//! watches) carry that token plus length-delimited binary message payloads.
//!
//! The crate is codec + dispatch around an [`engine::Engine`]:
//!
//! - [`wire`]: binary primitives, the tag-wire record stream, and the
//!   per-message datapath codecs
//! - [`layer`]: the order-preserving tuple key codec
//! - [`value`]: the value envelope codec
//! - [`relay`]: request-to-engine translation for the three operations
//! - [`engine`]: the engine seam and the in-memory implementation
//! - [`auth`], [`server`], [`state`], [`config`]: the HTTP surface

#![warn(missing_docs)]

/// Bearer parsing and the live ephemeral-token set.
pub mod auth;
/// Command-line surface.
pub mod config;
/// The key-value engine seam and in-memory implementation.
pub mod engine;
/// Relay-level error type.
pub mod error;
/// Order-preserving key encoding.
pub mod layer;
/// Datapath translation.
pub mod relay;
/// HTTP router, handlers, and serve loop.
pub mod server;
/// Shared application state.
pub mod state;
/// Value envelope codec.
pub mod value;
/// Wire-format layer.
pub mod wire;
