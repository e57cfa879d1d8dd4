//! Broker-facing network pieces.
//!
//! - `resp`: RESP2 framing (frames, incremental decoder, encoder).
//! - `uri`: `redis://` connection URIs.

pub mod resp;
pub mod uri;

// Re-export the URI type; RESP framing stays under `network::resp`.
pub use uri::*;
