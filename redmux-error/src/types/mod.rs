pub mod connection;
pub mod mux;

// Re-export the error types so callers can write `redmux_error::MuxError`.
pub use connection::*;
pub use mux::*;
