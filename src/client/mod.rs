pub mod connection;
pub mod memory;
pub mod resp;
pub mod transport;

// Publicly re-export the link types so callers can write
// `redmux::client::Connection` without naming the submodule.
pub use connection::*;
pub use memory::*;
pub use resp::*;
pub use transport::*;
