//! Network Layer: transport antara core
//!
//! Menggunakan mio untuk cross-platform non-blocking I/O.
//!
//! Fitur:
//! - Loopback fabric untuk N core dalam satu proses (test/demo)
//! - TCP exchange dengan frame per flushed buffer untuk antar proses
//! - Backpressure hanya di titik flush, sesuai kontrak data plane

mod connection;
mod exchange;
mod loopback;
mod transport;

pub use connection::PeerConnection;
pub use exchange::Exchange;
pub use loopback::{loopback_fabric, LoopbackEndpoint};
pub use transport::{CoreId, SinkTransport, Transport, MAX_CORES};
