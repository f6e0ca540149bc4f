//! Protocol Layer: Non-Temporal Message Aggregation
//!
//! Prinsip desain:
//! - Flat binary: header bit-packed 16 byte, block di-copy verbatim
//! - Combining: message berurutan yang se-handler dan se-stride share
//!   satu descriptor
//! - No allocation: serialize langsung ke per-destination buffer

pub(crate) mod aggregator;
pub(crate) mod dispatch;
pub(crate) mod header;
pub(crate) mod registry;
pub(crate) mod shape;

pub use aggregator::{Aggregator, DEFAULT_BUFFER_CAPACITY};
pub use dispatch::dispatch_buffer;
pub use header::{NtHeader, HEADER_SIZE, MAX_COMBINED_COUNT, MAX_MESSAGE_SIZE};
pub use registry::{
    AddressedHandler, AddressedPayloadHandler, HandlerRegistry, PayloadHandler, SimpleHandler,
};
pub use shape::{WireCopy, INLINE_CAPTURE_MAX};
