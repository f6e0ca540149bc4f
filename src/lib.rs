//! Atlas - PGAS Runtime Core
//!
//! Fragment runtime untuk program task-parallel berbutir halus di atas
//! cluster: heap global yang di-partisi per core (buddy allocator +
//! mmap region) dan data plane non-temporal messaging yang menggabung
//! jutaan active message kecil jadi sedikit transfer besar.
//!
//! Arsitektur:
//! - Zero-copy: header di-pack/unpack eksplisit, block di-copy verbatim
//! - Combining: descriptor 16 byte mewakili sampai 1023 pemanggilan
//! - Single-owner: heap, buffer, dan dispatch milik satu core thread

pub mod core;
pub mod error;
pub mod network;
pub mod protocol;
mod runtime;

pub use crate::core::{AllocatorStats, BuddyAllocator, GlobalAddress, GlobalHeap};
pub use crate::error::{Result, RuntimeError};
pub use crate::network::{loopback_fabric, CoreId, Exchange, SinkTransport, Transport};
pub use crate::protocol::{
    AddressedHandler, AddressedPayloadHandler, Aggregator, HandlerRegistry, PayloadHandler,
    SimpleHandler, WireCopy,
};
pub use crate::runtime::{Core, CoreConfig};
