//! Error types untuk runtime core.
//!
//! Satu enum untuk semua failure mode: allocator, registry, data plane,
//! dan transport. Fatal errors (data-plane corruption, programming bugs)
//! di-log sebelum di-propagate; tidak ada error yang di-swallow.

use std::io;
use thiserror::Error;

/// Errors yang bisa muncul dari heap, aggregation, dan dispatch.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Global heap kehabisan chunk yang cukup besar. Recoverable oleh caller.
    #[error("out of memory in the global heap: no free chunk for {requested} bytes")]
    OutOfMemory {
        /// Requested allocation size in bytes, before power-of-two rounding.
        requested: usize,
    },

    /// Free terhadap offset yang tidak pernah di-malloc, atau double free.
    /// Programming bug; fatal.
    #[error("invalid free: offset {offset:#x} is not a live allocation")]
    InvalidFree {
        /// Offset relative to the allocator base.
        offset: u64,
    },

    /// Akses lokal ke address yang homed di core lain. Caller harus
    /// delegate lewat message ke home core.
    #[error("remote address: cell is homed on core {core}, not here")]
    RemoteAddress {
        /// Home core of the offending address.
        core: u32,
    },

    /// Handler registry penuh (2^31 - 1 codes). Fatal saat init.
    #[error("handler registry full: 31-bit code space exhausted")]
    RegistryFull,

    /// Satu record tidak akan pernah muat di aggregation buffer, bahkan
    /// setelah flush. Buffer capacity salah konfigurasi; fatal.
    #[error("aggregation buffer overflow: record of {needed} bytes exceeds capacity {capacity}")]
    BufferOverflow {
        /// Bytes the lone record would occupy (header + per-iteration block).
        needed: usize,
        /// Configured buffer capacity.
        capacity: usize,
    },

    /// Capture + payload melebihi 13-bit size field di header.
    #[error("message too large: {bytes} bytes per iteration exceeds the wire size field")]
    MessageTooLarge {
        /// Per-iteration bytes requested.
        bytes: usize,
    },

    /// Kegagalan dari transport layer saat flush. Caller memutuskan retry
    /// atau abort.
    #[error("transport failure: {0}")]
    Transport(io::Error),

    /// Kegagalan mapping memory region untuk local heap slice.
    #[error("memory region: {0}")]
    Region(io::Error),

    /// Scan buffer yang diterima akan melewati end. Data-plane corruption;
    /// fatal.
    #[error("truncated buffer: record at byte {at} steps past the end")]
    TruncatedBuffer {
        /// Cursor position of the offending record.
        at: usize,
    },

    /// Header membawa fp code di luar registry. Data-plane corruption; fatal.
    #[error("unknown handler code {code}")]
    UnknownHandler {
        /// The 31-bit code found in the header.
        code: u32,
    },
}

/// Result alias untuk operasi runtime.
pub type Result<T> = std::result::Result<T, RuntimeError>;
