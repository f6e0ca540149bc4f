//! Transport interface yang dikonsumsi data plane.
//!
//! Aggregator hanya butuh tiga hal dari dunia luar: identitas core
//! ini, `send(dest, bytes)` untuk buffer yang sudah di-flush, dan
//! `recv_poll()` untuk buffer masuk. Implementasi: loopback fabric
//! untuk test/demo, TCP exchange untuk antar proses.

use std::io;

/// Identifier untuk satu logical core di cluster. 20 bit terpakai
/// di wire (sampai 1M cores).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreId(pub u32);

/// Jumlah core maksimum yang muat di header dest field.
pub const MAX_CORES: u32 = 1 << 20;

/// Kontrak minimum transport layer.
///
/// `send` asynchronous: boleh block di bawah backpressure, dan boleh
/// menunda pengiriman; yang dijamin hanya per-(sender, dest) FIFO.
/// Buffer dari `recv_poll` diserahkan by move — transport tidak
/// menyimpan reference.
pub trait Transport {
    /// Core tempat instance ini berjalan.
    fn this_core(&self) -> CoreId;

    /// Kirim satu flushed buffer ke `dest`.
    fn send(&mut self, dest: CoreId, buf: &[u8]) -> io::Result<()>;

    /// Ambil satu buffer masuk yang sudah lengkap, kalau ada.
    fn recv_poll(&mut self) -> Option<Vec<u8>>;
}

/// Transport yang membuang semua kiriman. Untuk benchmark sisi kirim
/// dan test yang hanya memeriksa buffer pending.
pub struct SinkTransport {
    core: CoreId,
    /// Total bytes yang sudah dibuang, untuk throughput accounting.
    pub bytes_sent: u64,
}

impl SinkTransport {
    pub fn new(core: CoreId) -> Self {
        Self {
            core,
            bytes_sent: 0,
        }
    }
}

impl Transport for SinkTransport {
    fn this_core(&self) -> CoreId {
        self.core
    }

    fn send(&mut self, _dest: CoreId, buf: &[u8]) -> io::Result<()> {
        self.bytes_sent += buf.len() as u64;
        Ok(())
    }

    fn recv_poll(&mut self) -> Option<Vec<u8>> {
        None
    }
}
