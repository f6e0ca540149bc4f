//! Peer link dengan buffered I/O dan framing.
//!
//! Flushed aggregation buffer dikirim sebagai frame
//! `[len u32][source core u32][bytes]` di atas TCP stream.
//!
//! Kedua arah dibangun di sekitar frame, bukan byte stream mentah:
//! - Inbound: satu buffer dengan watermark; frame berikutnya selalu
//!   mulai di offset nol, sisa bytes digeser ke depan setiap kali satu
//!   frame diambil. Parsing jadi bebas cursor.
//! - Outbound: sepasang cursor head/tail. `transmit` mengkonsumsi dari
//!   head tanpa menggeser apapun; ruang direklamasi di `queue_frame`
//!   saat tail mentok, dan di situ pula backpressure menahan pengirim.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use super::transport::CoreId;

/// Buffer sizes - cukup untuk beberapa aggregation buffer penuh.
const READ_BUFFER_SIZE: usize = 256 * 1024;
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Frame header: payload length + source core.
pub(crate) const FRAME_HEADER_SIZE: usize = 8;

/// Satu koneksi ke peer core, non-blocking.
pub struct PeerConnection {
    stream: TcpStream,
    /// Inbound bytes; frame yang sedang dirakit selalu mulai di nol.
    inbound: Box<[u8]>,
    inbound_len: usize,
    /// Outbound bytes yang belum diterima kernel: `[out_head, out_tail)`.
    outbound: Box<[u8]>,
    out_head: usize,
    out_tail: usize,
}

impl PeerConnection {
    /// Wrap TcpStream dengan buffered framing.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;

        // Nagle mematikan latency untuk buffer kecil.
        stream.set_nodelay(true)?;

        // Socket buffer lebih besar untuk throughput antar core.
        // Ignore errors - not all platforms support this.
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = stream.as_raw_fd();
            // SAFETY: setsockopt pada fd yang valid, optval hidup selama call.
            unsafe {
                let optval: libc::c_int = 512 * 1024;
                libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_SNDBUF,
                    &optval as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
                libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_RCVBUF,
                    &optval as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
            }
        }

        Ok(Self {
            stream,
            inbound: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            inbound_len: 0,
            outbound: vec![0u8; WRITE_BUFFER_SIZE].into_boxed_slice(),
            out_head: 0,
            out_tail: 0,
        })
    }

    /// Tarik bytes dari socket ke tail inbound buffer, sampai socket
    /// kering atau buffer penuh. Returns `true` kalau ada data baru.
    pub fn ingest(&mut self) -> io::Result<bool> {
        let mut progressed = false;
        while self.inbound_len < self.inbound.len() {
            match self.stream.read(&mut self.inbound[self.inbound_len..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "peer closed the link",
                    ))
                }
                Ok(n) => {
                    self.inbound_len += n;
                    progressed = true;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(progressed)
    }

    /// Ambil satu frame lengkap, kalau sudah ada. Sisa bytes digeser ke
    /// offset nol supaya frame berikutnya mulai di awal buffer.
    pub fn take_frame(&mut self) -> Option<(CoreId, Vec<u8>)> {
        if self.inbound_len < FRAME_HEADER_SIZE {
            return None;
        }

        let mut word = [0u8; 4];
        word.copy_from_slice(&self.inbound[..4]);
        let len = u32::from_le_bytes(word) as usize;
        word.copy_from_slice(&self.inbound[4..8]);
        let source = CoreId(u32::from_le_bytes(word));

        let total = FRAME_HEADER_SIZE + len;
        if self.inbound_len < total {
            return None;
        }

        let frame = self.inbound[FRAME_HEADER_SIZE..total].to_vec();
        self.inbound.copy_within(total..self.inbound_len, 0);
        self.inbound_len -= total;
        Some((source, frame))
    }

    /// Queue satu frame untuk dikirim.
    ///
    /// Kalau ruang di belakang tail tidak cukup: reklamasi ruang bekas
    /// frame terkirim, lalu dorong backlog ke kernel. Ini satu-satunya
    /// titik di mana pengirim menunggu (backpressure).
    pub fn queue_frame(&mut self, source: CoreId, payload: &[u8]) -> io::Result<()> {
        let total = FRAME_HEADER_SIZE + payload.len();
        assert!(
            total <= self.outbound.len(),
            "frame larger than the write buffer"
        );

        while self.outbound.len() - self.out_tail < total {
            if self.out_head > 0 {
                // Reclaim ruang dari prefix yang sudah diterima kernel.
                self.outbound.copy_within(self.out_head..self.out_tail, 0);
                self.out_tail -= self.out_head;
                self.out_head = 0;
            } else {
                self.transmit()?;
                if self.outbound.len() - self.out_tail < total {
                    std::thread::yield_now();
                }
            }
        }

        let at = self.out_tail;
        self.outbound[at..at + 4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        self.outbound[at + 4..at + 8].copy_from_slice(&source.0.to_le_bytes());
        self.outbound[at + 8..at + total].copy_from_slice(payload);
        self.out_tail += total;
        Ok(())
    }

    /// Dorong backlog outbound ke kernel sejauh yang diterima. Head maju
    /// per write; tidak ada byte yang digeser di jalur ini.
    pub fn transmit(&mut self) -> io::Result<()> {
        while self.out_head < self.out_tail {
            match self.stream.write(&self.outbound[self.out_head..self.out_tail]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "peer link accepts no bytes",
                    ))
                }
                Ok(n) => self.out_head += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        if self.out_head == self.out_tail {
            self.out_head = 0;
            self.out_tail = 0;
        }
        Ok(())
    }

    /// Underlying stream untuk registrasi polling.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Bytes yang masih antre di write buffer.
    #[inline(always)]
    pub fn write_pending(&self) -> usize {
        self.out_tail - self.out_head
    }
}
