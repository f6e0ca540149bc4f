//! Loopback fabric: N core dalam satu proses, tanpa socket.
//!
//! Setiap endpoint memegang sender channel ke semua peer dan receiver
//! untuk inbox-nya sendiri. Channel mpsc mempertahankan urutan
//! per-(sender, dest) persis seperti transport sungguhan. Dipakai oleh
//! integration test dan demo binary.

use std::io;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};

use super::transport::{CoreId, Transport};

/// Satu sisi dari loopback fabric; implementasi [`Transport`].
pub struct LoopbackEndpoint {
    core: CoreId,
    peers: Vec<Sender<Vec<u8>>>,
    inbox: Receiver<Vec<u8>>,
}

/// Membuat fabric dengan `cores` endpoint yang saling terhubung.
///
/// Endpoint boleh dipindah ke thread lain; buffer diserahkan by move.
pub fn loopback_fabric(cores: usize) -> Vec<LoopbackEndpoint> {
    let mut senders = Vec::with_capacity(cores);
    let mut inboxes = Vec::with_capacity(cores);
    for _ in 0..cores {
        let (tx, rx) = channel();
        senders.push(tx);
        inboxes.push(rx);
    }

    inboxes
        .into_iter()
        .enumerate()
        .map(|(i, inbox)| LoopbackEndpoint {
            core: CoreId(i as u32),
            peers: senders.clone(),
            inbox,
        })
        .collect()
}

impl Transport for LoopbackEndpoint {
    fn this_core(&self) -> CoreId {
        self.core
    }

    fn send(&mut self, dest: CoreId, buf: &[u8]) -> io::Result<()> {
        let peer = self.peers.get(dest.0 as usize).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "destination core not in fabric")
        })?;
        peer.send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "destination core gone"))
    }

    fn recv_poll(&mut self) -> Option<Vec<u8>> {
        match self.inbox.try_recv() {
            Ok(buf) => Some(buf),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
