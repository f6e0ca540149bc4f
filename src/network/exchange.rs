//! Exchange: event loop TCP antar peer core.
//!
//! Menggunakan mio untuk non-blocking I/O multiplexing. Satu exchange
//! per proses core: listen untuk link masuk, connect keluar ke peer,
//! dan routing frame lengkap ke inbox sebagai receive buffer. Identitas
//! peer di link masuk dipelajari dari source core di frame pertama.
//!
//! Reliability tetap sebatas yang TCP berikan; ordering hanya dijamin
//! per-(sender, dest), sama seperti kontrak [`Transport`].

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{info, warn};

use super::connection::PeerConnection;
use super::transport::{CoreId, Transport};

const LISTENER_TOKEN: Token = Token(0);
const EVENTS_CAPACITY: usize = 256;

/// Satu link aktif. Mio stream disimpan supaya registrasi epoll-nya
/// tetap hidup selama link ada.
struct Link {
    conn: PeerConnection,
    _registered: MioTcpStream,
}

/// Transport antar proses di atas TCP.
pub struct Exchange {
    core: CoreId,
    poll: Poll,
    listener: MioTcpListener,
    links: HashMap<Token, Link>,
    routes: HashMap<CoreId, Token>,
    next_token: usize,
    inbox: VecDeque<Vec<u8>>,
    events: Events,
}

impl Exchange {
    /// Bind listener untuk core ini.
    pub fn bind(core: CoreId, addr: SocketAddr) -> io::Result<Self> {
        let poll = Poll::new()?;

        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let mut listener = MioTcpListener::from_std(listener);

        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        info!(core = core.0, %addr, "exchange listening");

        Ok(Self {
            core,
            poll,
            listener,
            links: HashMap::new(),
            routes: HashMap::new(),
            next_token: 1,
            inbox: VecDeque::new(),
            events: Events::with_capacity(EVENTS_CAPACITY),
        })
    }

    /// Address listener (berguna saat bind ke port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Buka link keluar ke peer `core` di `addr`. Blocking connect;
    /// dipanggil saat startup, sebelum data plane jalan.
    pub fn connect(&mut self, core: CoreId, addr: SocketAddr) -> io::Result<()> {
        let stream = TcpStream::connect(addr)?;
        let token = self.install_link(stream)?;
        self.routes.insert(core, token);
        info!(this = self.core.0, peer = core.0, %addr, "peer link up");
        Ok(())
    }

    /// Satu iterasi event loop: accept link baru, baca frame masuk ke
    /// inbox, flush write buffer yang tertunda.
    pub fn pump(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut dead: Vec<Token> = Vec::new();
        let tokens: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();

        for (token, readable, writable) in tokens {
            if token == LISTENER_TOKEN {
                self.accept_links()?;
                continue;
            }

            let link = match self.links.get_mut(&token) {
                Some(link) => link,
                None => continue,
            };

            let mut lost = false;
            if readable {
                // Baca sampai socket kering, ambil frame di setiap ronde
                // supaya inbound buffer tidak pernah jadi bottleneck.
                loop {
                    let progressed = match link.conn.ingest() {
                        Ok(progressed) => progressed,
                        Err(ref e)
                            if e.kind() == io::ErrorKind::ConnectionReset
                                || e.kind() == io::ErrorKind::BrokenPipe =>
                        {
                            lost = true;
                            break;
                        }
                        Err(e) => return Err(e),
                    };
                    while let Some((source, frame)) = link.conn.take_frame() {
                        // Link masuk: route balik dipelajari dari frame pertama.
                        self.routes.entry(source).or_insert(token);
                        self.inbox.push_back(frame);
                    }
                    if !progressed {
                        break;
                    }
                }
            }

            if lost {
                dead.push(token);
                continue;
            }

            if writable {
                link.conn.transmit()?;
            }
        }

        for token in dead {
            warn!(core = self.core.0, ?token, "peer link lost");
            self.links.remove(&token);
            self.routes.retain(|_, &mut t| t != token);
        }

        Ok(())
    }

    fn accept_links(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let stream = into_std(stream);
                    let token = self.install_link(stream)?;
                    info!(core = self.core.0, %addr, ?token, "accepted peer link");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn install_link(&mut self, stream: TcpStream) -> io::Result<Token> {
        let conn = PeerConnection::new(stream)?;
        let token = Token(self.next_token);
        self.next_token += 1;

        let mut registered = MioTcpStream::from_std(conn.stream().try_clone()?);
        self.poll.registry().register(
            &mut registered,
            token,
            Interest::READABLE | Interest::WRITABLE,
        )?;

        self.links.insert(
            token,
            Link {
                conn,
                _registered: registered,
            },
        );
        Ok(token)
    }
}

/// Lepaskan mio stream jadi std TcpStream tanpa double-close.
#[cfg(unix)]
fn into_std(stream: MioTcpStream) -> TcpStream {
    use std::os::unix::io::{FromRawFd, IntoRawFd};
    // SAFETY: into_raw_fd melepaskan ownership; tidak ada alias.
    unsafe { TcpStream::from_raw_fd(stream.into_raw_fd()) }
}

#[cfg(windows)]
fn into_std(stream: MioTcpStream) -> TcpStream {
    use std::os::windows::io::{FromRawSocket, IntoRawSocket};
    // SAFETY: into_raw_socket melepaskan ownership; tidak ada alias.
    unsafe { TcpStream::from_raw_socket(stream.into_raw_socket()) }
}

impl Transport for Exchange {
    fn this_core(&self) -> CoreId {
        self.core
    }

    fn send(&mut self, dest: CoreId, buf: &[u8]) -> io::Result<()> {
        let token = *self.routes.get(&dest).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "no link to destination core")
        })?;
        let link = self
            .links
            .get_mut(&token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "peer link lost"))?;

        link.conn.queue_frame(self.core, buf)?;
        link.conn.transmit()
    }

    fn recv_poll(&mut self) -> Option<Vec<u8>> {
        if self.inbox.is_empty() {
            // Non-blocking sweep supaya caller tidak perlu memanggil
            // pump() sendiri.
            if let Err(e) = self.pump(Some(Duration::ZERO)) {
                warn!(core = self.core.0, error = %e, "pump failed");
            }
        }
        self.inbox.pop_front()
    }
}
