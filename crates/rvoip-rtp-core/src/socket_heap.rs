//! The port-range allocator and single media I/O thread (spec §4.5).
//!
//! One `SocketHeap` owns the whole `[start, finish]` RTP/RTCP port range. A
//! single worker thread polls every registered socket with `mio`, reads one
//! datagram per readable socket (dropping anything over
//! [`MAX_VALID_UDP_PACKET_SIZE`]), and dispatches it synchronously to the
//! [`SocketSink`] that socket was allocated with. `free_socket` only queues
//! the socket for removal — actual deregistration happens on the worker
//! thread after each socket's dispatch, so a sink freeing its own socket
//! from inside its callback can never race the poller (mirrors
//! `original_source/src/engine/helper/HL_SocketHeap.cpp`'s deferred-free
//! list, drained after *every* readable socket, not once per loop).

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::net::UdpSocket as MioUdpSocket;
use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;
use rand::Rng;

use crate::error::{Result, RtpError};

/// Largest datagram the heap will hand to a sink; anything bigger is
/// dropped (spec §5 "Back-pressure").
pub const MAX_VALID_UDP_PACKET_SIZE: usize = 1500;

const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Address family for a new socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

/// Whether an RTP/RTCP pair shares one socket (rtcp-mux) or uses two
/// consecutive ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplex {
    Do,
    Dont,
}

/// Receives datagrams read off a registered socket. Implementations must
/// not block and must not try to take the session graph's write lock
/// directly (spec §5) — either handle the packet fully or enqueue work.
pub trait SocketSink: Send + Sync {
    fn on_received_data(&self, handle: SocketHandle, src: SocketAddr, data: &[u8]);
}

/// Opaque reference to one allocated socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(usize);

struct SocketEntry {
    socket: MioUdpSocket,
    sink: Arc<dyn SocketSink>,
    port: u16,
}

struct Inner {
    sockets: HashMap<Token, SocketEntry>,
    to_free: Vec<Token>,
}

pub struct SocketHeap {
    start: u16,
    finish: u16,
    registry: mio::Registry,
    inner: Arc<Mutex<Inner>>,
    next_token: AtomicUsize,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SocketHeap {
    /// Creates the heap and starts its worker thread immediately.
    pub fn new(start: u16, finish: u16) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let inner = Arc::new(Mutex::new(Inner { sockets: HashMap::new(), to_free: Vec::new() }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_inner = inner.clone();
        let worker_shutdown = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("rvoip-media-io".to_string())
            .spawn(move || worker_loop(poll, worker_inner, worker_shutdown))
            .expect("spawn media I/O thread");

        Ok(Self {
            start,
            finish,
            registry,
            inner,
            next_token: AtomicUsize::new(1),
            shutdown,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn range(&self) -> (u16, u16) {
        (self.start, self.finish)
    }

    /// Allocates one non-blocking UDP socket. `port == 0` picks a random
    /// even port in range (so the adjacent odd port stays free for RTCP),
    /// retrying on `EADDRINUSE` up to `range/2` times.
    pub fn alloc_socket(&self, family: Family, sink: Arc<dyn SocketSink>, port: u16) -> Result<(SocketHandle, u16)> {
        let range = (self.finish - self.start) as u32 / 2 + 1;

        if port != 0 {
            return self.bind_and_register(family, sink, port);
        }

        let mut attempts = 0;
        loop {
            let candidate = self.random_even_port();
            match self.bind_and_register(family, sink.clone(), candidate) {
                Ok(result) => return Ok(result),
                Err(RtpError::Io(_)) => {
                    attempts += 1;
                    if attempts >= range {
                        return Err(RtpError::PortRangeExhausted { start: self.start, finish: self.finish, attempts });
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Allocates an RTP/RTCP pair: `(rtp, rtp)` on the same socket if
    /// multiplexed, else `(rtp@p, rtcp@p+1)` with `p` even.
    pub fn alloc_socket_pair(
        &self,
        family: Family,
        sink: Arc<dyn SocketSink>,
        multiplex: Multiplex,
    ) -> Result<((SocketHandle, u16), (SocketHandle, u16))> {
        let rtp = self.alloc_socket(family, sink.clone(), 0)?;
        if matches!(multiplex, Multiplex::Do) {
            return Ok((rtp, rtp));
        }
        let rtcp_port = rtp.1 + 1;
        let rtcp = self.bind_and_register(family, sink, rtcp_port)?;
        Ok((rtp, rtcp))
    }

    fn random_even_port(&self) -> u16 {
        let mut rng = rand::thread_rng();
        let span = (self.finish - self.start) / 2;
        self.start + 2 * rng.gen_range(0..=span.max(1))
    }

    fn bind_and_register(&self, family: Family, sink: Arc<dyn SocketSink>, port: u16) -> Result<(SocketHandle, u16)> {
        let addr: SocketAddr = match family {
            Family::V4 => format!("0.0.0.0:{port}").parse().unwrap(),
            Family::V6 => format!("[::]:{port}").parse().unwrap(),
        };
        let std_socket = std::net::UdpSocket::bind(addr).map_err(|e| RtpError::Io(e.to_string()))?;
        std_socket.set_nonblocking(true).map_err(|e| RtpError::Io(e.to_string()))?;
        let local_port = std_socket.local_addr().map_err(|e| RtpError::Io(e.to_string()))?.port();

        let mut mio_socket = MioUdpSocket::from_std(std_socket);
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.registry
            .register(&mut mio_socket, token, Interest::READABLE)
            .map_err(|e| RtpError::Io(e.to_string()))?;

        self.inner.lock().sockets.insert(token, SocketEntry { socket: mio_socket, sink, port: local_port });
        Ok((SocketHandle(token.0), local_port))
    }

    /// Queues a socket for removal; the worker thread closes it after its
    /// next dispatch pass.
    pub fn free_socket(&self, handle: SocketHandle) {
        self.inner.lock().to_free.push(Token(handle.0));
    }

    pub fn free_socket_pair(&self, a: SocketHandle, b: SocketHandle) {
        self.free_socket(a);
        if a != b {
            self.free_socket(b);
        }
    }

    /// Sends a datagram on a previously-allocated socket.
    pub fn send_data(&self, handle: SocketHandle, dest: SocketAddr, data: &[u8]) -> Result<usize> {
        let inner = self.inner.lock();
        let entry = inner
            .sockets
            .get(&Token(handle.0))
            .ok_or_else(|| RtpError::Io("send on freed socket".to_string()))?;
        entry.socket.send_to(data, dest).map_err(|e| RtpError::Io(e.to_string()))
    }

    pub fn local_port(&self, handle: SocketHandle) -> Option<u16> {
        self.inner.lock().sockets.get(&Token(handle.0)).map(|e| e.port)
    }

    /// Signals the worker thread to exit and joins it.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SocketHeap {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(mut poll: Poll, inner: Arc<Mutex<Inner>>, shutdown: Arc<AtomicBool>) {
    let mut events = Events::with_capacity(128);
    let mut scratch = [0u8; 2048];

    while !shutdown.load(Ordering::SeqCst) {
        if let Err(err) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!(%err, "media I/O poll failed");
            continue;
        }

        for event in events.iter() {
            let token = event.token();

            let (sink, recv_result) = {
                let inner_guard = inner.lock();
                match inner_guard.sockets.get(&token) {
                    Some(entry) => (entry.sink.clone(), entry.socket.recv_from(&mut scratch)),
                    None => continue,
                }
            };

            match recv_result {
                Ok((len, src)) => {
                    if len > MAX_VALID_UDP_PACKET_SIZE {
                        tracing::warn!(len, "dropping oversized UDP datagram");
                    } else {
                        sink.on_received_data(SocketHandle(token.0), src, &scratch[..len]);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => tracing::warn!(%err, "media socket read error"),
            }

            process_deferred_frees(&inner, &mut poll);
        }

        process_deferred_frees(&inner, &mut poll);
    }
}

fn process_deferred_frees(inner: &Arc<Mutex<Inner>>, poll: &mut Poll) {
    let mut inner_guard = inner.lock();
    if inner_guard.to_free.is_empty() {
        return;
    }
    let to_free = std::mem::take(&mut inner_guard.to_free);
    for token in to_free {
        if let Some(mut entry) = inner_guard.sockets.remove(&token) {
            let _ = poll.registry().deregister(&mut entry.socket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct RecordingSink {
        tx: Mutex<mpsc::Sender<Vec<u8>>>,
    }

    impl SocketSink for RecordingSink {
        fn on_received_data(&self, _handle: SocketHandle, _src: SocketAddr, data: &[u8]) {
            let _ = self.tx.lock().send(data.to_vec());
        }
    }

    #[test]
    fn alloc_socket_pair_without_multiplex_is_consecutive_and_even() {
        let heap = SocketHeap::new(30000, 30200).unwrap();
        let (tx, _rx) = mpsc::channel();
        let sink = Arc::new(RecordingSink { tx: Mutex::new(tx) });
        let ((_, rtp_port), (_, rtcp_port)) = heap
            .alloc_socket_pair(Family::V4, sink, Multiplex::Dont)
            .unwrap();
        assert_eq!(rtp_port % 2, 0);
        assert_eq!(rtcp_port, rtp_port + 1);
        heap.shutdown();
    }

    #[test]
    fn multiplexed_pair_shares_one_socket() {
        let heap = SocketHeap::new(30202, 30400).unwrap();
        let (tx, _rx) = mpsc::channel();
        let sink = Arc::new(RecordingSink { tx: Mutex::new(tx) });
        let (rtp, rtcp) = heap.alloc_socket_pair(Family::V4, sink, Multiplex::Do).unwrap();
        assert_eq!(rtp, rtcp);
        heap.shutdown();
    }

    #[test]
    fn sent_datagram_is_dispatched_to_sink() {
        let heap = SocketHeap::new(30402, 30500).unwrap();
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(RecordingSink { tx: Mutex::new(tx) });
        let (handle, port) = heap.alloc_socket(Family::V4, sink, 0).unwrap();

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"hello", ("127.0.0.1", port)).unwrap();

        let received = rx.recv_timeout(Duration::from_secs(1)).expect("datagram delivered");
        assert_eq!(received, b"hello");

        let _ = handle;
        heap.shutdown();
    }
}
