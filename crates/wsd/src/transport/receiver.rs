// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dedicated receive thread per socket.
//!
//! ```text
//! mio::poll(50ms) -> recv_from() (drain until WouldBlock) -> handler(bytes, src, reception)
//! ```
//!
//! The handler runs on the receive thread and must return quickly; the
//! dispatcher only filters and enqueues there. Handler panics are caught and
//! counted so one bad datagram cannot stop reception.

use super::Reception;
use crate::config::MAX_DATAGRAM_SIZE;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Callback invoked for every received datagram.
pub type DatagramHandler = Arc<dyn Fn(&[u8], SocketAddr, Reception) + Send + Sync>;

const SOCKET_TOKEN: Token = Token(0);
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Receive-side counters.
#[derive(Debug, Default)]
pub struct ReceiverMetrics {
    pub datagrams_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub receive_errors: AtomicU64,
    /// Handler panics (caught)
    pub handler_panics: AtomicU64,
}

impl ReceiverMetrics {
    /// (datagrams, bytes, errors, panics)
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.datagrams_received.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
            self.receive_errors.load(Ordering::Relaxed),
            self.handler_panics.load(Ordering::Relaxed),
        )
    }
}

/// Receive loop owning one socket.
pub struct DatagramReceiver {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    pub metrics: Arc<ReceiverMetrics>,
}

impl DatagramReceiver {
    /// Spawn the receive thread.
    ///
    /// Every datagram read from `socket` is passed to `handler` tagged with
    /// `reception`.
    ///
    /// # Errors
    /// Returns IO error if the socket cannot be made non-blocking or the
    /// thread cannot be spawned.
    pub fn spawn(
        name: &str,
        socket: Arc<UdpSocket>,
        reception: Reception,
        handler: DatagramHandler,
    ) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let mio_socket = mio::net::UdpSocket::from_std(socket.try_clone()?);

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let metrics = Arc::new(ReceiverMetrics::default());
        let metrics_clone = Arc::clone(&metrics);

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                Self::run_loop(mio_socket, reception, handler, running_clone, metrics_clone);
            })?;

        Ok(Self {
            handle: Some(handle),
            running,
            metrics,
        })
    }

    fn run_loop(
        mut socket: mio::net::UdpSocket,
        reception: Reception,
        handler: DatagramHandler,
        running: Arc<AtomicBool>,
        metrics: Arc<ReceiverMetrics>,
    ) {
        let mut poll = match Poll::new() {
            Ok(p) => p,
            Err(e) => {
                log::error!("[WSD-RX] failed to create mio Poll: {}", e);
                return;
            }
        };
        if let Err(e) = poll
            .registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)
        {
            log::error!("[WSD-RX] failed to register socket with poll: {}", e);
            return;
        }

        log::debug!(
            "[WSD-RX] {} receiver started on {:?}",
            reception,
            socket.local_addr()
        );

        let mut events = Events::with_capacity(16);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while running.load(Ordering::Relaxed) {
            if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    log::debug!("[WSD-RX] poll error: {:?}", e);
                }
                continue;
            }

            for event in events.iter() {
                if event.token() != SOCKET_TOKEN {
                    continue;
                }
                loop {
                    let (len, source) = match socket.recv_from(&mut buf) {
                        Ok(result) => result,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            // ICMP port-unreachable and friends surface here; keep going
                            log::debug!("[WSD-RX] recv_from error: {:?}", e);
                            metrics.receive_errors.fetch_add(1, Ordering::Relaxed);
                            break;
                        }
                    };
                    metrics.datagrams_received.fetch_add(1, Ordering::Relaxed);
                    metrics
                        .bytes_received
                        .fetch_add(len as u64, Ordering::Relaxed);

                    let datagram = &buf[..len];
                    let result =
                        catch_unwind(AssertUnwindSafe(|| handler(datagram, source, reception)));
                    if result.is_err() {
                        metrics.handler_panics.fetch_add(1, Ordering::Relaxed);
                        log::error!("[WSD-RX] handler panicked on datagram from {}", source);
                    }
                }
            }
        }

        log::debug!("[WSD-RX] {} receiver stopped", reception);
    }

    /// Stop the thread and wait for it.
    ///
    /// Returns false if the receive thread panicked.
    pub fn shutdown(mut self) -> bool {
        self.stop()
    }

    fn stop(&mut self) -> bool {
        self.running.store(false, Ordering::Relaxed);
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let name = handle.thread().name().unwrap_or("wsd-rx").to_string();
        match handle.join() {
            Ok(()) => true,
            Err(_) => {
                log::warn!("[WSD-RX] receive thread {} terminated abnormally", name);
                false
            }
        }
    }
}

impl Drop for DatagramReceiver {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    #[test]
    fn test_receives_and_tags_datagrams() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let addr = socket.local_addr().unwrap();
        let (tx, rx) = channel::unbounded();

        let receiver = DatagramReceiver::spawn(
            "wsd-rx-test",
            socket,
            Reception::Unicast,
            Arc::new(move |bytes: &[u8], _src: SocketAddr, reception: Reception| {
                let _ = tx.send((bytes.to_vec(), reception));
            }),
        )
        .unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.send_to(b"probe", addr).unwrap();

        let (bytes, reception) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(bytes, b"probe");
        assert_eq!(reception, Reception::Unicast);
        assert_eq!(receiver.metrics.snapshot().0, 1);
        assert!(receiver.shutdown());
    }

    #[test]
    fn test_handler_panic_does_not_stop_loop() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let addr = socket.local_addr().unwrap();
        let (tx, rx) = channel::unbounded();

        let receiver = DatagramReceiver::spawn(
            "wsd-rx-panic",
            socket,
            Reception::Multicast,
            Arc::new(move |bytes: &[u8], _src: SocketAddr, _r: Reception| {
                if bytes == b"boom" {
                    panic!("bad datagram");
                }
                let _ = tx.send(bytes.to_vec());
            }),
        )
        .unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.send_to(b"boom", addr).unwrap();
        peer.send_to(b"ok", addr).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"ok");
        assert_eq!(receiver.metrics.handler_panics.load(Ordering::Relaxed), 1);
        assert!(receiver.shutdown(), "caught handler panic must not fail the thread");
    }
}
