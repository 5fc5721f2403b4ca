// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! TCP link to the arm controller.
//!
//! A [`RobotLink`] owns at most one [`Connection`] at a time. Opening a new connection closes
//! the previous one first, so two sockets never talk to the device concurrently.
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use nix::sys::socket::setsockopt;
use nix::sys::socket::sockopt::{KeepAlive, TcpKeepCount, TcpKeepIdle, TcpKeepInterval};
use serde::{Deserialize, Serialize};

use crate::exception::{BlinxException, BlinxResult};
use crate::robot::service_types::DEFAULT_PORT;
use crate::utils::duration_ms;

const CLIENT: Token = Token(1);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// TCP keep-alive parameters. The defaults are the values the controller firmware tolerates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    /// idle time before the first probe
    #[serde(with = "duration_ms")]
    pub idle: Duration,
    /// time between probes
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    /// unanswered probes before the peer is considered dead
    pub probes: u32,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        KeepAliveConfig {
            idle: Duration::from_secs(30),
            interval: Duration::from_secs(3),
            probes: 10,
        }
    }
}

/// Where and how to connect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    /// timeout of a single connect attempt
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// timeout of a single send or receive
    #[serde(with = "duration_ms")]
    pub io_timeout: Duration,
    pub keepalive: Option<KeepAliveConfig>,
    pub connect_attempts: u32,
    /// pause between two connect attempts
    #[serde(with = "duration_ms")]
    pub retry_backoff: Duration,
    /// bytes read from the socket at once
    pub read_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            host: "192.168.10.242".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(3),
            io_timeout: Duration::from_secs(2),
            keepalive: Some(KeepAliveConfig::default()),
            connect_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            read_size: 1024,
        }
    }
}

impl LinkConfig {
    /// Default parameters for `host:port`.
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        LinkConfig {
            host: host.into(),
            port,
            ..LinkConfig::default()
        }
    }

    fn socket_address(&self) -> BlinxResult<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| BlinxException::ConnectException {
                message: format!("cannot resolve {}:{}: {}", self.host, self.port, e),
            })?
            .next()
            .ok_or_else(|| BlinxException::ConnectException {
                message: format!("{}:{} does not resolve to an address", self.host, self.port),
            })
    }
}

/// One open TCP stream to the controller.
pub struct Connection {
    id: u64,
    stream: TcpStream,
    poll: Poll,
    events: Events,
    peer: SocketAddr,
    io_timeout: Duration,
    read_size: usize,
    open: bool,
}

impl Connection {
    /// Connects to the controller, retrying up to `connect_attempts` times with a fixed backoff.
    /// # Errors
    /// * [`ConnectException`](`crate::exception::BlinxException::ConnectException`) - if every
    /// attempt failed or the socket could not be configured.
    pub fn open(config: &LinkConfig) -> BlinxResult<Connection> {
        let address = config.socket_address()?;
        let attempts = config.connect_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            log::info!("connecting to {} (attempt {}/{})", address, attempt, attempts);
            match StdTcpStream::connect_timeout(&address, config.connect_timeout) {
                Ok(stream) => return Connection::from_std(stream, address, config),
                Err(e) => {
                    log::warn!("connect to {} failed: {}", address, e);
                    last_error = e.to_string();
                    if attempt < attempts {
                        thread::sleep(config.retry_backoff);
                    }
                }
            }
        }
        Err(BlinxException::ConnectException {
            message: format!(
                "{} unreachable after {} attempts: {}",
                address, attempts, last_error
            ),
        })
    }

    fn from_std(
        stream: StdTcpStream,
        peer: SocketAddr,
        config: &LinkConfig,
    ) -> BlinxResult<Connection> {
        let setup_error = |e: String| BlinxException::ConnectException {
            message: format!("cannot configure socket to {}: {}", peer, e),
        };
        stream.set_nodelay(true).map_err(|e| setup_error(e.to_string()))?;
        if let Some(keepalive) = config.keepalive {
            let fd = stream.as_raw_fd();
            setsockopt(fd, KeepAlive, &true).map_err(|e| setup_error(e.to_string()))?;
            setsockopt(fd, TcpKeepIdle, &(keepalive.idle.as_secs() as u32))
                .map_err(|e| setup_error(e.to_string()))?;
            setsockopt(fd, TcpKeepInterval, &(keepalive.interval.as_secs() as u32))
                .map_err(|e| setup_error(e.to_string()))?;
            setsockopt(fd, TcpKeepCount, &keepalive.probes)
                .map_err(|e| setup_error(e.to_string()))?;
        }
        stream
            .set_nonblocking(true)
            .map_err(|e| setup_error(e.to_string()))?;
        let mut stream = TcpStream::from_std(stream);
        let poll = Poll::new().map_err(|e| setup_error(e.to_string()))?;
        poll.registry()
            .register(&mut stream, CLIENT, Interest::READABLE | Interest::WRITABLE)
            .map_err(|e| setup_error(e.to_string()))?;
        log::info!("connected to {}", peer);
        Ok(Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            stream,
            poll,
            events: Events::with_capacity(16),
            peer,
            io_timeout: config.io_timeout,
            read_size: config.read_size.max(1),
            open: true,
        })
    }

    /// Distinguishes this connection from every other one opened by the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Writes all of `bytes` within the I/O timeout.
    ///
    /// The connection is closed on any error.
    /// # Errors
    /// * [`NetworkException`](`crate::exception::BlinxException::NetworkException`) - on timeout
    /// or socket error.
    pub fn send(&mut self, bytes: &[u8]) -> BlinxResult<()> {
        self.ensure_open()?;
        let deadline = Instant::now() + self.io_timeout;
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(self.fail("connection closed while sending")),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if !self.wait(deadline)? {
                        return Err(self.fail("send timed out"));
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fail(&format!("send failed: {}", e))),
            }
        }
        Ok(())
    }

    /// Reads at most `read_size` bytes, waiting up to the I/O timeout.
    ///
    /// The connection is closed on any error.
    /// # Errors
    /// * [`NetworkException`](`crate::exception::BlinxException::NetworkException`) - on timeout,
    /// end of stream or socket error.
    pub fn recv(&mut self) -> BlinxResult<Vec<u8>> {
        let timeout = self.io_timeout;
        match self.try_recv(timeout)? {
            Some(bytes) => Ok(bytes),
            None => Err(self.fail("receive timed out")),
        }
    }

    /// Like [`recv`](`Self::recv`) but returns `Ok(None)` if nothing arrived within `wait`.
    pub fn try_recv(&mut self, wait: Duration) -> BlinxResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let deadline = Instant::now() + wait;
        let mut buffer = vec![0_u8; self.read_size];
        loop {
            match self.stream.read(&mut buffer) {
                Ok(0) => return Err(self.fail("connection closed by peer")),
                Ok(n) => {
                    buffer.truncate(n);
                    return Ok(Some(buffer));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if !self.wait(deadline)? {
                        return Ok(None);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fail(&format!("receive failed: {}", e))),
            }
        }
    }

    /// Closes the socket. Calling it again has no effect.
    pub fn disconnect(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.poll.registry().deregister(&mut self.stream) {
            log::debug!("deregister {}: {}", self.peer, e);
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            log::debug!("shutdown {}: {}", self.peer, e);
        }
        log::info!("disconnected from {}", self.peer);
    }

    /// Blocks until the socket reports an event or `deadline` passes. Returns false on timeout.
    fn wait(&mut self, deadline: Instant) -> BlinxResult<bool> {
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        if let Err(e) = self.poll.poll(&mut self.events, Some(deadline - now)) {
            if e.kind() == ErrorKind::Interrupted {
                return Ok(true);
            }
            return Err(self.fail(&format!("poll failed: {}", e)));
        }
        Ok(!self.events.is_empty() || Instant::now() < deadline)
    }

    fn ensure_open(&self) -> BlinxResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(BlinxException::NetworkException {
                message: format!("connection to {} is closed", self.peer),
            })
        }
    }

    fn fail(&mut self, reason: &str) -> BlinxException {
        log::error!("{}: {}", self.peer, reason);
        self.disconnect();
        BlinxException::NetworkException {
            message: format!("{}: {}", self.peer, reason),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Owner of the single connection of a session.
#[derive(Default)]
pub struct RobotLink {
    connection: Mutex<Option<Connection>>,
}

impl RobotLink {
    pub fn new() -> Self {
        RobotLink::default()
    }

    /// Closes the current connection, if any, and opens a new one.
    /// # Errors
    /// * [`ConnectException`](`crate::exception::BlinxException::ConnectException`) - the link
    /// stays disconnected.
    pub fn connect(&self, config: &LinkConfig) -> BlinxResult<()> {
        let mut guard = self.lock();
        if let Some(mut old) = guard.take() {
            log::info!("closing connection to {} before reconnecting", old.peer());
            old.disconnect();
        }
        *guard = Some(Connection::open(config)?);
        Ok(())
    }

    /// Closes the connection. Safe to call when already disconnected.
    pub fn disconnect(&self) {
        if let Some(mut connection) = self.lock().take() {
            connection.disconnect();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().as_ref().map_or(false, Connection::is_open)
    }

    /// Runs `f` on the open connection. A connection that was closed by an I/O error inside `f`
    /// is dropped from the link.
    /// # Errors
    /// * [`NotConnected`](`crate::exception::BlinxException::NotConnected`) - if there is no
    /// open connection.
    pub fn with_connection<R, F>(&self, f: F) -> BlinxResult<R>
    where
        F: FnOnce(&mut Connection) -> BlinxResult<R>,
    {
        let mut guard = self.lock();
        let connection = match guard.as_mut() {
            Some(connection) if connection.is_open() => connection,
            _ => {
                *guard = None;
                return Err(BlinxException::NotConnected);
            }
        };
        let result = f(connection);
        if !connection.is_open() {
            *guard = None;
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::Duration;

    use crate::network::{Connection, LinkConfig, RobotLink};
    use crate::BlinxException;

    fn local_config(port: u16) -> LinkConfig {
        LinkConfig {
            io_timeout: Duration::from_millis(300),
            retry_backoff: Duration::from_millis(10),
            ..LinkConfig::new("127.0.0.1", port)
        }
    }

    #[test]
    fn send_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buffer = [0_u8; 64];
            let n = socket.read(&mut buffer).unwrap();
            socket.write_all(&buffer[..n]).unwrap();
        });
        let mut connection = Connection::open(&local_config(port)).unwrap();
        connection.send(b"hello\r\n").unwrap();
        assert_eq!(connection.recv().unwrap(), b"hello\r\n");
        server.join().unwrap();
    }

    #[test]
    fn receive_timeout_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (done_tx, done_rx) = channel::<()>();
        let server = thread::spawn(move || {
            let (_socket, _) = listener.accept().unwrap();
            done_rx.recv().unwrap();
        });
        let mut connection = Connection::open(&local_config(port)).unwrap();
        assert_eq!(
            connection.try_recv(Duration::from_millis(50)).unwrap(),
            None
        );
        assert!(connection.is_open());
        match connection.recv() {
            Err(BlinxException::NetworkException { message }) => {
                assert!(message.contains("timed out"))
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert!(!connection.is_open());
        connection.disconnect();
        assert!(connection.send(b"x").is_err());
        done_tx.send(()).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn refused_connect_gives_up_after_retries() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        match Connection::open(&local_config(port)) {
            Err(BlinxException::ConnectException { message }) => {
                assert!(message.contains("3 attempts"))
            }
            other => panic!("unexpected {:?}", other.map(|c| c.peer())),
        }
    }

    #[test]
    fn reconnect_closes_previous_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (eof_tx, eof_rx) = channel();
        let server = thread::spawn(move || {
            let (mut first, _) = listener.accept().unwrap();
            let mut buffer = [0_u8; 16];
            let n = first.read(&mut buffer).unwrap();
            eof_tx.send(n).unwrap();
            let (_second, _) = listener.accept().unwrap();
        });
        let link = RobotLink::new();
        link.connect(&local_config(port)).unwrap();
        assert!(link.is_connected());
        let first = link.with_connection(|connection| Ok(connection.id())).unwrap();
        link.connect(&local_config(port)).unwrap();
        let second = link.with_connection(|connection| Ok(connection.id())).unwrap();
        assert_ne!(first, second);
        assert_eq!(eof_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0);
        assert!(link.is_connected());
        server.join().unwrap();
        link.disconnect();
        link.disconnect();
        assert!(!link.is_connected());
    }

    #[test]
    fn link_drops_broken_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            drop(socket);
        });
        let link = RobotLink::new();
        link.connect(&local_config(port)).unwrap();
        server.join().unwrap();
        let result = link.with_connection(|connection| connection.recv());
        assert!(result.is_err());
        assert!(!link.is_connected());
        match link.with_connection(|connection| connection.recv()) {
            Err(BlinxException::NotConnected) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
