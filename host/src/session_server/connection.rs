//! Connection manager: accepts peers, frames JSONL, queues replies.
//!
//! Everything here runs on the host loop thread. Sockets are non-blocking;
//! each tick reads what is available, dispatches complete lines in order
//! and writes as much of the outbound buffer as the socket accepts.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::Ordering;

use scenewire_protocol::{ErrorCode, ErrorMessage, Request, Response, MAX_MESSAGE_SIZE};

use super::server::ServerMetrics;

/// Maximum consecutive parse failures before disconnecting a client.
pub const MAX_PARSE_FAILURES: u32 = 3;

const READ_CHUNK: usize = 64 * 1024;

/// Identity of one connection. Never reused within a server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Flushing the outbound buffer before closing.
    Closing,
    Closed,
}

/// What the dispatcher hands back for one request.
#[derive(Debug, Clone)]
pub struct Reply {
    pub response: Response,
    /// Close the connection once the response is flushed.
    pub close: bool,
}

impl Reply {
    pub fn new(response: Response) -> Self {
        Self { response, close: false }
    }
}

struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    state: ConnectionState,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    parse_failures: u32,
}

impl Connection {
    fn queue(&mut self, response: &Response) {
        match response.to_line() {
            Ok(line) => {
                self.outbound.extend_from_slice(line.as_bytes());
                self.outbound.push(b'\n');
            }
            Err(e) => log::error!("failed to serialize response for connection {}: {}", self.id, e),
        }
    }

    fn queue_error(&mut self, code: ErrorCode, message: String) {
        self.queue(&ErrorMessage::new(code, message).to_response(None));
    }

    /// Read everything currently available. Returns false on EOF or error.
    fn fill(&mut self) -> bool {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return false,
                Ok(n) => {
                    self.inbound.extend_from_slice(&buf[..n]);
                    // Stop early so one peer cannot grow the buffer unbounded.
                    if self.inbound.len() > MAX_MESSAGE_SIZE + READ_CHUNK {
                        return true;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("read error on connection {}: {}", self.id, e);
                    return false;
                }
            }
        }
    }

    /// Write as much of the outbound buffer as possible. Returns false on error.
    fn flush(&mut self) -> bool {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return false,
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("write error on connection {}: {}", self.id, e);
                    return false;
                }
            }
        }
        true
    }
}

/// Accepts and multiplexes controller connections.
pub struct ConnectionManager {
    listener: TcpListener,
    connections: Vec<Connection>,
    next_id: u64,
    max_connections: usize,
    welcome: Response,
    metrics: ServerMetrics,
}

impl ConnectionManager {
    /// `listener` must already be non-blocking.
    pub fn new(listener: TcpListener, max_connections: usize, welcome: Response, metrics: ServerMetrics) -> Self {
        Self {
            listener,
            connections: Vec::new(),
            next_id: 1,
            max_connections,
            welcome,
            metrics,
        }
    }

    /// Number of connections not yet closed.
    pub fn active_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| c.state == ConnectionState::Connected)
            .count()
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.iter().find(|c| c.id == id).map(|c| c.state)
    }

    /// Accept at most one pending connection and greet it.
    pub fn accept(&mut self) -> Option<ConnectionId> {
        let (stream, peer) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => return None,
            Err(e) => {
                log::error!("Accept error: {}", e);
                return None;
            }
        };

        if self.active_count() >= self.max_connections {
            log::warn!(
                "Connection refused from {}: limit of {} reached",
                peer,
                self.max_connections
            );
            self.metrics.connections_refused_limit.fetch_add(1, Ordering::Relaxed);
            drop(stream);
            return None;
        }

        if let Err(e) = stream.set_nonblocking(true) {
            log::warn!("Could not configure connection from {}: {}", peer, e);
            return None;
        }
        let _ = stream.set_nodelay(true);

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        log::debug!("Accepted connection {} from {}", id, peer);
        self.metrics.connections_accepted.fetch_add(1, Ordering::Relaxed);

        let mut conn = Connection {
            id,
            peer,
            stream,
            state: ConnectionState::Connected,
            inbound: Vec::new(),
            outbound: Vec::new(),
            parse_failures: 0,
        };
        conn.queue(&self.welcome);
        self.connections.push(conn);
        Some(id)
    }

    /// Read from every connection and dispatch each complete line.
    /// Responses are queued on the connection that sent the request, in
    /// receive order.
    pub fn process<F>(&mut self, mut handler: F)
    where
        F: FnMut(ConnectionId, Request) -> Reply,
    {
        for conn in self.connections.iter_mut() {
            if conn.state != ConnectionState::Connected {
                continue;
            }
            let open = conn.fill();
            process_lines(conn, &self.metrics, &mut handler);
            if conn.state == ConnectionState::Connected && !open {
                log::debug!("Connection {} from {} closed by peer", conn.id, conn.peer);
                conn.state = ConnectionState::Closing;
            }
        }
    }

    /// Queue a line for every connected peer.
    pub fn broadcast(&mut self, response: &Response) -> usize {
        let mut sent = 0;
        for conn in self.connections.iter_mut() {
            if conn.state == ConnectionState::Connected {
                conn.queue(response);
                sent += 1;
            }
        }
        sent
    }

    /// Flush outbound buffers and drop finished connections. Returns the
    /// ids removed, so their subscriptions can be torn down.
    pub fn flush(&mut self) -> Vec<ConnectionId> {
        for conn in self.connections.iter_mut() {
            if conn.state == ConnectionState::Closed {
                continue;
            }
            if !conn.flush() {
                conn.state = ConnectionState::Closed;
            } else if conn.state == ConnectionState::Closing && conn.outbound.is_empty() {
                let _ = conn.stream.shutdown(Shutdown::Both);
                conn.state = ConnectionState::Closed;
            }
        }

        let mut removed = Vec::new();
        self.connections.retain(|c| {
            if c.state == ConnectionState::Closed {
                removed.push(c.id);
                false
            } else {
                true
            }
        });
        for id in &removed {
            log::debug!("Connection {} removed", id);
        }
        removed
    }

    /// Close every connection (server shutdown).
    pub fn close_all(&mut self) -> Vec<ConnectionId> {
        for conn in self.connections.iter_mut() {
            if conn.state == ConnectionState::Connected {
                conn.state = ConnectionState::Closing;
            }
        }
        let mut removed = self.flush();
        for conn in self.connections.drain(..) {
            let _ = conn.stream.shutdown(Shutdown::Both);
            removed.push(conn.id);
        }
        removed
    }
}

fn process_lines<F>(conn: &mut Connection, metrics: &ServerMetrics, handler: &mut F)
where
    F: FnMut(ConnectionId, Request) -> Reply,
{
    while conn.state == ConnectionState::Connected {
        let Some(pos) = conn.inbound.iter().position(|b| *b == b'\n') else {
            let pending = conn.inbound.len();
            if pending > MAX_MESSAGE_SIZE {
                close_oversized(conn, metrics, pending);
            }
            return;
        };
        let mut line: Vec<u8> = conn.inbound.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        if line.len() > MAX_MESSAGE_SIZE {
            close_oversized(conn, metrics, line.len());
            return;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let request: Request = match serde_json::from_slice(&line) {
            Ok(req) => {
                conn.parse_failures = 0;
                req
            }
            Err(e) => {
                conn.parse_failures += 1;
                log::debug!(
                    "Malformed message ({}/{}): {}",
                    conn.parse_failures,
                    MAX_PARSE_FAILURES,
                    e
                );
                conn.queue_error(
                    ErrorCode::ProtocolError,
                    format!("{}: {}", ErrorCode::ProtocolError.message(), e),
                );
                if conn.parse_failures >= MAX_PARSE_FAILURES {
                    log::warn!("Connection {} exceeded parse failure limit, disconnecting", conn.id);
                    metrics.connections_closed_parse_failures.fetch_add(1, Ordering::Relaxed);
                    conn.state = ConnectionState::Closing;
                }
                continue;
            }
        };

        let reply = handler(conn.id, request);
        conn.queue(&reply.response);
        if reply.close {
            log::debug!("Connection {} closing on request", conn.id);
            conn.state = ConnectionState::Closing;
        }
    }
}

fn close_oversized(conn: &mut Connection, metrics: &ServerMetrics, len: usize) {
    conn.inbound.clear();
    conn.queue_error(
        ErrorCode::MessageTooLarge,
        format!("{} ({} bytes, limit {})", ErrorCode::MessageTooLarge.message(), len, MAX_MESSAGE_SIZE),
    );
    log::warn!("Connection {} sent oversized message ({}), disconnecting", conn.id, len);
    metrics.connections_closed_oversize.fetch_add(1, Ordering::Relaxed);
    conn.state = ConnectionState::Closing;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::time::{Duration, Instant};

    fn manager(max: usize) -> (ConnectionManager, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let welcome = Response::new("welcome").field("appName", "test");
        (ConnectionManager::new(listener, max, welcome, ServerMetrics::new()), addr)
    }

    fn accept_within(mgr: &mut ConnectionManager) -> ConnectionId {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(id) = mgr.accept() {
                return id;
            }
            assert!(Instant::now() < deadline, "no connection accepted");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn echo(_: ConnectionId, req: Request) -> Reply {
        Reply::new(Response::new("echo").field("command", req.command).with_id(req.id))
    }

    /// Tick the manager until the client has read `n` lines.
    fn pump(mgr: &mut ConnectionManager, reader: &mut BufReader<TcpStream>, n: usize) -> Vec<String> {
        let mut lines = Vec::new();
        reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut line = String::new();
        while lines.len() < n {
            mgr.process(echo);
            mgr.flush();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    lines.push(line.trim_end().to_string());
                    line.clear();
                }
                Err(_) => {}
            }
            assert!(Instant::now() < deadline, "timed out waiting for lines");
        }
        lines
    }

    #[test]
    fn test_welcome_then_ordered_replies() {
        let (mut mgr, addr) = manager(4);
        let mut client = TcpStream::connect(addr).unwrap();
        accept_within(&mut mgr);
        let mut reader = BufReader::new(client.try_clone().unwrap());

        client
            .write_all(b"{\"command\":\"a\",\"id\":1}\r\n\n{\"command\":\"b\",\"id\":2}\n")
            .unwrap();
        let lines = pump(&mut mgr, &mut reader, 3);
        assert!(lines[0].contains("\"welcome\""));
        assert!(lines[1].contains("\"a\""));
        assert!(lines[2].contains("\"b\""));
    }

    #[test]
    fn test_three_parse_failures_close() {
        let (mut mgr, addr) = manager(4);
        let mut client = TcpStream::connect(addr).unwrap();
        let id = accept_within(&mut mgr);
        let mut reader = BufReader::new(client.try_clone().unwrap());

        client.write_all(b"nope\nnope\nnope\n").unwrap();
        let lines = pump(&mut mgr, &mut reader, 4);
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("protocol_error"));
        assert!(lines[1].contains("Malformed JSON message: "));
        assert!(mgr.state(id).is_none());
        assert_eq!(mgr.metrics.connections_closed_parse_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_valid_line_resets_failure_count() {
        let (mut mgr, addr) = manager(4);
        let mut client = TcpStream::connect(addr).unwrap();
        let id = accept_within(&mut mgr);
        let mut reader = BufReader::new(client.try_clone().unwrap());

        client
            .write_all(b"x\nx\n{\"command\":\"ok\"}\nx\nx\n")
            .unwrap();
        let lines = pump(&mut mgr, &mut reader, 6);
        assert_eq!(lines.len(), 6);
        assert_eq!(mgr.state(id), Some(ConnectionState::Connected));
    }

    #[test]
    fn test_connection_limit_refuses() {
        let (mut mgr, addr) = manager(1);
        let _first = TcpStream::connect(addr).unwrap();
        accept_within(&mut mgr);

        let second = TcpStream::connect(addr).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while mgr.metrics.connections_refused_limit.load(Ordering::Relaxed) == 0 {
            assert!(mgr.accept().is_none());
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(mgr.active_count(), 1);

        second
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = String::new();
        let n = BufReader::new(second).read_line(&mut buf).unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_broadcast_reaches_every_connection() {
        let (mut mgr, addr) = manager(4);
        let a = TcpStream::connect(addr).unwrap();
        accept_within(&mut mgr);
        let b = TcpStream::connect(addr).unwrap();
        accept_within(&mut mgr);

        assert_eq!(mgr.broadcast(&Response::new("event")), 2);
        let mut ra = BufReader::new(a);
        let mut rb = BufReader::new(b);
        assert_eq!(pump(&mut mgr, &mut ra, 2)[1], "{\"type\":\"event\"}");
        assert_eq!(pump(&mut mgr, &mut rb, 2)[1], "{\"type\":\"event\"}");
    }
}
