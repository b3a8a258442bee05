//! Session discovery and client for connecting to running hosts.
//!
//! - `list_sessions` / `find_session` read the discovery files hosts write
//! - `SessionClient` speaks the line protocol: welcome, then requests
//!   correlated by id, with pushed events buffered on the side

use std::collections::VecDeque;
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use scenewire_protocol::{
    EventMessage, Request, RequestId, Response, ServerMessage, WelcomeMessage, MAX_MESSAGE_SIZE,
};
use serde_json::{Map, Value};
use thiserror::Error;

pub use scenewire_protocol::DiscoveryFile;

// ============================================================================
// Discovery (mirrors host/src/session_server/discovery.rs)
// ============================================================================

/// Get the platform-specific directory for discovery files.
pub fn discovery_dir() -> std::io::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let base = std::env::var("XDG_STATE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local/state")
            });
        Ok(base.join("scenewire/sessions"))
    }

    #[cfg(target_os = "macos")]
    {
        let base = dirs::data_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("Library/Application Support")
        });
        Ok(base.join("SceneWire/sessions"))
    }

    #[cfg(target_os = "windows")]
    {
        let base = dirs::data_local_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("C:\\"))
                .join("AppData\\Local")
        });
        Ok(base.join("SceneWire\\sessions"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Ok(std::env::temp_dir().join("scenewire/sessions"))
    }
}

/// Check if a process is still running.
fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // Signal 0 only checks that the process exists
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                false
            } else {
                CloseHandle(handle);
                true
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        true
    }
}

/// List live sessions in the platform discovery directory.
pub fn list_sessions() -> std::io::Result<Vec<DiscoveryFile>> {
    list_sessions_in(&discovery_dir()?)
}

/// List live sessions in `dir`, removing files left by dead processes.
/// Most recent first.
pub fn list_sessions_in(dir: &Path) -> std::io::Result<Vec<DiscoveryFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        let Ok(contents) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(discovery) = serde_json::from_str::<DiscoveryFile>(&contents) else {
            continue;
        };
        if is_process_alive(discovery.pid) {
            sessions.push(discovery);
        } else {
            // Stale discovery file - clean it up
            let _ = fs::remove_file(&path);
        }
    }

    // RFC 3339 UTC timestamps sort lexically
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(sessions)
}

/// Find a session by ID prefix (supports partial match).
pub fn find_session(sessions: &[DiscoveryFile], id_prefix: &str) -> Result<Option<DiscoveryFile>, SessionError> {
    if let Some(session) = sessions.iter().find(|s| s.session_id == id_prefix) {
        return Ok(Some(session.clone()));
    }

    let matches: Vec<_> = sessions
        .iter()
        .filter(|s| s.session_id.starts_with(id_prefix))
        .collect();

    match matches.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some((*one).clone())),
        _ => Err(SessionError::Ambiguous {
            prefix: id_prefix.to_string(),
            count: matches.len(),
        }),
    }
}

// ============================================================================
// Session Client
// ============================================================================

/// Errors that can occur when interacting with a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed by host")]
    ConnectionClosed,

    #[error("Timed out waiting for the host")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Ambiguous session ID '{prefix}' matches {count} sessions")]
    Ambiguous { prefix: String, count: usize },

    /// The host answered the request with an error envelope.
    #[error("Host error [{code}]: {message}")]
    Server { code: String, message: String },
}

/// A client connection to a running host.
pub struct SessionClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    welcome: WelcomeMessage,
    /// Events received while waiting for a response.
    events: VecDeque<EventMessage>,
    next_id: i64,
}

impl SessionClient {
    /// Connect and read the welcome line. `timeout` bounds the connect and
    /// every later read.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, SessionError> {
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| SessionError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        let mut reader = BufReader::new(
            stream
                .try_clone()
                .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?,
        );
        let writer = BufWriter::new(stream);

        let welcome = match receive(&mut reader)? {
            ServerMessage::Welcome(welcome) => welcome,
            _ => return Err(SessionError::Protocol("expected welcome as the first line".into())),
        };

        Ok(Self {
            reader,
            writer,
            welcome,
            events: VecDeque::new(),
            next_id: 1,
        })
    }

    /// Connect to a discovered session on loopback.
    pub fn connect_session(discovery: &DiscoveryFile, timeout: Duration) -> Result<Self, SessionError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], discovery.port));
        Self::connect(addr, timeout)
    }

    pub fn welcome(&self) -> &WelcomeMessage {
        &self.welcome
    }

    /// `None` blocks reads indefinitely, for long-running watches.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SessionError> {
        self.reader
            .get_ref()
            .set_read_timeout(timeout)
            .map_err(|e| SessionError::Io(e.to_string()))
    }

    /// Send a command and wait for its response. Error envelopes become
    /// `SessionError::Server`.
    pub fn request(&mut self, command: &str, params: Map<String, Value>) -> Result<Response, SessionError> {
        let id = RequestId::from(self.next_id);
        self.next_id += 1;

        let mut request = Request::new(command).with_id(id.clone());
        request.params = params;
        self.send(&request)?;

        loop {
            match self.receive()? {
                ServerMessage::Event(event) => self.events.push_back(event),
                ServerMessage::Welcome(_) => {}
                ServerMessage::Error { id: Some(got), error } if got == id => {
                    return Err(SessionError::Server {
                        code: error.code,
                        message: error.message,
                    });
                }
                // An uncorrelated error means our line never parsed
                ServerMessage::Error { id: None, error } => {
                    return Err(SessionError::Protocol(error.message));
                }
                ServerMessage::Response(resp) if resp.id.as_ref() == Some(&id) => return Ok(resp),
                _ => {}
            }
        }
    }

    /// Next pushed event, buffered or read from the wire.
    pub fn next_event(&mut self) -> Result<EventMessage, SessionError> {
        if let Some(event) = self.events.pop_front() {
            return Ok(event);
        }
        loop {
            if let ServerMessage::Event(event) = self.receive()? {
                return Ok(event);
            }
        }
    }

    fn send(&mut self, request: &Request) -> Result<(), SessionError> {
        let json = serde_json::to_string(request).map_err(|e| SessionError::Protocol(e.to_string()))?;
        writeln!(self.writer, "{}", json).map_err(|e| SessionError::Io(e.to_string()))?;
        self.writer.flush().map_err(|e| SessionError::Io(e.to_string()))?;
        Ok(())
    }

    fn receive(&mut self) -> Result<ServerMessage, SessionError> {
        receive(&mut self.reader)
    }
}

fn receive(reader: &mut impl Read) -> Result<ServerMessage, SessionError> {
    let line = read_line_bounded(reader, MAX_MESSAGE_SIZE)?;
    ServerMessage::parse(&line).map_err(|e| SessionError::Protocol(format!("Invalid JSON: {}", e)))
}

/// Read one `\n`-terminated line of at most `max_bytes`.
fn read_line_bounded(reader: &mut impl Read, max_bytes: usize) -> Result<String, SessionError> {
    let mut buf = Vec::with_capacity(4096);

    loop {
        let mut byte = [0u8; 1];
        match reader.read(&mut byte) {
            Ok(0) => {
                return if buf.is_empty() {
                    Err(SessionError::ConnectionClosed)
                } else {
                    Err(SessionError::Protocol("connection closed mid-frame (no newline)".into()))
                };
            }
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                buf.push(byte[0]);
                if buf.len() > max_bytes {
                    return Err(SessionError::Protocol(format!("message exceeds {} byte limit", max_bytes)));
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(SessionError::Timeout)
            }
            Err(e) => return Err(SessionError::Io(e.to_string())),
        }
    }

    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|e| SessionError::Protocol(format!("Invalid UTF-8: {}", e)))
}

// ============================================================================
// Tests
// ============================================================================
