//! TCP session server and the host loop.
//!
//! One thread owns the live scene, the scene editor, every connection and
//! every subscription. Each tick polls the network, advances the scene one
//! frame, pushes events for watched signals and reloads the live scene
//! when its file was rewritten.

use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use scenewire_config::{CaptureSettings, Settings};
use scenewire_engine::registry::TypeRegistry;
use scenewire_io::{ChangeQueue, EditError, SceneEditor};
use scenewire_protocol::{HostVersion, WelcomeMessage, PROTOCOL_VERSION};
use thiserror::Error;

use super::connection::{ConnectionManager, Reply};
use super::discovery::DiscoveryManager;
use super::dispatcher::{CommandContext, Dispatcher};
use super::events::{event_message, SubscriptionRegistry};
use super::handlers::COMMANDS;
use crate::host::Host;

/// Operational counters, shared between the loop thread and the owner.
#[derive(Debug, Clone, Default)]
pub struct ServerMetrics {
    pub connections_accepted: Arc<AtomicU64>,
    /// Connections refused due to the connection limit.
    pub connections_refused_limit: Arc<AtomicU64>,
    /// Connections closed after repeated malformed lines.
    pub connections_closed_parse_failures: Arc<AtomicU64>,
    /// Connections closed due to an oversized line.
    pub connections_closed_oversize: Arc<AtomicU64>,
    pub commands_processed: Arc<AtomicU64>,
    /// Event lines queued, counted once per receiving connection.
    pub events_sent: Arc<AtomicU64>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current values under their wire names.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let load = |counter: &Arc<AtomicU64>| counter.load(Ordering::Relaxed);
        vec![
            ("connectionsAccepted", load(&self.connections_accepted)),
            ("connectionsRefusedLimit", load(&self.connections_refused_limit)),
            ("connectionsClosedParseFailures", load(&self.connections_closed_parse_failures)),
            ("connectionsClosedOversize", load(&self.connections_closed_oversize)),
            ("commandsProcessed", load(&self.commands_processed)),
            ("eventsSent", load(&self.events_sent)),
        ]
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to open main scene: {0}")]
    Scene(#[from] EditError),

    #[error("failed to encode welcome message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Configuration for the session server.
#[derive(Debug, Clone, Default)]
pub struct SessionServerConfig {
    pub settings: Settings,
    /// Stop the loop after this many frames.
    pub max_frames: Option<u64>,
    /// Write the discovery file here instead of the platform directory.
    pub discovery_dir: Option<PathBuf>,
}

/// The session server: listener, host loop thread and discovery file.
pub struct SessionServer {
    discovery: Option<DiscoveryManager>,
    loop_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    bound_addr: Option<SocketAddr>,
    metrics: ServerMetrics,
}

impl SessionServer {
    /// Create a new session server (not started).
    pub fn new() -> Self {
        Self {
            discovery: None,
            loop_handle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            bound_addr: None,
            metrics: ServerMetrics::new(),
        }
    }

    /// Bind the listener, open the main scene and spawn the host loop.
    pub fn start(&mut self, config: SessionServerConfig) -> Result<(), ServerError> {
        if self.is_running() {
            return Ok(());
        }
        let settings = config.settings;

        let addr = settings.listen_addr();
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        // Non-blocking so the loop can run frames between requests
        listener.set_nonblocking(true)?;
        let bound = listener.local_addr()?;

        let registry = Arc::new(TypeRegistry::builtin());
        let mut host = Host::new(&settings.host, Arc::clone(&registry));
        if let Some(scene) = &settings.host.main_scene {
            host.open_scene(scene)?;
        }
        let changes = ChangeQueue::new();
        let editor = SceneEditor::new(host.project().clone(), registry).with_notifier(changes.clone());

        let welcome = WelcomeMessage {
            protocol_version: PROTOCOL_VERSION.to_string(),
            host_version: HostVersion::parse(env!("CARGO_PKG_VERSION")),
            app_name: settings.host.app_name.clone(),
        }
        .to_response()?;

        if settings.server.discovery {
            let project_root = Some(settings.host.project_root.clone());
            let app_name = settings.host.app_name.clone();
            let manager = match &config.discovery_dir {
                Some(dir) => DiscoveryManager::in_dir(dir, bound.port(), project_root, app_name)?,
                None => DiscoveryManager::new(bound.port(), project_root, app_name)?,
            };
            log::debug!("Discovery file written to {}", manager.path().display());
            self.discovery = Some(manager);
        }

        let frame_rate = settings.host.frame_rate.max(1);
        let host_loop = HostLoop {
            host,
            editor,
            changes,
            connections: ConnectionManager::new(
                listener,
                settings.server.max_connections,
                welcome,
                self.metrics.clone(),
            ),
            subscriptions: SubscriptionRegistry::new(),
            dispatcher: Dispatcher::new(COMMANDS),
            capture: settings.capture.clone(),
            metrics: self.metrics.clone(),
            frame_time: Duration::from_secs_f64(1.0 / f64::from(frame_rate)),
            max_frames: config.max_frames,
        };

        self.shutdown.store(false, Ordering::SeqCst);
        self.bound_addr = Some(bound);
        let shutdown = Arc::clone(&self.shutdown);
        self.loop_handle = Some(thread::spawn(move || host_loop.run(shutdown)));

        log::info!("Session server started on {}", bound);
        Ok(())
    }

    /// Signal the loop to stop, join it and remove the discovery file.
    pub fn stop(&mut self) {
        let Some(handle) = self.loop_handle.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = handle.join();
        self.finish();
    }

    /// Block until the loop ends on its own (frame limit reached).
    pub fn wait(&mut self) {
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.join();
            self.finish();
        }
    }

    fn finish(&mut self) {
        if let Some(discovery) = self.discovery.take() {
            let _ = discovery.cleanup();
        }
        self.bound_addr = None;
        log::info!("Session server stopped");
    }

    pub fn is_running(&self) -> bool {
        let alive = self.loop_handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false);
        alive && !self.shutdown.load(Ordering::SeqCst)
    }

    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }

    pub fn session_id(&self) -> Option<&str> {
        self.discovery.as_ref().map(|d| d.session_id())
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }
}

impl Default for SessionServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the loop thread.
struct HostLoop {
    host: Host,
    editor: SceneEditor,
    changes: ChangeQueue,
    connections: ConnectionManager,
    subscriptions: SubscriptionRegistry,
    dispatcher: Dispatcher,
    capture: CaptureSettings,
    metrics: ServerMetrics,
    frame_time: Duration,
    max_frames: Option<u64>,
}

impl HostLoop {
    fn run(mut self, shutdown: Arc<AtomicBool>) {
        let mut last = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            let tick = Instant::now();

            self.poll_network();
            self.host.frame(tick.duration_since(last));
            last = tick;
            self.broadcast_events();
            self.reload_changed();
            self.flush();

            if self.max_frames.is_some_and(|max| self.host.frames() >= max) {
                log::info!("Frame limit reached after {} frames", self.host.frames());
                break;
            }
            let spent = tick.elapsed();
            if spent < self.frame_time {
                thread::sleep(self.frame_time - spent);
            }
        }

        for id in self.connections.close_all() {
            self.subscriptions.remove_connection(id);
        }
    }

    fn poll_network(&mut self) {
        self.connections.accept();

        let active_connections = self.connections.active_count();
        let Self {
            host,
            editor,
            connections,
            subscriptions,
            dispatcher,
            capture,
            metrics,
            ..
        } = self;
        connections.process(|connection, request| {
            let mut ctx = CommandContext {
                connection,
                host: &mut *host,
                editor: &mut *editor,
                subscriptions: &mut *subscriptions,
                capture: &*capture,
                metrics: &*metrics,
                active_connections,
                close: false,
            };
            let response = dispatcher.dispatch(&mut ctx, request);
            Reply {
                response,
                close: ctx.close,
            }
        });
        self.flush();
    }

    /// One event line per watched emission, to every connection.
    fn broadcast_events(&mut self) {
        for signal in self.host.take_events() {
            if !self.subscriptions.matches(signal.node, &signal.signal) {
                continue;
            }
            let Some(event) = event_message(self.host.tree(), &signal) else {
                continue;
            };
            match event.to_response() {
                Ok(response) => {
                    let sent = self.connections.broadcast(&response);
                    self.metrics.events_sent.fetch_add(sent as u64, Ordering::Relaxed);
                }
                Err(e) => log::warn!("failed to encode event {}: {}", signal.signal, e),
            }
        }
        let freed = self.host.take_freed();
        let dropped = self.subscriptions.remove_nodes(&freed);
        if dropped > 0 {
            log::debug!("dropped {} subscriptions on freed nodes", dropped);
        }
    }

    /// Reload the live scene if a scene command rewrote its file.
    fn reload_changed(&mut self) {
        for change in self.changes.drain() {
            match self.host.apply_change(&change) {
                Ok(true) => {
                    let host = &self.host;
                    let dropped = self
                        .subscriptions
                        .reresolve(host.tree(), |id, signal| host.tree().has_signal(host.registry(), id, signal));
                    log::info!("Reloaded {} ({} subscriptions dropped)", change.locator, dropped);
                }
                Ok(false) => {}
                Err(e) => log::warn!("failed to reload {}: {}", change.locator, e),
            }
        }
    }

    fn flush(&mut self) {
        for id in self.connections.flush() {
            self.subscriptions.remove_connection(id);
        }
    }
}
