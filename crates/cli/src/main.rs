// swctl - control a running SceneWire host from the shell

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use base64::Engine as _;
use clap::{Parser, Subcommand};
use scenewire_cli::exit_codes::{session_exit_code, EXIT_ERROR, EXIT_SESSION_CONNECT, EXIT_USAGE};
use scenewire_cli::session::{self, DiscoveryFile, SessionClient, SessionError};
use scenewire_config::Settings;
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "swctl")]
#[command(about = "Inspect and drive a running SceneWire host")]
#[command(version)]
struct Cli {
    /// Session ID or unique prefix (see `swctl sessions`)
    #[arg(long, global = true)]
    session: Option<String>,

    /// Connect to a port on localhost instead of a discovered session
    #[arg(long, short = 'p', global = true, conflicts_with = "session")]
    port: Option<u16>,

    /// Settings file (default: <config dir>/scenewire/settings.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Read timeout in milliseconds (overrides client.timeout_ms)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List running hosts
    Sessions {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the host answers
    Ping,

    /// Send any command and print the response as JSON
    Call {
        /// Command name, e.g. get_tree or add_node
        command: String,

        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Print the live tree
    Tree {
        /// Start node (default: root)
        path: Option<String>,

        /// Levels of children to include
        #[arg(long)]
        depth: Option<u32>,
    },

    /// Watch a signal and print each emission as a JSON line
    Watch {
        /// Node path
        path: String,

        /// Signal name
        signal: String,

        /// Stop after this many events
        #[arg(long)]
        count: Option<usize>,
    },

    /// Capture the window and write it as PNG
    Screenshot {
        /// Output file
        output: PathBuf,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,
    },
}

// ============================================================================
// Errors
// ============================================================================

struct CliError {
    code: u8,
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    fn no_session(msg: impl Into<String>) -> Self {
        Self { code: EXIT_SESSION_CONNECT, message: msg.into(), hint: None }
    }

    /// Map a session error onto its exit code, with a hint where one helps.
    fn session(err: SessionError) -> Self {
        let code = session_exit_code(&err);
        let hint = match &err {
            SessionError::ConnectionFailed(_) => Some("is scenewire-host running?".to_string()),
            SessionError::Timeout => Some("raise --timeout-ms or client.timeout_ms".to_string()),
            SessionError::Ambiguous { .. } => Some("use a longer session prefix".to_string()),
            SessionError::Server { code, .. } if code == "node_not_found" => {
                Some("paths are relative to the root; try `swctl tree`".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ============================================================================
// main
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(err.code)
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let settings = Settings::load(cli.config.as_deref()).map_err(|e| CliError::usage(e.to_string()))?;
    let timeout = Duration::from_millis(cli.timeout_ms.unwrap_or(settings.client.timeout_ms));
    let target = Target { session: cli.session, port: cli.port, timeout };

    match cli.command {
        Commands::Sessions { json } => cmd_sessions(json),
        Commands::Ping => cmd_ping(&target),
        Commands::Call { command, params } => cmd_call(&target, &command, &params),
        Commands::Tree { path, depth } => cmd_tree(&target, path, depth),
        Commands::Watch { path, signal, count } => cmd_watch(&target, &path, &signal, count),
        Commands::Screenshot { output, width, height } => cmd_screenshot(&target, &output, width, height),
    }
}

/// Where to connect.
struct Target {
    session: Option<String>,
    port: Option<u16>,
    timeout: Duration,
}

impl Target {
    fn connect(&self) -> Result<SessionClient, CliError> {
        let client = match self.port {
            Some(port) => SessionClient::connect(SocketAddr::from(([127, 0, 0, 1], port)), self.timeout),
            None => SessionClient::connect_session(&resolve_session(self.session.as_deref())?, self.timeout),
        };
        client.map_err(CliError::session)
    }
}

fn resolve_session(session_id: Option<&str>) -> Result<DiscoveryFile, CliError> {
    let sessions =
        session::list_sessions().map_err(|e| CliError::io(format!("failed to list sessions: {}", e)))?;

    if sessions.is_empty() {
        return Err(CliError::no_session("no running SceneWire hosts found")
            .with_hint("start scenewire-host, or pass --port"));
    }

    match session_id {
        Some(id) => session::find_session(&sessions, id)
            .map_err(CliError::session)?
            .ok_or_else(|| {
                CliError::no_session(format!("session '{}' not found", id))
                    .with_hint("use 'swctl sessions' to list available sessions")
            }),
        None => {
            let count = sessions.len();
            match <[DiscoveryFile; 1]>::try_from(sessions) {
                Ok([only]) => Ok(only),
                Err(_) => Err(CliError::usage(format!("{} sessions found; specify --session", count))
                    .with_hint("use 'swctl sessions' to list available sessions")),
            }
        }
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::io(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_sessions(json: bool) -> Result<(), CliError> {
    let sessions =
        session::list_sessions().map_err(|e| CliError::io(format!("failed to list sessions: {}", e)))?;

    if json {
        let value = serde_json::to_value(&sessions).map_err(|e| CliError::io(e.to_string()))?;
        return print_json(&value);
    }

    if sessions.is_empty() {
        println!("No running SceneWire hosts.");
        return Ok(());
    }

    println!("{:<10} {:>6} {:>8}  {:<19}  {:<16}  PROJECT", "SESSION", "PORT", "PID", "CREATED", "APP");
    for s in &sessions {
        let short_id: String = s.session_id.chars().take(8).collect();
        let created = chrono::DateTime::parse_from_rfc3339(&s.created_at)
            .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|_| s.created_at.clone());
        let project = s
            .project_root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:>6} {:>8}  {:<19}  {:<16}  {}",
            short_id, s.port, s.pid, created, s.app_name, project
        );
    }
    Ok(())
}

fn cmd_ping(target: &Target) -> Result<(), CliError> {
    let mut client = target.connect()?;
    let started = std::time::Instant::now();
    client.request("ping", Map::new()).map_err(CliError::session)?;
    let welcome = client.welcome();
    println!(
        "pong from {} {} (protocol {}) in {} ms",
        welcome.app_name,
        welcome.host_version.string,
        welcome.protocol_version,
        started.elapsed().as_millis()
    );
    Ok(())
}

fn cmd_call(target: &Target, command: &str, params: &str) -> Result<(), CliError> {
    let params = match serde_json::from_str::<Value>(params) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(CliError::usage("--params must be a JSON object")),
        Err(e) => return Err(CliError::usage(format!("--params is not valid JSON: {}", e))),
    };

    let mut client = target.connect()?;
    let response = client.request(command, params).map_err(CliError::session)?;
    let value = serde_json::to_value(&response).map_err(|e| CliError::io(e.to_string()))?;
    print_json(&value)
}

fn cmd_tree(target: &Target, path: Option<String>, depth: Option<u32>) -> Result<(), CliError> {
    let mut params = Map::new();
    if let Some(path) = path {
        params.insert("rootAddress".into(), Value::String(path));
    }
    if let Some(depth) = depth {
        params.insert("depth".into(), json!(depth));
    }

    let mut client = target.connect()?;
    let response = client.request("get_tree", params).map_err(CliError::session)?;
    if let Some(tree) = response.fields.get("tree") {
        print_tree(tree, 0);
    }
    Ok(())
}

fn print_tree(node: &Value, indent: usize) {
    let name = node.get("name").and_then(Value::as_str).unwrap_or("?");
    let kind = node.get("nodeType").and_then(Value::as_str).unwrap_or("?");
    println!("{}{} ({})", "  ".repeat(indent), name, kind);
    if let Some(children) = node.get("children").and_then(Value::as_array) {
        for child in children {
            print_tree(child, indent + 1);
        }
    }
}

fn cmd_watch(target: &Target, path: &str, signal: &str, count: Option<usize>) -> Result<(), CliError> {
    let mut client = target.connect()?;
    let params = Map::from_iter([
        ("path".to_string(), Value::String(path.to_string())),
        ("signal".to_string(), Value::String(signal.to_string())),
    ]);
    client.request("watch_signal", params).map_err(CliError::session)?;
    client.set_read_timeout(None).map_err(CliError::session)?;

    let mut seen = 0;
    while count.map_or(true, |limit| seen < limit) {
        let event = client.next_event().map_err(CliError::session)?;
        let line = serde_json::to_string(&event).map_err(|e| CliError::io(e.to_string()))?;
        println!("{}", line);
        seen += 1;
    }
    Ok(())
}

fn cmd_screenshot(
    target: &Target,
    output: &std::path::Path,
    width: Option<u32>,
    height: Option<u32>,
) -> Result<(), CliError> {
    let mut params = Map::new();
    params.insert("format".into(), Value::String("png".into()));
    if let Some(width) = width {
        params.insert("width".into(), json!(width));
    }
    if let Some(height) = height {
        params.insert("height".into(), json!(height));
    }

    let mut client = target.connect()?;
    let response = client.request("capture_screenshot", params).map_err(CliError::session)?;
    let data = response
        .fields
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| CliError::io("screenshot response has no data"))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| CliError::io(format!("invalid image data: {}", e)))?;
    std::fs::write(output, &bytes).map_err(|e| CliError::io(format!("{}: {}", output.display(), e)))?;
    println!("wrote {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}
