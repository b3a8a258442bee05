// SceneWire host - headless scene runtime with the session server

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use scenewire_config::Settings;
use scenewire_host::{SessionServer, SessionServerConfig};

#[derive(Parser)]
#[command(name = "scenewire-host")]
#[command(about = "Run a scene headlessly and serve the SceneWire control protocol")]
#[command(version)]
struct Cli {
    /// Settings file (default: <config dir>/scenewire/settings.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port (0 picks a free port)
    #[arg(long, short = 'p', env = "SCENEWIRE_PORT")]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<String>,

    /// Project directory that res:// locators resolve against
    #[arg(long)]
    project: Option<PathBuf>,

    /// Scene to open in the live tree at startup
    #[arg(long)]
    scene: Option<String>,

    /// Exit after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Do not write a discovery file
    #[arg(long)]
    no_discovery: bool,

    /// Log filter, e.g. `debug` or `scenewire_host=trace` (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(filter) = &cli.log_level {
        logger.parse_filters(filter);
    }
    logger.init();

    let mut settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(bind) = cli.bind {
        settings.server.bind = bind;
    }
    if let Some(project) = cli.project {
        settings.host.project_root = project;
    }
    if cli.scene.is_some() {
        settings.host.main_scene = cli.scene;
    }
    if cli.no_discovery {
        settings.server.discovery = false;
    }

    let mut server = SessionServer::new();
    let config = SessionServerConfig {
        settings,
        max_frames: cli.frames,
        discovery_dir: None,
    };
    if let Err(e) = server.start(config) {
        log::error!("{}", e);
        return ExitCode::FAILURE;
    }
    if let Some(addr) = server.bound_addr() {
        println!("listening on {}", addr);
    }
    server.wait();
    ExitCode::SUCCESS
}
