mod actions;
mod app;
mod ui;

use actions::{Request, Response};
use anyhow::{Context, Result};
use app::AppController;
use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{info, warn};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use zest_player::audio::RodioSurface;
use zest_player::duration::SymphoniaEstimator;
use zest_player::{MusicClient, PlaybackEvent, PlayerConfig, StreamController};

/// Command-line arguments for zest
#[derive(Parser, Debug)]
#[command(name = "zest")]
#[command(about = "Terminal player for a Zest music server")]
#[command(version)]
struct Cli {
    /// JSON config file; command-line values take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the music API
    #[arg(short, long, env = "ZEST_ENDPOINT")]
    endpoint: Option<String>,

    /// Chunk size in bytes, must match the server
    #[arg(long, env = "ZEST_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Stay on a track once it has played out
    #[arg(long)]
    no_autoplay: bool,

    /// HTTP request timeout in seconds
    #[arg(long, value_name = "SECS")]
    request_timeout: Option<u64>,

    /// How long a track switch waits for the chunk in flight (0 waits forever)
    #[arg(long, value_name = "MS")]
    reset_timeout: Option<u64>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn player_config(&self) -> Result<PlayerConfig> {
        let mut config = match &self.config {
            Some(path) => PlayerConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PlayerConfig::default(),
        };

        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if self.no_autoplay {
            config.autoplay = false;
        }
        if let Some(secs) = self.request_timeout {
            config.request_timeout_secs = secs;
        }
        if let Some(ms) = self.reset_timeout {
            config.reset_timeout_ms = ms;
        }

        Ok(config.validated()?)
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    // The UI owns the terminal, so without a log file only warnings go to stderr
    let default_filter = if log_file.is_some() { "info" } else { "warn" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let config = cli.player_config()?;
    info!("Using music server at {}", config.endpoint);

    let client = MusicClient::new(&config)?;
    let (_stream, surface) = RodioSurface::try_default().context("Failed to open audio output")?;
    let (controller, events) = StreamController::new(
        config,
        Arc::new(client.clone()),
        Arc::new(SymphoniaEstimator::with_extension("mp3")),
        Arc::new(surface),
    );
    let controller = Arc::new(controller);

    let (req_tx, req_rx) = mpsc::channel::<Request>(32);
    let (resp_tx, mut resp_rx) = mpsc::channel::<Response>(64);
    let worker = tokio::spawn(run_worker(client, controller.clone(), req_rx, events, resp_tx));

    // Set up panic handler to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic);
    }));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app_controller = AppController::new(req_tx);
    app_controller.initialize().await?;

    let res = run_app(&mut terminal, &mut app_controller, &controller, &mut resp_rx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    // Dropping the request sender stops the worker, which stops playback
    drop(app_controller);
    if tokio::time::timeout(Duration::from_secs(15), worker).await.is_err() {
        warn!("Worker did not stop in time");
    }

    res
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app_controller: &mut AppController,
    controller: &StreamController,
    resp_rx: &mut mpsc::Receiver<Response>,
) -> Result<()> {
    loop {
        while let Ok(resp) = resp_rx.try_recv() {
            app_controller.process_response(resp).await?;
        }
        app_controller.ui_app.status = ui::PlayerStatus::capture(controller);

        terminal.draw(|f| ui::render_ui(f, &mut app_controller.ui_app))?;

        if event::poll(Duration::from_millis(50))? {
            match event::read() {
                Ok(Event::Key(key)) => {
                    if app_controller.handle_key_event(key.code).await? {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => {}
            }
        }

        sleep(Duration::from_millis(16)).await; // ~60 FPS

        if app_controller.should_quit() {
            break;
        }
    }

    Ok(())
}

/// Runs catalog loads and playback commands off the UI loop, and feeds
/// playback events back to the controller for autoplay.
async fn run_worker(
    client: MusicClient,
    controller: Arc<StreamController>,
    mut req_rx: mpsc::Receiver<Request>,
    mut events: mpsc::UnboundedReceiver<PlaybackEvent>,
    resp_tx: mpsc::Sender<Response>,
) {
    loop {
        tokio::select! {
            req = req_rx.recv() => {
                let Some(req) = req else { break };
                if let Some(resp) = handle_request(&client, &controller, req).await {
                    let _ = resp_tx.send(resp).await;
                }
            }
            Some(event) = events.recv() => {
                if let Err(e) = controller.handle_event(&event).await {
                    warn!("Could not advance playlist: {}", e);
                    let _ = resp_tx.send(Response::Failed(format!("Playback failed: {}", e))).await;
                }
                let _ = resp_tx.send(Response::Playback(event)).await;
            }
        }
    }

    controller.reset().await;
    info!("Worker stopped");
}

async fn handle_request(
    client: &MusicClient,
    controller: &StreamController,
    req: Request,
) -> Option<Response> {
    let result = match req {
        Request::LoadCatalog => return Some(Response::CatalogLoaded(client.get_catalog().await)),
        Request::Play { tracks, start } => controller.play_from(&tracks, start).await.map(|_| ()),
        Request::Next => controller.next_track().await.map(|_| ()),
        Request::Stop => {
            controller.reset().await;
            Ok(())
        }
        Request::TogglePause => {
            if controller.is_paused() {
                controller.resume();
            } else {
                controller.pause();
            }
            Ok(())
        }
    };

    result
        .err()
        .map(|e| Response::Failed(format!("Playback failed: {}", e)))
}
