use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use musicd::audio::device::{device_factory, output_device_names};
use musicd::audio::{Engine, PauseMode, PluginRegistry};
use musicd::cli::{CliApp, Commands, ParseError, StatusDisplay};
use musicd::config::{ConfigManager, PlayerConfig};
use musicd::error::{DecodeError, PlayerError};
use musicd::logging;
use musicd::queue::PlayQueue;

/// How often the prompt loop looks at the player between input lines
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Main application controller that coordinates all components
pub struct AppController {
    engine: Engine,
    queue: Arc<PlayQueue>,
    registry: PluginRegistry,
    config_manager: Option<ConfigManager>,
    seen_position: u64,
    reported_error: Option<String>,
}

impl AppController {
    pub fn new(cli: &CliApp) -> Result<Self, PlayerError> {
        let config_manager = match &cli.config {
            Some(path) => ConfigManager::with_path(path.clone()),
            None => ConfigManager::new(),
        };
        let (config_manager, base) = match config_manager {
            Ok(manager) => {
                let config = manager.get_config().clone();
                (Some(manager), config)
            }
            Err(e) => {
                eprintln!("Warning: {}", e.user_message());
                eprintln!("Using default settings.");
                (None, PlayerConfig::default())
            }
        };
        let config = Self::apply_overrides(base, cli);

        if let Err(e) = logging::init(cli.log_level.as_deref(), &config.log_level) {
            eprintln!("Warning: Failed to initialize logging: {}", e);
        }

        let registry = PluginRegistry::with_defaults();
        let queue = Arc::new(PlayQueue::new());
        let engine = Engine::new(
            &config,
            device_factory(&config.output),
            registry.clone(),
            Arc::clone(&queue),
        )?;

        info!("Application controller initialized");
        Ok(Self {
            engine,
            queue,
            registry,
            config_manager,
            seen_position: 0,
            reported_error: None,
        })
    }

    /// Command line flags win over the configuration file
    fn apply_overrides(mut config: PlayerConfig, cli: &CliApp) -> PlayerConfig {
        if let Some(output) = &cli.output {
            config.output = output.clone();
        }
        if let Some(seconds) = cli.crossfade {
            config.crossfade_seconds = seconds;
        }
        if let Some(chunks) = cli.buffer_chunks {
            config.buffer_chunks = chunks;
        }
        config.normalized()
    }

    /// Queue a file, or every playable file below a directory
    pub fn enqueue(&self, path: &Path) -> Result<usize, PlayerError> {
        let added = if path.is_dir() {
            self.queue.add_directory(path, |file| {
                self.registry
                    .supports(file)
                    .then(|| self.registry.tag_read(file))
            })?
        } else if path.exists() && !self.registry.supports(path) {
            return Err(DecodeError::UnknownFileType {
                path: path.to_string_lossy().to_string(),
            }
            .into());
        } else {
            self.queue.add(path, self.registry.tag_read(path))?;
            1
        };

        self.engine.resume_decoding();
        Ok(added)
    }

    /// Execute a single command. Returns false when the player should exit.
    pub fn execute_command(&mut self, command: Commands) -> Result<bool, PlayerError> {
        match command {
            Commands::Play { index } => {
                match index {
                    Some(index) => self.engine.play_index(index)?,
                    None => self.engine.play()?,
                }
                println!("OK: Playing");
            }
            Commands::Pause => {
                self.engine.pause(PauseMode::Set);
                println!("OK: Paused");
            }
            Commands::Resume => {
                self.engine.pause(PauseMode::Unset);
                println!("OK: Resumed");
            }
            Commands::Toggle => {
                self.engine.pause(PauseMode::Flip);
                println!("OK: {}", self.engine.status().state);
            }
            Commands::Stop => {
                self.engine.stop();
                println!("OK: Stopped");
            }
            Commands::Next => {
                self.engine.next();
                println!("OK: Skipped");
            }
            Commands::Seek { position } => {
                let reached = self.engine.seek(position.as_secs_f32())?;
                println!("Seeked to: {}", StatusDisplay::format_seconds(reached));
            }
            Commands::Add { path } => {
                let added = self.enqueue(&path)?;
                println!("OK: Added {} song(s)", added);
            }
            Commands::Clear => {
                self.engine.stop();
                self.queue.clear();
                println!("OK: Queue cleared");
            }
            Commands::List => {
                let now_playing = self.queue.now_playing().map(|(index, _)| index);
                StatusDisplay::display_queue(&self.queue.list(), now_playing);
            }
            Commands::Status => {
                StatusDisplay::display_full_status(&self.engine.status());
            }
            Commands::Events { count } => {
                StatusDisplay::display_events(&self.engine.events().recent(count));
            }
            Commands::Crossfade { seconds } => {
                self.engine.set_crossfade(seconds);
                println!("OK: Cross-fade {:.1}s", seconds);
            }
            Commands::Volume { level } => {
                self.engine.set_volume(level);
                println!("OK: Volume {}%", level);
            }
            Commands::ReplayGain { mode } => {
                self.engine.set_replay_gain_mode(mode);
                println!("OK: Replay gain {:?}", mode);
            }
            Commands::Error => {
                let latched = self.engine.take_error();
                StatusDisplay::display_latched_error(latched.as_ref());
                self.reported_error = None;
            }
            Commands::Devices => {
                let names = output_device_names()?;
                if names.is_empty() {
                    println!("No output devices found");
                }
                for name in names {
                    println!("  {}", name);
                }
            }
            Commands::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// Announce song changes and newly latched errors
    fn poll(&mut self) {
        let changes = self.engine.wait_position_change(self.seen_position, Duration::ZERO);
        if changes != self.seen_position {
            self.seen_position = changes;
            if let Some(song) = self.engine.sync_now_playing() {
                println!("\nNow playing: {} - {}", song.display_name(), song.artist_name());
            }
        }

        let error = self.engine.status().error;
        if error.is_some() && error != self.reported_error {
            if let Some(message) = &error {
                eprintln!("\n[Error] {}", message);
            }
        }
        self.reported_error = error;
    }

    pub fn run_interactive_mode(&mut self, shutdown: Arc<AtomicBool>) -> Result<(), PlayerError> {
        println!("musicd - type 'help' for commands");

        let (tx, rx) = mpsc::channel::<String>();
        thread::Builder::new()
            .name("stdin".to_string())
            .spawn(move || {
                for line in std::io::stdin().lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            })
            .map_err(|e| PlayerError::System(format!("Failed to create stdin thread: {}", e)))?;

        let mut awaiting_input = false;
        let mut input_open = true;

        while !shutdown.load(Ordering::Relaxed) {
            if input_open && !awaiting_input {
                print!("> ");
                let _ = std::io::Write::flush(&mut std::io::stdout());
                awaiting_input = true;
            }

            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    awaiting_input = false;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match CliApp::parse_command(&line) {
                        Ok(command) => match self.execute_command(command) {
                            Ok(true) => {}
                            Ok(false) => {
                                println!("Goodbye!");
                                break;
                            }
                            Err(e) => {
                                error!("Command failed: {}", e);
                                StatusDisplay::display_error(&e);
                            }
                        },
                        Err(ParseError::HelpRequested) => CliApp::display_help(),
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            println!("Type 'help' for available commands.");
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if input_open {
                        // Without a prompt, run until the queue is done
                        info!("Input closed");
                        input_open = false;
                    }
                    if self.engine.status().is_stopped() {
                        break;
                    }
                }
            }

            self.poll();
        }

        self.shutdown();
        Ok(())
    }

    /// Stop playback and remember the settings changed at runtime
    pub fn shutdown(&mut self) {
        println!("Shutting down...");
        self.engine.stop();

        let status = self.engine.status();
        let replay_gain = self.engine.output().replay_gain_mode();
        if let Some(manager) = self.config_manager.as_mut() {
            let saved = manager.update_config(|config| {
                config.software_volume = status.volume;
                config.crossfade_seconds = status.crossfade;
                config.replay_gain = replay_gain;
            });
            if let Err(e) = saved {
                warn!("Error saving configuration: {}", e);
            }
        }
        self.engine.shutdown();
    }
}

fn main() {
    let cli = CliApp::parse_args();

    let mut app = match AppController::new(&cli) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to initialize application: {}", e);
            StatusDisplay::display_error(&e);
            std::process::exit(1);
        }
    };

    let mut queued = 0;
    for path in &cli.files {
        match app.enqueue(path) {
            Ok(added) => {
                info!("Queued {} song(s) from {}", added, path.display());
                queued += added;
            }
            Err(e) => StatusDisplay::display_error(&e),
        }
    }
    if queued > 0 {
        if let Err(e) = app.execute_command(Commands::Play { index: None }) {
            StatusDisplay::display_error(&e);
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    if let Err(e) = app.run_interactive_mode(shutdown) {
        StatusDisplay::display_error(&e);
        std::process::exit(1);
    }
    info!("Application shutdown complete");
}
