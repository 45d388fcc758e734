use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thirdeye::auth::AccountFlows;
use thirdeye::config::{AppConfig, SpeechBackend, SpeechSection, ensure_sample_config};
use thirdeye::controller::{ControllerEvent, Mode, ModeController, UserAction};
use thirdeye::paths::{default_config_path, default_store_path};
use thirdeye::remote::{HttpRemoteService, RemoteService};
use thirdeye::session::{Route, SessionContext, SessionGuard};
use thirdeye::speech::{
    CommandSpeechEngine, ConsoleSpeechEngine, SilentSpeechEngine, SpeechChannel, SpeechEngine,
};
use thirdeye::store::FileStore;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "thirdeye")]
#[command(about = "Voice-first assistant client: object detection, SOS and feedback")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args, Clone)]
struct GlobalArgs {
    /// Config file (defaults to ~/.thirdeye/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Session store (defaults to ~/.thirdeye/session.toml).
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[arg(long, global = true)]
    base_url: Option<String>,

    #[arg(long, global = true, value_parser = parse_duration)]
    poll_interval: Option<Duration>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Login(CredentialArgs),
    Signup(CredentialArgs),
    Contact(ContactArgs),
    Logout,
    Home,
    Voice,
    Status,
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Init,
}

#[derive(Debug, Args, Clone)]
struct CredentialArgs {
    #[arg(long)]
    username: String,

    #[arg(long)]
    password: String,
}

#[derive(Debug, Args, Clone)]
struct ContactArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    phone: String,
}

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

struct App {
    config: AppConfig,
    session: SessionContext,
    speech: SpeechChannel,
    remote: Arc<dyn RemoteService>,
}

impl App {
    fn build(global: &GlobalArgs, mut config: AppConfig) -> Result<Self> {
        if let Some(base_url) = &global.base_url {
            config.service.base_url = base_url.clone();
        }
        if let Some(poll_interval) = global.poll_interval {
            config.vision.poll_interval = poll_interval;
        }
        config.validate().map_err(anyhow::Error::msg)?;

        let store_path = global.store.clone().unwrap_or_else(default_store_path);
        let store = FileStore::open(&store_path).context("failed to open session store")?;
        let session = SessionContext::new(Arc::new(store));
        let speech = SpeechChannel::new(build_speech_engine(&config.speech), session.clone());
        let remote = HttpRemoteService::new(
            config.service.base_url.clone(),
            config.service.request_timeout,
        )
        .context("failed to initialize service client")?;

        Ok(Self {
            config,
            session,
            speech,
            remote: Arc::new(remote),
        })
    }

    fn flows(&self) -> AccountFlows {
        AccountFlows::new(
            self.remote.clone(),
            self.speech.clone(),
            self.session.clone(),
        )
    }

    fn guard(&self) -> SessionGuard {
        SessionGuard::new(self.session.clone(), self.speech.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.global.config.clone().unwrap_or_else(default_config_path);

    if let Commands::Config(ConfigCommand::Init) = cli.command {
        ensure_sample_config(&config_path)?;
        println!("config: {}", config_path.display());
        return Ok(());
    }

    let config = AppConfig::load(&config_path)?;
    thirdeye::logging::init(config.logging.filter.as_deref());
    let app = App::build(&cli.global, config)?;

    match cli.command {
        Commands::Login(args) => run_login(&app, &args).await,
        Commands::Signup(args) => run_signup(&app, &args).await,
        Commands::Contact(args) => run_contact(&app, &args).await,
        Commands::Logout => {
            let route = app.guard().logout()?;
            println!("logged out");
            app.flows().greet(route);
            Ok(())
        }
        Commands::Home => run_home(&app).await,
        Commands::Voice => {
            let enabled = app.speech.toggle();
            println!("voice feedback {}", on_off(enabled));
            Ok(())
        }
        Commands::Status => {
            print_status(&app);
            Ok(())
        }
        Commands::Config(ConfigCommand::Init) => Ok(()),
    }
}

async fn run_login(app: &App, args: &CredentialArgs) -> Result<()> {
    let flows = app.flows();
    flows.greet(Route::Login);
    match flows.login(&args.username, &args.password).await {
        Ok(route) => {
            println!("logged in; next: {route}");
            Ok(())
        }
        Err(err) => anyhow::bail!("login failed: {err}"),
    }
}

async fn run_signup(app: &App, args: &CredentialArgs) -> Result<()> {
    let flows = app.flows();
    flows.greet(Route::Signup);
    match flows.signup(&args.username, &args.password).await {
        Ok(route) => {
            println!("account created; next: {route} (thirdeye contact --name .. --phone ..)");
            Ok(())
        }
        Err(err) => anyhow::bail!("signup failed: {err}"),
    }
}

async fn run_contact(app: &App, args: &ContactArgs) -> Result<()> {
    let flows = app.flows();
    let route = app.guard().resolve(Route::ContactSetup);
    flows.greet(route);
    if route != Route::ContactSetup {
        anyhow::bail!("not logged in; run `thirdeye login` first");
    }

    match flows.save_contact(&args.name, &args.phone).await {
        Ok(Route::Login) => anyhow::bail!("session expired; run `thirdeye login` first"),
        Ok(route) => {
            println!("contact saved; next: {route}");
            Ok(())
        }
        Err(err) => anyhow::bail!("contact not saved: {err}"),
    }
}

async fn run_home(app: &App) -> Result<()> {
    let flows = app.flows();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let controller = match ModeController::mount(
        app.guard(),
        app.remote.clone(),
        app.speech.clone(),
        app.config.controller(),
        Some(event_tx),
    ) {
        Ok(controller) => controller,
        Err(route) => {
            flows.greet(route);
            anyhow::bail!("not logged in; run `thirdeye login` first");
        }
    };

    let current_mode = Arc::new(Mutex::new(Mode::Idle));
    let mode_sink = current_mode.clone();
    let event_handle = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                ControllerEvent::ModeChanged { from, to } => {
                    *mode_sink.lock().expect("mode mutex poisoned") = to;
                    println!("mode: {from} -> {to}");
                }
                ControllerEvent::SosContactUpdated(contact) => {
                    if contact.is_error() {
                        eprintln!("sos: {} ({})", contact.name, contact.phone);
                    } else {
                        println!("sos: calling {} ({})", contact.name, contact.phone);
                    }
                }
                ControllerEvent::FeedbackSubmitted => println!("feedback sent"),
                ControllerEvent::FeedbackFailed { message } => {
                    eprintln!("feedback failed: {message}")
                }
                ControllerEvent::SpeechToggled { enabled } => {
                    println!("voice feedback {}", on_off(enabled))
                }
                ControllerEvent::LoggedOut => println!("logged out"),
            }
        }
    });

    let (action_tx, action_rx) = mpsc::unbounded_channel();
    let speech = app.speech.clone();
    // A detached thread: a blocking stdin read must not hold the runtime open
    // after logout.
    std::thread::spawn(move || {
        eprintln!(
            "controls: vision | stop | sos | feedback | type <text> | send | cancel | voice | status | logout | quit"
        );
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let trimmed = line.trim();
            let (word, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
            let action = match word.to_ascii_lowercase().as_str() {
                "vision" => Some(UserAction::ToggleVision),
                "stop" => Some(UserAction::StopVision),
                "sos" => Some(UserAction::TriggerSos),
                "feedback" => Some(UserAction::OpenFeedback),
                "type" => Some(UserAction::EditFeedback(rest.to_string())),
                "send" => Some(UserAction::SubmitFeedback),
                "cancel" => Some(UserAction::CancelFeedback),
                "voice" => Some(UserAction::ToggleSpeech),
                "logout" => Some(UserAction::Logout),
                "status" => {
                    let mode = *current_mode.lock().expect("mode mutex poisoned");
                    println!("mode: {mode}, voice feedback {}", on_off(speech.status()));
                    None
                }
                "quit" | "exit" => break,
                "" => None,
                _ => {
                    eprintln!("unknown command. use: vision | stop | sos | feedback | type <text> | send | cancel | voice | status | logout | quit");
                    None
                }
            };

            if let Some(action) = action
                && action_tx.send(action).is_err()
            {
                break;
            }
        }
    });

    let next = controller.run(action_rx).await;
    if let Some(route) = next {
        info!(%route, "left home screen");
        flows.greet(route);
    }

    event_handle.await.context("event task failed")?;
    Ok(())
}

fn print_status(app: &App) {
    match app.session.user_id() {
        Some(user_id) => println!("session: logged in as user {user_id}"),
        None => println!("session: logged out"),
    }
    println!("voice feedback: {}", on_off(app.speech.status()));
    println!("service: {}", app.config.service.base_url);
    println!(
        "poll interval: {}",
        humantime::format_duration(app.config.vision.poll_interval)
    );
}

fn build_speech_engine(section: &SpeechSection) -> Arc<dyn SpeechEngine> {
    match section.backend {
        SpeechBackend::System => match &section.command {
            Some(command) => Arc::new(CommandSpeechEngine::new(
                command.clone(),
                section.args.clone(),
            )),
            None => Arc::new(CommandSpeechEngine::system_default()),
        },
        SpeechBackend::Console => Arc::new(ConsoleSpeechEngine),
        SpeechBackend::Silent => Arc::new(SilentSpeechEngine),
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}
