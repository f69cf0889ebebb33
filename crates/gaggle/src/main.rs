use std::env;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use serde_json::json;
use tokio::net::TcpListener;

use gaggle::api::{self, AppState};
use gaggle::config::{APP_NAME, AppConfig, AppPaths, ENV_PREFIX, ttl_from_hours};
use gaggle::db::Database;
use gaggle::session::SessionStore;
use gaggle::store::KvStore;
use gaggle::user::{User, UserRepository};

/// How often expired rows are physically removed.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), APP_NAME, &mut io::stdout());
        return Ok(());
    }

    let ctx = RuntimeContext::new(cli.global)?;
    ctx.init_logging();
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Serve(cmd) => runtime()?.block_on(handle_serve(&ctx, cmd)),
        Command::Sessions { command } => runtime()?.block_on(handle_sessions(&ctx, command)),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { .. } => Ok(()),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Gaggle - live chat and presence hub server.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct GlobalOpts {
    /// Config file, or a directory containing config.toml
    #[arg(long, value_name = "PATH", global = true, env = "GAGGLE_CONFIG")]
    config: Option<PathBuf>,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// More logging (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Print results and logs as JSON
    #[arg(long, global = true)]
    json: bool,
    /// When to use ANSI colors in logs
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Skip confirmation for destructive commands
    #[arg(short = 'y', long = "yes", global = true)]
    assume_yes: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP and WebSocket server
    Serve(ServeCommand),
    /// Write the default config file
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Manage login sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Address to bind (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Overwrite an existing config file
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Overwrite the config file with defaults
    Reset,
}

#[derive(Debug, Subcommand)]
enum SessionsCommand {
    /// Issue a session token for a user
    Create(SessionsCreateCommand),
    /// Revoke a session token
    Revoke {
        token: String,
    },
    /// Count live sessions
    Count,
    /// Revoke every session (requires --yes)
    Clear,
}

#[derive(Debug, Clone, Args)]
struct SessionsCreateCommand {
    /// User the session belongs to
    user_id: String,
    /// Create the user, or rename it, with this display name
    #[arg(short, long)]
    username: Option<String>,
    /// Lifetime in hours, 0 for none (defaults to session.ttl_hours)
    #[arg(long)]
    ttl_hours: Option<u64>,
}

struct RuntimeContext {
    global: GlobalOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(global: GlobalOpts) -> Result<Self> {
        let paths = AppPaths::discover(global.config.as_deref())?;
        if !paths.config_file.exists() {
            AppConfig::write_default(&paths.config_file)?;
        }
        let config = AppConfig::load(&paths.config_file, ENV_PREFIX)?;
        let paths = paths.with_config(&config)?;

        Ok(Self {
            global,
            paths,
            config,
        })
    }

    /// `tracing` for the HTTP stack and repositories, `env_logger` for the
    /// `log` users in the hubs and sockets.
    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        let level = self.log_level();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = level.as_str().to_ascii_lowercase();
            EnvFilter::new(format!("{APP_NAME}={level},tower_http={level}"))
        });

        let registry = tracing_subscriber::registry().with(filter);
        let installed = if self.global.json {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_ansi(self.use_color()))
                .try_init()
        };
        if installed.is_err() {
            eprintln!("tracing subscriber already installed");
        }

        let _ = env_logger::Builder::new()
            .filter_level(level)
            .write_style(if self.use_color() {
                env_logger::WriteStyle::Always
            } else {
                env_logger::WriteStyle::Never
            })
            .parse_default_env()
            .try_init();
    }

    /// Flags win over `logging.level`.
    fn log_level(&self) -> LevelFilter {
        if self.global.quiet {
            return LevelFilter::Error;
        }
        match self.global.verbose {
            0 => self.config.logging.level.parse().unwrap_or(LevelFilter::Info),
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn use_color(&self) -> bool {
        match self.global.color {
            ColorOption::Always => true,
            ColorOption::Never => false,
            ColorOption::Auto => env::var_os("NO_COLOR").is_none() && io::stderr().is_terminal(),
        }
    }

    async fn open_database(&self) -> Result<Database> {
        Database::new(&self.paths.database_file()).await
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    // RuntimeContext already wrote a missing file; only an explicit
    // overwrite has anything left to do.
    if cmd.force || ctx.global.assume_yes {
        AppConfig::write_default(&ctx.paths.config_file)?;
    }
    println!("{}", ctx.paths.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show if ctx.global.json => {
            let json = serde_json::to_string_pretty(&ctx.config).context("serializing config")?;
            println!("{json}");
        }
        ConfigCommand::Show => {
            let toml = toml::to_string_pretty(&ctx.config).context("serializing config")?;
            println!("{toml}");
        }
        ConfigCommand::Path => println!("{}", ctx.paths.config_file.display()),
        ConfigCommand::Reset => {
            if !ctx.global.assume_yes {
                return Err(anyhow!("refusing to overwrite the config file without --yes"));
            }
            AppConfig::write_default(&ctx.paths.config_file)?;
            info!("Reset {}", ctx.paths.config_file.display());
        }
    }
    Ok(())
}

async fn handle_sessions(ctx: &RuntimeContext, cmd: SessionsCommand) -> Result<()> {
    let database = ctx.open_database().await?;
    let kv = KvStore::new(database.pool().clone());
    let sessions = SessionStore::new(kv.clone());
    let users = UserRepository::new(kv);

    let output = match cmd {
        SessionsCommand::Create(create) => {
            match create.username {
                Some(username) => {
                    users
                        .upsert(&User {
                            id: create.user_id.clone(),
                            username,
                        })
                        .await?;
                }
                None => {
                    users.get(&create.user_id).await.with_context(|| {
                        format!(
                            "user {} has never logged in (pass --username to create it)",
                            create.user_id
                        )
                    })?;
                }
            }

            let ttl = match create.ttl_hours {
                Some(hours) => ttl_from_hours(hours),
                None => ctx.config.session.ttl(),
            };
            let token = sessions.create(&create.user_id, ttl).await?;
            (
                json!({
                    "user_id": create.user_id,
                    "token": token,
                    "expires_in_secs": ttl.map(|ttl| ttl.as_secs()),
                }),
                token,
            )
        }
        SessionsCommand::Revoke { token } => {
            sessions.revoke(&token).await?;
            (json!({ "revoked": true }), "Revoked session".to_string())
        }
        SessionsCommand::Count => {
            let count = sessions.count().await?;
            (json!({ "sessions": count }), format!("{count} live session(s)"))
        }
        SessionsCommand::Clear => {
            if !ctx.global.assume_yes {
                return Err(anyhow!("refusing to revoke every session without --yes"));
            }
            let deleted = sessions.clear().await?;
            (
                json!({ "deleted": deleted }),
                format!("Revoked {deleted} session(s)"),
            )
        }
    };

    let (json, text) = output;
    if ctx.global.json {
        println!("{json}");
    } else {
        println!("{text}");
    }

    database.close().await;
    Ok(())
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let database = ctx.open_database().await?;
    info!("Database ready at {}", ctx.paths.database_file().display());

    let sweeper = KvStore::new(database.pool().clone()).spawn_sweeper(SWEEP_INTERVAL);

    let state = AppState::new(database.pool().clone(), ctx.config.state_options());
    if state.provider.is_none() {
        warn!("No identity provider configured; /auth/login is unavailable");
    }
    if !state.chat_enabled() {
        info!("Chat is disabled");
    }

    let host = cmd.host.unwrap_or_else(|| ctx.config.server.host.clone());
    let port = cmd.port.unwrap_or(ctx.config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, api::create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    sweeper.abort();
    database.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
