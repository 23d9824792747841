use active_session_store::configuration::config::StoreConfig;
use active_session_store::configuration::types::DeploymentMode;
use active_session_store::storage::types::new_session_id;
use active_session_store::{ActiveSessionStorage, SessionStorageFactory, SessionUser};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::error::Error;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "session-store")]
#[command(version = "0.1.0")]
#[command(about = "Inspect and edit the stored properties of active sessions")]
struct Args {
    /// TOML configuration file; falls back to $SESSION_STORE_CONFIG, then defaults
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the deployment mode from the configuration
    #[arg(long, value_enum)]
    mode: Option<DeploymentMode>,

    /// Session id to operate on
    #[arg(long, short, env = "SESSION_STORE_SESSION", default_value = "")]
    session: String,

    #[arg(long, env = "USER", default_value = "")]
    user_name: String,

    #[arg(long, default_value_t = 0)]
    user_id: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print one property
    Get { name: String },
    /// Print every stored property
    GetAll,
    /// Set one property, creating the session if needed
    Set { name: String, value: String },
    /// Remove the session
    Destroy,
    /// Remove suspended session data
    ClearScratch,
    /// Print whether the session exists, is valid, and its suspended size
    Status,
    /// Register the owning user (server mode)
    AddUser,
    /// Print a fresh session id
    NewId,
}

fn load_config(args: &Args) -> Result<StoreConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::from_env()?,
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    Ok(config)
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    if let Command::NewId = args.command {
        println!("{}", new_session_id());
        return Ok(());
    }

    let config = load_config(&args)?;
    let factory = SessionStorageFactory::from_config(&config)?;
    let user = SessionUser::new(args.user_name.clone(), args.user_id);

    if let Command::AddUser = args.command {
        let id = factory.register_user(&user)?;
        info!("Registered user {} as owner id {}", user.username, id);
        println!("{}", id);
        return Ok(());
    }

    if args.session.is_empty() {
        return Err("a session id is required (--session)".into());
    }
    let store = factory.open(&args.session, &user);

    match args.command {
        Command::Get { name } => println!("{}={}", name, store.read_property(&name)?),
        Command::GetAll => {
            for (name, value) in store.read_all_properties()? {
                println!("{}={}", name, value);
            }
        }
        Command::Set { name, value } => {
            store.write_property(&name, &value)?;
            info!("Set {} for session {}", name, args.session);
        }
        Command::Destroy => {
            store.destroy()?;
            info!("Session {} destroyed", args.session);
        }
        Command::ClearScratch => store.clear_scratch_path()?,
        Command::Status => print_status(&*store)?,
        Command::AddUser | Command::NewId => {}
    }
    Ok(())
}

fn print_status(store: &dyn ActiveSessionStorage) -> Result<(), Box<dyn Error>> {
    println!("empty={}", store.is_empty()?);
    println!("valid={}", store.validate()?);
    println!("suspend_size={}", store.compute_suspend_size());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
