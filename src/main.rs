//! dropcache - command line client for a cached remote folder
//!
//! Every command runs one operation through the reconciling cache, so
//! repeated reads inside the freshness window never reach the remote.

use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dropcache::{Config, FolderClient, Reconciler, Session, UserId};

/// CLI command
#[derive(Debug)]
enum Command {
    /// List file names in the folder
    List,
    /// Print a file's content to stdout
    Get { file_name: String, blank: bool },
    /// Upload a local file
    Put { file_name: String, source: PathBuf },
    /// Rename a file
    Move { from: String, to: String },
    /// Delete a file
    Remove { file_name: String },
    /// Drop this user's cached records
    Forget,
    /// Drop every cached record
    Clear,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"dropcache - cached access to a remote folder

USAGE:
    dropcache list
    dropcache get <file> [--blank]
    dropcache put <file> <local-path>
    dropcache mv <file> <new-file>
    dropcache rm <file>
    dropcache forget
    dropcache clear
    dropcache help

COMMANDS:
    list    List the files in the folder
    get     Write a file's content to stdout (--blank: empty output if missing)
    put     Upload a local file under the given name
    mv      Rename a file
    rm      Delete a file
    forget  Drop the cached records of the current user
    clear   Drop every cached record

ENVIRONMENT:
    DROPCACHE_TOKEN             Access token (required for remote commands)
    DROPCACHE_UID               User id the cache is keyed by (default: default)
    DROPCACHE_FOLDER            Remote folder to track (default: root)
    DROPCACHE_BACKEND           sqlite, memory or none (default: sqlite)
    DROPCACHE_TIMEOUT_SECS      Freshness window (default: 60 sqlite, 30 memory)
    DROPCACHE_DB                SQLite cache file
    DROPCACHE_ROOT              sandbox or dropbox (default: sandbox)
    DROPCACHE_API_URL           Metadata API base URL
    DROPCACHE_CONTENT_URL       Content API base URL
    DROPCACHE_MEMORY_MAX_BYTES  Content budget for the memory backend
    RUST_LOG                    Log filter (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    let usage = |text: &str| anyhow!("Usage: dropcache {}", text);

    match args[1].as_str() {
        "list" | "ls" => Ok(Command::List),
        "get" => {
            let file_name = args.get(2).ok_or_else(|| usage("get <file> [--blank]"))?;
            Ok(Command::Get {
                file_name: file_name.clone(),
                blank: args[3..].iter().any(|a| a == "--blank"),
            })
        }
        "put" => {
            if args.len() < 4 {
                return Err(usage("put <file> <local-path>"));
            }
            Ok(Command::Put {
                file_name: args[2].clone(),
                source: PathBuf::from(&args[3]),
            })
        }
        "mv" => {
            if args.len() < 4 {
                return Err(usage("mv <file> <new-file>"));
            }
            Ok(Command::Move {
                from: args[2].clone(),
                to: args[3].clone(),
            })
        }
        "rm" => {
            let file_name = args.get(2).ok_or_else(|| usage("rm <file>"))?;
            Ok(Command::Remove {
                file_name: file_name.clone(),
            })
        }
        "forget" => Ok(Command::Forget),
        "clear" => Ok(Command::Clear),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => {
            eprintln!("Unknown command: {}", other);
            Ok(Command::Help)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `get` output stays clean
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let config = Config::from_env().context("Invalid configuration")?;
    debug!(backend = %config.backend, folder = %config.folder, user = %config.user_id, "Loaded configuration");

    let store = config.build_store()?;
    let engine = Arc::new(Reconciler::new(store, config.cache_settings()));

    match command {
        Command::Forget => {
            engine.forget_user(&UserId::new(config.user_id.clone()))?;
            println!("Forgot cached records of '{}'.", config.user_id);
            return Ok(());
        }
        Command::Clear => {
            engine.clear()?;
            println!("Cache cleared.");
            return Ok(());
        }
        _ => {}
    }

    let session = Session::new(config.user_id.clone(), config.require_token()?);
    let remote = Arc::new(config.build_remote()?);
    let client = FolderClient::new(engine.clone(), remote, session);

    let outcome = run(&client, command).await;
    engine.log_metrics();

    if let Err(e) = &outcome {
        error!(error = %e, "Command failed");
    }
    outcome
}

async fn run(client: &FolderClient, command: Command) -> Result<()> {
    match command {
        Command::List => {
            let names = client.list_files().await.context("Failed to list folder")?;
            for name in names {
                println!("{}", name);
            }
        }
        Command::Get { file_name, blank } => {
            let data = client
                .get_file_data(&file_name, blank)
                .await
                .with_context(|| format!("Failed to read '{}'", file_name))?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        Command::Put { file_name, source } => {
            let data = tokio::fs::read(&source)
                .await
                .with_context(|| format!("Failed to read {}", source.display()))?;
            client
                .upload_file_data(&file_name, &data)
                .await
                .with_context(|| format!("Failed to upload '{}'", file_name))?;
            println!("Uploaded {} ({} bytes).", file_name, data.len());
        }
        Command::Move { from, to } => {
            client
                .move_file(&from, &to)
                .await
                .with_context(|| format!("Failed to move '{}' to '{}'", from, to))?;
            println!("Moved {} -> {}.", from, to);
        }
        Command::Remove { file_name } => {
            client
                .delete_file(&file_name)
                .await
                .with_context(|| format!("Failed to delete '{}'", file_name))?;
            println!("Deleted {}.", file_name);
        }
        Command::Forget | Command::Clear | Command::Help => {}
    }

    Ok(())
}
