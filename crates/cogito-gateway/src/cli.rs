//! Command-line surface: `serve` (default), `init-db`, `user add|list`.

use std::io::BufRead;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tracing::info;

use cogito_core::config::CogitoConfig;
use cogito_core::types::UserRole;
use cogito_users::UserStore;

/// Env var read by `user add` before falling back to stdin.
pub const NEW_PASSWORD_ENV: &str = "COGITO_NEW_PASSWORD";

#[derive(Debug, Parser)]
#[command(
    name = "cogito",
    version,
    about = "Chat relay that streams model reasoning and answers to separate panels"
)]
pub struct Cli {
    /// Config file (default: $COGITO_CONFIG, then ~/.cogito/cogito.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP/WebSocket server
    Serve,
    /// Create the database schema and exit
    InitDb,
    /// Manage sign-in accounts
    User {
        #[command(subcommand)]
        action: UserCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum UserCommand {
    /// Create an account, or reset the password and role of an existing one.
    /// The password is read from $COGITO_NEW_PASSWORD or the first line of stdin.
    Add {
        username: String,
        #[arg(long, default_value = "user")]
        role: UserRole,
    },
    /// List accounts
    List,
}

/// Open the SQLite database and apply every schema migration (idempotent).
pub fn open_db(path: &str) -> anyhow::Result<Connection> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let db = Connection::open(path).with_context(|| format!("opening database {path}"))?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    cogito_users::db::init_db(&db)?;
    cogito_threads::db::init_db(&db)?;
    Ok(db)
}

pub fn init_db(config: &CogitoConfig) -> anyhow::Result<()> {
    open_db(&config.database.path)?;
    info!(path = %config.database.path, "database schema ready");
    println!("database ready: {}", config.database.path);
    Ok(())
}

pub fn run_user_command(config: &CogitoConfig, action: UserCommand) -> anyhow::Result<()> {
    let users = UserStore::new(open_db(&config.database.path)?);
    match action {
        UserCommand::Add { username, role } => {
            let password = read_new_password()?;
            let user = users.create_or_update(&username, &password, role)?;
            println!("saved user '{}' ({}) id={}", user.username, user.role, user.id);
        }
        UserCommand::List => {
            for user in users.list()? {
                println!("{}\t{}\t{}", user.username, user.role, user.created_at);
            }
        }
    }
    Ok(())
}

fn read_new_password() -> anyhow::Result<String> {
    if let Ok(pw) = std::env::var(NEW_PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(pw);
        }
    }
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading password from stdin")?;
    let pw = line.trim_end_matches(&['\r', '\n'][..]).to_string();
    if pw.is_empty() {
        bail!("no password given: set {NEW_PASSWORD_ENV} or pipe it on stdin");
    }
    Ok(pw)
}
