//! Smartmarks CLI
//!
//! One-shot commands against the configured backend:
//! - List bookmarks
//! - Add or delete a bookmark
//! - Stream change events
//! - Print a default config

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use smartmarks::bookmarks::{BookmarkForm, BookmarkList, ChangeEvent, DELETE_FAILED_MESSAGE};
use smartmarks::config::BackendKind;
use smartmarks::provider::{self, OAuthProvider, Provider, Session, SignIn};
use smartmarks::{Config, SessionResolver};

#[derive(Parser)]
#[command(name = "smartmarks-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Private bookmarks with realtime sync")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend override (memory, rest)
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List your bookmarks, newest first
    List,

    /// Save a bookmark
    Add {
        /// Title shown in the list
        title: String,
        /// Address, without the scheme
        url: String,
    },

    /// Delete a bookmark by id
    Delete {
        /// Bookmark id
        id: String,
    },

    /// Stream change events until interrupted
    Watch,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        return write_default_config(output.clone());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(kind) = cli.backend {
        config.backend.kind = kind;
    }
    config.logging.init();

    let provider = provider::from_config(&config).await?;
    let session = signed_in(&provider).await?;
    let owner = session.user_id.clone();
    tracing::debug!(owner_id = %owner, backend = provider.name(), "Signed in");

    match cli.command {
        Commands::List => {
            let rows = provider.query(&owner).await?;
            let list = BookmarkList::from_rows(rows);

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(list.as_slice())?);
            } else if list.is_empty() {
                println!("No bookmarks yet.");
            } else {
                println!("{:<38} {:<24} {}", "ID", "Title", "URL");
                println!("{}", "-".repeat(90));
                for record in &list {
                    println!("{:<38} {:<24} {}", record.id, record.title, record.href());
                }
            }
        }

        Commands::Add { title, url } => {
            let form = BookmarkForm::new(Arc::clone(&provider), owner);
            form.fill(title, url).await;

            match form.submit().await {
                Ok(record) if cli.format == "json" => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                Ok(record) => println!("Added {} ({})", record.title, record.id),
                Err(_) => {
                    let message = form.fields().await.error.unwrap_or_default();
                    eprintln!("{}", message);
                    std::process::exit(1);
                }
            }
        }

        Commands::Delete { id } => match provider.delete(&id).await {
            Ok(()) => println!("Deleted {}", id),
            Err(e) => {
                eprintln!("{}", e.user_message_or(DELETE_FAILED_MESSAGE));
                std::process::exit(1);
            }
        },

        Commands::Watch => {
            let mut subscription = provider.subscribe_changes(&owner).await?;
            eprintln!("Watching bookmarks for {} (Ctrl-C to stop)", owner);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = subscription.events.recv() => match event {
                        Some(event) => print_event(&event, &cli.format)?,
                        None => {
                            eprintln!("Change stream closed");
                            break;
                        }
                    },
                }
            }

            provider.unsubscribe(subscription.handle).await?;
        }

        Commands::Config { output } => write_default_config(output)?,
    }

    Ok(())
}

fn write_default_config(output: Option<PathBuf>) -> anyhow::Result<()> {
    let config = smartmarks::config::generate_default_config();

    match output {
        Some(path) => {
            // Create parent directory if needed
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &config)?;
            println!("Config written to {:?}", path);
        }
        None => print!("{}", config),
    }
    Ok(())
}

/// Current session, signing in when the backend can do so without a browser
async fn signed_in(provider: &Arc<dyn Provider>) -> anyhow::Result<Session> {
    if let Some(session) = SessionResolver::new(Arc::clone(provider)).resolve().await {
        return Ok(session);
    }

    match provider.sign_in_with_oauth(OAuthProvider::Google).await? {
        SignIn::Complete(session) => Ok(session),
        SignIn::Redirect { url } => {
            eprintln!("Not signed in. Open this URL to sign in:");
            eprintln!("  {}", url);
            eprintln!("Then set SMARTMARKS_ACCESS_TOKEN to the issued token.");
            std::process::exit(1);
        }
    }
}

fn print_event(event: &ChangeEvent, format: &str) -> anyhow::Result<()> {
    if format == "json" {
        let line = serde_json::json!({
            "type": event.kind(),
            "id": event.id(),
            "record": event.record(),
        });
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    match event.record() {
        Some(record) => println!(
            "{:<7} {} {} {}",
            event.kind(),
            record.id,
            record.title,
            record.href()
        ),
        None => println!("{:<7} {}", event.kind(), event.id()),
    }
    Ok(())
}
