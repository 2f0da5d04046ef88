//! Smartmarks interactive shell
//!
//! Renders the bookmark screen in the terminal and re-renders whenever the
//! session or the list changes. Commands are read line by line from stdin.

use smartmarks::bookmarks::{ListState, DELETE_FAILED_MESSAGE};
use smartmarks::provider::{self, SignIn};
use smartmarks::{Config, ReconcilerOptions, Shell};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

const HELP: &str = "\
Commands:
  login                 Sign in with Google
  logout                Sign out
  add <title> <url>     Save a bookmark (the last word is the URL)
  delete <n|id>         Delete the bookmark at position n, or by id
  list                  Render the screen again
  help                  Show this help
  quit                  Exit";

/// One line of user input
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Login,
    Logout,
    Add { title: String, url: String },
    Delete(String),
    List,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "" => Input::Empty,
        "login" => Input::Login,
        "logout" => Input::Logout,
        "add" => {
            // Empty parts are passed through so the form reports them
            let (title, url) = rest.rsplit_once(char::is_whitespace).unwrap_or((rest, ""));
            Input::Add {
                title: title.to_string(),
                url: url.to_string(),
            }
        }
        "delete" | "rm" => Input::Delete(rest.to_string()),
        "list" | "ls" => Input::List,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_default();
    config.logging.init();

    tracing::info!("Smartmarks v{}", env!("CARGO_PKG_VERSION"));

    let provider = provider::from_config(&config).await?;
    let mut shell = Shell::new(provider, ReconcilerOptions::from(&config.bookmarks));
    println!("{}", shell.render().await);

    shell.start().await;
    render(&shell).await;

    let mut sessions = shell.session_changes();
    let mut list_rx = shell.list_changes();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = sessions.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = sessions.borrow_and_update().clone();
                let owner = shell.owner().map(str::to_string);
                shell.apply_session(session).await;
                follow_owner(&shell, owner.as_deref(), &mut list_rx);
                render(&shell).await;
            }
            changed = list_changed(&mut list_rx) => {
                if changed {
                    render(&shell).await;
                } else {
                    list_rx = None;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let owner = shell.owner().map(str::to_string);
                if !handle_input(&mut shell, parse_input(&line)).await {
                    break;
                }
                follow_owner(&shell, owner.as_deref(), &mut list_rx);
            }
        }
    }

    tracing::info!("Shutting down...");
    shell.shutdown().await;
    Ok(())
}

/// Run one command. Returns false when the shell should exit.
async fn handle_input(shell: &mut Shell, input: Input) -> bool {
    match input {
        Input::Login => match shell.sign_in().await {
            Ok(SignIn::Complete(_)) => render(shell).await,
            Ok(SignIn::Redirect { url }) => {
                println!("Open this URL to sign in:");
                println!("  {}", url);
                println!("Then restart with SMARTMARKS_ACCESS_TOKEN set to the issued token.");
            }
            Err(e) => println!("! {}", e.user_message_or("Sign-in failed")),
        },
        Input::Logout => match shell.sign_out().await {
            Ok(()) => render(shell).await,
            Err(e) => println!("! {}", e.user_message_or("Sign-out failed")),
        },
        Input::Add { title, url } => {
            match shell.add(&title, &url).await {
                Ok(record) => tracing::debug!(bookmark_id = %record.id, "Bookmark added"),
                Err(e) => tracing::debug!(error = %e, "Bookmark not added"),
            }
            // The form carries any error message
            render(shell).await;
        }
        Input::Delete(target) => {
            match resolve_target(shell, &target) {
                Some(id) => {
                    if let Err(e) = shell.delete(&id).await {
                        println!("! {}", e.user_message(DELETE_FAILED_MESSAGE));
                    }
                }
                None => println!("No bookmark at {:?}", target),
            }
        }
        Input::List => render(shell).await,
        Input::Help => println!("{}", HELP),
        Input::Quit => return false,
        Input::Empty => {}
        Input::Unknown(command) => println!("Unknown command: {} (try 'help')", command),
    }
    true
}

/// Bookmark id for `delete <n|id>`: a 1-based position, else a literal id
fn resolve_target(shell: &Shell, target: &str) -> Option<String> {
    match target.parse::<usize>() {
        Ok(position) => shell.bookmark_at(position),
        Err(_) if !target.is_empty() => Some(target.to_string()),
        Err(_) => None,
    }
}

/// Watch the new owner's list after a rebind. A receiver for the same list
/// is kept, since a fresh clone would report a change straight away.
fn follow_owner(
    shell: &Shell,
    previous: Option<&str>,
    list_rx: &mut Option<watch::Receiver<ListState>>,
) {
    if shell.owner() != previous {
        *list_rx = shell.list_changes();
    }
}

async fn render(shell: &Shell) {
    println!("{}", "-".repeat(64));
    print!("{}", shell.render().await);
    println!("{}", "-".repeat(64));
}

/// True on a list change, false once the list is gone
async fn list_changed(rx: &mut Option<watch::Receiver<ListState>>) -> bool {
    match rx {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}
