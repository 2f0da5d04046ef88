//! # Smartmarks
//!
//! Private bookmarks backed by a hosted store, kept in sync across every open
//! session of the same person.
//!
//! ## Features
//!
//! - **Owner-scoped lists**: each person only ever sees their own rows
//! - **Realtime**: inserts, updates and deletes from other sessions show up live
//! - **Optimistic deletes**: rows disappear before the backend confirms
//! - **Pluggable backends**: in-process store or a Supabase-compatible service
//!
//! ## Modules
//!
//! - [`provider`]: backend seam, in-memory and hosted implementations
//! - [`bookmarks`]: list reconciliation and the submission form
//! - [`session`]: who is signed in
//! - [`shell`]: screen model and session-bound composition
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smartmarks::provider::{MemoryProvider, Session};
//! use smartmarks::shell::Shell;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = Arc::new(MemoryProvider::new(Session::new("demo-user")));
//!     let mut shell = Shell::new(provider, Default::default());
//!     shell.start().await;
//!
//!     shell.sign_in().await?;
//!     shell.add("Rust book", "doc.rust-lang.org/book").await?;
//!     println!("{}", shell.render().await);
//!
//!     shell.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bookmarks;
pub mod config;
pub mod provider;
pub mod session;
pub mod shell;

// Re-export top-level types for convenience
pub use bookmarks::{
    BookmarkError, BookmarkForm, BookmarkList, BookmarkRecord, BookmarkResult, ChangeEvent,
    ListState, NewBookmark, Reconciler, ReconcilerOptions,
};

pub use provider::{
    MemoryProvider, Provider, ProviderError, ProviderResult, RestConfig, RestProvider, Session,
    SignIn,
};

pub use session::SessionResolver;

pub use shell::{Screen, Shell};

pub use config::{Config, ConfigError, LoggingConfig};
