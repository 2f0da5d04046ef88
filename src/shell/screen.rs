//! Screen model and text rendering
//!
//! A [`Screen`] is a plain snapshot of what should be on screen; rendering it
//! has no side effects.

use std::fmt;

use crate::bookmarks::{FormView, ListState};
use crate::provider::Profile;

/// Avatar shown when the identity provider has none
pub const DEFAULT_AVATAR: &str = "/default-profile.jpg";

/// Everything the view shows at one moment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    /// First session lookup still in flight
    Loading,
    /// No session: sign-in prompt
    SignedOut,
    /// Signed in: profile, form and list
    SignedIn {
        profile: Profile,
        form: FormView,
        list: ListState,
    },
}

impl Screen {
    pub fn is_signed_in(&self) -> bool {
        matches!(self, Screen::SignedIn { .. })
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Screen::Loading => writeln!(f, "Loading..."),
            Screen::SignedOut => render_sign_in(f),
            Screen::SignedIn {
                profile,
                form,
                list,
            } => {
                writeln!(f, "Your Bookmarks                                  [logout] Logout")?;
                writeln!(f)?;
                render_profile(f, profile)?;
                render_form(f, form)?;
                writeln!(f)?;
                render_list(f, list)
            }
        }
    }
}

fn render_sign_in(f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Welcome to Smart Bookmarks")?;
    writeln!(
        f,
        "Save links quickly, keep them private, and see updates instantly across tabs."
    )?;
    writeln!(f)?;
    writeln!(f, "Welcome back")?;
    writeln!(
        f,
        "Sign in with Google to access your private bookmarks and sync in real time."
    )?;
    writeln!(f)?;
    writeln!(f, "  [login] Sign in with Google")?;
    writeln!(
        f,
        "  By signing in you agree to the app using your Google account for authentication."
    )?;
    writeln!(f)?;
    writeln!(f, "Why Smart Bookmarks")?;
    for line in [
        "Private bookmarks tied to your Google account",
        "Real time sync across tabs",
        "Simple, fast, and mobile friendly",
    ] {
        writeln!(f, "  • {}", line)?;
    }
    Ok(())
}

fn render_profile(f: &mut fmt::Formatter<'_>, profile: &Profile) -> fmt::Result {
    // Nothing to show without metadata from the identity provider
    let Some(name) = profile.full_name.as_deref() else {
        return Ok(());
    };
    let avatar = profile
        .avatar_url
        .as_deref()
        .filter(|a| !a.is_empty())
        .unwrap_or(DEFAULT_AVATAR);

    writeln!(f, "{}  ({})", name, avatar)?;
    writeln!(f)
}

fn render_form(f: &mut fmt::Formatter<'_>, form: &FormView) -> fmt::Result {
    let placeholder = |value: &str, hint: &str| {
        if value.is_empty() {
            format!("<{}>", hint)
        } else {
            value.to_string()
        }
    };

    writeln!(
        f,
        "Title: {}   URL: {}   [{}]",
        placeholder(&form.fields.title, "Title"),
        placeholder(&form.fields.url, "https://example.com"),
        form.button_label()
    )?;
    if let Some(error) = &form.fields.error {
        writeln!(f, "  ! {}", error)?;
    }
    Ok(())
}

fn render_list(f: &mut fmt::Formatter<'_>, list: &ListState) -> fmt::Result {
    match list {
        ListState::Loading => writeln!(f, "Loading bookmarks..."),
        ListState::Errored(message) => writeln!(f, "! {}", message),
        ListState::Ready(list) if list.is_empty() => writeln!(f, "No bookmarks yet."),
        ListState::Ready(list) => {
            for (i, record) in list.iter().enumerate() {
                writeln!(f, "{:>3}. {}", i + 1, record.title)?;
                writeln!(f, "     {}   [delete {}]", record.href(), i + 1)?;
            }
            Ok(())
        }
    }
}
