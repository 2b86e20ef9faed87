//! Secret handling utilities.
//!
//! Worker credentials are session secrets. They live in `SecretString` from
//! the moment they are read until the platform client exposes them.

pub use secrecy::{ExposeSecret, SecretString};

/// Short, log-safe fingerprint of a credential: its length and last four
/// characters.
pub fn fingerprint(secret: &SecretString) -> String {
    let exposed = secret.expose_secret();
    let tail: String = exposed
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("len={} …{tail}", exposed.chars().count())
}
