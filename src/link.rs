//! Link classification and normalization.
//!
//! Every raw reference is reduced to one canonical form on a single host and
//! scheme, then classified by the shape of its path:
//!
//! - `https://t.me/+HASH` and `https://t.me/joinchat/HASH` are invite codes,
//! - `https://t.me/addlist/SLUG` is a folder (bundle of chats),
//! - `https://t.me/NAME` is a public username.
//!
//! Classification is structural only. A folder is expanded by the platform at
//! join time, never here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Scheme and host every canonical link starts with.
pub const CANONICAL_PREFIX: &str = "https://t.me/";

const HOSTS: &[&str] = &["t.me", "telegram.me", "telegram.dog"];

/// First path segments that are platform routes rather than usernames.
const RESERVED: &[&str] = &[
    "joinchat", "addlist", "share", "proxy", "socks", "c", "s", "iv", "login",
];

const MAX_USERNAME_LEN: usize = 64;

/// Characters trimmed from both ends of a raw reference.
fn is_wrapping_punct(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '[' | ']' | '{' | '}' | '<' | '>' | '"' | '\'' | '`' | '.' | ',' | ';'
            | ':' | '!' | '?' | '…' | '؟' | '«' | '»'
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("empty link")]
    Empty,

    #[error("not a URL: {0}")]
    Malformed(String),

    #[error("unsupported scheme: {0}")]
    Scheme(String),

    #[error("not a platform host: {0}")]
    ForeignHost(String),

    #[error("link has no path")]
    MissingPath,

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Structural kind of a join reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Opaque secret token granting a join.
    Invite,
    /// Public, stable channel or group name.
    Username,
    /// Reference that expands to several chats when joined.
    Folder,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Invite => "invite",
            LinkKind::Username => "username",
            LinkKind::Folder => "folder",
        }
    }
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LinkKind {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invite" => Ok(LinkKind::Invite),
            "username" => Ok(LinkKind::Username),
            "folder" => Ok(LinkKind::Folder),
            other => Err(LinkError::InvalidPath(other.to_string())),
        }
    }
}

/// A classified link: its kind plus the token the platform acts on
/// (invite hash, username, or folder slug).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub kind: LinkKind,
    pub value: String,
}

impl Link {
    /// The canonical text of this link.
    pub fn canonical(&self) -> String {
        match self.kind {
            LinkKind::Invite => format!("{CANONICAL_PREFIX}+{}", self.value),
            LinkKind::Folder => format!("{CANONICAL_PREFIX}addlist/{}", self.value),
            LinkKind::Username => format!("{CANONICAL_PREFIX}{}", self.value),
        }
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// True when `raw` opens with `scheme://`. A `://` later on, inside a query
/// for instance, does not count.
fn has_scheme(raw: &str) -> bool {
    let Some((scheme, _)) = raw.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Parse and classify a raw reference.
pub fn parse(raw: &str) -> Result<Link, LinkError> {
    let trimmed = raw.trim().trim_matches(|c: char| c.is_whitespace() || is_wrapping_punct(c));
    if trimmed.is_empty() {
        return Err(LinkError::Empty);
    }

    let with_scheme = if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| LinkError::Malformed(format!("{trimmed}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LinkError::Scheme(url.scheme().to_string()));
    }

    let host = url.host_str().unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);
    if !HOSTS.contains(&host) {
        return Err(LinkError::ForeignHost(host.to_string()));
    }

    // Query and fragment carry tracking parameters only.
    let mut segments = url
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty());

    let first = segments.next().ok_or(LinkError::MissingPath)?;

    if let Some(hash) = first.strip_prefix('+') {
        return Ok(Link {
            kind: LinkKind::Invite,
            value: token(hash)?,
        });
    }

    match first.to_ascii_lowercase().as_str() {
        "joinchat" => {
            let hash = segments
                .next()
                .ok_or_else(|| LinkError::InvalidPath("joinchat without hash".to_string()))?;
            Ok(Link {
                kind: LinkKind::Invite,
                value: token(hash)?,
            })
        }
        "addlist" => {
            let slug = segments
                .next()
                .ok_or_else(|| LinkError::InvalidPath("addlist without slug".to_string()))?;
            Ok(Link {
                kind: LinkKind::Folder,
                value: token(slug)?,
            })
        }
        _ => Ok(Link {
            kind: LinkKind::Username,
            value: username(first)?,
        }),
    }
}

/// Canonical text of a raw reference.
///
/// Idempotent: `normalize(&normalize(x)?)? == normalize(x)?`.
pub fn normalize(raw: &str) -> Result<String, LinkError> {
    parse(raw).map(|link| link.canonical())
}

/// Kind of a raw reference.
pub fn classify(raw: &str) -> Result<LinkKind, LinkError> {
    parse(raw).map(|link| link.kind)
}

fn token(s: &str) -> Result<String, LinkError> {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(s.to_string())
    } else {
        Err(LinkError::InvalidPath(s.to_string()))
    }
}

fn username(s: &str) -> Result<String, LinkError> {
    let name = s.to_ascii_lowercase();
    let valid = !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&name.as_str());
    if valid {
        Ok(name)
    } else {
        Err(LinkError::InvalidPath(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

fn is_token_break(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '"' | '\'' | '`' | '<' | '>' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '«' | '»'
        )
}

/// Find every platform link in free text.
///
/// Returns canonical links in order of first appearance, without repeats.
/// Fragments that look like links but fail [`parse`] are skipped.
pub fn extract_links(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for piece in text.split(is_token_break) {
        let Some(candidate) = link_candidate(piece) else {
            continue;
        };
        if let Ok(canonical) = normalize(candidate) {
            if seen.insert(canonical.clone()) {
                found.push(canonical);
            }
        }
    }

    found
}

/// Narrow a whitespace-delimited piece of text down to the part starting at
/// the link's scheme or host.
fn link_candidate(piece: &str) -> Option<&str> {
    // ASCII lowercasing keeps byte offsets aligned with `piece`.
    let lower = piece.to_ascii_lowercase();

    for host in HOSTS {
        let marker = format!("{host}/");
        let Some(mut start) = lower.find(&marker) else {
            continue;
        };

        if lower[..start].ends_with("www.") {
            start -= "www.".len();
        }
        for scheme in ["https://", "http://"] {
            if lower[..start].ends_with(scheme) {
                start -= scheme.len();
                break;
            }
        }

        // `abct.me/x` is not a link to `t.me`.
        let boundary = lower[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '.' && c != '-');
        if boundary {
            return Some(&piece[start..]);
        }
    }

    None
}

/// Extract links from a message history ordered oldest first.
///
/// `scan_depth` of zero scans the whole history; `N` scans only the most
/// recent `N` messages.
pub fn extract_from_messages<S: AsRef<str>>(messages: &[S], scan_depth: usize) -> Vec<String> {
    let window = if scan_depth == 0 || scan_depth >= messages.len() {
        messages
    } else {
        &messages[messages.len() - scan_depth..]
    };

    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for message in window {
        for link in extract_links(message.as_ref()) {
            if seen.insert(link.clone()) {
                found.push(link);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tracking_parameters() {
        assert_eq!(
            normalize("https://t.me/SomeChannel?utm_source=feed#top").unwrap(),
            "https://t.me/somechannel"
        );
    }

    #[test]
    fn joinchat_and_plus_forms_share_a_canonical_form() {
        assert_eq!(
            normalize("https://t.me/joinchat/AbC123").unwrap(),
            normalize("t.me/+AbC123").unwrap()
        );
    }

    #[test]
    fn invite_hash_keeps_case() {
        assert_eq!(
            normalize("http://telegram.me/+AbC-12_z").unwrap(),
            "https://t.me/+AbC-12_z"
        );
    }

    #[test]
    fn post_links_collapse_to_the_channel() {
        assert_eq!(
            normalize("https://t.me/newsroom/4521").unwrap(),
            "https://t.me/newsroom"
        );
    }

    #[test]
    fn candidate_requires_host_boundary() {
        assert_eq!(link_candidate("abct.me/x"), None);
        assert_eq!(link_candidate("see:https://t.me/x"), Some("https://t.me/x"));
    }
}
