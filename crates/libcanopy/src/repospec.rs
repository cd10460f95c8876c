use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};

/// Host used for `file://` remotes, which have no network host.
pub const LOCAL_HOST: &str = "local";

/// Transport used when turning a repo key back into a cloneable URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// `https://host/owner/name.git`
    #[default]
    Https,
    /// `git@host:owner/name.git`
    Ssh,
}

/// Canonical identity of a remote repository: `host/owner/name.git`.
///
/// The key is independent of the protocol used to clone, so
/// `git@github.com:acme/app.git` and `https://github.com/acme/app` share
/// one key and therefore one bare store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoKey {
    /// Lowercased host name.
    host: String,
    /// Owner or organisation path segment.
    owner: String,
    /// Repository name without the `.git` suffix.
    name: String,
}

impl RepoKey {
    /// Parse any supported repo spec into its canonical key.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid(input, "empty repo spec"));
        }

        if let Some(rest) = trimmed.strip_prefix("file://") {
            return Self::from_path_segments(input, LOCAL_HOST, rest);
        }

        if let Some((scheme, rest)) = trimmed.split_once("://") {
            if !matches!(scheme, "https" | "http" | "ssh" | "git") {
                return Err(invalid(input, &format!("unsupported scheme '{scheme}'")));
            }
            let (authority, path) = rest
                .split_once('/')
                .ok_or_else(|| invalid(input, "missing repository path"))?;
            let host = authority.rsplit('@').next().unwrap_or(authority);
            let host = host.split(':').next().unwrap_or(host);
            return Self::from_path_segments(input, host, path);
        }

        // scp-like: user@host:owner/name
        if let Some((authority, path)) = trimmed.split_once(':')
            && !authority.contains('/')
        {
            let host = authority.rsplit('@').next().unwrap_or(authority);
            return Self::from_path_segments(input, host, path);
        }

        // bare key: host/owner/name(.git)
        let (host, path) = trimmed
            .split_once('/')
            .ok_or_else(|| invalid(input, "expected host/owner/name"))?;
        Self::from_path_segments(input, host, path)
    }

    /// Parse a spec, reading a bare `owner/name` shorthand as living on `default_host`.
    pub fn parse_with_host(input: &str, default_host: &str) -> Result<Self> {
        let trimmed = input.trim();
        if !is_url(trimmed) && trimmed.trim_end_matches('/').matches('/').count() == 1 {
            return Self::from_path_segments(input, default_host, trimmed);
        }
        Self::parse(input)
    }

    /// Build a key from a host and a path whose last two segments are owner and name.
    fn from_path_segments(input: &str, host: &str, path: &str) -> Result<Self> {
        let host = host.trim().to_ascii_lowercase();
        if host.is_empty() {
            return Err(invalid(input, "missing host"));
        }
        let segments: Vec<&str> = path
            .trim()
            .trim_end_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let (owner, name) = match segments.as_slice() {
            [.., owner, name] => (*owner, *name),
            _ => return Err(invalid(input, "expected owner/name")),
        };
        if host != LOCAL_HOST && segments.len() != 2 {
            return Err(invalid(input, "expected exactly owner/name after the host"));
        }
        let name = name.strip_suffix(".git").unwrap_or(name);
        for part in [owner, name] {
            if part.is_empty() || part == "." || part == ".." || part.contains(char::is_whitespace)
            {
                return Err(invalid(input, &format!("invalid path segment '{part}'")));
            }
        }
        Ok(Self {
            host,
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Host component.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Owner component.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name, used for display.
    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// Render a cloneable remote URL for this key.
    pub fn remote_url(&self, protocol: Protocol) -> String {
        match protocol {
            Protocol::Https => format!("https://{}/{}/{}.git", self.host, self.owner, self.name),
            Protocol::Ssh => format!("git@{}:{}/{}.git", self.host, self.owner, self.name),
        }
    }
}

/// Whether a spec names a cloneable location itself rather than a bare key.
pub fn is_url(input: &str) -> bool {
    let input = input.trim();
    if input.contains("://") {
        return true;
    }
    matches!(input.split_once(':'), Some((authority, _)) if !authority.contains('/'))
}

/// Build an `InvalidRepoSpec` error.
fn invalid(input: &str, reason: &str) -> CanopyError {
    CanopyError::InvalidRepoSpec {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}.git", self.host, self.owner, self.name)
    }
}

impl FromStr for RepoKey {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
