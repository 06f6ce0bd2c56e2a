//! Direct registry access for cache lookups and tag aliasing.

use std::collections::BTreeMap;

use crate::error::{Result, ShipwrightError};

/// Canonical server name for Docker Hub.
pub const DOCKER_HUB: &str = "docker.io";

const DOCKER_HUB_ALIASES: [&str; 3] = ["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Credentials for one registry, parsed from a `docker login` command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLogin {
    /// Server exactly as given, possibly with a scheme.
    pub server: String,
    /// Login user.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Login email, accepted for compatibility.
    pub email: Option<String>,
}

/// Where an image lives: a registry server and a repository on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLocation {
    /// Canonical server name.
    pub server: String,
    /// Repository path on the server.
    pub repository: String,
}

/// A raw image manifest and its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// `Content-Type` the registry served the manifest with.
    pub content_type: String,
    /// Manifest bytes, kept verbatim so the digest is preserved.
    pub body: Vec<u8>,
}

/// Registry operations used instead of pulling and pushing through docker.
pub trait Registry {
    /// Whether credentials are configured for `server`.
    fn handles(&self, server: &str) -> bool;
    /// Fetch the manifest of `location` at `reference`, or `None` when absent.
    fn manifest(&self, location: &ImageLocation, reference: &str) -> Result<Option<Manifest>>;
    /// Store `manifest` under `tag`.
    fn put_manifest(&self, location: &ImageLocation, tag: &str, manifest: &Manifest) -> Result<()>;
}

/// Split an image name into registry server and repository.
///
/// The first path component names a registry when it contains `.` or `:` or
/// is `localhost`; otherwise the image lives on Docker Hub.
pub fn split_image(name: &str) -> ImageLocation {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return ImageLocation {
                server: canonical_server(first),
                repository: rest.to_string(),
            };
        }
        return ImageLocation {
            server: DOCKER_HUB.to_string(),
            repository: name.to_string(),
        };
    }
    ImageLocation {
        server: DOCKER_HUB.to_string(),
        repository: format!("library/{name}"),
    }
}

/// Server key used to match logins with image names.
///
/// Drops the scheme, any trailing API version path, and folds Docker Hub
/// aliases together.
pub fn canonical_server(server: &str) -> String {
    let without_scheme = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);
    let trimmed = without_scheme.trim_end_matches('/');
    let trimmed = trimmed
        .strip_suffix("/v1")
        .or_else(|| trimmed.strip_suffix("/v2"))
        .unwrap_or(trimmed);
    if DOCKER_HUB_ALIASES.contains(&trimmed) {
        DOCKER_HUB.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse `--registry-login` values into logins keyed by canonical server.
///
/// Each value is a `docker login` command line, with or without the leading
/// `docker login`. Unknown options are ignored.
pub fn parse_registry_logins(logins: &[String]) -> Result<BTreeMap<String, RegistryLogin>> {
    let mut registries = BTreeMap::new();
    for login in logins {
        let parsed = parse_login(login)?;
        registries.insert(canonical_server(&parsed.server), parsed);
    }
    Ok(registries)
}

fn parse_login(line: &str) -> Result<RegistryLogin> {
    let trimmed = line.trim();
    let line = trimmed.strip_prefix("docker login ").unwrap_or(trimmed);
    let tokens = shell_split(line)?;

    let mut username = None;
    let mut password = None;
    let mut email = None;
    let mut server = None;

    let mut tokens = tokens.into_iter();
    while let Some(token) = tokens.next() {
        if let Some((flag, value)) = token.split_once('=') {
            if flag.starts_with("--") {
                match flag {
                    "--username" => username = Some(value.to_string()),
                    "--password" => password = Some(value.to_string()),
                    "--email" => email = Some(value.to_string()),
                    _ => {}
                }
                continue;
            }
        }
        match token.as_str() {
            "-u" | "--username" => username = tokens.next(),
            "-p" | "--password" => password = tokens.next(),
            "-e" | "--email" => email = tokens.next(),
            other if other.starts_with('-') => {}
            other => {
                if server.is_none() {
                    server = Some(other.to_string());
                }
            }
        }
    }

    let server = server.ok_or_else(|| {
        ShipwrightError::Config(format!("--registry-login requires a SERVER: {line}"))
    })?;
    Ok(RegistryLogin {
        server,
        username,
        password,
        email,
    })
}

fn shell_split(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err(unterminated(line)),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(unterminated(line)),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err(unterminated(line)),
                    }
                }
            }
            '\\' => {
                in_token = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ch if ch.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn unterminated(line: &str) -> ShipwrightError {
    ShipwrightError::Config(format!("unterminated quote in registry login: {line}"))
}
