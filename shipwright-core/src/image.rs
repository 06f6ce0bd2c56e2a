//! Dockerfile discovery and parsing.
//!
//! Every file whose name starts with `Dockerfile` under the project root
//! describes one image. The image is named after its directory (plus any
//! suffix after `Dockerfile`), linked to its parent through the first `FROM`
//! instruction, and tracked through the set of paths its `COPY`/`ADD`
//! instructions pull into the build context.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, ShipwrightError};
use crate::fs::FileSystem;

const DOCKERFILE: &str = "Dockerfile";
const TAGS_FILE: &str = "TAGS";
const DOCKERIGNORE: &str = ".dockerignore";

/// A buildable image described by a Dockerfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Full repository name, e.g. `acme/base`.
    pub name: String,
    /// Name used on the command line, e.g. `base`.
    pub short_name: String,
    /// Directory holding the Dockerfile; the build context.
    pub dir_path: PathBuf,
    /// Path of the Dockerfile.
    pub path: PathBuf,
    /// Image named by the first `FROM` instruction.
    pub parent: Option<String>,
    /// Paths whose contents end up in the image.
    pub copy_paths: BTreeSet<PathBuf>,
    /// Additional tags listed in a `TAGS` file next to the Dockerfile.
    pub extra_tags: Vec<String>,
}

/// Discover and parse every image under `root`.
pub fn list_images<F: FileSystem>(
    fs: &F,
    namespace: &str,
    names: &BTreeMap<String, String>,
    root: &Path,
) -> Result<Vec<Image>> {
    let mut images = Vec::new();
    for path in build_files(fs, root)? {
        let (name, short_name) = image_name(namespace, names, root, &path)?;
        let contents = fs.read_to_string(&path)?;
        let dir_path = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ShipwrightError::InvalidDockerfile(path.clone()))?;
        let extra_tags = extra_tags(fs, &dir_path)?;
        log::debug!("found image {name} at {}", path.display());
        images.push(Image {
            name,
            short_name,
            copy_paths: copy_paths(&path, &contents),
            parent: parent(&contents),
            extra_tags,
            dir_path,
            path,
        });
    }
    Ok(images)
}

/// List every Dockerfile under `root`, sorted.
pub fn build_files<F: FileSystem>(fs: &F, root: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs
        .list_files(root)?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(DOCKERFILE))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Determine the repository and short name of the image built from `path`.
///
/// An entry in `names` keyed by the Dockerfile's directory (relative to
/// `root`) wins; otherwise the name is derived from the directory.
///
/// ```
/// use std::collections::BTreeMap;
/// use std::path::Path;
/// use shipwright_core::image::image_name;
///
/// let names = BTreeMap::from([("blah".to_string(), "foo/blah".to_string())]);
/// let root = Path::new("x");
///
/// let mapped = image_name("shipwright", &names, root, Path::new("x/blah/Dockerfile")).unwrap();
/// assert_eq!(mapped, ("foo/blah".to_string(), "foo/blah".to_string()));
///
/// let derived = image_name("shipwright", &names, root, Path::new("x/baz/Dockerfile")).unwrap();
/// assert_eq!(derived, ("shipwright/baz".to_string(), "baz".to_string()));
/// ```
pub fn image_name(
    namespace: &str,
    names: &BTreeMap<String, String>,
    root: &Path,
    path: &Path,
) -> Result<(String, String)> {
    if let Ok(relative) = path.strip_prefix(root) {
        let key = relative_dir_key(relative);
        if let Some(repo) = names.get(&key) {
            return Ok((repo.clone(), repo.clone()));
        }
    }
    let short_name = dockerfile_name(path)?;
    Ok((format!("{namespace}/{short_name}"), short_name))
}

/// Name an image after the directory holding its Dockerfile.
///
/// Any suffix after `Dockerfile` in the file name is appended.
///
/// ```
/// use std::path::Path;
/// use shipwright_core::image::dockerfile_name;
///
/// assert_eq!(dockerfile_name(Path::new("/blah/foo/Dockerfile")).unwrap(), "foo");
/// assert_eq!(dockerfile_name(Path::new("/blah/foo/Dockerfile-dev")).unwrap(), "foo-dev");
/// assert!(dockerfile_name(Path::new("/blah/foo/not-a-Dockerfile-dev")).is_err());
/// assert!(dockerfile_name(Path::new("/blah/foo/setup.py")).is_err());
/// ```
pub fn dockerfile_name(path: &Path) -> Result<String> {
    let invalid = || ShipwrightError::InvalidDockerfile(path.to_path_buf());
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(invalid)?;
    let suffix = file_name.strip_prefix(DOCKERFILE).ok_or_else(invalid)?;
    let dir_name = path
        .parent()
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
        .ok_or_else(invalid)?;
    Ok(format!("{dir_name}{suffix}"))
}

/// Image named by the first `FROM` instruction, if any.
pub fn parent(contents: &str) -> Option<String> {
    logical_lines(contents).into_iter().find_map(|line| {
        let mut tokens = line.split_whitespace();
        let keyword = tokens.next()?;
        if !keyword.eq_ignore_ascii_case("from") {
            return None;
        }
        tokens
            .find(|token| !token.starts_with("--"))
            .map(str::to_string)
    })
}

/// Point the first `FROM` instruction at `reference`.
///
/// Children are built from the exact parent tag produced in the same run
/// rather than whatever the `FROM` line names.
pub fn with_parent(contents: &str, reference: &str) -> String {
    let mut replaced = false;
    let mut lines: Vec<String> = Vec::new();
    let mut pending: Vec<&str> = Vec::new();
    let mut joined = String::new();
    for raw in contents.lines() {
        let line = raw.trim_end();
        if pending.is_empty() && line.trim_start().starts_with('#') {
            lines.push(raw.to_string());
            continue;
        }
        pending.push(raw);
        if let Some(head) = line.strip_suffix('\\') {
            joined.push_str(head);
            joined.push(' ');
            continue;
        }
        joined.push_str(line);
        match (!replaced).then(|| rewrite_from(&joined, reference)).flatten() {
            Some(rewritten) => {
                lines.push(rewritten);
                replaced = true;
            }
            None => lines.extend(pending.iter().map(|raw| raw.to_string())),
        }
        pending.clear();
        joined.clear();
    }
    lines.extend(pending.iter().map(|raw| raw.to_string()));

    let mut rewritten = lines.join("\n");
    if contents.ends_with('\n') {
        rewritten.push('\n');
    }
    rewritten
}

fn rewrite_from(instruction: &str, reference: &str) -> Option<String> {
    let mut tokens: Vec<&str> = instruction.split_whitespace().collect();
    if !tokens.first()?.eq_ignore_ascii_case("from") {
        return None;
    }
    let pos = tokens
        .iter()
        .skip(1)
        .position(|token| !token.starts_with("--"))?
        + 1;
    tokens[pos] = reference;
    Some(tokens.join(" "))
}

/// Source paths of a `COPY` or `ADD` instruction.
///
/// The destination, options, stage copies and remote `ADD` sources are
/// dropped. Other instructions yield nothing.
pub fn parse_copy(line: &str) -> Vec<String> {
    let Some((keyword, rest)) = line.trim_start().split_once(char::is_whitespace) else {
        return Vec::new();
    };
    let is_copy = keyword.eq_ignore_ascii_case("COPY");
    let is_add = keyword.eq_ignore_ascii_case("ADD");
    if !is_copy && !is_add {
        return Vec::new();
    }

    let mut rest = rest.trim();
    let mut options = Vec::new();
    while rest.starts_with("--") {
        let (option, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        options.push(option.to_ascii_lowercase());
        rest = tail.trim_start();
    }
    if is_copy && options.iter().any(|option| option.starts_with("--from=")) {
        return Vec::new();
    }

    let mut args = match serde_json::from_str::<Vec<String>>(rest) {
        Ok(args) => args,
        Err(_) => rest.split_whitespace().map(str::to_string).collect(),
    };
    args.pop();

    if is_add {
        args.retain(|arg| !is_remote(arg));
    }
    args
}

/// Paths whose contents affect the image built from `dockerfile`.
pub fn copy_paths(dockerfile: &Path, contents: &str) -> BTreeSet<PathBuf> {
    let dir = dockerfile.parent().unwrap_or_else(|| Path::new(""));
    let mut paths = BTreeSet::new();
    paths.insert(dockerfile.to_path_buf());
    paths.insert(dir.join(DOCKERIGNORE));
    for line in logical_lines(contents) {
        for source in parse_copy(&line) {
            let source = source.trim_start_matches('/');
            paths.insert(normalize_path(&dir.join(source)));
        }
    }
    paths
}

/// Tags listed one per line in a `TAGS` file in `dir`.
pub fn extra_tags<F: FileSystem>(fs: &F, dir: &Path) -> Result<Vec<String>> {
    let path = dir.join(TAGS_FILE);
    if !fs.is_file(&path) {
        return Ok(Vec::new());
    }
    let contents = match fs.read_to_string(&path) {
        Ok(contents) => contents,
        Err(ShipwrightError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(Vec::new());
        }
        Err(err) => return Err(err),
    };
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Lexically normalise a path, resolving `.` and `..` without touching disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

fn logical_lines(contents: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for raw in contents.lines() {
        let line = raw.trim_end();
        if current.is_empty() && line.trim_start().starts_with('#') {
            continue;
        }
        match line.strip_suffix('\\') {
            Some(head) => {
                current.push_str(head);
                current.push(' ');
            }
            None => {
                current.push_str(line);
                lines.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.trim().is_empty() {
        lines.push(current);
    }
    lines
}

fn relative_dir_key(relative: &Path) -> String {
    relative
        .parent()
        .map(|dir| {
            dir.components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<String>>()
                .join("/")
        })
        .unwrap_or_default()
}

fn is_remote(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    ["http:", "https:", "ftp:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}
