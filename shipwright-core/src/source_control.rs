//! Git-derived image tags.
//!
//! An image is tagged with the commit that last touched any path copied into
//! it or into one of its in-project ancestors, so an unchanged image keeps
//! its tag and can be served from cache.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use ring::digest::{Context, SHA256};

use crate::command;
use crate::dependencies::ImageTree;
use crate::error::{Result, ShipwrightError};
use crate::image::Image;

const REF_LEN: usize = 12;

/// Runs git subcommands in a working directory.
#[cfg_attr(test, mockall::automock)]
pub trait GitRunner {
    /// Run `git -C <dir> <args>` and return its stdout.
    fn run(&self, dir: &Path, args: &[String]) -> Result<String>;
}

/// Git runner backed by the `git` binary.
#[derive(Debug, Default, Clone)]
pub struct GitCli;

impl GitRunner for GitCli {
    fn run(&self, dir: &Path, args: &[String]) -> Result<String> {
        command::capture(Command::new("git").arg("-C").arg(dir).args(args))
    }
}

/// An image paired with the tag it is built under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// The image to build.
    pub image: Image,
    /// Git-derived tag, with a `-dirty-` suffix for uncommitted changes.
    pub git_ref: String,
}

impl Target {
    /// `name:ref` reference of the built image.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image.name, self.git_ref)
    }
}

/// Source control queries for a git work tree.
pub struct GitSourceControl<G: GitRunner> {
    runner: G,
    root: PathBuf,
}

impl<G: GitRunner> GitSourceControl<G> {
    /// Open the work tree containing `path`.
    pub fn new(runner: G, path: &Path) -> Result<Self> {
        let root = runner.run(path, &args(&["rev-parse", "--show-toplevel"]))?;
        let root = root.trim();
        if root.is_empty() {
            return Err(ShipwrightError::Other(format!(
                "{} is not inside a git work tree",
                path.display()
            )));
        }
        Ok(Self {
            runner,
            root: PathBuf::from(root),
        })
    }

    /// Root of the work tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the work tree has staged, unstaged or untracked changes.
    pub fn is_dirty(&self) -> Result<bool> {
        Ok(!self.dirty_paths()?.is_empty())
    }

    /// Absolute paths with uncommitted changes, sorted.
    pub fn dirty_paths(&self) -> Result<Vec<PathBuf>> {
        let status = self.runner.run(
            &self.root,
            &args(&["status", "--porcelain", "-z", "--untracked-files=all"]),
        )?;
        let mut paths = parse_porcelain(&status)
            .into_iter()
            .map(|path| self.root.join(path))
            .collect::<Vec<PathBuf>>();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    /// Abbreviated hash of `HEAD`.
    pub fn head(&self) -> Result<String> {
        let head = self.runner.run(&self.root, &args(&["rev-parse", "HEAD"]))?;
        Ok(abbreviate(head.trim()))
    }

    /// Compute build targets for `images`.
    ///
    /// With `dirty` set, uncommitted changes under an image's paths are
    /// folded into its tag instead of being ignored.
    pub fn targets(&self, tree: &ImageTree, images: &[&Image], dirty: bool) -> Result<Vec<Target>> {
        let dirty_paths = if dirty { self.dirty_paths()? } else { Vec::new() };
        images
            .iter()
            .map(|image| {
                let git_ref = self.image_ref(tree, image, &dirty_paths)?;
                log::debug!("{} resolves to {git_ref}", image.name);
                Ok(Target {
                    image: (*image).clone(),
                    git_ref,
                })
            })
            .collect()
    }

    fn image_ref(&self, tree: &ImageTree, image: &Image, dirty_paths: &[PathBuf]) -> Result<String> {
        let tracked = tracked_paths(tree, image)?;

        let mut log_args = args(&["log", "-1", "--format=%H", "--"]);
        log_args.extend(
            tracked
                .iter()
                .filter_map(|path| self.relative(path))
                .map(|path| path.to_string_lossy().into_owned()),
        );
        let last_commit = self.runner.run(&self.root, &log_args)?;
        let mut git_ref = match last_commit.trim() {
            "" => self.head()?,
            sha => abbreviate(sha),
        };

        let touched: Vec<&PathBuf> = dirty_paths
            .iter()
            .filter(|dirty| tracked.iter().any(|path| dirty.starts_with(path)))
            .collect();
        if !touched.is_empty() {
            git_ref.push_str("-dirty-");
            git_ref.push_str(&self.digest(&touched));
        }
        Ok(git_ref)
    }

    fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => Some(Path::new(".")),
            Ok(relative) => Some(relative),
            Err(_) => {
                log::debug!("ignoring {} outside the work tree", path.display());
                None
            }
        }
    }

    fn digest(&self, paths: &[&PathBuf]) -> String {
        let mut context = Context::new(&SHA256);
        for path in paths {
            let name = self.relative(path).unwrap_or(path.as_path());
            context.update(name.to_string_lossy().as_bytes());
            context.update(&[0]);
            match std::fs::read(path) {
                Ok(contents) => context.update(&contents),
                Err(_) => context.update(b"<deleted>"),
            }
            context.update(&[0]);
        }
        abbreviate(&hex::encode(context.finish()))
    }
}

fn tracked_paths(tree: &ImageTree, image: &Image) -> Result<BTreeSet<PathBuf>> {
    let mut paths = image.copy_paths.clone();
    for ancestor in tree.ancestors(&image.name)? {
        paths.extend(ancestor.copy_paths.iter().cloned());
    }
    Ok(paths)
}

/// Paths listed in `git status --porcelain -z` output.
pub fn parse_porcelain(status: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut entries = status.split('\0').filter(|entry| !entry.is_empty());
    while let Some(entry) = entries.next() {
        if entry.len() < 4 {
            continue;
        }
        let (code, path) = entry.split_at(3);
        paths.push(path.to_string());
        if code.starts_with('R') || code.starts_with('C') {
            entries.next();
        }
    }
    paths
}

fn abbreviate(sha: &str) -> String {
    sha.chars().take(REF_LEN).collect()
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use crate::image::list_images;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static UNIQUE_COUNTER: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn parse_porcelain_handles_renames() {
        let status = " M images/base/Dockerfile\0R  images/new.txt\0images/old.txt\0?? notes.md\0";
        assert_eq!(
            parse_porcelain(status),
            vec!["images/base/Dockerfile", "images/new.txt", "notes.md"]
        );
    }

    #[test]
    fn new_resolves_work_tree_root() {
        let mut runner = MockGitRunner::new();
        runner
            .expect_run()
            .withf(|dir, args| dir == Path::new("/repo/images") && args[0] == "rev-parse")
            .returning(|_, _| Ok("/repo\n".to_string()));

        let scm = GitSourceControl::new(runner, Path::new("/repo/images")).expect("scm");

        assert_eq!(scm.root(), Path::new("/repo"));
    }

    #[test]
    fn dirty_state_comes_from_status() {
        let mut runner = MockGitRunner::new();
        runner
            .expect_run()
            .withf(|_, args| args[0] == "rev-parse")
            .returning(|_, _| Ok("/repo\n".to_string()));
        runner
            .expect_run()
            .withf(|_, args| args[0] == "status")
            .returning(|_, _| Ok("?? b.txt\0 M a.txt\0".to_string()));

        let scm = GitSourceControl::new(runner, Path::new("/repo")).expect("scm");

        assert!(scm.is_dirty().expect("dirty"));
        assert_eq!(
            scm.dirty_paths().expect("paths"),
            vec![PathBuf::from("/repo/a.txt"), PathBuf::from("/repo/b.txt")]
        );
    }

    #[test]
    fn refs_follow_the_last_commit_touching_an_image_or_its_ancestors() {
        let repo = init_repo();
        write(&repo, "base/Dockerfile", "FROM ubuntu\nCOPY etc /etc\n");
        write(&repo, "base/etc/app.conf", "v1");
        write(&repo, "web/Dockerfile", "FROM acme/base\nCOPY site /srv\n");
        write(&repo, "web/site/index.html", "<h1>hi</h1>");
        commit(&repo, "initial");
        let initial = head(&repo);

        write(&repo, "web/site/index.html", "<h1>hello</h1>");
        commit(&repo, "web only");
        let web_change = head(&repo);

        let scm = GitSourceControl::new(GitCli, &repo).expect("scm");
        let tree = tree_for(&repo);
        let targets = scm.targets(&tree, &tree.images(), false).expect("targets");

        assert_eq!(targets[0].image.short_name, "base");
        assert_eq!(targets[0].git_ref, initial[..12]);
        assert_eq!(targets[1].git_ref, web_change[..12]);
        assert_eq!(targets[1].reference(), format!("acme/web:{}", &web_change[..12]));

        write(&repo, "base/etc/app.conf", "v2");
        commit(&repo, "base change");
        let base_change = head(&repo);
        let targets = scm.targets(&tree, &tree.images(), false).expect("targets");
        assert_eq!(targets[0].git_ref, base_change[..12]);
        assert_eq!(targets[1].git_ref, base_change[..12]);

        cleanup(&repo);
    }

    #[test]
    fn dirty_changes_add_a_content_suffix() {
        let repo = init_repo();
        write(&repo, "base/Dockerfile", "FROM ubuntu\nCOPY etc /etc\n");
        write(&repo, "base/etc/app.conf", "v1");
        write(&repo, "other/Dockerfile", "FROM debian\n");
        commit(&repo, "initial");
        let initial = head(&repo);

        write(&repo, "base/etc/app.conf", "uncommitted");

        let scm = GitSourceControl::new(GitCli, &repo).expect("scm");
        assert!(scm.is_dirty().expect("dirty"));
        let tree = tree_for(&repo);

        let clean = scm.targets(&tree, &tree.images(), false).expect("targets");
        assert_eq!(clean[0].git_ref, initial[..12]);

        let dirty = scm.targets(&tree, &tree.images(), true).expect("targets");
        let base = &dirty[0];
        assert_eq!(base.image.short_name, "base");
        let prefix = format!("{}-dirty-", &initial[..12]);
        assert!(base.git_ref.starts_with(&prefix));
        assert_eq!(base.git_ref.len(), prefix.len() + 12);
        assert_eq!(dirty[1].image.short_name, "other");
        assert_eq!(dirty[1].git_ref, initial[..12]);

        let again = scm.targets(&tree, &tree.images(), true).expect("targets");
        assert_eq!(again[0].git_ref, base.git_ref);

        cleanup(&repo);
    }

    fn tree_for(repo: &Path) -> ImageTree {
        let images = list_images(&StdFileSystem::new(), "acme", &BTreeMap::new(), repo)
            .expect("images");
        ImageTree::new(images).expect("tree")
    }

    fn init_repo() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time")
            .as_nanos();
        let counter = UNIQUE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!("shipwright_scm_test_{nanos}_{counter}"));
        std::fs::create_dir_all(&root).expect("create repo");
        git(&root, &["init", "-q"]);
        root.canonicalize().expect("canonical repo path")
    }

    fn write(root: &Path, rel_path: &str, contents: &str) {
        let path = root.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create dir");
        }
        std::fs::write(path, contents).expect("write file");
    }

    fn commit(root: &Path, message: &str) {
        git(root, &["add", "-A"]);
        git(
            root,
            &[
                "-c",
                "user.name=Shipwright",
                "-c",
                "user.email=shipwright@example.com",
                "commit",
                "-q",
                "-m",
                message,
            ],
        );
    }

    fn head(root: &Path) -> String {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(root)
            .output()
            .expect("git rev-parse");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn git(root: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(root)
            .status()
            .expect("git");
        assert!(status.success(), "git {args:?} failed");
    }

    fn cleanup(root: &Path) {
        std::fs::remove_dir_all(root).expect("cleanup repo");
    }
}
