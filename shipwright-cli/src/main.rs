#![deny(missing_docs)]
//! Shipwright command-line interface.
//!
//! Builds, lists and pushes the docker images of a git project in
//! dependency order.

mod registry_client;

use clap::{Args, Parser, Subcommand};
use registry_client::HttpRegistry;
use shipwright_core::{
    CacheStrategy, ConfigOverrides, DockerCli, DockerOptions, Event, GitCli, GitSourceControl,
    Highlighter, ImageTree, NAMESPACE_ENV, Selection, Shipwright, ShipwrightConfig,
    StdFileSystem, list_images, parse_registry_logins,
};
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

pub(crate) type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const DIRTY_ABORT: &str = "Aborting build, due to uncommitted changes. If you are not ready to \
    commit these changes, re-run with the --dirty flag.";
const DEFAULT_TAG: &str = "latest";

#[derive(Parser, Debug)]
#[command(
    name = "shipwright",
    version,
    about = "Build docker images of a git project in dependency order"
)]
struct Cli {
    /// Docker daemon to connect to, overriding DOCKER_HOST.
    #[arg(short = 'H', long = "docker-host", global = true)]
    docker_host: Option<String>,
    /// Write every event as a JSON line to this file.
    #[arg(long = "dump-file", global = true)]
    dump_file: Option<PathBuf>,
    /// Disable hostname verification for TLS connections to the daemon.
    #[arg(long = "x-assert-hostname", global = true)]
    x_assert_hostname: bool,
    /// Docker Hub account or registry namespace images are published under.
    #[arg(long, env = NAMESPACE_ENV, global = true)]
    account: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Debug, Default)]
struct TargetArgs {
    /// Build from uncommitted changes, tagging images with a dirty suffix.
    #[arg(long)]
    dirty: bool,
    /// Pull missing images from their registry before building.
    #[arg(long = "pull-cache")]
    pull_cache: bool,
    /// `docker login` arguments for a registry queried directly (repeatable).
    #[arg(long = "registry-login", value_name = "LOGIN", allow_hyphen_values = true)]
    registry_login: Vec<String>,
    /// Build the named images and everything that depends on them.
    #[arg(short = 'd', long = "dependants", value_delimiter = ',')]
    dependants: Vec<String>,
    /// Build only the named images.
    #[arg(short = 'e', long = "exact", value_delimiter = ',')]
    exact: Vec<String>,
    /// Build the named images and everything they depend on.
    #[arg(short = 'u', long = "upto", value_delimiter = ',')]
    upto: Vec<String>,
    /// Skip the named images and everything that depends on them.
    #[arg(short = 'x', long = "exclude", value_delimiter = ',')]
    exclude: Vec<String>,
    /// Extra tags applied to every built image (default: latest).
    #[arg(short = 't', long = "tag", value_delimiter = ',')]
    tag: Vec<String>,
    /// Images to build along with their dependencies.
    #[arg(value_name = "TARGET")]
    targets: Vec<String>,
}

impl TargetArgs {
    fn selection(&self) -> Selection {
        let mut upto = self.upto.clone();
        upto.extend(self.targets.iter().cloned());
        Selection {
            exact: self.exact.clone(),
            dependents: self.dependants.clone(),
            upto,
            exclude: self.exclude.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build images that are missing from the cache.
    Build {
        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Print the name:ref of every selected image.
    Images {
        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Build and push images with their tags.
    Push {
        #[command(flatten)]
        targets: TargetArgs,
        /// Push existing images without building.
        #[arg(long = "no-build")]
        no_build: bool,
    },
}

impl Commands {
    fn targets(&self) -> &TargetArgs {
        match self {
            Self::Build { targets } | Self::Images { targets } | Self::Push { targets, .. } => {
                targets
            }
        }
    }
}

#[cfg_attr(test, allow(dead_code))]
enum Outcome {
    Images(Vec<String>),
    Done,
}

#[cfg(not(test))]
#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(errors) if errors.is_empty() => {}
        Ok(errors) => {
            if let Err(err) = report_errors(&errors, &mut std::io::stdout()) {
                eprintln!("{err}");
            }
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
fn main() {}

/// Run a command, returning the sorted error messages reported by events.
#[cfg_attr(test, allow(dead_code))]
async fn run(cli: Cli) -> CliResult<Vec<String>> {
    let dump = open_dump(cli.dump_file.as_deref()).await?;
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = tokio::task::spawn_blocking(move || execute(cli, tx));

    let mut stdout = std::io::stdout();
    let color = stdout.is_terminal();
    let consumed = consume_events(rx, dump, color, &mut stdout).await;
    let outcome = worker.await??;
    let errors = consumed?;

    if let Outcome::Images(images) = outcome {
        for image in images {
            writeln!(stdout, "{image}")?;
        }
    }
    Ok(errors)
}

/// Print the error summary shown when any image failed.
fn report_errors<W: Write>(errors: &[String], out: &mut W) -> std::io::Result<()> {
    writeln!(out, "The following errors occurred:")?;
    for error in errors {
        writeln!(out, "{error}")?;
    }
    Ok(())
}

/// Create the dump file up front so a bad path fails before any work starts.
async fn open_dump(path: Option<&Path>) -> CliResult<Option<tokio::fs::File>> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .map_err(|err| format!("cannot create dump file {}: {err}", path.display()))?;
            Ok(Some(file))
        }
        None => Ok(None),
    }
}

/// Resolve the project in the working directory and drive the engine; runs
/// on a blocking thread.
#[cfg_attr(test, allow(dead_code))]
fn execute(cli: Cli, tx: mpsc::UnboundedSender<Event>) -> CliResult<Outcome> {
    let cwd = std::env::current_dir()?;
    let engine = open_project(&cli, &cwd)?;
    let args = cli.command.targets();
    let selection = args.selection();
    let mut sink = |event: Event| {
        if tx.send(event).is_err() {
            log::warn!("event receiver closed");
        }
    };
    match &cli.command {
        Commands::Images { .. } => Ok(Outcome::Images(engine.images(&selection, args.dirty)?)),
        Commands::Build { .. } => {
            engine.build(&selection, args.dirty, &mut sink)?;
            Ok(Outcome::Done)
        }
        Commands::Push { no_build, .. } => {
            engine.push(&selection, args.dirty, *no_build, &mut sink)?;
            Ok(Outcome::Done)
        }
    }
}

/// Build the engine for the project at `path`.
///
/// Config and Dockerfiles are read from `path` itself; only git queries use
/// the enclosing work tree.
fn open_project(cli: &Cli, path: &Path) -> CliResult<Shipwright<GitCli, DockerCli>> {
    let args = cli.command.targets();
    let path = path.canonicalize()?;
    let scm = GitSourceControl::new(GitCli, &path)?;
    if !args.dirty && scm.is_dirty()? {
        return Err(DIRTY_ABORT.into());
    }

    let overrides = ConfigOverrides {
        account: cli.account.clone(),
        disable_assert_hostname: cli.x_assert_hostname,
    };
    let fs = StdFileSystem::new();
    let config = ShipwrightConfig::load(&fs, &path, &overrides)?;
    let images = list_images(&fs, &config.namespace, &config.names, &path)?;
    let tree = ImageTree::new(images)?;
    let docker = DockerCli::new(DockerOptions::from_env(
        cli.docker_host.clone(),
        config.assert_hostname,
    ));
    Ok(Shipwright::new(
        scm,
        docker,
        tree,
        cache_strategy(args)?,
        normalize_tags(&args.tag),
    ))
}

fn cache_strategy(args: &TargetArgs) -> CliResult<CacheStrategy> {
    if !args.registry_login.is_empty() {
        let logins = parse_registry_logins(&args.registry_login)?;
        return Ok(CacheStrategy::Registry(Box::new(HttpRegistry::new(logins)?)));
    }
    if args.pull_cache {
        return Ok(CacheStrategy::Pull);
    }
    Ok(CacheStrategy::Local)
}

/// Sorted, de-duplicated tags; `latest` when none are given.
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    if tags.is_empty() {
        tags.push(DEFAULT_TAG.to_string());
    }
    tags.sort();
    tags.dedup();
    tags
}

/// Print and dump events until the worker finishes, collecting error lines.
async fn consume_events<W: Write>(
    mut rx: mpsc::UnboundedReceiver<Event>,
    mut dump: Option<tokio::fs::File>,
    color: bool,
    out: &mut W,
) -> CliResult<Vec<String>> {
    let mut highlighter = Highlighter::new(color);
    let mut plain = Highlighter::new(false);
    let mut errors = Vec::new();

    while let Some(event) = rx.recv().await {
        if let Some(file) = dump.as_mut() {
            let mut line = serde_json::to_string(&event)?;
            line.push('\n');
            file.write_all(line.as_bytes()).await?;
        }
        if event.is_error() {
            if let Some(line) = plain.render(&event) {
                errors.push(line);
            }
        }
        if let Some(line) = highlighter.render(&event) {
            writeln!(out, "{line}")?;
        }
    }

    if let Some(file) = dump.as_mut() {
        file.flush().await?;
    }
    errors.sort();
    Ok(errors)
}
