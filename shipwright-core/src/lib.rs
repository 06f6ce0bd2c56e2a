#![deny(missing_docs)]
//! Shipwright core library.
//!
//! Discovers the Dockerfiles of a project, orders them by their `FROM`
//! relationships, tags each image with the git commit that last touched its
//! sources and drives docker to build, tag and push them.

mod command;
pub mod config;
pub mod dependencies;
pub mod docker;
pub mod engine;
pub mod error;
pub mod event;
pub mod fs;
pub mod image;
pub mod registry;
/// Terminal rendering of build events.
pub mod render;
pub mod source_control;

pub use config::{CONFIG_FILE, ConfigOverrides, NAMESPACE_ENV, ShipwrightConfig};
pub use dependencies::{ImageTree, Selection};
pub use docker::{Docker, DockerCli, DockerOptions};
pub use engine::{CacheStrategy, Shipwright};
pub use error::{Result, ShipwrightError};
pub use event::{Event, Record};
pub use fs::{FileSystem, StdFileSystem};
pub use image::{Image, list_images};
pub use registry::{ImageLocation, Manifest, Registry, RegistryLogin, parse_registry_logins};
pub use render::{Highlighter, format_event};
pub use source_control::{GitCli, GitRunner, GitSourceControl, Target};
