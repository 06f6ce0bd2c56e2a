//! Docker daemon access.

use std::path::Path;
use std::process::Command;

use crate::command;
use crate::error::Result;

/// Environment variable the docker client reads to enable TLS verification.
pub const TLS_VERIFY_ENV: &str = "DOCKER_TLS_VERIFY";

/// Parameters of a single image build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildRequest<'a> {
    /// `name:tag` the built image is stored under.
    pub reference: &'a str,
    /// Dockerfile to build.
    pub dockerfile: &'a Path,
    /// Build context directory.
    pub context: &'a Path,
}

/// Operations shipwright needs from a docker daemon.
pub trait Docker {
    /// Whether `reference` exists in the local image store.
    fn image_exists(&self, reference: &str) -> Result<bool>;
    /// Pull `reference`, returning false when the registry does not have it.
    fn pull(&self, reference: &str) -> Result<bool>;
    /// Build an image, streaming build output line by line.
    fn build(&self, request: &BuildRequest<'_>, output: &mut dyn FnMut(String)) -> Result<()>;
    /// Tag `reference` as `repository:tag`.
    fn tag(&self, reference: &str, repository: &str, tag: &str) -> Result<()>;
    /// Push `reference`, streaming push output line by line.
    fn push(&self, reference: &str, output: &mut dyn FnMut(String)) -> Result<()>;
}

/// Connection settings for the docker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerOptions {
    /// Daemon address overriding `DOCKER_HOST`.
    pub host: Option<String>,
    /// Whether TLS connections verify the daemon hostname.
    pub assert_hostname: bool,
    /// Whether TLS verification was requested through the environment.
    pub tls_verify: bool,
}

impl DockerOptions {
    /// Options for `host`, reading TLS settings from the environment.
    pub fn from_env(host: Option<String>, assert_hostname: bool) -> Self {
        let tls_verify = std::env::var(TLS_VERIFY_ENV)
            .map(|value| !value.is_empty() && value != "0")
            .unwrap_or(false);
        Self {
            host,
            assert_hostname,
            tls_verify,
        }
    }

    /// Global arguments passed before every docker subcommand.
    pub fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(host) = &self.host {
            args.push("--host".to_string());
            args.push(host.clone());
        }
        if self.tls_verify && !self.assert_hostname {
            args.push("--tls".to_string());
            args.push("--tlsverify=false".to_string());
        }
        args
    }
}

/// Docker access through the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    options: DockerOptions,
}

impl DockerCli {
    /// Create a client with the given connection settings.
    pub fn new(options: DockerOptions) -> Self {
        Self { options }
    }

    fn command(&self) -> Command {
        let mut command = Command::new("docker");
        command.args(self.options.global_args());
        command
    }
}

impl Docker for DockerCli {
    fn image_exists(&self, reference: &str) -> Result<bool> {
        command::succeeds(self.command().args(["image", "inspect", reference]))
    }

    fn pull(&self, reference: &str) -> Result<bool> {
        command::succeeds(self.command().args(["pull", "--quiet", reference]))
    }

    fn build(&self, request: &BuildRequest<'_>, output: &mut dyn FnMut(String)) -> Result<()> {
        let mut command = self.command();
        command
            .args(["build", "--tag", request.reference, "--file"])
            .arg(request.dockerfile)
            .arg(request.context);
        command::stream(&mut command, output)
    }

    fn tag(&self, reference: &str, repository: &str, tag: &str) -> Result<()> {
        let target = format!("{repository}:{tag}");
        command::capture(self.command().args(["tag", reference, &target]))?;
        Ok(())
    }

    fn push(&self, reference: &str, output: &mut dyn FnMut(String)) -> Result<()> {
        command::stream(self.command().args(["push", reference]), output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_args_carry_host_override() {
        let options = DockerOptions {
            host: Some("tcp://10.0.0.5:2376".to_string()),
            assert_hostname: true,
            tls_verify: true,
        };
        assert_eq!(options.global_args(), vec!["--host", "tcp://10.0.0.5:2376"]);
    }

    #[test]
    fn disabled_hostname_assertion_relaxes_tls() {
        let options = DockerOptions {
            host: None,
            assert_hostname: false,
            tls_verify: true,
        };
        assert_eq!(options.global_args(), vec!["--tls", "--tlsverify=false"]);

        let plain = DockerOptions {
            host: None,
            assert_hostname: false,
            tls_verify: false,
        };
        assert!(plain.global_args().is_empty());
    }

    #[test]
    fn commands_start_with_global_args() {
        let docker = DockerCli::new(DockerOptions {
            host: Some("unix:///tmp/docker.sock".to_string()),
            assert_hostname: true,
            tls_verify: false,
        });
        let mut command = docker.command();
        command.args(["image", "inspect", "acme/base:abc"]);
        assert_eq!(
            command::describe(&command),
            "docker --host unix:///tmp/docker.sock image inspect acme/base:abc"
        );
    }
}
