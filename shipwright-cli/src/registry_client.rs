//! Docker registry HTTP API v2 client used for cache lookups and tag aliasing.

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use shipwright_core::registry::{DOCKER_HUB, canonical_server};
use shipwright_core::{ImageLocation, Manifest, Registry, RegistryLogin, ShipwrightError};
use std::collections::BTreeMap;

const DOCKER_HUB_API: &str = "registry-1.docker.io";
const MANIFEST_TYPES: &str = "application/vnd.docker.distribution.manifest.v2+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.oci.image.manifest.v1+json, \
    application/vnd.oci.image.index.v1+json";

/// Registry access over HTTP basic auth, one login per server.
pub struct HttpRegistry {
    client: Client,
    logins: BTreeMap<String, RegistryLogin>,
}

impl HttpRegistry {
    /// Build a client for the given logins, keyed by canonical server.
    pub fn new(logins: BTreeMap<String, RegistryLogin>) -> shipwright_core::Result<Self> {
        let client = Client::builder()
            .user_agent("shipwright")
            .build()
            .map_err(http_error)?;
        Ok(Self { client, logins })
    }

    fn login(&self, server: &str) -> shipwright_core::Result<&RegistryLogin> {
        self.logins
            .get(&canonical_server(server))
            .ok_or_else(|| ShipwrightError::Config(format!("no registry login for {server}")))
    }

    fn manifest_url(
        &self,
        location: &ImageLocation,
        reference: &str,
    ) -> shipwright_core::Result<String> {
        let login = self.login(&location.server)?;
        Ok(format!(
            "{}/v2/{}/manifests/{reference}",
            base_url(&login.server),
            location.repository
        ))
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
        server: &str,
    ) -> shipwright_core::Result<reqwest::blocking::RequestBuilder> {
        let login = self.login(server)?;
        Ok(match &login.username {
            Some(username) => request.basic_auth(username, login.password.as_ref()),
            None => request,
        })
    }
}

impl Registry for HttpRegistry {
    fn handles(&self, server: &str) -> bool {
        self.logins.contains_key(&canonical_server(server))
    }

    fn manifest(
        &self,
        location: &ImageLocation,
        reference: &str,
    ) -> shipwright_core::Result<Option<Manifest>> {
        let url = self.manifest_url(location, reference)?;
        log::debug!("GET {url}");
        let request = self.client.get(&url).header(ACCEPT, MANIFEST_TYPES);
        let response = self
            .authorize(request, &location.server)?
            .send()
            .map_err(http_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status().map_err(http_error)?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/vnd.docker.distribution.manifest.v2+json")
            .to_string();
        let body = response.bytes().map_err(http_error)?.to_vec();
        Ok(Some(Manifest { content_type, body }))
    }

    fn put_manifest(
        &self,
        location: &ImageLocation,
        tag: &str,
        manifest: &Manifest,
    ) -> shipwright_core::Result<()> {
        let url = self.manifest_url(location, tag)?;
        log::debug!("PUT {url}");
        let request = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, manifest.content_type.as_str())
            .body(manifest.body.clone());
        self.authorize(request, &location.server)?
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(http_error)?;
        Ok(())
    }
}

/// API root for a login server; defaults to https and maps Docker Hub to its API host.
fn base_url(server: &str) -> String {
    let scheme = if server.starts_with("http://") {
        "http"
    } else {
        "https"
    };
    let host = match canonical_server(server) {
        host if host == DOCKER_HUB => DOCKER_HUB_API.to_string(),
        host => host,
    };
    format!("{scheme}://{host}")
}

fn http_error(err: reqwest::Error) -> ShipwrightError {
    ShipwrightError::Other(format!("registry request failed: {err}"))
}
