//! DigitalOcean implementation of the provider interface.
//!
//! Talks to the droplet API directly over HTTP. Responses are decoded into
//! the narrow snapshot types the orchestration core understands; deleting a
//! droplet that is already gone answers 404 and is treated as success.

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    InstanceHandle, InstanceSnapshot, InstanceSpec, NetworkAddress, Provider, ProviderFuture,
    SpecError,
};
use crate::config::{ConfigError, DigitalOceanConfig};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DIGITALOCEAN_API_BASE: &str = "https://api.digitalocean.com/v2";
const PROVIDER_SLUG: &str = "digitalocean";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Provider backed by the DigitalOcean droplet API.
#[derive(Clone, Debug)]
pub struct DigitalOceanProvider {
    token: String,
}

/// Errors raised by the DigitalOcean provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DigitalOceanError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a spec is missing a required field.
    #[error("invalid instance spec: {0}")]
    Validation(String),
    /// Raised when the API answers with an error status.
    #[error("digitalocean api error (status {status}): {message}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// Message extracted from the error body.
        message: String,
    },
    /// Raised for transport-level failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the HTTP client.
        message: String,
    },
    /// Raised when a success response does not decode.
    #[error("malformed provider response: {message}")]
    MalformedResponse {
        /// Decoding failure detail.
        message: String,
    },
}

impl From<SpecError> for DigitalOceanError {
    fn from(value: SpecError) -> Self {
        match value {
            SpecError::Validation(field) => Self::Validation(field),
        }
    }
}

impl From<ConfigError> for DigitalOceanError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<reqwest::Error> for DigitalOceanError {
    fn from(value: reqwest::Error) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

#[derive(Serialize)]
struct CreateDropletRequest<'a> {
    name: &'a str,
    region: &'a str,
    size: &'a str,
    image: &'a str,
    ssh_keys: &'a [String],
    backups: bool,
    monitoring: bool,
    ipv6: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    vpc_uuid: Option<&'a str>,
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Deserialize)]
struct Droplet {
    id: u64,
    status: String,
    #[serde(default)]
    networks: Networks,
}

#[derive(Default, Deserialize)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl DigitalOceanProvider {
    /// Constructs a new provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DigitalOceanError::Config`] when the provided configuration
    /// fails validation.
    pub fn new(config: &DigitalOceanConfig) -> Result<Self, DigitalOceanError> {
        config.validate()?;
        Ok(Self {
            token: config.api_token.clone(),
        })
    }

    async fn get_droplet(&self, id: &str) -> Result<Droplet, DigitalOceanError> {
        let url = format!("{DIGITALOCEAN_API_BASE}/droplets/{id}");
        let response = HTTP_CLIENT
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        let envelope: DropletEnvelope = serde_json::from_slice(&body).map_err(|err| {
            DigitalOceanError::MalformedResponse {
                message: err.to_string(),
            }
        })?;
        Ok(envelope.droplet)
    }
}

impl Provider for DigitalOceanProvider {
    type Error = DigitalOceanError;

    fn slug(&self) -> &'static str {
        PROVIDER_SLUG
    }

    fn create_instance<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, InstanceHandle, Self::Error> {
        Box::pin(async move {
            spec.validate()?;
            let url = format!("{DIGITALOCEAN_API_BASE}/droplets");
            let payload = CreateDropletRequest {
                name: &spec.name,
                region: &spec.region,
                size: &spec.size,
                image: &spec.image,
                ssh_keys: &spec.ssh_keys,
                backups: spec.backups,
                monitoring: spec.monitoring,
                ipv6: spec.ipv6,
                vpc_uuid: spec.vpc_id.as_deref(),
                tags: vec![String::from("steward")],
            };

            let response = HTTP_CLIENT
                .post(&url)
                .bearer_auth(&self.token)
                .json(&payload)
                .send()
                .await?;

            let status = response.status();
            let body = response.bytes().await?;
            if !status.is_success() {
                return Err(api_error(status.as_u16(), &body));
            }

            let envelope: DropletEnvelope = serde_json::from_slice(&body).map_err(|err| {
                DigitalOceanError::MalformedResponse {
                    message: err.to_string(),
                }
            })?;
            Ok(InstanceHandle {
                id: envelope.droplet.id.to_string(),
            })
        })
    }

    fn instance_status<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move { Ok(self.get_droplet(&handle.id).await?.status) })
    }

    fn fetch_instance<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, InstanceSnapshot, Self::Error> {
        Box::pin(async move {
            let droplet = self.get_droplet(&handle.id).await?;
            Ok(snapshot_from_droplet(&droplet))
        })
    }

    fn destroy_instance<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let url = format!("{DIGITALOCEAN_API_BASE}/droplets/{}", handle.id);
            let response = HTTP_CLIENT
                .delete(&url)
                .bearer_auth(&self.token)
                .send()
                .await?;

            let status = response.status();
            if delete_succeeded(status.as_u16()) {
                return Ok(());
            }
            let body = response.bytes().await?;
            Err(api_error(status.as_u16(), &body))
        })
    }
}

/// Deletion outcome: 2xx succeeded, and 404 means the droplet is already
/// gone, which is the desired end state.
const fn delete_succeeded(status: u16) -> bool {
    matches!(status, 200..=299 | 404)
}

fn snapshot_from_droplet(droplet: &Droplet) -> InstanceSnapshot {
    let addresses = droplet
        .networks
        .v4
        .iter()
        .filter_map(|network| {
            Ipv4Addr::from_str(&network.ip_address)
                .ok()
                .map(|address| NetworkAddress {
                    address,
                    public: network.kind == "public",
                })
        })
        .collect();
    InstanceSnapshot {
        id: droplet.id.to_string(),
        status: droplet.status.clone(),
        addresses,
    }
}

fn api_error(status: u16, body: &[u8]) -> DigitalOceanError {
    let message = serde_json::from_slice::<ApiErrorBody>(body).map_or_else(
        |_| String::from_utf8_lossy(body).into_owned(),
        |parsed| parsed.message,
    );
    DigitalOceanError::Api { status, message }
}
