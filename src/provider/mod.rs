//! Cloud provider abstraction for provisioning virtual machines.
//!
//! The orchestration core is written against this deliberately narrow
//! interface — create, poll status, fetch networking, destroy — so any
//! provider can be substituted. Destroy implementations must be idempotent:
//! a "resource already gone" answer counts as success.

use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;

use thiserror::Error;

pub mod digitalocean;

pub use digitalocean::{DigitalOceanError, DigitalOceanProvider};

/// Status tag a provider reports once an instance is running.
pub const STATUS_ACTIVE: &str = "active";

/// Parameters required to create a new instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Name assigned to the instance at the provider.
    pub name: String,
    /// Target region (for example `nyc3`).
    pub region: String,
    /// Size slug to request (for example `s-1vcpu-1gb`).
    pub size: String,
    /// Image slug used for the boot disk.
    pub image: String,
    /// SSH key identifiers or fingerprints installed at first boot.
    pub ssh_keys: Vec<String>,
    /// Whether provider-side backups are enabled.
    pub backups: bool,
    /// Whether provider-side monitoring is enabled.
    pub monitoring: bool,
    /// Whether an IPv6 address is requested.
    pub ipv6: bool,
    /// Optional VPC the instance joins instead of the default network.
    pub vpc_id: Option<String>,
}

impl InstanceSpec {
    /// Starts a builder for an [`InstanceSpec`].
    #[must_use]
    pub fn builder() -> InstanceSpecBuilder {
        InstanceSpecBuilder::new()
    }

    /// Validates the spec, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when any required field is empty.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::Validation("name".to_owned()));
        }
        if self.region.is_empty() {
            return Err(SpecError::Validation("region".to_owned()));
        }
        if self.size.is_empty() {
            return Err(SpecError::Validation("size".to_owned()));
        }
        if self.image.is_empty() {
            return Err(SpecError::Validation("image".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`InstanceSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceSpecBuilder {
    name: String,
    region: String,
    size: String,
    image: String,
    ssh_keys: Vec<String>,
    backups: bool,
    monitoring: bool,
    ipv6: bool,
    vpc_id: Option<String>,
}

impl InstanceSpecBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the target region.
    #[must_use]
    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = value.into();
        self
    }

    /// Sets the size slug.
    #[must_use]
    pub fn size(mut self, value: impl Into<String>) -> Self {
        self.size = value.into();
        self
    }

    /// Sets the image slug.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the SSH keys installed at first boot.
    #[must_use]
    pub fn ssh_keys(mut self, value: Vec<String>) -> Self {
        self.ssh_keys = value;
        self
    }

    /// Enables or disables provider-side backups.
    #[must_use]
    pub const fn backups(mut self, value: bool) -> Self {
        self.backups = value;
        self
    }

    /// Enables or disables provider-side monitoring.
    #[must_use]
    pub const fn monitoring(mut self, value: bool) -> Self {
        self.monitoring = value;
        self
    }

    /// Enables or disables IPv6.
    #[must_use]
    pub const fn ipv6(mut self, value: bool) -> Self {
        self.ipv6 = value;
        self
    }

    /// Sets the optional VPC identifier.
    #[must_use]
    pub fn vpc_id(mut self, value: Option<String>) -> Self {
        self.vpc_id = value;
        self
    }

    /// Builds and validates the [`InstanceSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<InstanceSpec, SpecError> {
        let spec = InstanceSpec {
            name: self.name.trim().to_owned(),
            region: self.region.trim().to_owned(),
            size: self.size.trim().to_owned(),
            image: self.image.trim().to_owned(),
            ssh_keys: self
                .ssh_keys
                .into_iter()
                .map(|key| key.trim().to_owned())
                .collect(),
            backups: self.backups,
            monitoring: self.monitoring,
            ipv6: self.ipv6,
            vpc_id: self.vpc_id.map(|value| value.trim().to_owned()),
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Handle returned by a provider once an instance has been created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHandle {
    /// Provider specific identifier for the instance.
    pub id: String,
}

/// One IPv4 interface attached to an instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NetworkAddress {
    /// Address assigned by the provider.
    pub address: Ipv4Addr,
    /// Whether the address is publicly routable.
    pub public: bool,
}

/// Point-in-time view of an instance, as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSnapshot {
    /// Provider specific identifier for the instance.
    pub id: String,
    /// Provider status tag (see [`STATUS_ACTIVE`]).
    pub status: String,
    /// IPv4 interfaces currently attached.
    pub addresses: Vec<NetworkAddress>,
}

impl InstanceSnapshot {
    /// First publicly routable IPv4 address, when one is attached.
    #[must_use]
    pub fn public_ipv4(&self) -> Option<Ipv4Addr> {
        self.addresses
            .iter()
            .find(|address| address.public)
            .map(|address| address.address)
    }
}

/// Errors raised while validating an instance spec.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when a spec is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by cloud providers.
pub trait Provider {
    /// Provider specific error type returned by operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Short tag recorded on server records, for example `digitalocean`.
    fn slug(&self) -> &'static str;

    /// Creates a new instance and returns a handle used for subsequent calls.
    fn create_instance<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, InstanceHandle, Self::Error>;

    /// Reports the instance's current status tag.
    fn instance_status<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Fetches the instance including its attached network interfaces.
    fn fetch_instance<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, InstanceSnapshot, Self::Error>;

    /// Destroys the instance. Implementations treat "already gone" as
    /// success so repeated deletions never break automation.
    fn destroy_instance<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, (), Self::Error>;
}
