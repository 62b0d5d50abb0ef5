//! Persistent inventory of servers and sites.
//!
//! Records are name-keyed tables in a discovered TOML file. The inventory
//! exclusively owns persistence: the orchestration core borrows records for
//! the duration of one command and never writes the file itself, and the
//! transient facts cache on a server record is dropped on save. Uniqueness
//! (server names, hosts, site domains) is validated here before mutation.

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::ConfigDiscovery;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ortho_config::toml;

use crate::server::{DEFAULT_SSH_PORT, Login, Server};

const APP_NAME: &str = "steward";
const INVENTORY_ENV_VAR: &str = "STEWARD_INVENTORY_PATH";
const INVENTORY_FILE_NAME: &str = "inventory.toml";
const DOTFILE_NAME: &str = ".steward-inventory.toml";
const PROJECT_FILE_NAME: &str = "steward-inventory.toml";

/// A deployed site owned by one server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Site {
    /// Domain the site is served under; unique within the inventory.
    pub domain: String,
    /// Name of the server hosting the site.
    pub server: String,
    /// Optional source repository deployed to the site.
    pub repository: Option<String>,
}

/// Errors raised while reading or updating the inventory file.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Raised when no inventory file candidates are available.
    #[error("no inventory file candidates were discovered")]
    NoCandidates,
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when parsing or rendering TOML content fails.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a server name is already taken and replace is disabled.
    #[error("server {name} already exists; rerun with --replace to update it")]
    ServerExists {
        /// Conflicting server name.
        name: String,
    },
    /// Raised when another server already uses the same host.
    #[error("host {host} is already registered to server {owner}")]
    HostInUse {
        /// Host that collided.
        host: String,
        /// Server currently owning the host.
        owner: String,
    },
    /// Raised when a site domain is already taken and replace is disabled.
    #[error("site {domain} already exists; rerun with --replace to update it")]
    SiteExists {
        /// Conflicting domain.
        domain: String,
    },
    /// Raised when a site references a server the inventory does not know.
    #[error("unknown server: {name}")]
    UnknownServer {
        /// Server name the site referenced.
        name: String,
    },
    /// Raised when removing a server that still hosts sites.
    #[error("server {name} still hosts sites: {}", domains.join(", "))]
    ServerInUse {
        /// Server that was asked to be removed.
        name: String,
        /// Domains still pointing at the server.
        domains: Vec<String>,
    },
}

/// Abstraction over inventory access for dependency injection.
pub trait InventoryStore {
    /// Looks up a server by name.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when the file cannot be read or parsed.
    fn get_server(&self, name: &str) -> Result<Option<Server>, InventoryError>;

    /// Looks up a server by host.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when the file cannot be read or parsed.
    fn find_server_by_host(&self, host: &str) -> Result<Option<Server>, InventoryError>;

    /// Lists all servers, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when the file cannot be read or parsed.
    fn list_servers(&self) -> Result<Vec<Server>, InventoryError>;

    /// Creates or updates a server record, enforcing name and host
    /// uniqueness. Returns the path that was written.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ServerExists`] without `replace`,
    /// [`InventoryError::HostInUse`] when another server owns the host, and
    /// file access errors otherwise.
    fn upsert_server(&self, server: &Server, replace: bool)
    -> Result<Utf8PathBuf, InventoryError>;

    /// Removes a server record. Returns `false` when no record existed.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ServerInUse`] when sites still reference
    /// the server, and file access errors otherwise.
    fn remove_server(&self, name: &str) -> Result<bool, InventoryError>;

    /// Looks up a site by domain.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when the file cannot be read or parsed.
    fn get_site(&self, domain: &str) -> Result<Option<Site>, InventoryError>;

    /// Lists all sites, ordered by domain.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when the file cannot be read or parsed.
    fn list_sites(&self) -> Result<Vec<Site>, InventoryError>;

    /// Creates or updates a site record, enforcing domain uniqueness and
    /// that the owning server exists. Returns the path that was written.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::SiteExists`] without `replace`,
    /// [`InventoryError::UnknownServer`] for dangling references, and file
    /// access errors otherwise.
    fn upsert_site(&self, site: &Site, replace: bool) -> Result<Utf8PathBuf, InventoryError>;

    /// Removes a site record. Returns `false` when no record existed.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when the file cannot be read or written.
    fn remove_site(&self, domain: &str) -> Result<bool, InventoryError>;
}

/// File-backed inventory using `OrthoConfig`'s discovery search order.
#[derive(Clone, Debug)]
pub struct Inventory {
    discovery: ConfigDiscovery,
}

impl Inventory {
    /// Builds an inventory using the standard discovery settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery: ConfigDiscovery::builder(APP_NAME)
                .env_var(INVENTORY_ENV_VAR)
                .config_file_name(INVENTORY_FILE_NAME)
                .dotfile_name(DOTFILE_NAME)
                .project_file_name(PROJECT_FILE_NAME)
                .build(),
        }
    }

    /// Builds an inventory using an explicit discovery configuration.
    #[must_use]
    pub const fn with_discovery(discovery: ConfigDiscovery) -> Self {
        Self { discovery }
    }

    fn resolve_target(&self) -> Result<InventoryTarget, InventoryError> {
        let candidates = self.discovery.utf8_candidates();
        if candidates.is_empty() {
            return Err(InventoryError::NoCandidates);
        }

        for candidate in &candidates {
            if path_exists(candidate)? {
                return Ok(InventoryTarget {
                    path: candidate.clone(),
                    exists: true,
                });
            }
        }

        let fallback = candidates
            .last()
            .cloned()
            .ok_or(InventoryError::NoCandidates)?;
        Ok(InventoryTarget {
            path: fallback,
            exists: false,
        })
    }

    fn load(&self) -> Result<(InventoryTarget, InventoryFile), InventoryError> {
        let target = self.resolve_target()?;
        if !target.exists {
            return Ok((target, InventoryFile::default()));
        }
        let contents = read_file(&target.path)?;
        let parsed = parse_inventory(&target.path, &contents)?;
        Ok((target, parsed))
    }

    fn save(
        &self,
        target: &InventoryTarget,
        file: &InventoryFile,
    ) -> Result<Utf8PathBuf, InventoryError> {
        write_file(&target.path, file)?;
        Ok(target.path.clone())
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryStore for Inventory {
    fn get_server(&self, name: &str) -> Result<Option<Server>, InventoryError> {
        let (_, file) = self.load()?;
        Ok(file
            .servers
            .get(name)
            .map(|stored| stored.to_server(name)))
    }

    fn find_server_by_host(&self, host: &str) -> Result<Option<Server>, InventoryError> {
        let (_, file) = self.load()?;
        Ok(file
            .servers
            .iter()
            .find(|(_, stored)| stored.host == host)
            .map(|(name, stored)| stored.to_server(name)))
    }

    fn list_servers(&self) -> Result<Vec<Server>, InventoryError> {
        let (_, file) = self.load()?;
        Ok(file
            .servers
            .iter()
            .map(|(name, stored)| stored.to_server(name))
            .collect())
    }

    fn upsert_server(
        &self,
        server: &Server,
        replace: bool,
    ) -> Result<Utf8PathBuf, InventoryError> {
        let (target, mut file) = self.load()?;

        if !replace && file.servers.contains_key(&server.name) {
            return Err(InventoryError::ServerExists {
                name: server.name.clone(),
            });
        }
        if let Some((owner, _)) = file
            .servers
            .iter()
            .find(|(name, stored)| stored.host == server.host && **name != server.name)
        {
            return Err(InventoryError::HostInUse {
                host: server.host.clone(),
                owner: owner.clone(),
            });
        }

        file.servers
            .insert(server.name.clone(), StoredServer::from_server(server));
        self.save(&target, &file)
    }

    fn remove_server(&self, name: &str) -> Result<bool, InventoryError> {
        let (target, mut file) = self.load()?;
        if file.servers.remove(name).is_none() {
            return Ok(false);
        }

        let domains: Vec<String> = file
            .sites
            .iter()
            .filter(|(_, stored)| stored.server == name)
            .map(|(domain, _)| domain.clone())
            .collect();
        if !domains.is_empty() {
            return Err(InventoryError::ServerInUse {
                name: name.to_owned(),
                domains,
            });
        }

        self.save(&target, &file)?;
        Ok(true)
    }

    fn get_site(&self, domain: &str) -> Result<Option<Site>, InventoryError> {
        let (_, file) = self.load()?;
        Ok(file.sites.get(domain).map(|stored| stored.to_site(domain)))
    }

    fn list_sites(&self) -> Result<Vec<Site>, InventoryError> {
        let (_, file) = self.load()?;
        Ok(file
            .sites
            .iter()
            .map(|(domain, stored)| stored.to_site(domain))
            .collect())
    }

    fn upsert_site(&self, site: &Site, replace: bool) -> Result<Utf8PathBuf, InventoryError> {
        let (target, mut file) = self.load()?;

        if !replace && file.sites.contains_key(&site.domain) {
            return Err(InventoryError::SiteExists {
                domain: site.domain.clone(),
            });
        }
        if !file.servers.contains_key(&site.server) {
            return Err(InventoryError::UnknownServer {
                name: site.server.clone(),
            });
        }

        file.sites
            .insert(site.domain.clone(), StoredSite::from_site(site));
        self.save(&target, &file)
    }

    fn remove_site(&self, domain: &str) -> Result<bool, InventoryError> {
        let (target, mut file) = self.load()?;
        if file.sites.remove(domain).is_none() {
            return Ok(false);
        }
        self.save(&target, &file)?;
        Ok(true)
    }
}

#[derive(Clone, Debug)]
struct InventoryTarget {
    path: Utf8PathBuf,
    exists: bool,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct InventoryFile {
    #[serde(default)]
    servers: BTreeMap<String, StoredServer>,
    #[serde(default)]
    sites: BTreeMap<String, StoredSite>,
}

const fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

#[derive(Debug, Deserialize, Serialize)]
struct StoredServer {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
}

impl StoredServer {
    fn from_server(server: &Server) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            username: server.username.clone(),
            identity_file: server.identity_file.clone(),
            provider: server.provider.clone(),
            instance_id: server.instance_id.clone(),
        }
    }

    fn to_server(&self, name: &str) -> Server {
        let mut server = Server::new(
            name.to_owned(),
            self.host.clone(),
            self.port,
            Login {
                username: self.username.clone(),
                identity_file: self.identity_file.clone(),
            },
        );
        server.provider = self.provider.clone();
        server.instance_id = self.instance_id.clone();
        server
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct StoredSite {
    server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    repository: Option<String>,
}

impl StoredSite {
    fn from_site(site: &Site) -> Self {
        Self {
            server: site.server.clone(),
            repository: site.repository.clone(),
        }
    }

    fn to_site(&self, domain: &str) -> Site {
        Site {
            domain: domain.to_owned(),
            server: self.server.clone(),
            repository: self.repository.clone(),
        }
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), InventoryError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| InventoryError::Io {
        path: path.to_path_buf(),
        message: String::from("inventory file path is missing a filename"),
    })?;
    Ok((parent, file_name))
}

fn path_exists(path: &Utf8Path) -> Result<bool, InventoryError> {
    let (parent, file_name) = split_path(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(file_name).map_err(|err| InventoryError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(InventoryError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

fn read_file(path: &Utf8Path) -> Result<String, InventoryError> {
    let (parent, file_name) = split_path(path)?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| InventoryError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;
    dir.read_to_string(file_name)
        .map_err(|err| InventoryError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

fn parse_inventory(path: &Utf8Path, contents: &str) -> Result<InventoryFile, InventoryError> {
    if contents.trim().is_empty() {
        return Ok(InventoryFile::default());
    }
    toml::from_str(contents).map_err(|err| InventoryError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn write_file(path: &Utf8Path, file: &InventoryFile) -> Result<(), InventoryError> {
    let (parent, file_name) = split_path(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| InventoryError::Io {
        path: parent.to_path_buf(),
        message: err.to_string(),
    })?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| InventoryError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;

    let rendered = toml::to_string_pretty(file).map_err(|err| InventoryError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    dir.write(file_name, rendered)
        .map_err(|err| InventoryError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}
