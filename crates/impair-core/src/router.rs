//! Router directory: the inventory of devices sequences can target.
//!
//! Each router lives in its own YAML manifest under `.impair/routers/`.

use crate::error::{ImpairError, Result};
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Interface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            addresses: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceVersion
// ---------------------------------------------------------------------------

/// Configuration dialect spoken by the device API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceVersion {
    #[serde(rename = "1.4")]
    V1_4,
    #[default]
    #[serde(rename = "1.5")]
    V1_5,
}

impl DeviceVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceVersion::V1_4 => "1.4",
            DeviceVersion::V1_5 => "1.5",
        }
    }
}

// ---------------------------------------------------------------------------
// RouterNode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Management address (host or host:port) of the device API.
    pub address: String,
    /// Reference to the API credential, e.g. `env:EDGE1_API_KEY` or a
    /// literal key for lab devices.
    pub credential: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub version: DeviceVersion,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl RouterNode {
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            address: address.into(),
            credential: credential.into(),
            enabled: true,
            version: DeviceVersion::default(),
            interfaces: Vec::new(),
            last_seen: None,
        }
    }

    pub fn with_interfaces<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = names.into_iter().map(Interface::new).collect();
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// An empty inventory means "not yet discovered", which accepts any name.
    pub fn has_interface(&self, name: &str) -> bool {
        self.interfaces.is_empty() || self.interfaces.iter().any(|i| i.name == name)
    }

    /// Resolve the credential reference to the secret value.
    ///
    /// `env:NAME` reads the named environment variable; anything else is used
    /// verbatim.
    pub fn resolve_credential(&self) -> Result<String> {
        match self.credential.strip_prefix("env:") {
            Some(var) => std::env::var(var).map_err(|_| {
                ImpairError::AuthRejected(format!(
                    "{}: credential variable {var} is not set",
                    self.id
                ))
            }),
            None => Ok(self.credential.clone()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        paths::validate_id(&self.id)?;
        if self.address.trim().is_empty() {
            return Err(ImpairError::validation(format!(
                "router '{}' has an empty address",
                self.id
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for iface in &self.interfaces {
            if iface.name.trim().is_empty() {
                return Err(ImpairError::validation(format!(
                    "router '{}' has an interface with an empty name",
                    self.id
                )));
            }
            if !seen.insert(iface.name.as_str()) {
                return Err(ImpairError::validation(format!(
                    "router '{}' lists interface '{}' twice",
                    self.id, iface.name
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RouterDirectory
// ---------------------------------------------------------------------------

/// File-backed CRUD over router manifests.
#[derive(Debug, Clone)]
pub struct RouterDirectory {
    root: PathBuf,
}

impl RouterDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, id: &str) -> Result<RouterNode> {
        paths::validate_id(id)?;
        let path = paths::router_path(&self.root, id);
        if !path.exists() {
            return Err(ImpairError::RouterNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn list(&self) -> Result<Vec<RouterNode>> {
        let mut routers: Vec<RouterNode> = io::read_yaml_dir(&paths::routers_dir(&self.root))?;
        routers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(routers)
    }

    pub fn exists(&self, id: &str) -> bool {
        paths::validate_id(id).is_ok() && paths::router_path(&self.root, id).exists()
    }

    pub fn create(&self, router: &RouterNode) -> Result<()> {
        router.validate()?;
        paths::validate_id(&router.id)?;
        let lock = io::record_lock(&paths::router_path(&self.root, &router.id));
        let _held = io::hold(&lock);
        if self.exists(&router.id) {
            return Err(ImpairError::RouterExists(router.id.clone()));
        }
        self.write(router)
    }

    /// Replace an existing router manifest.
    ///
    /// `last_seen` is kept from the saved copy when the incoming one is older
    /// or missing.
    pub fn update(&self, router: &RouterNode) -> Result<RouterNode> {
        router.validate()?;
        self.modify(&router.id, |stored| {
            let last_seen = stored.last_seen.max(router.last_seen);
            *stored = router.clone();
            stored.last_seen = last_seen;
        })
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        paths::validate_id(id)?;
        let path = paths::router_path(&self.root, id);
        let lock = io::record_lock(&path);
        let _held = io::hold(&lock);
        if !path.exists() {
            return Err(ImpairError::RouterNotFound(id.to_string()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Record a successful contact with the device.
    pub fn mark_seen(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.modify(id, |router| {
            router.last_seen = router.last_seen.max(Some(at));
        })?;
        Ok(())
    }

    /// Apply `change` to the stored manifest while holding its record lock.
    pub fn modify(&self, id: &str, change: impl FnOnce(&mut RouterNode)) -> Result<RouterNode> {
        paths::validate_id(id)?;
        let lock = io::record_lock(&paths::router_path(&self.root, id));
        let _held = io::hold(&lock);
        let mut router = self.get(id)?;
        change(&mut router);
        router.validate()?;
        self.write(&router)?;
        Ok(router)
    }

    fn write(&self, router: &RouterNode) -> Result<()> {
        let data = serde_yaml::to_string(router)?;
        io::atomic_write(&paths::router_path(&self.root, &router.id), data.as_bytes())
    }
}
