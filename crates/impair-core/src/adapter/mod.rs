//! Command adapters: the seam between abstract actions and device APIs.

mod simulated;
mod vyos;

pub use simulated::{SimulatedAdapter, SimulatedCall, SimulatedFault};
pub use vyos::{blackhole_routes, config_ops, ConfigOp, VyosAdapter};

use crate::config::{AdapterConfig, AdapterKind};
use crate::error::{ImpairError, Result};
use crate::router::{DeviceVersion, Interface, RouterNode};
use crate::sequence::Action;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// What the device said about one command.
///
/// `ok == false` is an explicit refusal reported by the device; transport and
/// authentication problems are returned as errors instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterReply {
    pub ok: bool,
    pub detail: String,
}

impl AdapterReply {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Facts read back from a device during discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub version: DeviceVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub interfaces: Vec<Interface>,
}

#[async_trait]
pub trait CommandAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply one action to `router`. Must be safe to call repeatedly.
    async fn execute(&self, router: &RouterNode, action: &Action) -> Result<AdapterReply>;

    /// Read the device's software dialect and interface inventory.
    async fn probe(&self, router: &RouterNode) -> Result<DeviceInfo>;
}

// ---------------------------------------------------------------------------
// Bounded
// ---------------------------------------------------------------------------

/// Enforces a per-call deadline on any adapter.
///
/// On expiry the in-flight request future is dropped, which aborts the
/// request; the call fails with `AdapterTimeout`.
pub struct Bounded {
    inner: Arc<dyn CommandAdapter>,
    timeout: Duration,
}

impl Bounded {
    pub fn new(inner: Arc<dyn CommandAdapter>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl CommandAdapter for Bounded {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn execute(&self, router: &RouterNode, action: &Action) -> Result<AdapterReply> {
        tokio::time::timeout(self.timeout, self.inner.execute(router, action))
            .await
            .map_err(|_| ImpairError::AdapterTimeout(self.timeout))?
    }

    async fn probe(&self, router: &RouterNode) -> Result<DeviceInfo> {
        tokio::time::timeout(self.timeout, self.inner.probe(router))
            .await
            .map_err(|_| ImpairError::AdapterTimeout(self.timeout))?
    }
}

/// Build the configured adapter, wrapped in its timeout.
pub fn from_config(config: &AdapterConfig) -> Result<Arc<dyn CommandAdapter>> {
    let inner: Arc<dyn CommandAdapter> = match &config.kind {
        AdapterKind::Simulated { latency_ms } => Arc::new(
            SimulatedAdapter::new().with_latency(Duration::from_millis(*latency_ms)),
        ),
        AdapterKind::Vyos { verify_tls } => Arc::new(VyosAdapter::new(*verify_tls)?),
    };
    Ok(Arc::new(Bounded::new(inner, config.timeout())))
}
