use super::{AdapterReply, CommandAdapter, DeviceInfo};
use crate::error::{ImpairError, Result};
use crate::router::{Interface, RouterNode};
use crate::sequence::Action;
use crate::types::CommandKind;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A scripted misbehaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedFault {
    Unreachable,
    AuthRejected,
    /// The device answers but refuses the change.
    Refuse(String),
    /// Never answers.
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedCall {
    pub router_id: String,
    pub action_id: String,
    pub command: CommandKind,
    pub interface: Option<String>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Script {
    by_action: HashMap<String, SimulatedFault>,
    by_router: HashMap<String, SimulatedFault>,
}

impl Script {
    fn lookup(&self, router: &RouterNode, action: &Action) -> Option<SimulatedFault> {
        self.by_action
            .get(&action.id)
            .or_else(|| self.by_router.get(&router.id))
            .cloned()
    }
}

/// Device state as the simulator sees it, per router.
#[derive(Debug, Default)]
struct DeviceState {
    down: BTreeSet<String>,
    shaped: BTreeSet<String>,
    blocked: BTreeSet<String>,
}

/// In-process adapter for dry runs and tests. Tracks the state commands
/// would leave on a device and records every call.
#[derive(Debug, Default)]
pub struct SimulatedAdapter {
    latency: Duration,
    script: Mutex<Script>,
    devices: Mutex<HashMap<String, DeviceState>>,
    calls: Mutex<Vec<SimulatedCall>>,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn script_action(&self, action_id: impl Into<String>, fault: SimulatedFault) {
        self.script
            .lock()
            .await
            .by_action
            .insert(action_id.into(), fault);
    }

    pub async fn script_router(&self, router_id: impl Into<String>, fault: SimulatedFault) {
        self.script
            .lock()
            .await
            .by_router
            .insert(router_id.into(), fault);
    }

    pub async fn calls(&self) -> Vec<SimulatedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn blocked(&self, router_id: &str) -> Vec<String> {
        self.devices
            .lock()
            .await
            .get(router_id)
            .map(|d| d.blocked.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn apply(&self, router: &RouterNode, action: &Action) -> AdapterReply {
        let mut devices = self.devices.lock().await;
        let device = devices.entry(router.id.clone()).or_default();
        let iface = action.interface.clone().unwrap_or_default();
        let prefix = action.params.ip.clone().unwrap_or_default();

        match action.command {
            CommandKind::InterfaceDown => {
                device.down.insert(iface.clone());
                AdapterReply::ok(format!("{iface} disabled"))
            }
            CommandKind::InterfaceUp => {
                device.down.remove(&iface);
                AdapterReply::ok(format!("{iface} enabled"))
            }
            CommandKind::SetQos => {
                device.shaped.insert(iface.clone());
                AdapterReply::ok(format!("{iface} shaped: {}", action.params.summary()))
            }
            CommandKind::ClearQos => {
                device.shaped.remove(&iface);
                AdapterReply::ok(format!("{iface} shaping cleared"))
            }
            CommandKind::DenyTraffic => {
                if device.blocked.insert(prefix.clone()) {
                    AdapterReply::ok(format!("blocked {prefix}"))
                } else {
                    AdapterReply::ok(format!("{prefix} already blocked"))
                }
            }
            CommandKind::AllowTraffic => {
                if device.blocked.remove(&prefix) {
                    AdapterReply::ok(format!("unblocked {prefix}"))
                } else {
                    AdapterReply::failed(format!("{prefix} is not blocked"))
                }
            }
            CommandKind::ShowDenied => AdapterReply::ok(render_blocked(&device.blocked)),
            CommandKind::ClearAllBlocks => {
                let n = device.blocked.len();
                device.blocked.clear();
                AdapterReply::ok(format!("removed {n} blocked prefix(es)"))
            }
        }
    }
}

fn render_blocked(blocked: &BTreeSet<String>) -> String {
    if blocked.is_empty() {
        "no blocked prefixes".to_string()
    } else {
        let list: Vec<&str> = blocked.iter().map(String::as_str).collect();
        format!("{} blocked: {}", list.len(), list.join(", "))
    }
}

#[async_trait]
impl CommandAdapter for SimulatedAdapter {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn execute(&self, router: &RouterNode, action: &Action) -> Result<AdapterReply> {
        self.calls.lock().await.push(SimulatedCall {
            router_id: router.id.clone(),
            action_id: action.id.clone(),
            command: action.command,
            interface: action.interface.clone(),
            at: Instant::now(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let fault = self.script.lock().await.lookup(router, action);
        match fault {
            None => Ok(self.apply(router, action).await),
            Some(SimulatedFault::Unreachable) => {
                Err(ImpairError::NodeUnreachable(router.address.clone()))
            }
            Some(SimulatedFault::AuthRejected) => Err(ImpairError::AuthRejected(router.id.clone())),
            Some(SimulatedFault::Refuse(reason)) => Ok(AdapterReply::failed(reason)),
            Some(SimulatedFault::Hang) => std::future::pending().await,
        }
    }

    async fn probe(&self, router: &RouterNode) -> Result<DeviceInfo> {
        if let Some(SimulatedFault::Unreachable) = self.script.lock().await.by_router.get(&router.id) {
            return Err(ImpairError::NodeUnreachable(router.address.clone()));
        }
        let interfaces = if router.interfaces.is_empty() {
            ["eth0", "eth1", "eth2"].into_iter().map(Interface::new).collect()
        } else {
            router.interfaces.clone()
        };
        Ok(DeviceInfo {
            version: router.version,
            hostname: Some(router.id.clone()),
            interfaces,
        })
    }
}
