//! HTTPS adapter for VyOS-style configuration APIs.
//!
//! Every request is a multipart form with a JSON `data` field and the API
//! `key`. Changes go to `/configure` as a list of set/delete operations;
//! reads go to `/retrieve` with `showConfig`.

use super::{AdapterReply, CommandAdapter, DeviceInfo};
use crate::error::{ImpairError, Result};
use crate::router::{DeviceVersion, Interface, RouterNode};
use crate::sequence::Action;
use crate::types::{CommandKind, CommandParams};
use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Tag marking blackhole routes owned by this tool.
const BLOCK_TAG: &str = "999";

// ---------------------------------------------------------------------------
// Operation translation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigOp {
    pub op: &'static str,
    pub path: Vec<String>,
}

impl ConfigOp {
    fn set<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op: "set",
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    fn delete<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op: "delete",
            path: path.into_iter().map(Into::into).collect(),
        }
    }
}

fn policy_name(iface: &str) -> String {
    format!("LAB_COMBINED_{iface}")
}

// Device percentages are whole numbers.
fn pct(v: f64) -> String {
    (v.trunc() as u64).to_string()
}

fn qos_ops(iface: &str, params: &CommandParams, version: DeviceVersion) -> Vec<ConfigOp> {
    let pol = policy_name(iface);
    let (base, delay, loss, corruption, reorder, gap, rate): (Vec<&str>, _, _, _, _, _, _) =
        match version {
            DeviceVersion::V1_4 => (
                vec!["traffic-policy", "network-emulator", pol.as_str()],
                "network-delay",
                "packet-loss",
                "packet-corruption",
                "packet-reordering",
                "packet-reordering-correlation",
                "bandwidth",
            ),
            DeviceVersion::V1_5 => (
                vec!["qos", "policy", "network-emulator", pol.as_str()],
                "delay",
                "loss",
                "corruption",
                "reordering",
                "reordering-gap",
                "rate",
            ),
        };

    let leaf = |key: &str, value: String| {
        let mut path: Vec<String> = base.iter().map(|s| s.to_string()).collect();
        path.push(key.to_string());
        path.push(value);
        ConfigOp::set(path)
    };

    let mut ops = Vec::new();
    if let Some(ms) = params.latency_ms {
        ops.push(leaf(delay, ms.to_string()));
    }
    if let Some(p) = params.loss_percent {
        ops.push(leaf(loss, pct(p)));
    }
    if let Some(p) = params.corruption_percent {
        ops.push(leaf(corruption, pct(p)));
    }
    if let Some(p) = params.reorder_percent {
        ops.push(leaf(reorder, pct(p)));
        if let Some(g) = params.reorder_gap {
            ops.push(leaf(gap, g.to_string()));
        }
    }
    if let Some(r) = &params.rate {
        ops.push(leaf(rate, r.clone()));
    }

    ops.push(match version {
        DeviceVersion::V1_4 => ConfigOp::set([
            "interfaces",
            "ethernet",
            iface,
            "traffic-policy",
            "out",
            pol.as_str(),
        ]),
        DeviceVersion::V1_5 => ConfigOp::set(["qos", "interface", iface, "egress", pol.as_str()]),
    });
    ops
}

fn clear_qos_ops(iface: &str, version: DeviceVersion) -> Vec<ConfigOp> {
    let pol = policy_name(iface);
    match version {
        DeviceVersion::V1_4 => vec![
            ConfigOp::delete(["interfaces", "ethernet", iface, "traffic-policy", "out"]),
            ConfigOp::delete(["traffic-policy", "network-emulator", pol.as_str()]),
        ],
        DeviceVersion::V1_5 => vec![
            ConfigOp::delete(["qos", "interface", iface, "egress"]),
            ConfigOp::delete(["qos", "policy", "network-emulator", pol.as_str()]),
        ],
    }
}

/// Translate an action into configuration operations.
///
/// `show-denied` and `clear-all-blocks` depend on current device state and
/// produce no static operations.
pub fn config_ops(action: &Action, version: DeviceVersion) -> Vec<ConfigOp> {
    let iface = action.interface.as_deref().unwrap_or_default();
    let prefix = action.params.ip.as_deref().unwrap_or_default();
    match action.command {
        CommandKind::InterfaceDown => {
            vec![ConfigOp::set(["interfaces", "ethernet", iface, "disable"])]
        }
        CommandKind::InterfaceUp => {
            vec![ConfigOp::delete(["interfaces", "ethernet", iface, "disable"])]
        }
        CommandKind::SetQos => qos_ops(iface, &action.params, version),
        CommandKind::ClearQos => clear_qos_ops(iface, version),
        CommandKind::DenyTraffic => vec![ConfigOp::set([
            "protocols",
            "static",
            "route",
            prefix,
            "blackhole",
            "tag",
            BLOCK_TAG,
        ])],
        CommandKind::AllowTraffic => {
            vec![ConfigOp::delete(["protocols", "static", "route", prefix])]
        }
        CommandKind::ShowDenied | CommandKind::ClearAllBlocks => Vec::new(),
    }
}

/// Prefixes with a blackhole route carrying our tag, sorted.
pub fn blackhole_routes(config: &Value) -> Vec<String> {
    let Some(routes) = config
        .pointer("/protocols/static/route")
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };
    let mut out: Vec<String> = routes
        .iter()
        .filter(|(_, route)| {
            route
                .get("blackhole")
                .and_then(|b| b.get("tag"))
                .and_then(Value::as_str)
                == Some(BLOCK_TAG)
        })
        .map(|(prefix, _)| prefix.clone())
        .collect();
    out.sort();
    out
}

fn detect_version(config: &Value) -> DeviceVersion {
    if config.get("traffic-policy").is_some() {
        return DeviceVersion::V1_4;
    }
    if let Some(fw) = config.get("firewall") {
        return if fw.get("ipv4").is_some() || fw.get("ipv6").is_some() {
            DeviceVersion::V1_5
        } else {
            DeviceVersion::V1_4
        };
    }
    DeviceVersion::V1_5
}

fn ethernet_interfaces(config: &Value) -> Vec<Interface> {
    let Some(ethernet) = config
        .pointer("/interfaces/ethernet")
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };
    let mut out: Vec<Interface> = ethernet
        .iter()
        .map(|(name, data)| Interface {
            name: name.clone(),
            description: data
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            addresses: match data.get("address") {
                Some(Value::String(a)) => vec![a.clone()],
                Some(Value::Array(list)) => list
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            },
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn render_blocked(blocked: &[String]) -> String {
    if blocked.is_empty() {
        "no blocked prefixes".to_string()
    } else {
        format!("{} blocked: {}", blocked.len(), blocked.join(", "))
    }
}

// ---------------------------------------------------------------------------
// VyosAdapter
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

pub struct VyosAdapter {
    client: reqwest::Client,
}

impl VyosAdapter {
    pub fn new(verify_tls: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ImpairError::validation(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn base_url(router: &RouterNode) -> String {
        let addr = router.address.trim().trim_end_matches('/');
        if addr.contains("://") {
            addr.to_string()
        } else {
            format!("https://{addr}")
        }
    }

    async fn post(&self, router: &RouterNode, endpoint: &str, data: String) -> Result<ApiResponse> {
        let key = router.resolve_credential()?;
        let url = format!("{}/{endpoint}", Self::base_url(router));
        debug!(router = %router.id, %url, "device request");

        let form = Form::new().text("data", data).text("key", key);
        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ImpairError::NodeUnreachable(format!("{}: {e}", router.id)))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ImpairError::AuthRejected(router.id.clone()));
        }
        let body: ApiResponse = resp.json().await.map_err(|e| {
            ImpairError::CommandRejected(format!(
                "{}: unreadable response (HTTP {status}): {e}",
                router.id
            ))
        })?;
        if !body.success {
            return Err(ImpairError::CommandRejected(format!(
                "{}: {}",
                router.id,
                body.error.as_deref().unwrap_or("unknown device error")
            )));
        }
        Ok(body)
    }

    async fn configure(&self, router: &RouterNode, ops: &[ConfigOp]) -> Result<()> {
        let data = serde_json::to_string(ops)?;
        self.post(router, "configure", data).await?;
        Ok(())
    }

    async fn retrieve(&self, router: &RouterNode) -> Result<Value> {
        let data = serde_json::json!({ "op": "showConfig", "path": [] }).to_string();
        Ok(self.post(router, "retrieve", data).await?.data)
    }
}

#[async_trait]
impl CommandAdapter for VyosAdapter {
    fn name(&self) -> &'static str {
        "vyos"
    }

    async fn execute(&self, router: &RouterNode, action: &Action) -> Result<AdapterReply> {
        let prefix = action.params.ip.clone().unwrap_or_default();
        match action.command {
            CommandKind::ShowDenied => {
                let blocked = blackhole_routes(&self.retrieve(router).await?);
                Ok(AdapterReply::ok(render_blocked(&blocked)))
            }
            CommandKind::ClearAllBlocks => {
                let blocked = blackhole_routes(&self.retrieve(router).await?);
                if blocked.is_empty() {
                    return Ok(AdapterReply::ok("no blocked prefixes"));
                }
                let ops: Vec<ConfigOp> = blocked
                    .iter()
                    .map(|p| ConfigOp::delete(["protocols", "static", "route", p.as_str()]))
                    .collect();
                self.configure(router, &ops).await?;
                Ok(AdapterReply::ok(format!(
                    "removed {} blocked prefix(es): {}",
                    blocked.len(),
                    blocked.join(", ")
                )))
            }
            CommandKind::DenyTraffic => {
                let blocked = blackhole_routes(&self.retrieve(router).await?);
                if blocked.contains(&prefix) {
                    return Ok(AdapterReply::ok(format!("{prefix} already blocked")));
                }
                self.configure(router, &config_ops(action, router.version))
                    .await?;
                Ok(AdapterReply::ok(format!("blocked {prefix}")))
            }
            CommandKind::AllowTraffic => {
                let blocked = blackhole_routes(&self.retrieve(router).await?);
                if !blocked.contains(&prefix) {
                    return Ok(AdapterReply::failed(format!(
                        "{prefix} is not blocked (tag {BLOCK_TAG} not found)"
                    )));
                }
                self.configure(router, &config_ops(action, router.version))
                    .await?;
                Ok(AdapterReply::ok(format!("unblocked {prefix}")))
            }
            _ => {
                let ops = config_ops(action, router.version);
                self.configure(router, &ops).await?;
                Ok(AdapterReply::ok(format!(
                    "{} on {}: {} operation(s) applied",
                    action.command,
                    action.target(),
                    ops.len()
                )))
            }
        }
    }

    async fn probe(&self, router: &RouterNode) -> Result<DeviceInfo> {
        let config = self.retrieve(router).await?;
        Ok(DeviceInfo {
            version: detect_version(&config),
            hostname: config
                .pointer("/system/host-name")
                .and_then(Value::as_str)
                .map(str::to_string),
            interfaces: ethernet_interfaces(&config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn paths(ops: &[ConfigOp]) -> Vec<String> {
        ops.iter()
            .map(|o| format!("{} {}", o.op, o.path.join(" ")))
            .collect()
    }

    fn qos_action() -> Action {
        Action::new(0, "edge-1", CommandKind::SetQos)
            .on_interface("eth1")
            .with_params(CommandParams {
                latency_ms: Some(80),
                loss_percent: Some(2.5),
                reorder_percent: Some(10.0),
                reorder_gap: Some(5),
                rate: Some("5mbit".into()),
                ..Default::default()
            })
    }

    #[test]
    fn interface_toggle_ops() {
        let down = Action::new(0, "edge-1", CommandKind::InterfaceDown).on_interface("eth1");
        assert_eq!(
            paths(&config_ops(&down, DeviceVersion::V1_5)),
            vec!["set interfaces ethernet eth1 disable"]
        );
        let up = Action::new(0, "edge-1", CommandKind::InterfaceUp).on_interface("eth1");
        assert_eq!(
            paths(&config_ops(&up, DeviceVersion::V1_4)),
            vec!["delete interfaces ethernet eth1 disable"]
        );
    }

    #[test]
    fn qos_ops_in_modern_dialect() {
        assert_eq!(
            paths(&config_ops(&qos_action(), DeviceVersion::V1_5)),
            vec![
                "set qos policy network-emulator LAB_COMBINED_eth1 delay 80",
                "set qos policy network-emulator LAB_COMBINED_eth1 loss 2",
                "set qos policy network-emulator LAB_COMBINED_eth1 reordering 10",
                "set qos policy network-emulator LAB_COMBINED_eth1 reordering-gap 5",
                "set qos policy network-emulator LAB_COMBINED_eth1 rate 5mbit",
                "set qos interface eth1 egress LAB_COMBINED_eth1",
            ]
        );
    }

    #[test]
    fn qos_ops_in_legacy_dialect() {
        let ops = paths(&config_ops(&qos_action(), DeviceVersion::V1_4));
        assert_eq!(
            ops.first().map(String::as_str),
            Some("set traffic-policy network-emulator LAB_COMBINED_eth1 network-delay 80")
        );
        assert!(ops.contains(
            &"set traffic-policy network-emulator LAB_COMBINED_eth1 packet-reordering-correlation 5"
                .to_string()
        ));
        assert_eq!(
            ops.last().map(String::as_str),
            Some("set interfaces ethernet eth1 traffic-policy out LAB_COMBINED_eth1")
        );
    }

    #[test]
    fn clear_qos_detaches_then_deletes_policy() {
        let clear = Action::new(0, "edge-1", CommandKind::ClearQos).on_interface("eth1");
        assert_eq!(
            paths(&config_ops(&clear, DeviceVersion::V1_5)),
            vec![
                "delete qos interface eth1 egress",
                "delete qos policy network-emulator LAB_COMBINED_eth1",
            ]
        );
    }

    #[test]
    fn deny_and_allow_use_tagged_blackhole_routes() {
        let deny = Action::new(0, "edge-1", CommandKind::DenyTraffic)
            .with_params(CommandParams::subnet("8.8.8.8/32"));
        assert_eq!(
            paths(&config_ops(&deny, DeviceVersion::V1_5)),
            vec!["set protocols static route 8.8.8.8/32 blackhole tag 999"]
        );
        let allow = Action::new(0, "edge-1", CommandKind::AllowTraffic)
            .with_params(CommandParams::subnet("8.8.8.8/32"));
        assert_eq!(
            paths(&config_ops(&allow, DeviceVersion::V1_5)),
            vec!["delete protocols static route 8.8.8.8/32"]
        );
    }

    #[test]
    fn blackhole_routes_only_counts_our_tag() {
        let config = json!({
            "protocols": { "static": { "route": {
                "8.8.8.8/32": { "blackhole": { "tag": "999" } },
                "1.1.1.0/24": { "blackhole": { "tag": "999" } },
                "10.0.0.0/8": { "blackhole": { "tag": "5" } },
                "0.0.0.0/0": { "next-hop": { "192.168.1.1": {} } }
            }}}
        });
        assert_eq!(blackhole_routes(&config), vec!["1.1.1.0/24", "8.8.8.8/32"]);
        assert!(blackhole_routes(&json!({})).is_empty());
    }

    #[test]
    fn discovery_reads_version_and_interfaces() {
        let config = json!({
            "firewall": { "ipv4": {} },
            "system": { "host-name": "edge-lab" },
            "interfaces": { "ethernet": {
                "eth1": { "address": ["10.1.0.1/24", "fd00::1/64"] },
                "eth0": { "address": "dhcp", "description": "WAN" }
            }}
        });
        assert_eq!(detect_version(&config), DeviceVersion::V1_5);
        assert_eq!(detect_version(&json!({ "traffic-policy": {} })), DeviceVersion::V1_4);
        let ifaces = ethernet_interfaces(&config);
        assert_eq!(ifaces[0].name, "eth0");
        assert_eq!(ifaces[0].description.as_deref(), Some("WAN"));
        assert_eq!(ifaces[1].addresses.len(), 2);
    }

    fn router_at(url: &str) -> RouterNode {
        RouterNode::new("edge-1", url, "lab-key")
    }

    #[tokio::test]
    async fn deny_posts_blackhole_after_reading_config() {
        let mut server = mockito::Server::new_async().await;
        let retrieve = server
            .mock("POST", "/retrieve")
            .match_body(Matcher::Regex("showConfig".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "data": {}, "error": null}"#)
            .create_async()
            .await;
        let configure = server
            .mock("POST", "/configure")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("blackhole".into()),
                Matcher::Regex("lab-key".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "data": null, "error": null}"#)
            .create_async()
            .await;

        let adapter = VyosAdapter::new(false).unwrap();
        let deny = Action::new(0, "edge-1", CommandKind::DenyTraffic)
            .with_params(CommandParams::subnet("8.8.8.8/32"));
        let reply = adapter.execute(&router_at(&server.url()), &deny).await.unwrap();

        assert!(reply.ok);
        assert_eq!(reply.detail, "blocked 8.8.8.8/32");
        retrieve.assert_async().await;
        configure.assert_async().await;
    }

    #[tokio::test]
    async fn device_error_becomes_command_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/configure")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": false, "data": null, "error": "Configuration path is not valid"}"#)
            .create_async()
            .await;

        let adapter = VyosAdapter::new(false).unwrap();
        let down = Action::new(0, "edge-1", CommandKind::InterfaceDown).on_interface("eth9");
        let err = adapter
            .execute(&router_at(&server.url()), &down)
            .await
            .unwrap_err();
        match err {
            ImpairError::CommandRejected(msg) => assert!(msg.contains("not valid"), "{msg}"),
            other => panic!("expected CommandRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forbidden_is_auth_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/retrieve")
            .with_status(403)
            .create_async()
            .await;

        let adapter = VyosAdapter::new(false).unwrap();
        let show = Action::new(0, "edge-1", CommandKind::ShowDenied);
        assert!(matches!(
            adapter.execute(&router_at(&server.url()), &show).await,
            Err(ImpairError::AuthRejected(_))
        ));
    }

    #[tokio::test]
    async fn allow_of_unblocked_prefix_is_refused_without_configuring() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/retrieve")
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "data": {"protocols": {}}}"#)
            .create_async()
            .await;
        let configure = server
            .mock("POST", "/configure")
            .expect(0)
            .create_async()
            .await;

        let adapter = VyosAdapter::new(false).unwrap();
        let allow = Action::new(0, "edge-1", CommandKind::AllowTraffic)
            .with_params(CommandParams::subnet("1.1.1.0/24"));
        let reply = adapter
            .execute(&router_at(&server.url()), &allow)
            .await
            .unwrap();
        assert!(!reply.ok);
        configure.assert_async().await;
    }
}
