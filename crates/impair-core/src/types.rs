use crate::error::{ImpairError, Result};
use ipnetwork::IpNetwork;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// CommandKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    InterfaceDown,
    InterfaceUp,
    SetQos,
    ClearQos,
    DenyTraffic,
    AllowTraffic,
    ShowDenied,
    ClearAllBlocks,
}

impl CommandKind {
    pub fn all() -> &'static [CommandKind] {
        &[
            CommandKind::InterfaceDown,
            CommandKind::InterfaceUp,
            CommandKind::SetQos,
            CommandKind::ClearQos,
            CommandKind::DenyTraffic,
            CommandKind::AllowTraffic,
            CommandKind::ShowDenied,
            CommandKind::ClearAllBlocks,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::InterfaceDown => "interface-down",
            CommandKind::InterfaceUp => "interface-up",
            CommandKind::SetQos => "set-qos",
            CommandKind::ClearQos => "clear-qos",
            CommandKind::DenyTraffic => "deny-traffic",
            CommandKind::AllowTraffic => "allow-traffic",
            CommandKind::ShowDenied => "show-denied",
            CommandKind::ClearAllBlocks => "clear-all-blocks",
        }
    }

    /// Commands that act on the router's routing table rather than on one
    /// interface. They never carry an interface name.
    pub fn is_router_scoped(self) -> bool {
        matches!(
            self,
            CommandKind::DenyTraffic
                | CommandKind::AllowTraffic
                | CommandKind::ShowDenied
                | CommandKind::ClearAllBlocks
        )
    }

    pub fn requires_subnet(self) -> bool {
        matches!(self, CommandKind::DenyTraffic | CommandKind::AllowTraffic)
    }

    /// Check `params` against this command and return them normalized.
    ///
    /// Subnets are normalized to their network address; a bare address
    /// becomes a host prefix.
    pub fn normalize_params(self, params: &CommandParams) -> Result<CommandParams> {
        let mut out = params.clone();

        if self != CommandKind::SetQos && params.has_qos() {
            return Err(ImpairError::validation(format!(
                "{self} does not accept QoS parameters"
            )));
        }

        if self.requires_subnet() {
            let ip = params
                .ip
                .as_deref()
                .ok_or_else(|| ImpairError::validation(format!("{self} requires an 'ip' subnet")))?;
            out.ip = Some(normalize_prefix(ip)?);
        } else if params.ip.is_some() {
            return Err(ImpairError::validation(format!(
                "{self} does not accept an 'ip' parameter"
            )));
        }

        if self == CommandKind::SetQos {
            validate_qos(params)?;
        }

        Ok(out)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandKind {
    type Err = ImpairError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CommandKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ImpairError::validation(format!("unknown command '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// CommandParams
// ---------------------------------------------------------------------------

/// Kind-specific command parameters. Only the fields relevant to the command
/// are populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corruption_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reorder_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reorder_gap: Option<u32>,
    /// Bandwidth cap in device notation, e.g. `10mbit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    /// CIDR subnet for deny/allow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl CommandParams {
    pub fn subnet(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Default::default()
        }
    }

    pub fn has_qos(&self) -> bool {
        self.latency_ms.is_some()
            || self.loss_percent.is_some()
            || self.corruption_percent.is_some()
            || self.reorder_percent.is_some()
            || self.reorder_gap.is_some()
            || self.rate.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_qos() && self.ip.is_none()
    }

    /// Compact `key=value` rendering used in tables and search.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ms) = self.latency_ms {
            parts.push(format!("latency={ms}ms"));
        }
        if let Some(p) = self.loss_percent {
            parts.push(format!("loss={p}%"));
        }
        if let Some(p) = self.corruption_percent {
            parts.push(format!("corruption={p}%"));
        }
        if let Some(p) = self.reorder_percent {
            parts.push(format!("reorder={p}%"));
        }
        if let Some(g) = self.reorder_gap {
            parts.push(format!("gap={g}"));
        }
        if let Some(r) = &self.rate {
            parts.push(format!("rate={r}"));
        }
        if let Some(ip) = &self.ip {
            parts.push(format!("ip={ip}"));
        }
        parts.join(" ")
    }
}

fn validate_percent(name: &str, value: Option<f64>) -> Result<()> {
    if let Some(v) = value {
        if !(0.0..=100.0).contains(&v) {
            return Err(ImpairError::validation(format!(
                "{name} must be between 0 and 100, got {v}"
            )));
        }
    }
    Ok(())
}

static RATE_RE: OnceLock<Regex> = OnceLock::new();

fn rate_re() -> &'static Regex {
    RATE_RE.get_or_init(|| Regex::new(r"^[0-9]+(\.[0-9]+)?[a-zA-Z]*$").unwrap())
}

fn validate_qos(params: &CommandParams) -> Result<()> {
    if !params.has_qos() {
        return Err(ImpairError::validation(
            "set-qos needs at least one of latency_ms, loss_percent, corruption_percent, \
             reorder_percent or rate",
        ));
    }
    validate_percent("loss_percent", params.loss_percent)?;
    validate_percent("corruption_percent", params.corruption_percent)?;
    validate_percent("reorder_percent", params.reorder_percent)?;
    if params.reorder_gap.is_some() && params.reorder_percent.is_none() {
        return Err(ImpairError::validation(
            "reorder_gap is only meaningful together with reorder_percent",
        ));
    }
    if let Some(rate) = &params.rate {
        if !rate_re().is_match(rate) {
            return Err(ImpairError::validation(format!(
                "rate '{rate}' must look like '10mbit' or '500kbit'"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subnet normalization
// ---------------------------------------------------------------------------

/// Parse an address or CIDR prefix and return it in canonical network form.
///
/// `10.1.2.3` becomes `10.1.2.3/32`, `10.1.2.3/24` becomes `10.1.2.0/24`.
pub fn normalize_prefix(input: &str) -> Result<String> {
    let input = input.trim();
    let invalid = |reason: String| {
        ImpairError::validation(format!("invalid IP address or prefix '{input}': {reason}"))
    };

    let network = if input.contains('/') {
        input
            .parse::<IpNetwork>()
            .map_err(|e| invalid(e.to_string()))?
    } else {
        let addr: IpAddr = input.parse().map_err(|e: std::net::AddrParseError| invalid(e.to_string()))?;
        let host_len = if addr.is_ipv4() { 32 } else { 128 };
        IpNetwork::new(addr, host_len).map_err(|e| invalid(e.to_string()))?
    };

    let canonical =
        IpNetwork::new(network.network(), network.prefix()).map_err(|e| invalid(e.to_string()))?;
    Ok(canonical.to_string())
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Final result of one action or one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutcomeStatus {
    type Err = ImpairError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(OutcomeStatus::Success),
            "failed" => Ok(OutcomeStatus::Failed),
            _ => Err(ImpairError::validation(format!("unknown status '{s}'"))),
        }
    }
}

/// Status carried by a live step event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Success,
    Failed,
}

impl From<OutcomeStatus> for StepStatus {
    fn from(s: OutcomeStatus) -> Self {
        match s {
            OutcomeStatus::Success => StepStatus::Success,
            OutcomeStatus::Failed => StepStatus::Failed,
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Scheduled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_kind_str_roundtrip() {
        for kind in CommandKind::all() {
            let parsed: CommandKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, *kind);
        }
        assert!("reboot".parse::<CommandKind>().is_err());
    }

    #[test]
    fn command_kind_serde_is_kebab() {
        let yaml = serde_yaml::to_string(&CommandKind::ClearAllBlocks).unwrap();
        assert_eq!(yaml.trim(), "clear-all-blocks");
    }

    #[test]
    fn router_scoped_kinds() {
        assert!(CommandKind::DenyTraffic.is_router_scoped());
        assert!(CommandKind::ClearAllBlocks.is_router_scoped());
        assert!(CommandKind::ShowDenied.is_router_scoped());
        assert!(!CommandKind::InterfaceDown.is_router_scoped());
        assert!(!CommandKind::SetQos.is_router_scoped());
    }

    #[test]
    fn normalize_prefix_bare_address_gets_host_mask() {
        assert_eq!(normalize_prefix("8.8.8.8").unwrap(), "8.8.8.8/32");
        assert_eq!(normalize_prefix("2001:db8::1").unwrap(), "2001:db8::1/128");
    }

    #[test]
    fn normalize_prefix_uses_network_address() {
        assert_eq!(normalize_prefix("192.168.203.77/24").unwrap(), "192.168.203.0/24");
    }

    #[test]
    fn normalize_prefix_rejects_bad_mask() {
        let err = normalize_prefix("8.8.8.8/33").unwrap_err();
        assert!(matches!(err, ImpairError::ValidationFailed(_)));
        assert!(normalize_prefix("not-an-ip").is_err());
        assert!(normalize_prefix("10.0.0/8").is_err());
    }

    #[test]
    fn deny_requires_ip() {
        let err = CommandKind::DenyTraffic
            .normalize_params(&CommandParams::default())
            .unwrap_err();
        assert!(err.to_string().contains("requires an 'ip'"));
    }

    #[test]
    fn interface_commands_reject_ip() {
        let err = CommandKind::InterfaceDown
            .normalize_params(&CommandParams::subnet("10.0.0.0/8"))
            .unwrap_err();
        assert!(matches!(err, ImpairError::ValidationFailed(_)));
    }

    #[test]
    fn set_qos_needs_a_value() {
        assert!(CommandKind::SetQos
            .normalize_params(&CommandParams::default())
            .is_err());
        let params = CommandParams {
            latency_ms: Some(50),
            loss_percent: Some(3.0),
            ..Default::default()
        };
        assert_eq!(CommandKind::SetQos.normalize_params(&params).unwrap(), params);
    }

    #[test]
    fn set_qos_range_checks() {
        let params = CommandParams {
            loss_percent: Some(120.0),
            ..Default::default()
        };
        assert!(CommandKind::SetQos.normalize_params(&params).is_err());

        let params = CommandParams {
            reorder_gap: Some(5),
            latency_ms: Some(10),
            ..Default::default()
        };
        assert!(CommandKind::SetQos.normalize_params(&params).is_err());

        let params = CommandParams {
            rate: Some("fast".into()),
            ..Default::default()
        };
        assert!(CommandKind::SetQos.normalize_params(&params).is_err());

        let params = CommandParams {
            rate: Some("10mbit".into()),
            ..Default::default()
        };
        assert!(CommandKind::SetQos.normalize_params(&params).is_ok());
    }

    #[test]
    fn clear_qos_rejects_qos_values() {
        let params = CommandParams {
            latency_ms: Some(10),
            ..Default::default()
        };
        assert!(CommandKind::ClearQos.normalize_params(&params).is_err());
    }

    #[test]
    fn params_summary() {
        let params = CommandParams {
            latency_ms: Some(80),
            rate: Some("5mbit".into()),
            ..Default::default()
        };
        assert_eq!(params.summary(), "latency=80ms rate=5mbit");
        assert_eq!(CommandParams::default().summary(), "");
    }
}
