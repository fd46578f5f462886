use super::require_init;
use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use impair_core::router::{RouterDirectory, RouterNode};
use impair_core::Orchestrator;
use std::path::Path;

#[derive(Subcommand)]
pub enum RouterSubcommand {
    /// List registered routers
    List,
    /// Show one router
    Show { id: String },
    /// Register a router
    Add {
        id: String,
        /// Management address of the device API (host or host:port)
        #[arg(long)]
        address: String,
        /// API key reference: `env:VAR` or a literal key
        #[arg(long)]
        credential: String,
        #[arg(long)]
        name: Option<String>,
        /// Known interface (repeatable: --interface eth0 --interface eth1)
        #[arg(long = "interface")]
        interfaces: Vec<String>,
        /// Register the router but keep it out of runs
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a router
    Remove { id: String },
    /// Read version and interfaces from the device
    Probe { id: String },
}

pub fn run(root: &Path, subcmd: RouterSubcommand, json: bool) -> anyhow::Result<()> {
    require_init(root)?;
    let routers = RouterDirectory::new(root);
    match subcmd {
        RouterSubcommand::List => list(&routers, json),
        RouterSubcommand::Show { id } => show(&routers, &id, json),
        RouterSubcommand::Add {
            id,
            address,
            credential,
            name,
            interfaces,
            disabled,
        } => {
            let mut node = RouterNode::new(id, address, credential).with_interfaces(interfaces);
            node.name = name;
            node.enabled = !disabled;
            add(&routers, node, json)
        }
        RouterSubcommand::Remove { id } => remove(&routers, &id, json),
        RouterSubcommand::Probe { id } => probe(root, &id, json),
    }
}

fn list(routers: &RouterDirectory, json: bool) -> anyhow::Result<()> {
    let all = routers.list()?;
    if json {
        return print_json(&all);
    }
    if all.is_empty() {
        println!("No routers. Add one with: impair router add <id> --address <host> --credential <ref>");
        return Ok(());
    }
    let rows = all
        .iter()
        .map(|r| {
            vec![
                r.id.clone(),
                or_dash(r.name.as_deref()),
                r.address.clone(),
                r.version.as_str().to_string(),
                interface_names(r),
                if r.enabled { "yes" } else { "no" }.to_string(),
                r.last_seen
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".into()),
            ]
        })
        .collect();
    print_table(
        &["ID", "NAME", "ADDRESS", "VERSION", "INTERFACES", "ENABLED", "LAST SEEN"],
        rows,
    );
    Ok(())
}

fn show(routers: &RouterDirectory, id: &str, json: bool) -> anyhow::Result<()> {
    let router = routers.get(id)?;
    if json {
        return print_json(&router);
    }
    println!("Router:      {}", router.id);
    println!("Name:        {}", router.display_name());
    println!("Address:     {}", router.address);
    println!("Version:     {}", router.version.as_str());
    println!("Enabled:     {}", router.enabled);
    println!("Interfaces:  {}", interface_names(&router));
    if let Some(seen) = router.last_seen {
        println!("Last seen:   {}", seen.to_rfc3339());
    }
    Ok(())
}

fn add(routers: &RouterDirectory, node: RouterNode, json: bool) -> anyhow::Result<()> {
    routers
        .create(&node)
        .with_context(|| format!("failed to add router '{}'", node.id))?;
    if json {
        print_json(&node)?;
    } else {
        println!("Added router '{}' at {}.", node.id, node.address);
    }
    Ok(())
}

fn remove(routers: &RouterDirectory, id: &str, json: bool) -> anyhow::Result<()> {
    routers.delete(id)?;
    if json {
        print_json(&serde_json::json!({ "removed": id }))?;
    } else {
        println!("Removed router '{id}'.");
    }
    Ok(())
}

fn probe(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let (router, device) = rt.block_on(async {
        let (orchestrator, _control) = Orchestrator::open(root)?;
        orchestrator.probe_router(id).await
    })?;
    if json {
        return print_json(&serde_json::json!({ "router": router, "device": device }));
    }
    println!(
        "{}: {} ({} interfaces)",
        router.id,
        router.version.as_str(),
        router.interfaces.len()
    );
    println!("  {}", interface_names(&router));
    Ok(())
}

fn interface_names(router: &RouterNode) -> String {
    if router.interfaces.is_empty() {
        return "-".into();
    }
    router
        .interfaces
        .iter()
        .map(|i| i.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
