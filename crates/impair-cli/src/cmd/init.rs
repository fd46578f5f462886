use anyhow::Context;
use impair_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path, lab: Option<&str>) -> anyhow::Result<()> {
    let lab_name = lab.map(str::to_string).unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lab".to_string())
    });

    println!("Initializing impairment lab in: {}", root.display());

    for dir in [paths::IMPAIR_DIR, paths::ROUTERS_DIR, paths::SEQUENCES_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    if !config_path.exists() {
        let cfg = Config::new(&lab_name);
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    println!("\nNext: impair router add <id> --address <host> --credential env:<VAR>");
    Ok(())
}
