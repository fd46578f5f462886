use super::require_init;
use impair_core::config::WarnLevel;
use std::path::Path;

pub fn run(root: &Path, port: u16) -> anyhow::Result<()> {
    let config = require_init(root)?;

    let warnings = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => tracing::error!("config: {}", w.message),
        }
    }
    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("invalid configuration in {}", impair_core::paths::CONFIG_FILE);
    }

    println!("impair lab '{}' → http://localhost:{port}", config.lab);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(impair_server::serve(root.to_path_buf(), port))
}
