pub mod history;
pub mod init;
pub mod metrics;
pub mod router;
pub mod run;
pub mod sequence;
pub mod serve;

use anyhow::Context;
use impair_core::config::Config;
use std::path::Path;

/// Load the lab config, failing with a hint when `impair init` has not run.
pub(crate) fn require_init(root: &Path) -> anyhow::Result<Config> {
    Config::load(root).with_context(|| format!("no impairment lab at {}", root.display()))
}
