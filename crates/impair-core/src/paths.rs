use crate::error::{ImpairError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const IMPAIR_DIR: &str = ".impair";
pub const ROUTERS_DIR: &str = ".impair/routers";
pub const SEQUENCES_DIR: &str = ".impair/sequences";

pub const CONFIG_FILE: &str = ".impair/config.yaml";
pub const HISTORY_DB: &str = ".impair/history.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn impair_dir(root: &Path) -> PathBuf {
    root.join(IMPAIR_DIR)
}

pub fn routers_dir(root: &Path) -> PathBuf {
    root.join(ROUTERS_DIR)
}

pub fn router_path(root: &Path, id: &str) -> PathBuf {
    routers_dir(root).join(format!("{id}.yaml"))
}

pub fn sequences_dir(root: &Path) -> PathBuf {
    root.join(SEQUENCES_DIR)
}

pub fn sequence_path(root: &Path, id: &str) -> PathBuf {
    sequences_dir(root).join(format!("{id}.yaml"))
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn history_db_path(root: &Path) -> PathBuf {
    root.join(HISTORY_DB)
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

/// Router and sequence identifiers double as file names, so they are
/// restricted to lowercase slugs.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || !id_re().is_match(id) {
        return Err(ImpairError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        for id in ["edge-1", "a", "wan-failover-drill", "r7"] {
            validate_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_ids() {
        for id in ["", "-edge", "edge-", "has spaces", "Edge1", "a_b", "../etc"] {
            assert!(validate_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/lab");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/lab/.impair/config.yaml")
        );
        assert_eq!(
            router_path(root, "edge-1"),
            PathBuf::from("/tmp/lab/.impair/routers/edge-1.yaml")
        );
        assert_eq!(
            sequence_path(root, "drill"),
            PathBuf::from("/tmp/lab/.impair/sequences/drill.yaml")
        );
        assert_eq!(
            history_db_path(root),
            PathBuf::from("/tmp/lab/.impair/history.redb")
        );
    }
}
