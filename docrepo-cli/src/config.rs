use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use docrepo_core::{IndexDescriptor, RouterConfig, TracingObserver};
use serde::Deserialize;

/// Load environment variables from .env files, returning the files read
///
/// Priority order (highest to lowest):
/// 1. Variables already set in the environment
/// 2. Current directory .env
/// 3. ~/.docrepo/.env
///
/// dotenvy never overwrites a variable that is already set, so loading the
/// more specific file first gives it precedence.
pub fn load_dotenv() -> Vec<PathBuf> {
    let mut loaded_from = Vec::new();

    if let Ok(path) = dotenvy::dotenv() {
        loaded_from.push(path);
    }

    if let Some(env_file) = config_dir().map(|dir| dir.join(".env")) {
        if env_file.exists() && dotenvy::from_path(&env_file).is_ok() {
            loaded_from.push(env_file);
        }
    }

    loaded_from
}

/// The docrepo config directory (~/.docrepo)
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".docrepo"))
}

/// Router configuration from a TOML file, or from `DOCREPO_*` variables when
/// no file is given. Command events are logged on the `docrepo::command` target.
pub fn router_config(path: Option<&Path>) -> Result<RouterConfig> {
    let config = match path {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            RouterConfig::from_toml_str(&source)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => RouterConfig::from_env().context("Invalid DOCREPO_* environment")?,
    };
    Ok(config.with_observer(std::sync::Arc::new(TracingObserver)))
}

#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    indexes: Vec<IndexDescriptor>,
}

/// Desired index set from a TOML file:
///
/// ```toml
/// [[indexes]]
/// name = "email_unique"
/// keys = [{ field = "email", order = "asc" }]
/// unique = true
/// ```
pub fn load_indexes(path: &Path) -> Result<Vec<IndexDescriptor>> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read index file {}", path.display()))?;
    parse_indexes(&source).with_context(|| format!("Invalid index file {}", path.display()))
}

fn parse_indexes(source: &str) -> Result<Vec<IndexDescriptor>> {
    let file: IndexFile = toml::from_str(source)?;
    Ok(file.indexes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrepo_core::IndexOrder;

    #[test]
    fn parses_index_file() {
        let indexes = parse_indexes(
            r#"
            [[indexes]]
            name = "owner_unique"
            keys = [{ field = "owner" }]
            unique = true

            [[indexes]]
            name = "recent"
            keys = [{ field = "queue", order = "asc" }, { field = "created_at", order = "desc" }]
            expire_after_secs = 86400
            "#,
        )
        .unwrap();

        assert_eq!(indexes.len(), 2);
        assert!(indexes[0].unique);
        assert_eq!(indexes[0].keys[0].order, IndexOrder::Ascending);
        assert_eq!(indexes[1].keys[1].order, IndexOrder::Descending);
        assert_eq!(indexes[1].expire_after_secs, Some(86400));
    }

    #[test]
    fn empty_file_means_no_indexes() {
        assert!(parse_indexes("").unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_orders() {
        let err = parse_indexes(
            r#"
            [[indexes]]
            name = "bad"
            keys = [{ field = "x", order = "sideways" }]
            "#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("sideways"));
    }
}
