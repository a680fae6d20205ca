//! Shared helpers for command handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rackfleet_config::Config;
use rackfleet_core::model::Node;
use rackfleet_core::store::NodeRepository;
use rackfleet_core::{DataStore, TopologySnapshot};
use serde::de::DeserializeOwned;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The config file in effect: `--config`, else the default location.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(rackfleet_config::config_path)
}

/// Load the config from the effective path and the environment.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(rackfleet_config::load_config_from(&config_path(global))?)
}

/// Read and parse a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|source| CliError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Load a topology snapshot into a fresh store.
pub fn load_topology(path: &Path) -> Result<DataStore, CliError> {
    let snapshot: TopologySnapshot = read_json(path)?;
    Ok(snapshot.into_store()?)
}

/// Write the store back as a snapshot, replacing `path` atomically.
pub fn save_topology(path: &Path, store: &DataStore) -> Result<(), CliError> {
    let snapshot = TopologySnapshot::capture(store);
    let json = serde_json::to_string_pretty(&snapshot).map_err(|e| CliError::Render(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Resolve a node by system id, then by hostname.
pub fn resolve_node(store: &DataStore, identifier: &str) -> Result<Arc<Node>, CliError> {
    store
        .node_by_system_id(identifier)
        .or_else(|| store.node_by_hostname(identifier))
        .ok_or_else(|| CliError::NotFound {
            resource_type: "node".into(),
            identifier: identifier.into(),
        })
}

/// Map a prompt failure onto the CLI's IO error.
pub fn prompt_err(err: impl std::error::Error + Send + Sync + 'static) -> CliError {
    CliError::Io(std::io::Error::other(err))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rackfleet_core::model::{NodeId, NodeKind};

    #[test]
    fn nodes_resolve_by_system_id_then_hostname() {
        let store = DataStore::new();
        store.save_node(Node {
            id: NodeId(1),
            system_id: "abc123".into(),
            hostname: "rack1".into(),
            kind: NodeKind::RackController,
            version: None,
        });

        assert_eq!(resolve_node(&store, "abc123").unwrap().id, NodeId(1));
        assert_eq!(resolve_node(&store, "rack1").unwrap().id, NodeId(1));
        assert!(matches!(
            resolve_node(&store, "rack2"),
            Err(CliError::NotFound { .. })
        ));
    }

    #[test]
    fn snapshots_survive_a_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, "{}").unwrap();

        let store = load_topology(&path).unwrap();
        store.save_node(Node {
            id: NodeId(7),
            system_id: "xyz".into(),
            hostname: "rack7".into(),
            kind: NodeKind::RackController,
            version: None,
        });
        save_topology(&path, &store).unwrap();

        let reloaded = load_topology(&path).unwrap();
        assert_eq!(resolve_node(&reloaded, "rack7").unwrap().id, NodeId(7));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn bad_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert!(err.to_string().contains("report.json"));
    }
}
