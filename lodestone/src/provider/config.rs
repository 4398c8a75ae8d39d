//! Resource provider configuration.

use lodestone_shared::errors::{LodestoneError, LodestoneResult};
use serde::{Deserialize, Serialize};

/// Recognized configuration options for the resource provider system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceProviderConfig {
    /// Root of the VFS subtree to scan.
    pub resource_directory_path: String,
    /// Max time in one tick spent in the scanning state.
    pub scan_budget_ns: u64,
    /// Max time in one tick spent in the loading state.
    pub load_budget_ns: u64,
    /// Debounce for file-modified events before reload.
    pub modify_wait_ns: u64,
    /// Consume string registries without retaining them.
    pub use_load_only_string_registry: bool,
    /// Install a watcher at scan completion.
    pub observe_file_system: bool,
}

impl Default for ResourceProviderConfig {
    fn default() -> Self {
        Self {
            resource_directory_path: "resources".to_string(),
            scan_budget_ns: 2_000_000,
            load_budget_ns: 2_000_000,
            modify_wait_ns: 100_000_000,
            use_load_only_string_registry: false,
            observe_file_system: true,
        }
    }
}

impl ResourceProviderConfig {
    /// Parse a configuration document; absent options take defaults.
    pub fn from_json(text: &str) -> LodestoneResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| LodestoneError::Internal(format!("provider config rejected: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let config = ResourceProviderConfig {
            resource_directory_path: "game_resources".to_string(),
            scan_budget_ns: 1,
            load_budget_ns: 2,
            modify_wait_ns: 3,
            use_load_only_string_registry: true,
            observe_file_system: false,
        };
        let text = serde_json::to_string(&config).unwrap();
        let back: ResourceProviderConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.resource_directory_path, "game_resources");
        assert_eq!(back.scan_budget_ns, 1);
        assert!(back.use_load_only_string_registry);
        assert!(!back.observe_file_system);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let back: ResourceProviderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(back.resource_directory_path, "resources");
        assert!(back.observe_file_system);
    }
}
