use std::path::Path;

use tracing::debug;

use crate::error::ConfigError;
use crate::swarm_config::SwarmConfig;

/// Loads a [`SwarmConfig`] from a single YAML file. A convenience for
/// deployments that want one; nothing in `swarmctl-core` requires it, since
/// callers are always free to build `SwarmConfig` directly.
pub fn load_swarm_config(path: &Path) -> Result<SwarmConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!(path = %path.display(), "loading swarm config");
    serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_io_error() {
        let err = load_swarm_config(Path::new("/nonexistent/path/does/not/exist.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn loads_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.yml");
        std::fs::write(&path, "state_dir: /var/lib/swarmctl\n").unwrap();
        let cfg = load_swarm_config(&path).unwrap();
        assert_eq!(cfg.state_dir, std::path::PathBuf::from("/var/lib/swarmctl"));
        assert!(cfg.load_state_on_startup);
        assert_eq!(cfg.history_size, 20);
    }

    #[test]
    fn loads_providers_with_driver_configs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.yml");
        std::fs::write(
            &path,
            r#"
state_dir: /var/lib/swarmctl
providers:
  - kind: container
    config:
      kind: container
      binary: podman
  - kind: cloud
    config:
      kind: cloud
      api_base: https://api.example.test
      auth_token: secret
"#,
        )
        .unwrap();
        let cfg = load_swarm_config(&path).unwrap();
        assert_eq!(cfg.providers.len(), 2);
        assert_eq!(cfg.providers[0].kind, "container");
        assert!(cfg.providers[1].enabled);
    }

    #[test]
    fn bad_yaml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yml");
        std::fs::write(&path, "state_dir: [unterminated\n").unwrap();
        let err = load_swarm_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }
}
