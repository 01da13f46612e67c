//! Config file reading and writing

use std::fs;
use std::path::Path;

use super::schema::PipelineConfig;
use crate::utils::error::ConfigError;

/// Read and validate a pipeline config
pub fn read_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: PipelineConfig = serde_json::from_str(&content)?;
    config.validate()?;

    tracing::debug!("Loaded {} config from {:?}", config.topology, path);
    Ok(config)
}

/// Write a pipeline config as pretty JSON, creating parent directories
pub fn write_config(config: &PipelineConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;

    tracing::debug!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Topology;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rig").join("spherecap.json");

        let mut config = PipelineConfig::default();
        config.topology = Topology::Array { count: 6 };
        config.recording.frame_rate = 15;
        write_config(&config, &path).unwrap();

        let loaded = read_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_read_rejects_malformed_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(read_config(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_read_rejects_invalid_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odd.json");
        fs::write(
            &path,
            r#"{"recording": {"mode": "standard", "resolution": {"width": 641, "height": 480},
                "frameRate": 30, "format": "mp4", "quality": "high", "audioEnabled": true}}"#,
        )
        .unwrap();
        assert!(matches!(read_config(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            read_config(&dir.path().join("absent.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
