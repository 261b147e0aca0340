//! Build artifact cleaning.

use anyhow::{Context, Result};
use std::fs;

use crate::build::LayerStore;
use crate::config::Config;

/// Remove the output directory: image, staging tree, build record and
/// rendered files.
pub fn clean_outputs(config: &Config) -> Result<()> {
    if config.output.exists() {
        println!("Removing {}...", config.output.display());
        fs::remove_dir_all(&config.output)
            .with_context(|| format!("Failed to remove {}", config.output.display()))?;
        println!("Outputs cleaned.");
    } else {
        println!("No outputs to clean.");
    }
    Ok(())
}

/// Remove every cached layer snapshot.
pub fn clean_cache(config: &Config) -> Result<()> {
    if !config.cache_dir.join("layers").exists() {
        println!("Layer cache is empty.");
        return Ok(());
    }
    let store = LayerStore::open(&config.cache_dir)?;
    let removed = store.remove_all()?;
    println!("Removed {} cached layers from {}", removed, store.root().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::load(dir).unwrap();
        config.output = dir.join("output");
        config.cache_dir = dir.join("cache");
        config
    }

    #[test]
    fn test_clean_outputs() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        fs::create_dir_all(config.output.join("image/app")).unwrap();
        clean_outputs(&config).unwrap();
        assert!(!config.output.exists());
        // Second run is a no-op.
        clean_outputs(&config).unwrap();
    }

    #[test]
    fn test_clean_cache_keeps_cache_dir() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        fs::create_dir_all(config.cache_dir.join("layers/abc/rootfs")).unwrap();
        clean_cache(&config).unwrap();
        assert!(config.cache_dir.join("layers").exists());
        assert!(!config.cache_dir.join("layers/abc").exists());
    }
}
