use anyhow::{bail, Result};
use std::path::Path;

use crate::cli::config::Config;
use crate::cli::InitArgs;

pub fn execute_init(args: InitArgs, path: &Path) -> Result<()> {
    if path.exists() && !args.force {
        bail!("{} already exists. Use --force to overwrite.", path.display());
    }

    let mut config = Config::default();
    if let Some(name) = args.name {
        config.schema.name = name;
    }
    if let Some(size) = args.size {
        config.size = size;
    }

    config.save_to(path)?;

    eprintln!("Created {}", path.display());
    eprintln!("  schema: {}", config.schema.name);
    eprintln!("  size: {}", config.size);
    eprintln!("  storage key: {}", config.schema.storage_key(config.size));
    eprintln!();
    eprintln!("Next: gridcache hydrate");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::load_config_from_path;

    #[test]
    fn test_init_writes_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.toml");
        let args = InitArgs {
            name: Some("Users".to_string()),
            size: Some(5),
            force: false,
        };
        execute_init(args, &path).unwrap();

        let config = load_config_from_path(&path).unwrap();
        assert_eq!(config.schema.storage_key(config.size), "Users-5");
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.toml");
        std::fs::write(&path, "size = 1").unwrap();
        let args = InitArgs {
            name: None,
            size: None,
            force: false,
        };
        let err = execute_init(args, &path).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
