//! `physiogold init`: Write a default config file.

use physiogold_config::AppConfig;
use std::path::Path;

pub fn run(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = super::config_path(config_path);

    if write_default(&path, force)? {
        println!("Created config at: {}", path.display());
        println!("\nNext steps:");
        println!("   1. Review {}", path.display());
        println!("   2. Run `physiogold serve` and enter your Google API key in the sidebar");
    } else {
        println!("Config already exists at: {}", path.display());
        println!("   Edit it manually or re-run with --force.");
    }

    Ok(())
}

/// Returns `false` when the file exists and `force` is not set.
pub fn write_default(path: &Path, force: bool) -> std::io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}
