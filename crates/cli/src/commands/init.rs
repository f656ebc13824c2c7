//! `parley init` — Write the default config.

use parley_config::AppConfig;
use std::path::Path;

pub async fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("💬 Parley — Setup");
    println!("=================\n");

    if write_default_config(&config_path, force)? {
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Point [llm] base_url at your Ollama instance");
        println!("   2. Run: parley doctor");
        println!("   3. Run: parley serve\n");
    } else {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force.\n");
    }

    Ok(())
}

/// Write the default config to `path`. Returns `false` when a file exists and
/// `force` is not set.
fn write_default_config(path: &Path, force: bool) -> std::io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}
