//! `parley doctor` — Diagnose system health.

use parley_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Parley Doctor — System Diagnostics");
    println!("=====================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found: {}", config_path.display());
    } else {
        println!("  ⚠️  No config file, using defaults (run `parley init`)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the config before running further checks.");
            return Ok(());
        }
    };

    // Backend reachability
    let provider = parley_providers::from_config(&config);
    match provider.health_check().await {
        Ok(true) => println!("  ✅ LLM backend reachable at {}", config.llm.base_url),
        Ok(false) => {
            println!("  ⚠️  LLM backend at {} answered but is not healthy", config.llm.base_url);
            issues += 1;
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Backend health check failed");
            println!("  ❌ LLM backend unreachable at {}: {e}", config.llm.base_url);
            issues += 1;
        }
    }

    // History store
    match parley_memory::from_config(&config.memory).await {
        Ok(store) => println!("  ✅ History store ready ({})", store.name()),
        Err(e) => {
            println!("  ❌ History store unavailable: {e}");
            issues += 1;
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
