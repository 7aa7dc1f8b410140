//! `toolloop config` — Configuration management commands.

use std::path::Path;

use anyhow::{Context, bail};
use toolloop_config::AppConfig;

pub fn validate(config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("🔍 Validating configuration...");

    let config = match super::replay::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e:#}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if config.agent_loop.max_iterations > 50 {
        warnings.push("max_iterations above 50; a looping model will burn tokens");
    }
    if config.budget.is_none() {
        warnings.push("No [budget] section; only the iteration cap bounds a run");
    }
    if !config.agent_loop.enable_double_confirmation {
        warnings.push("Double confirmation disabled; first text answer is final");
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Model:          {}", config.agent_loop.model);
    println!("   Max iterations: {}", config.agent_loop.max_iterations);
    println!(
        "   Tool timeout:   {}ms",
        config.agent_loop.tool_call_timeout_ms
    );
    println!("   Autonomy:       {}", config.governance.autonomy);
    println!("   Denied tools:   {}", config.governance.denied_tools.len());
    println!(
        "   Tracing:        {}",
        if config.telemetry.tracing_enabled { "on" } else { "off" }
    );
    Ok(())
}

pub fn show(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::replay::load_config(config_path).context("Failed to load config")?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    match config_path {
        Some(path) => println!("{}", path.display()),
        None => println!("{}", default_path().display()),
    }
}

/// Write the default config, refusing to overwrite an existing file.
pub fn init(config_path: Option<&Path>) -> anyhow::Result<()> {
    let target = config_path.map_or_else(default_path, Path::to_path_buf);
    write_default(&target)?;
    println!("✅ Wrote default config to {}", target.display());
    Ok(())
}

fn default_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

fn write_default(target: &Path) -> anyhow::Result<()> {
    if target.exists() {
        bail!("{} already exists; not overwriting", target.display());
    }
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    std::fs::write(target, AppConfig::default_toml())
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        assert!(default_path().to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn init_writes_loadable_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("config.toml");

        write_default(&target).unwrap();
        let loaded = AppConfig::load_from(&target).unwrap();
        assert_eq!(
            loaded.agent_loop.max_iterations,
            AppConfig::default().agent_loop.max_iterations
        );

        assert!(write_default(&target).is_err());
    }
}
