//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use pl_core::config::{save_config, PeerlinkConfig};

/// Get a config value by dotted key
pub fn config_get(path: &Path, key: &str) -> Result<()> {
    if !path.exists() {
        print_error(&format!("Config file not found: {:?}", path));
        print_info("Run 'peerlink config init' to create one");
        return Ok(());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let table: toml::Table =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    let root = toml::Value::Table(table);
    let Some(value) = lookup(&root, key) else {
        print_error(&format!("Key not found: {}", key));
        return Ok(());
    };

    match value {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Array(items) => {
            for item in items {
                println!("{}", item);
            }
        }
        toml::Value::Table(_) => println!("{}", toml::to_string_pretty(value)?),
        other => println!("{}", other),
    }

    Ok(())
}

fn lookup<'a>(root: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.')
        .try_fold(root, |current, part| current.as_table()?.get(part))
}

/// Show current configuration
pub fn config_show(path: &Path) -> Result<()> {
    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'peerlink config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);

    Ok(())
}

/// Write a default configuration file
pub fn config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    let config = PeerlinkConfig::default();
    save_config(path, &config)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));

    if !config.protocol.private_key_path.exists() {
        print_info("No SSH key found for terminal sessions, generate one with:");
        print_info(&format!(
            "  ssh-keygen -t ed25519 -f {:?} -N ''",
            config.protocol.private_key_path
        ));
    }
    print_info("Set PEERLINK_TOKEN to your management API token");

    Ok(())
}
