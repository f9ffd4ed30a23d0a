//! `parley init` — Write a default config file.

use std::path::Path;

use parley_config::AppConfig;

pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        println!("Config already exists: {}", path.display());
        return Ok(());
    }

    let config = AppConfig::default();
    let rendered = toml::to_string_pretty(&config)?;
    std::fs::write(path, rendered)?;

    println!("Wrote default config: {}", path.display());
    println!("Set PARLEY_API_KEY in the environment before serving.");
    Ok(())
}
