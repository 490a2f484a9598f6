//! `ws-ramp init` command implementation.

use anyhow::Result;

use ws_ramp::loadtest::config::{starter_config, CONFIG_DIR, CONFIG_FILE};

/// Creates `.ws-ramp/loadtest.toml` in the working directory.
pub fn execute_init(url: Option<String>, force: bool) -> Result<()> {
    let config_dir = std::env::current_dir()?.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}\n\
             Use `--force` to overwrite.",
            config_path.display()
        );
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, starter_config(url.as_deref()))?;
    eprintln!("Created {}", config_path.display());
    eprintln!("Point [target] url at your endpoint and add prompt files to the dataset folder.");
    Ok(())
}
