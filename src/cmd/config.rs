//! Effective configuration view: `taskboard config`.

use anyhow::Result;

use taskboard::config::{BoardConfig, CONFIG_FILE};

pub fn cmd_config(config: &BoardConfig, source: Option<&std::path::Path>) -> Result<()> {
    let source = match source {
        Some(path) => path.display().to_string(),
        None if std::path::Path::new(CONFIG_FILE).exists() => CONFIG_FILE.to_string(),
        None => "defaults".to_string(),
    };
    println!("# source: {} (+ environment, flags)", source);
    print!("{}", config.to_toml()?);
    Ok(())
}
