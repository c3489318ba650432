use crate::config::RelayConfig;
use crate::dirs;
use crate::error::Result;

/// Execute the `config` command: print the effective configuration.
pub fn execute() -> Result<()> {
    let config = RelayConfig::load()?;
    println!("# {}", dirs::config_path().display());
    print!("{}", config.to_toml()?);
    Ok(())
}
