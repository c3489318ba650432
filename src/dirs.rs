use std::path::PathBuf;

/// Returns the base directory for relay data.
///
/// Uses `$A3S_RELAY_HOME` if set, otherwise defaults to `~/.a3s/relay`.
pub fn relay_home() -> PathBuf {
    if let Ok(home) = std::env::var("A3S_RELAY_HOME") {
        return PathBuf::from(home);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".a3s")
        .join("relay")
}

/// Returns the path to the user configuration file.
pub fn config_path() -> PathBuf {
    relay_home().join("config.toml")
}

/// Default location of the persisted agent history.
pub fn history_path() -> PathBuf {
    relay_home().join("history.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases live in one test so they never race on the environment.
    #[test]
    fn test_relay_home_env_and_default() {
        std::env::set_var("A3S_RELAY_HOME", "/tmp/test-relay");
        assert_eq!(relay_home(), PathBuf::from("/tmp/test-relay"));
        assert_eq!(config_path(), PathBuf::from("/tmp/test-relay/config.toml"));
        assert_eq!(history_path(), PathBuf::from("/tmp/test-relay/history.json"));

        std::env::remove_var("A3S_RELAY_HOME");
        let home = relay_home();
        assert!(home.ends_with(".a3s/relay") || home.ends_with(".a3s\\relay"));
    }
}
