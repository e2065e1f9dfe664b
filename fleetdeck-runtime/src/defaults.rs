use fleetdeck_core::PlayerConfig;
use std::path::PathBuf;

pub const CONFIG_ENV: &str = "FLEETDECK_CONFIG";
pub const CONFIG_FILE_NAME: &str = "fleetdeck.json";

/// `$FLEETDECK_CONFIG` if set, otherwise `fleetdeck.json` in the working
/// directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// Used when live views are requested but no player is configured.
pub fn default_player() -> PlayerConfig {
    PlayerConfig {
        program: "ffplay".into(),
        args: vec!["-loglevel".into(), "error".into()],
    }
}
