use std::path::PathBuf;

pub fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => {
            let path = PathBuf::from(home).join(".thirdeye");
            let _ = std::fs::create_dir_all(&path);
            path
        }
        None => PathBuf::from("."),
    }
}

pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

pub fn default_store_path() -> PathBuf {
    default_data_dir().join("session.toml")
}
