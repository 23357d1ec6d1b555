use directories::ProjectDirs;

const PROJECT_ROOT: &str = env!("CARGO_MANIFEST_DIR");

/// Directory holding the database, config and project registry.
pub fn asset_dir() -> std::path::PathBuf {
    if let Ok(custom) = std::env::var("DISPATCHD_ASSETS_DIR") {
        let custom_path = std::path::PathBuf::from(custom);
        if !custom_path.exists() {
            std::fs::create_dir_all(&custom_path)
                .expect("Failed to create custom DISPATCHD_ASSETS_DIR directory");
        }
        return custom_path;
    }

    let path = if cfg!(debug_assertions) {
        std::path::PathBuf::from(PROJECT_ROOT).join("../../dev_assets")
    } else {
        ProjectDirs::from("dev", "dispatchd", "dispatchd")
            .expect("OS didn't give us a home directory")
            .data_dir()
            .to_path_buf()
    };

    if !path.exists() {
        std::fs::create_dir_all(&path).expect("Failed to create asset directory");
    }

    path
}

pub fn config_path() -> std::path::PathBuf {
    asset_dir().join("config.json")
}

pub fn registry_path() -> std::path::PathBuf {
    asset_dir().join("projects.json")
}
