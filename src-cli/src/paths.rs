use std::path::PathBuf;

/// Default locations used by the command-line runner
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Pipeline settings (~/.config/folio/config.json)
    pub config_file: PathBuf,
    /// Where raw uploads are copied (~/.local/share/folio/uploads)
    pub upload_dir: PathBuf,
}

impl AppPaths {
    pub fn load_or_default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("folio");

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("folio");

        Self {
            config_file: config_dir.join("config.json"),
            upload_dir: data_dir.join("uploads"),
        }
    }

    /// Ensure the upload directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_end_in_folio() {
        let paths = AppPaths::load_or_default();
        assert!(paths.config_file.ends_with("folio/config.json"));
        assert!(paths.upload_dir.ends_with("folio/uploads"));
    }
}
