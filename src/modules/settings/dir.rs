// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::{fs, path::PathBuf, sync::LazyLock};

use crate::{
    modules::{context::Initialize, error::code::ErrorCode, error::PostroomResult},
    raise_error,
};

use super::cli::SETTINGS;

pub static DATA_DIR_MANAGER: LazyLock<DataDirManager> = LazyLock::new(DataDirManager::new);

pub const META_FILE: &str = "meta.db";
pub const MAIL_FILE: &str = "mail.db";

pub struct DataDirManager {
    pub root: PathBuf,
    pub meta_db: PathBuf,
    pub mail_db: PathBuf,
    pub logs_dir: PathBuf,
}

impl DataDirManager {
    fn new() -> Self {
        let root = SETTINGS.postroom_root_dir.clone();
        DataDirManager {
            meta_db: root.join(META_FILE),
            mail_db: root.join(MAIL_FILE),
            logs_dir: root.join("logs"),
            root,
        }
    }

    fn ensure_layout(&self) -> PostroomResult<()> {
        for dir in [&self.root, &self.logs_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                raise_error!(
                    format!("Failed to create data directory {:?}: {}", dir, e),
                    ErrorCode::MissingConfiguration
                )
            })?;
        }
        let probe = self.root.join(".access-probe");
        fs::write(&probe, b"ok").map_err(|e| {
            raise_error!(
                format!("Data directory {:?} is not writable: {}", self.root, e),
                ErrorCode::MissingConfiguration
            )
        })?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }
}

impl Initialize for DataDirManager {
    async fn initialize() -> PostroomResult<()> {
        DATA_DIR_MANAGER.ensure_layout()
    }
}
