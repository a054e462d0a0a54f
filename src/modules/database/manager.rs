use crate::modules::context::Initialize;
use crate::modules::database::{MAIL_MODELS, META_MODELS};
use crate::modules::error::{code::ErrorCode, PostroomError, PostroomResult};
use crate::raise_error;
use native_db::{Builder, Database};
use std::sync::{Arc, LazyLock};

pub static DB_MANAGER: LazyLock<DatabaseManager> = LazyLock::new(DatabaseManager::new);

pub struct DatabaseManager {
    /// Metadata database: accounts, drafts, operation log, snoozes, batches
    meta_db: Arc<Database<'static>>,
    /// Mail database: folders, email rows, attachments, term index
    mail_db: Arc<Database<'static>>,
}

impl DatabaseManager {
    fn new() -> Self {
        let meta_db = Self::init_meta_database().expect("Failed to initialize metadata database");
        let mail_db = Self::init_mail_database().expect("Failed to initialize mail database");
        DatabaseManager { meta_db, mail_db }
    }

    pub fn meta_db(&self) -> &Arc<Database<'static>> {
        &self.meta_db
    }

    pub fn mail_db(&self) -> &Arc<Database<'static>> {
        &self.mail_db
    }

    #[cfg(test)]
    fn init_meta_database() -> PostroomResult<Arc<Database<'static>>> {
        Ok(Arc::new(
            Builder::new().create_in_memory(&META_MODELS).unwrap(),
        ))
    }

    #[cfg(test)]
    fn init_mail_database() -> PostroomResult<Arc<Database<'static>>> {
        Ok(Arc::new(
            Builder::new().create_in_memory(&MAIL_MODELS).unwrap(),
        ))
    }

    #[cfg(not(test))]
    fn init_meta_database() -> PostroomResult<Arc<Database<'static>>> {
        use crate::modules::settings::{cli::SETTINGS, dir::DATA_DIR_MANAGER};
        let mut database = Builder::new()
            .set_cache_size(
                SETTINGS
                    .postroom_meta_cache_size
                    .unwrap_or(134217728)
                    .max(67108864),
            ) //default 128MB
            .create(&META_MODELS, DATA_DIR_MANAGER.meta_db.clone())
            .map_err(Self::handle_database_error)?;
        database
            .compact()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(Arc::new(database))
    }

    #[cfg(not(test))]
    fn init_mail_database() -> PostroomResult<Arc<Database<'static>>> {
        use crate::modules::settings::{cli::SETTINGS, dir::DATA_DIR_MANAGER};
        use tracing::info;
        info!(
            "Initializing mail database at: {:?}",
            &DATA_DIR_MANAGER.mail_db
        );
        let mut database = Builder::new()
            .set_cache_size(
                SETTINGS
                    .postroom_mail_cache_size
                    .unwrap_or(1073741824)
                    .max(67108864),
            ) //default 1GB
            .create(&MAIL_MODELS, DATA_DIR_MANAGER.mail_db.clone())
            .map_err(Self::handle_database_error)?;
        database
            .compact()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(Arc::new(database))
    }

    #[allow(dead_code)]
    fn handle_database_error(error: native_db::db_type::Error) -> PostroomError {
        match error {
            native_db::db_type::Error::RedbDatabaseError(database_error) => match database_error {
                redb::DatabaseError::DatabaseAlreadyOpen => {
                    raise_error!(
                        "Database is already open by another instance".into(),
                        ErrorCode::InternalError
                    )
                }
                other => {
                    raise_error!(
                        format!("Database error: {:?}", other),
                        ErrorCode::InternalError
                    )
                }
            },
            other => {
                raise_error!(
                    format!("Failed to create database: {:?}", other),
                    ErrorCode::InternalError
                )
            }
        }
    }
}

impl Initialize for DatabaseManager {
    async fn initialize() -> PostroomResult<()> {
        // Touch the lazy statics so startup fails fast on an unopenable file.
        let _ = DB_MANAGER.meta_db();
        let _ = DB_MANAGER.mail_db();
        Ok(())
    }
}
