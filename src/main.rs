use mimalloc::MiMalloc;
use postroom::modules::{
    common::{signal::SignalManager, signal::SIGNAL_MANAGER, tls::PostroomTls},
    context::{executors::MailContext, Initialize},
    database::manager::DatabaseManager,
    error::PostroomResult,
    logger,
    scheduler::PeriodicTasks,
    settings::dir::DataDirManager,
};
use tracing::info;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

static LOGO: &str = r#"
  ____           _
 |  _ \ ___  ___| |_ _ __ ___   ___  _ __ ___
 | |_) / _ \/ __| __| '__/ _ \ / _ \| '_ ` _ \
 |  __/ (_) \__ \ |_| | | (_) | (_) | | | | | |
 |_|   \___/|___/\__|_|  \___/ \___/|_| |_| |_|

"#;

#[tokio::main]
async fn main() -> PostroomResult<()> {
    logger::initialize_logging();
    info!("{}", LOGO);
    info!("Starting postroom core");
    info!("Version:  {}", postroom::postroom_version!());

    if let Err(error) = initialize().await {
        eprintln!("{:?}", error);
        return Err(error);
    }

    PeriodicTasks::start_background_tasks();
    info!("Background drivers running; waiting for shutdown signal");

    let mut shutdown = SIGNAL_MANAGER.subscribe();
    let _ = shutdown.recv().await;
    info!("Shutdown signal received, draining drivers");
    PeriodicTasks::stop_all().await;
    Ok(())
}

/// Initialize the system by validating settings and bringing subsystems up.
async fn initialize() -> PostroomResult<()> {
    SignalManager::initialize().await?;
    DataDirManager::initialize().await?;
    DatabaseManager::initialize().await?;
    PostroomTls::initialize().await?;
    MailContext::initialize().await?;
    Ok(())
}
