use cafes::orm::{Db, apply_migration_files, auto_migrate};
use cafes::router::AppState;
use cafes::{CafeStore, Settings, build_router};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cafes=info")),
        )
        .init();

    let settings = Arc::new(Settings::from_env());
    if settings.debug {
        log::info!("Debug mode: template hot reload on /ws/reload");
    }

    let db = Arc::new(Db::connect(&settings.database_url).await?);
    auto_migrate(db.clone()).await?;
    if let Some(dir) = &settings.migrations_dir {
        let applied = apply_migration_files(db.clone(), dir).await?;
        log::info!("Applied {} migration file(s) from {}", applied, dir.display());
    }

    let state = AppState {
        store: CafeStore::new(db),
        settings: settings.clone(),
    };
    build_router(state).run(&settings).await
}
