use anyhow::{bail, Context};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use pay_orchestrator::{config, db, migrator::Migrator};

/// Applies or rolls back the ledger schema.
///
/// Usage: `migration [up|down|status]` (default `up`). The database URL comes
/// from `DATABASE_URL` when set, otherwise from the application config.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());

    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => config::load_config()
            .context("failed to load configuration")?
            .database_url,
    };

    let pool = db::establish_connection(&database_url)
        .await
        .context("failed to connect to the ledger database")?;

    match command.as_str() {
        "up" => {
            Migrator::up(&pool, None).await?;
            info!("Migrations applied");
        }
        "down" => {
            Migrator::down(&pool, Some(1)).await?;
            info!("Last migration rolled back");
        }
        "status" => {
            for migration in Migrator::get_pending_migrations(&pool).await? {
                info!("Pending migration: {}", migration.name());
            }
        }
        other => bail!("unknown command {other:?}; expected up, down or status"),
    }

    Ok(())
}
