use anyhow::Result;
use sqlx::PgPool;

/// Run the embedded migrations. Safe to call on every boot.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
