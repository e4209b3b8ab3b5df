use sqlx::{Executor, PgPool};

// Embedded so startup does not depend on the working directory.
const MIG_0001: &str = include_str!("../../migrations/0001_create_delivery_tables.sql");

pub async fn run_all(db: &PgPool) -> Result<(), sqlx::Error> {
    for (i, sql) in [MIG_0001].into_iter().enumerate() {
        let label = i + 1;
        // A bare &str runs over the simple query protocol, so one file may
        // hold several statements. All of them are IF NOT EXISTS.
        db.execute(sql).await?;
        tracing::info!(migration = %label, "delivery-hub migration applied");
    }
    Ok(())
}
