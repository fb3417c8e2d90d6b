//! Database migrations

use crate::scylla_gateway::AccessRepository;
use crate::{DbConfig, DbError, DbResult};
use hazard_core::AccessCondition;
use scylla::Session;
use std::sync::Arc;
use tracing::info;

const TABLES: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS detection_events (
        object_id bigint PRIMARY KEY,
        camera_id text,
        img_id bigint,
        event_type int,
        class text,
        map_x double,
        map_y double,
        zone int,
        rescue_level int,
        image_path text,
        detected_at bigint
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bird_risk_log (
        day text,
        logged_at bigint,
        level int,
        PRIMARY KEY (day, logged_at)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS interaction_log (
        day text,
        requested_at bigint,
        request_id int,
        response_id int,
        responded_at bigint,
        PRIMARY KEY (day, requested_at, request_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS access_conditions (
        zone_id int PRIMARY KEY,
        authority_level int
    )
    "#,
];

/// Create the keyspace and tables, then seed the zone authority rows
pub async fn run_all(session: &Arc<Session>, config: &DbConfig) -> DbResult<()> {
    info!("Running database migrations...");

    if !config.keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DbError::Migration(format!("invalid keyspace name {:?}", config.keyspace)));
    }

    let keyspace = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        config.keyspace, config.replication_factor
    );
    session
        .query_unpaged(keyspace, ())
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

    session
        .use_keyspace(&config.keyspace, false)
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

    for table in TABLES {
        session
            .query_unpaged(table, ())
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
    }

    seed_access_conditions(session).await?;

    info!("Migrations complete");
    Ok(())
}

async fn seed_access_conditions(session: &Arc<Session>) -> DbResult<()> {
    let result = session
        .query_unpaged("SELECT zone_id FROM access_conditions", ())
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;
    let rows = result
        .into_rows_result()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    if rows.rows_num() == 0 {
        info!("Seeding default zone authority levels");
        AccessRepository::new(session.clone())
            .store(&AccessCondition::default())
            .await?;
    }
    Ok(())
}
