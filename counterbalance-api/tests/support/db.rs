use counterbalance_api::db::{DbClient, DbConfig};
use counterbalance_api::{AllocationMode, AssignmentConfig};
use counterbalance_core::GroupSet;

/// Whether the live-database suite was requested (`DB_TESTS=1`).
pub fn db_tests_enabled() -> bool {
    std::env::var("DB_TESTS").map(|v| v == "1").unwrap_or(false)
}

pub async fn test_db_client() -> Result<DbClient, String> {
    let config = DbConfig::from_env();
    let db = DbClient::from_config(&config).map_err(|e| e.to_string())?;
    db.migrate().await.map_err(|e| e.to_string())?;
    Ok(db)
}

/// Groups unique to one test run, so suites sharing a database do not see
/// each other's load.
pub fn isolated_config(mode: AllocationMode) -> Result<AssignmentConfig, String> {
    let suffix = uuid::Uuid::now_v7().simple().to_string();
    let raw = format!("A_{0},B_{0},C_{0}", &suffix[suffix.len() - 12..]);
    let groups = GroupSet::parse_list(&raw).map_err(|e| e.to_string())?;
    Ok(AssignmentConfig::new(groups, mode))
}
