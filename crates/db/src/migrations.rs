use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_TABLES: &[&str] = &[
        "conversations",
        "turns",
        "knowledge_chunks",
        "memory_facts",
        "feedback",
        "learning_reports",
    ];

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "conversations",
        "turns",
        "knowledge_chunks",
        "memory_facts",
        "feedback",
        "learning_reports",
        "idx_turns_conversation_id",
        "idx_knowledge_chunks_company_id",
        "idx_memory_facts_scope",
        "idx_feedback_company_created_at",
        "idx_learning_reports_company_created_at",
        "idx_conversations_company_created_at",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, table: &str) -> i64 {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await
        .expect("check table")
        .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in MANAGED_TABLES {
            assert_eq!(table_count(&pool, table).await, 1, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn feedback_rating_is_constrained_to_binary_values() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO conversations (id, company_id, session_id, created_at)
             VALUES ('c-1', 'acme', 's-1', '2026-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .expect("insert conversation");
        sqlx::query(
            "INSERT INTO turns (id, conversation_id, role, content, created_at)
             VALUES ('t-1', 'c-1', 'assistant', 'hello', '2026-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .expect("insert turn");

        let rejected = sqlx::query(
            "INSERT INTO feedback (id, company_id, turn_id, rating, created_at)
             VALUES ('f-1', 'acme', 't-1', 5, '2026-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await;
        assert!(rejected.is_err(), "rating outside 0/1 must be rejected");

        let orphan = sqlx::query(
            "INSERT INTO feedback (id, company_id, turn_id, rating, created_at)
             VALUES ('f-2', 'acme', 'missing', 1, '2026-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await;
        assert!(orphan.is_err(), "feedback must reference an existing turn");
    }

    #[tokio::test]
    async fn conversations_carry_an_optional_origin() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO conversations (id, company_id, session_id, created_at)
             VALUES ('c-1', 'acme', 's-1', '2026-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .expect("insert conversation without origin");

        let row = sqlx::query("SELECT country_code, country_name FROM conversations WHERE id = 'c-1'")
            .fetch_one(&pool)
            .await
            .expect("select origin");
        assert!(row.get::<Option<String>, _>("country_code").is_none());
        assert!(row.get::<Option<String>, _>("country_name").is_none());
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        for table in MANAGED_TABLES {
            assert_eq!(table_count(&pool, table).await, 0, "table {table} survived undo");
        }
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
