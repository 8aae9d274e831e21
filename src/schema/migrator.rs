use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};

use crate::{
    db::DbClient,
    models::migration::{MigrationContext, MigrationResult, SchemaDiff},
};

/// Observer notified around a migration batch.
///
/// `before_migration` runs once per call, dry run or not, before any statement.
/// `after_migration` runs once, and only when the batch succeeded.
#[async_trait]
pub trait MigrationHook: Send + Sync {
    async fn before_migration(&self, context: &MigrationContext);
    async fn after_migration(&self, context: &MigrationContext, result: &MigrationResult);
}

/// Applies a [`SchemaDiff`] to a live connection inside one transaction.
pub struct SchemaMigrator<'a> {
    client: &'a dyn DbClient,
    hook: Option<Arc<dyn MigrationHook>>,
}

impl<'a> SchemaMigrator<'a> {
    pub fn new(client: &'a dyn DbClient) -> Self {
        Self { client, hook: None }
    }

    pub fn with_hook(mut self, hook: Arc<dyn MigrationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Runs every operation of `diff` in order.
    ///
    /// A dry run only records the statements. A real run executes them in a
    /// single transaction; the first failure rolls the whole batch back and is
    /// reported in `errors`. Failures never escape as `Err`.
    pub async fn migrate(&self, diff: &SchemaDiff, dry_run: bool) -> MigrationResult {
        let context = MigrationContext {
            is_dry_run: dry_run,
        };
        if let Some(hook) = &self.hook {
            hook.before_migration(&context).await;
        }

        let mut result = MigrationResult {
            warnings: diff.warnings.clone(),
            ..MigrationResult::default()
        };

        let success = if dry_run {
            for op in &diff.operations {
                debug!("Dry run, skipping {:?} on {}: {}", op.operation_type, op.table_name, op.sql);
                result.sql_executed.push(op.sql.clone());
            }
            true
        } else {
            self.apply(diff, &mut result).await
        };
        result.success = success;

        if result.success {
            info!(
                "Migration {} ({} statements)",
                if dry_run { "dry run finished" } else { "committed" },
                result.sql_executed.len()
            );
            if let Some(hook) = &self.hook {
                hook.after_migration(&context, &result).await;
            }
        }

        result
    }

    async fn apply(&self, diff: &SchemaDiff, result: &mut MigrationResult) -> bool {
        if diff.operations.is_empty() {
            return true;
        }

        let mut tx = match self.client.begin_transaction().await {
            Ok(tx) => tx,
            Err(e) => {
                error!("Could not begin migration transaction: {}", e);
                result
                    .errors
                    .push(format!("failed to begin migration transaction: {}", e));
                return false;
            }
        };

        for op in &diff.operations {
            debug!("Executing {:?} on {}: {}", op.operation_type, op.table_name, op.sql);
            result.sql_executed.push(op.sql.clone());

            if let Err(e) = tx.execute(&op.sql).await {
                error!("{:?} on {} failed: {}", op.operation_type, op.table_name, e);
                result.errors.push(format!(
                    "{:?} on '{}' failed: {} (statement: {})",
                    op.operation_type, op.table_name, e, op.sql
                ));

                match tx.rollback().await {
                    Ok(()) => warn!("Rolled back migration after failure"),
                    Err(rollback_err) => {
                        error!("Rollback failed: {}", rollback_err);
                        result.errors.push(format!("rollback failed: {}", rollback_err));
                    }
                }
                return false;
            }
        }

        if let Err(e) = tx.commit().await {
            error!("Could not commit migration: {}", e);
            result.errors.push(format!("failed to commit migration: {}", e));
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::Transaction,
        errors::DbError,
        models::migration::MigrationOperation,
    };
    use mockall::mock;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    mock! {
        pub Tx {}

        #[async_trait]
        impl Transaction for Tx {
            async fn execute(&mut self, query: &str) -> Result<(), DbError>;
            async fn commit(self: Box<Self>) -> Result<(), DbError>;
            async fn rollback(self: Box<Self>) -> Result<(), DbError>;
        }
    }

    /// Hands out one scripted transaction.
    struct ScriptedClient {
        tx: Mutex<Option<MockTx>>,
        begins: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(tx: MockTx) -> Self {
            Self {
                tx: Mutex::new(Some(tx)),
                begins: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DbClient for ScriptedClient {
        async fn execute(&self, _query: &str) -> Result<(), DbError> {
            Ok(())
        }

        async fn query(&self, _query: &str) -> Result<Vec<serde_json::Value>, DbError> {
            Ok(Vec::new())
        }

        async fn begin_transaction<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>, DbError> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            match self.tx.lock().unwrap().take() {
                Some(tx) => Ok(Box::new(tx)),
                None => Err(DbError::Transaction("database is locked".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct SpyHook {
        before: AtomicUsize,
        after: AtomicUsize,
        seen: Mutex<Vec<(bool, Option<bool>)>>,
    }

    #[async_trait]
    impl MigrationHook for SpyHook {
        async fn before_migration(&self, context: &MigrationContext) {
            self.before.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((context.is_dry_run, None));
        }

        async fn after_migration(&self, context: &MigrationContext, result: &MigrationResult) {
            self.after.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((context.is_dry_run, Some(result.success)));
        }
    }

    fn diff() -> SchemaDiff {
        SchemaDiff {
            operations: vec![
                MigrationOperation::create_table("Users", "CREATE TABLE Users (Id INTEGER PRIMARY KEY)"),
                MigrationOperation::add_column("Users", "Email", "ALTER TABLE Users ADD COLUMN Email TEXT"),
            ],
            warnings: vec!["table 'Legacy' exists in the database".to_string()],
        }
    }

    #[tokio::test]
    async fn test_dry_run_records_without_touching_connection() {
        let client = ScriptedClient::new(MockTx::new());
        let hook = Arc::new(SpyHook::default());
        let migrator = SchemaMigrator::new(&client).with_hook(hook.clone());

        let result = migrator.migrate(&diff(), true).await;

        assert!(result.success);
        assert_eq!(
            result.sql_executed,
            vec![
                "CREATE TABLE Users (Id INTEGER PRIMARY KEY)".to_string(),
                "ALTER TABLE Users ADD COLUMN Email TEXT".to_string(),
            ]
        );
        assert_eq!(result.warnings, diff().warnings);
        assert_eq!(client.begins.load(Ordering::SeqCst), 0);
        assert_eq!(*hook.seen.lock().unwrap(), vec![(true, None), (true, Some(true))]);
    }

    #[tokio::test]
    async fn test_real_run_commits_once() {
        let mut tx = MockTx::new();
        tx.expect_execute().times(2).returning(|_| Ok(()));
        tx.expect_commit().times(1).returning(|| Ok(()));
        tx.expect_rollback().never();

        let client = ScriptedClient::new(tx);
        let hook = Arc::new(SpyHook::default());
        let result = SchemaMigrator::new(&client)
            .with_hook(hook.clone())
            .migrate(&diff(), false)
            .await;

        assert!(result.success);
        assert!(result.errors.is_empty());
        assert_eq!(result.sql_executed.len(), 2);
        assert_eq!(hook.before.load(Ordering::SeqCst), 1);
        assert_eq!(hook.after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_skips_after_hook() {
        let mut calls = 0;
        let mut tx = MockTx::new();
        tx.expect_execute().times(2).returning(move |_| {
            calls += 1;
            if calls == 2 {
                Err(DbError::Transaction("near \"ADD\": syntax error".to_string()))
            } else {
                Ok(())
            }
        });
        tx.expect_rollback().times(1).returning(|| Ok(()));
        tx.expect_commit().never();

        let client = ScriptedClient::new(tx);
        let hook = Arc::new(SpyHook::default());
        let result = SchemaMigrator::new(&client)
            .with_hook(hook.clone())
            .migrate(&diff(), false)
            .await;

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("syntax error"));
        assert_eq!(result.sql_executed.len(), 2);
        assert_eq!(hook.before.load(Ordering::SeqCst), 1);
        assert_eq!(hook.after.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let mut tx = MockTx::new();
        tx.expect_execute()
            .times(1)
            .returning(|_| Err(DbError::Transaction("table Users already exists".to_string())));
        tx.expect_rollback().times(1).returning(|| Ok(()));

        let client = ScriptedClient::new(tx);
        let result = SchemaMigrator::new(&client).migrate(&diff(), false).await;

        assert!(!result.success);
        assert_eq!(result.sql_executed.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_failure_is_reported() {
        let mut tx = MockTx::new();
        tx.expect_execute()
            .returning(|_| Err(DbError::Transaction("disk I/O error".to_string())));
        tx.expect_rollback()
            .returning(|| Err(DbError::Transaction("no transaction is active".to_string())));

        let client = ScriptedClient::new(tx);
        let result = SchemaMigrator::new(&client).migrate(&diff(), false).await;

        assert!(!result.success);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[1].contains("rollback failed"));
    }

    #[tokio::test]
    async fn test_begin_failure_is_a_failed_migration() {
        let client = ScriptedClient {
            tx: Mutex::new(None),
            begins: AtomicUsize::new(0),
        };
        let hook = Arc::new(SpyHook::default());
        let result = SchemaMigrator::new(&client)
            .with_hook(hook.clone())
            .migrate(&diff(), false)
            .await;

        assert!(!result.success);
        assert!(result.sql_executed.is_empty());
        assert_eq!(hook.after.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_a_failed_migration() {
        let mut tx = MockTx::new();
        tx.expect_execute().returning(|_| Ok(()));
        tx.expect_commit()
            .returning(|| Err(DbError::Transaction("database is locked".to_string())));

        let client = ScriptedClient::new(tx);
        let hook = Arc::new(SpyHook::default());
        let result = SchemaMigrator::new(&client)
            .with_hook(hook.clone())
            .migrate(&diff(), false)
            .await;

        assert!(!result.success);
        assert!(result.errors[0].contains("commit"));
        assert_eq!(hook.after.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_diff_is_trivially_successful() {
        let client = ScriptedClient::new(MockTx::new());
        let hook = Arc::new(SpyHook::default());
        let migrator = SchemaMigrator::new(&client).with_hook(hook.clone());

        for dry_run in [true, false] {
            let result = migrator.migrate(&SchemaDiff::default(), dry_run).await;
            assert!(result.success);
            assert!(result.sql_executed.is_empty());
            assert!(result.errors.is_empty());
        }

        assert_eq!(client.begins.load(Ordering::SeqCst), 0);
        assert_eq!(hook.before.load(Ordering::SeqCst), 2);
        assert_eq!(hook.after.load(Ordering::SeqCst), 2);
    }
}
