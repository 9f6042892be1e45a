//! End-to-end migrate / status / rollback cycle through the public API

use migro::{
    Backend, MemoryBackend, MigrateOptions, Migrator, RollbackOptions, SourceRegistry,
    StatusOptions,
};

fn users_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register("users", |m| {
        m.create(|t| {
            t.id("id");
            t.string("name", Some(255));
        })
        .description("create users table");
        m.modify(
            |t| {
                t.add_column("email", "VARCHAR(255)");
            },
            |t| {
                t.drop_column("email");
            },
        )
        .description("add email column");
    });
    registry
}

#[tokio::test]
async fn full_cycle_over_one_manifest() {
    let backend = MemoryBackend::new();
    let migrator = Migrator::new(users_registry(), backend.clone());

    migrator.install().await.unwrap();
    assert!(backend.is_installed().await.unwrap());

    // migrate: both steps land in batch 1
    let report = migrator.migrate(&MigrateOptions::default()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.batch, Some(1));
    assert_eq!(report.applied_count(), 2);

    let rows = backend.rows();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.table == "users" && r.tag.is_none()));
    assert!(rows.iter().all(|r| r.batch == 1));

    let statements = backend.statements();
    assert!(statements[0].contains("CREATE TABLE users"));
    assert!(statements[1].contains("ADD COLUMN email"));

    // status: every step reports migrated
    let status = migrator.status(&StatusOptions::default()).await.unwrap();
    assert!(status.manifests[0].is_fully_migrated());

    // rollback the batch: column dropped before the table
    let report = migrator
        .rollback(&RollbackOptions {
            batches: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.groups[0].reverted, vec![2, 1]);
    assert!(backend.rows().is_empty());

    let statements = backend.statements();
    assert!(statements[2].contains("DROP COLUMN email"));
    assert!(statements[3].contains("DROP TABLE IF EXISTS users"));

    // status flips back to not migrated
    let status = migrator.status(&StatusOptions::default()).await.unwrap();
    assert!(!status.manifests[0].is_fully_migrated());

    // re-running migrate reapplies everything identically; the ledger is
    // empty again, so batch numbering restarts at 1
    let report = migrator.migrate(&MigrateOptions::default()).await.unwrap();
    assert_eq!(report.applied_count(), 2);
    assert_eq!(report.batch, Some(1));
    assert_eq!(backend.applied_steps("users", None), vec![1, 2]);
}

#[tokio::test]
async fn prefix_invariant_holds_across_mixed_invocations() {
    let backend = MemoryBackend::new();
    let migrator = Migrator::new(users_registry(), backend.clone());

    let assert_prefix = |backend: &MemoryBackend| {
        let steps = backend.applied_steps("users", None);
        let expected: Vec<i32> = (1..=steps.len() as i32).collect();
        assert_eq!(steps, expected);
    };

    migrator
        .migrate(&MigrateOptions {
            steps_limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_prefix(&backend);

    migrator.migrate(&MigrateOptions::default()).await.unwrap();
    assert_prefix(&backend);

    migrator
        .rollback(&RollbackOptions {
            steps_limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_prefix(&backend);

    migrator
        .rollback(&RollbackOptions {
            batches: Some(5),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_prefix(&backend);
    assert!(backend.rows().is_empty());
}
