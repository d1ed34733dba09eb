//! End-to-end scenarios exercising the catalog, retention evaluator, and
//! deletion executor together against an in-memory store, mirroring the
//! worked examples in barman's retention-policy documentation.

use std::collections::HashMap;
use std::sync::Arc;

use retainer::{
    BackupFile, BackupInfo, BackupStatus, Catalog, DeleteOptions, DeletionExecutor, MemoryStore,
    Mode, NullSnapshotInterface, RetentionEvaluator, RetentionPolicy, Verdict,
};

fn backup(id: &str, wal: &str) -> BackupInfo {
    BackupInfo {
        id: id.to_string(),
        name: None,
        status: BackupStatus::Done,
        begin_wal: wal.to_string(),
        end_wal: wal.to_string(),
        mode: Mode::Concurrent,
        snapshots_info: None,
        files: vec![BackupFile {
            oid: None,
            primary_path: Some(format!("base/{id}/data.tar")),
            additional_paths: vec![],
        }],
        end_time: None,
    }
}

async fn seed(ids_and_wals: &[(&str, &str)]) -> (Arc<MemoryStore>, Catalog<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    for (id, wal) in ids_and_wals {
        let info = backup(id, wal);
        store.seed(
            format!("pg1/base/{id}/backup.info"),
            serde_json::to_vec(&info).unwrap(),
        );
        store.seed(format!("pg1/base/{id}/data.tar"), b"x".to_vec());
    }
    let catalog = Catalog::new(store.clone(), "", "pg1");
    (store, catalog)
}

#[tokio::test]
async fn e1_single_backup_deletion_removes_only_its_own_artifacts() {
    let (store, mut catalog) = seed(&[
        ("20210722T000000", "000000010000000000000073"),
        ("20210723T000000", "000000010000000000000074"),
        ("20210724T000000", "000000010000000000000075"),
        ("20210725T000000", "000000010000000000000076"),
    ])
    .await;

    let snapshots = NullSnapshotInterface::default();
    let mut executor = DeletionExecutor::new(&mut catalog, &snapshots, 0);
    let outcome = executor
        .delete_one("20210724T000000", &DeleteOptions::default())
        .await
        .unwrap();

    assert!(outcome.found);
    assert!(!store.contains("pg1/base/20210724T000000/backup.info"));
    assert!(store.contains("pg1/base/20210722T000000/backup.info"));
    assert!(store.contains("pg1/base/20210725T000000/backup.info"));
}

#[tokio::test]
async fn retention_report_then_delete_by_policy_agree() {
    let (store, mut catalog) = seed(&[
        ("20210722T000000", "000000010000000000000001"),
        ("20210723T000000", "000000010000000000000002"),
        ("20210724T000000", "000000010000000000000003"),
        ("20210725T000000", "000000010000000000000004"),
    ])
    .await;

    let backups = catalog.list_backups().await.unwrap().to_vec();
    let mut pinned = HashMap::new();
    for b in &backups {
        if let Some(target) = catalog.keep_target(&b.id).await.unwrap() {
            pinned.insert(b.id.clone(), target);
        }
    }
    let evaluator = RetentionEvaluator::new(RetentionPolicy::Redundancy(2), 0);
    let verdicts = evaluator.evaluate(&backups, |id| pinned.contains_key(id));
    let obsolete: Vec<&String> = verdicts
        .iter()
        .filter(|(_, v)| **v == Verdict::Obsolete)
        .map(|(id, _)| id)
        .collect();
    assert_eq!(
        obsolete,
        vec!["20210722T000000", "20210723T000000"]
    );

    let snapshots = NullSnapshotInterface::default();
    let mut executor = DeletionExecutor::new(&mut catalog, &snapshots, 0);
    let outcomes = executor
        .delete_by_policy(RetentionPolicy::Redundancy(2))
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(!store.contains("pg1/base/20210722T000000/backup.info"));
    assert!(!store.contains("pg1/base/20210723T000000/backup.info"));
    assert!(store.contains("pg1/base/20210724T000000/backup.info"));
    assert!(store.contains("pg1/base/20210725T000000/backup.info"));
}

#[tokio::test]
async fn pinning_a_backup_keeps_it_out_of_a_policy_run() {
    let (store, mut catalog) = seed(&[
        ("20210722T000000", "000000010000000000000001"),
        ("20210723T000000", "000000010000000000000002"),
        ("20210724T000000", "000000010000000000000003"),
    ])
    .await;
    catalog.pin("20210722T000000", "full").await.unwrap();

    let snapshots = NullSnapshotInterface::default();
    let mut executor = DeletionExecutor::new(&mut catalog, &snapshots, 0);
    executor
        .delete_by_policy(RetentionPolicy::Redundancy(1))
        .await
        .unwrap();

    assert!(store.contains("pg1/base/20210722T000000/backup.info"));
    assert!(!store.contains("pg1/base/20210723T000000/backup.info"));
    assert!(store.contains("pg1/base/20210724T000000/backup.info"));
}

#[tokio::test]
async fn wal_cleanup_runs_after_deleting_the_oldest_backup() {
    let (store, mut catalog) = seed(&[
        ("20210722T000000", "000000010000000000000073"),
        ("20210723T000000", "000000010000000000000076"),
    ])
    .await;
    // WALs strictly between the deleted backup's begin_wal and the next
    // surviving backup's begin_wal are eligible for cleanup.
    store.seed(
        "pg1/wals/0000000100000000/000000010000000000000074",
        b"wal".to_vec(),
    );
    store.seed(
        "pg1/wals/0000000100000000/000000010000000000000075",
        b"wal".to_vec(),
    );
    store.seed(
        "pg1/wals/0000000100000000/000000010000000000000076",
        b"wal".to_vec(),
    );

    let snapshots = NullSnapshotInterface::default();
    let mut executor = DeletionExecutor::new(&mut catalog, &snapshots, 0);
    let outcome = executor
        .delete_one("20210722T000000", &DeleteOptions::default())
        .await
        .unwrap();

    assert!(outcome.found);
    assert!(!store.contains("pg1/wals/0000000100000000/000000010000000000000074"));
    assert!(!store.contains("pg1/wals/0000000100000000/000000010000000000000075"));
    // the next surviving backup's own begin_wal is never deleted
    assert!(store.contains("pg1/wals/0000000100000000/000000010000000000000076"));
}

#[tokio::test]
async fn corrupt_backup_info_is_surfaced_not_silently_dropped() {
    let store = Arc::new(MemoryStore::new());
    store.seed("pg1/base/20210722T000000/backup.info", b"{not json".to_vec());
    let mut catalog = Catalog::new(store, "", "pg1");
    catalog.list_backups().await.unwrap();
    assert_eq!(
        catalog.unreadable_backups(),
        &["20210722T000000".to_string()]
    );

    let snapshots = NullSnapshotInterface::default();
    let mut executor = DeletionExecutor::new(&mut catalog, &snapshots, 0);
    let result = executor
        .delete_one("20210722T000000", &DeleteOptions::default())
        .await;
    assert!(result.is_err());
}
