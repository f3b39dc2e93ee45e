//! Tests des moteurs d'export / chargement et des séquences du cycle de vie
//!
//! Le stockage est simulé en mémoire (`support::MemoryStore`); aucun
//! serveur PostgreSQL n'est nécessaire.

mod support;

use std::path::Path;

use adcode::{CodeError, RegionDir, KEY_MULTIPLIER};
use fence_pg::lifecycle::backup::DumpTools;
use fence_pg::{
    BackupCoordinator, DatabaseConfig, ExportConfig, ExportEngine, ExportStatus, FenceError,
    Lifecycle, LoadEngine, Step, TableName,
};
use geojson::Geometry;
use support::{code, polygon, MemoryStore};
use tempfile::TempDir;

fn region_dir(root: &Path) -> RegionDir {
    let dir = RegionDir::new(root.join("fence"));
    dir.ensure().unwrap();
    dir
}

fn parse(raw: &str) -> Geometry {
    serde_json::from_str(raw).unwrap()
}

// ============================================================================
// Chargement
// ============================================================================

#[tokio::test]
async fn test_load_builds_rows_from_file_names() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());
    dir.write(code(110_000), &polygon(0.0)).unwrap();
    dir.write(code(120_000), &polygon(1.0)).unwrap();

    let store = MemoryStore::new();
    let report = LoadEngine::new(&store, dir)
        .load(&[code(110_000), code(120_000)])
        .await
        .unwrap();

    assert_eq!(report.rows, 2);
    assert_eq!(report.upserted, 2);
    assert_eq!(store.row(code(110_000)), Some((110_000, polygon(0.0))));
    assert_eq!(store.row(code(120_000)), Some((120_000, polygon(1.0))));
    assert!(store.snapshot().contains_key(&110_000_000_000));
    assert!(store.snapshot().contains_key(&120_000_000_000));
}

#[tokio::test]
async fn test_reload_updated_file_touches_only_that_row() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());
    dir.write(code(110_000), &polygon(0.0)).unwrap();
    dir.write(code(120_000), &polygon(1.0)).unwrap();

    let store = MemoryStore::new();
    let loader = LoadEngine::new(&store, dir.clone());
    loader.load(&[]).await.unwrap();

    dir.write(code(110_000), &polygon(5.0)).unwrap();
    loader.load(&[code(110_000)]).await.unwrap();

    assert_eq!(store.row(code(110_000)), Some((110_000, polygon(5.0))));
    assert_eq!(store.row(code(120_000)), Some((120_000, polygon(1.0))));
    assert_eq!(store.snapshot().len(), 2);
}

#[tokio::test]
async fn test_load_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());
    for (i, value) in [110_000, 120_000, 130_000].into_iter().enumerate() {
        dir.write(code(value), &polygon(i as f64)).unwrap();
    }

    let store = MemoryStore::new();
    let loader = LoadEngine::new(&store, dir);
    loader.load(&[]).await.unwrap();
    let first = store.snapshot();
    loader.load(&[]).await.unwrap();

    assert_eq!(store.snapshot(), first);
}

#[tokio::test]
async fn test_load_keeps_code_invariant() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());
    for value in [110_000, 310_000, 650_000] {
        dir.write(code(value), &polygon(0.0)).unwrap();
    }

    let store = MemoryStore::new();
    LoadEngine::new(&store, dir)
        .load(&[code(650_000), code(110_000), code(310_000), code(110_000)])
        .await
        .unwrap();

    let rows = store.snapshot();
    assert_eq!(rows.len(), 3);
    for (key, (adcode, _)) in rows {
        assert_eq!(key, i64::from(adcode) * KEY_MULTIPLIER);
    }
}

#[tokio::test]
async fn test_load_is_atomic() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());
    dir.write(code(110_000), &polygon(9.0)).unwrap();
    dir.write(code(120_000), "not a geometry").unwrap();

    let store = MemoryStore::new();
    store.insert_raw(110_000_000_000, 110_000, &polygon(0.0));
    let before = store.snapshot();

    let err = LoadEngine::new(&store, dir).load(&[]).await.unwrap_err();

    assert!(matches!(err, FenceError::LoadBatchFailure { rows: 2, .. }));
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn test_load_missing_file_never_reaches_storage() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());
    dir.write(code(110_000), &polygon(0.0)).unwrap();

    let store = MemoryStore::new();
    let err = LoadEngine::new(&store, dir)
        .load(&[code(110_000), code(130_000)])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FenceError::Code(CodeError::MissingRegionFile(_))
    ));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_load_empty_directory_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());

    let store = MemoryStore::new();
    let report = LoadEngine::new(&store, dir).load(&[]).await.unwrap();

    assert_eq!(report.rows, 0);
    assert!(store.calls().is_empty());
}

// ============================================================================
// Export
// ============================================================================

#[tokio::test]
async fn test_export_all_skips_finer_grained_rows() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());

    let store = MemoryStore::new();
    store.insert_raw(110_000_000_000, 110_000, &polygon(0.0));
    // Multiple exact de 1 000 000: clôture agrégée, exportée
    store.insert_raw(110_100_000_000, 110_100, &polygon(2.0));
    store.insert_raw(110_101_001_000, 110_101, &polygon(1.0));

    let report = ExportEngine::new(&store, dir.clone(), ExportConfig::default())
        .export(&[])
        .await
        .unwrap();

    assert_eq!(report.status, ExportStatus::Success);
    assert_eq!(report.written, vec![code(110_000), code(110_100)]);
    assert_eq!(dir.list().unwrap(), vec![code(110_000), code(110_100)]);
}

#[tokio::test]
async fn test_export_all_refreshes_directory() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());
    dir.write(code(990_000), &polygon(0.0)).unwrap();

    let store = MemoryStore::new();
    store.insert_raw(110_000_000_000, 110_000, &polygon(0.0));

    let report = ExportEngine::new(&store, dir.clone(), ExportConfig::default())
        .export(&[])
        .await
        .unwrap();

    assert!(report.cleared);
    assert_eq!(report.jobs, 16);
    assert_eq!(dir.list().unwrap(), vec![code(110_000)]);
}

#[tokio::test]
async fn test_export_all_enumeration_failure_aborts_before_workers() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());
    dir.write(code(990_000), &polygon(0.0)).unwrap();

    let store = MemoryStore::new();
    store.insert_raw(110_000_000_000, 110_000, &polygon(0.0));
    store.fail_op("aggregate_codes");

    let err = ExportEngine::new(&store, dir.clone(), ExportConfig::default())
        .export(&[])
        .await
        .unwrap_err();

    assert!(matches!(err, FenceError::StorageUnavailable { .. }));
    assert_eq!(store.calls(), vec!["aggregate_codes"]);
    // Le répertoire n'a pas été vidé
    assert_eq!(dir.list().unwrap(), vec![code(990_000)]);
}

#[tokio::test]
async fn test_partial_export_keeps_other_files() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());
    dir.write(code(990_000), &polygon(0.0)).unwrap();

    let store = MemoryStore::new();
    store.insert_raw(110_000_000_000, 110_000, &polygon(0.0));
    store.insert_raw(120_000_000_000, 120_000, &polygon(1.0));

    let report = ExportEngine::new(&store, dir.clone(), ExportConfig::default())
        .export(&[code(110_000), code(110_000)])
        .await
        .unwrap();

    assert!(!report.cleared);
    assert_eq!(report.jobs, 4);
    assert_eq!(report.requested, 1);
    assert_eq!(dir.list().unwrap(), vec![code(110_000), code(990_000)]);
    // Aucune énumération pour un export partiel
    assert!(!store.calls().contains(&"aggregate_codes"));
}

#[tokio::test]
async fn test_failed_unit_does_not_abort_siblings() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());

    let store = MemoryStore::new();
    for (i, value) in [110_000u32, 120_000, 130_000].into_iter().enumerate() {
        store.insert_raw(i64::from(value) * KEY_MULTIPLIER, value, &polygon(i as f64));
    }
    store.fail_fetch(code(120_000));

    let err = ExportEngine::new(&store, dir.clone(), ExportConfig::default())
        .export(&[])
        .await
        .unwrap_err();

    let FenceError::PartialExportFailure(report) = err else {
        panic!("expected PartialExportFailure, got {err}");
    };
    assert_eq!(report.status, ExportStatus::PartialSuccess);
    assert_eq!(report.written, vec![code(110_000), code(130_000)]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].code, code(120_000));
    assert_eq!(dir.list().unwrap(), vec![code(110_000), code(130_000)]);
}

#[tokio::test]
async fn test_partial_export_of_unknown_code_reports_failure() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());

    let store = MemoryStore::new();
    store.insert_raw(110_000_000_000, 110_000, &polygon(0.0));

    let err = ExportEngine::new(&store, dir.clone(), ExportConfig::default())
        .export(&[code(110_000), code(540_000)])
        .await
        .unwrap_err();

    let FenceError::PartialExportFailure(report) = err else {
        panic!("expected PartialExportFailure, got {err}");
    };
    assert_eq!(report.written, vec![code(110_000)]);
    assert!(report.failures[0].message.contains("No fence stored for 540000"));
}

#[tokio::test]
async fn test_export_rejects_non_polygon_geometry() {
    let tmp = TempDir::new().unwrap();
    let dir = region_dir(tmp.path());

    let store = MemoryStore::new();
    store.insert_raw(
        110_000_000_000,
        110_000,
        r#"{"type":"Point","coordinates":[116.4,39.9]}"#,
    );

    let err = ExportEngine::new(&store, dir.clone(), ExportConfig::default())
        .export(&[code(110_000)])
        .await
        .unwrap_err();

    assert!(matches!(err, FenceError::PartialExportFailure(_)));
    assert!(dir.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_export_then_load_round_trip() {
    let tmp = TempDir::new().unwrap();
    let source = RegionDir::new(tmp.path().join("source"));
    let target = RegionDir::new(tmp.path().join("target"));
    source.ensure().unwrap();
    for (i, value) in [110_000, 120_000, 310_000].into_iter().enumerate() {
        source.write(code(value), &polygon(i as f64)).unwrap();
    }

    let first = MemoryStore::new();
    LoadEngine::new(&first, source).load(&[]).await.unwrap();
    ExportEngine::new(&first, target.clone(), ExportConfig::default())
        .export(&[])
        .await
        .unwrap();

    let second = MemoryStore::new();
    LoadEngine::new(&second, target).load(&[]).await.unwrap();

    let (a, b) = (first.snapshot(), second.snapshot());
    assert_eq!(a.len(), b.len());
    for (key, (adcode, geojson)) in a {
        let (other_adcode, other_geojson) = &b[&key];
        assert_eq!(adcode, *other_adcode);
        assert_eq!(parse(&geojson), parse(other_geojson));
    }
}

// ============================================================================
// Séquences du cycle de vie
// ============================================================================

fn seeded_dir(root: &Path, codes: &[u32]) -> RegionDir {
    let dir = region_dir(root);
    for (i, value) in codes.iter().enumerate() {
        dir.write(code(*value), &polygon(i as f64)).unwrap();
    }
    dir
}

#[tokio::test]
async fn test_setup_creates_loads_and_indexes() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let lifecycle = Lifecycle::new(
        &store,
        LoadEngine::new(&store, seeded_dir(tmp.path(), &[110_000, 120_000])),
    );

    let report = lifecycle.setup().await.unwrap();

    assert_eq!(report.rows, 2);
    assert_eq!(
        store.calls(),
        vec!["create_table", "upsert_batch", "create_indexes"]
    );
}

#[tokio::test]
async fn test_setup_reports_index_step_and_keeps_loaded_rows() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.fail_op("create_indexes");
    let lifecycle = Lifecycle::new(
        &store,
        LoadEngine::new(&store, seeded_dir(tmp.path(), &[110_000])),
    );

    let err = lifecycle.setup().await.unwrap_err();

    assert_eq!(err.failed_step(), Some(Step::Index));
    assert!(err.to_string().contains("step 'index'"));
    // Pas de rollback des étapes précédentes
    assert_eq!(store.snapshot().len(), 1);
}

#[tokio::test]
async fn test_reset_stops_at_failed_create() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert_raw(110_000_000_000, 110_000, &polygon(0.0));
    store.fail_op("create_table");
    let lifecycle = Lifecycle::new(&store, LoadEngine::new(&store, region_dir(tmp.path())));

    let err = lifecycle.reset().await.unwrap_err();

    assert_eq!(err.failed_step(), Some(Step::Create));
    assert_eq!(store.calls(), vec!["drop_table", "create_table"]);
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn test_reload_fails_at_check_on_orphan_adcode() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.set_reference(&[110_000]);
    let lifecycle = Lifecycle::new(
        &store,
        LoadEngine::new(&store, seeded_dir(tmp.path(), &[110_000, 120_000])),
    );

    let err = lifecycle.reload().await.unwrap_err();

    assert_eq!(err.failed_step(), Some(Step::Check));
    match err {
        FenceError::LifecycleSequenceFailure { source, .. } => match *source {
            FenceError::CheckFailed(report) => {
                assert_eq!(report.orphan_adcodes, vec![code(120_000)]);
            }
            other => panic!("expected CheckFailed, got {other}"),
        },
        other => panic!("expected LifecycleSequenceFailure, got {other}"),
    }
    // Les données chargées restent en place
    assert_eq!(store.snapshot().len(), 2);
}

#[tokio::test]
async fn test_reload_replaces_table_contents() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert_raw(990_000_000_000, 990_000, &polygon(0.0));
    let lifecycle = Lifecycle::new(
        &store,
        LoadEngine::new(&store, seeded_dir(tmp.path(), &[110_000])),
    );

    let (loaded, checked) = lifecycle.reload().await.unwrap();

    assert_eq!(loaded.rows, 1);
    assert_eq!(checked.rows, 1);
    assert!(!checked.reference_checked);
    assert!(store.row(code(990_000)).is_none());
}

#[tokio::test]
async fn test_check_flags_broken_key() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert_raw(110_000_000_000, 120_000, &polygon(0.0));
    let lifecycle = Lifecycle::new(&store, LoadEngine::new(&store, region_dir(tmp.path())));

    let err = lifecycle.check().await.unwrap_err();

    let FenceError::CheckFailed(report) = err else {
        panic!("expected CheckFailed, got {err}");
    };
    assert_eq!(report.bad_keys, 1);
    assert_eq!(report.invalid_geometries, 0);
}

// ============================================================================
// Sauvegarde / restauration
// ============================================================================

fn tools(pg_dump: &str, pg_restore: &str) -> DumpTools {
    DumpTools {
        pg_dump: pg_dump.into(),
        pg_restore: pg_restore.into(),
    }
}

#[tokio::test]
async fn test_restore_without_artifact_touches_nothing() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let database = DatabaseConfig::default();
    let table: TableName = "fence".parse().unwrap();
    let tools = DumpTools::default();

    let err = BackupCoordinator::new(&store, &database, &table, &tools)
        .restore(&tmp.path().join("fence.dump"))
        .await
        .unwrap_err();

    assert!(matches!(err, FenceError::MissingBackup(_)));
    assert!(store.calls().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_backup_creates_parent_directory() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let database = DatabaseConfig::default();
    let table: TableName = "fence".parse().unwrap();
    let tools = tools("true", "true");
    let path = tmp.path().join("backups").join("fence.dump");

    let written = BackupCoordinator::new(&store, &database, &table, &tools)
        .backup(&path)
        .await
        .unwrap();

    assert_eq!(written, path);
    assert!(tmp.path().join("backups").is_dir());
}

#[cfg(unix)]
#[tokio::test]
async fn test_backup_surfaces_tool_failure() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let database = DatabaseConfig::default();
    let table: TableName = "fence".parse().unwrap();
    let tools = tools("false", "true");

    let err = BackupCoordinator::new(&store, &database, &table, &tools)
        .backup(&tmp.path().join("fence.dump"))
        .await
        .unwrap_err();

    assert!(matches!(err, FenceError::ExternalTool { ref tool, .. } if tool == "false"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_restore_drops_then_restores() {
    let tmp = TempDir::new().unwrap();
    let artifact = tmp.path().join("fence.dump");
    std::fs::write(&artifact, b"PGDMP").unwrap();

    let store = MemoryStore::new();
    store.insert_raw(110_000_000_000, 110_000, &polygon(0.0));
    let database = DatabaseConfig::default();
    let table: TableName = "fence".parse().unwrap();
    let tools = tools("true", "true");

    BackupCoordinator::new(&store, &database, &table, &tools)
        .restore(&artifact)
        .await
        .unwrap();

    assert_eq!(store.calls(), vec!["drop_table"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_restore_failure_names_restore_step() {
    let tmp = TempDir::new().unwrap();
    let artifact = tmp.path().join("fence.dump");
    std::fs::write(&artifact, b"PGDMP").unwrap();

    let store = MemoryStore::new();
    let database = DatabaseConfig::default();
    let table: TableName = "fence".parse().unwrap();
    let tools = tools("true", "false");

    let err = BackupCoordinator::new(&store, &database, &table, &tools)
        .restore(&artifact)
        .await
        .unwrap_err();

    assert_eq!(err.failed_step(), Some(Step::Restore));
    assert_eq!(store.calls(), vec!["drop_table"]);
}
