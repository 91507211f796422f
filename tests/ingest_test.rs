//! Archive ingestion end to end: fake tarball host → normalizer → loader.

mod common;

use chrono::{TimeZone, Utc};

use aot_pipeline::{FetchError, PipelineError};
use common::{create_test_bundle, create_test_fixture, create_test_store, ARCHIVE_HEADER, TSYS01};

// ---

fn day_15() -> (String, Vec<u8>) {
    // ---
    let csv = format!(
        "{ARCHIVE_HEADER}
2019/04/15 10:01:00,001e0610ba46,metsense,tsys01,temperature,1,10.0
2019/04/15 10:20:00,001e0610ba46,metsense,tsys01,temperature,1,12.0
2019/04/15 10:45:00,001e0610ba46,metsense,tsys01,temperature,1,13.5
2019/04/15 10:05:00,001e0610bbe5,metsense,tsys01,temperature,1,NA
2019/04/15 10:05:00,001e0610bbe5,chemsense,co,concentration,1,0.3
"
    );
    create_test_bundle("chicago-complete.daily.2019-04-15", &csv)
}

fn day_17() -> (String, Vec<u8>) {
    // ---
    let csv = format!(
        "{ARCHIVE_HEADER}
2019/04/17 08:00:00,001e0610bbe5,metsense,tsys01,temperature,1,9.0
"
    );
    create_test_bundle("chicago-complete.daily.2019-04-17", &csv)
}

#[tokio::test]
async fn test_single_day_is_resampled_and_loaded() {
    // ---
    let fixture = create_test_fixture(vec![day_15()]).await;
    let store = create_test_store(&[TSYS01]).await;

    let report = fixture.pipeline(&store).run_ingestion("2019-04-15").await.unwrap();

    assert_eq!(report.inserted_count, 2);
    assert!(report.errors.is_empty());
    let batch = &report.batches[0];
    assert_eq!(batch.bundle, "chicago-complete.daily.2019-04-15");
    assert_eq!(batch.summary.received, 3);
    assert_eq!(batch.summary.dropped_unknown_sensor, 1);

    let rows = store.observations();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, 1);
    assert_eq!(rows[0].timestamp, Utc.with_ymd_and_hms(2019, 4, 15, 10, 0, 0).unwrap());
    assert!((rows[0].value_hrf - 11.0).abs() < 1e-9);
    assert_eq!(rows[1].id, 2);
    assert_eq!(rows[1].timestamp, Utc.with_ymd_and_hms(2019, 4, 15, 10, 30, 0).unwrap());
    assert!((rows[1].value_hrf - 13.5).abs() < 1e-9);

    assert!(fixture.scratch_is_empty());
}

#[tokio::test]
async fn test_reingesting_a_day_is_rejected_without_writes() {
    // ---
    let fixture = create_test_fixture(vec![day_15()]).await;
    let store = create_test_store(&[TSYS01]).await;
    let pipeline = fixture.pipeline(&store);

    pipeline.run_ingestion("2019-04-15").await.unwrap();
    let err = pipeline.run_ingestion("2019-04-15").await.unwrap_err();

    assert!(matches!(err, PipelineError::Store(_)));
    assert_eq!(store.observations().len(), 2);
    assert!(fixture.scratch_is_empty());
}

#[tokio::test]
async fn test_range_collects_failed_days_and_keeps_ids_contiguous() {
    // ---
    let fixture = create_test_fixture(vec![day_15(), day_17()]).await;
    let store = create_test_store(&[TSYS01]).await;

    let report = fixture
        .pipeline(&store)
        .run_ingestion("2019-04-15..2019-04-17")
        .await
        .unwrap();

    assert_eq!(report.batches.len(), 2);
    assert_eq!(report.inserted_count, 3);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].bundle, "chicago-complete.daily.2019-04-16");

    let ids: Vec<i64> = store.observations().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_ne!(report.batches[0].batch_id, report.batches[1].batch_id);
    assert!(fixture.scratch_is_empty());
}

#[tokio::test]
async fn test_missing_bundle_is_a_fetch_error() {
    // ---
    let fixture = create_test_fixture(vec![]).await;
    let store = create_test_store(&[TSYS01]).await;

    let err = fixture
        .pipeline(&store)
        .run_ingestion("2019-04-16")
        .await
        .unwrap_err();

    match err {
        PipelineError::Fetch(FetchError::Status { status, .. }) => {
            assert_eq!(status, reqwest::StatusCode::NOT_FOUND)
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert!(store.observations().is_empty());
    assert!(fixture.scratch_is_empty());
}

#[tokio::test]
async fn test_weekly_bundle() {
    // ---
    let csv = format!(
        "{ARCHIVE_HEADER}
2019/04/09 23:59:59,001e0610ba46,metsense,tsys01,temperature,1,4.0
2019/04/10 00:00:00,001e0610ba46,metsense,tsys01,temperature,1,6.0
"
    );
    let bundle = create_test_bundle("chicago-complete.weekly.2019-04-08-to-2019-04-14", &csv);
    let fixture = create_test_fixture(vec![bundle]).await;
    let store = create_test_store(&[TSYS01]).await;

    let report = fixture
        .pipeline(&store)
        .run_ingestion("2019-04-08-to-2019-04-14")
        .await
        .unwrap();

    assert_eq!(report.inserted_count, 2);
    let stamps: Vec<_> = store.observations().iter().map(|r| r.timestamp).collect();
    assert_eq!(
        stamps,
        vec![
            Utc.with_ymd_and_hms(2019, 4, 9, 23, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2019, 4, 10, 0, 0, 0).unwrap(),
        ]
    );
}

#[tokio::test]
async fn test_missing_column_is_a_schema_mismatch() {
    // ---
    let csv = "timestamp,node_id,subsystem,sensor,parameter\n\
               2019/04/15 10:01:00,001e0610ba46,metsense,tsys01,temperature\n";
    let bundle = create_test_bundle("chicago-complete.daily.2019-04-15", csv);
    let fixture = create_test_fixture(vec![bundle]).await;
    let store = create_test_store(&[TSYS01]).await;

    let err = fixture
        .pipeline(&store)
        .run_ingestion("2019-04-15")
        .await
        .unwrap_err();

    match err {
        PipelineError::SchemaMismatch { missing, .. } => assert_eq!(missing, vec!["value_hrf"]),
        other => panic!("expected schema mismatch, got {other:?}"),
    }
    assert!(fixture.scratch_is_empty());
}

#[tokio::test]
async fn test_malformed_requests_are_rejected() {
    // ---
    let fixture = create_test_fixture(vec![]).await;
    let store = create_test_store(&[TSYS01]).await;
    let pipeline = fixture.pipeline(&store);

    for bad in ["2019-13-01", "yesterday", "2019-04-17..2019-04-15"] {
        let err = pipeline.run_ingestion(bad).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)), "{bad}");
    }
}

#[tokio::test]
async fn test_slow_archive_host_times_out() {
    // ---
    let mut fixture = create_test_fixture(vec![day_15()]).await;
    fixture.use_slow_upstream();
    let store = create_test_store(&[TSYS01]).await;

    let err = fixture
        .pipeline(&store)
        .run_ingestion("2019-04-15")
        .await
        .unwrap_err();

    assert!(
        matches!(err, PipelineError::Fetch(FetchError::Timeout { .. })),
        "{err:?}"
    );
    assert!(store.observations().is_empty());
    assert!(fixture.scratch_is_empty());
}
