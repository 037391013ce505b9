//! API loader tests against a mock datastore endpoint
//!
//! Covers:
//! - Pagination by offset until `total` or an empty page
//! - Retry with backoff on HTTP errors and `success: false`
//! - Resume offset as the first requested offset
//! - Long and wide mappings over the wire
//! - Pacing: inter-page delay and retry backoff, measured on the wall clock

use loader::api::ApiClient;
use loader::config::{ApiSource, RawMapping, Settings};
use loader::{EtlError, SourceKind};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const SEARCH_PATH: &str = "/api/3/action/datastore_search";

/// Settings pointed at the mock server, with near-zero delays
fn test_settings(server: &MockServer) -> Settings {
    Settings {
        base_url: format!("{}{}", server.uri(), SEARCH_PATH),
        batch_size: 2,
        max_retries: 3,
        retry_delay: 1,
        request_delay: 0,
        timeout: 5_000,
        ..Default::default()
    }
}

fn long_source() -> ApiSource {
    ApiSource {
        kategori: "Kependudukan".to_string(),
        resource_id: "res-001".to_string(),
        mapping: RawMapping {
            elemen_field: Some("uraian".to_string()),
            tahun_field: Some("tahun".to_string()),
            nilai_field: Some("jumlah".to_string()),
            satuan_field: Some("satuan".to_string()),
            ..Default::default()
        },
        enabled: true,
    }
}

fn page(records: Vec<Value>, total: i64, offset: i64) -> Value {
    json!({
        "success": true,
        "result": {
            "records": records,
            "total": total,
            "limit": 2,
            "offset": offset
        }
    })
}

fn population_row(element: &str, year: i64, value: i64) -> Value {
    json!({ "uraian": element, "tahun": year, "jumlah": value, "satuan": "Jiwa" })
}

async fn mount_page(server: &MockServer, offset: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("resource_id", "res-001"))
        .and(query_param("offset", offset))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

// =============================================================================
// PAGINATION
// =============================================================================

#[tokio::test]
async fn test_pages_until_total_reached() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "0",
        page(
            vec![population_row("Laki-laki", 2019, 1200), population_row("Perempuan", 2019, 1150)],
            3,
            0,
        ),
    )
    .await;
    mount_page(&server, "2", page(vec![population_row("Laki-laki", 2020, 1230)], 3, 2)).await;

    let client = ApiClient::new(&test_settings(&server)).unwrap();
    let outcome = client.load(&long_source(), 0).await.unwrap();

    assert_eq!(outcome.records.len(), 3);
    assert_eq!(outcome.next_offset, 3);
    assert_eq!(outcome.skipped, 0);

    let first = &outcome.records[0];
    assert_eq!(first.category, "Kependudukan");
    assert_eq!(first.element, "Laki-laki");
    assert_eq!(first.year, Some(2019));
    assert_eq!(first.value, Some(1200.0));
    assert_eq!(first.unit.as_deref(), Some("Jiwa"));
    assert_eq!(first.source_kind, SourceKind::Api);
    assert_eq!(first.source_reference, "res-001");
    assert_eq!(first.fingerprint.len(), 64);
}

#[tokio::test]
async fn test_stops_on_empty_page_without_total() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "0",
        json!({
            "success": true,
            "result": { "records": [population_row("Laki-laki", 2019, 1200), population_row("Perempuan", 2019, 1150)] }
        }),
    )
    .await;
    mount_page(&server, "2", json!({ "success": true, "result": { "records": [] } })).await;

    let client = ApiClient::new(&test_settings(&server)).unwrap();
    let outcome = client.load(&long_source(), 0).await.unwrap();

    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.next_offset, 2);
}

#[tokio::test]
async fn test_resume_offset_is_first_request() {
    let server = MockServer::start().await;
    mount_page(&server, "2", page(vec![population_row("Laki-laki", 2020, 1230)], 3, 2)).await;

    let client = ApiClient::new(&test_settings(&server)).unwrap();
    let outcome = client.load(&long_source(), 2).await.unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.next_offset, 3);
    // offset=0 never requested; unmatched requests would get a 404 and fail the load
}

#[tokio::test]
async fn test_non_object_records_are_skipped() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "0",
        page(vec![json!("not a record"), population_row("Laki-laki", 2019, 1200)], 2, 0),
    )
    .await;

    let client = ApiClient::new(&test_settings(&server)).unwrap();
    let outcome = client.load(&long_source(), 0).await.unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.next_offset, 2);
}

// =============================================================================
// RETRY
// =============================================================================

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![population_row("Laki-laki", 2019, 1200)],
            1,
            0,
        )))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(&test_settings(&server)).unwrap();
    let outcome = client.load(&long_source(), 0).await.unwrap();
    assert_eq!(outcome.records.len(), 1);
}

#[tokio::test]
async fn test_success_false_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": false, "error": { "message": "busy" } })),
        )
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![population_row("Perempuan", 2019, 1150)],
            1,
            0,
        )))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(&test_settings(&server)).unwrap();
    let outcome = client.load(&long_source(), 0).await.unwrap();
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].element, "Perempuan");
}

#[tokio::test]
async fn test_exhausted_retries_fail_with_fetch_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let client = ApiClient::new(&test_settings(&server)).unwrap();
    let err = client.load(&long_source(), 4).await.unwrap_err();

    match err {
        EtlError::Fetch {
            resource_id,
            offset,
            attempts,
            message,
        } => {
            assert_eq!(resource_id, "res-001");
            assert_eq!(offset, 4);
            assert_eq!(attempts, 3);
            assert!(message.contains("500"), "unexpected message: {}", message);
        }
        other => panic!("expected Fetch error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failure_on_later_page_fails_whole_load() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "0",
        page(
            vec![population_row("Laki-laki", 2019, 1200), population_row("Perempuan", 2019, 1150)],
            4,
            0,
        ),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let client = ApiClient::new(&test_settings(&server)).unwrap();
    let err = client.load(&long_source(), 0).await.unwrap_err();
    assert!(matches!(err, EtlError::Fetch { offset: 2, .. }));
}

// =============================================================================
// MAPPINGS
// =============================================================================

#[tokio::test]
async fn test_wide_mapping_over_api() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "0",
        page(
            vec![json!({
                "Elemen": "Jumlah Penduduk",
                "Satuan": "Orang",
                "Data 2019": "1.200",
                "Data 2020": "1.250",
                "Keterangan": "-"
            })],
            1,
            0,
        ),
    )
    .await;

    let source = ApiSource {
        kategori: "Demografi".to_string(),
        resource_id: "res-001".to_string(),
        mapping: RawMapping {
            elemen_field: Some("Elemen".to_string()),
            year_column_regex: Some(r"Data (\d{4})".to_string()),
            ..Default::default()
        },
        enabled: true,
    };

    let client = ApiClient::new(&test_settings(&server)).unwrap();
    let outcome = client.load(&source, 0).await.unwrap();

    let facts: Vec<(Option<i32>, Option<f64>)> = outcome.records.iter().map(|r| (r.year, r.value)).collect();
    assert_eq!(facts, vec![(Some(2019), Some(1200.0)), (Some(2020), Some(1250.0))]);
    assert!(outcome.records.iter().all(|r| r.unit.as_deref() == Some("Orang")));
}

#[tokio::test]
async fn test_source_without_mapping_mode_fetches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let source = ApiSource {
        mapping: RawMapping {
            elemen_field: Some("uraian".to_string()),
            ..Default::default()
        },
        ..long_source()
    };

    let client = ApiClient::new(&test_settings(&server)).unwrap();
    let outcome = client.load(&source, 0).await.unwrap();

    assert!(outcome.records.is_empty());
    assert_eq!(outcome.next_offset, 0);
    assert_eq!(outcome.warnings.len(), 1);
}

// =============================================================================
// PACING
// =============================================================================
//
// The mock server answers on its own thread, so these run on the real clock:
// lower bounds are exact, upper bounds leave room for request time but stay
// below the next-worse schedule.

#[tokio::test]
async fn test_request_delay_only_between_pages() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "0",
        page(vec![population_row("A", 2019, 1), population_row("B", 2019, 2)], 5, 0),
    )
    .await;
    mount_page(
        &server,
        "2",
        page(vec![population_row("C", 2019, 3), population_row("D", 2019, 4)], 5, 2),
    )
    .await;
    mount_page(&server, "4", page(vec![population_row("E", 2019, 5)], 5, 4)).await;

    let settings = Settings {
        request_delay: 150,
        ..test_settings(&server)
    };
    let client = ApiClient::new(&settings).unwrap();

    let started = Instant::now();
    let outcome = client.load(&long_source(), 0).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome.records.len(), 5);
    // Three pages, two gaps; a delay before the first or after the last page would add 150ms
    assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(450), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn test_single_page_is_not_delayed() {
    let server = MockServer::start().await;
    mount_page(&server, "0", page(vec![population_row("A", 2019, 1)], 1, 0)).await;

    let settings = Settings {
        request_delay: 300,
        ..test_settings(&server)
    };
    let client = ApiClient::new(&settings).unwrap();

    let started = Instant::now();
    client.load(&long_source(), 0).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(300), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn test_backoff_doubles_between_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let settings = Settings {
        retry_delay: 100,
        max_retries: 3,
        ..test_settings(&server)
    };
    let client = ApiClient::new(&settings).unwrap();
    assert_eq!(client.backoff_delay(1), Duration::from_millis(100));
    assert_eq!(client.backoff_delay(2), Duration::from_millis(200));

    let started = Instant::now();
    let err = client.load(&long_source(), 0).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, EtlError::Fetch { attempts: 3, .. }));
    // 100ms + 200ms; a constant backoff gives 200ms, a wait after the last attempt 700ms
    assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(500), "elapsed {:?}", elapsed);
}
