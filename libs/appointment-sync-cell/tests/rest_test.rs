use assert_matches::assert_matches;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_sync_cell::*;
use shared_database::ApiError;
use shared_models::{Appointment, AppointmentSource, AppointmentStatus, OfficeCode, SessionType};
use shared_utils::test_utils::{MockProviderPayloads, TestConfig};

fn record(id: &str, office: &str) -> Appointment {
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    Appointment {
        id: id.to_string(),
        client_id: "c-1".to_string(),
        client_name: "Client".to_string(),
        clinician_id: "t-1".to_string(),
        clinician_name: "Clinician".to_string(),
        start_time: start,
        end_time: start + Duration::minutes(50),
        session_type: SessionType::InPerson,
        status: AppointmentStatus::Scheduled,
        office: OfficeCode::from(office),
        assignment: None,
        needs_assignment: false,
        conflicts: vec![],
        source: AppointmentSource::Provider,
        series_id: None,
        notes: None,
        created_at: start,
        last_modified: start,
    }
}

// ==============================================================================
// RECORD STORE
// ==============================================================================

#[tokio::test]
async fn test_get_appointment_filters_tombstones() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::default().with_record_store(&mock_server.uri()).to_app_config();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", "eq.a1"))
        .and(query_param("status", "neq.deleted"))
        .and(header("apikey", "test-service-key"))
        .and(header("authorization", "Bearer test-service-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([record("a1", "B-2")])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = RestRecordStore::new(&config);
    let found = store.get_appointment("a1").await.expect("Failed to fetch appointment");

    let found = found.expect("appointment should exist");
    assert_eq!(found.id, "a1");
    assert_eq!(found.office, OfficeCode::from("B-2"));
}

#[tokio::test]
async fn test_get_missing_appointment_is_none() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::default().with_record_store(&mock_server.uri()).to_app_config();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let store = RestRecordStore::new(&config);
    assert!(store.get_appointment("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_upsert_asks_for_merge_on_conflict() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::default().with_record_store(&mock_server.uri()).to_app_config();

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(header("prefer", "resolution=merge-duplicates,return=minimal"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = RestRecordStore::new(&config);
    store
        .upsert_appointment(&record("a1", "C-1"))
        .await
        .expect("Upsert should succeed");
}

#[tokio::test]
async fn test_store_outage_is_transient() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::default().with_record_store(&mock_server.uri()).to_app_config();

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(503).set_body_json(MockProviderPayloads::error_response("down", "503")))
        .mount(&mock_server)
        .await;

    let store = RestRecordStore::new(&config);
    let err = store.upsert_appointment(&record("a1", "C-1")).await.unwrap_err();

    assert_matches!(err, ApiError::Server { status: 503, .. });
    assert!(err.is_transient());
    assert_matches!(SyncError::from(err), SyncError::TransientInfra(_));
}

#[tokio::test]
async fn test_rejected_write_is_not_transient() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::default().with_record_store(&mock_server.uri()).to_app_config();

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", "eq.a1"))
        .respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
        .mount(&mock_server)
        .await;

    let store = RestRecordStore::new(&config);
    let err = store.delete_appointment("a1").await.unwrap_err();

    assert!(!err.is_transient());
    assert_matches!(SyncError::from(err), SyncError::Store(_));
}

#[tokio::test]
async fn test_value_clear_patches_a_tombstone() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::default().with_record_store(&mock_server.uri()).to_app_config();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", "eq.a1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = RestRecordStore::new(&config);
    store.clear_appointment("a1").await.expect("Clear should succeed");
}

#[tokio::test]
async fn test_unconfigured_store_fails_fast() {
    let store = RestRecordStore::new(&TestConfig::default().to_app_config());

    let err = store.get_appointment("a1").await.unwrap_err();
    assert_matches!(err, ApiError::NotConfigured(_));
    assert_matches!(SyncError::from(err), SyncError::Configuration(_));
}

// ==============================================================================
// SCHEDULING PROVIDER
// ==============================================================================

#[tokio::test]
async fn test_provider_fetch_sends_auth_key() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::default().with_provider(&mock_server.uri()).to_app_config();
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

    Mock::given(method("GET"))
        .and(path("/appointments/p-1"))
        .and(header("x-auth-key", "test-provider-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(MockProviderPayloads::appointment("p-1", "c-1", "t-1", start, 50)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = HttpSchedulingProvider::new(&config);
    let appt = provider
        .fetch_appointment("p-1")
        .await
        .expect("Failed to fetch appointment")
        .expect("appointment should exist");

    assert_eq!(appt.practitioner_id.as_deref(), Some("t-1"));
    assert_eq!(appt.start(), Some(start));
}

#[tokio::test]
async fn test_provider_404_is_none() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::default().with_provider(&mock_server.uri()).to_app_config();

    Mock::given(method("GET"))
        .and(path("/intakes/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(MockProviderPayloads::error_response("not found", "404")))
        .mount(&mock_server)
        .await;

    let provider = HttpSchedulingProvider::new(&config);
    assert!(provider.fetch_intake("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_provider_list_uses_date_window() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::default().with_provider(&mock_server.uri()).to_app_config();
    let start = Utc.with_ymd_and_hms(2026, 3, 3, 15, 0, 0).unwrap();

    Mock::given(method("GET"))
        .and(path("/appointments"))
        .and(query_param("startDate", "2026-03-02"))
        .and(query_param("endDate", "2026-03-09"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockProviderPayloads::appointment("p-1", "c-1", "t-1", start, 50),
            MockProviderPayloads::appointment("p-2", "c-2", "t-1", start + Duration::hours(1), 50)
        ])))
        .mount(&mock_server)
        .await;

    let provider = HttpSchedulingProvider::new(&config);
    let listed = provider
        .list_appointments(
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
        )
        .await
        .expect("Failed to list appointments");

    assert_eq!(listed.len(), 2);
}
