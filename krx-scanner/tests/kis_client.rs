//! Integration tests for the KIS HTTP adapter against a mock server.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use krx_scanner::data::{Granularity, KisClient, KisSession, MarketDataProvider, ProviderError};

const CHART_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice";
const INVESTOR_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-investor";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn client(server: &MockServer) -> KisClient {
    let http = reqwest::Client::new();
    let session = Arc::new(KisSession::new(
        http.clone(),
        server.uri(),
        "test-key",
        "test-secret",
        None,
    ));
    KisClient::new(session, http, server.uri(), 100, 5)
        .with_retry_delays(Duration::from_millis(10), Duration::from_millis(10))
}

/// Client whose session starts from a cached token.
fn client_with_cached_token(server: &MockServer, dir: &tempfile::TempDir, value: &str) -> KisClient {
    let path = dir.path().join("kis_token.json");
    let expiry = Local::now().naive_local() + ChronoDuration::hours(6);
    std::fs::write(
        &path,
        json!({
            "access_token": value,
            "expiry": expiry.format("%Y-%m-%d %H:%M:%S").to_string(),
        })
        .to_string(),
    )
    .unwrap();

    let http = reqwest::Client::new();
    let session = Arc::new(KisSession::new(
        http.clone(),
        server.uri(),
        "test-key",
        "test-secret",
        Some(path),
    ));
    KisClient::new(session, http, server.uri(), 100, 5)
        .with_retry_delays(Duration::from_millis(10), Duration::from_millis(10))
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth2/tokenP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "token_type": "Bearer",
            "expires_in": 86400
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn chart_body() -> serde_json::Value {
    // Most recent first, as the API returns it
    json!({
        "rt_cd": "0",
        "msg_cd": "MCA00000",
        "msg1": "정상처리 되었습니다.",
        "output1": {"hts_kor_isnm": "삼성전자"},
        "output2": [
            {
                "stck_bsop_date": "20260102",
                "stck_clpr": "71500",
                "stck_oprc": "70000",
                "stck_hgpr": "72000",
                "stck_lwpr": "69900",
                "acml_vol": "15000000",
                "acml_tr_pbmn": "1070000000000"
            },
            {
                "stck_bsop_date": "20251230",
                "stck_clpr": "70000",
                "stck_oprc": "69500",
                "stck_hgpr": "70500",
                "stck_lwpr": "69000",
                "acml_vol": "12000000",
                "acml_tr_pbmn": "840000000000"
            },
            {"stck_bsop_date": ""}
        ]
    })
}

#[tokio::test]
async fn test_price_series_parsed_ascending_with_auth_headers() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .and(header("authorization", "Bearer test-token"))
        .and(header("appkey", "test-key"))
        .and(header("tr_id", "FHKST03010100"))
        .and(query_param("FID_INPUT_ISCD", "005930"))
        .and(query_param("FID_INPUT_DATE_1", "20251201"))
        .and(query_param("FID_PERIOD_DIV_CODE", "D"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .expect(1)
        .mount(&server)
        .await;

    let kis = client(&server);
    let bars = kis
        .fetch_price_series("005930", date(2025, 12, 1), date(2026, 1, 2), Granularity::Daily)
        .await
        .unwrap();

    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].date, date(2025, 12, 30));
    assert_eq!(bars[1].date, date(2026, 1, 2));
    assert_eq!(bars[1].close, 71500.0);
    assert_eq!(bars[1].value, 1_070_000_000_000.0);
}

#[tokio::test]
async fn test_token_issued_once_for_concurrent_requests() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .expect(4)
        .mount(&server)
        .await;

    let kis = Arc::new(client(&server));
    let mut handles = Vec::new();
    for code in ["005930", "000660", "035420", "051910"] {
        let kis = kis.clone();
        handles.push(tokio::spawn(async move {
            kis.fetch_price_series(code, date(2025, 12, 1), date(2026, 1, 2), Granularity::Daily)
                .await
        }));
    }
    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }
}

#[tokio::test]
async fn test_quota_message_is_retried() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rt_cd": "1",
            "msg_cd": "EGW00201",
            "msg1": "초당 거래건수를 초과하였습니다."
        })))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .expect(1)
        .mount(&server)
        .await;

    let kis = client(&server);
    let bars = kis
        .fetch_price_series("005930", date(2025, 12, 1), date(2026, 1, 2), Granularity::Daily)
        .await
        .unwrap();
    assert_eq!(bars.len(), 2);
}

#[tokio::test]
async fn test_persistent_quota_exhausts_retries() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rt_cd": "1",
            "msg1": "초당 거래건수를 초과하였습니다."
        })))
        .expect(5)
        .mount(&server)
        .await;

    let kis = client(&server);
    let err = kis
        .fetch_price_series("005930", date(2025, 12, 1), date(2026, 1, 2), Granularity::Daily)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { .. }));
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .mount(&server)
        .await;

    let kis = client(&server);
    assert!(kis
        .fetch_price_series("005930", date(2025, 12, 1), date(2026, 1, 2), Granularity::Daily)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_unauthorized_refreshes_token() {
    let server = MockServer::start().await;
    mount_token(&server, 2).await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .mount(&server)
        .await;

    let kis = client(&server);
    assert!(kis
        .fetch_price_series("005930", date(2025, 12, 1), date(2026, 1, 2), Granularity::Daily)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_error_code_is_rejected_without_retry() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rt_cd": "7",
            "msg_cd": "OPSQ0002",
            "msg1": "없는 종목코드입니다."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let kis = client(&server);
    let err = kis
        .fetch_price_series("999999", date(2025, 12, 1), date(2026, 1, 2), Granularity::Daily)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Rejected(ref m) if m.contains("종목코드")));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_empty_window_is_data_not_available() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rt_cd": "0",
            "msg1": "정상처리 되었습니다.",
            "output2": []
        })))
        .mount(&server)
        .await;

    let kis = client(&server);
    let err = kis
        .fetch_price_series("005930", date(2025, 12, 1), date(2026, 1, 2), Granularity::Weekly)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::DataNotAvailable(_)));
}

#[tokio::test]
async fn test_flow_series_scaled_and_sorted() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(INVESTOR_PATH))
        .and(header("tr_id", "FHKST01010900"))
        .and(query_param("FID_INPUT_ISCD", "005930"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rt_cd": "0",
            "msg1": "정상처리 되었습니다.",
            "output": [
                {
                    "stck_bsop_date": "20260102",
                    "prsn_ntby_tr_pbmn": "-3500",
                    "frgn_ntby_tr_pbmn": "2500",
                    "orgn_ntby_tr_pbmn": "1000"
                },
                {
                    "stck_bsop_date": "20251230",
                    "prsn_ntby_tr_pbmn": "100",
                    "frgn_ntby_tr_pbmn": "-50",
                    "orgn_ntby_tr_pbmn": "-50"
                }
            ]
        })))
        .mount(&server)
        .await;

    let kis = client(&server);
    let flows = kis.fetch_flow_series("005930").await.unwrap();

    assert_eq!(flows.len(), 2);
    assert_eq!(flows[0].date, date(2025, 12, 30));
    assert_eq!(flows[1].foreign_net, 2_500_000_000.0);
    assert_eq!(flows[1].institution_net, 1_000_000_000.0);
    assert_eq!(flows[1].individual_net, -3_500_000_000.0);
}

#[tokio::test]
async fn test_late_unauthorized_does_not_discard_refreshed_token() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    // The stale token is rejected at once for one ticker, late for the other
    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .and(header("authorization", "Bearer stale-token"))
        .and(query_param("FID_INPUT_ISCD", "005930"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .and(header("authorization", "Bearer stale-token"))
        .and(query_param("FID_INPUT_ISCD", "000660"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(CHART_PATH))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let kis = Arc::new(client_with_cached_token(&server, &dir, "stale-token"));

    let fast = {
        let kis = kis.clone();
        tokio::spawn(async move {
            kis.fetch_price_series("005930", date(2025, 12, 1), date(2026, 1, 2), Granularity::Daily)
                .await
        })
    };
    let slow = {
        let kis = kis.clone();
        tokio::spawn(async move {
            kis.fetch_price_series("000660", date(2025, 12, 1), date(2026, 1, 2), Granularity::Daily)
                .await
        })
    };

    assert!(fast.await.unwrap().is_ok());
    assert!(slow.await.unwrap().is_ok());
    // One issuance for the stale token, none for the late rejection
    server.verify().await;
}
