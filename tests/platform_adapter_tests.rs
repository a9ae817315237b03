//! Adapter tests against mocked platform APIs.

use chrono::{Duration, NaiveDate, Utc};
use portal_sync::platforms::{
    FetchErrorKind, FetchRequest, GoogleAdsConfig, GoogleAnalyticsConfig, GoogleOAuthCredentials,
    MetaAdsConfig, MetaCredentials, NaverSearchAdConfig, NaverSearchAdCredentials,
    PlatformAdapter, PlatformConfig, PlatformCredentials,
    google_ads::GoogleAdsAdapter,
    google_analytics::GoogleAnalyticsAdapter,
    google_oauth::GoogleOAuthClient,
    meta_ads::MetaAdsAdapter,
    naver_searchad::NaverSearchAdAdapter,
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, header, header_exists, method, path, query_param},
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn meta_credentials() -> PlatformCredentials {
    PlatformCredentials::Meta(MetaCredentials {
        access_token: "EAAB-test".to_string(),
        expires_at: None,
    })
}

fn meta_config() -> PlatformConfig {
    PlatformConfig::MetaAds(MetaAdsConfig {
        ad_account_id: "12345".to_string(),
        conversion_action_types: Vec::new(),
    })
}

fn meta_adapter(server: &MockServer) -> MetaAdsAdapter {
    MetaAdsAdapter::new(reqwest::Client::new(), server.uri(), None, None, 7)
}

#[tokio::test]
async fn meta_insights_follow_paging_and_sum_conversions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/act_12345/insights"))
        .and(query_param("time_increment", "1"))
        .and(query_param("access_token", "EAAB-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "date_start": "2024-05-06",
                "impressions": "1200",
                "clicks": "36",
                "spend": "18.40",
                "actions": [
                    {"action_type": "purchase", "value": "2"},
                    {"action_type": "lead", "value": "1"},
                    {"action_type": "link_click", "value": "36"}
                ],
                "action_values": [{"action_type": "purchase", "value": "90.5"}]
            }],
            "paging": {"next": format!("{}/page-2", server.uri())}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"date_start": "2024-05-07", "impressions": "800", "clicks": "20", "spend": "10"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = meta_credentials();
    let config = meta_config();
    let outcome = meta_adapter(&server)
        .fetch_daily_metrics(FetchRequest {
            credentials: &credentials,
            config: &config,
            date_from: date(2024, 5, 6),
            date_to: date(2024, 5, 7),
        })
        .await
        .expect("fetch succeeds");

    assert_eq!(outcome.records.len(), 2);
    let first = &outcome.records[0];
    assert_eq!(first.date, date(2024, 5, 6));
    assert_eq!(first.impressions, Some(1200));
    assert_eq!(first.clicks, Some(36));
    assert_eq!(first.spend, Some(18.4));
    assert_eq!(first.conversions, Some(3.0));
    assert_eq!(first.conversion_value, Some(90.5));
    assert_eq!(outcome.records[1].conversions, None);
    assert!(outcome.refreshed_credentials.is_none());
}

#[tokio::test]
async fn meta_error_codes_are_classified() {
    let cases = [
        (400u16, 17, FetchErrorKind::RateLimited { retry_after_secs: None }),
        (400, 190, FetchErrorKind::AuthExpired),
        (400, 100, FetchErrorKind::InvalidConfig),
        (500, 1, FetchErrorKind::Transient),
    ];

    for (status, code, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/act_12345/insights"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": {"code": code, "message": "graph says no", "type": "GraphMethodException"}
            })))
            .mount(&server)
            .await;

        let credentials = meta_credentials();
        let config = meta_config();
        let err = meta_adapter(&server)
            .fetch_daily_metrics(FetchRequest {
                credentials: &credentials,
                config: &config,
                date_from: date(2024, 5, 6),
                date_to: date(2024, 5, 6),
            })
            .await
            .expect_err("fetch fails");
        assert_eq!(err.kind, expected, "graph code {code}");
    }
}

#[tokio::test]
async fn meta_connection_test_reports_rejected_token_as_unverified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 190, "message": "Error validating access token", "type": "OAuthException"}
        })))
        .mount(&server)
        .await;

    let verified = meta_adapter(&server)
        .test_connection(&meta_credentials())
        .await
        .expect("classified as unverified");
    assert!(!verified);
}

#[tokio::test]
async fn meta_token_near_expiry_is_exchanged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth/access_token"))
        .and(query_param("grant_type", "fb_exchange_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "EAAB-renewed",
            "expires_in": 5_184_000
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/act_12345/insights"))
        .and(query_param("access_token", "EAAB-renewed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = MetaAdsAdapter::new(
        reqwest::Client::new(),
        server.uri(),
        Some("app-id".to_string()),
        Some("app-secret".to_string()),
        7,
    );
    let credentials = PlatformCredentials::Meta(MetaCredentials {
        access_token: "EAAB-old".to_string(),
        expires_at: Some(chrono::Utc::now() + chrono::Duration::days(2)),
    });
    let config = meta_config();
    let outcome = adapter
        .fetch_daily_metrics(FetchRequest {
            credentials: &credentials,
            config: &config,
            date_from: date(2024, 5, 6),
            date_to: date(2024, 5, 6),
        })
        .await
        .expect("fetch succeeds");

    match outcome.refreshed_credentials {
        Some(PlatformCredentials::Meta(renewed)) => {
            assert_eq!(renewed.access_token, "EAAB-renewed");
            assert!(renewed.expires_at.is_some());
        }
        other => panic!("expected renewed Meta credentials, got {other:?}"),
    }
}

fn naver_credentials() -> PlatformCredentials {
    PlatformCredentials::NaverSearchad(NaverSearchAdCredentials {
        api_key: "license".to_string(),
        secret_key: "secret".to_string(),
        customer_id: "1234567".to_string(),
    })
}

#[tokio::test]
async fn naver_stats_are_summed_across_campaigns() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ncc/campaigns"))
        .and(header("X-API-KEY", "license"))
        .and(header("X-Customer", "1234567"))
        .and(header_exists("X-Signature"))
        .and(header_exists("X-Timestamp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"nccCampaignId": "cmp-a"},
            {"nccCampaignId": "cmp-b"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stats"))
        .and(query_param("ids", "cmp-a,cmp-b"))
        .and(query_param("timeIncrement", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"dateStart": "2024-05-06", "impCnt": 300, "clkCnt": 12, "salesAmt": 4800, "ccnt": 1, "convAmt": 30000},
                {"dateStart": "2024-05-06", "impCnt": 200, "clkCnt": 8, "salesAmt": 3200},
                {"dateStart": "2024-05-07", "impCnt": 150, "clkCnt": 5, "salesAmt": 2000}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = naver_credentials();
    let config = PlatformConfig::NaverSearchad(NaverSearchAdConfig::default());
    let outcome = NaverSearchAdAdapter::new(reqwest::Client::new(), server.uri())
        .fetch_daily_metrics(FetchRequest {
            credentials: &credentials,
            config: &config,
            date_from: date(2024, 5, 6),
            date_to: date(2024, 5, 7),
        })
        .await
        .expect("fetch succeeds");

    assert_eq!(outcome.records.len(), 2);
    let first = &outcome.records[0];
    assert_eq!(first.impressions, Some(500));
    assert_eq!(first.clicks, Some(20));
    assert_eq!(first.spend, Some(8000.0));
    assert_eq!(first.conversions, Some(1.0));
    assert_eq!(outcome.records[1].conversions, None);
}

#[tokio::test]
async fn naver_account_without_campaigns_yields_no_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ncc/campaigns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let credentials = naver_credentials();
    let config = PlatformConfig::NaverSearchad(NaverSearchAdConfig::default());
    let outcome = NaverSearchAdAdapter::new(reqwest::Client::new(), server.uri())
        .fetch_daily_metrics(FetchRequest {
            credentials: &credentials,
            config: &config,
            date_from: date(2024, 5, 6),
            date_to: date(2024, 5, 7),
        })
        .await
        .expect("fetch succeeds");
    assert!(outcome.records.is_empty());
}

#[tokio::test]
async fn naver_rejected_license_is_unverified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ncc/campaigns"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let verified = NaverSearchAdAdapter::new(reqwest::Client::new(), server.uri())
        .test_connection(&naver_credentials())
        .await
        .expect("classified as unverified");
    assert!(!verified);
}

#[tokio::test]
async fn ga4_mints_an_access_token_and_hands_it_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.fresh",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/properties/987:runReport"))
        .and(header("authorization", "Bearer ya29.fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rows": [
                {
                    "dimensionValues": [{"value": "20240507"}],
                    "metricValues": [{"value": "50"}, {"value": "40"}, {"value": "10"}, {"value": "120"}, {"value": "2"}]
                },
                {
                    "dimensionValues": [{"value": "20240506"}],
                    "metricValues": [{"value": "60"}, {"value": "45"}, {"value": "12"}, {"value": "150"}, {"value": "3"}]
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let oauth = GoogleOAuthClient::new(
        http.clone(),
        format!("{}/token", server.uri()),
        Some("client-id".to_string()),
        Some("client-secret".to_string()),
    );
    let adapter = GoogleAnalyticsAdapter::new(http, server.uri(), oauth);
    let credentials = PlatformCredentials::GoogleOauth(GoogleOAuthCredentials {
        refresh_token: "1//refresh".to_string(),
        access_token: None,
        access_token_expires_at: None,
    });
    let config = PlatformConfig::GoogleAnalytics(GoogleAnalyticsConfig {
        property_id: "987".to_string(),
    });

    let outcome = adapter
        .fetch_daily_metrics(FetchRequest {
            credentials: &credentials,
            config: &config,
            date_from: date(2024, 5, 6),
            date_to: date(2024, 5, 7),
        })
        .await
        .expect("fetch succeeds");

    // Rows come back ordered by date whatever the report order.
    assert_eq!(outcome.records[0].date, date(2024, 5, 6));
    assert_eq!(outcome.records[0].sessions, Some(60));
    assert_eq!(outcome.records[1].page_views, Some(120));
    match outcome.refreshed_credentials {
        Some(PlatformCredentials::GoogleOauth(grant)) => {
            assert_eq!(grant.access_token.as_deref(), Some("ya29.fresh"));
            assert_eq!(grant.refresh_token, "1//refresh");
        }
        other => panic!("expected refreshed Google grant, got {other:?}"),
    }
}

fn google_ads_adapter(server: &MockServer) -> GoogleAdsAdapter {
    let http = reqwest::Client::new();
    let oauth = GoogleOAuthClient::new(
        http.clone(),
        format!("{}/token", server.uri()),
        Some("client-id".to_string()),
        Some("client-secret".to_string()),
    );
    GoogleAdsAdapter::new(http, server.uri(), Some("dev-token".to_string()), oauth)
}

fn google_ads_config() -> PlatformConfig {
    PlatformConfig::GoogleAds(GoogleAdsConfig {
        customer_id: "123-456-7890".to_string(),
        login_customer_id: Some("111-222-3333".to_string()),
    })
}

#[tokio::test]
async fn google_ads_search_stream_sends_account_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("refresh_token=1%2F%2Fads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.ads",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/customers/1234567890/googleAds:searchStream"))
        .and(header("authorization", "Bearer ya29.ads"))
        .and(header("developer-token", "dev-token"))
        .and(header("login-customer-id", "1112223333"))
        .and(body_string_contains("FROM customer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "results": [{
                    "segments": {"date": "2024-05-06"},
                    "metrics": {
                        "impressions": "1000",
                        "clicks": "25",
                        "costMicros": "12340000",
                        "conversions": 2.0,
                        "conversionsValue": 80.0
                    }
                }]
            },
            {
                "results": [{
                    "segments": {"date": "2024-05-07"},
                    "metrics": {"impressions": "400", "clicks": "8", "costMicros": "5000000"}
                }]
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = PlatformCredentials::GoogleOauth(GoogleOAuthCredentials {
        refresh_token: "1//ads".to_string(),
        access_token: None,
        access_token_expires_at: None,
    });
    let outcome = google_ads_adapter(&server)
        .fetch_daily_metrics(FetchRequest {
            credentials: &credentials,
            config: &google_ads_config(),
            date_from: date(2024, 5, 6),
            date_to: date(2024, 5, 7),
        })
        .await
        .expect("fetch succeeds");

    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.records[0].date, date(2024, 5, 6));
    assert_eq!(outcome.records[0].impressions, Some(1000));
    assert_eq!(outcome.records[0].spend, Some(12.34));
    assert_eq!(outcome.records[0].conversion_value, Some(80.0));
    assert_eq!(outcome.records[1].clicks, Some(8));
    assert_eq!(outcome.records[1].spend, Some(5.0));
    assert_eq!(outcome.records[1].conversions, None);
    match outcome.refreshed_credentials {
        Some(PlatformCredentials::GoogleOauth(grant)) => {
            assert_eq!(grant.access_token.as_deref(), Some("ya29.ads"));
            assert_eq!(grant.refresh_token, "1//ads");
            assert!(grant.access_token_expires_at.is_some());
        }
        other => panic!("expected refreshed Google grant, got {other:?}"),
    }
}

#[tokio::test]
async fn google_ads_rejected_token_is_auth_expired() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/customers/1234567890/googleAds:searchStream"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "status": "UNAUTHENTICATED"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/customers:listAccessibleCustomers"))
        .and(header("developer-token", "dev-token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    // A cached token with time left skips the token endpoint entirely.
    let credentials = PlatformCredentials::GoogleOauth(GoogleOAuthCredentials {
        refresh_token: "1//ads".to_string(),
        access_token: Some("ya29.cached".to_string()),
        access_token_expires_at: Some(Utc::now() + Duration::minutes(30)),
    });
    let adapter = google_ads_adapter(&server);

    let err = adapter
        .fetch_daily_metrics(FetchRequest {
            credentials: &credentials,
            config: &google_ads_config(),
            date_from: date(2024, 5, 6),
            date_to: date(2024, 5, 7),
        })
        .await
        .expect_err("401 fails the fetch");
    assert_eq!(err.kind, FetchErrorKind::AuthExpired);

    let verified = adapter
        .test_connection(&credentials)
        .await
        .expect("a rejected token is not an error");
    assert!(!verified);
}
