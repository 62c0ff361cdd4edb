use super::*;
use crate::auth::Credentials;
use crate::sink::MemorySink;
use crate::streams::REPLICATION_KEY;
use mockito::{Matcher, Mock, Server, ServerGuard};

fn config() -> TapConfig {
    TapConfig {
        client_id: None,
        client_secret: None,
        refresh_token: "rt_123".to_string(),
        realm_id: "realm_1".to_string(),
        start_date: "2024-01-01T00:00:00Z".parse().unwrap(),
        sandbox: true,
        user_agent: None,
        refresh_proxy_url: None,
        refresh_proxy_url_auth: None,
        page_size: 100,
        state_path: None,
        streams: None,
    }
}

fn invoice_stream(page_size: usize) -> StreamDescriptor {
    StreamDescriptor {
        name: "Invoice",
        primary_key: "Id",
        replication_key: Some(REPLICATION_KEY),
        page_size,
    }
}

fn authenticator(server: &ServerGuard) -> Arc<Authenticator> {
    Arc::new(Authenticator::new(Credentials::Proxy {
        refresh_token: "rt_123".to_string(),
        proxy_endpoint: format!("{}/oauth/token", server.url()),
        proxy_auth_header: None,
    }))
}

async fn token_mock(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "at_1", "expires_in": 3600}"#)
        .create_async()
        .await
}

fn query_matcher(query: &str) -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("query".into(), query.into()),
        Matcher::UrlEncoded("minorversion".into(), "65".into()),
    ])
}

#[tokio::test]
async fn two_page_incremental_sync_advances_bookmark() {
    let mut server = Server::new_async().await;
    let _token = token_mock(&mut server).await;

    let page_one = server
        .mock("GET", "/v3/company/realm_1/query")
        .match_header("authorization", "Bearer at_1")
        .match_query(query_matcher(
            "SELECT * FROM Invoice \
             WHERE MetaData.LastUpdatedTime >= '2024-01-01T00:00:00Z' \
             ORDERBY MetaData.LastUpdatedTime MAXRESULTS 2",
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"QueryResponse": {"Invoice": [
                {"Id": "1", "MetaData": {"LastUpdatedTime": "2024-02-01T00:00:00Z"}},
                {"Id": "2", "MetaData": {"LastUpdatedTime": "2024-03-01T00:00:00Z"}}
            ], "maxResults": 2}}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let page_two = server
        .mock("GET", "/v3/company/realm_1/query")
        .match_query(query_matcher(
            "SELECT * FROM Invoice \
             WHERE MetaData.LastUpdatedTime >= '2024-01-01T00:00:00Z' \
             ORDERBY MetaData.LastUpdatedTime STARTPOSITION 3 MAXRESULTS 2",
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"QueryResponse": {"Invoice": [
                {"Id": "3", "MetaData": {"LastUpdatedTime": "2024-04-01T00:00:00Z"}}
            ], "maxResults": 1}}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let config = config();
    let engine = SyncEngine::with_base_url(
        invoice_stream(2),
        authenticator(&server),
        &config,
        server.url(),
    );
    let state = StateStore::load(None).unwrap();
    let sink = MemorySink::new();

    let summary = engine.sync(&state, &sink).await.unwrap();

    assert_eq!(summary.records, 3);
    assert_eq!(summary.pages, 2);
    assert_eq!(sink.records_for("Invoice").len(), 3);
    assert_eq!(
        state.bookmark("Invoice"),
        Some("2024-04-01T00:00:00Z".parse().unwrap())
    );
    // One state checkpoint per completed page.
    assert_eq!(sink.states.lock().unwrap().len(), 2);

    page_one.assert_async().await;
    page_two.assert_async().await;
}

#[tokio::test]
async fn full_table_stream_never_touches_bookmark() {
    let mut server = Server::new_async().await;
    let _token = token_mock(&mut server).await;

    let _query = server
        .mock("GET", "/v3/company/realm_1/query")
        .match_query(query_matcher("SELECT * FROM Preferences MAXRESULTS 100"))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"QueryResponse": {"Preferences": [{"Id": "1"}]}}"#)
        .create_async()
        .await;

    let config = config();
    let stream = StreamDescriptor {
        name: "Preferences",
        primary_key: "Id",
        replication_key: None,
        page_size: 100,
    };
    let engine =
        SyncEngine::with_base_url(stream, authenticator(&server), &config, server.url());
    let state = StateStore::load(None).unwrap();
    let sink = MemorySink::new();

    let summary = engine.sync(&state, &sink).await.unwrap();

    assert_eq!(summary.records, 1);
    assert_eq!(state.bookmark("Preferences"), None);
    assert!(sink.states.lock().unwrap().is_empty());
}

#[tokio::test]
async fn resumes_from_persisted_bookmark() {
    let mut server = Server::new_async().await;
    let _token = token_mock(&mut server).await;

    // The bookmark is later than the configured start date, so the WHERE
    // clause must use the bookmark.
    let query = server
        .mock("GET", "/v3/company/realm_1/query")
        .match_query(query_matcher(
            "SELECT * FROM Invoice \
             WHERE MetaData.LastUpdatedTime >= '2024-06-01T00:00:00Z' \
             ORDERBY MetaData.LastUpdatedTime MAXRESULTS 2",
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"QueryResponse": {}}"#)
        .expect(1)
        .create_async()
        .await;

    let config = config();
    let engine = SyncEngine::with_base_url(
        invoice_stream(2),
        authenticator(&server),
        &config,
        server.url(),
    );
    let state = StateStore::load(None).unwrap();
    state.advance("Invoice", "2024-06-01T00:00:00Z".parse().unwrap());
    let sink = MemorySink::new();

    let summary = engine.sync(&state, &sink).await.unwrap();
    assert_eq!(summary.records, 0);
    query.assert_async().await;
}

#[tokio::test]
async fn persistent_401_forces_one_reauth_then_fails() {
    let mut server = Server::new_async().await;
    // Initial token fetch plus exactly one forced refresh.
    let token = server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "at_1", "expires_in": 3600}"#)
        .expect(2)
        .create_async()
        .await;

    let query = server
        .mock("GET", "/v3/company/realm_1/query")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body(r#"{"fault": "invalid token"}"#)
        .expect(2)
        .create_async()
        .await;

    let config = config();
    let engine = SyncEngine::with_base_url(
        invoice_stream(2),
        authenticator(&server),
        &config,
        server.url(),
    );
    let state = StateStore::load(None).unwrap();
    let sink = MemorySink::new();

    let err = engine.sync(&state, &sink).await.unwrap_err();
    let sync_err = err.downcast_ref::<SyncError>().expect("expected SyncError");
    assert!(matches!(sync_err, SyncError::Auth(_)), "got {:?}", sync_err);

    token.assert_async().await;
    query.assert_async().await;
}

async fn assert_transient_status_exhausts_retries(status: usize) {
    let mut server = Server::new_async().await;
    let _token = token_mock(&mut server).await;

    let query = server
        .mock("GET", "/v3/company/realm_1/query")
        .match_query(Matcher::Any)
        .with_status(status)
        .with_body("try again later")
        .expect(MAX_RETRIES as usize)
        .create_async()
        .await;

    let config = config();
    let engine = SyncEngine::with_base_url(
        invoice_stream(2),
        authenticator(&server),
        &config,
        server.url(),
    );
    let state = StateStore::load(None).unwrap();
    let sink = MemorySink::new();

    let err = engine.sync(&state, &sink).await.unwrap_err();
    let sync_err = err.downcast_ref::<SyncError>().expect("expected SyncError");
    match sync_err {
        SyncError::TransientHttp { status: Some(s), .. } => assert_eq!(*s, status as u16),
        other => panic!("expected TransientHttp, got {:?}", other),
    }

    query.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retried_then_abort_the_stream() {
    assert_transient_status_exhausts_retries(503).await;
}

#[tokio::test]
async fn rate_limiting_is_retried_then_aborts_the_stream() {
    assert_transient_status_exhausts_retries(429).await;
}

#[tokio::test]
async fn malformed_replication_timestamp_skips_bookmark_not_record() {
    let mut server = Server::new_async().await;
    let _token = token_mock(&mut server).await;

    let _query = server
        .mock("GET", "/v3/company/realm_1/query")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"QueryResponse": {"Invoice": [
                {"Id": "1", "MetaData": {"LastUpdatedTime": "2024-02-01T00:00:00Z"}},
                {"Id": "2", "MetaData": {"LastUpdatedTime": "not-a-timestamp"}}
            ]}}"#,
        )
        .create_async()
        .await;

    let config = config();
    let engine = SyncEngine::with_base_url(
        invoice_stream(100),
        authenticator(&server),
        &config,
        server.url(),
    );
    let state = StateStore::load(None).unwrap();
    let sink = MemorySink::new();

    // Both records are emitted; only the parsable cursor moves the bookmark.
    let summary = engine.sync(&state, &sink).await.unwrap();
    assert_eq!(summary.records, 2);
    assert_eq!(sink.records_for("Invoice").len(), 2);
    assert_eq!(
        state.bookmark("Invoice"),
        Some("2024-02-01T00:00:00Z".parse().unwrap())
    );
}

#[test]
fn record_cursor_rejects_garbage_timestamps() {
    let record: Record = serde_json::from_value(serde_json::json!({
        "Id": "1",
        "MetaData.LastUpdatedTime": "not-a-timestamp",
    }))
    .unwrap();
    assert_eq!(record_cursor("Invoice", &record, REPLICATION_KEY), None);

    let record: Record = serde_json::from_value(serde_json::json!({
        "Id": "2",
        "MetaData.LastUpdatedTime": "2024-02-01T00:00:00Z",
    }))
    .unwrap();
    assert_eq!(
        record_cursor("Invoice", &record, REPLICATION_KEY),
        Some("2024-02-01T00:00:00Z".parse().unwrap())
    );
}

#[tokio::test]
async fn unparsable_page_is_malformed_and_not_retried() {
    let mut server = Server::new_async().await;
    let _token = token_mock(&mut server).await;

    let query = server
        .mock("GET", "/v3/company/realm_1/query")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("<html>definitely not json</html>")
        .expect(1)
        .create_async()
        .await;

    let config = config();
    let engine = SyncEngine::with_base_url(
        invoice_stream(2),
        authenticator(&server),
        &config,
        server.url(),
    );
    let state = StateStore::load(None).unwrap();
    let sink = MemorySink::new();

    let err = engine.sync(&state, &sink).await.unwrap_err();
    let sync_err = err.downcast_ref::<SyncError>().expect("expected SyncError");
    assert!(
        matches!(sync_err, SyncError::MalformedResponse { .. }),
        "got {:?}",
        sync_err
    );

    query.assert_async().await;
}
