use std::sync::Arc;

use url::form_urlencoded;
use warp::http::StatusCode;

use tracing_test::traced_test;

use super::*;
use crate::model::ConfigResponse;
use crate::model::Notification;
use crate::model::ReleaseMessage;
use crate::model::ServiceAddress;
use crate::test_utils::map;
use crate::MemoryStore;
use crate::ServerSettings;

fn server(hold_timeout_ms: u64) -> ConfigServer {
    let store = Arc::new(MemoryStore::new());
    let settings = ServerSettings {
        hold_timeout_ms,
        advertised_urls: vec!["http://10.0.0.1:8080".to_string()],
        ..Default::default()
    };
    ConfigServer::with_stores(settings, store.clone(), store).unwrap()
}

fn notifications_path(
    app_id: &str,
    notifications: &str,
) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("appId", app_id)
        .append_pair("cluster", "default")
        .append_pair("notifications", notifications)
        .finish();
    format!("/notifications/v2?{query}")
}

#[tokio::test]
async fn test_unreleased_namespace_is_not_found() {
    let server = server(100);
    let res = warp::test::request()
        .path("/configs/app/default/application")
        .reply(&server.routes())
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

/// # Case: publish over HTTP, then fetch
///
/// ## Criterias:
/// 1. the publish answers with the new release message
/// 2. a fetch returns the released values and release key
/// 3. a fetch carrying that release key gets 304
#[tokio::test]
#[traced_test]
async fn test_publish_then_fetch_and_conditional_fetch() {
    let server = server(100);
    let routes = server.routes();

    let res = warp::test::request()
        .method("POST")
        .path("/releases/app/default/application")
        .json(&map(&[("k", "v")]))
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let message: ReleaseMessage = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(message.topic, "app+default+application");

    let res = warp::test::request()
        .path("/configs/app/default/application")
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: ConfigResponse = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body.app_id, "app");
    assert_eq!(body.namespace_name, "application");
    assert_eq!(body.configurations, map(&[("k", "v")]));

    let res = warp::test::request()
        .path(&format!(
            "/configs/app/default/application?releaseKey={}",
            body.release_key
        ))
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_long_poll_answers_changed_namespaces() {
    let server = server(60_000);
    server
        .publisher()
        .publish("app+default+application", map(&[("k", "v")]))
        .unwrap();

    let path = notifications_path("app", r#"[{"namespaceName":"application","notificationId":-1}]"#);
    let res = warp::test::request().path(&path).reply(&server.routes()).await;

    assert_eq!(res.status(), StatusCode::OK);
    let changed: Vec<Notification> = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].namespace_name, "application");
    assert_eq!(changed[0].notification_id, 1);
}

#[tokio::test]
async fn test_long_poll_times_out_with_not_modified() {
    let server = server(50);
    let path = notifications_path("app", r#"[{"namespaceName":"application","notificationId":-1}]"#);

    let res = warp::test::request().path(&path).reply(&server.routes()).await;

    assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_long_poll_rejects_malformed_requests() {
    let server = server(50);
    let routes = server.routes();

    let res = warp::test::request()
        .path(&notifications_path("app", "not json"))
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = warp::test::request()
        .path(&notifications_path("", "[]"))
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = warp::test::request()
        .path(&notifications_path("app", "[]"))
        .reply(&routes)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_services_lists_advertised_urls() {
    let server = server(50);
    let res = warp::test::request()
        .path("/services/config")
        .reply(&server.routes())
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let services: Vec<ServiceAddress> = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(services, vec![ServiceAddress::new("http://10.0.0.1:8080")]);
}
