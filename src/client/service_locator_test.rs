use std::sync::Arc;

use mockall::predicate::function;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::model::ServiceAddress;
use crate::test_utils::test_settings;
use crate::test_utils::ScriptedHttpClient;
use crate::ClientError;
use crate::Error;

fn services_body(urls: &[&str]) -> String {
    let services: Vec<ServiceAddress> = urls.iter().map(|u| ServiceAddress::new(*u)).collect();
    serde_json::to_string(&services).unwrap()
}

#[tokio::test]
async fn test_static_locator_returns_configured_addresses() {
    let locator = StaticServiceLocator::new(["http://a:8080", "http://b:8080"]);
    let services = locator.config_services().await.unwrap();
    let urls: Vec<_> = services.iter().map(|s| s.homepage_url.as_str()).collect();
    assert_eq!(urls, vec!["http://a:8080", "http://b:8080"]);
}

#[tokio::test]
async fn test_meta_locator_queries_discovery_endpoint() {
    let mut http = MockHttpClient::new();
    http.expect_get()
        .with(function(|r: &HttpRequest| {
            r.url == "http://meta:8080/services/config?appId=someApp" && r.headers.is_empty()
        }))
        .times(1)
        .returning(|_| Ok(HttpResponse::new(200, services_body(&["http://c1:8080"]))));
    let locator = MetaServiceLocator::new("http://meta:8080", &test_settings(), Arc::new(http));

    let services = locator.config_services().await.unwrap();

    assert_eq!(services, vec![ServiceAddress::new("http://c1:8080")]);
}

/// # Case: meta server becomes unavailable
///
/// ## Criterias:
/// 1. the last good list keeps being served on errors and empty answers
#[tokio::test]
async fn test_meta_locator_serves_last_good_list() {
    let http = ScriptedHttpClient::new();
    http.respond(200, services_body(&["http://c1:8080", "http://c2:8080"]))
        .respond(503, "")
        .respond(200, "[]");
    let locator = MetaServiceLocator::new("http://meta:8080", &test_settings(), http.clone());

    let fresh = locator.refresh().await.unwrap();
    let after_error = locator.refresh().await.unwrap();
    let after_empty = locator.refresh().await.unwrap();

    assert_eq!(fresh.len(), 2);
    assert_eq!(after_error, fresh);
    assert_eq!(after_empty, fresh);
    assert_eq!(locator.config_services().await.unwrap(), fresh);
}

/// # Case: lookups once a list is known
///
/// ## Criterias:
/// 1. only the first lookup reaches the meta server
/// 2. later lookups return the cached list without any request
#[tokio::test]
async fn test_meta_locator_serves_cached_list_without_requests() {
    let http = ScriptedHttpClient::new();
    http.respond(200, services_body(&["http://c1:8080"]));
    let locator = MetaServiceLocator::new("http://meta:8080", &test_settings(), http.clone());

    for _ in 0..5 {
        let services = locator.config_services().await.unwrap();
        assert_eq!(services, vec![ServiceAddress::new("http://c1:8080")]);
    }
    assert_eq!(http.requests().len(), 1);
}

/// # Case: background refresh
///
/// ## Setup:
/// 1. the first lookup caches `c1`
/// 2. the refresh task runs with the meta server now answering `c2`
///
/// ## Criterias:
/// 1. nothing is refreshed before one interval has passed
/// 2. after the interval lookups return `c2`
/// 3. the task stops on cancel
#[tokio::test(start_paused = true)]
async fn test_meta_locator_refreshes_in_background() {
    let http = ScriptedHttpClient::new();
    http.respond(200, services_body(&["http://c1:8080"]))
        .respond(200, services_body(&["http://c2:8080"]));
    let settings = test_settings();
    let interval = settings.refresh_interval();
    let locator = Arc::new(MetaServiceLocator::new("http://meta:8080", &settings, http.clone()));
    locator.config_services().await.unwrap();

    let cancel = CancellationToken::new();
    let task = tokio::spawn(locator.clone().run_periodic_refresh(cancel.clone()));

    tokio::time::sleep(interval / 2).await;
    assert_eq!(http.requests().len(), 1);
    assert_eq!(
        locator.config_services().await.unwrap(),
        vec![ServiceAddress::new("http://c1:8080")]
    );

    tokio::time::sleep(interval).await;
    assert_eq!(http.requests().len(), 2);
    assert_eq!(
        locator.config_services().await.unwrap(),
        vec![ServiceAddress::new("http://c2:8080")]
    );

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_meta_locator_without_history_propagates_failures() {
    let http = ScriptedHttpClient::new();
    http.respond(200, "[]");
    let locator = MetaServiceLocator::new("http://meta:8080", &test_settings(), http.clone());

    let empty = locator.config_services().await.unwrap_err();
    assert!(matches!(empty, Error::Client(ClientError::NoConfigService)));

    // script drained: transport timeout
    assert!(locator.config_services().await.is_err());
}

#[tokio::test]
async fn test_meta_locator_signs_when_secret_is_set() {
    let http = ScriptedHttpClient::new();
    http.respond(200, services_body(&["http://c1:8080"]));
    let settings = crate::ClientSettings {
        access_key_secret: Some("secret".to_string()),
        ..test_settings()
    };
    let locator = MetaServiceLocator::new("http://meta:8080", &settings, http.clone());

    locator.config_services().await.unwrap();

    let request = &http.requests()[0];
    assert!(request
        .headers
        .iter()
        .any(|(name, value)| name == "Authorization" && value.starts_with("Apollo someApp:")));
}
