//! HTTP surface of the config service.
//!
//! | Route | Answer |
//! |-------|--------|
//! | `GET /configs/{appId}/{cluster}/{namespace}?releaseKey=` | 200 JSON, 304 when the key matches, 404 when never released |
//! | `GET /notifications/v2?appId=&cluster=&notifications=` | held; 200 JSON of changed namespaces or 304 |
//! | `GET /services/config` | advertised config-service addresses |
//! | `POST /releases/{appId}/{cluster}/{namespace}` | publishes a JSON map of properties |

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::warn;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use super::HoldOutcome;
use super::NotificationHub;
use super::ReleasePublisher;
use crate::constants::DEFAULT_CLUSTER;
use crate::model::ConfigResponse;
use crate::model::Notification;
use crate::model::ServiceAddress;
use crate::model::WatchKey;
use crate::Error;
use crate::ReleaseStore;
use crate::ServerError;

/// Everything the handlers need, cloned into each request.
#[derive(Clone)]
pub struct ServerContext {
    pub release_store: Arc<dyn ReleaseStore>,
    pub hub: Arc<NotificationHub>,
    pub publisher: Arc<ReleasePublisher>,
    pub services: Arc<Vec<ServiceAddress>>,
}

pub fn routes(ctx: ServerContext) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    configs_route(ctx.clone())
        .or(notifications_route(ctx.clone()))
        .or(services_route(ctx.clone()))
        .or(publish_route(ctx))
}

fn with_context(ctx: ServerContext) -> impl Filter<Extract = (ServerContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn configs_route(ctx: ServerContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("configs" / String / String / String)
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_context(ctx))
        .and_then(query_config)
}

fn notifications_route(ctx: ServerContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("notifications" / "v2")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_context(ctx))
        .and_then(poll_notifications)
}

fn services_route(ctx: ServerContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("services" / "config")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(list_services)
}

fn publish_route(ctx: ServerContext) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("releases" / String / String / String)
        .and(warp::post())
        .and(warp::body::json::<BTreeMap<String, String>>())
        .and(with_context(ctx))
        .and_then(publish_release)
}

async fn query_config(
    app_id: String,
    cluster: String,
    namespace: String,
    params: HashMap<String, String>,
    ctx: ServerContext,
) -> Result<Response, Infallible> {
    let topic = WatchKey::new(app_id.as_str(), cluster.as_str(), namespace.as_str()).to_string();
    let release = match ctx.release_store.find_release(&topic) {
        Ok(Some(release)) => release,
        Ok(None) => {
            debug!("no release for {}", topic);
            return Ok(StatusCode::NOT_FOUND.into_response());
        }
        Err(e) => return Ok(internal_error(&e)),
    };

    if params.get("releaseKey") == Some(&release.release_key) {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    let body = ConfigResponse {
        app_id,
        cluster,
        namespace_name: namespace,
        configurations: release.configurations,
        release_key: release.release_key,
    };
    Ok(warp::reply::json(&body).into_response())
}

async fn poll_notifications(
    params: HashMap<String, String>,
    ctx: ServerContext,
) -> Result<Response, Infallible> {
    let Some(app_id) = params.get("appId").filter(|s| !s.is_empty()) else {
        return Ok(bad_request("appId is required"));
    };
    let cluster = params
        .get("cluster")
        .filter(|s| !s.is_empty())
        .map(String::as_str)
        .unwrap_or(DEFAULT_CLUSTER);
    let notifications: Vec<Notification> = match params.get("notifications") {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(bad_request(&format!("invalid notifications: {}", e))),
        },
        None => return Ok(bad_request("notifications is required")),
    };

    match ctx.hub.poll(app_id, cluster, &notifications).await {
        Ok(HoldOutcome::Changed(changed)) => Ok(warp::reply::json(&changed).into_response()),
        Ok(HoldOutcome::NotModified) => Ok(StatusCode::NOT_MODIFIED.into_response()),
        Err(Error::Server(ServerError::InvalidNotifications(msg))) => Ok(bad_request(&msg)),
        Err(e) => Ok(internal_error(&e)),
    }
}

async fn list_services(ctx: ServerContext) -> Result<Response, Infallible> {
    Ok(warp::reply::json(ctx.services.as_ref()).into_response())
}

async fn publish_release(
    app_id: String,
    cluster: String,
    namespace: String,
    configurations: BTreeMap<String, String>,
    ctx: ServerContext,
) -> Result<Response, Infallible> {
    let topic = WatchKey::new(app_id, cluster, namespace).to_string();
    match ctx.publisher.publish(&topic, configurations) {
        Ok(message) => Ok(warp::reply::json(&message).into_response()),
        Err(Error::Server(ServerError::EmptyTopic)) => Ok(bad_request("empty topic")),
        Err(e) => Ok(internal_error(&e)),
    }
}

fn bad_request(message: &str) -> Response {
    warn!("rejecting request: {}", message);
    warp::reply::with_status(message.to_string(), StatusCode::BAD_REQUEST).into_response()
}

fn internal_error(e: &Error) -> Response {
    error!("request failed: {}", e);
    warp::reply::with_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}
