//! HTTP front end: pages, static assets, and the job sockets.
//!
//! `/_ws/{path}` runs a standard compile of `path`; `/_pg/{path}` opens a
//! playground connection that waits for one client instruction. Every
//! upgraded socket is handed to [`JobService::run_connection`] and tracked
//! so shutdown can wait for running jobs to report.

pub mod page;
mod websocket;

pub use websocket::WebSocketTransport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, HOST, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backend::{Backend, RecordStore};
use crate::config::HostSettings;
use crate::path::normalize_path;
use crate::runner::{JobRequest, JobService, JobVariant};
use page::{Asset, PageVars, Site};

const LOG_TARGET: &str = "buildfarm::server";

/// Where an empty `/` request is sent.
const PROJECT_URL: &str = "https://github.com/dave/jsgo";

/// Playground connections without a path compile this package.
const DEFAULT_PLAYGROUND_PATH: &str = "main";

const ASSET_CACHE_CONTROL: &str = "public, max-age=31536000";

/// Composition root shared by every handler.
pub struct AppState<B: Backend> {
    pub service: Arc<JobService<B>>,
    pub hosts: Arc<HostSettings>,
    pub assets_dir: Arc<PathBuf>,
    /// Upgraded sockets still running a job.
    pub tracker: TaskTracker,
}

impl<B: Backend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            hosts: Arc::clone(&self.hosts),
            assets_dir: Arc::clone(&self.assets_dir),
            tracker: self.tracker.clone(),
        }
    }
}

impl<B: Backend> AppState<B> {
    pub fn new(service: Arc<JobService<B>>, hosts: HostSettings, assets_dir: PathBuf) -> Self {
        Self {
            service,
            hosts: Arc::new(hosts),
            assets_dir: Arc::new(assets_dir),
            tracker: TaskTracker::new(),
        }
    }

    fn site(&self, headers: &HeaderMap) -> Option<Site> {
        let host = request_host(headers)?;
        if host == self.hosts.compile {
            Some(Site::Compile)
        } else if host == self.hosts.play {
            Some(Site::Play)
        } else {
            None
        }
    }
}

pub fn router<B: Backend>(state: AppState<B>) -> Router {
    Router::new()
        .route("/", get(page_root::<B>))
        .route("/_ws/{*path}", get(socket_standard::<B>))
        .route("/_pg/", get(socket_playground_root::<B>))
        .route("/_pg/{*path}", get(socket_playground::<B>))
        .route("/favicon.ico", get(favicon::<B>))
        .route("/compile.css", get(stylesheet::<B>))
        .route("/_ah/health", get(health))
        .route("/_go", get(task_count))
        .route("/{*path}", get(page_path::<B>))
        .with_state(state)
}

/// Serve until `shutdown` fires, then give running jobs up to `grace` to
/// report and close.
pub async fn serve<B: Backend>(
    listener: TcpListener,
    state: AppState<B>,
    shutdown: CancellationToken,
    grace: Duration,
) -> std::io::Result<()> {
    let tracker = state.tracker.clone();
    if let Ok(addr) = listener.local_addr() {
        info!(target: LOG_TARGET, "Listening on {}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracker.close();
    info!(
        target: LOG_TARGET,
        "Waiting for {} running connection(s)",
        tracker.len()
    );
    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
        warn!(
            target: LOG_TARGET,
            "{} connection(s) still running after {:?}",
            tracker.len(),
            grace
        );
    }
    Ok(())
}

fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers.get(HOST)?.to_str().ok()
}

fn is_secure(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn job_path(raw: &str) -> String {
    normalize_path(raw.trim_matches('/'))
}

async fn page_root<B: Backend>(State(state): State<AppState<B>>, headers: HeaderMap) -> Response {
    render_page(state, headers, String::new()).await
}

async fn page_path<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Response {
    render_page(state, headers, path).await
}

async fn render_page<B: Backend>(state: AppState<B>, headers: HeaderMap, raw: String) -> Response {
    let Some(site) = state.site(&headers) else {
        let host = request_host(&headers).unwrap_or_default();
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unknown host {host:?}"),
        )
            .into_response();
    };
    let host = request_host(&headers).unwrap_or_default();
    let secure = is_secure(&headers);

    if site == Site::Play {
        return Html(page::render_play_page(host, secure)).into_response();
    }

    let path = job_path(&raw);
    if path.is_empty() {
        return (StatusCode::FOUND, [(LOCATION, PROJECT_URL)]).into_response();
    }

    let last = match state.service.backend().records().lookup(&path).await {
        Ok(last) => last,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let recent = state.service.recent(&path);
    let vars = PageVars {
        path: &path,
        host,
        secure,
        index_host: &state.hosts.index,
        pkg_host: &state.hosts.pkg,
        last: last.as_ref(),
        recent: recent.as_ref(),
    };
    Html(page::render_compile_page(&vars)).into_response()
}

async fn socket_standard<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    Path(path): Path<String>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let request = JobRequest::new(job_path(&path), JobVariant::Standard)
        .with_origin(forwarded_for(&headers));
    start_job(state, request, upgrade).await
}

async fn socket_playground_root<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let request = JobRequest::new(DEFAULT_PLAYGROUND_PATH, JobVariant::Playground)
        .with_origin(forwarded_for(&headers));
    start_job(state, request, upgrade).await
}

async fn socket_playground<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    Path(path): Path<String>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let mut path = job_path(&path);
    if path.is_empty() {
        path = DEFAULT_PLAYGROUND_PATH.to_string();
    }
    let request =
        JobRequest::new(path, JobVariant::Playground).with_origin(forwarded_for(&headers));
    start_job(state, request, upgrade).await
}

async fn start_job<B: Backend>(
    state: AppState<B>,
    request: JobRequest,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(
                target: LOG_TARGET,
                "Rejected upgrade for {}: {}",
                request.path,
                rejection
            );
            let message = format!("upgrading request to websocket: {rejection}");
            state.service.record_error(&request, &message).await;
            return rejection.into_response();
        }
    };

    let AppState {
        service, tracker, ..
    } = state;
    upgrade.on_upgrade(move |socket| {
        tracker.track_future(service.run_connection(WebSocketTransport::new(socket), request))
    })
}

async fn serve_asset(assets_dir: &std::path::Path, asset: Asset) -> Response {
    match asset.load(assets_dir).await {
        Ok(contents) => (
            [
                (CONTENT_TYPE, asset.mime()),
                (CACHE_CONTROL, ASSET_CACHE_CONTROL),
            ],
            contents,
        )
            .into_response(),
        Err(e) => {
            warn!(target: LOG_TARGET, "Serving {}: {}", asset.file_name(), e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "error serving static file",
            )
                .into_response()
        }
    }
}

async fn favicon<B: Backend>(State(state): State<AppState<B>>) -> Response {
    serve_asset(&state.assets_dir, Asset::Favicon).await
}

async fn stylesheet<B: Backend>(State(state): State<AppState<B>>) -> Response {
    serve_asset(&state.assets_dir, Asset::Stylesheet).await
}

async fn health() -> &'static str {
    "ok"
}

async fn task_count() -> String {
    tokio::runtime::Handle::current()
        .metrics()
        .num_alive_tasks()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn job_path_trims_slashes_and_normalizes() {
        assert_eq!(job_path("/dave/jsgo/"), "github.com/dave/jsgo");
        assert_eq!(job_path("github.com/dave/jsgo"), "github.com/dave/jsgo");
        assert_eq!(job_path(""), "");
    }

    #[test]
    fn forwarded_headers_are_read() {
        let mut headers = HeaderMap::new();
        assert_eq!(forwarded_for(&headers), None);
        assert!(!is_secure(&headers));

        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("HTTPS"));
        assert_eq!(forwarded_for(&headers).as_deref(), Some("10.0.0.1"));
        assert!(is_secure(&headers));
    }
}
