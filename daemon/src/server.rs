/// HTTP server: routing, lifecycle and graceful shutdown
use crate::auth::AuthManager;
use crate::config::DaemonConfig;
use crate::errors::{DaemonError, DaemonResult};
use crate::event_stream::{sse_body, StreamSettings};
use crate::events::EventHub;
use crate::handlers::ApiHandlers;
use crate::metrics::MetricsCollector;
use crate::types::*;
use hyper::header::{HeaderValue, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, HeaderMap, Method, Request, Response, Server, StatusCode};
use qcflow_core::{
    Action, ArbiterConfig, AssignmentArbiter, DrawingStore, SqliteDrawingStore, WorkflowEngine,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Optional prefix accepted in front of every route
pub const API_PREFIX: &str = "/api/v1";

/// HTTP server wiring the workflow, hub and transport together
pub struct HttpServer {
    config: DaemonConfig,
    handlers: Arc<ApiHandlers>,
    stream_settings: StreamSettings,
}

impl HttpServer {
    /// Create a server over an existing store
    pub fn new(config: DaemonConfig, store: Arc<dyn DrawingStore>) -> DaemonResult<Self> {
        config.validate()?;

        let metrics = Arc::new(MetricsCollector::new()?);
        let hub = Arc::new(EventHub::with_metrics(
            config.events.subscriber_queue_capacity,
            metrics.clone(),
        ));
        let arbiter = Arc::new(AssignmentArbiter::new(
            WorkflowEngine::new(store),
            hub.clone(),
            ArbiterConfig {
                slot_timeout: config.workflow.slot_timeout(),
            },
        ));
        let auth = Arc::new(AuthManager::new(config.auth.clone())?);
        let handlers = Arc::new(ApiHandlers::new(arbiter, hub, auth, metrics));

        let stream_settings = StreamSettings {
            keepalive: config.events.keepalive(),
            retry_ms: config.events.retry_ms,
        };

        Ok(HttpServer {
            config,
            handlers,
            stream_settings,
        })
    }

    /// Open the configured SQLite database, apply migrations and create the server
    pub async fn open(config: DaemonConfig) -> DaemonResult<Self> {
        let store = SqliteDrawingStore::new(&config.database.path, config.database.max_connections)
            .await
            .map_err(|e| DaemonError::ServerError(format!("Failed to open database: {}", e)))?;
        store
            .initialize()
            .await
            .map_err(|e| DaemonError::ServerError(format!("Failed to migrate database: {}", e)))?;
        info!(path = %config.database.path.display(), "Database ready");

        Self::new(config, Arc::new(store))
    }

    pub fn handlers(&self) -> &Arc<ApiHandlers> {
        &self.handlers
    }

    /// Bind the listeners and start serving in the background
    pub async fn start(&self) -> DaemonResult<ServerHandle> {
        let mut shutdown_senders = Vec::new();
        let mut tasks = Vec::new();

        let addr = socket_addr(&self.config.server.http_addr, self.config.server.http_port)?;
        let handlers = self.handlers.clone();
        let settings = self.stream_settings.clone();
        let make_svc = make_service_fn(move |_conn| {
            let handlers = handlers.clone();
            let settings = settings.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    handle_http_request(req, handlers.clone(), settings.clone())
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .map_err(|e| DaemonError::ServerError(format!("Failed to bind {}: {}", addr, e)))?
            .serve(make_svc);
        let http_addr = server.local_addr();
        let (tx, rx) = oneshot::channel::<()>();
        shutdown_senders.push(tx);
        tasks.push(tokio::spawn(async move {
            server
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .map_err(|e| DaemonError::ServerError(format!("HTTP server error: {}", e)))
        }));
        info!("HTTP server listening on http://{}", http_addr);

        let metrics_addr = if self.config.server.enable_metrics {
            let addr =
                socket_addr(&self.config.server.http_addr, self.config.server.metrics_port)?;
            let metrics = self.handlers.metrics().clone();
            let make_svc = make_service_fn(move |_conn| {
                let metrics = metrics.clone();
                async move {
                    Ok::<_, Infallible>(service_fn(move |_req| {
                        handle_metrics_request(metrics.clone())
                    }))
                }
            });

            let server = Server::try_bind(&addr)
                .map_err(|e| DaemonError::ServerError(format!("Failed to bind {}: {}", addr, e)))?
                .serve(make_svc);
            let local = server.local_addr();
            let (tx, rx) = oneshot::channel::<()>();
            shutdown_senders.push(tx);
            tasks.push(tokio::spawn(async move {
                server
                    .with_graceful_shutdown(async {
                        let _ = rx.await;
                    })
                    .await
                    .map_err(|e| DaemonError::ServerError(format!("Metrics server error: {}", e)))
            }));
            info!("Metrics endpoint listening on http://{}", local);
            Some(local)
        } else {
            None
        };

        Ok(ServerHandle {
            http_addr,
            metrics_addr,
            handlers: self.handlers.clone(),
            drain_timeout: self.config.server.shutdown_drain(),
            shutdown_senders,
            tasks,
        })
    }
}

/// A running server
pub struct ServerHandle {
    http_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
    handlers: Arc<ApiHandlers>,
    drain_timeout: Duration,
    shutdown_senders: Vec<oneshot::Sender<()>>,
    tasks: Vec<JoinHandle<DaemonResult<()>>>,
}

impl ServerHandle {
    /// Address the HTTP API is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Address the metrics endpoint is bound to, if enabled
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Stop accepting mutations, drain in-flight ones, end every event
    /// stream, then stop the listeners.
    pub async fn shutdown(self) -> DaemonResult<()> {
        let arbiter = self.handlers.arbiter();
        arbiter.begin_shutdown();
        if arbiter.drain(self.drain_timeout).await {
            info!("In-flight mutations drained");
        } else {
            warn!(
                in_flight = arbiter.in_flight(),
                timeout_secs = self.drain_timeout.as_secs(),
                "Drain timed out, stopping anyway"
            );
        }

        self.handlers.hub().close_all();

        for tx in self.shutdown_senders {
            let _ = tx.send(());
        }
        for task in self.tasks {
            task.await
                .map_err(|e| DaemonError::ServerError(format!("Server task failed: {}", e)))??;
        }

        info!("Server stopped");
        Ok(())
    }
}

fn socket_addr(host: &str, port: u16) -> DaemonResult<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e| DaemonError::ConfigError(format!("Invalid address: {}", e)))
}

/// Handle one HTTP request, recording its outcome
async fn handle_http_request(
    req: Request<Body>,
    handlers: Arc<ApiHandlers>,
    settings: StreamSettings,
) -> Result<Response<Body>, Infallible> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match route(req, &handlers, &settings).await {
        Ok(response) => response,
        Err(e) => {
            if e.status_code().is_server_error() {
                error!(%method, %path, error = %e, "Request failed");
            } else {
                debug!(%method, %path, kind = e.kind(), error = %e, "Request rejected");
            }
            error_response(&e)
        }
    };

    handlers.metrics().record_request(
        method.as_str(),
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    Ok(response)
}

async fn route(
    req: Request<Body>,
    handlers: &ApiHandlers,
    settings: &StreamSettings,
) -> DaemonResult<Response<Body>> {
    let path = strip_api_prefix(req.uri().path()).to_string();
    let query = req.uri().query().map(str::to_string);
    let token = bearer_token(req.headers())
        .or_else(|| query_param(query.as_deref(), "token").map(str::to_string));
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (req.method(), segments.as_slice()) {
        (&Method::GET, ["health"]) => json_response(StatusCode::OK, &handlers.health()),

        (&Method::GET, ["drawings"]) => {
            let ctx = handlers.authenticate(token.as_deref()).await?;
            let project_id = required_id(query.as_deref(), "project_id")?;
            json_response(StatusCode::OK, &handlers.list_drawings(&ctx, project_id).await?)
        }

        (&Method::POST, ["drawings"]) => {
            let ctx = handlers.authenticate(token.as_deref()).await?;
            let request: CreateDrawingRequest = read_json(req).await?.ok_or_else(|| {
                DaemonError::InvalidRequest("Request body is required".to_string())
            })?;
            json_response(
                StatusCode::CREATED,
                &handlers.create_drawing(&ctx, request).await?,
            )
        }

        (&Method::GET, ["drawings", id, "history"]) => {
            let drawing_id = parse_id(id, "drawing id")?;
            let ctx = handlers.authenticate(token.as_deref()).await?;
            json_response(StatusCode::OK, &handlers.history(&ctx, drawing_id).await?)
        }

        (&Method::POST, ["drawings", id, action]) => {
            let action: Action = action
                .parse()
                .map_err(|_| DaemonError::RouteNotFound(path.clone()))?;
            let drawing_id = parse_id(id, "drawing id")?;
            let ctx = handlers.authenticate(token.as_deref()).await?;
            let request: CommandRequest = read_json(req).await?.unwrap_or_default();
            json_response(
                StatusCode::OK,
                &handlers
                    .run_command(&ctx, drawing_id, action, request)
                    .await?,
            )
        }

        (&Method::GET, ["events"]) => {
            let ctx = handlers.authenticate(token.as_deref()).await?;
            let project_id = required_id(query.as_deref(), "project_id")?;
            let subscription = handlers.open_event_stream(&ctx, project_id)?;
            Ok(sse_response(sse_body(
                subscription,
                settings.clone(),
                Some(handlers.metrics().clone()),
            )))
        }

        (_, ["health"]) | (_, ["drawings"]) | (_, ["drawings", _, _]) | (_, ["events"]) => Err(
            DaemonError::MethodNotAllowed(format!("{} {}", req.method(), path)),
        ),

        _ => Err(DaemonError::RouteNotFound(path.clone())),
    }
}

fn strip_api_prefix(path: &str) -> &str {
    match path.strip_prefix(API_PREFIX) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Extract the token of an `Authorization: Bearer` header
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next()?.to_ascii_lowercase();
    if scheme != "bearer" {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn parse_id(raw: &str, what: &str) -> DaemonResult<i64> {
    raw.parse()
        .map_err(|_| DaemonError::InvalidRequest(format!("Invalid {}: {}", what, raw)))
}

fn required_id(query: Option<&str>, name: &str) -> DaemonResult<i64> {
    let raw = query_param(query, name)
        .ok_or_else(|| DaemonError::InvalidRequest(format!("{} is required", name)))?;
    parse_id(raw, name)
}

/// Read an optional JSON body; an empty body yields `None`
async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> DaemonResult<Option<T>> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| DaemonError::InvalidRequest(format!("Failed to read body: {}", e)))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> DaemonResult<Response<Body>> {
    let body = serde_json::to_vec(value)
        .map_err(|e| DaemonError::ServerError(format!("Failed to encode response: {}", e)))?;
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

fn error_response(err: &DaemonError) -> Response<Body> {
    let mut response = Response::new(Body::from(err.to_http_error().to_string()));
    *response.status_mut() = err.status_code();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn sse_response(body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// Handle metrics requests
async fn handle_metrics_request(
    metrics: Arc<MetricsCollector>,
) -> Result<Response<Body>, Infallible> {
    match metrics.gather_metrics() {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(response)
        }
        Err(e) => {
            error!("Failed to gather metrics: {:?}", e);
            Ok(error_response(&e))
        }
    }
}
