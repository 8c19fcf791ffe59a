//! Purpose: The HTTP surface of the gateway.
//! Exports: `ServeConfig`, `ServeOutcome`, `serve`.
//! Role: Axum server wiring the query/data/metadata/mount routes to the
//! Role: engine cell and its backend router.
//! Invariants: Readers snapshot the engine once per request; only the mount
//! Invariants: and port routes mutate shared state.
//! Invariants: Error bodies are `{"error": ...}`; mount and move mutations
//! Invariants: answer plain-text confirmations.
//! Notes: File response streams are pull-based; a disconnected client stops
//! Notes: the upstream producer. Directory archives assemble fully in memory.

use std::collections::BTreeMap;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path as AxumPath, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{any, get, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use quarry::api::{
    ApiResult, BackendRouter, ConfigSink, DEFAULT_PORT, Encoded, EngineCell, EntryKind, Error,
    FileConfigSink, MountCommit, MountConfig, PhaseResult, QueryRequest, ResponseFormat, VPath,
    WriteError, decode, encode, resolve,
};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub host: IpAddr,
    pub port: u16,
    pub max_body_bytes: u64,
}

/// Why the server loop stopped: a signal, or a committed port change that
/// asks the caller to bind again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServeOutcome {
    Shutdown,
    Rebind(u16),
}

struct AppState {
    engine: Arc<EngineCell>,
    sink: Arc<FileConfigSink>,
    bound_port: u16,
    rebind: mpsc::Sender<u16>,
}

pub async fn serve(
    config: ServeConfig,
    engine: Arc<EngineCell>,
    sink: Arc<FileConfigSink>,
) -> ApiResult<ServeOutcome> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::env_invalid_config("--max-body-bytes is too large"))?;

    let (rebind_tx, mut rebind_rx) = mpsc::channel::<u16>(1);
    let state = Arc::new(AppState {
        engine,
        sink,
        bound_port: config.port,
        rebind: rebind_tx,
    });

    let app = Router::new()
        .route("/", get(root_redirect))
        .route("/server/info", get(server_info))
        .route("/server/port", put(put_port).delete(delete_port))
        .route("/query/fs/", get(query_get_root).post(query_post_root))
        .route("/query/fs/*path", get(query_get_at).post(query_post_at))
        .route("/compile/fs/", get(compile_get_root).post(compile_post_root))
        .route(
            "/compile/fs/*path",
            get(compile_get_at).post(compile_post_at),
        )
        .route("/data/fs/", any(data_root))
        .route("/data/fs/*path", any(data_at))
        .route("/metadata/fs/", get(metadata_root))
        .route("/metadata/fs/*path", get(metadata_at))
        .route("/mount/fs/", any(mount_root))
        .route("/mount/fs/*path", any(mount_at))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| Error::env_connection(format!("cannot bind {addr}: {err}")))?;
    tracing::info!(addr = %addr, "gateway listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(server_failed)?;
            Ok(ServeOutcome::Shutdown)
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => {
                    result.map_err(server_failed)?;
                    Ok(ServeOutcome::Shutdown)
                }
                Err(_) => Err(Error::env_unexpected("server shutdown timed out")),
            }
        }
        port = rebind_rx.recv() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(server_failed)?,
                Err(_) => return Err(Error::env_unexpected("server shutdown timed out")),
            }
            match port {
                Some(port) => {
                    tracing::info!(port, "rebinding to the committed port");
                    Ok(ServeOutcome::Rebind(port))
                }
                None => Ok(ServeOutcome::Shutdown),
            }
        }
    }
}

fn validate_config(config: &ServeConfig) -> ApiResult<()> {
    if config.port == 0 {
        return Err(Error::env_invalid_config("the port must be nonzero"));
    }
    if config.max_body_bytes == 0 {
        return Err(Error::env_invalid_config(
            "--max-body-bytes must be greater than zero",
        ));
    }
    Ok(())
}

fn server_failed(err: std::io::Error) -> Error {
    Error::env_unexpected(format!("server failed: {err}"))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        signal.recv().await;
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn root_redirect() -> Response {
    Redirect::to("/server/info").into_response()
}

async fn server_info() -> Response {
    json_response(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn put_port(State(state): State<Arc<AppState>>, body: String) -> Response {
    let Ok(port) = body.trim().parse::<u16>() else {
        return bad_request(format!("invalid port: {}", body.trim()));
    };
    if port == 0 {
        return bad_request("the port must be nonzero");
    }
    change_port(&state, port, "changed").await
}

async fn delete_port(State(state): State<Arc<AppState>>) -> Response {
    change_port(&state, DEFAULT_PORT, "reset").await
}

/// Persists the new port, then asks the serve loop to rebind. The text
/// reply goes out before the listener closes because shutdown is graceful.
/// Only one rebind can be queued at a time; a change racing a pending rebind
/// still commits to the config and waits for the next restart.
async fn change_port(state: &AppState, port: u16, verb: &str) -> Response {
    let previous = state.sink.port();
    state.sink.set_port(port);
    let snapshot = state.engine.snapshot();
    if let Err(err) = state.sink.persist(&snapshot.table).await {
        state.sink.set_port(previous);
        return error_response(err);
    }
    if port != state.bound_port && state.rebind.try_send(port).is_err() {
        tracing::warn!(port, "rebind already pending; the new port applies on the next restart");
    }
    text_response(format!("{verb} port to {port}"))
}

async fn query_get_root(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    query_run(&state, &headers, &params, "").await
}

async fn query_get_at(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(path): AxumPath<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    query_run(&state, &headers, &params, &path).await
}

async fn query_post_root(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    query_store(&state, &headers, "", body).await
}

async fn query_post_at(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(path): AxumPath<String>,
    body: String,
) -> Response {
    query_store(&state, &headers, &path, body).await
}

/// GET: run the query and stream its results in the negotiated format.
async fn query_run(
    state: &AppState,
    headers: &HeaderMap,
    params: &BTreeMap<String, String>,
    raw: &str,
) -> Response {
    let scope = match dir_path(raw) {
        Ok(path) => path,
        Err(response) => return response,
    };
    let text = match q_param(params) {
        Ok(text) => text,
        Err(response) => return response,
    };
    let format = resolve(header_text(headers, "accept"));
    let snapshot = state.engine.snapshot();
    let request = QueryRequest {
        scope,
        text,
        destination: None,
    };
    match snapshot.backend.run(request).await {
        Ok(outcome) => stream_response(encode(&format, outcome.data)),
        Err(err) => error_response(err),
    }
}

/// POST: run the query and land its results at the `Destination` path.
async fn query_store(state: &AppState, headers: &HeaderMap, raw: &str, body: String) -> Response {
    let scope = match dir_path(raw) {
        Ok(path) => path,
        Err(response) => return response,
    };
    if body.trim().is_empty() {
        return bad_request("the request body must carry the query text");
    }
    let destination = match destination_header(headers) {
        Ok(path) => path,
        Err(response) => return response,
    };
    let snapshot = state.engine.snapshot();
    let request = QueryRequest {
        scope,
        text: body,
        destination: Some(destination.clone()),
    };
    match snapshot.backend.run(request).await {
        Ok(outcome) => {
            let phases: Vec<Value> = outcome.phases.iter().map(PhaseResult::to_json).collect();
            json_response(json!({ "out": destination.to_string(), "phases": phases }))
        }
        Err(err) => error_response(err),
    }
}

async fn compile_get_root(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let text = match q_param(&params) {
        Ok(text) => text,
        Err(response) => return response,
    };
    compile_plan(&state, "", text).await
}

async fn compile_get_at(
    State(state): State<Arc<AppState>>,
    AxumPath(path): AxumPath<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let text = match q_param(&params) {
        Ok(text) => text,
        Err(response) => return response,
    };
    compile_plan(&state, &path, text).await
}

async fn compile_post_root(State(state): State<Arc<AppState>>, body: String) -> Response {
    if body.trim().is_empty() {
        return bad_request("the request body must carry the query text");
    }
    compile_plan(&state, "", body).await
}

async fn compile_post_at(
    State(state): State<Arc<AppState>>,
    AxumPath(path): AxumPath<String>,
    body: String,
) -> Response {
    if body.trim().is_empty() {
        return bad_request("the request body must carry the query text");
    }
    compile_plan(&state, &path, body).await
}

/// Compile only; the reply is the last phase artifact. A tree phase
/// answers `{name: tree}` JSON, a text phase `name\ntext` plain text.
async fn compile_plan(state: &AppState, raw: &str, text: String) -> Response {
    let scope = match dir_path(raw) {
        Ok(path) => path,
        Err(response) => return response,
    };
    let snapshot = state.engine.snapshot();
    let request = QueryRequest {
        scope,
        text,
        destination: None,
    };
    match snapshot.backend.compile(request).await {
        Ok(phases) => match phases.last() {
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "no plan" })),
            )
                .into_response(),
            Some(PhaseResult::Tree { name, value }) => {
                let mut body = serde_json::Map::new();
                body.insert(name.clone(), value.clone());
                json_response(Value::Object(body))
            }
            Some(PhaseResult::Text { name, text }) => text_response(format!("{name}\n{text}")),
        },
        Err(err) => error_response(err),
    }
}

async fn data_root(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
    body: String,
) -> Response {
    data_dispatch(&state, method, &headers, &params, "", body).await
}

async fn data_at(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    AxumPath(path): AxumPath<String>,
    Query(params): Query<BTreeMap<String, String>>,
    body: String,
) -> Response {
    data_dispatch(&state, method, &headers, &params, &path, body).await
}

async fn data_dispatch(
    state: &AppState,
    method: Method,
    headers: &HeaderMap,
    params: &BTreeMap<String, String>,
    raw: &str,
    body: String,
) -> Response {
    let path = match VPath::parse(raw) {
        Ok(path) => path,
        Err(err) => return error_response(err),
    };
    match method.as_str() {
        "GET" => data_get(state, headers, params, path).await,
        "PUT" => data_write(state, headers, path, body, true).await,
        "POST" => data_write(state, headers, path, body, false).await,
        "DELETE" => data_delete(state, path).await,
        "MOVE" => data_move(state, headers, path).await,
        _ => method_not_allowed(&method),
    }
}

async fn data_get(
    state: &AppState,
    headers: &HeaderMap,
    params: &BTreeMap<String, String>,
    path: VPath,
) -> Response {
    let offset = match parse_window(params.get("offset"), "offset") {
        Ok(value) => value.unwrap_or(0),
        Err(response) => return response,
    };
    let limit = match parse_window(params.get("limit"), "limit") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let format = resolve(header_text(headers, "accept"));
    let snapshot = state.engine.snapshot();
    if path.is_dir() {
        return match archive_directory(&snapshot.backend, &path, &format, offset, limit).await {
            Ok(bytes) => archive_response(bytes, &format),
            Err(err) => error_response(err),
        };
    }
    match snapshot.backend.scan(&path, offset, limit).await {
        Ok(data) => stream_response(encode(&format, data)),
        Err(err) => error_response(err),
    }
}

/// Decode the body, write it, and merge decode-time and write-time row
/// errors into one report. Row failures never fail the request.
async fn data_write(
    state: &AppState,
    headers: &HeaderMap,
    path: VPath,
    body: String,
    replace: bool,
) -> Response {
    let content_type = header_text(headers, "content-type");
    let (mut errors, values) = decode(content_type, &body);
    let snapshot = state.engine.snapshot();
    let written = if replace {
        snapshot.backend.save(&path, values).await
    } else {
        snapshot.backend.append(&path, values).await
    };
    match written {
        Ok(write_errors) => {
            errors.extend(write_errors);
            upload_response(errors)
        }
        Err(err) => error_response(err),
    }
}

async fn data_delete(state: &AppState, path: VPath) -> Response {
    let snapshot = state.engine.snapshot();
    match snapshot.backend.delete(&path).await {
        Ok(()) => text_response(format!("deleted {path}")),
        Err(err) => error_response(err),
    }
}

async fn data_move(state: &AppState, headers: &HeaderMap, from: VPath) -> Response {
    let to = match destination_header(headers) {
        Ok(path) => path,
        Err(response) => return response,
    };
    let snapshot = state.engine.snapshot();
    match snapshot.backend.move_resource(&from, &to).await {
        Ok(()) => text_response(format!("moved {from} to {to}")),
        Err(err) => error_response(err),
    }
}

async fn metadata_root(State(state): State<Arc<AppState>>) -> Response {
    metadata_lookup(&state, "").await
}

async fn metadata_at(
    State(state): State<Arc<AppState>>,
    AxumPath(path): AxumPath<String>,
) -> Response {
    metadata_lookup(&state, &path).await
}

/// Directory paths list children; file paths answer bare existence.
async fn metadata_lookup(state: &AppState, raw: &str) -> Response {
    let path = match VPath::parse(raw) {
        Ok(path) => path,
        Err(err) => return error_response(err),
    };
    let snapshot = state.engine.snapshot();
    if path.is_dir() {
        return match snapshot.backend.list(&path).await {
            Ok(entries) => {
                let children: Vec<Value> = entries
                    .iter()
                    .map(|entry| json!({ "name": entry.name, "type": entry.kind.label() }))
                    .collect();
                json_response(json!({ "children": children }))
            }
            Err(err) => error_response(err),
        };
    }
    match snapshot.backend.exists(&path).await {
        Ok(true) => json_response(json!({})),
        Ok(false) => error_response(Error::path_not_found(&path)),
        Err(err) => error_response(err),
    }
}

async fn mount_root(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    mount_dispatch(&state, method, &headers, "", body).await
}

async fn mount_at(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    AxumPath(path): AxumPath<String>,
    body: String,
) -> Response {
    mount_dispatch(&state, method, &headers, &path, body).await
}

async fn mount_dispatch(
    state: &AppState,
    method: Method,
    headers: &HeaderMap,
    raw: &str,
    body: String,
) -> Response {
    let path = match VPath::parse(raw) {
        Ok(path) => path,
        Err(err) => return error_response(err),
    };
    match method.as_str() {
        "GET" => mount_get(state, path).await,
        "PUT" => mount_put(state, path, body).await,
        "POST" => mount_post(state, headers, path, body).await,
        "DELETE" => mount_delete(state, path).await,
        "MOVE" => mount_move(state, headers, path).await,
        _ => method_not_allowed(&method),
    }
}

async fn mount_get(state: &AppState, path: VPath) -> Response {
    match state.engine.lookup(&path) {
        Some(config) => match serde_json::to_value(&config) {
            Ok(value) => json_response(value),
            Err(err) => error_response(Error::env_unexpected(format!(
                "cannot encode the mount config: {err}"
            ))),
        },
        None => error_response(Error::path_not_found(&path)),
    }
}

async fn mount_put(state: &AppState, path: VPath, body: String) -> Response {
    let config = match parse_mount_config(&body) {
        Ok(config) => config,
        Err(response) => return response,
    };
    match state.engine.upsert(path.clone(), config).await {
        Ok(MountCommit::Added) => text_response(format!("added {path}")),
        Ok(MountCommit::Updated) => text_response(format!("updated {path}")),
        Err(err) => error_response(err),
    }
}

/// POST creates a child of the addressed directory; the child's name comes
/// from the `FileName` header, with a trailing slash marking a directory.
async fn mount_post(state: &AppState, headers: &HeaderMap, dir: VPath, body: String) -> Response {
    if !dir.is_dir() {
        return bad_request(format!("{dir} is not a directory path"));
    }
    let Some(name) = header_text(headers, "filename") else {
        return bad_request("the FileName header is required");
    };
    let child = match child_path(&dir, name) {
        Ok(path) => path,
        Err(response) => return response,
    };
    let config = match parse_mount_config(&body) {
        Ok(config) => config,
        Err(response) => return response,
    };
    match state.engine.add_new(child.clone(), config).await {
        Ok(()) => text_response(format!("added {child}")),
        Err(err) => error_response(err),
    }
}

async fn mount_delete(state: &AppState, path: VPath) -> Response {
    match state.engine.delete_mount(&path).await {
        Ok(()) => text_response(format!("deleted {path}")),
        Err(err) => error_response(err),
    }
}

async fn mount_move(state: &AppState, headers: &HeaderMap, from: VPath) -> Response {
    let to = match destination_header(headers) {
        Ok(path) => path,
        Err(response) => return response,
    };
    match state.engine.move_mount(&from, &to).await {
        Ok(()) => text_response(format!("moved {from} to {to}")),
        Err(err) => error_response(err),
    }
}

fn parse_mount_config(body: &str) -> Result<MountConfig, Response> {
    serde_json::from_str(body).map_err(|err| bad_request(format!("invalid mount config: {err}")))
}

fn child_path(dir: &VPath, name: &str) -> Result<VPath, Response> {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.contains('/') {
        return Err(bad_request(format!("invalid FileName value: {name}")));
    }
    Ok(if name.ends_with('/') {
        dir.join_dir(trimmed)
    } else {
        dir.join_file(trimmed)
    })
}

fn dir_path(raw: &str) -> Result<VPath, Response> {
    let path = VPath::parse(raw).map_err(error_response)?;
    if !path.is_dir() {
        return Err(bad_request(format!("{path} is not a directory path")));
    }
    Ok(path)
}

fn q_param(params: &BTreeMap<String, String>) -> Result<String, Response> {
    match params.get("q") {
        Some(text) if !text.trim().is_empty() => Ok(text.clone()),
        _ => Err(bad_request("the q parameter is required")),
    }
}

fn parse_window(raw: Option<&String>, name: &str) -> Result<Option<u64>, Response> {
    match raw {
        None => Ok(None),
        Some(text) => match text.parse::<u64>() {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(bad_request(format!(
                "{name} must be a non-negative integer, got {text}"
            ))),
        },
    }
}

fn destination_header(headers: &HeaderMap) -> Result<VPath, Response> {
    let Some(raw) = header_text(headers, "destination") else {
        return Err(bad_request("the Destination header is required"));
    };
    VPath::parse(raw).map_err(error_response)
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Walks the virtual tree under `dir` and packs every file, encoded in the
/// negotiated format, into one tar archive. Unlike file downloads, which
/// stream, the whole archive sits in memory before the response starts;
/// memory grows with the encoded size of the tree, and a scan failure
/// anywhere in the walk still maps to the response status.
async fn archive_directory(
    backend: &BackendRouter,
    dir: &VPath,
    format: &ResponseFormat,
    offset: u64,
    limit: Option<u64>,
) -> ApiResult<Vec<u8>> {
    let files = collect_files(backend, dir).await?;
    let mut builder = tar::Builder::new(Vec::new());
    for file in files {
        let name = match file.relative_to(dir) {
            Some(rel) => rel.segments().join("/"),
            None => file.segments().join("/"),
        };
        let data = backend.scan(&file, offset, limit).await?;
        let mut body = encode(format, data).body;
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk);
        }
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, &name, bytes.as_slice())
            .map_err(archive_failed)?;
    }
    builder.into_inner().map_err(archive_failed)
}

async fn collect_files(backend: &BackendRouter, dir: &VPath) -> ApiResult<Vec<VPath>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.clone()];
    while let Some(current) = pending.pop() {
        for entry in backend.list(&current).await? {
            match entry.kind {
                EntryKind::File => files.push(current.join_file(&entry.name)),
                EntryKind::Directory | EntryKind::Mount => {
                    pending.push(current.join_dir(&entry.name));
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

fn archive_failed(err: std::io::Error) -> Error {
    Error::processing_other(format!("cannot assemble the archive: {err}"))
}

fn stream_response(encoded: Encoded) -> Response {
    let Encoded {
        media_type,
        disposition,
        body,
    } = encoded;
    let stream = body.map(Ok::<_, std::convert::Infallible>);
    let mut response = Response::new(Body::from_stream(stream));
    if let Ok(value) = HeaderValue::from_str(&media_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    if let Some(disposition) = disposition {
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            response
                .headers_mut()
                .insert(header::CONTENT_DISPOSITION, value);
        }
    }
    response
}

fn archive_response(bytes: Vec<u8>, format: &ResponseFormat) -> Response {
    let mut response = Response::new(Body::from(bytes));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-tar"),
    );
    if let Some(disposition) = format.disposition() {
        if let Ok(value) = HeaderValue::from_str(disposition) {
            response
                .headers_mut()
                .insert(header::CONTENT_DISPOSITION, value);
        }
    }
    response
}

fn upload_response(errors: Vec<WriteError>) -> Response {
    if errors.is_empty() {
        return StatusCode::OK.into_response();
    }
    let list: Vec<Value> = errors.iter().map(WriteError::to_json).collect();
    json_response(json!({ "errors": list }))
}

fn json_response(payload: Value) -> Response {
    Json(payload).into_response()
}

fn text_response(text: String) -> Response {
    text.into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

fn method_not_allowed(method: &Method) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": format!("unsupported method {method}") })),
    )
        .into_response()
}

fn error_response(err: Error) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": err.body_value() }))).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{HeaderMap, HeaderValue, StatusCode};

    use quarry::api::{
        EngineCell, FileConfigSink, MountTable, StandardFactory, VPath, load_config,
    };

    use super::{
        AppState, ServeConfig, change_port, child_path, destination_header, parse_window, serve,
        validate_config,
    };

    fn config(port: u16, max_body_bytes: u64) -> ServeConfig {
        ServeConfig {
            host: "127.0.0.1".parse().expect("host"),
            port,
            max_body_bytes,
        }
    }

    #[test]
    fn config_requires_a_nonzero_port() {
        let err = validate_config(&config(0, 1024)).expect_err("port error");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn config_requires_a_nonzero_body_limit() {
        let err = validate_config(&config(21000, 0)).expect_err("limit error");
        assert_eq!(err.status(), 400);
        validate_config(&config(21000, 1024)).expect("config ok");
    }

    #[tokio::test]
    async fn serve_rejects_a_zero_body_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sink = Arc::new(FileConfigSink::new(temp.path().join("config.json"), 21000));
        let engine = Arc::new(
            EngineCell::bootstrap(
                MountTable::new(),
                Arc::new(StandardFactory::new()),
                sink.clone(),
            )
            .await
            .expect("bootstrap"),
        );
        let err = serve(config(21000, 0), engine, sink)
            .await
            .expect_err("config error");
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn port_change_racing_a_pending_rebind_still_commits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("config.json");
        let sink = Arc::new(FileConfigSink::new(&config_path, 21000));
        let engine = Arc::new(
            EngineCell::bootstrap(
                MountTable::new(),
                Arc::new(StandardFactory::new()),
                sink.clone(),
            )
            .await
            .expect("bootstrap"),
        );
        let (rebind, mut pending) = tokio::sync::mpsc::channel(1);
        let state = AppState {
            engine,
            sink: sink.clone(),
            bound_port: 21000,
            rebind,
        };

        let first = change_port(&state, 21001, "changed").await;
        assert_eq!(first.status(), StatusCode::OK);
        let second = change_port(&state, 21002, "changed").await;
        assert_eq!(second.status(), StatusCode::OK);

        // One rebind fits the queue; the config still carries the latest port.
        assert_eq!(pending.recv().await, Some(21001));
        assert!(pending.try_recv().is_err());
        assert_eq!(sink.port(), 21002);
        assert_eq!(load_config(&config_path).expect("reload").port, 21002);
    }

    #[test]
    fn child_path_honors_the_trailing_slash() {
        let dir = VPath::parse("/a/").expect("dir");
        let file = child_path(&dir, "x").expect("file");
        assert_eq!(file.to_string(), "/a/x");
        let sub = child_path(&dir, "x/").expect("dir");
        assert_eq!(sub.to_string(), "/a/x/");
        assert!(child_path(&dir, "").is_err());
        assert!(child_path(&dir, "x/y").is_err());
    }

    #[test]
    fn window_params_must_be_unsigned_integers() {
        assert_eq!(
            parse_window(Some(&"12".to_string()), "offset").expect("parsed"),
            Some(12)
        );
        assert_eq!(parse_window(None, "offset").expect("absent"), None);
        let response = parse_window(Some(&"-1".to_string()), "limit").expect_err("negative");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(parse_window(Some(&"abc".to_string()), "limit").is_err());
    }

    #[test]
    fn destination_header_is_required() {
        let mut headers = HeaderMap::new();
        let response = destination_header(&headers).expect_err("missing");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        headers.insert("destination", HeaderValue::from_static("/out/run1"));
        let path = destination_header(&headers).expect("parsed");
        assert_eq!(path.to_string(), "/out/run1");
    }
}
