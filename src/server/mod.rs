//! The HTTP surface serving recorders, peer backends and the leader role.
//!
//! Every body is a length-unframed protobuf message except profile streams,
//! which carry their own checksummed framing. Leader-only routes answer 421
//! on non-leader nodes so a misdirected client re-resolves the leader.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::{Extension, Query};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{AddExtensionLayer, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::assignment::PlannerStore;
use crate::association::{serialize_process_groups, BackendRegistry};
use crate::config::Config;
use crate::daemon::LeaderClient;
use crate::election::LeaderCell;
use crate::error::AppError;
use crate::framing::{FrameBuffer, ProfileHeaderParser, Progress};
use crate::models::{ProcessGroup, RecorderIdentity};
use crate::utils;
use crate::wire;

/// Chunk size used when feeding a received profile body through the frame parser.
const PROFILE_CHUNK_SIZE: usize = 8 * 1024;

/// Shared handler state.
pub struct AppState {
    pub config: Arc<Config>,
    pub cell: Arc<LeaderCell>,
    pub planners: Arc<PlannerStore>,
    pub registry: Arc<BackendRegistry>,
    pub leader_client: Arc<LeaderClient>,
}

/// The HTTP server of a backend node.
pub struct AppServer {
    config: Arc<Config>,
    state: Arc<AppState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl AppServer {
    pub fn new(config: Arc<Config>, state: Arc<AppState>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self { config, state, shutdown_tx }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(self) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .advertised_address()
            .parse()
            .context("error parsing server bind address")?;
        let app = Router::new()
            .route("/health", get(health))
            .route("/poll", post(poll))
            .route("/association", put(association))
            .route("/load", post(load_report))
            .route("/work", get(work_policy))
            .route("/profile", post(profile))
            .layer(AddExtensionLayer::new(self.state.clone()));

        tracing::info!(%addr, "HTTP server listening");
        let mut shutdown = BroadcastStream::new(self.shutdown_tx.subscribe());
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.next().await;
            })
            .await
            .context("error from HTTP server")?;
        tracing::debug!("HTTP server shutdown");
        Ok(())
    }
}

fn error_response(err: AppError) -> (StatusCode, Vec<u8>) {
    if matches!(err, AppError::Ise(_)) {
        tracing::error!(error = ?err, "internal error handling request");
    }
    (err.status(), err.to_string().into_bytes())
}

async fn health() -> (StatusCode, Vec<u8>) {
    (StatusCode::OK, b"OK".to_vec())
}

async fn poll(Extension(state): Extension<Arc<AppState>>, body: Bytes) -> (StatusCode, Vec<u8>) {
    match poll_inner(&state, body).await {
        Ok(data) => (StatusCode::OK, data),
        Err(err) => error_response(err),
    }
}

async fn poll_inner(state: &AppState, body: Bytes) -> Result<Vec<u8>, AppError> {
    let request: wire::PollRequest =
        utils::decode_model(&body).map_err(|_| AppError::InvalidInput("malformed poll request".into()))?;
    let info = request
        .recorder_info
        .ok_or_else(|| AppError::InvalidInput("poll request missing recorder info".into()))?;
    let identity = RecorderIdentity::from(&info);
    let work_last_issued = request.work_last_issued.unwrap_or_default();

    let assignment = state.planners.handle_poll(identity, info.recorder_tick, work_last_issued).await?;
    let response = wire::PollResponse {
        assignment: Some(assignment),
        controller_id: state.config.backend_id,
    };
    Ok(utils::encode_model(&response)?)
}

async fn association(Extension(state): Extension<Arc<AppState>>, body: Bytes) -> (StatusCode, Vec<u8>) {
    match association_inner(&state, body).await {
        Ok(response) => response,
        Err(err) => error_response(err),
    }
}

async fn association_inner(state: &AppState, body: Bytes) -> Result<(StatusCode, Vec<u8>), AppError> {
    // Non-leader nodes relay the request verbatim and pass the leader's
    // response through, so recorders may ask any node for their placement.
    if !state.cell.is_self_leader() {
        return state.leader_client.forward_association(body).await;
    }
    let request: wire::AssociationRequest =
        utils::decode_model(&body).map_err(|_| AppError::InvalidInput("malformed association request".into()))?;
    let info = request
        .recorder_info
        .ok_or_else(|| AppError::InvalidInput("association request missing recorder info".into()))?;
    let group = ProcessGroup::from_recorder_info(&info);

    let address = state.registry.associate(group).await?;
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| AppError::Ise(anyhow!("malformed backend address {}", address)))?;
    let port: u32 = port
        .parse()
        .map_err(|_| AppError::Ise(anyhow!("malformed backend port in address {}", address)))?;
    let response = wire::AssociationResponse { host: host.to_string(), port };
    Ok((StatusCode::OK, utils::encode_model(&response)?))
}

async fn load_report(Extension(state): Extension<Arc<AppState>>, body: Bytes) -> (StatusCode, Vec<u8>) {
    match load_report_inner(&state, body).await {
        Ok(data) => (StatusCode::OK, data),
        Err(err) => error_response(err),
    }
}

async fn load_report_inner(state: &AppState, body: Bytes) -> Result<Vec<u8>, AppError> {
    if !state.cell.is_self_leader() {
        return Err(AppError::NotLeader);
    }
    let report: wire::LoadReportRequest =
        utils::decode_model(&body).map_err(|_| AppError::InvalidInput("malformed load report".into()))?;
    let address = format!("{}:{}", report.ip, report.port);
    let groups = state.registry.report_load(&address, report.load, report.curr_tick);
    Ok(serialize_process_groups(&groups)?)
}

#[derive(Deserialize)]
struct PolicyQuery {
    app_id: String,
    cluster: String,
    proc_name: String,
}

async fn work_policy(Extension(state): Extension<Arc<AppState>>, Query(query): Query<PolicyQuery>) -> (StatusCode, Vec<u8>) {
    match work_policy_inner(&state, query).await {
        Ok(data) => (StatusCode::OK, data),
        Err(err) => error_response(err),
    }
}

async fn work_policy_inner(state: &AppState, query: PolicyQuery) -> Result<Vec<u8>, AppError> {
    if !state.cell.is_self_leader() {
        return Err(AppError::NotLeader);
    }
    let group = ProcessGroup {
        app_id: query.app_id,
        cluster: query.cluster,
        proc_name: query.proc_name,
    };
    if state.registry.association_for(&group).is_none() {
        return Err(AppError::InvalidInput(format!("process group {} has no placement", group)));
    }
    let policy = wire::RecordingPolicy {
        duration_secs: state.config.profile_duration_secs,
        coverage_pct: state.config.profile_coverage_pct,
        description: "default cpu sampling policy".into(),
    };
    Ok(utils::encode_model(&policy)?)
}

async fn profile(Extension(state): Extension<Arc<AppState>>, body: Bytes) -> (StatusCode, Vec<u8>) {
    match profile_inner(&state, body).await {
        Ok(data) => (StatusCode::OK, data),
        Err(err) => error_response(err),
    }
}

async fn profile_inner(state: &AppState, body: Bytes) -> Result<Vec<u8>, AppError> {
    let mut buf = FrameBuffer::new();
    let mut parser = ProfileHeaderParser::new(state.config.max_profile_message_size);
    let mut progress = Progress::Incomplete;
    for chunk in body.chunks(PROFILE_CHUNK_SIZE) {
        buf.extend(chunk);
        progress = parser
            .parse(&mut buf)
            .map_err(|err| AppError::InvalidInput(err.to_string()))?;
        if progress == Progress::Complete {
            break;
        }
    }
    if progress != Progress::Complete {
        return Err(AppError::InvalidInput("truncated profile stream".into()));
    }
    let header = parser
        .header()
        .ok_or_else(|| AppError::InvalidInput("profile stream missing header".into()))?;
    let assignment = header
        .work_assignment
        .as_ref()
        .ok_or_else(|| AppError::InvalidInput("profile header missing its work assignment".into()))?;
    tracing::info!(work_id = assignment.work_id, "profile stream header accepted");
    Ok(Vec::new())
}
