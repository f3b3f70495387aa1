//! Hand-routed HTTP/JSON surface (`spec.md` §6). No web framework: a
//! `hyper` 1.x `http1` connection loop plus a manual method+path match,
//! the way a small internal daemon in this corpus is expected to be
//! wired rather than reaching for `axum`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::domains::merge::{MergeOptions, SyncOptions};
use crate::domains::sessions::entity::SessionStatus;
use crate::domains::sessions::state_machine::CloseTarget;
use crate::errors::CoreError;
use crate::service::EngineService;

pub async fn serve(addr: SocketAddr, service: EngineService) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP surface listening on {addr}");
    let service = Arc::new(service);

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let service = service.clone();

        tokio::task::spawn(async move {
            let conn = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, hyper::service::service_fn(move |req| {
                    let service = service.clone();
                    async move { route(req, service).await }
                }));
            if let Err(err) = conn.await {
                warn!("connection from {peer} ended with error: {err}");
            }
        });
    }
}

type HttpResult = Result<Response<Full<Bytes>>, Infallible>;

async fn route(req: Request<Incoming>, service: Arc<EngineService>) -> HttpResult {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    let result = dispatch(&method, &segments, &query, req, &service).await;
    Ok(match result {
        Ok(response) => response,
        Err(err) => error_response(err),
    })
}

async fn dispatch(
    method: &Method,
    segments: &[&str],
    query: &str,
    req: Request<Incoming>,
    service: &EngineService,
) -> Result<Response<Full<Bytes>>, CoreError> {
    match (method, segments) {
        (&Method::POST, ["agent", "launch"]) => {
            let body: LaunchRequest = read_json(req).await?;
            let result = service.launch(body.project_id, body.issue_ids).await?;
            Ok(json_ok(&json!({
                "session_id": result.session.id,
                "branch": result.session.branch,
                "worktree_path": result.session.worktree_path,
                "command": result.command,
                "resumed": result.resumed,
            })))
        }
        (&Method::POST, ["agent", "resume"]) => {
            let body: SessionIdRequest = read_json(req).await?;
            let session = service.resume(body.session_id).await?;
            Ok(json_ok(&session))
        }
        (&Method::POST, ["agent", "close"]) => {
            let body: CloseRequest = read_json(req).await?;
            let target = body.status.unwrap_or(CloseTarget::Idle);
            let session = service.close(body.session_id, target).await?;
            Ok(json_ok(&session))
        }
        (&Method::POST, ["sessions", id, "reactivate"]) => {
            let session = service.reactivate(id.to_string()).await?;
            Ok(json_ok(&session))
        }
        (&Method::POST, ["sessions", id, "sync"]) => {
            let body: SyncRequest = read_json(req).await?;
            let opts = SyncOptions {
                rebase: body.rebase.unwrap_or(false),
                force: body.force.unwrap_or(false),
                dry_run: body.dry_run.unwrap_or(false),
            };
            let outcome = service.sync(id.to_string(), body.base_branch, opts).await?;
            Ok(json_ok(&outcome))
        }
        (&Method::POST, ["sessions", id, "merge"]) => {
            let body: MergeRequest = read_json(req).await?;
            let opts = MergeOptions {
                base: Some(body.base_branch.clone()),
                rebase: body.rebase.unwrap_or(false),
                create_pr: body.create_pr.unwrap_or(false),
                pr_title: body.pr_title,
                pr_body: body.pr_body,
                pr_draft: body.pr_draft.unwrap_or(false),
                force: body.force.unwrap_or(false),
                dry_run: body.dry_run.unwrap_or(false),
                cleanup: body.cleanup.unwrap_or(true),
            };
            let outcome = service
                .merge(
                    id.to_string(),
                    body.repo_path.into(),
                    body.base_branch,
                    body.pr_repository,
                    opts,
                )
                .await?;
            Ok(json_ok(&outcome))
        }
        (&Method::DELETE, ["sessions", id, "worktree"]) => {
            let body: DeleteWorktreeRequest = read_json_allow_empty(req).await?;
            let session = service.delete_worktree(id.to_string(), body.force.unwrap_or(false)).await?;
            Ok(json_ok(&session))
        }
        (&Method::GET, ["sessions", id, "close-check"]) => {
            let check = service.close_check(id.to_string()).await?;
            Ok(json_ok(&check))
        }
        (&Method::GET, ["sessions"]) => {
            let params = parse_query(query);
            let project_id = params.get("project_id").cloned().unwrap_or_default();
            let statuses = params
                .get("status")
                .map(|raw| {
                    raw.split(',')
                        .filter_map(SessionStatus::parse)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            let sessions = service.list_sessions(project_id, statuses, 500).await?;
            Ok(json_ok(&sessions))
        }
        (&Method::POST, ["sessions", "discover"]) => {
            let params = parse_query(query);
            let project_id = params
                .get("project_id")
                .cloned()
                .ok_or_else(|| CoreError::validation("project_id", "required query parameter"))?;
            let discovered = service.discover(project_id).await?;
            Ok(json_ok(&discovered))
        }
        (&Method::DELETE, ["sessions", "cleanup"]) => {
            let deleted = service.purge_stale().await?;
            Ok(json_ok(&json!({ "deleted": deleted })))
        }
        _ => Err(CoreError::not_found("Route", format!("{method} /{}", segments.join("/")))),
    }
}

#[derive(Deserialize)]
struct LaunchRequest {
    project_id: String,
    issue_ids: Vec<String>,
}

#[derive(Deserialize)]
struct SessionIdRequest {
    session_id: String,
}

#[derive(Deserialize)]
struct CloseRequest {
    session_id: String,
    status: Option<CloseTarget>,
}

#[derive(Deserialize)]
struct SyncRequest {
    base_branch: String,
    rebase: Option<bool>,
    force: Option<bool>,
    dry_run: Option<bool>,
}

#[derive(Deserialize)]
struct MergeRequest {
    repo_path: String,
    base_branch: String,
    pr_repository: Option<String>,
    rebase: Option<bool>,
    create_pr: Option<bool>,
    pr_title: Option<String>,
    pr_body: Option<String>,
    pr_draft: Option<bool>,
    force: Option<bool>,
    dry_run: Option<bool>,
    cleanup: Option<bool>,
}

#[derive(Deserialize, Default)]
struct DeleteWorktreeRequest {
    force: Option<bool>,
}

async fn read_json<T: for<'de> Deserialize<'de>>(req: Request<Incoming>) -> Result<T, CoreError> {
    let bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|err| CoreError::validation("body", format!("failed to read request body: {err}")))?
        .to_bytes();
    serde_json::from_slice(&bytes)
        .map_err(|err| CoreError::validation("body", format!("invalid JSON: {err}")))
}

async fn read_json_allow_empty<T: for<'de> Deserialize<'de> + Default>(
    req: Request<Incoming>,
) -> Result<T, CoreError> {
    let bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|err| CoreError::validation("body", format!("failed to read request body: {err}")))?
        .to_bytes();
    if bytes.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|err| CoreError::validation("body", format!("invalid JSON: {err}")))
}

fn parse_query(query: &str) -> std::collections::HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn json_ok<T: serde::Serialize>(value: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, value)
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response parts are always valid")
}

fn error_response(err: CoreError) -> Response<Full<Bytes>> {
    if let CoreError::ConflictMerge { .. } = &err {
        return json_response(StatusCode::OK, &err);
    }
    error!("request failed: {err}");
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &json!({ "error": err }))
}
