//! HTTP boundary in front of the [`Coordinator`].
//!
//! | route | action |
//! |-------|--------|
//! | `POST /Sessions` | allocate a port and launch a backend |
//! | `GET /Sessions` | list tracked sessions |
//! | `GET /Sessions/{id}` | one tracked session |
//! | `DELETE /Sessions/{id}` | tear a session down |
//! | `GET /health` | coordinator statistics |

use crate::core::coordinator::Coordinator;
use crate::domain::model::{PORT_KEY, SESSION_NAME_KEY, SESSION_SEARCH_ID_KEY};
use crate::utils::error::{CoordinatorError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::http::{header, Method, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const SESSIONS_PATH: &str = "/Sessions";
const HEALTH_PATH: &str = "/health";

/// Body of `POST /Sessions`. Keys match the flags the backend understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(rename = "SESSION_NAME")]
    pub session_name: String,
    #[serde(rename = "SESSION_SEARCH_ID")]
    pub session_search_id: String,
}

/// Accept connections until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, coordinator: Arc<Coordinator>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    if let Ok(addr) = listener.local_addr() {
        info!("🚀 Session endpoint listening on http://{}", addr);
    }
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("HTTP server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let coordinator = Arc::clone(&coordinator);
                        async move { Ok::<_, Infallible>(route(&coordinator, req).await) }
                    });
                    if let Err(err) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(peer = %peer, "http connection error: {err}");
                    }
                });
            }
        }
    }

    Ok(())
}

/// Dispatch one request.
pub async fn route(coordinator: &Coordinator, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();
    debug!(method = %method, path = %path, "request");

    let result = match (&method, path.as_str()) {
        (&Method::POST, SESSIONS_PATH) => create_session(coordinator, req).await,
        (&Method::GET, SESSIONS_PATH) => list_sessions(coordinator).await,
        (&Method::GET, HEALTH_PATH) => health(coordinator).await,
        (_, SESSIONS_PATH) | (_, HEALTH_PATH) => {
            return error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
        }
        (_, p) => match p.strip_prefix("/Sessions/") {
            Some(id) if !id.is_empty() && !id.contains('/') => match method {
                Method::GET => session(coordinator, id).await,
                Method::DELETE => terminate_session(coordinator, id).await,
                _ => return error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
            },
            _ => return error_response(StatusCode::NOT_FOUND, "Not found"),
        },
    };

    result.unwrap_or_else(|e| {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %e, "request failed");
        }
        error_response(status, &e.to_string())
    })
}

async fn create_session(
    coordinator: &Coordinator,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| CoordinatorError::InvalidRequest {
            message: format!("cannot read body: {}", e),
        })?
        .to_bytes();

    let request = parse_create_request(&body)?;
    let port = coordinator
        .create_session(&request.session_name, &request.session_search_id)
        .await?;

    Ok(json_response(
        StatusCode::OK,
        &json!({ "status": "success", (PORT_KEY): port }),
    ))
}

/// Decode a creation body, rejecting missing or non-string keys.
pub fn parse_create_request(body: &[u8]) -> Result<CreateSessionRequest> {
    let invalid = |reason: String| CoordinatorError::InvalidRequest {
        message: format!(
            "expected JSON object with string fields {} and {}: {}",
            SESSION_NAME_KEY, SESSION_SEARCH_ID_KEY, reason
        ),
    };

    let value: Value = serde_json::from_slice(body).map_err(|e| invalid(e.to_string()))?;
    // derived struct deserializers also accept sequences
    if !value.is_object() {
        return Err(invalid("body is not an object".to_string()));
    }
    serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
}

async fn list_sessions(coordinator: &Coordinator) -> Result<Response<Full<Bytes>>> {
    let sessions = coordinator.list_sessions().await;
    Ok(json_response(
        StatusCode::OK,
        &json!({ "status": "success", "sessions": sessions }),
    ))
}

async fn session(coordinator: &Coordinator, instance_id: &str) -> Result<Response<Full<Bytes>>> {
    let info = coordinator.session(instance_id).await?;
    Ok(json_response(
        StatusCode::OK,
        &json!({ "status": "success", "session": info }),
    ))
}

async fn terminate_session(
    coordinator: &Coordinator,
    instance_id: &str,
) -> Result<Response<Full<Bytes>>> {
    let info = coordinator.terminate_session(instance_id).await?;
    Ok(json_response(
        StatusCode::OK,
        &json!({ "status": "success", "session": info }),
    ))
}

async fn health(coordinator: &Coordinator) -> Result<Response<Full<Bytes>>> {
    let stats = coordinator.stats().await;
    Ok(json_response(
        StatusCode::OK,
        &json!({ "status": "success", "stats": stats }),
    ))
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "status": "error", "message": message }))
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
