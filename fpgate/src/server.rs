//! HTTP and WebSocket front end
//!
//! Request/response routes run a whole operation per request. The
//! `/ws/identify` route hands the upgraded socket to the session handler.
//! Every JSON reply repeats the HTTP status in a `status` field.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{debug, info};

use fpgate_core::{AttemptOutcome, IdentifyOptions, Reader, Scanner};
use fpgate_transport::{Pacing, SessionProtocolHandler};
use fpgate_types::{Email, Finger, FingerEntry};

use crate::error::{Error, Result};
use crate::ws::WsChannel;

/// State shared by every route
pub struct AppState<S: Scanner> {
    reader: Reader<S>,
    sessions: SessionProtocolHandler<S>,
}

impl<S: Scanner> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

impl<S: Scanner> AppState<S> {
    pub fn new(reader: Reader<S>, options: IdentifyOptions, pacing: Pacing) -> Self {
        let sessions = SessionProtocolHandler::new(reader.clone(), options).with_pacing(pacing);
        Self { reader, sessions }
    }

    pub fn reader(&self) -> &Reader<S> {
        &self.reader
    }

    pub fn options(&self) -> &IdentifyOptions {
        self.sessions.options()
    }
}

/// Build the gateway routes
pub fn router<S: Scanner>(state: AppState<S>) -> Router {
    Router::new()
        .route("/enroll/{email}", get(enroll::<S>).post(enroll::<S>))
        .route("/verify/{email}", get(verify::<S>))
        .route("/fingers", get(fingers))
        .route("/identify", get(identify::<S>))
        .route("/status", get(status::<S>))
        .route("/ws/identify", get(ws_identify::<S>))
        .with_state(state)
}

/// Serve the gateway on `addr` until Ctrl-C
pub async fn run<S: Scanner>(addr: SocketAddr, state: AppState<S>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        debug!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

/// JSON reply with the status repeated in the body
fn reply(status: StatusCode, mut body: Value) -> Response {
    if let Some(fields) = body.as_object_mut() {
        fields.insert("status".into(), status.as_u16().into());
    }
    (status, Json(body)).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct EnrollQuery {
    /// Finger number or name; right index when absent
    pub finger: Option<String>,
}

async fn enroll<S: Scanner>(
    State(state): State<AppState<S>>,
    Path(email): Path<String>,
    Query(query): Query<EnrollQuery>,
) -> Result<Response> {
    let email = Email::parse(email)?;
    let finger = match query.finger.as_deref() {
        Some(finger) => finger.parse::<Finger>()?,
        None => Finger::default(),
    };

    state.reader.enroll(&email, finger).await?;

    Ok(reply(
        StatusCode::OK,
        json!({
            "message": "User enrolled successfully",
            "user": email,
            "finger": FingerEntry::from(finger),
        }),
    ))
}

async fn verify<S: Scanner>(
    State(state): State<AppState<S>>,
    Path(email): Path<String>,
) -> Result<Response> {
    let email = Email::parse(email)?;
    let matched = state.reader.verify(&email).await?;

    Ok(reply(
        StatusCode::OK,
        json!({ "user": email, "matched": matched }),
    ))
}

async fn fingers() -> Json<Vec<FingerEntry>> {
    Json(Finger::entries())
}

async fn identify<S: Scanner>(State(state): State<AppState<S>>) -> Result<Response> {
    match state.reader.identify(state.options()).await? {
        AttemptOutcome::Identified { identity, attempt } => Ok(reply(
            StatusCode::OK,
            json!({ "user": identity, "attempt": attempt }),
        )),
        AttemptOutcome::Exhausted { attempts } => Ok(reply(
            StatusCode::BAD_REQUEST,
            json!({ "message": format!("User not identified after {} attempts", attempts) }),
        )),
        AttemptOutcome::Failed { error, .. } => Err(error.into()),
        AttemptOutcome::NotIdentified { attempt, .. } | AttemptOutcome::Cancelled { attempts: attempt } => {
            Err(Error::Core(fpgate_core::Error::InvalidSessionState(format!(
                "identification stopped after attempt {}",
                attempt
            ))))
        }
    }
}

async fn status<S: Scanner>(State(state): State<AppState<S>>) -> Json<Value> {
    let lock = state.reader.lock();
    let offload = state.reader.offload();

    Json(json!({
        "busy": lock.is_held(),
        "holder": lock.holder(),
        "in_flight": offload.in_flight(),
        "workers": offload.workers(),
    }))
}

async fn ws_identify<S: Scanner>(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState<S>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let summary = state
            .sessions
            .serve(WsChannel::new(socket, peer.to_string()))
            .await;
        debug!(peer = %peer, session = %summary.session, state = summary.state.name(), "WebSocket done");
    })
}
