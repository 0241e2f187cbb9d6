//! HTTP bridge for out-of-process tools and dashboards.
//!
//! - `POST /ask-user` blocks until the question is answered
//! - `GET /health`
//! - `GET /threads` returns the thread forest
//! - `POST /threads/{id}/fork` spawns a sub-thread

use crate::Coordinator;
use crate::ask_user::Question;
use crate::error::CoreError;
use crate::threads::SpawnOptions;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, warn};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Knobs for the HTTP routes.
#[derive(Debug, Clone, Default)]
pub struct HttpSettings {
    /// Give up on `POST /ask-user` after this long (504).
    pub ask_timeout: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskUserRequest {
    #[serde(default)]
    question_id: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    conversation_id: Option<String>,
}

impl AskUserRequest {
    fn into_question(self) -> Result<Question, String> {
        let question_id = self
            .question_id
            .filter(|id| !id.trim().is_empty())
            .ok_or("questionId is required")?;
        let question = self
            .question
            .filter(|q| !q.trim().is_empty())
            .ok_or("question is required")?;
        let mut request = Question::new(question_id, question).with_options(self.options);
        request.conversation_id = self.conversation_id;
        Ok(request)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    version: &'static str,
    pending_questions: usize,
    locked_conversations: usize,
}

fn error_reply(status: StatusCode, message: impl Into<String>) -> Response {
    warp::reply::with_status(warp::reply::json(&json!({ "error": message.into() })), status)
        .into_response()
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_)
        | CoreError::EventNotInThread { .. }
        | CoreError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        CoreError::ThreadNotFound(_) | CoreError::EventNotFound(_) => StatusCode::NOT_FOUND,
        CoreError::QuestionAlreadyPending(_) => StatusCode::CONFLICT,
        CoreError::QuestionAbandoned(_) => StatusCode::GONE,
        CoreError::LockTimeout { .. } | CoreError::LockWaitAborted { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CoreError::Summarizer(_) | CoreError::Store(_) | CoreError::Json(_) | CoreError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn core_error_reply(err: CoreError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    error_reply(status, err.to_string())
}

fn with_coordinator(
    coordinator: Coordinator,
) -> impl Filter<Extract = (Coordinator,), Error = Infallible> + Clone {
    warp::any().map(move || coordinator.clone())
}

/// All HTTP routes, with JSON errors for unmatched requests.
pub fn routes(
    coordinator: Coordinator,
    settings: HttpSettings,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + Send + Sync + 'static {
    let ask_user = warp::path!("ask-user")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_coordinator(coordinator.clone()))
        .and(warp::any().map(move || settings.clone()))
        .and_then(handle_ask_user);

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_coordinator(coordinator.clone()))
        .and_then(handle_health);

    let tree = warp::path!("threads")
        .and(warp::get())
        .and(with_coordinator(coordinator.clone()))
        .and_then(handle_tree);

    let fork = warp::path!("threads" / String / "fork")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_coordinator(coordinator))
        .and_then(handle_fork);

    ask_user
        .or(health)
        .unify()
        .or(tree)
        .unify()
        .or(fork)
        .unify()
        .recover(handle_rejection)
}

async fn handle_ask_user(
    body: Bytes,
    coordinator: Coordinator,
    settings: HttpSettings,
) -> Result<Response, Infallible> {
    let request: AskUserRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, format!("invalid JSON: {e}"))),
    };
    let question = match request.into_question() {
        Ok(question) => question,
        Err(message) => return Ok(error_reply(StatusCode::BAD_REQUEST, message)),
    };

    let question_id = question.question_id.clone();
    debug!(%question_id, "ask-user request received");
    let bridge = coordinator.ask_user();
    let outcome = match settings.ask_timeout {
        Some(limit) => match tokio::time::timeout(limit, bridge.ask(question)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // The ask future was dropped, which evicted the question.
                warn!(%question_id, "ask-user request timed out");
                return Ok(error_reply(
                    StatusCode::GATEWAY_TIMEOUT,
                    "timed out waiting for an answer",
                ));
            }
        },
        None => bridge.ask(question).await,
    };

    Ok(match outcome {
        Ok(answer) => warp::reply::json(&json!({ "answer": answer })).into_response(),
        Err(e) => core_error_reply(e),
    })
}

async fn handle_health(coordinator: Coordinator) -> Result<Response, Infallible> {
    let health = Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        pending_questions: coordinator.ask_user().pending_questions().len(),
        locked_conversations: coordinator.locks().locked_conversations().len(),
    };
    Ok(warp::reply::json(&health).into_response())
}

async fn handle_tree(coordinator: Coordinator) -> Result<Response, Infallible> {
    Ok(match coordinator.threads().tree() {
        Ok(tree) => warp::reply::json(&tree).into_response(),
        Err(e) => core_error_reply(e),
    })
}

async fn handle_fork(
    parent_id: String,
    body: Bytes,
    coordinator: Coordinator,
) -> Result<Response, Infallible> {
    let options: SpawnOptions = match serde_json::from_slice(&body) {
        Ok(options) => options,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, format!("invalid JSON: {e}"))),
    };
    if options.display_name.trim().is_empty() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "displayName is required"));
    }

    Ok(match coordinator.threads().spawn_sub_thread(&parent_id, options) {
        Ok(thread) => {
            warp::reply::with_status(warp::reply::json(&thread), StatusCode::CREATED).into_response()
        }
        Err(e) => core_error_reply(e),
    })
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        (StatusCode::BAD_REQUEST, "bad request")
    };
    Ok(error_reply(status, message))
}
