use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use axum::body::{Bytes, StreamBody};
use axum::extract::{Path, RawQuery};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE, IF_MATCH};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::{on, MethodFilter};
use axum::{Json, Router};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use corral::job::{Dispatcher, JobError, Registry, Request, Response, ResponseCode, Work};
use corral::transport::http::{RouteParams, RouteSpec, API_VERSION};

pub struct AppState {
    pub registry: Arc<Registry>,
    pub dispatcher: Dispatcher,
}

/// Build the daemon router from the routes the extensions contributed.
pub fn router(routes: Vec<RouteSpec>, state: Arc<AppState>) -> Router {
    let mut router = Router::new();
    for spec in routes {
        let state = state.clone();
        let extract = spec.extract;
        let handler = move |params: Path<HashMap<String, String>>,
                            RawQuery(query): RawQuery,
                            headers: HeaderMap,
                            body: Bytes| async move {
            handle(state, extract, params.0, query, headers, body).await
        };
        router = router.route(spec.path, on(method_filter(spec.method), handler));
    }
    router
}

fn method_filter(method: &str) -> MethodFilter {
    match method {
        "GET" => MethodFilter::GET,
        "PUT" => MethodFilter::PUT,
        "POST" => MethodFilter::POST,
        "DELETE" => MethodFilter::DELETE,
        "PATCH" => MethodFilter::PATCH,
        other => unreachable!("unsupported route method {other}"),
    }
}

async fn handle(
    state: Arc<AppState>,
    extract: fn(&RouteParams) -> Result<Request, JobError>,
    params: HashMap<String, String>,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AxumResponse {
    if let Some(response) = check_api_version(&headers) {
        return response;
    }

    let route_params = RouteParams {
        params,
        query: parse_query(query.as_deref().unwrap_or_default()),
        body: body.to_vec(),
    };
    let request = match extract(&route_params) {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };
    let job = match state.registry.job_for(request.clone()) {
        Ok(job) => job,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = job.check() {
        return error_response(&e);
    }

    let (sink, reply_rx, body_rx) = HttpSink::channel();
    let dispatcher = state.dispatcher.clone();
    tokio::task::spawn_blocking(move || {
        dispatcher.dispatch(Work {
            request,
            job,
            response: Box::new(sink),
        })
    });

    match reply_rx.await {
        Ok(Reply::Empty { pending }) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            append_pending(response.headers_mut(), &pending);
            response
        }
        Ok(Reply::Data { value }) => (StatusCode::OK, Json(value)).into_response(),
        Ok(Reply::Stream { pending }) => {
            let stream = StreamBody::new(UnboundedReceiverStream::new(body_rx));
            let mut response = (StatusCode::ACCEPTED, stream).into_response();
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            append_pending(headers, &pending);
            response
        }
        Ok(Reply::Failure { err }) => error_response(&err),
        Err(_) => error_response(&JobError::simple("the job terminated without a response")),
    }
}

/// Reject callers negotiated against a different API version.
fn check_api_version(headers: &HeaderMap) -> Option<AxumResponse> {
    let value = headers.get(IF_MATCH)?.to_str().ok()?;
    for clause in value.split(',') {
        if let Some(version) = clause.trim().strip_prefix("api=") {
            if version != API_VERSION {
                return Some(
                    (
                        StatusCode::PRECONDITION_FAILED,
                        Json(serde_json::json!({
                            "message": format!("the server speaks api={API_VERSION}")
                        })),
                    )
                        .into_response(),
                );
            }
        }
    }
    None
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn error_response(err: &JobError) -> AxumResponse {
    let status = match err {
        JobError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        JobError::NotFound(_) => StatusCode::NOT_FOUND,
        JobError::NoJobForRequest | JobError::NotTransportable => StatusCode::NOT_IMPLEMENTED,
        JobError::AllocationFailed => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "message": err.to_string() })),
    )
        .into_response()
}

fn append_pending(headers: &mut HeaderMap, pending: &[(String, String)]) {
    for (key, value) in pending {
        let name = match HeaderName::try_from(format!("X-{key}")) {
            Ok(name) => name,
            Err(_) => {
                tracing::warn!("dropping pending entry with invalid header name '{key}'");
                continue;
            }
        };
        match HeaderValue::try_from(value.as_str()) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => tracing::warn!("dropping pending entry with invalid header value '{key}'"),
        }
    }
}

enum Reply {
    Empty { pending: Vec<(String, String)> },
    Data { value: serde_json::Value },
    Stream { pending: Vec<(String, String)> },
    Failure { err: JobError },
}

/// Server-side sink: the first terminal call resolves the handler's reply,
/// streamed bytes flow through an unbounded channel that closes when the job
/// drops the sink.
struct HttpSink {
    reply: Option<oneshot::Sender<Reply>>,
    writer: BodyWriter,
    pending: Vec<(String, String)>,
}

struct BodyWriter {
    body: mpsc::UnboundedSender<Result<Bytes, io::Error>>,
}

impl io::Write for BodyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body
            .send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl HttpSink {
    fn channel() -> (
        Self,
        oneshot::Receiver<Reply>,
        mpsc::UnboundedReceiver<Result<Bytes, io::Error>>,
    ) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();
        (
            Self {
                reply: Some(reply_tx),
                writer: BodyWriter { body: body_tx },
                pending: Vec::new(),
            },
            reply_rx,
            body_rx,
        )
    }

    fn reply(&mut self, reply: Reply) -> bool {
        match self.reply.take() {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => {
                tracing::warn!("job attempted a second terminal response");
                false
            }
        }
    }
}

impl Response for HttpSink {
    fn success(&mut self, _code: ResponseCode) {
        let pending = std::mem::take(&mut self.pending);
        self.reply(Reply::Empty { pending });
    }

    fn success_with_data(&mut self, _code: ResponseCode, data: serde_json::Value) {
        self.reply(Reply::Data { value: data });
    }

    fn success_with_write(
        &mut self,
        _code: ResponseCode,
        _flush: bool,
        _structured: bool,
    ) -> &mut dyn io::Write {
        let pending = std::mem::take(&mut self.pending);
        self.reply(Reply::Stream { pending });
        &mut self.writer
    }

    fn write_pending_success(&mut self, key: &str, value: serde_json::Value) {
        if self.reply.is_none() {
            tracing::warn!("pending write after a terminal response");
            return;
        }
        let value = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        self.pending.push((key.to_string(), value));
    }

    fn failure(&mut self, err: JobError) {
        self.reply(Reply::Failure { err });
    }
}
