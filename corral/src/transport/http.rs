use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::job::{Job, JobError, Kind, Request, RequestId, Response, ResponseCode};

use super::{HostLocator, Locator, Transport};

/// Port the agent listens on when a locator does not name one.
pub const DEFAULT_HTTP_PORT: u16 = 43273;

/// Version negotiated through the `If-Match` header.
pub const API_VERSION: &str = "1";

pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How a response body is decoded: `Table` pulls pending entries out of the
/// headers, `Json` decodes a structured body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseContentMode {
    Table,
    Json,
}

/// Response headers, framework-neutral.
pub type Headers = Vec<(String, String)>;

pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// The wire surface a request must declare to travel over HTTP.
pub trait RemoteExecutable: Send + Sync {
    fn http_method(&self) -> &'static str;

    /// Path with the request's fields substituted in.
    fn http_path(&self) -> String;

    fn request_id(&self) -> Option<RequestId> {
        None
    }

    fn marshal_url_query(&self, query: &mut Vec<(&'static str, String)>) {
        let _ = query;
    }

    /// Write the JSON body, or nothing for an empty body.
    fn marshal_http_request_body(&self, w: &mut dyn Write) -> io::Result<()> {
        let _ = w;
        Ok(())
    }

    /// Decode a response. In `Table` mode the result is an object of pending
    /// entries taken from the headers; in `Json` mode it is the decoded body.
    fn unmarshal_http_response(
        &self,
        headers: &Headers,
        body: Option<&mut dyn Read>,
        mode: ResponseContentMode,
    ) -> Result<serde_json::Value, JobError>;
}

/// Decode a JSON body into a generic value, the common `Json`-mode case.
pub fn decode_json(body: Option<&mut dyn Read>) -> Result<serde_json::Value, JobError> {
    match body {
        Some(body) => serde_json::from_reader(body)
            .map_err(|e| JobError::RemoteDispatch(format!("unable to decode response body: {e}"))),
        None => Ok(serde_json::Value::Null),
    }
}

/// One daemon route: the server half of a [`RemoteExecutable`]. The extract
/// function rebuilds the typed request from path parameters, query string
/// and body.
pub struct RouteSpec {
    pub method: &'static str,
    pub path: &'static str,
    pub extract: fn(&RouteParams) -> Result<Request, JobError>,
}

/// The parts of an incoming HTTP request a route extractor may use.
pub struct RouteParams {
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RouteParams {
    pub fn param(&self, name: &str) -> Result<&str, JobError> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| JobError::InvalidRequest(format!("missing path parameter '{name}'")))
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn json_body<T: serde::de::DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| JobError::InvalidRequest(format!("unable to decode the request body: {e}")))
    }
}

type RemoteFactory = Box<dyn Fn(Request) -> Box<dyn RemoteExecutable> + Send + Sync>;

/// Kind-discriminated table of remote marshallings. A kind missing here is
/// not transportable.
#[derive(Default)]
pub struct RemoteRegistry {
    factories: HashMap<Kind, RemoteFactory>,
}

impl RemoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: Kind, factory: F)
    where
        F: Fn(Request) -> Box<dyn RemoteExecutable> + Send + Sync + 'static,
    {
        if self.factories.insert(kind, Box::new(factory)).is_some() {
            log::warn!(target: "http", "remote marshalling for '{kind}' registered twice; keeping the last");
        }
    }

    pub fn remote_for(&self, request: Request) -> Result<Box<dyn RemoteExecutable>, JobError> {
        match self.factories.get(&request.kind()) {
            Some(factory) => Ok(factory(request)),
            None => Err(JobError::NoJobForRequest),
        }
    }
}

/// Dispatches jobs to a peer agent over HTTP. One client per transport
/// instance; keep-alive is handled by the agent underneath. There are no
/// retries at this layer.
pub struct HttpTransport {
    agent: ureq::Agent,
    remotes: Arc<RemoteRegistry>,
}

impl HttpTransport {
    pub fn new(remotes: Arc<RemoteRegistry>) -> Self {
        Self::with_timeout(remotes, DEFAULT_DISPATCH_TIMEOUT)
    }

    /// Build a transport whose requests are bounded by `timeout`.
    pub fn with_timeout(remotes: Arc<RemoteRegistry>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent, remotes }
    }
}

impl Transport for HttpTransport {
    fn locator_for(&self, value: &str) -> Result<Locator, JobError> {
        value.parse::<HostLocator>().map(Locator::Remote)
    }

    fn remote_job_for(&self, locator: &Locator, request: Request) -> Result<Box<dyn Job>, JobError> {
        let host = match locator {
            Locator::Remote(host) => host,
            Locator::Local => {
                return Err(JobError::InvalidRequest(String::from(
                    "the local sentinel cannot be dispatched remotely",
                )))
            }
        };
        let executable = match self.remotes.remote_for(request) {
            Ok(executable) => executable,
            Err(JobError::NoJobForRequest) => return Err(JobError::NotTransportable),
            Err(e) => return Err(e),
        };
        Ok(Box::new(RemoteJob {
            agent: self.agent.clone(),
            base: url_for_host(host),
            executable,
        }))
    }
}

fn url_for_host(host: &HostLocator) -> String {
    let port = host.port.map(|p| p.number()).unwrap_or(DEFAULT_HTTP_PORT);
    format!("http://{}:{}", host.host, port)
}

struct RemoteJob {
    agent: ureq::Agent,
    base: String,
    executable: Box<dyn RemoteExecutable>,
}

impl Job for RemoteJob {
    fn execute(&self, resp: &mut dyn Response) {
        if let Err(e) = execute_remote(&self.agent, &self.base, self.executable.as_ref(), resp) {
            resp.failure(e);
        }
    }
}

/// Send one request and replay the negotiated response through the sink.
pub fn execute_remote(
    agent: &ureq::Agent,
    base: &str,
    job: &dyn RemoteExecutable,
    resp: &mut dyn Response,
) -> Result<(), JobError> {
    let id = job.request_id().unwrap_or_else(RequestId::generate);
    let mut query = Vec::new();
    job.marshal_url_query(&mut query);

    // The body is produced up front; a marshalling failure fails the dispatch
    // before any bytes reach the wire.
    let mut body = Vec::new();
    job.marshal_http_request_body(&mut body)
        .map_err(|e| JobError::RemoteDispatch(format!("unable to marshal the request: {e}")))?;

    let url = format!("{base}{}", job.http_path());
    let mut request = agent
        .request(job.http_method(), &url)
        .set("X-Request-Id", &id.to_string())
        .set("If-Match", &format!("api={API_VERSION}"))
        .set("Content-Type", "application/json");
    for (key, value) in &query {
        request = request.query(key, value);
    }

    log::debug!(target: "http", "{} {} ({id})", job.http_method(), url);
    let result = if body.is_empty() {
        request.call()
    } else {
        request.send_bytes(&body)
    };
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(e) => return Err(JobError::RemoteDispatch(e.to_string())),
    };
    decode_response(response, job, resp)
}

fn decode_response(
    response: ureq::Response,
    job: &dyn RemoteExecutable,
    resp: &mut dyn Response,
) -> Result<(), JobError> {
    let status = response.status();
    let is_json = response.content_type() == "application/json";
    let headers: Headers = response
        .headers_names()
        .into_iter()
        .map(|name| {
            let value = response.header(&name).unwrap_or_default().to_string();
            (name, value)
        })
        .collect();

    match status {
        202 => {
            if is_json {
                return Err(JobError::RemoteDispatch(String::from(
                    "decoding of streaming JSON has not been implemented",
                )));
            }
            let pending = job.unmarshal_http_response(&headers, None, ResponseContentMode::Table)?;
            replay_pending(resp, pending);
            let mut reader = response.into_reader();
            let w = resp.success_with_write(ResponseCode::Ok, false, false);
            io::copy(&mut reader, w)
                .map_err(|e| JobError::RemoteDispatch(format!("unable to stream response: {e}")))?;
        }
        204 => {
            let pending = job.unmarshal_http_response(&headers, None, ResponseContentMode::Table)?;
            replay_pending(resp, pending);
            resp.success(ResponseCode::Ok);
        }
        200..=299 => {
            if !is_json {
                return Err(JobError::RemoteDispatch(format!(
                    "response with {status} status code had content type {} (should be application/json)",
                    response.content_type()
                )));
            }
            let mut reader = response.into_reader();
            let data = job.unmarshal_http_response(
                &headers,
                Some(&mut reader),
                ResponseContentMode::Json,
            )?;
            resp.success_with_data(ResponseCode::Ok, data);
        }
        _ => {
            if is_json {
                #[derive(serde::Deserialize)]
                struct FailureBody {
                    message: String,
                }
                let failure: FailureBody = serde_json::from_reader(response.into_reader())
                    .map_err(|e| {
                        JobError::RemoteDispatch(format!("unable to decode response: {e}"))
                    })?;
                resp.failure(JobError::RemoteDispatch(failure.message));
            } else {
                let _ = io::copy(&mut response.into_reader(), &mut io::stderr());
                resp.failure(JobError::RemoteDispatch(String::from(
                    "Unable to decode response.",
                )));
            }
        }
    }
    Ok(())
}

fn replay_pending(resp: &mut dyn Response, pending: serde_json::Value) {
    if let serde_json::Value::Object(entries) = pending {
        for (key, value) in entries {
            resp.write_pending_success(&key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    use pretty_assertions::assert_eq;

    use super::super::Transport as _;
    use super::*;
    use crate::containers::http::register_remotes;
    use crate::containers::jobs::{LogRequest, StartedRequest};
    use crate::test::TestResponse;

    /// Serve one canned HTTP response, returning the request head that was
    /// received.
    fn canned_server(response: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") && stream.read(&mut byte).unwrap() == 1 {
                head.push(byte[0]);
            }
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8(head).unwrap()
        });
        (format!("127.0.0.1:{}", addr.port()), handle)
    }

    fn transport() -> HttpTransport {
        let mut remotes = RemoteRegistry::new();
        register_remotes(&mut remotes);
        HttpTransport::new(Arc::new(remotes))
    }

    fn dispatch(addr: &str, request: Request) -> TestResponse {
        let transport = transport();
        let locator = transport.locator_for(addr).unwrap();
        let job = transport.remote_job_for(&locator, request).unwrap();
        let mut resp = TestResponse::default();
        job.execute(&mut resp);
        resp
    }

    fn started(id: &str) -> Request {
        Request::Started(StartedRequest {
            id: id.parse().unwrap(),
        })
    }

    #[test]
    fn error_bodies_become_failures() {
        let (addr, server) = canned_server(
            "HTTP/1.1 500 Internal Server Error\r\n\
             Content-Type: application/json\r\n\
             Content-Length: 19\r\n\
             Connection: close\r\n\r\n\
             {\"message\":\"boom\"}\n",
        );

        let resp = dispatch(&addr, started("mydb"));
        server.join().unwrap();

        match resp.error {
            Some(JobError::RemoteDispatch(message)) => assert_eq!(message, "boom"),
            other => panic!("expected a remote dispatch failure, got {other:?}"),
        }
    }

    #[test]
    fn no_content_replays_pending_headers() {
        let (addr, server) = canned_server(
            "HTTP/1.1 204 No Content\r\n\
             X-PortMapping: 8080:41000\r\n\
             Connection: close\r\n\r\n",
        );

        let resp = dispatch(
            &addr,
            Request::Install(crate::containers::jobs::InstallRequest {
                id: "mydb".parse().unwrap(),
                image: String::from("img"),
                started: false,
                ports: crate::port::PortPairs::new(),
                environment: vec![],
            }),
        );
        let head = server.join().unwrap();

        assert!(head.starts_with("PUT /containers/mydb HTTP/1.1\r\n"));
        assert!(head.contains("If-Match: api=1\r\n"));
        assert!(head.contains("X-Request-Id: "));
        assert_eq!(resp.code, Some(ResponseCode::Ok));
        assert_eq!(
            resp.pending,
            vec![(
                String::from("PortMapping"),
                serde_json::Value::String(String::from("8080:41000"))
            )]
        );
    }

    #[test]
    fn accepted_responses_stream_the_body() {
        let (addr, server) = canned_server(
            "HTTP/1.1 202 Accepted\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 12\r\n\
             Connection: close\r\n\r\n\
             line one\nok\n",
        );

        let resp = dispatch(
            &addr,
            Request::Log(LogRequest {
                id: "mydb".parse().unwrap(),
                lines: Some(10),
                timeout_secs: None,
            }),
        );
        let head = server.join().unwrap();

        assert!(head.starts_with("GET /containers/mydb/log?lines=10 HTTP/1.1\r\n"));
        assert_eq!(resp.code, Some(ResponseCode::Ok));
        assert_eq!(resp.stream, b"line one\nok\n");
    }

    #[test]
    fn unexpected_content_types_are_rejected() {
        let (addr, server) = canned_server(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 2\r\n\
             Connection: close\r\n\r\n\
             ok",
        );

        let resp = dispatch(&addr, started("mydb"));
        server.join().unwrap();

        assert!(matches!(resp.error, Some(JobError::RemoteDispatch(_))));
    }
}
