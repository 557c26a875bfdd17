use std::io::{self, Read, Write};

use serde_json::Value;

use crate::id::Identifier;
use crate::job::{JobError, Kind, Request};
use crate::port::PortPairs;
use crate::transport::http::{
    decode_json, header_value, Headers, RemoteExecutable, RemoteRegistry, ResponseContentMode,
    RouteParams, RouteSpec,
};

use super::jobs::{
    BuildImageRequest, ContentRequest, DeleteRequest, InstallRequest, LinkRequest, LogRequest,
    StartedRequest, StoppedRequest,
};

/// Header carrying port mappings on the wire.
pub const PORT_MAPPING_HEADER: &str = "X-PortMapping";

/// Pending key the mappings are replayed under.
pub const PORT_MAPPING_KEY: &str = "PortMapping";

/// Register the remote marshallings for every transportable container kind.
/// Purge has none and stays local-only.
pub fn register_remotes(remotes: &mut RemoteRegistry) {
    remotes.register(Kind::Install, |req| match req {
        Request::Install(r) => Box::new(HttpInstallRequest(r)),
        _ => unreachable!("registered for the install kind"),
    });
    remotes.register(Kind::Started, |req| match req {
        Request::Started(r) => Box::new(HttpStartedRequest(r)),
        _ => unreachable!("registered for the started kind"),
    });
    remotes.register(Kind::Stopped, |req| match req {
        Request::Stopped(r) => Box::new(HttpStoppedRequest(r)),
        _ => unreachable!("registered for the stopped kind"),
    });
    remotes.register(Kind::Delete, |req| match req {
        Request::Delete(r) => Box::new(HttpDeleteRequest(r)),
        _ => unreachable!("registered for the delete kind"),
    });
    remotes.register(Kind::Link, |req| match req {
        Request::Link(r) => Box::new(HttpLinkRequest(r)),
        _ => unreachable!("registered for the link kind"),
    });
    remotes.register(Kind::Log, |req| match req {
        Request::Log(r) => Box::new(HttpLogRequest(r)),
        _ => unreachable!("registered for the log kind"),
    });
    remotes.register(Kind::BuildImage, |req| match req {
        Request::BuildImage(r) => Box::new(HttpBuildImageRequest(r)),
        _ => unreachable!("registered for the build-image kind"),
    });
    remotes.register(Kind::Content, |req| match req {
        Request::Content(r) => Box::new(HttpContentRequest(r)),
        _ => unreachable!("registered for the content kind"),
    });
}

/// The daemon routes mirroring the client marshallings above.
pub fn routes() -> Vec<RouteSpec> {
    vec![
        RouteSpec {
            method: "PUT",
            path: "/containers/:id",
            extract: extract_install,
        },
        RouteSpec {
            method: "PUT",
            path: "/containers/:id/started",
            extract: extract_started,
        },
        RouteSpec {
            method: "PUT",
            path: "/containers/:id/stopped",
            extract: extract_stopped,
        },
        RouteSpec {
            method: "DELETE",
            path: "/containers/:id",
            extract: extract_delete,
        },
        RouteSpec {
            method: "GET",
            path: "/containers/:id/log",
            extract: extract_log,
        },
        RouteSpec {
            method: "PUT",
            path: "/containers/links",
            extract: extract_links,
        },
        RouteSpec {
            method: "POST",
            path: "/build-image",
            extract: extract_build,
        },
        RouteSpec {
            method: "GET",
            path: "/content",
            extract: extract_content,
        },
    ]
}

fn path_identifier(rp: &RouteParams) -> Result<Identifier, JobError> {
    Identifier::new(rp.param("id")?).map_err(|e| JobError::InvalidRequest(e.to_string()))
}

fn extract_install(rp: &RouteParams) -> Result<Request, JobError> {
    let id = path_identifier(rp)?;
    let mut request: InstallRequest = rp.json_body()?;
    request.id = id;
    Ok(Request::Install(request))
}

fn extract_started(rp: &RouteParams) -> Result<Request, JobError> {
    Ok(Request::Started(StartedRequest {
        id: path_identifier(rp)?,
    }))
}

fn extract_stopped(rp: &RouteParams) -> Result<Request, JobError> {
    Ok(Request::Stopped(StoppedRequest {
        id: path_identifier(rp)?,
    }))
}

fn extract_delete(rp: &RouteParams) -> Result<Request, JobError> {
    Ok(Request::Delete(DeleteRequest {
        id: path_identifier(rp)?,
    }))
}

fn extract_log(rp: &RouteParams) -> Result<Request, JobError> {
    let invalid = |name: &str| JobError::InvalidRequest(format!("'{name}' must be a number"));
    let lines = match rp.query("lines") {
        Some(value) => Some(value.parse().map_err(|_| invalid("lines"))?),
        None => None,
    };
    let timeout_secs = match rp.query("timeout") {
        Some(value) => Some(value.parse().map_err(|_| invalid("timeout"))?),
        None => None,
    };
    Ok(Request::Log(LogRequest {
        id: path_identifier(rp)?,
        lines,
        timeout_secs,
    }))
}

fn extract_links(rp: &RouteParams) -> Result<Request, JobError> {
    let links: Vec<super::jobs::ContainerLink> = rp.json_body()?;
    Ok(Request::Link(LinkRequest { links }))
}

fn extract_build(rp: &RouteParams) -> Result<Request, JobError> {
    Ok(Request::BuildImage(rp.json_body()?))
}

fn extract_content(rp: &RouteParams) -> Result<Request, JobError> {
    let content_type = rp
        .query("type")
        .ok_or_else(|| JobError::InvalidRequest(String::from("a content type must be specified")))?;
    let locator = rp
        .query("locator")
        .ok_or_else(|| JobError::InvalidRequest(String::from("a locator must be specified")))?;
    Ok(Request::Content(ContentRequest {
        content_type: content_type.to_string(),
        locator: locator.to_string(),
    }))
}

fn marshal_json(value: &impl serde::Serialize, w: &mut dyn Write) -> io::Result<()> {
    serde_json::to_writer(w, value).map_err(io::Error::from)
}

/// Table-mode decode for responses that carry nothing in their headers.
fn no_pending(
    _headers: &Headers,
    body: Option<&mut dyn Read>,
    mode: ResponseContentMode,
) -> Result<Value, JobError> {
    match mode {
        ResponseContentMode::Table => Ok(Value::Object(serde_json::Map::new())),
        ResponseContentMode::Json => decode_json(body),
    }
}

pub struct HttpInstallRequest(pub InstallRequest);

impl RemoteExecutable for HttpInstallRequest {
    fn http_method(&self) -> &'static str {
        "PUT"
    }

    fn http_path(&self) -> String {
        format!("/containers/{}", self.0.id)
    }

    fn marshal_http_request_body(&self, w: &mut dyn Write) -> io::Result<()> {
        marshal_json(&self.0, w)
    }

    fn unmarshal_http_response(
        &self,
        headers: &Headers,
        body: Option<&mut dyn Read>,
        mode: ResponseContentMode,
    ) -> Result<Value, JobError> {
        match mode {
            ResponseContentMode::Table => {
                let mut pending = serde_json::Map::new();
                if let Some(header) = header_value(headers, PORT_MAPPING_HEADER) {
                    let pairs = PortPairs::from_header(header).map_err(|e| {
                        JobError::RemoteDispatch(format!("invalid port mapping header: {e}"))
                    })?;
                    pending.insert(
                        PORT_MAPPING_KEY.to_string(),
                        Value::String(pairs.to_header()),
                    );
                }
                Ok(Value::Object(pending))
            }
            ResponseContentMode::Json => decode_json(body),
        }
    }
}

pub struct HttpStartedRequest(pub StartedRequest);

impl RemoteExecutable for HttpStartedRequest {
    fn http_method(&self) -> &'static str {
        "PUT"
    }

    fn http_path(&self) -> String {
        format!("/containers/{}/started", self.0.id)
    }

    fn unmarshal_http_response(
        &self,
        headers: &Headers,
        body: Option<&mut dyn Read>,
        mode: ResponseContentMode,
    ) -> Result<Value, JobError> {
        no_pending(headers, body, mode)
    }
}

pub struct HttpStoppedRequest(pub StoppedRequest);

impl RemoteExecutable for HttpStoppedRequest {
    fn http_method(&self) -> &'static str {
        "PUT"
    }

    fn http_path(&self) -> String {
        format!("/containers/{}/stopped", self.0.id)
    }

    fn unmarshal_http_response(
        &self,
        headers: &Headers,
        body: Option<&mut dyn Read>,
        mode: ResponseContentMode,
    ) -> Result<Value, JobError> {
        no_pending(headers, body, mode)
    }
}

pub struct HttpDeleteRequest(pub DeleteRequest);

impl RemoteExecutable for HttpDeleteRequest {
    fn http_method(&self) -> &'static str {
        "DELETE"
    }

    fn http_path(&self) -> String {
        format!("/containers/{}", self.0.id)
    }

    fn unmarshal_http_response(
        &self,
        headers: &Headers,
        body: Option<&mut dyn Read>,
        mode: ResponseContentMode,
    ) -> Result<Value, JobError> {
        no_pending(headers, body, mode)
    }
}

pub struct HttpLinkRequest(pub LinkRequest);

impl RemoteExecutable for HttpLinkRequest {
    fn http_method(&self) -> &'static str {
        "PUT"
    }

    fn http_path(&self) -> String {
        String::from("/containers/links")
    }

    fn marshal_http_request_body(&self, w: &mut dyn Write) -> io::Result<()> {
        marshal_json(&self.0.links, w)
    }

    fn unmarshal_http_response(
        &self,
        headers: &Headers,
        body: Option<&mut dyn Read>,
        mode: ResponseContentMode,
    ) -> Result<Value, JobError> {
        no_pending(headers, body, mode)
    }
}

pub struct HttpLogRequest(pub LogRequest);

impl RemoteExecutable for HttpLogRequest {
    fn http_method(&self) -> &'static str {
        "GET"
    }

    fn http_path(&self) -> String {
        format!("/containers/{}/log", self.0.id)
    }

    fn marshal_url_query(&self, query: &mut Vec<(&'static str, String)>) {
        if let Some(lines) = self.0.lines {
            query.push(("lines", lines.to_string()));
        }
        if let Some(timeout) = self.0.timeout_secs {
            query.push(("timeout", timeout.to_string()));
        }
    }

    fn unmarshal_http_response(
        &self,
        headers: &Headers,
        body: Option<&mut dyn Read>,
        mode: ResponseContentMode,
    ) -> Result<Value, JobError> {
        no_pending(headers, body, mode)
    }
}

pub struct HttpBuildImageRequest(pub BuildImageRequest);

impl RemoteExecutable for HttpBuildImageRequest {
    fn http_method(&self) -> &'static str {
        "POST"
    }

    fn http_path(&self) -> String {
        String::from("/build-image")
    }

    fn marshal_http_request_body(&self, w: &mut dyn Write) -> io::Result<()> {
        marshal_json(&self.0, w)
    }

    fn unmarshal_http_response(
        &self,
        headers: &Headers,
        body: Option<&mut dyn Read>,
        mode: ResponseContentMode,
    ) -> Result<Value, JobError> {
        no_pending(headers, body, mode)
    }
}

pub struct HttpContentRequest(pub ContentRequest);

impl RemoteExecutable for HttpContentRequest {
    fn http_method(&self) -> &'static str {
        "GET"
    }

    fn http_path(&self) -> String {
        String::from("/content")
    }

    fn marshal_url_query(&self, query: &mut Vec<(&'static str, String)>) {
        query.push(("type", self.0.content_type.clone()));
        query.push(("locator", self.0.locator.clone()));
    }

    fn unmarshal_http_response(
        &self,
        headers: &Headers,
        body: Option<&mut dyn Read>,
        mode: ResponseContentMode,
    ) -> Result<Value, JobError> {
        no_pending(headers, body, mode)
    }
}
