use std::io::{self, Read, Write};

use serde_json::Value;

use crate::id::Identifier;
use crate::job::{JobError, Kind, Request};
use crate::transport::http::{
    decode_json, Headers, RemoteExecutable, RemoteRegistry, ResponseContentMode, RouteParams,
    RouteSpec,
};

use super::CreateRepositoryRequest;

pub fn register_remotes(remotes: &mut RemoteRegistry) {
    remotes.register(Kind::CreateRepository, |req| match req {
        Request::CreateRepository(r) => Box::new(HttpCreateRepositoryRequest(r)),
        _ => unreachable!("registered for the create-repository kind"),
    });
}

pub fn routes() -> Vec<RouteSpec> {
    vec![RouteSpec {
        method: "PUT",
        path: "/repositories/:id",
        extract: extract_create_repository,
    }]
}

#[derive(Default, serde::Deserialize)]
struct CreateRepositoryBody {
    #[serde(default)]
    clone_url: Option<String>,
}

fn extract_create_repository(rp: &RouteParams) -> Result<Request, JobError> {
    let id = Identifier::new(rp.param("id")?).map_err(|e| JobError::InvalidRequest(e.to_string()))?;
    let body: CreateRepositoryBody = if rp.body.is_empty() {
        CreateRepositoryBody::default()
    } else {
        rp.json_body()?
    };
    Ok(Request::CreateRepository(CreateRepositoryRequest {
        id,
        clone_url: body.clone_url,
    }))
}

pub struct HttpCreateRepositoryRequest(pub CreateRepositoryRequest);

impl RemoteExecutable for HttpCreateRepositoryRequest {
    fn http_method(&self) -> &'static str {
        "PUT"
    }

    fn http_path(&self) -> String {
        format!("/repositories/{}", self.0.id)
    }

    fn marshal_http_request_body(&self, w: &mut dyn Write) -> io::Result<()> {
        let body = serde_json::json!({ "clone_url": self.0.clone_url });
        serde_json::to_writer(w, &body).map_err(io::Error::from)
    }

    fn unmarshal_http_response(
        &self,
        _headers: &Headers,
        body: Option<&mut dyn Read>,
        mode: ResponseContentMode,
    ) -> Result<Value, JobError> {
        match mode {
            ResponseContentMode::Table => Ok(Value::Object(serde_json::Map::new())),
            ResponseContentMode::Json => decode_json(body),
        }
    }
}
