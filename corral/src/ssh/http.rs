use std::io::{self, Read, Write};

use serde_json::Value;

use crate::job::{JobError, Kind, Request};
use crate::transport::http::{
    decode_json, Headers, RemoteExecutable, RemoteRegistry, ResponseContentMode, RouteParams,
    RouteSpec,
};

use super::CreateKeysRequest;

pub fn register_remotes(remotes: &mut RemoteRegistry) {
    remotes.register(Kind::CreateKeys, |req| match req {
        Request::CreateKeys(r) => Box::new(HttpCreateKeysRequest(r)),
        _ => unreachable!("registered for the create-keys kind"),
    });
}

pub fn routes() -> Vec<RouteSpec> {
    vec![RouteSpec {
        method: "PUT",
        path: "/keys",
        extract: extract_create_keys,
    }]
}

fn extract_create_keys(rp: &RouteParams) -> Result<Request, JobError> {
    Ok(Request::CreateKeys(rp.json_body()?))
}

pub struct HttpCreateKeysRequest(pub CreateKeysRequest);

impl RemoteExecutable for HttpCreateKeysRequest {
    fn http_method(&self) -> &'static str {
        "PUT"
    }

    fn http_path(&self) -> String {
        String::from("/keys")
    }

    fn marshal_http_request_body(&self, w: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(w, &self.0).map_err(io::Error::from)
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
