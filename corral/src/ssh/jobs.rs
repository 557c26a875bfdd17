use std::sync::Arc;

use crate::job::{ItemFailure, Job, JobError, Response, ResponseCode};

use super::{Handlers, KeyLocator};

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeyData {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeyPermission {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub with: serde_json::Value,
}

/// Upload public keys and grant each of them every listed permission.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CreateKeysRequest {
    pub keys: Vec<KeyData>,
    pub permissions: Vec<KeyPermission>,
}

pub struct CreateKeysJob {
    pub request: CreateKeysRequest,
    pub handlers: Arc<Handlers>,
}

impl CreateKeysJob {
    fn create_key(&self, key: &KeyData) -> Result<KeyLocator, JobError> {
        let handler = self.handlers.key_type_for(&key.kind).ok_or_else(|| {
            JobError::InvalidRequest(format!("the key type '{}' is not recognized", key.kind))
        })?;
        handler.create_key(&key.value)
    }

    fn create_permission(
        &self,
        permission: &KeyPermission,
        locator: &KeyLocator,
    ) -> Result<(), JobError> {
        let handler = self.handlers.permission_for(&permission.kind).ok_or_else(|| {
            JobError::InvalidRequest(format!(
                "the permission type '{}' is not recognized",
                permission.kind
            ))
        })?;
        handler.create_permission(locator, &permission.with)
    }
}

impl Job for CreateKeysJob {
    fn check(&self) -> Result<(), JobError> {
        let request = &self.request;
        if request.keys.is_empty() {
            return Err(JobError::InvalidRequest(String::from(
                "one or more keys must be specified",
            )));
        }
        if request.permissions.is_empty() {
            return Err(JobError::InvalidRequest(String::from(
                "at least one permission must be specified",
            )));
        }
        for key in &request.keys {
            if self.handlers.key_type_for(&key.kind).is_none() {
                return Err(JobError::InvalidRequest(format!(
                    "the key type '{}' is not recognized",
                    key.kind
                )));
            }
            if key.value.is_null() {
                return Err(JobError::InvalidRequest(String::from(
                    "a key value must be specified",
                )));
            }
        }
        for permission in &request.permissions {
            if self.handlers.permission_for(&permission.kind).is_none() {
                return Err(JobError::InvalidRequest(format!(
                    "the permission type '{}' is not recognized",
                    permission.kind
                )));
            }
        }
        Ok(())
    }

    /// Keys are committed one at a time; failures are collected per index
    /// and the successful keys stay committed.
    fn execute(&self, resp: &mut dyn Response) {
        let mut failures: Vec<ItemFailure> = Vec::new();
        for (index, key) in self.request.keys.iter().enumerate() {
            let locator = match self.create_key(key) {
                Ok(locator) => locator,
                Err(e) => {
                    failures.push(ItemFailure {
                        index,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            for permission in &self.request.permissions {
                if let Err(e) = self.create_permission(permission, &locator) {
                    failures.push(ItemFailure {
                        index,
                        message: e.to_string(),
                    });
                    continue;
                }
            }
        }

        if failures.is_empty() {
            resp.success(ResponseCode::Ok)
        } else {
            for failure in &failures {
                log::warn!(target: "ssh", "key {} failed: {}", failure.index, failure.message);
            }
            resp.failure(JobError::Structured {
                message: String::from("not all keys were completed"),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::job::Request;
    use crate::ssh::{KeyTypeHandler, PermissionHandler};
    use crate::test::TestResponse;

    struct StubKeyType;
    impl KeyTypeHandler for StubKeyType {
        fn create_key(&self, value: &serde_json::Value) -> Result<KeyLocator, JobError> {
            match value.as_str() {
                Some("bad") => Err(JobError::InvalidRequest(String::from(
                    "unable to parse the provided key",
                ))),
                _ => Ok(KeyLocator {
                    path: "/keys/stub".into(),
                    name: String::from("stub"),
                }),
            }
        }
    }

    struct StubPermission;
    impl PermissionHandler for StubPermission {
        fn create_permission(
            &self,
            _locator: &KeyLocator,
            _with: &serde_json::Value,
        ) -> Result<(), JobError> {
            Ok(())
        }
    }

    fn job(keys: Vec<KeyData>, permissions: Vec<KeyPermission>) -> CreateKeysJob {
        let mut handlers = Handlers::new();
        handlers.add_key_type("stub", StubKeyType);
        handlers.add_permission("stub", StubPermission);
        CreateKeysJob {
            request: CreateKeysRequest { keys, permissions },
            handlers: Arc::new(handlers),
        }
    }

    fn key(value: &str) -> KeyData {
        KeyData {
            kind: String::from("stub"),
            value: value.into(),
        }
    }

    fn permission() -> KeyPermission {
        KeyPermission {
            kind: String::from("stub"),
            with: serde_json::Value::Null,
        }
    }

    #[test]
    fn check_requires_keys_and_permissions() {
        assert!(job(vec![], vec![permission()]).check().is_err());
        assert!(job(vec![key("ok")], vec![]).check().is_err());
        assert!(job(vec![key("ok")], vec![permission()]).check().is_ok());

        let unknown = job(
            vec![KeyData {
                kind: String::from("pgp"),
                value: "ok".into(),
            }],
            vec![permission()],
        );
        assert!(unknown.check().is_err());
    }

    #[test]
    fn failures_are_reported_per_index() {
        let job = job(vec![key("ok"), key("bad"), key("ok")], vec![permission()]);
        let mut resp = TestResponse::default();

        job.execute(&mut resp);

        match resp.error {
            Some(JobError::Structured { message, failures }) => {
                assert_eq!(message, "not all keys were completed");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
            }
            other => panic!("expected a structured failure, got {other:?}"),
        }
    }

    #[test]
    fn all_keys_committed_is_a_success() {
        let job = job(vec![key("ok")], vec![permission()]);
        let mut resp = TestResponse::default();

        job.execute(&mut resp);

        assert_eq!(resp.code, Some(ResponseCode::Ok));
        assert!(resp.error.is_none());
    }

    #[test]
    fn requests_round_trip_as_json() {
        let request = CreateKeysRequest {
            keys: vec![KeyData {
                kind: String::from("authorized_keys"),
                value: "ssh-ed25519 AAAA".into(),
            }],
            permissions: vec![KeyPermission {
                kind: String::new(),
                with: serde_json::json!("mydb"),
            }],
        };
        let encoded = serde_json::to_string(&Request::CreateKeys(request.clone())).unwrap();
        let decoded: Request = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, Request::CreateKeys(request));
    }
}
