//! Logical method to endpoint path, per generation.
//!
//! Paths may contain `{field}` placeholders that are filled from the
//! translated parameters. Methods missing from a table fall back to the
//! dotted name joined with slashes under the generation's prefix.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::AdaptationFault;
use crate::types::{ApiGeneration, Payload};

/// How a method authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCategory {
    /// Access token from the credential provider.
    Bearer,
    /// App key, timestamp, nonce and HMAC-SHA256 signature.
    Signed,
}

/// Where the bearer token travels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPlacement {
    Query(String),
    Header(String),
}

#[derive(Debug, Clone)]
struct Endpoint {
    path: String,
    auth: AuthCategory,
}

#[derive(Debug, Clone)]
pub struct EndpointTable {
    generation: ApiGeneration,
    prefix: String,
    token_placement: TokenPlacement,
    entries: HashMap<String, Endpoint>,
}

impl EndpointTable {
    pub fn new(generation: ApiGeneration, prefix: &str, token_placement: TokenPlacement) -> Self {
        Self {
            generation,
            prefix: prefix.trim_end_matches('/').to_string(),
            token_placement,
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, method: &str, path: &str, auth: AuthCategory) -> Self {
        self.register(method, path, auth);
        self
    }

    pub fn register(&mut self, method: &str, path: &str, auth: AuthCategory) {
        self.entries.insert(
            method.to_string(),
            Endpoint {
                path: path.to_string(),
                auth,
            },
        );
    }

    /// Endpoints of the legacy (`errcode`) generation.
    pub fn legacy() -> Self {
        use AuthCategory::{Bearer, Signed};
        Self::new(ApiGeneration::Legacy, "", TokenPlacement::Query("access_token".to_string()))
            .with("user.get", "/user/get", Bearer)
            .with("user.create", "/user/create", Bearer)
            .with("user.update", "/user/update", Bearer)
            .with("user.delete", "/user/delete", Bearer)
            .with("user.list", "/user/listbypage", Bearer)
            .with("department.get", "/department/get", Bearer)
            .with("department.list", "/department/list", Bearer)
            .with("message.send", "/topapi/message/corpconversation/asyncsend_v2", Signed)
            .with("message.send_to_conversation", "/message/send_to_conversation", Signed)
            .with("media.upload", "/media/upload", Signed)
            .with("attendance.list", "/attendance/list", Bearer)
    }

    /// Endpoints of the current (`/v1.0`) generation.
    pub fn current() -> Self {
        use AuthCategory::{Bearer, Signed};
        Self::new(
            ApiGeneration::Current,
            "/v1.0",
            TokenPlacement::Header("x-acs-dingtalk-access-token".to_string()),
        )
        .with("user.get", "/v1.0/contact/users/{userId}", Bearer)
        .with("user.create", "/v1.0/contact/users", Bearer)
        .with("user.update", "/v1.0/contact/users/{userId}", Bearer)
        .with("user.delete", "/v1.0/contact/users/{userId}", Bearer)
        .with("user.list", "/v1.0/contact/users", Bearer)
        .with("department.get", "/v1.0/contact/departments/{deptId}", Bearer)
        .with("department.list", "/v1.0/contact/departments", Bearer)
        .with("message.send", "/v1.0/robot/oToMessages/batchSend", Signed)
        .with("message.recall", "/v1.0/robot/otoMessages/batchRecall", Bearer)
        .with("media.upload", "/v1.0/media/files", Signed)
        .with("attendance.list", "/v1.0/attendance/records", Bearer)
    }

    pub fn generation(&self) -> ApiGeneration {
        self.generation
    }

    pub fn token_placement(&self) -> &TokenPlacement {
        &self.token_placement
    }

    /// Path template for `method`; unmapped `a.b_c` becomes `{prefix}/a/b_c`.
    pub fn path_for(&self, method: &str) -> String {
        match self.entries.get(method) {
            Some(endpoint) => endpoint.path.clone(),
            None => format!("{}/{}", self.prefix, method.split('.').collect::<Vec<_>>().join("/")),
        }
    }

    /// Methods default to the bearer category.
    pub fn auth_category(&self, method: &str) -> AuthCategory {
        self.entries
            .get(method)
            .map_or(AuthCategory::Bearer, |endpoint| endpoint.auth)
    }
}

/// Substitute `{field}` placeholders with values taken out of `params`.
pub fn fill_path(template: &str, params: &mut Payload) -> Result<String, AdaptationFault> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + close];
        let value = match params.remove(name) {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(AdaptationFault::MissingPathParameter(name.to_string())),
        };
        out.push_str(&rest[..open]);
        out.push_str(&path_segment(&value));
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Percent-encode `raw` so it stays inside one path segment.
fn path_segment(raw: &str) -> String {
    match raw {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => url::form_urlencoded::byte_serialize(raw.as_bytes())
            .map(|chunk| if chunk == "+" { "%20" } else { chunk })
            .collect(),
    }
}
