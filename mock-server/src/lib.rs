//! In-memory impersonation of both vendor API generations.
//!
//! Legacy endpoints answer HTTP 200 with an `errcode` body, authenticate via
//! an `access_token` query parameter, and accept HMAC-signed query fields
//! on message sending. Current endpoints live under `/v1.0`, take the token
//! in the `x-acs-dingtalk-access-token` header and report failures through
//! HTTP status codes. `GET /` answers the connectivity probe.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

pub const MOCK_APP_KEY: &str = "mock-app-key";
pub const MOCK_APP_SECRET: &str = "mock-app-secret";
pub const MOCK_ACCESS_TOKEN: &str = "mock-access-token";

/// Seconds advertised in `Retry-After` by the throttled endpoint.
pub const RETRY_AFTER_SECS: u64 = 2;

const TOKEN_HEADER: &str = "x-acs-dingtalk-access-token";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub userid: String,
    pub unionid: String,
    pub name: String,
    pub department: Vec<i64>,
    pub is_admin: bool,
    pub jobnumber: String,
    pub hired_date: i64,
}

impl User {
    fn legacy_json(&self) -> Value {
        json!({
            "errcode": 0,
            "errmsg": "ok",
            "userid": self.userid,
            "unionid": self.unionid,
            "name": self.name,
            "department": self.department,
            "isAdmin": self.is_admin,
            "jobnumber": self.jobnumber,
            "hiredDate": self.hired_date,
        })
    }

    fn current_json(&self) -> Value {
        json!({
            "userId": self.userid,
            "unionId": self.unionid,
            "name": self.name,
            "deptIdList": self.department,
            "admin": self.is_admin,
            "jobNumber": self.jobnumber,
            "hiredDate": self.hired_date,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Department {
    pub id: i64,
    pub name: String,
    pub parentid: i64,
}

/// A message accepted by either generation's send endpoint.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SentMessage {
    pub task_id: i64,
    pub recipients: Vec<String>,
    pub msg: Value,
}

#[derive(Debug, Default)]
pub struct Directory {
    pub users: BTreeMap<String, User>,
    pub departments: Vec<Department>,
    pub messages: Vec<SentMessage>,
}

impl Directory {
    pub fn seeded() -> Self {
        let users = [
            User {
                userid: "u1".to_string(),
                unionid: "union-u1".to_string(),
                name: "Zhang San".to_string(),
                department: vec![1, 2],
                is_admin: true,
                jobnumber: "007".to_string(),
                hired_date: 1_597_573_616_828,
            },
            User {
                userid: "u2".to_string(),
                unionid: "union-u2".to_string(),
                name: "Li Si".to_string(),
                department: vec![2],
                is_admin: false,
                jobnumber: "1024".to_string(),
                hired_date: 1_609_459_200_000,
            },
        ];
        Self {
            users: users.into_iter().map(|u| (u.userid.clone(), u)).collect(),
            departments: vec![
                Department {
                    id: 1,
                    name: "Headquarters".to_string(),
                    parentid: 0,
                },
                Department {
                    id: 2,
                    name: "Engineering".to_string(),
                    parentid: 1,
                },
            ],
            messages: Vec::new(),
        }
    }

    fn record_message(&mut self, recipients: Vec<String>, msg: Value) -> i64 {
        let task_id = 1000 + self.messages.len() as i64;
        self.messages.push(SentMessage {
            task_id,
            recipients,
            msg,
        });
        task_id
    }
}

pub type Db = Arc<RwLock<Directory>>;

pub fn app() -> Router {
    app_with(Arc::new(RwLock::new(Directory::seeded())))
}

/// Router over caller-owned state, so tests can inspect what was recorded.
pub fn app_with(db: Db) -> Router {
    Router::new()
        .route("/", get(probe))
        .route("/user/get", get(legacy_get_user))
        .route("/user/create", post(legacy_create_user))
        .route("/department/list", get(legacy_list_departments))
        .route("/topapi/message/corpconversation/asyncsend_v2", post(legacy_send_message))
        .route("/attendance/list", get(legacy_attendance))
        .route("/v1.0/contact/users/{user_id}", get(current_get_user))
        .route("/v1.0/contact/departments", get(current_list_departments))
        .route("/v1.0/robot/oToMessages/batchSend", post(current_send_message))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Base64 HMAC-SHA256 over `timestamp + "\n" + nonce`.
pub fn signature(secret: &str, timestamp: &str, nonce: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(format!("{timestamp}\n{nonce}").as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

type Params = Query<HashMap<String, String>>;

fn errcode(code: i64, errmsg: &str) -> Response {
    Json(json!({"errcode": code, "errmsg": errmsg})).into_response()
}

fn current_error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({"code": code, "message": message, "requestid": Uuid::new_v4()}))).into_response()
}

fn legacy_token_ok(params: &HashMap<String, String>) -> bool {
    params.get("access_token").map(String::as_str) == Some(MOCK_ACCESS_TOKEN)
}

fn current_token_ok(headers: &HeaderMap) -> bool {
    headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) == Some(MOCK_ACCESS_TOKEN)
}

fn signature_ok(params: &HashMap<String, String>) -> bool {
    let field = |name: &str| params.get(name).map(String::as_str).unwrap_or_default();
    field("appkey") == MOCK_APP_KEY
        && !field("timestamp").is_empty()
        && !field("nonce").is_empty()
        && field("signature") == signature(MOCK_APP_SECRET, field("timestamp"), field("nonce"))
}

async fn probe() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn legacy_get_user(State(db): State<Db>, Query(params): Params) -> Response {
    if !legacy_token_ok(&params) {
        warn!("legacy user.get with bad token");
        return errcode(40014, "invalid access_token");
    }
    let Some(userid) = params.get("userid") else {
        return errcode(40035, "missing parameter userid");
    };
    debug!(%userid, lang = ?params.get("lang"), "legacy user.get");
    match db.read().await.users.get(userid) {
        Some(user) => Json(user.legacy_json()).into_response(),
        None => errcode(60121, "no such user"),
    }
}

#[derive(Deserialize)]
struct LegacyCreateUser {
    userid: String,
    name: String,
    #[serde(default)]
    department: Vec<i64>,
    #[serde(default)]
    jobnumber: String,
}

async fn legacy_create_user(State(db): State<Db>, Query(params): Params, Json(input): Json<LegacyCreateUser>) -> Response {
    if !legacy_token_ok(&params) {
        return errcode(40014, "invalid access_token");
    }
    let mut directory = db.write().await;
    if directory.users.contains_key(&input.userid) {
        return errcode(60102, "userid already exists");
    }
    let user = User {
        unionid: format!("union-{}", input.userid),
        userid: input.userid.clone(),
        name: input.name,
        department: input.department,
        is_admin: false,
        jobnumber: input.jobnumber,
        hired_date: 0,
    };
    directory.users.insert(user.userid.clone(), user);
    Json(json!({"errcode": 0, "errmsg": "created", "userid": input.userid})).into_response()
}

async fn legacy_list_departments(State(db): State<Db>, Query(params): Params) -> Response {
    if !legacy_token_ok(&params) {
        return errcode(40014, "invalid access_token");
    }
    let directory = db.read().await;
    Json(json!({"errcode": 0, "errmsg": "ok", "department": directory.departments})).into_response()
}

async fn legacy_send_message(State(db): State<Db>, Query(params): Params, Json(body): Json<Value>) -> Response {
    if !signature_ok(&params) {
        warn!("legacy message.send with bad signature");
        return errcode(40001, "invalid signature");
    }
    // Legacy wants a comma-joined string, not a list.
    let Some(list) = body.get("userid_list").and_then(Value::as_str) else {
        return errcode(40035, "userid_list must be a comma separated string");
    };
    let recipients = list.split(',').map(str::to_string).collect();
    let msg = body.get("msg").cloned().unwrap_or(Value::Null);
    let task_id = db.write().await.record_message(recipients, msg);
    Json(json!({"errcode": 0, "errmsg": "ok", "task_id": task_id, "request_id": Uuid::new_v4()})).into_response()
}

/// Always throttled.
async fn legacy_attendance(Query(params): Params) -> Response {
    if !legacy_token_ok(&params) {
        return errcode(40014, "invalid access_token");
    }
    (
        [("retry-after", RETRY_AFTER_SECS.to_string())],
        Json(json!({"errcode": 90018, "errmsg": "too many requests"})),
    )
        .into_response()
}

async fn current_get_user(State(db): State<Db>, Path(user_id): Path<String>, headers: HeaderMap) -> Response {
    if !current_token_ok(&headers) {
        return current_error(StatusCode::UNAUTHORIZED, "InvalidAuthentication", "access token is invalid");
    }
    match db.read().await.users.get(&user_id) {
        Some(user) => Json(user.current_json()).into_response(),
        None => current_error(StatusCode::NOT_FOUND, "user.not.found", "no such user"),
    }
}

async fn current_list_departments(State(db): State<Db>, headers: HeaderMap) -> Response {
    if !current_token_ok(&headers) {
        return current_error(StatusCode::UNAUTHORIZED, "InvalidAuthentication", "access token is invalid");
    }
    let depts: Vec<Value> = db
        .read()
        .await
        .departments
        .iter()
        .map(|d| json!({"deptId": d.id, "name": d.name, "parentId": d.parentid}))
        .collect();
    Json(json!({"depts": depts})).into_response()
}

async fn current_send_message(State(db): State<Db>, Query(params): Params, Json(body): Json<Value>) -> Response {
    if !signature_ok(&params) {
        return current_error(StatusCode::UNAUTHORIZED, "InvalidSignature", "signature mismatch");
    }
    let Some(list) = body.get("userIdList").and_then(Value::as_array) else {
        return current_error(StatusCode::BAD_REQUEST, "InvalidParameter", "userIdList must be a list");
    };
    let recipients = list.iter().filter_map(Value::as_str).map(str::to_string).collect();
    let msg = body.get("msg").cloned().unwrap_or(Value::Null);
    let task_id = db.write().await.record_message(recipients, msg);
    Json(json!({"taskId": task_id})).into_response()
}
