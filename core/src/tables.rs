//! Static translation tables: field renames, field types, defaults and the
//! compatibility matrix.
//!
//! # Design
//! Renames are stored per `(from, to, method, direction)` and both
//! generation orders are written out explicitly. A single legacy name can
//! mean different things in different methods (`department` is a list of
//! ids in `user.get` and a list of departments in `department.list`), so
//! the inverse is never derived on the fly.
//!
//! The logical (generation-agnostic) shape used by callers is the current
//! generation's shape.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Value};

use crate::convert::ValueType;
use crate::types::{ApiGeneration, Direction, Payload};

use crate::types::ApiGeneration::{Current, Legacy};
use crate::types::Direction::{Request, Response};

type MappingKey = (ApiGeneration, ApiGeneration, String, Direction);
type GenerationKey = (ApiGeneration, String, Direction);

#[derive(Debug, Clone, Default)]
pub struct SchemaTables {
    mappings: HashMap<MappingKey, Vec<(String, String)>>,
    defaults: HashMap<GenerationKey, Payload>,
    types: HashMap<GenerationKey, BTreeMap<String, ValueType>>,
    compatibility: HashMap<(ApiGeneration, ApiGeneration, String), bool>,
}

impl SchemaTables {
    pub fn empty() -> Self {
        Self::default()
    }

    /// One rename table for one generation order and direction.
    pub fn add_mapping(
        &mut self,
        from: ApiGeneration,
        to: ApiGeneration,
        method: &str,
        direction: Direction,
        renames: &[(&str, &str)],
    ) -> &mut Self {
        self.mappings
            .entry((from, to, method.to_string(), direction))
            .or_default()
            .extend(renames.iter().map(|(s, d)| (s.to_string(), d.to_string())));
        self
    }

    /// Register `(legacy, current)` pairs for `direction` in both generation
    /// orders.
    pub fn add_renames(&mut self, method: &str, direction: Direction, pairs: &[(&str, &str)]) -> &mut Self {
        let inverse: Vec<(&str, &str)> = pairs.iter().map(|(l, c)| (*c, *l)).collect();
        self.add_mapping(Legacy, Current, method, direction, pairs);
        self.add_mapping(Current, Legacy, method, direction, &inverse);
        self
    }

    pub fn set_default(
        &mut self,
        generation: ApiGeneration,
        method: &str,
        direction: Direction,
        field: &str,
        value: Value,
    ) -> &mut Self {
        self.defaults
            .entry((generation, method.to_string(), direction))
            .or_default()
            .insert(field.to_string(), value);
        self
    }

    pub fn set_field_type(
        &mut self,
        generation: ApiGeneration,
        method: &str,
        direction: Direction,
        field: &str,
        value_type: ValueType,
    ) -> &mut Self {
        self.types
            .entry((generation, method.to_string(), direction))
            .or_default()
            .insert(field.to_string(), value_type);
        self
    }

    pub fn set_compatible(&mut self, from: ApiGeneration, to: ApiGeneration, method: &str, allowed: bool) -> &mut Self {
        self.compatibility.insert((from, to, method.to_string()), allowed);
        self
    }

    pub fn mapping(&self, from: ApiGeneration, to: ApiGeneration, method: &str, direction: Direction) -> &[(String, String)] {
        self.mappings
            .get(&(from, to, method.to_string(), direction))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn defaults(&self, generation: ApiGeneration, method: &str, direction: Direction) -> Option<&Payload> {
        self.defaults.get(&(generation, method.to_string(), direction))
    }

    pub fn field_types(
        &self,
        generation: ApiGeneration,
        method: &str,
        direction: Direction,
    ) -> Option<&BTreeMap<String, ValueType>> {
        self.types.get(&(generation, method.to_string(), direction))
    }

    /// Missing entries are bridgeable; only an explicit `false` forbids.
    pub fn is_compatible(&self, from: ApiGeneration, to: ApiGeneration, method: &str) -> bool {
        self.compatibility
            .get(&(from, to, method.to_string()))
            .copied()
            .unwrap_or(true)
    }

    /// The tables for the vendor's contact, messaging, attendance and media
    /// APIs.
    pub fn builtin() -> Self {
        let mut t = Self::empty();

        // Contacts.
        t.add_renames("user.get", Request, &[("userid", "userId"), ("lang", "language")])
            .add_renames(
                "user.get",
                Response,
                &[
                    ("userid", "userId"),
                    ("unionid", "unionId"),
                    ("department", "deptIdList"),
                    ("isAdmin", "admin"),
                    ("isBoss", "boss"),
                    ("jobnumber", "jobNumber"),
                ],
            )
            .set_default(Legacy, "user.get", Request, "lang", json!("zh_CN"))
            .set_default(Current, "user.get", Request, "language", json!("zh_CN"))
            .set_field_type(Legacy, "user.get", Request, "userid", ValueType::String)
            .set_field_type(Current, "user.get", Response, "userId", ValueType::String)
            .set_field_type(Current, "user.get", Response, "deptIdList", ValueType::List)
            .set_field_type(Current, "user.get", Response, "admin", ValueType::Bool)
            .set_field_type(Current, "user.get", Response, "boss", ValueType::Bool)
            .set_field_type(Current, "user.get", Response, "hiredDate", ValueType::Int);

        for method in ["user.create", "user.update"] {
            t.add_renames(
                method,
                Request,
                &[
                    ("userid", "userId"),
                    ("department", "deptIdList"),
                    ("jobnumber", "jobNumber"),
                    ("isSenior", "seniorMode"),
                ],
            )
            .set_field_type(Legacy, method, Request, "userid", ValueType::String)
            .set_field_type(Legacy, method, Request, "department", ValueType::List);
        }
        t.add_renames("user.create", Response, &[("userid", "userId")])
            .add_renames("user.delete", Request, &[("userid", "userId")])
            .set_field_type(Legacy, "user.delete", Request, "userid", ValueType::String);

        t.add_renames(
            "user.list",
            Request,
            &[("department_id", "deptId"), ("offset", "cursor"), ("lang", "language")],
        )
        .add_renames("user.list", Response, &[("userlist", "list"), ("next_cursor", "nextCursor")])
        .set_default(Legacy, "user.list", Request, "offset", json!(0))
        .set_default(Legacy, "user.list", Request, "size", json!(100))
        .set_default(Legacy, "user.list", Request, "lang", json!("zh_CN"))
        .set_default(Current, "user.list", Request, "cursor", json!(0))
        .set_default(Current, "user.list", Request, "size", json!(100))
        .set_field_type(Legacy, "user.list", Request, "department_id", ValueType::Int)
        .set_field_type(Legacy, "user.list", Request, "offset", ValueType::Int)
        .set_field_type(Legacy, "user.list", Request, "size", ValueType::Int)
        .set_field_type(Current, "user.list", Response, "list", ValueType::List)
        .set_field_type(Current, "user.list", Response, "hasMore", ValueType::Bool);

        t.add_renames("department.get", Request, &[("id", "deptId"), ("lang", "language")])
            .add_renames("department.get", Response, &[("id", "deptId"), ("parentid", "parentId")])
            .set_default(Legacy, "department.get", Request, "lang", json!("zh_CN"))
            .set_field_type(Current, "department.get", Response, "deptId", ValueType::Int)
            .set_field_type(Current, "department.get", Response, "parentId", ValueType::Int);

        t.add_renames(
            "department.list",
            Request,
            &[("id", "deptId"), ("fetch_child", "fetchChild"), ("lang", "language")],
        )
        .add_renames("department.list", Response, &[("department", "depts")])
        .set_default(Legacy, "department.list", Request, "fetch_child", json!(false))
        .set_default(Legacy, "department.list", Request, "lang", json!("zh_CN"))
        .set_field_type(Legacy, "department.list", Request, "fetch_child", ValueType::Bool)
        .set_field_type(Current, "department.list", Response, "depts", ValueType::List);

        // Work notifications. Legacy wants id lists as comma-joined strings.
        t.add_renames(
            "message.send",
            Request,
            &[
                ("agent_id", "agentId"),
                ("userid_list", "userIdList"),
                ("dept_id_list", "deptIdList"),
                ("to_all_user", "toAllUser"),
            ],
        )
        .add_renames("message.send", Response, &[("task_id", "taskId"), ("request_id", "requestId")])
        .set_default(Legacy, "message.send", Request, "to_all_user", json!(false))
        .set_field_type(Legacy, "message.send", Request, "agent_id", ValueType::Int)
        .set_field_type(Legacy, "message.send", Request, "userid_list", ValueType::String)
        .set_field_type(Legacy, "message.send", Request, "dept_id_list", ValueType::String)
        .set_field_type(Legacy, "message.send", Request, "to_all_user", ValueType::Bool)
        .set_field_type(Current, "message.send", Request, "userIdList", ValueType::List)
        .set_field_type(Current, "message.send", Request, "deptIdList", ValueType::List)
        .set_field_type(Current, "message.send", Response, "taskId", ValueType::Int);

        // Recall has no legacy counterpart.
        t.set_compatible(Legacy, Current, "message.recall", false)
            .set_compatible(Current, Legacy, "message.recall", false);

        t.add_renames("attendance.list", Request, &[("userIdList", "userIds")])
            .add_renames("attendance.list", Response, &[("recordresult", "records")])
            .set_default(Legacy, "attendance.list", Request, "offset", json!(0))
            .set_default(Legacy, "attendance.list", Request, "limit", json!(50))
            .set_field_type(Legacy, "attendance.list", Request, "userIdList", ValueType::List)
            .set_field_type(Current, "attendance.list", Response, "records", ValueType::List)
            .set_field_type(Current, "attendance.list", Response, "hasMore", ValueType::Bool);

        t.add_renames("media.upload", Response, &[("media_id", "mediaId"), ("created_at", "createdAt")])
            .set_field_type(Current, "media.upload", Response, "mediaId", ValueType::String);

        t
    }
}
