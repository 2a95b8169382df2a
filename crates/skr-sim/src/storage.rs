//! Storage module: buckets, a read-only mirror of their objects, and the
//! `upload_objects` RPC.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use skr_mapper::{
    AdapterError, CloudAdapter, Context, Mapper, ModuleDef, OutputColumn, Record, RecordStore, Rpc,
    RpcParam, RpcRow, Source, StoreFactory,
};
use skr_schemas::ScalarType;
use uuid::Uuid;

use crate::cloud::{SimBucket, SimCloud, SimObject};
use crate::same_json;

pub const MODULE: &str = "storage";

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    #[serde(default)]
    pub internal_id: Option<Uuid>,
    pub name: String,
    /// JSON policy document.
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Server-generated.
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl Bucket {
    pub fn new(name: &str) -> Self {
        Self {
            internal_id: None,
            name: name.to_string(),
            policy: None,
            tags: BTreeMap::new(),
            created_at: None,
        }
    }

    fn from_sim(b: SimBucket) -> Self {
        Self {
            internal_id: None,
            name: b.name,
            policy: b.policy,
            tags: b.tags,
            created_at: Some(b.created_at),
        }
    }
}

impl Record for Bucket {
    fn internal_id(&self) -> Option<Uuid> {
        self.internal_id
    }

    fn set_internal_id(&mut self, id: Option<Uuid>) {
        self.internal_id = id;
    }

    fn natural_id(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

fn same_policy(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => same_json(a, b),
        _ => false,
    }
}

pub struct BucketCloud {
    sim: SimCloud,
}

#[async_trait::async_trait]
impl CloudAdapter<Bucket> for BucketCloud {
    async fn read(&self, ctx: &Context, id: Option<&str>) -> Result<Vec<Bucket>, AdapterError> {
        Ok(self
            .sim
            .list_buckets(&ctx.scope)?
            .into_iter()
            .filter(|b| id.map_or(true, |id| b.name == id))
            .map(Bucket::from_sim)
            .collect())
    }

    async fn create(&self, records: &[Bucket], ctx: &Context) -> Result<Vec<Bucket>, AdapterError> {
        let mut out = Vec::with_capacity(records.len());
        for r in records {
            let b = self
                .sim
                .create_bucket(&ctx.scope, &r.name, r.policy.as_deref(), &r.tags)
                .map_err(|e| e.at_step("create_bucket"))?;
            out.push(Bucket::from_sim(b));
        }
        Ok(out)
    }

    async fn update(&self, records: &[Bucket], ctx: &Context) -> Result<Vec<Bucket>, AdapterError> {
        let current: BTreeMap<String, SimBucket> = self
            .sim
            .list_buckets(&ctx.scope)?
            .into_iter()
            .map(|b| (b.name.clone(), b))
            .collect();
        let mut out = Vec::with_capacity(records.len());
        for r in records {
            let Some(cur) = current.get(&r.name) else {
                return Err(AdapterError::dependency_not_ready(format!(
                    "bucket '{}' disappeared before update",
                    r.name
                )));
            };
            if !same_policy(&cur.policy, &r.policy) {
                self.sim
                    .put_bucket_policy(&ctx.scope, &r.name, r.policy.as_deref())
                    .map_err(|e| e.at_step("put_bucket_policy"))?;
            }
            if cur.tags != r.tags {
                self.sim
                    .put_bucket_tags(&ctx.scope, &r.name, &r.tags)
                    .map_err(|e| e.at_step("put_bucket_tags"))?;
            }
            out.push(Bucket {
                created_at: Some(cur.created_at),
                ..r.clone()
            });
        }
        Ok(out)
    }

    async fn delete(&self, records: &[Bucket], ctx: &Context) -> Result<(), AdapterError> {
        for r in records {
            self.sim
                .delete_bucket(&ctx.scope, &r.name)
                .map_err(|e| e.at_step("delete_bucket"))?;
        }
        Ok(())
    }
}

pub struct BucketMapper {
    cloud: BucketCloud,
    db: Arc<dyn RecordStore<Bucket>>,
}

impl BucketMapper {
    pub fn new(sim: SimCloud, db: Arc<dyn RecordStore<Bucket>>) -> Self {
        Self {
            cloud: BucketCloud { sim },
            db,
        }
    }
}

impl Mapper for BucketMapper {
    type Record = Bucket;

    fn module(&self) -> &'static str {
        MODULE
    }

    fn kind(&self) -> &'static str {
        "bucket"
    }

    fn equals(&self, a: &Bucket, b: &Bucket) -> bool {
        a.name == b.name && a.tags == b.tags && same_policy(&a.policy, &b.policy)
    }

    fn cloud(&self) -> &dyn CloudAdapter<Bucket> {
        &self.cloud
    }

    fn db(&self) -> &dyn RecordStore<Bucket> {
        self.db.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Bucket objects (read-only mirror)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketObject {
    #[serde(default)]
    pub internal_id: Option<Uuid>,
    pub bucket: String,
    pub key: String,
    pub etag: String,
    pub size: i64,
}

impl BucketObject {
    fn from_sim(o: SimObject) -> Self {
        Self {
            internal_id: None,
            size: o.content.len() as i64,
            bucket: o.bucket,
            key: o.key,
            etag: o.etag,
        }
    }
}

impl Record for BucketObject {
    fn internal_id(&self) -> Option<Uuid> {
        self.internal_id
    }

    fn set_internal_id(&mut self, id: Option<Uuid>) {
        self.internal_id = id;
    }

    fn natural_id(&self) -> Option<String> {
        Some(format!("{}/{}", self.bucket, self.key))
    }
}

pub struct ObjectCloud {
    sim: SimCloud,
}

fn read_only() -> AdapterError {
    AdapterError::validation("bucket objects are read-only; use the upload_objects rpc")
}

#[async_trait::async_trait]
impl CloudAdapter<BucketObject> for ObjectCloud {
    async fn read(&self, ctx: &Context, id: Option<&str>) -> Result<Vec<BucketObject>, AdapterError> {
        Ok(self
            .sim
            .list_objects(&ctx.scope)?
            .into_iter()
            .map(BucketObject::from_sim)
            .filter(|o| id.map_or(true, |id| o.natural_id().as_deref() == Some(id)))
            .collect())
    }

    async fn create(&self, _: &[BucketObject], _: &Context) -> Result<Vec<BucketObject>, AdapterError> {
        Err(read_only())
    }

    async fn update(&self, _: &[BucketObject], _: &Context) -> Result<Vec<BucketObject>, AdapterError> {
        Err(read_only())
    }

    async fn delete(&self, _: &[BucketObject], _: &Context) -> Result<(), AdapterError> {
        Err(read_only())
    }
}

pub struct ObjectMapper {
    cloud: ObjectCloud,
    db: Arc<dyn RecordStore<BucketObject>>,
}

impl Mapper for ObjectMapper {
    type Record = BucketObject;

    fn module(&self) -> &'static str {
        MODULE
    }

    fn kind(&self) -> &'static str {
        "bucket_object"
    }

    fn equals(&self, a: &BucketObject, b: &BucketObject) -> bool {
        a.bucket == b.bucket && a.key == b.key && a.etag == b.etag && a.size == b.size
    }

    fn source(&self) -> Source {
        Source::Cloud
    }

    fn cloud(&self) -> &dyn CloudAdapter<BucketObject> {
        &self.cloud
    }

    fn db(&self) -> &dyn RecordStore<BucketObject> {
        self.db.as_ref()
    }
}

// ---------------------------------------------------------------------------
// RPC: upload_objects(bucket, keys, content = "")
// ---------------------------------------------------------------------------

/// Uploads each key in order. Stops at the first failure; objects already
/// uploaded stay, and the post-call mirror picks them up.
pub struct UploadObjects {
    sim: SimCloud,
    params: Vec<RpcParam>,
}

static UPLOAD_OUTPUT: [OutputColumn; 4] = [
    OutputColumn { name: "bucket", ty: ScalarType::Varchar },
    OutputColumn { name: "key", ty: ScalarType::Varchar },
    OutputColumn { name: "etag", ty: ScalarType::Varchar },
    OutputColumn { name: "size", ty: ScalarType::Integer },
];

impl UploadObjects {
    pub fn new(sim: SimCloud) -> Self {
        Self {
            sim,
            params: vec![
                RpcParam::required("bucket", ScalarType::Varchar),
                RpcParam::required("keys", ScalarType::Json),
                RpcParam::optional("content", ScalarType::Varchar, json!("")),
            ],
        }
    }
}

/// `keys` is a JSON array of strings, or a single string.
fn key_list(v: &Value) -> Result<Vec<String>, AdapterError> {
    match v {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|k| {
                k.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| AdapterError::validation("keys must be strings"))
            })
            .collect(),
        _ => Err(AdapterError::validation("keys must be a string or an array of strings")),
    }
}

#[async_trait::async_trait]
impl Rpc for UploadObjects {
    fn module(&self) -> &'static str {
        MODULE
    }

    fn name(&self) -> &'static str {
        "upload_objects"
    }

    fn params(&self) -> &[RpcParam] {
        &self.params
    }

    fn output(&self) -> &[OutputColumn] {
        &UPLOAD_OUTPUT
    }

    async fn call(&self, ctx: &Context, args: &[Value]) -> Result<Vec<RpcRow>, AdapterError> {
        let bucket = args.first().and_then(Value::as_str).unwrap_or_default();
        let keys = key_list(args.get(1).unwrap_or(&Value::Null))?;
        let content = args.get(2).and_then(Value::as_str).unwrap_or_default();

        let mut rows = Vec::with_capacity(keys.len());
        for key in &keys {
            let obj = ctx
                .retry
                .run("put_object", || async { self.sim.put_object(&ctx.scope, bucket, key, content) })
                .await
                .map_err(|e| e.at_step("put_object").for_entity("bucket_object", &format!("{bucket}/{key}")))?;
            let o = BucketObject::from_sim(obj);
            let mut row = RpcRow::new();
            row.insert("bucket".into(), json!(o.bucket));
            row.insert("key".into(), json!(o.key));
            row.insert("etag".into(), json!(o.etag));
            row.insert("size".into(), json!(o.size));
            rows.push(row);
        }
        Ok(rows)
    }
}

pub fn module<F: StoreFactory>(sim: &SimCloud, stores: &F) -> ModuleDef {
    ModuleDef::new(MODULE, "0.1.0")
        .with_mapper(Arc::new(BucketMapper::new(sim.clone(), stores.store(MODULE, "bucket"))))
        .with_mapper(Arc::new(ObjectMapper {
            cloud: ObjectCloud { sim: sim.clone() },
            db: stores.store(MODULE, "bucket_object"),
        }))
        .with_rpc(Arc::new(UploadObjects::new(sim.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> BucketMapper {
        BucketMapper::new(
            SimCloud::new(),
            Arc::new(skr_mapper::MemoryStore::<Bucket>::new()),
        )
    }

    #[test]
    fn equality_ignores_server_fields_and_policy_formatting() {
        let m = mapper();
        let mut a = Bucket::new("logs");
        a.policy = Some(r#"{"a": 1, "b": 2}"#.to_string());
        let mut b = a.clone();
        b.policy = Some(r#"{"b":2,"a":1}"#.to_string());
        b.created_at = Some(42);
        b.internal_id = Some(Uuid::new_v4());
        assert!(m.equals(&a, &b));
        assert!(m.equals(&b, &a));
        assert!(m.equals(&a, &a));

        b.tags.insert("team".into(), "ops".into());
        assert!(!m.equals(&a, &b));
        assert!(!m.equals(&b, &a));
    }

    #[test]
    fn keys_accept_string_or_array() {
        assert_eq!(key_list(&json!("a")).unwrap(), vec!["a"]);
        assert_eq!(key_list(&json!(["a", "b"])).unwrap(), vec!["a", "b"]);
        assert!(key_list(&json!([1])).is_err());
        assert!(key_list(&json!(3)).is_err());
    }
}
