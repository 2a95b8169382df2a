//! Deterministic in-process cloud provider.
//!
//! State is keyed by scope. Every region is lazily seeded with one reserved
//! security group and a fixed set of zones. Identifiers come from a single
//! counter, so the same sequence of calls always yields the same ids.
//!
//! Faults are injected per operation (optionally per target) and consumed
//! in order. They are never persisted, and neither are call hooks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use skr_mapper::{AdapterError, ErrorKind};
use skr_schemas::Scope;
use tracing::debug;

/// Name of the provider-reserved security group every region starts with.
pub const DEFAULT_GROUP: &str = "default";

const CLOCK_START: i64 = 1_700_000_000;

// ---------------------------------------------------------------------------
// Provider objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimBucket {
    pub name: String,
    pub policy: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimObject {
    pub bucket: String,
    pub key: String,
    pub content: String,
    pub etag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimRole {
    pub name: String,
    pub arn: String,
    pub policy_document: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimGroup {
    pub group_id: String,
    pub name: String,
    pub description: String,
    pub tags: BTreeMap<String, String>,
    /// Launches referencing this group fail as not-found this many more times.
    #[serde(default)]
    pub reference_lag: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimVolume {
    pub volume_id: String,
    pub size_gb: i64,
    pub attached_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimInstance {
    pub instance_id: String,
    pub image_id: String,
    pub instance_type: String,
    pub group_id: String,
    pub volume_id: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub state: String,
    /// Describe calls left before the current transition completes.
    #[serde(default)]
    pub polls_left: u32,
}

/// Everything one scope owns. Public so tests can introduce out-of-band drift.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionState {
    pub buckets: BTreeMap<String, SimBucket>,
    pub objects: BTreeMap<String, SimObject>,
    pub roles: BTreeMap<String, SimRole>,
    pub groups: BTreeMap<String, SimGroup>,
    pub volumes: BTreeMap<String, SimVolume>,
    pub instances: BTreeMap<String, SimInstance>,
    pub zones: Vec<String>,
}

impl RegionState {
    fn seeded(region: &str) -> Self {
        let mut s = RegionState::default();
        s.groups.insert(
            "sg-default".to_string(),
            SimGroup {
                group_id: "sg-default".to_string(),
                name: DEFAULT_GROUP.to_string(),
                description: "default VPC security group".to_string(),
                tags: BTreeMap::new(),
                reference_lag: 0,
            },
        );
        s.zones = ["a", "b", "c"].iter().map(|z| format!("{region}{z}")).collect();
        s
    }

    /// Names are not unique while a replacement is in flight; the newest
    /// group wins.
    pub fn group_by_name(&self, name: &str) -> Option<&SimGroup> {
        self.groups.values().filter(|g| g.name == name).max_by(|a, b| a.group_id.cmp(&b.group_id))
    }
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Fault {
    op: String,
    target: Option<String>,
    remaining: u32,
    kind: ErrorKind,
    message: String,
}

#[derive(Debug, Default)]
struct Faults {
    queue: Vec<Fault>,
    /// New resources of this kind are not referenceable for n attempts.
    reference_lag: BTreeMap<String, u32>,
    launch_polls: u32,
    terminate_polls: u32,
}

/// Observer for every provider call, reads included, as
/// `(scope, op, target)`. Runs under the provider lock and must not call
/// back into the `SimCloud`.
pub type CallHook = Arc<dyn Fn(&Scope, &str, &str) + Send + Sync>;

#[derive(Default)]
struct Hooks(Vec<CallHook>);

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} call hook(s)", self.0.len())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SimState {
    scopes: BTreeMap<String, RegionState>,
    seq: u64,
    clock: i64,
    #[serde(skip)]
    faults: Faults,
    #[serde(skip)]
    ops: Vec<String>,
    #[serde(skip)]
    hooks: Hooks,
}

impl SimState {
    fn region(&mut self, scope: &Scope) -> &mut RegionState {
        self.scopes
            .entry(scope.to_string())
            .or_insert_with(|| RegionState::seeded(&scope.region))
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("{prefix}-{:04}", self.seq)
    }

    fn tick(&mut self) -> i64 {
        self.clock += 1;
        CLOCK_START + self.clock
    }

    /// Notify hooks, then consume the first matching fault, if any.
    fn check(&mut self, scope: &Scope, op: &str, target: &str) -> Result<(), AdapterError> {
        for hook in &self.hooks.0 {
            hook(scope, op, target);
        }
        let hit = self.faults.queue.iter_mut().find(|f| {
            f.remaining > 0 && f.op == op && f.target.as_deref().map_or(true, |t| t == target)
        });
        if let Some(f) = hit {
            f.remaining -= 1;
            debug!(op, target, kind = %f.kind, "sim fault injected");
            return Err(AdapterError::new(f.kind, f.message.clone()));
        }
        Ok(())
    }

    fn log(&mut self, op: &str, target: &str) {
        self.ops.push(format!("{op} {target}"));
    }
}

fn not_found(what: &str, id: &str) -> AdapterError {
    AdapterError::validation(format!("{what} '{id}' does not exist"))
}

// ---------------------------------------------------------------------------
// SimCloud
// ---------------------------------------------------------------------------

/// Cheap to clone; all clones share one provider.
#[derive(Debug, Clone, Default)]
pub struct SimCloud {
    state: Arc<Mutex<SimState>>,
}

impl SimCloud {
    pub fn new() -> Self {
        let sim = Self::default();
        sim.lock().faults.launch_polls = 1;
        sim.lock().faults.terminate_polls = 1;
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- persistence ---------------------------------------------------------

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read sim state failed: {}", path.display()))?;
        let mut state: SimState = serde_json::from_str(&raw)
            .with_context(|| format!("parse sim state failed: {}", path.display()))?;
        state.faults.launch_polls = 1;
        state.faults.terminate_polls = 1;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Load `path` when it exists, otherwise start empty.
    pub fn load_or_new(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(&*self.lock()).context("serialize sim state failed")?;
        std::fs::write(path, raw)
            .with_context(|| format!("write sim state failed: {}", path.display()))?;
        Ok(())
    }

    // -- fault injection and inspection --------------------------------------

    /// Fail the next `times` calls of `op` (restricted to `target` when given).
    pub fn inject(&self, op: &str, target: Option<&str>, times: u32, kind: ErrorKind, message: &str) {
        self.lock().faults.queue.push(Fault {
            op: op.to_string(),
            target: target.map(str::to_string),
            remaining: times,
            kind,
            message: message.to_string(),
        });
    }

    pub fn throttle(&self, op: &str, target: Option<&str>, times: u32) {
        self.inject(op, target, times, ErrorKind::RateLimited, "Throttling: rate exceeded");
    }

    /// Newly created resources of `kind` cannot be referenced for `attempts`
    /// tries. Only `security_group` is honoured today.
    pub fn set_reference_lag(&self, kind: &str, attempts: u32) {
        self.lock()
            .faults
            .reference_lag
            .insert(kind.to_string(), attempts);
    }

    /// Describe polls needed for a launch to reach `running`.
    pub fn set_launch_polls(&self, polls: u32) {
        self.lock().faults.launch_polls = polls;
    }

    pub fn set_terminate_polls(&self, polls: u32) {
        self.lock().faults.terminate_polls = polls;
    }

    /// Call `hook` on every later provider call.
    pub fn on_call<F>(&self, hook: F)
    where
        F: Fn(&Scope, &str, &str) + Send + Sync + 'static,
    {
        self.lock().hooks.0.push(Arc::new(hook));
    }

    /// Successful mutations, in order, as `"op target"`.
    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Snapshot of one scope.
    pub fn region(&self, scope: &Scope) -> RegionState {
        self.lock().region(scope).clone()
    }

    /// Mutate provider state directly, bypassing faults and the ops log.
    pub fn edit<F>(&self, scope: &Scope, f: F)
    where
        F: FnOnce(&mut RegionState),
    {
        f(self.lock().region(scope));
    }

    // -- storage -------------------------------------------------------------

    pub fn list_buckets(&self, scope: &Scope) -> Result<Vec<SimBucket>, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "list_buckets", "")?;
        Ok(st.region(scope).buckets.values().cloned().collect())
    }

    pub fn create_bucket(
        &self,
        scope: &Scope,
        name: &str,
        policy: Option<&str>,
        tags: &BTreeMap<String, String>,
    ) -> Result<SimBucket, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "create_bucket", name)?;
        let valid = (2..=63).contains(&name.len())
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
        if !valid {
            return Err(AdapterError::validation(format!("InvalidBucketName: '{name}'")));
        }
        if let Some(p) = policy {
            parse_policy(p)?;
        }
        let created_at = st.tick();
        let region = st.region(scope);
        if region.buckets.contains_key(name) {
            return Err(AdapterError::validation(format!("BucketAlreadyExists: '{name}'")));
        }
        let bucket = SimBucket {
            name: name.to_string(),
            policy: policy.map(str::to_string),
            tags: tags.clone(),
            created_at,
        };
        region.buckets.insert(name.to_string(), bucket.clone());
        st.log("create_bucket", name);
        Ok(bucket)
    }

    pub fn put_bucket_policy(&self, scope: &Scope, name: &str, policy: Option<&str>) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.check(scope, "put_bucket_policy", name)?;
        if let Some(p) = policy {
            parse_policy(p)?;
        }
        let b = st
            .region(scope)
            .buckets
            .get_mut(name)
            .ok_or_else(|| not_found("bucket", name))?;
        b.policy = policy.map(str::to_string);
        st.log("put_bucket_policy", name);
        Ok(())
    }

    pub fn put_bucket_tags(&self, scope: &Scope, name: &str, tags: &BTreeMap<String, String>) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.check(scope, "put_bucket_tags", name)?;
        let b = st
            .region(scope)
            .buckets
            .get_mut(name)
            .ok_or_else(|| not_found("bucket", name))?;
        b.tags = tags.clone();
        st.log("put_bucket_tags", name);
        Ok(())
    }

    pub fn delete_bucket(&self, scope: &Scope, name: &str) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.check(scope, "delete_bucket", name)?;
        let region = st.region(scope);
        if region.objects.values().any(|o| o.bucket == name) {
            return Err(AdapterError::dependency_not_ready(format!(
                "BucketNotEmpty: '{name}' still holds objects"
            )));
        }
        if region.buckets.remove(name).is_none() {
            return Ok(());
        }
        st.log("delete_bucket", name);
        Ok(())
    }

    pub fn list_objects(&self, scope: &Scope) -> Result<Vec<SimObject>, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "list_objects", "")?;
        Ok(st.region(scope).objects.values().cloned().collect())
    }

    pub fn put_object(&self, scope: &Scope, bucket: &str, key: &str, content: &str) -> Result<SimObject, AdapterError> {
        let path = format!("{bucket}/{key}");
        let mut st = self.lock();
        st.check(scope, "put_object", &path)?;
        if key.is_empty() {
            return Err(AdapterError::validation("object key must not be empty"));
        }
        let etag = st.next_id("etag");
        let region = st.region(scope);
        if !region.buckets.contains_key(bucket) {
            return Err(AdapterError::validation(format!("NoSuchBucket: '{bucket}'")));
        }
        let obj = SimObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content: content.to_string(),
            etag,
        };
        region.objects.insert(path.clone(), obj.clone());
        st.log("put_object", &path);
        Ok(obj)
    }

    // -- iam -----------------------------------------------------------------

    pub fn list_roles(&self, scope: &Scope) -> Result<Vec<SimRole>, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "list_roles", "")?;
        Ok(st.region(scope).roles.values().cloned().collect())
    }

    pub fn create_role(
        &self,
        scope: &Scope,
        name: &str,
        policy_document: &str,
        description: Option<&str>,
    ) -> Result<SimRole, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "create_role", name)?;
        parse_policy(policy_document)?;
        let region = st.region(scope);
        if region.roles.contains_key(name) {
            return Err(AdapterError::validation(format!("EntityAlreadyExists: role '{name}'")));
        }
        let role = SimRole {
            name: name.to_string(),
            arn: format!("arn:sim:iam::{}:role/{name}", scope.account),
            policy_document: policy_document.to_string(),
            description: description.map(str::to_string),
        };
        region.roles.insert(name.to_string(), role.clone());
        st.log("create_role", name);
        Ok(role)
    }

    pub fn update_role_policy(&self, scope: &Scope, name: &str, policy_document: &str) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.check(scope, "update_role_policy", name)?;
        parse_policy(policy_document)?;
        let r = st
            .region(scope)
            .roles
            .get_mut(name)
            .ok_or_else(|| not_found("role", name))?;
        r.policy_document = policy_document.to_string();
        st.log("update_role_policy", name);
        Ok(())
    }

    pub fn update_role_description(&self, scope: &Scope, name: &str, description: Option<&str>) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.check(scope, "update_role_description", name)?;
        let r = st
            .region(scope)
            .roles
            .get_mut(name)
            .ok_or_else(|| not_found("role", name))?;
        r.description = description.map(str::to_string);
        st.log("update_role_description", name);
        Ok(())
    }

    pub fn delete_role(&self, scope: &Scope, name: &str) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.check(scope, "delete_role", name)?;
        if st.region(scope).roles.remove(name).is_some() {
            st.log("delete_role", name);
        }
        Ok(())
    }

    // -- network -------------------------------------------------------------

    pub fn list_groups(&self, scope: &Scope) -> Result<Vec<SimGroup>, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "list_security_groups", "")?;
        Ok(st.region(scope).groups.values().cloned().collect())
    }

    pub fn create_group(
        &self,
        scope: &Scope,
        name: &str,
        description: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<SimGroup, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "create_security_group", name)?;
        if name == DEFAULT_GROUP {
            return Err(AdapterError::validation(
                "InvalidGroup.Reserved: 'default' is reserved by the provider",
            ));
        }
        if description.is_empty() {
            return Err(AdapterError::validation("security group description must not be empty"));
        }
        let lag = st
            .faults
            .reference_lag
            .get("security_group")
            .copied()
            .unwrap_or(0);
        let group_id = st.next_id("sg");
        let group = SimGroup {
            group_id: group_id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            tags: tags.clone(),
            reference_lag: lag,
        };
        st.region(scope).groups.insert(group_id.clone(), group.clone());
        st.log("create_security_group", &group_id);
        Ok(group)
    }

    pub fn set_group_tags(&self, scope: &Scope, group_id: &str, tags: &BTreeMap<String, String>) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.check(scope, "set_security_group_tags", group_id)?;
        let g = st
            .region(scope)
            .groups
            .get_mut(group_id)
            .ok_or_else(|| not_found("security group", group_id))?;
        g.tags = tags.clone();
        st.log("set_security_group_tags", group_id);
        Ok(())
    }

    pub fn delete_group(&self, scope: &Scope, group_id: &str) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.check(scope, "delete_security_group", group_id)?;
        let region = st.region(scope);
        let Some(g) = region.groups.get(group_id) else {
            return Ok(());
        };
        if g.name == DEFAULT_GROUP {
            return Err(AdapterError::validation("CannotDelete: the default group is reserved"));
        }
        if region
            .instances
            .values()
            .any(|i| i.group_id == group_id && i.state != "terminated")
        {
            return Err(AdapterError::dependency_not_ready(format!(
                "DependencyViolation: '{group_id}' is in use by an instance"
            )));
        }
        region.groups.remove(group_id);
        st.log("delete_security_group", group_id);
        Ok(())
    }

    pub fn list_zones(&self, scope: &Scope) -> Result<Vec<String>, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "list_zones", "")?;
        Ok(st.region(scope).zones.clone())
    }

    // -- compute -------------------------------------------------------------

    pub fn list_volumes(&self, scope: &Scope) -> Result<Vec<SimVolume>, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "list_volumes", "")?;
        Ok(st.region(scope).volumes.values().cloned().collect())
    }

    pub fn create_volume(&self, scope: &Scope, size_gb: i64) -> Result<SimVolume, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "create_volume", "")?;
        if !(1..=16_384).contains(&size_gb) {
            return Err(AdapterError::validation(format!("InvalidParameterValue: volume size {size_gb}")));
        }
        let volume_id = st.next_id("vol");
        let vol = SimVolume {
            volume_id: volume_id.clone(),
            size_gb,
            attached_to: None,
        };
        st.region(scope).volumes.insert(volume_id.clone(), vol.clone());
        st.log("create_volume", &volume_id);
        Ok(vol)
    }

    pub fn delete_volume(&self, scope: &Scope, volume_id: &str) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.check(scope, "delete_volume", volume_id)?;
        let region = st.region(scope);
        let Some(v) = region.volumes.get(volume_id) else {
            return Ok(());
        };
        if let Some(owner) = &v.attached_to {
            return Err(AdapterError::dependency_not_ready(format!(
                "VolumeInUse: '{volume_id}' is attached to '{owner}'"
            )));
        }
        region.volumes.remove(volume_id);
        st.log("delete_volume", volume_id);
        Ok(())
    }

    /// Instances that are not terminated.
    pub fn list_instances(&self, scope: &Scope) -> Result<Vec<SimInstance>, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "list_instances", "")?;
        Ok(st
            .region(scope)
            .instances
            .values()
            .filter(|i| i.state != "terminated")
            .cloned()
            .collect())
    }

    pub fn run_instance(
        &self,
        scope: &Scope,
        image_id: &str,
        instance_type: &str,
        group_id: &str,
        volume_id: Option<&str>,
    ) -> Result<SimInstance, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "run_instance", group_id)?;
        if !image_id.starts_with("ami-") {
            return Err(AdapterError::validation(format!("InvalidAMIID.Malformed: '{image_id}'")));
        }
        let polls = st.faults.launch_polls;
        let instance_id = st.next_id("i");
        let region = st.region(scope);
        let Some(group) = region.groups.get_mut(group_id) else {
            return Err(AdapterError::dependency_not_ready(format!(
                "InvalidGroup.NotFound: '{group_id}'"
            )));
        };
        if group.reference_lag > 0 {
            group.reference_lag -= 1;
            return Err(AdapterError::dependency_not_ready(format!(
                "InvalidGroup.NotFound: '{group_id}' is not visible yet"
            )));
        }
        if let Some(vid) = volume_id {
            let vol = region
                .volumes
                .get_mut(vid)
                .ok_or_else(|| not_found("volume", vid))?;
            if vol.attached_to.is_some() {
                return Err(AdapterError::validation(format!("VolumeInUse: '{vid}'")));
            }
            vol.attached_to = Some(instance_id.clone());
        }
        let inst = SimInstance {
            instance_id: instance_id.clone(),
            image_id: image_id.to_string(),
            instance_type: instance_type.to_string(),
            group_id: group_id.to_string(),
            volume_id: volume_id.map(str::to_string),
            tags: BTreeMap::new(),
            state: if polls == 0 { "running" } else { "pending" }.to_string(),
            polls_left: polls,
        };
        region.instances.insert(instance_id.clone(), inst.clone());
        st.log("run_instance", &instance_id);
        Ok(inst)
    }

    /// Point read. Each call advances a pending transition by one poll.
    pub fn describe_instance(&self, scope: &Scope, instance_id: &str) -> Result<Option<SimInstance>, AdapterError> {
        let mut st = self.lock();
        st.check(scope, "describe_instance", instance_id)?;
        let region = st.region(scope);
        let Some(inst) = region.instances.get_mut(instance_id) else {
            return Ok(None);
        };
        if inst.polls_left > 0 {
            inst.polls_left -= 1;
        }
        if inst.polls_left == 0 {
            match inst.state.as_str() {
                "pending" => inst.state = "running".to_string(),
                "shutting-down" => inst.state = "terminated".to_string(),
                _ => {}
            }
        }
        let out = inst.clone();
        if out.state == "terminated" {
            if let Some(vid) = &out.volume_id {
                if let Some(v) = region.volumes.get_mut(vid) {
                    v.attached_to = None;
                }
            }
        }
        Ok(Some(out))
    }

    /// Replace the instance's tag set.
    pub fn create_tags(&self, scope: &Scope, instance_id: &str, tags: &BTreeMap<String, String>) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.check(scope, "create_tags", instance_id)?;
        let inst = st
            .region(scope)
            .instances
            .get_mut(instance_id)
            .filter(|i| i.state != "terminated")
            .ok_or_else(|| not_found("instance", instance_id))?;
        inst.tags = tags.clone();
        st.log("create_tags", instance_id);
        Ok(())
    }

    pub fn terminate_instance(&self, scope: &Scope, instance_id: &str) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.check(scope, "terminate_instance", instance_id)?;
        let polls = st.faults.terminate_polls;
        let Some(inst) = st.region(scope).instances.get_mut(instance_id) else {
            return Ok(());
        };
        if matches!(inst.state.as_str(), "shutting-down" | "terminated") {
            return Ok(());
        }
        inst.state = "shutting-down".to_string();
        inst.polls_left = polls;
        st.log("terminate_instance", instance_id);
        Ok(())
    }

    /// Ids of every live object in the scope, for leak checks.
    pub fn live_ids(&self, scope: &Scope) -> BTreeSet<String> {
        let mut st = self.lock();
        let r = st.region(scope);
        r.buckets
            .keys()
            .chain(r.roles.keys())
            .chain(r.groups.keys())
            .chain(r.volumes.keys())
            .cloned()
            .chain(
                r.instances
                    .values()
                    .filter(|i| i.state != "terminated")
                    .map(|i| i.instance_id.clone()),
            )
            .collect()
    }
}

/// Policies are JSON objects.
fn parse_policy(raw: &str) -> Result<serde_json::Value, AdapterError> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) if v.is_object() => Ok(v),
        _ => Err(AdapterError::validation("MalformedPolicyDocument: expected a JSON object")),
    }
}
