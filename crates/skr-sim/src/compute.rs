//! Compute module: instances with a dedicated data volume.
//!
//! Launch is a three step create (volume, instance, tags) with compensation:
//! a failure at any step tears down what the earlier steps built before the
//! error is returned. Instances reference their security group by name; the
//! group id is resolved through the network module's memoized reads.

use std::collections::BTreeMap;
use std::future::ready;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skr_mapper::{
    wait_until, AdapterError, CloudAdapter, Context, Mapper, ModuleDef, Record, RecordStore, StoreFactory,
    TerminalStates, UndoStack, UpdateOrReplace, WaitState, WaiterConfig,
};
use skr_schemas::Scope;
use tracing::debug;
use uuid::Uuid;

use crate::cloud::{SimCloud, SimInstance};
use crate::network::SecurityGroupMapper;

pub const MODULE: &str = "compute";

const NAME_TAG: &str = "Name";

const LAUNCH: TerminalStates = TerminalStates {
    success: &["running"],
    failure: &["shutting-down", "terminated"],
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub internal_id: Option<Uuid>,
    /// Provider-assigned.
    #[serde(default)]
    pub instance_id: Option<String>,
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    /// Security group name.
    pub security_group: String,
    pub volume_size_gb: i64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Server-generated.
    #[serde(default)]
    pub state: Option<String>,
}

impl Instance {
    pub fn new(name: &str, image_id: &str, instance_type: &str, security_group: &str) -> Self {
        Self {
            internal_id: None,
            instance_id: None,
            name: name.to_string(),
            image_id: image_id.to_string(),
            instance_type: instance_type.to_string(),
            security_group: security_group.to_string(),
            volume_size_gb: 8,
            tags: BTreeMap::new(),
            state: None,
        }
    }

    /// Provider tag set: user tags plus the name tag.
    fn provider_tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        tags.insert(NAME_TAG.to_string(), self.name.clone());
        tags
    }
}

impl Record for Instance {
    fn internal_id(&self) -> Option<Uuid> {
        self.internal_id
    }

    fn set_internal_id(&mut self, id: Option<Uuid>) {
        self.internal_id = id;
    }

    fn natural_id(&self) -> Option<String> {
        self.instance_id.clone()
    }
}

// ---------------------------------------------------------------------------
// Provider-asynchronous helpers
// ---------------------------------------------------------------------------

async fn wait_running(
    sim: &SimCloud,
    scope: &Scope,
    waiter: &WaiterConfig,
    instance_id: &str,
) -> Result<SimInstance, AdapterError> {
    wait_until(waiter, "wait_running", || {
        let polled = match sim.describe_instance(scope, instance_id) {
            Ok(Some(i)) => {
                let state = i.state.clone();
                Ok(LAUNCH.classify(&state, i))
            }
            Ok(None) => Ok(WaitState::Failed(format!("instance '{instance_id}' vanished"))),
            Err(e) => Err(e),
        };
        ready(polled)
    })
    .await
}

/// Terminate and block until the provider reports the instance gone.
async fn terminate_and_wait(
    sim: &SimCloud,
    scope: &Scope,
    waiter: &WaiterConfig,
    instance_id: &str,
) -> Result<(), AdapterError> {
    sim.terminate_instance(scope, instance_id)
        .map_err(|e| e.at_step("terminate_instance"))?;
    wait_until(waiter, "wait_terminated", || {
        let polled = match sim.describe_instance(scope, instance_id) {
            Ok(None) => Ok(WaitState::Done(())),
            Ok(Some(i)) if i.state == "terminated" => Ok(WaitState::Done(())),
            Ok(Some(_)) => Ok(WaitState::Pending),
            Err(e) => Err(e),
        };
        ready(polled)
    })
    .await
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct InstanceCloud {
    sim: SimCloud,
    groups: Arc<SecurityGroupMapper>,
}

impl InstanceCloud {
    async fn resolve_group(&self, ctx: &Context, name: &str) -> Result<String, AdapterError> {
        ctx.memo(self.groups.as_ref())
            .cloud_list()
            .await?
            .into_iter()
            .filter(|g| g.name == name)
            .filter_map(|g| g.group_id)
            .max()
            .ok_or_else(|| {
                AdapterError::dependency_not_ready(format!("security group '{name}' does not exist yet"))
            })
    }

    fn to_record(&self, scope: &Scope, i: SimInstance) -> Result<Instance, AdapterError> {
        let group = self
            .sim
            .list_groups(scope)?
            .into_iter()
            .find(|g| g.group_id == i.group_id)
            .map(|g| g.name)
            .unwrap_or_else(|| i.group_id.clone());
        let size = match &i.volume_id {
            Some(vid) => self
                .sim
                .list_volumes(scope)?
                .into_iter()
                .find(|v| &v.volume_id == vid)
                .map_or(0, |v| v.size_gb),
            None => 0,
        };
        let mut tags = i.tags;
        let name = tags.remove(NAME_TAG).unwrap_or_default();
        Ok(Instance {
            internal_id: None,
            instance_id: Some(i.instance_id),
            name,
            image_id: i.image_id,
            instance_type: i.instance_type,
            security_group: group,
            volume_size_gb: size,
            tags,
            state: Some(i.state),
        })
    }

    async fn launch(&self, r: &Instance, ctx: &Context) -> Result<Instance, AdapterError> {
        let group_id = self.resolve_group(ctx, &r.security_group).await?;
        let scope = &ctx.scope;
        let mut undo = UndoStack::new();

        let vol = self
            .sim
            .create_volume(scope, r.volume_size_gb)
            .map_err(|e| e.at_step("create_volume"))?;
        {
            let (sim, scope, vid) = (self.sim.clone(), scope.clone(), vol.volume_id.clone());
            undo.push("create_volume", move || async move { sim.delete_volume(&scope, &vid) });
        }

        let launched = match self.sim.run_instance(
            scope,
            &r.image_id,
            &r.instance_type,
            &group_id,
            Some(&vol.volume_id),
        ) {
            Ok(i) => i,
            Err(e) => return Err(undo.fail(e.at_step("run_instance")).await),
        };
        {
            let (sim, scope, iid) = (self.sim.clone(), scope.clone(), launched.instance_id.clone());
            let waiter = ctx.waiter;
            undo.push("run_instance", move || async move {
                terminate_and_wait(&sim, &scope, &waiter, &iid).await
            });
        }

        let mut running = match wait_running(&self.sim, scope, &ctx.waiter, &launched.instance_id).await {
            Ok(i) => i,
            Err(e) => return Err(undo.fail(e).await),
        };

        let tags = r.provider_tags();
        if let Err(e) = self.sim.create_tags(scope, &running.instance_id, &tags) {
            return Err(undo.fail(e.at_step("create_tags")).await);
        }
        undo.commit();
        debug!(instance_id = %running.instance_id, name = %r.name, "instance launched");

        running.tags = tags;
        self.to_record(scope, running)
    }
}

#[async_trait::async_trait]
impl CloudAdapter<Instance> for InstanceCloud {
    async fn read(&self, ctx: &Context, id: Option<&str>) -> Result<Vec<Instance>, AdapterError> {
        self.sim
            .list_instances(&ctx.scope)?
            .into_iter()
            .filter(|i| id.map_or(true, |id| i.instance_id == id))
            .map(|i| self.to_record(&ctx.scope, i))
            .collect()
    }

    async fn create(&self, records: &[Instance], ctx: &Context) -> Result<Vec<Instance>, AdapterError> {
        let mut out = Vec::with_capacity(records.len());
        for r in records {
            out.push(self.launch(r, ctx).await?);
        }
        Ok(out)
    }

    /// Name and tags are the only in-place mutable fields.
    async fn update(&self, records: &[Instance], ctx: &Context) -> Result<Vec<Instance>, AdapterError> {
        let mut out = Vec::with_capacity(records.len());
        for r in records {
            let Some(instance_id) = r.instance_id.as_deref() else {
                return Err(AdapterError::validation(format!(
                    "instance '{}' has no instance id to update",
                    r.name
                )));
            };
            self.sim
                .create_tags(&ctx.scope, instance_id, &r.provider_tags())
                .map_err(|e| e.at_step("create_tags"))?;
            out.push(r.clone());
        }
        Ok(out)
    }

    async fn delete(&self, records: &[Instance], ctx: &Context) -> Result<(), AdapterError> {
        for r in records {
            let Some(instance_id) = r.instance_id.as_deref() else {
                continue;
            };
            let volume_id = self
                .sim
                .describe_instance(&ctx.scope, instance_id)?
                .and_then(|i| i.volume_id);
            terminate_and_wait(&self.sim, &ctx.scope, &ctx.waiter, instance_id).await?;
            if let Some(vid) = volume_id {
                self.sim
                    .delete_volume(&ctx.scope, &vid)
                    .map_err(|e| e.at_step("delete_volume"))?;
            }
        }
        Ok(())
    }
}

pub struct InstanceMapper {
    cloud: InstanceCloud,
    db: Arc<dyn RecordStore<Instance>>,
}

impl InstanceMapper {
    pub fn new(sim: SimCloud, groups: Arc<SecurityGroupMapper>, db: Arc<dyn RecordStore<Instance>>) -> Self {
        Self {
            cloud: InstanceCloud { sim, groups },
            db,
        }
    }
}

impl Mapper for InstanceMapper {
    type Record = Instance;

    fn module(&self) -> &'static str {
        MODULE
    }

    fn kind(&self) -> &'static str {
        "instance"
    }

    fn equals(&self, a: &Instance, b: &Instance) -> bool {
        a.instance_id == b.instance_id
            && a.name == b.name
            && a.image_id == b.image_id
            && a.instance_type == b.instance_type
            && a.security_group == b.security_group
            && a.volume_size_gb == b.volume_size_gb
            && a.tags == b.tags
    }

    fn update_or_replace(&self, observed: &Instance, desired: &Instance) -> UpdateOrReplace {
        let immutable_changed = observed.image_id != desired.image_id
            || observed.instance_type != desired.instance_type
            || observed.security_group != desired.security_group
            || observed.volume_size_gb != desired.volume_size_gb;
        if immutable_changed {
            UpdateOrReplace::Replace
        } else {
            UpdateOrReplace::Update
        }
    }

    fn cloud(&self) -> &dyn CloudAdapter<Instance> {
        &self.cloud
    }

    fn db(&self) -> &dyn RecordStore<Instance> {
        self.db.as_ref()
    }
}

pub fn module<F: StoreFactory>(sim: &SimCloud, stores: &F, groups: Arc<SecurityGroupMapper>) -> ModuleDef {
    ModuleDef::new(MODULE, "0.1.0")
        .depends_on(&[crate::network::MODULE])
        .with_mapper(Arc::new(InstanceMapper::new(
            sim.clone(),
            groups,
            stores.store(MODULE, "instance"),
        )))
}
