//! Network module: security groups and a read-only mirror of the region's
//! availability zones.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skr_mapper::{
    AdapterError, CloudAdapter, Context, Mapper, ModuleDef, Record, RecordStore, Source, StoreFactory,
    UpdateOrReplace,
};
use uuid::Uuid;

use crate::cloud::{SimCloud, SimGroup, DEFAULT_GROUP};

pub const MODULE: &str = "network";

// ---------------------------------------------------------------------------
// Security groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    #[serde(default)]
    pub internal_id: Option<Uuid>,
    /// Provider-assigned.
    #[serde(default)]
    pub group_id: Option<String>,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl SecurityGroup {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            internal_id: None,
            group_id: None,
            name: name.to_string(),
            description: description.to_string(),
            tags: BTreeMap::new(),
        }
    }

    fn from_sim(g: SimGroup) -> Self {
        Self {
            internal_id: None,
            group_id: Some(g.group_id),
            name: g.name,
            description: g.description,
            tags: g.tags,
        }
    }
}

impl Record for SecurityGroup {
    fn internal_id(&self) -> Option<Uuid> {
        self.internal_id
    }

    fn set_internal_id(&mut self, id: Option<Uuid>) {
        self.internal_id = id;
    }

    fn natural_id(&self) -> Option<String> {
        self.group_id.clone()
    }
}

pub struct GroupCloud {
    sim: SimCloud,
}

#[async_trait::async_trait]
impl CloudAdapter<SecurityGroup> for GroupCloud {
    async fn read(&self, ctx: &Context, id: Option<&str>) -> Result<Vec<SecurityGroup>, AdapterError> {
        Ok(self
            .sim
            .list_groups(&ctx.scope)?
            .into_iter()
            .filter(|g| id.map_or(true, |id| g.group_id == id))
            .map(SecurityGroup::from_sim)
            .collect())
    }

    async fn create(&self, records: &[SecurityGroup], ctx: &Context) -> Result<Vec<SecurityGroup>, AdapterError> {
        let mut out = Vec::with_capacity(records.len());
        for r in records {
            let g = self
                .sim
                .create_group(&ctx.scope, &r.name, &r.description, &r.tags)
                .map_err(|e| e.at_step("create_security_group"))?;
            out.push(SecurityGroup::from_sim(g));
        }
        Ok(out)
    }

    /// Only tags are mutable in place; everything else is a replace.
    async fn update(&self, records: &[SecurityGroup], ctx: &Context) -> Result<Vec<SecurityGroup>, AdapterError> {
        let mut out = Vec::with_capacity(records.len());
        for r in records {
            let Some(group_id) = r.group_id.as_deref() else {
                return Err(AdapterError::validation(format!(
                    "security group '{}' has no group id to update",
                    r.name
                )));
            };
            self.sim
                .set_group_tags(&ctx.scope, group_id, &r.tags)
                .map_err(|e| e.at_step("set_security_group_tags"))?;
            out.push(r.clone());
        }
        Ok(out)
    }

    async fn delete(&self, records: &[SecurityGroup], ctx: &Context) -> Result<(), AdapterError> {
        for r in records {
            if let Some(group_id) = r.group_id.as_deref() {
                self.sim
                    .delete_group(&ctx.scope, group_id)
                    .map_err(|e| e.at_step("delete_security_group"))?;
            }
        }
        Ok(())
    }
}

pub struct SecurityGroupMapper {
    cloud: GroupCloud,
    db: Arc<dyn RecordStore<SecurityGroup>>,
}

impl SecurityGroupMapper {
    pub fn new(sim: SimCloud, db: Arc<dyn RecordStore<SecurityGroup>>) -> Self {
        Self {
            cloud: GroupCloud { sim },
            db,
        }
    }
}

impl Mapper for SecurityGroupMapper {
    type Record = SecurityGroup;

    fn module(&self) -> &'static str {
        MODULE
    }

    fn kind(&self) -> &'static str {
        "security_group"
    }

    fn equals(&self, a: &SecurityGroup, b: &SecurityGroup) -> bool {
        a.group_id == b.group_id && a.name == b.name && a.description == b.description && a.tags == b.tags
    }

    fn update_or_replace(&self, observed: &SecurityGroup, desired: &SecurityGroup) -> UpdateOrReplace {
        if observed.name != desired.name || observed.description != desired.description {
            UpdateOrReplace::Replace
        } else {
            UpdateOrReplace::Update
        }
    }

    fn is_reserved(&self, observed: &SecurityGroup) -> bool {
        observed.name == DEFAULT_GROUP
    }

    fn reserved_key(&self, r: &SecurityGroup) -> Option<String> {
        Some(r.name.clone())
    }

    fn cloud(&self) -> &dyn CloudAdapter<SecurityGroup> {
        &self.cloud
    }

    fn db(&self) -> &dyn RecordStore<SecurityGroup> {
        self.db.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Availability zones (read-only mirror)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityZone {
    #[serde(default)]
    pub internal_id: Option<Uuid>,
    pub name: String,
}

impl Record for AvailabilityZone {
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

pub struct ZoneCloud {
    sim: SimCloud,
}

#[async_trait::async_trait]
impl CloudAdapter<AvailabilityZone> for ZoneCloud {
    async fn read(&self, ctx: &Context, id: Option<&str>) -> Result<Vec<AvailabilityZone>, AdapterError> {
        Ok(self
            .sim
            .list_zones(&ctx.scope)?
            .into_iter()
            .filter(|z| id.map_or(true, |id| z == id))
            .map(|name| AvailabilityZone {
                internal_id: None,
                name,
            })
            .collect())
    }

    async fn create(&self, _: &[AvailabilityZone], _: &Context) -> Result<Vec<AvailabilityZone>, AdapterError> {
        Err(AdapterError::validation("availability zones are provider-managed"))
    }

    async fn update(&self, _: &[AvailabilityZone], _: &Context) -> Result<Vec<AvailabilityZone>, AdapterError> {
        Err(AdapterError::validation("availability zones are provider-managed"))
    }

    async fn delete(&self, _: &[AvailabilityZone], _: &Context) -> Result<(), AdapterError> {
        Err(AdapterError::validation("availability zones are provider-managed"))
    }
}

pub struct ZoneMapper {
    cloud: ZoneCloud,
    db: Arc<dyn RecordStore<AvailabilityZone>>,
}

impl Mapper for ZoneMapper {
    type Record = AvailabilityZone;

    fn module(&self) -> &'static str {
        MODULE
    }

    fn kind(&self) -> &'static str {
        "availability_zone"
    }

    fn equals(&self, a: &AvailabilityZone, b: &AvailabilityZone) -> bool {
        a.name == b.name
    }

    fn source(&self) -> Source {
        Source::Cloud
    }

    fn cloud(&self) -> &dyn CloudAdapter<AvailabilityZone> {
        &self.cloud
    }

    fn db(&self) -> &dyn RecordStore<AvailabilityZone> {
        self.db.as_ref()
    }
}

/// `groups` is shared with the compute module, which resolves group names
/// through it.
pub fn module<F: StoreFactory>(sim: &SimCloud, stores: &F, groups: Arc<SecurityGroupMapper>) -> ModuleDef {
    ModuleDef::new(MODULE, "0.1.0")
        .with_mapper(Arc::new(ZoneMapper {
            cloud: ZoneCloud { sim: sim.clone() },
            db: stores.store(MODULE, "availability_zone"),
        }))
        .with_mapper(groups)
}
