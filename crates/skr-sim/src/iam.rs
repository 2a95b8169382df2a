//! IAM module: roles with an inline policy document.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skr_mapper::{AdapterError, CloudAdapter, Context, Mapper, ModuleDef, Record, RecordStore, StoreFactory};
use uuid::Uuid;

use crate::cloud::{SimCloud, SimRole};
use crate::same_json;

pub const MODULE: &str = "iam";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub internal_id: Option<Uuid>,
    pub name: String,
    /// Provider-assigned; unknown until the first create.
    #[serde(default)]
    pub arn: Option<String>,
    pub policy_document: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Role {
    pub fn new(name: &str, policy_document: &str) -> Self {
        Self {
            internal_id: None,
            name: name.to_string(),
            arn: None,
            policy_document: policy_document.to_string(),
            description: None,
        }
    }

    fn from_sim(r: SimRole) -> Self {
        Self {
            internal_id: None,
            name: r.name,
            arn: Some(r.arn),
            policy_document: r.policy_document,
            description: r.description,
        }
    }
}

impl Record for Role {
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

pub struct RoleCloud {
    sim: SimCloud,
}

#[async_trait::async_trait]
impl CloudAdapter<Role> for RoleCloud {
    async fn read(&self, ctx: &Context, id: Option<&str>) -> Result<Vec<Role>, AdapterError> {
        Ok(self
            .sim
            .list_roles(&ctx.scope)?
            .into_iter()
            .filter(|r| id.map_or(true, |id| r.name == id))
            .map(Role::from_sim)
            .collect())
    }

    async fn create(&self, records: &[Role], ctx: &Context) -> Result<Vec<Role>, AdapterError> {
        let mut out = Vec::with_capacity(records.len());
        for r in records {
            let created = self
                .sim
                .create_role(&ctx.scope, &r.name, &r.policy_document, r.description.as_deref())
                .map_err(|e| e.at_step("create_role"))?;
            out.push(Role::from_sim(created));
        }
        Ok(out)
    }

    async fn update(&self, records: &[Role], ctx: &Context) -> Result<Vec<Role>, AdapterError> {
        let current: BTreeMap<String, SimRole> = self
            .sim
            .list_roles(&ctx.scope)?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();
        let mut out = Vec::with_capacity(records.len());
        for r in records {
            let Some(cur) = current.get(&r.name) else {
                return Err(AdapterError::dependency_not_ready(format!(
                    "role '{}' disappeared before update",
                    r.name
                )));
            };
            if !same_json(&cur.policy_document, &r.policy_document) {
                self.sim
                    .update_role_policy(&ctx.scope, &r.name, &r.policy_document)
                    .map_err(|e| e.at_step("update_role_policy"))?;
            }
            if cur.description != r.description {
                self.sim
                    .update_role_description(&ctx.scope, &r.name, r.description.as_deref())
                    .map_err(|e| e.at_step("update_role_description"))?;
            }
            out.push(Role {
                arn: Some(cur.arn.clone()),
                ..r.clone()
            });
        }
        Ok(out)
    }

    async fn delete(&self, records: &[Role], ctx: &Context) -> Result<(), AdapterError> {
        for r in records {
            self.sim
                .delete_role(&ctx.scope, &r.name)
                .map_err(|e| e.at_step("delete_role"))?;
        }
        Ok(())
    }
}

pub struct RoleMapper {
    cloud: RoleCloud,
    db: Arc<dyn RecordStore<Role>>,
}

impl RoleMapper {
    pub fn new(sim: SimCloud, db: Arc<dyn RecordStore<Role>>) -> Self {
        Self {
            cloud: RoleCloud { sim },
            db,
        }
    }
}

impl Mapper for RoleMapper {
    type Record = Role;

    fn module(&self) -> &'static str {
        MODULE
    }

    fn kind(&self) -> &'static str {
        "role"
    }

    /// The ARN only counts once both sides know it.
    fn equals(&self, a: &Role, b: &Role) -> bool {
        let arn_matches = match (&a.arn, &b.arn) {
            (Some(x), Some(y)) => x == y,
            _ => true,
        };
        a.name == b.name
            && arn_matches
            && a.description == b.description
            && same_json(&a.policy_document, &b.policy_document)
    }

    fn cloud(&self) -> &dyn CloudAdapter<Role> {
        &self.cloud
    }

    fn db(&self) -> &dyn RecordStore<Role> {
        self.db.as_ref()
    }
}

pub fn module<F: StoreFactory>(sim: &SimCloud, stores: &F) -> ModuleDef {
    ModuleDef::new(MODULE, "0.1.0")
        .with_mapper(Arc::new(RoleMapper::new(sim.clone(), stores.store(MODULE, "role"))))
}
