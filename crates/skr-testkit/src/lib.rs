//! skr-testkit
//!
//! End-to-end harness: the full module catalog over the simulated provider,
//! in-memory Record Stores with typed handles for seeding and inspection,
//! and an engine tuned for fast, deterministic scenario runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use skr_engine::{Engine, EngineConfig, InstallReport};
use skr_mapper::{MemoryModuleStore, MemoryStore, MemoryStoreFactory, Record, RetryPolicy, WaiterConfig};
use skr_schemas::Scope;
use skr_sim::compute::Instance;
use skr_sim::iam::Role;
use skr_sim::network::{AvailabilityZone, SecurityGroup};
use skr_sim::storage::{Bucket, BucketObject};
use skr_sim::{compute, iam, network, storage, SimCloud};

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-1";

/// Engine settings for scenarios: no sleeps worth noticing, small ceilings.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        max_passes: 10,
        stall_limit: 4,
        read_workers: 4,
        pass_delay: Duration::ZERO,
        retry: RetryPolicy::new(3, Duration::ZERO),
        waiter: WaiterConfig {
            poll_interval: Duration::from_millis(1),
            max_wait: Duration::from_millis(20),
        },
    }
}

pub struct Harness {
    pub sim: SimCloud,
    pub engine: Engine,
    pub scope: Scope,
    stores: MemoryStoreFactory,
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        let sim = SimCloud::new();
        let stores = MemoryStoreFactory::new();
        let registry = skr_sim::registry(&sim, &stores)?;
        let engine = Engine::new(Arc::new(registry), Arc::new(MemoryModuleStore::new()), config);
        Ok(Self {
            sim,
            engine,
            scope: Scope::new(ACCOUNT, REGION),
            stores,
        })
    }

    /// Scope in another region of the same account.
    pub fn scope_for(&self, region: &str) -> Scope {
        Scope::new(ACCOUNT, region)
    }

    pub async fn install(&self, modules: &[&str]) -> Result<InstallReport> {
        Ok(self.engine.install(modules, &self.scope).await?)
    }

    fn store<R: Record>(&self, module: &'static str, kind: &'static str) -> Arc<MemoryStore<R>> {
        self.stores.handle::<R>(module, kind)
    }

    pub fn buckets(&self) -> Arc<MemoryStore<Bucket>> {
        self.store(storage::MODULE, "bucket")
    }

    pub fn objects(&self) -> Arc<MemoryStore<BucketObject>> {
        self.store(storage::MODULE, "bucket_object")
    }

    pub fn roles(&self) -> Arc<MemoryStore<Role>> {
        self.store(iam::MODULE, "role")
    }

    pub fn groups(&self) -> Arc<MemoryStore<SecurityGroup>> {
        self.store(network::MODULE, "security_group")
    }

    pub fn zones(&self) -> Arc<MemoryStore<AvailabilityZone>> {
        self.store(network::MODULE, "availability_zone")
    }

    pub fn instances(&self) -> Arc<MemoryStore<Instance>> {
        self.store(compute::MODULE, "instance")
    }

    /// Desired security group by name, if stored.
    pub fn group_named(&self, name: &str) -> Option<SecurityGroup> {
        self.groups().all(&self.scope).into_iter().find(|g| g.name == name)
    }

    pub fn instance_named(&self, name: &str) -> Option<Instance> {
        self.instances().all(&self.scope).into_iter().find(|i| i.name == name)
    }

    /// Position of the first ops-log entry starting with `prefix`.
    pub fn op_index(&self, prefix: &str) -> Option<usize> {
        self.sim.ops().iter().position(|op| op.starts_with(prefix))
    }

    pub fn ops_matching(&self, prefix: &str) -> Vec<String> {
        self.sim
            .ops()
            .into_iter()
            .filter(|op| op.starts_with(prefix))
            .collect()
    }
}

/// A small read-only role policy document.
pub fn policy(action: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{"Effect": "Allow", "Action": action, "Resource": "*"}]
    })
    .to_string()
}
