//! skr-sim
//!
//! Deterministic simulated provider plus the resource modules built on it:
//! - storage: buckets, mirrored bucket objects, `upload_objects` RPC
//! - iam: roles
//! - network: security groups (reserved `default` group), mirrored zones
//! - compute: instances (multi-step launch with compensation), depends on network
//!
//! Fault injection (throttling, propagation lag, slow launches, step
//! failures) lives on `SimCloud` so tests and the CLI can drive every
//! engine path without a real provider.

use std::sync::Arc;

use serde_json::Value;
use skr_mapper::{ModuleDef, Registry, RegistryError, StoreFactory};

pub mod cloud;
pub mod compute;
pub mod iam;
pub mod network;
pub mod storage;

pub use cloud::{CallHook, RegionState, SimCloud, DEFAULT_GROUP};

/// Every module this provider offers, in declaration order.
pub fn catalog<F: StoreFactory>(sim: &SimCloud, stores: &F) -> Vec<ModuleDef> {
    let groups = Arc::new(network::SecurityGroupMapper::new(
        sim.clone(),
        stores.store(network::MODULE, "security_group"),
    ));
    vec![
        storage::module(sim, stores),
        iam::module(sim, stores),
        network::module(sim, stores, Arc::clone(&groups)),
        compute::module(sim, stores, groups),
    ]
}

pub fn registry<F: StoreFactory>(sim: &SimCloud, stores: &F) -> Result<Registry, RegistryError> {
    Registry::new(catalog(sim, stores))
}

/// JSON documents compare structurally; anything unparsable compares as text.
pub(crate) fn same_json(a: &str, b: &str) -> bool {
    match (serde_json::from_str::<Value>(a), serde_json::from_str::<Value>(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}
