//! Scenario: the read fan-out that opens every pass keeps at most
//! `read_workers` cloud reads in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skr_engine::{Engine, EngineConfig};
use skr_mapper::*;
use skr_schemas::Scope;
use uuid::Uuid;

const KINDS: [&str; 6] = ["alpha", "bravo", "charlie", "delta", "echo", "foxtrot"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Queue {
    internal_id: Option<Uuid>,
    name: String,
}

impl Record for Queue {
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

/// Tracks how many reads are in flight across every mapper sharing it.
#[derive(Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct SlowCloud {
    gauge: Arc<Gauge>,
}

#[async_trait::async_trait]
impl CloudAdapter<Queue> for SlowCloud {
    async fn read(&self, _ctx: &Context, _id: Option<&str>) -> Result<Vec<Queue>, AdapterError> {
        let now = self.gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn create(&self, records: &[Queue], _ctx: &Context) -> Result<Vec<Queue>, AdapterError> {
        Ok(records.to_vec())
    }

    async fn update(&self, records: &[Queue], _ctx: &Context) -> Result<Vec<Queue>, AdapterError> {
        Ok(records.to_vec())
    }

    async fn delete(&self, _records: &[Queue], _ctx: &Context) -> Result<(), AdapterError> {
        Ok(())
    }
}

struct QueueMapper {
    kind: &'static str,
    cloud: SlowCloud,
    db: MemoryStore<Queue>,
}

impl Mapper for QueueMapper {
    type Record = Queue;

    fn module(&self) -> &'static str {
        "queues"
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    fn equals(&self, a: &Queue, b: &Queue) -> bool {
        a.name == b.name
    }

    fn cloud(&self) -> &dyn CloudAdapter<Queue> {
        &self.cloud
    }

    fn db(&self) -> &dyn RecordStore<Queue> {
        &self.db
    }
}

fn engine(read_workers: usize, gauge: &Arc<Gauge>) -> anyhow::Result<Engine> {
    let mut def = ModuleDef::new("queues", "0.1.0");
    for kind in KINDS {
        def = def.with_mapper(Arc::new(QueueMapper {
            kind,
            cloud: SlowCloud {
                gauge: Arc::clone(gauge),
            },
            db: MemoryStore::new(),
        }));
    }
    let config = EngineConfig {
        read_workers,
        pass_delay: Duration::ZERO,
        ..EngineConfig::default()
    };
    Ok(Engine::new(
        Arc::new(Registry::new(vec![def])?),
        Arc::new(MemoryModuleStore::new()),
        config,
    ))
}

#[tokio::test]
async fn reads_never_exceed_the_worker_bound() -> anyhow::Result<()> {
    let gauge = Arc::new(Gauge::default());
    let engine = engine(2, &gauge)?;
    let scope = Scope::new("123456789012", "us-east-1");

    engine.install(&["queues"], &scope).await?;
    engine.apply(&scope).await?;

    assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    assert_eq!(gauge.in_flight.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn reads_fan_out_up_to_the_mapper_count() -> anyhow::Result<()> {
    let gauge = Arc::new(Gauge::default());
    let engine = engine(16, &gauge)?;
    let scope = Scope::new("123456789012", "us-east-1");

    engine.install(&["queues"], &scope).await?;
    engine.apply(&scope).await?;

    assert_eq!(gauge.peak.load(Ordering::SeqCst), KINDS.len());
    Ok(())
}
