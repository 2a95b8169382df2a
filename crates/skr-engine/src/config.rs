use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value;
use skr_mapper::{RetryPolicy, WaiterConfig};
use skr_reconcile::DEFAULT_STALL_LIMIT;

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Pass ceiling. Reaching it with work left is a convergence failure.
    pub max_passes: u32,
    /// Identical diff counts this many passes in a row is a stall.
    pub stall_limit: usize,
    /// Bounded worker pool for the read fan-out at the start of each pass.
    pub read_workers: usize,
    /// Pause before the next pass when the current one deferred work.
    pub pass_delay: Duration,
    pub retry: RetryPolicy,
    pub waiter: WaiterConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_passes: 20,
            stall_limit: DEFAULT_STALL_LIMIT,
            read_workers: 8,
            pass_delay: Duration::from_millis(250),
            retry: RetryPolicy::default(),
            waiter: WaiterConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build from canonical config JSON (produced by skr-config). Every key
    /// is optional and falls back to the default.
    ///
    /// - engine.max_passes (1..=1000)
    /// - engine.stall_limit (>= 1)
    /// - engine.read_workers (1..=256)
    /// - engine.pass_delay_ms
    /// - retry.max_attempts (>= 1), retry.backoff_ms
    /// - waiter.poll_interval_ms, waiter.max_wait_ms
    pub fn from_config_json(cfg: &Value) -> Result<Self> {
        let d = Self::default();

        let max_passes = read_u64(cfg, "/engine/max_passes")?.unwrap_or(d.max_passes as u64);
        if !(1..=1000).contains(&max_passes) {
            return Err(anyhow!("engine.max_passes out of bounds (1..=1000): {max_passes}"));
        }

        let stall_limit = read_u64(cfg, "/engine/stall_limit")?.unwrap_or(d.stall_limit as u64);
        if stall_limit == 0 {
            return Err(anyhow!("engine.stall_limit must be >= 1"));
        }

        let read_workers = read_u64(cfg, "/engine/read_workers")?.unwrap_or(d.read_workers as u64);
        if !(1..=256).contains(&read_workers) {
            return Err(anyhow!("engine.read_workers out of bounds (1..=256): {read_workers}"));
        }

        let pass_delay = read_ms(cfg, "/engine/pass_delay_ms")?.unwrap_or(d.pass_delay);

        let max_attempts = read_u64(cfg, "/retry/max_attempts")?.unwrap_or(d.retry.max_attempts as u64);
        if max_attempts == 0 || max_attempts > u32::MAX as u64 {
            return Err(anyhow!("retry.max_attempts out of bounds: {max_attempts}"));
        }
        let backoff = read_ms(cfg, "/retry/backoff_ms")?.unwrap_or(d.retry.backoff);

        let poll_interval = read_ms(cfg, "/waiter/poll_interval_ms")?.unwrap_or(d.waiter.poll_interval);
        let max_wait = read_ms(cfg, "/waiter/max_wait_ms")?.unwrap_or(d.waiter.max_wait);
        if max_wait < poll_interval {
            return Err(anyhow!(
                "waiter.max_wait_ms ({}) must be >= waiter.poll_interval_ms ({})",
                max_wait.as_millis(),
                poll_interval.as_millis()
            ));
        }

        Ok(Self {
            max_passes: max_passes as u32,
            stall_limit: stall_limit as usize,
            read_workers: read_workers as usize,
            pass_delay,
            retry: RetryPolicy::new(max_attempts as u32, backoff),
            waiter: WaiterConfig {
                poll_interval,
                max_wait,
            },
        })
    }
}

/// Accept a non-negative integer or a numeric string.
fn read_u64(cfg: &Value, pointer: &str) -> Result<Option<u64>> {
    match cfg.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| anyhow!("config {pointer} must be a non-negative integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("config {pointer} must be a non-negative integer (got '{s}')")),
        Some(other) => Err(anyhow!("config {pointer} must be a non-negative integer (got {other})")),
    }
}

fn read_ms(cfg: &Value, pointer: &str) -> Result<Option<Duration>> {
    Ok(read_u64(cfg, pointer)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_config_yields_defaults() {
        assert_eq!(EngineConfig::from_config_json(&json!({})).unwrap(), EngineConfig::default());
    }

    #[test]
    fn values_are_read_by_pointer() {
        let cfg = json!({
            "engine": { "max_passes": 7, "read_workers": "2", "pass_delay_ms": 0 },
            "retry": { "max_attempts": 3, "backoff_ms": 10 },
            "waiter": { "poll_interval_ms": 5, "max_wait_ms": 50 }
        });
        let c = EngineConfig::from_config_json(&cfg).unwrap();
        assert_eq!(c.max_passes, 7);
        assert_eq!(c.read_workers, 2);
        assert_eq!(c.pass_delay, Duration::ZERO);
        assert_eq!(c.retry, RetryPolicy::new(3, Duration::from_millis(10)));
        assert_eq!(c.waiter.max_polls(), 10);
    }

    #[test]
    fn out_of_bounds_values_are_rejected() {
        assert!(EngineConfig::from_config_json(&json!({"engine": {"max_passes": 0}})).is_err());
        assert!(EngineConfig::from_config_json(&json!({"engine": {"read_workers": -1}})).is_err());
        assert!(EngineConfig::from_config_json(&json!({"waiter": {"poll_interval_ms": 10, "max_wait_ms": 1}})).is_err());
        assert!(EngineConfig::from_config_json(&json!({"retry": {"max_attempts": "many"}})).is_err());
    }
}
