//! RPC invoker.
//!
//! Runs a named one-shot action against the cloud, then mirrors the owning
//! module's cloud state into the Record Store with a sync run. The mirror
//! runs whether the call succeeded or not, so a call that fails midway still
//! leaves the store consistent with what actually happened in the cloud.

use std::collections::BTreeSet;

use serde_json::Value;
use skr_mapper::{bind_args, validate_rows};
use skr_schemas::{Direction, Scope};
use tracing::{info, warn};

use crate::{Engine, EngineError, RpcOutcome};

impl Engine {
    pub async fn invoke_rpc(
        &self,
        scope: &Scope,
        module: &str,
        name: &str,
        args: Vec<Value>,
    ) -> Result<RpcOutcome, EngineError> {
        let rpc = self
            .registry
            .rpc(module, name)
            .ok_or_else(|| EngineError::RpcNotFound {
                module: module.to_string(),
                name: name.to_string(),
            })?;
        let label = format!("{module}.{name}");

        let _guard = self.locks.acquire(scope).await;
        if !self.installed(scope).await?.contains(module) {
            return Err(EngineError::NotInstalled {
                scope: scope.clone(),
                modules: vec![module.to_string()],
            });
        }

        let args = bind_args(rpc.params(), args).map_err(|message| EngineError::RpcArguments {
            rpc: label.clone(),
            message,
        })?;

        let ctx = self.context(scope, Direction::Apply);
        info!(run_id = %ctx.run_id, scope = %scope, rpc = %label, "rpc call");
        let result = rpc.call(&ctx, &args).await;

        let only: BTreeSet<String> = [module.to_string()].into_iter().collect();
        let mirror = self.run_locked(scope, Direction::Sync, Some(&only)).await;

        match (result, mirror) {
            (Err(error), mirror) => {
                warn!(rpc = %label, error = %error, "rpc failed, store mirrored from cloud");
                Err(EngineError::Rpc {
                    rpc: label,
                    error,
                    mirror: mirror.ok().map(Box::new),
                })
            }
            (Ok(_), Err(e)) => Err(EngineError::Mirror {
                rpc: label,
                source: Box::new(e),
            }),
            (Ok(rows), Ok(report)) => {
                validate_rows(rpc.output(), &rows)
                    .map_err(|message| EngineError::RpcOutput {
                        rpc: label.clone(),
                        message,
                    })?;
                info!(rpc = %label, rows = rows.len(), mirrored = report.total_changes(), "rpc done");
                Ok(RpcOutcome {
                    rows,
                    mirror: report,
                })
            }
        }
    }
}
