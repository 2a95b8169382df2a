//! Module listing and RPC argument coercion.

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use serde_json::Value;
use skr_mapper::Registry;

fn joined<I: IntoIterator<Item = String>>(items: I) -> String {
    let v: Vec<String> = items.into_iter().collect();
    if v.is_empty() {
        "-".to_string()
    } else {
        v.join(",")
    }
}

/// One line per module in dependency order.
pub fn module_lines(registry: &Registry, installed: Option<&BTreeSet<String>>) -> Vec<String> {
    registry
        .order()
        .iter()
        .filter_map(|name| registry.get(name))
        .map(|def| {
            let mut line = format!(
                "module={} version={} depends_on={} kinds={} rpcs={}",
                def.name,
                def.version,
                joined(def.dependencies.iter().map(|d| d.to_string())),
                joined(def.mappers.iter().map(|m| m.kind_name().to_string())),
                joined(def.rpcs.iter().map(|r| {
                    let params: Vec<&str> = r.params().iter().map(|p| p.name).collect();
                    format!("{}({})", r.name(), params.join(" "))
                })),
            );
            if let Some(set) = installed {
                line.push_str(&format!(" installed={}", set.contains(def.name)));
            }
            line
        })
        .collect()
}

/// Command-line RPC arguments arrive as text; coerce each one to its
/// declared parameter type. Unknown RPCs and surplus arguments pass through
/// as strings so the engine reports them.
pub fn coerce_rpc_args(registry: &Registry, module: &str, name: &str, raw: &[String]) -> Result<Vec<Value>> {
    let Some(rpc) = registry.rpc(module, name) else {
        return Ok(raw.iter().map(|s| Value::String(s.clone())).collect());
    };
    let params = rpc.params();
    let mut out = Vec::with_capacity(raw.len());
    for (i, arg) in raw.iter().enumerate() {
        match params.get(i) {
            Some(p) => match p.ty.coerce_str(arg) {
                Some(v) => out.push(v),
                None => bail!("argument '{}' must be {}, got '{}'", p.name, p.ty, arg),
            },
            None => out.push(Value::String(arg.clone())),
        }
    }
    Ok(out)
}
