//! One-shot imperative actions ("upload an object", "start a build") that
//! are not expressible as row-level CRUD.

use std::collections::BTreeMap;

use serde_json::Value;
use skr_schemas::ScalarType;

use crate::{AdapterError, Context};

#[derive(Debug, Clone)]
pub struct RpcParam {
    pub name: &'static str,
    pub ty: ScalarType,
    /// Trailing parameters with a default may be omitted by the caller.
    pub default: Option<Value>,
}

impl RpcParam {
    pub const fn required(name: &'static str, ty: ScalarType) -> Self {
        Self {
            name,
            ty,
            default: None,
        }
    }

    pub fn optional(name: &'static str, ty: ScalarType, default: Value) -> Self {
        Self {
            name,
            ty,
            default: Some(default),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OutputColumn {
    pub name: &'static str,
    pub ty: ScalarType,
}

pub type RpcRow = BTreeMap<String, Value>;

#[async_trait::async_trait]
pub trait Rpc: Send + Sync {
    fn module(&self) -> &'static str;

    fn name(&self) -> &'static str;

    /// Fixed, ordered parameter list.
    fn params(&self) -> &[RpcParam];

    /// Fixed output row shape.
    fn output(&self) -> &[OutputColumn];

    async fn call(&self, ctx: &Context, args: &[Value]) -> Result<Vec<RpcRow>, AdapterError>;
}

/// Bind positional arguments to `params`: check arity, fill trailing
/// defaults and type-check every value.
pub fn bind_args(params: &[RpcParam], mut args: Vec<Value>) -> Result<Vec<Value>, String> {
    if args.len() > params.len() {
        return Err(format!(
            "expected at most {} argument(s), got {}",
            params.len(),
            args.len()
        ));
    }
    for p in &params[args.len()..] {
        match &p.default {
            Some(v) => args.push(v.clone()),
            None => return Err(format!("missing required argument '{}'", p.name)),
        }
    }
    for (p, v) in params.iter().zip(args.iter()) {
        if !p.ty.accepts(v) {
            return Err(format!("argument '{}' must be {}, got {}", p.name, p.ty, v));
        }
    }
    Ok(args)
}

/// Every row must have exactly the declared columns with matching types.
pub fn validate_rows(output: &[OutputColumn], rows: &[RpcRow]) -> Result<(), String> {
    for (i, row) in rows.iter().enumerate() {
        if row.len() != output.len() {
            return Err(format!(
                "row {i}: expected {} column(s), got {}",
                output.len(),
                row.len()
            ));
        }
        for col in output {
            match row.get(col.name) {
                None => return Err(format!("row {i}: missing column '{}'", col.name)),
                Some(v) if !col.ty.accepts(v) => {
                    return Err(format!("row {i}: column '{}' must be {}", col.name, col.ty))
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}
