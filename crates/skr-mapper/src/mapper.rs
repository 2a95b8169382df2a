//! The Mapper / Adapter contract.

use skr_reconcile::UpdateOrReplace;

use crate::{entity_id_of, AdapterError, Context, Record, Source};

/// Provider side of one resource kind.
///
/// `read` is side-effect free. `create` must return the records with their
/// server-generated fields filled in; a multi-step create that fails part way
/// compensates already-created sub-resources before returning the error.
/// `delete` blocks on provider-asynchronous teardown through the waiter.
#[async_trait::async_trait]
pub trait CloudAdapter<R: Record>: Send + Sync {
    async fn read(&self, ctx: &Context, id: Option<&str>) -> Result<Vec<R>, AdapterError>;

    async fn create(&self, records: &[R], ctx: &Context) -> Result<Vec<R>, AdapterError>;

    async fn update(&self, records: &[R], ctx: &Context) -> Result<Vec<R>, AdapterError>;

    async fn delete(&self, records: &[R], ctx: &Context) -> Result<(), AdapterError>;
}

/// Record Store side of one resource kind, scoped by `ctx.scope`.
///
/// `create` assigns internal ids to records that have none. `update` upserts
/// by internal id. `delete` removes by internal id.
#[async_trait::async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    async fn read(&self, ctx: &Context) -> Result<Vec<R>, AdapterError>;

    async fn create(&self, records: &[R], ctx: &Context) -> Result<Vec<R>, AdapterError>;

    async fn update(&self, records: &[R], ctx: &Context) -> Result<Vec<R>, AdapterError>;

    async fn delete(&self, records: &[R], ctx: &Context) -> Result<(), AdapterError>;
}

/// Binds one Record type to its Cloud Adapter and Record Store.
pub trait Mapper: Send + Sync + 'static {
    type Record: Record;

    fn module(&self) -> &'static str;

    fn kind(&self) -> &'static str;

    /// Stable, collision-free key within the scope. Falls back to the
    /// internal id before the first cloud create.
    fn entity_id(&self, r: &Self::Record) -> String {
        entity_id_of(r)
    }

    /// Field-scoped equality ignoring server-generated fields. Must be
    /// reflexive and symmetric.
    fn equals(&self, a: &Self::Record, b: &Self::Record) -> bool;

    fn update_or_replace(&self, _observed: &Self::Record, _desired: &Self::Record) -> UpdateOrReplace {
        UpdateOrReplace::Update
    }

    /// Provider-reserved objects (a region's default group) are adopted,
    /// never deleted or replaced.
    fn is_reserved(&self, _observed: &Self::Record) -> bool {
        false
    }

    /// Key under which a not-yet-created desired record collides with a
    /// reserved observed object. A collision adopts the object instead of
    /// creating a new one.
    fn reserved_key(&self, _r: &Self::Record) -> Option<String> {
        None
    }

    fn source(&self) -> Source {
        Source::Db
    }

    fn cloud(&self) -> &dyn CloudAdapter<Self::Record>;

    fn db(&self) -> &dyn RecordStore<Self::Record>;

    /// `module::kind`, the cache key for this mapper.
    fn cache_key(&self) -> String {
        format!("{}::{}", self.module(), self.kind())
    }
}
