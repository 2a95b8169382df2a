//! Memoized access to one mapper's records.
//!
//! Reads go through the run cache and populate it on a miss. Every mutation
//! invalidates the entities it touched immediately, so a later read in the
//! same pass never acts on a stale value.

use crate::cache::Namespace;
use crate::{AdapterError, Context, Mapper};

pub struct Memo<'a, M: Mapper> {
    mapper: &'a M,
    ctx: &'a Context,
}

impl<'a, M: Mapper> Memo<'a, M> {
    pub(crate) fn new(mapper: &'a M, ctx: &'a Context) -> Self {
        Self { mapper, ctx }
    }

    fn keyed(&self, records: &[M::Record]) -> Vec<(String, M::Record)> {
        records
            .iter()
            .map(|r| (self.mapper.entity_id(r), r.clone()))
            .collect()
    }

    fn invalidate(&self, ns: Namespace, a: &[M::Record], b: &[M::Record]) {
        let ids: Vec<String> = a
            .iter()
            .chain(b.iter())
            .map(|r| self.mapper.entity_id(r))
            .collect();
        self.ctx.cache.invalidate(ns, &self.mapper.cache_key(), &ids);
    }

    // -----------------------------------------------------------------------
    // Observed (cloud)
    // -----------------------------------------------------------------------

    pub async fn cloud_list(&self) -> Result<Vec<M::Record>, AdapterError> {
        let key = self.mapper.cache_key();
        if let Some(v) = self.ctx.cache.list::<M::Record>(Namespace::Observed, &key) {
            return Ok(v);
        }
        let v = self
            .ctx
            .retry
            .run("read", || self.mapper.cloud().read(self.ctx, None))
            .await
            .map_err(|e| e.at_step("read").for_entity(self.mapper.kind(), ""))?;
        self.ctx
            .cache
            .put_list(Namespace::Observed, &key, self.keyed(&v));
        Ok(v)
    }

    pub async fn cloud_get(&self, id: &str) -> Result<Option<M::Record>, AdapterError> {
        let key = self.mapper.cache_key();
        if let Some(r) = self.ctx.cache.get::<M::Record>(Namespace::Observed, &key, id) {
            return Ok(Some(r));
        }
        if self.ctx.cache.is_complete(Namespace::Observed, &key) {
            return Ok(None);
        }
        let found = self
            .ctx
            .retry
            .run("read", || self.mapper.cloud().read(self.ctx, Some(id)))
            .await
            .map_err(|e| e.at_step("read").for_entity(self.mapper.kind(), id))?
            .into_iter()
            .find(|r| self.mapper.entity_id(r) == id);
        if let Some(r) = &found {
            self.ctx
                .cache
                .put(Namespace::Observed, &key, id.to_string(), r.clone());
        }
        Ok(found)
    }

    pub async fn cloud_create(&self, records: &[M::Record]) -> Result<Vec<M::Record>, AdapterError> {
        let out = self.mapper.cloud().create(records, self.ctx).await;
        self.invalidate(Namespace::Observed, records, out.as_deref().unwrap_or(&[]));
        out
    }

    pub async fn cloud_update(&self, records: &[M::Record]) -> Result<Vec<M::Record>, AdapterError> {
        let out = self.mapper.cloud().update(records, self.ctx).await;
        self.invalidate(Namespace::Observed, records, out.as_deref().unwrap_or(&[]));
        out
    }

    pub async fn cloud_delete(&self, records: &[M::Record]) -> Result<(), AdapterError> {
        let out = self.mapper.cloud().delete(records, self.ctx).await;
        self.invalidate(Namespace::Observed, records, &[]);
        out
    }

    // -----------------------------------------------------------------------
    // Desired (Record Store)
    // -----------------------------------------------------------------------

    pub async fn db_list(&self) -> Result<Vec<M::Record>, AdapterError> {
        let key = self.mapper.cache_key();
        if let Some(v) = self.ctx.cache.list::<M::Record>(Namespace::Desired, &key) {
            return Ok(v);
        }
        let v = self
            .mapper
            .db()
            .read(self.ctx)
            .await
            .map_err(|e| e.for_entity(self.mapper.kind(), ""))?;
        self.ctx
            .cache
            .put_list(Namespace::Desired, &key, self.keyed(&v));
        Ok(v)
    }

    pub async fn db_get(&self, id: &str) -> Result<Option<M::Record>, AdapterError> {
        let key = self.mapper.cache_key();
        if let Some(r) = self.ctx.cache.get::<M::Record>(Namespace::Desired, &key, id) {
            return Ok(Some(r));
        }
        Ok(self
            .db_list()
            .await?
            .into_iter()
            .find(|r| self.mapper.entity_id(r) == id))
    }

    pub async fn db_create(&self, records: &[M::Record]) -> Result<Vec<M::Record>, AdapterError> {
        let out = self.mapper.db().create(records, self.ctx).await;
        self.invalidate(Namespace::Desired, records, out.as_deref().unwrap_or(&[]));
        out
    }

    pub async fn db_update(&self, records: &[M::Record]) -> Result<Vec<M::Record>, AdapterError> {
        let out = self.mapper.db().update(records, self.ctx).await;
        self.invalidate(Namespace::Desired, records, out.as_deref().unwrap_or(&[]));
        out
    }

    pub async fn db_delete(&self, records: &[M::Record]) -> Result<(), AdapterError> {
        let out = self.mapper.db().delete(records, self.ctx).await;
        self.invalidate(Namespace::Desired, records, &[]);
        out
    }
}
