use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use uuid::Uuid;

/// A desired-state row for one resource instance.
///
/// The internal identity is assigned by the Record Store on first
/// persistence. Records read back from the cloud carry `None`.
pub trait Record: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn internal_id(&self) -> Option<Uuid>;

    fn set_internal_id(&mut self, id: Option<Uuid>);

    /// Natural key (name, ARN, provider-assigned id). `None` before the
    /// resource has round-tripped through a cloud create.
    fn natural_id(&self) -> Option<String>;
}

/// Natural key when known, otherwise the internal id, otherwise empty.
pub fn entity_id_of<R: Record>(r: &R) -> String {
    match r.natural_id() {
        Some(id) if !id.is_empty() => id,
        _ => r
            .internal_id()
            .map(|u| u.to_string())
            .unwrap_or_default(),
    }
}

/// Where a mapper's truth lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Desired state is authored in the Record Store.
    Db,
    /// Read-only mirror of provider state; always reconciled cloud -> store.
    Cloud,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Named {
        internal_id: Option<Uuid>,
        name: Option<String>,
    }

    impl Record for Named {
        fn internal_id(&self) -> Option<Uuid> {
            self.internal_id
        }

        fn set_internal_id(&mut self, id: Option<Uuid>) {
            self.internal_id = id;
        }

        fn natural_id(&self) -> Option<String> {
            self.name.clone()
        }
    }

    #[test]
    fn natural_key_wins_over_internal_id() {
        let id = Uuid::new_v4();
        let r = Named {
            internal_id: Some(id),
            name: Some("b1".into()),
        };
        assert_eq!(entity_id_of(&r), "b1");
    }

    #[test]
    fn falls_back_to_internal_id_before_creation() {
        let id = Uuid::new_v4();
        let mut r = Named {
            internal_id: Some(id),
            name: Some(String::new()),
        };
        assert_eq!(entity_id_of(&r), id.to_string());
        r.internal_id = None;
        r.name = None;
        assert_eq!(entity_id_of(&r), "");
    }
}
