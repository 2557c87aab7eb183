//! Data models for commitsync

mod change;
mod collection;
mod condition;
mod entity;

pub use change::{
    ChangeAction, ExportChange, ExportedEntry, ImportChange, ImportedEntry, ManifestEntry,
    DEFAULT_LOCAL_REVISION,
};
pub use collection::{Collection, CollectionId};
pub use condition::{Combinator, Comparison, Condition, Filter, Operator};
pub use entity::{Entity, EntityId};
