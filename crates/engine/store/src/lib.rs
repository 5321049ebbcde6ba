//! Engine Store - the entity store of one workspace
//!
//! Holds every typed collection, the selector index linking selector owners
//! to the entities they match, and the derived release-target set.
//!
//! ## Key Concepts
//!
//! - **EntityStore**: typed collections with upsert/remove/get/items
//! - **ChangeSet**: ordered record of the mutations one event produced
//! - **ChangeNotifier**: bounded, coalescing notifications for reconcilers
//! - **SelectorIndex**: incremental many-to-many selector links
//! - **ReleaseTargetSet**: `(deployment, environment, resource)` triples

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod changes;
pub mod collection;
pub mod error;
pub mod index;
pub mod notify;
pub mod release_targets;
pub mod snapshot;
pub mod store;

pub use changes::{Change, ChangeSet, ChangeType};
pub use collection::{Collection, Upserted};
pub use error::{Result, StoreError};
pub use index::{LinkDiff, PolicyTargetKey, SelectorIndex, SelectorTable};
pub use notify::{ChangeNotifier, Notification, NotificationBatch};
pub use release_targets::{derive_all, ReleaseTargetSet, TargetDiff, TargetGeneration};
pub use snapshot::{InMemorySnapshotSink, SnapshotSink, WorkspaceSnapshot};
pub use store::EntityStore;
