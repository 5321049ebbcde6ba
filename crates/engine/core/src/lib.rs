//! Engine Core - workspaces and event consumption
//!
//! Reads the partitioned event log, routes every event to the workspace it
//! names, and keeps per-partition progress so a restarted process resumes
//! where it stopped. Replaying a log from offset 0 rebuilds the same state.
//!
//! ## Key Concepts
//!
//! - **Registry**: workspace id to [`Workspace`], created on first event
//! - **EventRouter**: closed table from event kind to typed handler
//! - **PartitionedLog**: append-only, offset-addressed message source
//! - **PartitionWorker**: in-order application, progress, dead letters, halts
//! - **Consumer**: one worker per assigned partition

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod consumer;
pub mod dead_letter;
pub mod error;
mod handlers;
pub mod health;
pub mod log;
pub mod progress;
pub mod registry;
pub mod router;
pub mod worker;
pub mod workspace;

pub use consumer::{Consumer, ConsumerConfig};
pub use dead_letter::{DeadLetter, DeadLetterQueue, InMemoryDeadLetterQueue};
pub use error::{EngineError, HandlerError, Result};
pub use health::{HealthBoard, PartitionHealth};
pub use log::{publish, FileLog, InMemoryLog, LogRecord, PartitionedLog};
pub use progress::{FileProgressStore, InMemoryProgressStore, PartitionKey, Progress, ProgressStore};
pub use registry::Registry;
pub use router::EventRouter;
pub use worker::{DrainStats, PartitionWorker, WorkerConfig};
pub use workspace::{Workspace, WorkspaceServices};
