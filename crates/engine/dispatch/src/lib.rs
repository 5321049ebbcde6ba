//! Engine Dispatch - handing jobs to job agents
//!
//! ## Key Concepts
//!
//! - **Dispatchable**: adapter to an external execution system
//! - **AgentRegistry**: dispatchers keyed by type
//! - **JobLedger**: job records persisted with their verification specs
//! - **DispatchGateway**: agent resolution, capability gating, bounded
//!   concurrency
//! - **RetryPolicy**: capped exponential backoff for transient failures

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod agent;
pub mod backoff;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod memory;
pub mod registry;
pub mod webhook;

pub use agent::{DispatchReceipt, Dispatchable, JobPurpose, Verifiable, VerificationSpec};
pub use backoff::RetryPolicy;
pub use error::{DispatchError, Result};
pub use gateway::{DispatchGateway, GatewayConfig, ResolvedAgent, DEFAULT_AGENT_ID};
pub use ledger::{InMemoryJobLedger, JobLedger, LedgerEntry};
pub use memory::{InMemoryAgent, DEFAULT_AGENT_KIND};
pub use registry::AgentRegistry;
pub use webhook::{WebhookAgent, WEBHOOK_AGENT_KIND};
