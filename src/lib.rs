//! # Secret Provisioner
//!
//! Idempotently establishes the chain of cloud and cluster resources that
//! delivers one database credential from AWS Secrets Manager into a
//! Kubernetes workload:
//!
//! ```text
//! IAM policy -> IRSA role + service account -> SecretStore -> ExternalSecret -> Secret
//! ```
//!
//! Each link is reconciled, then verified, before the next one is touched.
//! Rotation writes a new value upstream, forces a re-sync, verifies the
//! cluster copy by content hash and only then restarts the consumer.
//!
//! ## Modules
//!
//! - `descriptor`: declarative target state and its invariants
//! - `reconciler`: per-resource plan/apply against the provider seams
//! - `verifier`: cancellable readiness polling with bounded backoff
//! - `orchestrator`: the provisioning state machine
//! - `rotation`: credential rotation with rollback to the prior value
//! - `provider`: AWS SDK, kube-rs and in-memory implementations

pub mod config;
pub mod constants;
pub mod crd;
pub mod descriptor;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod provider;
pub mod reconciler;
pub mod retry;
pub mod rotation;
pub mod verifier;

pub use error::{ProvisionError, Result};
