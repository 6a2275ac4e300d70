//! # AWS Providers
//!
//! - `secrets_manager`: AWS Secrets Manager secret store
//! - `iam`: managed policies and IRSA roles
//! - `account`: caller account and cluster OIDC issuer

mod account;
mod auth;
mod errors;
mod iam;
mod secrets_manager;

pub use account::AwsAccount;
pub use auth::{create_sdk_config, ENDPOINT_OVERRIDE_ENV};
pub use errors::classify;
pub use iam::AwsIam;
pub use secrets_manager::AwsSecretsManager;
