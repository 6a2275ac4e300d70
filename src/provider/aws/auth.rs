//! # AWS SDK Configuration
//!
//! Builds one `SdkConfig` from the default credential chain (environment,
//! profile, web identity, instance metadata) shared by the Secrets Manager,
//! IAM, STS and EKS clients.

use aws_config::SdkConfig;
use tracing::info;

/// Environment variable routing every AWS client to a local endpoint (e.g. LocalStack)
pub const ENDPOINT_OVERRIDE_ENV: &str = "PROVISION_AWS_ENDPOINT";

/// Create AWS SDK config for `region` using the default credential chain
pub async fn create_sdk_config(region: &str) -> SdkConfig {
    let mut builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));

    if let Ok(endpoint) = std::env::var(ENDPOINT_OVERRIDE_ENV) {
        if !endpoint.trim().is_empty() {
            info!("Routing AWS requests to {}", endpoint);
            builder = builder.endpoint_url(endpoint.trim());
        }
    }

    builder.load().await
}
