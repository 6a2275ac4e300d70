//! AWS SDK error classification.

use crate::error::ProvisionError;
use aws_sdk_secretsmanager::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

/// Service error codes that indicate throttling or a temporary outage
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "ServiceUnavailableException",
    "InternalFailure",
    "InternalServiceError",
    "InternalServiceErrorException",
    "ServiceFailure",
];

/// Error code of a failed SDK call, if the service returned one
pub fn error_code<E, R>(error: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    error.code()
}

pub fn is_code<E, R>(error: &SdkError<E, R>, codes: &[&str]) -> bool
where
    E: ProvideErrorMetadata,
{
    error_code(error).is_some_and(|code| codes.contains(&code))
}

/// Map an SDK failure onto the provisioning taxonomy
pub fn classify<E, R>(operation: &str, error: SdkError<E, R>) -> ProvisionError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let transient = match &error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(_) => is_code(&error, TRANSIENT_CODES),
        _ => false,
    };

    if transient {
        ProvisionError::transient(operation, DisplayErrorContext(&error))
    } else {
        ProvisionError::provider(operation, anyhow::Error::new(error))
    }
}
