//! Cloud API error classification.
//!
//! Resources never match error codes inline. Instead they hand the API
//! error to [`classify`], or ask the per-service [`ServiceErrors`] table
//! for the codes a particular service uses for "not found" and for
//! eventual-consistency propagation delays.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An error reported by the cloud API, reduced to its code and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// The service error code, e.g. `InvalidVpcID.NotFound`.
    pub code: String,
    /// The service error message.
    pub message: String,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether the code matches and the message contains `fragment`.
    pub fn matches(&self, code: &str, fragment: &str) -> bool {
        self.code == code && self.message.contains(fragment)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// The retry-relevant category of an API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rate limiting. Always retryable.
    Throttling,
    /// A dependency (role, profile, resource) has not propagated yet.
    Propagation,
    /// Another mutation landed first, or a change token went stale.
    ConcurrentModification,
    /// The object does not exist.
    NotFound,
    /// Everything else. Never retried.
    Other,
}

/// Where in a resource's lifecycle an error was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The object was just created and may not be visible everywhere yet.
    Settling,
    /// The object has existed for a while.
    Steady,
}

impl ErrorClass {
    /// Whether an error of this class should be retried during `phase`.
    ///
    /// Propagation errors are retried in either phase, but callers bound
    /// them to [`crate::retry::PROPAGATION_TIMEOUT`].
    pub fn is_retryable(self, phase: Phase) -> bool {
        match self {
            ErrorClass::Throttling
            | ErrorClass::Propagation
            | ErrorClass::ConcurrentModification => true,
            ErrorClass::NotFound => phase == Phase::Settling,
            ErrorClass::Other => false,
        }
    }
}

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "RequestThrottled",
    "RequestThrottledException",
    "TooManyRequestsException",
    "SlowDown",
    "ProvisionedThroughputExceededException",
    "EC2ThrottledException",
];

const CONCURRENT_MODIFICATION_CODES: &[&str] = &[
    "ConcurrentModificationException",
    "ConcurrentModification",
    "OperationAbortedException",
    "OptimisticLockException",
    "StaleDataException",
    "WAFStaleDataException",
    "PriorRequestNotComplete",
    "ResourceInUseException",
    "IncorrectState",
];

const PROPAGATION_CODES: &[&str] = &["DependencyViolation"];

/// Message fragments that reveal IAM propagation delays behind generic codes.
const PROPAGATION_MESSAGES: &[&str] = &[
    "cannot be assumed",
    "Invalid IAM Instance Profile",
    "not authorized to perform: sts:AssumeRole",
    "role defined for the function cannot be assumed",
    "The role specified",
];

/// Codes whose suffix alone identifies a missing object.
const NOT_FOUND_SUFFIXES: &[&str] = &[".NotFound", "NotFoundException", "NotFound"];

const NOT_FOUND_CODES: &[&str] = &["NoSuchEntity", "NoSuchBucket", "NoSuchKey"];

/// Classify an API error.
pub fn classify(err: &ApiError) -> ErrorClass {
    let code = err.code.as_str();
    if THROTTLING_CODES.contains(&code) {
        return ErrorClass::Throttling;
    }
    if CONCURRENT_MODIFICATION_CODES.contains(&code) {
        return ErrorClass::ConcurrentModification;
    }
    if PROPAGATION_CODES.contains(&code)
        || PROPAGATION_MESSAGES.iter().any(|m| err.message.contains(m))
    {
        return ErrorClass::Propagation;
    }
    if NOT_FOUND_CODES.contains(&code)
        || NOT_FOUND_SUFFIXES.iter().any(|s| code.ends_with(s))
        || SERVICE_ERRORS.iter().any(|s| s.not_found.contains(&code))
    {
        return ErrorClass::NotFound;
    }
    ErrorClass::Other
}

/// Whether the error signals that a change token is stale.
pub fn is_stale_token(err: &ApiError) -> bool {
    matches!(
        err.code.as_str(),
        "StaleDataException" | "WAFStaleDataException" | "OptimisticLockException"
            | "PriorRequestNotComplete"
    )
}

/// Per-service error code table.
///
/// Services disagree on how they spell "not found": some use a dotted
/// suffix, some a bare code, and a few reuse a generic validation code
/// with a telling message. Each entry records those codes explicitly so
/// resources can ask their service instead of inlining string matches.
#[derive(Debug, Clone, Copy)]
pub struct ServiceErrors {
    /// The service identifier as it appears in ARNs.
    pub service: &'static str,
    /// Codes meaning the object does not exist.
    pub not_found: &'static [&'static str],
    /// (code, message fragment) pairs that also mean "not found".
    pub not_found_messages: &'static [(&'static str, &'static str)],
    /// Codes that indicate a dependency has not propagated yet.
    pub propagation: &'static [&'static str],
}

const SERVICE_ERRORS: &[ServiceErrors] = &[
    ServiceErrors {
        service: "ec2",
        not_found: &[
            "InvalidVpcID.NotFound",
            "InvalidSubnetID.NotFound",
            "InvalidGroup.NotFound",
            "InvalidInstanceID.NotFound",
            "InvalidRouteTableID.NotFound",
            "InvalidInternetGatewayID.NotFound",
            "InvalidNetworkInterfaceID.NotFound",
            "InvalidAllocationID.NotFound",
        ],
        not_found_messages: &[],
        propagation: &["InvalidGroup.NotFound", "InvalidParameterValue"],
    },
    ServiceErrors {
        service: "iam",
        not_found: &["NoSuchEntity"],
        not_found_messages: &[],
        propagation: &["MalformedPolicyDocument"],
    },
    ServiceErrors {
        service: "s3",
        not_found: &["NoSuchBucket", "NotFound", "NoSuchKey"],
        not_found_messages: &[],
        propagation: &[],
    },
    ServiceErrors {
        service: "sqs",
        not_found: &["AWS.SimpleQueueService.NonExistentQueue", "QueueDoesNotExist"],
        not_found_messages: &[],
        propagation: &[],
    },
    ServiceErrors {
        service: "dynamodb",
        not_found: &["ResourceNotFoundException"],
        not_found_messages: &[],
        propagation: &[],
    },
    ServiceErrors {
        service: "lambda",
        not_found: &["ResourceNotFoundException"],
        not_found_messages: &[],
        propagation: &["InvalidParameterValueException"],
    },
    ServiceErrors {
        service: "rds",
        not_found: &["DBInstanceNotFound", "DBClusterNotFoundFault", "DBSubnetGroupNotFoundFault"],
        not_found_messages: &[],
        propagation: &[],
    },
    ServiceErrors {
        service: "route53",
        not_found: &["NoSuchHostedZone", "NoSuchHealthCheck"],
        not_found_messages: &[],
        propagation: &[],
    },
    ServiceErrors {
        service: "waf",
        not_found: &["WAFNonexistentItemException"],
        not_found_messages: &[],
        propagation: &[],
    },
    ServiceErrors {
        service: "kms",
        not_found: &["NotFoundException"],
        not_found_messages: &[("KMSInvalidStateException", "is pending deletion")],
        propagation: &[],
    },
    ServiceErrors {
        service: "elasticache",
        not_found: &["CacheClusterNotFound", "ReplicationGroupNotFoundFault"],
        not_found_messages: &[("InvalidParameterValue", "does not exist")],
        propagation: &[],
    },
];

const GENERIC_SERVICE: ServiceErrors = ServiceErrors {
    service: "",
    not_found: &[],
    not_found_messages: &[],
    propagation: &[],
};

impl ServiceErrors {
    /// The table used when a resource does not name its service.
    pub fn generic() -> &'static ServiceErrors {
        &GENERIC_SERVICE
    }

    /// Look up the table for a service. Unknown services get an empty table
    /// that falls back to [`classify`].
    pub fn for_service(service: &str) -> &'static ServiceErrors {
        SERVICE_ERRORS
            .iter()
            .find(|s| s.service == service)
            .unwrap_or(&GENERIC_SERVICE)
    }

    /// Whether `err` means "not found" for this service.
    pub fn is_not_found(&self, err: &ApiError) -> bool {
        self.not_found.contains(&err.code.as_str())
            || self
                .not_found_messages
                .iter()
                .any(|(code, fragment)| err.matches(code, fragment))
            || classify(err) == ErrorClass::NotFound
    }

    /// Whether `err` means a dependency has not propagated yet.
    pub fn is_propagation(&self, err: &ApiError) -> bool {
        self.propagation.contains(&err.code.as_str()) || classify(err) == ErrorClass::Propagation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_throttling() {
        assert_eq!(classify(&ApiError::new("Throttling", "Rate exceeded")), ErrorClass::Throttling);
        assert_eq!(
            classify(&ApiError::new("RequestLimitExceeded", "")),
            ErrorClass::Throttling
        );
    }

    #[test]
    fn test_classify_not_found_suffixes() {
        assert_eq!(
            classify(&ApiError::new("InvalidSubnetID.NotFound", "")),
            ErrorClass::NotFound
        );
        assert_eq!(
            classify(&ApiError::new("ResourceNotFoundException", "")),
            ErrorClass::NotFound
        );
        assert_eq!(classify(&ApiError::new("NoSuchEntity", "")), ErrorClass::NotFound);
    }

    #[test]
    fn test_classify_propagation_from_message() {
        let err = ApiError::new(
            "InvalidParameterValueException",
            "The role defined for the function cannot be assumed by Lambda.",
        );
        assert_eq!(classify(&err), ErrorClass::Propagation);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(classify(&ApiError::new("AccessDenied", "")), ErrorClass::Other);
        assert_eq!(classify(&ApiError::new("LimitExceeded", "quota")), ErrorClass::Other);
    }

    #[test]
    fn test_retryability_depends_on_phase() {
        assert!(ErrorClass::NotFound.is_retryable(Phase::Settling));
        assert!(!ErrorClass::NotFound.is_retryable(Phase::Steady));
        assert!(ErrorClass::Throttling.is_retryable(Phase::Steady));
        assert!(ErrorClass::ConcurrentModification.is_retryable(Phase::Steady));
        assert!(!ErrorClass::Other.is_retryable(Phase::Settling));
    }

    #[test]
    fn test_service_table_lookup() {
        let sqs = ServiceErrors::for_service("sqs");
        assert!(sqs.is_not_found(&ApiError::new("AWS.SimpleQueueService.NonExistentQueue", "")));

        let elasticache = ServiceErrors::for_service("elasticache");
        assert!(elasticache.is_not_found(&ApiError::new(
            "InvalidParameterValue",
            "Cluster foo does not exist"
        )));
        assert!(!elasticache.is_not_found(&ApiError::new("InvalidParameterValue", "bad size")));

        let ec2 = ServiceErrors::for_service("ec2");
        assert!(ec2.is_propagation(&ApiError::new("InvalidGroup.NotFound", "")));

        let unknown = ServiceErrors::for_service("nope");
        assert_eq!(unknown.service, "");
        assert!(unknown.is_not_found(&ApiError::new("Thing.NotFound", "")));
    }

    #[test]
    fn test_every_service_not_found_code_classifies_as_not_found() {
        for table in SERVICE_ERRORS {
            for code in table.not_found {
                assert_eq!(
                    classify(&ApiError::new(*code, "")),
                    ErrorClass::NotFound,
                    "{} {}",
                    table.service,
                    code
                );
            }
        }
    }

    #[test]
    fn test_stale_token() {
        assert!(is_stale_token(&ApiError::new("WAFStaleDataException", "")));
        assert!(!is_stale_token(&ApiError::new("Throttling", "")));
    }
}
