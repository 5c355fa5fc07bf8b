//! Amazon Resource Names.
//!
//! `arn:{partition}:{service}:{region}:{account}:{resource}`. Region and
//! account may be empty for global services (IAM, S3, Route 53). The
//! resource part may itself contain colons.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProviderError;

const ARN_PREFIX: &str = "arn";

/// A parsed ARN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Arn {
    /// `aws`, `aws-cn`, `aws-us-gov`, ...
    pub partition: String,
    /// Service namespace, e.g. `ec2`.
    pub service: String,
    /// Region, empty for global services.
    pub region: String,
    /// Account id, empty for some services.
    pub account_id: String,
    /// Resource part, e.g. `vpc/vpc-123` or `role/path/name`.
    pub resource: String,
}

impl Arn {
    /// Build an ARN from its components.
    pub fn new(
        partition: impl Into<String>,
        service: impl Into<String>,
        region: impl Into<String>,
        account_id: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            partition: partition.into(),
            service: service.into(),
            region: region.into(),
            account_id: account_id.into(),
            resource: resource.into(),
        }
    }

    /// Parse an ARN string.
    pub fn parse(s: &str) -> Result<Self, ProviderError> {
        s.parse()
    }

    /// Whether `s` is a syntactically valid ARN.
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    /// The resource part split once on `/` or `:` into (type, id).
    ///
    /// `vpc/vpc-123` yields `("vpc", "vpc-123")`; a resource with neither
    /// separator yields `("", resource)`.
    pub fn resource_type_and_id(&self) -> (&str, &str) {
        match self.resource.find(['/', ':']) {
            Some(idx) => (&self.resource[..idx], &self.resource[idx + 1..]),
            None => ("", &self.resource),
        }
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}",
            ARN_PREFIX, self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

impl FromStr for Arn {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(6, ':').collect();
        if parts.len() != 6 {
            return Err(ProviderError::Validation(format!(
                "invalid ARN '{}': expected 6 colon-separated sections",
                s
            )));
        }
        if parts[0] != ARN_PREFIX {
            return Err(ProviderError::Validation(format!(
                "invalid ARN '{}': must start with 'arn:'",
                s
            )));
        }
        if parts[1].is_empty() {
            return Err(ProviderError::Validation(format!(
                "invalid ARN '{}': partition is empty",
                s
            )));
        }
        if parts[2].is_empty() {
            return Err(ProviderError::Validation(format!(
                "invalid ARN '{}': service is empty",
                s
            )));
        }
        if parts[5].is_empty() {
            return Err(ProviderError::Validation(format!(
                "invalid ARN '{}': resource is empty",
                s
            )));
        }
        Ok(Arn::new(parts[1], parts[2], parts[3], parts[4], parts[5]))
    }
}

/// The partition a region belongs to.
pub fn partition_for_region(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else if region.starts_with("us-iso-") {
        "aws-iso"
    } else if region.starts_with("us-isob-") {
        "aws-iso-b"
    } else {
        "aws"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_regional_arn() {
        let arn = Arn::parse("arn:aws:ec2:us-east-1:123456789012:vpc/vpc-1").unwrap();
        assert_eq!(arn.partition, "aws");
        assert_eq!(arn.service, "ec2");
        assert_eq!(arn.region, "us-east-1");
        assert_eq!(arn.account_id, "123456789012");
        assert_eq!(arn.resource_type_and_id(), ("vpc", "vpc-1"));
    }

    #[test]
    fn test_parse_global_arn_with_colons_in_resource() {
        let arn = Arn::parse("arn:aws:iam::123456789012:role/path/name").unwrap();
        assert_eq!(arn.region, "");
        assert_eq!(arn.resource, "role/path/name");

        let arn = Arn::parse("arn:aws:logs:us-west-2:1:log-group:/app:*").unwrap();
        assert_eq!(arn.resource, "log-group:/app:*");
        assert_eq!(arn.resource_type_and_id(), ("log-group", "/app:*"));
    }

    #[test]
    fn test_display_round_trips() {
        let s = "arn:aws-cn:s3:::bucket-name";
        assert_eq!(Arn::parse(s).unwrap().to_string(), s);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Arn::parse("not-an-arn").is_err());
        assert!(Arn::parse("arx:aws:s3:::b").is_err());
        assert!(Arn::parse("arn::s3:::b").is_err());
        assert!(Arn::parse("arn:aws:s3:::").is_err());
        assert!(!Arn::is_valid("arn:aws:s3"));
    }

    #[test]
    fn test_partition_for_region() {
        assert_eq!(partition_for_region("us-east-1"), "aws");
        assert_eq!(partition_for_region("cn-north-1"), "aws-cn");
        assert_eq!(partition_for_region("us-gov-west-1"), "aws-us-gov");
    }
}
