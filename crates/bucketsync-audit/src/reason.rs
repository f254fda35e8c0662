//! Reason codes for error log entries
//!
//! Failures reach the log as free text from the object-store client, so the
//! code is recovered by matching well-known fragments of that text.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Coarse category of an upload failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Access key unknown, signature rejected or token expired
    Credentials,
    /// Credentials are valid but lack permission on the bucket or key
    PermissionDenied,
    /// The bucket or the local file does not exist
    NotFound,
    /// Connection refused, DNS failure or timeout
    Network,
    /// The service asked the client to slow down
    Throttled,
    /// Anything else
    Unknown,
}

impl ReasonCode {
    /// Classifies an error detail string
    ///
    /// Matching is case-insensitive and checks the most specific
    /// categories first.
    pub fn classify(detail: &str) -> Self {
        let text = detail.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

        if has(&[
            "unauthorized",
            "invalidaccesskeyid",
            "signaturedoesnotmatch",
            "expiredtoken",
            "invalidtoken",
            "status 401",
        ]) {
            ReasonCode::Credentials
        } else if has(&["forbidden", "accessdenied", "access denied", "permission denied", "status 403"]) {
            ReasonCode::PermissionDenied
        } else if has(&["not found", "nosuchbucket", "nosuchkey", "no such file", "status 404"]) {
            ReasonCode::NotFound
        } else if has(&["throttled", "slowdown", "too many requests", "status 429"]) {
            ReasonCode::Throttled
        } else if has(&[
            "network error",
            "timed out",
            "timeout",
            "connection",
            "dns error",
            "dispatch failure",
        ]) {
            ReasonCode::Network
        } else {
            ReasonCode::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Credentials => "credentials",
            ReasonCode::PermissionDenied => "permission_denied",
            ReasonCode::NotFound => "not_found",
            ReasonCode::Network => "network",
            ReasonCode::Throttled => "throttled",
            ReasonCode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credentials" => Ok(ReasonCode::Credentials),
            "permission_denied" => Ok(ReasonCode::PermissionDenied),
            "not_found" => Ok(ReasonCode::NotFound),
            "network" => Ok(ReasonCode::Network),
            "throttled" => Ok(ReasonCode::Throttled),
            "unknown" => Ok(ReasonCode::Unknown),
            other => Err(format!("unknown reason code '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_code_display() {
        assert_eq!(ReasonCode::Credentials.to_string(), "credentials");
        assert_eq!(ReasonCode::PermissionDenied.to_string(), "permission_denied");
        assert_eq!(ReasonCode::NotFound.to_string(), "not_found");
        assert_eq!(ReasonCode::Unknown.to_string(), "unknown");
    }

    #[test]
    fn reason_code_serialization() {
        let code = ReasonCode::PermissionDenied;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"permission_denied\"");

        let deserialized: ReasonCode = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, code);
    }

    #[test]
    fn reason_code_parses_its_display() {
        for code in [
            ReasonCode::Credentials,
            ReasonCode::PermissionDenied,
            ReasonCode::NotFound,
            ReasonCode::Network,
            ReasonCode::Throttled,
            ReasonCode::Unknown,
        ] {
            assert_eq!(code.to_string().parse::<ReasonCode>(), Ok(code));
        }
        assert!("bogus".parse::<ReasonCode>().is_err());
    }

    #[test]
    fn classify_object_store_errors() {
        assert_eq!(
            ReasonCode::classify("Unauthorized: SignatureDoesNotMatch: bad signature"),
            ReasonCode::Credentials
        );
        assert_eq!(
            ReasonCode::classify("Forbidden: AccessDenied: Access Denied"),
            ReasonCode::PermissionDenied
        );
        assert_eq!(
            ReasonCode::classify("Not found: NoSuchBucket: The specified bucket does not exist"),
            ReasonCode::NotFound
        );
        assert_eq!(ReasonCode::classify("Throttled: SlowDown"), ReasonCode::Throttled);
        assert_eq!(
            ReasonCode::classify("Network error: dispatch failure: connection refused"),
            ReasonCode::Network
        );
        assert_eq!(ReasonCode::classify("S3 error: InvalidArgument"), ReasonCode::Unknown);
    }

    #[test]
    fn classify_local_read_failures() {
        assert_eq!(
            ReasonCode::classify("Cannot read /a/f.txt: No such file or directory (os error 2)"),
            ReasonCode::NotFound
        );
        assert_eq!(
            ReasonCode::classify("Cannot read /a/f.txt: Permission denied (os error 13)"),
            ReasonCode::PermissionDenied
        );
    }
}
