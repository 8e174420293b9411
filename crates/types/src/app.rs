//! Messages exchanged with the validating application.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Entry;

/// Result code signalling acceptance
pub const CODE_OK: u32 = 0;

/// Why the application is being asked to check an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    /// First validation on admission
    New,
    /// Re-validation of a pending entry after a commit
    Recheck,
}

/// Request to validate a single entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckEntryRequest {
    /// The entry to validate
    pub entry: Entry,
    /// Admission or recheck
    pub kind: CheckKind,
}

impl CheckEntryRequest {
    /// Admission request for `entry`
    pub fn new(entry: Entry) -> Self {
        Self {
            entry,
            kind: CheckKind::New,
        }
    }

    /// Recheck request for `entry`
    pub fn recheck(entry: Entry) -> Self {
        Self {
            entry,
            kind: CheckKind::Recheck,
        }
    }
}

/// Verdict of the application on a checked entry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckEntryResponse {
    /// Result code, [`CODE_OK`] on acceptance
    pub code: u32,
    /// Human readable detail
    pub log: String,
    /// Opaque application data
    pub data: Bytes,
}

impl CheckEntryResponse {
    /// Accepting response
    pub fn ok() -> Self {
        Self::default()
    }

    /// Rejecting response with the given code and log
    pub fn err(code: u32, log: impl Into<String>) -> Self {
        Self {
            code,
            log: log.into(),
            data: Bytes::new(),
        }
    }

    /// Whether the entry was accepted
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Outcome of executing one committed entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliverEntryResponse {
    /// Result code, [`CODE_OK`] on success
    pub code: u32,
    /// Human readable detail
    #[serde(default)]
    pub log: String,
    /// Opaque application data
    #[serde(default, with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl DeliverEntryResponse {
    /// Successful execution
    pub fn ok() -> Self {
        Self::default()
    }

    /// Failed execution with the given code and log
    pub fn err(code: u32, log: impl Into<String>) -> Self {
        Self {
            code,
            log: log.into(),
            data: Vec::new(),
        }
    }

    /// Whether execution succeeded
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Application response to a commit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitResponse {
    /// Application state digest after the commit
    pub data: Bytes,
}

/// Per-entry execution outcomes of a committed height, in block order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionResults {
    /// One response per committed entry
    pub deliver_entries: Vec<DeliverEntryResponse>,
}

impl ExecutionResults {
    /// Wrap a list of deliver responses
    pub fn new(deliver_entries: Vec<DeliverEntryResponse>) -> Self {
        Self { deliver_entries }
    }

    /// Result code for the committed entry at `index`, if present
    pub fn code_at(&self, index: usize) -> Option<u32> {
        self.deliver_entries.get(index).map(|r| r.code)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_response_codes() {
        assert!(CheckEntryResponse::ok().is_ok());
        let rejected = CheckEntryResponse::err(2, "bad nonce");
        assert!(!rejected.is_ok());
        assert_eq!(rejected.log, "bad nonce");
    }

    #[test]
    fn test_execution_results_json() {
        let results = ExecutionResults::new(vec![
            DeliverEntryResponse::ok(),
            DeliverEntryResponse {
                code: 3,
                log: "out of order".into(),
                data: vec![0xde, 0xad],
            },
        ]);
        let json = serde_json::to_string(&results).unwrap();
        assert!(json.contains("\"dead\""));
        let decoded: ExecutionResults = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, results);
        assert_eq!(decoded.code_at(1), Some(3));
        assert_eq!(decoded.code_at(2), None);
    }

    #[test]
    fn test_request_kinds() {
        let entry = Entry::from(b"x");
        assert_eq!(CheckEntryRequest::new(entry.clone()).kind, CheckKind::New);
        assert_eq!(CheckEntryRequest::recheck(entry).kind, CheckKind::Recheck);
    }
}
