//! Worker output parsing.
//!
//! Workers log one record per line. Lines carrying the structured prefix
//! hold a JSON object; its `status` field says whether the line reports a
//! domain outcome, the end of the batch, or nothing we track.

use serde_json::{Map, Value};

use crate::domain::normalize_domain;
use crate::error::OutcomeParseError;
use crate::types::DomainStatus;

/// Prefix the bundled spider writes before every structured record.
pub const DEFAULT_STRUCTURED_PREFIX: &str = "[domain_spider]:";

/// Payload keys owned by the orchestrator rather than the worker.
const RESERVED_FIELDS: [&str; 3] = ["status", "domain", "last_job_id"];

/// Result of crawling one domain, as reported by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainOutcome {
    /// Normalized domain key
    pub domain: String,
    pub status: DomainStatus,
    /// Remaining payload fields, carried opaquely into the domain record
    pub fields: Map<String, Value>,
}

/// Something a worker told us that changes state.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    DomainOutcome(DomainOutcome),
    /// The worker finished its batch; exit code still pending
    BatchComplete { reason: Option<String> },
}

/// Turns raw output lines into [`WorkerEvent`]s.
#[derive(Debug, Clone)]
pub struct OutputParser {
    structured_prefix: String,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new(DEFAULT_STRUCTURED_PREFIX)
    }
}

impl OutputParser {
    pub fn new(structured_prefix: impl Into<String>) -> Self {
        Self {
            structured_prefix: structured_prefix.into(),
        }
    }

    pub fn structured_prefix(&self) -> &str {
        &self.structured_prefix
    }

    /// Parse one line.
    ///
    /// `Ok(None)` means the line is informational: framework chatter, free
    /// text after the prefix, or a structured record without a `status`.
    pub fn parse_line(&self, line: &str) -> Result<Option<WorkerEvent>, OutcomeParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(rest) = line.trim_start().strip_prefix(self.structured_prefix.as_str()) else {
            return Ok(None);
        };

        let payload = rest.trim();
        if !payload.starts_with('{') {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(payload)
            .map_err(|e| OutcomeParseError::InvalidJson(e.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(OutcomeParseError::NotAnObject);
        };

        let status = match object.get("status") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(OutcomeParseError::UnknownStatus(other.to_string())),
        };

        match status.as_str() {
            "SUCCESS" | "ERROR" => {
                let domain_status = if status == "SUCCESS" {
                    DomainStatus::Success
                } else {
                    DomainStatus::Error
                };
                let raw_domain = object
                    .get("domain")
                    .and_then(Value::as_str)
                    .ok_or_else(|| OutcomeParseError::MissingDomain {
                        status: status.clone(),
                    })?;
                let domain = normalize_domain(raw_domain)
                    .ok_or_else(|| OutcomeParseError::InvalidDomain(raw_domain.to_string()))?;

                for key in RESERVED_FIELDS {
                    object.remove(key);
                }

                Ok(Some(WorkerEvent::DomainOutcome(DomainOutcome {
                    domain,
                    status: domain_status,
                    fields: object,
                })))
            }
            "COMPLETE" => Ok(Some(WorkerEvent::BatchComplete {
                reason: object
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })),
            _ => Err(OutcomeParseError::UnknownStatus(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> OutputParser {
        OutputParser::default()
    }

    #[test]
    fn test_success_line() {
        let line = r#"[domain_spider]: {"domain": "https://www.Acme.com/", "status": "SUCCESS", "website_title": "Acme", "last_job_id": "x"}"#;
        let event = parser().parse_line(line).unwrap().unwrap();

        let WorkerEvent::DomainOutcome(outcome) = event else {
            panic!("expected outcome");
        };
        assert_eq!(outcome.domain, "acme.com");
        assert_eq!(outcome.status, DomainStatus::Success);
        assert_eq!(outcome.fields.get("website_title"), Some(&Value::from("Acme")));
        assert!(!outcome.fields.contains_key("status"));
        assert!(!outcome.fields.contains_key("last_job_id"));
    }

    #[test]
    fn test_error_line() {
        let line = r#"[domain_spider]: {"domain": "down.org", "status": "ERROR", "error": "DNS lookup failed"}"#;
        match parser().parse_line(line).unwrap() {
            Some(WorkerEvent::DomainOutcome(o)) => {
                assert_eq!(o.status, DomainStatus::Error);
                assert_eq!(o.domain, "down.org");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_complete_line() {
        let line = r#"[domain_spider]: {"job": "j", "status": "COMPLETE", "reason": "finished", "progress": 100}"#;
        assert_eq!(
            parser().parse_line(line).unwrap(),
            Some(WorkerEvent::BatchComplete {
                reason: Some("finished".to_string())
            })
        );
    }

    #[test]
    fn test_informational_lines_are_ignored() {
        let p = parser();
        assert_eq!(p.parse_line(r#"[domain_spider]: {"process_total_domains": 250}"#), Ok(None));
        assert_eq!(p.parse_line("[domain_spider]: Processing 200 response"), Ok(None));
        assert_eq!(p.parse_line("[scrapy.core.engine]: Spider opened"), Ok(None));
        assert_eq!(p.parse_line("2024-05-01 12:00:00 [scrapy] INFO: hello"), Ok(None));
        assert_eq!(p.parse_line(""), Ok(None));
    }

    #[test]
    fn test_malformed_structured_lines() {
        let p = parser();
        assert!(matches!(
            p.parse_line("[domain_spider]: {not json"),
            Err(OutcomeParseError::InvalidJson(_))
        ));
        assert_eq!(
            p.parse_line(r#"[domain_spider]: {"status": "SUCCESS"}"#),
            Err(OutcomeParseError::MissingDomain {
                status: "SUCCESS".to_string()
            })
        );
        assert_eq!(
            p.parse_line(r#"[domain_spider]: {"status": "WEIRD", "domain": "a.com"}"#),
            Err(OutcomeParseError::UnknownStatus("WEIRD".to_string()))
        );
    }

    #[test]
    fn test_custom_prefix() {
        let p = OutputParser::new("@@");
        let line = r#"@@ {"domain": "a.com", "status": "SUCCESS"}"#;
        assert!(matches!(
            p.parse_line(line),
            Ok(Some(WorkerEvent::DomainOutcome(_)))
        ));
        assert_eq!(
            p.parse_line(r#"[domain_spider]: {"domain": "a.com", "status": "SUCCESS"}"#),
            Ok(None)
        );
    }
}
