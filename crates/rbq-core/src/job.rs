use crate::{JobError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Consumer-assigned job identifier.
///
/// The broker does not hand out ids; the consumer labels every poll with a
/// fresh one and the job keeps it for logging and output naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Random id in the simple (hyphen-less) UUID v4 form.
    pub fn generate() -> Self {
        JobId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        JobId(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        JobId(value.to_string())
    }
}

/// Query parameters of a job.
///
/// `query` is required and `limit` is optional; any other keys are kept
/// verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub query: String,

    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub limit: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobParams {
    pub fn new(query: impl Into<String>) -> Self {
        JobParams {
            query: query.into(),
            limit: None,
            extra: Map::new(),
        }
    }
}

/// Validated job body as carried in the broker's payload TLV.
///
/// Unknown top-level fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub system_prompt: String,

    pub params: JobParams,

    /// Reserved for the processor.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub output: Option<String>,
}

/// Optional fields may be absent but never `null`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl JobSpec {
    pub fn new(system_prompt: impl Into<String>, params: JobParams) -> Self {
        JobSpec {
            system_prompt: system_prompt.into(),
            params,
            output: None,
        }
    }

    /// Parse and validate a JSON job body.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let spec: JobSpec = serde_json::from_slice(bytes)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Checks the schema constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        match self.params.limit {
            Some(limit) if limit < 1 => Err(JobError::InvalidLimit(limit)),
            _ => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| JobError::Serialization(e.to_string()))
    }
}

/// A job accepted into the pipeline.
///
/// Immutable once built: the handler gets its configuration from here,
/// never from shared state.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    /// Position in the order jobs were received, starting at 1
    pub seq: u64,
    pub spec: JobSpec,
}

impl Job {
    pub fn new(id: JobId, seq: u64, spec: JobSpec) -> Self {
        Job { id, seq, spec }
    }

    pub fn system_prompt(&self) -> &str {
        &self.spec.system_prompt
    }

    pub fn query(&self) -> &str {
        &self.spec.params.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<JobSpec> {
        JobSpec::from_json(body.as_bytes())
    }

    #[test]
    fn test_minimal_job_validates() {
        let spec = parse(r#"{"system_prompt":"s","params":{"query":"q"}}"#).unwrap();
        assert_eq!(spec.system_prompt, "s");
        assert_eq!(spec.params.query, "q");
        assert_eq!(spec.params.limit, None);
        assert!(spec.params.extra.is_empty());
        assert_eq!(spec.output, None);
    }

    #[test]
    fn test_missing_system_prompt_fails() {
        let err = parse(r#"{"params":{"query":"q"}}"#).unwrap_err();
        assert!(matches!(err, JobError::Schema(_)));
    }

    #[test]
    fn test_missing_query_fails() {
        let err = parse(r#"{"system_prompt":"s","params":{"limit":3}}"#).unwrap_err();
        assert!(matches!(err, JobError::Schema(_)));
    }

    #[test]
    fn test_zero_limit_fails() {
        let err = parse(r#"{"system_prompt":"s","params":{"query":"q","limit":0}}"#).unwrap_err();
        assert!(matches!(err, JobError::InvalidLimit(0)));
    }

    #[test]
    fn test_non_integer_limit_fails() {
        for limit in ["-1", "2.5", "\"3\"", "null"] {
            let body = format!(r#"{{"system_prompt":"s","params":{{"query":"q","limit":{limit}}}}}"#);
            assert!(parse(&body).is_err(), "limit {limit} should be rejected");
        }
    }

    #[test]
    fn test_extra_top_level_field_fails() {
        let err = parse(r#"{"system_prompt":"s","params":{"query":"q"},"extra":"x"}"#).unwrap_err();
        assert!(matches!(err, JobError::Schema(_)));
    }

    #[test]
    fn test_extra_params_are_kept() {
        let spec = parse(
            r#"{"system_prompt":"s","params":{"query":"q","limit":5,"lang":"en","depth":2}}"#,
        )
        .unwrap();
        assert_eq!(spec.params.limit, Some(5));
        assert_eq!(spec.params.extra["lang"], "en");
        assert_eq!(spec.params.extra["depth"], 2);
        assert!(!spec.params.extra.contains_key("query"));
    }

    #[test]
    fn test_output_must_be_a_string() {
        assert!(parse(r#"{"system_prompt":"s","params":{"query":"q"},"output":"done"}"#).is_ok());
        assert!(parse(r#"{"system_prompt":"s","params":{"query":"q"},"output":null}"#).is_err());
        assert!(parse(r#"{"system_prompt":"s","params":{"query":"q"},"output":7}"#).is_err());
    }

    #[test]
    fn test_malformed_json_fails() {
        let err = parse(r#"{"system_prompt":"s","params":"#).unwrap_err();
        assert!(matches!(err, JobError::Malformed(_)));
        assert!(matches!(parse("[1,2]").unwrap_err(), JobError::Schema(_)));
    }

    #[test]
    fn test_to_json_is_accepted_back() {
        let mut params = JobParams::new("rust job queues");
        params.limit = Some(10);
        let spec = JobSpec::new("You are helpful", params);

        let body = spec.to_json().unwrap();
        assert_eq!(JobSpec::from_json(&body).unwrap(), spec);

        let value: Value = serde_json::from_slice(&body).unwrap();
        assert!(value.get("output").is_none());
    }

    #[test]
    fn test_generated_ids_are_simple_uuids() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(!a.as_str().contains('-'));
    }
}
