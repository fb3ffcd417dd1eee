//! Structured response recovery.
//!
//! The service is asked for JSON arrays but replies in free text: code
//! fences, chatter before and after, truncated output. Recovery works in
//! three steps:
//!
//! 1. [`extract_array`] slices from the first `[` to the last `]` and parses
//!    the slice as an array of objects.
//! 2. On failure, [`recover_array`] re-prompts with the malformed text, up to
//!    [`MAX_ATTEMPTS`] parses in total.
//! 3. When every attempt fails, a deterministic fallback is substituted.
//!
//! The outcome is tagged ([`Recovered`]) so callers can tell service output
//! from synthetic content. Chapter prose goes through the same shape in
//! [`recover_prose`], where text below a length threshold counts as malformed.

use crate::prompts;
use crate::service::{ContentClient, GenerationFailure};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Parse attempts (initial reply plus repairs) before falling back.
pub const MAX_ATTEMPTS: usize = 3;

/// One loosely-typed record from a service reply.
pub type Record = Map<String, Value>;

/// Why a reply could not be used.
#[derive(Debug, Error)]
pub enum MalformedOutput {
    #[error("no JSON array found in response")]
    NoArray,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("array element {0} is not an object")]
    NotAnObject(usize),

    #[error("response contained an empty array")]
    EmptyArray,

    #[error("text too short ({length} < {minimum} characters)")]
    TooShort { length: usize, minimum: usize },
}

/// Result of a recovery step.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovered<T> {
    /// The service produced usable output.
    Validated(T),
    /// Every attempt failed; the payload is synthetic.
    FallbackApplied(T),
}

impl<T> Recovered<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Recovered::FallbackApplied(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Recovered::Validated(v) | Recovered::FallbackApplied(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Recovered::Validated(v) | Recovered::FallbackApplied(v) => v,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Recovered<U> {
        match self {
            Recovered::Validated(v) => Recovered::Validated(f(v)),
            Recovered::FallbackApplied(v) => Recovered::FallbackApplied(f(v)),
        }
    }
}

/// Extract the JSON array of objects embedded in `raw`.
pub fn extract_array(raw: &str) -> Result<Vec<Record>, MalformedOutput> {
    let start = raw.find('[').ok_or(MalformedOutput::NoArray)?;
    let end = raw.rfind(']').ok_or(MalformedOutput::NoArray)?;
    if end < start {
        return Err(MalformedOutput::NoArray);
    }

    let values: Vec<Value> = serde_json::from_str(&raw[start..=end])?;
    if values.is_empty() {
        return Err(MalformedOutput::EmptyArray);
    }

    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Object(record) => Ok(record),
            _ => Err(MalformedOutput::NotAnObject(i)),
        })
        .collect()
}

/// Check generated prose against a minimum length.
pub fn validate_prose(text: &str, minimum: usize) -> Result<(), MalformedOutput> {
    let length = text.trim().chars().count();
    if length < minimum {
        return Err(MalformedOutput::TooShort { length, minimum });
    }
    Ok(())
}

/// What to ask for and how to describe it when asking again.
#[derive(Debug, Clone)]
pub struct ArrayRequest<'a> {
    /// Human-readable kind for logs and the repair prompt ("character list").
    pub kind: &'a str,
    pub prompt: String,
    /// Expected record shape, embedded in the repair prompt.
    pub schema: &'a str,
    pub max_output_tokens: Option<usize>,
}

/// Run the extract → repair → fallback loop for a JSON array.
///
/// Exactly [`MAX_ATTEMPTS`] service calls are made when every reply is
/// malformed. Transport failures are not repaired; they surface as
/// [`GenerationFailure`] for the calling phase to handle.
pub async fn recover_array<T, P, F>(
    client: &ContentClient,
    request: ArrayRequest<'_>,
    parse: P,
    fallback: F,
) -> Result<Recovered<Vec<T>>, GenerationFailure>
where
    P: Fn(&Record, usize) -> T,
    F: FnOnce() -> Vec<T>,
{
    let mut raw = client
        .generate(&request.prompt, request.max_output_tokens)
        .await?;

    for attempt in 1..=MAX_ATTEMPTS {
        match extract_array(&raw) {
            Ok(records) => {
                info!(kind = request.kind, count = records.len(), attempt, "Parsed service reply");
                let items = records
                    .iter()
                    .enumerate()
                    .map(|(i, record)| parse(record, i))
                    .collect();
                return Ok(Recovered::Validated(items));
            }
            Err(e) => {
                warn!(
                    kind = request.kind,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    "Malformed service reply"
                );
                if attempt < MAX_ATTEMPTS {
                    let repair = prompts::repair(request.kind, &raw, request.schema);
                    raw = client.generate(&repair, request.max_output_tokens).await?;
                }
            }
        }
    }

    warn!(kind = request.kind, "Repair attempts exhausted, using fallback");
    Ok(Recovered::FallbackApplied(fallback()))
}

/// How chapter prose is validated and retried.
#[derive(Debug, Clone, Copy)]
pub struct ProsePolicy {
    pub min_chars: usize,
    /// Wait between attempts.
    pub cooldown: Duration,
    pub max_output_tokens: Option<usize>,
}

/// Try each prompt in turn until one yields long-enough prose.
///
/// Service failures and short replies both move on to the next prompt after
/// the cooldown. Never fails: the fallback text is used when all prompts do.
pub async fn recover_prose<F>(
    client: &ContentClient,
    prompts: &[String],
    policy: ProsePolicy,
    fallback: F,
) -> Recovered<String>
where
    F: FnOnce() -> String,
{
    for (i, prompt) in prompts.iter().enumerate() {
        if i > 0 {
            info!(cooldown = ?policy.cooldown, "Retrying with a shorter prompt");
            tokio::time::sleep(policy.cooldown).await;
        }

        let outcome = match client.generate(prompt, policy.max_output_tokens).await {
            Ok(text) => validate_prose(&text, policy.min_chars).map(|()| text),
            Err(e) => {
                warn!(attempt = i + 1, error = %e, "Prose generation failed");
                continue;
            }
        };

        match outcome {
            Ok(text) => return Recovered::Validated(text),
            Err(e) => warn!(attempt = i + 1, error = %e, "Prose rejected"),
        }
    }

    warn!("All prose attempts failed, using templated text");
    Recovered::FallbackApplied(fallback())
}

// ============================================================================
// Record access
// ============================================================================

/// Lenient typed access to a [`Record`]. Missing or mistyped fields never
/// fail; callers supply defaults.
pub trait RecordExt {
    /// A string field; numbers and booleans are stringified.
    fn text(&self, key: &str) -> Option<String>;

    fn text_or(&self, key: &str, default: &str) -> String {
        self.text(key).unwrap_or_else(|| default.to_string())
    }

    /// A list of strings; a lone string becomes a one-element list.
    fn list(&self, key: &str) -> Vec<String>;

    /// A string-to-string mapping.
    fn mapping(&self, key: &str) -> BTreeMap<String, String>;

    /// A non-negative integer field.
    fn number(&self, key: &str) -> Option<usize>;
}

impl RecordExt for Record {
    fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_text)
    }

    fn list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
            Some(other) => scalar_text(other).into_iter().collect(),
            None => Vec::new(),
        }
    }

    fn mapping(&self, key: &str) -> BTreeMap<String, String> {
        match self.get(key) {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| scalar_text(v).map(|v| (k.clone(), v)))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    fn number(&self, key: &str) -> Option<usize> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::RetryPolicy;
    use crate::testing::{Reply, ScriptedModel};
    use serde_json::json;

    fn client(model: &ScriptedModel) -> ContentClient {
        ContentClient::new(model.clone()).with_retry_policy(RetryPolicy::immediate())
    }

    fn request(prompt: &str) -> ArrayRequest<'static> {
        ArrayRequest {
            kind: "character list",
            prompt: prompt.to_string(),
            schema: prompts::CHARACTER_SCHEMA,
            max_output_tokens: None,
        }
    }

    fn names(record: &Record, _: usize) -> String {
        record.text_or("name", "?")
    }

    #[test]
    fn test_extract_plain_array() {
        let records = extract_array(r#"[{"name": "Ada"}, {"name": "Bran"}]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["name"], "Bran");
    }

    #[test]
    fn test_extract_with_surrounding_prose() {
        let array = r#"[{"name": "Ada", "traits": ["bold"]}, {"name": "Bran"}]"#;
        let wrapped = format!("Sure! Here are the characters:\n```json\n{array}\n```\nEnjoy [really].");
        // The trailing "[really]" widens the slice past the array and breaks it.
        assert!(extract_array(&wrapped).is_err());

        let wrapped = format!("Sure! Here are the characters:\n```json\n{array}\n```\nEnjoy.");
        assert_eq!(
            extract_array(&wrapped).unwrap(),
            serde_json::from_str::<Vec<Record>>(array).unwrap()
        );
    }

    #[test]
    fn test_extract_no_brackets() {
        assert!(matches!(extract_array("no json here"), Err(MalformedOutput::NoArray)));
        assert!(matches!(extract_array("] backwards ["), Err(MalformedOutput::NoArray)));
    }

    #[test]
    fn test_extract_rejects_empty_and_scalars() {
        assert!(matches!(extract_array("[]"), Err(MalformedOutput::EmptyArray)));
        assert!(matches!(
            extract_array(r#"[{"a": 1}, "loose"]"#),
            Err(MalformedOutput::NotAnObject(1))
        ));
        assert!(matches!(extract_array("[{\"a\": 1},"), Err(MalformedOutput::NoArray)));
        assert!(matches!(extract_array("[{\"a\": }]"), Err(MalformedOutput::Json(_))));
    }

    #[test]
    fn test_record_access_is_lenient() {
        let record = json!({
            "name": "Ada",
            "age": 31,
            "traits": ["bold", 3, null],
            "alias": "Countess",
            "relationships": {"Bran": "rival", "Cleo": null},
            "number": "4"
        })
        .as_object()
        .cloned()
        .unwrap();

        assert_eq!(record.text("age").unwrap(), "31");
        assert_eq!(record.text_or("missing", "fallback"), "fallback");
        assert_eq!(record.list("traits"), vec!["bold", "3"]);
        assert_eq!(record.list("alias"), vec!["Countess"]);
        assert!(record.list("missing").is_empty());
        assert_eq!(record.mapping("relationships").len(), 1);
        assert_eq!(record.number("number"), Some(4));
        assert_eq!(record.number("name"), None);
    }

    #[test]
    fn test_validate_prose() {
        assert!(validate_prose(&"x".repeat(500), 500).is_ok());
        assert!(matches!(
            validate_prose("   short   ", 500),
            Err(MalformedOutput::TooShort { length: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_recover_first_try() {
        let model = ScriptedModel::new().then(Reply::text(r#"Here: [{"name": "Ada"}]"#));
        let result = recover_array(&client(&model), request("list"), names, Vec::new)
            .await
            .unwrap();

        assert_eq!(result, Recovered::Validated(vec!["Ada".to_string()]));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_recover_after_repair() {
        let model = ScriptedModel::new()
            .then(Reply::text("[{\"name\": \"Ada\",,}]"))
            .then(Reply::text(r#"[{"name": "Ada"}]"#));
        let result = recover_array(&client(&model), request("list"), names, Vec::new)
            .await
            .unwrap();

        assert!(!result.is_fallback());
        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].prompt.contains("{\"name\": \"Ada\",,}"));
    }

    #[tokio::test]
    async fn test_fallback_after_exactly_three_attempts() {
        let model = ScriptedModel::new().with_default(Reply::text("I'd rather write a poem."));
        let result = recover_array(&client(&model), request("list"), names, || {
            vec!["Hero".to_string()]
        })
        .await
        .unwrap();

        assert_eq!(result, Recovered::FallbackApplied(vec!["Hero".to_string()]));
        assert_eq!(model.call_count(), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let model = ScriptedModel::new().with_default(Reply::fail("unreachable"));
        let result = recover_array(&client(&model), request("list"), names, Vec::new).await;

        assert!(result.is_err());
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_recover_prose_moves_to_second_prompt() {
        let model = ScriptedModel::new()
            .then(Reply::text("too short"))
            .then(Reply::text("long ".repeat(50)));
        let policy = ProsePolicy {
            min_chars: 100,
            cooldown: Duration::ZERO,
            max_output_tokens: None,
        };
        let prompts = vec!["full".to_string(), "reduced".to_string()];
        let result = recover_prose(&client(&model), &prompts, policy, String::new).await;

        assert!(!result.is_fallback());
        let calls = model.calls();
        assert_eq!(calls[0].prompt, "full");
        assert_eq!(calls[1].prompt, "reduced");
    }

    #[tokio::test]
    async fn test_recover_prose_fallback() {
        let model = ScriptedModel::new().with_default(Reply::fail("down"));
        let policy = ProsePolicy {
            min_chars: 10,
            cooldown: Duration::ZERO,
            max_output_tokens: None,
        };
        let prompts = vec!["full".to_string(), "reduced".to_string()];
        let result = recover_prose(&client(&model), &prompts, policy, || "template".into()).await;

        assert_eq!(result, Recovered::FallbackApplied("template".to_string()));
        // Two prompts, each with the client's own retry.
        assert_eq!(model.call_count(), 4);
    }
}
