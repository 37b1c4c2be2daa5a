use super::chat::LlmError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Pull the JSON object out of a model reply that may wrap it in a
/// markdown code fence or surround it with prose.
pub fn extract_json(reply: &str) -> &str {
    let body = if let Some((_, rest)) = reply.split_once("```json") {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some((_, rest)) = reply.split_once("```") {
        rest.split("```").next().unwrap_or(rest)
    } else {
        reply
    };
    let body = body.trim();
    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body,
    }
}

pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T, LlmError> {
    serde_json::from_str(extract_json(reply)).map_err(|e| LlmError::Malformed(e.to_string()))
}

/// Accepts a number, a numeric string ("12.5", "1,200", "15%"), or null.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
        Other(serde_json::Value),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Num(n)) => Some(n),
        Some(Raw::Text(s)) => s
            .trim()
            .trim_end_matches('%')
            .replace([',', '$'], "")
            .parse()
            .ok(),
        Some(Raw::Other(_)) | None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "lenient_f64")]
        value: Option<f64>,
    }

    #[test]
    fn test_extract_plain_json() {
        assert_eq!(extract_json(r#"  {"a": 1} "#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_extract_fenced_json() {
        let reply = "Here you go:\n```json\n{\"a\": 1}\n```\nGood luck.";
        assert_eq!(extract_json(reply), r#"{"a": 1}"#);
    }

    #[test]
    fn test_extract_bare_fence() {
        let reply = "```\n{\"a\": [1, 2]}\n```";
        assert_eq!(extract_json(reply), r#"{"a": [1, 2]}"#);
    }

    #[test]
    fn test_extract_surrounded_by_prose() {
        let reply = "Sure! {\"a\": {\"b\": 2}} Hope this helps.";
        assert_eq!(extract_json(reply), r#"{"a": {"b": 2}}"#);
    }

    #[test]
    fn test_parse_reply_reports_malformed() {
        let result: Result<serde_json::Value, _> = parse_reply("no json here");
        assert!(matches!(result, Err(LlmError::Malformed(_))));
    }

    #[test]
    fn test_lenient_number_forms() {
        let cases = [
            (r#"{"value": 12.5}"#, Some(12.5)),
            (r#"{"value": "1,200"}"#, Some(1200.0)),
            (r#"{"value": "15%"}"#, Some(15.0)),
            (r#"{"value": "n/a"}"#, None),
            (r#"{"value": null}"#, None),
            (r#"{}"#, None),
            (r#"{"value": [1]}"#, None),
        ];
        for (json, expected) in cases {
            let probe: Probe = serde_json::from_str(json).unwrap();
            assert_eq!(probe.value, expected, "{}", json);
        }
    }
}
