use serde::{Deserialize, Serialize};
use serde_json::Value;

/// DAP request envelope.
#[derive(Debug, Deserialize)]
pub struct DapRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

/// DAP response envelope.
///
/// Note: the DAP specification allows responses with no `body` field at all.
/// Using a `serde_json::Value` keeps the envelope stable and avoids type
/// inference issues around `None` bodies.
#[derive(Debug, Serialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP event envelope.
#[derive(Debug, Serialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_parsing() {
        let req: DapRequest = serde_json::from_str(
            r#"{"seq":1,"type":"request","command":"stackTrace","arguments":{"threadId":7}}"#,
        )
        .unwrap();
        assert_eq!(req.seq, 1);
        assert_eq!(req.command, "stackTrace");
        assert_eq!(req.arguments["threadId"], json!(7));

        // arguments may be absent entirely
        let req: DapRequest =
            serde_json::from_str(r#"{"seq":2,"type":"request","command":"threads"}"#).unwrap();
        assert!(req.arguments.is_null());
    }

    #[test]
    fn test_response_skips_empty_members() {
        let resp = DapResponse {
            seq: 3,
            r#type: "response",
            request_seq: 1,
            success: true,
            command: "next".to_string(),
            message: None,
            body: None,
        };
        let text = serde_json::to_string(&resp).unwrap();
        assert!(!text.contains("message"));
        assert!(!text.contains("body"));
        assert!(text.contains(r#""request_seq":1"#));
    }
}
