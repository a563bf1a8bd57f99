//! Classification of the JSON control-message shapes carried in TEXT frames.
//!
//! The two shapes (`{"Index",...,"Request":...}` and `{"Interaction":...}`)
//! are deliberately NOT modeled as a `#[serde(untagged)]` enum: untagged
//! deserialization collapses every mismatch into one opaque error, and this
//! wire contract requires a distinct literal string per failure kind (see
//! [`ControlError`]). Instead the payload is parsed once into a
//! [`serde_json::Value`] and walked by hand, the way a builder-method style
//! error type is constructed one variant at a time.

use serde::Serialize;
use serde_json::Value;

/// One of the four recognized control-request verbs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestVerb {
    /// `Create URL` — allocate a new URL owned by the session's identity.
    CreateUrl,
    /// `Change URL` — rotate an owned URL to a fresh token.
    ChangeUrl {
        /// The URL to rotate, as given by the client.
        url: String,
    },
    /// `Delete URL` — remove an owned URL.
    DeleteUrl {
        /// The URL to remove, as given by the client.
        url: String,
    },
    /// `Own URL` — test session ownership of a URL.
    OwnUrl {
        /// The URL to test, as given by the client.
        url: String,
    },
}

/// The body of an interaction-reply message (shape 2), prior to base64
/// decoding and status defaulting, both of which require dispatch-layer
/// context (the pending request table) that this crate does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionReplyBody {
    /// Raw `Data` field, still base64-encoded.
    pub data: String,
    /// Optional `Type` field (defaults to `text/html` downstream).
    pub content_type: Option<String>,
    /// Optional `Status` field (defaults to 200 downstream).
    pub status: Option<i64>,
}

/// The control-message-error tier (tier 2 of the error handling design):
/// surfaced to the client as a structured JSON error frame, never fatal to
/// the session. `Display` is the literal wire string and is part of the
/// external contract — do not reword.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// `Request` was a recognized type but not one of the four known verbs.
    #[error("Unknown request")]
    UnknownRequest,
    /// `Request` field absent.
    #[error("Missing request parameter")]
    MissingRequestParameter,
    /// `Request` field present but not a string.
    #[error("Invalid request parameter")]
    InvalidRequestParameter,
    /// `URL` field absent where required.
    #[error("Missing URL parameter")]
    MissingUrlParameter,
    /// `URL` field present but not a string.
    #[error("Invalid URL parameter")]
    InvalidUrlParameter,
    /// `Change URL`/`Delete URL` targeted a URL not owned by this session.
    #[error("URL doesn't exist or it isn't owned by your session ID")]
    UrlNotOwned,
    /// `Index` field absent, not an integer, or outside `[0, 2^53 - 1]`.
    #[error("Invalid index parameter")]
    InvalidIndexParameter,
    /// `Interaction` field absent, not an integer, or outside `[0, 2^53 - 1]`.
    #[error("Invalid interaction parameter")]
    InvalidInteractionParameter,
    /// `Interaction` referred to an id not present in the session's table.
    #[error("Interaction doesn't exist or it was already processed")]
    InteractionNotFound,
    /// `Data` field present but not valid base64.
    #[error("Invalid data parameter")]
    InvalidDataParameter,
    /// `Data` field absent from an interaction reply.
    #[error("Missing data parameter")]
    MissingDataParameter,
    /// Neither recognized shape matched the decoded object.
    #[error("Unknown message type")]
    UnknownMessageType,
    /// The payload did not parse as JSON at all.
    #[error("Message is not JSON")]
    NotJson,
}

/// The classified result of one decoded TEXT frame's JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// A well-formed control request.
    Request {
        /// Echoed back in the response.
        index: u64,
        /// The parsed verb.
        verb: RequestVerb,
    },
    /// A control request whose shape was recognized but invalid.
    RequestError {
        /// `Some` only if `Index` itself parsed successfully.
        index: Option<u64>,
        /// The specific failure.
        error: ControlError,
    },
    /// A well-formed interaction reply.
    InteractionReply {
        /// Echoed back in completion notifications.
        interaction: u64,
        /// The reply body, still requiring base64 decode downstream.
        body: InteractionReplyBody,
    },
    /// An interaction reply whose shape was recognized but invalid.
    InteractionError {
        /// `Some` only if `Interaction` itself parsed successfully.
        interaction: Option<u64>,
        /// The specific failure.
        error: ControlError,
    },
    /// Neither shape matched, or the payload was not JSON at all.
    GlobalError(ControlError),
}

/// Upper bound on `Index`/`Interaction` values: `2^53 - 1`, the largest
/// integer a JSON double can represent exactly.
const MAX_SAFE_INTEGER: u64 = (1u64 << 53) - 1;

fn parse_safe_integer(value: &Value) -> Option<u64> {
    let n = value.as_u64()?;
    (n <= MAX_SAFE_INTEGER).then_some(n)
}

/// Classify a decoded TEXT frame's payload.
#[must_use]
pub fn classify(payload: &[u8]) -> ControlOutcome {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(_) => return ControlOutcome::GlobalError(ControlError::NotJson),
    };

    let Some(object) = value.as_object() else {
        return ControlOutcome::GlobalError(ControlError::UnknownMessageType);
    };

    if object.contains_key("Request") {
        return classify_request(object);
    }
    if object.contains_key("Interaction") {
        return classify_interaction_reply(object);
    }

    ControlOutcome::GlobalError(ControlError::UnknownMessageType)
}

fn classify_request(object: &serde_json::Map<String, Value>) -> ControlOutcome {
    let index = match object.get("Index") {
        Some(v) => match parse_safe_integer(v) {
            Some(n) => n,
            None => {
                return ControlOutcome::RequestError {
                    index: None,
                    error: ControlError::InvalidIndexParameter,
                };
            }
        },
        None => {
            return ControlOutcome::RequestError {
                index: None,
                error: ControlError::InvalidIndexParameter,
            };
        }
    };

    let Some(request_value) = object.get("Request") else {
        return ControlOutcome::RequestError {
            index: Some(index),
            error: ControlError::MissingRequestParameter,
        };
    };
    let Some(request_str) = request_value.as_str() else {
        return ControlOutcome::RequestError {
            index: Some(index),
            error: ControlError::InvalidRequestParameter,
        };
    };

    let needs_url = matches!(request_str, "Change URL" | "Delete URL" | "Own URL");
    let url = if needs_url {
        match object.get("URL") {
            None => {
                return ControlOutcome::RequestError {
                    index: Some(index),
                    error: ControlError::MissingUrlParameter,
                };
            }
            Some(v) => match v.as_str() {
                Some(s) => Some(s.to_string()),
                None => {
                    return ControlOutcome::RequestError {
                        index: Some(index),
                        error: ControlError::InvalidUrlParameter,
                    };
                }
            },
        }
    } else {
        None
    };

    let verb = match request_str {
        "Create URL" => RequestVerb::CreateUrl,
        "Change URL" => RequestVerb::ChangeUrl { url: url.unwrap_or_default() },
        "Delete URL" => RequestVerb::DeleteUrl { url: url.unwrap_or_default() },
        "Own URL" => RequestVerb::OwnUrl { url: url.unwrap_or_default() },
        _ => {
            return ControlOutcome::RequestError { index: Some(index), error: ControlError::UnknownRequest };
        }
    };

    ControlOutcome::Request { index, verb }
}

fn classify_interaction_reply(object: &serde_json::Map<String, Value>) -> ControlOutcome {
    let interaction = match object.get("Interaction").and_then(parse_safe_integer) {
        Some(n) => n,
        None => {
            return ControlOutcome::InteractionError {
                interaction: None,
                error: ControlError::InvalidInteractionParameter,
            };
        }
    };

    let Some(data_value) = object.get("Data") else {
        return ControlOutcome::InteractionError {
            interaction: Some(interaction),
            error: ControlError::MissingDataParameter,
        };
    };
    let Some(data) = data_value.as_str() else {
        return ControlOutcome::InteractionError {
            interaction: Some(interaction),
            error: ControlError::InvalidDataParameter,
        };
    };

    let content_type = object.get("Type").and_then(Value::as_str).map(str::to_string);

    // A malformed Status falls back to the default rather than producing a
    // dedicated wire error: no literal string for it exists in the external
    // contract (§6), and the field is advisory (the server always has 200
    // as a safe default).
    let status = object
        .get("Status")
        .and_then(Value::as_i64)
        .filter(|&s| (0..=i64::from(i32::MAX)).contains(&s));

    ControlOutcome::InteractionReply {
        interaction,
        body: InteractionReplyBody { data: data.to_string(), content_type, status },
    }
}

/// Wire-format response to a control request.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ControlResponse {
    /// `{"Index": N, "Response": ...}`
    Success {
        /// Echoed index.
        #[serde(rename = "Index")]
        index: u64,
        /// The verb's result.
        #[serde(rename = "Response")]
        response: ResponseValue,
    },
    /// `{"Index": N, "Error": "..."}`
    Failure {
        /// Echoed index, when known.
        #[serde(rename = "Index", skip_serializing_if = "Option::is_none")]
        index: Option<u64>,
        /// The literal error string.
        #[serde(rename = "Error")]
        error: String,
    },
}

/// The `Response` payload of a successful control request.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ResponseValue {
    /// `Create URL`/`Change URL` return the new URL string.
    Url(String),
    /// `Own URL`/`Delete URL` return a boolean.
    Owned(bool),
}

/// `{"Interaction": K, "URL": ..., "API": ..., "Type": ..., "Data": ...}`,
/// the invocation sent to a session when a public request matches one of
/// its published URLs.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationMessage {
    /// The interaction id the client must echo in its reply.
    #[serde(rename = "Interaction")]
    pub interaction: u64,
    /// The full published URL the public request hit.
    #[serde(rename = "URL")]
    pub url: String,
    /// The path portion after the token.
    #[serde(rename = "API")]
    pub api: String,
    /// The public request's content type (`text/html` if absent).
    #[serde(rename = "Type")]
    pub content_type: String,
    /// Base64-encoded request body.
    #[serde(rename = "Data")]
    pub data: String,
}

/// `{"Interaction": K, "Status": "Succeeded"|"Failed"}`, sent once the
/// public response for `K` has been sent (or failed to send).
#[derive(Debug, Clone, Serialize)]
pub struct InteractionStatus {
    /// The completed interaction's id.
    #[serde(rename = "Interaction")]
    pub interaction: u64,
    /// The completion status.
    #[serde(rename = "Status")]
    pub status: InteractionStatusValue,
}

/// The `Status` value of an [`InteractionStatus`] notification.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum InteractionStatusValue {
    /// The public response was sent (or the URL-not-found sentinel applied).
    Succeeded,
    /// The reply could not be forwarded to the session's transport.
    Failed,
}

/// `{"Interaction": K, "Error": "..."}`, the error counterpart to
/// [`InteractionStatus`] when a reply could not be processed.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionErrorResponse {
    /// Echoed interaction id, when known.
    #[serde(rename = "Interaction", skip_serializing_if = "Option::is_none")]
    pub interaction: Option<u64>,
    /// The literal error string.
    #[serde(rename = "Error")]
    pub error: String,
}

/// `{"Error": "..."}`, the shape-level error with no echoed identifier at
/// all (malformed JSON, or neither recognized message shape matched).
#[derive(Debug, Clone, Serialize)]
pub struct GlobalErrorResponse {
    /// The literal error string.
    #[serde(rename = "Error")]
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_create_url() {
        let outcome = classify(br#"{"Index":1,"Request":"Create URL"}"#);
        assert_eq!(outcome, ControlOutcome::Request { index: 1, verb: RequestVerb::CreateUrl });
    }

    #[test]
    fn classifies_change_url_missing_url() {
        let outcome = classify(br#"{"Index":2,"Request":"Change URL"}"#);
        assert_eq!(
            outcome,
            ControlOutcome::RequestError {
                index: Some(2),
                error: ControlError::MissingUrlParameter
            }
        );
    }

    #[test]
    fn classifies_unknown_request() {
        let outcome = classify(br#"{"Index":3,"Request":"Delete Everything"}"#);
        assert_eq!(
            outcome,
            ControlOutcome::RequestError { index: Some(3), error: ControlError::UnknownRequest }
        );
    }

    #[test]
    fn classifies_interaction_reply() {
        let outcome = classify(br#"{"Interaction":7,"Data":"aGVsbG8=","Status":200}"#);
        assert_eq!(
            outcome,
            ControlOutcome::InteractionReply {
                interaction: 7,
                body: InteractionReplyBody {
                    data: "aGVsbG8=".to_string(),
                    content_type: None,
                    status: Some(200)
                }
            }
        );
    }

    #[test]
    fn rejects_malformed_json() {
        let outcome = classify(b"not json");
        assert_eq!(outcome, ControlOutcome::GlobalError(ControlError::NotJson));
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let outcome = classify(br#"{"Foo":"bar"}"#);
        assert_eq!(outcome, ControlOutcome::GlobalError(ControlError::UnknownMessageType));
    }

    #[test]
    fn status_above_int_max_falls_back_to_default() {
        let outcome = classify(br#"{"Interaction":1,"Data":"aGk=","Status":9999999999}"#);
        assert_eq!(
            outcome,
            ControlOutcome::InteractionReply {
                interaction: 1,
                body: InteractionReplyBody {
                    data: "aGk=".to_string(),
                    content_type: None,
                    status: None
                }
            }
        );
    }

    #[test]
    fn invocation_message_serializes_with_pascal_case_keys() {
        let msg = InvocationMessage {
            interaction: 7,
            url: "http://h.onion/tok".to_string(),
            api: "/foo".to_string(),
            content_type: "text/html".to_string(),
            data: "aGVsbG8=".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""Interaction":7"#));
        assert!(json.contains(r#""URL":"http://h.onion/tok""#));
        assert!(json.contains(r#""API":"/foo""#));
    }

    #[test]
    fn interaction_status_serializes_as_literal_string() {
        let msg = InteractionStatus { interaction: 3, status: InteractionStatusValue::Succeeded };
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"Interaction":3,"Status":"Succeeded"}"#);
    }

    #[test]
    fn error_display_strings_are_literal() {
        assert_eq!(ControlError::UnknownRequest.to_string(), "Unknown request");
        assert_eq!(
            ControlError::InteractionNotFound.to_string(),
            "Interaction doesn't exist or it was already processed"
        );
        assert_eq!(ControlError::NotJson.to_string(), "Message is not JSON");
    }
}
