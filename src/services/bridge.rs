//! Line-oriented dialog bridge between the control center and a worker process.
//!
//! A worker that needs an answer from the operator prints one line made of a
//! literal prefix followed by a compact JSON object, then blocks reading one line
//! from its own stdin. The control center answers with the ACK token, the CANCEL
//! token, or a raw value.
//!
//! ```text
//! worker stdout:  __MDF_GUI_BRIDGE__{"type":"prompt","text":"Enter code","title":"Input","default":""}
//! worker stdin:   42
//! ```
//!
//! Everything in this module is a pure codec. The sentinel strings only exist at
//! this edge; the rest of the crate works with [`BridgeResponse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default line prefix that marks a bridge request on worker output.
pub const DEFAULT_BRIDGE_PREFIX: &str = "__MDF_GUI_BRIDGE__";

/// Default token meaning "acknowledged, no value".
pub const DEFAULT_BRIDGE_ACK: &str = "__MDF_GUI_ACK__";

/// Default token meaning "declined by the operator or the run is stopping".
pub const DEFAULT_BRIDGE_CANCEL: &str = "__MDF_GUI_CANCEL__";

/// Environment variable names the worker reads its tokens from.
pub const ENV_BRIDGE_PREFIX: &str = "MDF_BRIDGE_PREFIX";
pub const ENV_BRIDGE_ACK: &str = "MDF_BRIDGE_ACK";
pub const ENV_BRIDGE_CANCEL: &str = "MDF_BRIDGE_CANCEL";

/// Fallback labels for a confirm request without usable buttons.
pub const DEFAULT_CONFIRM_BUTTONS: [&str; 2] = ["OK", "Cancel"];

/// Errors produced while decoding a bridge line
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("line does not start with the bridge prefix")]
    MissingPrefix,

    #[error("malformed bridge payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("bridge payload is not a JSON object")]
    NotAnObject,
}

/// The three tokens that make up the wire vocabulary.
///
/// Serialized as the `bridge` section of the control center configuration so a
/// deployment can change them without rebuilding workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeTokens {
    pub prefix: String,
    pub ack: String,
    pub cancel: String,
}

impl Default for BridgeTokens {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_BRIDGE_PREFIX.to_string(),
            ack: DEFAULT_BRIDGE_ACK.to_string(),
            cancel: DEFAULT_BRIDGE_CANCEL.to_string(),
        }
    }
}

impl BridgeTokens {
    /// Read tokens from the `MDF_BRIDGE_*` environment, falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: String| {
            std::env::var(key)
                .ok()
                .filter(|value| !value.is_empty())
                .unwrap_or(fallback)
        };
        Self {
            prefix: read(ENV_BRIDGE_PREFIX, defaults.prefix),
            ack: read(ENV_BRIDGE_ACK, defaults.ack),
            cancel: read(ENV_BRIDGE_CANCEL, defaults.cancel),
        }
    }

    /// Environment entries handed to a worker so it speaks the same vocabulary.
    pub fn to_environment(&self) -> Vec<(String, String)> {
        vec![
            (ENV_BRIDGE_PREFIX.to_string(), self.prefix.clone()),
            (ENV_BRIDGE_ACK.to_string(), self.ack.clone()),
            (ENV_BRIDGE_CANCEL.to_string(), self.cancel.clone()),
        ]
    }

    /// Whether a worker output line carries a bridge request.
    pub fn is_request_line(&self, line: &str) -> bool {
        !self.prefix.is_empty() && line.starts_with(&self.prefix)
    }
}

/// Kind of dialog a worker asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Alert,
    Prompt,
    Confirm,
    /// Any `type` value the control center does not know. Answered with ACK.
    Other(String),
}

impl RequestKind {
    pub fn as_str(&self) -> &str {
        match self {
            RequestKind::Alert => "alert",
            RequestKind::Prompt => "prompt",
            RequestKind::Confirm => "confirm",
            RequestKind::Other(kind) => kind,
        }
    }

    fn parse(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "alert" => RequestKind::Alert,
            "prompt" => RequestKind::Prompt,
            "confirm" => RequestKind::Confirm,
            _ => RequestKind::Other(kind.to_string()),
        }
    }
}

/// A decoded dialog request.
///
/// Only one is outstanding per worker at any time; the worker blocks on its
/// stdin until the matching [`BridgeResponse`] is written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    pub kind: RequestKind,
    pub text: String,
    pub title: String,
    /// Pre-filled value of a prompt
    pub default_value: String,
    /// Ordered button labels of a confirm, already normalized
    pub buttons: Vec<String>,
    /// Label of the single alert button
    pub button: Option<String>,
    pub require_input: bool,
    pub allow_cancel: bool,
    /// When non-empty, cancelling a prompt asks this question first
    pub cancel_message: Option<String>,
}

impl BridgeRequest {
    fn base(kind: RequestKind, text: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            title: title.into(),
            default_value: String::new(),
            buttons: Vec::new(),
            button: None,
            require_input: false,
            allow_cancel: true,
            cancel_message: None,
        }
    }

    pub fn alert(text: impl Into<String>, title: impl Into<String>) -> Self {
        Self::base(RequestKind::Alert, text, title)
    }

    pub fn prompt(
        text: impl Into<String>,
        title: impl Into<String>,
        default_value: impl Into<String>,
    ) -> Self {
        let mut request = Self::base(RequestKind::Prompt, text, title);
        request.default_value = default_value.into();
        request
    }

    pub fn confirm<I, S>(text: impl Into<String>, title: impl Into<String>, buttons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut request = Self::base(RequestKind::Confirm, text, title);
        request.buttons = normalize_buttons(buttons);
        request
    }

    pub fn with_button(mut self, label: impl Into<String>) -> Self {
        self.button = Some(label.into());
        self
    }

    pub fn with_require_input(mut self, require_input: bool) -> Self {
        self.require_input = require_input;
        self
    }

    pub fn with_allow_cancel(mut self, allow_cancel: bool) -> Self {
        self.allow_cancel = allow_cancel;
        self
    }

    pub fn with_cancel_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.cancel_message = (!message.trim().is_empty()).then_some(message);
        self
    }

    /// Label a dismissed confirm resolves to: "Cancel" when offered, else the last label.
    pub fn confirm_fallback(&self) -> String {
        confirm_fallback(&self.buttons)
    }
}

/// The answer written back to a waiting worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeResponse {
    Ack,
    Cancel,
    Value(String),
}

/// JSON shape of a request on the wire. Field order is the emitted key order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireRequest {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    buttons: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    button: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    require_input: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_cancel: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cancel_message: Option<String>,
}

/// Encode a request as one wire line (without the trailing newline).
pub fn encode_request(tokens: &BridgeTokens, request: &BridgeRequest) -> String {
    let mut wire = WireRequest {
        kind: request.kind.as_str().to_string(),
        text: Some(request.text.clone()),
        title: Some(request.title.clone()),
        ..WireRequest::default()
    };

    match request.kind {
        RequestKind::Alert => {
            wire.button = request.button.clone();
        }
        RequestKind::Prompt => {
            wire.default = Some(request.default_value.clone());
            wire.require_input = Some(request.require_input);
            wire.allow_cancel = Some(request.allow_cancel);
            wire.cancel_message = Some(request.cancel_message.clone().unwrap_or_default());
        }
        RequestKind::Confirm => {
            wire.buttons = Some(
                request
                    .buttons
                    .iter()
                    .map(|label| Value::String(label.clone()))
                    .collect(),
            );
        }
        RequestKind::Other(_) => {}
    }

    // A struct of strings, bools and string arrays always serializes.
    let payload = serde_json::to_string(&wire).unwrap_or_else(|_| "{}".to_string());
    format!("{}{}", tokens.prefix, payload)
}

/// Decode a worker output line into a request.
///
/// A syntactically valid object with an unknown or missing `type` decodes to
/// [`RequestKind::Other`]; only unparseable payloads are errors.
pub fn decode_request(tokens: &BridgeTokens, line: &str) -> Result<BridgeRequest, BridgeError> {
    let payload = line
        .strip_prefix(tokens.prefix.as_str())
        .filter(|_| !tokens.prefix.is_empty())
        .ok_or(BridgeError::MissingPrefix)?;

    let value: Value = serde_json::from_str(payload.trim())?;
    if !value.is_object() {
        return Err(BridgeError::NotAnObject);
    }
    let wire: WireRequest = serde_json::from_value(value)?;

    let kind = RequestKind::parse(&wire.kind);
    let buttons = match kind {
        RequestKind::Confirm => normalize_button_values(wire.buttons.unwrap_or_default()),
        _ => Vec::new(),
    };

    Ok(BridgeRequest {
        kind,
        text: wire.text.unwrap_or_default(),
        title: wire.title.unwrap_or_default(),
        default_value: wire.default.unwrap_or_default(),
        buttons,
        button: wire.button.filter(|label| !label.trim().is_empty()),
        require_input: wire.require_input.unwrap_or(false),
        allow_cancel: wire.allow_cancel.unwrap_or(true),
        cancel_message: wire.cancel_message.filter(|m| !m.trim().is_empty()),
    })
}

/// Encode the answer line written to the worker's stdin (without newline).
pub fn encode_response(tokens: &BridgeTokens, response: &BridgeResponse) -> String {
    match response {
        BridgeResponse::Ack => tokens.ack.clone(),
        BridgeResponse::Cancel => tokens.cancel.clone(),
        // An empty answer means the operator gave none.
        BridgeResponse::Value(value) if value.is_empty() => tokens.cancel.clone(),
        BridgeResponse::Value(value) => value.replace(['\r', '\n'], " "),
    }
}

/// Decode a line read by the worker. `None` means EOF.
pub fn decode_response(tokens: &BridgeTokens, line: Option<&str>) -> BridgeResponse {
    let Some(line) = line else {
        return BridgeResponse::Cancel;
    };
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() || line == tokens.cancel {
        BridgeResponse::Cancel
    } else if line == tokens.ack {
        BridgeResponse::Ack
    } else {
        BridgeResponse::Value(line.to_string())
    }
}

/// Trim labels, drop empty ones, and fall back to OK/Cancel.
pub fn normalize_buttons<I, S>(buttons: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let labels: Vec<String> = buttons
        .into_iter()
        .map(|label| label.as_ref().trim().to_string())
        .filter(|label| !label.is_empty())
        .collect();

    if labels.is_empty() {
        DEFAULT_CONFIRM_BUTTONS.iter().map(|s| s.to_string()).collect()
    } else {
        labels
    }
}

fn normalize_button_values(values: Vec<Value>) -> Vec<String> {
    normalize_buttons(values.into_iter().filter_map(|value| match value {
        Value::String(label) => Some(label),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }))
}

/// Deterministic answer for a confirm closed without a click.
pub fn confirm_fallback(buttons: &[String]) -> String {
    buttons
        .iter()
        .find(|label| label.as_str() == "Cancel")
        .or_else(|| buttons.last())
        .cloned()
        .unwrap_or_else(|| "Cancel".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> BridgeTokens {
        BridgeTokens::default()
    }

    #[test]
    fn test_prompt_wire_format() {
        let request = BridgeRequest::prompt("Enter code", "Input", "");
        let line = encode_request(&tokens(), &request);

        assert_eq!(
            line,
            "__MDF_GUI_BRIDGE__{\"type\":\"prompt\",\"text\":\"Enter code\",\"title\":\"Input\",\
             \"default\":\"\",\"require_input\":false,\"allow_cancel\":true,\"cancel_message\":\"\"}"
        );
    }

    #[test]
    fn test_confirm_wire_format_lists_buttons() {
        let request = BridgeRequest::confirm("Proceed?", "Confirm", ["Yes", "No"]);
        let line = encode_request(&tokens(), &request);

        assert!(line.ends_with("\"buttons\":[\"Yes\",\"No\"]}"));
        assert!(!line.contains("\"default\""));
    }

    #[test]
    fn test_decode_prompt_with_flags() {
        let line = r#"__MDF_GUI_BRIDGE__{"type":"prompt","text":"Código","title":"Entrada","default":"7","require_input":true,"allow_cancel":false,"cancel_message":"Sure?"}"#;
        let request = decode_request(&tokens(), line).unwrap();

        assert_eq!(request.kind, RequestKind::Prompt);
        assert_eq!(request.text, "Código");
        assert_eq!(request.default_value, "7");
        assert!(request.require_input);
        assert!(!request.allow_cancel);
        assert_eq!(request.cancel_message.as_deref(), Some("Sure?"));
    }

    #[test]
    fn test_decode_confirm_normalizes_buttons() {
        let line = r#"__MDF_GUI_BRIDGE__{"type":"confirm","text":"?","buttons":["  Retry ","",3,null]}"#;
        let request = decode_request(&tokens(), line).unwrap();
        assert_eq!(request.buttons, vec!["Retry", "3"]);

        let line = r#"__MDF_GUI_BRIDGE__{"type":"confirm","text":"?","buttons":[]}"#;
        let request = decode_request(&tokens(), line).unwrap();
        assert_eq!(request.buttons, vec!["OK", "Cancel"]);
    }

    #[test]
    fn test_decode_malformed_payload() {
        let result = decode_request(&tokens(), "__MDF_GUI_BRIDGE__not-json");
        assert!(matches!(result, Err(BridgeError::MalformedPayload(_))));

        let result = decode_request(&tokens(), "__MDF_GUI_BRIDGE__[1,2]");
        assert!(matches!(result, Err(BridgeError::NotAnObject)));

        let result = decode_request(&tokens(), "[INFO] hello");
        assert!(matches!(result, Err(BridgeError::MissingPrefix)));
    }

    #[test]
    fn test_decode_unknown_type_is_not_an_error() {
        let line = r#"__MDF_GUI_BRIDGE__{"type":"toast","text":"hi"}"#;
        let request = decode_request(&tokens(), line).unwrap();
        assert_eq!(request.kind, RequestKind::Other("toast".to_string()));
    }

    #[test]
    fn test_response_encoding() {
        let t = tokens();
        assert_eq!(encode_response(&t, &BridgeResponse::Ack), DEFAULT_BRIDGE_ACK);
        assert_eq!(encode_response(&t, &BridgeResponse::Cancel), DEFAULT_BRIDGE_CANCEL);
        assert_eq!(encode_response(&t, &BridgeResponse::Value("42".into())), "42");
        assert_eq!(
            encode_response(&t, &BridgeResponse::Value("a\nb".into())),
            "a b"
        );
    }

    #[test]
    fn test_empty_value_is_sent_as_cancel() {
        let t = tokens();
        let wire = encode_response(&t, &BridgeResponse::Value(String::new()));
        assert_eq!(wire, DEFAULT_BRIDGE_CANCEL);
        assert_eq!(decode_response(&t, Some(&wire)), BridgeResponse::Cancel);
    }

    #[test]
    fn test_response_decoding() {
        let t = tokens();
        assert_eq!(decode_response(&t, Some("__MDF_GUI_ACK__\n")), BridgeResponse::Ack);
        assert_eq!(decode_response(&t, Some("__MDF_GUI_CANCEL__")), BridgeResponse::Cancel);
        assert_eq!(decode_response(&t, Some("42\r\n")), BridgeResponse::Value("42".into()));
        assert_eq!(decode_response(&t, Some("\n")), BridgeResponse::Cancel);
        assert_eq!(decode_response(&t, None), BridgeResponse::Cancel);
    }

    #[test]
    fn test_confirm_fallback() {
        let labels = |l: &[&str]| l.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(confirm_fallback(&labels(&["Cancel", "OK"])), "Cancel");
        assert_eq!(confirm_fallback(&labels(&["Yes", "No"])), "No");
    }

    #[test]
    fn test_custom_tokens() {
        let custom = BridgeTokens {
            prefix: "@@".into(),
            ack: "ok!".into(),
            cancel: "no!".into(),
        };
        let line = encode_request(&custom, &BridgeRequest::alert("x", "y"));
        assert!(custom.is_request_line(&line));
        assert!(!tokens().is_request_line(&line));
        assert_eq!(decode_request(&custom, &line).unwrap().kind, RequestKind::Alert);
    }
}
