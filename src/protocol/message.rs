//! Protocol message shapes.
//!
//! Outbound requests are `{id, method, params}`; notifications drop the
//! `id`. Inbound messages are free-form JSON classified by
//! [`Inbound::parse`] in dispatch order.

use serde::Serialize;
use serde_json::{Value, json};

/// Outbound request or notification.
#[derive(Debug, Serialize)]
pub(super) struct Outbound<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: &'a str,
    pub params: Value,
}

impl Outbound<'_> {
    pub(super) fn to_json(&self) -> String {
        // Value-backed struct always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub(super) fn remote_call(fn_name: &str, args: Vec<Value>) -> Outbound<'static> {
    Outbound {
        id: None,
        method: "Remote.call",
        params: json!({ "fn": fn_name, "args": args }),
    }
}

pub(super) fn host_call_response(call_id: &Value, outcome: Result<Value, String>) -> Outbound<'static> {
    let params = match outcome {
        Ok(result) => json!({ "callId": call_id, "result": result }),
        Err(error) => json!({ "callId": call_id, "error": error }),
    };
    Outbound {
        id: None,
        method: "Host.callResponse",
        params,
    }
}

/// Scripts and stylesheets a page reported on connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelatedResources {
    pub scripts: Vec<String>,
    /// Stylesheet URL with the root URLs it was loaded under
    pub stylesheets: Vec<(String, Vec<String>)>,
}

impl RelatedResources {
    fn from_value(related: &Value) -> Self {
        let scripts = related
            .get("scripts")
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        let stylesheets = related
            .get("stylesheets")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .map(|(href, roots)| (href.clone(), string_list(roots)))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            scripts,
            stylesheets,
        }
    }
}

/// An inbound message, classified.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Inbound {
    /// The page calls a host function
    HostCall {
        name: String,
        params: Value,
        call_id: Value,
    },
    /// Answer to one of our requests
    Response {
        id: u64,
        result: Result<Value, String>,
    },
    /// The user clicked an element in the preview
    Clicked(Value),
    DocumentRelated(RelatedResources),
    StylesheetAdded {
        href: String,
        roots: Vec<String>,
    },
    StylesheetRemoved {
        href: String,
    },
    ScriptAdded {
        src: String,
    },
    ScriptRemoved {
        src: String,
    },
    /// Any other method
    Other {
        method: String,
        body: Value,
    },
}

impl Inbound {
    pub(super) fn parse(text: &str) -> Option<Self> {
        let msg: Value = serde_json::from_str(text).ok()?;
        let obj = msg.as_object()?;

        if let Some(name) = obj.get("call").and_then(Value::as_str) {
            return Some(Self::HostCall {
                name: name.to_string(),
                params: obj.get("params").cloned().unwrap_or(Value::Null),
                call_id: obj.get("callId").cloned().unwrap_or(Value::Null),
            });
        }

        if let Some(id) = obj.get("id").and_then(Value::as_u64) {
            let result = match obj.get("error") {
                Some(err) if !err.is_null() => Err(match err.as_str() {
                    Some(s) => s.to_string(),
                    None => err.to_string(),
                }),
                _ => Ok(obj.get("result").cloned().unwrap_or(Value::Null)),
            };
            return Some(Self::Response { id, result });
        }

        if obj.get("clicked").and_then(Value::as_bool) == Some(true) && obj.contains_key("tagId") {
            return Some(Self::Clicked(msg));
        }

        let method = obj.get("method").and_then(Value::as_str)?;
        let text_field = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

        let parsed = match method {
            "DocumentRelated" => Self::DocumentRelated(RelatedResources::from_value(
                obj.get("related").unwrap_or(&Value::Null),
            )),
            "StylesheetAdded" => Self::StylesheetAdded {
                href: text_field("href")?,
                roots: obj.get("roots").map(string_list).unwrap_or_default(),
            },
            "StylesheetRemoved" => Self::StylesheetRemoved {
                href: text_field("href")?,
            },
            "ScriptAdded" => Self::ScriptAdded {
                src: text_field("src")?,
            },
            "ScriptRemoved" => Self::ScriptRemoved {
                src: text_field("src")?,
            },
            other => Self::Other {
                method: other.to_string(),
                body: msg.clone(),
            },
        };
        Some(parsed)
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}
