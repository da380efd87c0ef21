//! Declarative payload schemas for inbound messages, checked by one generic
//! validator before any handler runs.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::{config::AppConfig, dto::ws::InboundKind, error::ProtocolError};

/// Upper bound for identifier fields (player ids, vote targets).
pub const MAX_ID_LENGTH: usize = 64;

/// JSON type a payload field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON boolean.
    Bool,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            FieldKind::String => "a string",
            FieldKind::Number => "a number",
            FieldKind::Bool => "a boolean",
        }
    }
}

/// Constraint on one payload field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name as it appears on the wire.
    pub name: &'static str,
    /// Expected JSON type.
    pub kind: FieldKind,
    /// Whether the field must be present (a `null` counts as absent).
    pub required: bool,
    /// Maximum length in characters for string fields.
    pub max_len: Option<usize>,
}

impl FieldSpec {
    fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            max_len: None,
        }
    }

    fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }
}

/// Schema of one inbound message type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSchema {
    /// Whether the sender must have joined a room first.
    pub requires_player: bool,
    /// Field constraints, checked in order.
    pub fields: Vec<FieldSpec>,
}

impl MessageSchema {
    fn open() -> Self {
        Self::default()
    }

    fn joined(fields: Vec<FieldSpec>) -> Self {
        Self {
            requires_player: true,
            fields,
        }
    }

    /// Check `payload` against every field spec. Unknown fields are ignored.
    pub fn validate(&self, payload: &Map<String, Value>) -> Result<(), ProtocolError> {
        for spec in &self.fields {
            let value = match payload.get(spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(ProtocolError::schema(spec.name, "field is required"));
                    }
                    continue;
                }
                Some(value) => value,
            };

            if !spec.kind.matches(value) {
                return Err(ProtocolError::schema(
                    spec.name,
                    format!("expected {}", spec.kind.describe()),
                ));
            }

            if let (Some(max), Some(text)) = (spec.max_len, value.as_str()) {
                if text.chars().count() > max {
                    return Err(ProtocolError::MessageTooLong {
                        field: spec.name.to_string(),
                        max,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Schemas for every inbound message type.
#[derive(Debug, Clone)]
pub struct ProtocolCatalog {
    schemas: HashMap<InboundKind, MessageSchema>,
}

impl ProtocolCatalog {
    /// Build the catalog, taking text limits from the configuration.
    pub fn new(config: &AppConfig) -> Self {
        use FieldKind::String as Text;

        let schemas = InboundKind::ALL
            .into_iter()
            .map(|kind| {
                let schema = match kind {
                    InboundKind::Ping | InboundKind::Pong => MessageSchema::open(),
                    InboundKind::Join => MessageSchema {
                        requires_player: false,
                        fields: vec![
                            FieldSpec::required("playerName", Text)
                                .max_len(config.max_name_length),
                            FieldSpec::required("roomCode", Text),
                            FieldSpec::optional("playerId", Text).max_len(MAX_ID_LENGTH),
                        ],
                    },
                    InboundKind::Leave
                    | InboundKind::ToggleReady
                    | InboundKind::StartGame
                    | InboundKind::NewGame => MessageSchema::joined(Vec::new()),
                    InboundKind::Chat => MessageSchema::joined(vec![
                        FieldSpec::required("message", Text).max_len(config.max_chat_length),
                    ]),
                    InboundKind::Vote => MessageSchema::joined(vec![
                        FieldSpec::required("targetId", Text).max_len(MAX_ID_LENGTH),
                    ]),
                    InboundKind::SubmitAnswer => MessageSchema::joined(vec![
                        FieldSpec::required("answer", Text).max_len(config.max_answer_length),
                    ]),
                    InboundKind::ForcePhaseTransition => {
                        MessageSchema::joined(vec![FieldSpec::required("phase", Text)])
                    }
                };
                (kind, schema)
            })
            .collect();

        Self { schemas }
    }

    /// Schema of `kind`.
    pub fn schema(&self, kind: InboundKind) -> &MessageSchema {
        // Every kind is inserted in `new`.
        &self.schemas[&kind]
    }
}
