//! Static per-action argument schemas and request validation.
//!
//! Validation is pure: it never touches shared state, so a rejected request
//! leaves no trace beyond the error it returns.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::ValidationError;
use crate::types::{ActionMode, ActionName, ActionRequest, Args, RequestIdentity, ValidatedRequest};

static AGENT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,63}$").unwrap());

/// Longest accepted request/mission/correlation id, in characters.
pub const MAX_IDENTIFIER_LEN: usize = 128;

const CHAT_COLORS: &[&str] = &["primary", "blue", "green", "orange", "purple"];

// =============================================================================
// Schema types
// =============================================================================

/// Type and bounds of a single argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    /// Trimmed string, length counted in characters.
    String { min_len: usize, max_len: usize },
    /// Trimmed string made only of ASCII digits.
    Digits { min_len: usize, max_len: usize },
    /// Trimmed string drawn from a fixed set.
    Enum { values: &'static [&'static str] },
    Boolean,
    /// Whole number within an inclusive range.
    Integer { min: i64, max: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    #[serde(flatten)]
    pub field_type: FieldType,
}

/// Rules that relate two or more fields, checked after per-field validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CrossFieldRule {
    /// At least one of the listed fields must be present.
    AtLeastOneOf { fields: &'static [&'static str] },
    /// `field` may only be present when boolean `flag` is true.
    RequiresFlag {
        field: &'static str,
        flag: &'static str,
    },
}

/// Validation rules for one registered action.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActionSchema {
    pub action: ActionName,
    pub mode: ActionMode,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
    pub rules: &'static [CrossFieldRule],
}

impl ActionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }
}

// =============================================================================
// Registry
// =============================================================================

const fn text(name: &'static str, required: bool, max_len: usize) -> FieldSpec {
    FieldSpec {
        name,
        required,
        field_type: FieldType::String { min_len: 1, max_len },
    }
}

const fn flag(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        required: false,
        field_type: FieldType::Boolean,
    }
}

const CHANNEL: FieldSpec = text("channel", false, 64);

static SCHEMAS: [ActionSchema; 7] = [
    ActionSchema {
        action: ActionName::StartStream,
        mode: ActionMode::Async,
        description: "Start encoder output, optionally applying title and game first",
        fields: &[
            CHANNEL,
            text("title", false, 140),
            text("game_name", false, 100),
        ],
        rules: &[],
    },
    ActionSchema {
        action: ActionName::StopStream,
        mode: ActionMode::Async,
        description: "Stop encoder output",
        fields: &[text("reason", false, 200)],
        rules: &[],
    },
    ActionSchema {
        action: ActionName::SetTitle,
        mode: ActionMode::Sync,
        description: "Update the broadcast title",
        fields: &[text("title", true, 140), CHANNEL],
        rules: &[],
    },
    ActionSchema {
        action: ActionName::SetGame,
        mode: ActionMode::Sync,
        description: "Update the broadcast category by name or id",
        fields: &[
            text("game_name", false, 100),
            FieldSpec {
                name: "game_id",
                required: false,
                field_type: FieldType::Digits {
                    min_len: 1,
                    max_len: 32,
                },
            },
            CHANNEL,
        ],
        rules: &[CrossFieldRule::AtLeastOneOf {
            fields: &["game_name", "game_id"],
        }],
    },
    ActionSchema {
        action: ActionName::SendChat,
        mode: ActionMode::Sync,
        description: "Post a chat message, optionally as an announcement",
        fields: &[
            text("message", true, 500),
            flag("announce"),
            FieldSpec {
                name: "color",
                required: false,
                field_type: FieldType::Enum {
                    values: CHAT_COLORS,
                },
            },
            CHANNEL,
        ],
        rules: &[CrossFieldRule::RequiresFlag {
            field: "color",
            flag: "announce",
        }],
    },
    ActionSchema {
        action: ActionName::CreateClip,
        mode: ActionMode::Sync,
        description: "Capture a clip of the live broadcast",
        fields: &[flag("has_delay"), CHANNEL],
        rules: &[],
    },
    ActionSchema {
        action: ActionName::CreateMarker,
        mode: ActionMode::Sync,
        description: "Place a marker at the current broadcast position",
        fields: &[text("description", false, 140), CHANNEL],
        rules: &[],
    },
];

/// Every registered schema, in registry order.
pub fn schemas() -> &'static [ActionSchema] {
    &SCHEMAS
}

pub fn schema_for(action: ActionName) -> &'static ActionSchema {
    // SCHEMAS is declared in ActionName variant order
    &SCHEMAS[action as usize]
}

// =============================================================================
// Validation
// =============================================================================

/// Validate raw arguments for `action` and return the normalized form.
pub fn validate_args(action: ActionName, raw: &Value) -> Result<Args, ValidationError> {
    validate_against(schema_for(action), raw)
}

/// Validate raw arguments against an explicit schema.
pub fn validate_against(schema: &ActionSchema, raw: &Value) -> Result<Args, ValidationError> {
    let action = schema.action;
    let empty = serde_json::Map::new();
    let input = match raw {
        Value::Null => &empty,
        Value::Object(map) => map,
        _ => return Err(ValidationError::ArgsNotObject),
    };

    if let Some(key) = input.keys().find(|k| schema.field(k).is_none()) {
        return Err(ValidationError::UnexpectedField {
            action,
            field: key.clone(),
        });
    }

    let mut out = Args::new();
    for spec in schema.fields {
        let value = match input.get(spec.name) {
            None | Some(Value::Null) => None,
            Some(v) => normalize_field(action, spec, v)?,
        };
        match value {
            Some(v) => {
                out.insert(spec.name.to_string(), v);
            }
            None if spec.required => {
                return Err(ValidationError::MissingField {
                    action,
                    field: spec.name.to_string(),
                });
            }
            None => {}
        }
    }

    for rule in schema.rules {
        check_rule(action, rule, &out)?;
    }

    Ok(out)
}

/// Returns `Ok(None)` for a string that is empty after trimming.
fn normalize_field(
    action: ActionName,
    spec: &FieldSpec,
    value: &Value,
) -> Result<Option<Value>, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidField {
        action,
        field: spec.name.to_string(),
        reason,
    };

    match spec.field_type {
        FieldType::String { min_len, max_len } => {
            let s = expect_str(value).ok_or_else(|| invalid("expected a string".to_string()))?;
            if s.is_empty() {
                return Ok(None);
            }
            check_len(s, min_len, max_len).map_err(invalid)?;
            Ok(Some(Value::String(s.to_string())))
        }
        FieldType::Digits { min_len, max_len } => {
            let s = expect_str(value).ok_or_else(|| invalid("expected a string".to_string()))?;
            if s.is_empty() {
                return Ok(None);
            }
            check_len(s, min_len, max_len).map_err(invalid)?;
            if !s.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid("must contain only digits".to_string()));
            }
            Ok(Some(Value::String(s.to_string())))
        }
        FieldType::Enum { values } => {
            let s = expect_str(value).ok_or_else(|| invalid("expected a string".to_string()))?;
            if s.is_empty() {
                return Ok(None);
            }
            if !values.contains(&s) {
                return Err(invalid(format!("must be one of {}", values.join(", "))));
            }
            Ok(Some(Value::String(s.to_string())))
        }
        FieldType::Boolean => match value {
            Value::Bool(b) => Ok(Some(Value::Bool(*b))),
            _ => Err(invalid("expected a boolean".to_string())),
        },
        FieldType::Integer { min, max } => {
            let n = value
                .as_i64()
                .ok_or_else(|| invalid("expected an integer".to_string()))?;
            if n < min || n > max {
                return Err(invalid(format!("must be between {min} and {max}")));
            }
            Ok(Some(Value::from(n)))
        }
    }
}

fn expect_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim)
}

fn check_len(s: &str, min_len: usize, max_len: usize) -> Result<(), String> {
    let len = s.chars().count();
    if len < min_len {
        return Err(format!("must be at least {min_len} characters"));
    }
    if len > max_len {
        return Err(format!("must be at most {max_len} characters"));
    }
    Ok(())
}

fn check_rule(action: ActionName, rule: &CrossFieldRule, args: &Args) -> Result<(), ValidationError> {
    match *rule {
        CrossFieldRule::AtLeastOneOf { fields } => {
            if !fields.iter().any(|f| args.contains_key(*f)) {
                return Err(ValidationError::CrossField {
                    action,
                    reason: format!("one of {} is required", fields.join(", ")),
                });
            }
        }
        CrossFieldRule::RequiresFlag { field, flag } => {
            let flag_set = matches!(args.get(flag), Some(Value::Bool(true)));
            if args.contains_key(field) && !flag_set {
                return Err(ValidationError::CrossField {
                    action,
                    reason: format!("{field} requires {flag} = true"),
                });
            }
        }
    }
    Ok(())
}

/// Trim an optional identifier, dropping it when empty.
fn normalize_identifier(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<String>, ValidationError> {
    let Some(value) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::InvalidIdentifier {
            field,
            reason: format!("must be at most {MAX_IDENTIFIER_LEN} characters"),
        });
    }
    Ok(Some(value.to_string()))
}

/// Validate a whole request: agent id, action name, identifiers and arguments.
///
/// When `require_identity` is set, async actions must carry at least one of
/// `request_id`, `mission_id` or `correlation_id`.
pub fn validate_request(
    request: &ActionRequest,
    require_identity: bool,
) -> Result<ValidatedRequest, ValidationError> {
    let action: ActionName = request
        .action
        .trim()
        .parse()
        .map_err(|_| ValidationError::UnknownAction(request.action.clone()))?;

    let agent_id = request.agent_id.trim();
    if !AGENT_ID_RE.is_match(agent_id) {
        return Err(ValidationError::InvalidAgentId(request.agent_id.clone()));
    }

    let identity = RequestIdentity {
        request_id: normalize_identifier("request_id", request.request_id.as_deref())?,
        mission_id: normalize_identifier("mission_id", request.mission_id.as_deref())?,
        correlation_id: normalize_identifier("correlation_id", request.correlation_id.as_deref())?,
    };

    let args = validate_args(action, &request.args)?;

    if require_identity && action.mode() == ActionMode::Async && identity.is_empty() {
        return Err(ValidationError::MissingRequestIdentity(action));
    }

    Ok(ValidatedRequest {
        agent_id: agent_id.to_string(),
        action,
        args,
        identity,
    })
}
