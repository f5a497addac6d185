//! The tools the hosted model may call, their declarations, and the dispatcher
//! that applies them to application state.

use crate::error::ToolError;
use crate::ui_state::{FormField, Section, UiStateSink};
use serde_json::{Map, Value, json};
use std::sync::Arc;

pub const NAVIGATE_TO_SECTION: &str = "navigate_to_section";
pub const FILL_FORM_FIELD: &str = "fill_form_field";

/// A validated tool call. Each variant carries exactly the arguments its tool
/// declares.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    NavigateToSection { section: Section },
    FillFormField { field: FormField, value: String },
}

impl ToolCall {
    /// Validates raw call arguments against the named tool's parameters.
    pub fn parse(name: &str, args: &Map<String, Value>) -> Result<Self, ToolError> {
        match name {
            NAVIGATE_TO_SECTION => {
                let given = required_str(args, "section")?;
                let section = Section::from_name(given).ok_or_else(|| ToolError::UnknownSection {
                    given: given.to_string(),
                    valid: join_names(Section::ALL.iter().map(Section::as_str)),
                })?;
                Ok(ToolCall::NavigateToSection { section })
            }
            FILL_FORM_FIELD => {
                let given = required_str(args, "fieldName")?;
                let field = FormField::from_name(given).ok_or_else(|| ToolError::UnknownField {
                    given: given.to_string(),
                    valid: join_names(FormField::ALL.iter().map(FormField::as_str)),
                })?;
                let value = required_str(args, "value")?.to_string();
                Ok(ToolCall::FillFormField { field, value })
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

fn required_str<'a>(args: &'a Map<String, Value>, name: &'static str) -> Result<&'a str, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Err(ToolError::MissingArgument(name)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ToolError::InvalidArgument {
            name,
            expected: "a string",
        }),
    }
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

/// Text returned to the model for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(String),
    Failure(String),
}

impl ToolOutcome {
    pub fn text(&self) -> &str {
        match self {
            ToolOutcome::Success(text) | ToolOutcome::Failure(text) => text,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }
}

/// Applies tool calls to a [`UiStateSink`].
#[derive(Clone)]
pub struct ToolDispatcher {
    sink: Arc<dyn UiStateSink>,
}

impl ToolDispatcher {
    pub fn new(sink: Arc<dyn UiStateSink>) -> Self {
        Self { sink }
    }

    /// Validates and runs one call. The state change is applied before this
    /// returns; a call that fails validation changes nothing.
    pub fn dispatch(&self, name: &str, args: &Map<String, Value>) -> ToolOutcome {
        match ToolCall::parse(name, args) {
            Ok(call) => ToolOutcome::Success(self.apply(call)),
            Err(e) => {
                tracing::warn!("Rejected tool call {}: {}", name, e);
                ToolOutcome::Failure(e.to_string())
            }
        }
    }

    fn apply(&self, call: ToolCall) -> String {
        match call {
            ToolCall::NavigateToSection { section } => {
                self.sink.set_active_section(section);
                format!("Navigated to the {} section.", section)
            }
            ToolCall::FillFormField { field, value } => {
                let message = format!("Set the {} field to \"{}\".", field, value);
                self.sink.set_field_value(field, value);
                message
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKind {
    /// A string restricted to the listed values.
    Enumeration(Vec<&'static str>),
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParameterKind,
    pub required: bool,
}

/// Declaration of one tool as advertised to the hosted model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    /// The parameter object in the OpenAPI subset the live API accepts.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut property = json!({
                "type": "STRING",
                "description": param.description,
            });
            if let ParameterKind::Enumeration(values) = &param.kind {
                property["enum"] = json!(values);
            }
            properties.insert(param.name.to_string(), property);
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name)
            .collect();

        json!({
            "type": "OBJECT",
            "properties": properties,
            "required": required,
        })
    }
}

/// Every tool the dispatcher accepts.
pub fn tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: NAVIGATE_TO_SECTION,
            description: "Navigate the application to one of its sections.",
            parameters: vec![ParameterSchema {
                name: "section",
                description: "The section to show.",
                kind: ParameterKind::Enumeration(Section::ALL.iter().map(Section::as_str).collect()),
                required: true,
            }],
        },
        ToolSchema {
            name: FILL_FORM_FIELD,
            description: "Fill in one field of the contact form.",
            parameters: vec![
                ParameterSchema {
                    name: "fieldName",
                    description: "The form field to fill.",
                    kind: ParameterKind::Enumeration(
                        FormField::ALL.iter().map(FormField::as_str).collect(),
                    ),
                    required: true,
                },
                ParameterSchema {
                    name: "value",
                    description: "The text to put in the field.",
                    kind: ParameterKind::Text,
                    required: true,
                },
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui_state::{MockUiStateSink, SharedAppState};
    use mockall::predicate::eq;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test arguments must be an object"),
        }
    }

    #[test]
    fn test_interleaved_calls_keep_last_value() {
        let state = SharedAppState::new();
        let dispatcher = ToolDispatcher::new(Arc::new(state.clone()));

        let emails = ["a@b.com", "x@y.com"];
        for email in emails {
            let outcome = dispatcher.dispatch(NAVIGATE_TO_SECTION, &args(json!({"section": "settings"})));
            assert!(outcome.is_success());
            assert!(outcome.text().contains("settings"));
            assert_eq!(state.snapshot().active_section, Section::Settings);

            let outcome = dispatcher.dispatch(
                FILL_FORM_FIELD,
                &args(json!({"fieldName": "email", "value": email})),
            );
            assert!(outcome.is_success());
            assert!(outcome.text().contains(email));
            assert_eq!(state.snapshot().field(FormField::Email), Some(email));
        }

        assert_eq!(state.snapshot().form.len(), 1);
    }

    #[test]
    fn test_unknown_section_fails_without_mutation() {
        let mut sink = MockUiStateSink::new();
        sink.expect_set_active_section().never();
        sink.expect_set_field_value().never();
        let dispatcher = ToolDispatcher::new(Arc::new(sink));

        let outcome = dispatcher.dispatch(NAVIGATE_TO_SECTION, &args(json!({"section": "billing"})));

        assert!(!outcome.is_success());
        assert!(outcome.text().contains("billing"));
        assert!(outcome.text().contains("settings"));
    }

    #[test]
    fn test_fill_form_field_calls_sink_once() {
        let mut sink = MockUiStateSink::new();
        sink.expect_set_field_value()
            .with(eq(FormField::Name), eq("Ada".to_string()))
            .times(1)
            .return_const(());
        let dispatcher = ToolDispatcher::new(Arc::new(sink));

        let outcome = dispatcher.dispatch(
            FILL_FORM_FIELD,
            &args(json!({"fieldName": "Name", "value": "Ada"})),
        );
        assert_eq!(outcome, ToolOutcome::Success("Set the name field to \"Ada\".".to_string()));
    }

    #[test]
    fn test_parse_rejects_malformed_arguments() {
        assert_eq!(
            ToolCall::parse(FILL_FORM_FIELD, &args(json!({"fieldName": "email"}))),
            Err(ToolError::MissingArgument("value"))
        );
        assert_eq!(
            ToolCall::parse(NAVIGATE_TO_SECTION, &args(json!({"section": 3}))),
            Err(ToolError::InvalidArgument {
                name: "section",
                expected: "a string"
            })
        );
        assert!(matches!(
            ToolCall::parse(FILL_FORM_FIELD, &args(json!({"fieldName": "address", "value": "x"}))),
            Err(ToolError::UnknownField { .. })
        ));
        assert_eq!(
            ToolCall::parse("delete_everything", &Map::new()),
            Err(ToolError::UnknownTool("delete_everything".to_string()))
        );
    }

    #[test]
    fn test_schemas_declare_closed_sets() {
        let schemas = tool_schemas();
        assert_eq!(schemas.len(), 2);

        let navigate = schemas[0].parameters_schema();
        assert_eq!(navigate["required"], json!(["section"]));
        assert_eq!(
            navigate["properties"]["section"]["enum"],
            json!(["home", "services", "appointments", "patients", "settings"])
        );

        let fill = schemas[1].parameters_schema();
        assert_eq!(fill["required"], json!(["fieldName", "value"]));
        assert!(fill["properties"]["value"].get("enum").is_none());
    }
}
