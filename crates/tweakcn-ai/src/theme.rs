//! Theme styles and their JSON schema.
//!
//! A theme is a pair of style maps (`light` and `dark`) from shadcn/ui token
//! names to CSS values.  The schema is sent to the provider for structured
//! output and used again to validate the final object.

use std::collections::BTreeMap;

use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{AiError, Result};

/// Colour tokens every theme variant must define.
pub const REQUIRED_COLOR_TOKENS: &[&str] = &[
    "background",
    "foreground",
    "card",
    "card-foreground",
    "popover",
    "popover-foreground",
    "primary",
    "primary-foreground",
    "secondary",
    "secondary-foreground",
    "muted",
    "muted-foreground",
    "accent",
    "accent-foreground",
    "destructive",
    "destructive-foreground",
    "border",
    "input",
    "ring",
    "chart-1",
    "chart-2",
    "chart-3",
    "chart-4",
    "chart-5",
    "sidebar",
    "sidebar-foreground",
    "sidebar-primary",
    "sidebar-primary-foreground",
    "sidebar-accent",
    "sidebar-accent-foreground",
    "sidebar-border",
    "sidebar-ring",
];

/// Typography, radius, shadow and spacing tokens a variant may define.
pub const OPTIONAL_TOKENS: &[&str] = &[
    "font-sans",
    "font-serif",
    "font-mono",
    "radius",
    "shadow-color",
    "shadow-opacity",
    "shadow-blur",
    "shadow-spread",
    "shadow-offset-x",
    "shadow-offset-y",
    "letter-spacing",
    "spacing",
];

/// Name advertised to providers alongside the schema.
pub const THEME_SCHEMA_NAME: &str = "theme_styles";

/// A generated theme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeStyles {
    pub light: BTreeMap<String, String>,
    pub dark: BTreeMap<String, String>,
}

fn variant_schema() -> Value {
    let properties: Map<String, Value> = REQUIRED_COLOR_TOKENS
        .iter()
        .chain(OPTIONAL_TOKENS)
        .map(|token| ((*token).to_owned(), json!({ "type": "string", "minLength": 1 })))
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": REQUIRED_COLOR_TOKENS,
        "additionalProperties": false,
    })
}

/// The JSON schema of [`ThemeStyles`].
pub fn theme_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "light": variant_schema(),
            "dark": variant_schema(),
        },
        "required": ["light", "dark"],
        "additionalProperties": false,
    })
}

/// Compiled theme schema.
pub struct ThemeSchema {
    raw: Value,
    compiled: JSONSchema,
}

impl std::fmt::Debug for ThemeSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeSchema").finish_non_exhaustive()
    }
}

impl ThemeSchema {
    pub fn new() -> Result<Self> {
        let raw = theme_schema();
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&raw)
            .map_err(|e| AiError::SchemaValidation {
                reason: format!("failed to compile theme schema: {e}"),
            })?;
        Ok(Self { raw, compiled })
    }

    /// The schema as JSON, for sending to providers.
    pub fn as_json(&self) -> &Value {
        &self.raw
    }

    /// Validate a generated object and decode it.
    pub fn validate(&self, value: &Value) -> Result<ThemeStyles> {
        if let Err(errors) = self.compiled.validate(value) {
            let messages: Vec<String> = errors
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect();
            return Err(AiError::SchemaValidation {
                reason: messages.join(", "),
            });
        }
        Ok(serde_json::from_value(value.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(primary: &str) -> Value {
        let mut map: Map<String, Value> = REQUIRED_COLOR_TOKENS
            .iter()
            .map(|t| ((*t).to_owned(), json!("#ffffff")))
            .collect();
        map.insert("primary".into(), json!(primary));
        map.insert("radius".into(), json!("0.5rem"));
        Value::Object(map)
    }

    #[test]
    fn complete_theme_validates() {
        let schema = ThemeSchema::new().unwrap();
        let theme = json!({ "light": variant("#0d9488"), "dark": variant("#2dd4bf") });
        let styles = schema.validate(&theme).unwrap();
        assert_eq!(styles.light["primary"], "#0d9488");
        assert_eq!(styles.dark["radius"], "0.5rem");
    }

    #[test]
    fn missing_token_is_rejected() {
        let schema = ThemeSchema::new().unwrap();
        let mut light = variant("#0d9488");
        light.as_object_mut().unwrap().remove("ring");
        let err = schema
            .validate(&json!({ "light": light, "dark": variant("#000000") }))
            .unwrap_err();
        assert!(matches!(err, AiError::SchemaValidation { ref reason } if reason.contains("ring")));
    }

    #[test]
    fn unknown_token_and_missing_variant_are_rejected() {
        let schema = ThemeSchema::new().unwrap();
        let mut light = variant("#0d9488");
        light
            .as_object_mut()
            .unwrap()
            .insert("glow".into(), json!("#fff"));
        assert!(schema
            .validate(&json!({ "light": light, "dark": variant("#000") }))
            .is_err());
        assert!(schema.validate(&json!({ "light": variant("#000") })).is_err());
    }

    #[test]
    fn schema_lists_every_token() {
        let schema = theme_schema();
        let props = schema["properties"]["light"]["properties"]
            .as_object()
            .unwrap();
        assert_eq!(
            props.len(),
            REQUIRED_COLOR_TOKENS.len() + OPTIONAL_TOKENS.len()
        );
    }
}
