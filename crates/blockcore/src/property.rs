use crate::{ConfigError, Value};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configured property values of a node, keyed by property name
pub type Properties = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Select,
    Json,
}

impl PropertyType {
    fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Select => "select",
            PropertyType::Json => "json",
        }
    }
}

/// A choice offered by a `select` property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

/// Declaration of one configurable property of a block type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    pub display_name: String,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(default)]
    pub validation: PropertyValidation,
}

impl PropertyDefinition {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            property_type,
            description: String::new(),
            required: false,
            default_value: None,
            options: Vec::new(),
            validation: PropertyValidation::default(),
        }
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn option(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.push(SelectOption {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.validation.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.validation.max = Some(max);
        self
    }

    pub fn pattern(mut self, regex: impl Into<String>) -> Self {
        self.validation.regex = Some(regex.into());
        self
    }

    pub fn max_length(mut self, length: usize) -> Self {
        self.validation.length = Some(length);
        self
    }

    /// Check a single configured value against this declaration
    pub fn check(&self, value: &Value) -> Result<(), ConfigError> {
        let invalid_type = || ConfigError::InvalidType {
            property: self.name.clone(),
            expected: self.property_type.as_str().to_string(),
            actual: value.type_name().to_string(),
        };

        match self.property_type {
            PropertyType::Number => {
                let number = value.to_number().ok_or_else(invalid_type)?;
                if let Some(min) = self.validation.min {
                    if number < min {
                        return Err(ConfigError::OutOfRange {
                            property: self.name.clone(),
                            value: number,
                            bound: format!(">= {}", min),
                        });
                    }
                }
                if let Some(max) = self.validation.max {
                    if number > max {
                        return Err(ConfigError::OutOfRange {
                            property: self.name.clone(),
                            value: number,
                            bound: format!("<= {}", max),
                        });
                    }
                }
            }
            PropertyType::Boolean => {
                value.to_boolean().ok_or_else(invalid_type)?;
            }
            PropertyType::String => {
                let text = value.as_str().ok_or_else(invalid_type)?;
                if let Some(max) = self.validation.length {
                    if text.chars().count() > max {
                        return Err(ConfigError::InvalidLength {
                            property: self.name.clone(),
                            max,
                        });
                    }
                }
                if let Some(pattern) = &self.validation.regex {
                    let re = Regex::new(pattern).map_err(|e| ConfigError::Invalid {
                        property: self.name.clone(),
                        reason: format!("bad validation pattern: {}", e),
                    })?;
                    if !re.is_match(text) {
                        return Err(ConfigError::PatternMismatch {
                            property: self.name.clone(),
                            pattern: pattern.clone(),
                        });
                    }
                }
            }
            PropertyType::Select => {
                if !self.options.is_empty() && !self.options.iter().any(|o| &o.value == value) {
                    let allowed = self
                        .options
                        .iter()
                        .map(|o| o.value.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(ConfigError::InvalidOption {
                        property: self.name.clone(),
                        allowed,
                    });
                }
            }
            PropertyType::Json => {}
        }

        Ok(())
    }
}

/// Validate a property mapping against its declarations.
///
/// Required properties must be present and non-null; every present,
/// declared property must satisfy its type and validation rules. Keys with
/// no declaration are ignored.
pub fn validate_properties(
    definitions: &[PropertyDefinition],
    properties: &Properties,
) -> Result<(), ConfigError> {
    for def in definitions {
        match properties.get(&def.name) {
            None | Some(Value::Null) if def.required => {
                return Err(ConfigError::MissingProperty(def.name.clone()));
            }
            None | Some(Value::Null) => {}
            Some(value) => def.check(value)?,
        }
    }
    Ok(())
}

/// Fill in declared defaults for properties the node leaves unset.
pub fn resolve_properties(
    definitions: &[PropertyDefinition],
    properties: &Properties,
) -> Properties {
    let mut resolved = properties.clone();
    for def in definitions {
        if let Some(default) = &def.default_value {
            let unset = resolved.get(&def.name).map_or(true, Value::is_null);
            if unset {
                resolved.insert(def.name.clone(), default.clone());
            }
        }
    }
    resolved
}
