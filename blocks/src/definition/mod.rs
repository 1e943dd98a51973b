pub mod value;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::definition::value::ParameterValue;

/// Block category. The set is open: the well-known categories have their own
/// variants and anything else is kept verbatim in [`Category::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Motion,
    Control,
    Sensing,
    Gripper,
    Looks,
    Custom(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Motion => "motion",
            Category::Control => "control",
            Category::Sensing => "sensing",
            Category::Gripper => "gripper",
            Category::Looks => "looks",
            Category::Custom(id) => id,
        }
    }
}

impl From<String> for Category {
    fn from(id: String) -> Self {
        match id.as_str() {
            "motion" => Category::Motion,
            "control" => Category::Control,
            "sensing" => Category::Sensing,
            "gripper" => Category::Gripper,
            "looks" => Category::Looks,
            _ => Category::Custom(id),
        }
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visual shape of a block. Governs where a block may be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Stackable statement.
    Command,
    /// Value-producing expression.
    Reporter,
    /// Boolean-producing expression.
    Boolean,
    /// Script start; nothing attaches above it.
    Hat,
    /// Script end; nothing attaches below it.
    Cap,
}

impl Shape {
    /// Shapes that may be stacked inside a control block's body.
    pub fn is_stackable(self) -> bool {
        matches!(self, Shape::Command | Shape::Hat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Number,
    /// A number in degrees.
    Angle,
    String,
    Dropdown,
    Boolean,
}

/// Declaration of one parameter slot on a block definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub kind: ParameterKind,
    pub default: ParameterValue,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
    /// Choices for [`ParameterKind::Dropdown`].
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
}

impl ParameterDefinition {
    pub fn number(name: &str, default: f64) -> Self {
        Self::new(name, ParameterKind::Number, ParameterValue::Number(default))
    }

    pub fn angle(name: &str, default: f64) -> Self {
        Self::new(name, ParameterKind::Angle, ParameterValue::Number(default))
            .with_range(-360.0, 360.0, 1.0)
    }

    pub fn boolean(name: &str, default: bool) -> Self {
        Self::new(name, ParameterKind::Boolean, ParameterValue::Bool(default))
    }

    pub fn text(name: &str, default: &str) -> Self {
        Self::new(name, ParameterKind::String, ParameterValue::Text(default.to_string()))
    }

    /// A dropdown whose default is its first option.
    pub fn dropdown(name: &str, options: &[&str]) -> Self {
        let default = options.first().copied().unwrap_or_default();
        let mut param = Self::new(name, ParameterKind::Dropdown, ParameterValue::from(default));
        param.options = options.iter().map(|o| o.to_string()).collect();
        param
    }

    /// Whether `value` has the representation this parameter's kind stores.
    pub fn accepts(&self, value: &ParameterValue) -> bool {
        matches!(
            (self.kind, value),
            (ParameterKind::Number | ParameterKind::Angle, ParameterValue::Number(_))
                | (ParameterKind::String | ParameterKind::Dropdown, ParameterValue::Text(_))
                | (ParameterKind::Boolean, ParameterValue::Bool(_))
        )
    }

    pub fn with_range(mut self, min: f64, max: f64, step: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self.step = Some(step);
        self
    }

    fn new(name: &str, kind: ParameterKind, default: ParameterValue) -> Self {
        ParameterDefinition {
            name: name.to_string(),
            kind,
            default,
            min: None,
            max: None,
            step: None,
            options: Vec::new(),
            placeholder: None,
        }
    }
}

/// Static template describing one instruction type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDefinition {
    /// Unique across the registry.
    pub id: String,
    /// Display label.
    pub name: String,
    pub category: Category,
    pub shape: Shape,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
    /// Whether the block owns a body slot that hosts child blocks.
    #[serde(default)]
    pub has_body: bool,
}

impl BlockDefinition {
    pub fn new(id: &str, name: &str, category: Category, shape: Shape) -> Self {
        BlockDefinition {
            id: id.to_string(),
            name: name.to_string(),
            category,
            shape,
            color: String::new(),
            description: String::new(),
            parameters: Vec::new(),
            has_body: false,
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_body(mut self) -> Self {
        self.has_body = true;
        self
    }

    pub fn with_color(mut self, color: &str) -> Self {
        self.color = color.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Only control-category command blocks with a body slot may host children.
    pub fn can_host_children(&self) -> bool {
        self.category == Category::Control && self.shape == Shape::Command && self.has_body
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|p| p.name == name)
    }
}
