//! Declarative resource shapes.
//!
//! A [`Shape`] is the single source of truth for a BREAD resource: the same
//! ordered field list drives input validation and the OPTIONS introspection
//! document, so the two can never diverge.

use serde_json::{json, Map, Value};

use crate::error::FieldDetail;

/// Field type plus its constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Str { max_length: Option<u32> },
    Int,
    Float,
    Bool,
}

impl FieldKind {
    fn schema_type(&self) -> &'static str {
        match self {
            FieldKind::Str { .. } => "string",
            FieldKind::Int => "integer",
            FieldKind::Float => "number",
            FieldKind::Bool => "boolean",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    required: bool,
    default: Option<Value>,
}

impl Field {
    fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
        }
    }

    pub fn str(name: &str) -> Self {
        Self::new(name, FieldKind::Str { max_length: None })
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn bool(name: &str) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    /// Cap the character count of a string field.
    pub fn max_length(mut self, limit: u32) -> Self {
        if let FieldKind::Str { max_length } = &mut self.kind {
            *max_length = Some(limit);
        }
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Default applied on create when the field is absent; implies optional.
    pub fn default_value(mut self, value: Value) -> Self {
        self.required = false;
        self.default = Some(value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// "display_name" -> "Display Name"
    fn title(&self) -> String {
        self.name
            .split('_')
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(c) => c.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How much of the shape a payload has to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// All required fields must be present; defaults are applied.
    Full,
    /// Only the fields present are validated, for partial updates.
    Partial,
}

/// Named, ordered set of typed fields. Immutable once declared.
#[derive(Debug, Clone)]
pub struct Shape {
    title: String,
    fields: Vec<Field>,
}

impl Shape {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The JSON-schema-like description served on OPTIONS routes.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = Map::new();
            prop.insert("title".into(), json!(field.title()));
            if let FieldKind::Str {
                max_length: Some(limit),
            } = &field.kind
            {
                prop.insert("maxLength".into(), json!(limit));
            }
            prop.insert("type".into(), json!(field.kind.schema_type()));
            properties.insert(field.name.clone(), Value::Object(prop));
            if field.required {
                required.push(json!(field.name));
            }
        }
        json!({
            "title": self.title,
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate a decoded payload against the shape.
    ///
    /// Returns the cleaned values in declared field order, or every
    /// field-level error found. Unknown keys are ignored.
    pub fn validate(
        &self,
        data: &Map<String, Value>,
        mode: ValidationMode,
    ) -> Result<Vec<(String, Value)>, Vec<FieldDetail>> {
        let mut cleaned = Vec::new();
        let mut errors = Vec::new();

        for field in &self.fields {
            match data.get(&field.name) {
                Some(value) => match field.check(value) {
                    Ok(v) => cleaned.push((field.name.clone(), v)),
                    Err(detail) => errors.push(detail),
                },
                None if mode == ValidationMode::Partial => continue,
                None => {
                    if let Some(default) = &field.default {
                        cleaned.push((field.name.clone(), default.clone()));
                    } else if field.required {
                        errors.push(FieldDetail::new(
                            &field.name,
                            "field required",
                            "value_error.missing",
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(cleaned)
        } else {
            Err(errors)
        }
    }
}

impl Field {
    fn check(&self, value: &Value) -> Result<Value, FieldDetail> {
        if value.is_null() {
            return if self.required {
                Err(FieldDetail::new(
                    &self.name,
                    "none is not an allowed value",
                    "type_error.none.not_allowed",
                ))
            } else {
                Ok(Value::Null)
            };
        }
        match &self.kind {
            FieldKind::Str { max_length } => {
                let s = value.as_str().ok_or_else(|| {
                    FieldDetail::new(&self.name, "str type expected", "type_error.str")
                })?;
                if let Some(limit) = max_length {
                    if s.chars().count() > *limit as usize {
                        return Err(FieldDetail::new(
                            &self.name,
                            &format!("ensure this value has at most {limit} characters"),
                            "value_error.any_str.max_length",
                        )
                        .with_ctx(json!({ "limit_value": limit })));
                    }
                }
                Ok(value.clone())
            }
            FieldKind::Int => {
                if value.as_i64().is_some() {
                    Ok(value.clone())
                } else {
                    Err(FieldDetail::new(
                        &self.name,
                        "value is not a valid integer",
                        "type_error.integer",
                    ))
                }
            }
            FieldKind::Float => {
                if value.as_f64().is_some() {
                    Ok(value.clone())
                } else {
                    Err(FieldDetail::new(
                        &self.name,
                        "value is not a valid float",
                        "type_error.float",
                    ))
                }
            }
            FieldKind::Bool => {
                if value.is_boolean() {
                    Ok(value.clone())
                } else {
                    Err(FieldDetail::new(
                        &self.name,
                        "value could not be parsed to a boolean",
                        "type_error.bool",
                    ))
                }
            }
        }
    }
}
