use super::{DbError, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// One entity of a record type: field name -> value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter, mostly for fixtures.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Returns the field value, treating an absent field as `Null`.
    pub fn get(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(field).unwrap_or(&NULL)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn retain(&mut self, keep: impl FnMut(&String, &mut Value) -> bool) {
        self.fields.retain(keep);
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Float,
    Text,
    Boolean,
    /// Any scalar; no type check beyond cardinality.
    Any,
    Link(LinkDef),
}

/// Link metadata for a field that references records of another type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDef {
    pub target: String,
    #[serde(default)]
    pub inverse: Option<String>,
    /// Computed from another field's inverse; never writable by directives.
    #[serde(default)]
    pub denormalized_inverse: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub is_array: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            is_array: false,
            nullable: true,
        }
    }

    pub fn link(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::Link(LinkDef {
                target: target.into(),
                inverse: None,
                denormalized_inverse: false,
            }),
        )
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the inverse field on the linked type. No-op for non-link fields.
    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        if let FieldType::Link(link) = &mut self.field_type {
            link.inverse = Some(inverse.into());
        }
        self
    }

    pub fn link_def(&self) -> Option<&LinkDef> {
        match &self.field_type {
            FieldType::Link(link) => Some(link),
            _ => None,
        }
    }

    pub fn is_denormalized(&self) -> bool {
        self.link_def().is_some_and(|link| link.denormalized_inverse)
    }

    /// Validates a single value against this field's declaration.
    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Field '{}' cannot be null",
                    self.name
                )));
            }
            return Ok(());
        }

        if self.is_array {
            let Value::List(items) = value else {
                return Err(DbError::TypeMismatch(format!(
                    "Field '{}' expects a list, got {}",
                    self.name,
                    value.type_name()
                )));
            };
            return items.iter().try_for_each(|item| self.validate_scalar(item));
        }

        self.validate_scalar(value)
    }

    fn validate_scalar(&self, value: &Value) -> Result<()> {
        let compatible = match (&self.field_type, value) {
            (_, Value::List(_)) => false,
            (_, Value::Null) => !self.is_array,
            (FieldType::Any, _) => true,
            (FieldType::Integer, Value::Integer(_)) => true,
            (FieldType::Float, Value::Float(_) | Value::Integer(_)) => true,
            (FieldType::Text, Value::Text(_)) => true,
            (FieldType::Boolean, Value::Boolean(_)) => true,
            (FieldType::Link(_), Value::Integer(_) | Value::Text(_)) => true,
            _ => false,
        };

        if compatible {
            Ok(())
        } else {
            Err(DbError::TypeMismatch(format!(
                "Field '{}' cannot hold {} value {}",
                self.name,
                value.type_name(),
                value
            )))
        }
    }
}

/// Declaration of one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    pub fields: Vec<FieldDef>,
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

impl RecordSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: default_primary_key(),
            fields: Vec::new(),
        }
    }

    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = field.into();
        self
    }

    pub fn field(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        name == self.primary_key || self.get_field(name).is_some()
    }

    /// Link fields in declaration order.
    pub fn link_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.link_def().is_some())
    }

    pub fn link_field_names(&self) -> Vec<String> {
        self.link_fields().map(|f| f.name.clone()).collect()
    }

    pub fn is_denormalized(&self, name: &str) -> bool {
        self.get_field(name).is_some_and(FieldDef::is_denormalized)
    }

    pub fn id_of<'a>(&self, record: &'a Record) -> &'a Value {
        record.get(&self.primary_key)
    }
}

/// All record types known to one engine.
///
/// Construction validates every link declaration and synthesizes a
/// denormalized inverse field for each link that declares none, so every link
/// is two-way afterwards.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, Arc<RecordSchema>>,
}

impl SchemaRegistry {
    pub fn new(schemas: impl IntoIterator<Item = RecordSchema>) -> Result<Self> {
        let mut types: BTreeMap<String, RecordSchema> = BTreeMap::new();
        for schema in schemas {
            if types.contains_key(&schema.name) {
                return Err(DbError::BadRequest(format!(
                    "Record type '{}' declared twice",
                    schema.name
                )));
            }
            types.insert(schema.name.clone(), schema);
        }

        let mut synthesized: Vec<(String, FieldDef)> = Vec::new();
        for schema in types.values_mut() {
            let type_name = schema.name.clone();
            for field in schema.fields.iter_mut() {
                let FieldType::Link(link) = &mut field.field_type else {
                    continue;
                };
                if link.inverse.is_none() && !link.denormalized_inverse {
                    let inverse = format!("__{}_{}_inverse", type_name, field.name);
                    link.inverse = Some(inverse.clone());
                    synthesized.push((
                        link.target.clone(),
                        FieldDef {
                            name: inverse,
                            field_type: FieldType::Link(LinkDef {
                                target: type_name.clone(),
                                inverse: Some(field.name.clone()),
                                denormalized_inverse: true,
                            }),
                            is_array: true,
                            nullable: true,
                        },
                    ));
                }
            }
        }

        for (target, def) in synthesized {
            let schema = types
                .get_mut(&target)
                .ok_or_else(|| DbError::TypeNotFound(target.clone()))?;
            schema.fields.push(def);
        }

        let registry = Self {
            types: types
                .into_iter()
                .map(|(name, schema)| (name, Arc::new(schema)))
                .collect(),
        };
        registry.check_links()?;
        Ok(registry)
    }

    fn check_links(&self) -> Result<()> {
        for schema in self.types.values() {
            for field in schema.link_fields() {
                let Some(link) = field.link_def() else {
                    continue;
                };
                let target = self.get(&link.target)?;
                let Some(inverse) = &link.inverse else {
                    continue;
                };
                let inverse_def = target.get_field(inverse).ok_or_else(|| {
                    DbError::BadRequest(format!(
                        "Inverse field '{}.{}' of '{}.{}' is not declared",
                        target.name, inverse, schema.name, field.name
                    ))
                })?;
                let points_back = inverse_def.link_def().is_some_and(|back| {
                    back.target == schema.name && back.inverse.as_deref() == Some(&field.name)
                });
                if !points_back {
                    return Err(DbError::BadRequest(format!(
                        "Inverse field '{}.{}' does not link back to '{}.{}'",
                        target.name, inverse, schema.name, field.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Arc<RecordSchema>> {
        self.types
            .get(name)
            .ok_or_else(|| DbError::TypeNotFound(name.to_string()))
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_post_schemas() -> Vec<RecordSchema> {
        vec![
            RecordSchema::new("user")
                .field(FieldDef::new("name", FieldType::Text))
                .field(FieldDef::link("posts", "post").array().inverse("author")),
            RecordSchema::new("post")
                .field(FieldDef::new("title", FieldType::Text))
                .field(FieldDef::link("author", "user").inverse("posts"))
                .field(FieldDef::link("reviewer", "user")),
        ]
    }

    #[test]
    fn test_registry_synthesizes_denormalized_inverse() {
        let registry = SchemaRegistry::new(user_post_schemas()).unwrap();
        let user = registry.get("user").unwrap();
        let synthesized = user.get_field("__post_reviewer_inverse").unwrap();
        assert!(synthesized.is_denormalized());
        assert!(synthesized.is_array);

        let post = registry.get("post").unwrap();
        let reviewer = post.get_field("reviewer").unwrap().link_def().unwrap();
        assert_eq!(reviewer.inverse.as_deref(), Some("__post_reviewer_inverse"));
    }

    #[test]
    fn test_registry_rejects_one_sided_inverse() {
        let schemas = vec![
            RecordSchema::new("user").field(FieldDef::new("name", FieldType::Text)),
            RecordSchema::new("post").field(FieldDef::link("author", "user").inverse("posts")),
        ];
        let err = SchemaRegistry::new(schemas).unwrap_err();
        assert!(matches!(err, DbError::BadRequest(_)));
    }

    #[test]
    fn test_registry_rejects_unknown_target() {
        let schemas = vec![RecordSchema::new("post").field(FieldDef::link("author", "ghost"))];
        let err = SchemaRegistry::new(schemas).unwrap_err();
        assert_eq!(err, DbError::TypeNotFound("ghost".into()));
    }

    #[test]
    fn test_field_validation() {
        let tags = FieldDef::link("tags", "tag").array();
        assert!(tags.validate(&Value::from(vec![1, 2])).is_ok());
        assert!(tags.validate(&Value::from(1)).is_err());
        assert!(tags.validate(&Value::List(vec![Value::Null])).is_err());

        let title = FieldDef::new("title", FieldType::Text).not_null();
        assert!(title.validate(&Value::from("x")).is_ok());
        assert!(matches!(
            title.validate(&Value::Null),
            Err(DbError::ConstraintViolation(_))
        ));
        assert!(matches!(
            title.validate(&Value::from(3)),
            Err(DbError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_record_get_absent_is_null() {
        let record = Record::new().with("id", 1);
        assert!(record.get("missing").is_null());
        assert_eq!(record.get("id"), &Value::Integer(1));
    }
}
