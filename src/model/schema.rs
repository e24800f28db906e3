use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EntityError, Result};
use crate::model::{DataType, Locale};

/// Capability flags allowing previously-undeclared names to be introduced
/// implicitly. Absence of a flag makes the introducing call fail immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvolutionMode {
    AddingAttributes,
    AddingAssociatedData,
    AddingLocales,
    AddingReferences,
    AddingPrices,
    AddingHierarchy,
}

/// Declaration of a single attribute slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub name: String,
    pub data_type: DataType,
    /// Localized attributes live under per-locale keys; global ones under a
    /// locale-less key.
    #[serde(default)]
    pub localized: bool,
    /// Sortable attributes must hold a single comparable value.
    #[serde(default)]
    pub sortable: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

fn default_true() -> bool {
    true
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            localized: false,
            sortable: false,
            nullable: true,
        }
    }

    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    /// Derive a schema from a concrete value the schema never declared.
    /// Used when the evolution mode permits adding attributes on the fly.
    pub fn implicit(name: &str, localized: bool, value: &serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            data_type: DataType::of(value),
            localized,
            sortable: false,
            nullable: true,
        }
    }
}

/// Declaration of a single associated-data slot. Associated data may carry
/// nested structures, so there is no sortability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociatedDataSchema {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub localized: bool,
}

impl AssociatedDataSchema {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            localized: false,
        }
    }

    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    pub fn implicit(name: &str, localized: bool, value: &serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            data_type: DataType::of(value),
            localized,
        }
    }
}

/// How many references of one name a single entity may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cardinality {
    ZeroOrOne,
    ExactlyOne,
    ZeroOrMore,
    OneOrMore,
}

/// Declaration of a reference kind, including the schemas of the attributes
/// that may sit on each reference of this kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSchema {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
    /// Entity type references of this kind may be grouped by.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_type: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSchema>,
}

impl ReferenceSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced_entity_type: None,
            cardinality: None,
            group_type: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn referencing(mut self, entity_type: impl Into<String>) -> Self {
        self.referenced_entity_type = Some(entity_type.into());
        self
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = Some(cardinality);
        self
    }

    pub fn with_attribute(mut self, attribute: AttributeSchema) -> Self {
        self.attributes.insert(attribute.name.clone(), attribute);
        self
    }

    pub fn implicit(name: &str, referenced_entity_type: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            referenced_entity_type: referenced_entity_type.map(|t| t.to_string()),
            cardinality: Some(Cardinality::ZeroOrMore),
            group_type: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// Schema of one entity type: the lookup object every mutating call is
/// validated against. Supplied by an external schema registry; this crate
/// only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    #[serde(default)]
    pub locales: BTreeSet<Locale>,
    #[serde(default)]
    pub evolution: BTreeSet<EvolutionMode>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSchema>,
    #[serde(default)]
    pub associated_data: BTreeMap<String, AssociatedDataSchema>,
    #[serde(default)]
    pub references: BTreeMap<String, ReferenceSchema>,
    /// Whether entities of this type may be placed into a hierarchy.
    #[serde(default)]
    pub with_hierarchy: bool,
    /// Whether entities of this type may carry prices.
    #[serde(default)]
    pub with_price: bool,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locales: BTreeSet::new(),
            evolution: BTreeSet::new(),
            attributes: BTreeMap::new(),
            associated_data: BTreeMap::new(),
            references: BTreeMap::new(),
            with_hierarchy: false,
            with_price: false,
        }
    }

    pub fn with_locale(mut self, locale: impl Into<Locale>) -> Self {
        self.locales.insert(locale.into());
        self
    }

    pub fn with_evolution(mut self, mode: EvolutionMode) -> Self {
        self.evolution.insert(mode);
        self
    }

    /// Shorthand for a schema that may evolve in every direction; mirrors a
    /// freshly created entity collection before any schema was pinned down.
    pub fn open(name: impl Into<String>) -> Self {
        let mut schema = Self::new(name);
        schema.evolution.extend([
            EvolutionMode::AddingAttributes,
            EvolutionMode::AddingAssociatedData,
            EvolutionMode::AddingLocales,
            EvolutionMode::AddingReferences,
            EvolutionMode::AddingPrices,
            EvolutionMode::AddingHierarchy,
        ]);
        schema.with_hierarchy = true;
        schema.with_price = true;
        schema
    }

    pub fn with_attribute(mut self, attribute: AttributeSchema) -> Self {
        self.attributes.insert(attribute.name.clone(), attribute);
        self
    }

    pub fn with_associated_data(mut self, associated: AssociatedDataSchema) -> Self {
        self.associated_data
            .insert(associated.name.clone(), associated);
        self
    }

    pub fn with_reference(mut self, reference: ReferenceSchema) -> Self {
        self.references.insert(reference.name.clone(), reference);
        self
    }

    pub fn with_hierarchy(mut self) -> Self {
        self.with_hierarchy = true;
        self
    }

    pub fn with_price(mut self) -> Self {
        self.with_price = true;
        self
    }

    pub fn allows(&self, mode: EvolutionMode) -> bool {
        self.evolution.contains(&mode)
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    pub fn get_associated_data(&self, name: &str) -> Option<&AssociatedDataSchema> {
        self.associated_data.get(name)
    }

    pub fn get_reference(&self, name: &str) -> Option<&ReferenceSchema> {
        self.references.get(name)
    }

    /// Check a locale against the supported set, honoring `AddingLocales`.
    pub fn verify_locale(&self, name: &str, locale: &Locale) -> Result<()> {
        if self.locales.contains(locale) || self.allows(EvolutionMode::AddingLocales) {
            Ok(())
        } else {
            Err(EntityError::LocaleNotSupported {
                name: name.to_string(),
                locale: locale.clone(),
            })
        }
    }

    /// Hierarchy placement is legal when declared or when the schema may
    /// still evolve in that direction.
    pub fn verify_hierarchy(&self) -> Result<()> {
        if self.with_hierarchy || self.allows(EvolutionMode::AddingHierarchy) {
            Ok(())
        } else {
            Err(EntityError::HierarchyNotSupported {
                entity_type: self.name.clone(),
            })
        }
    }

    pub fn verify_prices(&self) -> Result<()> {
        if self.with_price || self.allows(EvolutionMode::AddingPrices) {
            Ok(())
        } else {
            Err(EntityError::PricesNotSupported {
                entity_type: self.name.clone(),
            })
        }
    }
}

/// Schema services one attribute container needs: lookup, validation and
/// implicit-schema synthesis. Entity-level and reference-level attributes
/// share all builder and mutation code through this trait; only the scope
/// differs.
pub trait AttributeSchemaScope {
    fn locate_schema(&self, name: &str) -> Option<&AttributeSchema>;
    fn supported_locales(&self) -> &BTreeSet<Locale>;
    fn allows_adding_attributes(&self) -> bool;
    fn allows_adding_locales(&self) -> bool;

    /// Validate a key/value pair against this scope. Called at the moment a
    /// value enters a builder or a mutation is applied; failures are never
    /// deferred to build time.
    fn verify(&self, key: &crate::model::AttributeKey, value: &serde_json::Value) -> Result<()> {
        if let Some(schema) = self.locate_schema(&key.name) {
            if !schema.data_type.matches(value) {
                return Err(EntityError::InvalidDataType {
                    name: key.name.clone(),
                    expected: schema.data_type,
                    actual: DataType::of(value),
                });
            }
            if schema.sortable && value.is_array() {
                return Err(EntityError::SortableArray {
                    name: key.name.clone(),
                });
            }
            if schema.localized != key.locale.is_some() {
                return Err(EntityError::LocaleMismatch {
                    name: key.name.clone(),
                    localized: schema.localized,
                });
            }
        } else if !self.allows_adding_attributes() {
            return Err(EntityError::AttributeNotInSchema {
                name: key.name.clone(),
            });
        }
        if let Some(locale) = &key.locale {
            if !self.supported_locales().contains(locale) && !self.allows_adding_locales() {
                return Err(EntityError::LocaleNotSupported {
                    name: key.name.clone(),
                    locale: locale.clone(),
                });
            }
        }
        Ok(())
    }

    /// Schema entry for a name this scope never declared. Only reachable
    /// after `verify` admitted the value, so evolution permission is already
    /// settled.
    fn implicit_schema(
        &self,
        key: &crate::model::AttributeKey,
        value: &serde_json::Value,
    ) -> AttributeSchema {
        AttributeSchema::implicit(&key.name, key.locale.is_some(), value)
    }

    /// Schema entry to record in a rebuilt container: the declared one when
    /// present, an implicit one otherwise.
    fn schema_for(
        &self,
        key: &crate::model::AttributeKey,
        value: &serde_json::Value,
    ) -> AttributeSchema {
        self.locate_schema(&key.name)
            .cloned()
            .unwrap_or_else(|| self.implicit_schema(key, value))
    }
}

/// Entity-level attribute scope.
pub struct EntityAttributeScope<'a> {
    pub schema: &'a EntitySchema,
}

impl<'a> EntityAttributeScope<'a> {
    pub fn new(schema: &'a EntitySchema) -> Self {
        Self { schema }
    }
}

impl AttributeSchemaScope for EntityAttributeScope<'_> {
    fn locate_schema(&self, name: &str) -> Option<&AttributeSchema> {
        self.schema.attributes.get(name)
    }

    fn supported_locales(&self) -> &BTreeSet<Locale> {
        &self.schema.locales
    }

    fn allows_adding_attributes(&self) -> bool {
        self.schema.allows(EvolutionMode::AddingAttributes)
    }

    fn allows_adding_locales(&self) -> bool {
        self.schema.allows(EvolutionMode::AddingLocales)
    }
}

/// Attribute scope of one reference kind. Locale support and evolution
/// permissions come from the owning entity schema; attribute declarations
/// from the reference schema.
pub struct ReferenceAttributeScope<'a> {
    pub entity: &'a EntitySchema,
    pub reference: &'a ReferenceSchema,
}

impl<'a> ReferenceAttributeScope<'a> {
    pub fn new(entity: &'a EntitySchema, reference: &'a ReferenceSchema) -> Self {
        Self { entity, reference }
    }
}

impl AttributeSchemaScope for ReferenceAttributeScope<'_> {
    fn locate_schema(&self, name: &str) -> Option<&AttributeSchema> {
        self.reference.attributes.get(name)
    }

    fn supported_locales(&self) -> &BTreeSet<Locale> {
        &self.entity.locales
    }

    fn allows_adding_attributes(&self) -> bool {
        self.entity.allows(EvolutionMode::AddingAttributes)
    }

    fn allows_adding_locales(&self) -> bool {
        self.entity.allows(EvolutionMode::AddingLocales)
    }
}

impl EntitySchema {
    /// Validate an associated-data key/value pair, mirroring the attribute
    /// rules minus sortability (structured payloads are legal here).
    pub fn verify_associated_data(
        &self,
        key: &crate::model::AssociatedDataKey,
        value: &serde_json::Value,
    ) -> Result<()> {
        if let Some(schema) = self.get_associated_data(&key.name) {
            if !schema.data_type.matches(value) {
                return Err(EntityError::InvalidDataType {
                    name: key.name.clone(),
                    expected: schema.data_type,
                    actual: DataType::of(value),
                });
            }
            if schema.localized != key.locale.is_some() {
                return Err(EntityError::LocaleMismatch {
                    name: key.name.clone(),
                    localized: schema.localized,
                });
            }
        } else if !self.allows(EvolutionMode::AddingAssociatedData) {
            return Err(EntityError::AssociatedDataNotInSchema {
                name: key.name.clone(),
            });
        }
        if let Some(locale) = &key.locale {
            self.verify_locale(&key.name, locale)?;
        }
        Ok(())
    }

    /// Validate a reference name, honoring `AddingReferences`.
    pub fn verify_reference(&self, name: &str) -> Result<()> {
        if self.references.contains_key(name) || self.allows(EvolutionMode::AddingReferences) {
            Ok(())
        } else {
            Err(EntityError::ReferenceNotInSchema {
                name: name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_verification_honors_evolution() {
        let fixed = EntitySchema::new("product").with_locale("en");
        assert!(fixed.verify_locale("name", &Locale::from("en")).is_ok());
        assert!(matches!(
            fixed.verify_locale("name", &Locale::from("fr")),
            Err(EntityError::LocaleNotSupported { .. })
        ));

        let evolving = EntitySchema::new("product")
            .with_locale("en")
            .with_evolution(EvolutionMode::AddingLocales);
        assert!(evolving.verify_locale("name", &Locale::from("fr")).is_ok());
    }

    #[test]
    fn implicit_attribute_schema_derives_kind_and_locale() {
        let schema = AttributeSchema::implicit("weight", false, &serde_json::json!(12.5));
        assert_eq!(schema.data_type, DataType::Number);
        assert!(!schema.localized);
        assert!(!schema.sortable);

        let localized = AttributeSchema::implicit("title", true, &serde_json::json!("Hi"));
        assert!(localized.localized);
        assert_eq!(localized.data_type, DataType::String);
    }

    #[test]
    fn open_schema_allows_everything() {
        let schema = EntitySchema::open("product");
        assert!(schema.allows(EvolutionMode::AddingAttributes));
        assert!(schema.verify_hierarchy().is_ok());
        assert!(schema.verify_prices().is_ok());
    }

    #[test]
    fn scope_rejects_type_mismatch_and_sortable_array() {
        use crate::model::AttributeKey;

        let schema = EntitySchema::new("product")
            .with_attribute(AttributeSchema::new("code", DataType::String).sortable())
            .with_attribute(AttributeSchema::new("stock", DataType::Number));
        let scope = EntityAttributeScope::new(&schema);

        assert!(matches!(
            scope.verify(&AttributeKey::global("stock"), &serde_json::json!("plenty")),
            Err(EntityError::InvalidDataType { .. })
        ));
        let evolving = EntitySchema::open("product")
            .with_attribute(AttributeSchema::new("rank", DataType::Array).sortable());
        let scope = EntityAttributeScope::new(&evolving);
        assert!(matches!(
            scope.verify(&AttributeKey::global("rank"), &serde_json::json!([1, 2])),
            Err(EntityError::SortableArray { .. })
        ));
    }

    #[test]
    fn scope_rejects_undeclared_attribute_without_evolution() {
        use crate::model::AttributeKey;

        let closed = EntitySchema::new("product");
        let scope = EntityAttributeScope::new(&closed);
        assert!(matches!(
            scope.verify(&AttributeKey::global("surprise"), &serde_json::json!(1)),
            Err(EntityError::AttributeNotInSchema { .. })
        ));
    }

    #[test]
    fn scope_enforces_locale_shape() {
        use crate::model::AttributeKey;

        let schema = EntitySchema::new("product")
            .with_locale("en")
            .with_attribute(AttributeSchema::new("name", DataType::String).localized());
        let scope = EntityAttributeScope::new(&schema);

        assert!(scope
            .verify(
                &AttributeKey::localized("name", "en"),
                &serde_json::json!("x")
            )
            .is_ok());
        assert!(matches!(
            scope.verify(&AttributeKey::global("name"), &serde_json::json!("x")),
            Err(EntityError::LocaleMismatch { .. })
        ));
        assert!(matches!(
            scope.verify(
                &AttributeKey::localized("name", "fr"),
                &serde_json::json!("x")
            ),
            Err(EntityError::LocaleNotSupported { .. })
        ));
    }

    #[test]
    fn reference_scope_reads_entity_level_permissions() {
        use crate::model::AttributeKey;

        let reference = ReferenceSchema::new("brand")
            .with_attribute(AttributeSchema::new("priority", DataType::Number));
        let entity = EntitySchema::new("product")
            .with_reference(reference)
            .with_evolution(EvolutionMode::AddingAttributes);
        let reference = entity.get_reference("brand").expect("declared");
        let scope = ReferenceAttributeScope::new(&entity, reference);

        assert!(scope
            .verify(&AttributeKey::global("priority"), &serde_json::json!(5))
            .is_ok());
        // undeclared reference attribute admitted through entity-level evolution
        assert!(scope
            .verify(&AttributeKey::global("note"), &serde_json::json!("new"))
            .is_ok());
    }
}
