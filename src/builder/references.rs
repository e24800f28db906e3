use std::sync::Arc;

use crate::builder::{ExistingAttributesBuilder, InitialAttributesBuilder};
use crate::error::{EntityError, Result};
use crate::model::{
    AttributeKey, AttributeValue, Cardinality, EntitySchema, GroupRef, Locale, Reference,
    ReferenceAttributeScope, ReferenceKey, ReferenceSchema,
};
use crate::mutation::{AttributeMutation, ReferenceMutation};

/// Runs `f` with the attribute scope of one reference kind; an undeclared
/// kind gets an implicit schema on the fly.
fn with_reference_scope<T>(
    schema: &EntitySchema,
    name: &str,
    referenced_entity_type: Option<&str>,
    f: impl FnOnce(&ReferenceAttributeScope<'_>) -> Result<T>,
) -> Result<T> {
    let implicit;
    let reference_schema = match schema.get_reference(name) {
        Some(declared) => declared,
        None => {
            implicit = ReferenceSchema::implicit(name, referenced_entity_type);
            &implicit
        }
    };
    f(&ReferenceAttributeScope::new(schema, reference_schema))
}

/// Assembles one brand-new reference: target, cardinality, optional group
/// and reference attributes.
#[derive(Debug, Clone)]
pub struct InitialReferenceBuilder {
    key: ReferenceKey,
    referenced_entity_type: Option<String>,
    cardinality: Option<Cardinality>,
    group: Option<GroupRef>,
    attributes: InitialAttributesBuilder,
}

impl InitialReferenceBuilder {
    pub fn new(
        schema: &EntitySchema,
        key: ReferenceKey,
        referenced_entity_type: Option<String>,
        cardinality: Option<Cardinality>,
    ) -> Result<Self> {
        schema.verify_reference(&key.name)?;
        Ok(Self {
            key,
            referenced_entity_type,
            cardinality,
            group: None,
            attributes: InitialAttributesBuilder::new(),
        })
    }

    pub fn key(&self) -> &ReferenceKey {
        &self.key
    }

    pub fn set_group(&mut self, group: GroupRef) -> &mut Self {
        self.group = Some(group);
        self
    }

    pub fn remove_group(&mut self) -> &mut Self {
        self.group = None;
        self
    }

    pub fn set_attribute(
        &mut self,
        schema: &EntitySchema,
        key: AttributeKey,
        value: serde_json::Value,
    ) -> Result<&mut Self> {
        with_reference_scope(
            schema,
            &self.key.name,
            self.referenced_entity_type.as_deref(),
            |scope| self.attributes.set(scope, key, value).map(|_| ()),
        )?;
        Ok(self)
    }

    pub fn remove_attribute(&mut self, key: &AttributeKey) -> &mut Self {
        self.attributes.remove(key);
        self
    }

    /// Mutations that re-create this reference on a blank entity: the insert
    /// first, then the group assignment, then the attribute upserts.
    pub fn to_mutations(&self) -> Vec<ReferenceMutation> {
        let mut mutations = vec![ReferenceMutation::insert(
            self.key.clone(),
            self.referenced_entity_type.clone(),
            self.cardinality,
        )];
        if let Some(group) = &self.group {
            mutations.push(ReferenceMutation::set_group(self.key.clone(), group.clone()));
        }
        mutations.extend(
            self.attributes
                .to_mutations()
                .into_iter()
                .map(|mutation| ReferenceMutation::attribute(self.key.clone(), mutation)),
        );
        mutations
    }

    pub fn build(&self, schema: &EntitySchema) -> Result<Reference> {
        let attributes = with_reference_scope(
            schema,
            &self.key.name,
            self.referenced_entity_type.as_deref(),
            |scope| Ok(self.attributes.build(scope)),
        )?;
        Ok(Reference {
            key: self.key.clone(),
            referenced_entity_type: self.referenced_entity_type.clone(),
            cardinality: self.cardinality,
            group: self.group.clone(),
            attributes,
            version: 1,
            dropped: false,
        })
    }
}

/// Edits one reference that already exists on the base snapshot: a pending
/// group change plus a pending attribute builder over the base attributes.
#[derive(Debug, Clone)]
pub struct ExistingReferenceBuilder {
    base: Reference,
    attributes: ExistingAttributesBuilder,
    /// `Some(None)` is a pending group removal.
    group: Option<Option<GroupRef>>,
}

impl ExistingReferenceBuilder {
    pub fn new(base: Reference) -> Self {
        let attributes = ExistingAttributesBuilder::new(Arc::new(base.attributes.clone()));
        Self {
            base,
            attributes,
            group: None,
        }
    }

    pub fn key(&self) -> &ReferenceKey {
        &self.base.key
    }

    pub fn group(&self) -> Option<GroupRef> {
        match &self.group {
            Some(pending) => pending.clone(),
            None => self.base.group.clone(),
        }
    }

    pub fn get_attribute(&self, name: &str, locale: Option<&Locale>) -> Option<AttributeValue> {
        self.attributes.get_with_fallback(name, locale)
    }

    pub fn set_group(&mut self, group: GroupRef) -> &mut Self {
        self.group = Some(Some(group));
        self
    }

    pub fn remove_group(&mut self) -> Result<&mut Self> {
        if self.group().is_none() {
            return Err(EntityError::MissingTarget {
                kind: "reference group",
                key: self.base.key.to_string(),
            });
        }
        self.group = Some(None);
        Ok(self)
    }

    pub fn set_attribute(
        &mut self,
        schema: &EntitySchema,
        key: AttributeKey,
        value: serde_json::Value,
    ) -> Result<&mut Self> {
        with_reference_scope(
            schema,
            &self.base.key.name,
            self.base.referenced_entity_type.as_deref(),
            |scope| self.attributes.set(scope, key, value).map(|_| ()),
        )?;
        Ok(self)
    }

    pub fn remove_attribute(&mut self, key: &AttributeKey) -> Result<&mut Self> {
        self.attributes.remove(key)?;
        Ok(self)
    }

    pub fn mutate_attribute(
        &mut self,
        schema: &EntitySchema,
        mutation: AttributeMutation,
    ) -> Result<&mut Self> {
        with_reference_scope(
            schema,
            &self.base.key.name,
            self.base.referenced_entity_type.as_deref(),
            |scope| self.attributes.mutate(scope, mutation).map(|_| ()),
        )?;
        Ok(self)
    }

    fn group_change(&self) -> Option<ReferenceMutation> {
        let pending = self.group.as_ref()?;
        if *pending == self.base.group {
            return None;
        }
        Some(match pending {
            Some(group) => ReferenceMutation::set_group(self.base.key.clone(), group.clone()),
            None => ReferenceMutation::remove_group(self.base.key.clone()),
        })
    }

    pub fn has_changes(&self) -> bool {
        self.group_change().is_some() || self.attributes.has_changes()
    }

    /// Minimal change-set for this reference: the group change first, then
    /// the attribute mutations.
    pub fn build_change_set(&self) -> Vec<ReferenceMutation> {
        let mut mutations = Vec::new();
        if let Some(change) = self.group_change() {
            mutations.push(change);
        }
        mutations.extend(
            self.attributes
                .build_change_set()
                .into_iter()
                .map(|mutation| ReferenceMutation::attribute(self.base.key.clone(), mutation)),
        );
        mutations
    }

    /// Edited reference value; the base when nothing changed.
    pub fn build(&self, schema: &EntitySchema) -> Result<Reference> {
        if !self.has_changes() {
            return Ok(self.base.clone());
        }
        let attributes = with_reference_scope(
            schema,
            &self.base.key.name,
            self.base.referenced_entity_type.as_deref(),
            |scope| Ok(self.attributes.build(scope)),
        )?;
        Ok(self
            .base
            .next_with(self.group(), Arc::unwrap_or_clone(attributes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brand_key() -> ReferenceKey {
        ReferenceKey::new("brand", 42)
    }

    #[test]
    fn initial_reference_builds_with_group_and_attributes() {
        let schema = EntitySchema::open("product");
        let mut builder = InitialReferenceBuilder::new(
            &schema,
            brand_key(),
            Some("brand".to_string()),
            Some(Cardinality::ZeroOrOne),
        )
        .unwrap();
        builder.set_group(GroupRef::new(None, 7));
        builder
            .set_attribute(&schema, AttributeKey::global("priority"), 3.into())
            .unwrap();

        let reference = builder.build(&schema).unwrap();
        assert_eq!(reference.version, 1);
        assert_eq!(reference.group, Some(GroupRef::new(None, 7)));
        assert_eq!(
            reference
                .attributes
                .get(&AttributeKey::global("priority"))
                .unwrap()
                .value,
            serde_json::json!(3)
        );

        let mutations = builder.to_mutations();
        assert_eq!(mutations.len(), 3);
        assert!(matches!(mutations[0], ReferenceMutation::Insert(_)));
        assert!(matches!(mutations[1], ReferenceMutation::SetGroup(_)));
        assert!(matches!(mutations[2], ReferenceMutation::Attribute(_)));
    }

    #[test]
    fn undeclared_reference_kind_requires_evolution() {
        let schema = EntitySchema::new("product");
        assert!(matches!(
            InitialReferenceBuilder::new(&schema, brand_key(), None, None),
            Err(EntityError::ReferenceNotInSchema { .. })
        ));
    }

    #[test]
    fn existing_reference_noop_returns_base() {
        let schema = EntitySchema::open("product");
        let base = Reference::initial(brand_key(), Some("brand".to_string()), None);
        let builder = ExistingReferenceBuilder::new(base.clone());

        assert!(!builder.has_changes());
        assert!(builder.build_change_set().is_empty());
        assert_eq!(builder.build(&schema).unwrap(), base);
    }

    #[test]
    fn group_edit_produces_single_mutation() {
        let schema = EntitySchema::open("product");
        let base = Reference::initial(brand_key(), None, None);
        let mut builder = ExistingReferenceBuilder::new(base.clone());
        builder.set_group(GroupRef::new(None, 9));

        let change_set = builder.build_change_set();
        assert_eq!(change_set.len(), 1);
        assert!(matches!(change_set[0], ReferenceMutation::SetGroup(_)));

        let built = builder.build(&schema).unwrap();
        assert_eq!(built.version, base.version + 1);
        assert_eq!(built.group, Some(GroupRef::new(None, 9)));
    }

    #[test]
    fn setting_base_group_again_is_noop() {
        let schema = EntitySchema::open("product");
        let mut base = Reference::initial(brand_key(), None, None);
        base.group = Some(GroupRef::new(None, 9));
        let mut builder = ExistingReferenceBuilder::new(base.clone());
        builder.set_group(GroupRef::new(None, 9));

        assert!(!builder.has_changes());
        assert_eq!(builder.build(&schema).unwrap(), base);
    }

    #[test]
    fn removing_absent_group_fails() {
        let base = Reference::initial(brand_key(), None, None);
        let mut builder = ExistingReferenceBuilder::new(base);
        assert!(matches!(
            builder.remove_group(),
            Err(EntityError::MissingTarget { .. })
        ));
    }

    #[test]
    fn attribute_edit_flows_into_change_set() {
        let schema = EntitySchema::open("product");
        let base = Reference::initial(brand_key(), None, None);
        let mut builder = ExistingReferenceBuilder::new(base);
        builder
            .set_attribute(&schema, AttributeKey::global("priority"), 5.into())
            .unwrap();

        assert_eq!(
            builder
                .get_attribute("priority", None)
                .unwrap()
                .value,
            serde_json::json!(5)
        );
        let change_set = builder.build_change_set();
        assert_eq!(change_set.len(), 1);
        assert!(matches!(change_set[0], ReferenceMutation::Attribute(_)));
    }
}
