use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use doc_entity::builder::{ExistingEntityBuilder, InitialEntityBuilder};
use doc_entity::logic::{apply_entity_upsert, mutate_entity};
use doc_entity::model::{
    AssociatedDataKey, AttributeKey, AttributeSchema, Cardinality, DataType, DateRange,
    EntitySchema, EvolutionMode, GroupRef, Locale, PriceInnerRecordHandling, PriceKey,
    ReferenceKey, ReferenceSchema,
};
use doc_entity::mutation::{
    AttributeMutation, EntityExistence, LocalMutation, UpsertPriceMutation,
};
use doc_entity::EntityError;

fn product_schema() -> EntitySchema {
    EntitySchema::new("product")
        .with_locale("en")
        .with_locale("cs")
        .with_attribute(AttributeSchema::new("code", DataType::String).sortable())
        .with_attribute(AttributeSchema::new("name", DataType::String).localized())
        .with_attribute(AttributeSchema::new("stock", DataType::Number))
        .with_reference(
            ReferenceSchema::new("brand")
                .referencing("brand")
                .with_cardinality(Cardinality::ZeroOrOne)
                .with_attribute(AttributeSchema::new("priority", DataType::Number)),
        )
        .with_evolution(EvolutionMode::AddingAssociatedData)
        .with_hierarchy()
        .with_price()
}

fn price(id: i32, list: &str, amount: f64, validity: Option<DateRange>) -> UpsertPriceMutation {
    UpsertPriceMutation {
        key: PriceKey::new(id, list, "USD"),
        inner_record_id: None,
        price_without_tax: amount,
        tax_rate: 21.0,
        price_with_tax: amount * 1.21,
        validity,
        sellable: true,
    }
}

fn at(month: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, month, 1, 0, 0, 0).unwrap()
}

#[test]
fn product_editing_workflow() {
    let _ = env_logger::builder().is_test(true).try_init();
    let schema = product_schema();

    // Stage 1: assemble a new product and take its creation envelope.
    let mut builder = InitialEntityBuilder::new(&schema, Some(100));
    builder.set_parent(&schema, 10).unwrap();
    builder
        .set_attribute(&schema, AttributeKey::global("code"), "ABC-1".into())
        .unwrap();
    builder
        .set_attribute(
            &schema,
            AttributeKey::localized("name", "en"),
            "Widget".into(),
        )
        .unwrap();
    builder
        .set_associated_data(
            &schema,
            AssociatedDataKey::localized("texts", "cs"),
            serde_json::json!({"title": "Udělátko"}),
        )
        .unwrap();
    builder
        .set_price(&schema, price(1, "basic", 100.0, None))
        .unwrap();
    let reference = builder
        .insert_reference(
            &schema,
            ReferenceKey::new("brand", 42),
            Some("brand".to_string()),
            Some(Cardinality::ZeroOrOne),
        )
        .unwrap();
    reference.set_group(GroupRef::new(None, 7));
    reference
        .set_attribute(&schema, AttributeKey::global("priority"), 1.into())
        .unwrap();

    let envelope = builder.to_mutation();
    assert_eq!(envelope.existence, EntityExistence::MustNotExist);
    assert_eq!(envelope.primary_key, Some(100));

    // Stage 2: a replay of the envelope against nothing yields the entity.
    let created = apply_entity_upsert(&schema, None, &envelope).unwrap();
    assert_eq!(created.version, 1);
    assert_eq!(created.parent, Some(10));
    assert_eq!(
        created.get_attribute("code", None).unwrap().value,
        serde_json::json!("ABC-1")
    );
    assert!(created.locales.contains(&Locale::from("en")));
    assert!(created.locales.contains(&Locale::from("cs")));
    let brand = created
        .get_reference(&ReferenceKey::new("brand", 42))
        .unwrap();
    assert_eq!(brand.group, Some(GroupRef::new(None, 7)));

    // Stage 3: edit, diff, and verify the change-set is minimal and ordered.
    let mut editor = ExistingEntityBuilder::new(created.clone());
    editor
        .set_attribute(&schema, AttributeKey::global("code"), "ABC-2".into())
        .unwrap();
    editor
        .set_attribute(
            &schema,
            AttributeKey::localized("name", "en"),
            "Widget".into(),
        )
        .unwrap();
    editor
        .set_price(&schema, price(1, "basic", 110.0, None))
        .unwrap();

    let change_set = editor.build_change_set();
    assert_eq!(change_set.len(), 2);
    assert_eq!(
        change_set[0],
        LocalMutation::Attribute(AttributeMutation::upsert(
            AttributeKey::global("code"),
            "ABC-2".into()
        ))
    );
    assert!(matches!(change_set[1], LocalMutation::Price(_)));

    // Stage 4: the envelope replayed over the base equals the local preview.
    let envelope = editor.to_mutation().unwrap();
    assert_eq!(envelope.existence, EntityExistence::MustExist);
    let replayed = apply_entity_upsert(&schema, Some(&created), &envelope).unwrap();
    let previewed = editor.to_instance(&schema).unwrap();
    assert_eq!(replayed, previewed);
    assert_eq!(replayed.version, 2);
    assert_eq!(
        replayed.get_attribute("code", None).unwrap().version,
        2
    );
    // untouched containers still shared with the base snapshot
    assert!(Arc::ptr_eq(&replayed.references, &created.references));
    assert!(Arc::ptr_eq(&replayed.associated_data, &created.associated_data));
}

#[test]
fn noop_edit_returns_base_snapshot_unchanged() {
    let schema = product_schema();
    let mut builder = InitialEntityBuilder::new(&schema, Some(1));
    builder
        .set_attribute(&schema, AttributeKey::global("code"), "ABC-1".into())
        .unwrap();
    let base = builder.to_instance(&schema).unwrap();

    let mut editor = ExistingEntityBuilder::new(base.clone());
    editor
        .set_attribute(&schema, AttributeKey::global("code"), "ABC-1".into())
        .unwrap();

    assert!(editor.to_mutation().is_none());
    let instance = editor.to_instance(&schema).unwrap();
    assert_eq!(instance.version, base.version);
    assert!(Arc::ptr_eq(&instance.attributes, &base.attributes));
}

#[test]
fn removal_tombstones_survive_into_the_next_version() {
    let schema = product_schema();
    let mut builder = InitialEntityBuilder::new(&schema, Some(1));
    builder
        .set_attribute(&schema, AttributeKey::global("stock"), 5.into())
        .unwrap();
    let base = builder.to_instance(&schema).unwrap();

    let mut editor = ExistingEntityBuilder::new(base);
    editor.remove_attribute(&AttributeKey::global("stock")).unwrap();
    let edited = editor.to_instance(&schema).unwrap();

    assert!(edited.get_attribute("stock", None).is_none());
    let raw = edited
        .attributes
        .get_raw(&AttributeKey::global("stock"))
        .unwrap();
    assert!(raw.dropped);
    assert_eq!(raw.version, 2);

    // removing it again is an error, the value no longer exists
    let mut editor = ExistingEntityBuilder::new(edited);
    assert!(matches!(
        editor.remove_attribute(&AttributeKey::global("stock")),
        Err(EntityError::MissingTarget { .. })
    ));
}

#[test]
fn locale_fallback_is_one_directional() {
    let schema = product_schema();
    let mut builder = InitialEntityBuilder::new(&schema, Some(1));
    builder
        .set_attribute(&schema, AttributeKey::global("code"), "ABC-1".into())
        .unwrap();
    builder
        .set_attribute(
            &schema,
            AttributeKey::localized("name", "en"),
            "Widget".into(),
        )
        .unwrap();
    let entity = builder.to_instance(&schema).unwrap();

    // localized miss falls back to the global slot
    let cs = Locale::from("cs");
    assert_eq!(
        entity.get_attribute("code", Some(&cs)).unwrap().value,
        serde_json::json!("ABC-1")
    );
    // a global lookup never yields the localized value
    assert!(entity.get_attribute("name", None).is_none());
    let en = Locale::from("en");
    assert_eq!(
        entity.get_attribute("name", Some(&en)).unwrap().value,
        serde_json::json!("Widget")
    );
}

#[test]
fn overlapping_price_validities_are_rejected() {
    let schema = product_schema();
    let mut builder = InitialEntityBuilder::new(&schema, Some(1));
    builder
        .set_price(
            &schema,
            price(1, "spring-sale", 90.0, Some(DateRange::between(at(3), at(6)))),
        )
        .unwrap();
    builder
        .set_price(
            &schema,
            price(2, "spring-sale", 80.0, Some(DateRange::between(at(7), at(9)))),
        )
        .unwrap();

    // a third price overlapping the first one in the same list is ambiguous
    let err = builder
        .set_price(
            &schema,
            price(3, "spring-sale", 70.0, Some(DateRange::between(at(5), at(8)))),
        )
        .unwrap_err();
    assert_eq!(
        err,
        EntityError::AmbiguousPrice {
            existing: PriceKey::new(1, "spring-sale", "USD"),
            candidate: PriceKey::new(3, "spring-sale", "USD"),
        }
    );

    // a different price list is a different bucket
    builder
        .set_price(&schema, price(3, "basic", 100.0, None))
        .unwrap();

    let entity = builder.to_instance(&schema).unwrap();
    assert_eq!(entity.prices().count(), 3);
    assert!(entity
        .has_price_in_interval(&DateRange::between(at(4), at(5)))
        .unwrap());
}

#[test]
fn price_removal_clears_the_ambiguity_bucket() {
    let schema = product_schema();
    let mut builder = InitialEntityBuilder::new(&schema, Some(1));
    builder
        .set_price(&schema, price(1, "basic", 100.0, None))
        .unwrap();
    let base = builder.to_instance(&schema).unwrap();

    let mut editor = ExistingEntityBuilder::new(base);
    assert!(matches!(
        editor.set_price(&schema, price(2, "basic", 90.0, None)),
        Err(EntityError::AmbiguousPrice { .. })
    ));
    editor
        .remove_price(&schema, &PriceKey::new(1, "basic", "USD"))
        .unwrap();
    editor
        .set_price(&schema, price(2, "basic", 90.0, None))
        .unwrap();

    let edited = editor.to_instance(&schema).unwrap();
    assert!(edited.get_price(&PriceKey::new(1, "basic", "USD")).is_none());
    assert_eq!(
        edited
            .get_price(&PriceKey::new(2, "basic", "USD"))
            .unwrap()
            .price_without_tax,
        90.0
    );
}

#[test]
fn inner_record_handling_travels_in_the_envelope() {
    let schema = product_schema();
    let base = InitialEntityBuilder::new(&schema, Some(1))
        .to_instance(&schema)
        .unwrap();

    let mut editor = ExistingEntityBuilder::new(base.clone());
    editor
        .set_price_inner_record_handling(&schema, PriceInnerRecordHandling::FirstOccurrence)
        .unwrap();

    let envelope = editor.to_mutation().unwrap();
    assert_eq!(envelope.mutations.len(), 1);
    assert!(matches!(
        envelope.mutations[0],
        LocalMutation::InnerRecordHandling(_)
    ));

    let replayed = apply_entity_upsert(&schema, Some(&base), &envelope).unwrap();
    assert_eq!(
        replayed.prices.inner_record_handling,
        PriceInnerRecordHandling::FirstOccurrence
    );
    assert_eq!(replayed.prices.version, base.prices.version + 1);
}

#[test]
fn schema_without_evolution_rejects_undeclared_names() {
    let schema = product_schema();
    let mut builder = InitialEntityBuilder::new(&schema, Some(1));

    // attributes are pinned: no AddingAttributes flag
    assert!(matches!(
        builder.set_attribute(&schema, AttributeKey::global("surprise"), 1.into()),
        Err(EntityError::AttributeNotInSchema { .. })
    ));
    // locales are pinned too
    assert!(matches!(
        builder.set_attribute(
            &schema,
            AttributeKey::localized("name", "de"),
            "Gerät".into()
        ),
        Err(EntityError::LocaleNotSupported { .. })
    ));
    // associated data may evolve, the flag is set
    assert!(builder
        .set_associated_data(
            &schema,
            AssociatedDataKey::global("notes"),
            serde_json::json!({"text": "ok"})
        )
        .is_ok());
    // declared types are still enforced
    assert!(matches!(
        builder.set_attribute(&schema, AttributeKey::global("stock"), "many".into()),
        Err(EntityError::InvalidDataType { .. })
    ));
}

#[test]
fn reference_group_and_attribute_edits_diff_minimally() {
    let schema = product_schema();
    let mut builder = InitialEntityBuilder::new(&schema, Some(1));
    let reference = builder
        .insert_reference(
            &schema,
            ReferenceKey::new("brand", 42),
            Some("brand".to_string()),
            Some(Cardinality::ZeroOrOne),
        )
        .unwrap();
    reference
        .set_attribute(&schema, AttributeKey::global("priority"), 1.into())
        .unwrap();
    let base = builder.to_instance(&schema).unwrap();

    let key = ReferenceKey::new("brand", 42);
    let mut editor = ExistingEntityBuilder::new(base.clone());
    editor.set_reference_group(&key, GroupRef::new(None, 9)).unwrap();
    editor
        .set_reference_attribute(&schema, &key, AttributeKey::global("priority"), 2.into())
        .unwrap();

    let change_set = editor.build_change_set();
    assert_eq!(change_set.len(), 2);

    let edited = editor.to_instance(&schema).unwrap();
    let brand = edited.get_reference(&key).unwrap();
    assert_eq!(brand.group, Some(GroupRef::new(None, 9)));
    assert_eq!(
        brand
            .attributes
            .get(&AttributeKey::global("priority"))
            .unwrap()
            .value,
        serde_json::json!(2)
    );
    assert!(brand.version > base.get_reference(&key).unwrap().version);

    // removing the reference tombstones it, attributes and group included
    let mut editor = ExistingEntityBuilder::new(edited);
    editor.remove_reference(&key).unwrap();
    let removed = editor.to_instance(&schema).unwrap();
    assert!(removed.get_reference(&key).is_none());
    assert!(removed.references.get_raw(&key).unwrap().dropped);
}

#[test]
fn hierarchy_mutations_follow_schema_support() {
    let fixed = EntitySchema::new("price-list");
    let mut builder = InitialEntityBuilder::new(&fixed, Some(1));
    assert!(matches!(
        builder.set_parent(&fixed, 1),
        Err(EntityError::HierarchyNotSupported { .. })
    ));

    let schema = product_schema();
    let mut builder = InitialEntityBuilder::new(&schema, Some(1));
    builder.set_parent(&schema, 4).unwrap();
    let base = builder.to_instance(&schema).unwrap();

    let mut editor = ExistingEntityBuilder::new(base.clone());
    editor.remove_parent(&schema).unwrap();
    let edited = editor.to_instance(&schema).unwrap();
    assert_eq!(edited.parent, None);
    assert_eq!(edited.version, base.version + 1);
}

#[test]
fn raw_mutation_batches_fold_like_builders() {
    let schema = product_schema();
    let batch = vec![
        LocalMutation::Attribute(AttributeMutation::upsert(
            AttributeKey::global("code"),
            "ABC-1".into(),
        )),
        LocalMutation::Attribute(AttributeMutation::upsert(
            AttributeKey::global("code"),
            "ABC-2".into(),
        )),
    ];

    // last write wins within a batch, but versions count every real change
    let entity = mutate_entity(&schema, None, &batch).unwrap();
    assert_eq!(
        entity.get_attribute("code", None).unwrap().value,
        serde_json::json!("ABC-2")
    );
    assert_eq!(entity.get_attribute("code", None).unwrap().version, 2);
    assert_eq!(entity.version, 1);
}
