use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::custom_field::{CustomField, CustomFieldPatch, FieldType, NewCustomField};
use crate::store::Store;

/// `options` must be present and non-empty exactly when the type is `select`.
pub fn validate_definition(
    name: &str,
    field_type: FieldType,
    options: Option<&[String]>,
) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("Field name is required".into()));
    }
    let has_options = options.is_some_and(|o| !o.is_empty());
    match (field_type, has_options) {
        (FieldType::Select, false) => Err(AppError::Validation(
            "Select fields need at least one option".into(),
        )),
        (FieldType::Select, true) => Ok(()),
        (_, true) => Err(AppError::Validation(
            "Only select fields take options".into(),
        )),
        (_, false) => Ok(()),
    }
}

async fn ensure_unique_name(
    store: &dyn Store,
    name: &str,
    except: Option<Uuid>,
) -> Result<(), AppError> {
    let taken = store
        .list_custom_fields()
        .await?
        .into_iter()
        .any(|f| !f.deleted && Some(f.id) != except && f.name.eq_ignore_ascii_case(name.trim()));
    if taken {
        return Err(AppError::Validation(format!(
            "A custom field named '{}' already exists",
            name.trim()
        )));
    }
    Ok(())
}

/// Live (not deleted) definitions, oldest first.
pub async fn list_fields(store: &dyn Store) -> Result<Vec<CustomField>, AppError> {
    Ok(store
        .list_custom_fields()
        .await?
        .into_iter()
        .filter(|f| !f.deleted)
        .collect())
}

pub async fn create_field(store: &dyn Store, new: NewCustomField) -> Result<CustomField, AppError> {
    validate_definition(&new.name, new.field_type, new.options.as_deref())?;
    ensure_unique_name(store, &new.name, None).await?;

    let field = CustomField {
        id: Uuid::new_v4(),
        name: new.name.trim().to_string(),
        field_type: new.field_type,
        options: new.options.filter(|_| new.field_type == FieldType::Select),
        required: new.required,
        applies_to: new.applies_to,
        created_at: Utc::now(),
        deleted: false,
        deleted_at: None,
    };
    store.insert_custom_field(&field).await?;
    info!("Created custom field '{}' ({})", field.name, field.id);
    Ok(field)
}

async fn live_field(store: &dyn Store, id: Uuid) -> Result<CustomField, AppError> {
    store
        .get_custom_field(id)
        .await?
        .filter(|f| !f.deleted)
        .ok_or_else(|| AppError::NotFound(format!("Custom field {id} not found")))
}

pub async fn update_field(
    store: &dyn Store,
    id: Uuid,
    patch: CustomFieldPatch,
) -> Result<CustomField, AppError> {
    let mut field = live_field(store, id).await?;

    if let Some(name) = patch.name {
        ensure_unique_name(store, &name, Some(id)).await?;
        field.name = name.trim().to_string();
    }
    if let Some(field_type) = patch.field_type {
        field.field_type = field_type;
        if field_type != FieldType::Select {
            field.options = None;
        }
    }
    if let Some(options) = patch.options {
        field.options = Some(options);
    }
    if let Some(required) = patch.required {
        field.required = required;
    }
    if let Some(applies_to) = patch.applies_to {
        field.applies_to = applies_to;
    }

    validate_definition(&field.name, field.field_type, field.options.as_deref())?;
    store.replace_custom_field(&field).await?;
    Ok(field)
}

/// Soft-deletes a definition after removing its key from every contact.
/// Both steps run as one atomic store operation. Returns contacts touched.
pub async fn delete_field(store: &dyn Store, id: Uuid) -> Result<usize, AppError> {
    let field = live_field(store, id).await?;
    let touched = store.delete_custom_field(id, Utc::now()).await?;
    info!(
        "Deleted custom field '{}' ({id}), cleared from {touched} contact(s)",
        field.name
    );
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::contact::{ContactSource, ContactType, NewContact};
    use crate::models::custom_field::AppliesTo;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn new_field(name: &str, field_type: FieldType, options: Option<Vec<String>>) -> NewCustomField {
        NewCustomField {
            name: name.into(),
            field_type,
            options,
            required: false,
            applies_to: AppliesTo::All,
        }
    }

    #[test]
    fn test_select_requires_options() {
        assert!(validate_definition("Tier", FieldType::Select, None).is_err());
        let none: Vec<String> = Vec::new();
        let gold = vec!["Gold".to_string()];
        assert!(validate_definition("Tier", FieldType::Select, Some(none.as_slice())).is_err());
        assert!(validate_definition("Tier", FieldType::Select, Some(gold.as_slice())).is_ok());
        assert!(validate_definition("Age", FieldType::Number, Some(gold.as_slice())).is_err());
        assert!(validate_definition(" ", FieldType::Text, None).is_err());
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected_case_insensitively() {
        let store = MemoryStore::new();
        create_field(&store, new_field("Region", FieldType::Text, None))
            .await
            .unwrap();
        let err = create_field(&store, new_field("region", FieldType::Text, None)).await;
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_switching_away_from_select_drops_options() {
        let store = MemoryStore::new();
        let field = create_field(
            &store,
            new_field("Tier", FieldType::Select, Some(vec!["Gold".into()])),
        )
        .await
        .unwrap();
        let updated = update_field(
            &store,
            field.id,
            CustomFieldPatch {
                field_type: Some(FieldType::Text),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.field_type, FieldType::Text);
        assert!(updated.options.is_none());
    }

    #[tokio::test]
    async fn test_delete_cascades_and_hides_field() {
        let store = MemoryStore::new();
        let field = create_field(&store, new_field("Region", FieldType::Text, None))
            .await
            .unwrap();
        let mut contact = NewContact::new(
            ContactType::Interpreter,
            "Luis",
            "luis@x.com",
            ContactSource::Manual,
        );
        contact.custom_fields.insert("Region".into(), json!("EU"));
        contact.custom_fields.insert("Tier".into(), json!("Gold"));
        let contact = contact.into_contact(Utc::now());
        store.insert_contact(&contact).await.unwrap();

        assert_eq!(delete_field(&store, field.id).await.unwrap(), 1);

        let stored = store.get_contact(contact.id).await.unwrap().unwrap();
        assert!(!stored.custom_fields.contains_key("Region"));
        assert!(stored.custom_fields.contains_key("Tier"));
        assert!(list_fields(&store).await.unwrap().is_empty());
        // definition kept, flagged
        assert!(store.get_custom_field(field.id).await.unwrap().unwrap().deleted);
        // a second delete sees no live field
        assert!(matches!(
            delete_field(&store, field.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
