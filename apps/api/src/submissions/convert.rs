//! Deterministic mapping from raw submissions to new contacts.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::contact::{ContactSource, ContactStatus, ContactType, NewContact};
use crate::models::submission::{
    ClientRequestForm, InterpreterApplicationForm, Submission, SubmissionKind,
};

fn parse_form<T: DeserializeOwned>(kind: SubmissionKind, payload: &Value) -> Result<T, AppError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| AppError::Validation(format!("Invalid {} payload: {e}", kind.as_str())))
}

fn check_identity(name: &str, email: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".into()));
    }
    if !email.contains('@') {
        return Err(AppError::Validation("A valid email is required".into()));
    }
    Ok(())
}

pub fn validate_form(kind: SubmissionKind, payload: &Value) -> Result<(), AppError> {
    match kind {
        SubmissionKind::ClientRequest => {
            let form: ClientRequestForm = parse_form(kind, payload)?;
            check_identity(&form.name, &form.email)
        }
        SubmissionKind::InterpreterApplication => {
            let form: InterpreterApplicationForm = parse_form(kind, payload)?;
            check_identity(&form.name, &form.email)
        }
    }
}

/// Email the submission was made with, trimmed.
pub fn submission_email(submission: &Submission) -> Option<String> {
    submission
        .payload
        .get("email")
        .and_then(Value::as_str)
        .map(|e| e.trim().to_string())
}

fn put_opt(fields: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        fields.insert(key.to_string(), json!(v));
    }
}

pub fn client_request_to_contact(id: Uuid, form: ClientRequestForm) -> NewContact {
    let mut contact = NewContact::new(
        ContactType::Client,
        form.name.trim(),
        form.email.trim(),
        ContactSource::WebsiteForm,
    );
    contact.status = ContactStatus::Pending;
    contact.phone = form.phone;
    contact.company = form.company;
    contact.notes = form.message.clone();
    contact.service_requests = Some(1);
    contact.total_spent = Some(0.0);

    contact.tags.push("website_lead".to_string());
    if let Some(service) = form.service_type.as_deref().filter(|s| !s.is_empty()) {
        contact.tags.push(service.to_lowercase().replace(' ', "_"));
    }

    let fields = &mut contact.custom_fields;
    fields.insert(SubmissionKind::ClientRequest.origin_field().into(), json!(id.to_string()));
    put_opt(fields, "Service Type", &form.service_type);
    put_opt(fields, "Urgency", &form.urgency);
    put_opt(fields, "Source Language", &form.source_language);
    put_opt(fields, "Target Language", &form.target_language);
    put_opt(fields, "Preferred Date", &form.preferred_date);
    contact
}

pub fn interpreter_application_to_contact(id: Uuid, form: InterpreterApplicationForm) -> NewContact {
    let mut contact = NewContact::new(
        ContactType::Interpreter,
        form.name.trim(),
        form.email.trim(),
        ContactSource::InterpreterApplication,
    );
    contact.status = ContactStatus::Pending;
    contact.phone = form.phone;
    contact.notes = form.message.clone();
    contact.languages = form.languages;
    contact.specializations = form.specializations;
    contact.completed_jobs = Some(0);
    contact.tags.push("applicant".to_string());

    let fields = &mut contact.custom_fields;
    fields.insert(
        SubmissionKind::InterpreterApplication.origin_field().into(),
        json!(id.to_string()),
    );
    put_opt(fields, "Experience", &form.experience);
    put_opt(fields, "Location", &form.location);
    put_opt(fields, "Availability", &form.availability);
    if !form.certifications.is_empty() {
        fields.insert("Certifications".into(), json!(form.certifications.join(", ")));
    }
    contact
}

pub fn convert(submission: &Submission) -> Result<NewContact, AppError> {
    match submission.kind {
        SubmissionKind::ClientRequest => {
            let form: ClientRequestForm = parse_form(submission.kind, &submission.payload)?;
            check_identity(&form.name, &form.email)?;
            Ok(client_request_to_contact(submission.id, form))
        }
        SubmissionKind::InterpreterApplication => {
            let form: InterpreterApplicationForm =
                parse_form(submission.kind, &submission.payload)?;
            check_identity(&form.name, &form.email)?;
            Ok(interpreter_application_to_contact(submission.id, form))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_request_mapping() {
        let submission = Submission::new(
            SubmissionKind::ClientRequest,
            json!({
                "name": "Ana",
                "email": "ana@x.com",
                "company": "Acme",
                "serviceType": "Conference Interpreting",
                "urgency": "high"
            }),
        );
        let contact = convert(&submission).unwrap();
        assert_eq!(contact.contact_type, ContactType::Client);
        assert_eq!(contact.status, ContactStatus::Pending);
        assert_eq!(contact.source, ContactSource::WebsiteForm);
        assert_eq!(contact.company.as_deref(), Some("Acme"));
        assert_eq!(
            contact.custom_fields["Original Request ID"],
            json!(submission.id.to_string())
        );
        assert_eq!(contact.custom_fields["Urgency"], json!("high"));
        assert!(contact.tags.contains(&"conference_interpreting".to_string()));
        assert!(!contact.custom_fields.contains_key("Target Language"));
    }

    #[test]
    fn test_interpreter_application_copies_languages_verbatim() {
        let submission = Submission::new(
            SubmissionKind::InterpreterApplication,
            json!({
                "name": "Luis",
                "email": "luis@x.com",
                "languages": ["Spanish", "English"],
                "specializations": ["Medical"],
                "certifications": ["CCHI", "NBCMI"]
            }),
        );
        let contact = convert(&submission).unwrap();
        assert_eq!(contact.contact_type, ContactType::Interpreter);
        assert_eq!(contact.source, ContactSource::InterpreterApplication);
        assert_eq!(contact.languages, vec!["Spanish", "English"]);
        assert_eq!(contact.specializations, vec!["Medical"]);
        assert_eq!(
            contact.custom_fields["Original Application ID"],
            json!(submission.id.to_string())
        );
        assert_eq!(contact.custom_fields["Certifications"], json!("CCHI, NBCMI"));
    }

    #[test]
    fn test_validate_rejects_missing_email() {
        let err = validate_form(SubmissionKind::ClientRequest, &json!({ "name": "Ana", "email": "" }));
        assert!(matches!(err, Err(AppError::Validation(_))));
        let err = validate_form(SubmissionKind::InterpreterApplication, &json!({ "email": "x@y.z" }));
        assert!(matches!(err, Err(AppError::Validation(_))));
    }
}
