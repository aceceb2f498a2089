use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The two raw-submission collections watched for conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    ClientRequest,
    InterpreterApplication,
}

impl SubmissionKind {
    pub const ALL: [SubmissionKind; 2] = [
        SubmissionKind::ClientRequest,
        SubmissionKind::InterpreterApplication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionKind::ClientRequest => "client_request",
            SubmissionKind::InterpreterApplication => "interpreter_application",
        }
    }

    /// Custom-field key on the converted contact that points back at the submission.
    pub fn origin_field(&self) -> &'static str {
        match self {
            SubmissionKind::ClientRequest => "Original Request ID",
            SubmissionKind::InterpreterApplication => "Original Application ID",
        }
    }

    pub fn dedup_key(&self, submission_id: Uuid) -> String {
        format!("{}:{}", self.as_str(), submission_id)
    }
}

/// A raw form submission as stored. `payload` is the untouched form body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub kind: SubmissionKind,
    pub payload: Value,
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(kind: SubmissionKind, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            processed: false,
            processed_at: None,
            processed_by: None,
            created_at: Utc::now(),
        }
    }
}

/// Body of the public "request a quote" form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequestForm {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub service_type: Option<String>,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub urgency: Option<String>,
    pub preferred_date: Option<String>,
    pub message: Option<String>,
}

/// Body of the interpreter application form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpreterApplicationForm {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub specializations: Vec<String>,
    pub experience: Option<String>,
    #[serde(default)]
    pub certifications: Vec<String>,
    pub location: Option<String>,
    pub availability: Option<String>,
    pub message: Option<String>,
}
