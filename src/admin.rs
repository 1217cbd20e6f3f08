//! Administrative payloads and the client-side checks run before submitting them.

use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;

/// Collections the dashboard can create, update and delete through the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Scenarios,
    Students,
    Instructors,
    Prompts,
    CaseFiles,
}

impl Resource {
    pub fn path(self) -> &'static str {
        match self {
            Resource::Scenarios => "scenarios",
            Resource::Students => "students",
            Resource::Instructors => "instructors",
            Resource::Prompts => "prompts",
            Resource::CaseFiles => "case-files",
        }
    }

    pub fn singular(self) -> &'static str {
        match self {
            Resource::Scenarios => "scenario",
            Resource::Students => "student",
            Resource::Instructors => "instructor",
            Resource::Prompts => "prompt",
            Resource::CaseFiles => "case file",
        }
    }
}

impl std::str::FromStr for Resource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "scenario" | "scenarios" => Ok(Resource::Scenarios),
            "student" | "students" => Ok(Resource::Students),
            "instructor" | "instructors" => Ok(Resource::Instructors),
            "prompt" | "prompts" => Ok(Resource::Prompts),
            "case-file" | "case-files" | "file" | "files" => Ok(Resource::CaseFiles),
            other => Err(format!("unknown resource '{other}'")),
        }
    }
}

/// Implemented by every payload sent to a [`Resource`] endpoint.
pub trait Validate {
    fn validate(&self) -> Result<(), ApiError>;
}

fn require(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<(), ApiError> {
    let trimmed = email.trim();
    let valid = match trimmed.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid || trimmed.contains(char::is_whitespace) {
        return Err(ApiError::validation(format!("'{trimmed}' is not a valid email address")));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentForm {
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub section_ids: Vec<Uuid>,
}

impl Validate for StudentForm {
    fn validate(&self) -> Result<(), ApiError> {
        require(&self.first_name, "First name")?;
        require(&self.last_name, "Last name")?;
        if let Some(email) = self.email.as_deref().filter(|e| !e.trim().is_empty()) {
            check_email(email)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructorForm {
    pub name: String,
    pub email: String,
    pub section_ids: Vec<Uuid>,
}

impl Validate for InstructorForm {
    fn validate(&self) -> Result<(), ApiError> {
        require(&self.name, "Name")?;
        require(&self.email, "Email")?;
        check_email(&self.email)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioForm {
    pub name: String,
    pub case_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub enabled: bool,
}

impl Validate for ScenarioForm {
    fn validate(&self) -> Result<(), ApiError> {
        require(&self.name, "Scenario name")?;
        if self.case_id.is_none() {
            return Err(ApiError::validation("A case must be selected"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptForm {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Validate for PromptForm {
    fn validate(&self) -> Result<(), ApiError> {
        require(&self.title, "Prompt title")?;
        require(&self.body, "Prompt text")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseFileForm {
    pub case_id: Uuid,
    pub file_name: String,
    pub include_in_prompt: bool,
}

impl Validate for CaseFileForm {
    fn validate(&self) -> Result<(), ApiError> {
        require(&self.file_name, "File name")
    }
}

pub fn check_import_url(url: &str) -> Result<(), ApiError> {
    let trimmed = url.trim();
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(ApiError::validation("URL must start with 'http://' or 'https://'"));
    }
    Ok(())
}
