//! Template types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Template-specific error type
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Invalid template name: {0}")]
    InvalidName(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
}

/// Result type for template validation
pub type TemplateResult<T> = Result<T, TemplateError>;

/// A named, versioned prompt template definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Opaque identifier, stable for the template's lifetime
    pub id: Uuid,

    /// Unique lookup key, human-chosen (alphanumeric, dash, underscore)
    pub name: String,

    /// Template description (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Prompt body with {{variable}} placeholders
    pub body: String,

    /// Sampling temperature; falls back to the configured default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Free-form grouping label (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Inactive templates are invisible to generation lookups but stay editable
    pub active: bool,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Validate the template
    pub fn validate(&self) -> TemplateResult<()> {
        validate_name(&self.name)?;

        if self.body.is_empty() {
            return Err(TemplateError::InvalidTemplate(
                "Body must not be empty".to_string(),
            ));
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(TemplateError::InvalidTemplate(
                    "Temperature must be between 0.0 and 2.0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

pub(crate) fn validate_name(name: &str) -> TemplateResult<()> {
    if name.is_empty() || name.len() > 128 {
        return Err(TemplateError::InvalidName(
            "Name must be 1-128 characters".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TemplateError::InvalidName(
            "Name must contain only alphanumeric, dash, or underscore".to_string(),
        ));
    }

    Ok(())
}

/// An immutable, append-only snapshot of a template at the time of a change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVersion {
    /// Version identifier
    pub id: Uuid,

    /// Owning template
    pub template_id: Uuid,

    /// Body at the time of the snapshot
    pub body: String,

    /// Temperature at the time of the snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Snapshot timestamp; the newest version is the template's current one
    pub created_at: DateTime<Utc>,

    /// Actor who made the change
    pub author: String,

    /// Free-text notes describing the change (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_notes: Option<String>,
}

/// Request to create a new template
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateRequest {
    /// Unique lookup key
    pub name: String,

    /// Template description (optional)
    pub description: Option<String>,

    /// Prompt body with {{variable}} placeholders
    pub body: String,

    /// Sampling temperature (optional)
    pub temperature: Option<f32>,

    /// Free-form grouping label (optional)
    pub category: Option<String>,

    /// Visibility to generation lookups (defaults to active)
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl CreateTemplateRequest {
    /// Materialize the request into a Template with fresh id and timestamps.
    pub fn into_template(self) -> Template {
        let now = Utc::now();
        Template {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            body: self.body,
            temperature: self.temperature,
            category: self.category,
            active: self.active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update to an existing template.
///
/// Fields left as `None` are not touched; this is a merge, not a replace.
/// Double options (`Some(None)`) clear a nullable field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplatePatch {
    /// Unique lookup key (optional)
    pub name: Option<String>,

    /// Template description (optional, use null to clear)
    pub description: Option<Option<String>>,

    /// Prompt body (optional)
    pub body: Option<String>,

    /// Sampling temperature (optional, use null to clear)
    pub temperature: Option<Option<f32>>,

    /// Grouping label (optional, use null to clear)
    pub category: Option<Option<String>>,

    /// Visibility flag (optional)
    pub active: Option<bool>,
}

impl TemplatePatch {
    /// Apply the patch to a template in place, bumping `updated_at`.
    ///
    /// Shared by every storage backend so merge semantics cannot drift.
    pub fn apply(&self, template: &mut Template) {
        if let Some(name) = &self.name {
            template.name = name.clone();
        }

        if let Some(description) = &self.description {
            template.description = description.clone();
        }

        if let Some(body) = &self.body {
            template.body = body.clone();
        }

        if let Some(temperature) = self.temperature {
            template.temperature = temperature;
        }

        if let Some(category) = &self.category {
            template.category = category.clone();
        }

        if let Some(active) = self.active {
            template.active = active;
        }

        template.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_template() -> Template {
        Template {
            id: Uuid::new_v4(),
            name: "greet".to_string(),
            description: Some("Greeting prompt".to_string()),
            body: "Hello {{name}}".to_string(),
            temperature: Some(0.7),
            category: Some("demo".to_string()),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample_template().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_name() {
        let mut template = sample_template();
        template.name = "not a name".to_string();
        assert!(matches!(
            template.validate(),
            Err(TemplateError::InvalidName(_))
        ));

        template.name = String::new();
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_body() {
        let mut template = sample_template();
        template.body = String::new();
        assert!(matches!(
            template.validate(),
            Err(TemplateError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_temperature() {
        let mut template = sample_template();
        template.temperature = Some(3.5);
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_patch_merges_only_provided_fields() {
        let mut template = sample_template();
        let before_body = template.body.clone();

        let patch = TemplatePatch {
            description: Some(None),
            temperature: Some(Some(0.2)),
            ..Default::default()
        };
        patch.apply(&mut template);

        assert_eq!(template.body, before_body);
        assert_eq!(template.name, "greet");
        assert_eq!(template.description, None);
        assert_eq!(template.temperature, Some(0.2));
        assert!(template.active);
    }

    #[test]
    fn test_create_request_materializes_with_fresh_identity() {
        let request = CreateTemplateRequest {
            name: "greet".to_string(),
            description: None,
            body: "Hello {{name}}".to_string(),
            temperature: None,
            category: None,
            active: true,
        };

        let template = request.into_template();
        assert_eq!(template.name, "greet");
        assert!(template.temperature.is_none());
        assert_eq!(template.created_at, template.updated_at);
    }
}
