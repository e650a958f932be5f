//! Validation of submitted mirror settings.

use std::collections::BTreeMap;
use std::fmt;

use url::Url;

use crate::types::MirrorTarget;

use super::{SETTING_MIRROR_REPO_URL, SETTING_PASSWORD, SETTING_REFSPEC, SETTING_USERNAME};

/// Errors found while validating settings, keyed by setting name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    field_errors: BTreeMap<String, Vec<String>>,
    form_errors: Vec<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn add_form_error(&mut self, message: impl Into<String>) {
        self.form_errors.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.field_errors.is_empty() && self.form_errors.is_empty()
    }

    pub fn field_errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.field_errors
    }

    pub fn field(&self, field: &str) -> &[String] {
        self.field_errors
            .get(field)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn form_errors(&self) -> &[String] {
        &self.form_errors
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut emit = |f: &mut fmt::Formatter<'_>, line: String| {
            let separator = if first { "" } else { "; " };
            first = false;
            write!(f, "{}{}", separator, line)
        };
        for (field, messages) in &self.field_errors {
            for message in messages {
                emit(f, format!("{}: {}", field, message))?;
            }
        }
        for message in &self.form_errors {
            emit(f, message.clone())?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

fn is_http(url: &str) -> bool {
    Url::parse(url)
        .map(|parsed| parsed.scheme().to_ascii_lowercase().starts_with("http"))
        .unwrap_or(false)
}

/// Check every target and return them normalized for storage.
///
/// Non-http targets have their username and password cleared, since only
/// http(s) transports carry credentials in the URL.
pub fn validate_targets(targets: Vec<MirrorTarget>) -> Result<Vec<MirrorTarget>, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let mut normalized = Vec::with_capacity(targets.len());

    for target in targets {
        let suffix = target.suffix().to_string();
        let field = |name: &str| format!("{}{}", name, suffix);
        let url = target.url().trim();

        let http = !url.is_empty() && is_http(url);
        if url.is_empty() {
            errors.add_field_error(
                field(SETTING_MIRROR_REPO_URL),
                "The mirror repo url is required.",
            );
        } else if http && url.contains('@') {
            errors.add_field_error(
                field(SETTING_MIRROR_REPO_URL),
                "The username and password should not be included.",
            );
        }

        let target = if http {
            if target.username().is_empty() {
                errors.add_field_error(
                    field(SETTING_USERNAME),
                    "The username is required when using http(s).",
                );
            }
            if target.password().is_empty() {
                errors.add_field_error(
                    field(SETTING_PASSWORD),
                    "The password is required when using http(s).",
                );
            }
            target
        } else {
            target.to_builder().username("").password("").build()
        };

        if target
            .refspec()
            .split_whitespace()
            .any(|refspec| !refspec.contains(':'))
        {
            errors.add_field_error(
                field(SETTING_REFSPEC),
                "A refspec should be in the form <src>:<dest>.",
            );
        }

        normalized.push(target);
    }

    if errors.is_empty() {
        Ok(normalized)
    } else {
        Err(errors)
    }
}
