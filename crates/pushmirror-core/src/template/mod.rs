//! `${...}` placeholder substitution in mirror URLs.
//!
//! A placeholder names a root object followed by accessor calls, for example
//! `${repository.project().key()}`. Only the objects and accessors listed in
//! this module are available; each expression is type-checked against that
//! whitelist before anything is evaluated. Accessor names are accepted both
//! in short form (`name()`) and in getter form (`getName()`), the latter
//! being how existing host configurations are usually written.

mod accessor;

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

use crate::types::{MirrorTarget, Repository};

use accessor::{Accessor, Kind, Value};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder regex is valid"));

/// Root objects a template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Repository,
}

impl Root {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "repository" => Some(Root::Repository),
            _ => None,
        }
    }

    fn kind(self) -> Kind {
        match self {
            Root::Repository => Kind::Repository,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Failed to interpolate expression {placeholder}: no object referenced")]
    MissingObject { placeholder: String },
    #[error("Failed to interpolate expression {placeholder}: unknown object '{name}'")]
    UnknownObject { placeholder: String, name: String },
    #[error("Failed to interpolate expression {placeholder}: '{segment}' is not an invocable accessor")]
    NotInvocable { placeholder: String, segment: String },
    #[error("Failed to interpolate expression {placeholder}: unknown accessor '{accessor}' on {kind}")]
    UnknownAccessor {
        placeholder: String,
        accessor: String,
        kind: &'static str,
    },
    #[error("Failed to interpolate expression {placeholder}: no accessor specified on '{name}'")]
    NoProjection { placeholder: String, name: String },
}

/// A parsed, whitelisted placeholder expression.
#[derive(Debug, Clone)]
struct Expression {
    root: Root,
    accessors: Vec<Accessor>,
}

impl Expression {
    fn parse(placeholder: &str, body: &str) -> Result<Self, TemplateError> {
        let mut segments = body.trim().split('.');

        let name = segments.next().unwrap_or_default();
        if !is_identifier(name) {
            return Err(TemplateError::MissingObject {
                placeholder: placeholder.to_string(),
            });
        }
        let root = Root::lookup(name).ok_or_else(|| TemplateError::UnknownObject {
            placeholder: placeholder.to_string(),
            name: name.to_string(),
        })?;

        let mut kind = root.kind();
        let mut accessors = Vec::new();
        for segment in segments {
            let accessor_name = segment
                .strip_suffix("()")
                .filter(|candidate| is_identifier(candidate))
                .ok_or_else(|| TemplateError::NotInvocable {
                    placeholder: placeholder.to_string(),
                    segment: segment.to_string(),
                })?;
            let accessor = Accessor::lookup(kind, accessor_name).ok_or_else(|| {
                TemplateError::UnknownAccessor {
                    placeholder: placeholder.to_string(),
                    accessor: accessor_name.to_string(),
                    kind: kind.name(),
                }
            })?;
            kind = accessor.output();
            accessors.push(accessor);
        }

        if accessors.is_empty() {
            return Err(TemplateError::NoProjection {
                placeholder: placeholder.to_string(),
                name: name.to_string(),
            });
        }

        Ok(Self { root, accessors })
    }

    /// Evaluate against `repository`. `None` means an accessor failed at
    /// runtime and the placeholder should be kept as written.
    fn evaluate(&self, placeholder: &str, repository: &Repository) -> Option<String> {
        let mut value = match self.root {
            Root::Repository => Value::Repository(repository),
        };
        for accessor in &self.accessors {
            match accessor.apply(value) {
                Ok(next) => value = next,
                Err(reason) => {
                    warn!(
                        repository = %repository,
                        "Leaving {} unresolved: {}",
                        placeholder,
                        reason
                    );
                    return None;
                }
            }
        }
        Some(value.render())
    }
}

fn is_identifier(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Resolves URL templates against a repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlTemplateResolver;

impl UrlTemplateResolver {
    pub fn new() -> Self {
        Self
    }

    /// Substitute every placeholder in `template`.
    ///
    /// All placeholders are checked before any is evaluated, so a hard error
    /// anywhere in the string aborts the whole resolution.
    pub fn resolve(&self, template: &str, repository: &Repository) -> Result<String, TemplateError> {
        let expressions = PLACEHOLDER
            .captures_iter(template)
            .map(|caps| Expression::parse(&caps[0], &caps[1]))
            .collect::<Result<Vec<_>, _>>()?;

        if expressions.is_empty() {
            return Ok(template.to_string());
        }

        let mut expressions = expressions.into_iter();
        let resolved = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            let placeholder = &caps[0];
            expressions
                .next()
                .and_then(|expression| expression.evaluate(placeholder, repository))
                .unwrap_or_else(|| placeholder.to_string())
        });
        Ok(resolved.into_owned())
    }

    /// Copy of `target` with its URL resolved for `repository`.
    pub fn resolve_target(
        &self,
        target: &MirrorTarget,
        repository: &Repository,
    ) -> Result<MirrorTarget, TemplateError> {
        let url = self.resolve(target.url(), repository)?;
        Ok(target.to_builder().url(url).build())
    }

    pub fn resolve_targets(
        &self,
        targets: &[MirrorTarget],
        repository: &Repository,
    ) -> Result<Vec<MirrorTarget>, TemplateError> {
        targets
            .iter()
            .map(|target| self.resolve_target(target, repository))
            .collect()
    }
}
