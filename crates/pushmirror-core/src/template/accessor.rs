//! The accessor whitelist: which calls exist on which kind of value.

use crate::types::{Project, Repository};

/// Static type of a value flowing through an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Kind {
    Repository,
    Project,
    Text,
    Number,
}

impl Kind {
    pub(super) fn name(self) -> &'static str {
        match self {
            Kind::Repository => "repository",
            Kind::Project => "project",
            Kind::Text => "text",
            Kind::Number => "number",
        }
    }
}

/// Runtime value of an expression step.
#[derive(Debug, Clone)]
pub(super) enum Value<'a> {
    Repository(&'a Repository),
    Project(&'a Project),
    Text(String),
    Number(u64),
}

impl Value<'_> {
    pub(super) fn render(&self) -> String {
        match self {
            Value::Repository(repository) => repository.to_string(),
            Value::Project(project) => project.to_string(),
            Value::Text(text) => text.clone(),
            Value::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Accessor {
    RepositoryName,
    RepositorySlug,
    RepositoryId,
    RepositoryScmId,
    RepositoryDescription,
    RepositoryProject,
    ProjectKey,
    ProjectName,
    ProjectId,
    Lower,
    Upper,
    Trim,
    Length,
    NumberText,
}

impl Accessor {
    pub(super) fn lookup(kind: Kind, name: &str) -> Option<Self> {
        let accessor = match (kind, name) {
            (Kind::Repository, "name" | "getName") => Accessor::RepositoryName,
            (Kind::Repository, "slug" | "getSlug") => Accessor::RepositorySlug,
            (Kind::Repository, "id" | "getId") => Accessor::RepositoryId,
            (Kind::Repository, "scmId" | "getScmId") => Accessor::RepositoryScmId,
            (Kind::Repository, "description" | "getDescription") => {
                Accessor::RepositoryDescription
            }
            (Kind::Repository, "project" | "getProject") => Accessor::RepositoryProject,
            (Kind::Project, "key" | "getKey") => Accessor::ProjectKey,
            (Kind::Project, "name" | "getName") => Accessor::ProjectName,
            (Kind::Project, "id" | "getId") => Accessor::ProjectId,
            (Kind::Text, "toLowerCase" | "lower") => Accessor::Lower,
            (Kind::Text, "toUpperCase" | "upper") => Accessor::Upper,
            (Kind::Text, "trim") => Accessor::Trim,
            (Kind::Text, "length") => Accessor::Length,
            (Kind::Number, "toString") => Accessor::NumberText,
            _ => return None,
        };
        Some(accessor)
    }

    pub(super) fn output(self) -> Kind {
        match self {
            Accessor::RepositoryProject => Kind::Project,
            Accessor::RepositoryId | Accessor::ProjectId | Accessor::Length => Kind::Number,
            _ => Kind::Text,
        }
    }

    /// Apply to a value whose kind was checked at parse time.
    pub(super) fn apply<'a>(self, value: Value<'a>) -> Result<Value<'a>, String> {
        match (self, value) {
            (Accessor::RepositoryName, Value::Repository(r)) => Ok(Value::Text(r.name.clone())),
            (Accessor::RepositorySlug, Value::Repository(r)) => Ok(Value::Text(r.slug.clone())),
            (Accessor::RepositoryId, Value::Repository(r)) => Ok(Value::Number(r.id.0.into())),
            (Accessor::RepositoryScmId, Value::Repository(r)) => {
                Ok(Value::Text(r.scm_id.clone()))
            }
            (Accessor::RepositoryDescription, Value::Repository(r)) => r
                .description
                .clone()
                .map(Value::Text)
                .ok_or_else(|| "repository has no description".to_string()),
            (Accessor::RepositoryProject, Value::Repository(r)) => Ok(Value::Project(&r.project)),
            (Accessor::ProjectKey, Value::Project(p)) => Ok(Value::Text(p.key.clone())),
            (Accessor::ProjectName, Value::Project(p)) => Ok(Value::Text(p.name.clone())),
            (Accessor::ProjectId, Value::Project(p)) => Ok(Value::Number(p.id.into())),
            (Accessor::Lower, Value::Text(t)) => Ok(Value::Text(t.to_lowercase())),
            (Accessor::Upper, Value::Text(t)) => Ok(Value::Text(t.to_uppercase())),
            (Accessor::Trim, Value::Text(t)) => Ok(Value::Text(t.trim().to_string())),
            (Accessor::Length, Value::Text(t)) => Ok(Value::Number(t.chars().count() as u64)),
            (Accessor::NumberText, Value::Number(n)) => Ok(Value::Text(n.to_string())),
            (accessor, value) => Err(format!(
                "{:?} cannot be applied to {}",
                accessor,
                value.render()
            )),
        }
    }
}
