//! Scrubbing of secrets from captured process and HTTP output.

use std::fmt;

use url::Url;

/// Replacement for a password that appeared as URL userinfo.
pub const PASSWORD_PLACEHOLDER: &str = ":*****@";
/// Replacement for a bare private token.
pub const TOKEN_PLACEHOLDER: &str = "*****";

/// Replaces known secrets in text with fixed placeholders.
///
/// A redactor is created for one operation from the decrypted secrets of that
/// operation's target and dropped with it. Both the literal secret and the
/// percent-encoded forms produced when it is placed in a URL are scrubbed.
#[derive(Clone, Default)]
pub struct Redactor {
    replacements: Vec<(String, &'static str)>,
}

impl Redactor {
    pub fn new(password: &str, private_token: &str) -> Self {
        let mut replacements = Vec::new();

        if !password.is_empty() {
            for form in encoded_forms(password) {
                replacements.push((format!(":{}@", form), PASSWORD_PLACEHOLDER));
            }
        }
        if !private_token.is_empty() {
            for form in encoded_forms(private_token) {
                replacements.push((form, TOKEN_PLACEHOLDER));
            }
        }

        // Longest patterns first so a shorter secret never splits a longer one.
        replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        replacements.dedup();

        Self { replacements }
    }

    /// A redactor that leaves text untouched.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn clean(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for (secret, placeholder) in &self.replacements {
            if cleaned.contains(secret.as_str()) {
                cleaned = cleaned.replace(secret.as_str(), placeholder);
            }
        }
        cleaned
    }
}

impl fmt::Debug for Redactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redactor")
            .field("secrets", &self.replacements.len())
            .finish()
    }
}

/// Raw secret plus the forms it takes once encoded into URL userinfo or a
/// query string.
fn encoded_forms(secret: &str) -> Vec<String> {
    let mut forms = vec![secret.to_string()];

    if let Ok(mut url) = Url::parse("http://redact.invalid/")
        && url.set_password(Some(secret)).is_ok()
        && let Some(encoded) = url.password()
    {
        forms.push(encoded.to_string());
    }

    let query: String = url::form_urlencoded::byte_serialize(secret.as_bytes()).collect();
    forms.push(query);

    forms.sort();
    forms.dedup();
    forms
}

/// Output buffer that redacts everything written to it.
///
/// Push runs and REST admin calls both report through this type so that no
/// caller ever receives unscrubbed text.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    redactor: Redactor,
    text: String,
}

impl CapturedOutput {
    pub fn new(redactor: Redactor) -> Self {
        Self {
            redactor,
            text: String::new(),
        }
    }

    /// Append a chunk of output, scrubbing it first.
    pub fn push(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(&self.redactor.clean(chunk));
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}
