//! Construction of the `git push` invocation for a mirror target.

use url::Url;

use crate::types::MirrorTarget;

use super::PushError;

/// Refspec pushed when a target configures none.
pub const DEFAULT_REFSPEC: &str = "+refs/heads/*:refs/heads/*";
pub const TAGS_REFSPEC: &str = "+refs/tags/*:refs/tags/*";
pub const NOTES_REFSPEC: &str = "+refs/notes/*:refs/notes/*";

/// Add `username:password` userinfo to http(s) URLs.
///
/// Other transports (ssh, file, ...) authenticate out of band and are
/// returned unchanged.
pub fn authenticated_url(url: &str, username: &str, password: &str) -> Result<String, PushError> {
    if !url.to_ascii_lowercase().starts_with("http") {
        return Ok(url.to_string());
    }

    let invalid = |reason: String| PushError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let mut parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    parsed
        .set_username(username)
        .map_err(|_| invalid("URL cannot carry a username".to_string()))?;
    parsed
        .set_password(Some(password))
        .map_err(|_| invalid("URL cannot carry a password".to_string()))?;

    Ok(parsed.to_string())
}

/// Split a configured refspec list on whitespace, dropping empty entries.
pub fn refspecs(configured: &str) -> Vec<String> {
    let list: Vec<String> = configured
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if list.is_empty() {
        vec![DEFAULT_REFSPEC.to_string()]
    } else {
        list
    }
}

/// Argument list for one mirror push.
///
/// The VCS `--mirror` flag is deliberately not used: it would also push
/// pull-request refs. `--prune` with explicit refspecs removes remote
/// branches that no longer exist locally without that side effect.
#[derive(Clone, PartialEq, Eq)]
pub struct PushCommand {
    args: Vec<String>,
}

impl PushCommand {
    pub fn build(target: &MirrorTarget, authenticated_url: &str) -> Self {
        let mut args = vec![
            "push".to_string(),
            "--prune".to_string(),
            authenticated_url.to_string(),
            "--force".to_string(),
        ];

        if target.atomic() {
            args.push("--atomic".to_string());
        }

        args.extend(refspecs(target.refspec()));

        if target.include_tags() {
            args.push(TAGS_REFSPEC.to_string());
        }
        if target.include_notes() {
            args.push(NOTES_REFSPEC.to_string());
        }

        Self { args }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_url_gets_userinfo() {
        let url = authenticated_url(
            "https://bitbucket-mirror.example.com/scm/test/test.git",
            "u",
            "p",
        )
        .unwrap();
        assert_eq!(url, "https://u:p@bitbucket-mirror.example.com/scm/test/test.git");
    }

    #[test]
    fn port_query_and_fragment_are_kept() {
        let url = authenticated_url("http://host:8080/a/b.git?x=1#frag", "u", "p").unwrap();
        assert_eq!(url, "http://u:p@host:8080/a/b.git?x=1#frag");
    }

    #[test]
    fn ssh_url_is_unchanged() {
        let url = authenticated_url("ssh://git@host:7999/test/test.git", "u", "p").unwrap();
        assert_eq!(url, "ssh://git@host:7999/test/test.git");
    }

    #[test]
    fn scp_style_url_is_unchanged() {
        let url = authenticated_url("git@github.com:org/repo.git", "u", "p").unwrap();
        assert_eq!(url, "git@github.com:org/repo.git");
    }

    #[test]
    fn broken_http_url_is_rejected() {
        let err = authenticated_url("https://", "u", "p").unwrap_err();
        assert!(matches!(err, PushError::InvalidUrl { .. }));
    }

    #[test]
    fn refspecs_split_on_any_whitespace() {
        assert_eq!(
            refspecs("+refs/heads/a:refs/heads/a\n\n +refs/heads/b:refs/heads/b  "),
            vec!["+refs/heads/a:refs/heads/a", "+refs/heads/b:refs/heads/b"]
        );
    }

    #[test]
    fn empty_refspec_uses_default() {
        assert_eq!(refspecs(" \n"), vec![DEFAULT_REFSPEC]);
    }

    #[test]
    fn minimal_command() {
        let target = MirrorTarget::builder("ssh://host/repo.git").build();
        let command = PushCommand::build(&target, "ssh://host/repo.git");
        assert_eq!(
            command.args(),
            &[
                "push",
                "--prune",
                "ssh://host/repo.git",
                "--force",
                DEFAULT_REFSPEC
            ]
        );
    }

    #[test]
    fn full_command_orders_flags_and_refspecs() {
        let target = MirrorTarget::builder("https://host/repo.git")
            .refspec("+refs/heads/master:refs/heads/master +refs/heads/develop:refs/heads/develop")
            .include_tags(true)
            .include_notes(true)
            .atomic(true)
            .build();
        let command = PushCommand::build(&target, "https://u:p@host/repo.git");
        assert_eq!(
            command.args(),
            &[
                "push",
                "--prune",
                "https://u:p@host/repo.git",
                "--force",
                "--atomic",
                "+refs/heads/master:refs/heads/master",
                "+refs/heads/develop:refs/heads/develop",
                "+refs/tags/*:refs/tags/*",
                "+refs/notes/*:refs/notes/*",
            ]
        );
    }
}
