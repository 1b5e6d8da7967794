//! Process Identity Resolution
//!
//! Resolves the configured `run_as_user` to the numeric credentials the child
//! process should assume before exec. Identity switching is platform specific,
//! so the executor only talks to the [`IdentityResolver`] trait.

use std::fmt;

/// Numeric credentials for a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

/// Errors resolving a user name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("user '{0}' not found")]
    UnknownUser(String),

    #[error("failed to look up user '{user}': {reason}")]
    Lookup { user: String, reason: String },

    #[error("switching process identity is not supported on this platform")]
    Unsupported,
}

/// Capability to turn a user name into process credentials
pub trait IdentityResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, user: &str) -> Result<Identity, IdentityError>;
}

/// Resolver backed by the system user database
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentity;

#[cfg(unix)]
impl IdentityResolver for SystemIdentity {
    fn resolve(&self, user: &str) -> Result<Identity, IdentityError> {
        use nix::unistd::User;

        match User::from_name(user) {
            Ok(Some(entry)) => Ok(Identity {
                uid: entry.uid.as_raw(),
                gid: entry.gid.as_raw(),
            }),
            Ok(None) => Err(IdentityError::UnknownUser(user.to_string())),
            Err(errno) => Err(IdentityError::Lookup {
                user: user.to_string(),
                reason: errno.to_string(),
            }),
        }
    }
}

#[cfg(not(unix))]
impl IdentityResolver for SystemIdentity {
    fn resolve(&self, _user: &str) -> Result<Identity, IdentityError> {
        Err(IdentityError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_resolve_root() {
        let identity = SystemIdentity.resolve("root").unwrap();
        assert_eq!(identity.uid, 0);
        assert_eq!(identity.gid, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_unknown_user() {
        let err = SystemIdentity
            .resolve("no-such-user-mcp-shell-12345")
            .unwrap_err();
        assert_eq!(
            err,
            IdentityError::UnknownUser("no-such-user-mcp-shell-12345".to_string())
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            IdentityError::UnknownUser("bob".to_string()).to_string(),
            "user 'bob' not found"
        );
        assert!(IdentityError::Unsupported
            .to_string()
            .contains("not supported"));
    }
}
