//! Property-Based Tests for Command Validation
//!
//! - **Metacharacters**: in secure mode any command containing a shell
//!   metacharacter is denied, whatever the allowlist says
//! - **Idempotence**: validating the same input twice gives the same decision
//! - **Agreement**: whatever the secure policy allows, the executor's parser
//!   accepts with the same executable
//!
//! ```bash
//! cargo test --lib tools::proptests
//! ```

use proptest::prelude::*;

use super::lexer::{parse_command, SHELL_METACHARACTERS};
use super::validator::{CommandPolicy, PolicyDenial, ValidationMode};
use crate::audit::AuditLog;

fn secure_policy() -> CommandPolicy {
    CommandPolicy::with_mode(
        ValidationMode::Secure {
            allowed_executables: vec!["echo".to_string(), "ls".to_string(), "cat".to_string()],
        },
        AuditLog::disabled(),
    )
}

fn legacy_policy() -> CommandPolicy {
    CommandPolicy::with_mode(
        ValidationMode::Legacy {
            allowed_commands: vec!["echo".to_string()],
            blocked_commands: vec!["rm".to_string()],
            blocked_patterns: vec![regex::Regex::new(r"sudo\s+").unwrap()],
        },
        AuditLog::disabled(),
    )
}

fn arb_metachar() -> impl Strategy<Value = char> {
    prop::sample::select(SHELL_METACHARACTERS.to_vec())
}

fn arb_word() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_./-]{1,12}"
}

proptest! {
    #[test]
    fn prop_metacharacters_always_denied(
        executable in prop::sample::select(vec!["echo", "ls", "cat"]),
        before in arb_word(),
        meta in arb_metachar(),
        after in "[a-zA-Z0-9 ]{0,8}",
    ) {
        let command = format!("{} {}{}{}", executable, before, meta, after);
        let denial = secure_policy().validate(&command).unwrap_err();
        prop_assert!(
            matches!(
                denial,
                PolicyDenial::ShellMetacharacters(_) | PolicyDenial::DangerousConstructs(_)
            ),
            "{:?} gave {:?}",
            command,
            denial
        );
    }

    #[test]
    fn prop_validation_is_idempotent(command in ".{0,40}") {
        let secure = secure_policy();
        prop_assert_eq!(secure.validate(&command), secure.validate(&command));

        let legacy = legacy_policy();
        prop_assert_eq!(legacy.validate(&command), legacy.validate(&command));
    }

    #[test]
    fn prop_allowed_commands_parse_identically(
        executable in prop::sample::select(vec!["echo", "ls", "cat"]),
        args in prop::collection::vec(arb_word(), 0..5),
    ) {
        let command = format!("{} {}", executable, args.join(" "));
        prop_assert!(secure_policy().validate(&command).is_ok());

        let parsed = parse_command(&command).unwrap();
        prop_assert_eq!(parsed.executable, executable);
        prop_assert_eq!(parsed.args, args);
    }

    #[test]
    fn prop_unlisted_executable_denied(executable in "[a-z]{3,10}") {
        prop_assume!(!["echo", "ls", "cat"].contains(&executable.as_str()));
        let denial = secure_policy().validate(&format!("{} arg", executable)).unwrap_err();
        prop_assert_eq!(denial, PolicyDenial::ExecutableNotAllowed(executable));
    }
}
