//! Shell Lexical Analysis
//!
//! Detection of shell metacharacters and dangerous multi-character constructs,
//! plus the whitespace tokenizer shared by the policy engine and the executor.
//! Both components must call the same functions so that a command accepted by
//! one is parsed identically by the other.

/// Characters with special meaning to a POSIX shell
pub const SHELL_METACHARACTERS: &[char] = &[
    '|', '&', ';', '<', '>', '(', ')', '{', '}', '[', ']', '$', '`', '\\',
];

/// Multi-character sequences that chain, substitute, expand or redirect
///
/// Partially overlaps [`SHELL_METACHARACTERS`]. Both lists are checked.
pub const DANGEROUS_CONSTRUCTS: &[&str] = &[
    "$(", "`", "${", "&&", "||", ";", "|", ">", "<", ">>", "<<", "&",
];

/// Return the first shell metacharacter found in `input`
pub fn find_shell_metacharacter(input: &str) -> Option<char> {
    input.chars().find(|c| SHELL_METACHARACTERS.contains(c))
}

/// Check if `input` contains any shell metacharacter
pub fn contains_shell_metacharacters(input: &str) -> bool {
    find_shell_metacharacter(input).is_some()
}

/// Return the first dangerous construct found in `input`
pub fn find_dangerous_construct(input: &str) -> Option<&'static str> {
    DANGEROUS_CONSTRUCTS
        .iter()
        .copied()
        .find(|construct| input.contains(construct))
}

/// Check if `input` contains any dangerous shell construct
pub fn contains_dangerous_constructs(input: &str) -> bool {
    find_dangerous_construct(input).is_some()
}

/// Split a command on whitespace
///
/// No quoting, escaping or expansion is performed. Every token becomes
/// exactly one argv entry.
pub fn tokenize(command: &str) -> Vec<&str> {
    command.split_whitespace().collect()
}

/// A command split into an executable and its argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Executable name or path (first token)
    pub executable: String,

    /// Remaining tokens, passed verbatim as argv
    pub args: Vec<String>,
}

/// Reasons a command cannot be turned into a direct invocation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("executable contains shell metacharacters: {0}")]
    ExecutableMetacharacters(String),

    #[error("argument contains dangerous shell constructs: {0}")]
    DangerousArgument(String),
}

/// Parse a command for direct execution without a shell
///
/// The executable may not contain any metacharacter. Arguments may contain
/// characters such as `-`, `.` or `/` but no dangerous construct.
pub fn parse_command(command: &str) -> Result<ParsedCommand, ParseError> {
    let tokens = tokenize(command.trim());
    let (executable, args) = tokens.split_first().ok_or(ParseError::Empty)?;

    if contains_shell_metacharacters(executable) {
        return Err(ParseError::ExecutableMetacharacters(executable.to_string()));
    }

    if let Some(arg) = args.iter().find(|a| contains_dangerous_constructs(a)) {
        return Err(ParseError::DangerousArgument(arg.to_string()));
    }

    Ok(ParsedCommand {
        executable: executable.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
    })
}
