//! Glob pattern matching for file-name filters.
//!
//! The filesystem primitives `find` and `grep_recursive` restrict results
//! by a glob applied to the file *name* (never the full path), so this
//! module compiles name globs into anchored regexes.
//!
//! Supported glob syntax:
//! - `*` - Matches any sequence of characters
//! - `?` - Matches exactly one character
//! - `[...]` - Character class (passed through to regex)
//! - All other characters are escaped as regex literals
//!
//! # Examples
//!
//! ```
//! use safexec::utils::glob::glob_to_regex;
//!
//! # fn main() -> safexec::error::Result<()> {
//! let re = glob_to_regex("*.rs")?;
//! assert!(re.is_match("main.rs"));
//! assert!(!re.is_match("main.rs.bak"));
//!
//! let re = glob_to_regex("config.?")?;
//! assert!(re.is_match("config.a"));
//! assert!(!re.is_match("config.json"));
//! # Ok(())
//! # }
//! ```

use regex::Regex;

use crate::error::{Result, SandboxError};

/// Converts a file-name glob into a compiled, fully anchored regex.
///
/// # Arguments
///
/// * `glob` - A glob pattern matched against file names
///
/// # Errors
///
/// Returns [`SandboxError::Pattern`] if the pattern produces an invalid
/// regex (e.g. an unterminated character class).
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut regex = String::from("^");
    let mut chars = glob.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => {
                // Character class: pass through until the closing bracket.
                regex.push('[');
                let mut closed = false;
                for ch in chars.by_ref() {
                    regex.push(ch);
                    if ch == ']' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(SandboxError::Pattern(format!(
                        "unterminated character class in glob '{glob}'"
                    )));
                }
            }
            // Escape regex metacharacters.
            '.' | '+' | '^' | '$' | '(' | ')' | '{' | '}' | '|' | '\\' => {
                regex.push('\\');
                regex.push(ch);
            }
            _ => regex.push(ch),
        }
    }

    regex.push('$');
    Regex::new(&regex)
        .map_err(|e| SandboxError::Pattern(format!("glob '{glob}' did not compile: {e}")))
}
