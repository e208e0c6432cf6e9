//! Static pre-execution validation of submitted snippets.
//!
//! Before any code reaches the interpreter, it is screened against a fixed
//! table of pattern rules covering the known bypass surface: direct file
//! I/O, process and network escapes, reflective introspection, system
//! control, module loading, lint-suppression directives, and interpreter
//! internals. The validator is a defense-in-depth layer in front of the
//! capability checks, not the sole guard.
//!
//! Most rules run against a *stripped* view of the code in which string
//! literals and comments are blanked (newlines preserved), so forbidden
//! text sitting inside a string or comment is not flagged. Directive rules
//! are the exception: their payload lives in comments, so they run against
//! the original text.
//!
//! The validator never fails; an empty violation list means acceptance.

use once_cell::sync::Lazy;
use regex::Regex;

/// A single validation rule.
struct Rule {
    /// Stable identifier surfaced in reports, e.g. `file-io-open`.
    id: &'static str,

    /// Pattern matched against each line.
    pattern: Regex,

    /// Human-readable description of what was rejected and why.
    description: &'static str,

    /// Directive rules scan the original text; everything else scans the
    /// stripped view.
    on_original: bool,
}

impl Rule {
    fn stripped(id: &'static str, pattern: &str, description: &'static str) -> Self {
        Self {
            id,
            pattern: Regex::new(pattern).expect("rule table regex"),
            description,
            on_original: false,
        }
    }

    fn directive(id: &'static str, pattern: &str, description: &'static str) -> Self {
        Self {
            id,
            pattern: Regex::new(pattern).expect("rule table regex"),
            description,
            on_original: true,
        }
    }
}

/// The fixed rule table, grouped by bypass class. Order matters: reports
/// list violations by rule index, then line number.
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        // File I/O bypass
        Rule::stripped(
            "file-io-open",
            r"\bopen\s*\(",
            "direct file open; use the filesystem capability instead",
        ),
        Rule::stripped(
            "file-io-module",
            r"\b(?:os|io|pathlib|shutil|tempfile)\s*\.",
            "host file/OS module reference; use the filesystem capability instead",
        ),
        Rule::stripped(
            "file-io-import",
            r"(?m)^\s*(?:import|from)\s+(?:os|io|pathlib|shutil|tempfile)\b",
            "import of a file I/O module; use the filesystem capability instead",
        ),
        // Process bypass
        Rule::stripped(
            "proc-subprocess",
            r"\bsubprocess\b",
            "subprocess reference; use request_exec_permission instead",
        ),
        Rule::stripped(
            "proc-system",
            r"\b(?:system|popen|execv|execvp|execve|spawnv|spawnl)\s*\(",
            "direct process launch; use request_exec_permission instead",
        ),
        Rule::stripped(
            "proc-fork",
            r"\bfork\s*\(",
            "process fork; not available in the sandbox",
        ),
        // Network bypass
        Rule::stripped(
            "net-socket",
            r"\bsocket\b",
            "raw socket reference; use request_network instead",
        ),
        Rule::stripped(
            "net-http",
            r"\b(?:urllib|httplib|http\.client|requests|httpx)\b",
            "HTTP library reference; use request_network instead",
        ),
        // Reflection / introspection
        Rule::stripped(
            "refl-import",
            r"\b__import__\s*\(",
            "dynamic import; not available in the sandbox",
        ),
        Rule::stripped(
            "refl-dunder",
            r"__[a-zA-Z][a-zA-Z0-9_]*__",
            "dunder attribute access; interpreter internals are off limits",
        ),
        // System control
        Rule::stripped(
            "sys-thread",
            r"\b(?:threading|Thread|multiprocessing)\b",
            "thread or process spawning; snippets are single-threaded",
        ),
        Rule::stripped(
            "sys-exit",
            r"\b(?:exit|quit|abort)\s*\(",
            "interpreter shutdown; not available in the sandbox",
        ),
        Rule::stripped(
            "sys-env",
            r"\b(?:environ|getenv|putenv|setenv)\b",
            "environment access; not available in the sandbox",
        ),
        // Module loading
        Rule::stripped(
            "load-stmt",
            r"(?m)^\s*load\s*\(",
            "load() statement; module loading is disabled",
        ),
        // Directives (live in comments, so scanned on the original text)
        Rule::directive(
            "directive-lint",
            r"#\s*(?:lint|buildifier|noqa)\s*[:(]",
            "lint-suppression directive; not honored in the sandbox",
        ),
        // Interpreter / compiler internals
        Rule::stripped(
            "compiler-eval",
            r"\beval\s*\(",
            "eval of dynamic code; not available in the sandbox",
        ),
        // Bare exec() only: `p.exec(...)` on a process capability is the
        // sanctioned surface and must not trip this rule.
        Rule::stripped(
            "compiler-exec",
            r"(?:^|[^.\w])exec\s*\(",
            "exec of dynamic code; not available in the sandbox",
        ),
        Rule::stripped(
            "compiler-compile",
            r"\bcompile\s*\(",
            "compilation of dynamic code; not available in the sandbox",
        ),
    ]
});

/// A rule match, reported with enough context to locate and explain it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Rule identifier, e.g. `file-io-open`.
    pub rule_id: String,

    /// Human-readable description from the rule table.
    pub description: String,

    /// 1-based line number in the original source.
    pub line: usize,

    /// The original source line (not the stripped view).
    pub snippet: String,
}

/// Screens a snippet against the rule table.
///
/// Returns every violation, ordered by rule index then line number. An
/// empty vector means the snippet is accepted. This function never fails.
pub fn validate(code: &str) -> Vec<Violation> {
    let stripped = strip_literals_and_comments(code);
    let original_lines: Vec<&str> = code.lines().collect();
    let stripped_lines: Vec<&str> = stripped.lines().collect();

    let mut violations = Vec::new();
    for rule in RULES.iter() {
        let lines = if rule.on_original {
            &original_lines
        } else {
            &stripped_lines
        };
        for (idx, line) in lines.iter().enumerate() {
            if rule.pattern.is_match(line) {
                violations.push(Violation {
                    rule_id: rule.id.to_string(),
                    description: rule.description.to_string(),
                    line: idx + 1,
                    snippet: original_lines.get(idx).copied().unwrap_or("").to_string(),
                });
            }
        }
    }
    violations
}

/// Formats a violation list into the report surfaced to the caller.
///
/// The report opens with a count and lists one violation per entry:
/// `[<id>] Line <n>: <description>` followed by the offending source line.
pub fn format_report(violations: &[Violation]) -> String {
    let mut report = format!(
        "Code validation failed: {} violation(s)",
        violations.len()
    );
    for v in violations {
        report.push_str(&format!(
            "\n[{}] Line {}: {}\n    {}",
            v.rule_id, v.line, v.description, v.snippet
        ));
    }
    report
}

/// Builds the stripped view of a snippet: string literals and comments
/// blanked with spaces, newlines preserved so line numbers stay aligned.
///
/// Handles `#` line comments (up to, not including, the newline), single-
/// and double-quoted strings with escape sequences consumed in pairs, and
/// triple-quoted multi-line strings.
pub fn strip_literals_and_comments(code: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Normal,
        Comment,
        Str(char),
        TripleStr(char),
    }

    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut state = State::Normal;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match state {
            State::Normal => {
                if ch == '#' {
                    state = State::Comment;
                    out.push(' ');
                } else if ch == '"' || ch == '\'' {
                    if i + 2 < chars.len() && chars[i + 1] == ch && chars[i + 2] == ch {
                        state = State::TripleStr(ch);
                        out.push_str("   ");
                        i += 2;
                    } else {
                        state = State::Str(ch);
                        out.push(ch);
                    }
                } else {
                    out.push(ch);
                }
            }
            State::Comment => {
                if ch == '\n' {
                    state = State::Normal;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::Str(quote) => {
                if ch == '\\' && i + 1 < chars.len() {
                    // Escape sequences are consumed in pairs; a line
                    // continuation keeps its newline so counts stay aligned.
                    out.push(' ');
                    out.push(if chars[i + 1] == '\n' { '\n' } else { ' ' });
                    i += 1;
                } else if ch == quote {
                    state = State::Normal;
                    out.push(quote);
                } else if ch == '\n' {
                    // Unterminated single-line string; resync on newline.
                    state = State::Normal;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::TripleStr(quote) => {
                if ch == '\\' && i + 1 < chars.len() {
                    out.push(' ');
                    out.push(if chars[i + 1] == '\n' { '\n' } else { ' ' });
                    i += 1;
                } else if ch == quote
                    && i + 2 < chars.len()
                    && chars[i + 1] == quote
                    && chars[i + 2] == quote
                {
                    state = State::Normal;
                    out.push_str("   ");
                    i += 2;
                } else if ch == '\n' {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(violations: &[Violation]) -> Vec<&str> {
        violations.iter().map(|v| v.rule_id.as_str()).collect()
    }

    #[test]
    fn test_empty_code_accepted() {
        assert!(validate("").is_empty());
    }

    #[test]
    fn test_benign_code_accepted() {
        let code = "def main(fs):\n    print(fs.access(\"a.txt\").read())\nrequest_filesystem(\".\", main)";
        assert!(validate(code).is_empty());
    }

    #[test]
    fn test_open_call_flagged() {
        let violations = validate("data = open(\"/etc/passwd\")");
        assert!(ids(&violations).contains(&"file-io-open"));
        assert_eq!(violations[0].line, 1);
    }

    #[test]
    fn test_import_io_flagged_with_file_io_id() {
        let violations = validate("import io");
        assert!(!violations.is_empty());
        assert!(violations.iter().any(|v| v.rule_id.starts_with("file-io-")));
    }

    #[test]
    fn test_os_module_reference_flagged() {
        let violations = validate("x = os.listdir(\"/\")");
        assert!(ids(&violations).contains(&"file-io-module"));
    }

    #[test]
    fn test_subprocess_flagged() {
        let violations = validate("subprocess.run([\"ls\"])");
        assert!(ids(&violations).contains(&"proc-subprocess"));
    }

    #[test]
    fn test_socket_flagged() {
        let violations = validate("s = socket(AF_INET)");
        assert!(ids(&violations).contains(&"net-socket"));
    }

    #[test]
    fn test_thread_flagged() {
        let violations = validate("t = threading.Thread(target=f)");
        assert!(ids(&violations).contains(&"sys-thread"));
    }

    #[test]
    fn test_dunder_flagged() {
        let violations = validate("b = __import__(\"os\")");
        assert!(ids(&violations).contains(&"refl-import"));
        assert!(ids(&violations).contains(&"refl-dunder"));
    }

    #[test]
    fn test_load_statement_flagged() {
        let violations = validate("load(\"@rules//x.bzl\", \"x\")");
        assert!(ids(&violations).contains(&"load-stmt"));
    }

    #[test]
    fn test_eval_flagged() {
        let violations = validate("eval(\"1+1\")");
        assert!(ids(&violations).contains(&"compiler-eval"));
    }

    #[test]
    fn test_bare_exec_flagged_but_capability_exec_is_not() {
        assert!(ids(&validate("exec(\"code\")")).contains(&"compiler-exec"));
        assert!(validate("result = p.exec(\"echo\", [\"hi\"])").is_empty());
        assert!(validate("out = p.exec_output(\"echo\", [])").is_empty());
    }

    #[test]
    fn test_token_inside_string_accepted() {
        assert!(validate("msg = \"please do not call open( here\"").is_empty());
        assert!(validate("msg = 'subprocess is a word'").is_empty());
    }

    #[test]
    fn test_token_inside_triple_string_accepted() {
        let code = "doc = \"\"\"\nos.system('rm -rf /')\neval(x)\n\"\"\"";
        assert!(validate(code).is_empty());
    }

    #[test]
    fn test_token_inside_comment_accepted() {
        assert!(validate("x = 1  # never use open() directly").is_empty());
    }

    #[test]
    fn test_directive_in_comment_still_detected() {
        let violations = validate("x = 1  # lint: disable=all");
        assert_eq!(ids(&violations), vec!["directive-lint"]);
    }

    #[test]
    fn test_escaped_quote_does_not_end_string() {
        // The \" does not terminate the string, so open( stays inside it.
        assert!(validate(r#"s = "a\"open(b""#).is_empty());
    }

    #[test]
    fn test_line_numbers_are_one_based_and_accurate() {
        let code = "x = 1\ny = 2\nz = open(\"f\")";
        let violations = validate(code);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 3);
        assert_eq!(violations[0].snippet, "z = open(\"f\")");
    }

    #[test]
    fn test_ordering_rule_index_then_line() {
        let code = "eval(a)\nopen(b)\neval(c)";
        let violations = validate(code);
        // file-io-open comes before compiler-eval in the table.
        assert_eq!(
            ids(&violations),
            vec!["file-io-open", "compiler-eval", "compiler-eval"]
        );
        assert_eq!(violations[1].line, 1);
        assert_eq!(violations[2].line, 3);
    }

    #[test]
    fn test_report_format() {
        let violations = validate("open(\"f\")");
        let report = format_report(&violations);
        assert!(report.starts_with("Code validation failed: 1 violation(s)"));
        assert!(report.contains("[file-io-open] Line 1:"));
        assert!(report.contains("open(\"f\")"));
    }

    #[test]
    fn test_strip_preserves_newline_count() {
        let samples = [
            "a\nb\nc",
            "s = \"multi # not a comment\"\n# real comment\n",
            "t = '''\nline\nline\n'''\nx = 1",
            "q = \"unterminated\nnext = 1",
            "esc = \"a\\\"b\"\n",
        ];
        for code in samples {
            let stripped = strip_literals_and_comments(code);
            assert_eq!(
                code.matches('\n').count(),
                stripped.matches('\n').count(),
                "newline count changed for {code:?}"
            );
        }
    }

    #[test]
    fn test_strip_blanks_string_contents() {
        let stripped = strip_literals_and_comments("x = \"open(\"");
        assert!(!stripped.contains("open("));
        assert!(stripped.contains('"'));
    }

    #[test]
    fn test_strip_blanks_comment_but_keeps_code() {
        let stripped = strip_literals_and_comments("x = 1 # open(");
        assert!(stripped.contains("x = 1"));
        assert!(!stripped.contains("open("));
    }
}
