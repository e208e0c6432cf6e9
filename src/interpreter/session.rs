//! One isolated interpreter session.
//!
//! A session owns a single Starlark module, so top-level assignments
//! persist between `execute` calls and no state is shared with any other
//! session. Each `execute` runs the full pipeline: validate, optionally
//! wrap, parse, evaluate with print capture, echo the final expression,
//! and scan the captured output for in-band diagnostic markers.

use std::cell::RefCell;
use std::sync::Arc;

use starlark::environment::Module;
use starlark::eval::Evaluator;
use starlark::syntax::{AstModule, Dialect};
use starlark::PrintHandler;

use super::globals::{sandbox_globals, EvalContext};
use crate::config::SandboxConfig;
use crate::validator;

/// Prefix the interpreter's renderer uses for in-band error diagnostics.
/// A captured-output line starting with this flips success to false.
const DIAGNOSTIC_MARKER: &str = "error:";

/// Outcome of one snippet execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn failure(output: String, error: String) -> Self {
        Self {
            success: false,
            output,
            error: Some(error),
        }
    }
}

/// Captures everything the snippet prints.
#[derive(Default)]
struct OutputBuffer {
    inner: RefCell<String>,
}

impl OutputBuffer {
    fn push_line(&self, text: &str) {
        let mut buffer = self.inner.borrow_mut();
        buffer.push_str(text);
        buffer.push('\n');
    }

    fn take(&self) -> String {
        std::mem::take(&mut *self.inner.borrow_mut())
    }
}

impl PrintHandler for OutputBuffer {
    fn println(&self, text: &str) -> anyhow::Result<()> {
        self.push_line(text);
        Ok(())
    }
}

/// A live interpreter session.
pub struct Session {
    id: String,
    module: Module,
    config: Arc<SandboxConfig>,
    one_shot: bool,
}

impl Session {
    /// Creates a stateful session; its module persists across calls.
    pub fn new(id: String, config: Arc<SandboxConfig>) -> Self {
        Self {
            id,
            module: Module::new(),
            config,
            one_shot: false,
        }
    }

    /// Creates a one-shot session for a single stateless execution.
    pub fn one_shot(config: Arc<SandboxConfig>) -> Self {
        Self {
            id: "stateless".to_string(),
            module: Module::new(),
            config,
            one_shot: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs one snippet through the validate/parse/evaluate pipeline.
    ///
    /// Never panics and never returns a transport-level error: every
    /// failure mode is folded into the returned [`ExecutionResult`].
    pub fn execute(&mut self, code: &str) -> ExecutionResult {
        let violations = validator::validate(code);
        if !violations.is_empty() {
            return ExecutionResult::failure(
                String::new(),
                validator::format_report(&violations),
            );
        }

        let program = self.prepare(code);
        let ast = match AstModule::parse("<snippet>", program, &snippet_dialect()) {
            Ok(ast) => ast,
            Err(e) => return ExecutionResult::failure(String::new(), e.to_string()),
        };

        let ctx = EvalContext {
            config: self.config.clone(),
        };
        let buffer = OutputBuffer::default();

        let outcome = {
            let mut eval = Evaluator::new(&self.module);
            eval.extra = Some(&ctx);
            eval.set_print_handler(&buffer);
            eval.eval_module(ast, sandbox_globals())
                .map(|value| if value.is_none() { None } else { Some(value.to_string()) })
                .map_err(|e| e.to_string())
        };

        match outcome {
            Ok(echo) => {
                if let Some(rendered) = echo {
                    buffer.push_line(&rendered);
                }
                let output = buffer.take();
                let success = !has_diagnostic_marker(&output);
                ExecutionResult {
                    success,
                    output,
                    error: None,
                }
            }
            Err(error) => ExecutionResult::failure(buffer.take(), error),
        }
    }

    /// Applies the wrap-code rule.
    ///
    /// One-shot snippets that parse as a single expression are wrapped in
    /// a zero-argument function that returns the expression, then called.
    /// Everything else -- multi-statement snippets and all stateful
    /// executions, whose bindings must persist at module scope -- runs
    /// unwrapped.
    fn prepare(&self, code: &str) -> String {
        if !(self.config.wrap_code && self.one_shot) {
            return code.to_string();
        }
        let wrapped = format!("def __snippet__():\n    return (\n{code}\n)\n__snippet__()\n");
        if AstModule::parse("<wrap-probe>", wrapped.clone(), &snippet_dialect()).is_ok() {
            wrapped
        } else {
            code.to_string()
        }
    }
}

/// The dialect snippets are parsed under: the extended language with
/// `load()` disabled (module loading is not part of the sandbox surface).
fn snippet_dialect() -> Dialect {
    let mut dialect = Dialect::Extended;
    dialect.enable_load = false;
    dialect
}

fn has_diagnostic_marker(output: &str) -> bool {
    output.lines().any(|line| line.starts_with(DIAGNOSTIC_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(config: SandboxConfig) -> Session {
        Session::new("test-session".to_string(), Arc::new(config))
    }

    fn one_shot(config: SandboxConfig) -> Session {
        Session::one_shot(Arc::new(config))
    }

    #[test]
    fn test_expression_echoes_value() {
        let mut s = one_shot(SandboxConfig::default());
        let result = s.execute("1 + 1");
        assert!(result.success, "{:?}", result);
        assert!(result.output.contains('2'));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_expression_echoes_without_wrap_too() {
        let config = SandboxConfig {
            wrap_code: false,
            ..Default::default()
        };
        let mut s = one_shot(config);
        let result = s.execute("6 * 7");
        assert!(result.success);
        assert!(result.output.contains("42"));
    }

    #[test]
    fn test_print_is_captured() {
        let mut s = one_shot(SandboxConfig::default());
        let result = s.execute("print(\"hello sandbox\")");
        assert!(result.success, "{:?}", result);
        assert!(result.output.contains("hello sandbox"));
    }

    #[test]
    fn test_state_persists_between_calls() {
        let mut s = session(SandboxConfig::default());
        let first = s.execute("x = 42");
        assert!(first.success, "{:?}", first);
        let second = s.execute("x * 2");
        assert!(second.success, "{:?}", second);
        assert!(second.output.contains("84"));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let config = Arc::new(SandboxConfig::default());
        let mut a = Session::new("a".to_string(), config.clone());
        let mut b = Session::new("b".to_string(), config);
        assert!(a.execute("x = 1").success);
        let result = b.execute("x");
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_validation_violation_skips_interpreter() {
        let mut s = one_shot(SandboxConfig::default());
        let result = s.execute("import io");
        assert!(!result.success);
        assert!(result.output.is_empty());
        let error = result.error.unwrap();
        assert!(error.starts_with("Code validation failed"));
        assert!(error.contains("file-io-"));
    }

    #[test]
    fn test_syntax_error_reported() {
        let mut s = one_shot(SandboxConfig::default());
        let result = s.execute("def broken(");
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_runtime_error_keeps_buffered_output() {
        let mut s = one_shot(SandboxConfig::default());
        let result = s.execute("print(\"before\")\nfail(\"boom\")");
        assert!(!result.success);
        assert!(result.output.contains("before"));
        assert!(result.error.unwrap().contains("boom"));
    }

    #[test]
    fn test_diagnostic_marker_flips_success() {
        let mut s = one_shot(SandboxConfig::default());
        let result = s.execute("print(\"error: something compiled badly\")");
        assert!(!result.success);
        assert!(result.output.contains("error: something compiled badly"));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_filesystem_capability_via_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greeting.txt"), "hello from disk").unwrap();

        let mut s = one_shot(SandboxConfig::default());
        let code = format!(
            "def main(fs):\n    print(fs.access(\"greeting.txt\").read())\nrequest_filesystem(\"{}\", main)",
            dir.path().display()
        );
        let result = s.execute(&code);
        assert!(result.success, "{:?}", result);
        assert!(result.output.contains("hello from disk"));
    }

    #[test]
    fn test_path_escape_via_interpreter_is_security_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = one_shot(SandboxConfig::default());
        let code = format!(
            "def main(fs):\n    fs.access(\"../../etc/passwd\").read()\nrequest_filesystem(\"{}\", main)",
            dir.path().display()
        );
        let result = s.execute(&code);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("SecurityException"));
    }

    #[test]
    fn test_classified_read_via_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("secrets");
        std::fs::create_dir_all(&vault).unwrap();
        std::fs::write(vault.join("x"), "the secret").unwrap();

        let config = SandboxConfig {
            classified_paths: vec![vault],
            ..Default::default()
        };
        let mut s = one_shot(config);
        let code = format!(
            "def main(fs):\n    print(fs.access(\"secrets/x\").read())\nrequest_filesystem(\"{}\", main)",
            dir.path().display()
        );
        let result = s.execute(&code);
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("classified"));
        assert!(!error.contains("the secret"));
        assert!(!result.output.contains("the secret"));
    }

    #[test]
    fn test_classified_value_renders_opaque() {
        let mut s = one_shot(SandboxConfig::default());
        let result = s.execute("print(classify(\"hunter2\"))");
        assert!(result.success, "{:?}", result);
        assert!(result.output.contains("Classified(***)"));
        assert!(!result.output.contains("hunter2"));
    }

    #[test]
    fn test_classified_map_stays_opaque() {
        let mut s = one_shot(SandboxConfig::default());
        let result = s.execute("print(classify(\"abc\").map(lambda s: s.upper()))");
        assert!(result.success, "{:?}", result);
        assert!(result.output.contains("Classified(***)"));
        assert!(!result.output.contains("ABC"));
    }

    #[test]
    fn test_capability_use_inside_transform_denied() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = one_shot(SandboxConfig::default());
        let code = format!(
            "def main(fs):\n    classify(\"x\").map(lambda s: fs.access(\"f\").read())\nrequest_filesystem(\"{}\", main)",
            dir.path().display()
        );
        let result = s.execute(&code);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("classified transform"));
    }

    #[test]
    fn test_leaked_capability_is_inert() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "data").unwrap();
        let mut s = session(SandboxConfig::default());
        let grab = format!(
            "holder = []\ndef main(fs):\n    holder.append(fs)\nrequest_filesystem(\"{}\", main)",
            dir.path().display()
        );
        assert!(s.execute(&grab).success);
        let result = s.execute("holder[0].access(\"f.txt\").read()");
        assert!(!result.success);
        assert!(result.error.unwrap().contains("SecurityException"));
    }

    #[test]
    fn test_exec_via_interpreter() {
        let mut s = one_shot(SandboxConfig::default());
        let code = "def main(p):\n    print(p.exec_output(\"echo\", [\"from child\"]))\nrequest_exec_permission([\"echo\"], main)";
        let result = s.execute(code);
        assert!(result.success, "{:?}", result);
        assert!(result.output.contains("from child"));
    }

    #[test]
    fn test_disallowed_command_via_interpreter() {
        let mut s = one_shot(SandboxConfig::default());
        let code = "def main(p):\n    p.exec(\"ls\", [])\nrequest_exec_permission([\"echo\"], main)";
        let result = s.execute(code);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("SecurityException"));
    }

    #[test]
    fn test_strict_mode_via_interpreter() {
        let config = SandboxConfig {
            strict: true,
            ..Default::default()
        };
        let mut s = one_shot(config);
        let code = "def main(p):\n    p.exec(\"cat\", [\"/etc/hosts\"])\nrequest_exec_permission([\"cat\"], main)";
        let result = s.execute(code);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("strict mode"));
    }

    #[test]
    fn test_disallowed_host_via_interpreter() {
        let mut s = one_shot(SandboxConfig::default());
        let code = "def main(net):\n    net.http_get(\"https://evil.example.net/\")\nrequest_network([\"api.example.com\"], main)";
        let result = s.execute(code);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("SecurityException"));
    }

    #[test]
    fn test_chat_unconfigured_via_interpreter() {
        let mut s = one_shot(SandboxConfig::default());
        let result = s.execute("chat(\"hello\")");
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not configured"));
    }

    #[test]
    fn test_load_is_a_validation_violation() {
        let mut s = one_shot(SandboxConfig::default());
        let result = s.execute("load(\"@x//y.bzl\", \"z\")");
        assert!(!result.success);
        assert!(result.error.unwrap().contains("load-stmt"));
    }
}
