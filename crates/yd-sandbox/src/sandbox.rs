use std::cell::Cell;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST};
use tracing::debug;
use yd_core::YaadeError;
use yd_interp::helpers::rhai_bridge::dynamic_to_text;

pub const TIMED_OUT: &str = "Script execution timed out";

/// Ordered name/value pairs pushed into the script scope; nothing else is visible.
pub type Bindings = Vec<(String, Dynamic)>;

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub timeout: Option<Duration>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            max_operations: 10_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_string_size: 8 * 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 100_000,
            timeout: None,
        }
    }
}

fn generator_regex() -> &'static Regex {
    static GENERATOR: OnceLock<Regex> = OnceLock::new();
    GENERATOR.get_or_init(|| {
        Regex::new(r"function\s*\*|\*\s*=>").expect("generator regex must compile")
    })
}

/// Rejects generator constructs before the script is compiled or run.
pub fn check_script_syntax(body: &str) -> Result<(), YaadeError> {
    match generator_regex().find(body) {
        Some(found) => Err(YaadeError::new(
            "SANDBOX_GENERATOR_REJECTED",
            format!(
                "Script contains potentially malicious code ({})",
                found.as_str()
            ),
        )),
        None => Ok(()),
    }
}

/// An engine with no ambient capabilities: `eval` and `import` are not
/// available and `print`/`debug` never reach stdout.
pub fn sandbox_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_strict_variables(true);
    engine.disable_symbol("eval");
    engine.disable_symbol("import");
    engine.on_print(|text| debug!(target: "yd_sandbox::print", "{}", text));
    engine.on_debug(|text, _, _| debug!(target: "yd_sandbox::print", "{}", text));
    engine
}

/// Innermost message of a script failure, without call-site wrapping.
pub fn error_message(error: &EvalAltResult) -> String {
    match error {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => error_message(inner),
        EvalAltResult::ErrorInModule(_, inner, _) => error_message(inner),
        EvalAltResult::ErrorRuntime(value, _) => dynamic_to_text(value),
        EvalAltResult::ErrorTerminated(value, _) => dynamic_to_text(value),
        other => other.to_string(),
    }
}

pub struct SandboxedCallable {
    engine: Engine,
    ast: AST,
    bindings: Bindings,
    started: Rc<Cell<Instant>>,
}

pub fn build_sandboxed_callable(
    mut engine: Engine,
    bindings: Bindings,
    body: &str,
    options: &SandboxOptions,
) -> Result<SandboxedCallable, YaadeError> {
    check_script_syntax(body)?;

    engine.set_max_operations(options.max_operations);
    engine.set_max_call_levels(options.max_call_levels);
    engine.set_max_expr_depths(options.max_expr_depth, options.max_function_expr_depth);
    engine.set_max_string_size(options.max_string_size);
    engine.set_max_array_size(options.max_array_size);
    engine.set_max_map_size(options.max_map_size);

    let started = Rc::new(Cell::new(Instant::now()));
    if let Some(timeout) = options.timeout {
        let clock = Rc::clone(&started);
        engine.on_progress(move |_| {
            if clock.get().elapsed() > timeout {
                Some(Dynamic::from(TIMED_OUT.to_string()))
            } else {
                None
            }
        });
    }

    let scope = scope_for(&bindings);
    let ast = engine.compile_with_scope(&scope, body).map_err(|error| {
        YaadeError::new(
            "SANDBOX_COMPILE",
            format!("Script failed to compile: {}", error),
        )
    })?;

    Ok(SandboxedCallable {
        engine,
        ast,
        bindings,
        started,
    })
}

fn scope_for(bindings: &Bindings) -> Scope<'static> {
    let mut scope = Scope::new();
    for (name, value) in bindings {
        scope.push_dynamic(name.clone(), value.clone());
    }
    scope
}

impl SandboxedCallable {
    /// Runs the script against a fresh scope holding only the bindings.
    pub fn call(&self) -> Result<Dynamic, YaadeError> {
        self.started.set(Instant::now());
        let mut scope = scope_for(&self.bindings);
        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &self.ast)
            .map_err(|error| YaadeError::new("SANDBOX_RUNTIME", error_message(&error)))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }
}

pub fn call_sandboxed(
    engine: Engine,
    bindings: Bindings,
    body: &str,
    options: &SandboxOptions,
) -> Result<Dynamic, YaadeError> {
    build_sandboxed_callable(engine, bindings, body, options)?.call()
}

#[cfg(test)]
mod sandbox_tests {
    use super::*;
    use std::cell::RefCell;

    fn bindings(pairs: &[(&str, Dynamic)]) -> Bindings {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn ambient_names_are_undefined_while_bindings_are_visible() {
        let result = call_sandboxed(
            sandbox_engine(),
            bindings(&[("env", Dynamic::from("dev".to_string()))]),
            r#"[is_def_var("window"), is_def_var("process"), is_def_var("env"), env]"#,
            &SandboxOptions::default(),
        )
        .expect("script should run");
        let values = result.into_array().expect("array result");
        assert!(!values[0].as_bool().expect("bool"));
        assert!(!values[1].as_bool().expect("bool"));
        assert!(values[2].as_bool().expect("bool"));
        assert_eq!(values[3].clone().into_string().expect("string"), "dev");
    }

    #[test]
    fn unknown_variables_fail_at_construction() {
        let error = build_sandboxed_callable(
            sandbox_engine(),
            Vec::new(),
            "window.location",
            &SandboxOptions::default(),
        )
        .err()
        .expect("compile should fail");
        assert_eq!(error.code, "SANDBOX_COMPILE");
    }

    #[test]
    fn eval_and_import_are_disabled() {
        for body in [r#"eval("1 + 1")"#, r#"import "fs" as fs;"#] {
            let error = build_sandboxed_callable(
                sandbox_engine(),
                Vec::new(),
                body,
                &SandboxOptions::default(),
            )
            .err()
            .expect("compile should fail");
            assert_eq!(error.code, "SANDBOX_COMPILE");
        }
    }

    #[test]
    fn generators_are_rejected_before_any_side_effect() {
        let calls = Rc::new(RefCell::new(0));
        let mut engine = sandbox_engine();
        let counter = Rc::clone(&calls);
        engine.register_fn("touch", move || *counter.borrow_mut() += 1);
        let error = call_sandboxed(
            engine,
            Vec::new(),
            "touch(); // function* foo(){}",
            &SandboxOptions::default(),
        )
        .expect_err("generator should be rejected");
        assert_eq!(error.code, "SANDBOX_GENERATOR_REJECTED");
        assert_eq!(*calls.borrow(), 0);
        assert!(check_script_syntax("let f = async *=> 1;").is_err());
        assert!(check_script_syntax("let x = 2 * 3;").is_ok());
    }

    #[test]
    fn thrown_values_and_nested_calls_report_the_root_cause() {
        let error = call_sandboxed(
            sandbox_engine(),
            Vec::new(),
            r#"fn inner() { throw "boom"; } fn outer() { inner() } outer();"#,
            &SandboxOptions::default(),
        )
        .expect_err("script should fail");
        assert_eq!(error.code, "SANDBOX_RUNTIME");
        assert_eq!(error.message, "boom");
    }

    #[test]
    fn runaway_scripts_hit_limits() {
        let options = SandboxOptions {
            max_operations: 1_000,
            ..SandboxOptions::default()
        };
        let error = call_sandboxed(sandbox_engine(), Vec::new(), "loop {}", &options)
            .expect_err("loop should be stopped");
        assert_eq!(error.code, "SANDBOX_RUNTIME");

        let options = SandboxOptions {
            timeout: Some(Duration::from_millis(20)),
            ..SandboxOptions::default()
        };
        let error = call_sandboxed(sandbox_engine(), Vec::new(), "loop {}", &options)
            .expect_err("loop should time out");
        assert_eq!(error.message, TIMED_OUT);
    }

    #[test]
    fn each_call_starts_from_fresh_bindings() {
        let callable = build_sandboxed_callable(
            sandbox_engine(),
            bindings(&[("count", Dynamic::from_int(1))]),
            "count += 1; count",
            &SandboxOptions::default(),
        )
        .expect("script should compile");
        assert_eq!(callable.call().expect("first").as_int(), Ok(2));
        assert_eq!(callable.call().expect("second").as_int(), Ok(2));
    }
}
