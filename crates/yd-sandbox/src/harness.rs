//! In-script BDD harness: `describe`, `it`, hooks, `expect` matchers and
//! `fail`. Suites are collected while the script runs; specs run afterwards
//! in declaration order.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, NativeCallContext, AST};
use serde_json::Value;
use tracing::warn;
use yd_core::{FailedExpectation, SpecRecord, SpecStatus, SuiteRecord, TestReport};
use yd_interp::helpers::rhai_bridge::{dynamic_to_json, dynamic_to_text};

use crate::report::build_report;
use crate::sandbox::error_message;

const TOP_SUITE: usize = 0;
const NO_CURRENT_SPEC: &str = "'expect' was used when there was no current spec";

#[derive(Debug, Clone, Copy)]
enum Item {
    Suite(usize),
    Spec(usize),
}

struct SuiteNode {
    id: String,
    parent: Option<usize>,
    description: String,
    full_name: String,
    before_all: Vec<FnPtr>,
    after_all: Vec<FnPtr>,
    before_each: Vec<FnPtr>,
    after_each: Vec<FnPtr>,
    items: Vec<Item>,
}

struct SpecNode {
    id: String,
    suite: usize,
    description: String,
    full_name: String,
    body: Option<FnPtr>,
}

#[derive(Clone, Copy)]
enum Hook {
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
}

struct HarnessState {
    suites: Vec<SuiteNode>,
    specs: Vec<SpecNode>,
    current_suite: usize,
    failures: Option<Vec<FailedExpectation>>,
}

fn child_name(parent: &str, title: &str) -> String {
    if parent.is_empty() {
        title.to_string()
    } else {
        format!("{} {}", parent, title)
    }
}

impl HarnessState {
    fn new() -> Self {
        Self {
            suites: vec![SuiteNode {
                id: format!("suite{}", TOP_SUITE),
                parent: None,
                description: String::new(),
                full_name: String::new(),
                before_all: Vec::new(),
                after_all: Vec::new(),
                before_each: Vec::new(),
                after_each: Vec::new(),
                items: Vec::new(),
            }],
            specs: Vec::new(),
            current_suite: TOP_SUITE,
            failures: None,
        }
    }

    /// Returns the suite that was current before.
    fn open_suite(&mut self, title: &str) -> usize {
        let parent = self.current_suite;
        let index = self.suites.len();
        let full_name = child_name(&self.suites[parent].full_name, title);
        self.suites.push(SuiteNode {
            id: format!("suite{}", index),
            parent: Some(parent),
            description: title.to_string(),
            full_name,
            before_all: Vec::new(),
            after_all: Vec::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
            items: Vec::new(),
        });
        self.suites[parent].items.push(Item::Suite(index));
        self.current_suite = index;
        parent
    }

    fn add_spec(&mut self, title: &str, body: Option<FnPtr>) {
        let suite = self.current_suite;
        let index = self.specs.len();
        self.specs.push(SpecNode {
            id: format!("spec{}", index),
            suite,
            description: title.to_string(),
            full_name: child_name(&self.suites[suite].full_name, title),
            body,
        });
        self.suites[suite].items.push(Item::Spec(index));
    }

    fn add_hook(&mut self, hook: Hook, body: FnPtr) {
        let suite = &mut self.suites[self.current_suite];
        match hook {
            Hook::BeforeAll => suite.before_all.push(body),
            Hook::AfterAll => suite.after_all.push(body),
            Hook::BeforeEach => suite.before_each.push(body),
            Hook::AfterEach => suite.after_each.push(body),
        }
    }

    fn record_failure(&mut self, matcher_name: &str, message: String) -> Result<(), Box<EvalAltResult>> {
        let Some(failures) = self.failures.as_mut() else {
            return Err(NO_CURRENT_SPEC.into());
        };
        failures.push(FailedExpectation {
            matcher_name: matcher_name.to_string(),
            message,
            passed: false,
        });
        Ok(())
    }

    /// Suite indices from the top suite down to `suite`.
    fn ancestry(&self, suite: usize) -> Vec<usize> {
        let mut chain = vec![suite];
        let mut cursor = self.suites[suite].parent;
        while let Some(parent) = cursor {
            chain.push(parent);
            cursor = self.suites[parent].parent;
        }
        chain.reverse();
        chain
    }

    fn parent_id(&self, suite: usize) -> Option<String> {
        (suite != TOP_SUITE).then(|| self.suites[suite].id.clone())
    }
}

/// Flat output of one harness run.
#[derive(Debug, Clone, Default)]
pub struct HarnessRun {
    pub suites: Vec<SuiteRecord>,
    pub specs: Vec<SpecRecord>,
}

impl HarnessRun {
    pub fn is_empty(&self) -> bool {
        self.suites.is_empty() && self.specs.is_empty()
    }

    pub fn into_report(self) -> Option<TestReport> {
        if self.is_empty() {
            return None;
        }
        Some(build_report(self.suites, self.specs))
    }
}

#[derive(Clone)]
pub struct TestHarness {
    state: Rc<RefCell<HarnessState>>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(HarnessState::new())),
        }
    }

    pub fn register(&self, engine: &mut Engine) {
        let state = Rc::clone(&self.state);
        engine.register_fn(
            "describe",
            move |context: NativeCallContext,
                  title: &str,
                  body: FnPtr|
                  -> Result<(), Box<EvalAltResult>> {
                let previous = state.borrow_mut().open_suite(title);
                let result = body.call_within_context::<Dynamic>(&context, ());
                state.borrow_mut().current_suite = previous;
                result.map(|_| ())
            },
        );

        let state = Rc::clone(&self.state);
        engine.register_fn("it", move |title: &str, body: FnPtr| {
            state.borrow_mut().add_spec(title, Some(body))
        });
        let state = Rc::clone(&self.state);
        engine.register_fn("it", move |title: &str| state.borrow_mut().add_spec(title, None));
        let state = Rc::clone(&self.state);
        engine.register_fn("xit", move |title: &str, _body: FnPtr| {
            state.borrow_mut().add_spec(title, None)
        });

        for (name, hook) in [
            ("before_all", Hook::BeforeAll),
            ("beforeAll", Hook::BeforeAll),
            ("after_all", Hook::AfterAll),
            ("afterAll", Hook::AfterAll),
            ("before_each", Hook::BeforeEach),
            ("beforeEach", Hook::BeforeEach),
            ("after_each", Hook::AfterEach),
            ("afterEach", Hook::AfterEach),
        ] {
            let state = Rc::clone(&self.state);
            engine.register_fn(name, move |body: FnPtr| state.borrow_mut().add_hook(hook, body));
        }

        let state = Rc::clone(&self.state);
        engine.register_fn("expect", move |actual: Dynamic| Expectation {
            actual,
            negated: false,
            state: Rc::clone(&state),
        });

        let state = Rc::clone(&self.state);
        engine.register_fn(
            "fail",
            move |message: Dynamic| -> Result<(), Box<EvalAltResult>> {
                state
                    .borrow_mut()
                    .record_failure("fail", format!("Failed: {}", dynamic_to_text(&message)))
            },
        );
        let state = Rc::clone(&self.state);
        engine.register_fn("fail", move || -> Result<(), Box<EvalAltResult>> {
            state.borrow_mut().record_failure("fail", "Failed".to_string())
        });

        register_matchers(engine);
    }

    /// Runs every collected spec with its hooks.
    pub fn run(&self, engine: &Engine, ast: &AST) -> HarnessRun {
        let mut suites = Vec::new();
        let mut specs = Vec::new();
        self.run_suite(engine, ast, TOP_SUITE, &[], &mut suites, &mut specs);
        suites.sort_by_key(|(index, _)| *index);
        HarnessRun {
            suites: suites.into_iter().map(|(_, record)| record).collect(),
            specs,
        }
    }

    fn run_suite(
        &self,
        engine: &Engine,
        ast: &AST,
        index: usize,
        inherited: &[String],
        suites: &mut Vec<(usize, SuiteRecord)>,
        specs: &mut Vec<SpecRecord>,
    ) {
        let started = Instant::now();
        let (items, before_all, after_all) = {
            let state = self.state.borrow();
            let suite = &state.suites[index];
            (
                suite.items.clone(),
                suite.before_all.clone(),
                suite.after_all.clone(),
            )
        };

        let mut errors = inherited.to_vec();
        for hook in before_all {
            if let Err(error) = hook.call::<Dynamic>(engine, ast, ()) {
                errors.push(format!("beforeAll: {}", error_message(&error)));
            }
        }

        for item in items {
            match item {
                Item::Suite(child) => self.run_suite(engine, ast, child, &errors, suites, specs),
                Item::Spec(spec) => specs.push(self.run_spec(engine, ast, spec, &errors)),
            }
        }

        for hook in after_all {
            if let Err(error) = hook.call::<Dynamic>(engine, ast, ()) {
                warn!(error = %error_message(&error), "after_all hook failed");
            }
        }

        if index != TOP_SUITE {
            let state = self.state.borrow();
            let suite = &state.suites[index];
            suites.push((
                index,
                SuiteRecord {
                    id: suite.id.clone(),
                    parent_suite_id: suite.parent.and_then(|parent| state.parent_id(parent)),
                    description: suite.description.clone(),
                    full_name: suite.full_name.clone(),
                    duration: started.elapsed().as_millis() as u64,
                },
            ));
        }
    }

    fn run_spec(&self, engine: &Engine, ast: &AST, index: usize, inherited: &[String]) -> SpecRecord {
        let started = Instant::now();
        let (mut record, body, before, after) = {
            let state = self.state.borrow();
            let spec = &state.specs[index];
            let chain = state.ancestry(spec.suite);
            let before = chain
                .iter()
                .flat_map(|suite| state.suites[*suite].before_each.clone())
                .collect::<Vec<_>>();
            let after = chain
                .iter()
                .rev()
                .flat_map(|suite| state.suites[*suite].after_each.clone())
                .collect::<Vec<_>>();
            let record = SpecRecord {
                id: spec.id.clone(),
                parent_suite_id: state.parent_id(spec.suite),
                description: spec.description.clone(),
                full_name: spec.full_name.clone(),
                status: SpecStatus::Pending,
                duration: 0,
                failed_expectations: Vec::new(),
            };
            (record, spec.body.clone(), before, after)
        };

        let Some(body) = body else {
            return record;
        };

        self.state.borrow_mut().failures = Some(
            inherited
                .iter()
                .map(|message| thrown(message))
                .collect(),
        );
        for step in before.iter().chain(std::iter::once(&body)).chain(after.iter()) {
            if let Err(error) = step.call::<Dynamic>(engine, ast, ()) {
                let message = error_message(&error);
                if let Some(failures) = self.state.borrow_mut().failures.as_mut() {
                    failures.push(thrown(&message));
                }
            }
        }
        let failures = self.state.borrow_mut().failures.take().unwrap_or_default();

        record.status = if failures.is_empty() {
            SpecStatus::Passed
        } else {
            SpecStatus::Failed
        };
        record.failed_expectations = failures;
        record.duration = started.elapsed().as_millis() as u64;
        record
    }
}

fn thrown(message: &str) -> FailedExpectation {
    FailedExpectation {
        matcher_name: String::new(),
        message: format!("Error: {}", message),
        passed: false,
    }
}

/// Value under test; `.not` flips the next matcher.
#[derive(Clone)]
pub struct Expectation {
    actual: Dynamic,
    negated: bool,
    state: Rc<RefCell<HarnessState>>,
}

impl Expectation {
    fn negate(&self) -> Self {
        Self {
            negated: !self.negated,
            ..self.clone()
        }
    }

    fn check(
        &self,
        matcher_name: &str,
        passed: bool,
        expected: Option<&Dynamic>,
    ) -> Result<(), Box<EvalAltResult>> {
        if passed != self.negated {
            return Ok(());
        }
        let mut message = format!("Expected {} ", pretty(&self.actual));
        if self.negated {
            message.push_str("not ");
        }
        message.push_str(&matcher_words(matcher_name));
        if let Some(expected) = expected {
            message.push(' ');
            message.push_str(&pretty(expected));
        }
        message.push('.');
        self.state.borrow_mut().record_failure(matcher_name, message)
    }
}

fn matcher_words(matcher_name: &str) -> String {
    let mut words = String::new();
    for ch in matcher_name.chars() {
        if ch.is_ascii_uppercase() {
            words.push(' ');
            words.push(ch.to_ascii_lowercase());
        } else {
            words.push(ch);
        }
    }
    words
}

fn pretty(value: &Dynamic) -> String {
    if value.is_unit() {
        return "undefined".to_string();
    }
    if value.is_string() {
        return format!("'{}'", dynamic_to_text(value));
    }
    dynamic_to_text(value)
}

fn as_json(value: &Dynamic) -> Option<Value> {
    dynamic_to_json(value.clone()).ok()
}

fn json_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => left.as_f64() == right.as_f64(),
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right.iter())
                    .all(|(left, right)| json_equal(left, right))
        }
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left.iter().all(|(key, value)| {
                    right
                        .get(key)
                        .is_some_and(|other| json_equal(value, other))
                })
        }
        _ => left == right,
    }
}

fn same(left: &Dynamic, right: &Dynamic) -> bool {
    match (as_json(left), as_json(right)) {
        (Some(Value::Array(_)), _)
        | (_, Some(Value::Array(_)))
        | (Some(Value::Object(_)), _)
        | (_, Some(Value::Object(_))) => false,
        (Some(left), Some(right)) => json_equal(&left, &right),
        _ => false,
    }
}

fn deep_equal(left: &Dynamic, right: &Dynamic) -> bool {
    match (as_json(left), as_json(right)) {
        (Some(left), Some(right)) => json_equal(&left, &right),
        _ => false,
    }
}

fn truthy(value: &Dynamic) -> bool {
    if value.is_unit() {
        return false;
    }
    if let Ok(flag) = value.as_bool() {
        return flag;
    }
    if let Ok(number) = value.as_int() {
        return number != 0;
    }
    if let Ok(number) = value.as_float() {
        return number != 0.0 && !number.is_nan();
    }
    if value.is_string() {
        return !dynamic_to_text(value).is_empty();
    }
    true
}

fn number(value: &Dynamic) -> Option<f64> {
    value
        .as_int()
        .map(|number| number as f64)
        .ok()
        .or_else(|| value.as_float().ok())
}

fn contains(haystack: &Dynamic, needle: &Dynamic) -> bool {
    if haystack.is_string() {
        return dynamic_to_text(haystack).contains(&dynamic_to_text(needle));
    }
    match (as_json(haystack), as_json(needle)) {
        (Some(Value::Array(items)), Some(needle)) => {
            items.iter().any(|item| json_equal(item, &needle))
        }
        _ => false,
    }
}

fn compare(actual: &Dynamic, expected: &Dynamic, ordering: std::cmp::Ordering) -> bool {
    match (number(actual), number(expected)) {
        (Some(left), Some(right)) => left.partial_cmp(&right) == Some(ordering),
        _ => false,
    }
}

type MatchResult = Result<(), Box<EvalAltResult>>;

/// Matchers answer to both their Rhai-style and their Jasmine-style names.
fn register_matchers(engine: &mut Engine) {
    engine
        .register_type_with_name::<Expectation>("Expectation")
        .register_get("not", |expectation: &mut Expectation| expectation.negate());

    let to_be = |expectation: &mut Expectation, expected: Dynamic| -> MatchResult {
        let passed = same(&expectation.actual, &expected);
        expectation.check("toBe", passed, Some(&expected))
    };
    let to_equal = |expectation: &mut Expectation, expected: Dynamic| -> MatchResult {
        let passed = deep_equal(&expectation.actual, &expected);
        expectation.check("toEqual", passed, Some(&expected))
    };
    let to_be_truthy = |expectation: &mut Expectation| -> MatchResult {
        let passed = truthy(&expectation.actual);
        expectation.check("toBeTruthy", passed, None)
    };
    let to_be_falsy = |expectation: &mut Expectation| -> MatchResult {
        let passed = !truthy(&expectation.actual);
        expectation.check("toBeFalsy", passed, None)
    };
    let to_be_defined = |expectation: &mut Expectation| -> MatchResult {
        let passed = !expectation.actual.is_unit();
        expectation.check("toBeDefined", passed, None)
    };
    let to_contain = |expectation: &mut Expectation, expected: Dynamic| -> MatchResult {
        let passed = contains(&expectation.actual, &expected);
        expectation.check("toContain", passed, Some(&expected))
    };
    let to_be_greater_than = |expectation: &mut Expectation, expected: Dynamic| -> MatchResult {
        let passed = compare(&expectation.actual, &expected, std::cmp::Ordering::Greater);
        expectation.check("toBeGreaterThan", passed, Some(&expected))
    };
    let to_be_less_than = |expectation: &mut Expectation, expected: Dynamic| -> MatchResult {
        let passed = compare(&expectation.actual, &expected, std::cmp::Ordering::Less);
        expectation.check("toBeLessThan", passed, Some(&expected))
    };
    let to_match = |expectation: &mut Expectation, pattern: &str| -> MatchResult {
        let regex =
            Regex::new(pattern).map_err(|error| format!("toMatch: invalid pattern ({})", error))?;
        let passed =
            expectation.actual.is_string() && regex.is_match(&dynamic_to_text(&expectation.actual));
        expectation.check(
            "toMatch",
            passed,
            Some(&Dynamic::from(pattern.to_string())),
        )
    };

    engine
        .register_fn("to_be", to_be)
        .register_fn("toBe", to_be)
        .register_fn("to_equal", to_equal)
        .register_fn("toEqual", to_equal)
        .register_fn("to_be_truthy", to_be_truthy)
        .register_fn("toBeTruthy", to_be_truthy)
        .register_fn("to_be_falsy", to_be_falsy)
        .register_fn("toBeFalsy", to_be_falsy)
        .register_fn("to_be_defined", to_be_defined)
        .register_fn("toBeDefined", to_be_defined)
        .register_fn("to_contain", to_contain)
        .register_fn("toContain", to_contain)
        .register_fn("to_be_greater_than", to_be_greater_than)
        .register_fn("toBeGreaterThan", to_be_greater_than)
        .register_fn("to_be_less_than", to_be_less_than)
        .register_fn("toBeLessThan", to_be_less_than)
        .register_fn("to_match", to_match)
        .register_fn("toMatch", to_match);
}
