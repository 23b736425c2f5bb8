use rhai::{Dynamic, Engine, Map, Scope};
use serde_json::Value;
use tracing::{trace, warn};
use yd_core::{EnvData, InterpolationError, InterpolationResult};

use crate::helpers::rhai_bridge::dynamic_to_text;
use crate::host::{register_codec, register_host_types, DateTimeUtil, RandomSource};
use crate::template::{
    contains_template, is_valid_variable_name, parse_template, rewrite_scope_symbols,
    scope_symbol, TemplateSegment,
};

pub const MAX_INTERPOLATION_DEPTH: usize = 20;
pub const TOO_MANY_ITERATIONS: &str = "too many iterations";
const ENV_NOT_DEFINED: &str = "request or env not defined";

#[derive(Debug, Clone)]
pub struct InterpolatorOptions {
    /// Seed of `$r`; `None` seeds from the clock.
    pub random_seed: Option<u32>,
    pub max_depth: usize,
}

impl Default for InterpolatorOptions {
    fn default() -> Self {
        Self {
            random_seed: None,
            max_depth: MAX_INTERPOLATION_DEPTH,
        }
    }
}

/// Expands `${...}` templates against one environment. The evaluation scope
/// only ever holds the environment's valid keys and the synthetic bindings.
pub struct Interpolator {
    engine: Engine,
    scope: Scope<'static>,
    max_depth: usize,
}

impl Interpolator {
    pub fn new(env: &EnvData) -> Self {
        Self::with_options(env, InterpolatorOptions::default())
    }

    pub fn with_options(env: &EnvData, options: InterpolatorOptions) -> Self {
        let random = match options.random_seed {
            Some(seed) => RandomSource::new(seed),
            None => RandomSource::auto_seeded(),
        };
        Self {
            engine: build_engine(),
            scope: build_scope(env, random),
            max_depth: options.max_depth,
        }
    }

    pub fn interpolate_scalar(
        &self,
        template: &str,
        errors: &mut Vec<InterpolationError>,
        depth: usize,
    ) -> String {
        if depth > self.max_depth {
            errors.push(InterpolationError::new(template, TOO_MANY_ITERATIONS));
            return template.to_string();
        }

        let rendered = match self.render(template) {
            Ok(rendered) => rendered,
            Err(message) => {
                trace!(template, %message, "template evaluation failed");
                errors.push(InterpolationError::new(template, message));
                return template.to_string();
            }
        };

        if contains_template(&rendered) && rendered != template {
            self.interpolate_scalar(&rendered, errors, depth + 1)
        } else {
            trace!(template, depth, "template resolved");
            rendered
        }
    }

    pub fn interpolate_value(&self, value: &Value, errors: &mut Vec<InterpolationError>) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.interpolate_value(item, errors))
                    .collect(),
            ),
            Value::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, item)| (key.clone(), self.interpolate_value(item, errors)))
                    .collect(),
            ),
            Value::String(text) => Value::String(self.interpolate_scalar(text, errors, 0)),
            other => other.clone(),
        }
    }

    fn render(&self, template: &str) -> Result<String, String> {
        if !contains_template(template) {
            return Ok(template.to_string());
        }
        let segments = parse_template(template).map_err(|error| error.to_string())?;
        let mut out = String::with_capacity(template.len());
        let mut scope = self.scope.clone();
        for segment in segments {
            match segment {
                TemplateSegment::Literal(text) => out.push_str(&text),
                TemplateSegment::Expression(expr) => {
                    let value = self
                        .engine
                        .eval_expression_with_scope::<Dynamic>(
                            &mut scope,
                            &rewrite_scope_symbols(&expr),
                        )
                        .map_err(|error| error.to_string())?;
                    out.push_str(&dynamic_to_text(&value));
                }
            }
        }
        Ok(out)
    }
}

/// Templates see only the env and the `$` utilities: no `eval`, no
/// `import`, and `print`/`debug` go to tracing instead of stdout.
fn build_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_strict_variables(true);
    engine.disable_symbol("eval");
    engine.disable_symbol("import");
    engine.on_print(|text| trace!(target: "yd_interp::print", "{}", text));
    engine.on_debug(|text, _, _| trace!(target: "yd_interp::print", "{}", text));
    engine.set_max_operations(100_000);
    engine.set_max_call_levels(32);
    engine.set_max_expr_depths(64, 32);
    engine.set_max_string_size(1 << 20);
    engine.set_max_array_size(10_000);
    engine.set_max_map_size(10_000);
    register_host_types(&mut engine);
    register_codec(&mut engine, &scope_symbol("$btoa"), &scope_symbol("$atob"));
    engine
}

fn build_scope(env: &EnvData, random: RandomSource) -> Scope<'static> {
    let mut scope = Scope::new();
    let mut raw = Map::new();
    for (key, value) in env {
        raw.insert(key.as_str().into(), Dynamic::from(value.clone()));
        if is_valid_variable_name(key) {
            scope.push(scope_symbol(key), value.clone());
        } else {
            warn!(key = key.as_str(), "skipping environment key that is not a valid variable name");
        }
    }
    scope.push(scope_symbol("$r"), random);
    scope.push(scope_symbol("$t"), DateTimeUtil);
    scope.push_dynamic(scope_symbol("$env"), Dynamic::from_map(raw));
    scope
}

/// Interpolates every string leaf of `value` against `env`.
pub fn interpolate(value: &Value, env: Option<&EnvData>) -> InterpolationResult {
    interpolate_with(value, env, InterpolatorOptions::default())
}

pub fn interpolate_with(
    value: &Value,
    env: Option<&EnvData>,
    options: InterpolatorOptions,
) -> InterpolationResult {
    let env = match env {
        Some(env) if !value.is_null() => env,
        _ => {
            return InterpolationResult {
                result: value.clone(),
                errors: vec![InterpolationError::new("env", ENV_NOT_DEFINED)],
            }
        }
    };

    let interpolator = Interpolator::with_options(env, options);
    let mut errors = Vec::new();
    let result = interpolator.interpolate_value(value, &mut errors);
    InterpolationResult { result, errors }
}
