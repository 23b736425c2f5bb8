//! Capabilities handed to request, response and job scripts.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::Utc;
use rhai::{Dynamic, Engine, EvalAltResult, Map, FLOAT, INT};
use serde_json::Value;
use tracing::info;
use yd_core::{kv_rows_to_map, KvRow, RequestData, RestResponse, ScriptLog, YaadeError};
use yd_interp::helpers::rhai_bridge::{dynamic_to_text, json_to_dynamic};
use yd_interp::host::{register_codec, register_host_types, DateTimeUtil, RandomSource};

use crate::jsonpath;
use crate::sandbox::Bindings;

/// Read/write access to the variables of the selected environment.
pub trait EnvAccess {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), YaadeError>;
}

/// Sends another request by id, optionally against another environment,
/// and returns the response as JSON.
pub type ExecFn = Rc<dyn Fn(i64, Option<String>) -> Result<Value, YaadeError>>;

/// The `env` binding.
#[derive(Clone)]
pub struct EnvHandle {
    access: Rc<dyn EnvAccess>,
    name: Option<String>,
}

impl EnvHandle {
    pub fn new(access: Rc<dyn EnvAccess>, name: Option<String>) -> Self {
        Self { access, name }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    entries: Rc<RefCell<Vec<ScriptLog>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: impl Into<String>) {
        self.entries.borrow_mut().push(ScriptLog {
            time: Utc::now().timestamp_millis(),
            message: message.into(),
        });
    }

    pub fn entries(&self) -> Vec<ScriptLog> {
        self.entries.borrow().clone()
    }

    pub fn take(&self) -> Vec<ScriptLog> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }
}

#[derive(Clone)]
struct LogSink {
    logs: LogBuffer,
    prefix: String,
}

impl LogSink {
    fn write(&self, parts: &[Dynamic]) {
        let mut message = self.prefix.clone();
        for part in parts {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&dynamic_to_text(part));
        }
        info!(target: "yd_sandbox::script", "{}", message);
        self.logs.push(message);
    }
}

pub struct HostFunctions {
    pub logs: LogBuffer,
    /// e.g. `[Request Script: 7 - dev]`
    pub log_prefix: String,
    pub exec: Option<ExecFn>,
}

/// Registers everything scripts may call: host types, codec, `jp`, `env`
/// methods, `log`, captured `print`/`debug` and, when present, `exec`.
pub fn register_host_functions(engine: &mut Engine, host: &HostFunctions) {
    register_host_types(engine);
    register_codec(engine, "btoa", "atob");
    jsonpath::register(engine);
    register_env(engine);
    register_log(engine, host);
    if let Some(exec) = &host.exec {
        register_exec(engine, Rc::clone(exec));
    }
}

fn register_env(engine: &mut Engine) {
    engine
        .register_type_with_name::<EnvHandle>("Env")
        .register_fn("get", |env: &mut EnvHandle, key: &str| {
            env.access
                .get(key)
                .map(Dynamic::from)
                .unwrap_or(Dynamic::UNIT)
        })
        .register_fn(
            "set",
            |env: &mut EnvHandle, key: &str, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
                env.access
                    .set(key, &dynamic_to_text(&value))
                    .map_err(|error| error.message.into())
            },
        )
        .register_get("name", |env: &mut EnvHandle| {
            env.name.clone().map(Dynamic::from).unwrap_or(Dynamic::UNIT)
        });
}

fn register_log(engine: &mut Engine, host: &HostFunctions) {
    let sink = LogSink {
        logs: host.logs.clone(),
        prefix: host.log_prefix.clone(),
    };

    let one = sink.clone();
    engine.register_fn("log", move |a: Dynamic| one.write(&[a]));
    // Exact-typed overloads keep the math package's `log` from shadowing ours.
    let float = sink.clone();
    engine.register_fn("log", move |a: FLOAT| float.write(&[Dynamic::from_float(a)]));
    let int = sink.clone();
    engine.register_fn("log", move |a: INT| int.write(&[Dynamic::from_int(a)]));
    let two = sink.clone();
    engine.register_fn("log", move |a: Dynamic, b: Dynamic| two.write(&[a, b]));
    let float_pair = sink.clone();
    engine.register_fn("log", move |a: FLOAT, b: FLOAT| {
        float_pair.write(&[Dynamic::from_float(a), Dynamic::from_float(b)])
    });
    let three = sink.clone();
    engine.register_fn("log", move |a: Dynamic, b: Dynamic, c: Dynamic| {
        three.write(&[a, b, c])
    });

    let printed = sink.clone();
    engine.on_print(move |text| printed.write(&[Dynamic::from(text.to_string())]));
    engine.on_debug(move |text, _, _| sink.write(&[Dynamic::from(text.to_string())]));
}

fn register_exec(engine: &mut Engine, exec: ExecFn) {
    let by_id = Rc::clone(&exec);
    engine.register_fn(
        "exec",
        move |request_id: INT| -> Result<Dynamic, Box<EvalAltResult>> {
            by_id(request_id, None)
                .map(|response| json_to_dynamic(&response))
                .map_err(|error| error.message.into())
        },
    );
    engine.register_fn(
        "exec",
        move |request_id: INT, env_name: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            exec(request_id, Some(env_name.to_string()))
                .map(|response| json_to_dynamic(&response))
                .map_err(|error| error.message.into())
        },
    );
}

/// `env`, `DateTime` and `rand`, in that order.
pub fn base_bindings(env: EnvHandle, random: RandomSource) -> Bindings {
    vec![
        ("env".to_string(), Dynamic::from(env)),
        ("DateTime".to_string(), Dynamic::from(DateTimeUtil)),
        ("rand".to_string(), Dynamic::from(random)),
    ]
}

fn headers_map(rows: &[KvRow]) -> Map {
    kv_rows_to_map(rows)
        .into_iter()
        .map(|(key, value)| (key.into(), Dynamic::from(value)))
        .collect()
}

/// The `req` binding.
pub fn request_value(data: &RequestData) -> Dynamic {
    let mut map = Map::new();
    map.insert("uri".into(), Dynamic::from(data.uri.clone()));
    map.insert("body".into(), Dynamic::from(data.body.clone()));
    map.insert("method".into(), Dynamic::from(data.method.clone()));
    map.insert("headers".into(), Dynamic::from_map(headers_map(&data.headers)));
    Dynamic::from_map(map)
}

/// The `res` binding.
pub fn response_value(response: &RestResponse) -> Dynamic {
    let mut map = Map::new();
    map.insert("body".into(), Dynamic::from(response.body.clone()));
    map.insert(
        "headers".into(),
        Dynamic::from_map(headers_map(&response.headers)),
    );
    map.insert("status".into(), Dynamic::from_int(response.status));
    map.insert("time".into(), Dynamic::from_int(response.time as INT));
    Dynamic::from_map(map)
}
