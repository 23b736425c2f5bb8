//! Host values injected into template scopes and script bindings.

mod codec;
mod datetime;
mod rng;

use rhai::{Dynamic, Engine, EvalAltResult, Position};

pub use codec::{atob, btoa, register_codec};
pub use datetime::{DateTimeUtil, DateTimeValue};
pub use rng::RandomSource;

pub(crate) fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(message.into()),
        Position::NONE,
    ))
}

/// Registers `RandomSource`, `DateTimeUtil` and `DateTimeValue` with their methods.
pub fn register_host_types(engine: &mut Engine) {
    rng::register(engine);
    datetime::register(engine);
}
