pub mod helpers;
pub mod host;
mod interpolate;
pub mod template;

pub use interpolate::{
    interpolate, interpolate_with, Interpolator, InterpolatorOptions, MAX_INTERPOLATION_DEPTH,
    TOO_MANY_ITERATIONS,
};
pub use template::{is_valid_variable_name, parse_template, scope_symbol, TemplateSegment};
