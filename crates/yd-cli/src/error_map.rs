use std::fmt::Display;

use serde::Serialize;
use yd_core::YaadeError;

fn map_error(code: &'static str, error: impl Display) -> YaadeError {
    YaadeError::new(code, error.to_string())
}

pub(crate) fn json_text(value: &impl Serialize) -> Result<String, YaadeError> {
    serde_json::to_string(value).map_err(|error| map_error("CLI_OUTPUT_ENCODE", error))
}

pub(crate) fn emit_error(error: YaadeError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    match json_text(&error.message) {
        Ok(message) => println!("ERROR_MSG_JSON:{}", message),
        Err(_) => println!("ERROR_MSG_JSON:\"\""),
    }
    1
}

pub(crate) fn map_cli_input_read(error: std::io::Error) -> YaadeError {
    map_error("CLI_INPUT_READ", error)
}

pub(crate) fn map_cli_input_invalid(error: serde_json::Error) -> YaadeError {
    map_error("CLI_INPUT_INVALID", error)
}

pub(crate) fn map_cli_state_write(error: std::io::Error) -> YaadeError {
    map_error("CLI_STATE_WRITE", error)
}

#[cfg(test)]
mod error_map_tests {
    use super::*;

    #[test]
    fn emit_error_returns_non_zero_exit_code() {
        let code = emit_error(YaadeError::new("ERR", "failed"));
        assert_eq!(code, 1);
    }

    #[test]
    fn mapping_helpers_keep_error_codes() {
        assert_eq!(
            map_cli_input_read(std::io::Error::other("read")).code,
            "CLI_INPUT_READ"
        );
        assert_eq!(
            map_cli_state_write(std::io::Error::other("write")).code,
            "CLI_STATE_WRITE"
        );
        let invalid = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
        assert_eq!(map_cli_input_invalid(invalid).code, "CLI_INPUT_INVALID");
        assert_eq!(json_text(&"a\"b").expect("json"), r#""a\"b""#);
    }
}
