//! `btoa` / `atob` over binary strings: one char per byte, U+0000..=U+00FF.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rhai::{Engine, EvalAltResult};

use super::runtime_error;

/// Fails on any char above U+00FF.
pub fn btoa(text: &str) -> Result<String, String> {
    let bytes = text
        .chars()
        .map(|ch| {
            u8::try_from(u32::from(ch)).map_err(|_| {
                format!(
                    "btoa: '{}' is outside the Latin1 range and cannot be encoded.",
                    ch
                )
            })
        })
        .collect::<Result<Vec<u8>, String>>()?;
    Ok(STANDARD.encode(bytes))
}

pub fn atob(encoded: &str) -> Result<String, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|error| format!("atob: invalid base64 input ({}).", error))?;
    Ok(bytes.into_iter().map(char::from).collect())
}

/// Registers the codec pair under the given function names.
pub fn register_codec(engine: &mut Engine, btoa_name: &str, atob_name: &str) {
    engine.register_fn(
        btoa_name.to_string(),
        |text: &str| -> Result<String, Box<EvalAltResult>> { btoa(text).map_err(runtime_error) },
    );
    engine.register_fn(
        atob_name.to_string(),
        |encoded: &str| -> Result<String, Box<EvalAltResult>> {
            atob(encoded).map_err(runtime_error)
        },
    );
}

#[cfg(test)]
mod codec_tests {
    use super::*;

    #[test]
    fn btoa_and_atob_use_standard_alphabet() {
        assert_eq!(btoa("user:pass"), Ok("dXNlcjpwYXNz".to_string()));
        assert_eq!(atob("dXNlcjpwYXNz"), Ok("user:pass".to_string()));
    }

    #[test]
    fn binary_strings_map_one_char_per_byte() {
        assert_eq!(btoa("é"), Ok("6Q==".to_string()));
        assert_eq!(atob("6Q=="), Ok("é".to_string()));
        assert_eq!(atob("w6k="), Ok("\u{c3}\u{a9}".to_string()));
        let error = btoa("€").expect_err("chars above U+00FF should fail");
        assert!(error.starts_with("btoa: '€' is outside the Latin1 range"));
    }

    #[test]
    fn atob_rejects_invalid_input() {
        let error = atob("not base64!").expect_err("invalid input should fail");
        assert!(error.starts_with("atob: invalid base64 input"));
    }
}
