//! CLI command implementations.

pub mod call;
pub mod session;
pub mod subscribe;

use crate::error::{CliError, CliResult};
use ddp_core::Value;

/// Parses positional arguments as JSON values.
///
/// An argument that is not valid JSON but also does not look like JSON
/// (no leading brace, bracket or quote) is passed as a plain string.
pub fn parse_params(args: &[String]) -> CliResult<Vec<Value>> {
    args.iter()
        .map(|arg| match serde_json::from_str(arg) {
            Ok(value) => Ok(value),
            Err(_) if !arg.starts_with(['{', '[', '"']) => Ok(Value::String(arg.clone())),
            Err(source) => Err(CliError::InvalidParam {
                input: arg.clone(),
                source,
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn params_are_json_values() {
        let params = parse_params(&args(&["1", "true", r#"{"a":[1,2]}"#, "null"])).unwrap();
        assert_eq!(params, vec![json!(1), json!(true), json!({"a": [1, 2]}), Value::Null]);
    }

    #[test]
    fn bare_words_become_strings() {
        let params = parse_params(&args(&["lists", "a b"])).unwrap();
        assert_eq!(params, vec![json!("lists"), json!("a b")]);
    }

    #[test]
    fn broken_json_is_rejected() {
        let err = parse_params(&args(&[r#"{"a":"#])).unwrap_err();
        assert!(matches!(err, CliError::InvalidParam { .. }));
    }
}
