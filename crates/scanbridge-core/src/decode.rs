//! Result decoding
//!
//! Accepted return shapes from the entry point:
//!
//! - a bare integer: `return 0`
//! - a sequence whose first element is an integer and whose optional
//!   second element becomes the diagnostic text: `return { 7, "spam" }`
//! - multiple return values, read like the sequence form: `return 7, "spam"`
//!
//! Anything else is a bad return value.

use crate::error::BridgeError;
use mlua::{Function, Lua, MultiValue, Value};

/// What the script's return value means
#[derive(Debug)]
pub enum DispositionOutcome {
    Code(i32),
    CodeWithText(i32, String),
    Failure(BridgeError),
}

/// Interpret the values returned by `function`
pub fn decode_result<'lua>(
    lua: &'lua Lua,
    values: MultiValue<'lua>,
    function: &str,
) -> mlua::Result<DispositionOutcome> {
    let mut values = values.into_vec();

    let (candidate, text) = if values.len() > 1 {
        let text = values.swap_remove(1);
        (values.swap_remove(0), Some(text))
    } else {
        match values.pop() {
            Some(Value::Table(table)) if table.raw_len() > 0 => {
                let text = if table.raw_len() > 1 {
                    Some(table.raw_get::<_, Value>(2)?)
                } else {
                    None
                };
                (table.raw_get::<_, Value>(1)?, text)
            }
            Some(value) => (value, None),
            None => (Value::Nil, None),
        }
    };

    let code = match candidate {
        Value::Integer(n) => i32::try_from(n).ok(),
        _ => None,
    };
    let Some(code) = code else {
        return Ok(DispositionOutcome::Failure(BridgeError::BadReturnValue {
            function: function.to_string(),
        }));
    };

    match text {
        Some(value) => Ok(DispositionOutcome::CodeWithText(code, stringify(lua, value)?)),
        None => Ok(DispositionOutcome::Code(code)),
    }
}

/// Stringify the way Lua's `tostring` does, metamethods included
fn stringify<'lua>(lua: &'lua Lua, value: Value<'lua>) -> mlua::Result<String> {
    if let Value::String(ref s) = value {
        return Ok(s.to_string_lossy().into_owned());
    }
    let tostring: Function = lua.globals().get("tostring")?;
    let text: mlua::String = tostring.call(value)?;
    Ok(text.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(source: &str) -> DispositionOutcome {
        let lua = Lua::new();
        let values: MultiValue = lua.load(source).eval().unwrap();
        decode_result(&lua, values, "local_scan").unwrap()
    }

    fn assert_bad_return(outcome: DispositionOutcome) {
        match outcome {
            DispositionOutcome::Failure(BridgeError::BadReturnValue { function }) => {
                assert_eq!(function, "local_scan");
            }
            other => panic!("expected bad return value, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_integer() {
        assert!(matches!(decode("return 2"), DispositionOutcome::Code(2)));
    }

    #[test]
    fn test_sequence_with_text() {
        match decode(r#"return { 1, "spam detected" }"#) {
            DispositionOutcome::CodeWithText(code, text) => {
                assert_eq!(code, 1);
                assert_eq!(text, "spam detected");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_single_element_sequence() {
        assert!(matches!(decode("return { 9 }"), DispositionOutcome::Code(9)));
    }

    #[test]
    fn test_multiple_return_values() {
        match decode(r#"return 7, "bad sender", "ignored""#) {
            DispositionOutcome::CodeWithText(code, text) => {
                assert_eq!(code, 7);
                assert_eq!(text, "bad sender");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_text_is_stringified() {
        match decode("return { 7, 42 }") {
            DispositionOutcome::CodeWithText(_, text) => assert_eq!(text, "42"),
            other => panic!("unexpected outcome {:?}", other),
        }

        let source = r#"
            local reason = setmetatable({}, { __tostring = function() return "from metatable" end })
            return 9, reason
        "#;
        match decode(source) {
            DispositionOutcome::CodeWithText(_, text) => assert_eq!(text, "from metatable"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_bad_return_shapes() {
        assert_bad_return(decode("return {}"));
        assert_bad_return(decode("return"));
        assert_bad_return(decode(r#"return "accept""#));
        assert_bad_return(decode("return 1.5"));
        assert_bad_return(decode(r#"return { "7" }"#));
        assert_bad_return(decode("return nil, 'text'"));
    }

    #[test]
    fn test_out_of_range_code() {
        assert_bad_return(decode("return 4294967296"));
    }
}
