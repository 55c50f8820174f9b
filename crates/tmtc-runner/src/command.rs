//! Operator commands read from standard input.
//!
//! ```text
//! invoke 1005 Level=3 Mode:character-string=AUTO
//! send POLL
//! quit
//! ```
//!
//! Argument values without a type are inferred: integer, then real, then
//! boolean, else text.

use crate::error::{RunnerError, RunnerResult};
use tmtc_common::{ActivityInvocation, EntityId, Value, ValueType};

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    /// Run an activity through the route.
    Invoke(ActivityInvocation),
    /// Send an internal command by outbound mapping id.
    Send(String),
    Quit,
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
///
/// `occurrence_id` is stamped on invocations.
pub fn parse_command(line: &str, occurrence_id: u64) -> RunnerResult<Option<OperatorCommand>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let invalid = |reason: &str| RunnerError::Command {
        line: trimmed.to_string(),
        reason: reason.to_string(),
    };
    let mut words = trimmed.split_whitespace();
    let verb = words.next().unwrap_or_default();
    match verb {
        "invoke" => {
            let activity: EntityId = words
                .next()
                .ok_or_else(|| invalid("missing activity id"))?
                .parse()
                .map_err(|_| invalid("activity id is not a number"))?;
            let mut invocation = ActivityInvocation::new(activity, occurrence_id);
            for word in words {
                let (name, value) = parse_argument(word).map_err(|reason| invalid(&reason))?;
                invocation.arguments.insert(name, value);
            }
            Ok(Some(OperatorCommand::Invoke(invocation)))
        }
        "send" => {
            let mapping = words.next().ok_or_else(|| invalid("missing mapping id"))?;
            if words.next().is_some() {
                return Err(invalid("send takes one mapping id"));
            }
            Ok(Some(OperatorCommand::Send(mapping.to_string())))
        }
        "quit" | "exit" => Ok(Some(OperatorCommand::Quit)),
        _ => Err(invalid("unknown command")),
    }
}

/// Parse `name=value` or `name:type=value`.
fn parse_argument(word: &str) -> Result<(String, Value), String> {
    let (key, text) = word
        .split_once('=')
        .ok_or_else(|| format!("argument '{}' is not name=value", word))?;
    let (name, value) = match key.split_once(':') {
        Some((name, type_name)) => {
            let value_type = value_type(type_name)
                .ok_or_else(|| format!("unknown value type '{}'", type_name))?;
            (name, value_type.parse(text).map_err(|e| e.to_string())?)
        }
        None => (key, infer_value(text)),
    };
    if name.is_empty() {
        return Err("empty argument name".to_string());
    }
    Ok((name.to_string(), value))
}

fn infer_value(text: &str) -> Value {
    if let Ok(v) = text.parse::<i64>() {
        Value::Integer(v)
    } else if let Ok(v) = text.parse::<f64>() {
        Value::Float(v)
    } else if let Ok(v) = text.parse::<bool>() {
        Value::Bool(v)
    } else {
        Value::String(text.to_string())
    }
}

fn value_type(name: &str) -> Option<ValueType> {
    [
        ValueType::Boolean,
        ValueType::Enumerated,
        ValueType::UnsignedInteger,
        ValueType::SignedInteger,
        ValueType::Real,
        ValueType::CharacterString,
        ValueType::OctetString,
    ]
    .into_iter()
    .find(|t| t.as_str() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(line: &str) -> ActivityInvocation {
        match parse_command(line, 7).unwrap() {
            Some(OperatorCommand::Invoke(inv)) => inv,
            other => panic!("expected invoke, got {:?}", other),
        }
    }

    #[test]
    fn test_invoke_with_inferred_arguments() {
        let inv = invocation("invoke 1005 Level=3 Gain=0.5 Enabled=true Mode=AUTO");
        assert_eq!(inv.activity_id, 1005);
        assert_eq!(inv.occurrence_id, 7);
        assert_eq!(inv.arguments["Level"], Value::Integer(3));
        assert_eq!(inv.arguments["Gain"], Value::Float(0.5));
        assert_eq!(inv.arguments["Enabled"], Value::Bool(true));
        assert_eq!(inv.arguments["Mode"], Value::String("AUTO".into()));
    }

    #[test]
    fn test_invoke_with_typed_arguments() {
        let inv = invocation("invoke 1 Code:character-string=42 Key:octet-string=BEEF");
        assert_eq!(inv.arguments["Code"], Value::String("42".into()));
        assert_eq!(inv.arguments["Key"], Value::Bytes(vec![0xBE, 0xEF]));
    }

    #[test]
    fn test_send_quit_and_blank() {
        assert_eq!(
            parse_command("send POLL", 0).unwrap(),
            Some(OperatorCommand::Send("POLL".into()))
        );
        assert_eq!(parse_command("  quit ", 0).unwrap(), Some(OperatorCommand::Quit));
        assert_eq!(parse_command("", 0).unwrap(), None);
        assert_eq!(parse_command("# comment", 0).unwrap(), None);
    }

    #[test]
    fn test_invalid_commands() {
        for line in [
            "invoke",
            "invoke abc",
            "invoke 1 Level",
            "invoke 1 Level:float=3",
            "invoke 1 Level:unsigned-integer=-3",
            "invoke 1 =3",
            "send",
            "send A B",
            "reboot",
        ] {
            assert!(
                matches!(parse_command(line, 0), Err(RunnerError::Command { .. })),
                "{} should be rejected",
                line
            );
        }
    }
}
