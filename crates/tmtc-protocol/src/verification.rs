//! Verification rule sets.
//!
//! An outbound mapping may carry a [`Verification`]: a timeout and two ordered
//! rule lists, one per stage. Each [`StageRule`] classifies an inbound message
//! in the context of the command being verified. Within a stage the first
//! matching rule wins.
//!
//! [`CommandMatch`] is the related rule used by inbound mappings that only
//! apply when a given command was the last one sent.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tmtc_common::{ActivityReportState, FieldMap, Value, ValueType};

/// Default verification timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// (message type id, secondary id) identifying an inbound message class.
pub type MessageKey = (String, String);

// ============================================================================
// Configuration
// ============================================================================

/// Configuration of a [`StageRule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StageRuleConfig {
    /// Message type id the rule applies to.
    pub message: String,
    /// Secondary id; any secondary id matches when absent.
    #[serde(default)]
    pub secondary_id: Option<String>,
    /// Decoded field compared with the command's correlation field.
    #[serde(default)]
    pub id_field: Option<String>,
    /// Decoded field compared with the expected value.
    #[serde(default)]
    pub value_field: Option<String>,
    /// Command field holding the expected value.
    #[serde(default)]
    pub reference_argument: Option<String>,
    /// Literal expected value.
    #[serde(default)]
    pub expected_value: Option<String>,
    #[serde(default)]
    pub expected_value_type: ValueType,
    /// Result reported when the rule matches.
    pub result: ActivityReportState,
}

/// Configuration of a [`Verification`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VerificationConfig {
    /// Field of the encoded command carrying the correlation id.
    #[serde(default)]
    pub correlation_field: Option<String>,
    /// Timeout in seconds, measured from transmission.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub acceptance: Vec<StageRuleConfig>,
    #[serde(default)]
    pub execution: Vec<StageRuleConfig>,
}

// ============================================================================
// Stage Rules
// ============================================================================

/// What the value field is compared with.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedValue {
    /// A field of the encoded command.
    Argument(String),
    /// A typed literal.
    Literal(Value),
}

/// One classification rule of a verification stage.
#[derive(Debug, Clone)]
pub struct StageRule {
    message: String,
    secondary_id: Option<String>,
    id_field: Option<String>,
    value_check: Option<(String, ExpectedValue)>,
    result: ActivityReportState,
}

impl StageRule {
    /// Build a rule that matches any message of the given type.
    pub fn new(message: impl Into<String>, result: ActivityReportState) -> Self {
        StageRule {
            message: message.into(),
            secondary_id: None,
            id_field: None,
            value_check: None,
            result,
        }
    }

    pub fn with_secondary_id(mut self, secondary_id: impl Into<String>) -> Self {
        self.secondary_id = Some(secondary_id.into());
        self
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    pub fn with_value_check(mut self, field: impl Into<String>, expected: ExpectedValue) -> Self {
        self.value_check = Some((field.into(), expected));
        self
    }

    pub fn from_config(config: &StageRuleConfig) -> ConfigResult<Self> {
        let invalid = |reason: &str| ConfigError::InvalidMapping {
            id: config.message.clone(),
            reason: reason.to_string(),
        };
        let value_check = match &config.value_field {
            None => None,
            Some(field) => {
                let expected = match (&config.reference_argument, &config.expected_value) {
                    (Some(arg), None) => ExpectedValue::Argument(arg.clone()),
                    (None, Some(literal)) => {
                        ExpectedValue::Literal(config.expected_value_type.parse(literal)?)
                    }
                    (Some(_), Some(_)) => {
                        return Err(invalid(
                            "value-field takes reference-argument or expected-value, not both",
                        ))
                    }
                    (None, None) => {
                        return Err(invalid(
                            "value-field needs reference-argument or expected-value",
                        ))
                    }
                };
                Some((field.clone(), expected))
            }
        };
        Ok(StageRule {
            message: config.message.clone(),
            secondary_id: config.secondary_id.clone(),
            id_field: config.id_field.clone(),
            value_check,
            result: config.result,
        })
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn secondary_id(&self) -> Option<&str> {
        self.secondary_id.as_deref()
    }

    pub fn result(&self) -> ActivityReportState {
        self.result
    }

    /// Whether messages of this type/secondary id can match the rule.
    pub fn applies_to(&self, message: &str, secondary_id: &str) -> bool {
        self.message == message
            && self
                .secondary_id
                .as_deref()
                .map_or(true, |s| s == secondary_id)
    }

    /// Classify a decoded message for a command.
    ///
    /// `command` is the resolved field map of the encoded command and
    /// `correlation_field` names its correlation field.
    pub fn classify(
        &self,
        message: &str,
        secondary_id: &str,
        decoded: &FieldMap,
        command: &FieldMap,
        correlation_field: Option<&str>,
    ) -> Option<ActivityReportState> {
        if !self.applies_to(message, secondary_id) {
            return None;
        }
        if let Some(id_field) = &self.id_field {
            let sent = correlation_field.and_then(|f| command.get(f));
            if !Value::option_matches(decoded.get(id_field), sent) {
                return None;
            }
        }
        if let Some((field, expected)) = &self.value_check {
            let target = match expected {
                ExpectedValue::Argument(arg) => command.get(arg),
                ExpectedValue::Literal(v) => Some(v),
            };
            if !Value::option_matches(decoded.get(field), target) {
                return None;
            }
        }
        Some(self.result)
    }
}

// ============================================================================
// Verification
// ============================================================================

/// Verification rules of an outbound mapping.
#[derive(Debug, Clone)]
pub struct Verification {
    correlation_field: Option<String>,
    timeout: Duration,
    acceptance: Vec<StageRule>,
    execution: Vec<StageRule>,
}

impl Verification {
    pub fn new(
        correlation_field: Option<String>,
        timeout: Duration,
        acceptance: Vec<StageRule>,
        execution: Vec<StageRule>,
    ) -> Self {
        Verification {
            correlation_field,
            timeout,
            acceptance,
            execution,
        }
    }

    /// Build from configuration. Rules correlating on an id field require a
    /// correlation field.
    pub fn from_config(id: &str, config: &VerificationConfig) -> ConfigResult<Self> {
        let acceptance = config
            .acceptance
            .iter()
            .map(StageRule::from_config)
            .collect::<ConfigResult<Vec<_>>>()?;
        let execution = config
            .execution
            .iter()
            .map(StageRule::from_config)
            .collect::<ConfigResult<Vec<_>>>()?;
        let correlates = acceptance.iter().chain(&execution).any(|r| r.id_field.is_some());
        if correlates && config.correlation_field.is_none() {
            return Err(ConfigError::InvalidMapping {
                id: id.to_string(),
                reason: "id-field rules need a correlation-field".to_string(),
            });
        }
        Ok(Verification {
            correlation_field: config.correlation_field.clone(),
            timeout: Duration::from_secs(config.timeout),
            acceptance,
            execution,
        })
    }

    pub fn correlation_field(&self) -> Option<&str> {
        self.correlation_field.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn acceptance(&self) -> &[StageRule] {
        &self.acceptance
    }

    pub fn execution(&self) -> &[StageRule] {
        &self.execution
    }

    pub fn is_empty(&self) -> bool {
        self.acceptance.is_empty() && self.execution.is_empty()
    }

    /// Message classes that can affect this verification.
    pub fn progress_messages(&self) -> BTreeSet<(String, Option<String>)> {
        self.acceptance
            .iter()
            .chain(&self.execution)
            .map(|r| (r.message.clone(), r.secondary_id.clone()))
            .collect()
    }

    /// Whether any rule applies to messages of this class.
    pub fn is_interested(&self, message: &str, secondary_id: &str) -> bool {
        self.acceptance
            .iter()
            .chain(&self.execution)
            .any(|r| r.applies_to(message, secondary_id))
    }

    /// Run the rules of one stage in order; the first match wins.
    pub fn classify(
        &self,
        rules: &[StageRule],
        message: &str,
        secondary_id: &str,
        decoded: &FieldMap,
        command: &FieldMap,
    ) -> Option<ActivityReportState> {
        rules.iter().find_map(|rule| {
            rule.classify(
                message,
                secondary_id,
                decoded,
                command,
                self.correlation_field(),
            )
        })
    }
}

// ============================================================================
// Command Match
// ============================================================================

/// Configuration of a [`CommandMatch`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommandMatchConfig {
    /// Outbound mapping id the last command must come from.
    #[serde(default)]
    pub outbound: Option<String>,
    /// Look at the last command sent on the route rather than the last one
    /// sent for `outbound`.
    #[serde(default)]
    pub last_command: bool,
    /// Command field to check.
    #[serde(default)]
    pub argument: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
}

/// Binds an inbound mapping to the last command sent.
///
/// Used for synchronous protocols whose replies do not identify the command
/// that caused them.
#[derive(Debug, Clone)]
pub struct CommandMatch {
    outbound: Option<String>,
    last_command: bool,
    argument: Option<(String, Value)>,
}

impl CommandMatch {
    pub fn new(outbound: Option<String>, last_command: bool) -> Self {
        CommandMatch {
            outbound,
            last_command,
            argument: None,
        }
    }

    pub fn with_argument(mut self, argument: impl Into<String>, value: Value) -> Self {
        self.argument = Some((argument.into(), value));
        self
    }

    pub fn from_config(config: &CommandMatchConfig) -> ConfigResult<Self> {
        let invalid = |reason: &str| ConfigError::InvalidMapping {
            id: config.outbound.clone().unwrap_or_default(),
            reason: reason.to_string(),
        };
        if config.outbound.is_none() && !config.last_command {
            return Err(invalid("command match needs an outbound mapping or last-command"));
        }
        let argument = match (&config.argument, &config.value) {
            (Some(arg), Some(literal)) => Some((arg.clone(), config.value_type.parse(literal)?)),
            (None, None) => None,
            _ => return Err(invalid("command match argument and value go together")),
        };
        Ok(CommandMatch {
            outbound: config.outbound.clone(),
            last_command: config.last_command,
            argument,
        })
    }

    /// Outbound mapping id, if bound to one.
    pub fn outbound(&self) -> Option<&str> {
        self.outbound.as_deref()
    }

    /// Whether the route-wide last command is checked.
    pub fn uses_last_command(&self) -> bool {
        self.last_command
    }

    /// Check a previously sent command, given its mapping id and fields.
    pub fn matches(&self, mapping_id: &str, fields: &FieldMap) -> bool {
        if let Some(outbound) = &self.outbound {
            if outbound != mapping_id {
                return false;
            }
        }
        match &self.argument {
            Some((arg, expected)) => fields.get(arg).map_or(false, |v| v.matches(expected)),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(entries: &[(&str, Value)]) -> FieldMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_rule_type_and_secondary() {
        let rule = StageRule::new("ACK", ActivityReportState::Ok).with_secondary_id("SET");
        let empty = FieldMap::new();
        assert_eq!(rule.classify("ACK", "SET", &empty, &empty, None), Some(ActivityReportState::Ok));
        assert_eq!(rule.classify("ACK", "GET", &empty, &empty, None), None);
        assert_eq!(rule.classify("NAK", "SET", &empty, &empty, None), None);
        let any = StageRule::new("ACK", ActivityReportState::Ok);
        assert!(any.applies_to("ACK", "whatever"));
    }

    #[test]
    fn test_rule_correlation() {
        let rule = StageRule::new("ACK", ActivityReportState::Ok).with_id_field("ack_seq");
        let command = fields(&[("seq", Value::Integer(7))]);
        let good = fields(&[("ack_seq", Value::Integer(7))]);
        let bad = fields(&[("ack_seq", Value::Integer(8))]);
        assert_eq!(
            rule.classify("ACK", "", &good, &command, Some("seq")),
            Some(ActivityReportState::Ok)
        );
        assert_eq!(rule.classify("ACK", "", &bad, &command, Some("seq")), None);
    }

    #[test]
    fn test_rule_value_checks() {
        let by_literal = StageRule::new("RSP", ActivityReportState::Fail)
            .with_value_check("code", ExpectedValue::Literal(Value::Integer(2)));
        let by_argument = StageRule::new("RSP", ActivityReportState::Ok)
            .with_value_check("level", ExpectedValue::Argument("level".into()));
        let command = fields(&[("level", Value::Integer(5))]);
        let decoded = fields(&[("code", Value::Float(2.0)), ("level", Value::Integer(5))]);
        assert_eq!(
            by_literal.classify("RSP", "", &decoded, &command, None),
            Some(ActivityReportState::Fail)
        );
        assert_eq!(
            by_argument.classify("RSP", "", &decoded, &command, None),
            Some(ActivityReportState::Ok)
        );
        let other = fields(&[("code", Value::Integer(1))]);
        assert_eq!(by_literal.classify("RSP", "", &other, &command, None), None);
    }

    #[test]
    fn test_first_match_wins() {
        let verification = Verification::new(
            None,
            Duration::from_secs(5),
            vec![
                StageRule::new("ACK", ActivityReportState::Fail),
                StageRule::new("ACK", ActivityReportState::Ok),
            ],
            vec![],
        );
        let empty = FieldMap::new();
        assert_eq!(
            verification.classify(verification.acceptance(), "ACK", "", &empty, &empty),
            Some(ActivityReportState::Fail)
        );
    }

    #[test]
    fn test_verification_from_yaml() {
        let config: VerificationConfig = serde_yaml::from_str(
            r#"
correlation-field: seq
timeout: 5
acceptance:
  - { message: ACK, id-field: seq, result: OK }
  - { message: NAK, id-field: seq, result: FAIL }
execution:
  - { message: EXE, value-field: status, expected-value: "0", expected-value-type: enumerated, result: OK }
"#,
        )
        .unwrap();
        let verification = Verification::from_config("SET", &config).unwrap();
        assert_eq!(verification.timeout(), Duration::from_secs(5));
        assert_eq!(verification.acceptance().len(), 2);
        assert!(verification.is_interested("EXE", ""));
        assert!(!verification.is_interested("TM", ""));
        assert_eq!(verification.progress_messages().len(), 3);
    }

    #[test]
    fn test_verification_config_errors() {
        let missing_correlation: VerificationConfig =
            serde_yaml::from_str("acceptance:\n  - { message: ACK, id-field: seq, result: OK }\n")
                .unwrap();
        assert!(Verification::from_config("X", &missing_correlation).is_err());

        let bad_literal: VerificationConfig = serde_yaml::from_str(
            "execution:\n  - { message: EXE, value-field: s, expected-value: abc, expected-value-type: enumerated, result: OK }\n",
        )
        .unwrap();
        assert!(Verification::from_config("X", &bad_literal).is_err());

        let no_target: VerificationConfig =
            serde_yaml::from_str("execution:\n  - { message: EXE, value-field: s, result: OK }\n")
                .unwrap();
        assert!(Verification::from_config("X", &no_target).is_err());
    }

    #[test]
    fn test_command_match() {
        let m = CommandMatch::new(Some("GET_TEMP".into()), false)
            .with_argument("sensor", Value::Integer(2));
        assert!(m.matches("GET_TEMP", &fields(&[("sensor", Value::Integer(2))])));
        assert!(!m.matches("GET_TEMP", &fields(&[("sensor", Value::Integer(3))])));
        assert!(!m.matches("GET_VOLT", &fields(&[("sensor", Value::Integer(2))])));

        let any_last = CommandMatch::new(None, true);
        assert!(any_last.matches("ANYTHING", &FieldMap::new()));
        assert!(CommandMatch::from_config(&CommandMatchConfig::default()).is_err());
    }
}
