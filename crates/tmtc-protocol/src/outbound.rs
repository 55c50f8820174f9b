//! Outbound mappings: from activity invocations (or internal triggers) to
//! encoded commands.
//!
//! Field assembly order:
//!
//! 1. Activity arguments, renamed through the argument mappings. Arguments
//!    without a mapping keep their name.
//! 2. Fixed fields not already set.
//! 3. Auto-increment fields not already set, advancing their counter.
//! 4. Computed fields, which may overwrite earlier values.
//!
//! The resulting map is encoded by the mapping's codec and kept alongside the
//! bytes so verification can correlate replies with it.

use crate::error::{ConfigError, ConfigResult, RouteError, RouteResult};
use crate::expr::ExpressionEvaluator;
use crate::field::{
    AutoIncrementConfig, AutoIncrementField, ComputedField, ComputedFieldConfig, FixedField,
    FixedFieldConfig,
};
use crate::verification::{Verification, VerificationConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tmtc_codec::MessageCodec;
use tmtc_common::{ActivityInvocation, EntityId, FieldMap};

/// What triggers an outbound mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundKind {
    /// Sent when the activity with this local id is invoked.
    ActivityDriven { entity: EntityId },
    /// Sent by a scheduler every `period` seconds.
    Periodic { period: u64 },
    /// Sent once each time the connection comes up.
    OnConnection,
}

impl OutboundKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OutboundKind::ActivityDriven { .. } => "activity-driven",
            OutboundKind::Periodic { .. } => "periodic",
            OutboundKind::OnConnection => "on-connection",
        }
    }
}

/// Renames an activity argument to a protocol field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentMappingConfig {
    /// Activity argument name.
    pub name: String,
    /// Protocol field name.
    pub field: String,
}

/// Configuration of an [`OutboundMapping`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutboundMappingConfig {
    pub id: String,
    /// Message definition id.
    pub message: String,
    #[serde(default)]
    pub secondary_id: String,
    #[serde(flatten)]
    pub kind: OutboundKind,
    #[serde(default)]
    pub arguments: Vec<ArgumentMappingConfig>,
    #[serde(default)]
    pub fixed: Vec<FixedFieldConfig>,
    #[serde(default)]
    pub auto_increment: Vec<AutoIncrementConfig>,
    #[serde(default)]
    pub computed: Vec<ComputedFieldConfig>,
    #[serde(default)]
    pub verification: Option<VerificationConfig>,
}

/// An encoded command and the field map it was encoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedCommand {
    pub bytes: Vec<u8>,
    pub fields: FieldMap,
}

/// Builds commands of one message type.
#[derive(Debug)]
pub struct OutboundMapping {
    id: String,
    codec: Arc<MessageCodec>,
    secondary_id: String,
    kind: OutboundKind,
    activity_id: Option<EntityId>,
    arguments: BTreeMap<String, String>,
    fixed: Vec<FixedField>,
    auto_increment: Vec<AutoIncrementField>,
    computed: Vec<ComputedField>,
    verification: Option<Arc<Verification>>,
}

impl OutboundMapping {
    /// Build a mapping for `codec`. A verification with no rules in either
    /// stage is dropped.
    pub fn from_config(
        config: &OutboundMappingConfig,
        codec: Arc<MessageCodec>,
        entity_offset: EntityId,
        evaluator: &dyn ExpressionEvaluator,
    ) -> ConfigResult<Self> {
        let activity_id = match config.kind {
            OutboundKind::ActivityDriven { entity } => {
                Some(entity.checked_add(entity_offset).ok_or_else(|| {
                    ConfigError::InvalidMapping {
                        id: config.id.clone(),
                        reason: format!("entity {} overflows with offset {}", entity, entity_offset),
                    }
                })?)
            }
            OutboundKind::Periodic { period: 0 } => {
                return Err(ConfigError::InvalidMapping {
                    id: config.id.clone(),
                    reason: "period must be at least one second".to_string(),
                })
            }
            _ => None,
        };
        let verification = config
            .verification
            .as_ref()
            .map(|v| Verification::from_config(&config.id, v))
            .transpose()?
            .filter(|v| !v.is_empty())
            .map(Arc::new);
        Ok(OutboundMapping {
            id: config.id.clone(),
            codec,
            secondary_id: config.secondary_id.clone(),
            kind: config.kind,
            activity_id,
            arguments: config
                .arguments
                .iter()
                .map(|a| (a.name.clone(), a.field.clone()))
                .collect(),
            fixed: config
                .fixed
                .iter()
                .map(FixedField::from_config)
                .collect::<Result<_, _>>()?,
            auto_increment: config
                .auto_increment
                .iter()
                .map(AutoIncrementField::from_config)
                .collect::<Result<_, _>>()?,
            computed: config
                .computed
                .iter()
                .map(|c| ComputedField::from_config(c, evaluator))
                .collect::<Result<_, _>>()?,
            verification,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn codec(&self) -> &Arc<MessageCodec> {
        &self.codec
    }

    pub fn secondary_id(&self) -> &str {
        &self.secondary_id
    }

    pub fn kind(&self) -> OutboundKind {
        self.kind
    }

    /// Global activity id served by this mapping, if activity driven.
    pub fn activity_id(&self) -> Option<EntityId> {
        self.activity_id
    }

    /// Trigger period of a periodic mapping.
    pub fn period(&self) -> Option<Duration> {
        match self.kind {
            OutboundKind::Periodic { period } => Some(Duration::from_secs(period)),
            _ => None,
        }
    }

    pub fn verification(&self) -> Option<&Arc<Verification>> {
        self.verification.as_ref()
    }

    /// Current value of an auto-increment counter.
    pub fn counter(&self, field: &str) -> Option<u64> {
        self.auto_increment
            .iter()
            .find(|a| a.field() == field)
            .map(AutoIncrementField::get)
    }

    /// Assemble and encode a command.
    ///
    /// With an invocation the mapping must be activity driven. Without one
    /// (internal dispatch) no arguments are mapped.
    pub fn encode(&self, invocation: Option<&ActivityInvocation>) -> RouteResult<EncodedCommand> {
        let mut fields = FieldMap::new();
        if let Some(invocation) = invocation {
            if self.activity_id.is_none() {
                return Err(RouteError::UnsupportedMappingKind {
                    mapping: self.id.clone(),
                    kind: self.kind.as_str().to_string(),
                });
            }
            for (name, value) in &invocation.arguments {
                let field = self.arguments.get(name).unwrap_or(name);
                fields.insert(field.clone(), value.clone());
            }
        }
        for fixed in &self.fixed {
            fields
                .entry(fixed.field().to_string())
                .or_insert_with(|| fixed.value().clone());
        }
        for counter in &self.auto_increment {
            if !fields.contains_key(counter.field()) {
                fields.insert(counter.field().to_string(), counter.next()?);
            }
        }
        for computed in &self.computed {
            let value = computed.compute(&fields)?;
            fields.insert(computed.field().to_string(), value);
        }
        let bytes = self.codec.encode(&self.secondary_id, &fields)?;
        Ok(EncodedCommand { bytes, fields })
    }
}
