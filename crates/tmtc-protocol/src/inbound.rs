//! Inbound mappings: from decoded messages to parameter samples and events.

use crate::error::{ConfigError, ConfigResult};
use crate::expr::ExpressionEvaluator;
use crate::field::{ComputedField, ComputedFieldConfig, EventCondition, EventConditionConfig};
use crate::verification::{CommandMatch, CommandMatchConfig, MessageKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tmtc_codec::MessageCodec;
use tmtc_common::{EntityId, EventOccurrence, FieldMap, ParameterSample};
use tracing::error;

/// Configuration of a parameter injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterInjectionConfig {
    /// Decoded field providing the value.
    pub field: String,
    /// Local parameter id.
    pub entity: EntityId,
}

/// Configuration of an event injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventInjectionConfig {
    /// Local event id.
    pub entity: EntityId,
    /// Static qualifier.
    #[serde(default)]
    pub qualifier: Option<String>,
    /// Decoded field rendered as the qualifier, used when no static
    /// qualifier is set.
    #[serde(default)]
    pub qualifier_reference: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub condition: Option<EventConditionConfig>,
}

/// Configuration of an [`InboundMapping`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InboundMappingConfig {
    /// Message definition id.
    pub message: String,
    #[serde(default)]
    pub secondary_id: String,
    #[serde(default)]
    pub command_match: Option<CommandMatchConfig>,
    #[serde(default)]
    pub computed: Vec<ComputedFieldConfig>,
    #[serde(default)]
    pub parameters: Vec<ParameterInjectionConfig>,
    #[serde(default)]
    pub events: Vec<EventInjectionConfig>,
}

#[derive(Debug, Clone)]
struct ParameterInjection {
    field: String,
    entity: EntityId,
}

#[derive(Debug, Clone)]
enum Qualifier {
    None,
    Static(String),
    Reference(String),
}

#[derive(Debug, Clone)]
struct EventInjection {
    entity: EntityId,
    qualifier: Qualifier,
    source: Option<String>,
    condition: Option<EventCondition>,
}

/// Maps one (message type, secondary id) to parameters and events.
///
/// Entity ids are stored with the route offset already applied.
#[derive(Debug)]
pub struct InboundMapping {
    codec: Arc<MessageCodec>,
    secondary_id: String,
    command_match: Option<CommandMatch>,
    computed: Vec<ComputedField>,
    parameters: Vec<ParameterInjection>,
    events: Vec<EventInjection>,
}

impl InboundMapping {
    /// Build a mapping for `codec`, resolving entity ids against `entity_offset`.
    pub fn from_config(
        config: &InboundMappingConfig,
        codec: Arc<MessageCodec>,
        entity_offset: EntityId,
        evaluator: &dyn ExpressionEvaluator,
    ) -> ConfigResult<Self> {
        let offset = |entity: EntityId| {
            entity
                .checked_add(entity_offset)
                .ok_or_else(|| ConfigError::InvalidMapping {
                    id: config.message.clone(),
                    reason: format!("entity {} overflows with offset {}", entity, entity_offset),
                })
        };
        let command_match = config
            .command_match
            .as_ref()
            .map(CommandMatch::from_config)
            .transpose()?;
        let computed = config
            .computed
            .iter()
            .map(|c| ComputedField::from_config(c, evaluator))
            .collect::<Result<Vec<_>, _>>()?;
        let parameters = config
            .parameters
            .iter()
            .map(|p| -> ConfigResult<ParameterInjection> {
                Ok(ParameterInjection {
                    field: p.field.clone(),
                    entity: offset(p.entity)?,
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;
        let events = config
            .events
            .iter()
            .map(|e| -> ConfigResult<EventInjection> {
                let qualifier = match (&e.qualifier, &e.qualifier_reference) {
                    (Some(q), _) => Qualifier::Static(q.clone()),
                    (None, Some(r)) => Qualifier::Reference(r.clone()),
                    (None, None) => Qualifier::None,
                };
                Ok(EventInjection {
                    entity: offset(e.entity)?,
                    qualifier,
                    source: e.source.clone(),
                    condition: e.condition.as_ref().map(EventCondition::from_config).transpose()?,
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(InboundMapping {
            codec,
            secondary_id: config.secondary_id.clone(),
            command_match,
            computed,
            parameters,
            events,
        })
    }

    pub fn codec(&self) -> &Arc<MessageCodec> {
        &self.codec
    }

    pub fn message_id(&self) -> &str {
        self.codec.id()
    }

    pub fn secondary_id(&self) -> &str {
        &self.secondary_id
    }

    pub fn key(&self) -> MessageKey {
        (self.codec.id().to_string(), self.secondary_id.clone())
    }

    pub fn command_match(&self) -> Option<&CommandMatch> {
        self.command_match.as_ref()
    }

    /// Add computed fields to a decoded map.
    ///
    /// A failing field is logged and left unset; later fields still see the
    /// ones computed before them.
    pub fn apply_computed(&self, fields: &mut FieldMap) {
        for computed in &self.computed {
            match computed.compute(fields) {
                Ok(value) => {
                    fields.insert(computed.field().to_string(), value);
                }
                Err(e) => {
                    error!(
                        "Computed field of {}/{} skipped: {}",
                        self.message_id(),
                        self.secondary_id,
                        e
                    );
                }
            }
        }
    }

    /// Samples for the injected fields present in `fields`, in declaration order.
    pub fn map_parameters(
        &self,
        fields: &FieldMap,
        route: &str,
        time: DateTime<Utc>,
    ) -> Vec<ParameterSample> {
        self.parameters
            .iter()
            .filter_map(|p| {
                fields.get(&p.field).map(|value| ParameterSample {
                    id: p.entity,
                    generation_time: time,
                    reception_time: time,
                    value: value.clone(),
                    route: route.to_string(),
                })
            })
            .collect()
    }

    /// Event occurrences whose condition holds.
    pub fn map_events(
        &self,
        fields: &FieldMap,
        route: &str,
        time: DateTime<Utc>,
    ) -> Vec<EventOccurrence> {
        self.events
            .iter()
            .filter(|e| e.condition.as_ref().map_or(true, |c| c.matches(fields)))
            .map(|e| {
                let qualifier = match &e.qualifier {
                    Qualifier::None => None,
                    Qualifier::Static(q) => Some(q.clone()),
                    Qualifier::Reference(field) => Some(
                        fields
                            .get(field)
                            .map(|v| v.to_string())
                            .unwrap_or_default(),
                    ),
                };
                EventOccurrence {
                    id: e.entity,
                    generation_time: time,
                    reception_time: time,
                    qualifier,
                    route: route.to_string(),
                    source: e.source.clone(),
                }
            })
            .collect()
    }
}
