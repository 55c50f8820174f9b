//! Declarative route configuration.
//!
//! A route is described by one YAML document:
//!
//! ```yaml
//! name: thermostat
//! entity-offset: 1000
//! messages:
//!   - protocol: ascii
//!     id: ACK
//!     template: "ACK ${{seq}}$\n"
//!     symbols: [{ name: seq, type: unsigned-integer }]
//! inbound:
//!   - message: ACK
//! outbound:
//!   - id: SET_LEVEL
//!     message: SET
//!     type: activity-driven
//!     entity: 5
//! ```
//!
//! [`RouteConfig::build`] checks every cross reference and compiles literals
//! and expressions, so a route that builds cannot fail on configuration at
//! run time except through values supplied by invocations.

use crate::error::{ConfigError, ConfigResult};
use crate::expr::{BuiltinEvaluator, ExpressionEvaluator};
use crate::inbound::{InboundMapping, InboundMappingConfig};
use crate::outbound::{OutboundMapping, OutboundMappingConfig};
use crate::route::Route;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tmtc_codec::{MessageCodec, MessageDefinitionConfig};
use tmtc_common::{DataProcessor, EntityId};
use tracing::debug;

/// Configuration of a [`Route`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouteConfig {
    pub name: String,
    /// Added to every local entity id of the route.
    #[serde(default)]
    pub entity_offset: EntityId,
    #[serde(default)]
    pub messages: Vec<MessageDefinitionConfig>,
    #[serde(default)]
    pub inbound: Vec<InboundMappingConfig>,
    #[serde(default)]
    pub outbound: Vec<OutboundMappingConfig>,
}

impl RouteConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        debug!("Loading route configuration from {}", path.as_ref().display());
        Self::from_yaml_str(&text)
    }

    /// Build the route with the builtin expression evaluator.
    pub fn build(&self, processor: Arc<dyn DataProcessor>) -> ConfigResult<Route> {
        self.build_with_evaluator(processor, &BuiltinEvaluator)
    }

    /// Build the route, compiling expressions with `evaluator`.
    pub fn build_with_evaluator(
        &self,
        processor: Arc<dyn DataProcessor>,
        evaluator: &dyn ExpressionEvaluator,
    ) -> ConfigResult<Route> {
        let mut codecs: HashMap<String, Arc<MessageCodec>> = HashMap::new();
        for definition in &self.messages {
            let id = definition.id().to_string();
            if codecs.contains_key(&id) {
                return Err(ConfigError::DuplicateMessage(id));
            }
            codecs.insert(id, Arc::new(definition.build()?));
        }
        let codec = |id: &str| {
            codecs
                .get(id)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownMessage(id.to_string()))
        };

        let outbound = self
            .outbound
            .iter()
            .map(|c| OutboundMapping::from_config(c, codec(&c.message)?, self.entity_offset, evaluator))
            .collect::<ConfigResult<Vec<_>>>()?;

        let inbound = self
            .inbound
            .iter()
            .map(|c| InboundMapping::from_config(c, codec(&c.message)?, self.entity_offset, evaluator))
            .collect::<ConfigResult<Vec<_>>>()?;
        for mapping in &inbound {
            if let Some(outbound_id) = mapping.command_match().and_then(|m| m.outbound()) {
                if !outbound.iter().any(|o| o.id() == outbound_id) {
                    return Err(ConfigError::UnknownOutbound(outbound_id.to_string()));
                }
            }
        }

        // Message types only referenced by verification rules still need to
        // be identified.
        let mut extra_codecs = Vec::new();
        for mapping in &outbound {
            let Some(verification) = mapping.verification() else {
                continue;
            };
            for (message, _) in verification.progress_messages() {
                let found = codec(&message)?;
                if !extra_codecs.iter().any(|c: &Arc<MessageCodec>| c.id() == found.id()) {
                    extra_codecs.push(found);
                }
            }
        }

        Route::new(
            self.name.clone(),
            self.entity_offset,
            inbound,
            outbound,
            extra_codecs,
            processor,
        )
    }
}
