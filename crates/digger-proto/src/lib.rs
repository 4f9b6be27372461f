//! Binary record schemas for the digger.
//!
//! Streams are usually JSON, but some carry protobuf-encoded payloads. This
//! crate compiles the built-in `digger.events` schema set (with serde derives
//! so decoded messages render straight to JSON) and exposes a process-wide
//! registry that maps schema names to decoders. The registry is populated at
//! startup, before any consumer runs, and is read-only afterwards.

use std::borrow::Cow;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, RwLock};

use prost::Message;
use serde::Serialize;
use tracing::debug;

/// Generated `digger.events` message types.
pub mod events {
    include!(concat!(env!("OUT_DIR"), "/digger.events.rs"));
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown schema name: {0}")]
    UnknownSchema(String),

    #[error("message is neither JSON nor a recognized schema")]
    NotRecognized,

    #[error("failed to render decoded message as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A named binary record schema that can decode raw bytes to JSON.
pub trait BinarySchema: Send + Sync {
    fn name(&self) -> &str;

    /// Decode the argument bytes and render them as JSON. An error means the
    /// bytes are not a valid encoding of this schema.
    fn decode(&self, contents: &[u8]) -> Result<Vec<u8>, SchemaError>;
}

/// Adapts a prost-generated message type to [`BinarySchema`]. Decoding is
/// stateless: every call produces a fresh message, so one instance may be
/// shared across any number of processor workers.
pub struct ProstSchema<M> {
    name: &'static str,
    _marker: PhantomData<fn() -> M>,
}

impl<M> ProstSchema<M> {
    pub const fn new(name: &'static str) -> Self {
        ProstSchema {
            name,
            _marker: PhantomData,
        }
    }
}

impl<M> BinarySchema for ProstSchema<M>
where
    M: Message + Default + Serialize,
{
    fn name(&self) -> &str {
        self.name
    }

    fn decode(&self, contents: &[u8]) -> Result<Vec<u8>, SchemaError> {
        let message = M::decode(contents).map_err(|err| {
            debug!(schema = self.name, %err, "schema rejected message");
            SchemaError::NotRecognized
        })?;
        Ok(serde_json::to_vec(&message)?)
    }
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn BinarySchema>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn BinarySchema>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a schema under its own name. Intended for startup-time use only;
/// registrations made after consumers start are not picked up by existing
/// decoders.
pub fn register_schema(schema: Arc<dyn BinarySchema>) {
    let mut map = match registry().write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    map.insert(schema.name().to_string(), schema);
}

/// Register the built-in `digger.events` schemas. Idempotent.
pub fn register_builtin_schemas() {
    register_schema(Arc::new(ProstSchema::<events::AuditEvent>::new(
        "digger.events.AuditEvent",
    )));
    register_schema(Arc::new(ProstSchema::<events::MetricSample>::new(
        "digger.events.MetricSample",
    )));
}

fn lookup_schema(name: &str) -> Option<Arc<dyn BinarySchema>> {
    let map = match registry().read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    map.get(name).cloned()
}

/// Decodes record payloads to JSON.
///
/// Valid JSON passes through unchanged. Anything else is tried against the
/// configured schemas in order; the first schema that accepts the bytes wins,
/// which keeps decoding stable when schemas overlap on the wire.
pub struct Decoder {
    schemas: Vec<Arc<dyn BinarySchema>>,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("schemas", &self.schemas.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Decoder {
    /// Resolve the argument schema names against the registry. Empty names
    /// are skipped; an unknown name is a fatal configuration error.
    pub fn new(schema_names: &[String]) -> Result<Self, SchemaError> {
        let mut schemas = Vec::new();

        for name in schema_names {
            if name.is_empty() {
                continue;
            }
            let schema =
                lookup_schema(name).ok_or_else(|| SchemaError::UnknownSchema(name.clone()))?;
            schemas.push(schema);
        }

        Ok(Decoder { schemas })
    }

    /// Convert the argument bytes to JSON bytes. Valid JSON is returned
    /// unchanged; otherwise the configured schemas are tried in order.
    pub fn to_json<'a>(&self, contents: &'a [u8]) -> Result<Cow<'a, [u8]>, SchemaError> {
        if serde_json::from_slice::<serde::de::IgnoredAny>(contents).is_ok() {
            return Ok(Cow::Borrowed(contents));
        }

        for schema in &self.schemas {
            if let Ok(decoded) = schema.decode(contents) {
                return Ok(Cow::Owned(decoded));
            }
        }

        Err(SchemaError::NotRecognized)
    }
}
