//! Structured descriptions of where and how to access data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Reserved property key holding the ordered endpoint property sequence.
pub const ENDPOINT_PROPERTIES: &str = "endpointProperties";

/// An unordered bag of named properties describing a data endpoint.
///
/// Values are free-form JSON: strings, numbers or nested sequences. The
/// reserved [`ENDPOINT_PROPERTIES`] key holds an ordered array of
/// `{key, type, value}` objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataAddress {
    properties: Map<String, Value>,
}

impl DataAddress {
    /// Creates a new data address builder.
    pub fn builder() -> DataAddressBuilder {
        DataAddressBuilder::default()
    }

    /// Returns the value stored under `key`, if any.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Returns all properties.
    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// Returns true when no properties are set.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Fluent builder for [`DataAddress`] instances.
#[derive(Debug, Default)]
pub struct DataAddressBuilder {
    properties: Map<String, Value>,
}

impl DataAddressBuilder {
    /// Sets a named property, replacing any previous value.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Appends a `{key, type, value}` triple to the ordered
    /// [`ENDPOINT_PROPERTIES`] sequence.
    pub fn endpoint_property(
        mut self,
        key: impl Into<String>,
        property_type: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        let entry = json!({
            "key": key.into(),
            "type": property_type.into(),
            "value": value.into(),
        });
        match self.properties.get_mut(ENDPOINT_PROPERTIES) {
            Some(Value::Array(entries)) => entries.push(entry),
            _ => {
                self.properties
                    .insert(ENDPOINT_PROPERTIES.to_string(), Value::Array(vec![entry]));
            }
        }
        self
    }

    /// Builds the data address.
    pub fn build(self) -> DataAddress {
        DataAddress {
            properties: self.properties,
        }
    }
}
