// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::time::Duration;

use http::Uri;

const HTTPS: &str = "https";
const HTTP: &str = "http";
const WEIGHT: &str = "weight";

/// One announced instance of a service, as the directory describes it.
///
/// The directory attaches free-form string properties. The `https` and `http`
/// properties carry the endpoint and the optional `weight` property scales how much
/// traffic the instance receives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceDescriptor {
    id: String,
    #[cfg_attr(feature = "serde", serde(default))]
    properties: HashMap<String, String>,
}

impl ServiceDescriptor {
    /// Creates a descriptor without properties.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: HashMap::new(),
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The identifier the directory assigned to the instance.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All properties of the instance.
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// The endpoint of the instance: the `https` property, falling back to `http`.
    ///
    /// Returns `None` when neither property holds a valid URI.
    #[must_use]
    pub fn endpoint(&self) -> Option<Uri> {
        [HTTPS, HTTP]
            .into_iter()
            .filter_map(|key| self.properties.get(key))
            .find_map(|value| value.parse::<Uri>().ok())
    }

    /// The weight of the instance.
    ///
    /// The `weight` property is read as a decimal number and truncated toward zero, so
    /// weights below 1 drain the instance out of the pool. Missing, unparseable or
    /// negative weights count as 1 and weights beyond `u32::MAX` saturate.
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.properties
            .get(WEIGHT)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .map_or(1, truncate_weight)
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is non-negative and float to int casts saturate"
)]
fn truncate_weight(value: f64) -> u32 {
    let value = value.trunc();
    if value < 0.0 {
        return 1;
    }

    // NaN casts to 0.
    value as u32
}

/// The instances of one service type and pool at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstanceSnapshot {
    service_type: String,
    pool: String,
    #[cfg_attr(feature = "serde", serde(default))]
    descriptors: Vec<ServiceDescriptor>,
    #[cfg_attr(feature = "serde", serde(default))]
    max_age: Option<Duration>,
}

impl InstanceSnapshot {
    /// Creates a snapshot without a max-age hint.
    #[must_use]
    pub fn new(service_type: impl Into<String>, pool: impl Into<String>, descriptors: Vec<ServiceDescriptor>) -> Self {
        Self {
            service_type: service_type.into(),
            pool: pool.into(),
            descriptors,
            max_age: None,
        }
    }

    /// Sets how long the snapshot stays fresh, which paces the next refresh.
    #[must_use]
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// The service type.
    #[must_use]
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// The pool.
    #[must_use]
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// The announced instances.
    #[must_use]
    pub fn descriptors(&self) -> &[ServiceDescriptor] {
        &self.descriptors
    }

    /// How long the snapshot stays fresh, if the directory said so.
    #[must_use]
    pub fn get_max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// The weighted endpoints to hand to [`Balancer::update_weighted`][crate::balancer::Balancer::update_weighted].
    ///
    /// Descriptors without a usable endpoint or with a weight of zero are skipped.
    #[must_use]
    pub fn endpoints(&self) -> Vec<(Uri, u32)> {
        self.descriptors
            .iter()
            .filter_map(|descriptor| descriptor.endpoint().map(|endpoint| (endpoint, descriptor.weight())))
            .filter(|(_, weight)| *weight > 0)
            .collect()
    }
}
