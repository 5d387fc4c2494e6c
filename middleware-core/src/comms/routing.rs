//! Routing-key tables.
//!
//! Maps each logical channel to the engine-side routing key the client
//! publishes requests to, and to the client-owned key/queue its responses
//! arrive on. Client-owned entries are qualified with the app ID as soon
//! as the session exists; the app-ID inquiry itself travels over a
//! process-global, never-qualified route.
//!
//! Parameter keys follow the `engine.<channel>.key` / `client.<channel>.key`
//! / `client.<channel>.queue` convention, plus `client.inquiry.key` and
//! `client.inquiry.queue` for the bootstrap route.

use crate::config::ParamStore;
use log::warn;
use middleware_api::model::Channel;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),
}

/// Resolved routes for one logical channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRoute {
    /// Engine-side routing key outbound requests are published to.
    pub outbound: String,
    /// Client-owned routing key responses for this channel arrive on.
    pub inbound: String,
    /// Name of the queue bound to `inbound`.
    pub queue: String,
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    entries: HashMap<Channel, ChannelRoute>,
    inquiry_key: String,
    inquiry_queue: String,
    app_id: Option<String>,
}

impl RoutingTable {
    /// Builds the table from the parameter store.
    ///
    /// The bootstrap inquiry route is mandatory; per-channel entries are
    /// optional and a missing one only disables sends on that channel
    /// (logged at send time, never an error to the caller).
    pub fn from_params(params: &ParamStore) -> Result<Self, RoutingError> {
        let inquiry_key = params
            .get("client.inquiry.key")
            .ok_or_else(|| RoutingError::MissingParameter("client.inquiry.key".into()))?
            .to_string();
        let inquiry_queue = params
            .get("client.inquiry.queue")
            .unwrap_or(&inquiry_key)
            .to_string();

        let mut entries = HashMap::new();
        for channel in Channel::ALL {
            let outbound = params.get(&format!("engine.{}.key", channel.name()));
            let inbound = params.get(&format!("client.{}.key", channel.name()));
            match (outbound, inbound) {
                (Some(outbound), Some(inbound)) => {
                    let queue = params
                        .get(&format!("client.{}.queue", channel.name()))
                        .unwrap_or(inbound)
                        .to_string();
                    entries.insert(
                        channel,
                        ChannelRoute {
                            outbound: outbound.to_string(),
                            inbound: inbound.to_string(),
                            queue,
                        },
                    );
                }
                _ => {
                    warn!(
                        "Routing table: channel '{}' has no key parameters, sends on it will be skipped",
                        channel
                    );
                }
            }
        }

        Ok(Self {
            entries,
            inquiry_key,
            inquiry_queue,
            app_id: None,
        })
    }

    /// Process-global routing key for the bootstrap app-ID inquiry reply.
    pub fn inquiry_key(&self) -> &str {
        &self.inquiry_key
    }

    /// Queue bound to the bootstrap inquiry reply key.
    pub fn inquiry_queue(&self) -> &str {
        &self.inquiry_queue
    }

    /// Engine-side routing key for outbound requests on `channel`.
    pub fn outbound(&self, channel: Channel) -> Option<&str> {
        self.entries.get(&channel).map(|r| r.outbound.as_str())
    }

    /// Client-owned (qualified) routing key responses arrive on.
    pub fn inbound(&self, channel: Channel) -> Option<&str> {
        self.entries.get(&channel).map(|r| r.inbound.as_str())
    }

    /// Name of the bound queue for `channel`.
    pub fn queue(&self, channel: Channel) -> Option<&str> {
        self.entries.get(&channel).map(|r| r.queue.as_str())
    }

    /// Whether `qualify` has run.
    pub fn is_qualified(&self) -> bool {
        self.app_id.is_some()
    }

    /// Rewrites every client-owned key and queue with the app-ID prefix.
    ///
    /// Called synchronously on session creation, before any consumer is
    /// registered, so readers never observe a half-qualified table.
    pub fn qualify(&mut self, app_id: &str) {
        if self.app_id.is_some() {
            warn!("Routing table already qualified, ignoring app id '{}'", app_id);
            return;
        }
        for route in self.entries.values_mut() {
            route.inbound = format!("{}.{}", app_id, route.inbound);
            route.queue = format!("{}.{}", app_id, route.queue);
        }
        self.app_id = Some(app_id.to_string());
    }

    /// Channel name -> bound queue name, for the app-info handshake.
    pub fn queue_names(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(channel, route)| (channel.name().to_string(), route.queue.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ParamStore {
        ParamStore::from_iter([
            ("client.inquiry.key", "client.inquiry.response"),
            ("engine.admin.key", "engine.admin.request"),
            ("client.admin.key", "client.admin.response"),
            ("engine.tick_order.key", "engine.order.request"),
            ("client.tick_order.key", "client.tick.stream"),
            ("client.tick_order.queue", "client.tick.queue"),
        ])
    }

    #[test]
    fn resolves_and_qualifies() {
        let mut table = RoutingTable::from_params(&params()).unwrap();

        assert_eq!(table.outbound(Channel::Admin), Some("engine.admin.request"));
        assert_eq!(table.inbound(Channel::Admin), Some("client.admin.response"));
        assert_eq!(table.queue(Channel::TickOrder), Some("client.tick.queue"));
        // No parameters were supplied for this channel.
        assert_eq!(table.outbound(Channel::Locate), None);

        table.qualify("APP7");
        assert!(table.is_qualified());
        assert_eq!(
            table.inbound(Channel::Admin),
            Some("APP7.client.admin.response")
        );
        // Engine-side keys are well-known and never qualified.
        assert_eq!(table.outbound(Channel::Admin), Some("engine.admin.request"));
        // The bootstrap route stays global.
        assert_eq!(table.inquiry_key(), "client.inquiry.response");
    }

    #[test]
    fn qualify_is_idempotent() {
        let mut table = RoutingTable::from_params(&params()).unwrap();
        table.qualify("APP1");
        table.qualify("APP2");
        assert_eq!(
            table.inbound(Channel::Admin),
            Some("APP1.client.admin.response")
        );
    }

    #[test]
    fn missing_inquiry_key_is_fatal() {
        let empty = ParamStore::default();
        assert!(RoutingTable::from_params(&empty).is_err());
    }
}
