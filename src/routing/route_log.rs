//! Append-only arena of hop records.
//!
//! Routes are grouped per message and indexed by destination device, which
//! makes "who handed this message to X" a lookup and lets acknowledgments
//! walk the forest from a leaf back to its root.

use crate::model::{DeviceId, MessageId, MessageRoute};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("{device_id} already received message {message_id}")]
    DuplicateDestination {
        message_id: MessageId,
        device_id: DeviceId,
    },

    #[error("hop {hop_count} into {device_id} does not follow parent hop {parent_hop}")]
    NonIncreasingHop {
        device_id: DeviceId,
        hop_count: u32,
        parent_hop: u32,
    },
}

pub type RouteResult<T> = Result<T, RouteError>;

#[derive(Debug, Default)]
struct MessageRoutes {
    routes: Vec<MessageRoute>,
    /// destination device -> index into `routes`
    by_destination: HashMap<DeviceId, usize>,
}

#[derive(Default)]
pub struct RouteLog {
    forests: DashMap<MessageId, MessageRoutes>,
}

impl RouteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one hop. A device receives a given message at most once, and a
    /// hop count must exceed the hop that brought the message to its source.
    pub fn append(&self, route: MessageRoute) -> RouteResult<()> {
        let mut forest = self.forests.entry(route.message_id.clone()).or_default();

        if forest.by_destination.contains_key(&route.to_device_id) {
            return Err(RouteError::DuplicateDestination {
                message_id: route.message_id,
                device_id: route.to_device_id,
            });
        }

        if let Some(&parent) = forest.by_destination.get(&route.from_device_id) {
            let parent_hop = forest.routes[parent].hop_count;
            if route.hop_count <= parent_hop {
                return Err(RouteError::NonIncreasingHop {
                    device_id: route.to_device_id,
                    hop_count: route.hop_count,
                    parent_hop,
                });
            }
        }

        let index = forest.routes.len();
        forest.by_destination.insert(route.to_device_id.clone(), index);
        forest.routes.push(route);
        Ok(())
    }

    /// All hops of a message ordered by hop count
    pub fn routes_for(&self, message_id: &str) -> Vec<MessageRoute> {
        let mut routes = self
            .forests
            .get(message_id)
            .map(|forest| forest.routes.clone())
            .unwrap_or_default();
        routes.sort_by(|a, b| {
            a.hop_count
                .cmp(&b.hop_count)
                .then(a.timestamp.cmp(&b.timestamp))
        });
        routes
    }

    /// The hop that delivered `message_id` to `device_id`
    pub fn route_into(&self, message_id: &str, device_id: &str) -> Option<MessageRoute> {
        let forest = self.forests.get(message_id)?;
        let index = *forest.by_destination.get(device_id)?;
        Some(forest.routes[index].clone())
    }

    pub fn has_destination(&self, message_id: &str, device_id: &str) -> bool {
        self.forests
            .get(message_id)
            .is_some_and(|forest| forest.by_destination.contains_key(device_id))
    }

    /// Devices that have received the message so far
    pub fn destinations(&self, message_id: &str) -> HashSet<DeviceId> {
        self.forests
            .get(message_id)
            .map(|forest| forest.by_destination.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Hops from `device_id` back to the root, nearest first. Empty when the
    /// device never received the message through a recorded hop.
    pub fn path_to_root(&self, message_id: &str, device_id: &str) -> Vec<MessageRoute> {
        let Some(forest) = self.forests.get(message_id) else {
            return Vec::new();
        };

        let mut path = Vec::new();
        let mut current = device_id.to_string();
        while let Some(&index) = forest.by_destination.get(&current) {
            let route = &forest.routes[index];
            path.push(route.clone());
            // Hop counts strictly decrease toward the root, so this terminates
            // unless the arena was corrupted; bound it anyway.
            if path.len() > forest.routes.len() {
                break;
            }
            current = route.from_device_id.clone();
        }
        path
    }

    pub fn count(&self, message_id: &str) -> usize {
        self.forests
            .get(message_id)
            .map_or(0, |forest| forest.routes.len())
    }

    /// Every recorded hop across all messages
    pub fn all_routes(&self) -> Vec<MessageRoute> {
        self.forests
            .iter()
            .flat_map(|forest| forest.routes.clone())
            .collect()
    }
}
