use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::handler::DuplexHandler;

/// A link taken out of a [`HandleSet`].
pub struct RemovedLink {
    pub handler: Arc<DuplexHandler>,
    /// The device this link was still serving. `None` if it never greeted or
    /// a newer link had already taken the name over.
    pub device: Option<String>,
}

#[derive(Default)]
struct Directory {
    links: HashMap<String, Arc<DuplexHandler>>,
    /// Device name to the link id currently serving it.
    devices: HashMap<String, String>,
}

/// Live server-side connections, indexed by link id and by device name.
///
/// Both maps sit under one lock so a lookup by device never observes a link
/// that has already been removed.
#[derive(Default)]
pub struct HandleSet {
    inner: RwLock<Directory>,
}

impl HandleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handler: Arc<DuplexHandler>) {
        let mut dir = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        dir.links.insert(handler.link_id().to_string(), handler);
    }

    /// Route `device` to `link_id`.
    ///
    /// Returns the handler that served the device before, if it was a
    /// different link. The caller is expected to stop it.
    pub fn bind_device(&self, device: &str, link_id: &str) -> Option<Arc<DuplexHandler>> {
        let mut dir = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = dir
            .devices
            .insert(device.to_string(), link_id.to_string())?;
        if previous == link_id {
            return None;
        }
        dir.links.get(&previous).cloned()
    }

    /// Drop a link. The device mapping goes too, unless it already points at
    /// a newer link.
    pub fn remove(&self, link_id: &str) -> Option<RemovedLink> {
        let mut dir = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let handler = dir.links.remove(link_id)?;
        let device = handler
            .device_name()
            .filter(|device| dir.devices.get(device).is_some_and(|current| current == link_id));
        if let Some(device) = &device {
            dir.devices.remove(device);
        }
        Some(RemovedLink { handler, device })
    }

    pub fn by_device(&self, device: &str) -> Option<Arc<DuplexHandler>> {
        let dir = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        dir.devices
            .get(device)
            .and_then(|link_id| dir.links.get(link_id))
            .cloned()
    }

    pub fn by_link(&self, link_id: &str) -> Option<Arc<DuplexHandler>> {
        let dir = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        dir.links.get(link_id).cloned()
    }

    /// Names of attached devices, sorted.
    pub fn devices(&self) -> Vec<String> {
        let dir = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = dir.devices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of live links, attached or not.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .links
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handlers(&self) -> Vec<Arc<DuplexHandler>> {
        let dir = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        dir.links.values().cloned().collect()
    }

    pub fn clear(&self) {
        let mut dir = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        dir.links.clear();
        dir.devices.clear();
    }
}
