//! Per-participant interface handle registry.
//!
//! Every publication, input, endpoint and filter a participant owns gets one dense
//! [`InterfaceHandle`], allocated here. The Core keeps two instances of this registry: one the
//! API-thread path reads from to validate calls before they reach the processing task, one owned
//! exclusively by the processing task. They are never shared; the API thread's copy is refreshed
//! by replaying `REG_*`/`NOTIFY_*` commands through the same queue everything else uses, so there
//! is no point at which both copies are mutated concurrently.

use cosim_core::{GlobalFederateId, GlobalHandle, InterfaceHandle, LocalFederateId};
use cosim_tinymap::{TinyMap, TinySecondaryMap};
use std::collections::HashMap;

/// What kind of interface a handle names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Publication,
    Input,
    Endpoint,
    Filter,
}

/// Per-option flags a handle can carry, set via `setOption`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandleOptions {
    pub required: bool,
    pub cloning: bool,
    pub has_source_filter: bool,
    pub has_dest_filter: bool,
    pub only_transmit_on_change: bool,
    pub only_update_on_change: bool,
}

/// Metadata describing one registered interface.
#[derive(Debug, Clone)]
pub struct HandleInfo {
    pub global: GlobalHandle,
    pub owner: LocalFederateId,
    pub kind: HandleKind,
    pub key: String,
    pub interface_type: String,
    pub units: String,
    /// Declared output type; meaningful for filters only.
    pub output_type: String,
    pub options: HandleOptions,
    pub used: bool,
    pub disconnected: bool,
}

impl HandleInfo {
    fn new(
        global: GlobalHandle,
        owner: LocalFederateId,
        kind: HandleKind,
        key: impl Into<String>,
        interface_type: impl Into<String>,
        units: impl Into<String>,
    ) -> Self {
        Self {
            global,
            owner,
            kind,
            key: key.into(),
            interface_type: interface_type.into(),
            units: units.into(),
            output_type: String::new(),
            options: HandleOptions::default(),
            used: false,
            disconnected: false,
        }
    }
}

/// Dense registry of every interface a participant has registered, plus by-name and by-global
/// indexes for resolution.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    handles: TinyMap<InterfaceHandle, HandleInfo>,
    by_name: HashMap<(HandleKind, String), InterfaceHandle>,
    by_global: HashMap<GlobalHandle, InterfaceHandle>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new handle for `owner`. Handle ids are assigned densely and are never reused.
    pub fn add_handle(
        &mut self,
        owner: LocalFederateId,
        federate_global_id: GlobalFederateId,
        kind: HandleKind,
        key: impl Into<String>,
        interface_type: impl Into<String>,
        units: impl Into<String>,
    ) -> InterfaceHandle {
        let key = key.into();
        let interface_type = interface_type.into();
        let units = units.into();
        let handle = self.handles.insert_with_key(|handle| {
            let global = GlobalHandle::new(federate_global_id, handle);
            HandleInfo::new(global, owner, kind, key.clone(), interface_type, units)
        });
        self.by_name.insert((kind, key), handle);
        self.by_global
            .insert(self.handles[handle].global, handle);
        handle
    }

    pub fn get(&self, handle: InterfaceHandle) -> Option<&HandleInfo> {
        self.handles.get(handle)
    }

    pub fn get_mut(&mut self, handle: InterfaceHandle) -> Option<&mut HandleInfo> {
        self.handles.get_mut(handle)
    }

    /// Resolves a handle by (kind, key) -- local name resolution.
    pub fn find(&self, kind: HandleKind, key: &str) -> Option<InterfaceHandle> {
        self.by_name.get(&(kind, key.to_string())).copied()
    }

    /// Resolves a handle by its cross-participant [`GlobalHandle`].
    pub fn find_global(&self, global: GlobalHandle) -> Option<InterfaceHandle> {
        self.by_global.get(&global).copied()
    }

    pub fn set_option(&mut self, handle: InterfaceHandle, f: impl FnOnce(&mut HandleOptions)) {
        if let Some(info) = self.handles.get_mut(handle) {
            f(&mut info.options);
        }
    }

    pub fn mark_used(&mut self, handle: InterfaceHandle) {
        if let Some(info) = self.handles.get_mut(handle) {
            info.used = true;
        }
    }

    /// Marks a handle disconnected. Idempotent: disconnecting twice has no further effect.
    pub fn mark_disconnected(&mut self, handle: InterfaceHandle) {
        if let Some(info) = self.handles.get_mut(handle) {
            info.disconnected = true;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (InterfaceHandle, &HandleInfo)> {
        self.handles.iter()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Per-handle targets resolved during registration (subscribers of a publication, the publisher
/// feeding an input, filter chains on an endpoint, ...). Kept separate from [`HandleInfo`]
/// because targets are sparse and accumulate after the handle itself is created.
#[derive(Debug, Default)]
pub struct HandleTargets {
    targets: TinySecondaryMap<InterfaceHandle, Vec<GlobalHandle>>,
}

impl HandleTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handle: InterfaceHandle, target: GlobalHandle) {
        match self.targets.get_mut(handle) {
            Some(list) => {
                if !list.contains(&target) {
                    list.push(target);
                }
            }
            None => {
                self.targets.insert(handle, vec![target]);
            }
        }
    }

    pub fn remove(&mut self, handle: InterfaceHandle, target: GlobalHandle) {
        if let Some(list) = self.targets.get_mut(handle) {
            list.retain(|t| *t != target);
        }
    }

    pub fn get(&self, handle: InterfaceHandle) -> &[GlobalHandle] {
        self.targets.get(handle).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosim_core::LocalFederateId;

    #[test]
    fn add_and_resolve_by_name() {
        let mut reg = HandleRegistry::new();
        let fed = GlobalFederateId::new_federate(LocalFederateId::from(0usize));
        let h = reg.add_handle(
            LocalFederateId::from(0usize),
            fed,
            HandleKind::Publication,
            "x",
            "double",
            "",
        );
        assert_eq!(reg.find(HandleKind::Publication, "x"), Some(h));
        assert!(reg.find(HandleKind::Input, "x").is_none());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut reg = HandleRegistry::new();
        let fed = GlobalFederateId::new_federate(LocalFederateId::from(0usize));
        let h = reg.add_handle(
            LocalFederateId::from(0usize),
            fed,
            HandleKind::Endpoint,
            "e",
            "",
            "",
        );
        reg.mark_disconnected(h);
        reg.mark_disconnected(h);
        assert!(reg.get(h).unwrap().disconnected);
    }

    #[test]
    fn targets_deduplicate() {
        let mut targets = HandleTargets::new();
        let h = InterfaceHandle::from(0usize);
        let t = GlobalHandle::new(GlobalFederateId::from(5), InterfaceHandle::from(1usize));
        targets.add(h, t);
        targets.add(h, t);
        assert_eq!(targets.get(h).len(), 1);
    }
}
