//! Which node owns which instance and binding, as learned from replies.

use std::collections::{HashMap, HashSet};

use svcb_id::{BindingId, InstanceId, NodeId};

#[derive(Debug, Default)]
pub struct HandleTable {
    instances: HashMap<InstanceId, NodeId>,
    bindings: HashMap<BindingId, (InstanceId, NodeId)>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_instance(&mut self, instance_id: InstanceId, node_id: NodeId) {
        self.instances.insert(instance_id, node_id);
    }

    pub fn record_binding(&mut self, binding_id: BindingId, instance_id: InstanceId, node_id: NodeId) {
        self.bindings.insert(binding_id, (instance_id, node_id));
    }

    /// Forget an instance and every binding recorded against it.
    pub fn forget_instance(&mut self, instance_id: &InstanceId) {
        self.instances.remove(instance_id);
        self.bindings.retain(|_, (owner, _)| owner != instance_id);
    }

    pub fn forget_binding(&mut self, binding_id: &BindingId) {
        self.bindings.remove(binding_id);
    }

    pub fn instance_node(&self, instance_id: &InstanceId) -> Option<NodeId> {
        self.instances.get(instance_id).copied()
    }

    pub fn binding_node(&self, binding_id: &BindingId) -> Option<NodeId> {
        self.bindings.get(binding_id).map(|(_, node_id)| *node_id)
    }

    pub fn known_instances(&self) -> HashSet<InstanceId> {
        self.instances.keys().copied().collect()
    }

    pub fn known_bindings(&self) -> HashSet<BindingId> {
        self.bindings.keys().copied().collect()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}
