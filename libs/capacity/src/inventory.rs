//! Derived per-node inventory (`ins_hash` / `bind_hash`).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use svcb_id::{BindingId, InstanceId, NodeId};

/// Instance and binding ids one node holds that nobody has recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanSet {
    pub instance_ids: Vec<InstanceId>,
    pub binding_ids: Vec<BindingId>,
}

impl OrphanSet {
    pub fn is_empty(&self) -> bool {
        self.instance_ids.is_empty() && self.binding_ids.is_empty()
    }
}

/// What each node last reported owning.
///
/// Entries are only ever replaced whole or trimmed by confirmed removals.
/// A node that misses a sweep keeps its previous entry.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    ins_hash: HashMap<NodeId, BTreeSet<InstanceId>>,
    bind_hash: HashMap<NodeId, BTreeSet<BindingId>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite `node_id`'s entry with a fresh report.
    pub fn replace(
        &mut self,
        node_id: NodeId,
        instance_ids: impl IntoIterator<Item = InstanceId>,
        binding_ids: impl IntoIterator<Item = BindingId>,
    ) {
        self.ins_hash
            .insert(node_id, instance_ids.into_iter().collect());
        self.bind_hash
            .insert(node_id, binding_ids.into_iter().collect());
    }

    /// Drop ids a node confirmed as removed.
    pub fn remove(&mut self, node_id: &NodeId, instance_ids: &[InstanceId], binding_ids: &[BindingId]) {
        if let Some(set) = self.ins_hash.get_mut(node_id) {
            for id in instance_ids {
                set.remove(id);
            }
        }
        if let Some(set) = self.bind_hash.get_mut(node_id) {
            for id in binding_ids {
                set.remove(id);
            }
        }
    }

    pub fn instances(&self, node_id: &NodeId) -> Option<&BTreeSet<InstanceId>> {
        self.ins_hash.get(node_id)
    }

    pub fn bindings(&self, node_id: &NodeId) -> Option<&BTreeSet<BindingId>> {
        self.bind_hash.get(node_id)
    }

    /// Which node last reported `instance_id`.
    pub fn owner_of_instance(&self, instance_id: &InstanceId) -> Option<NodeId> {
        self.ins_hash
            .iter()
            .find(|(_, ids)| ids.contains(instance_id))
            .map(|(node_id, _)| *node_id)
    }

    /// Which node last reported `binding_id`.
    pub fn owner_of_binding(&self, binding_id: &BindingId) -> Option<NodeId> {
        self.bind_hash
            .iter()
            .find(|(_, ids)| ids.contains(binding_id))
            .map(|(node_id, _)| *node_id)
    }

    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.ins_hash
            .keys()
            .chain(self.bind_hash.keys())
            .copied()
            .collect()
    }

    pub fn instance_count(&self) -> usize {
        self.ins_hash.values().map(BTreeSet::len).sum()
    }

    pub fn binding_count(&self) -> usize {
        self.bind_hash.values().map(BTreeSet::len).sum()
    }

    /// Reported ids that are not in the known sets, per node.
    ///
    /// Nodes with nothing staged are left out.
    pub fn orphans(
        &self,
        known_instances: &HashSet<InstanceId>,
        known_bindings: &HashSet<BindingId>,
    ) -> BTreeMap<NodeId, OrphanSet> {
        let mut staged = BTreeMap::new();
        for node_id in self.node_ids() {
            let set = OrphanSet {
                instance_ids: self
                    .instances(&node_id)
                    .into_iter()
                    .flatten()
                    .filter(|id| !known_instances.contains(*id))
                    .copied()
                    .collect(),
                binding_ids: self
                    .bindings(&node_id)
                    .into_iter()
                    .flatten()
                    .filter(|id| !known_bindings.contains(*id))
                    .copied()
                    .collect(),
            };
            if !set.is_empty() {
                staged.insert(node_id, set);
            }
        }
        staged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_is_wholesale() {
        let node = NodeId::new();
        let (a, b) = (InstanceId::new(), InstanceId::new());
        let mut inventory = Inventory::new();

        inventory.replace(node, [a, b], []);
        inventory.replace(node, [b], []);

        let instances = inventory.instances(&node).unwrap();
        assert_eq!(instances.len(), 1);
        assert!(instances.contains(&b));
        assert!(inventory.bindings(&node).unwrap().is_empty());
    }

    #[test]
    fn test_empty_report_yields_empty_entry() {
        let node = NodeId::new();
        let mut inventory = Inventory::new();
        inventory.replace(node, [], []);
        assert_eq!(inventory.instances(&node).map(BTreeSet::len), Some(0));
        assert_eq!(inventory.bindings(&node).map(BTreeSet::len), Some(0));
    }

    #[test]
    fn test_remove_only_touches_named_ids() {
        let node = NodeId::new();
        let (a, b) = (InstanceId::new(), InstanceId::new());
        let bind = BindingId::new();
        let mut inventory = Inventory::new();
        inventory.replace(node, [a, b], [bind]);

        inventory.remove(&node, &[a], &[bind]);

        assert_eq!(inventory.instance_count(), 1);
        assert_eq!(inventory.binding_count(), 0);
        assert_eq!(inventory.owner_of_instance(&b), Some(node));
        assert_eq!(inventory.owner_of_instance(&a), None);
    }

    #[test]
    fn test_orphans_exclude_known_ids() {
        let (n1, n2) = (NodeId::new(), NodeId::new());
        let (known, orphan) = (InstanceId::new(), InstanceId::new());
        let bind = BindingId::new();
        let mut inventory = Inventory::new();
        inventory.replace(n1, [known, orphan], [bind]);
        inventory.replace(n2, [], []);

        let staged = inventory.orphans(&HashSet::from([known]), &HashSet::new());

        assert_eq!(staged.len(), 1);
        assert_eq!(staged[&n1].instance_ids, vec![orphan]);
        assert_eq!(staged[&n1].binding_ids, vec![bind]);
    }
}
