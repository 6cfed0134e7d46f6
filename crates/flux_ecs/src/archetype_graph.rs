use crate::archetype::ArchetypeId;
use crate::component::ComponentId;
use std::collections::HashMap;

pub(crate) type ArchetypeSignature = Box<[ComponentId]>;

/// Signature lookup plus cached single-component transitions.
#[derive(Default)]
pub(crate) struct ArchetypeGraph {
    by_signature: HashMap<ArchetypeSignature, ArchetypeId>,
    signatures: Vec<ArchetypeSignature>,
    add_component_edges: HashMap<(ArchetypeId, ComponentId), ArchetypeId>,
    remove_component_edges: HashMap<(ArchetypeId, ComponentId), ArchetypeId>,
}

impl ArchetypeGraph {
    pub fn get(&self, signature: &[ComponentId]) -> Option<ArchetypeId> {
        self.by_signature.get(signature).copied()
    }

    /// Registers a new sorted signature. The caller creates the storage.
    pub fn insert(&mut self, signature: ArchetypeSignature) -> ArchetypeId {
        debug_assert!(!self.by_signature.contains_key(&signature));
        let id = ArchetypeId::new(self.signatures.len());
        self.by_signature.insert(signature.clone(), id);
        self.signatures.push(signature);
        id
    }

    pub fn get_add_edge(&self, start: ArchetypeId, component: ComponentId) -> Option<ArchetypeId> {
        self.add_component_edges.get(&(start, component)).copied()
    }

    pub fn get_remove_edge(&self, start: ArchetypeId, component: ComponentId) -> Option<ArchetypeId> {
        self.remove_component_edges.get(&(start, component)).copied()
    }

    /// Caches `smaller + component = larger` in both directions.
    pub fn cache_edge(&mut self, smaller: ArchetypeId, component: ComponentId, larger: ArchetypeId) {
        self.add_component_edges.insert((smaller, component), larger);
        self.remove_component_edges.insert((larger, component), smaller);
    }

    pub fn get_signature(&self, id: ArchetypeId) -> Option<&ArchetypeSignature> {
        self.signatures.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }
}

/// `signature` with `component` added, kept sorted.
pub(crate) fn signature_with(signature: &[ComponentId], component: ComponentId) -> Option<ArchetypeSignature> {
    let position = signature.binary_search(&component).err()?;
    let mut larger = Vec::with_capacity(signature.len() + 1);
    larger.extend_from_slice(&signature[..position]);
    larger.push(component);
    larger.extend_from_slice(&signature[position..]);
    Some(larger.into())
}

/// `signature` with `component` removed.
pub(crate) fn signature_without(signature: &[ComponentId], component: ComponentId) -> Option<ArchetypeSignature> {
    let position = signature.binary_search(&component).ok()?;
    let mut smaller = Vec::with_capacity(signature.len() - 1);
    smaller.extend_from_slice(&signature[..position]);
    smaller.extend_from_slice(&signature[position + 1..]);
    Some(smaller.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_resolve_to_one_id() {
        let mut graph = ArchetypeGraph::default();
        let empty = graph.insert(Box::new([]));
        let ab = graph.insert(vec![1, 4].into());
        assert_eq!(graph.get(&[]), Some(empty));
        assert_eq!(graph.get(&[1, 4]), Some(ab));
        assert_eq!(graph.get(&[4]), None);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn edges_are_cached_both_ways() {
        let mut graph = ArchetypeGraph::default();
        let a = graph.insert(vec![1].into());
        let ab = graph.insert(vec![1, 2].into());
        graph.cache_edge(a, 2, ab);
        assert_eq!(graph.get_add_edge(a, 2), Some(ab));
        assert_eq!(graph.get_remove_edge(ab, 2), Some(a));
        assert_eq!(graph.get_add_edge(ab, 2), None);
    }

    #[test]
    fn signature_edits_stay_sorted() {
        assert_eq!(signature_with(&[1, 5], 3).as_deref(), Some(&[1, 3, 5][..]));
        assert_eq!(signature_with(&[1, 5], 5), None);
        assert_eq!(signature_without(&[1, 3, 5], 3).as_deref(), Some(&[1, 5][..]));
        assert_eq!(signature_without(&[1, 5], 3), None);
    }
}
