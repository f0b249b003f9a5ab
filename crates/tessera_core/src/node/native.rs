//! Base node table.

use super::objectfile::ObjectFile;
use super::term::{Node, NodeKey};
use super::NodeTable;
use crate::error::CoreResult;
use crate::types::NodeId;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Default)]
struct NativeIndex {
    by_key: HashMap<NodeKey, NodeId>,
    ids: HashSet<NodeId>,
}

/// The shared node table: one object file record per node.
///
/// A node's id is the offset of its record. The hash index is rebuilt
/// from the file on open.
pub struct NodeTableNative {
    objects: ObjectFile,
    index: RwLock<NativeIndex>,
}

impl NodeTableNative {
    /// Opens the table, indexing every record in `objects`.
    pub fn open(objects: ObjectFile) -> CoreResult<Self> {
        let mut index = NativeIndex::default();
        for (offset, bytes) in objects.records()? {
            let id = NodeId::new(offset);
            // Decode to reject records that are not nodes.
            Node::decode(&bytes)?;
            index.by_key.insert(NodeKey::of_encoded(&bytes), id);
            index.ids.insert(id);
        }
        debug!(file = objects.label(), nodes = index.ids.len(), "node table loaded");
        Ok(Self {
            objects,
            index: RwLock::new(index),
        })
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().ids.len()
    }

    /// True when the table holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every node at or above `offset`.
    ///
    /// Used to undo a prepare that wrote part of a transaction's nodes.
    pub fn truncate_to(&self, offset: NodeId) -> CoreResult<()> {
        let mut index = self.index.write();
        self.objects.truncate(offset.as_u64())?;
        index.by_key.retain(|_, id| *id < offset);
        index.ids.retain(|id| *id < offset);
        Ok(())
    }
}

impl NodeTable for NodeTableNative {
    fn get_allocate_node_id(&self, node: &Node) -> CoreResult<NodeId> {
        let encoded = node.encode();
        let key = NodeKey::of_encoded(&encoded);
        if let Some(id) = self.index.read().by_key.get(&key) {
            return Ok(*id);
        }
        let mut index = self.index.write();
        if let Some(id) = index.by_key.get(&key) {
            return Ok(*id);
        }
        let id = NodeId::new(self.objects.write(&encoded)?);
        index.by_key.insert(key, id);
        index.ids.insert(id);
        Ok(id)
    }

    fn get_node_id_for_node(&self, node: &Node) -> CoreResult<Option<NodeId>> {
        Ok(self.index.read().by_key.get(&node.hash_key()).copied())
    }

    fn get_node_for_node_id(&self, id: NodeId) -> CoreResult<Option<Node>> {
        if !self.index.read().ids.contains(&id) {
            return Ok(None);
        }
        Ok(Some(Node::decode(&self.objects.read(id.as_u64())?)?))
    }

    fn alloc_offset(&self) -> CoreResult<NodeId> {
        Ok(NodeId::new(self.objects.len()?))
    }

    fn all(&self) -> CoreResult<Vec<(NodeId, Node)>> {
        self.objects
            .records()?
            .into_iter()
            .map(|(offset, bytes)| Ok((NodeId::new(offset), Node::decode(&bytes)?)))
            .collect()
    }

    fn sync(&self) -> CoreResult<()> {
        self.objects.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_storage::InMemoryBackend;

    fn table(backend: InMemoryBackend) -> NodeTableNative {
        NodeTableNative::open(ObjectFile::open("nodes", Box::new(backend)).unwrap()).unwrap()
    }

    #[test]
    fn allocation_is_idempotent() {
        let nodes = table(InMemoryBackend::new());
        let a = nodes.get_allocate_node_id(&Node::uri("ex:a")).unwrap();
        let b = nodes.get_allocate_node_id(&Node::uri("ex:b")).unwrap();
        assert_ne!(a, b);
        assert_eq!(nodes.get_allocate_node_id(&Node::uri("ex:a")).unwrap(), a);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.get_node_for_node_id(b).unwrap(), Some(Node::uri("ex:b")));
    }

    #[test]
    fn unknown_lookups_are_none() {
        let nodes = table(InMemoryBackend::new());
        let a = nodes.get_allocate_node_id(&Node::literal("x")).unwrap();
        assert_eq!(nodes.get_node_id_for_node(&Node::literal("y")).unwrap(), None);
        assert_eq!(nodes.get_node_for_node_id(NodeId::new(a.as_u64() + 1)).unwrap(), None);
        assert!(!nodes.contains_node_id(NodeId::new(999)).unwrap());
    }

    #[test]
    fn reopen_rebuilds_index() {
        let backend = InMemoryBackend::new();
        let id = {
            let nodes = table(backend.clone());
            nodes.get_allocate_node_id(&Node::uri("ex:a")).unwrap();
            nodes.get_allocate_node_id(&Node::integer(7)).unwrap()
        };
        let nodes = table(backend);
        assert_eq!(nodes.get_node_id_for_node(&Node::integer(7)).unwrap(), Some(id));
        assert_eq!(nodes.all().unwrap().len(), 2);
    }

    #[test]
    fn truncate_forgets_later_nodes() {
        let nodes = table(InMemoryBackend::new());
        nodes.get_allocate_node_id(&Node::uri("keep")).unwrap();
        let mark = nodes.alloc_offset().unwrap();
        nodes.get_allocate_node_id(&Node::uri("drop")).unwrap();

        nodes.truncate_to(mark).unwrap();
        assert!(!nodes.contains_node(&Node::uri("drop")).unwrap());
        assert!(nodes.contains_node(&Node::uri("keep")).unwrap());
        assert_eq!(nodes.alloc_offset().unwrap(), mark);
    }
}
