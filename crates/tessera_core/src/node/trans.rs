//! Transactional node table view.

use super::native::NodeTableNative;
use super::objectfile::ObjectFile;
use super::term::{Node, NodeKey};
use super::NodeTable;
use crate::error::{CoreError, CoreResult};
use crate::transaction::{Transaction, TransactionLifecycle};
use crate::types::NodeId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default)]
struct TransState {
    alloc_offset: u64,
    index: HashMap<NodeKey, NodeId>,
    ids: HashSet<NodeId>,
    writable: bool,
    passthrough: bool,
    base_written: bool,
}

/// A write transaction's view of the base node table.
///
/// New nodes go to a private delta object file. A delta record at offset
/// `p` gets id `alloc_offset + p`, where `alloc_offset` is the base's
/// length when the transaction began. Since the base only grows by this
/// transaction's own prepare, those ids are exactly what the base will
/// assign when the delta is copied over.
///
/// The copy happens at prepare: the base is append-only, so writing early
/// leaves at worst unreferenced records behind, and enact has nothing to do.
pub struct NodeTableTrans {
    base: Arc<NodeTableNative>,
    delta: Arc<ObjectFile>,
    state: Mutex<TransState>,
}

impl NodeTableTrans {
    /// Creates a view over `base` using `delta` as its private area.
    #[must_use]
    pub fn new(base: Arc<NodeTableNative>, delta: Arc<ObjectFile>) -> Self {
        Self {
            base,
            delta,
            state: Mutex::new(TransState {
                passthrough: true,
                ..TransState::default()
            }),
        }
    }

    /// Nodes allocated privately by this transaction.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().ids.len()
    }

    fn write_delta_to_base(&self, state: &mut TransState) -> CoreResult<usize> {
        let records = self.delta.records()?;
        state.base_written = true;
        for (position, bytes) in &records {
            let node = Node::decode(bytes)?;
            let expected = NodeId::new(state.alloc_offset + position);
            let actual = self.base.get_allocate_node_id(&node)?;
            if actual != expected {
                return Err(CoreError::inconsistent(format!(
                    "node {node} was expected at {expected} but the base assigned {actual}"
                )));
            }
        }
        self.base.sync()?;
        Ok(records.len())
    }
}

impl NodeTable for NodeTableTrans {
    fn get_allocate_node_id(&self, node: &Node) -> CoreResult<NodeId> {
        let mut state = self.state.lock();
        if !state.writable {
            return Err(CoreError::invalid_operation(
                "node allocation outside an active write transaction",
            ));
        }
        let encoded = node.encode();
        let key = NodeKey::of_encoded(&encoded);
        if let Some(id) = state.index.get(&key) {
            return Ok(*id);
        }
        if let Some(id) = self.base.get_node_id_for_node(node)? {
            return Ok(id);
        }
        let id = NodeId::new(state.alloc_offset + self.delta.write(&encoded)?);
        state.index.insert(key, id);
        state.ids.insert(id);
        Ok(id)
    }

    fn get_node_id_for_node(&self, node: &Node) -> CoreResult<Option<NodeId>> {
        if let Some(id) = self.state.lock().index.get(&node.hash_key()) {
            return Ok(Some(*id));
        }
        self.base.get_node_id_for_node(node)
    }

    fn get_node_for_node_id(&self, id: NodeId) -> CoreResult<Option<Node>> {
        let state = self.state.lock();
        if state.passthrough || id.as_u64() < state.alloc_offset {
            drop(state);
            return self.base.get_node_for_node_id(id);
        }
        if !state.ids.contains(&id) {
            return Ok(None);
        }
        let bytes = self.delta.read(id.as_u64() - state.alloc_offset)?;
        Ok(Some(Node::decode(&bytes)?))
    }

    fn alloc_offset(&self) -> CoreResult<NodeId> {
        let state = self.state.lock();
        if state.passthrough {
            drop(state);
            return self.base.alloc_offset();
        }
        Ok(NodeId::new(state.alloc_offset + self.delta.len()?))
    }

    fn all(&self) -> CoreResult<Vec<(NodeId, Node)>> {
        let mut all = self.base.all()?;
        let state = self.state.lock();
        if !state.passthrough {
            for (position, bytes) in self.delta.records()? {
                all.push((NodeId::new(state.alloc_offset + position), Node::decode(&bytes)?));
            }
        }
        Ok(all)
    }

    fn sync(&self) -> CoreResult<()> {
        Ok(())
    }
}

impl TransactionLifecycle for NodeTableTrans {
    fn name(&self) -> String {
        format!("nodes({})", self.delta.label())
    }

    fn begin(&self, txn: &Transaction) -> CoreResult<()> {
        let mut state = self.state.lock();
        if !self.delta.is_empty()? {
            warn!(txn = %txn.id(), "node delta not empty at begin; discarding");
            self.delta.truncate(0)?;
        }
        *state = TransState {
            alloc_offset: self.base.alloc_offset()?.as_u64(),
            writable: true,
            ..TransState::default()
        };
        Ok(())
    }

    fn abort(&self, txn: &Transaction) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.base_written {
            debug!(txn = %txn.id(), offset = state.alloc_offset, "rolling back nodes written during prepare");
            self.base.truncate_to(NodeId::new(state.alloc_offset))?;
            self.base.sync()?;
        }
        self.delta.truncate(0)?;
        let alloc_offset = state.alloc_offset;
        *state = TransState {
            alloc_offset,
            passthrough: true,
            ..TransState::default()
        };
        Ok(())
    }

    fn commit_prepare(&self, txn: &Transaction) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.writable = false;
        let written = self.write_delta_to_base(&mut state)?;
        self.delta.truncate(0)?;
        state.index.clear();
        state.ids.clear();
        state.passthrough = true;
        debug!(txn = %txn.id(), nodes = written, "node delta written to base");
        Ok(())
    }

    fn commit_enact(&self, _txn: &Transaction) -> CoreResult<()> {
        Ok(())
    }

    fn commit_clearup(&self, _txn: &Transaction) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.index.clear();
        state.ids.clear();
        state.writable = false;
        state.passthrough = true;
        state.base_written = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_storage::InMemoryBackend;

    struct Fixture {
        base: Arc<NodeTableNative>,
        base_bytes: InMemoryBackend,
        trans: NodeTableTrans,
    }

    fn fixture() -> Fixture {
        let base_bytes = InMemoryBackend::new();
        let base = Arc::new(
            NodeTableNative::open(ObjectFile::open("nodes", Box::new(base_bytes.clone())).unwrap())
                .unwrap(),
        );
        base.get_allocate_node_id(&Node::uri("ex:existing")).unwrap();
        let delta = Arc::new(ObjectFile::open("delta", Box::new(InMemoryBackend::new())).unwrap());
        let trans = NodeTableTrans::new(Arc::clone(&base), delta);
        trans.begin(&Transaction::detached_for_tests()).unwrap();
        Fixture {
            base,
            base_bytes,
            trans,
        }
    }

    #[test]
    fn new_ids_start_at_base_high_water_mark() {
        let f = fixture();
        let offset = f.base.alloc_offset().unwrap();
        let id = f.trans.get_allocate_node_id(&Node::uri("ex:a")).unwrap();
        assert_eq!(id, offset);
        assert_eq!(f.trans.get_node_for_node_id(id).unwrap(), Some(Node::uri("ex:a")));
        assert!(!f.base.contains_node(&Node::uri("ex:a")).unwrap());
    }

    #[test]
    fn existing_base_nodes_keep_their_ids() {
        let f = fixture();
        let base_id = f.base.get_node_id_for_node(&Node::uri("ex:existing")).unwrap();
        let id = f.trans.get_allocate_node_id(&Node::uri("ex:existing")).unwrap();
        assert_eq!(Some(id), base_id);
        assert_eq!(f.trans.pending(), 0);
    }

    #[test]
    fn prepare_copies_delta_with_same_ids() {
        let f = fixture();
        let a = f.trans.get_allocate_node_id(&Node::uri("ex:a")).unwrap();
        let b = f.trans.get_allocate_node_id(&Node::literal("b")).unwrap();

        f.trans.commit_prepare(&Transaction::detached_for_tests()).unwrap();

        assert_eq!(f.base.get_node_id_for_node(&Node::uri("ex:a")).unwrap(), Some(a));
        assert_eq!(f.base.get_node_id_for_node(&Node::literal("b")).unwrap(), Some(b));
        assert_eq!(f.trans.get_node_for_node_id(b).unwrap(), Some(Node::literal("b")));
    }

    #[test]
    fn abort_leaves_base_unchanged() {
        let f = fixture();
        let before = f.base_bytes.data();
        f.trans.get_allocate_node_id(&Node::uri("ex:a")).unwrap();
        f.trans.abort(&Transaction::detached_for_tests()).unwrap();
        assert_eq!(f.base_bytes.data(), before);
        assert!(f.trans.get_allocate_node_id(&Node::uri("ex:b")).is_err());
    }

    #[test]
    fn abort_after_prepare_rolls_base_back() {
        let f = fixture();
        let before = f.base_bytes.data();
        f.trans.get_allocate_node_id(&Node::uri("ex:a")).unwrap();
        let txn = Transaction::detached_for_tests();
        f.trans.commit_prepare(&txn).unwrap();
        f.trans.abort(&txn).unwrap();
        assert_eq!(f.base_bytes.data(), before);
        assert!(!f.base.contains_node(&Node::uri("ex:a")).unwrap());
    }

    #[test]
    fn concurrent_base_growth_is_detected() {
        let f = fixture();
        f.trans.get_allocate_node_id(&Node::uri("ex:a")).unwrap();
        // Something other than this transaction appended to the base.
        f.base.get_allocate_node_id(&Node::uri("ex:intruder")).unwrap();

        let err = f.trans.commit_prepare(&Transaction::detached_for_tests()).unwrap_err();
        assert!(matches!(err, CoreError::Inconsistent { .. }));
    }

    #[test]
    fn all_includes_delta() {
        let f = fixture();
        f.trans.get_allocate_node_id(&Node::blank("b1")).unwrap();
        let all = f.trans.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].1, Node::blank("b1"));
    }
}
