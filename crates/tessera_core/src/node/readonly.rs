//! Read-only node table view.

use super::term::Node;
use super::NodeTable;
use crate::error::{CoreError, CoreResult};
use crate::types::NodeId;
use std::sync::Arc;

/// A node table that refuses to allocate.
///
/// Lookups of nodes that already have ids succeed through
/// [`NodeTable::get_allocate_node_id`], so read paths that call it stay
/// usable.
pub struct NodeTableReadonly {
    inner: Arc<dyn NodeTable>,
}

impl NodeTableReadonly {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn NodeTable>) -> Self {
        Self { inner }
    }
}

impl NodeTable for NodeTableReadonly {
    fn get_allocate_node_id(&self, node: &Node) -> CoreResult<NodeId> {
        self.inner.get_node_id_for_node(node)?.ok_or_else(|| {
            CoreError::invalid_operation(format!("cannot allocate {node} in a read transaction"))
        })
    }

    fn get_node_id_for_node(&self, node: &Node) -> CoreResult<Option<NodeId>> {
        self.inner.get_node_id_for_node(node)
    }

    fn get_node_for_node_id(&self, id: NodeId) -> CoreResult<Option<Node>> {
        self.inner.get_node_for_node_id(id)
    }

    fn alloc_offset(&self) -> CoreResult<NodeId> {
        self.inner.alloc_offset()
    }

    fn all(&self) -> CoreResult<Vec<(NodeId, Node)>> {
        self.inner.all()
    }

    fn sync(&self) -> CoreResult<()> {
        Ok(())
    }
}
