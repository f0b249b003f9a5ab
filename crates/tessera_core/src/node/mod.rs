//! Node tables: the dictionary between graph terms and [`NodeId`]s.
//!
//! [`NodeTableNative`] is the shared base, an append-only object file plus
//! an in-memory hash index. A write transaction sees it through a
//! [`NodeTableTrans`], which allocates new ids in a private delta above
//! the base's high-water mark.

mod native;
mod objectfile;
mod readonly;
mod term;
mod trans;

pub use native::NodeTableNative;
pub use objectfile::ObjectFile;
pub use readonly::NodeTableReadonly;
pub use term::{LiteralKind, Node, NodeKey, XSD_DECIMAL, XSD_DOUBLE, XSD_INTEGER, XSD_STRING};
pub use trans::NodeTableTrans;

use crate::error::CoreResult;
use crate::types::NodeId;

/// Two-way mapping between nodes and ids.
pub trait NodeTable: Send + Sync {
    /// Returns the id for `node`, allocating one if needed.
    fn get_allocate_node_id(&self, node: &Node) -> CoreResult<NodeId>;

    /// Returns the id for `node`, if it has one.
    fn get_node_id_for_node(&self, node: &Node) -> CoreResult<Option<NodeId>>;

    /// Returns the node for `id`, if `id` names one.
    fn get_node_for_node_id(&self, id: NodeId) -> CoreResult<Option<Node>>;

    /// The id the next allocation would receive.
    fn alloc_offset(&self) -> CoreResult<NodeId>;

    /// Every `(id, node)` pair in id order.
    fn all(&self) -> CoreResult<Vec<(NodeId, Node)>>;

    /// Whether `node` has an id.
    fn contains_node(&self, node: &Node) -> CoreResult<bool> {
        Ok(self.get_node_id_for_node(node)?.is_some())
    }

    /// Whether `id` names a node.
    fn contains_node_id(&self, id: NodeId) -> CoreResult<bool> {
        Ok(self.get_node_for_node_id(id)?.is_some())
    }

    /// Forces allocated nodes to stable storage.
    fn sync(&self) -> CoreResult<()>;
}
