//! Transaction-scoped dataset view.

use crate::error::{CoreError, CoreResult};
use crate::node::{Node, NodeTable};
use crate::store::{Triple, TripleIter, TripleTable};
use crate::transaction::{IteratorHandle, Transaction, TransactionManager};
use crate::types::{NodeId, ReadWrite, TxnId, TxnType};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// A triple of nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Statement {
    /// Subject.
    pub subject: Node,
    /// Predicate.
    pub predicate: Node,
    /// Object.
    pub object: Node,
}

impl Statement {
    /// Creates a statement.
    #[must_use]
    pub fn new(subject: Node, predicate: Node, object: Node) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// An iterator registered with its transaction.
///
/// When the transaction ends while the iterator is still open, the next
/// call yields an error and iteration stops.
pub struct TrackedIter<I> {
    inner: I,
    handle: Arc<IteratorHandle>,
    done: bool,
}

impl<I> TrackedIter<I> {
    fn new(inner: I, txn: &Transaction) -> Self {
        let handle = IteratorHandle::new();
        txn.track_iterator(&handle);
        Self {
            inner,
            handle,
            done: false,
        }
    }

    /// The cancellation handle.
    #[must_use]
    pub fn handle(&self) -> &Arc<IteratorHandle> {
        &self.handle
    }

    fn finish(&mut self) {
        self.done = true;
        self.handle.mark_finished();
    }
}

impl<I, T> Iterator for TrackedIter<I>
where
    I: Iterator<Item = CoreResult<T>>,
{
    type Item = CoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.handle.is_cancelled() {
            self.finish();
            return Some(Err(CoreError::invalid_operation(
                "iterator used after its transaction finished",
            )));
        }
        match self.inner.next() {
            Some(item) => Some(item),
            None => {
                self.finish();
                None
            }
        }
    }
}

impl<I> Drop for TrackedIter<I> {
    fn drop(&mut self) {
        self.handle.mark_finished();
    }
}

/// Matches of a node pattern, resolved back to nodes.
pub struct Statements {
    ids: Option<TrackedIter<TripleIter>>,
    nodes: Arc<dyn NodeTable>,
}

impl Statements {
    fn resolve(&self, id: NodeId) -> CoreResult<Node> {
        self.nodes
            .get_node_for_node_id(id)?
            .ok_or_else(|| CoreError::inconsistent(format!("triple refers to unknown node {id}")))
    }
}

impl Iterator for Statements {
    type Item = CoreResult<Statement>;

    fn next(&mut self) -> Option<Self::Item> {
        let triple = match self.ids.as_mut()?.next()? {
            Ok(triple) => triple,
            Err(e) => return Some(Err(e)),
        };
        let statement = self.resolve(triple.s).and_then(|s| {
            Ok(Statement::new(s, self.resolve(triple.p)?, self.resolve(triple.o)?))
        });
        Some(statement)
    }
}

/// A dataset as seen by one transaction.
///
/// Reads see the transaction's snapshot plus, for a writer, its own
/// changes. Dropping the handle closes the transaction; a writer that
/// was neither committed nor aborted is aborted.
pub struct DatasetGraphTxn {
    manager: Arc<TransactionManager>,
    txn: Arc<Transaction>,
}

impl DatasetGraphTxn {
    pub(crate) fn new(manager: Arc<TransactionManager>, txn: Arc<Transaction>) -> Self {
        Self { manager, txn }
    }

    /// The underlying transaction.
    #[must_use]
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.txn
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.txn.id()
    }

    /// Transaction type.
    #[must_use]
    pub fn txn_type(&self) -> TxnType {
        self.txn.txn_type()
    }

    /// Read or write.
    #[must_use]
    pub fn mode(&self) -> ReadWrite {
        self.txn.mode()
    }

    /// True while the transaction can be used.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.txn.is_active()
    }

    /// The node table of this view.
    #[must_use]
    pub fn nodes(&self) -> &Arc<dyn NodeTable> {
        self.txn.view().nodes()
    }

    /// The triple table of this view.
    #[must_use]
    pub fn triples(&self) -> &TripleTable {
        self.txn.view().triples()
    }

    /// Number of triples.
    pub fn len(&self) -> CoreResult<u64> {
        self.txn.check_active()?;
        Ok(self.triples().len())
    }

    /// True when the view holds no triples.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Id of a node, if the view knows it.
    pub fn node_id(&self, node: &Node) -> CoreResult<Option<NodeId>> {
        self.txn.check_active()?;
        self.nodes().get_node_id_for_node(node)
    }

    /// Node for an id, if the view knows it.
    pub fn node(&self, id: NodeId) -> CoreResult<Option<Node>> {
        self.txn.check_active()?;
        self.nodes().get_node_for_node_id(id)
    }

    /// Lazily scans triple ids matching a pattern; `None` matches anything.
    pub fn find_ids(
        &self,
        s: Option<NodeId>,
        p: Option<NodeId>,
        o: Option<NodeId>,
    ) -> CoreResult<TrackedIter<TripleIter>> {
        self.txn.check_active()?;
        Ok(TrackedIter::new(self.triples().find(s, p, o), &self.txn))
    }

    /// Lazily scans triples matching a node pattern.
    ///
    /// A node the view has never seen matches nothing.
    pub fn find(
        &self,
        s: Option<&Node>,
        p: Option<&Node>,
        o: Option<&Node>,
    ) -> CoreResult<Statements> {
        self.txn.check_active()?;
        let nodes = Arc::clone(self.nodes());
        let (Some(s), Some(p), Some(o)) = (self.lookup(s)?, self.lookup(p)?, self.lookup(o)?) else {
            return Ok(Statements { ids: None, nodes });
        };
        Ok(Statements {
            ids: Some(self.find_ids(s, p, o)?),
            nodes,
        })
    }

    /// Resolves an optional pattern slot; the outer `None` means "no match".
    fn lookup(&self, node: Option<&Node>) -> CoreResult<Option<Option<NodeId>>> {
        match node {
            None => Ok(Some(None)),
            Some(node) => Ok(self.nodes().get_node_id_for_node(node)?.map(Some)),
        }
    }

    /// True if the triple is present.
    pub fn contains(&self, s: &Node, p: &Node, o: &Node) -> CoreResult<bool> {
        self.txn.check_active()?;
        match self.ids_of(s, p, o)? {
            Some(triple) => self.triples().contains(&triple),
            None => Ok(false),
        }
    }

    /// Adds a triple. Returns false if it was already present.
    pub fn add(&self, s: &Node, p: &Node, o: &Node) -> CoreResult<bool> {
        self.txn.check_writable()?;
        let nodes = self.nodes();
        let triple = Triple::new(
            nodes.get_allocate_node_id(s)?,
            nodes.get_allocate_node_id(p)?,
            nodes.get_allocate_node_id(o)?,
        );
        self.triples().add(triple)
    }

    /// Adds a statement.
    pub fn add_statement(&self, statement: &Statement) -> CoreResult<bool> {
        self.add(&statement.subject, &statement.predicate, &statement.object)
    }

    /// Deletes a triple. Returns false if it was not present.
    pub fn delete(&self, s: &Node, p: &Node, o: &Node) -> CoreResult<bool> {
        self.txn.check_writable()?;
        match self.ids_of(s, p, o)? {
            Some(triple) => self.triples().delete(&triple),
            None => Ok(false),
        }
    }

    fn ids_of(&self, s: &Node, p: &Node, o: &Node) -> CoreResult<Option<Triple>> {
        let nodes = self.nodes();
        let (Some(s), Some(p), Some(o)) = (
            nodes.get_node_id_for_node(s)?,
            nodes.get_node_id_for_node(p)?,
            nodes.get_node_id_for_node(o)?,
        ) else {
            return Ok(None);
        };
        Ok(Some(Triple::new(s, p, o)))
    }

    /// Commits the transaction.
    pub fn commit(&self) -> CoreResult<()> {
        self.manager.commit(&self.txn)
    }

    /// Aborts the transaction.
    pub fn abort(&self) -> CoreResult<()> {
        self.manager.abort(&self.txn)
    }

    /// Closes the transaction. Also done on drop.
    pub fn close(&self) -> CoreResult<()> {
        self.manager.close(&self.txn)
    }

    /// Promotes a promotable read transaction to a write transaction.
    ///
    /// Returns false, leaving the handle a reader, when the promotion was
    /// refused because another writer committed first.
    pub fn promote(&mut self) -> CoreResult<bool> {
        match self.manager.promote(&self.txn)? {
            Some(promoted) => {
                self.txn = promoted;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl fmt::Debug for DatasetGraphTxn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetGraphTxn")
            .field("txn", &self.txn)
            .finish_non_exhaustive()
    }
}

impl Drop for DatasetGraphTxn {
    fn drop(&mut self) {
        if let Err(e) = self.manager.close(&self.txn) {
            warn!(txn = %self.txn.id(), error = %e, "closing transaction on drop failed");
        }
    }
}
