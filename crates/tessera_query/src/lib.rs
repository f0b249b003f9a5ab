//! # Tessera Query
//!
//! Lazy, pull-based query iterators over Tessera datasets.
//!
//! Rows are [`Binding`]s from variables to graph nodes. Operators compose
//! into trees of [`QueryIterator`]s; closing or cancelling the root closes
//! every iterator beneath it. Basic graph patterns over a transaction are
//! built with [`bgp`].
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_core::{Node, TxnType};
//! use tessera_query::{bgp, collect_rows, PatternTerm, Plain, TriplePattern};
//!
//! let txn = Arc::new(dataset.begin(TxnType::Read)?);
//! let pattern = TriplePattern::new(PatternTerm::var("s"), Node::uri("ex:knows"), PatternTerm::var("o"));
//! let rows = collect_rows(bgp(txn.clone(), vec![pattern], Plain::root().boxed()))?;
//! txn.commit()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binding;
mod config;
mod error;
pub mod iter;
mod pattern;
mod spill;

pub use binding::{compare_values, Binding, Var};
pub use config::ExecConfig;
pub use error::{QueryError, QueryResult};
pub use iter::{collect_rows, explain, BoxIter, QueryIterator, Rows};
pub use iter::{
    Aggregate, AntiJoin, AntiRule, CancelMode, CancelSignal, Concat, Convert, Deferred, Difference,
    Direction, Distinct, Extend, Filter, Group, IterLogic, IterState, JoinCondition, LeftJoin, Minus,
    NestedLoopJoin, Plain, Project, QueryIter, Reduced, RepeatApply, Slice, Sort, SortCondition, TopN,
};
pub use pattern::{bgp, GraphSource, MemoryGraph, PatternStage, PatternTerm, StatementIter, TriplePattern};
