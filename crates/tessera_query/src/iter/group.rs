//! Grouping and aggregation.

use super::base::{IterLogic, QueryIter};
use super::cancel::CancelSignal;
use super::{pull, BoxIter, QueryIterator};
use crate::binding::{compare_values, Binding, Var};
use crate::error::{QueryError, QueryResult};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tessera_core::Node;
use tracing::trace;

/// An aggregate function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregate {
    /// Number of rows.
    Count,
    /// Number of rows binding the variable.
    CountVar(Var),
    /// Number of distinct values of the variable.
    CountDistinct(Var),
    /// Numeric sum. Unbound if any value is not a number.
    Sum(Var),
    /// Smallest value.
    Min(Var),
    /// Largest value.
    Max(Var),
    /// Any one value (the first seen).
    Sample(Var),
    /// Lexical forms joined by a separator.
    GroupConcat {
        /// Variable to concatenate.
        var: Var,
        /// Separator.
        separator: String,
    },
}

impl Aggregate {
    fn accumulator(&self) -> Accumulator {
        match self {
            Self::Count | Self::CountVar(_) => Accumulator::Count(0),
            Self::CountDistinct(_) => Accumulator::Distinct(HashSet::new()),
            Self::Sum(_) => Accumulator::Sum(Sum::default()),
            Self::Min(_) | Self::Max(_) | Self::Sample(_) => Accumulator::Pick(None),
            Self::GroupConcat { .. } => Accumulator::Concat(Vec::new()),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => write!(f, "count(*)"),
            Self::CountVar(v) => write!(f, "count({v})"),
            Self::CountDistinct(v) => write!(f, "count(distinct {v})"),
            Self::Sum(v) => write!(f, "sum({v})"),
            Self::Min(v) => write!(f, "min({v})"),
            Self::Max(v) => write!(f, "max({v})"),
            Self::Sample(v) => write!(f, "sample({v})"),
            Self::GroupConcat { var, separator } => write!(f, "group_concat({var}; {separator:?})"),
        }
    }
}

#[derive(Default)]
struct Sum {
    int: i64,
    float: f64,
    is_float: bool,
    invalid: bool,
}

impl Sum {
    fn add(&mut self, node: &Node) {
        if self.invalid {
            return;
        }
        if !self.is_float {
            if let Some(n) = node.as_i64() {
                match self.int.checked_add(n) {
                    Some(total) => self.int = total,
                    None => {
                        self.is_float = true;
                        self.float = self.int as f64 + n as f64;
                    }
                }
                return;
            }
        }
        match node.as_f64() {
            Some(x) => {
                if !self.is_float {
                    self.is_float = true;
                    self.float = self.int as f64;
                }
                self.float += x;
            }
            None => self.invalid = true,
        }
    }

    fn value(&self) -> Option<Node> {
        if self.invalid {
            None
        } else if self.is_float {
            Some(Node::double(self.float))
        } else {
            Some(Node::integer(self.int))
        }
    }
}

enum Accumulator {
    Count(i64),
    Distinct(HashSet<Node>),
    Sum(Sum),
    Pick(Option<Node>),
    Concat(Vec<String>),
}

impl Accumulator {
    fn accept(&mut self, aggregate: &Aggregate, row: &Binding) {
        let value = match aggregate {
            Aggregate::Count => {
                if let Self::Count(n) = self {
                    *n += 1;
                }
                return;
            }
            Aggregate::CountVar(v)
            | Aggregate::CountDistinct(v)
            | Aggregate::Sum(v)
            | Aggregate::Min(v)
            | Aggregate::Max(v)
            | Aggregate::Sample(v)
            | Aggregate::GroupConcat { var: v, .. } => row.get(v),
        };
        let Some(value) = value else { return };
        match (self, aggregate) {
            (Self::Count(n), _) => *n += 1,
            (Self::Distinct(seen), _) => {
                seen.insert(value.clone());
            }
            (Self::Sum(sum), _) => sum.add(value),
            (Self::Pick(current), Aggregate::Min(_)) => keep_if(current, value, Ordering::Less),
            (Self::Pick(current), Aggregate::Max(_)) => keep_if(current, value, Ordering::Greater),
            (Self::Pick(current), _) => {
                if current.is_none() {
                    *current = Some(value.clone());
                }
            }
            (Self::Concat(parts), _) => parts.push(value.lexical().to_string()),
        }
    }

    fn finish(self, aggregate: &Aggregate) -> QueryResult<Option<Node>> {
        Ok(match self {
            Self::Count(n) => Some(Node::integer(n)),
            Self::Distinct(seen) => Some(Node::integer(distinct_count(seen.len())?)),
            Self::Sum(sum) => sum.value(),
            Self::Pick(value) => value,
            Self::Concat(parts) => {
                let separator = match aggregate {
                    Aggregate::GroupConcat { separator, .. } => separator.as_str(),
                    _ => " ",
                };
                Some(Node::literal(parts.join(separator)))
            }
        })
    }
}

fn distinct_count(len: usize) -> QueryResult<i64> {
    i64::try_from(len).map_err(|_| QueryError::evaluation(format!("{len} distinct values overflow a count")))
}

fn keep_if(current: &mut Option<Node>, candidate: &Node, wanted: Ordering) {
    let replace = match current {
        None => true,
        Some(existing) => compare_values(Some(candidate), Some(existing)) == wanted,
    };
    if replace {
        *current = Some(candidate.clone());
    }
}

/// Groups rows by key variables and computes aggregates per group.
///
/// The input is read completely on the first pull. Groups come out in the
/// order their first row arrived. With no key variables and no input rows
/// there is one output row holding the aggregates' empty values, unless
/// there are no aggregates, in which case there are no rows.
pub struct Group {
    input: BoxIter,
    keys: Vec<Var>,
    aggregates: Vec<(Var, Aggregate)>,
    output: Option<VecDeque<Binding>>,
}

impl Group {
    /// Groups `input` by `keys`, binding each aggregate to its variable.
    #[must_use]
    pub fn new(input: BoxIter, keys: Vec<Var>, aggregates: Vec<(Var, Aggregate)>) -> QueryIter<Self> {
        QueryIter::new(Self {
            input,
            keys,
            aggregates,
            output: None,
        })
    }

    fn fresh(&self) -> Vec<Accumulator> {
        self.aggregates.iter().map(|(_, a)| a.accumulator()).collect()
    }

    fn emit(&self, key: Binding, accumulators: Vec<Accumulator>) -> QueryResult<Binding> {
        let mut row = key;
        for ((var, aggregate), acc) in self.aggregates.iter().zip(accumulators) {
            if let Some(value) = acc.finish(aggregate)? {
                row.insert(var.clone(), value);
            }
        }
        Ok(row)
    }

    fn build(&mut self) -> QueryResult<VecDeque<Binding>> {
        let mut index: HashMap<Binding, usize> = HashMap::new();
        let mut groups: Vec<(Binding, Vec<Accumulator>)> = Vec::new();
        let mut rows = 0u64;
        while let Some(row) = pull(self.input.as_mut())? {
            rows += 1;
            let key = row.project(&self.keys);
            let slot = match index.get(&key) {
                Some(slot) => *slot,
                None => {
                    groups.push((key.clone(), self.fresh()));
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            let accumulators = &mut groups[slot].1;
            for ((_, aggregate), acc) in self.aggregates.iter().zip(accumulators.iter_mut()) {
                acc.accept(aggregate, &row);
            }
        }
        self.input.close();
        trace!(rows, groups = groups.len(), "grouped");

        if groups.is_empty() && self.keys.is_empty() && !self.aggregates.is_empty() {
            return Ok(VecDeque::from([self.emit(Binding::new(), self.fresh())?]));
        }
        groups
            .into_iter()
            .map(|(key, accumulators)| self.emit(key, accumulators))
            .collect()
    }
}

impl IterLogic for Group {
    fn name(&self) -> &'static str {
        "Group"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        if self.output.is_none() {
            let output = self.build()?;
            self.output = Some(output);
        }
        Ok(self.output.as_ref().is_some_and(|rows| !rows.is_empty()))
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        self.output
            .as_mut()
            .and_then(VecDeque::pop_front)
            .ok_or(QueryError::NoMoreElements)
    }

    fn close_iterator(&mut self) {
        self.input.close();
        self.output = None;
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        vec![self.input.as_ref()]
    }

    fn details(&self) -> String {
        let keys: Vec<String> = self.keys.iter().map(ToString::to_string).collect();
        let aggs: Vec<String> = self
            .aggregates
            .iter()
            .map(|(var, agg)| format!("{var}={agg}"))
            .collect();
        format!("by=[{}] [{}]", keys.join(" "), aggs.join(" "))
    }
}
