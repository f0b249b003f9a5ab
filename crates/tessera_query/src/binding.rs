//! Variables and bindings.

use crate::error::{QueryError, QueryResult};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tessera_core::Node;

/// A query variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var(Arc<str>);

impl Var {
    /// Creates a variable. A leading `?` is stripped.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Self(Arc::from(name.strip_prefix('?').unwrap_or(name)))
    }

    /// Prefix marking a variable the evaluator made up, such as one standing
    /// in for a blank node. Such variables are never part of a result.
    pub const INTERNAL_PREFIX: char = '.';

    /// Creates an internal variable.
    pub fn internal(label: impl fmt::Display) -> Self {
        Self(Arc::from(format!("{}{label}", Self::INTERNAL_PREFIX)))
    }

    /// Name without the `?`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// True for variables made by [`Var::internal`].
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.0.starts_with(Self::INTERNAL_PREFIX)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

impl From<&str> for Var {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One row: a mapping from variables to nodes.
///
/// Ordering and hashing follow the sorted variable/value pairs, so equal
/// rows compare equal regardless of how they were built.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Binding {
    values: BTreeMap<Var, Node>,
}

impl Binding {
    /// The empty binding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a binding from pairs.
    pub fn from_pairs<I, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (V, Node)>,
        V: Into<Var>,
    {
        Self {
            values: pairs.into_iter().map(|(v, n)| (v.into(), n)).collect(),
        }
    }

    /// Returns a copy with `var` bound to `node`.
    #[must_use]
    pub fn with(mut self, var: impl Into<Var>, node: Node) -> Self {
        self.values.insert(var.into(), node);
        self
    }

    /// Binds `var`, replacing any previous value.
    pub fn insert(&mut self, var: Var, node: Node) {
        self.values.insert(var, node);
    }

    /// Value of `var`.
    #[must_use]
    pub fn get(&self, var: &Var) -> Option<&Node> {
        self.values.get(var)
    }

    /// True if `var` is bound.
    #[must_use]
    pub fn contains(&self, var: &Var) -> bool {
        self.values.contains_key(var)
    }

    /// Bound variables in order.
    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        self.values.keys()
    }

    /// Variable/value pairs in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Node)> {
        self.values.iter()
    }

    /// Number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if every variable bound in both has the same value in both.
    #[must_use]
    pub fn is_compatible(&self, other: &Binding) -> bool {
        self.values
            .iter()
            .all(|(var, node)| other.get(var).is_none_or(|theirs| theirs == node))
    }

    /// True if at least one variable is bound in both.
    #[must_use]
    pub fn shares_var(&self, other: &Binding) -> bool {
        self.values.keys().any(|var| other.contains(var))
    }

    /// Union of two compatible bindings, or `None` if they conflict.
    #[must_use]
    pub fn merge(&self, other: &Binding) -> Option<Binding> {
        if !self.is_compatible(other) {
            return None;
        }
        let mut merged = self.clone();
        for (var, node) in &other.values {
            merged.values.entry(var.clone()).or_insert_with(|| node.clone());
        }
        Some(merged)
    }

    /// Keeps only `vars`.
    #[must_use]
    pub fn project(&self, vars: &[Var]) -> Binding {
        Binding {
            values: vars
                .iter()
                .filter_map(|var| self.values.get(var).map(|node| (var.clone(), node.clone())))
                .collect(),
        }
    }

    /// Drops internal variables and, when `vars` is given, every variable
    /// not in it.
    #[must_use]
    pub fn distinguished(&self, vars: Option<&[Var]>) -> Binding {
        Binding {
            values: self
                .values
                .iter()
                .filter(|(var, _)| !var.is_internal() && vars.map_or(true, |vars| vars.contains(var)))
                .map(|(var, node)| (var.clone(), node.clone()))
                .collect(),
        }
    }

    /// Serializes for spill files.
    ///
    /// Layout: `[u32 count]` then per pair `[u32 len][name][u32 len][node]`,
    /// little-endian.
    ///
    /// # Errors
    ///
    /// Fails if a count or length does not fit in a `u32`.
    pub fn encode(&self) -> QueryResult<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&length_prefix(self.values.len())?);
        for (var, node) in &self.values {
            let name = var.name().as_bytes();
            out.extend_from_slice(&length_prefix(name.len())?);
            out.extend_from_slice(name);
            let node = node.encode();
            out.extend_from_slice(&length_prefix(node.len())?);
            out.extend_from_slice(&node);
        }
        Ok(out)
    }

    /// Parses bytes written by [`Binding::encode`].
    pub fn decode(bytes: &[u8]) -> QueryResult<Self> {
        let mut reader = Reader { bytes, pos: 0 };
        let count = reader.u32()?;
        let mut values = BTreeMap::new();
        for _ in 0..count {
            let name = reader.chunk()?;
            let name = std::str::from_utf8(name)
                .map_err(|_| QueryError::invalid_operation("spilled variable name is not UTF-8"))?;
            let node = Node::decode(reader.chunk()?)?;
            values.insert(Var::new(name), node);
        }
        Ok(Self { values })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> QueryResult<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.bytes.len());
        let Some(end) = end else {
            return Err(QueryError::invalid_operation("truncated spilled binding"));
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> QueryResult<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn chunk(&mut self) -> QueryResult<&'a [u8]> {
        let len = self.u32()?;
        let len = usize::try_from(len)
            .map_err(|_| QueryError::invalid_operation(format!("spill length {len} too large")))?;
        self.take(len)
    }
}

/// Little-endian `u32` prefix for a length or count in a spill record.
pub(crate) fn length_prefix(len: usize) -> QueryResult<[u8; 4]> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| QueryError::invalid_operation(format!("length {len} does not fit a spill record")))
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, (var, node)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "({var} {node})")?;
        }
        write!(f, ")")
    }
}

/// Orders values for sorting: unbound first, then numbers by value, then
/// everything else by term order.
#[must_use]
pub fn compare_values(a: Option<&Node>, b: Option<&Node>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        },
    }
}
