//! Concatenation.

use super::base::{IterLogic, QueryIter};
use super::cancel::CancelSignal;
use super::{not_ready, BoxIter, QueryIterator};
use crate::binding::Binding;
use crate::error::QueryResult;

/// Yields every row of each input in turn.
pub struct Concat {
    inputs: Vec<BoxIter>,
    current: usize,
    ready: bool,
}

impl Concat {
    /// Concatenates `inputs`.
    #[must_use]
    pub fn new(inputs: Vec<BoxIter>) -> QueryIter<Self> {
        QueryIter::new(Self {
            inputs,
            current: 0,
            ready: false,
        })
    }
}

impl IterLogic for Concat {
    fn name(&self) -> &'static str {
        "Concat"
    }

    fn has_next_binding(&mut self, _signal: &CancelSignal) -> QueryResult<bool> {
        while let Some(input) = self.inputs.get_mut(self.current) {
            if input.has_next()? {
                self.ready = true;
                return Ok(true);
            }
            input.close();
            self.current += 1;
        }
        Ok(false)
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        if !self.ready {
            return Err(not_ready(self.name()));
        }
        self.ready = false;
        match self.inputs.get_mut(self.current) {
            Some(input) => input.next_binding(),
            None => Err(not_ready(self.name())),
        }
    }

    fn close_iterator(&mut self) {
        for input in &mut self.inputs {
            input.close();
        }
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        self.inputs.iter().map(|i| i.as_ref() as &dyn QueryIterator).collect()
    }

    fn details(&self) -> String {
        format!("inputs={}", self.inputs.len())
    }
}
