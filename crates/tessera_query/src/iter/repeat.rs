//! Per-row sub-plans.

use super::base::{IterLogic, QueryIter};
use super::cancel::CancelSignal;
use super::{not_ready, pull, BoxIter, QueryIterator};
use crate::binding::Binding;
use crate::error::QueryResult;

/// For each input row, builds and drains a fresh stage iterator.
///
/// This is how triple patterns chain: each stage extends the row it was
/// built from. Only one stage is open at a time, and it is linked to this
/// iterator's cancel signal so a pending cancellation reaches it.
pub struct RepeatApply<F> {
    input: BoxIter,
    make_stage: F,
    stage: Option<BoxIter>,
    label: String,
    stages: u64,
}

impl<F> RepeatApply<F>
where
    F: FnMut(Binding) -> QueryResult<BoxIter> + Send,
{
    /// Applies `make_stage` to every row of `input`.
    pub fn new(input: BoxIter, label: impl Into<String>, make_stage: F) -> QueryIter<Self> {
        QueryIter::new(Self {
            input,
            make_stage,
            stage: None,
            label: label.into(),
            stages: 0,
        })
    }
}

impl<F> IterLogic for RepeatApply<F>
where
    F: FnMut(Binding) -> QueryResult<BoxIter> + Send,
{
    fn name(&self) -> &'static str {
        "RepeatApply"
    }

    fn has_next_binding(&mut self, signal: &CancelSignal) -> QueryResult<bool> {
        loop {
            if let Some(stage) = self.stage.as_mut() {
                if stage.has_next()? {
                    return Ok(true);
                }
                stage.close();
                self.stage = None;
            }
            let Some(row) = pull(self.input.as_mut())? else {
                return Ok(false);
            };
            let stage = (self.make_stage)(row)?;
            signal.attach(&stage.cancel_signal());
            self.stages += 1;
            self.stage = Some(stage);
        }
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        match self.stage.as_mut() {
            Some(stage) => stage.next_binding(),
            None => Err(not_ready(self.name())),
        }
    }

    fn close_iterator(&mut self) {
        if let Some(mut stage) = self.stage.take() {
            stage.close();
        }
        self.input.close();
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        let mut children: Vec<&dyn QueryIterator> = vec![self.input.as_ref()];
        if let Some(stage) = &self.stage {
            children.push(stage.as_ref());
        }
        children
    }

    fn details(&self) -> String {
        format!("{} stages={}", self.label, self.stages)
    }
}
