//! Sorted runs spilled to temporary files.
//!
//! Run files are anonymous temp files, removed by the OS as soon as they
//! are closed, so dropping a [`Spill`] or a [`Merge`] releases the disk.

use crate::binding::{length_prefix, Binding};
use crate::config::ExecConfig;
use crate::error::{QueryError, QueryResult};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::debug;

struct RunReader {
    reader: BufReader<File>,
    remaining: usize,
}

impl RunReader {
    fn next(&mut self) -> QueryResult<Option<Binding>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let mut len = [0u8; 4];
        self.reader.read_exact(&mut len).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => QueryError::invalid_operation("spill run ended early"),
            _ => QueryError::Spill(e),
        })?;
        let len = u32::from_le_bytes(len);
        let len = usize::try_from(len)
            .map_err(|_| QueryError::invalid_operation(format!("spill record of {len} bytes too large")))?;
        let mut bytes = vec![0u8; len];
        self.reader.read_exact(&mut bytes)?;
        self.remaining -= 1;
        Binding::decode(&bytes).map(Some)
    }
}

/// Sorted runs written so far.
pub(crate) struct Spill {
    dir: Option<PathBuf>,
    runs: Vec<RunReader>,
    rows: usize,
}

impl Spill {
    pub(crate) fn new(config: &ExecConfig) -> Self {
        Self {
            dir: config.spill_dir.clone(),
            runs: Vec::new(),
            rows: 0,
        }
    }

    /// Writes `rows`, which the caller has already sorted, as one run.
    pub(crate) fn write_run(&mut self, rows: &[Binding]) -> QueryResult<()> {
        let mut file = match &self.dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        {
            let mut writer = BufWriter::new(&mut file);
            for row in rows {
                let bytes = row.encode()?;
                writer.write_all(&length_prefix(bytes.len())?)?;
                writer.write_all(&bytes)?;
            }
            writer.flush()?;
        }
        file.seek(SeekFrom::Start(0))?;
        self.runs.push(RunReader {
            reader: BufReader::new(file),
            remaining: rows.len(),
        });
        self.rows += rows.len();
        debug!(run = self.runs.len(), rows = rows.len(), "spilled sorted run");
        Ok(())
    }

    /// Number of runs.
    pub(crate) fn runs(&self) -> usize {
        self.runs.len()
    }

    /// Rows written across all runs.
    pub(crate) fn rows(&self) -> usize {
        self.rows
    }

    /// Merges every run plus the sorted in-memory `tail`.
    ///
    /// Among equal rows the earlier run wins, so a merge of runs written
    /// in input order is stable.
    pub(crate) fn merge<C>(self, tail: Vec<Binding>, compare: C) -> QueryResult<Merge<C>>
    where
        C: Fn(&Binding, &Binding) -> Ordering,
    {
        let mut sources: Vec<Source> = self.runs.into_iter().map(Source::Run).collect();
        sources.push(Source::Memory(tail.into_iter()));
        let mut heads = Vec::with_capacity(sources.len());
        for source in &mut sources {
            heads.push(source.next()?);
        }
        Ok(Merge {
            sources,
            heads,
            compare,
        })
    }
}

enum Source {
    Run(RunReader),
    Memory(std::vec::IntoIter<Binding>),
}

impl Source {
    fn next(&mut self) -> QueryResult<Option<Binding>> {
        match self {
            Self::Run(run) => run.next(),
            Self::Memory(rows) => Ok(rows.next()),
        }
    }
}

/// K-way merge of sorted sources.
pub(crate) struct Merge<C> {
    sources: Vec<Source>,
    heads: Vec<Option<Binding>>,
    compare: C,
}

impl<C> Merge<C>
where
    C: Fn(&Binding, &Binding) -> Ordering,
{
    /// The smallest remaining row.
    pub(crate) fn next(&mut self) -> QueryResult<Option<Binding>> {
        let mut best: Option<usize> = None;
        for (i, head) in self.heads.iter().enumerate() {
            let Some(row) = head else { continue };
            let better = match best.and_then(|b| self.heads[b].as_ref()) {
                Some(current) => (self.compare)(row, current) == Ordering::Less,
                None => true,
            };
            if better {
                best = Some(i);
            }
        }
        let Some(index) = best else {
            return Ok(None);
        };
        let row = self.heads[index].take();
        self.heads[index] = self.sources[index].next()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Node;

    fn rows(values: &[i64]) -> Vec<Binding> {
        values
            .iter()
            .map(|v| Binding::new().with("x", Node::integer(*v)))
            .collect()
    }

    #[test]
    fn merges_runs_and_tail_in_order() {
        let mut spill = Spill::new(&ExecConfig::default());
        spill.write_run(&rows(&[1, 4, 7])).unwrap();
        spill.write_run(&rows(&[2, 5, 8])).unwrap();
        assert_eq!(spill.runs(), 2);
        assert_eq!(spill.rows(), 6);

        let mut merge = spill.merge(rows(&[3, 6]), Binding::cmp).unwrap();
        let mut out = Vec::new();
        while let Some(row) = merge.next().unwrap() {
            out.push(row);
        }
        let mut expected = rows(&[1, 2, 3, 4, 5, 6, 7, 8]);
        expected.sort();
        assert_eq!(out, expected);
    }

    #[test]
    fn spill_dir_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let mut spill = Spill::new(&ExecConfig::default().spill_dir(dir.path()));
        spill.write_run(&rows(&[1])).unwrap();
        let mut merge = spill.merge(Vec::new(), Binding::cmp).unwrap();
        assert_eq!(merge.next().unwrap(), Some(rows(&[1])[0].clone()));
        assert_eq!(merge.next().unwrap(), None);
    }
}
