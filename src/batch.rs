//! Batching for the load phase.
//!
//! [`batches`] splits an ordered slice into consecutive slices of at most
//! `batch_size` elements. Batches are produced lazily, never overlap, and
//! concatenate back to the input in order.

use crate::error::EtlError;
use std::iter::{Enumerate, FusedIterator};
use std::slice::Chunks;

/// One transport-sized group of records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch<'a, T> {
    /// Zero-based position of this batch in the run.
    pub index: usize,
    pub records: &'a [T],
}

impl<T> Batch<'_, T> {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Lazy iterator over the batches of a slice.
#[derive(Debug, Clone)]
pub struct Batches<'a, T> {
    inner: Enumerate<Chunks<'a, T>>,
}

impl<'a, T> Iterator for Batches<'a, T> {
    type Item = Batch<'a, T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(index, records)| Batch { index, records })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for Batches<'_, T> {}
impl<T> FusedIterator for Batches<'_, T> {}

/// Split `records` into batches of `batch_size`; only the last may be shorter.
/// An empty input yields no batches.
///
/// # Errors
/// Returns [`EtlError::InvalidBatchSize`] if `batch_size` is zero.
pub fn batches<T>(records: &[T], batch_size: usize) -> Result<Batches<'_, T>, EtlError> {
    if batch_size == 0 {
        return Err(EtlError::InvalidBatchSize);
    }
    Ok(Batches {
        inner: records.chunks(batch_size).enumerate(),
    })
}
