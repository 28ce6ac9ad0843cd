//! Unit partitioner: ordered pages → fixed-size batches.

use image::DynamicImage;

/// One page of the requested range: the atomic item of extraction work.
#[derive(Debug, Clone)]
pub struct PageUnit {
    /// 0-based position in the output. The sole ordering key.
    pub index: usize,
    /// 1-based page number in the source document. Feeds the cache key.
    pub page_number: usize,
    pub image: DynamicImage,
}

/// A contiguous group of units dispatched under one limiter permit.
#[derive(Debug, Clone)]
pub struct Batch {
    /// 0-based position of this batch among all batches.
    pub number: usize,
    pub units: Vec<PageUnit>,
}

impl Batch {
    pub fn indices(&self) -> Vec<usize> {
        self.units.iter().map(|u| u.index).collect()
    }

    pub fn page_numbers(&self) -> Vec<usize> {
        self.units.iter().map(|u| u.page_number).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Split `units` into batches of at most `batch_size` (0 is treated as 1).
///
/// Order is preserved: concatenating the batches' units yields the input.
pub fn partition(units: Vec<PageUnit>, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(units.len().div_ceil(batch_size));
    let mut iter = units.into_iter().peekable();

    while iter.peek().is_some() {
        let chunk: Vec<PageUnit> = iter.by_ref().take(batch_size).collect();
        batches.push(Batch {
            number: batches.len(),
            units: chunk,
        });
    }

    batches
}
