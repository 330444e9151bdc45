// ordering-core/src/spanner.rs

//! Span index: maps flat item IDs to the variable-length span holding them.
//!
//! Equivalent to storing the span ID of every item, but only keeps one entry
//! per span plus one entry per fixed-size bucket of items. Lookups start their
//! scan at the first span that can contain the bucket, so the cost is bounded
//! by the number of spans overlapping a bucket rather than the number of spans.

/// Index over a list of variable-length spans.
#[derive(Debug, Clone)]
pub struct SpanIndex {
    /// Cumulative item count at the end of each span.
    span_ends: Vec<u64>,
    /// Number of items per bucket.
    bucket_size: u64,
    /// For each bucket, the ID of the first span ending at or past the bucket's end.
    bucket_ends: Vec<usize>,
    /// Total number of items.
    num_items: u64,
}

impl SpanIndex {
    /// Builds the index from per-span item counts.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_size` is zero.
    pub fn new(span_sizes: &[u64], bucket_size: u64) -> Self {
        assert!(bucket_size > 0, "span index bucket size must be positive");

        let mut span_ends = Vec::with_capacity(span_sizes.len());
        let mut offset = 0u64;
        for &size in span_sizes {
            offset += size;
            span_ends.push(offset);
        }
        let num_items = offset;

        let num_buckets = num_items.div_ceil(bucket_size) as usize;
        let mut bucket_ends = Vec::with_capacity(num_buckets);
        let mut span_id = 0usize;
        for bucket_id in 0..num_buckets {
            let bucket_end = (bucket_id as u64 + 1) * bucket_size;
            while span_id < span_ends.len() && span_ends[span_id] < bucket_end {
                span_id += 1;
            }
            bucket_ends.push(span_id);
        }

        Self {
            span_ends,
            bucket_size,
            bucket_ends,
            num_items,
        }
    }

    /// Returns the span containing `item_id` and the item's offset within it.
    ///
    /// # Panics
    ///
    /// Panics if `item_id` is not in `[0, num_items)`.
    pub fn find(&self, item_id: u64) -> (usize, u64) {
        assert!(
            item_id < self.num_items,
            "item {item_id} out of range for span index of {} items",
            self.num_items
        );

        let bucket_id = (item_id / self.bucket_size) as usize;
        let begin = if bucket_id == 0 {
            0
        } else {
            self.bucket_ends[bucket_id - 1]
        };
        let end = self.bucket_ends[bucket_id].min(self.span_ends.len() - 1);

        for span_id in begin..=end {
            if item_id < self.span_ends[span_id] {
                let span_begin = if span_id == 0 {
                    0
                } else {
                    self.span_ends[span_id - 1]
                };
                return (span_id, item_id - span_begin);
            }
        }

        unreachable!("bucket bounds always cover the item's span")
    }

    /// Total number of items over all spans.
    pub fn num_items(&self) -> u64 {
        self.num_items
    }

    /// Number of spans indexed.
    pub fn num_spans(&self) -> usize {
        self.span_ends.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_every_item(sizes: &[u64], bucket_size: u64) {
        let index = SpanIndex::new(sizes, bucket_size);
        let mut item_id = 0u64;
        for (span_id, &size) in sizes.iter().enumerate() {
            for offset in 0..size {
                assert_eq!(index.find(item_id), (span_id, offset), "item {item_id}");
                item_id += 1;
            }
        }
        assert_eq!(index.num_items(), item_id);
    }

    #[test]
    fn test_find_small_buckets() {
        let index = SpanIndex::new(&[1, 2, 3, 10, 4], 3);
        assert_eq!(index.find(0), (0, 0));
        assert_eq!(index.find(1), (1, 0));
        assert_eq!(index.find(5), (2, 2));
        assert_eq!(index.find(15), (3, 9));
        assert_eq!(index.find(16), (4, 0));
        assert_eq!(index.find(19), (4, 3));
        assert_eq!(index.num_spans(), 5);
    }

    #[test]
    fn test_every_item_resolves() {
        check_every_item(&[1, 2, 3, 10, 4], 3);
        check_every_item(&[1, 2, 3, 10, 4], 1);
        check_every_item(&[1, 2, 3, 10, 4], 64);
        check_every_item(&[7; 13], 5);
    }

    #[test]
    fn test_zero_length_spans_are_skipped() {
        let sizes = [0, 3, 0, 0, 2, 0];
        let index = SpanIndex::new(&sizes, 2);
        assert_eq!(index.find(0), (1, 0));
        assert_eq!(index.find(2), (1, 2));
        assert_eq!(index.find(3), (4, 0));
        assert_eq!(index.find(4), (4, 1));
    }

    #[test]
    #[should_panic]
    fn test_find_out_of_range_panics() {
        let index = SpanIndex::new(&[1, 2, 3], 2);
        index.find(6);
    }

    #[test]
    #[should_panic]
    fn test_zero_bucket_size_panics() {
        SpanIndex::new(&[1, 2, 3], 0);
    }
}
