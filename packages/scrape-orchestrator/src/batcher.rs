//! Grouping of corpus domains into worker-sized batches.

/// Split `domains` into consecutive groups of at most `size`.
///
/// The last group may be shorter. A size of zero is treated as one.
pub fn batch_domains<T: Clone>(domains: &[T], size: usize) -> impl Iterator<Item = Vec<T>> + '_ {
    domains.chunks(size.max(1)).map(|chunk| chunk.to_vec())
}

/// Incremental batcher fed one page at a time.
///
/// Full batches are emitted as soon as they fill; the remainder comes out of
/// [`Batcher::finish`].
#[derive(Debug)]
pub struct Batcher {
    size: usize,
    pending: Vec<String>,
}

impl Batcher {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            pending: Vec::with_capacity(size),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.size
    }

    /// Add a page of domains and return every batch that is now full.
    pub fn push<I>(&mut self, domains: I) -> Vec<Vec<String>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut full = Vec::new();
        for domain in domains {
            self.pending.push(domain);
            if self.pending.len() == self.size {
                full.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.size),
                ));
            }
        }
        full
    }

    /// Flush the final partial batch, if any.
    pub fn finish(self) -> Option<Vec<String>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_last_batch_is_short() {
        let domains: Vec<u32> = (0..250).collect();
        let sizes: Vec<usize> = batch_domains(&domains, 100).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn test_zero_size_means_one() {
        let domains = vec!["a", "b"];
        assert_eq!(batch_domains(&domains, 0).count(), 2);
        assert_eq!(Batcher::new(0).batch_size(), 1);
    }

    #[test]
    fn test_incremental_matches_pure() {
        let mut batcher = Batcher::new(4);
        let mut batches = batcher.push((0..3).map(|i| i.to_string()));
        assert!(batches.is_empty());
        batches.extend(batcher.push((3..9).map(|i| i.to_string())));
        assert_eq!(batches.len(), 2);
        let rest = batcher.finish().unwrap();
        assert_eq!(rest, vec!["8".to_string()]);
    }

    #[test]
    fn test_finish_on_exact_multiple_is_none() {
        let mut batcher = Batcher::new(2);
        assert_eq!(batcher.push(vec!["a".into(), "b".into()]).len(), 1);
        assert!(batcher.finish().is_none());
    }

    proptest! {
        #[test]
        fn batches_cover_corpus_exactly(
            count in 0usize..500,
            size in 1usize..64,
            page in 1usize..50,
        ) {
            let corpus: Vec<String> = (0..count).map(|i| format!("d{}.com", i)).collect();

            let mut batcher = Batcher::new(size);
            let mut batches = Vec::new();
            for chunk in corpus.chunks(page) {
                batches.extend(batcher.push(chunk.to_vec()));
            }
            batches.extend(batcher.finish());

            prop_assert_eq!(batches.len(), count.div_ceil(size));
            prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));

            let flat: Vec<String> = batches.concat();
            prop_assert_eq!(&flat, &corpus);
            let unique: HashSet<&String> = flat.iter().collect();
            prop_assert_eq!(unique.len(), count);
        }
    }
}
