//! Ordered read-ahead over a sample provider using a bounded rayon pool.

use crate::provider::SampleProvider;
use crate::types::DatasetResult;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::VecDeque;

/// Iterates `order` through `provider`, loading up to `workers` samples at a time in
/// parallel. Results come back in `order`, errors included.
pub struct Prefetcher<'a, P: SampleProvider> {
    provider: &'a P,
    order: Vec<usize>,
    cursor: usize,
    chunk: usize,
    pool: Option<rayon::ThreadPool>,
    buffer: VecDeque<DatasetResult<P::Item>>,
}

impl<'a, P: SampleProvider> Prefetcher<'a, P> {
    /// Sequential order over the first `limit` samples (all when `None`).
    pub fn sequential(provider: &'a P, workers: usize, limit: Option<usize>) -> Self {
        let n = limit.map_or(provider.len(), |l| l.min(provider.len()));
        Self::new(provider, (0..n).collect(), workers)
    }

    /// Shuffled order over every sample; seeded when `seed` is set.
    pub fn shuffled(provider: &'a P, workers: usize, seed: Option<u64>) -> Self {
        let mut order: Vec<usize> = (0..provider.len()).collect();
        let mut rng = match seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
        };
        order.shuffle(&mut rng);
        Self::new(provider, order, workers)
    }

    pub fn new(provider: &'a P, order: Vec<usize>, workers: usize) -> Self {
        let pool = if workers > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => Some(pool),
                Err(e) => {
                    log::warn!("prefetch pool unavailable ({e}); loading inline");
                    None
                }
            }
        } else {
            None
        };
        Self {
            provider,
            order,
            cursor: 0,
            chunk: workers.max(1),
            pool,
            buffer: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn refill(&mut self) {
        let end = (self.cursor + self.chunk).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;
        let provider = self.provider;
        let loaded: Vec<DatasetResult<P::Item>> = match &self.pool {
            Some(pool) => pool.install(|| slice.par_iter().map(|&i| provider.get(i)).collect()),
            None => slice.iter().map(|&i| provider.get(i)).collect(),
        };
        self.buffer.extend(loaded);
    }
}

impl<P: SampleProvider> Iterator for Prefetcher<'_, P> {
    type Item = DatasetResult<P::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && self.cursor < self.order.len() {
            self.refill();
        }
        self.buffer.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatasetError;

    struct Squares(usize);

    impl SampleProvider for Squares {
        type Item = usize;
        fn len(&self) -> usize {
            self.0
        }
        fn get(&self, index: usize) -> DatasetResult<usize> {
            if index == 5 {
                return Err(DatasetError::Other("boom".into()));
            }
            Ok(index * index)
        }
    }

    #[test]
    fn parallel_loading_preserves_order() {
        let p = Squares(5);
        let got: Vec<usize> = Prefetcher::sequential(&p, 3, None)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 4, 9, 16]);
    }

    #[test]
    fn limit_caps_and_errors_surface() {
        let p = Squares(10);
        assert_eq!(Prefetcher::sequential(&p, 0, Some(3)).count(), 3);
        let results: Vec<_> = Prefetcher::sequential(&p, 4, None).collect();
        assert!(results[5].is_err());
        assert_eq!(results.len(), 10);
    }

    #[test]
    fn shuffled_visits_every_index_once() {
        let p = Squares(5);
        let mut got: Vec<usize> = Prefetcher::shuffled(&p, 2, Some(1))
            .map(|r| r.unwrap())
            .collect();
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 4, 9, 16]);
    }
}
