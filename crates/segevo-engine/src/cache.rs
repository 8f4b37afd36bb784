//! Per-(criterion, sample) cache of prepared criterion inputs.
//!
//! During training only the trainable parameters change between entities and
//! epochs; a criterion whose input does not depend on any of them sees the
//! same prepared input for a given sample every time. The cache keeps that
//! input so it is computed once per training call.
//!
//! Keys are the criterion's depth-first index in the tree and the sample's
//! index in the training category. Entries are only valid for one tree shape
//! and one dataset: the owner must [`InputCache::clear`] it whenever either
//! changes.

use std::{collections::HashMap, rc::Rc};

use crate::tensor::Tensor;

#[derive(Debug, Default)]
pub struct InputCache {
    entries: HashMap<(usize, usize), Rc<Tensor>>,
}

impl InputCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached input, computing and storing it on a miss.
    pub fn get_or_try_insert<E, F>(
        &mut self,
        criterion: usize,
        sample: usize,
        f: F,
    ) -> Result<Rc<Tensor>, E>
    where
        F: FnOnce() -> Result<Tensor, E>,
    {
        if let Some(tensor) = self.entries.get(&(criterion, sample)) {
            return Ok(Rc::clone(tensor));
        }
        let tensor = Rc::new(f()?);
        self.entries.insert((criterion, sample), Rc::clone(&tensor));
        Ok(tensor)
    }

    #[must_use]
    pub fn contains(&self, criterion: usize, sample: usize) -> bool {
        self.entries.contains_key(&(criterion, sample))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_computes_once_per_key() {
        let mut cache = InputCache::new();
        let mut calls = 0;
        for _ in 0..3 {
            let t = cache
                .get_or_try_insert::<(), _>(0, 7, || {
                    calls += 1;
                    Ok(Tensor::zeros(1, 1, 1))
                })
                .unwrap();
            assert_eq!(t.area(), 1);
        }
        assert_eq!(calls, 1);
        assert!(cache.contains(0, 7));
        assert!(!cache.contains(0, 8));

        cache
            .get_or_try_insert::<(), _>(1, 7, || Ok(Tensor::zeros(1, 1, 1)))
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_computation_is_not_stored() {
        let mut cache = InputCache::new();
        let result = cache.get_or_try_insert(0, 0, || Err("interrupted"));
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
