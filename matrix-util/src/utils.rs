use fnv::FnvHashMap as HashMap;
use std::hash::Hash;

const DEFAULT_BLOCK_SIZE: usize = 1000;

/// partition membership vector into groups of indexes
/// # Arguments
/// * `membership` - a vector of membership (E.g., cluster assignment)
/// # Returns
/// A hashmap: cluster/group name -> indexes of the elements (sorted)
pub fn partition_by_membership<T>(membership: &[T]) -> HashMap<T, Vec<usize>>
where
    T: Eq + Hash + Clone,
{
    let mut pb_elems: HashMap<T, Vec<usize>> = HashMap::default();
    for (cell, k) in membership.iter().enumerate() {
        pb_elems.entry(k.clone()).or_default().push(cell);
    }
    pb_elems
}

/// Split `0..ntot` into contiguous `(lb, ub)` blocks of `block_size`;
/// `block_size = 0` falls back to a default
pub fn create_jobs(ntot: usize, block_size: usize) -> Vec<(usize, usize)> {
    let block_size = if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    };
    let nblock = ntot.div_ceil(block_size);
    (0..nblock)
        .map(|block| {
            let lb = block * block_size;
            let ub = ((block + 1) * block_size).min(ntot);
            (lb, ub)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_jobs_helper() {
        let jobs = create_jobs(10, 3);
        assert_eq!(jobs, vec![(0, 3), (3, 6), (6, 9), (9, 10)]);

        let jobs = create_jobs(6, 3);
        assert_eq!(jobs, vec![(0, 3), (3, 6)]);

        let jobs = create_jobs(1, 100);
        assert_eq!(jobs, vec![(0, 1)]);

        // block_size=0 should fall back to DEFAULT_BLOCK_SIZE
        let jobs = create_jobs(5, 0);
        assert_eq!(jobs, vec![(0, 5)]);
    }

    #[test]
    fn test_partition_by_membership() {
        let groups = partition_by_membership(&[2, 0, 2, 1, 0]);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[&0], vec![1, 4]);
        assert_eq!(groups[&1], vec![3]);
        assert_eq!(groups[&2], vec![0, 2]);
    }
}
