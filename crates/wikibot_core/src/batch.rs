use std::collections::HashSet;
use std::hash::Hash;

/// Most `titles=`/`pageids=` lists the API accepts from a bot account.
pub const MAX_BATCH_SIZE: usize = 500;

/// Contiguous chunks of at most `size` items, in order. A zero size is
/// treated as one.
pub fn chunk<T>(items: &[T], size: usize) -> impl Iterator<Item = &[T]> {
    items.chunks(size.max(1))
}

/// Drop repeated items by `key`, keeping the first occurrence.
pub fn dedup_by_key<T, K, F>(items: Vec<T>, mut key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(key(item)))
        .collect()
}
