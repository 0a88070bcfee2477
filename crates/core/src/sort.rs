//! In-place record ordering with a selectable algorithm.
//!
//! Only [`merge_sort`] and [`insertion_sort`] are stable. Counting and bucket
//! sort work on sizes, radix sort on names; any other key falls back to merge
//! sort.

use std::cmp::Ordering;

use tracing::debug;

use crate::model::{Record, SortAlgorithm, SortDirection, SortKey};

const BUCKET_COUNT: usize = 10;

/// Upper bound on the counting sort table. Wider size ranges fall back to
/// merge sort.
pub const MAX_COUNTING_RANGE: u64 = 1 << 22;

pub fn compare_by_key(key: SortKey, a: &Record, b: &Record) -> Ordering {
    match key {
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Size => a.size_bytes.cmp(&b.size_bytes),
        SortKey::Created => a.created.cmp(&b.created),
        SortKey::Modified => a.modified.cmp(&b.modified),
        SortKey::Extension => a.extension.cmp(&b.extension),
    }
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Ascending => ordering,
        SortDirection::Descending => ordering.reverse(),
    }
}

/// Sorts `records` by `key` and `direction`. `None` selects merge sort.
/// Returns the algorithm that actually ran, which differs from the request
/// when a key-specific algorithm falls back.
pub fn sort_records(
    records: &mut Vec<Record>,
    key: SortKey,
    direction: SortDirection,
    algorithm: Option<SortAlgorithm>,
) -> SortAlgorithm {
    let requested = algorithm.unwrap_or_default();
    let compare = |a: &Record, b: &Record| directed(compare_by_key(key, a, b), direction);

    let used = match requested {
        SortAlgorithm::Bubble => {
            bubble_sort(records, compare);
            SortAlgorithm::Bubble
        }
        SortAlgorithm::Selection => {
            selection_sort(records, compare);
            SortAlgorithm::Selection
        }
        SortAlgorithm::Insertion => {
            insertion_sort(records, compare);
            SortAlgorithm::Insertion
        }
        SortAlgorithm::Merge => {
            merge_sort(records, &compare);
            SortAlgorithm::Merge
        }
        SortAlgorithm::Quick => {
            quick_sort(records, compare);
            SortAlgorithm::Quick
        }
        SortAlgorithm::Heap => {
            heap_sort(records, compare);
            SortAlgorithm::Heap
        }
        SortAlgorithm::Counting
            if key == SortKey::Size && counting_sort_by(records, |r| r.size_bytes) =>
        {
            if direction == SortDirection::Descending {
                records.reverse();
            }
            SortAlgorithm::Counting
        }
        SortAlgorithm::Radix if key == SortKey::Name => {
            records.sort_by(compare);
            SortAlgorithm::Radix
        }
        SortAlgorithm::Bucket if key == SortKey::Size => {
            bucket_sort_by(records, |r| r.size_bytes);
            if direction == SortDirection::Descending {
                records.reverse();
            }
            SortAlgorithm::Bucket
        }
        SortAlgorithm::Counting | SortAlgorithm::Radix | SortAlgorithm::Bucket => {
            merge_sort(records, &compare);
            SortAlgorithm::Merge
        }
    };

    debug!(
        requested = requested.label(),
        used = used.label(),
        stable = used.is_stable(),
        ?key,
        ?direction,
        len = records.len(),
        "sorted records"
    );
    used
}

pub fn bubble_sort<T, F>(items: &mut [T], compare: F)
where
    F: Fn(&T, &T) -> Ordering,
{
    let n = items.len();
    for pass in 0..n.saturating_sub(1) {
        let mut swapped = false;
        for j in 0..n - pass - 1 {
            if compare(&items[j], &items[j + 1]) == Ordering::Greater {
                items.swap(j, j + 1);
                swapped = true;
            }
        }
        if !swapped {
            break;
        }
    }
}

pub fn selection_sort<T, F>(items: &mut [T], compare: F)
where
    F: Fn(&T, &T) -> Ordering,
{
    let n = items.len();
    for i in 0..n.saturating_sub(1) {
        let mut min_index = i;
        for j in i + 1..n {
            if compare(&items[j], &items[min_index]) == Ordering::Less {
                min_index = j;
            }
        }
        items.swap(i, min_index);
    }
}

/// Stable: an element only moves left past strictly greater neighbours.
pub fn insertion_sort<T, F>(items: &mut [T], compare: F)
where
    F: Fn(&T, &T) -> Ordering,
{
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && compare(&items[j - 1], &items[j]) == Ordering::Greater {
            items.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// Stable top-down merge sort; ties take the left run first.
pub fn merge_sort<T, F>(items: &mut Vec<T>, compare: &F)
where
    F: Fn(&T, &T) -> Ordering,
{
    if items.len() < 2 {
        return;
    }
    let mid = items.len() / 2;
    let mut right = items.split_off(mid);
    let mut left = std::mem::take(items);
    merge_sort(&mut left, compare);
    merge_sort(&mut right, compare);

    items.reserve(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare(l, r) != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        items.extend(next);
    }
}

/// Lomuto partition around the last element. Recurses into the smaller side
/// and loops over the larger one to bound stack depth.
pub fn quick_sort<T, F>(items: &mut [T], compare: F)
where
    F: Fn(&T, &T) -> Ordering,
{
    quick_sort_range(items, &compare);
}

fn quick_sort_range<T, F>(mut items: &mut [T], compare: &F)
where
    F: Fn(&T, &T) -> Ordering,
{
    while items.len() > 1 {
        let pivot = partition(items, compare);
        let (low, rest) = items.split_at_mut(pivot);
        let high = &mut rest[1..];
        if low.len() < high.len() {
            quick_sort_range(low, compare);
            items = high;
        } else {
            quick_sort_range(high, compare);
            items = low;
        }
    }
}

fn partition<T, F>(items: &mut [T], compare: &F) -> usize
where
    F: Fn(&T, &T) -> Ordering,
{
    let high = items.len() - 1;
    let mut store = 0;
    for j in 0..high {
        if compare(&items[j], &items[high]) != Ordering::Greater {
            items.swap(store, j);
            store += 1;
        }
    }
    items.swap(store, high);
    store
}

pub fn heap_sort<T, F>(items: &mut [T], compare: F)
where
    F: Fn(&T, &T) -> Ordering,
{
    let n = items.len();
    for root in (0..n / 2).rev() {
        sift_down(items, root, n, &compare);
    }
    for end in (1..n).rev() {
        items.swap(0, end);
        sift_down(items, 0, end, &compare);
    }
}

fn sift_down<T, F>(items: &mut [T], mut root: usize, len: usize, compare: &F)
where
    F: Fn(&T, &T) -> Ordering,
{
    loop {
        let left = 2 * root + 1;
        let right = left + 1;
        let mut largest = root;
        if left < len && compare(&items[left], &items[largest]) == Ordering::Greater {
            largest = left;
        }
        if right < len && compare(&items[right], &items[largest]) == Ordering::Greater {
            largest = right;
        }
        if largest == root {
            return;
        }
        items.swap(root, largest);
        root = largest;
    }
}

/// Ascending counting sort on an integer key. Returns `false` without
/// touching `items` when the key range exceeds [`MAX_COUNTING_RANGE`].
pub fn counting_sort_by<T, K>(items: &mut Vec<T>, key: K) -> bool
where
    K: Fn(&T) -> u64,
{
    let (Some(min), Some(max)) = (
        items.iter().map(&key).min(),
        items.iter().map(&key).max(),
    ) else {
        return true;
    };
    let range = max - min;
    if range >= MAX_COUNTING_RANGE {
        return false;
    }

    let mut counts = vec![0_usize; range as usize + 1];
    for item in items.iter() {
        counts[(key(item) - min) as usize] += 1;
    }
    for index in 1..counts.len() {
        counts[index] += counts[index - 1];
    }

    let mut slots: Vec<Option<T>> = Vec::with_capacity(items.len());
    slots.resize_with(items.len(), || None);
    for item in items.drain(..).rev() {
        let bucket = (key(&item) - min) as usize;
        counts[bucket] -= 1;
        slots[counts[bucket]] = Some(item);
    }
    items.extend(slots.into_iter().flatten());
    true
}

/// Ascending bucket sort on an integer key: fixed-width buckets over the
/// key range, each finished with insertion sort.
pub fn bucket_sort_by<T, K>(items: &mut Vec<T>, key: K)
where
    K: Fn(&T) -> u64,
{
    let (Some(min), Some(max)) = (
        items.iter().map(&key).min(),
        items.iter().map(&key).max(),
    ) else {
        return;
    };
    let width = u128::from(max - min) + 1;

    let mut buckets: Vec<Vec<T>> = (0..BUCKET_COUNT).map(|_| Vec::new()).collect();
    for item in items.drain(..) {
        let offset = u128::from(key(&item) - min);
        let index = (offset * (BUCKET_COUNT as u128 - 1) / width) as usize;
        buckets[index].push(item);
    }
    for mut bucket in buckets {
        insertion_sort(&mut bucket, |a, b| key(a).cmp(&key(b)));
        items.append(&mut bucket);
    }
}
