//! Fuzzy string scores on a 0..=100 scale.
//!
//! `ratio` is the normalized indel similarity (2·LCS / (|a| + |b|)). The partial
//! and token variants build on it the usual way: best aligned window, sorted
//! tokens, and intersection/remainder token sets.

use std::collections::BTreeSet;

/// Length of the longest common subsequence.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                cur[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * lcs_len(a, b) as f64 / total as f64
}

pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// Longest common substring inside `a[alo..ahi]` × `b[blo..bhi]` as `(i, j, len)`.
fn longest_block(a: &[char], b: &[char], alo: usize, ahi: usize, blo: usize, bhi: usize) -> (usize, usize, usize) {
    let mut best = (alo, blo, 0usize);
    let mut prev = vec![0usize; bhi - blo + 1];
    let mut cur = vec![0usize; bhi - blo + 1];
    for i in alo..ahi {
        for j in blo..bhi {
            let k = j - blo + 1;
            cur[k] = if a[i] == b[j] { prev[k - 1] + 1 } else { 0 };
            if cur[k] > best.2 {
                best = (i + 1 - cur[k], j + 1 - cur[k], cur[k]);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}

fn matching_blocks(a: &[char], b: &[char]) -> Vec<(usize, usize, usize)> {
    let mut out = Vec::new();
    let mut stack = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = stack.pop() {
        if alo >= ahi || blo >= bhi {
            continue;
        }
        let (i, j, k) = longest_block(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        out.push((i, j, k));
        stack.push((alo, i, blo, j));
        stack.push((i + k, ahi, j + k, bhi));
    }
    out.sort_unstable();
    out
}

/// Best `ratio` of the shorter string against equally long windows of the longer
/// one, anchored on their common blocks.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return if long.is_empty() { 100.0 } else { 0.0 };
    }

    let mut best = 0.0f64;
    for (i, j, _) in matching_blocks(&short, &long) {
        let start = j.saturating_sub(i);
        let end = (start + short.len()).min(long.len());
        let r = ratio_chars(&short, &long[start..end]);
        if r > 99.5 {
            return 100.0;
        }
        best = best.max(r);
    }
    best
}

fn sorted_tokens(s: &str) -> Vec<&str> {
    let mut t: Vec<&str> = s.split_whitespace().collect();
    t.sort_unstable();
    t
}

pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a).join(" "), &sorted_tokens(b).join(" "))
}

/// Compares the shared tokens against each side's shared-plus-remainder. Any
/// string whose tokens are a subset of the other's scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let inter: Vec<&str> = ta.intersection(&tb).copied().collect();
    let diff_ab: Vec<&str> = ta.difference(&tb).copied().collect();
    let diff_ba: Vec<&str> = tb.difference(&ta).copied().collect();
    if !inter.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100.0;
    }

    let sect = inter.join(" ");
    let join = |rest: &[&str]| {
        if sect.is_empty() {
            rest.join(" ")
        } else {
            format!("{} {}", sect, rest.join(" "))
        }
    };
    let combined_a = join(&diff_ab);
    let combined_b = join(&diff_ba);

    let mut best = ratio(&combined_a, &combined_b);
    if !sect.is_empty() {
        best = best.max(ratio(&sect, &combined_a));
        best = best.max(ratio(&sect, &combined_b));
    }
    best
}

/// Word-set overlap in [0, 1]; two empty inputs count as identical.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    let union = ta.union(&tb).count();
    if union == 0 {
        return 1.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}
