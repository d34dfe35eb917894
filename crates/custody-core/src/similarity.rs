//! Sequence similarity for fuzzy field-name matching.
//!
//! Ratcliff/Obershelp "gestalt" matching: find the longest common block,
//! recurse on both sides, and score `2 * matched / (len_a + len_b)`.

/// Similarity in `[0.0, 1.0]`; `1.0` for identical strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched(&a, &b) as f64 / total as f64
}

fn matched(a: &[char], b: &[char]) -> usize {
    let (i, j, k) = longest_block(a, b);
    if k == 0 {
        return 0;
    }
    k + matched(&a[..i], &b[..j]) + matched(&a[i + k..], &b[j + k..])
}

/// Longest common contiguous block; earliest in `a`, then in `b`, on ties.
fn longest_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut cur = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                cur[j + 1] = prev[j] + 1;
                let k = cur[j + 1];
                let start = (i + 1 - k, j + 1 - k);
                if k > best.2 || (k == best.2 && k > 0 && start < (best.0, best.1)) {
                    best = (start.0, start.1, k);
                }
            }
        }
        prev = cur;
    }
    best
}
