//! Plate string similarity
//!
//! Ratcliff/Obershelp style ratio: recursively take the longest common
//! contiguous block, then repeat on the unmatched text to its left and right.
//! The score is `2 * M / T * 100` where `M` is the number of matched
//! characters and `T` the combined length of both strings.

use std::collections::HashMap;

/// Sequence lengths at or above this size get the popular-element heuristic
const AUTOJUNK_MIN_LEN: usize = 200;

/// Similarity of two strings in `[0, 100]`.
///
/// Identical strings (including two empty strings) score 100; a non-empty
/// string against an empty one scores 0. The longest-block search breaks ties
/// by position, which can make the raw ratio order-dependent, so both
/// orderings are evaluated and the higher one is returned.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }

    let matched = matching_characters(&a, &b).max(matching_characters(&b, &a));
    200.0 * matched as f64 / total as f64
}

/// Number of characters covered by the matching blocks of `a` against `b`
fn matching_characters(a: &[char], b: &[char]) -> usize {
    let matcher = BlockMatcher::new(a, b);
    matcher.matching_blocks().iter().map(|block| block.2).sum()
}

struct BlockMatcher<'a> {
    a: &'a [char],
    b: &'a [char],
    /// Positions of each character in `b`, minus popular characters
    b2j: HashMap<char, Vec<usize>>,
}

impl<'a> BlockMatcher<'a> {
    fn new(a: &'a [char], b: &'a [char]) -> Self {
        let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, &c) in b.iter().enumerate() {
            b2j.entry(c).or_default().push(j);
        }

        let n = b.len();
        if n >= AUTOJUNK_MIN_LEN {
            let popular_limit = n / 100 + 1;
            b2j.retain(|_, positions| positions.len() <= popular_limit);
        }

        Self { a, b, b2j }
    }

    /// Longest block `(i, j, k)` with `a[i..i+k] == b[j..j+k]` inside the
    /// given window. Earliest `i`, then earliest `j`, wins ties.
    fn longest_match(
        &self,
        alo: usize,
        ahi: usize,
        blo: usize,
        bhi: usize,
    ) -> (usize, usize, usize) {
        let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
        let mut j2len: HashMap<usize, usize> = HashMap::new();

        for i in alo..ahi {
            let mut next_j2len: HashMap<usize, usize> = HashMap::new();
            if let Some(positions) = self.b2j.get(&self.a[i]) {
                for &j in positions {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let k = j
                        .checked_sub(1)
                        .and_then(|prev| j2len.get(&prev))
                        .copied()
                        .unwrap_or(0)
                        + 1;
                    next_j2len.insert(j, k);
                    if k > best_k {
                        best_i = i + 1 - k;
                        best_j = j + 1 - k;
                        best_k = k;
                    }
                }
            }
            j2len = next_j2len;
        }

        // Popular characters are missing from b2j; grow the block over them
        while best_i > alo && best_j > blo && self.a[best_i - 1] == self.b[best_j - 1] {
            best_i -= 1;
            best_j -= 1;
            best_k += 1;
        }
        while best_i + best_k < ahi
            && best_j + best_k < bhi
            && self.a[best_i + best_k] == self.b[best_j + best_k]
        {
            best_k += 1;
        }

        (best_i, best_j, best_k)
    }

    fn matching_blocks(&self) -> Vec<(usize, usize, usize)> {
        let mut queue = vec![(0, self.a.len(), 0, self.b.len())];
        let mut blocks = Vec::new();

        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let (i, j, k) = self.longest_match(alo, ahi, blo, bhi);
            if k == 0 {
                continue;
            }
            blocks.push((i, j, k));
            if alo < i && blo < j {
                queue.push((alo, i, blo, j));
            }
            if i + k < ahi && j + k < bhi {
                queue.push((i + k, ahi, j + k, bhi));
            }
        }

        blocks.sort_unstable();
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_identity_scores_100() {
        for s in ["", "А", "А123АВ77", "ООО000", "abcabcabc"] {
            assert_close(similarity(s, s), 100.0);
        }
    }

    #[test]
    fn test_against_empty_scores_zero() {
        assert_close(similarity("А123АВ77", ""), 0.0);
        assert_close(similarity("", "7"), 0.0);
    }

    #[test]
    fn test_disjoint_scores_zero() {
        assert_close(similarity("АВС", "123"), 0.0);
    }

    #[test]
    fn test_known_ratios() {
        // "bcd" shared: 2 * 3 / 8
        assert_close(similarity("abcd", "bcde"), 75.0);
        // one trailing digit extra: 2 * 8 / 17
        assert_close(similarity("А123АВ77", "А123АВ777"), 1600.0 / 17.0);
        // one substituted letter: 2 * 7 / 16
        assert_close(similarity("А123АВ77", "А123АК77"), 87.5);
    }

    #[test]
    fn test_symmetric_where_block_order_matters() {
        // Taking the leftmost longest block of "tide" first finds only one
        // character; the other order finds two.
        assert_close(similarity("tide", "diet"), 50.0);
        assert_close(similarity("diet", "tide"), 50.0);
    }

    #[test]
    fn test_symmetric_on_plate_pairs() {
        let plates = ["А123АВ77", "В123АА77", "А321ВА77", "123", "Х777ХХ799", ""];
        for a in plates {
            for b in plates {
                assert_close(similarity(a, b), similarity(b, a));
            }
        }
    }

    #[test]
    fn test_long_inputs_use_popular_element_heuristic() {
        let a: String = "0".repeat(250);
        let mut b = a.clone();
        b.push('1');
        let score = similarity(&a, &b);
        assert!(score > 99.0 && score < 100.0, "{score}");
    }

    #[test]
    fn test_matching_blocks_cover_shared_text() {
        let a: Vec<char> = "А123АВ77".chars().collect();
        let b: Vec<char> = "ХА123АВ7".chars().collect();
        assert_eq!(matching_characters(&a, &b), 7);
    }
}
