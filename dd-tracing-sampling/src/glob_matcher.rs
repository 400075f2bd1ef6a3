// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Mutex;

const MATCH_CACHE_SIZE: usize = 256;

/// A backtracking implementation of the glob matching algorithm.
///
/// The pattern language supports `*` as a multiple character wildcard
/// (including the empty string) and `?` as a single character wildcard. The
/// match is case insensitive.
pub struct GlobMatcher {
    /// The original glob pattern
    pattern: String,
    /// Lowercased pattern for case-insensitive matching
    pattern_lower: String,
    /// LRU cache of previously matched subjects to their results
    cache: Mutex<LruCache<String, bool>>,
}

impl fmt::Debug for GlobMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobMatcher")
            .field("pattern", &self.pattern)
            .finish()
    }
}

impl GlobMatcher {
    pub fn new(pattern: &str) -> Self {
        let cache_size = NonZeroUsize::new(MATCH_CACHE_SIZE).unwrap();
        GlobMatcher {
            pattern: pattern.to_string(),
            pattern_lower: pattern.to_lowercase(),
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Returns the original pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Checks if the given subject matches the glob pattern, case
    /// insensitively.
    pub fn matches(&self, subject: &str) -> bool {
        let subject_lower = subject.to_lowercase();

        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(&result) = cache.get(&subject_lower) {
                return result;
            }
        }

        let result = glob_match(self.pattern_lower.as_bytes(), subject_lower.as_bytes());

        let mut cache = self.cache.lock().unwrap();
        cache.put(subject_lower, result);
        result
    }
}

fn glob_match(pattern: &[u8], subject: &[u8]) -> bool {
    let mut px = 0; // Pattern index
    let mut sx = 0; // Subject index
    let mut next_px = 0; // Next backtracking pattern index
    let mut next_sx = 0; // Next backtracking subject index

    while px < pattern.len() || sx < subject.len() {
        if px < pattern.len() {
            match pattern[px] {
                b'?' => {
                    if sx < subject.len() {
                        px += 1;
                        sx += 1;
                        continue;
                    }
                }
                b'*' => {
                    next_px = px;
                    next_sx = sx + 1;
                    px += 1;
                    continue;
                }
                c => {
                    if sx < subject.len() && subject[sx] == c {
                        px += 1;
                        sx += 1;
                        continue;
                    }
                }
            }
        }

        // Mismatch: backtrack to the last `*` if it can still consume more of
        // the subject
        if 0 < next_sx && next_sx <= subject.len() {
            px = next_px;
            sx = next_sx;
            continue;
        }

        return false;
    }

    // Both the pattern and the subject were consumed entirely
    true
}

impl Clone for GlobMatcher {
    fn clone(&self) -> Self {
        // Each instance maintains its own cache
        GlobMatcher::new(&self.pattern)
    }
}
