//! Half-open token ranges.

use std::fmt;

/// A contiguous slice `[start, end)` of the store's token space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenRange {
    start: i64,
    end: i64,
}

impl TokenRange {
    /// Returns `None` if `start > end`.
    pub const fn new(start: i64, end: i64) -> Option<Self> {
        if start > end {
            None
        } else {
            Some(Self { start, end })
        }
    }

    /// The whole token space, `[i64::MIN, i64::MAX)`.
    ///
    /// The single token `i64::MAX` is not representable as a half-open end
    /// and is left out; see [`TokenRange::excludes_last_token`].
    pub const fn full() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    pub const fn start(&self) -> i64 {
        self.start
    }

    pub const fn end(&self) -> i64 {
        self.end
    }

    /// Number of tokens in the range.
    pub fn len(&self) -> u64 {
        (i128::from(self.end) - i128::from(self.start)) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the range runs to the top of the token space, leaving out
    /// only `i64::MAX`, which no half-open range can include.
    pub const fn excludes_last_token(&self) -> bool {
        self.end == i64::MAX
    }

    pub fn contains(&self, token: i64) -> bool {
        (self.start..self.end).contains(&token)
    }

    /// Split into at most `parts` contiguous sub-ranges covering exactly this
    /// range, in token order. Sizes differ by at most one token.
    ///
    /// An empty range splits into itself; a range shorter than `parts`
    /// splits into single-token ranges.
    pub fn split(&self, parts: usize) -> Vec<TokenRange> {
        let len = u128::from(self.len());
        if len == 0 {
            return vec![*self];
        }

        let parts = (parts.max(1) as u128).min(len);
        let base = len / parts;
        let remainder = len % parts;

        let mut ranges = Vec::with_capacity(parts as usize);
        let mut cursor = i128::from(self.start);
        for i in 0..parts {
            let size = base + u128::from(i < remainder);
            let next = cursor + size as i128;
            ranges.push(TokenRange {
                start: cursor as i64,
                end: next as i64,
            });
            cursor = next;
        }
        ranges
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
