use crate::encoding::TokenSpan;
use std::ops::Range;

const SENTENCE_TERMINATORS: [char; 4] = ['.', '!', '?', ';'];

/// Plans chunk boundaries over an encoded text.
///
/// Produces contiguous span ranges covering every span exactly once, in source order. Window
/// sizes are measured in tokens, not spans: a range never holds more than `max_tokens` tokens
/// unless a single span alone is larger, in which case that span becomes its own range.
pub struct SplitPlanner<'a> {
    text: &'a str,
    spans: &'a [TokenSpan],
    // cumulative[i] = tokens in spans[..i]
    cumulative: Vec<usize>,
    min_tokens: usize,
    max_tokens: usize,
}

impl<'a> SplitPlanner<'a> {
    pub fn new(
        text: &'a str,
        spans: &'a [TokenSpan],
        min_tokens: usize,
        max_tokens: usize,
    ) -> Self {
        let mut cumulative = Vec::with_capacity(spans.len() + 1);
        let mut total = 0;
        cumulative.push(total);
        for span in spans {
            total += span.tokens;
            cumulative.push(total);
        }

        Self {
            text,
            spans,
            cumulative,
            min_tokens,
            max_tokens,
        }
    }

    pub fn plan(&self) -> Vec<Range<usize>> {
        let total = self.spans.len();
        let max = self.max_tokens.max(1);
        let min = self.min_tokens.clamp(1, max);
        let mut ranges = Vec::with_capacity(self.total_tokens() / max + 1);
        let mut start = 0;

        while start < total {
            let hard_end = self.window_end(start, max);
            if hard_end == total {
                ranges.push(start..total);
                break;
            }

            // Prefer a sentence boundary that still leaves at least `min_tokens` in the chunk.
            let floor = (start..hard_end)
                .find(|&idx| self.token_count(&(start..idx + 1)) >= min)
                .unwrap_or(hard_end);
            let cut = (floor..hard_end)
                .rev()
                .find(|&idx| self.ends_sentence(idx))
                .map_or(hard_end, |idx| idx + 1);

            ranges.push(start..cut);
            start = cut;
        }

        self.merge_short_tail(&mut ranges);
        ranges
    }

    /// Tokens held by a span range
    pub fn token_count(&self, spans: &Range<usize>) -> usize {
        self.cumulative[spans.end] - self.cumulative[spans.start]
    }

    pub fn total_tokens(&self) -> usize {
        self.cumulative[self.spans.len()]
    }

    /// Byte range of the source text covered by a span range
    pub fn byte_range(&self, spans: &Range<usize>) -> Range<usize> {
        if spans.is_empty() {
            return 0..0;
        }
        self.spans[spans.start].start..self.spans[spans.end - 1].end
    }

    /// End of the longest window starting at `start` that fits `max` tokens, never empty.
    fn window_end(&self, start: usize, max: usize) -> usize {
        let limit = self.cumulative[start] + max;
        let fits = self.cumulative.partition_point(|&count| count <= limit) - 1;
        fits.clamp(start + 1, self.spans.len())
    }

    fn ends_sentence(&self, idx: usize) -> bool {
        let span = self.spans[idx];
        let ends_with_terminator = self.text[span.start..span.end]
            .chars()
            .next_back()
            .is_some_and(|c| SENTENCE_TERMINATORS.contains(&c));
        if ends_with_terminator {
            return true;
        }

        self.spans
            .get(idx + 1)
            .is_some_and(|next| self.text[span.end..next.start].contains('\n'))
    }

    fn merge_short_tail(&self, ranges: &mut Vec<Range<usize>>) {
        if ranges.len() < 2 {
            return;
        }
        let last = ranges[ranges.len() - 1].clone();
        let prev = ranges[ranges.len() - 2].clone();
        let last_tokens = self.token_count(&last);
        let fits = self.token_count(&prev) + last_tokens <= self.max_tokens;
        if last_tokens < self.min_tokens && fits {
            ranges.pop();
            if let Some(prev) = ranges.last_mut() {
                prev.end = last.end;
            }
        }
    }
}
