use std::collections::VecDeque;
use std::io;

use futures_util::{Stream, stream};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::DELIMITER;

/// Longest line (in bytes, delimiter excluded) a framer buffers by default.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

const READ_CHUNK: usize = 4 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// More than `limit` bytes arrived without a delimiter.
    #[error("line exceeds {limit} bytes")]
    Overflow { limit: usize },

    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Splits a byte stream into lines.
///
/// Bytes may arrive in arbitrary chunks. Complete lines are returned in arrival order with the
/// delimiter (and a `\r` directly in front of it) removed. An unterminated tail stays buffered
/// and is prefixed to the next chunk.
#[derive(Debug)]
pub struct LineFramer {
    pending: Vec<u8>,
    max_line_length: usize,
    keep_empty: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineFramer {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_length,
            keep_empty: false,
        }
    }

    /// Also yield zero length lines. By default they are dropped.
    pub fn keep_empty(mut self) -> Self {
        self.keep_empty = true;
        self
    }

    /// Consume the next chunk and return every line it completes.
    ///
    /// Once an overflow has been reported the framer should be discarded together with its
    /// connection; lines completed earlier in the same chunk are not returned.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, FramingError> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == DELIMITER) {
            self.pending.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];

            let mut raw = std::mem::take(&mut self.pending);
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            self.check_length(raw.len())?;
            if raw.is_empty() && !self.keep_empty {
                continue;
            }
            lines.push(String::from_utf8_lossy(&raw).into_owned());
        }
        self.pending.extend_from_slice(rest);
        // A trailing `\r` may still turn out to be part of the delimiter
        let tail = self.pending.len() - usize::from(self.pending.last() == Some(&b'\r'));
        self.check_length(tail)?;
        Ok(lines)
    }

    /// Number of buffered bytes still waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// The unterminated tail left over at end of input, if any.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }

    fn check_length(&self, len: usize) -> Result<(), FramingError> {
        if len > self.max_line_length {
            Err(FramingError::Overflow {
                limit: self.max_line_length,
            })
        } else {
            Ok(())
        }
    }
}

struct LineReader<R> {
    reader: R,
    framer: LineFramer,
    ready: VecDeque<String>,
    buf: Box<[u8]>,
    done: bool,
}

/// Lazily frame `reader` into lines.
///
/// The stream ends at end of input; an unterminated tail is dropped. After the first error no
/// further items are produced.
pub fn lines<R>(reader: R, framer: LineFramer) -> impl Stream<Item = Result<String, FramingError>>
where
    R: AsyncRead + Unpin,
{
    let state = LineReader {
        reader,
        framer,
        ready: VecDeque::new(),
        buf: vec![0; READ_CHUNK].into_boxed_slice(),
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.done {
                return None;
            }
            match state.reader.read(&mut state.buf).await {
                Ok(0) => state.done = true,
                Ok(n) => match state.framer.feed(&state.buf[..n]) {
                    Ok(lines) => state.ready.extend(lines),
                    Err(err) => {
                        state.done = true;
                        return Some((Err(err), state));
                    }
                },
                Err(err) => {
                    state.done = true;
                    return Some((Err(err.into()), state));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures_util::StreamExt;
    use proptest::prelude::*;

    fn feed_all(framer: &mut LineFramer, chunks: &[&[u8]]) -> Vec<String> {
        chunks
            .iter()
            .flat_map(|chunk| framer.feed(chunk).unwrap())
            .collect()
    }

    #[test]
    fn splits_on_line_feed() {
        let mut framer = LineFramer::default();
        let lines = framer.feed(b"hello\nworld\n").unwrap();
        assert_eq!(lines, vec!["hello", "world"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn partial_line_waits_for_next_chunk() {
        let mut framer = LineFramer::default();
        assert!(framer.feed(b"hel").unwrap().is_empty());
        assert_eq!(framer.pending(), 3);
        assert_eq!(framer.feed(b"lo\nwor").unwrap(), vec!["hello"]);
        assert_eq!(framer.finish().as_deref(), Some("wor"));
    }

    #[test]
    fn strips_carriage_return_before_delimiter() {
        let mut framer = LineFramer::default();
        let lines = feed_all(&mut framer, &[b"one\r", b"\ntwo\r\n"]);
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn empty_lines_are_dropped_but_whitespace_is_kept() {
        let mut framer = LineFramer::default();
        let lines = framer.feed(b"\n\r\n  \nx\n").unwrap();
        assert_eq!(lines, vec!["  ", "x"]);
    }

    #[test]
    fn keep_empty_yields_zero_length_lines() {
        let mut framer = LineFramer::default().keep_empty();
        let lines = framer.feed(b"\nname\n").unwrap();
        assert_eq!(lines, vec!["", "name"]);
    }

    #[test]
    fn overflow_without_delimiter() {
        let mut framer = LineFramer::new(4);
        assert!(framer.feed(b"abcd").unwrap().is_empty());
        assert_matches!(framer.feed(b"e"), Err(FramingError::Overflow { limit: 4 }));
    }

    #[test]
    fn line_at_the_limit_may_split_before_the_line_feed() {
        let mut framer = LineFramer::new(4);
        assert!(framer.feed(b"abcd\r").unwrap().is_empty());
        assert_eq!(framer.feed(b"\n").unwrap(), vec!["abcd"]);

        let mut framer = LineFramer::new(4);
        assert!(framer.feed(b"abcd\r").unwrap().is_empty());
        assert_matches!(framer.feed(b"e"), Err(FramingError::Overflow { limit: 4 }));
    }

    #[test]
    fn overflow_on_complete_line() {
        let mut framer = LineFramer::new(4);
        assert_matches!(
            framer.feed(b"abcdefgh\n"),
            Err(FramingError::Overflow { limit: 4 })
        );
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut framer = LineFramer::default();
        let lines = framer.feed(b"a\xffb\n").unwrap();
        assert_eq!(lines, vec!["a\u{fffd}b"]);
    }

    #[tokio::test]
    async fn stream_yields_lines_and_drops_tail() {
        let input: &[u8] = b"first\nsecond\n\nunterminated";
        let collected: Vec<String> = lines(input, LineFramer::default())
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(collected, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn stream_stops_after_overflow() {
        let input: &[u8] = b"ok\nthis line is far too long\nnever\n";
        let mut stream = Box::pin(lines(input, LineFramer::new(8)));
        // The whole input fits into one read, so the overflow hides the first line.
        assert_matches!(
            stream.next().await,
            Some(Err(FramingError::Overflow { limit: 8 }))
        );
        assert!(stream.next().await.is_none());
    }

    fn feed_split(framer: &mut LineFramer, input: &[u8], cuts: Vec<usize>) -> Vec<String> {
        let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(input.len())).collect();
        cuts.sort_unstable();
        let mut lines = Vec::new();
        let mut start = 0;
        for cut in cuts.into_iter().chain(std::iter::once(input.len())) {
            lines.extend(framer.feed(&input[start..cut]).unwrap());
            start = cut;
        }
        lines
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_lines_at_the_limit(
            lines in proptest::collection::vec("[a-z]{0,4}\r?", 0..8),
            cuts in proptest::collection::vec(0usize..64, 0..8),
        ) {
            let input: Vec<u8> = lines
                .iter()
                .flat_map(|line| line.bytes().chain(std::iter::once(b'\n')))
                .collect();

            let expected = LineFramer::new(4).feed(&input).unwrap();
            let mut split = LineFramer::new(4);
            let actual = feed_split(&mut split, &input, cuts);

            prop_assert_eq!(actual, expected);
            prop_assert_eq!(split.pending(), 0);
        }

        #[test]
        fn chunking_does_not_change_lines(
            lines in proptest::collection::vec("[a-z \r]{0,12}", 0..8),
            cuts in proptest::collection::vec(0usize..128, 0..8),
        ) {
            let input: Vec<u8> = lines
                .iter()
                .flat_map(|line| line.bytes().chain(std::iter::once(b'\n')))
                .collect();

            let mut whole = LineFramer::default();
            let expected = whole.feed(&input).unwrap();

            let mut split = LineFramer::default();
            let actual = feed_split(&mut split, &input, cuts);

            prop_assert_eq!(actual, expected);
            prop_assert_eq!(split.pending(), 0);
        }
    }
}
