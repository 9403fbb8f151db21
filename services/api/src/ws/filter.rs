//! Strips fenced machine-data blocks out of a token stream.
//!
//! The model may emit a ```json block with structured data in the middle
//! of its prose. That block must never reach the client as text or the
//! synthesizer as speech. Because tokens can split the fence anywhere
//! ("``" in one chunk, "`json" in the next), the filter keeps a small
//! look-back buffer, never longer than the opening delimiter, holding the
//! longest suffix of emitted input that could still begin a fence.

const BLOCK_START: &str = "```json";
const BLOCK_END: &str = "```";

#[derive(Debug, Default)]
pub struct InlineDataFilter {
    inside_block: bool,
    lookback: String,
}

impl InlineDataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one token chunk; returns the prose that is safe to forward.
    pub fn push(&mut self, chunk: &str) -> String {
        let mut out = String::with_capacity(chunk.len());
        for c in chunk.chars() {
            if self.inside_block {
                self.lookback.push(c);
                if self.lookback.ends_with(BLOCK_END) {
                    self.inside_block = false;
                    self.lookback.clear();
                } else {
                    // Block content is discarded; only keep enough to spot
                    // the closing fence.
                    while self.lookback.len() > BLOCK_END.len() {
                        self.lookback.remove(0);
                    }
                }
            } else {
                self.lookback.push(c);
                if self.lookback == BLOCK_START {
                    self.inside_block = true;
                    self.lookback.clear();
                    continue;
                }
                // Shed leading chars until the buffer is again a prefix of
                // the opening delimiter; shed chars are plain prose.
                while !self.lookback.is_empty() && !BLOCK_START.starts_with(self.lookback.as_str())
                {
                    let head = self.lookback.remove(0);
                    out.push(head);
                }
            }
        }
        out
    }

    /// Flushes whatever is still buffered once the stream ends. A pending
    /// partial delimiter turns out to be plain prose after all.
    pub fn finish(&mut self) -> String {
        if self.inside_block {
            // Unterminated block: its content was never prose.
            self.lookback.clear();
            return String::new();
        }
        std::mem::take(&mut self.lookback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> String {
        let mut filter = InlineDataFilter::new();
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&filter.push(chunk));
        }
        out.push_str(&filter.finish());
        out
    }

    #[test]
    fn passes_plain_prose_through() {
        assert_eq!(run(&["Goedemiddag, ", "waar gaat het over?"]),
            "Goedemiddag, waar gaat het over?");
    }

    #[test]
    fn strips_a_whole_block_in_one_chunk() {
        assert_eq!(
            run(&["Prima. ```json{\"score\": 10}``` Vertel verder."]),
            "Prima.  Vertel verder."
        );
    }

    #[test]
    fn strips_a_block_split_across_chunks() {
        assert_eq!(
            run(&["Prima. ``", "`js", "on{\"sc", "ore\": 10}`", "``", " Verder."]),
            "Prima.  Verder."
        );
    }

    #[test]
    fn delimiter_split_one_char_per_chunk() {
        let chunks: Vec<String> = "Zo. ```json{}``` Ja.".chars().map(String::from).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        assert_eq!(run(&refs), "Zo.  Ja.");
    }

    #[test]
    fn stray_backticks_are_prose() {
        assert_eq!(run(&["gebruik ``` voor code"]), "gebruik ``` voor code");
        assert_eq!(run(&["a``b"]), "a``b");
    }

    #[test]
    fn partial_delimiter_at_stream_end_is_flushed() {
        assert_eq!(run(&["tot zo ``"]), "tot zo ``");
        assert_eq!(run(&["tot zo ```js"]), "tot zo ```js");
    }

    #[test]
    fn unterminated_block_is_dropped() {
        assert_eq!(run(&["oké ```json{\"a\":"]), "oké ");
    }

    #[test]
    fn multiple_blocks() {
        assert_eq!(
            run(&["een```json{}```twee```json{}```drie"]),
            "eentweedrie"
        );
    }
}
