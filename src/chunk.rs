//! Token-aware sentence chunker with overlap.
//!
//! Splits document text into [`ChunkDraft`]s bounded by `min_tokens` /
//! `max_tokens`, carrying an overlap suffix from each chunk into the next
//! so retrieval never loses context at a boundary. Markdown and HTML
//! inputs are pre-split into header-labelled sections, each chunked
//! independently.
//!
//! Chunking never fails: malformed input degrades to fewer (or zero)
//! chunks. A trailing buffer below `min_tokens` is dropped rather than
//! emitted as a low-value short chunk.

use regex::Regex;

use crate::config::ChunkingConfig;
use crate::llm::TokenCounter;
use crate::models::ChunkDraft;

pub struct Chunker<'a> {
    counter: &'a dyn TokenCounter,
    min_tokens: usize,
    max_tokens: usize,
    overlap_percent: f64,
}

impl<'a> Chunker<'a> {
    pub fn new(config: &ChunkingConfig, counter: &'a dyn TokenCounter) -> Self {
        Self {
            counter,
            min_tokens: config.min_tokens,
            max_tokens: config.max_tokens,
            overlap_percent: config.overlap_percent,
        }
    }

    /// Chunk plain text into overlapping, token-bounded segments.
    /// Empty or whitespace-only input yields an empty vec.
    pub fn chunk_text(&self, text: &str, title: &str, section: &str) -> Vec<ChunkDraft> {
        let text = normalize_text(text);
        if text.is_empty() {
            return Vec::new();
        }

        let sentences = split_into_sentences(&text);

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;

        for sentence in sentences {
            let sentence_tokens = self.counter.count_tokens(&sentence);

            if current_tokens + sentence_tokens > self.max_tokens && !current.is_empty() {
                let closed_text = current.trim().to_string();
                let closed_tokens = current_tokens;
                chunks.push(ChunkDraft {
                    text: closed_text,
                    tokens: closed_tokens,
                    title: title.to_string(),
                    section: section.to_string(),
                });

                // Seed the next buffer with the overlap suffix, then the
                // sentence that triggered the close. The seeded buffer is
                // recounted as a whole.
                let overlap = self.overlap_suffix(&current);
                current = if overlap.is_empty() {
                    sentence.clone()
                } else {
                    format!("{} {}", overlap, sentence)
                };
                current_tokens = self.counter.count_tokens(&current);
            } else {
                if current.is_empty() {
                    current = sentence.clone();
                } else {
                    current.push(' ');
                    current.push_str(&sentence);
                }
                current_tokens += sentence_tokens;
            }
        }

        if !current.is_empty() && current_tokens >= self.min_tokens {
            chunks.push(ChunkDraft {
                text: current.trim().to_string(),
                tokens: current_tokens,
                title: title.to_string(),
                section: section.to_string(),
            });
        }

        chunks
    }

    /// Chunk markdown, preserving header structure as section labels.
    pub fn chunk_markdown(&self, markdown: &str, title: &str) -> Vec<ChunkDraft> {
        if markdown.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        for (section_name, section_body) in split_markdown_sections(markdown) {
            chunks.extend(self.chunk_text(&section_body, title, &section_name));
        }
        chunks
    }

    /// Chunk HTML, using `<h1>`–`<h6>` text as section labels.
    pub fn chunk_html(&self, html: &str, title: &str) -> Vec<ChunkDraft> {
        if html.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        for (section_name, section_body) in split_html_sections(html) {
            chunks.extend(self.chunk_text(&section_body, title, &section_name));
        }
        chunks
    }

    /// Last words of `text` whose cumulative token count stays within
    /// `overlap_percent` of the whole text's token count, walked in
    /// reverse.
    fn overlap_suffix(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let total_tokens = self.counter.count_tokens(text);
        let budget = (total_tokens as f64 * self.overlap_percent) as usize;

        let words: Vec<&str> = text.split_whitespace().collect();
        let mut taken: Vec<&str> = Vec::new();
        let mut used = 0usize;

        for word in words.iter().rev() {
            let word_tokens = self.counter.count_tokens(word);
            if used + word_tokens > budget {
                break;
            }
            taken.push(word);
            used += word_tokens;
        }

        taken.reverse();
        taken.join(" ")
    }
}

/// Unescape HTML entities, collapse all whitespace runs (including
/// newlines) to single spaces, and trim.
pub fn normalize_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = unescape_entities(text);

    let ws = Regex::new(r"\s+").unwrap();
    ws.replace_all(&text, " ").trim().to_string()
}

/// Decode the common named and numeric HTML entities.
fn unescape_entities(text: &str) -> String {
    let mut out = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ");

    let numeric = Regex::new(r"&#(\d+);").unwrap();
    if numeric.is_match(&out) {
        out = numeric
            .replace_all(&out, |caps: &regex::Captures| {
                caps[1]
                    .parse::<u32>()
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .to_string();
    }

    out
}

/// Split on terminal punctuation followed by whitespace; candidates of
/// 10 characters or fewer are discarded as noise.
fn split_into_sentences(text: &str) -> Vec<String> {
    let boundary = Regex::new(r"[.!?]\s+").unwrap();

    let mut sentences = Vec::new();
    let mut start = 0usize;
    for m in boundary.find_iter(text) {
        // Keep the punctuation with the sentence it terminates
        let end = m.start() + 1;
        push_sentence(&mut sentences, &text[start..end]);
        start = m.end();
    }
    push_sentence(&mut sentences, &text[start..]);

    sentences
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let s = raw.trim();
    if s.len() > 10 {
        sentences.push(s.to_string());
    }
}

/// Split markdown into `(header, body)` sections on level 1–6 headers.
/// Text before the first header lands in an unnamed section.
fn split_markdown_sections(markdown: &str) -> Vec<(String, String)> {
    let header = Regex::new(r"^(#{1,6})\s+(.+)$").unwrap();

    let mut sections = Vec::new();
    let mut current_name = String::new();
    let mut current_body = String::new();

    for line in markdown.lines() {
        if let Some(caps) = header.captures(line) {
            if !current_body.trim().is_empty() {
                sections.push((current_name.clone(), current_body.trim().to_string()));
            }
            current_name = caps[2].trim().to_string();
            current_body.clear();
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }

    if !current_body.trim().is_empty() {
        sections.push((current_name, current_body.trim().to_string()));
    }

    sections
}

/// Split HTML into `(header, body)` sections on `<h1>`–`<h6>` tags,
/// stripping remaining markup from both.
fn split_html_sections(html: &str) -> Vec<(String, String)> {
    let header = Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>").unwrap();

    let mut sections = Vec::new();
    let mut current_name = String::new();
    let mut last_end = 0usize;

    for caps in header.captures_iter(html) {
        let m = caps.get(0).unwrap();
        let body = strip_tags(&html[last_end..m.start()]);
        if !body.trim().is_empty() {
            sections.push((current_name.clone(), body.trim().to_string()));
        }
        current_name = strip_tags(&caps[2]).trim().to_string();
        last_end = m.end();
    }

    let tail = strip_tags(&html[last_end..]);
    if !tail.trim().is_empty() {
        sections.push((current_name, tail.trim().to_string()));
    }

    sections
}

fn strip_tags(html: &str) -> String {
    let tags = Regex::new(r"<[^>]+>").unwrap();
    tags.replace_all(html, " ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::WordCounter;

    fn chunker(counter: &WordCounter, min: usize, max: usize, overlap: f64) -> Chunker<'_> {
        let config = ChunkingConfig {
            min_tokens: min,
            max_tokens: max,
            overlap_percent: overlap,
        };
        Chunker::new(&config, counter)
    }

    fn sentences(count: usize, words_per_sentence: usize) -> String {
        (0..count)
            .map(|i| {
                let words: Vec<String> = (0..words_per_sentence)
                    .map(|w| format!("word{}x{}", i, w))
                    .collect();
                format!("{}.", words.join(" "))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let counter = WordCounter;
        let c = chunker(&counter, 5, 50, 0.15);
        assert!(c.chunk_text("", "t", "").is_empty());
        assert!(c.chunk_text("   \n\t  ", "t", "").is_empty());
    }

    #[test]
    fn test_token_bounds_hold_for_all_but_last() {
        let counter = WordCounter;
        let c = chunker(&counter, 10, 40, 0.1);
        let text = sentences(30, 8);
        let chunks = c.chunk_text(&text, "t", "s");
        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.tokens <= 40, "chunk too large: {}", chunk.tokens);
            assert!(chunk.tokens >= 10, "chunk too small: {}", chunk.tokens);
        }
    }

    #[test]
    fn test_overlap_drawn_from_previous_suffix() {
        let counter = WordCounter;
        let c = chunker(&counter, 5, 20, 0.25);
        let text = sentences(10, 6);
        let chunks = c.chunk_text(&text, "t", "");
        assert!(chunks.len() > 1);

        // Test sentences use globally unique words, so the leading run of
        // next-chunk words that also occur in the previous chunk is
        // exactly the overlap suffix.
        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].text.split_whitespace().collect();
            let next: Vec<&str> = pair[1].text.split_whitespace().collect();
            let budget = (pair[0].tokens as f64 * 0.25) as usize;

            let overlap: Vec<&str> = next
                .iter()
                .take_while(|w| prev.contains(*w))
                .copied()
                .collect();

            assert!(
                overlap.len() <= budget,
                "overlap {} exceeds budget {}",
                overlap.len(),
                budget
            );
            assert_eq!(&prev[prev.len() - overlap.len()..], overlap.as_slice());
        }
    }

    #[test]
    fn test_trailing_partial_chunk_dropped() {
        // Three short sentences well below min_tokens: output is empty.
        let counter = WordCounter;
        let c = chunker(&counter, 300, 800, 0.15);
        let text = "This is the first sentence of the input. \
                    Here follows a second short sentence. \
                    And finally a third one closes it.";
        let chunks = c.chunk_text(text, "t", "");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_short_candidates_filtered() {
        let counter = WordCounter;
        let c = chunker(&counter, 1, 50, 0.0);
        // "Hi. Ok." are under the 10-char noise floor and vanish
        let chunks = c.chunk_text("Hi. Ok. This sentence is long enough to keep.", "t", "");
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].text.contains("Hi"));
    }

    #[test]
    fn test_deterministic() {
        let counter = WordCounter;
        let c = chunker(&counter, 5, 30, 0.2);
        let text = sentences(12, 7);
        let a = c.chunk_text(&text, "t", "");
        let b = c.chunk_text(&text, "t", "");
        assert_eq!(a, b);
    }

    #[test]
    fn test_markdown_sections_labelled() {
        let counter = WordCounter;
        let c = chunker(&counter, 1, 100, 0.1);
        let md = "# Setup\n\nInstall the binary and run the init command once.\n\n\
                  ## Configuration\n\nEdit the TOML file to point at your database path.";
        let chunks = c.chunk_markdown(md, "guide");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section, "Setup");
        assert_eq!(chunks[1].section, "Configuration");
        assert!(chunks[0].title == "guide");
    }

    #[test]
    fn test_markdown_preamble_unnamed_section() {
        let counter = WordCounter;
        let c = chunker(&counter, 1, 100, 0.1);
        let md = "Intro text before any header appears here.\n\n# Later\n\nBody of the later section follows.";
        let chunks = c.chunk_markdown(md, "t");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section, "");
        assert_eq!(chunks[1].section, "Later");
    }

    #[test]
    fn test_html_sections_labelled() {
        let counter = WordCounter;
        let c = chunker(&counter, 1, 100, 0.1);
        let html = "<h1>Overview</h1><p>The overview body explains the feature in detail.</p>\
                    <h2>Usage</h2><p>The usage body shows the commands to run.</p>";
        let chunks = c.chunk_html(html, "t");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section, "Overview");
        assert_eq!(chunks[1].section, "Usage");
        assert!(!chunks[0].text.contains('<'));
    }

    #[test]
    fn test_entities_unescaped() {
        let normalized = normalize_text("Fish &amp; chips &lt;today&gt; &#8212; yes");
        assert_eq!(normalized, "Fish & chips <today> \u{2014} yes");
    }

    #[test]
    fn test_whitespace_collapsed() {
        let normalized = normalize_text("a   b\t\tc\n\n\nd");
        assert_eq!(normalized, "a b c d");
    }
}
