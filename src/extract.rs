use crate::entry::{ContentStatus, Entry};
use crate::selector::Match;
use anyhow::Result;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("--after must not be negative, got {0}")]
    NegativeContext(i64),
}

/// How matched entries are rendered on standard output.
#[derive(Debug, Clone)]
pub enum OutputMode {
    /// One virtual path per line.
    Files,
    /// One encoded excerpt per line.
    Excerpt(ExcerptOptions),
}

#[derive(Debug, Clone)]
pub struct ExcerptOptions {
    /// Lines included after the matched line.
    pub after: usize,
    /// Token substituted for embedded newlines.
    pub delimiter: String,
    /// Prefix each excerpt with the entry path and this separator.
    pub path_prefix: Option<String>,
}

impl ExcerptOptions {
    pub fn new(
        after: i64,
        delimiter: &str,
        path_prefix: Option<String>,
    ) -> Result<Self, ExtractError> {
        if after < 0 {
            return Err(ExtractError::NegativeContext(after));
        }
        Ok(Self {
            after: after as usize,
            delimiter: delimiter.to_string(),
            path_prefix,
        })
    }
}

/// Cut a window of `1 + after` lines starting at the line beginning at
/// `offset`, clamped to the end of `text`. The window never carries a
/// trailing newline.
pub fn context_window(text: &str, offset: usize, after: usize) -> &str {
    let start = offset.min(text.len());
    let bytes = text.as_bytes();
    let mut end = start;
    let mut newlines = 0;
    while end < bytes.len() {
        if bytes[end] == b'\n' {
            newlines += 1;
            if newlines > after {
                break;
            }
        }
        end += 1;
    }
    text[start..end]
        .strip_suffix('\n')
        .unwrap_or(&text[start..end])
}

/// Replace embedded newlines so the excerpt survives line-oriented tools.
pub fn encode_window(window: &str, delimiter: &str) -> String {
    window.replace('\n', delimiter)
}

/// Inverse of [`encode_window`] for a delimiter that does not occur in the
/// original text.
pub fn decode_window(encoded: &str, delimiter: &str) -> String {
    encoded.replace(delimiter, "\n")
}

/// Render one matched entry as a single output line, without the trailing
/// newline. `Ok(None)` means the entry has no usable text for an excerpt.
pub fn format_match(
    entry: &mut Entry,
    matched: &Match,
    mode: &OutputMode,
    max_bytes: u64,
) -> Result<Option<String>> {
    match mode {
        OutputMode::Files => Ok(Some(entry.path.clone())),
        OutputMode::Excerpt(opts) => {
            let offset = match matched {
                Match::Line { offset } => *offset,
                _ => 0,
            };
            if entry.load(max_bytes)? != ContentStatus::Loaded {
                return Ok(None);
            }
            let Some(bytes) = entry.content_bytes() else {
                return Ok(None);
            };
            let Ok(text) = std::str::from_utf8(bytes) else {
                return Ok(None);
            };
            let window = context_window(text, offset, opts.after);
            let encoded = encode_window(window, &opts.delimiter);
            let line = match &opts.path_prefix {
                Some(separator) => format!("{}{}{}", entry.path, separator, encoded),
                None => encoded,
            };
            Ok(Some(line))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE_LINES: &str = "one\ntwo\nthree\nfour\nfive\n";

    #[test]
    fn window_is_matched_line_only_without_context() {
        assert_eq!(context_window(FIVE_LINES, 0, 0), "one");
        assert_eq!(context_window(FIVE_LINES, 8, 0), "three");
    }

    #[test]
    fn window_clamps_to_entry_end() {
        // Line 3 starts at offset 8; eight lines of context reach past the
        // end and clamp to lines 3..5.
        assert_eq!(context_window(FIVE_LINES, 8, 8), "three\nfour\nfive");
    }

    #[test]
    fn window_on_text_without_trailing_newline() {
        assert_eq!(context_window("solo", 0, 3), "solo");
        assert_eq!(context_window("a\nb", 2, 5), "b");
    }

    #[test]
    fn encoding_round_trips() {
        let window = "three\nfour\nfive";
        for delimiter in ["\\n", "<NL>", "⏎"] {
            let encoded = encode_window(window, delimiter);
            assert!(!encoded.contains('\n'));
            assert_eq!(decode_window(&encoded, delimiter), window);
        }
    }

    #[test]
    fn excerpt_format_prefixes_path_on_request() {
        let mut entry = Entry::from_bytes(
            "run.zip/app.log".to_string(),
            1,
            None,
            FIVE_LINES.as_bytes().to_vec(),
        );
        let opts = ExcerptOptions::new(1, "\\n", Some(": ".to_string())).unwrap();
        let line = format_match(
            &mut entry,
            &Match::Line { offset: 8 },
            &OutputMode::Excerpt(opts),
            1 << 20,
        )
        .unwrap()
        .unwrap();
        assert_eq!(line, "run.zip/app.log: three\\nfour");
    }

    #[test]
    fn negative_context_is_a_configuration_error() {
        assert!(ExcerptOptions::new(-1, "\\n", None).is_err());
        assert!(ExcerptOptions::new(0, "\\n", None).is_ok());
    }
}
