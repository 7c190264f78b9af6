//! Clean-up of recognizer output before it is fed to the generator.
//!
//! Recognizers annotate non-speech events (`[laughs]`, `(music)`) and may emit
//! symbols the prompt format does not expect. Only the first line of plain
//! spoken text survives.

/// Normalize a transcript. An empty result means there is nothing to say.
pub fn normalize_transcript(raw: &str) -> String {
    let text = strip_spans(raw, '[', ']');
    let text = strip_spans(&text, '(', ')');

    let kept: String = text.chars().filter(|&c| is_allowed(c)).collect();
    let first_line = match kept.find('\n') {
        Some(end) => &kept[..end],
        None => kept.as_str(),
    };
    first_line.trim().to_owned()
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '.' | ',' | '?' | '!' | ':' | '\'' | '-')
        || c.is_whitespace()
}

/// Remove every `open ... close` span, shortest match first.
///
/// A span never crosses a line break; an opener without a closer on the same
/// line is kept as-is.
fn strip_spans(text: &str, open: char, close: char) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        let after = &rest[start + open.len_utf8()..];
        let end = after.find([close, '\n']);
        match end {
            Some(i) if after[i..].starts_with(close) => {
                out.push_str(&rest[..start]);
                rest = &after[i + close.len_utf8()..];
            }
            _ => {
                out.push_str(&rest[..start + open.len_utf8()]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
