//! Candidate JSON extraction from free-form completion text.

/// Strip one surrounding Markdown code fence (```` ```json ```` or ```` ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let body = match trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    {
        Some(rest) => rest,
        None => return trimmed,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Iterate over top-level balanced `{...}` spans, left to right.
///
/// Braces inside JSON string literals are ignored. An opening brace that is
/// never closed is treated as noise and scanning resumes right after it.
pub fn object_spans(text: &str) -> ObjectSpans<'_> {
    ObjectSpans { text, pos: 0 }
}

pub struct ObjectSpans<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Iterator for ObjectSpans<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        while self.pos < self.text.len() {
            let rest = &self.text[self.pos..];
            let start = self.pos + rest.find('{')?;

            match balanced_end(&self.text[start..]) {
                Some(len) => {
                    self.pos = start + len;
                    return Some(&self.text[start..start + len]);
                }
                None => self.pos = start + 1,
            }
        }
        None
    }
}

/// Byte length of the balanced object starting at `text[0] == '{'`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
