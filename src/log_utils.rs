const LOG_EXCERPT_MAX_CHARS: usize = 2_000;

/// Strips credentials that providers or transports may echo back.
pub(crate) fn sanitize_log_message(input: &str) -> String {
    let out = input
        .replace("Authorization", "[REDACTED_HEADER]")
        .replace("Bearer ", "[REDACTED_BEARER] ")
        .replace("x-goog-api-key", "[REDACTED_HEADER]");
    redact_query_key(&redact_prefixed_secret_like(&out))
}

/// Sanitized and bounded excerpt of untrusted text, for diagnostics.
pub(crate) fn log_excerpt(input: &str) -> String {
    let sanitized = sanitize_log_message(input);
    if sanitized.chars().count() <= LOG_EXCERPT_MAX_CHARS {
        return sanitized;
    }
    let mut out: String = sanitized.chars().take(LOG_EXCERPT_MAX_CHARS).collect();
    out.push_str("...[truncated]");
    out
}

fn redact_query_key(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find("key=") {
        let boundary_ok = pos == 0 || matches!(rest.as_bytes()[pos - 1], b'?' | b'&');
        out.push_str(&rest[..pos + 4]);
        rest = &rest[pos + 4..];
        if boundary_ok {
            let end = rest
                .find(|c: char| c == '&' || c.is_whitespace())
                .unwrap_or(rest.len());
            if end > 0 {
                out.push_str("[REDACTED]");
            }
            rest = &rest[end..];
        }
    }
    out.push_str(rest);
    out
}

fn redact_prefixed_secret_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        // Google API keys start with "AIza" followed by 35 url-safe characters.
        if i + 4 <= chars.len()
            && chars[i..i + 4] == ['A', 'I', 'z', 'a']
            && (i == 0 || !chars[i - 1].is_ascii_alphanumeric())
        {
            let mut j = i + 4;
            let mut token_len = 0usize;
            while j < chars.len()
                && (chars[j].is_ascii_alphanumeric() || chars[j] == '_' || chars[j] == '-')
            {
                token_len += 1;
                j += 1;
            }
            if token_len >= 20 {
                out.push_str("[REDACTED_KEY]");
                i = j;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}
