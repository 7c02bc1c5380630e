fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

/// One `DIGEST_WARN` line on stderr. Values are flattened so every field
/// stays a single `key=value` token.
pub fn format_line(code: &str, stage: &str, source: &str, reason: &str) -> String {
    format!(
        "DIGEST_WARN code={} stage={} source={} reason={}",
        sanitize_value(code),
        sanitize_value(stage),
        sanitize_value(source),
        sanitize_value(reason),
    )
}

pub fn emit(code: &str, stage: &str, source: &str, reason: &str) {
    eprintln!("{}", format_line(code, stage, source, reason));
}
