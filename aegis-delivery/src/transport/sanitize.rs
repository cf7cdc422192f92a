//! Text clean-up applied to subjects and bodies before they are sent.

/// Invisible code points that trip spam filters or break header encoding
const fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{034F}'
            | '\u{061C}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{2028}'..='\u{202F}'
            | '\u{205F}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
    )
}

/// Remove byte order marks, zero-width and directional formatting characters.
pub fn clean_text(text: &str) -> String {
    text.chars().filter(|&c| !is_invisible(c)).collect()
}

/// Reduce a full HTML document to the markup that belongs in a message body.
///
/// Templating tools emit complete documents; only the `<body>` content is
/// wanted. Falls back to whatever follows `</head>`, and finally to the input
/// with document-level tags removed.
pub fn extract_body(html: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `html`
    let lower = html.to_ascii_lowercase();

    if let Some(open) = find_tag(&lower, "<body", 0)
        && let Some(start) = lower[open..].find('>').map(|end| open + end + 1)
    {
        let end = lower[start..]
            .find("</body")
            .map_or(html.len(), |end| start + end);
        return html[start..end].to_string();
    }

    if let Some(head_end) = lower.find("</head") {
        let start = lower[head_end..]
            .find('>')
            .map_or(html.len(), |end| head_end + end + 1);
        let end = lower[start..]
            .find("</html")
            .map_or(html.len(), |end| start + end);
        return html[start..end].to_string();
    }

    strip_matching_tags(html, |name| {
        matches!(
            name,
            "!doctype" | "html" | "/html" | "head" | "/head" | "meta" | "title" | "/title"
        )
    })
}

/// Plain-text rendition of an HTML fragment: every tag removed, text kept.
pub fn strip_tags(html: &str) -> String {
    strip_matching_tags(html, |_| true)
}

/// Find `<name` followed by whitespace, `>` or `/`, starting at `from`.
fn find_tag(lower: &str, tag: &str, from: usize) -> Option<usize> {
    let mut offset = from;
    while let Some(found) = lower[offset..].find(tag) {
        let at = offset + found;
        match lower[at + tag.len()..].chars().next() {
            Some(c) if c.is_ascii_whitespace() || c == '>' || c == '/' => return Some(at),
            None => return None,
            Some(_) => offset = at + tag.len(),
        }
    }
    None
}

fn strip_matching_tags(html: &str, remove: impl Fn(&str) -> bool) -> String {
    let mut output = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>').map(|close| open + close) else {
            break;
        };

        let name = rest[open + 1..close]
            .split(|c: char| c.is_ascii_whitespace() || c == '>')
            .next()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_ascii_lowercase();

        output.push_str(&rest[..open]);
        if !remove(&name) {
            output.push_str(&rest[open..=close]);
        }
        rest = &rest[close + 1..];
    }

    output.push_str(rest);
    output
}
