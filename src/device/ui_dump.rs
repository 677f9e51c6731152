//! UI hierarchy dump parsing
//!
//! Dumps are the XML produced by `uiautomator dump`: a `<hierarchy>` root
//! holding nested `<node .../>` elements whose attributes describe each view.

/// Pass counter shown by the test application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub passed: u64,
    pub total: u64,
}

/// Find the `text` of the first node carrying `resource_id`
pub fn node_text(dump: &str, resource_id: &str) -> Option<String> {
    nodes(dump)
        .find(|node| attribute(node, "resource-id").as_deref() == Some(resource_id))
        .and_then(|node| attribute(node, "text"))
        .filter(|text| !text.is_empty())
}

/// Package of the first (foreground) node in the dump
pub fn foreground_package(dump: &str) -> Option<String> {
    nodes(dump)
        .next()
        .and_then(|node| attribute(node, "package"))
        .filter(|package| !package.is_empty())
}

/// Parse a counter of the form `"<label>:<passed>/<total>"` (label optional)
pub fn parse_counter(text: &str) -> Option<Counter> {
    let value = text.rsplit(':').next()?;
    let (passed, total) = value.split_once('/')?;
    Some(Counter {
        passed: passed.trim().parse().ok()?,
        total: total.trim().parse().ok()?,
    })
}

/// Iterate over the opening tags of every `<node` element
fn nodes(dump: &str) -> impl Iterator<Item = &str> {
    dump.match_indices("<node")
        .filter_map(move |(start, _)| {
            let rest = &dump[start..];
            // Skip elements that merely start with "node", e.g. <nodes>
            match rest.as_bytes().get(5) {
                Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => {}
                _ => return None,
            }
            let end = tag_end(rest)?;
            Some(&rest[..end])
        })
}

/// Index of the `>` closing a tag, ignoring any inside quoted values
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in tag.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(open), _) if c == open => quote = None,
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Value of attribute `name` within an opening tag, unescaped
fn attribute(tag: &str, name: &str) -> Option<String> {
    Attributes::new(tag)
        .find(|(key, _)| *key == name)
        .map(|(_, value)| unescape(value))
}

/// Sequential `name=value` scanner over one opening tag
///
/// Values may be single or double quoted. Scanning stops at the end of
/// the tag or at the first malformed attribute.
struct Attributes<'a> {
    rest: &'a str,
}

impl<'a> Attributes<'a> {
    fn new(tag: &'a str) -> Self {
        let tag = tag.strip_prefix('<').unwrap_or(tag);
        // Skip the element name
        let name_end = tag
            .find(|c: char| c.is_ascii_whitespace() || c == '/' || c == '>')
            .unwrap_or(tag.len());
        Self {
            rest: &tag[name_end..],
        }
    }
}

impl<'a> Iterator for Attributes<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest.trim_start();
        let name_end =
            rest.find(|c: char| c == '=' || c.is_ascii_whitespace() || c == '/' || c == '>')?;
        if name_end == 0 {
            self.rest = "";
            return None;
        }
        let name = &rest[..name_end];

        let after_name = rest[name_end..].trim_start().strip_prefix('=');
        let Some(after_eq) = after_name.map(str::trim_start) else {
            self.rest = "";
            return None;
        };
        let Some(quote) = after_eq.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            self.rest = "";
            return None;
        };
        let body = &after_eq[1..];
        let Some(close) = body.find(quote) else {
            self.rest = "";
            return None;
        };

        self.rest = &body[close + 1..];
        Some((name, &body[..close]))
    }
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
