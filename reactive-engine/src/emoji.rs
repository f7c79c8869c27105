use crate::aggregators::RankedSnapshot;

/// Turns a code point key such as `1F600`, or a pair such as `1F1FA-1F1F8`,
/// into the characters it names. `None` for anything that isn't hex code
/// points.
pub fn decode_key(key: &str) -> Option<String> {
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    key.split('-')
        .map(|code| u32::from_str_radix(code, 16).ok().and_then(char::from_u32))
        .collect()
}

/// The ranked keys as one string, best first. Keys that don't decode are
/// skipped.
pub fn render(snapshot: &RankedSnapshot<String>) -> String {
    snapshot.keys().filter_map(|key| decode_key(key)).collect()
}

/// Renders rankings, skipping any that look the same as the one before.
/// The first ranking is always shown, even when it renders empty.
#[derive(Debug, Default)]
pub struct ChangedRenderings {
    last: Option<String>,
}

impl ChangedRenderings {
    pub fn new() -> Self {
        Self::default()
    }

    /// The rendering of `snapshot`, or `None` if it matches the previous one.
    pub fn next(&mut self, snapshot: &RankedSnapshot<String>) -> Option<String> {
        let rendered = render(snapshot);
        if self.last.as_deref() == Some(rendered.as_str()) {
            return None;
        }
        self.last = Some(rendered.clone());
        Some(rendered)
    }
}
