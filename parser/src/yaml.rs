//! YAML conformance errors from `serde_yaml`.

use drover_types::{Diagnostic, Origin, Range};
use serde::Deserialize;
use serde::de::IgnoredAny;

/// The first YAML error in `text`, if any.
///
/// The loader stops at the first error, so there is at most one.
pub(crate) fn syntax_error(text: &str) -> Option<Diagnostic> {
    for document in serde_yaml::Deserializer::from_str(text) {
        if let Err(error) = IgnoredAny::deserialize(document) {
            return Some(to_diagnostic(&error, text));
        }
    }
    None
}

fn to_diagnostic(error: &serde_yaml::Error, text: &str) -> Diagnostic {
    let message = error.to_string();
    let message = match message.find(" at line ") {
        Some(suffix) => message[..suffix].to_string(),
        None => message,
    };

    let range = match error.location() {
        Some(location) => token_range(
            text,
            location.line().saturating_sub(1),
            location.column().saturating_sub(1),
        ),
        None => Range::full_line(0),
    };
    Diagnostic::error(message, range, Origin::Structure)
}

/// From `column` to the end of the token starting there (at least one column).
fn token_range(text: &str, line: usize, column: usize) -> Range {
    let token = text
        .lines()
        .nth(line)
        .map(|source| {
            source
                .chars()
                .skip(column)
                .take_while(|c| !c.is_whitespace() && !matches!(c, ',' | '[' | ']' | '{' | '}'))
                .count()
        })
        .unwrap_or(0);
    let start = column as u32;
    Range::on_line(line as u32, start, start + token.max(1) as u32)
}
