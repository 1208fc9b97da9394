//! Environment overlays applied on top of the server's own environment.

use std::collections::BTreeMap;

/// Variables layered over the inherited environment of a child process.
///
/// Ordered so that logging and equality checks are deterministic.
pub type EnvOverlay = BTreeMap<String, String>;

/// Variables that force Ansible and its Python dependencies to emit plain text.
///
/// Tool output is parsed as text, so ANSI escapes must never reach the adapters.
pub const COLOR_OVERRIDES: &[(&str, &str)] = &[
    ("ANSIBLE_FORCE_COLOR", "0"),
    ("ANSIBLE_NOCOLOR", "1"),
    ("NO_COLOR", "1"),
    ("PY_COLORS", "0"),
];

/// Return `overlay` with [`COLOR_OVERRIDES`] applied (the overrides win).
#[must_use]
pub fn with_color_overrides(mut overlay: EnvOverlay) -> EnvOverlay {
    for (key, value) in COLOR_OVERRIDES {
        overlay.insert((*key).to_string(), (*value).to_string());
    }
    overlay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_overrides_replace_existing_values() {
        let mut overlay = EnvOverlay::new();
        overlay.insert("ANSIBLE_FORCE_COLOR".into(), "1".into());
        overlay.insert("PATH".into(), "/venv/bin".into());

        let overlay = with_color_overrides(overlay);
        assert_eq!(overlay["ANSIBLE_FORCE_COLOR"], "0");
        assert_eq!(overlay["NO_COLOR"], "1");
        assert_eq!(overlay["PATH"], "/venv/bin");
    }
}
