use crate::models::{GlobalConfig, HeaderLayering, Replacement, Rule};

const SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub body: String,
    pub modified: bool,
}

/// Literal replacements in stored order. Each pair scans the output of the
/// previous one, so `a->b` followed by `b->c` turns `a` into `c`.
pub fn apply_replacements(text: &str, replacements: &[Replacement]) -> String {
    let mut out = text.to_string();
    for r in replacements {
        if r.find.is_empty() {
            continue;
        }
        if out.contains(&r.find) {
            out = out.replace(&r.find, &r.replace);
        }
    }
    out
}

/// Puts `header` on top of `body` unless it is already there.
pub fn attach_header(header: &str, body: &str) -> String {
    if header.is_empty() || body.starts_with(header) {
        return body.to_string();
    }
    if body.is_empty() {
        return header.to_string();
    }
    format!("{header}{SEPARATOR}{body}")
}

/// Mirror of [`attach_header`] for the bottom of the body.
pub fn attach_footer(footer: &str, body: &str) -> String {
    if footer.is_empty() || body.ends_with(footer) {
        return body.to_string();
    }
    if body.is_empty() {
        return footer.to_string();
    }
    format!("{body}{SEPARATOR}{footer}")
}

/// Joins two header/footer layers, skipping empty ones.
fn layer(outer: &str, inner: &str) -> String {
    match (outer.is_empty(), inner.is_empty()) {
        (true, _) => inner.to_string(),
        (_, true) => outer.to_string(),
        _ => format!("{outer}{SEPARATOR}{inner}"),
    }
}

/// Builds the outgoing body for `rule` from the inbound text or caption.
///
/// Rule replacements win; the global list applies only to rules without any.
/// Each side gets one composed header (or footer) so reprocessing an already
/// decorated body leaves it unchanged.
pub fn transform(raw: &str, rule: &Rule, global: &GlobalConfig) -> Transformed {
    let replacements = if rule.replacements.is_empty() {
        &global.replacements
    } else {
        &rule.replacements
    };
    let replaced = apply_replacements(raw, replacements);
    let mut modified = replaced != raw;

    // Rule-level text counts as a modification even when the guard skips it.
    if !rule.prefix.is_empty() || !rule.suffix.is_empty() {
        modified = true;
    }

    let (header, footer) = match global.header_layering {
        HeaderLayering::Stacked => (
            layer(&global.global_header, &rule.prefix),
            layer(&rule.suffix, &global.global_footer),
        ),
        HeaderLayering::Fallback => (
            if rule.prefix.is_empty() { global.global_header.clone() } else { rule.prefix.clone() },
            if rule.suffix.is_empty() { global.global_footer.clone() } else { rule.suffix.clone() },
        ),
    };

    let body = attach_footer(&footer, &attach_header(&header, &replaced));
    if body != replaced {
        modified = true;
    }

    Transformed { body, modified }
}
