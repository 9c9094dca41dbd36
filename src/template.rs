//! Message template rendering.

/// Render a message template by literal substitution of every `{name}` and
/// `{seat}` occurrence. Unknown placeholders are left verbatim; no escaping
/// is applied, callers own the template content.
pub fn render(template: &str, name: &str, seat: &str) -> String {
    template.replace("{name}", name).replace("{seat}", seat)
}
