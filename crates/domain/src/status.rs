/// Content marker identifying the status message in channel history.
pub const STATUS_MARKER: &str = "Active roles";

/// One row of the aggregate status display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Member display name.
    pub display_name: String,
    /// Held role name.
    pub role_name: String,
}

/// Renders the status message body, sorted by role name then display name.
#[must_use]
pub fn render_status(mut lines: Vec<StatusLine>) -> String {
    let header = format!("**📊 {STATUS_MARKER}:**");
    if lines.is_empty() {
        return format!("{header}\nNo active roles");
    }

    lines.sort_by(|left, right| {
        left.role_name
            .cmp(&right.role_name)
            .then_with(|| left.display_name.cmp(&right.display_name))
    });

    let body = lines
        .iter()
        .map(|line| format!("{} - {}", line.display_name, line.role_name))
        .collect::<Vec<_>>()
        .join("\n");

    format!("{header}\n```\n{body}\n```")
}
