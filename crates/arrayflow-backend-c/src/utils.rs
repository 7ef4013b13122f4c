pub(crate) fn push_line(module: &mut String, indent: usize, line: &str) {
    push_block(module, indent, line);
}

/// Appends `block` re-indented to `indent`, dropping its common leading
/// whitespace and surrounding blank lines.
pub(crate) fn push_block(module: &mut String, indent: usize, block: &str) {
    if block.is_empty() {
        return;
    }
    let pad = "  ".repeat(indent);
    let mut lines: Vec<&str> = block.split('\n').collect();
    if matches!(lines.first(), Some(line) if line.trim().is_empty()) {
        lines.remove(0);
    }
    if matches!(lines.last(), Some(line) if line.trim().is_empty()) {
        lines.pop();
    }

    let min_indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.chars().take_while(|c| *c == ' ' || *c == '\t').count())
        .min()
        .unwrap_or(0);

    for line in lines {
        let trimmed = line.get(min_indent..).unwrap_or("").trim_end();
        if trimmed.is_empty() {
            module.push('\n');
            continue;
        }
        module.push_str(&pad);
        module.push_str(trimmed);
        module.push('\n');
    }
}

/// C literal for a double, always carrying a decimal point or exponent.
pub(crate) fn format_f64(value: f64) -> String {
    if value.is_nan() {
        return "NAN".to_string();
    }
    if value.is_infinite() {
        return String::from(if value < 0.0 { "-INFINITY" } else { "INFINITY" });
    }
    let text = format!("{value:?}");
    if text.contains(['.', 'e', 'E']) {
        text
    } else {
        format!("{text}.0")
    }
}

/// Replaces every character that cannot appear in a C identifier.
pub(crate) fn sanitize_symbol(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_keep_a_decimal_point() {
        assert_eq!(format_f64(2.0), "2.0");
        assert_eq!(format_f64(-0.5), "-0.5");
        assert_eq!(format_f64(f64::NEG_INFINITY), "-INFINITY");
    }

    #[test]
    fn blocks_are_reindented() {
        let mut out = String::new();
        push_block(&mut out, 1, "\n    a;\n      b;\n");
        assert_eq!(out, "  a;\n    b;\n");
    }

    #[test]
    fn symbols_are_valid_identifiers() {
        assert_eq!(sanitize_symbol("row-1"), "row_1");
        assert_eq!(sanitize_symbol("3d"), "_3d");
    }
}
