use crate::metadata::Metadata;

pub const CSV_HEADER: &str =
    "Filename,Title,Description,Keywords,Category,AI Prompt,Technical Settings";

/// Wraps a text field in double quotes, doubling internal quotes.
fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// One CSV row for a completed unit, columns matching [`CSV_HEADER`].
pub fn csv_row(filename: &str, metadata: &Metadata) -> String {
    let columns = [
        filename,
        metadata.title.as_str(),
        metadata.description.as_str(),
        &metadata.keywords.join(", "),
        metadata.category.as_str(),
        metadata.prompt.as_str(),
        metadata.technical_settings.as_deref().unwrap_or(""),
    ];
    columns
        .iter()
        .map(|column| csv_field(column))
        .collect::<Vec<String>>()
        .join(",")
}

/// Full CSV document: header plus one row per completed unit.
pub fn csv_document(rows: &[(String, Metadata)]) -> String {
    let mut out = String::from(CSV_HEADER);
    for (filename, metadata) in rows {
        out.push('\n');
        out.push_str(&csv_row(filename, metadata));
    }
    out.push('\n');
    out
}

/// Pretty-printed JSON of the full metadata structure.
pub fn json_document(metadata: &Metadata) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(metadata)?)
}

/// Labeled plain-text block for clipboard/file handoff.
pub fn text_document(metadata: &Metadata) -> String {
    let mut sections = vec![
        format!("TITLE:\n{}", metadata.title),
        format!("DESCRIPTION:\n{}", metadata.description),
        format!("PROMPT:\n{}", metadata.prompt),
        format!("KEYWORDS:\n{}", metadata.keywords.join(", ")),
        format!("CATEGORY:\n{}", metadata.category),
    ];
    if let Some(technical) = metadata.technical_settings.as_deref() {
        if !technical.trim().is_empty() {
            sections.push(format!("TECHNICAL:\n{technical}"));
        }
    }
    sections.join("\n\n") + "\n"
}
