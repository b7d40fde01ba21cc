//! Text Extractor (spec.md §4.5, component C5).
//!
//! `extract(bytes, content_type, filename) -> String`. PDF extraction walks
//! page content streams directly with `lopdf`, grouping text-show operators
//! by rounded baseline Y so that lines read top-to-bottom and left-to-right
//! the way the teacher's `document::parser::DocumentParser::parse_pdf`
//! extracts per-page text — generalized from lopdf's whole-page
//! `extract_text` to position-aware line reconstruction. DOCX walks the
//! `docx-rs` document tree for run text, replacing the teacher's
//! placeholder-only DOCX path (`"DOCX content extraction placeholder for
//! {:?}"`) with real extraction. When the caller hands over a generic or
//! absent `content_type` (a common default for raw uploads), `mime_guess`
//! fills in a guess from the filename extension before dispatch, the way
//! the teacher's own document pipeline leans on `mime_guess` for MIME
//! detection.

use crate::error::{IngestError, Result};
use lopdf::content::Content;
use lopdf::{Document as PdfDocument, Object};
use std::collections::BTreeMap;

const FALLBACK_SIZE_LIMIT: usize = 5 * 1024 * 1024;

pub fn extract(bytes: &[u8], content_type: &str, filename: &str) -> Result<String> {
    let content_type = resolve_content_type(content_type, filename);

    if content_type == "application/pdf" {
        return extract_pdf(bytes);
    }
    if content_type.contains("wordprocessingml.document") {
        return extract_docx(bytes);
    }
    if content_type == "application/msword" || filename.to_lowercase().ends_with(".doc") {
        return Ok(format!(
            "[unsupported legacy Word document: {filename}; original bytes retained in document memory]"
        ));
    }
    if is_plain_text_mime(&content_type) {
        return decode_utf8(bytes).map_err(|_| {
            IngestError::UnsupportedContent(format!("{filename}: not valid UTF-8 text"))
        });
    }

    extract_fallback(bytes, filename)
}

/// Generic or missing content-types get a filename-based guess; a specific
/// content-type from the caller is trusted as-is.
fn resolve_content_type(content_type: &str, filename: &str) -> String {
    let content_type = content_type.to_lowercase();
    if !content_type.is_empty() && content_type != "application/octet-stream" {
        return content_type;
    }
    mime_guess::from_path(filename)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or(content_type)
}

fn is_plain_text_mime(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type == "application/json"
        || content_type == "application/yaml"
        || content_type == "application/xml"
        || content_type == "application/x-yaml"
        || content_type == "application/typescript"
        || content_type == "text/x-python"
        || content_type == "application/x-python"
}

fn extract_fallback(bytes: &[u8], filename: &str) -> Result<String> {
    if bytes.len() > FALLBACK_SIZE_LIMIT {
        return Err(IngestError::UnsupportedContent(format!(
            "{filename}: exceeds 5 MiB fallback size limit"
        )));
    }
    let probe_len = bytes.len().min(1024);
    if bytes[..probe_len].contains(&0u8) {
        return Err(IngestError::UnsupportedContent(format!(
            "{filename}: binary content (NUL byte in first 1KiB)"
        )));
    }
    let text = decode_utf8(bytes)
        .map_err(|_| IngestError::UnsupportedContent(format!("{filename}: not valid UTF-8")))?;
    if text.contains('\u{FFFD}') {
        return Err(IngestError::UnsupportedContent(format!(
            "{filename}: decoded text contains the replacement character"
        )));
    }
    Ok(text)
}

fn decode_utf8(bytes: &[u8]) -> std::result::Result<String, std::str::Utf8Error> {
    std::str::from_utf8(bytes).map(|s| s.to_string())
}

struct TextItem {
    y: f64,
    x: f64,
    text: String,
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    let doc = PdfDocument::load_mem(bytes)
        .map_err(|e| IngestError::UnsupportedContent(format!("invalid PDF: {e}")))?;

    let mut pages_text = Vec::new();
    for (_page_num, page_id) in doc.get_pages() {
        let content_data = doc
            .get_page_content(page_id)
            .map_err(|e| IngestError::UnsupportedContent(format!("reading PDF page content: {e}")))?;
        let content = Content::decode(&content_data)
            .map_err(|e| IngestError::UnsupportedContent(format!("decoding PDF content stream: {e}")))?;

        let items = collect_text_items(&content);
        pages_text.push(layout_lines(items));
    }

    let joined = pages_text.join("\n\n");
    Ok(normalize_whitespace(&joined))
}

fn collect_text_items(content: &Content) -> Vec<TextItem> {
    let mut items = Vec::new();
    let (mut x, mut y) = (0.0_f64, 0.0_f64);

    for operation in &content.operations {
        match operation.operator.as_str() {
            "Td" | "TD" => {
                if let (Some(dx), Some(dy)) = (as_f64(operation.operands.first()), as_f64(operation.operands.get(1))) {
                    x += dx;
                    y += dy;
                }
            }
            "Tm" => {
                if let Some(ty) = as_f64(operation.operands.get(5)) {
                    y = ty;
                }
                if let Some(tx) = as_f64(operation.operands.get(4)) {
                    x = tx;
                }
            }
            "T*" => {
                y -= 1.0;
            }
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operation.operands.first() {
                    push_text_item(&mut items, x, y, bytes);
                }
            }
            "TJ" => {
                if let Some(Object::Array(parts)) = operation.operands.first() {
                    for part in parts {
                        if let Object::String(bytes, _) = part {
                            push_text_item(&mut items, x, y, bytes);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    items
}

fn push_text_item(items: &mut Vec<TextItem>, x: f64, y: f64, bytes: &[u8]) {
    let text = pdf_bytes_to_string(bytes);
    if !text.trim().is_empty() {
        items.push(TextItem { y, x, text });
    }
}

fn pdf_bytes_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn as_f64(object: Option<&Object>) -> Option<f64> {
    match object {
        Some(Object::Integer(i)) => Some(*i as f64),
        Some(Object::Real(r)) => Some(*r as f64),
        _ => None,
    }
}

/// Groups items by rounded Y (baseline row) and sorts rows top-to-bottom,
/// items within a row left-to-right, so reading order matches the page's
/// visual layout rather than the order operators happened to appear in.
fn layout_lines(items: Vec<TextItem>) -> String {
    let mut rows: BTreeMap<i64, Vec<TextItem>> = BTreeMap::new();
    for item in items {
        let key = item.y.round() as i64;
        rows.entry(key).or_default().push(item);
    }

    // BTreeMap orders ascending Y; PDF space has Y increasing upward, so
    // reverse to read top-to-bottom.
    let mut lines: Vec<String> = rows
        .into_iter()
        .rev()
        .map(|(_, mut row)| {
            row.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));
            row.into_iter().map(|i| i.text).collect::<Vec<_>>().join(" ")
        })
        .collect();

    lines.retain(|l| !l.trim().is_empty());
    lines.join("\n")
}

fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let docx = docx_rs::read_docx(bytes)
        .map_err(|e| IngestError::UnsupportedContent(format!("invalid DOCX: {e:?}")))?;

    let mut out = String::new();
    for child in &docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            let mut line = String::new();
            for pchild in &paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = pchild {
                    for rchild in &run.children {
                        if let docx_rs::RunChild::Text(text) = rchild {
                            line.push_str(&text.text);
                        }
                    }
                }
            }
            if !line.trim().is_empty() {
                out.push_str(line.trim_end());
                out.push('\n');
            }
        }
    }

    if out.trim().is_empty() {
        return Err(IngestError::NoTextExtracted);
    }
    Ok(out.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_mime_decodes_utf8() {
        let result = extract("hello world".as_bytes(), "text/plain", "a.txt").unwrap();
        assert_eq!(result, "hello world");
    }

    #[test]
    fn json_mime_is_treated_as_plain_text() {
        let result = extract(b"{\"a\":1}", "application/json", "a.json").unwrap();
        assert_eq!(result, "{\"a\":1}");
    }

    #[test]
    fn msword_returns_placeholder() {
        let result = extract(b"\xd0\xcf\x11\xe0", "application/msword", "a.doc").unwrap();
        assert!(result.contains("a.doc"));
    }

    #[test]
    fn fallback_rejects_nul_byte_in_first_kib() {
        let mut bytes = vec![b'a'; 100];
        bytes[10] = 0;
        let err = extract(&bytes, "application/octet-stream", "a.bin").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedContent(_)));
    }

    #[test]
    fn fallback_rejects_oversized_content() {
        let bytes = vec![b'a'; FALLBACK_SIZE_LIMIT + 1];
        let err = extract(&bytes, "application/octet-stream", "a.bin").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedContent(_)));
    }

    #[test]
    fn fallback_rejects_replacement_character() {
        let bytes = "abc\u{FFFD}def".as_bytes();
        let err = extract(bytes, "application/octet-stream", "a.bin").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedContent(_)));
    }

    #[test]
    fn generic_content_type_falls_back_to_filename_guess() {
        let result = extract(b"{\"a\":1}", "application/octet-stream", "a.json").unwrap();
        assert_eq!(result, "{\"a\":1}");
    }

    #[test]
    fn empty_content_type_falls_back_to_filename_guess() {
        let result = extract(b"hello".as_bytes(), "", "a.txt").unwrap();
        assert_eq!(result, "hello");
    }

    #[test]
    fn fallback_accepts_plain_utf8_unknown_mime() {
        let result = extract(b"plain data", "application/octet-stream", "a.bin").unwrap();
        assert_eq!(result, "plain data");
    }

    #[test]
    fn normalize_whitespace_trims_trailing_spaces_per_line() {
        assert_eq!(normalize_whitespace("a  \nb\t\n"), "a\nb");
    }
}
