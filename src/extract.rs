//! Multi-format text extraction.
//!
//! Entry point is [`extract`]: raw bytes or text plus a declared content
//! type come in, normalized plain text plus structural sections come out.
//! The format is resolved from the declared MIME type first, the filename
//! extension second, defaulting to plain text. Extraction never returns
//! partial content: a malformed input fails with [`ExtractionError`].

use std::io::Read;

use crate::error::ExtractionError;

/// Supported MIME types.
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_HTML: &str = "text/html";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Window searched around a raw page boundary when snapping to a
/// sentence or paragraph break.
const BOUNDARY_SNAP_WINDOW: usize = 200;

/// Characters assumed per PDF page when the library reports no page list.
const CHARS_PER_PAGE_ESTIMATE: usize = 2000;

/// Resolved document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Html,
    Markdown,
    Text,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Html => "html",
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Text => "text",
        }
    }
}

/// One structural section of a document (page, heading block, JSON key...).
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSection {
    pub title: String,
    pub content: String,
}

/// Extraction output: normalized full text plus structural metadata.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub content: String,
    pub sections: Vec<DocumentSection>,
    pub title: Option<String>,
    pub format: DocumentFormat,
}

/// Resolve the document format: declared MIME type first, then filename
/// extension, defaulting to plain text.
pub fn resolve_format(declared_type: Option<&str>, filename: Option<&str>) -> DocumentFormat {
    if let Some(mime) = declared_type {
        let mime = mime.split(';').next().unwrap_or(mime).trim();
        match mime {
            MIME_PDF => return DocumentFormat::Pdf,
            MIME_DOCX => return DocumentFormat::Docx,
            MIME_HTML | "application/xhtml+xml" => return DocumentFormat::Html,
            MIME_MARKDOWN | "text/x-markdown" => return DocumentFormat::Markdown,
            _ => {}
        }
    }
    if let Some(name) = filename {
        let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => return DocumentFormat::Pdf,
            "docx" => return DocumentFormat::Docx,
            "html" | "htm" | "xhtml" => return DocumentFormat::Html,
            "md" | "markdown" => return DocumentFormat::Markdown,
            _ => {}
        }
    }
    DocumentFormat::Text
}

/// Extract normalized text and sections from raw bytes.
pub fn extract(
    bytes: &[u8],
    declared_type: Option<&str>,
    filename: Option<&str>,
    max_content_length: usize,
) -> Result<Extracted, ExtractionError> {
    let format = resolve_format(declared_type, filename);
    let mut extracted = match format {
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::Docx => extract_docx(bytes)?,
        DocumentFormat::Html => {
            let text = decode_utf8(bytes, "html")?;
            extract_html(&text)
        }
        DocumentFormat::Markdown => {
            let text = decode_utf8(bytes, "markdown")?;
            extract_markdown(&text)
        }
        DocumentFormat::Text => {
            let text = decode_utf8(bytes, "text")?;
            extract_plain(&text)
        }
    };
    extracted.content = normalize_text(&extracted.content, max_content_length);
    if extracted.content.is_empty() {
        return Err(ExtractionError::new(
            format.as_str(),
            "no extractable text content",
        ));
    }
    Ok(extracted)
}

fn decode_utf8(bytes: &[u8], format: &'static str) -> Result<String, ExtractionError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ExtractionError::new(format, "input is not valid UTF-8"))
}

/// Normalize line endings, strip control characters, collapse runs of
/// 3+ newlines to 2, truncate overlong content at a char boundary.
pub fn normalize_text(text: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut kept = 0usize;
    let mut newline_run = 0usize;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let c = match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    continue; // CRLF: keep the LF
                }
                '\n'
            }
            c if c.is_control() && c != '\n' && c != '\t' => continue,
            c => c,
        };
        if c == '\n' {
            newline_run += 1;
            if newline_run > 2 {
                continue;
            }
        } else {
            newline_run = 0;
        }
        out.push(c);
        kept += 1;
        if kept >= max_len {
            break;
        }
    }
    out.trim().to_string()
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<Extracted, ExtractionError> {
    // Per-page extraction when the library can produce it; one section per page.
    if let Ok(pages) = pdf_extract::extract_text_from_mem_by_pages(bytes) {
        if !pages.is_empty() {
            let content = pages.join("\n\n");
            let sections = pages
                .iter()
                .enumerate()
                .filter(|(_, p)| !p.trim().is_empty())
                .map(|(i, p)| DocumentSection {
                    title: format!("Page {}", i + 1),
                    content: p.trim().to_string(),
                })
                .collect();
            return Ok(Extracted {
                content,
                sections,
                title: None,
                format: DocumentFormat::Pdf,
            });
        }
    }

    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ExtractionError::new("pdf", e.to_string()))?;
    let page_count = text.len().div_ceil(CHARS_PER_PAGE_ESTIMATE).max(1);
    let sections = split_evenly(&text, page_count)
        .into_iter()
        .enumerate()
        .map(|(i, content)| DocumentSection {
            title: format!("Page {}", i + 1),
            content,
        })
        .collect();
    Ok(Extracted {
        content: text,
        sections,
        title: None,
        format: DocumentFormat::Pdf,
    })
}

/// Split text into `n` roughly even pieces, snapping each boundary to the
/// nearest sentence or paragraph break within a small window.
fn split_evenly(text: &str, n: usize) -> Vec<String> {
    if n <= 1 || text.len() <= 1 {
        return vec![text.trim().to_string()];
    }
    let target = text.len() / n;
    let mut pieces = Vec::with_capacity(n);
    let mut start = 0usize;
    for i in 1..n {
        let raw = (target * i).min(text.len());
        let snapped = snap_to_break(text, raw).max(start);
        if snapped > start {
            pieces.push(text[start..snapped].trim().to_string());
            start = snapped;
        }
    }
    if start < text.len() {
        pieces.push(text[start..].trim().to_string());
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Find the sentence or paragraph break nearest to `pos` within the snap
/// window; fall back to the nearest char boundary at `pos`.
fn snap_to_break(text: &str, pos: usize) -> usize {
    let lo = pos.saturating_sub(BOUNDARY_SNAP_WINDOW);
    let hi = (pos + BOUNDARY_SNAP_WINDOW).min(text.len());
    let mut best: Option<usize> = None;
    let mut best_dist = usize::MAX;
    let window = &text[floor_char_boundary(text, lo)..floor_char_boundary(text, hi)];
    let base = floor_char_boundary(text, lo);
    let mut iter = window.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        let boundary = match c {
            '.' | '!' | '?' => Some(base + i + c.len_utf8()),
            '\n' if matches!(iter.peek(), Some((_, '\n'))) => Some(base + i),
            _ => None,
        };
        if let Some(b) = boundary {
            let dist = b.abs_diff(pos);
            if dist < best_dist {
                best_dist = dist;
                best = Some(b);
            }
        }
    }
    best.unwrap_or_else(|| floor_char_boundary(text, pos))
}

fn floor_char_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

// ============ DOCX ============

fn extract_docx(bytes: &[u8]) -> Result<Extracted, ExtractionError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractionError::new("docx", e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractionError::new("docx", "word/document.xml not found"))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractionError::new("docx", e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractionError::new(
            "docx",
            "word/document.xml exceeds size limit",
        ));
    }
    let content = extract_docx_runs(&doc_xml)?;
    Ok(Extracted {
        content,
        sections: Vec::new(),
        title: None,
        format: DocumentFormat::Docx,
    })
}

/// Pull `w:t` run text out of document.xml, inserting a newline at each
/// paragraph close so paragraph structure survives.
fn extract_docx_runs(xml: &[u8]) -> Result<String, ExtractionError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractionError::new("docx", e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

// ============ HTML ============

const HTML_EXCLUDED_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "aside"];
const HTML_HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

fn extract_html(html: &str) -> Extracted {
    let document = scraper::Html::parse_document(html);

    let title = scraper::Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    // Full body text, skipping script/style/navigation subtrees.
    let mut content = String::new();
    for node in document.tree.root().descendants() {
        if let scraper::Node::Text(text) = node.value() {
            let excluded = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .map(|e| HTML_EXCLUDED_TAGS.contains(&e.name()))
                    .unwrap_or(false)
            });
            if !excluded {
                content.push_str(text);
                content.push(' ');
            }
        }
    }

    // One section per heading: content is all following siblings up to the
    // next heading of any level.
    let mut sections = Vec::new();
    let heading_sel = scraper::Selector::parse("h1, h2, h3, h4, h5, h6").expect("static selector");
    for heading in document.select(&heading_sel) {
        let heading_text = heading.text().collect::<String>().trim().to_string();
        if heading_text.is_empty() {
            continue;
        }
        let mut body = String::new();
        let mut sibling = heading.next_sibling();
        while let Some(node) = sibling {
            if let Some(el) = node.value().as_element() {
                if HTML_HEADING_TAGS.contains(&el.name()) {
                    break;
                }
            }
            collect_node_text(node, &mut body);
            sibling = node.next_sibling();
        }
        let body = squash_whitespace(&body);
        if !body.is_empty() {
            sections.push(DocumentSection {
                title: heading_text,
                content: body,
            });
        }
    }

    Extracted {
        content: squash_whitespace(&content),
        sections,
        title,
        format: DocumentFormat::Html,
    }
}

fn collect_node_text(node: ego_tree::NodeRef<'_, scraper::Node>, out: &mut String) {
    for n in node.descendants() {
        if let scraper::Node::Text(text) = n.value() {
            let excluded = n.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .map(|e| HTML_EXCLUDED_TAGS.contains(&e.name()))
                    .unwrap_or(false)
            });
            if !excluded {
                out.push_str(text);
                out.push(' ');
            }
        }
    }
}

fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============ Markdown ============

fn extract_markdown(md: &str) -> Extracted {
    let heading_re = regex::Regex::new(r"(?m)^(#{1,6})\s+(.+)$").expect("static regex");

    // Sections: heading line to the next heading line (or end of document).
    let mut sections = Vec::new();
    let mut title = None;
    let matches: Vec<_> = heading_re.captures_iter(md).collect();
    for (i, cap) in matches.iter().enumerate() {
        let whole = cap.get(0).expect("whole match");
        let heading = cap[2].trim().to_string();
        if title.is_none() && cap[1].len() == 1 {
            title = Some(heading.clone());
        }
        let body_start = whole.end();
        let body_end = matches
            .get(i + 1)
            .map(|next| next.get(0).expect("whole match").start())
            .unwrap_or(md.len());
        let body = strip_markdown(&md[body_start..body_end]);
        let body = body.trim().to_string();
        if !body.is_empty() {
            sections.push(DocumentSection {
                title: heading,
                content: body,
            });
        }
    }

    Extracted {
        content: strip_markdown(md),
        sections,
        title,
        format: DocumentFormat::Markdown,
    }
}

/// Strip Markdown syntax to plain text: code fences and inline code,
/// images, links (keeping link text), emphasis markers, horizontal rules,
/// heading markers, and list markers.
fn strip_markdown(md: &str) -> String {
    let fence_re = regex::Regex::new(r"(?s)```.*?```").expect("static regex");
    let inline_code_re = regex::Regex::new(r"`[^`\n]*`").expect("static regex");
    let image_re = regex::Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("static regex");
    let link_re = regex::Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("static regex");
    let heading_re = regex::Regex::new(r"(?m)^#{1,6}\s+").expect("static regex");
    let hr_re = regex::Regex::new(r"(?m)^(\s*[-*_]){3,}\s*$").expect("static regex");
    let list_re = regex::Regex::new(r"(?m)^\s*(?:[-*+]|\d+\.)\s+").expect("static regex");
    let emphasis_re =
        regex::Regex::new(r"(?:\*{1,3}|_{1,3})(\S[^*_]*?)(?:\*{1,3}|_{1,3})").expect("static regex");

    let text = fence_re.replace_all(md, "");
    let text = inline_code_re.replace_all(&text, "");
    let text = image_re.replace_all(&text, "");
    let text = link_re.replace_all(&text, "$1");
    let text = heading_re.replace_all(&text, "");
    let text = hr_re.replace_all(&text, "");
    let text = list_re.replace_all(&text, "");
    let text = emphasis_re.replace_all(&text, "$1");
    text.into_owned()
}

// ============ Plain text (with content sniffing) ============

fn extract_plain(text: &str) -> Extracted {
    let sections = if let Some(sections) = sniff_json_sections(text) {
        sections
    } else if let Some(sections) = sniff_xml_sections(text) {
        sections
    } else if let Some(sections) = sniff_csv_sections(text) {
        sections
    } else if let Some(sections) = sniff_log_sections(text) {
        sections
    } else {
        Vec::new()
    };
    Extracted {
        content: text.to_string(),
        sections,
        title: None,
        format: DocumentFormat::Text,
    }
}

/// Valid JSON: one section per top-level object key, or per array item.
fn sniff_json_sections(text: &str) -> Option<Vec<DocumentSection>> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let sections = match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(key, v)| DocumentSection {
                title: key,
                content: json_value_text(&v),
            })
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| DocumentSection {
                title: format!("Item {}", i + 1),
                content: json_value_text(v),
            })
            .collect(),
        _ => return None,
    };
    Some(sections)
}

fn json_value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// XML-looking input: one section per top-level child element.
fn sniff_xml_sections(text: &str) -> Option<Vec<DocumentSection>> {
    let trimmed = text.trim();
    if !trimmed.starts_with('<') {
        return None;
    }
    let mut reader = quick_xml::Reader::from_str(trimmed);
    let mut sections = Vec::new();
    let mut depth = 0usize;
    let mut current: Option<(String, String)> = None;
    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Start(e)) => {
                depth += 1;
                if depth == 2 {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    current = Some((name, String::new()));
                }
            }
            Ok(quick_xml::events::Event::Text(t)) => {
                if let Some((_, buf)) = current.as_mut() {
                    let piece = t.unescape().unwrap_or_default();
                    let piece = piece.trim();
                    if !piece.is_empty() {
                        if !buf.is_empty() {
                            buf.push(' ');
                        }
                        buf.push_str(piece);
                    }
                }
            }
            Ok(quick_xml::events::Event::End(_)) => {
                if depth == 2 {
                    if let Some((name, buf)) = current.take() {
                        if !buf.is_empty() {
                            sections.push(DocumentSection {
                                title: name,
                                content: buf,
                            });
                        }
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections)
    }
}

/// Delimited data: consistent `,`/`\t`/`;` count across the first ten
/// non-empty lines. Produces a summary section plus a sample.
fn sniff_csv_sections(text: &str) -> Option<Vec<DocumentSection>> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 2 {
        return None;
    }
    let probe = &lines[..lines.len().min(10)];
    let delimiter = [',', '\t', ';'].into_iter().find(|&d| {
        let first = probe[0].matches(d).count();
        first > 0 && probe.iter().all(|l| l.matches(d).count() == first)
    })?;
    let columns = probe[0].split(delimiter).count();
    let summary = format!(
        "Delimited data: {} rows, {} columns. Header: {}",
        lines.len().saturating_sub(1),
        columns,
        lines[0]
    );
    let sample = lines
        .iter()
        .take(6)
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    Some(vec![
        DocumentSection {
            title: "Summary".to_string(),
            content: summary,
        },
        DocumentSection {
            title: "Sample".to_string(),
            content: sample,
        },
    ])
}

/// Log-like input: most lines start with a date. One section per date group.
fn sniff_log_sections(text: &str) -> Option<Vec<DocumentSection>> {
    let date_re = regex::Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("static regex");
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }
    let dated = lines.iter().filter(|l| date_re.is_match(l)).count();
    if dated * 2 < lines.len() {
        return None;
    }
    let mut sections: Vec<DocumentSection> = Vec::new();
    for line in lines {
        let date = date_re
            .find(line)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "undated".to_string());
        match sections.last_mut() {
            Some(last) if last.title == date => {
                last.content.push('\n');
                last.content.push_str(line);
            }
            _ => sections.push(DocumentSection {
                title: date,
                content: line.to_string(),
            }),
        }
    }
    Some(sections)
}
