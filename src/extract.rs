//! Text extraction from attachment bytes.
//!
//! Converts PDF, DOCX, XLSX, HTML, and plaintext attachments into text for
//! the prep prompt. Attachments over 50MB are rejected before any parsing;
//! the caller records a warning and moves on. Unsupported formats (images,
//! video, archives) are skipped, not errors.

use std::io::Cursor;

use regex::Regex;

/// Files larger than this are never parsed.
pub const MAX_FILE_BYTES: usize = 50 * 1024 * 1024;

/// Maximum extracted text length (100KB). The prompt truncates further.
const MAX_EXTRACT_BYTES: usize = 100_000;

/// Supported attachment formats, detected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFormat {
    /// .md, .txt, .csv, .tsv, .json, .log — lossy UTF-8 read
    PlainText,
    /// .pdf
    Pdf,
    /// .docx
    Docx,
    /// .xlsx, .xls, .xlsm, .ods
    Xlsx,
    /// .html, .htm
    Html,
    /// Everything else (images, video, etc.)
    Unsupported,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Attachment exceeds [`MAX_FILE_BYTES`]. Surfaced to the user as a
    /// warning on the prep, never a request failure.
    #[error("File too large: {filename} ({size} bytes)")]
    TooLarge { filename: String, size: usize },

    /// Format-specific extraction failure.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),
}

/// Detect the format from a filename's extension.
pub fn detect_format(filename: &str) -> SupportedFormat {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    // No dot means no extension
    if !filename.contains('.') {
        return SupportedFormat::Unsupported;
    }
    match ext.as_str() {
        "md" | "markdown" | "txt" | "csv" | "tsv" | "json" | "log" => SupportedFormat::PlainText,
        "pdf" => SupportedFormat::Pdf,
        "docx" => SupportedFormat::Docx,
        "xlsx" | "xls" | "xlsm" | "ods" => SupportedFormat::Xlsx,
        "html" | "htm" => SupportedFormat::Html,
        _ => SupportedFormat::Unsupported,
    }
}

/// Extract text from attachment bytes.
///
/// `Ok(None)` means the format is not extractable and the attachment should
/// be silently skipped. `Err(TooLarge)` means skip with a warning.
pub fn extract_from_bytes(bytes: &[u8], filename: &str) -> Result<Option<String>, ExtractError> {
    if bytes.len() > MAX_FILE_BYTES {
        return Err(ExtractError::TooLarge {
            filename: filename.to_string(),
            size: bytes.len(),
        });
    }

    let raw = match detect_format(filename) {
        SupportedFormat::PlainText => String::from_utf8_lossy(bytes).into_owned(),
        SupportedFormat::Pdf => extract_pdf(bytes)?,
        SupportedFormat::Docx => extract_docx(bytes)?,
        SupportedFormat::Xlsx => extract_xlsx(bytes)?,
        SupportedFormat::Html => extract_html(bytes)?,
        SupportedFormat::Unsupported => return Ok(None),
    };

    Ok(Some(truncate_text(&raw, MAX_EXTRACT_BYTES)))
}

// ---------------------------------------------------------------------------
// Format-specific extractors
// ---------------------------------------------------------------------------

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract can panic on malformed PDFs — wrap in catch_unwind
    let owned = bytes.to_vec();
    let result = std::panic::catch_unwind(move || pdf_extract::extract_text_from_mem(&owned));

    match result {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractError::ExtractionFailed(format!("PDF: {}", e))),
        Err(_) => Err(ExtractError::ExtractionFailed(
            "PDF extraction panicked (malformed file)".to_string(),
        )),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    // DOCX = ZIP archive containing word/document.xml
    // Walk <w:t> tags to extract text runs.
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::ExtractionFailed(format!("DOCX zip: {}", e)))?;

    let doc = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::ExtractionFailed(format!("DOCX missing document.xml: {}", e)))?;

    let mut reader = quick_xml::Reader::from_reader(std::io::BufReader::new(doc));
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut in_text_tag = false;
    let mut in_paragraph = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(ref e))
            | Ok(quick_xml::events::Event::Empty(ref e)) => {
                let local = e.local_name();
                if local.as_ref() == b"t" {
                    in_text_tag = true;
                } else if local.as_ref() == b"p" {
                    if in_paragraph && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    in_paragraph = true;
                }
            }
            Ok(quick_xml::events::Event::End(ref e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_tag = false;
                } else if e.local_name().as_ref() == b"p" {
                    in_paragraph = false;
                }
            }
            Ok(quick_xml::events::Event::Text(ref e)) => {
                if in_text_tag {
                    if let Ok(s) = e.unescape() {
                        text.push_str(&s);
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::ExtractionFailed(format!("DOCX XML: {}", e)));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(text)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    use calamine::{open_workbook_auto_from_rs, Reader};

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| ExtractError::ExtractionFailed(format!("XLSX: {}", e)))?;

    let mut output = String::new();

    for sheet_name in workbook.sheet_names().to_vec() {
        if let Ok(range) = workbook.worksheet_range(&sheet_name) {
            if !output.is_empty() {
                output.push_str("\n\n");
            }
            output.push_str(&format!("## {}\n\n", sheet_name));

            // Render as markdown table
            let mut rows = range.rows();
            if let Some(header) = rows.next() {
                let header_cells: Vec<String> = header.iter().map(cell_to_string).collect();
                output.push_str("| ");
                output.push_str(&header_cells.join(" | "));
                output.push_str(" |\n");
                output.push_str("| ");
                output.push_str(
                    &header_cells
                        .iter()
                        .map(|_| "---")
                        .collect::<Vec<_>>()
                        .join(" | "),
                );
                output.push_str(" |\n");

                for row in rows {
                    let cells: Vec<String> = row.iter().map(cell_to_string).collect();
                    output.push_str("| ");
                    output.push_str(&cells.join(" | "));
                    output.push_str(" |\n");
                }
            }
        }
    }

    Ok(output)
}

fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) => format!("{}", f),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR({:?})", e),
        Data::DateTime(dt) => format!("{}", dt),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

fn extract_html(bytes: &[u8]) -> Result<String, ExtractError> {
    html2text::from_read(bytes, 80)
        .map_err(|e| ExtractError::ExtractionFailed(format!("HTML: {}", e)))
}

// ---------------------------------------------------------------------------
// Key metrics
// ---------------------------------------------------------------------------

/// Pull numeric highlights (currency, percentages, large counts) out of an
/// extracted document for the prompt's metrics section.
pub fn extract_key_metrics(text: &str) -> Vec<String> {
    let patterns = [
        // $1.2M, $450,000, $3.5 billion
        r"\$[\d,]+(?:\.\d+)?\s*(?:[KMB]|thousand|million|billion)?",
        // 37%, 4.5%
        r"\d+(?:\.\d+)?%",
        // 12,000 users / 3.4 million customers
        r"\d[\d,]*(?:\.\d+)?\s+(?:users|customers|seats|licenses|employees|deals)",
    ];

    let mut metrics = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for pattern in patterns {
        // Patterns are static and known-valid.
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        for m in re.find_iter(text).take(10) {
            let value = m.as_str().trim().to_string();
            if seen.insert(value.clone()) {
                metrics.push(value);
            }
        }
    }
    metrics.truncate(15);
    metrics
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Truncate text at a safe UTF-8 boundary.
fn truncate_text(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut result = text[..end].to_string();
    result.push_str("\n\n[... content truncated at 100KB ...]");
    result
}
