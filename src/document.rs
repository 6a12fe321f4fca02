use anyhow::{bail, Context, Result};
use log::{debug, info};
use mime_guess::from_path;
use pdf_extract::{extract_text, extract_text_from_mem};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const PDF_MIME: &str = "application/pdf";

/// Represents a document with its content and metadata
#[derive(Debug, Clone)]
pub struct Document {
    /// The extracted text content of the document
    pub content: String,
    /// The document's file name, shown as the citation source
    pub source: String,
    /// Where the document was read from
    pub file_path: String,
    /// The document's MIME type
    pub mime_type: String,
    /// SHA-256 of the extracted text, used to detect re-uploads
    pub document_hash: String,
}

impl Document {
    /// Create a new document from a file path
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        let file_name = path
            .file_name()
            .context("Invalid file name")?
            .to_str()
            .context("Invalid file name encoding")?
            .to_string();

        // Detect MIME type
        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type: {}", mime_type);

        let content = read_document_content(path, &mime_type)?;

        Self::new(content, file_name, path.display().to_string(), mime_type)
    }

    /// Create a document from an uploaded PDF buffer
    pub fn from_pdf_bytes(file_name: &str, bytes: &[u8]) -> Result<Self> {
        info!("Processing uploaded PDF: {}", file_name);
        let content = extract_text_from_mem(bytes)
            .with_context(|| format!("Failed to extract text from PDF: {}", file_name))?;

        Self::new(
            normalize_whitespace(&content),
            file_name.to_string(),
            file_name.to_string(),
            PDF_MIME.to_string(),
        )
    }

    fn new(content: String, source: String, file_path: String, mime_type: String) -> Result<Self> {
        if content.trim().is_empty() {
            bail!("No text content found in {}", source);
        }

        let document_hash = content_hash(&content);

        Ok(Document {
            content,
            source,
            file_path,
            mime_type,
            document_hash,
        })
    }
}

/// Load a file on the blocking pool; a panicking extractor becomes an error
pub async fn load_file(path: PathBuf) -> Result<Document> {
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || Document::from_file(&path))
        .await
        .with_context(|| format!("Document extraction aborted for {}", display))?
}

/// Extract an uploaded PDF on the blocking pool
pub async fn load_pdf_upload(file_name: String, bytes: Vec<u8>) -> Result<Document> {
    let label = file_name.clone();
    tokio::task::spawn_blocking(move || Document::from_pdf_bytes(&file_name, &bytes))
        .await
        .with_context(|| format!("PDF extraction aborted for {}", label))?
}

/// Lowercase hex SHA-256 of a document's text
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Read content from a document based on its MIME type
pub fn read_document_content<P: AsRef<Path>>(file_path: P, mime_type: &str) -> Result<String> {
    let path = file_path.as_ref();

    match mime_type {
        mime if mime.starts_with(PDF_MIME) => {
            info!("Processing PDF document: {}", path.display());
            let content = extract_text(path)
                .with_context(|| format!("Failed to extract text from PDF: {}", path.display()))?;

            // PDF extraction can sometimes include excessive whitespace
            Ok(normalize_whitespace(&content))
        }

        mime if mime.starts_with("text/") => {
            info!("Processing text document: {}", path.display());
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read text file: {}", path.display()))?;
            Ok(content)
        }

        _ => Err(anyhow::anyhow!(
            "Unsupported document format: {}. Only PDF and text files are supported.",
            mime_type
        )),
    }
}

/// Collapse repeated spaces and cap newline runs at one paragraph break
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
            continue;
        }

        if newline_count > 0 {
            normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
            newline_count = 0;
            prev_char = '\n';
        }

        if !(c == ' ' && (prev_char == ' ' || prev_char == '\n')) {
            normalized.push(c);
        }

        prev_char = c;
    }

    normalized.trim().to_string()
}
