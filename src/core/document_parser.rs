use std::io::{Cursor, Read};

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::errors::CoreError;
use super::models::DocumentFormat;
use super::pdf::extract_pdf_text;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub text: String,
    pub format: DocumentFormat,
    pub byte_len: usize,
}

/// Raw bytes to plain text. Failures are per document and never abort a batch.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<ExtractedDocument, CoreError>;
}

/// Default extractor for PDF, DOCX and plain text resumes.
#[derive(Debug, Clone, Default)]
pub struct ResumeDocumentParser;

impl ResumeDocumentParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentExtractor for ResumeDocumentParser {
    async fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<ExtractedDocument, CoreError> {
        let format = DocumentFormat::from_file_name(file_name);
        let failure = |reason: String| CoreError::Extraction {
            file_name: file_name.to_string(),
            reason,
        };

        let text = match format {
            DocumentFormat::Pdf => {
                // pdf-extract is CPU bound and may panic on hostile input.
                let data = bytes.to_vec();
                tokio::task::spawn_blocking(move || extract_pdf_text(&data))
                    .await
                    .map_err(|err| failure(format!("pdf worker failed: {err}")))?
                    .map_err(|err| failure(format!("Parse error: {err}")))?
            }
            DocumentFormat::Docx => {
                extract_docx_text(bytes).map_err(|err| failure(format!("Parse error: {err}")))?
            }
            DocumentFormat::Txt => String::from_utf8_lossy(bytes).into_owned(),
            DocumentFormat::Unknown => {
                return Err(failure(format!("Unsupported file type: {file_name}")));
            }
        };

        Ok(ExtractedDocument {
            text,
            format,
            byte_len: bytes.len(),
        })
    }
}

fn extract_docx_text(data: &[u8]) -> anyhow::Result<String> {
    let cursor = Cursor::new(data);
    let mut archive = zip::ZipArchive::new(cursor)?;

    let mut document_file = archive.by_name("word/document.xml")?;
    let mut xml = String::new();
    document_file.read_to_string(&mut xml)?;

    let mut reader = Reader::from_str(&xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut current = String::new();
    let mut lines = Vec::new();
    let mut in_paragraph = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => {
                    in_paragraph = true;
                    current.clear();
                }
                b"w:tab" if in_paragraph => current.push(' '),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if in_paragraph && matches!(e.name().as_ref(), b"w:tab" | b"w:br") {
                    current.push(' ');
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"w:p" {
                    if !current.trim().is_empty() {
                        lines.push(current.trim().to_string());
                    }
                    current.clear();
                    in_paragraph = false;
                }
            }
            Ok(Event::Text(e)) => {
                if in_paragraph {
                    let value = e.xml_content()?.into_owned();
                    current.push_str(&value);
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(err.into()),
            _ => {}
        }

        buf.clear();
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("word/document.xml", options).unwrap();
            writer.write_all(document_xml.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn docx_paragraphs_become_lines() {
        let xml = r#"<w:document><w:body><w:p><w:r><w:t>Jane Doe</w:t></w:r></w:p><w:p><w:r><w:t>Skills</w:t></w:r></w:p><w:p><w:r><w:t>Rust</w:t></w:r><w:r><w:tab/><w:t>SQL</w:t></w:r></w:p></w:body></w:document>"#;
        let extracted = ResumeDocumentParser::new()
            .extract("jane.docx", &docx_bytes(xml))
            .await
            .unwrap();
        assert_eq!(extracted.format, DocumentFormat::Docx);
        assert_eq!(extracted.text, "Jane Doe\nSkills\nRust SQL");
    }

    #[tokio::test]
    async fn text_is_decoded_lossily() {
        let extracted = ResumeDocumentParser::new()
            .extract("cv.txt", b"Jane \xff Doe")
            .await
            .unwrap();
        assert_eq!(extracted.text, "Jane \u{FFFD} Doe");
        assert_eq!(extracted.byte_len, 10);
    }

    #[tokio::test]
    async fn unsupported_and_corrupt_files_are_extraction_errors() {
        let parser = ResumeDocumentParser::new();
        assert!(matches!(
            parser.extract("scan.tiff", b"II*").await,
            Err(CoreError::Extraction { .. })
        ));
        assert!(matches!(
            parser.extract("broken.docx", b"not a zip").await,
            Err(CoreError::Extraction { .. })
        ));
        assert!(matches!(
            parser.extract("broken.pdf", b"not a pdf").await,
            Err(CoreError::Extraction { .. })
        ));
    }
}
