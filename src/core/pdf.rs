use once_cell::sync::Lazy;
use regex::Regex;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s<>'"\)]+"#).unwrap());
static MAILTO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"mailto:[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"#).unwrap());

/// Text layer of a PDF with link annotations appended, so contact links hidden behind
/// "Email me" style anchors still reach the field extractor.
pub fn extract_pdf_text(data: &[u8]) -> anyhow::Result<String> {
    let mut text = pdf_extract::extract_text_from_mem(data)?;

    let links = extract_hyperlinks(data);
    if !links.is_empty() {
        text.push('\n');
        text.push_str(&links.join("\n"));
    }

    Ok(text)
}

fn extract_hyperlinks(data: &[u8]) -> Vec<String> {
    let raw = String::from_utf8_lossy(data);
    let mut links: Vec<String> = Vec::new();
    for m in URL_RE.find_iter(&raw).chain(MAILTO_RE.find_iter(&raw)) {
        let value = m.as_str().to_string();
        if !links
            .iter()
            .any(|existing: &String| existing.eq_ignore_ascii_case(&value))
        {
            links.push(value);
        }
    }

    links
}
