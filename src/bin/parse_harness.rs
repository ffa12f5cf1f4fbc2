use std::path::Path;

use talent_intake_lib::core::logging::init_tracing;
use talent_intake_lib::core::models::{DocumentInput, PipelineSettings};
use talent_intake_lib::core::store::MemoryStore;
use talent_intake_lib::IntakeService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("warn");

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: parse_harness <path-to-resume.pdf|docx|txt>");
        std::process::exit(1);
    }

    let path = &args[1];
    if !Path::new(path).exists() {
        eprintln!("File not found: {path}");
        std::process::exit(2);
    }

    let file_name = Path::new(path)
        .file_name()
        .and_then(|v| v.to_str())
        .unwrap_or("resume.pdf")
        .to_string();
    let bytes = tokio::fs::read(path).await?;

    let service = IntakeService::new(PipelineSettings::default(), std::sync::Arc::new(MemoryStore::new())).await?;
    let record = service
        .parse_document(DocumentInput::new(file_name, bytes))
        .await?;

    println!("{}", serde_json::to_string_pretty(&record.candidate)?);
    for issue in &record.issues {
        eprintln!("issue: {issue}");
    }
    Ok(())
}
