//! Office and PDF documents through the full ingest → search path.

use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

use docmem::config::Config;
use docmem::context::AppContext;
use docmem::ingest::{ingest, IngestOptions};
use docmem::models::DocumentType;
use docmem::search::SearchRequest;

fn hash_context() -> AppContext {
    let mut config = Config::minimal();
    config.embedding.provider = "hash".into();
    config.embedding.dims = Some(64);
    config.scan.max_file_size_bytes = 4096;
    AppContext::in_memory(config).unwrap()
}

fn ooxml(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf.into_inner()
}

fn docx_with_text(phrase: &str) -> Vec<u8> {
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
        phrase
    );
    ooxml(&[("word/document.xml", &xml)])
}

fn xlsx_with_rows() -> Vec<u8> {
    ooxml(&[
        (
            "xl/sharedStrings.xml",
            "<sst><si><t>region</t></si><si><t>quarterly revenue</t></si></sst>",
        ),
        (
            "xl/worksheets/sheet1.xml",
            "<worksheet><sheetData><row><c t=\"s\"><v>0</v></c><c t=\"s\"><v>1</v></c></row></sheetData></worksheet>",
        ),
    ])
}

fn write(dir: &Path, name: &str, bytes: &[u8]) {
    fs::write(dir.join(name), bytes).unwrap();
}

#[tokio::test]
async fn test_office_documents_are_searchable() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "policy.docx", &docx_with_text("office travel reimbursement policy"));
    write(tmp.path(), "numbers.xlsx", &xlsx_with_rows());
    write(tmp.path(), "readme.md", b"# Readme\n\nPlain text file for tests.\n");

    let ctx = hash_context();
    let report = ingest(&ctx, "office", tmp.path(), &IngestOptions::default())
        .await
        .unwrap();
    assert_eq!(report.files_indexed, 3);
    assert_eq!(report.files_failed, 0);

    let response = ctx
        .search
        .search(&SearchRequest::new("travel reimbursement policy"))
        .await
        .unwrap();
    let top = &response.results[0];
    assert_eq!(top.relative_path, "policy.docx");
    assert_eq!(top.document_type, DocumentType::Docx);
    assert!(top.content.contains("office travel reimbursement policy"));

    let stats = ctx.lifecycle.stats("office").await.unwrap();
    assert_eq!(stats.document_types.get("docx"), Some(&1));
    assert_eq!(stats.document_types.get("xlsx"), Some(&1));
    assert_eq!(stats.document_types.get("markdown"), Some(&1));
}

#[tokio::test]
async fn test_broken_documents_are_skipped() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "broken.pdf", b"not a pdf at all");
    write(tmp.path(), "broken.docx", b"not a zip either");
    write(tmp.path(), "good.md", b"# Good\n\nStill indexed.\n");

    let ctx = hash_context();
    let report = ingest(&ctx, "mixed", tmp.path(), &IngestOptions::default())
        .await
        .unwrap();
    assert_eq!(report.files_failed, 2);
    assert_eq!(report.files_indexed, 1);

    let kbs = ctx.lifecycle.list().await.unwrap();
    assert_eq!(kbs[0].file_count, 1);
}

#[tokio::test]
async fn test_oversized_documents_are_not_read() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "small.md", b"# Small\n\nFits.\n");
    write(tmp.path(), "huge.md", "word ".repeat(2000).as_bytes());

    let ctx = hash_context();
    let report = ingest(&ctx, "sizes", tmp.path(), &IngestOptions::default())
        .await
        .unwrap();
    assert_eq!(report.scan.oversized_skipped, 1);
    assert_eq!(report.files_indexed, 1);

    let response = ctx
        .search
        .search(&SearchRequest::new("word"))
        .await
        .unwrap();
    assert!(response
        .results
        .iter()
        .all(|r| r.relative_path != "huge.md"));
}
