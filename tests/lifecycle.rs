//! Knowledge-base lifecycle against the SQLite store.

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use docmem::config::Config;
use docmem::context::AppContext;
use docmem::error::is_not_found;
use docmem::ingest::{ingest, IngestOptions};
use docmem::search::SearchRequest;
use docmem::store::collection_name;

fn config_in(dir: &Path) -> Config {
    let mut config = Config::with_db_path(dir.join("data").join("docmem.sqlite"));
    config.embedding.provider = "hash".into();
    config.embedding.dims = Some(64);
    config.chunking.chunk_size = 300;
    config.chunking.chunk_overlap = 30;
    config.ingest.write_batch_size = 3;
    config
}

fn tree(dir: &Path, files: &[(&str, &str)]) {
    for (rel, body) in files {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }
}

fn sample_trees(tmp: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let docs = tmp.join("docs");
    tree(
        &docs,
        &[
            ("guide.md", "# Guide\n\nInstalling the service on a fresh host.\n\n## Upgrades\n\nRolling upgrades keep one replica online.\n"),
            ("faq.txt", "Why does the cache expire? Entries live for five minutes.\n"),
        ],
    );
    let code = tmp.join("code");
    tree(
        &code,
        &[
            ("src/retry.rs", "/// Exponential backoff for flaky upstreams.\npub fn backoff(attempt: u32) -> u64 {\n    100 << attempt\n}\n"),
            ("tests/retry_test.rs", "#[test]\nfn backoff_grows() {\n    assert!(true);\n}\n"),
        ],
    );
    (docs, code)
}

async fn open(dir: &Path) -> AppContext {
    AppContext::open(config_in(dir)).await.unwrap()
}

#[tokio::test]
async fn test_search_spans_knowledge_bases() {
    let tmp = TempDir::new().unwrap();
    let (docs, code) = sample_trees(tmp.path());
    let ctx = open(tmp.path()).await;

    ingest(&ctx, "docs", &docs, &IngestOptions::default()).await.unwrap();
    ingest(&ctx, "code", &code, &IngestOptions::default()).await.unwrap();

    let response = ctx
        .search
        .search(&SearchRequest::new("exponential backoff for flaky upstreams"))
        .await
        .unwrap();
    assert_eq!(response.results[0].knowledge_base, "code");
    assert_eq!(response.results[0].relative_path, "src/retry.rs");
    assert!(response.results.iter().any(|r| r.knowledge_base == "docs"));
    for pair in response.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    let stats = ctx.lifecycle.stats("code").await.unwrap();
    assert!(stats.test_chunks >= 1);
    assert_eq!(stats.distinct_files, 2);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let (docs, _) = sample_trees(tmp.path());
    {
        let ctx = open(tmp.path()).await;
        ingest(&ctx, "docs", &docs, &IngestOptions::default()).await.unwrap();
    }

    let ctx = open(tmp.path()).await;
    let kbs = ctx.lifecycle.list().await.unwrap();
    assert_eq!(kbs.len(), 1);
    assert_eq!(kbs[0].name, "docs");
    assert_eq!(kbs[0].file_count, 2);
    assert_eq!(kbs[0].collection, collection_name("docs"));

    let response = ctx
        .search
        .search(&SearchRequest::new("cache expire"))
        .await
        .unwrap();
    assert_eq!(response.results[0].relative_path, "faq.txt");
}

#[tokio::test]
async fn test_reingest_keeps_one_chunk_set() {
    let tmp = TempDir::new().unwrap();
    let (docs, _) = sample_trees(tmp.path());
    let ctx = open(tmp.path()).await;

    let first = ingest(&ctx, "docs", &docs, &IngestOptions::default()).await.unwrap();
    fs::remove_file(docs.join("faq.txt")).unwrap();
    let second = ingest(&ctx, "docs", &docs, &IngestOptions::default()).await.unwrap();

    assert!(second.ingestion_timestamp > first.ingestion_timestamp);
    assert_eq!(second.stale_chunks_removed, first.chunks_written);

    let sets = ctx.lifecycle.chunk_sets("docs").await.unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].ingestion_timestamp, second.ingestion_timestamp);

    let kbs = ctx.lifecycle.list().await.unwrap();
    assert_eq!(kbs[0].file_count, 1);
    assert_eq!(kbs[0].chunk_count, second.chunks_written);
}

#[tokio::test]
async fn test_rename_then_search_by_new_name() {
    let tmp = TempDir::new().unwrap();
    let (docs, _) = sample_trees(tmp.path());
    let ctx = open(tmp.path()).await;

    let before = ingest(&ctx, "docs", &docs, &IngestOptions::default()).await.unwrap();
    let report = ctx.lifecycle.rename("docs", "handbook").await.unwrap();
    assert_eq!(report.chunks_copied, before.chunks_written);
    assert!(report.old_collection_dropped);

    let err = ctx.lifecycle.stats("docs").await.unwrap_err();
    assert!(is_not_found(&err));

    let mut request = SearchRequest::new("rolling upgrades");
    request.knowledge_base = Some("handbook".into());
    let response = ctx.search.search(&request).await.unwrap();
    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|r| r.knowledge_base == "handbook"));

    let stats = ctx.lifecycle.stats("handbook").await.unwrap();
    assert_eq!(stats.info.chunk_count, before.chunks_written);
    assert_eq!(stats.info.collection, collection_name("handbook"));
}

#[tokio::test]
async fn test_delete_chunk_set_and_delete() {
    let tmp = TempDir::new().unwrap();
    let (docs, code) = sample_trees(tmp.path());
    let ctx = open(tmp.path()).await;

    ingest(&ctx, "docs", &docs, &IngestOptions::default()).await.unwrap();
    let run = ingest(&ctx, "code", &code, &IngestOptions::default()).await.unwrap();

    let removed = ctx
        .lifecycle
        .delete_chunk_set("code", run.ingestion_timestamp)
        .await
        .unwrap();
    assert_eq!(removed, run.chunks_written);
    let kbs = ctx.lifecycle.list().await.unwrap();
    let code_kb = kbs.iter().find(|k| k.name == "code").unwrap();
    assert_eq!(code_kb.chunk_count, 0);
    assert_eq!(code_kb.file_count, 0);

    ctx.lifecycle.delete("code").await.unwrap();
    let names: Vec<String> = ctx
        .lifecycle
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|k| k.name)
        .collect();
    assert_eq!(names, vec!["docs".to_string()]);

    let err = ctx.lifecycle.delete("code").await.unwrap_err();
    assert!(is_not_found(&err));
}
