//! End-to-end tests: real PDFs through extraction, indexing, retrieval and
//! grading, with a hashing embedder and a scripted chat backend.

use async_trait::async_trait;
use rag_grader::batch::{Manifest, Outcome, run_batch};
use rag_grader::chunk::Chunker;
use rag_grader::config::{Config, EmbeddingBackend};
use rag_grader::embedding::{Embedder, HashEmbedder};
use rag_grader::error::{GraderError, Result, Stage};
use rag_grader::evaluate::Evaluator;
use rag_grader::extract::{extract_files, extract_pdf, extract_text};
use rag_grader::index::VectorIndex;
use rag_grader::llm::{ChatBackend, ChatRequest, LlmResponse, Role};
use rag_grader::persistence::{IndexStore, index_exists};
use rag_grader::retrieval::{EXCERPT_SEPARATOR, Retriever};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const GOOD_REPLY: &str =
    r#"{"grade": 85, "remarks": "Works", "strengths": "Clear loop", "area_of_improvement": "Add tests"}"#;

/// PDF with one page per entry, each page holding one text line per string.
fn pdf_with_pages(pages: &[&[&str]]) -> Vec<u8> {
    let page_count = pages.len();
    let kids: Vec<String> = (0..page_count).map(|p| format!("{} 0 R", 4 + 2 * p)).collect();

    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), page_count),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];
    for (p, lines) in pages.iter().enumerate() {
        let mut content = String::new();
        for (i, line) in lines.iter().enumerate() {
            content.push_str(&format!("BT /F1 12 Tf 72 {} Td ({}) Tj ET\n", 720 - 14 * i, line));
        }
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >>",
            5 + 2 * p
        ));
        objects.push(format!("<< /Length {} >>\nstream\n{}endstream", content.len(), content));
    }

    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    for (n, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj {} endobj\n", n + 1, body).as_bytes());
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!("trailer << /Size {} /Root 1 0 R >>\nstartxref\n", objects.len() + 1).as_bytes(),
    );
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Single-page PDF with one text line per entry.
fn pdf_with_lines(lines: &[&str]) -> Vec<u8> {
    pdf_with_pages(&[lines])
}

/// Distinct 44-character lines for page `page`.
fn page_lines(page: usize, count: usize) -> Vec<String> {
    let topic = ["loops", "sorting", "recursion"][page % 3];
    (0..count)
        .map(|i| format!("{:<44}", format!("page {} line {:02} topic {}", page, i, topic)))
        .collect()
}

fn write_submission(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(
        &path,
        pdf_with_lines(&[
            "def bubble_sort xs",
            "for i in range len xs",
            "swap adjacent elements when out of order",
            "return the sorted list",
        ]),
    )
    .unwrap();
    path
}

/// Replies with a fixed evaluation and keeps every user message it saw.
#[derive(Default)]
struct RecordingBackend {
    prompts: Mutex<Vec<String>>,
}

impl RecordingBackend {
    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for RecordingBackend {
    async fn chat(&self, request: ChatRequest) -> Result<LlmResponse> {
        let user = request
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(user);
        Ok(LlmResponse::from_content(GOOD_REPLY))
    }
}

struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dimension(&self) -> usize {
        4
    }

    fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Err(GraderError::Embedding("model unavailable".to_string()))
    }
}

fn test_config(index_root: &Path) -> Config {
    let mut config = Config::default();
    config.embedding.backend = EmbeddingBackend::Hash;
    config.index.root_dir = index_root.to_path_buf();
    config.chunking.chunk_size = 60;
    config.chunking.chunk_overlap = 10;
    config.grading.retry_backoff_ms = 0;
    config
}

fn evaluator(index_root: &Path) -> Evaluator<RecordingBackend> {
    Evaluator::new(
        &test_config(index_root),
        Box::new(HashEmbedder::new(128).unwrap()),
        RecordingBackend::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_evaluate_pdf_end_to_end() {
    let dir = TempDir::new().unwrap();
    let pdf = write_submission(dir.path(), "alice.pdf");
    let evaluator = evaluator(&dir.path().join("indexes"));

    let result = evaluator
        .evaluate("hw1/alice", "Implement bubble sort", &[&pdf])
        .await
        .unwrap();

    assert_eq!(result.grade, 85);
    assert_eq!(result.area_of_improvement, "Add tests");

    let prompts = evaluator.grader().backend().prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("User Question: Implement bubble sort"));
    assert!(prompts[0].contains("bubble_sort"));

    let location = evaluator.store().location("hw1/alice").unwrap();
    assert!(index_exists(&location));

    let index = VectorIndex::load(&location, evaluator.embedder()).unwrap();
    assert!(index.len() > 1);
    assert_eq!(index.dimension(), 128);
}

#[tokio::test]
async fn test_reevaluation_replaces_index() {
    let dir = TempDir::new().unwrap();
    let first = write_submission(dir.path(), "v1.pdf");
    let second = dir.path().join("v2.pdf");
    fs::write(&second, pdf_with_lines(&["short answer"])).unwrap();
    let evaluator = evaluator(&dir.path().join("indexes"));

    evaluator.evaluate("hw1/bob", "Explain", &[&first]).await.unwrap();
    evaluator.evaluate("hw1/bob", "Explain", &[&second]).await.unwrap();

    let index = VectorIndex::load(&evaluator.store().location("hw1/bob").unwrap(), evaluator.embedder()).unwrap();
    assert_eq!(index.len(), 1);
    assert!(index.entries()[0].document.content.contains("short answer"));
}

#[tokio::test]
async fn test_distinct_keys_do_not_collide() {
    let dir = TempDir::new().unwrap();
    let pdf = write_submission(dir.path(), "shared.pdf");
    let evaluator = evaluator(&dir.path().join("indexes"));

    let pdfs = [&pdf];
    let (a, b) = tokio::join!(
        evaluator.evaluate("hw1/alice", "Sort", &pdfs),
        evaluator.evaluate("hw1/carol", "Sort", &pdfs),
    );
    assert!(a.is_ok() && b.is_ok());

    let alice = evaluator.store().location("hw1/alice").unwrap();
    let carol = evaluator.store().location("hw1/carol").unwrap();
    assert_ne!(alice, carol);
    assert!(index_exists(&alice));
    assert!(index_exists(&carol));
}

#[tokio::test]
async fn test_batch_continues_after_bad_submission() {
    let dir = TempDir::new().unwrap();
    write_submission(dir.path(), "alice.pdf");
    fs::write(dir.path().join("bob.pdf"), b"this is not a pdf").unwrap();

    let manifest_path = dir.path().join("manifest.json");
    fs::write(
        &manifest_path,
        r#"{
            "assignment": {"id": "hw1", "title": "Sorting", "description": "Implement bubble sort"},
            "submissions": [
                {"userId": "bob", "state": "TURNED_IN", "attachments": ["bob.pdf"]},
                {"userId": "carol", "state": "CREATED", "attachments": []},
                {"userId": "alice", "state": "TURNED_IN", "attachments": ["alice.pdf"]}
            ]
        }"#,
    )
    .unwrap();

    let manifest = Manifest::load(&manifest_path).unwrap();
    let evaluator = evaluator(&dir.path().join("indexes"));
    let report = run_batch(&evaluator, &manifest).await;

    assert!(report.aborted.is_none());
    assert_eq!(report.outcomes.len(), 3);
    assert!(matches!(
        report.outcomes[0].outcome,
        Outcome::Failed { stage: Stage::Extraction, .. }
    ));
    assert!(matches!(report.outcomes[1].outcome, Outcome::Skipped { .. }));
    match &report.outcomes[2].outcome {
        Outcome::Graded { result } => assert_eq!(result.grade, 85),
        other => panic!("expected a grade, got {:?}", other),
    }

    let out = dir.path().join("report.json");
    report.save(&out).unwrap();
    assert!(fs::read_to_string(&out).unwrap().contains("\"student_id\": \"alice\""));
}

#[tokio::test]
async fn test_batch_aborts_on_embedding_failure() {
    let dir = TempDir::new().unwrap();
    write_submission(dir.path(), "alice.pdf");
    write_submission(dir.path(), "bob.pdf");

    let manifest = Manifest::from_directory(dir.path(), "hw1", "Implement bubble sort").unwrap();
    let evaluator = Evaluator::new(
        &test_config(&dir.path().join("indexes")),
        Box::new(FailingEmbedder),
        RecordingBackend::default(),
    )
    .unwrap();

    let report = run_batch(&evaluator, &manifest).await;

    assert!(report.aborted.is_some());
    assert_eq!(report.outcomes.len(), 1);
    assert!(matches!(
        report.outcomes[0].outcome,
        Outcome::Failed { stage: Stage::Embedding, .. }
    ));
    assert!(evaluator.grader().backend().prompts().is_empty());
}

#[test]
fn test_pages_extract_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("three_pages.pdf");
    fs::write(
        &path,
        pdf_with_pages(&[&["ALPHA first page"], &["BRAVO second page"], &["CHARLIE third page"]]),
    )
    .unwrap();

    let text = extract_pdf(&path).unwrap();
    let alpha = text.find("ALPHA").unwrap();
    let bravo = text.find("BRAVO").unwrap();
    let charlie = text.find("CHARLIE").unwrap();
    assert!(alpha < bravo && bravo < charlie, "{text:?}");
}

#[test]
fn test_files_extract_in_given_order() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("b_first.pdf");
    let second = dir.path().join("a_second.pdf");
    fs::write(&first, pdf_with_pages(&[&["FIRST one"], &["FIRST two"]])).unwrap();
    fs::write(&second, pdf_with_lines(&["SECOND one"])).unwrap();

    let text = extract_text(&[&first, &second]).unwrap();
    assert!(text.find("FIRST two").unwrap() < text.find("SECOND one").unwrap());

    let reversed = extract_text(&[&second, &first]).unwrap();
    assert!(reversed.find("SECOND one").unwrap() < reversed.find("FIRST one").unwrap());

    let extracted = extract_files(&[&first, &second]).unwrap();
    assert_eq!(extracted.text, text);
    let offset = extracted.text[..text.find("SECOND").unwrap()].chars().count();
    assert_eq!(extracted.source_at(0), Some("b_first.pdf"));
    assert_eq!(extracted.source_at(offset), Some("a_second.pdf"));
}

#[test]
fn test_chunks_name_the_file_they_came_from() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("part1.pdf");
    let second = dir.path().join("part2.pdf");
    let lines: Vec<String> = page_lines(0, 6);
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    fs::write(&first, pdf_with_lines(&refs)).unwrap();
    fs::write(&second, pdf_with_lines(&refs)).unwrap();
    let evaluator = evaluator(&dir.path().join("indexes"));

    let location = evaluator.build_index("hw1/dave", &[&first, &second]).unwrap();
    let index = VectorIndex::load(&location, evaluator.embedder()).unwrap();

    let sources: Vec<&str> = index
        .entries()
        .iter()
        .map(|e| e.document.source.as_deref().unwrap())
        .collect();
    assert_eq!(sources.first(), Some(&"part1.pdf"));
    assert_eq!(sources.last(), Some(&"part2.pdf"));
    let switch = sources.iter().position(|s| *s == "part2.pdf").unwrap();
    assert!(sources[switch..].iter().all(|s| *s == "part2.pdf"));
}

#[tokio::test]
async fn test_textless_pdf_is_empty_not_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scan.pdf");
    fs::write(&path, pdf_with_pages(&[&[], &[]])).unwrap();

    let text = extract_text(&[&path]).unwrap();
    assert!(text.trim().is_empty(), "{text:?}");

    let evaluator = evaluator(&dir.path().join("indexes"));
    let err = evaluator.evaluate("hw1/erin", "Explain", &[&path]).await.unwrap_err();
    assert!(matches!(err, GraderError::IndexBuild(_)));
    assert!(evaluator.grader().backend().prompts().is_empty());
}

#[test]
fn test_truncated_pdf_is_extraction_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cut.pdf");
    let bytes = pdf_with_pages(&[&["some text"], &["more text"]]);
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let err = extract_pdf(&path).unwrap_err();
    assert!(matches!(err, GraderError::Extraction { .. }));
    assert_eq!(err.stage(), Stage::Extraction);
}

#[test]
fn test_three_page_submission_three_chunks_all_retrieved() {
    let dir = TempDir::new().unwrap();
    let pages: Vec<Vec<String>> = (0..3).map(|p| page_lines(p, 16)).collect();
    let page_refs: Vec<Vec<&str>> = pages
        .iter()
        .map(|lines| lines.iter().map(String::as_str).collect())
        .collect();
    let slices: Vec<&[&str]> = page_refs.iter().map(Vec::as_slice).collect();
    let path = dir.path().join("essay.pdf");
    fs::write(&path, pdf_with_pages(&slices)).unwrap();

    let text = extract_text(&[&path]).unwrap();
    let len = text.chars().count();
    assert!((1900..=2400).contains(&len), "extracted {len} chars");

    let chunks = Chunker::new(1000, 200).unwrap().split(&text);
    assert_eq!(chunks.len(), 3);
    for pair in chunks.windows(2) {
        let tail: String = pair[0].text.chars().skip(pair[1].start - pair[0].start).collect();
        assert!(pair[0].end - pair[1].start >= 200);
        assert!(pair[1].text.starts_with(&tail));
    }

    let embedder = HashEmbedder::new(128).unwrap();
    let documents = chunks
        .into_iter()
        .map(|chunk| chunk.into_document(Some("essay.pdf")))
        .collect();
    let index = VectorIndex::build(documents, &embedder).unwrap();
    let location = IndexStore::new(dir.path().join("indexes")).location("hw1/essay").unwrap();
    index.persist(&location).unwrap();
    let index = VectorIndex::load(&location, &embedder).unwrap();

    let results = index.query("topic sorting", &embedder, 3).unwrap();
    assert_eq!(results.len(), 3);
    for pair in results.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    let mut indices: Vec<usize> = results.iter().map(|r| r.document.chunk_index.unwrap()).collect();
    indices.sort();
    assert_eq!(indices, vec![0, 1, 2]);

    let excerpts = Retriever::new(3).excerpts("topic sorting", &index, &embedder).unwrap();
    assert_eq!(excerpts.matches(EXCERPT_SEPARATOR).count(), 2);
    assert!(excerpts.starts_with(&results[0].document.content));
}
