use crate::chunking::{TextChunk, TextSplitter};
use crate::config::AppConfig;
use crate::database::{CollectionInfo, QdrantConfig, QdrantStore, VectorStore};
use crate::document::{load_file, Document};
use crate::embeddings::{Embedder, Embedding, LocalEmbedder};
use crate::llm::{LanguageModel, OpenRouterClient, OpenRouterConfig};
use crate::retrieval::{mmr_select, FETCH_MULTIPLIER, MMR_LAMBDA};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

/// Reply used when retrieval finds nothing to answer from
pub const NO_CONTEXT_ANSWER: &str =
    "I don't have enough information in the uploaded syllabus documents to answer this question.";

pub const EMPTY_QUESTION_ANSWER: &str = "Please provide a valid question.";

const PREVIEW_CHARS: usize = 1000;

const PROMPT_TEMPLATE: &str = r#"You are an expert academic assistant specializing in university syllabi.

Use ONLY the following context from uploaded syllabus documents to answer the question.

If the answer cannot be found in the provided context, say:
"{fallback}"

Context from syllabus documents:
{context}

Question:
{question}

Instructions:
1. Answer ONLY using information from the provided context.
2. Do NOT use external knowledge.
3. Provide a well-structured and detailed explanation.
4. Use multiple paragraphs when necessary.
5. Clearly explain requirements, schedules, grading policies, or course content when mentioned.
6. Reference the source filename when possible.
7. Do not summarize too briefly.

Answer:
"#;

/// A document a retrieved chunk came from
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Source {
    pub filename: String,
    pub chunk_index: usize,
    pub preview: String,
}

/// Generated answer with the documents it was drawn from
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
}

impl Answer {
    fn without_sources(answer: &str) -> Self {
        Answer {
            answer: answer.to_string(),
            sources: Vec::new(),
        }
    }
}

/// What happened to a single uploaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Chunked, embedded and stored
    Indexed { chunks: usize },
    /// A document with identical text is already stored
    Skipped,
    /// Nothing left after chunking
    Empty,
}

/// Result of ingesting one file in a batch
#[derive(Debug)]
pub struct FileResult {
    pub file_name: String,
    pub outcome: Result<IngestOutcome>,
}

/// Per-file results of a batch upload
#[derive(Debug, Default)]
pub struct IngestReport {
    pub files: Vec<FileResult>,
}

impl IngestReport {
    pub fn indexed(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Indexed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.files.iter().filter(|f| f.outcome.is_err()).count()
    }

    fn count(&self, predicate: impl Fn(&IngestOutcome) -> bool) -> usize {
        self.files
            .iter()
            .filter(|f| f.outcome.as_ref().map(&predicate).unwrap_or(false))
            .count()
    }
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine<S, E, L> {
    store: S,
    embedder: Arc<E>,
    llm: L,
    splitter: TextSplitter,
    top_k: usize,
}

impl<S, E, L> RagEngine<S, E, L>
where
    S: VectorStore,
    E: Embedder + Send + Sync + 'static,
    L: LanguageModel,
{
    /// Create a new RAG engine
    pub fn new(store: S, embedder: E, llm: L, splitter: TextSplitter, top_k: usize) -> Self {
        RagEngine {
            store,
            embedder: Arc::new(embedder),
            llm,
            splitter,
            top_k: top_k.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn collection_info(&self) -> Result<CollectionInfo> {
        self.store.collection_info().await
    }

    /// Remove every uploaded document
    pub async fn clear(&self) -> Result<()> {
        self.store.delete_collection().await
    }

    /// Run the embedding model on the blocking pool
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        let embedder = Arc::clone(&self.embedder);
        tokio::task::spawn_blocking(move || {
            let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
            embedder.embed_documents(&texts)
        })
        .await
        .context("Embedding task aborted")?
    }

    /// Chunk a document, embed the chunks and store them, unless already stored
    pub async fn ingest_document(&self, document: &Document) -> Result<IngestOutcome> {
        self.store
            .ensure_collection(self.embedder.dimension())
            .await?;

        if self.store.document_exists(&document.document_hash).await? {
            info!("{} already exists in the database, skipping", document.source);
            return Ok(IngestOutcome::Skipped);
        }

        let chunks = self.splitter.chunk_document(document);
        if chunks.is_empty() {
            warn!("No content extracted from {}", document.source);
            return Ok(IngestOutcome::Empty);
        }
        info!("Split {} into {} chunks", document.source, chunks.len());

        let texts = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embed_texts(texts).await?;

        let stored = self.store.add_chunks(chunks, embeddings).await?;
        info!("Indexed {} ({} chunks)", document.source, stored);

        Ok(IngestOutcome::Indexed { chunks: stored })
    }

    /// Ingest several files; a failing file does not stop the rest
    pub async fn ingest_files<P: AsRef<Path>>(&self, paths: &[P]) -> IngestReport {
        let mut report = IngestReport::default();

        for path in paths {
            let path = path.as_ref();
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());

            let outcome = match load_file(path.to_path_buf()).await {
                Ok(document) => self.ingest_document(&document).await,
                Err(e) => Err(e),
            };

            if let Err(e) = &outcome {
                warn!("Failed to process {}: {:#}", file_name, e);
            }

            report.files.push(FileResult { file_name, outcome });
        }

        report
    }

    /// Retrieve the chunks most useful for answering a question
    pub async fn retrieve(&self, question: &str) -> Result<Vec<TextChunk>> {
        let query = self
            .embed_texts(vec![question.to_string()])
            .await?
            .into_iter()
            .next()
            .context("No embedding generated for question")?;
        let fetch = (self.top_k * FETCH_MULTIPLIER) as u64;
        let candidates = self.store.search(&query, fetch).await?;

        if candidates.len() <= self.top_k {
            return Ok(candidates.into_iter().map(|c| c.chunk).collect());
        }

        let stored: Option<Vec<Vec<f32>>> =
            candidates.iter().map(|c| c.vector.clone()).collect();
        let vectors = match stored {
            Some(vectors) => vectors,
            None => {
                let texts = candidates.iter().map(|c| c.chunk.text.clone()).collect();
                self.embed_texts(texts)
                    .await?
                    .into_iter()
                    .map(|e| e.values)
                    .collect()
            }
        };

        let picked = mmr_select(&query.values, &vectors, self.top_k, MMR_LAMBDA);
        Ok(picked
            .into_iter()
            .map(|i| candidates[i].chunk.clone())
            .collect())
    }

    /// Answer a question strictly from stored syllabus chunks
    pub async fn answer_question(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(Answer::without_sources(EMPTY_QUESTION_ANSWER));
        }

        let chunks = self.retrieve(question).await?;
        if chunks.is_empty() {
            info!("No relevant chunks found for question");
            return Ok(Answer::without_sources(NO_CONTEXT_ANSWER));
        }

        let prompt = build_prompt(&format_context(&chunks), question);
        let answer = self.llm.complete(&prompt).await?;

        Ok(Answer {
            answer,
            sources: extract_sources(&chunks),
        })
    }

    /// Run the interactive question loop on stdin
    pub async fn run_query_loop(&self) -> Result<()> {
        println!("Ready to answer questions about your syllabi. Type 'exit' to quit.");

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut buffer = String::new();

        loop {
            print!("\nYour question: ");
            stdout.flush()?;

            buffer.clear();
            if stdin.read_line(&mut buffer)? == 0 {
                break;
            }

            let question = buffer.trim();

            if question.eq_ignore_ascii_case("exit") {
                println!("Goodbye!");
                break;
            }

            match self.answer_question(question).await {
                Ok(answer) => print_answer(&answer),
                Err(e) => println!("Error processing question: {:#}", e),
            }
        }

        Ok(())
    }
}

/// Engine wired to Qdrant, the local embedding model and OpenRouter
pub type SyllabusEngine = RagEngine<QdrantStore, LocalEmbedder, OpenRouterClient>;

impl SyllabusEngine {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = QdrantStore::new(QdrantConfig::from(config))?;
        let embedder = LocalEmbedder::new(&config.embedding_model)?;
        let llm = OpenRouterClient::new(OpenRouterConfig::from_app_config(config)?);
        let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap);

        Ok(RagEngine::new(store, embedder, llm, splitter, config.top_k))
    }
}

/// Print an answer and its sources to stdout
pub fn print_answer(answer: &Answer) {
    println!("\n{}", answer.answer);

    if answer.sources.is_empty() {
        return;
    }

    println!("\nSources:");
    for (idx, source) in answer.sources.iter().enumerate() {
        println!(
            "  {}. {} (chunk {})",
            idx + 1,
            source.filename,
            source.chunk_index
        );
    }
}

/// Settings and collection summary printed by the `info` command
pub fn info_lines(config: &AppConfig, info: &CollectionInfo) -> Vec<String> {
    let mut lines = vec!["Current settings:".to_string()];
    lines.extend(config.describe().into_iter().map(|line| format!("  {}", line)));
    lines.push(format!("Collection: {}", info.collection_name));
    lines.push(format!("Documents in database: {}", info.document_count));
    lines.push(format!("Vector store: {}", info.store_url));
    lines
}

/// Fill the answer template with context and question
pub fn build_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{fallback}", NO_CONTEXT_ANSWER)
        .replace("{context}", context)
        .replace("{question}", question)
}

/// Join retrieved chunks, each labelled with its file and position
pub fn format_context(chunks: &[TextChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| format!("[{} | chunk {}]\n{}", chunk.source, chunk.chunk_index, chunk.text))
        .collect::<Vec<String>>()
        .join("\n\n---\n\n")
}

/// One source per distinct file, in retrieval order
pub fn extract_sources(chunks: &[TextChunk]) -> Vec<Source> {
    let mut seen = HashSet::new();

    chunks
        .iter()
        .filter(|chunk| seen.insert(chunk.source.as_str()))
        .map(|chunk| Source {
            filename: chunk.source.clone(),
            chunk_index: chunk.chunk_index,
            preview: preview(&chunk.text),
        })
        .collect()
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::embeddings::Embedding;
    use std::io::Write as _;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const VOCABULARY: [&str; 6] = ["exam", "grade", "lab", "office", "project", "late"];

    /// Bag-of-keywords embedder so similarity follows shared vocabulary
    #[derive(Default)]
    struct KeywordEmbedder {
        calls: AtomicUsize,
    }

    impl Embedder for KeywordEmbedder {
        fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|text| {
                    let lower = text.to_lowercase();
                    Embedding::from(
                        VOCABULARY
                            .iter()
                            .map(|word| lower.matches(word).count() as f32)
                            .collect::<Vec<f32>>(),
                    )
                })
                .collect())
        }

        fn dimension(&self) -> u64 {
            VOCABULARY.len() as u64
        }
    }

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<String>>,
    }

    impl LanguageModel for RecordingModel {
        async fn complete(&self, system_prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(system_prompt.to_string());
            Ok("The final exam is worth 40%.".to_string())
        }
    }

    type TestEngine = RagEngine<MemoryStore, KeywordEmbedder, RecordingModel>;

    fn engine(top_k: usize) -> TestEngine {
        RagEngine::new(
            MemoryStore::default(),
            KeywordEmbedder::default(),
            RecordingModel::default(),
            TextSplitter::new(60, 0),
            top_k,
        )
    }

    fn document(source: &str, content: &str) -> Document {
        Document {
            content: content.to_string(),
            source: source.to_string(),
            file_path: source.to_string(),
            mime_type: "application/pdf".to_string(),
            document_hash: crate::document::content_hash(content),
        }
    }

    fn chunk(source: &str, index: usize, text: &str) -> TextChunk {
        TextChunk {
            text: text.to_string(),
            source: source.to_string(),
            file_path: source.to_string(),
            chunk_index: index,
            total_chunks: 3,
            document_hash: "h".to_string(),
        }
    }

    const CS101: &str = "The final exam counts for 40 percent of the grade.\n\n\
                         Lab reports are due every Friday.\n\n\
                         Office hours are Tuesday afternoons.";

    #[tokio::test]
    async fn test_blank_question_skips_retrieval() {
        let engine = engine(2);
        let answer = engine.answer_question("   ").await.unwrap();
        assert_eq!(answer.answer, EMPTY_QUESTION_ANSWER);
        assert!(answer.sources.is_empty());
        assert!(engine.llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_documents_gives_fallback_without_llm_call() {
        let engine = engine(2);
        let answer = engine.answer_question("When is the exam?").await.unwrap();
        assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
        assert!(engine.llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_then_answer() {
        let engine = engine(1);
        let outcome = engine
            .ingest_document(&document("cs101.pdf", CS101))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Indexed { chunks: 3 });

        let answer = engine
            .answer_question("How much is the exam worth for my grade?")
            .await
            .unwrap();
        assert_eq!(answer.answer, "The final exam is worth 40%.");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].filename, "cs101.pdf");
        assert_eq!(answer.sources[0].chunk_index, 0);

        let prompts = engine.llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("[cs101.pdf | chunk 0]\nThe final exam counts"));
        assert!(prompts[0].contains("Question:\nHow much is the exam worth for my grade?"));
        assert!(prompts[0].contains(NO_CONTEXT_ANSWER));
        assert!(!prompts[0].contains("Lab reports"));
    }

    #[tokio::test]
    async fn test_reupload_is_skipped() {
        let engine = engine(2);
        let doc = document("cs101.pdf", CS101);
        engine.ingest_document(&doc).await.unwrap();
        let stored = engine.store().len();

        let renamed = Document {
            source: "copy-of-cs101.pdf".to_string(),
            ..doc
        };
        let outcome = engine.ingest_document(&renamed).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Skipped);
        assert_eq!(engine.store().len(), stored);
    }

    #[tokio::test]
    async fn test_ingest_files_continues_after_failure() {
        let engine = engine(2);
        let mut good = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        write!(good, "{}", CS101).unwrap();
        let missing = std::path::PathBuf::from("/definitely/not/here.pdf");

        let report = engine
            .ingest_files(&[missing, good.path().to_path_buf()])
            .await;

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.indexed(), 1);
        assert_eq!(report.skipped(), 0);
        assert_eq!(report.files[0].file_name, "here.pdf");
    }

    #[tokio::test]
    async fn test_retrieve_diversifies_candidates() {
        let engine = engine(2);
        let content = "exam grade policy for the course is strict\n\n\
                       exam grade policy for the course is strict!\n\n\
                       lab project and late work rules apply here";
        engine
            .ingest_document(&document("mix.pdf", content))
            .await
            .unwrap();

        // Plain top-2 would return both grading chunks
        let chunks = engine.retrieve("exam grade lab").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 2);

        // One batch for ingest, one for the query; candidates reuse stored vectors
        assert_eq!(engine.embedder.calls.load(Ordering::SeqCst), 2);
    }

    /// Embedder that crashes on one particular text
    struct FragileEmbedder;

    impl Embedder for FragileEmbedder {
        fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            if texts.iter().any(|t| t.contains("corrupt")) {
                panic!("tokenizer crashed");
            }
            KeywordEmbedder::default().embed_documents(texts)
        }

        fn dimension(&self) -> u64 {
            VOCABULARY.len() as u64
        }
    }

    #[tokio::test]
    async fn test_ingest_files_survives_embedding_panic() {
        let engine = RagEngine::new(
            MemoryStore::default(),
            FragileEmbedder,
            RecordingModel::default(),
            TextSplitter::new(60, 0),
            2,
        );

        let mut bad = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        write!(bad, "This corrupt syllabus breaks the model").unwrap();
        let mut good = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        write!(good, "{}", CS101).unwrap();

        let report = engine
            .ingest_files(&[bad.path().to_path_buf(), good.path().to_path_buf()])
            .await;

        assert_eq!(report.failed(), 1);
        assert_eq!(report.indexed(), 1);
        assert!(report.files[0].outcome.is_err());
        assert_eq!(engine.store().len(), 3);
    }

    #[test]
    fn test_info_lines_include_settings() {
        let config = AppConfig {
            llm_model: "meta-llama/llama-3-8b-instruct".to_string(),
            ..AppConfig::default()
        };
        let info = CollectionInfo {
            collection_name: "syllabus_documents".to_string(),
            document_count: 12,
            store_url: "http://localhost:6334".to_string(),
        };

        let lines = info_lines(&config, &info);
        assert!(lines.contains(&"  Embeddings: fastembed (all-MiniLM-L6-v2)".to_string()));
        assert!(lines.contains(&"  LLM Provider: openrouter".to_string()));
        assert!(lines.contains(&"  LLM Model: meta-llama/llama-3-8b-instruct".to_string()));
        assert!(lines.contains(&"Documents in database: 12".to_string()));
    }

    #[test]
    fn test_format_context() {
        let chunks = vec![chunk("a.pdf", 0, "Intro"), chunk("b.pdf", 2, "Grading")];
        assert_eq!(
            format_context(&chunks),
            "[a.pdf | chunk 0]\nIntro\n\n---\n\n[b.pdf | chunk 2]\nGrading"
        );
    }

    #[test]
    fn test_extract_sources_deduplicates_by_file() {
        let chunks = vec![
            chunk("a.pdf", 4, "first"),
            chunk("b.pdf", 1, "second"),
            chunk("a.pdf", 7, "third"),
        ];
        let sources = extract_sources(&chunks);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].filename, "a.pdf");
        assert_eq!(sources[0].chunk_index, 4);
        assert_eq!(sources[0].preview, "first");
        assert_eq!(sources[1].filename, "b.pdf");
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "x".repeat(PREVIEW_CHARS + 5);
        let preview = preview(&long);
        assert_eq!(preview.len(), PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
        assert_eq!(super::preview("short"), "short");
    }

    #[test]
    fn test_ingest_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(IngestOutcome::Indexed { chunks: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "indexed", "chunks": 4 }));
    }
}
