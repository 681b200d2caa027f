use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, warn};

use pagerag_core::traits::CompletionService;
use pagerag_core::types::{ChatAnswer, Citation, Failure, Outcome, SearchResult};

use crate::retrieval::RetrievalEngine;

/// Pages transcribed into the prompt, at most.
pub const CONTEXT_PAGES: usize = 5;
pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";
pub const NOT_FOUND_PHRASE: &str = "The information could not be found in the documents.";

/// Retrieval plus a completion call grounded on the transcribed top pages.
#[derive(Clone)]
pub struct AnswerComposer {
    retrieval: RetrievalEngine,
    completion: Arc<dyn CompletionService>,
}

struct Context {
    text: String,
    citations: Vec<Citation>,
}

impl AnswerComposer {
    pub fn new(retrieval: RetrievalEngine, completion: Arc<dyn CompletionService>) -> Self {
        Self { retrieval, completion }
    }

    pub async fn chat(&self, text: &str, limit: Option<usize>, use_context: bool) -> Outcome<ChatAnswer> {
        let start = Instant::now();
        let found = match self.retrieval.query(text, limit).await {
            Outcome::Success(found) => found,
            Outcome::Failure(f) => return Outcome::Failure(f),
        };

        let context = if use_context && !found.results.is_empty() {
            self.gather_context(&found.results).await
        } else {
            None
        };
        let prompt = match &context {
            Some(ctx) => grounded_prompt(text, &ctx.text),
            None => fallback_prompt(text),
        };

        match self.completion.generate(&prompt).await {
            Ok(answer) => {
                let (context_used, source_pages) = match context {
                    Some(ctx) => (true, ctx.citations),
                    None => (false, Vec::new()),
                };
                Outcome::Success(ChatAnswer {
                    query: text.to_string(),
                    answer,
                    context_used,
                    source_pages,
                    search_results: found.results,
                    total_time: start.elapsed().as_secs_f64(),
                    search_time: found.search_time,
                })
            }
            Err(e) => {
                warn!(error = %e, "answer generation failed");
                Outcome::Failure(Failure {
                    message: format!("Chat failed: {e}"),
                    search_results: Some(Vec::new()),
                })
            }
        }
    }

    /// Transcribe the top pages. Pages whose artifact is gone, whose
    /// extraction fails, or that hold no text are skipped.
    async fn gather_context(&self, results: &[SearchResult]) -> Option<Context> {
        let mut texts = Vec::new();
        let mut citations = Vec::new();
        for hit in results.iter().take(CONTEXT_PAGES) {
            match self.transcribe(hit).await {
                Ok(Some(text)) => {
                    texts.push(text);
                    citations.push(Citation { page_number: hit.page_number, pdf_name: hit.pdf_name.clone(), score: hit.score });
                }
                Ok(None) => debug!(page = hit.page_number, pdf = %hit.pdf_name, "no text on page"),
                Err(e) => warn!(page = hit.page_number, pdf = %hit.pdf_name, error = %e, "page skipped"),
            }
        }
        if texts.is_empty() {
            return None;
        }
        Some(Context { text: texts.join(CONTEXT_DELIMITER), citations })
    }

    async fn transcribe(&self, hit: &SearchResult) -> Result<Option<String>> {
        let png = match tokio::fs::read(&hit.image_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = self.completion.extract_text(&png).await?;
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}

pub fn grounded_prompt(question: &str, context: &str) -> String {
    format!(
        "The following are excerpts from documents related to the user's question:\n\n\
         {context}\n\n\
         ---\n\n\
         Answer the question below using only the document excerpts above.\n\
         Question: {question}\n\n\
         When answering:\n\
         1. Be accurate and specific, and base the answer on the documents.\n\
         2. If the documents do not contain the information, say \"{NOT_FOUND_PHRASE}\"\n\
         3. Quote or cite the documents where possible.\n"
    )
}

pub fn fallback_prompt(question: &str) -> String {
    format!(
        "Question: {question}\n\n\
         No related documents were found, so answer from general knowledge and say so. \
         Suggest uploading relevant documents for a more accurate answer.\n"
    )
}
