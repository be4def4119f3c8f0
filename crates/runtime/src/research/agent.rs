//! Research driver: plans a report, then researches paragraph by paragraph

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;

use crate::forum;
use crate::llm::Completion;
use crate::retry::{retry_graceful, RetryConfig};
use crate::search::{resolve_tool, SearchDirective, SearchProvider, SearchTool};
use crate::types::{sanitize_query_for_filename, EngineKind, RuntimeError, SearchResult};

use super::nodes::{
    FirstSearchNode, FirstSummaryNode, NodeOutcome, ReflectionNode, ReflectionSummaryNode,
    ReportFormattingNode, ReportStructureNode, SummaryInput,
};
use super::state::{ReportState, ReportStatus};

/// Limit applied to every search's result list before it reaches a prompt.
const MAX_RESULTS_PER_SEARCH: usize = 10;

#[derive(Debug, Clone)]
pub struct ResearchAgentConfig {
    pub engine: EngineKind,
    pub max_paragraphs: usize,
    pub max_reflections: u32,
    /// Maximum characters of one search result fed into a prompt.
    pub max_content_length: usize,
    /// Directory finished markdown reports are written to.
    pub output_dir: PathBuf,
    /// Directory holding the shared forum log (for moderator guidance).
    pub log_dir: PathBuf,
}

impl ResearchAgentConfig {
    pub fn for_engine(engine: EngineKind, settings: &crate::config::Settings) -> Self {
        Self {
            engine,
            max_paragraphs: settings.max_paragraphs() as usize,
            max_reflections: settings.max_reflections(),
            max_content_length: settings.max_content_length(),
            output_dir: PathBuf::from(engine.reports_dir()),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Drives one [`ReportState`] from pending to completed.
pub struct ResearchAgent {
    config: ResearchAgentConfig,
    search: Arc<dyn SearchProvider>,
    structure_node: ReportStructureNode,
    first_search_node: FirstSearchNode,
    reflection_node: ReflectionNode,
    first_summary_node: FirstSummaryNode,
    reflection_summary_node: ReflectionSummaryNode,
    formatting_node: ReportFormattingNode,
    search_retry: RetryConfig,
}

impl ResearchAgent {
    pub fn new(
        config: ResearchAgentConfig,
        llm: Arc<dyn Completion>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        let engine = config.engine;
        Self {
            config,
            search,
            structure_node: ReportStructureNode::new(llm.clone(), engine),
            first_search_node: FirstSearchNode::new(llm.clone(), engine),
            reflection_node: ReflectionNode::new(llm.clone(), engine),
            first_summary_node: FirstSummaryNode::new(llm.clone(), engine),
            reflection_summary_node: ReflectionSummaryNode::new(llm.clone(), engine),
            formatting_node: ReportFormattingNode::new(llm, engine),
            search_retry: RetryConfig::search_api(),
        }
    }

    pub fn engine(&self) -> EngineKind {
        self.config.engine
    }

    /// Execute a full research run and persist the report.
    ///
    /// Search and LLM failures degrade to documented defaults inside the
    /// nodes; only report persistence can fail the run.
    pub async fn research(&self, query: &str) -> Result<ReportState, RuntimeError> {
        tracing::info!("Starting deep research: {}", query);

        let mut state = ReportState::new(query);
        state.status = ReportStatus::Planning;

        // Step 1: plan the report structure.
        let outcome = self.structure_node.run(query).await;
        if let Some(reason) = outcome.fallback_reason() {
            tracing::warn!("Report structure fell back to default: {}", reason);
        }
        state.set_structure(outcome.into_value(), self.config.max_paragraphs);
        tracing::info!(
            "Report structure generated with {} paragraphs",
            state.paragraphs.len()
        );

        // Step 2: research each paragraph.
        let total = state.paragraphs.len();
        for index in 0..total {
            tracing::info!(
                "Processing paragraph {}/{}: {}",
                index + 1,
                total,
                state.paragraphs[index].title
            );
            self.initial_search_and_summary(&mut state, index).await;
            self.reflection_loop(&mut state, index).await;
            state.paragraphs[index].is_completed = true;
            state.touch();
            tracing::info!(
                "Paragraph completed ({:.1}%)",
                (index + 1) as f64 / total as f64 * 100.0
            );
        }

        // Step 3: final report.
        let report_data: Vec<(String, String)> = state
            .paragraphs
            .iter()
            .map(|p| (p.title.clone(), p.research.latest_summary.clone()))
            .collect();
        let formatted = self
            .formatting_node
            .run(&state.report_title, &report_data)
            .await;
        if let Some(reason) = formatted.fallback_reason() {
            tracing::warn!("Report formatting used manual fallback: {}", reason);
        }
        state.final_report = formatted.into_value();
        state.mark_completed();

        // Step 4: persist. This is the only fatal path.
        self.save_report(&state)?;

        tracing::info!("Deep research completed: {}", query);
        Ok(state)
    }

    async fn initial_search_and_summary(&self, state: &mut ReportState, index: usize) {
        let directive = {
            let paragraph = &state.paragraphs[index];
            let outcome = self.first_search_node.run(paragraph).await;
            if let Some(reason) = outcome.fallback_reason() {
                tracing::warn!("First search fell back to default: {}", reason);
            }
            outcome.into_value()
        };

        tracing::info!(
            "Search query: {} (tool: {})",
            directive.search_query,
            directive.search_tool
        );

        let results = self.run_search(&directive).await;
        state.paragraphs[index]
            .research
            .add_search_results(&directive.search_query, results.clone());

        let formatted = self.format_results_for_prompt(&results);
        let host_speech = forum::latest_host_speech(&self.config.log_dir);

        let summary = {
            let paragraph = &state.paragraphs[index];
            let input = SummaryInput {
                paragraph,
                search_query: &directive.search_query,
                formatted_results: &formatted,
                host_speech: host_speech.as_deref(),
            };
            self.first_summary_node.run(&input).await.into_value()
        };
        state.paragraphs[index].research.latest_summary = summary;
        state.touch();
    }

    async fn reflection_loop(&self, state: &mut ReportState, index: usize) {
        for round in 0..self.config.max_reflections {
            tracing::info!("Reflection {}/{}", round + 1, self.config.max_reflections);

            let directive = {
                let paragraph = &state.paragraphs[index];
                let outcome = self.reflection_node.run(paragraph).await;
                if let Some(reason) = outcome.fallback_reason() {
                    tracing::warn!("Reflection search fell back to default: {}", reason);
                }
                outcome.into_value()
            };

            let results = self.run_search(&directive).await;
            state.paragraphs[index]
                .research
                .add_search_results(&directive.search_query, results.clone());

            let formatted = self.format_results_for_prompt(&results);
            let host_speech = forum::latest_host_speech(&self.config.log_dir);

            let updated = {
                let paragraph = &state.paragraphs[index];
                let input = SummaryInput {
                    paragraph,
                    search_query: &directive.search_query,
                    formatted_results: &formatted,
                    host_speech: host_speech.as_deref(),
                };
                self.reflection_summary_node.run(&input).await.into_value()
            };

            let research = &mut state.paragraphs[index].research;
            research.latest_summary = updated;
            research.reflection_count = (research.reflection_count + 1).min(self.config.max_reflections);
            state.touch();
        }
    }

    /// Resolve the directive against the engine's tool set and execute it
    /// under the graceful search retry profile (failures yield no results).
    async fn run_search(&self, directive: &SearchDirective) -> Vec<SearchResult> {
        let (tool, fallback_reason) = resolve_tool(self.config.engine, directive);
        if let Some(reason) = fallback_reason {
            tracing::warn!(
                "Falling back to {} for tool '{}': {}",
                tool.name(),
                directive.search_tool,
                reason
            );
        }

        let results = self.execute_search(&tool, &directive.search_query).await;
        if results.is_empty() {
            tracing::info!("No search results found");
        } else {
            tracing::info!("Found {} search results", results.len());
        }
        results
    }

    async fn execute_search(&self, tool: &SearchTool, query: &str) -> Vec<SearchResult> {
        let mut results = retry_graceful(
            &self.search_retry,
            "search",
            Vec::new(),
            crate::types::SearchError::is_retryable,
            || self.search.search(tool, query),
        )
        .await;
        results.truncate(MAX_RESULTS_PER_SEARCH);
        results
    }

    fn format_results_for_prompt(&self, results: &[SearchResult]) -> Vec<String> {
        results
            .iter()
            .filter(|r| !r.content.is_empty())
            .map(|r| truncate_content(&r.content, self.config.max_content_length))
            .collect()
    }

    fn save_report(&self, state: &ReportState) -> Result<(), RuntimeError> {
        std::fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| RuntimeError::Internal(format!("failed to create report dir: {e}")))?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let query_safe = sanitize_query_for_filename(&state.query);
        let filename = format!("deep_search_report_{query_safe}_{timestamp}.md");
        let path = self.config.output_dir.join(filename);

        std::fs::write(&path, &state.final_report)
            .map_err(|e| RuntimeError::Internal(format!("failed to save report: {e}")))?;
        tracing::info!("Report saved to: {}", path.display());
        Ok(())
    }
}

/// Truncate at a word boundary when one falls reasonably close to the limit.
fn truncate_content(content: &str, max_length: usize) -> String {
    if content.chars().count() <= max_length {
        return content.to_string();
    }
    let truncated: String = content.chars().take(max_length).collect();
    match truncated.rfind(' ') {
        Some(pos) if pos * 10 > max_length * 8 => format!("{}...", &truncated[..pos]),
        _ => format!("{truncated}..."),
    }
}
