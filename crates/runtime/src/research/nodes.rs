//! Research state machine nodes
//!
//! Every node converts infrastructure and parse failures into documented
//! fallbacks; the state machine branches on [`NodeOutcome`] and never sees an
//! error from inside a node.
//!
//! Summary nodes log under the `nodes.summary_node` target and emit their
//! cleaned JSON as `Cleaned output: {...}` lines. The forum tailer recognizes
//! summary output by exactly these markers, so the target name, the
//! `Generating first paragraph summary` / `Generating reflection summary`
//! bodies, and the `Cleaned output:` prefix are load-bearing.

use std::sync::Arc;

use crate::llm::{repair, Completion};
use crate::prompts;
use crate::search::SearchDirective;
use crate::types::{EngineKind, LlmRole};

use super::state::Paragraph;

/// Result shape for node runs: either a clean value or a documented default.
#[derive(Debug, Clone)]
pub enum NodeOutcome<T> {
    Ok(T),
    Fallback { value: T, reason: String },
}

impl<T> NodeOutcome<T> {
    pub fn into_value(self) -> T {
        match self {
            NodeOutcome::Ok(value) => value,
            NodeOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            NodeOutcome::Ok(_) => None,
            NodeOutcome::Fallback { reason, .. } => Some(reason),
        }
    }
}

/// Plans the ordered paragraph structure for a report.
pub struct ReportStructureNode {
    llm: Arc<dyn Completion>,
    role: LlmRole,
}

impl ReportStructureNode {
    pub fn new(llm: Arc<dyn Completion>, engine: EngineKind) -> Self {
        Self {
            llm,
            role: LlmRole::for_engine(engine),
        }
    }

    pub async fn run(&self, query: &str) -> NodeOutcome<Vec<Paragraph>> {
        let fallback = |reason: String| NodeOutcome::Fallback {
            value: vec![Paragraph::new(
                query.to_string(),
                "Overview of the topic and its current development",
            )],
            reason,
        };

        let user = serde_json::json!({ "query": query }).to_string();
        let raw = match self
            .llm
            .complete(self.role, prompts::REPORT_STRUCTURE, &user)
            .await
        {
            Ok(raw) => raw,
            Err(e) => return fallback(format!("completion failed: {e}")),
        };

        let Some(value) = repair::extract_json(&raw) else {
            return fallback("parsing failed".to_string());
        };

        let paragraphs: Vec<Paragraph> = value
            .get("paragraphs")
            .and_then(|p| p.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let title = item.get("title")?.as_str()?;
                        let content = item
                            .get("content")
                            .and_then(|c| c.as_str())
                            .unwrap_or_default();
                        Some(Paragraph::new(title, content))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if paragraphs.is_empty() {
            return fallback("planner returned no paragraphs".to_string());
        }
        NodeOutcome::Ok(paragraphs)
    }
}

/// Produces the first search directive for a paragraph.
pub struct FirstSearchNode {
    llm: Arc<dyn Completion>,
    engine: EngineKind,
}

impl FirstSearchNode {
    pub fn new(llm: Arc<dyn Completion>, engine: EngineKind) -> Self {
        Self { llm, engine }
    }

    pub async fn run(&self, paragraph: &Paragraph) -> NodeOutcome<SearchDirective> {
        let user = serde_json::json!({
            "title": paragraph.title,
            "content": paragraph.expected_content,
        })
        .to_string();

        let system = prompts::first_search(self.engine);
        directive_from_completion(
            self.llm.as_ref(),
            LlmRole::for_engine(self.engine),
            self.engine,
            &system,
            &user,
        )
        .await
    }
}

/// Produces a gap-targeted follow-up search directive.
pub struct ReflectionNode {
    llm: Arc<dyn Completion>,
    engine: EngineKind,
}

impl ReflectionNode {
    pub fn new(llm: Arc<dyn Completion>, engine: EngineKind) -> Self {
        Self { llm, engine }
    }

    pub async fn run(&self, paragraph: &Paragraph) -> NodeOutcome<SearchDirective> {
        let user = format!(
            "Available search tools:\n{}\n\n{}",
            prompts::tool_catalog(self.engine),
            serde_json::json!({
                "title": paragraph.title,
                "content": paragraph.expected_content,
                "paragraph_latest_state": paragraph.research.latest_summary,
            })
        );

        directive_from_completion(
            self.llm.as_ref(),
            LlmRole::for_engine(self.engine),
            self.engine,
            prompts::REFLECTION,
            &user,
        )
        .await
    }
}

async fn directive_from_completion(
    llm: &dyn Completion,
    role: LlmRole,
    engine: EngineKind,
    system: &str,
    user: &str,
) -> NodeOutcome<SearchDirective> {
    let fallback = |reason: String| NodeOutcome::Fallback {
        value: SearchDirective {
            search_query: "Related topic research".to_string(),
            search_tool: crate::search::SearchTool::generic_for(engine)
                .name()
                .to_string(),
            reasoning: reason.clone(),
            ..Default::default()
        },
        reason,
    };

    let raw = match llm.complete(role, system, user).await {
        Ok(raw) => raw,
        Err(e) => return fallback(format!("completion failed: {e}")),
    };

    let Some(value) = repair::extract_json(&raw) else {
        return fallback("parsing failed".to_string());
    };

    match serde_json::from_value::<SearchDirective>(value) {
        Ok(directive) if !directive.search_query.trim().is_empty() => NodeOutcome::Ok(directive),
        Ok(_) => fallback("empty search query".to_string()),
        Err(_) => fallback("parsing failed".to_string()),
    }
}

/// Input for the summary nodes.
pub struct SummaryInput<'a> {
    pub paragraph: &'a Paragraph,
    pub search_query: &'a str,
    pub formatted_results: &'a [String],
    /// Most recent moderator speech, prepended as a reference section.
    pub host_speech: Option<&'a str>,
}

fn summary_message(input: &SummaryInput<'_>, with_prior_state: bool) -> String {
    let mut payload = serde_json::json!({
        "title": input.paragraph.title,
        "content": input.paragraph.expected_content,
        "search_query": input.search_query,
        "search_results": input.formatted_results,
    });
    if with_prior_state {
        payload["paragraph_latest_state"] =
            input.paragraph.research.latest_summary.clone().into();
    }

    match input.host_speech {
        Some(speech) if !speech.is_empty() => format!(
            "### Latest Moderator Summary\nThe forum moderator's most recent guidance on the \
             ongoing discussion. Take its insights and suggestions into account:\n\n{speech}\n\n---\n{payload}"
        ),
        _ => payload.to_string(),
    }
}

/// Writes the first narrative state of a paragraph.
pub struct FirstSummaryNode {
    llm: Arc<dyn Completion>,
    role: LlmRole,
}

impl FirstSummaryNode {
    pub fn new(llm: Arc<dyn Completion>, engine: EngineKind) -> Self {
        Self {
            llm,
            role: LlmRole::for_engine(engine),
        }
    }

    pub async fn run(&self, input: &SummaryInput<'_>) -> NodeOutcome<String> {
        let message = summary_message(input, false);

        tracing::info!(
            target: "nodes.summary_node",
            "Generating first paragraph summary"
        );

        let raw = match self.llm.complete(self.role, prompts::FIRST_SUMMARY, &message).await {
            Ok(raw) => raw,
            Err(e) => {
                return NodeOutcome::Fallback {
                    value: "Paragraph summary generation failed".to_string(),
                    reason: format!("completion failed: {e}"),
                }
            }
        };

        let cleaned = repair::strip_code_fences(&raw);
        let cleaned = repair::remove_reasoning_preamble(&cleaned).to_string();

        tracing::info!(target: "nodes.summary_node", "Cleaned output: {}", cleaned);

        let outcome = match repair::repair_json(&cleaned) {
            Some(value) => match value.get("paragraph_latest_state").and_then(|v| v.as_str()) {
                Some(text) if !text.is_empty() => NodeOutcome::Ok(text.to_string()),
                _ => NodeOutcome::Fallback {
                    value: cleaned.clone(),
                    reason: "expected field missing".to_string(),
                },
            },
            None => NodeOutcome::Fallback {
                value: cleaned.clone(),
                reason: "parsing failed".to_string(),
            },
        };

        tracing::info!(
            target: "nodes.summary_node",
            "Successfully generated first paragraph summary"
        );
        outcome
    }
}

/// Additively integrates reflection search results into a paragraph.
pub struct ReflectionSummaryNode {
    llm: Arc<dyn Completion>,
    role: LlmRole,
}

impl ReflectionSummaryNode {
    pub fn new(llm: Arc<dyn Completion>, engine: EngineKind) -> Self {
        Self {
            llm,
            role: LlmRole::for_engine(engine),
        }
    }

    pub async fn run(&self, input: &SummaryInput<'_>) -> NodeOutcome<String> {
        let message = summary_message(input, true);

        tracing::info!(
            target: "nodes.summary_node",
            "Generating reflection summary"
        );

        let raw = match self
            .llm
            .complete(self.role, prompts::REFLECTION_SUMMARY, &message)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                // Keep the prior state: a failed refinement must not lose
                // already-gathered facts.
                return NodeOutcome::Fallback {
                    value: input.paragraph.research.latest_summary.clone(),
                    reason: format!("completion failed: {e}"),
                };
            }
        };

        let cleaned = repair::strip_code_fences(&raw);
        let cleaned = repair::remove_reasoning_preamble(&cleaned).to_string();

        tracing::info!(target: "nodes.summary_node", "Cleaned output: {}", cleaned);

        let outcome = match repair::repair_json(&cleaned) {
            Some(value) => match value
                .get("updated_paragraph_latest_state")
                .and_then(|v| v.as_str())
            {
                Some(text) if !text.is_empty() => NodeOutcome::Ok(text.to_string()),
                _ => NodeOutcome::Fallback {
                    value: cleaned.clone(),
                    reason: "expected field missing".to_string(),
                },
            },
            None => NodeOutcome::Fallback {
                value: cleaned.clone(),
                reason: "parsing failed".to_string(),
            },
        };

        tracing::info!(
            target: "nodes.summary_node",
            "Successfully generated reflection summary"
        );
        outcome
    }
}

/// Composes finalized paragraphs into a Markdown document.
pub struct ReportFormattingNode {
    llm: Arc<dyn Completion>,
    role: LlmRole,
}

impl ReportFormattingNode {
    pub fn new(llm: Arc<dyn Completion>, engine: EngineKind) -> Self {
        Self {
            llm,
            role: LlmRole::for_engine(engine),
        }
    }

    pub async fn run(&self, title: &str, paragraphs: &[(String, String)]) -> NodeOutcome<String> {
        let user = serde_json::json!({
            "report_title": title,
            "paragraphs": paragraphs
                .iter()
                .map(|(t, body)| serde_json::json!({ "title": t, "paragraph_latest_state": body }))
                .collect::<Vec<_>>(),
        })
        .to_string();

        match self
            .llm
            .complete(self.role, prompts::REPORT_FORMATTING, &user)
            .await
        {
            Ok(raw) => {
                let text = repair::extract_text(&raw);
                if text.is_empty() {
                    NodeOutcome::Fallback {
                        value: Self::format_manually(title, paragraphs),
                        reason: "empty formatting output".to_string(),
                    }
                } else {
                    NodeOutcome::Ok(text)
                }
            }
            Err(e) => NodeOutcome::Fallback {
                value: Self::format_manually(title, paragraphs),
                reason: format!("completion failed: {e}"),
            },
        }
    }

    /// Concatenate titles and bodies with horizontal rules.
    pub fn format_manually(title: &str, paragraphs: &[(String, String)]) -> String {
        let mut out = format!("# {title}\n");
        for (heading, body) in paragraphs {
            out.push_str("\n---\n\n");
            out.push_str(&format!("## {heading}\n\n{body}\n"));
        }
        out
    }
}
