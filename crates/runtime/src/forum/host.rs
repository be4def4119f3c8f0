//! Forum moderator
//!
//! Synthesizes one moderator speech from a batch of buffered agent
//! utterances. Only one synthesis may run at a time; the tailer checks
//! [`ForumHost::try_begin`] before handing over a batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::LazyLock;

use chrono::Local;
use regex::Regex;

use crate::llm::Completion;
use crate::prompts;
use crate::types::LlmRole;

static SPEECH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{2}:\d{2}:\d{2})\]\s*\[(\w+)\]\s*(.+)$").expect("valid regex")
});

/// One agent utterance parsed back out of its buffered log-line form.
#[derive(Debug, Clone)]
struct AgentSpeech {
    timestamp: String,
    speaker: String,
    content: String,
}

/// LLM-driven forum moderator.
pub struct ForumHost {
    llm: Arc<dyn Completion>,
    is_generating: AtomicBool,
}

impl ForumHost {
    pub fn new(llm: Arc<dyn Completion>) -> Self {
        Self {
            llm,
            is_generating: AtomicBool::new(false),
        }
    }

    /// Claim the synthesis slot. Returns false when a synthesis is already
    /// in flight; the caller must call [`ForumHost::end`] after a successful
    /// claim.
    pub fn try_begin(&self) -> bool {
        self.is_generating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end(&self) {
        self.is_generating.store(false, Ordering::SeqCst);
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating.load(Ordering::SeqCst)
    }

    /// Generate one moderator speech from buffered utterance lines.
    ///
    /// Returns `None` when no agent speech could be parsed or the completion
    /// failed; the caller keeps the batch buffered in that case. The
    /// gateway's `complete` already carries the strict LLM retry profile, so
    /// no extra retry layer is stacked here.
    pub async fn generate_speech(&self, buffered_lines: &[String]) -> Option<String> {
        let speeches = parse_agent_speeches(buffered_lines);
        if speeches.is_empty() {
            tracing::info!("No valid agent speeches found in buffer");
            return None;
        }

        let user_prompt = build_user_prompt(&speeches);
        self.llm
            .complete(LlmRole::ForumHost, prompts::FORUM_HOST, &user_prompt)
            .await
            .ok()
            .map(|speech| format_speech(&speech))
    }
}

fn parse_agent_speeches(lines: &[String]) -> Vec<AgentSpeech> {
    lines
        .iter()
        .filter_map(|line| {
            let caps = SPEECH_RE.captures(line.trim())?;
            let speaker = caps[2].to_string();
            if !matches!(speaker.as_str(), "INSIGHT" | "MEDIA" | "QUERY") {
                return None;
            }
            Some(AgentSpeech {
                timestamp: caps[1].to_string(),
                speaker,
                content: caps[3].replace("\\n", "\n"),
            })
        })
        .collect()
}

fn build_user_prompt(speeches: &[AgentSpeech]) -> String {
    let speeches_text = speeches
        .iter()
        .map(|s| format!("[{}] {}:\n{}", s.timestamp, s.speaker, s.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let now = Local::now().format("%Y-%m-%d %H:%M");
    format!(
        "Today's actual time is {now}\n\nRecent agent statements:\n{speeches_text}\n\n\
         As forum moderator, analyze the statements above: organize the event timeline, \
         integrate and contrast the agents' viewpoints, assess trend direction and risks, \
         and pose follow-up questions for the next round."
    )
}

/// Collapse excess blank lines and strip wrapping quotes.
fn format_speech(speech: &str) -> String {
    let mut cleaned = String::with_capacity(speech.len());
    let mut blank_run = 0;
    for line in speech.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        cleaned.push_str(line);
        cleaned.push('\n');
    }
    cleaned
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LlmError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingLlm {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Completion for CountingLlm {
        async fn complete(
            &self,
            _role: LlmRole,
            _system: &str,
            user: &str,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(user.contains("Recent agent statements"));
            Ok("Timeline: events unfolded.\n\n\n\nQuestions: what next?".to_string())
        }
    }

    struct FailingLlm {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Completion for FailingLlm {
        async fn complete(
            &self,
            _role: LlmRole,
            _system: &str,
            _user: &str,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Api {
                status: 503,
                message: "overloaded".to_string(),
            })
        }
    }

    fn buffered(speaker: &str, content: &str) -> String {
        format!("[12:00:00] [{speaker}] {content}")
    }

    #[tokio::test]
    async fn speech_is_generated_from_agent_lines() {
        let llm = Arc::new(CountingLlm {
            calls: AtomicU32::new(0),
        });
        let host = ForumHost::new(llm.clone());

        let lines = vec![
            buffered("INSIGHT", "database shows a spike"),
            buffered("HOST", "previous speech is skipped"),
            buffered("QUERY", "news confirms the spike"),
        ];
        let speech = host.generate_speech(&lines).await.unwrap();

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        // Triple blank lines collapsed to one
        assert!(speech.contains("Timeline: events unfolded.\n\nQuestions: what next?"));
    }

    #[tokio::test]
    async fn failed_completion_yields_no_speech() {
        let llm = Arc::new(FailingLlm {
            calls: AtomicU32::new(0),
        });
        let host = ForumHost::new(llm.clone());

        let lines = vec![buffered("INSIGHT", "database shows a spike")];
        assert!(host.generate_speech(&lines).await.is_none());
        // One completion attempt; the gateway owns retrying, not the host.
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn host_and_system_lines_alone_produce_nothing() {
        let llm = Arc::new(CountingLlm {
            calls: AtomicU32::new(0),
        });
        let host = ForumHost::new(llm.clone());
        let lines = vec![buffered("HOST", "old"), buffered("SYSTEM", "marker")];
        assert!(host.generate_speech(&lines).await.is_none());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn synthesis_slot_is_exclusive() {
        let llm = Arc::new(CountingLlm {
            calls: AtomicU32::new(0),
        });
        let host = ForumHost::new(llm);
        assert!(host.try_begin());
        assert!(!host.try_begin());
        host.end();
        assert!(host.try_begin());
    }

    #[test]
    fn escaped_newlines_are_restored_for_the_prompt() {
        let speeches = parse_agent_speeches(&[buffered("MEDIA", "coverage\\nintensifies")]);
        assert_eq!(speeches[0].content, "coverage\nintensifies");
    }
}
