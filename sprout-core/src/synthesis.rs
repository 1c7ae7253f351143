//! Report synthesis: merges per-domain sections into one gap-aware answer.
//!
//! The output depends only on the section map and the missing set, never on
//! the order in which parallel tasks finished.

use crate::config::{SynthesisConfig, SynthesisStrategy};
use crate::invoker::SpecialistInvoker;
use crate::registry::SpecialistRegistry;
use crate::text::{normalize, sentences, truncate_chars};
use crate::trace::{RoutingTrace, TraceEventKind};
use crate::types::{AgentResponse, CollaborativeReport, Context};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct ReportSynthesizer {
    registry: Arc<SpecialistRegistry>,
    invoker: Arc<dyn SpecialistInvoker>,
    config: SynthesisConfig,
    per_call_timeout: Duration,
}

impl ReportSynthesizer {
    pub fn new(
        registry: Arc<SpecialistRegistry>,
        invoker: Arc<dyn SpecialistInvoker>,
        config: SynthesisConfig,
        per_call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            invoker,
            config,
            per_call_timeout,
        }
    }

    /// Build the collaborative report with the configured strategy.
    pub async fn synthesize(
        &self,
        query: &str,
        sections: BTreeMap<String, AgentResponse>,
        missing: BTreeSet<String>,
        context: &Context,
        trace: &mut RoutingTrace,
    ) -> CollaborativeReport {
        let synthesized_text = match self.config.strategy {
            SynthesisStrategy::Template => self.render_template(&sections, &missing),
            SynthesisStrategy::Chairman => {
                match self.chairman(query, &sections, context).await {
                    Ok(merged) => {
                        let mut text = merged;
                        let gaps = self.missing_lines(&missing);
                        if !gaps.is_empty() {
                            text.push_str("\n\n");
                            text.push_str(&gaps.join("\n"));
                        }
                        text
                    }
                    Err(reason) => {
                        trace.record(TraceEventKind::SynthesisFallback { reason });
                        self.render_template(&sections, &missing)
                    }
                }
            }
        };

        trace.record(TraceEventKind::SynthesisCompleted {
            sections: sections.keys().cloned().collect(),
            missing: missing.iter().cloned().collect(),
        });

        CollaborativeReport {
            per_domain_sections: sections,
            missing_domains: missing,
            synthesized_text,
        }
    }

    /// Deterministic report text.
    pub fn render_template(
        &self,
        sections: &BTreeMap<String, AgentResponse>,
        missing: &BTreeSet<String>,
    ) -> String {
        let ordered = self.by_priority(sections.keys());
        let header = match ordered.as_slice() {
            [only] => self
                .config
                .single_header_template
                .replace("{name}", self.registry.display_name(only)),
            _ => self
                .config
                .header_template
                .replace("{count}", &ordered.len().to_string()),
        };
        let mut blocks = vec![header];

        for id in &ordered {
            let summary = self.summarize(&sections[*id].text);
            blocks.push(format!("[{}]\n{}", self.registry.display_name(id), summary));
        }

        let mut notes: Vec<String> = self
            .conflicts(&ordered, sections)
            .into_iter()
            .map(|(higher, lower)| {
                self.config
                    .conflict_template
                    .replace("{higher}", self.registry.display_name(higher))
                    .replace("{lower}", self.registry.display_name(lower))
            })
            .collect();
        notes.extend(self.missing_lines(missing));
        if !notes.is_empty() {
            blocks.push(notes.join("\n"));
        }

        blocks.join("\n\n")
    }

    /// Ids ordered by registry priority desc, then id asc.
    fn by_priority<'a>(&self, ids: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
        let mut ordered: Vec<&str> = ids.map(String::as_str).collect();
        ordered.sort_by_key(|id| (Reverse(self.registry.priority(id)), *id));
        ordered
    }

    /// First sentences of a section, capped in length.
    fn summarize(&self, text: &str) -> String {
        let kept: Vec<&str> = sentences(text)
            .into_iter()
            .take(self.config.summary_sentences.max(1))
            .collect();
        truncate_chars(&kept.join(" "), self.config.max_section_chars)
    }

    /// Section pairs giving opposing advice, as `(higher, lower)` priority.
    fn conflicts<'a>(
        &self,
        ordered: &[&'a str],
        sections: &BTreeMap<String, AgentResponse>,
    ) -> Vec<(&'a str, &'a str)> {
        let texts: Vec<String> = ordered
            .iter()
            .map(|id| normalize(&sections[*id].text))
            .collect();
        let pairs: Vec<(String, String)> = self
            .config
            .conflict_pairs
            .iter()
            .map(|(a, b)| (normalize(a), normalize(b)))
            .collect();

        let mut found = Vec::new();
        for i in 0..ordered.len() {
            for j in (i + 1)..ordered.len() {
                let opposed = pairs.iter().any(|(a, b)| {
                    (texts[i].contains(a.as_str()) && texts[j].contains(b.as_str()))
                        || (texts[i].contains(b.as_str()) && texts[j].contains(a.as_str()))
                });
                if opposed {
                    found.push((ordered[i], ordered[j]));
                }
            }
        }
        found
    }

    fn missing_lines(&self, missing: &BTreeSet<String>) -> Vec<String> {
        self.by_priority(missing.iter())
            .into_iter()
            .map(|id| {
                self.config
                    .missing_template
                    .replace("{name}", self.registry.display_name(id))
            })
            .collect()
    }

    /// Ask the generalist to merge the sections.
    async fn chairman(
        &self,
        query: &str,
        sections: &BTreeMap<String, AgentResponse>,
        context: &Context,
    ) -> Result<String, String> {
        let chair = self.registry.generalist_profile();
        let mut prompt = String::new();
        if !chair.prompt_preamble.trim().is_empty() {
            prompt.push_str(chair.prompt_preamble.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!(
            "Several specialists answered this question from a parent:\n\"{query}\"\n\n"
        ));
        for id in self.by_priority(sections.keys()) {
            prompt.push_str(&format!(
                "[{}]\n{}\n\n",
                self.registry.display_name(id),
                sections[id].text.trim()
            ));
        }
        prompt.push_str(
            "Merge these into one answer. Where advice conflicts, follow the specialist listed first.",
        );

        debug!(chair = chair.id.as_str(), sections = sections.len(), "Chairman synthesis");
        let merged = tokio::time::timeout(
            self.per_call_timeout,
            self.invoker.invoke(&chair.id, &prompt, context),
        )
        .await
        .map_err(|_| "chairman timed out".to_string())?
        .map_err(|e| e.to_string())?;

        let merged = merged.trim();
        if merged.is_empty() {
            Err("chairman returned no text".to_string())
        } else {
            Ok(merged.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokeError;
    use crate::invoker::MockInvoker;
    use crate::trace::MemorySink;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn section(id: &str, text: &str) -> (String, AgentResponse) {
        (
            id.to_string(),
            AgentResponse {
                specialist_id: id.to_string(),
                text: text.to_string(),
                validated: true,
                attempt: 0,
                degraded: false,
                latency_ms: 1,
            },
        )
    }

    fn synthesizer(mock: MockInvoker, config: SynthesisConfig) -> ReportSynthesizer {
        ReportSynthesizer::new(
            Arc::new(SpecialistRegistry::builtin().unwrap()),
            Arc::new(mock),
            config,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_template_orders_by_priority_and_names_gaps() {
        let synth = synthesizer(MockInvoker::new(), SynthesisConfig::default());
        let sections = BTreeMap::from([
            section("sleep", "Keep bedtime consistent. Dim the lights. Avoid screens."),
            section("health", "A mild cough is common."),
        ]);
        let missing = BTreeSet::from(["play".to_string()]);
        let text = synth.render_template(&sections, &missing);
        assert_eq!(
            text,
            "Combined advice from 2 specialists:\n\n\
             [Health]\nA mild cough is common.\n\n\
             [Sleep]\nKeep bedtime consistent. Dim the lights.\n\n\
             The Play specialist's analysis could not be completed."
        );
    }

    #[test]
    fn test_template_independent_of_insertion_order() {
        let synth = synthesizer(MockInvoker::new(), SynthesisConfig::default());
        let a = BTreeMap::from([section("sleep", "s."), section("nutrition", "n.")]);
        let mut b = BTreeMap::new();
        b.extend([section("nutrition", "n.")]);
        b.extend([section("sleep", "s.")]);
        let none = BTreeSet::new();
        assert_eq!(synth.render_template(&a, &none), synth.render_template(&b, &none));
    }

    #[test]
    fn test_conflict_resolved_by_priority() {
        let synth = synthesizer(MockInvoker::new(), SynthesisConfig::default());
        let sections = BTreeMap::from([
            section("play", "It's fine to wait and see for a day."),
            section("health", "Please see a doctor today."),
        ]);
        let text = synth.render_template(&sections, &BTreeSet::new());
        assert!(
            text.contains("Where the Play and Health advice differ, follow the Health specialist.")
        );
    }

    #[test]
    fn test_section_truncation() {
        let config = SynthesisConfig {
            max_section_chars: 5,
            ..SynthesisConfig::default()
        };
        let synth = synthesizer(MockInvoker::new(), config);
        let sections = BTreeMap::from([section("sleep", "abcdefghij")]);
        let text = synth.render_template(&sections, &BTreeSet::new());
        assert!(text.contains("[Sleep]\nabcde…"));
    }

    #[tokio::test]
    async fn test_chairman_merges_and_keeps_gaps() {
        let mock = MockInvoker::new().with_reply("coordinator", "Merged answer.");
        let config = SynthesisConfig {
            strategy: SynthesisStrategy::Chairman,
            ..SynthesisConfig::default()
        };
        let synth = synthesizer(mock, config);
        let mut trace = RoutingTrace::new(Uuid::new_v4(), Arc::new(MemorySink::new()));
        let report = synth
            .synthesize(
                "q",
                BTreeMap::from([section("sleep", "s."), section("nutrition", "n.")]),
                BTreeSet::from(["play".to_string()]),
                &Context::new(),
                &mut trace,
            )
            .await;
        assert_eq!(
            report.synthesized_text,
            "Merged answer.\n\nThe Play specialist's analysis could not be completed."
        );
        assert_eq!(report.per_domain_sections.len(), 2);
    }

    #[tokio::test]
    async fn test_chairman_failure_falls_back_to_template() {
        let mock = MockInvoker::new().with_failure(
            "coordinator",
            InvokeError::Remote {
                specialist: "coordinator".into(),
                message: "down".into(),
            },
        );
        let config = SynthesisConfig {
            strategy: SynthesisStrategy::Chairman,
            ..SynthesisConfig::default()
        };
        let synth = synthesizer(mock, config);
        let mut trace = RoutingTrace::new(Uuid::new_v4(), Arc::new(MemorySink::new()));
        let report = synth
            .synthesize(
                "q",
                BTreeMap::from([section("sleep", "s.")]),
                BTreeSet::new(),
                &Context::new(),
                &mut trace,
            )
            .await;
        assert_eq!(report.synthesized_text, "Advice from the Sleep specialist:\n\n[Sleep]\ns.");
        assert!(
            trace
                .events()
                .iter()
                .any(|e| matches!(e.kind, TraceEventKind::SynthesisFallback { .. }))
        );
    }
}
