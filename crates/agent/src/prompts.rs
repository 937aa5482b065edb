//! Prompt templates for every LLM call the pipeline makes.
//!
//! Templates are compiled once at startup; a render failure means a missing
//! context key and surfaces as [`PromptError`].

use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

use ragdesk_core::domain::conversation::{ConversationTurn, RatedExchange, Role};
use ragdesk_core::domain::intent::Intent;
use ragdesk_core::domain::knowledge::RetrievedChunk;
use ragdesk_core::domain::memory::RecalledFact;
use ragdesk_core::domain::plan::ActionType;

pub const CLASSIFY: &str = "classify";
pub const RAG_ANSWER: &str = "rag_answer";
pub const VALIDATE: &str = "validate";
pub const PLAN: &str = "plan";
pub const FORMAT_RESPONSE: &str = "format_response";
pub const CONTINUITY: &str = "continuity";
pub const EXTRACT_FACTS: &str = "extract_facts";
pub const ANALYZE_FEEDBACK: &str = "analyze_feedback";

const CLASSIFY_TEMPLATE: &str = r#"Classify the user's message into exactly one intent.

Intents:
{% for label in labels %}- {{ label }}
{% endfor %}
Message: "{{ query }}"

Respond in this exact format:
INTENT: <one intent from the list>
CONFIDENCE: <number between 0.0 and 1.0>"#;

const RAG_ANSWER_TEMPLATE: &str = r#"You are a helpful customer service assistant for this company. Answer the question using only the information in the sources below. If the sources do not contain the answer, say so plainly instead of guessing.

Sources:
{% for source in sources %}[{{ loop.index }}] {{ source }}
{% endfor %}{% if history %}
Conversation so far:
{% for turn in history %}{{ turn.speaker }}: {{ turn.content }}
{% endfor %}{% endif %}{% if facts %}
Known about this user:
{% for fact in facts %}- ({{ fact.category }}) {{ fact.text }}
{% endfor %}{% endif %}
Question: {{ query }}

Answer:"#;

const VALIDATE_TEMPLATE: &str = r#"Check whether the answer below is correct, grounded in the sources, and free of invented details.

Question: {{ query }}

Answer: {{ answer }}

Sources:
{% for source in sources %}[{{ loop.index }}] {{ source }}
{% endfor %}
Respond in this exact format:
ANSWERS_QUESTION: yes|no
IS_GROUNDED: yes|no
HAS_HALLUCINATION: yes|no
CONFIDENCE: <number between 0.0 and 1.0>
RETRY: yes|no
ADJUSTMENT: LOWER_THRESHOLD|WIDEN_FANOUT|REPHRASE|NONE"#;

const PLAN_TEMPLATE: &str = r#"Break the user's request into a short sequence of actions.

Available actions:
{% for action in actions %}- {{ action.name }}: {{ action.description }}
{% endfor %}
Rules:
- Use only the actions listed above.
- End with exactly one FORMAT_RESPONSE action.
- Keep the plan as short as possible.

Request: "{{ query }}"

Respond with JSON only, in this shape:
{"goal": "...", "actions": [{"type": "SEARCH_KNOWLEDGE", "params": {"query": "..."}, "description": "..."}], "estimated_steps": 2, "complexity": "simple|moderate|complex"}"#;

const FORMAT_RESPONSE_TEMPLATE: &str = r#"Write a single friendly reply to the user's request using the results gathered below. Mention any step that failed and what the user can do instead. Do not invent details that are not in the results.

Request: {{ query }}
Goal: {{ goal }}

Results:
{% for result in results %}- {{ result.action }} ({% if result.success %}ok{% else %}failed{% endif %}): {{ result.detail }}
{% endfor %}
Reply:"#;

const CONTINUITY_TEMPLATE: &str = r#"You are a friendly customer service assistant. The user just replied "{{ query }}" to the conversation below. Continue naturally in one or two sentences, offering the next helpful step.

{% for turn in history %}{{ turn.speaker }}: {{ turn.content }}
{% endfor %}
Assistant:"#;

const EXTRACT_FACTS_TEMPLATE: &str = r#"Extract durable facts about the user from this conversation: preferences, requests, context about their situation, follow-ups they expect, and problems they reported. Skip greetings and anything about the assistant.

{% for turn in history %}{{ turn.speaker }}: {{ turn.content }}
{% endfor %}
List one fact per line in this exact format, or NONE if there are no facts:
FACT: <preference|request|context|followup|problem> | <confidence 0.0-1.0> | <fact>"#;

const ANALYZE_FEEDBACK_TEMPLATE: &str = r#"You are a quality analyst. Analyze these low-rated customer service responses and identify patterns.

Total responses analyzed: {{ total }}

Sample responses:
{{ samples }}

Identify common issues, their root causes, whether similarity_threshold, top_k, temperature or validation_confidence should change, topics missing from the knowledge base, and specific recommendations.

Respond in this exact format:

COMMON_ISSUES:
- <issue>

ROOT_CAUSES:
- <cause>

THRESHOLD_ADJUSTMENTS:
<parameter>: <current> → <suggested> (<reason>)

KNOWLEDGE_GAPS:
- <topic>

RECOMMENDATIONS:
1. <recommendation>

CONFIDENCE: <number between 0.0 and 1.0>"#;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template failed: {0}")]
    Template(#[from] tera::Error),
    #[error("prompt context could not be serialized: {0}")]
    Context(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct HistoryLine<'a> {
    speaker: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct FactLine<'a> {
    category: &'static str,
    text: &'a str,
}

#[derive(Serialize)]
struct ActionLine {
    name: &'static str,
    description: &'static str,
}

/// One executed step as shown to the formatting prompt.
#[derive(Clone, Debug, Serialize)]
pub struct ResultLine {
    pub action: &'static str,
    pub success: bool,
    pub detail: String,
}

pub struct PromptLibrary {
    tera: Tera,
}

impl PromptLibrary {
    pub fn new() -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (CLASSIFY, CLASSIFY_TEMPLATE),
            (RAG_ANSWER, RAG_ANSWER_TEMPLATE),
            (VALIDATE, VALIDATE_TEMPLATE),
            (PLAN, PLAN_TEMPLATE),
            (FORMAT_RESPONSE, FORMAT_RESPONSE_TEMPLATE),
            (CONTINUITY, CONTINUITY_TEMPLATE),
            (EXTRACT_FACTS, EXTRACT_FACTS_TEMPLATE),
            (ANALYZE_FEEDBACK, ANALYZE_FEEDBACK_TEMPLATE),
        ])?;
        Ok(Self { tera })
    }

    pub fn classify(&self, query: &str) -> Result<String, PromptError> {
        let labels = Intent::ALL.iter().map(Intent::as_str).collect::<Vec<_>>();
        let mut context = Context::new();
        context.insert("labels", &labels);
        context.insert("query", query);
        Ok(self.tera.render(CLASSIFY, &context)?)
    }

    pub fn rag_answer(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
        history: &[ConversationTurn],
        facts: &[RecalledFact],
    ) -> Result<String, PromptError> {
        let sources = chunks.iter().map(|chunk| chunk.content.as_str()).collect::<Vec<_>>();
        let facts = facts
            .iter()
            .map(|fact| FactLine { category: fact.category.as_str(), text: &fact.text })
            .collect::<Vec<_>>();

        let mut context = Context::new();
        context.insert("query", query);
        context.insert("sources", &sources);
        context.insert("history", &history_lines(history));
        context.insert("facts", &facts);
        Ok(self.tera.render(RAG_ANSWER, &context)?)
    }

    pub fn validate(
        &self,
        query: &str,
        answer: &str,
        sources: &[String],
    ) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("query", query);
        context.insert("answer", answer);
        context.insert("sources", sources);
        Ok(self.tera.render(VALIDATE, &context)?)
    }

    pub fn plan(&self, query: &str) -> Result<String, PromptError> {
        let actions = ActionType::ALL
            .iter()
            .map(|action| ActionLine { name: action.as_str(), description: action.describe() })
            .collect::<Vec<_>>();
        let mut context = Context::new();
        context.insert("query", query);
        context.insert("actions", &actions);
        Ok(self.tera.render(PLAN, &context)?)
    }

    pub fn format_response(
        &self,
        query: &str,
        goal: &str,
        results: &[ResultLine],
    ) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("query", query);
        context.insert("goal", goal);
        context.insert("results", results);
        Ok(self.tera.render(FORMAT_RESPONSE, &context)?)
    }

    pub fn continuity(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("query", query);
        context.insert("history", &history_lines(history));
        Ok(self.tera.render(CONTINUITY, &context)?)
    }

    pub fn extract_facts(&self, turns: &[ConversationTurn]) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("history", &history_lines(turns));
        Ok(self.tera.render(EXTRACT_FACTS, &context)?)
    }

    pub fn analyze_feedback(
        &self,
        total: usize,
        samples: &[RatedExchange],
    ) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("total", &total);
        context.insert("samples", &serde_json::to_string_pretty(samples)?);
        Ok(self.tera.render(ANALYZE_FEEDBACK, &context)?)
    }
}

fn history_lines(turns: &[ConversationTurn]) -> Vec<HistoryLine<'_>> {
    turns
        .iter()
        .map(|turn| HistoryLine {
            speaker: match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            },
            content: &turn.content,
        })
        .collect()
}
