//! Prompt construction for every LLM call in the pipeline.
//!
//! All prompts are plain text with the expected JSON shape spelled out
//! inline; parsing happens in the client's structured-completion layer.

use gb_domain::model::SummaryStyle;
use gb_llm::{ChatMessage, ChatRequest};

/// An optional extra system message (the orchestrator's country/service
/// constraints plus recent transcript) prepended to a request.
fn with_context(mut messages: Vec<ChatMessage>, context: Option<&str>) -> Vec<ChatMessage> {
    if let Some(context) = context {
        messages.insert(0, ChatMessage::system(context));
    }
    messages
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search strategy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn strategy_request(query: &str, context: Option<&str>) -> ChatRequest {
    let system = r#"You are a search strategy expert for a service provider database.
Analyze the user's query, pick the best search strategy and extract any specific service tags or categories it mentions.

Strategies:
1. "semantic" - natural language queries about services or needs
2. "tags" - specific service categories or tags are named
3. "hybrid" - both semantic understanding and specific tags are needed

For rewritten_query, transform the user's query into a description matching how providers describe themselves. Focus on the services, skills or solutions sought, in professional profile language. Example: "I need help with digital marketing" becomes "a service provider that offers digital marketing services including social media management, SEO, and online advertising".

Reply with exactly one JSON object:
{"strategy": "semantic" | "tags" | "hybrid", "extracted_tags": ["..."], "rewritten_query": "...", "rationale": "..."}"#;

    ChatRequest {
        messages: with_context(
            vec![
                ChatMessage::system(system),
                ChatMessage::user(format!(
                    "Analyze this search query and recommend a search strategy:\n\nQuery: {query}"
                )),
            ],
            context,
        ),
        temperature: Some(0.3),
        max_tokens: Some(1024),
        model: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adjudication
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn adjudication_request(
    query: &str,
    profile_text: &str,
    similarity_score: f64,
    threshold: f64,
    context: Option<&str>,
) -> ChatRequest {
    let system = format!(
        r#"You are an expert evaluator matching service providers to user queries.
Analyze the provider profile against the user's original query and judge its relevance.

Evaluation criteria:
1. Service Match: do the services offered align with what the user is looking for?
2. Location Relevance: is the provider's location suitable for the user's needs?
3. Expertise Alignment: does the provider have the specific expertise requested?
4. Capacity to Serve: can this provider handle the user's requirements?

Relevance score bands:
- 0.9-1.0: perfect match
- 0.7-0.9: good match
- 0.5-0.7: partial match
- 0.3-0.5: weak match
- 0.0-0.3: poor match

IMPORTANT: be strict. is_relevant is true only when relevance_score is at least {threshold}.

Reply with exactly one JSON object:
{{"relevance_score": 0.0, "reasoning": "...", "is_relevant": false, "confidence_level": 0.0}}"#
    );

    ChatRequest {
        messages: with_context(
            vec![
                ChatMessage::system(system),
                ChatMessage::user(format!(
                    "Original Query: {query}\n\nProfile to Evaluate:\n{profile_text}\n\n\
                     Similarity Score from Search: {similarity_score:.2}\n\n\
                     Evaluate this profile's relevance to the original query."
                )),
            ],
            context,
        ),
        temperature: Some(0.2),
        max_tokens: Some(2048),
        model: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn summary_request(
    query: &str,
    style: SummaryStyle,
    profiles_text: &str,
    context: Option<&str>,
) -> ChatRequest {
    let system = r#"You are an expert business analyst specializing in service provider summaries.
Create a summary that helps the user understand their options.

Style guidelines:
- "brief": key points only, executive summary focus
- "comprehensive": balanced detail across all sections
- "detailed": in-depth analysis of each provider

Focus on how well each provider matches the query, unique strengths, geographic coverage, relevant offerings, and next steps. Base everything strictly on the profile information provided.

For provider_recommendations: one short line per provider, in order of preference. When a profile carries a "Growbal Link:", render that provider's name as a bold blue Markdown link, e.g. "**[<span style=\"color:blue\">Acme Advisors</span>](https://...)** - why they fit".

Reply with exactly one JSON object:
{"executive_summary": "...", "provider_recommendations": ["..."], "key_insights": ["..."], "summary_statistics": {}}"#;

    ChatRequest {
        messages: with_context(
            vec![
                ChatMessage::system(system),
                ChatMessage::user(format!(
                    "Original Query: {query}\n\nSummary Style: {}\n\n\
                     Relevant Service Provider Profiles:\n{profiles_text}\n\n\
                     Create a summary of these service providers that addresses the user's query.",
                    style.as_str()
                )),
            ],
            context,
        ),
        temperature: Some(0.4),
        max_tokens: Some(3000),
        model: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn classification_request(
    message: &str,
    transcript: &str,
    country: &str,
    service_type: &str,
) -> ChatRequest {
    let prompt = format!(
        r#"You are an orchestrator agent for a service provider search system.

Available Tools:
1. search - find providers, companies, services or professionals, filtered to the user's country and service type
2. conversational - greetings, thanks, general questions, system inquiries

User Context:
- Country: {country}
- Service Type: {service_type}

Recent Conversation History:
{transcript}

Current Message: {message}

Reply with exactly one JSON object:
{{"tool_needed": true, "tool": "search" | "conversational", "summary": "concise summary of what the user wants", "direct_response": null}}

Guidelines:
- conversational: greetings, thank-yous, general or meta questions
- search: explicit search requests, finding providers
- summary: 1-2 sentences describing the user's intent"#
    );

    ChatRequest {
        messages: vec![ChatMessage::user(prompt)],
        temperature: None,
        max_tokens: Some(300),
        model: None,
    }
}

pub fn conversational_request(
    message: &str,
    country: &str,
    service_type: &str,
    history_text: &str,
) -> ChatRequest {
    let prompt = format!(
        r#"You are a friendly assistant for Growbal Intelligence, a service provider search platform.

User Context:
- Country: {country}
- Service Type: {service_type}
- Recent History: {history_text}

User Message: {message}

Instructions:
- Respond warmly and helpfully
- For greetings, welcome the user and briefly explain how you can help
- If asked what you can do, explain that you help find {service_type} providers in {country}
- For thanks, respond graciously
- Keep it to 2-3 sentences; do not perform searches
- Suggest asking for specific providers when the user is ready

Response:"#
    );

    ChatRequest {
        messages: vec![ChatMessage::user(prompt)],
        temperature: None,
        max_tokens: Some(200),
        model: None,
    }
}

pub fn suggestions_request(country: &str, service_type: &str, history_text: &str) -> ChatRequest {
    let prompt = format!(
        r#"You generate helpful search suggestions for a service provider search system.

Context:
- Country: {country}
- Service Type: {service_type}
- Recent Conversation: {history_text}

Generate exactly 3 concise, actionable search suggestions for someone looking for {service_type} providers in {country}.

Requirements:
- no emojis or icons
- 5-12 words each
- specific to the country and service type
- build on the conversation when there is one

Reply with exactly one JSON array of 3 strings:
["suggestion 1", "suggestion 2", "suggestion 3"]"#
    );

    ChatRequest {
        messages: vec![ChatMessage::user(prompt)],
        temperature: None,
        max_tokens: Some(200),
        model: None,
    }
}
