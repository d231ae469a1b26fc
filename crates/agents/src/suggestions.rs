//! Contextual search suggestions for the chat UI.

use gb_domain::cancel::CancelToken;
use gb_llm::LlmClient;

use crate::prompts;

/// Exactly three suggestions, always. LLM output that fails to parse or
/// comes up short falls back to deterministic per-service templates.
pub async fn generate(
    llm: &LlmClient,
    country: &str,
    service_type: &str,
    recent_turns: &[(String, String)],
    cancel: &CancelToken,
) -> Vec<String> {
    let mut history_text = String::new();
    for (user, assistant) in recent_turns.iter().rev().take(3).rev() {
        history_text.push_str(&format!("User: {user}\nAssistant: {assistant}\n"));
    }

    let req = prompts::suggestions_request(country, service_type, &history_text);
    match llm.complete_json::<Vec<String>>(req, cancel).await {
        Ok(suggestions) if suggestions.len() >= 3 => suggestions
            .into_iter()
            .take(3)
            .map(|s| s.trim().to_owned())
            .collect(),
        Ok(_) | Err(_) => fallback(country, service_type),
    }
}

fn fallback(country: &str, service_type: &str) -> Vec<String> {
    match service_type {
        "Tax Services" => vec![
            format!("Find tax preparers in {country}"),
            format!("Compare CPA firms in {country}"),
            format!("Search tax advisors in {country}"),
        ],
        "Business Setup Services" => vec![
            format!("Find business formation services in {country}"),
            format!("Compare company registration services in {country}"),
            format!("Search business lawyers in {country}"),
        ],
        "Migration/Visa Services" => vec![
            format!("Find immigration lawyers in {country}"),
            format!("Compare visa consultants in {country}"),
            format!("Search migration advisors in {country}"),
        ],
        other => {
            let service = other.to_lowercase();
            vec![
                format!("Find {service} providers in {country}"),
                format!("Compare {service} options in {country}"),
                format!("Search professional services in {country}"),
            ]
        }
    }
}
