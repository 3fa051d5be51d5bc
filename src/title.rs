use serde_json::json;

use crate::error::RelayError;
use crate::provider::CompletionRequest;
use crate::routing::ProviderRouter;

pub const TITLE_SYSTEM_PROMPT: &str = "You are an expert at creating concise, relevant titles for chat conversations. \
Based on the following user message, generate a short title (max 5 words) \
that accurately reflects the main topic. Do not include quotation marks or labels like 'Title:'.";

pub const FALLBACK_TITLE: &str = "Chat";

/// Ask the provider for a short conversation title.
///
/// # Errors
///
/// Returns [`RelayError::ProviderNotConfigured`] for unknown providers and the
/// provider's categorized error when the completion fails.
pub async fn generate_title(
    router: &ProviderRouter,
    provider: &str,
    model: &str,
    prompt: &str,
    temperature: f64,
) -> Result<String, RelayError> {
    let client = router.resolve(provider)?;
    let request = CompletionRequest {
        model: model.to_string(),
        messages: vec![
            json!({ "role": "system", "content": TITLE_SYSTEM_PROMPT }),
            json!({ "role": "user", "content": prompt }),
        ],
        temperature: Some(temperature),
        ..CompletionRequest::default()
    };

    let content = client.complete(&request).await.map_err(|err| {
        tracing::error!(provider, model, error = %err, "title generation failed");
        err
    })?;
    let title = clean_title(content.as_deref());
    tracing::info!(provider, model, title = %title, "generated title");
    Ok(title)
}

/// Trim and strip quote characters; fall back when nothing is left.
#[must_use]
pub fn clean_title(content: Option<&str>) -> String {
    let cleaned: String = content
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !matches!(c, '"' | '\''))
        .collect();
    if cleaned.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        cleaned
    }
}
