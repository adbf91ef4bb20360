use serde::Deserialize;

/// Gateway rejects anything longer; checked here to save a round trip.
pub const MAX_PROMPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatExchange {
    pub prompt: String,
    pub reply: String,
    pub usage: TokenUsage,
}

#[derive(Deserialize)]
struct GenerateResponse {
    reply: String,
    #[serde(default)]
    token_usage: TokenUsage,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Sends one prompt to the gateway. Errors carry the gateway's own message
/// when it sent one.
pub async fn send_prompt(
    client: &reqwest::Client,
    gateway_url: &str,
    prompt: &str,
) -> anyhow::Result<ChatExchange> {
    if prompt.trim().is_empty() {
        anyhow::bail!("Prompt is required.");
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        anyhow::bail!("Prompt is too long. Please keep it under {MAX_PROMPT_CHARS} characters.");
    }

    let url = format!("{}/api/generate", gateway_url.trim_end_matches('/'));
    let res = client
        .post(&url)
        .json(&serde_json::json!({ "prompt": prompt }))
        .send()
        .await?;

    let status = res.status();
    if !status.is_success() {
        return match res.json::<ErrorBody>().await {
            Ok(body) => Err(anyhow::anyhow!(body.error)),
            Err(_) => Err(anyhow::anyhow!("http_{}", status.as_u16())),
        };
    }

    let body: GenerateResponse = res.json().await?;
    Ok(ChatExchange {
        prompt: prompt.to_string(),
        reply: body.reply,
        usage: body.token_usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;

    async fn gateway(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        match body["prompt"].as_str() {
            Some("boom") => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to fetch response from OpenAI."})),
            ),
            Some(p) => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "reply": format!("echo: {p}"),
                    "token_usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
                })),
            ),
            None => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Prompt is required."})),
            ),
        }
    }

    async fn serve() -> String {
        let router = Router::new().route("/api/generate", post(gateway));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn returns_reply_and_usage() {
        let url = serve().await;
        let exchange = send_prompt(&reqwest::Client::new(), &url, " hello ")
            .await
            .unwrap();
        // Sent exactly as typed.
        assert_eq!(exchange.prompt, " hello ");
        assert_eq!(exchange.reply, "echo:  hello ");
        assert_eq!(
            exchange.usage,
            TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30
            }
        );
    }

    #[tokio::test]
    async fn surfaces_gateway_error_text() {
        let url = serve().await;
        let err = send_prompt(&reqwest::Client::new(), &url, "boom")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to fetch response from OpenAI.");
    }

    #[tokio::test]
    async fn rejects_locally_before_sending() {
        // Port 9 (discard) is never contacted for these.
        let client = reqwest::Client::new();
        let long = "a".repeat(MAX_PROMPT_CHARS + 1);
        let err = send_prompt(&client, "http://127.0.0.1:9", &long)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("300 characters"));

        // Surrounding whitespace counts toward the limit.
        let padded = format!(" {} ", "a".repeat(MAX_PROMPT_CHARS - 1));
        let err = send_prompt(&client, "http://127.0.0.1:9", &padded)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("300 characters"));
        assert!(send_prompt(&client, "http://127.0.0.1:9", "   ").await.is_err());
    }
}
