//! REST client for the remote persistence API.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;

use crate::alarm::Alarm;
use crate::journal::LogEntry;

pub struct RemoteStore {
    http: reqwest::Client,
    base_url: String,
}

async fn read_json<T: DeserializeOwned>(res: reqwest::Response) -> anyhow::Result<T> {
    let res = ensure_success(res)?;
    Ok(res.json().await?)
}

fn ensure_success(res: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if !res.status().is_success() {
        anyhow::bail!("http_{}", res.status().as_u16());
    }
    Ok(res)
}

impl RemoteStore {
    /// `token` is attached as a bearer credential on every request.
    pub fn new(base_url: &str, token: Option<&str>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|e| anyhow::anyhow!("invalid token: {e}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn list_alarms(&self) -> anyhow::Result<Vec<Alarm>> {
        read_json(self.http.get(self.url("/alarms")).send().await?).await
    }

    pub async fn create_alarm(&self, alarm: &Alarm) -> anyhow::Result<Alarm> {
        alarm.validate()?;
        read_json(self.http.post(self.url("/alarms")).json(alarm).send().await?).await
    }

    pub async fn set_alarm_enabled(&self, id: &str, enabled: bool) -> anyhow::Result<Alarm> {
        let body = serde_json::json!({ "isEnabled": enabled });
        read_json(
            self.http
                .patch(self.url(&format!("/alarms/{id}")))
                .json(&body)
                .send()
                .await?,
        )
        .await
    }

    pub async fn delete_alarm(&self, id: &str) -> anyhow::Result<()> {
        ensure_success(
            self.http
                .delete(self.url(&format!("/alarms/{id}")))
                .send()
                .await?,
        )?;
        Ok(())
    }

    pub async fn create_log(&self, entry: &LogEntry) -> anyhow::Result<()> {
        ensure_success(self.http.post(self.url("/logs")).json(entry).send().await?)?;
        Ok(())
    }
}
