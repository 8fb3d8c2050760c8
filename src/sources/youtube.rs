//! YouTube Data API adapter.
//!
//! Requires an API key. Issues one search per configured keyword query,
//! deduplicates hits by video id, then enriches with a details call for
//! durations (ISO-8601 → `H:MM:SS` / `M:SS`).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

use crate::store::NewSpeech;

use super::{
    build_http_client, location_from_title, normalize_date, FetchOptions, SourceError,
    SourceStatus, SpeechSource,
};

const DEFAULT_BASE: &str = "https://www.googleapis.com/youtube/v3";

pub struct YouTubeSource {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    subject: String,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: String,
    #[serde(rename = "publishedAt", default)]
    published_at: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct DetailsEnvelope {
    #[serde(default)]
    items: Vec<DetailsItem>,
}

#[derive(Debug, Deserialize)]
struct DetailsItem {
    id: String,
    #[serde(rename = "contentDetails")]
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: Option<String>,
}

impl YouTubeSource {
    pub fn new(api_key: String, subject: String) -> Self {
        Self::with_base_url(DEFAULT_BASE, api_key, subject)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: String,
        subject: String,
    ) -> Self {
        Self {
            client: build_http_client(),
            base_url: base_url.into(),
            api_key,
            subject,
        }
    }

    fn queries(&self) -> Vec<String> {
        vec![
            format!("{} speech", self.subject),
            format!("{} rally", self.subject),
            format!("{} remarks", self.subject),
        ]
    }

    fn search_url(&self, query: &str, limit: usize) -> String {
        format!(
            "{}/search?part=snippet&type=video&maxResults={}&q={}&key={}",
            self.base_url,
            limit.min(50),
            urlencoding::encode(query),
            self.api_key
        )
    }

    fn details_url(&self, ids: &[String]) -> String {
        format!(
            "{}/videos?part=contentDetails&id={}&key={}",
            self.base_url,
            ids.join(","),
            self.api_key
        )
    }
}

/// `PT1H2M3S` → `1:02:03`; `PT5M7S` → `5:07`; `PT45S` → `0:45`.
pub fn format_iso8601_duration(raw: &str) -> Option<String> {
    let rest = raw.strip_prefix("PT").or_else(|| raw.strip_prefix("P"))?;
    let (mut hours, mut minutes, mut seconds) = (0u64, 0u64, 0u64);
    let mut digits = String::new();
    for ch in rest.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: u64 = digits.parse().ok()?;
        digits.clear();
        match ch {
            'H' => hours = value,
            'M' => minutes = value,
            'S' => seconds = value,
            _ => return None,
        }
    }
    if !digits.is_empty() {
        return None;
    }
    if hours > 0 {
        Some(format!("{hours}:{minutes:02}:{seconds:02}"))
    } else {
        Some(format!("{minutes}:{seconds:02}"))
    }
}

#[async_trait]
impl SpeechSource for YouTubeSource {
    fn name(&self) -> &'static str {
        "youtube"
    }

    async fn verify(&self) -> SourceStatus {
        if self.api_key.is_empty() {
            return SourceStatus::failed("youtube is not configured");
        }
        match self.client.get(self.search_url("test", 1)).send().await {
            Ok(resp) if resp.status().is_success() => {
                SourceStatus::ok(resp.status().as_u16(), "api")
            }
            Ok(resp) => SourceStatus {
                available: false,
                status: Some(resp.status().as_u16()),
                error: Some(format!("youtube api returned {}", resp.status())),
                method: Some("api"),
            },
            Err(e) => SourceStatus::failed(e.to_string()),
        }
    }

    async fn fetch(&self, options: FetchOptions) -> Result<Vec<NewSpeech>, SourceError> {
        if self.api_key.is_empty() {
            return Err(SourceError::NotConfigured("youtube"));
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut records: Vec<NewSpeech> = Vec::new();

        for query in self.queries() {
            if records.len() >= options.limit {
                break;
            }
            let resp = self
                .client
                .get(self.search_url(&query, options.limit))
                .send()
                .await
                .map_err(|e| SourceError::Http(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(SourceError::Http(format!(
                    "youtube search returned {}",
                    resp.status()
                )));
            }

            let envelope: SearchEnvelope = resp
                .json()
                .await
                .map_err(|e| SourceError::Parse(e.to_string()))?;

            for item in envelope.items {
                let Some(video_id) = item.id.video_id else {
                    continue;
                };
                if !seen.insert(video_id.clone()) {
                    continue;
                }
                let thumbnail = item
                    .snippet
                    .thumbnails
                    .high
                    .or(item.snippet.thumbnails.default)
                    .map(|t| t.url);
                records.push(NewSpeech {
                    id: format!("youtube_{video_id}"),
                    rally_location: location_from_title(&item.snippet.title),
                    title: item.snippet.title,
                    date: item.snippet.published_at.as_deref().and_then(normalize_date),
                    source: "youtube".into(),
                    video_url: Some(format!("https://www.youtube.com/watch?v={video_id}")),
                    thumbnail_url: thumbnail,
                    ..NewSpeech::default()
                });
                if records.len() >= options.limit {
                    break;
                }
            }
        }

        if records.is_empty() {
            return Ok(records);
        }

        // Enrichment: one details call covers every collected video.
        let ids: Vec<String> = records
            .iter()
            .map(|r| r.id.trim_start_matches("youtube_").to_string())
            .collect();
        match self.client.get(self.details_url(&ids)).send().await {
            Ok(resp) if resp.status().is_success() => {
                let details: DetailsEnvelope = resp
                    .json()
                    .await
                    .map_err(|e| SourceError::Parse(e.to_string()))?;
                let durations: HashMap<String, String> = details
                    .items
                    .into_iter()
                    .filter_map(|d| {
                        let formatted = d
                            .content_details
                            .duration
                            .as_deref()
                            .and_then(format_iso8601_duration)?;
                        Some((d.id, formatted))
                    })
                    .collect();
                for rec in &mut records {
                    let vid = rec.id.trim_start_matches("youtube_");
                    rec.duration = durations.get(vid).cloned();
                }
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "youtube details call failed, keeping records without durations");
            }
            Err(e) => {
                tracing::warn!(error = %e, "youtube details call failed, keeping records without durations");
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formats() {
        assert_eq!(format_iso8601_duration("PT1H2M3S"), Some("1:02:03".into()));
        assert_eq!(format_iso8601_duration("PT5M7S"), Some("5:07".into()));
        assert_eq!(format_iso8601_duration("PT45S"), Some("0:45".into()));
        assert_eq!(format_iso8601_duration("PT2H"), Some("2:00:00".into()));
        assert_eq!(format_iso8601_duration("PT10M"), Some("10:00".into()));
    }

    #[test]
    fn duration_rejects_malformed_input() {
        assert_eq!(format_iso8601_duration("10:00"), None);
        assert_eq!(format_iso8601_duration("PT5X"), None);
        assert_eq!(format_iso8601_duration("PT99"), None);
    }

    #[tokio::test]
    async fn fetch_dedupes_across_queries_and_enriches_durations() {
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let search_body = serde_json::json!({
            "items": [
                {
                    "id": {"videoId": "abc"},
                    "snippet": {
                        "title": "Rally in Tulsa, OK",
                        "publishedAt": "2020-06-20T00:00:00Z",
                        "thumbnails": {"high": {"url": "https://img/abc.jpg"}}
                    }
                }
            ]
        });
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .and(query_param("id", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "abc", "contentDetails": {"duration": "PT1H15M9S"}}
                ]
            })))
            .mount(&server)
            .await;

        let src = YouTubeSource::with_base_url(server.uri(), "k".into(), "Donald Trump".into());
        let records = src.fetch(FetchOptions { limit: 10 }).await.unwrap();

        // Three queries all return the same video; dedup keeps one.
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "youtube_abc");
        assert_eq!(records[0].date.as_deref(), Some("2020-06-20"));
        assert_eq!(records[0].duration.as_deref(), Some("1:15:09"));
    }
}
