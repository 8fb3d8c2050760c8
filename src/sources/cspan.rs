//! C-SPAN adapter.
//!
//! Tries the program-search API first (desktop user-agent); any non-2xx
//! drops to scraping the person page. Both paths filter titles on the
//! configured subject and apply the location heuristic.

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use scraper::{Html, Selector};
use serde::Deserialize;

use crate::store::NewSpeech;

use super::{
    build_http_client, location_from_title, normalize_date, FetchOptions, SourceError,
    SourceStatus, SpeechSource,
};

const DEFAULT_BASE: &str = "https://www.c-span.org";

pub struct CSpanSource {
    client: ClientWithMiddleware,
    base_url: String,
    subject: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    results: Vec<ApiProgram>,
}

#[derive(Debug, Deserialize)]
struct ApiProgram {
    id: serde_json::Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl CSpanSource {
    pub fn new(subject: String) -> Self {
        Self::with_base_url(DEFAULT_BASE, subject)
    }

    pub fn with_base_url(base_url: impl Into<String>, subject: String) -> Self {
        Self {
            client: build_http_client(),
            base_url: base_url.into(),
            subject,
        }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/api/search/?query={}&type=program",
            self.base_url,
            urlencoding::encode(&self.subject)
        )
    }

    fn person_url(&self) -> String {
        let slug: String = self
            .subject
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        format!("{}/person/?{}", self.base_url, slug)
    }

    /// Case-insensitive subject match; the last name alone is enough.
    fn title_matches(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        let subject = self.subject.to_lowercase();
        if title.contains(&subject) {
            return true;
        }
        subject
            .split_whitespace()
            .next_back()
            .map(|last| title.contains(last))
            .unwrap_or(false)
    }

    async fn fetch_via_api(&self, limit: usize) -> Result<Vec<NewSpeech>, SourceError> {
        let resp = self
            .client
            .get(self.api_url())
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SourceError::Http(format!(
                "c-span api returned {}",
                resp.status()
            )));
        }

        let envelope: ApiEnvelope = resp
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        let records = envelope
            .results
            .into_iter()
            .filter_map(|p| {
                let title = p.title?;
                if !self.title_matches(&title) {
                    return None;
                }
                let id = match &p.id {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some(NewSpeech {
                    id: format!("cspan_{id}"),
                    rally_location: location_from_title(&title),
                    title,
                    date: p.date.as_deref().and_then(normalize_date),
                    source: "cspan".into(),
                    video_url: p.url,
                    ..NewSpeech::default()
                })
            })
            .take(limit)
            .collect();

        Ok(records)
    }

    async fn fetch_via_scrape(&self, limit: usize) -> Result<Vec<NewSpeech>, SourceError> {
        let resp = self
            .client
            .get(self.person_url())
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SourceError::Http(format!(
                "c-span person page returned {}",
                resp.status()
            )));
        }

        let html = resp
            .text()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        Ok(parse_person_page(&html, &self.base_url, limit, |t| {
            self.title_matches(t)
        }))
    }
}

/// Scrape video links off the person page. C-SPAN video URLs carry the
/// program id in the path (`/video/?<id>/slug`).
fn parse_person_page(
    html: &str,
    base_url: &str,
    limit: usize,
    matches: impl Fn(&str) -> bool,
) -> Vec<NewSpeech> {
    let document = Html::parse_document(html);
    let link_sel = Selector::parse("a[href*='/video/']").expect("video link selector");
    let mut seen = std::collections::HashSet::new();
    let mut records = Vec::new();

    for link in document.select(&link_sel) {
        if records.len() >= limit {
            break;
        }
        let title = link.text().collect::<String>().trim().to_string();
        if title.is_empty() || !matches(&title) {
            continue;
        }
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        // Program ids lead the query segment: `/video/?507463-1/slug`.
        let id = href.split(['?', '/']).find_map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            (!digits.is_empty()).then_some(digits)
        });
        let Some(id) = id else { continue };
        if !seen.insert(id.clone()) {
            continue;
        }
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{base_url}{href}")
        };

        records.push(NewSpeech {
            id: format!("cspan_{id}"),
            rally_location: location_from_title(&title),
            title,
            source: "cspan".into(),
            video_url: Some(url),
            ..NewSpeech::default()
        });
    }
    records
}

#[async_trait]
impl SpeechSource for CSpanSource {
    fn name(&self) -> &'static str {
        "cspan"
    }

    async fn verify(&self) -> SourceStatus {
        match self.client.get(self.api_url()).send().await {
            Ok(resp) if resp.status().is_success() => {
                SourceStatus::ok(resp.status().as_u16(), "api")
            }
            // API refused: the scrape path is still worth reporting on.
            Ok(_) | Err(_) => match self.client.get(self.person_url()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    SourceStatus::ok(resp.status().as_u16(), "scrape")
                }
                Ok(resp) => SourceStatus {
                    available: false,
                    status: Some(resp.status().as_u16()),
                    error: Some(format!("person page returned {}", resp.status())),
                    method: Some("scrape"),
                },
                Err(e) => SourceStatus::failed(e.to_string()),
            },
        }
    }

    async fn fetch(&self, options: FetchOptions) -> Result<Vec<NewSpeech>, SourceError> {
        match self.fetch_via_api(options.limit).await {
            Ok(records) => Ok(records),
            Err(api_err) => {
                tracing::debug!(error = %api_err, "c-span api unavailable, scraping person page");
                self.fetch_via_scrape(options.limit).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> CSpanSource {
        CSpanSource::new("Donald Trump".into())
    }

    #[test]
    fn title_filter_accepts_subject_and_last_name() {
        let src = source();
        assert!(src.title_matches("Donald Trump Rally in Tulsa, OK"));
        assert!(src.title_matches("President Trump Remarks"));
        assert!(!src.title_matches("Senate Budget Hearing"));
    }

    #[test]
    fn person_page_parse_extracts_program_ids() {
        const HTML: &str = r#"
            <html><body>
              <ul>
                <li><a href="/video/?507463-1/rally-tulsa">President Trump Rally in Tulsa, OK</a></li>
                <li><a href="/video/?507463-1/rally-tulsa">President Trump Rally in Tulsa, OK</a></li>
                <li><a href="/video/?999999-1/hearing">Senate Budget Hearing</a></li>
                <li><a href="/about/">About C-SPAN</a></li>
              </ul>
            </body></html>
        "#;
        let records = parse_person_page(HTML, "https://www.c-span.org", 10, |t| {
            t.to_lowercase().contains("trump")
        });
        // Duplicate program link collapsed, hearing filtered, nav link skipped.
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "cspan_507463");
        assert_eq!(records[0].rally_location.as_deref(), Some("Tulsa, OK"));
        assert_eq!(
            records[0].video_url.as_deref(),
            Some("https://www.c-span.org/video/?507463-1/rally-tulsa")
        );
    }

    #[tokio::test]
    async fn api_failure_falls_back_to_scrape() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/search/"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/person/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="/video/?42-1/speech">Trump Speech in Phoenix, AZ</a>"#,
            ))
            .mount(&server)
            .await;

        let src = CSpanSource::with_base_url(server.uri(), "Donald Trump".into());
        let records = src.fetch(FetchOptions { limit: 5 }).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "cspan_42");
    }
}
