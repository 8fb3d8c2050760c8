//! Archive.org adapter.
//!
//! Queries the advanced-search endpoint for speech/rally footage and maps
//! each hit to a `details/<identifier>` video URL.

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

use crate::store::NewSpeech;

use super::{
    build_http_client, location_from_title, normalize_date, FetchOptions, SourceError,
    SourceStatus, SpeechSource,
};

const DEFAULT_BASE: &str = "https://archive.org";
const QUERY: &str = "title:(speech OR rally) AND mediatype:movies";

pub struct ArchiveSource {
    client: ClientWithMiddleware,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    response: SearchResponse,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    identifier: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    description: Option<serde_json::Value>,
}

impl ArchiveSource {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            base_url: base_url.into(),
        }
    }

    fn search_url(&self, rows: usize) -> String {
        format!(
            "{}/advancedsearch.php?q={}&fl[]=identifier&fl[]=title&fl[]=date&fl[]=description&rows={}&page=1&output=json",
            self.base_url,
            urlencoding::encode(QUERY),
            rows
        )
    }

    fn record_from_doc(&self, doc: SearchDoc) -> NewSpeech {
        let title = doc.title.unwrap_or_else(|| doc.identifier.clone());
        // Descriptions arrive as either a string or an array of strings.
        let transcript = doc.description.and_then(|d| match d {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Array(parts) => {
                let joined: Vec<String> = parts
                    .into_iter()
                    .filter_map(|p| p.as_str().map(String::from))
                    .collect();
                (!joined.is_empty()).then(|| joined.join("\n"))
            }
            _ => None,
        });

        NewSpeech {
            id: format!("archive_{}", doc.identifier),
            rally_location: location_from_title(&title),
            title,
            date: doc.date.as_deref().and_then(normalize_date),
            source: "archive".into(),
            video_url: Some(format!("{}/details/{}", self.base_url, doc.identifier)),
            transcript,
            thumbnail_url: Some(format!(
                "{}/services/img/{}",
                self.base_url, doc.identifier
            )),
            ..NewSpeech::default()
        }
    }
}

impl Default for ArchiveSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSource for ArchiveSource {
    fn name(&self) -> &'static str {
        "archive"
    }

    async fn verify(&self) -> SourceStatus {
        match self.client.get(self.search_url(1)).send().await {
            Ok(resp) if resp.status().is_success() => {
                SourceStatus::ok(resp.status().as_u16(), "api")
            }
            Ok(resp) => SourceStatus {
                available: false,
                status: Some(resp.status().as_u16()),
                error: Some(format!("archive.org returned {}", resp.status())),
                method: Some("api"),
            },
            Err(e) => SourceStatus::failed(e.to_string()),
        }
    }

    async fn fetch(&self, options: FetchOptions) -> Result<Vec<NewSpeech>, SourceError> {
        let resp = self
            .client
            .get(self.search_url(options.limit))
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SourceError::Http(format!(
                "archive.org returned {}",
                resp.status()
            )));
        }

        let envelope: SearchEnvelope = resp
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        Ok(envelope
            .response
            .docs
            .into_iter()
            .map(|doc| self.record_from_doc(doc))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(identifier: &str, title: Option<&str>, date: Option<&str>) -> SearchDoc {
        SearchDoc {
            identifier: identifier.into(),
            title: title.map(String::from),
            date: date.map(String::from),
            description: None,
        }
    }

    #[test]
    fn doc_maps_to_prefixed_record() {
        let src = ArchiveSource::new();
        let rec = src.record_from_doc(doc(
            "rally-phoenix-2020",
            Some("Rally in Phoenix, AZ"),
            Some("2020-02-19T00:00:00Z"),
        ));
        assert_eq!(rec.id, "archive_rally-phoenix-2020");
        assert_eq!(rec.source, "archive");
        assert_eq!(rec.date.as_deref(), Some("2020-02-19"));
        assert_eq!(rec.rally_location.as_deref(), Some("Phoenix, AZ"));
        assert_eq!(
            rec.video_url.as_deref(),
            Some("https://archive.org/details/rally-phoenix-2020")
        );
    }

    #[test]
    fn missing_title_falls_back_to_identifier() {
        let src = ArchiveSource::new();
        let rec = src.record_from_doc(doc("some-id", None, None));
        assert_eq!(rec.title, "some-id");
        assert_eq!(rec.date, None);
        assert_eq!(rec.rally_location, None);
    }

    #[test]
    fn array_description_is_joined() {
        let src = ArchiveSource::new();
        let mut d = doc("x", Some("Address"), None);
        d.description = Some(serde_json::json!(["part one", "part two"]));
        let rec = src.record_from_doc(d);
        assert_eq!(rec.transcript.as_deref(), Some("part one\npart two"));
    }

    #[tokio::test]
    async fn fetch_parses_wiremock_payload() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/advancedsearch.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": {
                    "docs": [
                        {"identifier": "a", "title": "Rally in Tulsa, OK", "date": "2020-06-20"},
                        {"identifier": "b", "title": "Address"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let src = ArchiveSource::with_base_url(server.uri());
        let records = src.fetch(FetchOptions { limit: 10 }).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "archive_a");
        assert_eq!(records[1].date, None);
    }
}
