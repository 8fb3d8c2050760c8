//! White House speeches-and-remarks index scraper.
//!
//! The index is a paginated list of `<article>` cards; we take the ten most
//! recent entries. Parsing is split out so it can be exercised on fixture
//! HTML without the network.

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use scraper::{Html, Selector};

use crate::store::NewSpeech;

use super::{
    build_http_client, location_from_title, normalize_date, FetchOptions, SourceError,
    SourceStatus, SpeechSource,
};

const DEFAULT_BASE: &str = "https://www.whitehouse.gov";
const INDEX_PATH: &str = "/briefing-room/speeches-remarks/";
const MAX_ITEMS: usize = 10;

pub struct WhiteHouseSource {
    client: ClientWithMiddleware,
    base_url: String,
}

impl WhiteHouseSource {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            base_url: base_url.into(),
        }
    }

    fn index_url(&self) -> String {
        format!("{}{}", self.base_url, INDEX_PATH)
    }
}

impl Default for WhiteHouseSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract title + link + date from the structured list items.
fn parse_index(html: &str, base_url: &str, limit: usize) -> Vec<NewSpeech> {
    let document = Html::parse_document(html);
    let article_sel = Selector::parse("article").expect("article selector");
    let link_sel = Selector::parse("h2 a, h3 a, a").expect("link selector");
    let time_sel = Selector::parse("time").expect("time selector");

    let mut records = Vec::new();
    for article in document.select(&article_sel).take(limit) {
        let Some(link) = article.select(&link_sel).next() else {
            continue;
        };
        let title = link.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{base_url}{href}")
        };

        let date = article
            .select(&time_sel)
            .next()
            .and_then(|t| {
                t.value()
                    .attr("datetime")
                    .map(String::from)
                    .or_else(|| Some(t.text().collect::<String>()))
            })
            .as_deref()
            .and_then(normalize_date);

        let slug = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("item")
            .to_string();

        records.push(NewSpeech {
            id: format!("whitehouse_{slug}"),
            rally_location: location_from_title(&title),
            title,
            date,
            source: "whitehouse".into(),
            transcript_url: Some(url.clone()),
            video_url: Some(url),
            ..NewSpeech::default()
        });
    }
    records
}

#[async_trait]
impl SpeechSource for WhiteHouseSource {
    fn name(&self) -> &'static str {
        "whitehouse"
    }

    async fn verify(&self) -> SourceStatus {
        match self.client.get(self.index_url()).send().await {
            Ok(resp) if resp.status().is_success() => {
                SourceStatus::ok(resp.status().as_u16(), "scrape")
            }
            Ok(resp) => SourceStatus {
                available: false,
                status: Some(resp.status().as_u16()),
                error: Some(format!("index returned {}", resp.status())),
                method: Some("scrape"),
            },
            Err(e) => SourceStatus::failed(e.to_string()),
        }
    }

    async fn fetch(&self, options: FetchOptions) -> Result<Vec<NewSpeech>, SourceError> {
        let resp = self
            .client
            .get(self.index_url())
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SourceError::Http(format!(
                "index returned {}",
                resp.status()
            )));
        }

        let html = resp
            .text()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        let limit = options.limit.min(MAX_ITEMS);
        Ok(parse_index(&html, &self.base_url, limit))
    }
}
