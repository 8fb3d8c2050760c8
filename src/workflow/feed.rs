//! RSS feed rendering. Pure string functions; the engine owns filesystem
//! placement. User-provided title and description are always XML-escaped.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnclosureMode {
    /// Standalone feed: absolute URL, `audio/mpeg`.
    Absolute,
    /// Inside a bundle: path relative to `podcast.xml`, `audio/wav`.
    Relative,
}

#[derive(Debug, Clone)]
pub struct FeedInput<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub script: Option<&'a str>,
    /// Enclosure target (URL or relative path depending on mode).
    pub audio: Option<&'a str>,
}

/// Escape the five XML metacharacters. Ampersand first so entities from the
/// other replacements survive.
pub fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn fallback_description(script: Option<&str>) -> String {
    script
        .map(|s| s.chars().take(200).collect::<String>())
        .unwrap_or_else(|| "Generated podcast episode".into())
}

/// Render the RSS 2.0 document. `now` drives both `pubDate` (RFC-1123 UTC)
/// and the time-derived `guid`, keeping the function deterministic for
/// callers that pass a fixed instant.
pub fn render_feed(input: &FeedInput<'_>, mode: EnclosureMode, now: DateTime<Utc>) -> String {
    let title = escape_xml(input.title);
    let description = if input.description.is_empty() {
        escape_xml(&fallback_description(input.script))
    } else {
        escape_xml(input.description)
    };
    let pub_date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let guid = format!("podgen-{}", now.timestamp_millis());

    let mime = match mode {
        EnclosureMode::Absolute => "audio/mpeg",
        EnclosureMode::Relative => "audio/wav",
    };
    let enclosure = input
        .audio
        .map(|audio| {
            format!(
                r#"      <enclosure url="{}" length="0" type="{mime}"/>
"#,
                escape_xml(audio)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>{title}</title>
    <description>{description}</description>
    <language>en-us</language>
    <item>
      <title>{title}</title>
      <description>{description}</description>
      <pubDate>{pub_date}</pubDate>
      <guid isPermaLink="false">{guid}</guid>
{enclosure}      <itunes:duration>10:00</itunes:duration>
      <itunes:explicit>false</itunes:explicit>
    </item>
  </channel>
</rss>
"#
    )
}
