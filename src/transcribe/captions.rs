use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{check_duration, require_video, until_cancelled, Transcript, TranscriptProvider};
use crate::config::TranscriptionConfig;
use crate::video::VideoReference;
use crate::BlogError;

const BROWSER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const CLIENT_NAME: &str = "ANDROID";
const CLIENT_VERSION: &str = "20.10.38";

static API_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""INNERTUBE_API_KEY":\s*"([a-zA-Z0-9_-]+)""#).expect("valid regex"));
static TEXT_NODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<text[^>]*>(.*?)</text>").expect("valid regex"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("valid regex"));

/// One caption track advertised by the player
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionTrack {
    pub language_code: String,
    pub base_url: String,
    /// Automatic speech recognition track
    pub generated: bool,
}

/// Reads the captions YouTube already publishes for a video
pub struct CaptionsTranscriber {
    client: Client,
    settings: TranscriptionConfig,
}

impl CaptionsTranscriber {
    pub fn new(settings: TranscriptionConfig) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    fn base_url(&self) -> &str {
        self.settings.captions.base_url.trim_end_matches('/')
    }

    async fn get_text(&self, url: &str, what: &str) -> Result<String, BlogError> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, BROWSER_AGENT)
            .header(ACCEPT_LANGUAGE, "en-US")
            .send()
            .await
            .map_err(|e| BlogError::TranscriptionFailed(format!("cannot fetch {}: {}", what, e)))?;

        check_status(&resp, what)?;
        resp.text()
            .await
            .map_err(|e| BlogError::TranscriptionFailed(format!("cannot read {}: {}", what, e)))
    }

    async fn fetch_player(&self, video_id: &str, api_key: &str) -> Result<Value, BlogError> {
        let body = json!({
            "context": {
                "client": {
                    "clientName": CLIENT_NAME,
                    "clientVersion": CLIENT_VERSION
                }
            },
            "videoId": video_id
        });

        let resp = self
            .client
            .post(format!("{}/youtubei/v1/player", self.base_url()))
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| BlogError::TranscriptionFailed(format!("cannot fetch player data: {}", e)))?;

        check_status(&resp, "player data")?;
        resp.json::<Value>()
            .await
            .map_err(|e| BlogError::TranscriptionFailed(format!("unreadable player data: {}", e)))
    }

    async fn fetch_captions(&self, video_id: &str) -> Result<Transcript, BlogError> {
        let watch_url = Url::parse_with_params(&format!("{}/watch", self.base_url()), &[("v", video_id)])
            .map_err(|e| BlogError::TranscriptionFailed(format!("bad watch page URL: {}", e)))?;
        let html = self.get_text(watch_url.as_str(), "watch page").await?;
        let api_key = extract_api_key(&html)?;

        let player = self.fetch_player(video_id, &api_key).await?;
        check_playability(&player)?;

        let duration_secs = player
            .pointer("/videoDetails/lengthSeconds")
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_u64()))
            .unwrap_or(0);
        check_duration(duration_secs, &self.settings)?;

        let title = player
            .pointer("/videoDetails/title")
            .and_then(Value::as_str)
            .map(str::to_string);

        let tracks = caption_tracks(&player);
        let track = choose_track(&tracks, &self.settings.captions.languages)
            .ok_or_else(|| BlogError::TranscriptionFailed("captions are disabled for this video".into()))?;
        tracing::info!(
            language = %track.language_code,
            generated = track.generated,
            "Using published captions"
        );

        let track_url = Url::parse(self.base_url())
            .and_then(|base| base.join(&track.base_url))
            .map_err(|e| BlogError::TranscriptionFailed(format!("bad caption track URL: {}", e)))?;
        let xml = self.get_text(track_url.as_str(), "captions").await?;

        Ok(Transcript::new(parse_timedtext(&xml), duration_secs, self.settings.min_word_count)?.with_title(title))
    }
}

fn check_status(resp: &reqwest::Response, what: &str) -> Result<(), BlogError> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(BlogError::TranscriptionFailed(
            "YouTube is rate limiting requests from this IP".into(),
        ));
    }
    if !status.is_success() {
        return Err(BlogError::TranscriptionFailed(format!(
            "cannot fetch {}: HTTP {}",
            what,
            status.as_u16()
        )));
    }
    Ok(())
}

fn extract_api_key(html: &str) -> Result<String, BlogError> {
    if html.contains("g-recaptcha") {
        return Err(BlogError::TranscriptionFailed(
            "YouTube is blocking requests from this IP".into(),
        ));
    }

    API_KEY_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| BlogError::TranscriptionFailed("cannot find player key in watch page".into()))
}

fn check_playability(player: &Value) -> Result<(), BlogError> {
    let Some(playability) = player.get("playabilityStatus") else {
        return Ok(());
    };

    let status = playability.get("status").and_then(Value::as_str).unwrap_or("");
    if status == "OK" {
        return Ok(());
    }

    let reason = playability.get("reason").and_then(Value::as_str).unwrap_or("");
    let message = match status {
        "LOGIN_REQUIRED" if reason.contains("not a bot") => "YouTube is asking to confirm this is not a bot".to_string(),
        "LOGIN_REQUIRED" => "the video requires sign-in (possibly age restricted)".to_string(),
        "ERROR" if reason.contains("unavailable") => "the video is unavailable".to_string(),
        _ if reason.is_empty() => format!("the video is not playable ({})", status),
        _ => format!("the video is not playable: {}", reason),
    };
    Err(BlogError::TranscriptionFailed(message))
}

/// Caption tracks listed in a player response
pub fn caption_tracks(player: &Value) -> Vec<CaptionTrack> {
    player
        .pointer("/captions/playerCaptionsTracklistRenderer/captionTracks")
        .and_then(Value::as_array)
        .map(|tracks| {
            tracks
                .iter()
                .filter_map(|track| {
                    Some(CaptionTrack {
                        language_code: track.get("languageCode")?.as_str()?.to_string(),
                        base_url: track.get("baseUrl")?.as_str()?.replace("&fmt=srv3", ""),
                        generated: track.get("kind").and_then(Value::as_str) == Some("asr"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// For each preferred language a manual track beats a generated one;
/// with no match, any manual track, then anything.
pub fn choose_track<'a>(tracks: &'a [CaptionTrack], languages: &[String]) -> Option<&'a CaptionTrack> {
    languages
        .iter()
        .find_map(|lang| {
            let matching = || tracks.iter().filter(move |t| &t.language_code == lang);
            matching().find(|t| !t.generated).or_else(|| matching().next())
        })
        .or_else(|| tracks.iter().find(|t| !t.generated))
        .or_else(|| tracks.first())
}

/// Flatten timedtext XML into one line of plain text
pub fn parse_timedtext(xml: &str) -> String {
    let lines: Vec<String> = TEXT_NODE_RE
        .captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| {
            // captions are often escaped twice
            let decoded = decode_entities(&decode_entities(m.as_str()));
            TAG_RE.replace_all(&decoded, "").into_owned()
        })
        .collect();

    lines.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY_RE.replace_all(text, |caps: &regex::Captures| {
        let code = &caps[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    numeric
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[async_trait]
impl TranscriptProvider for CaptionsTranscriber {
    async fn fetch_transcript(
        &self,
        video: &VideoReference,
        cancel: &CancellationToken,
    ) -> Result<Transcript, BlogError> {
        let (video_id, _) = require_video(video)?;
        tracing::info!(video_id, "Fetching published captions");
        until_cancelled(cancel, self.fetch_captions(video_id)).await
    }

    fn name(&self) -> &'static str {
        "captions"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn track(lang: &str, generated: bool) -> CaptionTrack {
        CaptionTrack {
            language_code: lang.into(),
            base_url: format!("/api/timedtext?lang={}", lang),
            generated,
        }
    }

    fn langs(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn prefers_manual_track_in_preferred_language() {
        let tracks = vec![track("de", false), track("en", true), track("en", false)];
        let chosen = choose_track(&tracks, &langs(&["en"])).unwrap();
        assert_eq!(chosen, &track("en", false));

        let chosen = choose_track(&tracks, &langs(&["fr", "de"])).unwrap();
        assert_eq!(chosen.language_code, "de");
    }

    #[test]
    fn falls_back_to_any_track() {
        let tracks = vec![track("es", true), track("pt", false)];
        assert_eq!(choose_track(&tracks, &langs(&["en"])).unwrap().language_code, "pt");

        let generated_only = vec![track("es", true)];
        assert_eq!(choose_track(&generated_only, &langs(&["en"])).unwrap().language_code, "es");

        assert!(choose_track(&[], &langs(&["en"])).is_none());
    }

    #[test]
    fn timedtext_is_decoded_and_flattened() {
        let xml = r#"<?xml version="1.0" encoding="utf-8" ?><transcript>
            <text start="0.0" dur="1.5">Hello &amp;amp; welcome</text>
            <text start="1.5" dur="2.0">it&amp;#39;s   a
            &lt;font color=&quot;#fff&quot;&gt;test&lt;/font&gt;</text>
            <text start="3.5" dur="1.0">caf&#xE9;</text>
        </transcript>"#;

        assert_eq!(parse_timedtext(xml), "Hello & welcome it's a test café");
    }

    #[test]
    fn recaptcha_page_is_blocked() {
        let err = extract_api_key(r#"<div class="g-recaptcha"></div>"#).unwrap_err();
        assert!(matches!(err, BlogError::TranscriptionFailed(msg) if msg.contains("blocking")));
        assert_eq!(
            extract_api_key(r#"ytcfg.set({"INNERTUBE_API_KEY": "AIzaTest_1"})"#).unwrap(),
            "AIzaTest_1"
        );
    }

    #[test]
    fn unplayable_video_is_reported() {
        let player = json!({"playabilityStatus": {"status": "ERROR", "reason": "This video is unavailable"}});
        let err = check_playability(&player).unwrap_err();
        assert_eq!(err, BlogError::TranscriptionFailed("the video is unavailable".into()));
        assert!(check_playability(&json!({"playabilityStatus": {"status": "OK"}})).is_ok());
    }

    async fn serve_video(server: &mut Server, player: Value) -> Vec<mockito::Mock> {
        let watch = server
            .mock("GET", "/watch")
            .match_query(Matcher::UrlEncoded("v".into(), "dQw4w9WgXcQ".into()))
            .with_status(200)
            .with_body(r#"<html><script>ytcfg.set({"INNERTUBE_API_KEY":"AIzaTest"});</script></html>"#)
            .create_async()
            .await;
        let player = server
            .mock("POST", "/youtubei/v1/player")
            .match_query(Matcher::UrlEncoded("key".into(), "AIzaTest".into()))
            .match_body(Matcher::PartialJson(json!({
                "context": {"client": {"clientName": "ANDROID"}},
                "videoId": "dQw4w9WgXcQ"
            })))
            .with_status(200)
            .with_body(player.to_string())
            .create_async()
            .await;
        vec![watch, player]
    }

    fn transcriber(server: &Server) -> CaptionsTranscriber {
        let mut settings = TranscriptionConfig::default();
        settings.captions.base_url = server.url();
        CaptionsTranscriber::new(settings)
    }

    #[tokio::test]
    async fn fetches_published_captions() {
        let mut server = Server::new_async().await;
        let _mocks = serve_video(
            &mut server,
            json!({
                "playabilityStatus": {"status": "OK"},
                "videoDetails": {"title": "Cooking 101", "lengthSeconds": "212"},
                "captions": {"playerCaptionsTracklistRenderer": {"captionTracks": [
                    {"languageCode": "en", "kind": "asr", "baseUrl": "/api/timedtext?lang=en&kind=asr"},
                    {"languageCode": "en", "baseUrl": "/api/timedtext?lang=en&fmt=srv3"}
                ]}}
            }),
        )
        .await;
        let captions = server
            .mock("GET", "/api/timedtext")
            .match_query(Matcher::Exact("lang=en".into()))
            .with_status(200)
            .with_body(r#"<transcript><text start="0" dur="1">Today we cook</text><text start="1" dur="1">pasta</text></transcript>"#)
            .create_async()
            .await;

        let transcript = transcriber(&server)
            .fetch_transcript(
                &VideoReference::parse("https://youtu.be/dQw4w9WgXcQ"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(transcript.text, "Today we cook pasta");
        assert_eq!(transcript.source_duration_seconds, 212);
        assert_eq!(transcript.title.as_deref(), Some("Cooking 101"));
        assert_eq!(transcript.word_count, 4);
        captions.assert_async().await;
    }

    #[tokio::test]
    async fn video_without_captions_fails() {
        let mut server = Server::new_async().await;
        let _mocks = serve_video(
            &mut server,
            json!({"playabilityStatus": {"status": "OK"}, "videoDetails": {"lengthSeconds": "60"}}),
        )
        .await;

        let err = transcriber(&server)
            .fetch_transcript(
                &VideoReference::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err, BlogError::TranscriptionFailed("captions are disabled for this video".into()));
    }
}
