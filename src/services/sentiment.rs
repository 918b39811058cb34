//! Social sentiment search: recent posts from a RapidAPI Twitter search,
//! scored by the language model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::BotError;
use crate::services::llm::{GeminiClient, parse_json};

const TWITTER_API_HOST: &str = "twitter-api45.p.rapidapi.com";
const TWITTER_CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

const MAX_POSTS: usize = 10;
const MAX_POST_AGE_DAYS: i64 = 2;
const SCORE_ATTEMPTS: usize = 3;

/// Returns a bracket-annotated report for a free-form query.
#[async_trait]
pub trait SentimentSource: Send + Sync {
    async fn summarize(&self, query: &str) -> Result<String, BotError>;
}

/// One scored post.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PostScore {
    pub sentiment: f64,
    pub quality: f64,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    /// As reported by the API, e.g. `Wed Feb 28 22:22:43 +0000 2024`.
    pub created_at: String,
    pub posted: DateTime<FixedOffset>,
    pub text: String,
    pub views: String,
}

impl Post {
    /// `[timestamp] text [views]`, on one line.
    pub fn line(&self) -> String {
        format!(
            "[{}] {} [{}]",
            self.created_at,
            self.text.replace('\n', " "),
            self.views
        )
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    timeline: Vec<TimelineEntry>,
}

#[derive(Deserialize)]
struct TimelineEntry {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    views: Option<serde_json::Value>,
}

/// Parse a search response, keeping posts newer than `now - 2 days`,
/// newest first, at most ten.
pub fn recent_posts(body: &str, now: DateTime<Utc>) -> Result<Vec<Post>, BotError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| BotError::parse("Twitter search", e))?;
    let cutoff = now - chrono::Duration::days(MAX_POST_AGE_DAYS);

    let mut posts: Vec<Post> = response
        .timeline
        .into_iter()
        .filter_map(|entry| {
            let text = entry.text?;
            let created_at = entry.created_at?;
            let posted = DateTime::parse_from_str(&created_at, TWITTER_CREATED_AT_FORMAT).ok()?;
            let views = match entry.views {
                Some(serde_json::Value::String(s)) => s,
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => "0".to_string(),
            };
            Some(Post {
                created_at,
                posted,
                text,
                views,
            })
        })
        .filter(|post| post.posted.with_timezone(&Utc) >= cutoff)
        .collect();

    posts.sort_by(|a, b| b.posted.cmp(&a.posted));
    posts.truncate(MAX_POSTS);
    Ok(posts)
}

fn no_posts_line(query: &str) -> String {
    format!("No posts about {} in the last {} days.", query, MAX_POST_AGE_DAYS)
}

/// One line per scored post, then the overall score
/// (sum of sentiments over sum of qualities, 0 when no quality).
pub fn compose_report(query: &str, posts: &[Post], scores: &[PostScore]) -> String {
    if posts.is_empty() {
        return no_posts_line(query);
    }

    let mut report = String::new();
    let mut total_sentiment = 0.0;
    let mut total_quality = 0.0;
    let mut scored = 0;
    for (post, score) in posts.iter().zip(scores) {
        total_sentiment += score.sentiment;
        total_quality += score.quality;
        scored += 1;
        report.push_str(&post.line());
        report.push('\n');
    }

    let overall = if total_quality == 0.0 {
        0.0
    } else {
        total_sentiment / total_quality
    };
    report.push_str(&format!("Overall sentiment for {} in {}: {}", query, scored, overall));
    report
}

fn scoring_prompt(query: &str, posts: &[Post]) -> String {
    let lines: Vec<String> = posts.iter().map(Post::line).collect();
    format!(
        "Summarize the following posts regarding the stock {query}. Each row is a post with the \
         following format:\n[timestamp] text [views]\nFor each row, return\n\
         1. a sentiment in the scale of [-1, 1] (positive=1, neutral=0, negative=-1) regarding {query};\n\
         2. a quality metric of the text in the scale of [0, 1] (good quality=1, bad quality=0);\n\
         3. a classification label of the text, chosen from [\"advertisement\", \"news\", \"opinion\", \
         \"question\", \"facts\"].\n\
         The output should be a json array with one object per post, e.g.\n\
         [{{\"sentiment\": 1, \"quality\": 1, \"label\": \"news\"}}, \
         {{\"sentiment\": -0.2, \"quality\": 0.6, \"label\": \"opinion\"}}]\n\n\
         Here are the posts:\n{}",
        lines.join("\n")
    )
}

/// RapidAPI Twitter search scored by Gemini.
pub struct TwitterSentiment {
    client: reqwest::Client,
    api_key: String,
    llm: Arc<GeminiClient>,
}

impl TwitterSentiment {
    pub fn new(api_key: String, llm: Arc<GeminiClient>) -> Result<Self, BotError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key,
            llm,
        })
    }

    async fn search(&self, query: &str) -> Result<Vec<Post>, BotError> {
        let url = format!(
            "https://{}/search.php?query={}",
            TWITTER_API_HOST,
            urlencoding::encode(query)
        );
        let response = self
            .client
            .get(&url)
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", TWITTER_API_HOST)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BotError::Api {
                status: status.as_u16(),
                body,
            });
        }
        recent_posts(&body, Utc::now())
    }

    async fn score(&self, query: &str, posts: &[Post]) -> Result<Vec<PostScore>, BotError> {
        let prompt = scoring_prompt(query, posts);
        let mut last_err = BotError::Empty("sentiment scores");
        for attempt in 1..=SCORE_ATTEMPTS {
            let result = match self.llm.generate(&prompt, None).await {
                Ok(output) => parse_json::<Vec<PostScore>>(&output, "sentiment scores"),
                Err(e) => Err(e),
            };
            match result {
                Ok(scores) => return Ok(scores),
                Err(e) => {
                    warn!("Sentiment scoring attempt {}/{} failed: {}", attempt, SCORE_ATTEMPTS, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl SentimentSource for TwitterSentiment {
    async fn summarize(&self, query: &str) -> Result<String, BotError> {
        let posts = self.search(query).await?;
        info!("🐦 {} recent post(s) for \"{}\"", posts.len(), query);
        if posts.is_empty() {
            return Ok(no_posts_line(query));
        }
        let scores = self.score(query, &posts).await?;
        Ok(compose_report(query, &posts, &scores))
    }
}

/// Stand-in used when no RapidAPI key is configured.
pub struct SentimentUnavailable;

#[async_trait]
impl SentimentSource for SentimentUnavailable {
    async fn summarize(&self, _query: &str) -> Result<String, BotError> {
        Err(BotError::NotFound("rapidapi_key is not configured".to_string()))
    }
}
