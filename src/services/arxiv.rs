//! arXiv lookup: Atom API search, e-print download, and LaTeX section splitting.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use regex::{Captures, Regex};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::bot::render::{html_escape, html_escape_attr};
use crate::error::BotError;

const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";
const ARXIV_EPRINT_URL: &str = "https://arxiv.org/e-print";

/// Cap on search results.
pub const MAX_RESULTS: usize = 10;

/// Guard against `\input` cycles.
const MAX_INPUT_DEPTH: usize = 8;

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\section\*?\{([^}]*)\}").expect("valid section regex"));

static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(?:input|include)\{([^}]+)\}").expect("valid input regex"));

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub link: String,
    pub introduction: String,
    /// Section title to raw LaTeX body, in document order.
    pub sections: IndexMap<String, String>,
    /// Section title to its summary, once summarized.
    pub summary: Option<IndexMap<String, String>>,
}

impl Paper {
    /// Render as Telegram HTML messages: a header, then the summary.
    pub fn to_messages(&self) -> Vec<String> {
        let mut messages = vec![format!(
            "<b>Title:</b> <a href='{}'>{}</a> ({}) \n<b>Authors:</b> {}\n\n<b>Abstract:</b> {}\n",
            html_escape_attr(&self.link),
            html_escape(&self.title),
            html_escape(&self.id),
            html_escape(&self.authors.join(", ")),
            html_escape(&self.abstract_text),
        )];

        for (title, summary) in self.summary.iter().flatten() {
            messages.push(format!("<b>{}</b>\n{}", html_escape(title), html_escape(summary)));
        }
        messages
    }
}

/// Resolves papers by id or keywords.
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Relevance-ranked search, at most [`MAX_RESULTS`] papers.
    async fn search_papers(&self, keywords: &[String]) -> Result<Vec<Paper>, BotError>;

    async fn fetch_paper(&self, id: &str) -> Result<Paper, BotError>;

    /// Fill `sections` and `introduction` from the paper's LaTeX source.
    async fn load_sections(&self, paper: &mut Paper) -> Result<(), BotError>;
}

/// `https://arxiv.org/abs/2309.17453` or `.../pdf/2309.17453.pdf` → `2309.17453`.
pub fn arxiv_id_from_link(link: &str) -> String {
    let last = link.trim().trim_end_matches('/').rsplit('/').next().unwrap_or("");
    last.strip_suffix(".pdf").unwrap_or(last).to_string()
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse an arXiv Atom response into papers.
pub fn parse_feed(body: &[u8]) -> Result<Vec<Paper>, BotError> {
    let feed = feed_rs::parser::parse(body).map_err(|e| BotError::parse("arXiv feed", e))?;

    let papers = feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry.title.map(|t| t.content).unwrap_or_default();
            let abstract_text = entry.summary.map(|t| t.content).unwrap_or_default();
            Paper {
                id: arxiv_id_from_link(&entry.id),
                title: normalize_whitespace(&title),
                abstract_text: normalize_whitespace(&abstract_text),
                authors: entry.authors.into_iter().map(|a| a.name).collect(),
                link: entry.id,
                ..Default::default()
            }
        })
        .collect();
    Ok(papers)
}

/// Split LaTeX into sections on `\section{...}` markers.
///
/// Each body runs to the next marker; the last one runs to `\end{document}`
/// or the end of the text. Text before the first marker is ignored.
pub fn extract_sections(latex: &str) -> IndexMap<String, String> {
    let end = latex.find(r"\end{document}").unwrap_or(latex.len());
    let latex = &latex[..end];

    let markers: Vec<(String, usize, usize)> = SECTION_RE
        .captures_iter(latex)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((caps[1].trim().to_string(), whole.start(), whole.end()))
        })
        .collect();

    let mut sections = IndexMap::new();
    for (i, (title, _, body_start)) in markers.iter().enumerate() {
        let body_end = markers.get(i + 1).map(|(_, start, _)| *start).unwrap_or(latex.len());
        sections.insert(title.clone(), latex[*body_start..body_end].to_string());
    }
    sections
}

/// Inline `\input{x}` / `\include{x}` from `base`, recursively.
/// Missing files expand to nothing.
pub fn expand_inputs(base: &Path, content: &str) -> String {
    expand_inputs_at(base, content, 0)
}

fn expand_inputs_at(base: &Path, content: &str, depth: usize) -> String {
    if depth >= MAX_INPUT_DEPTH {
        warn!("\\input nesting deeper than {}, stopping", MAX_INPUT_DEPTH);
        return content.to_string();
    }
    INPUT_RE
        .replace_all(content, |caps: &Captures| {
            let name = &caps[1];
            let file = if name.ends_with(".tex") {
                base.join(name)
            } else {
                base.join(format!("{}.tex", name))
            };
            match std::fs::read_to_string(&file) {
                Ok(inner) => expand_inputs_at(base, &inner, depth + 1),
                Err(_) => {
                    debug!("Skipping missing input {:?}", file);
                    String::new()
                }
            }
        })
        .into_owned()
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            walk_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

/// Drop everything that is not LaTeX or a bibliography.
fn prune_sources(dir: &Path) -> std::io::Result<()> {
    let mut files = Vec::new();
    walk_files(dir, &mut files)?;
    for file in files {
        if !has_extension(&file, "tex") && !has_extension(&file, "bbl") {
            std::fs::remove_file(&file)?;
        }
    }
    Ok(())
}

/// The main `.tex` file: the sibling of the first `.bbl`, else the first `.tex`.
pub fn find_main_tex(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut files = Vec::new();
    walk_files(dir, &mut files)?;

    let from_bbl = files
        .iter()
        .find(|f| has_extension(f, "bbl"))
        .map(|bbl| bbl.with_extension("tex"))
        .filter(|tex| tex.exists());

    Ok(from_bbl.or_else(|| files.into_iter().find(|f| has_extension(f, "tex"))))
}

/// arXiv Atom API client.
pub struct ArxivClient {
    client: reqwest::Client,
    /// Where unpacked e-print sources are cached.
    cache_dir: PathBuf,
}

impl ArxivClient {
    pub fn new(cache_dir: PathBuf) -> Result<Self, BotError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, cache_dir })
    }

    async fn query(&self, params: &str) -> Result<Vec<Paper>, BotError> {
        let url = format!("{}?{}", ARXIV_API_URL, params);
        debug!("arXiv query: {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.bytes().await?;
        parse_feed(&body)
    }

    /// Download and unpack the e-print into `dir`.
    async fn download_source(&self, id: &str, dir: &Path) -> Result<(), BotError> {
        info!("📥 Downloading LaTeX source for {}", id);
        let response = self
            .client
            .get(format!("{}/{}", ARXIV_EPRINT_URL, id))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Api {
                status: status.as_u16(),
                body: format!("e-print {} unavailable", id),
            });
        }
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(dir).await?;
        let archive = tempfile::Builder::new().suffix(".tar.gz").tempfile()?;
        tokio::fs::write(archive.path(), &bytes).await?;

        let output = Command::new("tar")
            .arg("-xzf")
            .arg(archive.path())
            .arg("-C")
            .arg(dir)
            .output()
            .await?;

        if !output.status.success() {
            // Single-file submissions are a gzipped .tex, not a tarball.
            debug!("tar failed for {}, trying plain gzip", id);
            let output = Command::new("gzip").arg("-dc").arg(archive.path()).output().await?;
            if !output.status.success() {
                let _ = tokio::fs::remove_dir_all(dir).await;
                return Err(BotError::subprocess("gzip", &output));
            }
            tokio::fs::write(dir.join("main.tex"), &output.stdout).await?;
        }

        prune_sources(dir)?;
        Ok(())
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    async fn search_papers(&self, keywords: &[String]) -> Result<Vec<Paper>, BotError> {
        let terms: Vec<String> = keywords.iter().map(|k| urlencoding::encode(k).into_owned()).collect();
        let params = format!(
            "search_query=all:{}&start=0&max_results={}&sortBy=relevance&sortOrder=descending",
            terms.join("+"),
            MAX_RESULTS
        );
        let mut papers = self.query(&params).await?;
        papers.truncate(MAX_RESULTS);
        info!("🔎 arXiv search {:?}: {} paper(s)", keywords, papers.len());
        Ok(papers)
    }

    async fn fetch_paper(&self, id: &str) -> Result<Paper, BotError> {
        let params = format!("id_list={}", urlencoding::encode(id));
        self.query(&params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BotError::NotFound(format!("arXiv paper {}", id)))
    }

    async fn load_sections(&self, paper: &mut Paper) -> Result<(), BotError> {
        let dir = self.cache_dir.join(&paper.id);
        if !dir.exists() {
            self.download_source(&paper.id, &dir).await?;
        }

        let Some(main_tex) = find_main_tex(&dir)? else {
            warn!("No .tex file in source of {}", paper.id);
            return Ok(());
        };
        let base = main_tex.parent().unwrap_or(dir.as_path()).to_path_buf();
        let content = tokio::fs::read(&main_tex).await?;
        let content = expand_inputs(&base, &String::from_utf8_lossy(&content));

        paper.sections = extract_sections(&content);
        paper.introduction = paper.sections.get("Introduction").cloned().unwrap_or_default();
        info!("📄 {}: {} section(s)", paper.id, paper.sections.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>http://arxiv.org/api/query</id>
  <title>ArXiv Query</title>
  <updated>2024-03-01T00:00:00-05:00</updated>
  <entry>
    <id>http://arxiv.org/abs/2309.17453v4</id>
    <updated>2024-04-07T17:00:00Z</updated>
    <published>2023-09-29T17:59:57Z</published>
    <title>Efficient Streaming Language Models
      with Attention Sinks</title>
    <summary>  Deploying LLMs in streaming
  applications is urgently needed.</summary>
    <author><name>Guangxuan Xiao</name></author>
    <author><name>Yuandong Tian</name></author>
    <link href="http://arxiv.org/abs/2309.17453v4" rel="alternate" type="text/html"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed() {
        let papers = parse_feed(FEED.as_bytes()).unwrap();
        assert_eq!(papers.len(), 1);
        let paper = &papers[0];
        assert_eq!(paper.id, "2309.17453v4");
        assert_eq!(paper.title, "Efficient Streaming Language Models with Attention Sinks");
        assert_eq!(paper.abstract_text, "Deploying LLMs in streaming applications is urgently needed.");
        assert_eq!(paper.authors, vec!["Guangxuan Xiao", "Yuandong Tian"]);
        assert_eq!(paper.link, "http://arxiv.org/abs/2309.17453v4");
    }

    #[test]
    fn test_arxiv_id_from_link() {
        assert_eq!(arxiv_id_from_link("https://arxiv.org/abs/2309.17453"), "2309.17453");
        assert_eq!(arxiv_id_from_link("https://arxiv.org/pdf/2309.17453.pdf"), "2309.17453");
        assert_eq!(arxiv_id_from_link("https://arxiv.org/abs/2309.17453/"), "2309.17453");
    }

    #[test]
    fn test_extract_sections_in_order() {
        let latex = r"\documentclass{article}
\begin{document}
\section{Introduction}
Intro text.
\section{Method}
We do things.
\subsection{Detail}
More.
\section{Results}
It works.
\end{document}
trailing";
        let sections = extract_sections(latex);
        let titles: Vec<&str> = sections.keys().map(String::as_str).collect();
        assert_eq!(titles, vec!["Introduction", "Method", "Results"]);
        assert_eq!(sections["Introduction"].trim(), "Intro text.");
        assert!(sections["Method"].contains(r"\subsection{Detail}"));
        assert_eq!(sections["Results"].trim(), "It works.");
    }

    #[test]
    fn test_extract_sections_none() {
        assert!(extract_sections("no sections here").is_empty());
    }

    #[test]
    fn test_expand_inputs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("intro.tex"), r"Intro \input{nested}").unwrap();
        std::fs::write(dir.path().join("nested.tex"), "deep").unwrap();

        let expanded = expand_inputs(dir.path(), r"A \input{intro} B \include{missing} C");
        assert_eq!(expanded, "A Intro deep B  C");
    }

    #[test]
    fn test_expand_inputs_cycle_terminates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("loop.tex"), r"x\input{loop}").unwrap();
        let expanded = expand_inputs(dir.path(), r"\input{loop}");
        assert!(expanded.starts_with("xxxx"));
    }

    #[test]
    fn test_find_main_tex_prefers_bbl_sibling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a_macros.tex"), "").unwrap();
        std::fs::write(dir.path().join("paper.tex"), "").unwrap();
        std::fs::write(dir.path().join("paper.bbl"), "").unwrap();
        assert_eq!(find_main_tex(dir.path()).unwrap(), Some(dir.path().join("paper.tex")));

        std::fs::remove_file(dir.path().join("paper.bbl")).unwrap();
        assert_eq!(find_main_tex(dir.path()).unwrap(), Some(dir.path().join("a_macros.tex")));
    }

    #[test]
    fn test_prune_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("figs")).unwrap();
        std::fs::write(dir.path().join("figs/plot.png"), "png").unwrap();
        std::fs::write(dir.path().join("main.tex"), "").unwrap();
        std::fs::write(dir.path().join("main.bbl"), "").unwrap();
        prune_sources(dir.path()).unwrap();
        assert!(!dir.path().join("figs/plot.png").exists());
        assert!(dir.path().join("main.tex").exists());
        assert!(dir.path().join("main.bbl").exists());
    }

    #[test]
    fn test_to_messages() {
        let mut paper = Paper {
            id: "1234.5678".into(),
            title: "A <B> & C".into(),
            abstract_text: "abs".into(),
            authors: vec!["X".into(), "Y".into()],
            link: "http://arxiv.org/abs/1234.5678".into(),
            ..Default::default()
        };
        let messages = paper.to_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("<a href='http://arxiv.org/abs/1234.5678'>A &lt;B&gt; &amp; C</a>"));
        assert!(messages[0].contains("<b>Authors:</b> X, Y"));

        let mut sections = IndexMap::new();
        sections.insert("Intro".to_string(), "first".to_string());
        sections.insert("Method".to_string(), "second".to_string());
        paper.summary = Some(sections);
        let messages = paper.to_messages();
        assert_eq!(&messages[1..], ["<b>Intro</b>\nfirst", "<b>Method</b>\nsecond"]);
    }
}
