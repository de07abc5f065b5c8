//! Pipeline orchestration: configuration, day scraping, run-once and
//! the daily watch scheduler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

use seap_client::{AcquisitionSource, ClientConfig, PageQuery, SeapClient, DEFAULT_BASE_URL};
use seap_core::{KeywordSet, MatchedNotice, DEFAULT_KEYWORDS};
use seap_store::RecordStore;

pub const CRATE_NAME: &str = "seap-sync";

/// Immutable run configuration. Every knob has the original daily
/// job's value as its default, so a run with no environment set
/// behaves exactly like the zero-configuration script it replaces.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub keywords: Vec<String>,
    pub output_file: PathBuf,
    pub log_file: PathBuf,
    pub acquisition_state_id: i64,
    pub page_size: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub watch_cron: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            output_file: PathBuf::from("seap_results.csv"),
            log_file: PathBuf::from("seap_scraper.log"),
            acquisition_state_id: seap_client::DEFAULT_ACQUISITION_STATE_ID,
            page_size: 100,
            http_timeout_secs: 30,
            user_agent: "seap-watch/0.1".to_string(),
            // Daily at 08:00 local time, like the original scheduler.
            watch_cron: "0 0 8 * * *".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_or("SEAP_BASE_URL", defaults.base_url),
            keywords: std::env::var("SEAP_KEYWORDS")
                .ok()
                .map(|raw| {
                    raw.split(',')
                        .map(|k| k.trim().to_string())
                        .filter(|k| !k.is_empty())
                        .collect()
                })
                .filter(|keywords: &Vec<String>| !keywords.is_empty())
                .unwrap_or(defaults.keywords),
            output_file: std::env::var("SEAP_OUTPUT_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_file),
            log_file: std::env::var("SEAP_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_file),
            acquisition_state_id: env_parsed("SEAP_STATE_ID", defaults.acquisition_state_id),
            page_size: env_parsed("SEAP_PAGE_SIZE", defaults.page_size),
            http_timeout_secs: env_parsed("SEAP_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            user_agent: env_or("SEAP_USER_AGENT", defaults.user_agent),
            watch_cron: env_or("SEAP_WATCH_CRON", defaults.watch_cron),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            acquisition_state_id: self.acquisition_state_id,
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn keyword_set(&self) -> KeywordSet {
        KeywordSet::new(self.keywords.iter().cloned())
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub matched: usize,
    pub written: usize,
}

/// Walk every list page of one calendar day and collect keyword
/// matches. A fetch failure ends the walk and returns whatever was
/// collected so far; it never propagates.
///
/// Loop control prefers the server-reported total; the short-page
/// heuristic (`items < page_size` means last page) is the fallback
/// when no usable total was reported. An empty page always stops.
pub async fn scrape_day(
    source: &dyn AcquisitionSource,
    keywords: &KeywordSet,
    date: NaiveDate,
    page_size: usize,
) -> Vec<MatchedNotice> {
    let mut matches = Vec::new();
    let mut page_index = 0usize;
    let mut processed = 0u64;
    let mut total: Option<u64> = None;

    info!(%date, "=== scraping day ===");
    loop {
        let query = PageQuery {
            date_start: date,
            date_end: date,
            page_index,
            page_size,
        };
        let page = match source.fetch_page(&query).await {
            Ok(page) => page,
            Err(err) => {
                error!(%date, page_index, %err, "list fetch failed, keeping partial results");
                break;
            }
        };

        if total.is_none() {
            total = Some(page.total);
            info!(total = page.total, %date, "notices reported for day");
        }
        if page.items.is_empty() {
            break;
        }
        processed += page.items.len() as u64;

        for item in &page.items {
            if let Some(keyword) = keywords.match_notice(item) {
                info!(
                    title = %preview(&item.direct_acquisition_name),
                    keyword,
                    "match"
                );
                matches.push(MatchedNotice {
                    notice: item.clone(),
                    matched_keyword: keyword.to_string(),
                });
            }
        }

        let done = match total {
            Some(t) if t > 0 => processed >= t,
            _ => page.items.len() < page_size,
        };
        if done {
            break;
        }
        page_index += 1;
    }

    info!(matched = matches.len(), %date, "day scrape finished");
    matches
}

/// One complete run against the live portal: today's date, load
/// existing ids, scrape, persist.
pub async fn run_once(config: &SyncConfig) -> Result<RunSummary> {
    let client = SeapClient::new(&config.client_config())?;
    run_once_with_source(config, &client).await
}

/// Same as [`run_once`] but with an injected source, for tests and
/// future alternate backends.
pub async fn run_once_with_source(
    config: &SyncConfig,
    source: &dyn AcquisitionSource,
) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let date = Local::now().date_naive();

    info!(%run_id, %date, "==== SEAP direct-acquisition watch starting ====");
    info!(keywords = %config.keywords.join(", "), "active keywords");

    let store = RecordStore::new(&config.output_file, &config.base_url);
    let mut existing_ids = store.load_existing_ids();
    let keywords = config.keyword_set();

    let matches = scrape_day(source, &keywords, date, config.page_size).await;

    let written = if matches.is_empty() {
        info!("no new matching acquisitions");
        0
    } else {
        let written = store
            .append(&matches, &mut existing_ids)
            .context("appending matched notices")?;
        info!(
            matched = matches.len(),
            written,
            output = %config.output_file.display(),
            "persisted results"
        );
        written
    };

    info!(%run_id, "==== run finished ====");
    Ok(RunSummary {
        run_id,
        date,
        matched: matches.len(),
        written,
    })
}

/// Stay resident and run the pipeline on the configured cron schedule
/// until Ctrl-C.
pub async fn watch(config: SyncConfig) -> Result<()> {
    let config = Arc::new(config);
    let scheduler = JobScheduler::new().await.context("creating scheduler")?;

    let cron = config.watch_cron.clone();
    let job_config = Arc::clone(&config);
    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let config = Arc::clone(&job_config);
        Box::pin(async move {
            if let Err(err) = run_once(&config).await {
                error!(%err, "scheduled run failed");
            }
        })
    })
    .with_context(|| format!("creating watch job for cron {cron}"))?;
    scheduler.add(job).await.context("adding watch job")?;
    scheduler.start().await.context("starting scheduler")?;

    info!(cron = %config.watch_cron, "watch mode active, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("watch mode stopped");
    Ok(())
}

fn preview(title: &str) -> String {
    const MAX: usize = 50;
    if title.chars().count() <= MAX {
        title.to_string()
    } else {
        let cut: String = title.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use seap_client::FetchError;
    use seap_core::{NoticeSummary, PageResult};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn notice(id: i64, no: &str, title: &str) -> NoticeSummary {
        NoticeSummary {
            direct_acquisition_id: id,
            public_notice_no: no.to_string(),
            direct_acquisition_name: title.to_string(),
            direct_acquisition_description: None,
            contracting_authority_name: None,
            cpv_code: None,
            closing_value: None,
            publication_date: "2026-08-29".to_string(),
            sys_acquisition_contract_type: None,
        }
    }

    /// Replays a fixed sequence of page responses and counts calls.
    struct ScriptedSource {
        pages: Mutex<VecDeque<Result<PageResult, FetchError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<PageResult, FetchError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AcquisitionSource for ScriptedSource {
        async fn fetch_page(&self, _query: &PageQuery) -> Result<PageResult, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(PageResult { items: vec![], total: 0 }))
        }
    }

    fn page_of(count: usize, offset: usize, total: u64) -> Result<PageResult, FetchError> {
        let items = (0..count)
            .map(|i| {
                let n = offset + i;
                notice(n as i64, &format!("DA{n}"), &format!("platforma gis {n}"))
            })
            .collect();
        Ok(PageResult { items, total })
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 29).unwrap()
    }

    #[tokio::test]
    async fn two_hundred_fifty_items_take_exactly_three_fetches() {
        let source = ScriptedSource::new(vec![
            page_of(100, 0, 250),
            page_of(100, 100, 250),
            page_of(50, 200, 250),
        ]);
        let matches = scrape_day(&source, &KeywordSet::default(), day(), 100).await;
        assert_eq!(source.calls(), 3);
        assert_eq!(matches.len(), 250);
    }

    #[tokio::test]
    async fn reported_total_stops_the_loop_even_on_full_pages() {
        // The server claims 200 items and keeps returning full pages;
        // the total wins over the short-page heuristic.
        let source = ScriptedSource::new(vec![
            page_of(100, 0, 200),
            page_of(100, 100, 200),
            page_of(100, 200, 200),
        ]);
        let matches = scrape_day(&source, &KeywordSet::default(), day(), 100).await;
        assert_eq!(source.calls(), 2);
        assert_eq!(matches.len(), 200);
    }

    #[tokio::test]
    async fn missing_total_falls_back_to_short_page_heuristic() {
        let source = ScriptedSource::new(vec![page_of(100, 0, 0), page_of(40, 100, 0)]);
        let matches = scrape_day(&source, &KeywordSet::default(), day(), 100).await;
        assert_eq!(source.calls(), 2);
        assert_eq!(matches.len(), 140);
    }

    #[tokio::test]
    async fn empty_day_returns_no_matches() {
        let source = ScriptedSource::new(vec![Ok(PageResult { items: vec![], total: 0 })]);
        let matches = scrape_day(&source, &KeywordSet::default(), day(), 100).await;
        assert_eq!(source.calls(), 1);
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_on_first_page_yields_empty_partial_result() {
        let source = ScriptedSource::new(vec![Err(FetchError::HttpStatus {
            status: 503,
            url: "https://e-licitatie.ro/list".to_string(),
        })]);
        let matches = scrape_day(&source, &KeywordSet::default(), day(), 100).await;
        assert!(matches.is_empty());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_mid_walk_keeps_earlier_matches() {
        let source = ScriptedSource::new(vec![
            page_of(100, 0, 300),
            Err(FetchError::HttpStatus {
                status: 500,
                url: "https://e-licitatie.ro/list".to_string(),
            }),
        ]);
        let matches = scrape_day(&source, &KeywordSet::default(), day(), 100).await;
        assert_eq!(matches.len(), 100);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn non_matching_items_are_filtered_out() {
        let items = vec![
            notice(1, "DA1", "Ortofotoplan zona centrala"),
            notice(2, "DA2", "achizitie mobilier birou"),
        ];
        let source = ScriptedSource::new(vec![Ok(PageResult { items, total: 2 })]);
        let matches = scrape_day(&source, &KeywordSet::default(), day(), 100).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_keyword, "ortofotoplan");
        assert_eq!(matches[0].notice.public_notice_no, "DA1");
    }

    fn test_config(dir: &std::path::Path) -> SyncConfig {
        SyncConfig {
            output_file: dir.join("results.csv"),
            log_file: dir.join("scraper.log"),
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn run_once_persists_matches_and_second_run_writes_nothing() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let page = || {
            Ok(PageResult {
                items: vec![
                    notice(11, "DA11", "Ortofotoplan zona centrala"),
                    notice(12, "DA12", "achizitie mobilier birou"),
                ],
                total: 2,
            })
        };

        let first = run_once_with_source(&config, &ScriptedSource::new(vec![page()]))
            .await
            .unwrap();
        assert_eq!(first.matched, 1);
        assert_eq!(first.written, 1);

        // Same notices again: the table already holds DA11.
        let second = run_once_with_source(&config, &ScriptedSource::new(vec![page()]))
            .await
            .unwrap();
        assert_eq!(second.matched, 1);
        assert_eq!(second.written, 0);

        let text = std::fs::read_to_string(&config.output_file).unwrap();
        let rows = seap_store::parse_rows(&text, seap_store::SEPARATOR);
        assert_eq!(rows.len(), 2); // header + one row, despite two runs
        assert_eq!(rows[1][8], "https://e-licitatie.ro/pub/direct-acquisition/view/11");
    }

    #[tokio::test]
    async fn run_once_with_no_matches_never_touches_the_table() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let source = ScriptedSource::new(vec![Ok(PageResult { items: vec![], total: 0 })]);
        let summary = run_once_with_source(&config, &source).await.unwrap();
        assert_eq!(summary.matched, 0);
        assert_eq!(summary.written, 0);
        assert!(!config.output_file.exists());
    }

    #[test]
    fn default_config_mirrors_the_original_job() {
        let config = SyncConfig::default();
        assert_eq!(config.base_url, "https://e-licitatie.ro");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.acquisition_state_id, 7);
        assert_eq!(
            config.keywords,
            vec!["rsv", "renns", "gis", "cartografiere", "ortofotoplan", "harta"]
        );
    }
}
