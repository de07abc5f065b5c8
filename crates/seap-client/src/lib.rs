//! HTTP client for the e-licitatie.ro public direct-acquisition API.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use seap_core::{NoticeDetail, PageResult};

pub const CRATE_NAME: &str = "seap-client";

pub const DEFAULT_BASE_URL: &str = "https://e-licitatie.ro";
pub const LIST_PATH: &str = "/api-pub/DirectAcquisitionCommon/GetDirectAcquisitionList/";
pub const DETAIL_PATH: &str = "/api-pub/DirectAcquisition/GetDirectAcquisitionView";

/// State id 7 filters the public list down to closed/published notices.
pub const DEFAULT_ACQUISITION_STATE_ID: i64 = 7;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub acquisition_state_id: i64,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            acquisition_state_id: DEFAULT_ACQUISITION_STATE_ID,
            timeout: Duration::from_secs(30),
            user_agent: "seap-watch/0.1".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// One list-page request. Both bounds are inclusive calendar dates;
/// a single day is `[date, date]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub page_index: usize,
    pub page_size: usize,
}

/// Seam between the scrape loop and the network, so the pipeline is
/// testable with scripted doubles.
#[async_trait]
pub trait AcquisitionSource: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<PageResult, FetchError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListRequest {
    sys_direct_acquisition_state_id: i64,
    publication_date_start: String,
    publication_date_end: String,
    page_size: usize,
    page_index: usize,
}

impl ListRequest {
    fn from_query(query: &PageQuery, state_id: i64) -> Self {
        Self {
            sys_direct_acquisition_state_id: state_id,
            publication_date_start: query.date_start.format("%Y-%m-%d").to_string(),
            publication_date_end: query.date_end.format("%Y-%m-%d").to_string(),
            page_size: query.page_size,
            page_index: query.page_index,
        }
    }
}

#[derive(Debug)]
pub struct SeapClient {
    http: reqwest::Client,
    base_url: String,
    acquisition_state_id: i64,
}

impl SeapClient {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            acquisition_state_id: config.acquisition_state_id,
        })
    }

    fn list_url(&self) -> String {
        format!("{}{}", self.base_url, LIST_PATH)
    }

    fn detail_url(&self, id: i64) -> String {
        format!("{}{}/{}", self.base_url, DETAIL_PATH, id)
    }

    /// Fetch the full record for one notice by numeric id. Not part of
    /// the default pipeline; kept for detail-level inspection.
    pub async fn fetch_detail(&self, id: i64) -> Result<NoticeDetail, FetchError> {
        let url = self.detail_url(id);
        info!(id, "requesting notice detail");
        let response = self.http.get(&url).send().await.map_err(|err| {
            error!(id, %err, "detail request failed");
            FetchError::Request(err)
        })?;
        let status = response.status();
        if !status.is_success() {
            error!(id, %status, "detail request rejected");
            return Err(status_error(status, response.url().to_string()));
        }
        Ok(response.json::<NoticeDetail>().await?)
    }
}

#[async_trait]
impl AcquisitionSource for SeapClient {
    async fn fetch_page(&self, query: &PageQuery) -> Result<PageResult, FetchError> {
        let url = self.list_url();
        let payload = ListRequest::from_query(query, self.acquisition_state_id);
        info!(
            date_start = %query.date_start,
            date_end = %query.date_end,
            page = query.page_index,
            "requesting list page"
        );
        let response = self.http.post(&url).json(&payload).send().await.map_err(|err| {
            error!(
                date_start = %query.date_start,
                date_end = %query.date_end,
                page = query.page_index,
                %err,
                "list request failed"
            );
            FetchError::Request(err)
        })?;
        let status = response.status();
        if !status.is_success() {
            error!(
                date_start = %query.date_start,
                date_end = %query.date_end,
                page = query.page_index,
                %status,
                "list request rejected"
            );
            return Err(status_error(status, response.url().to_string()));
        }
        Ok(response.json::<PageResult>().await?)
    }
}

fn status_error(status: StatusCode, url: String) -> FetchError {
    FetchError::HttpStatus {
        status: status.as_u16(),
        url,
    }
}
