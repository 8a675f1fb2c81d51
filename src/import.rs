//! Bulk import: pasted text or a text file in, one batched submission out,
//! with a per-URL failure report instead of all-or-nothing semantics.

use std::path::Path;
use std::sync::Arc;

use crate::api::TaskApi;
use crate::error::Result;
use crate::models::BulkImportRequest;

/// Structural check for video-watch URLs. Reachability is the backend's problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRules {
    /// Accepted anywhere in the URL, e.g. `example.org/watch`.
    pub marker: String,
    /// Accepted as the leading path of a relative URL.
    pub path_prefix: String,
}

impl Default for ImportRules {
    fn default() -> Self {
        Self {
            marker: "/watch".to_string(),
            path_prefix: "/watch".to_string(),
        }
    }
}

impl ImportRules {
    pub fn is_watch_url(&self, candidate: &str) -> bool {
        candidate.contains(&self.marker) || candidate.starts_with(&self.path_prefix)
    }
}

/// Splits raw input into candidate URLs: one per line, trimmed, blanks dropped.
/// Nothing else is normalized and duplicates are kept.
pub fn parse_candidates(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

pub fn partition(candidates: Vec<String>, rules: &ImportRules) -> Partition {
    let (valid, invalid): (Vec<String>, Vec<String>) = candidates.into_iter().partition(|url| rules.is_watch_url(url));
    Partition { valid, invalid }
}

/// Aggregated outcome of one import. `success_count + failed_count` always equals
/// the number of candidate URLs, and `failed_urls` lists local rejections first,
/// then backend rejections, verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkImportReport {
    pub task_ids: Vec<String>,
    pub success_count: usize,
    pub failed_count: usize,
    pub failed_urls: Vec<String>,
    /// Set when the batch request itself never got a per-item answer.
    pub submission_error: Option<String>,
}

pub struct BulkImporter<A: ?Sized> {
    api: Arc<A>,
    rules: ImportRules,
}

impl<A: TaskApi + ?Sized> BulkImporter<A> {
    pub fn new(api: Arc<A>, rules: ImportRules) -> Self {
        Self { api, rules }
    }

    pub async fn import_file(&self, path: impl AsRef<Path>, resolution: &str) -> Result<BulkImportReport> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(self.import_text(&text, resolution).await)
    }

    /// Never fails: invalid lines and backend rejections both end up in the report.
    pub async fn import_text(&self, text: &str, resolution: &str) -> BulkImportReport {
        let Partition { valid, invalid } = partition(parse_candidates(text), &self.rules);
        for url in &invalid {
            tracing::warn!("Invalid video URL: {}", url);
        }

        let mut report = BulkImportReport {
            failed_count: invalid.len(),
            failed_urls: invalid,
            ..Default::default()
        };
        if valid.is_empty() {
            tracing::info!("Bulk import: nothing valid to submit ({} rejected)", report.failed_count);
            return report;
        }

        let request = BulkImportRequest {
            urls: valid,
            resolution: resolution.to_string(),
        };
        match self.api.submit_bulk_urls(&request).await {
            Ok(result) => {
                report.task_ids = result.task_ids;
                report.success_count = result.success_count;
                report.failed_count += result.failed_count;
                report.failed_urls.extend(result.failed_urls);
            }
            Err(e) => {
                tracing::error!("Bulk import submission failed: {}", e);
                report.failed_count += request.urls.len();
                report.failed_urls.extend(request.urls);
                report.submission_error = Some(e.to_string());
            }
        }

        tracing::info!(
            "Bulk import: {} succeeded, {} failed",
            report.success_count,
            report.failed_count
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockApi;
    use std::io::Write;

    #[test]
    fn parsing_trims_and_drops_blank_lines_only() {
        let text = "  https://site/watch?v=1  \r\n\n\t\nHTTPS://Site/Watch?v=2/\nhttps://site/watch?v=1\n";
        assert_eq!(
            parse_candidates(text),
            vec![
                "https://site/watch?v=1",
                "HTTPS://Site/Watch?v=2/",
                "https://site/watch?v=1",
            ]
        );
    }

    #[test]
    fn validation_is_structural() {
        let rules = ImportRules::default();
        assert!(rules.is_watch_url("https://site/watch?v=1"));
        assert!(rules.is_watch_url("/watch?v=9"));
        assert!(rules.is_watch_url("https://nowhere.invalid/watch"));
        assert!(!rules.is_watch_url("not-a-url"));
        assert!(!rules.is_watch_url("https://site/search?q=watch"));
    }

    #[test]
    fn host_specific_marker_still_accepts_relative_paths() {
        let rules = ImportRules {
            marker: "hanime1.me/watch".to_string(),
            path_prefix: "/watch".to_string(),
        };
        assert!(rules.is_watch_url("https://hanime1.me/watch?v=1"));
        assert!(rules.is_watch_url("/watch?v=1"));
        assert!(!rules.is_watch_url("https://other.site/watch?v=1"));
    }

    #[test]
    fn partition_keeps_input_order() {
        let candidates = parse_candidates("https://site/watch?v=1\nnot-a-url\nhttps://site/watch?v=2");
        let parts = partition(candidates, &ImportRules::default());
        assert_eq!(parts.valid, vec!["https://site/watch?v=1", "https://site/watch?v=2"]);
        assert_eq!(parts.invalid, vec!["not-a-url"]);
    }

    #[tokio::test]
    async fn aggregates_local_and_backend_failures() {
        let api = Arc::new(MockApi::default());
        api.rejected_urls.lock().unwrap().push("https://site/watch?v=2".to_string());
        let importer = BulkImporter::new(api.clone(), ImportRules::default());

        let report = importer
            .import_text("https://site/watch?v=1\nnot-a-url\nhttps://site/watch?v=2", "720p")
            .await;

        assert_eq!(report.success_count, 1);
        assert_eq!(report.failed_count, 2);
        assert_eq!(report.failed_urls, vec!["not-a-url", "https://site/watch?v=2"]);
        assert_eq!(report.task_ids.len(), 1);
        assert_eq!(report.submission_error, None);

        let sent = api.bulk_requests.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].urls, vec!["https://site/watch?v=1", "https://site/watch?v=2"]);
        assert_eq!(sent[0].resolution, "720p");
    }

    #[tokio::test]
    async fn duplicates_are_submitted_twice() {
        let api = Arc::new(MockApi::default());
        let importer = BulkImporter::new(api.clone(), ImportRules::default());

        let report = importer.import_text("/watch?v=1\n/watch?v=1", "1080p").await;

        assert_eq!(report.success_count, 2);
        assert_eq!(api.bulk_requests.lock().unwrap()[0].urls.len(), 2);
    }

    #[tokio::test]
    async fn all_invalid_input_never_reaches_the_backend() {
        let api = Arc::new(MockApi::default());
        let importer = BulkImporter::new(api.clone(), ImportRules::default());

        let report = importer.import_text("foo\n\nbar\n", "720p").await;

        assert_eq!(report.success_count, 0);
        assert_eq!(report.failed_count, 2);
        assert_eq!(report.failed_urls, vec!["foo", "bar"]);
        assert!(api.bulk_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_submission_reports_every_valid_url() {
        let api = Arc::new(MockApi::default());
        *api.fail_bulk.lock().unwrap() = true;
        let importer = BulkImporter::new(api, ImportRules::default());

        let report = importer.import_text("bad\n/watch?v=1\n/watch?v=2", "720p").await;

        assert_eq!(report.success_count, 0);
        assert_eq!(report.failed_count, 3);
        assert_eq!(report.failed_urls, vec!["bad", "/watch?v=1", "/watch?v=2"]);
        assert!(report.submission_error.is_some());
    }

    #[tokio::test]
    async fn imports_from_a_text_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "https://site/watch?v=7").unwrap();
        writeln!(file, "   ").unwrap();
        writeln!(file, "nope").unwrap();

        let importer = BulkImporter::new(Arc::new(MockApi::default()), ImportRules::default());
        let report = importer.import_file(file.path(), "480p").await.unwrap();

        assert_eq!(report.success_count, 1);
        assert_eq!(report.failed_urls, vec!["nope"]);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let importer = BulkImporter::new(Arc::new(MockApi::default()), ImportRules::default());
        assert!(importer.import_file("/definitely/not/here.txt", "720p").await.is_err());
    }
}
