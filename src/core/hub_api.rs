use std::time::Duration;

use serde::Deserialize;

use crate::core::errors::{DownloadError, DownloadResult};
use crate::models::manifest::encode_segments;

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
}

pub fn repo_info_url(endpoint: &str, repository: &str, revision: &str) -> String {
    format!(
        "{}/api/models/{}/revision/{}",
        endpoint.trim_end_matches('/'),
        encode_segments(repository),
        urlencoding::encode(revision)
    )
}

/// Every file path the hub lists for `repository` at `revision`.
pub async fn list_repo_files(
    client: &reqwest::Client,
    endpoint: &str,
    repository: &str,
    revision: &str,
    timeout: Duration,
) -> DownloadResult<Vec<String>> {
    let url = repo_info_url(endpoint, repository, revision);
    tracing::debug!("[direct] listing {}", url);

    let fetch = async {
        let response = client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Ok(Err(status.as_u16()));
        }
        let info = response.json::<RepoInfo>().await?;
        Ok::<_, reqwest::Error>(Ok(info))
    };

    let info = match tokio::time::timeout(timeout, fetch).await {
        Ok(Ok(Ok(info))) => info,
        Ok(Ok(Err(status))) => {
            return Err(DownloadError::HttpStatus {
                file: repository.to_string(),
                status,
            })
        }
        Ok(Err(source)) => {
            return Err(DownloadError::Network {
                file: repository.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(DownloadError::Timeout {
                file: repository.to_string(),
                secs: timeout.as_secs(),
            })
        }
    };

    Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_url_encodes_revision() {
        assert_eq!(
            repo_info_url("https://huggingface.co/", "org/model", "refs/pr/1"),
            "https://huggingface.co/api/models/org/model/revision/refs%2Fpr%2F1"
        );
    }

    #[test]
    fn listing_without_siblings_is_empty() {
        let info: RepoInfo = serde_json::from_str(r#"{"id": "org/model"}"#).unwrap();
        assert!(info.siblings.is_empty());
        let info: RepoInfo =
            serde_json::from_str(r#"{"siblings": [{"rfilename": "config.json"}]}"#).unwrap();
        assert_eq!(info.siblings[0].rfilename, "config.json");
    }
}
