//! Azure DevOps Server (TFS) REST adapter for [`HistorySource`].

use tokio_util::sync::CancellationToken;

use super::{
    Change, ChangesetMeta, ChangeTypes, HistorySource, Item, Label, MergeSource,
    SourceError,
};

const API_VERSION: &str = "6.0";
const PAGE_SIZE: u32 = 256;
const RETRY_ATTEMPTS: u32 = 4;
const RETRY_BASE_DELAY: std::time::Duration = std::time::Duration::from_millis(500);
/// Per-request timeout; content downloads of large items dominate.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

pub struct TfsClient {
    http: reqwest::Client,
    collection_url: String,
    pat: Option<String>,
    cancel: CancellationToken,
}

impl TfsClient {
    pub fn new(
        collection_url: &str,
        pat: Option<String>,
        cancel: CancellationToken,
    ) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SourceError::new(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            collection_url: collection_url.trim_end_matches('/').to_owned(),
            pat,
            cancel,
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/_apis/tfvc/{route}", self.collection_url)
    }

    async fn get(
        &self,
        route: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, SourceError> {
        let url = self.url(route);
        let mut attempt = 0;
        loop {
            let mut request = self
                .http
                .get(&url)
                .query(&[("api-version", API_VERSION)])
                .query(query);
            if let Some(ref pat) = self.pat {
                request = request.basic_auth("", Some(pat));
            }

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(SourceError::new("canceled"));
                }
                r = request.send() => r,
            };

            let retryable = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == reqwest::StatusCode::NON_AUTHORITATIVE_INFORMATION
                        || status == reqwest::StatusCode::UNAUTHORIZED
                    {
                        return Err(SourceError::new(format!(
                            "GET {url} was rejected ({status}); check the personal access token",
                        )));
                    }
                    let transient = status.is_server_error()
                        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                        || status == reqwest::StatusCode::REQUEST_TIMEOUT;
                    if !transient {
                        return Err(SourceError::new(format!("GET {url} failed: {status}")));
                    }
                    format!("{status}")
                }
                Err(e) => format!("{e}"),
            };

            attempt += 1;
            if attempt >= RETRY_ATTEMPTS {
                return Err(SourceError::new(format!(
                    "GET {url} failed after {attempt} attempts: {retryable}",
                )));
            }
            let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
            tracing::warn!("GET {url} failed ({retryable}), retrying in {delay:?}");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(SourceError::new("canceled"));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        route: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let response = self.get(route, query).await?;
        let url = response.url().clone();
        response
            .json()
            .await
            .map_err(|e| SourceError::new(format!("failed to decode {url}: {e}")))
    }
}

#[async_trait::async_trait]
impl HistorySource for TfsClient {
    async fn list_changesets(
        &self,
        root_path: &str,
        min: Option<u32>,
        max: Option<u32>,
    ) -> Result<Vec<ChangesetMeta>, SourceError> {
        let mut metas = Vec::new();
        let mut skip = 0u32;
        loop {
            let mut query = vec![
                ("searchCriteria.itemPath", root_path.to_owned()),
                ("$top", PAGE_SIZE.to_string()),
                ("$skip", skip.to_string()),
            ];
            if let Some(min) = min {
                query.push(("searchCriteria.fromId", min.to_string()));
            }
            if let Some(max) = max {
                query.push(("searchCriteria.toId", max.to_string()));
            }

            let page: ListResponse<RestChangeset> =
                self.get_json("changesets", &query).await?;
            let page_len = page.value.len();
            metas.extend(page.value.into_iter().map(RestChangeset::into_meta));
            if page_len < PAGE_SIZE as usize {
                break;
            }
            skip += PAGE_SIZE;
        }

        // the service lists newest first
        metas.sort_by_key(|meta| meta.changeset_id);
        Ok(metas)
    }

    async fn list_changeset_changes(
        &self,
        changeset_id: u32,
    ) -> Result<Vec<Change>, SourceError> {
        let mut changes = Vec::new();
        let mut skip = 0u32;
        loop {
            let query = vec![
                ("$top", PAGE_SIZE.to_string()),
                ("$skip", skip.to_string()),
            ];
            let page: ListResponse<RestChange> = self
                .get_json(&format!("changesets/{changeset_id}/changes"), &query)
                .await?;
            let page_len = page.value.len();
            for change in page.value {
                changes.push(change.into_change());
            }
            if page_len < PAGE_SIZE as usize {
                break;
            }
            skip += PAGE_SIZE;
        }
        Ok(changes)
    }

    async fn list_items(
        &self,
        scope_paths: &[String],
        changeset: u32,
    ) -> Result<Vec<Item>, SourceError> {
        let mut items = Vec::new();
        for scope_path in scope_paths {
            let query = vec![
                ("scopePath", scope_path.clone()),
                ("recursionLevel", "full".to_owned()),
                ("versionDescriptor.versionType", "changeset".to_owned()),
                ("versionDescriptor.version", changeset.to_string()),
            ];
            let listing: ListResponse<RestItem> = self.get_json("items", &query).await?;
            items.extend(listing.value.into_iter().map(RestItem::into_item));
        }
        Ok(items)
    }

    async fn fetch_content(
        &self,
        path: &str,
        changeset: u32,
    ) -> Result<Vec<u8>, SourceError> {
        let query = vec![
            ("path", path.to_owned()),
            ("versionDescriptor.versionType", "changeset".to_owned()),
            ("versionDescriptor.version", changeset.to_string()),
            ("download", "true".to_owned()),
        ];
        let response = self.get("items", &query).await?;
        let bytes = response.bytes().await.map_err(|e| {
            SourceError::new(format!("failed to download \"{path}\"@{changeset}: {e}"))
        })?;
        Ok(bytes.to_vec())
    }

    async fn list_labels(&self, root_path: &str) -> Result<Vec<Label>, SourceError> {
        let mut labels = Vec::new();
        let mut skip = 0u32;
        loop {
            let query = vec![
                ("itemLabelFilter.labelScope", root_path.to_owned()),
                ("$top", PAGE_SIZE.to_string()),
                ("$skip", skip.to_string()),
            ];
            let page: ListResponse<RestLabel> = self.get_json("labels", &query).await?;
            let page_len = page.value.len();
            labels.extend(page.value.into_iter().map(RestLabel::into_label));
            if page_len < PAGE_SIZE as usize {
                break;
            }
            skip += PAGE_SIZE;
        }
        Ok(labels)
    }

    async fn label_items(&self, label: &Label) -> Result<Option<u32>, SourceError> {
        let mut max_version = None;
        let mut skip = 0u32;
        loop {
            let query = vec![
                ("$top", PAGE_SIZE.to_string()),
                ("$skip", skip.to_string()),
            ];
            let page: ListResponse<RestItem> = self
                .get_json(&format!("labels/{}/items", label.id), &query)
                .await?;
            let page_len = page.value.len();
            for item in page.value {
                let version = item.version.unwrap_or(0);
                if max_version.is_none_or(|max| version > max) {
                    max_version = Some(version);
                }
            }
            if page_len < PAGE_SIZE as usize {
                break;
            }
            skip += PAGE_SIZE;
        }
        Ok(max_version)
    }
}

#[derive(serde::Deserialize)]
struct ListResponse<T> {
    value: Vec<T>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestIdentity {
    display_name: Option<String>,
    unique_name: Option<String>,
}

impl RestIdentity {
    fn into_name(self) -> Option<String> {
        self.unique_name.or(self.display_name)
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestChangeset {
    changeset_id: u32,
    author: Option<RestIdentity>,
    checked_in_by: Option<RestIdentity>,
    created_date: chrono::DateTime<chrono::Utc>,
    comment: Option<String>,
}

impl RestChangeset {
    fn into_meta(self) -> ChangesetMeta {
        ChangesetMeta {
            changeset_id: self.changeset_id,
            author: self
                .author
                .and_then(RestIdentity::into_name)
                .unwrap_or_default(),
            checked_in_by: self.checked_in_by.and_then(RestIdentity::into_name),
            created_date: self.created_date,
            comment: self.comment,
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestItem {
    path: String,
    version: Option<u32>,
    size: Option<u64>,
    is_folder: Option<bool>,
    is_branch: Option<bool>,
    is_sym_link: Option<bool>,
    hash_value: Option<String>,
}

impl RestItem {
    fn into_item(self) -> Item {
        Item {
            path: self.path,
            changeset_version: self.version.unwrap_or(0),
            is_folder: self.is_folder.unwrap_or(false),
            is_branch: self.is_branch.unwrap_or(false),
            is_symbolic_link: self.is_sym_link.unwrap_or(false),
            size: self.size.unwrap_or(0),
            hash: self.hash_value,
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestChange {
    item: RestItem,
    change_type: String,
    source_server_item: Option<String>,
    merge_sources: Option<Vec<RestMergeSource>>,
}

impl RestChange {
    fn into_change(self) -> Change {
        Change {
            item: self.item.into_item(),
            change_type: ChangeTypes::parse_list(&self.change_type),
            source_server_item: self.source_server_item,
            merge_sources: self
                .merge_sources
                .unwrap_or_default()
                .into_iter()
                .map(|source| MergeSource {
                    server_item: source.server_item,
                    version_to: source.version_to,
                    is_rename: source.is_rename.unwrap_or(false),
                })
                .collect(),
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestMergeSource {
    server_item: String,
    version_to: u32,
    is_rename: Option<bool>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestLabel {
    id: u64,
    name: String,
    owner: Option<RestIdentity>,
    description: Option<String>,
}

impl RestLabel {
    fn into_label(self) -> Label {
        Label {
            id: self.id,
            name: self.name,
            owner: self.owner.and_then(RestIdentity::into_name),
            description: self.description,
        }
    }
}
