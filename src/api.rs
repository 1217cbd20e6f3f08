//! Client for the platform REST API.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::admin::{check_import_url, Resource, Validate};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::filter::Selection;
use crate::jobs::{JobStatus, JobStatusSource};
use crate::models::{
    Case, CaseChat, Evaluation, FilterOptions, ResultsPage, Section, Snapshot, Student,
};
use crate::results::ResultsQuery;

#[derive(Debug, Deserialize)]
struct SubmittedJob {
    job_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadedFile {
    pub id: Uuid,
    #[serde(default)]
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, token: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Sends the request and returns the raw body of a successful response.
    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<String, ApiError> {
        let response = builder.send().await.map_err(|source| ApiError::Transport {
            what: what.to_string(),
            source,
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| ApiError::Transport {
            what: what.to_string(),
            source,
        })?;

        if !status.is_success() {
            debug!(%status, what, "backend rejected request");
            return Err(ApiError::from_body(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<T, ApiError> {
        let body = self.send(builder, what).await?;
        serde_json::from_str(&body).map_err(|source| ApiError::Decode {
            what: what.to_string(),
            source,
        })
    }

    pub async fn sections(&self) -> Result<Vec<Section>, ApiError> {
        self.fetch(self.request(Method::GET, "sections"), "sections").await
    }

    pub async fn students(&self) -> Result<Vec<Student>, ApiError> {
        self.fetch(self.request(Method::GET, "students"), "students").await
    }

    pub async fn evaluations(&self) -> Result<Vec<Evaluation>, ApiError> {
        self.fetch(self.request(Method::GET, "evaluations"), "evaluations").await
    }

    pub async fn cases(&self) -> Result<Vec<Case>, ApiError> {
        self.fetch(self.request(Method::GET, "cases"), "cases").await
    }

    pub async fn case_chats(&self) -> Result<Vec<CaseChat>, ApiError> {
        self.fetch(self.request(Method::GET, "case-chats"), "case chats").await
    }

    /// Fetches every collection concurrently; any failure fails the whole snapshot.
    pub async fn snapshot(&self) -> Result<Snapshot, ApiError> {
        let (sections, students, evaluations, cases, chats) = tokio::try_join!(
            self.sections(),
            self.students(),
            self.evaluations(),
            self.cases(),
            self.case_chats(),
        )?;

        info!(
            sections = sections.len(),
            students = students.len(),
            evaluations = evaluations.len(),
            "loaded snapshot from API"
        );

        Ok(Snapshot {
            sections,
            students,
            evaluations,
            cases,
            chats,
        })
    }

    pub async fn filter_options(&self) -> Result<FilterOptions, ApiError> {
        self.fetch(self.request(Method::GET, "results/filter-options"), "filter options")
            .await
    }

    pub async fn results(&self, query: &ResultsQuery) -> Result<ResultsPage, ApiError> {
        let builder = self.request(Method::GET, "results").query(&results_params(query));
        self.fetch(builder, "results").await
    }

    pub async fn set_rechat(&self, evaluation_id: Uuid, allow: bool) -> Result<(), ApiError> {
        let builder = self
            .request(Method::PATCH, &format!("evaluations/{evaluation_id}"))
            .json(&json!({ "allow_rechat": allow }));
        self.send(builder, "evaluation").await?;
        info!(%evaluation_id, allow, "updated rechat flag");
        Ok(())
    }

    pub async fn create<T: Serialize + Validate>(
        &self,
        resource: Resource,
        form: &T,
    ) -> Result<Uuid, ApiError> {
        form.validate()?;

        #[derive(Deserialize)]
        struct Created {
            id: Uuid,
        }

        let builder = self.request(Method::POST, resource.path()).json(form);
        let created: Created = self.fetch(builder, resource.singular()).await?;
        info!(resource = resource.singular(), id = %created.id, "created");
        Ok(created.id)
    }

    pub async fn update<T: Serialize + Validate>(
        &self,
        resource: Resource,
        id: Uuid,
        form: &T,
    ) -> Result<(), ApiError> {
        form.validate()?;
        let builder = self
            .request(Method::PUT, &format!("{}/{id}", resource.path()))
            .json(form);
        self.send(builder, resource.singular()).await?;
        info!(resource = resource.singular(), %id, "updated");
        Ok(())
    }

    pub async fn delete(&self, resource: Resource, id: Uuid) -> Result<(), ApiError> {
        let builder = self.request(Method::DELETE, &format!("{}/{id}", resource.path()));
        self.send(builder, resource.singular()).await?;
        info!(resource = resource.singular(), %id, "deleted");
        Ok(())
    }

    pub async fn confirm_proprietary(&self, file_id: Uuid) -> Result<(), ApiError> {
        let path = format!("case-files/{file_id}/confirm-proprietary");
        let builder = self.request(Method::POST, &path);
        self.send(builder, "case file").await?;
        Ok(())
    }

    pub async fn reorder_files(&self, case_id: Uuid, file_ids: &[Uuid]) -> Result<(), ApiError> {
        let builder = self
            .request(Method::PUT, &format!("cases/{case_id}/file-order"))
            .json(&json!({ "file_ids": file_ids }));
        self.send(builder, "file order").await?;
        Ok(())
    }

    pub async fn upload_file(&self, case_id: Uuid, path: &Path) -> Result<UploadedFile, ApiError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::File {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);
        let builder = self
            .request(Method::POST, &format!("cases/{case_id}/files"))
            .multipart(form);
        self.fetch(builder, "file upload").await
    }

    pub async fn import_url(&self, case_id: Uuid, url: &str) -> Result<UploadedFile, ApiError> {
        check_import_url(url)?;
        let builder = self
            .request(Method::POST, &format!("cases/{case_id}/files/import"))
            .json(&json!({ "url": url.trim() }));
        self.fetch(builder, "file import").await
    }

    pub async fn submit_outline(&self, case_id: Uuid, file_id: Uuid) -> Result<String, ApiError> {
        let builder = self
            .request(Method::POST, &format!("cases/{case_id}/outline"))
            .json(&json!({ "file_id": file_id }));
        let job: SubmittedJob = self.fetch(builder, "outline job").await?;
        info!(job_id = %job.job_id, %case_id, "submitted outline job");
        Ok(job.job_id)
    }

    pub async fn outline_status(&self, job_id: &str) -> Result<JobStatus, ApiError> {
        self.fetch(self.request(Method::GET, &format!("outline-jobs/{job_id}")), "job status")
            .await
    }
}

impl JobStatusSource for ApiClient {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus, ApiError> {
        self.outline_status(job_id).await
    }
}

fn selection_param<T: Eq + std::hash::Hash + ToString>(selection: &Selection<T>) -> String {
    match selection {
        Selection::All => "all".to_string(),
        Selection::Only(_) => {
            let mut values: Vec<String> = selection
                .values()
                .into_iter()
                .map(ToString::to_string)
                .collect();
            values.sort();
            values.join(",")
        }
    }
}

pub fn results_params(query: &ResultsQuery) -> Vec<(&'static str, String)> {
    vec![
        ("sections", selection_param(&query.filter.sections)),
        ("cases", selection_param(&query.filter.cases)),
        ("statuses", selection_param(&query.filter.statuses)),
        ("limit", query.limit.to_string()),
        ("offset", query.offset.to_string()),
        ("sort", query.sort.to_string()),
        ("direction", query.direction.as_str().to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ResultsFilter;
    use crate::models::ResultStatus;
    use crate::results::{SortDirection, SortKey};

    #[test]
    fn results_params_encode_all_sentinel() {
        let params = results_params(&ResultsQuery::default());
        assert!(params.contains(&("sections", "all".to_string())));
        assert!(params.contains(&("statuses", "all".to_string())));
        assert!(params.contains(&("limit", "25".to_string())));
        assert!(params.contains(&("sort", "student_name".to_string())));
        assert!(params.contains(&("direction", "asc".to_string())));
    }

    #[test]
    fn results_params_join_selected_values() {
        let query = ResultsQuery {
            filter: ResultsFilter {
                statuses: Selection::from_values([
                    ResultStatus::InProgress,
                    ResultStatus::Completed,
                ]),
                ..ResultsFilter::default()
            },
            sort: SortKey::Score,
            direction: SortDirection::Desc,
            offset: 50,
            ..ResultsQuery::default()
        };
        let params = results_params(&query);
        assert!(params.contains(&("statuses", "completed,in_progress".to_string())));
        assert!(params.contains(&("offset", "50".to_string())));
        assert!(params.contains(&("direction", "desc".to_string())));
    }

    #[test]
    fn base_url_is_normalized() {
        let config = ApiConfig {
            base_url: "https://cases.example.edu/".to_string(),
            ..ApiConfig::default()
        };
        let client = ApiClient::new(&config, None).unwrap();
        assert_eq!(client.base_url, "https://cases.example.edu");
    }

    #[tokio::test]
    async fn validation_fails_before_any_request() {
        let config = ApiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..ApiConfig::default()
        };
        let client = ApiClient::new(&config, None).unwrap();
        let form = crate::admin::PromptForm {
            title: String::new(),
            body: "text".to_string(),
            description: None,
        };

        let err = client.create(Resource::Prompts, &form).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = client.import_url(Uuid::new_v4(), "ftp://files").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
