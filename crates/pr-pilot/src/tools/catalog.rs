use reqwest::Method;
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};

/// A request against the PR backend, relative to its base URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiCall {
    /// `GET` for reads, `POST` for actions.
    pub method: Method,
    /// Path with percent-encoded segments, starting with `/`.
    pub path: String,
    /// JSON body, sent only with `POST`.
    pub body: Option<Value>,
}

impl ApiCall {
    fn get(path: String) -> Self {
        Self {
            method: Method::GET,
            path,
            body: None,
        }
    }

    fn post(path: String, body: Option<Value>) -> Self {
        Self {
            method: Method::POST,
            path,
            body,
        }
    }
}

/// Ids may come back from the model as numbers.
fn string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(de)? {
        Id::Text(id) => id,
        Id::Number(id) => id.to_string(),
    })
}

#[derive(Deserialize, JsonSchema)]
pub struct PrParameters {
    #[serde(rename = "prId", deserialize_with = "string_or_number")]
    #[schemars(with = "String")]
    #[schemars(description = "The internal ID of the pull request")]
    pr_id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct ReviewParameters {
    #[serde(rename = "prId", deserialize_with = "string_or_number")]
    #[schemars(with = "String")]
    #[schemars(description = "The internal ID of the pull request")]
    pr_id: String,
    #[schemars(
        description = "The decision, must be 'approve', 'request_changes', or 'comment'."
    )]
    decision: String,
    #[schemars(description = "Optional review comment.")]
    comment: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct SyncRepoParameters {
    #[serde(rename = "repoId", deserialize_with = "string_or_number")]
    #[schemars(with = "String")]
    #[schemars(description = "The internal ID of the repository")]
    repo_id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct RepoPrsParameters {
    #[serde(rename = "repoId", deserialize_with = "string_or_number")]
    #[schemars(with = "String")]
    #[schemars(
        description = "The internal ID of the repository (not GitHub's ID)"
    )]
    repo_id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct TrackRepoParameters {
    #[schemars(description = "The owner of the repository")]
    owner: String,
    #[schemars(description = "The name of the repository")]
    name: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct NoParameters {}

/// Capabilities of the PR backend offered to the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrTool {
    MergePr,
    ClosePr,
    ReopenPr,
    SubmitReview,
    ListUserRepos,
    SyncRepo,
    ListTrackedRepos,
    TrackRepo,
    ListPrsForRepo,
    GetPrDetails,
    GetPrDiff,
    CheckConflicts,
}

impl PrTool {
    /// Every tool, in the order they are declared to the model.
    pub const ALL: [PrTool; 12] = [
        PrTool::MergePr,
        PrTool::ClosePr,
        PrTool::ReopenPr,
        PrTool::SubmitReview,
        PrTool::ListUserRepos,
        PrTool::SyncRepo,
        PrTool::ListTrackedRepos,
        PrTool::TrackRepo,
        PrTool::ListPrsForRepo,
        PrTool::GetPrDetails,
        PrTool::GetPrDiff,
        PrTool::CheckConflicts,
    ];

    /// Returns the name the model calls the tool by.
    pub fn name(self) -> &'static str {
        match self {
            PrTool::MergePr => "merge_pr",
            PrTool::ClosePr => "close_pr",
            PrTool::ReopenPr => "reopen_pr",
            PrTool::SubmitReview => "submit_review",
            PrTool::ListUserRepos => "list_user_repos",
            PrTool::SyncRepo => "sync_repo",
            PrTool::ListTrackedRepos => "list_tracked_repos",
            PrTool::TrackRepo => "track_repo",
            PrTool::ListPrsForRepo => "list_prs_for_repo",
            PrTool::GetPrDetails => "get_pr_details",
            PrTool::GetPrDiff => "get_pr_diff",
            PrTool::CheckConflicts => "check_conflicts",
        }
    }

    /// Returns the description declared to the model.
    pub fn description(self) -> &'static str {
        match self {
            PrTool::MergePr => "Merge a pull request",
            PrTool::ClosePr => "Close a pull request",
            PrTool::ReopenPr => "Reopen a closed pull request",
            PrTool::SubmitReview => "Submit a review on a pull request",
            PrTool::ListUserRepos => {
                "List all repositories the user has access to on GitHub"
            }
            PrTool::SyncRepo => {
                "Syncs a tracked repository to fetch the latest pull \
                 requests (including closed ones) from GitHub into the system."
            }
            PrTool::ListTrackedRepos => {
                "List all repositories currently tracked in the PR Tracker \
                 system"
            }
            PrTool::TrackRepo => {
                "Start tracking a GitHub repository in the PR Tracker system"
            }
            PrTool::ListPrsForRepo => {
                "List all pull requests for a specific tracked repository"
            }
            PrTool::GetPrDetails => {
                "Get general details about a specific pull request in the \
                 system"
            }
            PrTool::GetPrDiff => {
                "Get the raw diff / changes/ files for a pull request"
            }
            PrTool::CheckConflicts => {
                "Check if a pull request has merge conflicts"
            }
        }
    }

    /// Returns the JSON schema of the arguments, always an object schema.
    pub fn parameter_schema(self) -> Value {
        let schema = match self {
            PrTool::MergePr
            | PrTool::ClosePr
            | PrTool::ReopenPr
            | PrTool::GetPrDetails
            | PrTool::GetPrDiff
            | PrTool::CheckConflicts => schema_for!(PrParameters),
            PrTool::SubmitReview => schema_for!(ReviewParameters),
            PrTool::SyncRepo => schema_for!(SyncRepoParameters),
            PrTool::ListPrsForRepo => schema_for!(RepoPrsParameters),
            PrTool::TrackRepo => schema_for!(TrackRepoParameters),
            PrTool::ListUserRepos | PrTool::ListTrackedRepos => {
                schema_for!(NoParameters)
            }
        };
        schema.to_value()
    }

    /// Maps decoded arguments to the backend request for this tool.
    pub fn resolve(
        self,
        arguments: Value,
    ) -> Result<ApiCall, serde_json::Error> {
        let call = match self {
            PrTool::MergePr => pr_action(arguments, "merge")?,
            PrTool::ClosePr => pr_action(arguments, "close")?,
            PrTool::ReopenPr => pr_action(arguments, "reopen")?,
            PrTool::SubmitReview => {
                let params: ReviewParameters = parse(arguments)?;
                ApiCall::post(
                    format!("/api/prs/{}/reviews", encode(&params.pr_id)),
                    Some(json!({
                        "decision": params.decision,
                        "comment": params.comment.unwrap_or_default(),
                    })),
                )
            }
            PrTool::ListUserRepos => {
                parse::<NoParameters>(arguments)?;
                ApiCall::get("/api/repos".to_owned())
            }
            PrTool::ListTrackedRepos => {
                parse::<NoParameters>(arguments)?;
                ApiCall::get("/api/repos/tracked".to_owned())
            }
            PrTool::SyncRepo => {
                let params: SyncRepoParameters = parse(arguments)?;
                let repo_id = encode(&params.repo_id);
                ApiCall::post(format!("/api/repos/{repo_id}/sync"), None)
            }
            PrTool::TrackRepo => {
                let params: TrackRepoParameters = parse(arguments)?;
                ApiCall::post(
                    "/api/repos/track".to_owned(),
                    Some(json!({ "owner": params.owner, "name": params.name })),
                )
            }
            PrTool::ListPrsForRepo => {
                let params: RepoPrsParameters = parse(arguments)?;
                let repo_id = encode(&params.repo_id);
                ApiCall::get(format!("/api/repos/{repo_id}/prs"))
            }
            PrTool::GetPrDetails => {
                let params: PrParameters = parse(arguments)?;
                ApiCall::get(format!("/api/prs/{}", encode(&params.pr_id)))
            }
            PrTool::GetPrDiff => {
                let params: PrParameters = parse(arguments)?;
                let pr_id = encode(&params.pr_id);
                ApiCall::get(format!("/api/prs/{pr_id}/diff"))
            }
            PrTool::CheckConflicts => {
                let params: PrParameters = parse(arguments)?;
                let pr_id = encode(&params.pr_id);
                ApiCall::get(format!("/api/prs/{pr_id}/conflicts"))
            }
        };
        Ok(call)
    }
}

fn pr_action(
    arguments: Value,
    action: &str,
) -> Result<ApiCall, serde_json::Error> {
    let params: PrParameters = parse(arguments)?;
    Ok(ApiCall::post(
        format!("/api/prs/{}/{action}", encode(&params.pr_id)),
        None,
    ))
}

#[inline]
fn parse<T: DeserializeOwned>(
    arguments: Value,
) -> Result<T, serde_json::Error> {
    serde_json::from_value(arguments)
}

#[inline]
fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}
