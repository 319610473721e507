//! The Differential review tool, reached through `arc call-conduit`.
//!
//! Every conduit method runs as its own `arc` process with the JSON request
//! on stdin. A call that does not finish within the configured timeout is
//! killed and reported as [`Error::Timeout`], which aborts the pass.

pub mod types;

use crate::mirror::overlap::parse_quote_header;
use crate::mirror::remote::{
    COMMIT_HASH_KIND, GeneralComment, InlineComment, RemoteApi, RemoteDiff, RemoteRevision, Reply,
    RevisionFields,
};
use crate::models::{Comment, Location, Range};
use crate::storage::Repo;
use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::Duration;
use types::*;
use wait_timeout::ChildExt;

/// Status filter for open revisions.
const STATUS_OPEN: &str = "status-open";

/// Client for the conduit API via the `arc` command.
#[derive(Debug, Clone)]
pub struct Arcanist {
    command: String,
    timeout: Duration,
    repo_dir_prefix: String,
}

impl Arcanist {
    pub fn new(command: impl Into<String>, timeout: Duration, repo_dir_prefix: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout,
            repo_dir_prefix: repo_dir_prefix.into(),
        }
    }

    /// Run one conduit method and decode its envelope.
    pub fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<Reply<Option<Resp>>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let input = serde_json::to_string(request)?;
        tracing::debug!(%method, request = %input, "conduit request");
        let output = self.run(method, input)?;
        tracing::debug!(%method, response = %output, "conduit response");
        parse_envelope(method, &output)
    }

    /// Run `arc call-conduit <method>` and return its stdout.
    fn run(&self, method: &str, input: String) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(["call-conduit", method])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Other(format!("Failed to run {}: {}", self.command, e)))?;

        // Feed stdin and drain both pipes concurrently so a chatty child never blocks.
        let stdin = child.stdin.take();
        let writer = std::thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(input.as_bytes());
            }
        });
        let stdout = child.stdout.take();
        let stdout_reader = std::thread::spawn(move || read_pipe(stdout));
        let stderr = child.stderr.take();
        let stderr_reader = std::thread::spawn(move || read_pipe(stderr));

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::error!(%method, "conduit call timed out, killed");
                return Err(Error::Timeout {
                    method: method.to_string(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let _ = writer.join();
        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        if !status.success() && stdout.trim().is_empty() {
            return Err(Error::Conduit {
                method: method.to_string(),
                code: status.to_string(),
                message: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }

    /// Run a method whose response must be present on success.
    fn call_required<Req, Resp>(&self, method: &str, request: &Req) -> Result<Reply<Resp>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        match self.call::<Req, Resp>(method, request)? {
            Reply::Success(Some(value)) => Ok(Reply::Success(value)),
            Reply::Success(None) => Err(Error::MalformedResponse {
                method: method.to_string(),
                reason: "missing response".to_string(),
            }),
            Reply::Benign(message) => Ok(Reply::Benign(message)),
            Reply::Failed { code, message } => Ok(Reply::Failed { code, message }),
        }
    }

    fn query(&self, request: &QueryRequest) -> Result<Vec<RemoteRevision>> {
        let reviews: Vec<DifferentialReview> = self
            .call("differential.query", request)?
            .into_result("differential.query")?
            .unwrap_or_default();
        Ok(reviews.into_iter().map(RemoteRevision::from).collect())
    }

    fn query_users(&self, request: &UserQueryRequest) -> Result<Vec<RemoteUser>> {
        let users: Option<Option<Vec<RemoteUser>>> =
            self.call("user.query", request)?.log_failure("user.query");
        Ok(users.flatten().unwrap_or_default())
    }

    /// Callsign of a repository hosted under the review tool's repository directory.
    fn callsign(&self, repo: &dyn Repo) -> Option<String> {
        let path = repo.path().to_string_lossy();
        path.strip_prefix(&self.repo_dir_prefix)
            .map(|rest| rest.trim_end_matches('/').to_string())
            .filter(|callsign| !callsign.is_empty() && !callsign.contains('/'))
    }

    /// Translate one remote comment body into a local comment.
    ///
    /// Bodies that quote a local comment carry the original timestamp and
    /// resolution state; those win over the remote metadata.
    fn to_local_comment(
        author: &str,
        date: &str,
        body: &str,
        resolved: Option<bool>,
        location: Option<Location>,
    ) -> Comment {
        let (timestamp, resolved) = match parse_quote_header(body) {
            Some(header) => (header.timestamp, header.resolved),
            None => (date.to_string(), resolved),
        };
        Comment {
            timestamp,
            author: author.to_string(),
            location,
            description: body.to_string(),
            resolved,
            ..Default::default()
        }
    }
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf);
    }
    buf
}

/// Decode the conduit envelope printed by `arc call-conduit`.
///
/// Explicit errors become [`Reply::Failed`], or [`Reply::Benign`] when the
/// remote only reports that a revision is already closed. Anything that
/// cannot be decoded is an [`Error::MalformedResponse`].
pub fn parse_envelope<T: DeserializeOwned>(method: &str, output: &str) -> Result<Reply<Option<T>>> {
    let malformed = |reason: String| Error::MalformedResponse {
        method: method.to_string(),
        reason,
    };
    let envelope: Envelope =
        serde_json::from_str(output.trim()).map_err(|e| malformed(e.to_string()))?;

    if let Some(code) = envelope.error.filter(|c| !c.is_empty()) {
        let message = envelope.error_message.unwrap_or_default();
        if message.to_lowercase().contains("already closed") {
            return Ok(Reply::Benign(message));
        }
        return Ok(Reply::Failed { code, message });
    }
    if envelope.response.is_null() {
        return Ok(Reply::Success(None));
    }
    let response = serde_json::from_value(envelope.response).map_err(|e| malformed(e.to_string()))?;
    Ok(Reply::Success(Some(response)))
}

/// Conduit wants numeric ids in several places.
fn numeric_id(method: &str, id: &str) -> Result<u64> {
    id.parse().map_err(|_| Error::MalformedResponse {
        method: method.to_string(),
        reason: format!("non-numeric id '{}'", id),
    })
}

/// Decode a response keyed by id; conduit sends an empty list for no entries.
fn object_map<T: DeserializeOwned>(
    method: &str,
    response: Option<serde_json::Value>,
) -> Result<BTreeMap<String, T>> {
    match response {
        Some(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(key, value)| serde_json::from_value(value).map(|v| (key, v)))
            .collect::<std::result::Result<BTreeMap<String, T>, _>>()
            .map_err(|e| Error::MalformedResponse {
                method: method.to_string(),
                reason: e.to_string(),
            }),
        Some(serde_json::Value::Array(items)) if items.is_empty() => Ok(BTreeMap::new()),
        None | Some(serde_json::Value::Null) => Ok(BTreeMap::new()),
        Some(other) => Err(Error::MalformedResponse {
            method: method.to_string(),
            reason: format!("expected an object, got {}", other),
        }),
    }
}

/// Diff properties as a map; conduit sends an empty list when there are none.
fn properties_map(value: serde_json::Value) -> BTreeMap<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    }
}

impl RemoteApi for Arcanist {
    fn query_revisions(&self, commit: &str) -> Result<Vec<RemoteRevision>> {
        self.query(&QueryRequest {
            commit_hashes: vec![[COMMIT_HASH_KIND.to_string(), commit.to_string()]],
            ..Default::default()
        })
    }

    fn query_open_revisions(&self) -> Result<Vec<RemoteRevision>> {
        self.query(&QueryRequest {
            status: Some(STATUS_OPEN.to_string()),
            ..Default::default()
        })
    }

    fn create_diff(&self, repo: &dyn Repo, base: &str, head: &str) -> Result<Option<RemoteDiff>> {
        let patch = repo.diff(base, head)?;
        if patch.trim().is_empty() {
            return Ok(None);
        }
        let method = "differential.createrawdiff";
        let created: Option<CreateRawDiffResponse> = self
            .call(method, &CreateRawDiffRequest { diff: patch })?
            .into_result(method)?;
        let Some(created) = created else {
            return Ok(None);
        };

        let mut commits = BTreeMap::new();
        for commit in repo.list_commits(base, head)? {
            let details = repo.commit_details(&commit)?;
            commits.insert(
                commit,
                LocalCommit {
                    commit: details.commit,
                    parents: details.parents,
                    time: details.time,
                    author: details.author,
                    summary: details.summary,
                },
            );
        }
        let value = serde_json::to_value(&commits)?;
        self.set_diff_property(&created.id, LOCAL_COMMITS_PROPERTY, &value.to_string())?
            .into_result("differential.setdiffproperty")?;
        tracing::debug!(diff = %created.id, uri = %created.uri, "created diff");

        Ok(Some(RemoteDiff {
            id: created.id,
            last_commit: Some(head.to_string()),
            properties: BTreeMap::from([(LOCAL_COMMITS_PROPERTY.to_string(), value)]),
        }))
    }

    fn create_revision(&self, diff_id: &str, fields: &RevisionFields) -> Result<Reply<String>> {
        let method = "differential.createrevision";
        let request = CreateRevisionRequest {
            diffid: numeric_id(method, diff_id)?,
            fields: RevisionFieldsRequest {
                title: fields.title.clone(),
                summary: fields.summary.clone(),
                reviewers: fields.reviewers.clone(),
                ccs: fields.ccs.clone(),
            },
        };
        Ok(
            match self.call_required::<_, CreateRevisionResponse>(method, &request)? {
                Reply::Success(created) => {
                    tracing::debug!(uri = %created.uri, "created revision");
                    Reply::Success(created.revisionid)
                }
                Reply::Benign(message) => Reply::Benign(message),
                Reply::Failed { code, message } => Reply::Failed { code, message },
            },
        )
    }

    fn update_revision(&self, revision_id: &str, diff_id: &str) -> Result<Reply<()>> {
        let request = UpdateRevisionRequest {
            id: revision_id.to_string(),
            diffid: diff_id.to_string(),
        };
        Ok(discard(
            self.call::<_, serde_json::Value>("differential.updaterevision", &request)?,
        ))
    }

    fn close_revision(&self, revision_id: &str) -> Result<Reply<()>> {
        let method = "differential.close";
        let request = CloseRequest {
            revision_id: numeric_id(method, revision_id)?,
        };
        Ok(discard(self.call::<_, serde_json::Value>(method, &request)?))
    }

    fn read_diff(&self, diff_id: &str) -> Result<Option<RemoteDiff>> {
        let method = "differential.querydiffs";
        let Ok(id) = diff_id.parse::<u64>() else {
            return Ok(None);
        };
        let reply = self.call::<_, serde_json::Value>(method, &QueryDiffsRequest { ids: vec![id] })?;
        let Some(response) = reply.log_failure(method) else {
            return Ok(None);
        };
        let diffs: BTreeMap<String, QueriedDiff> = object_map(method, response)?;
        let Some(diff) = diffs.into_values().find(|d| d.id == diff_id) else {
            return Ok(None);
        };

        let properties = properties_map(diff.properties);
        let last_commit = properties
            .get(LOCAL_COMMITS_PROPERTY)
            .cloned()
            .and_then(|v| serde_json::from_value::<BTreeMap<String, LocalCommit>>(v).ok())
            .and_then(|commits| find_last_commit(&commits));
        Ok(Some(RemoteDiff {
            id: diff.id,
            last_commit,
            properties,
        }))
    }

    fn set_diff_property(&self, diff_id: &str, name: &str, value: &str) -> Result<Reply<()>> {
        let method = "differential.setdiffproperty";
        let request = SetDiffPropertyRequest {
            diff_id: numeric_id(method, diff_id)?,
            name: name.to_string(),
            data: value.to_string(),
        };
        Ok(discard(self.call::<_, serde_json::Value>(method, &request)?))
    }

    fn create_inline(&self, comment: &InlineComment) -> Result<Reply<()>> {
        let request = CreateInlineRequest {
            revision_id: comment.revision_id.clone(),
            diff_id: comment.diff_id.clone(),
            file_path: comment.path.clone(),
            line_number: comment.line,
            content: comment.content.clone(),
            is_new_file: 1,
        };
        Ok(discard(
            self.call::<_, serde_json::Value>("differential.createinline", &request)?,
        ))
    }

    fn create_comment(&self, comment: &GeneralComment) -> Result<Reply<()>> {
        let request = CreateCommentRequest {
            revision_id: comment.revision_id.clone(),
            content: comment.message.clone(),
            action: "comment".to_string(),
            attach_inlines: comment.attach_inlines,
        };
        Ok(discard(
            self.call::<_, serde_json::Value>("differential.createcomment", &request)?,
        ))
    }

    fn find_user(&self, identity: &str) -> Result<Option<String>> {
        let request = if identity.contains('@') {
            UserQueryRequest {
                emails: vec![identity.to_string()],
                ..Default::default()
            }
        } else {
            UserQueryRequest {
                usernames: vec![identity.to_string()],
                ..Default::default()
            }
        };
        Ok(self.query_users(&request)?.into_iter().next().map(|u| u.phid))
    }

    fn load_comments(&self, revision: &RemoteRevision) -> Result<Vec<Comment>> {
        let method = "differential.getrevisioncomments";
        let request = GetCommentsRequest {
            ids: vec![numeric_id(method, &revision.id)?],
            inlines: true,
        };
        let response = self
            .call::<_, serde_json::Value>(method, &request)?
            .into_result(method)?;
        let by_revision: BTreeMap<String, Vec<RevisionComment>> = object_map(method, response)?;
        let remote_comments: Vec<RevisionComment> =
            by_revision.into_values().flatten().collect();

        let phids: Vec<String> = remote_comments
            .iter()
            .map(|c| c.author_phid.clone())
            .filter(|p| !p.is_empty())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let authors: HashMap<String, String> = if phids.is_empty() {
            HashMap::new()
        } else {
            self.query_users(&UserQueryRequest {
                phids,
                ..Default::default()
            })?
            .into_iter()
            .map(|u| (u.phid.clone(), u.identity()))
            .collect()
        };

        let mut diff_commits: HashMap<String, Option<String>> = HashMap::new();
        let mut comments = Vec::new();
        for remote in &remote_comments {
            let author = authors
                .get(&remote.author_phid)
                .cloned()
                .unwrap_or_else(|| remote.author_phid.clone());
            let body = remote.content.clone().unwrap_or_default();
            let resolved = remote.resolved();
            if !body.is_empty() || resolved.is_some() {
                comments.push(Self::to_local_comment(
                    &author,
                    &remote.date_created,
                    &body,
                    resolved,
                    None,
                ));
            }

            for inline in &remote.inlines {
                if !diff_commits.contains_key(&inline.diff_id) {
                    let commit = self.read_diff(&inline.diff_id)?.and_then(|d| d.last_commit);
                    diff_commits.insert(inline.diff_id.clone(), commit);
                }
                let Some(Some(commit)) = diff_commits.get(&inline.diff_id) else {
                    continue;
                };
                let location = Location {
                    commit: commit.clone(),
                    path: inline.file_path.clone(),
                    range: inline
                        .line_number
                        .parse()
                        .ok()
                        .map(|start_line| Range { start_line }),
                };
                comments.push(Self::to_local_comment(
                    &author,
                    &remote.date_created,
                    &inline.content,
                    None,
                    Some(location),
                ));
            }
        }
        Ok(comments)
    }

    fn refresh(&self, repo: &dyn Repo) -> Result<()> {
        let Some(callsign) = self.callsign(repo) else {
            return Ok(());
        };
        let request = LookSoonRequest {
            callsigns: vec![callsign],
        };
        self.call::<_, serde_json::Value>("diffusion.looksoon", &request)?
            .log_failure("diffusion.looksoon");
        Ok(())
    }
}

/// Drop the response payload of a mutation.
fn discard<T>(reply: Reply<Option<T>>) -> Reply<()> {
    match reply {
        Reply::Success(_) => Reply::Success(()),
        Reply::Benign(message) => Reply::Benign(message),
        Reply::Failed { code, message } => Reply::Failed { code, message },
    }
}
