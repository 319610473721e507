use crate::mirror::overlap::parse_quote_header;
use crate::mirror::remote::{
    COMMIT_HASH_KIND, GeneralComment, InlineComment, RemoteApi, RemoteDiff, RemoteRevision, Reply,
    RevisionFields, RevisionStatus,
};
use crate::models::{Comment, Location, Range};
use crate::storage::{CommitDetails, Repo};
use crate::{Error, Result};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

// ==================== MemoryRepo ====================

#[derive(Debug, Clone)]
struct MemoryCommit {
    parents: Vec<String>,
    time: String,
}

/// In-memory repository with a hand-built commit graph.
#[derive(Debug)]
pub struct MemoryRepo {
    path: PathBuf,
    commits: RefCell<HashMap<String, MemoryCommit>>,
    refs: RefCell<BTreeMap<String, String>>,
    notes: RefCell<BTreeMap<(String, String), Vec<String>>>,
    /// Bumped on every ref or note change
    generation: Cell<u64>,
    pub pulls: Cell<usize>,
    pub pushes: Cell<usize>,
    pub fail_pull: Cell<bool>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::at("/var/repo/memory")
    }

    pub fn at(path: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            commits: RefCell::new(HashMap::new()),
            refs: RefCell::new(BTreeMap::new()),
            notes: RefCell::new(BTreeMap::new()),
            generation: Cell::new(0),
            pulls: Cell::new(0),
            pushes: Cell::new(0),
            fail_pull: Cell::new(false),
        }
    }

    fn touch(&self) {
        self.generation.set(self.generation.get() + 1);
    }

    pub fn add_commit(&self, hash: &str, parents: &[&str], time: &str) {
        self.commits.borrow_mut().insert(
            hash.to_string(),
            MemoryCommit {
                parents: parents.iter().map(|p| p.to_string()).collect(),
                time: time.to_string(),
            },
        );
    }

    pub fn set_ref(&self, name: &str, hash: &str) {
        self.refs
            .borrow_mut()
            .insert(name.to_string(), hash.to_string());
        self.touch();
    }

    pub fn remove_ref(&self, name: &str) {
        self.refs.borrow_mut().remove(name);
        self.touch();
    }

    pub fn push_note(&self, notes_ref: &str, commit: &str, line: &str) {
        self.notes
            .borrow_mut()
            .entry((notes_ref.to_string(), commit.to_string()))
            .or_default()
            .push(line.to_string());
        self.touch();
    }

    pub fn notes(&self, notes_ref: &str, commit: &str) -> Vec<String> {
        self.notes
            .borrow()
            .get(&(notes_ref.to_string(), commit.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn resolve(&self, reference: &str) -> Option<String> {
        if let Some(hash) = self.refs.borrow().get(reference) {
            return Some(hash.clone());
        }
        self.commits
            .borrow()
            .contains_key(reference)
            .then(|| reference.to_string())
    }

    fn resolve_or_err(&self, reference: &str) -> Result<String> {
        self.resolve(reference)
            .ok_or_else(|| Error::Git(format!("unknown revision '{}'", reference)))
    }

    /// Every commit reachable from `hash`, itself included.
    fn ancestors(&self, hash: &str) -> HashSet<String> {
        let commits = self.commits.borrow();
        let mut seen = HashSet::new();
        let mut stack = vec![hash.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(commit) = commits.get(&current) {
                stack.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    fn time_of(&self, hash: &str) -> i64 {
        self.commits
            .borrow()
            .get(hash)
            .and_then(|c| c.time.parse().ok())
            .unwrap_or_default()
    }
}

impl Repo for MemoryRepo {
    fn path(&self) -> &Path {
        &self.path
    }

    fn state_hash(&self) -> Result<String> {
        Ok(format!("gen-{}", self.generation.get()))
    }

    fn list_annotated(&self, notes_ref: &str) -> Result<Vec<String>> {
        Ok(self
            .notes
            .borrow()
            .keys()
            .filter(|(r, _)| r == notes_ref)
            .map(|(_, commit)| commit.clone())
            .collect())
    }

    fn get_notes(&self, notes_ref: &str, commit: &str) -> Result<Vec<String>> {
        Ok(self.notes(notes_ref, commit))
    }

    fn append_note(&self, notes_ref: &str, commit: &str, note: &str) -> Result<()> {
        self.push_note(notes_ref, commit, note);
        Ok(())
    }

    fn pull_notes(&self, _remote: &str, _pattern: &str) -> Result<()> {
        self.pulls.set(self.pulls.get() + 1);
        if self.fail_pull.get() {
            return Err(Error::Git("fetch failed".to_string()));
        }
        Ok(())
    }

    fn push_notes(&self, _remote: &str, _pattern: &str) -> Result<()> {
        self.pushes.set(self.pushes.get() + 1);
        Ok(())
    }

    fn resolve_ref(&self, reference: &str) -> Result<Option<String>> {
        Ok(self.resolve(reference))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let ancestor = self.resolve_or_err(ancestor)?;
        let descendant = self.resolve_or_err(descendant)?;
        Ok(self.ancestors(&descendant).contains(&ancestor))
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        let a = self.resolve_or_err(a)?;
        let b = self.resolve_or_err(b)?;
        let of_a = self.ancestors(&a);
        self.ancestors(&b)
            .into_iter()
            .filter(|c| of_a.contains(c))
            .max_by_key(|c| (self.time_of(c), c.clone()))
            .ok_or_else(|| Error::Git(format!("no merge base between {} and {}", a, b)))
    }

    fn last_parent(&self, commit: &str) -> Result<Option<String>> {
        let commits = self.commits.borrow();
        let found = commits
            .get(commit)
            .ok_or_else(|| Error::Git(format!("unknown commit {}", commit)))?;
        Ok(found.parents.last().cloned())
    }

    fn commit_time(&self, commit: &str) -> Result<String> {
        self.commits
            .borrow()
            .get(commit)
            .map(|c| c.time.clone())
            .ok_or_else(|| Error::Git(format!("unknown commit {}", commit)))
    }

    fn commit_details(&self, commit: &str) -> Result<CommitDetails> {
        let commits = self.commits.borrow();
        let found = commits
            .get(commit)
            .ok_or_else(|| Error::Git(format!("unknown commit {}", commit)))?;
        Ok(CommitDetails {
            commit: commit.to_string(),
            parents: found.parents.clone(),
            time: found.time.clone(),
            author: "dev@example.com".to_string(),
            summary: format!("commit {}", commit),
        })
    }

    fn list_commits(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let base = self.resolve_or_err(base)?;
        let head = self.resolve_or_err(head)?;
        let excluded = self.ancestors(&base);
        let mut range: Vec<String> = self
            .ancestors(&head)
            .into_iter()
            .filter(|c| !excluded.contains(c))
            .collect();
        range.sort_by_key(|c| (self.time_of(c), c.clone()));
        Ok(range)
    }

    fn diff(&self, base: &str, head: &str) -> Result<String> {
        if self.resolve_or_err(base)? == self.resolve_or_err(head)? {
            return Ok(String::new());
        }
        Ok(format!("diff --git a/{0} b/{0}\n+{1}\n", "file.txt", head))
    }
}

// ==================== FakeRemote ====================

/// A call made against [`FakeRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Query { commit: String },
    QueryOpen,
    CreateDiff { base: String, head: String },
    CreateRevision { diff: String },
    UpdateRevision { revision: String, diff: String },
    Close { revision: String },
    ReadDiff { diff: String },
    SetProperty { diff: String, name: String },
    CreateInline { revision: String },
    CreateComment { revision: String },
    FindUser { identity: String },
    LoadComments { revision: String },
    Refresh,
}

impl Call {
    fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::CreateDiff { .. }
                | Call::CreateRevision { .. }
                | Call::UpdateRevision { .. }
                | Call::Close { .. }
                | Call::SetProperty { .. }
                | Call::CreateInline { .. }
                | Call::CreateComment { .. }
        )
    }
}

/// A comment stored on the fake remote.
#[derive(Debug, Clone)]
struct StoredComment {
    revision: String,
    author: String,
    timestamp: String,
    content: String,
    resolved: Option<bool>,
    inline: Option<(String, String, u32)>,
}

/// Recording in-memory remote review tool.
///
/// Comments it is asked to post are loaded back the way the conduit adapter
/// does it: quotation headers restore the original timestamp and state.
#[derive(Debug, Default)]
pub struct FakeRemote {
    calls: RefCell<Vec<Call>>,
    revisions: RefCell<BTreeMap<String, RemoteRevision>>,
    diffs: RefCell<BTreeMap<String, RemoteDiff>>,
    comments: RefCell<Vec<StoredComment>>,
    users: RefCell<HashMap<String, String>>,
    created: RefCell<Vec<RevisionFields>>,
    failing: RefCell<BTreeSet<String>>,
    refuse_diffs: Cell<bool>,
    next_id: Cell<u64>,
}

/// Author the fake remote attributes mirrored comments to.
pub const MIRROR_USER: &str = "mirror-bot@example.com";

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            ..Default::default()
        }
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn fresh_id(&self) -> String {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id.to_string()
    }

    fn failure<T>(&self, method: &str) -> Option<Reply<T>> {
        self.failing.borrow().contains(method).then(|| Reply::Failed {
            code: "ERR-CONDUIT-CORE".to_string(),
            message: format!("{} refused", method),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    pub fn mutations(&self) -> usize {
        self.count(Call::is_mutation)
    }

    pub fn add_user(&self, identity: &str, id: &str) {
        self.users
            .borrow_mut()
            .insert(identity.to_string(), id.to_string());
    }

    pub fn fail_method(&self, method: &str) {
        self.failing.borrow_mut().insert(method.to_string());
    }

    /// Make every diff creation produce nothing.
    pub fn refuse_diffs(&self) {
        self.refuse_diffs.set(true);
    }

    fn store_diff(&self, last_commit: &str) -> RemoteDiff {
        let diff = RemoteDiff {
            id: self.fresh_id(),
            last_commit: Some(last_commit.to_string()),
            properties: BTreeMap::new(),
        };
        self.diffs
            .borrow_mut()
            .insert(diff.id.clone(), diff.clone());
        diff
    }

    /// Seed an open revision with one diff built from `commits`.
    pub fn add_revision(&self, commits: &[&str], last_commit: &str) -> String {
        let diff = self.store_diff(last_commit);
        let id = self.fresh_id();
        self.revisions.borrow_mut().insert(
            id.clone(),
            RemoteRevision {
                id: id.clone(),
                title: format!("revision {}", id),
                hashes: commits
                    .iter()
                    .map(|c| (COMMIT_HASH_KIND.to_string(), c.to_string()))
                    .collect(),
                diffs: vec![diff.id],
                ..Default::default()
            },
        );
        id
    }

    /// Close a revision without recording a call.
    pub fn close_directly(&self, id: &str) {
        if let Some(revision) = self.revisions.borrow_mut().get_mut(id) {
            revision.status = RevisionStatus::Closed;
        }
    }

    /// Seed a comment written by a human on the remote.
    pub fn add_remote_comment(&self, revision: &str, author: &str, timestamp: &str, text: &str) {
        self.comments.borrow_mut().push(StoredComment {
            revision: revision.to_string(),
            author: author.to_string(),
            timestamp: timestamp.to_string(),
            content: text.to_string(),
            resolved: None,
            inline: None,
        });
    }

    pub fn revision(&self, id: &str) -> Option<RemoteRevision> {
        self.revisions.borrow().get(id).cloned()
    }

    pub fn created_fields(&self) -> Vec<RevisionFields> {
        self.created.borrow().clone()
    }

    /// Messages of general comments posted to a revision.
    pub fn general_messages(&self, revision: &str) -> Vec<String> {
        self.comments
            .borrow()
            .iter()
            .filter(|c| c.revision == revision && c.inline.is_none() && c.author == MIRROR_USER)
            .map(|c| c.content.clone())
            .collect()
    }

    /// Values set for a diff property, across all diffs.
    pub fn properties_named(&self, name: &str) -> Vec<String> {
        self.diffs
            .borrow()
            .values()
            .filter_map(|d| d.properties.get(name))
            .map(|v| v.to_string())
            .collect()
    }

    fn post(&self, revision: &str, content: &str, inline: Option<(String, String, u32)>) {
        let (timestamp, resolved) = match parse_quote_header(content) {
            Some(header) => (header.timestamp, header.resolved),
            None => ("0".to_string(), None),
        };
        self.comments.borrow_mut().push(StoredComment {
            revision: revision.to_string(),
            author: MIRROR_USER.to_string(),
            timestamp,
            content: content.to_string(),
            resolved,
            inline,
        });
    }
}

impl RemoteApi for FakeRemote {
    fn query_revisions(&self, commit: &str) -> Result<Vec<RemoteRevision>> {
        self.record(Call::Query {
            commit: commit.to_string(),
        });
        Ok(self
            .revisions
            .borrow()
            .values()
            .filter(|r| r.contains_commit(commit))
            .cloned()
            .collect())
    }

    fn query_open_revisions(&self) -> Result<Vec<RemoteRevision>> {
        self.record(Call::QueryOpen);
        Ok(self
            .revisions
            .borrow()
            .values()
            .filter(|r| !r.is_closed())
            .cloned()
            .collect())
    }

    fn create_diff(&self, repo: &dyn Repo, base: &str, head: &str) -> Result<Option<RemoteDiff>> {
        self.record(Call::CreateDiff {
            base: base.to_string(),
            head: head.to_string(),
        });
        if self.refuse_diffs.get() || repo.list_commits(base, head)?.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.store_diff(head)))
    }

    fn create_revision(&self, diff_id: &str, fields: &RevisionFields) -> Result<Reply<String>> {
        self.record(Call::CreateRevision {
            diff: diff_id.to_string(),
        });
        if let Some(failed) = self.failure("create_revision") {
            return Ok(failed);
        }
        self.created.borrow_mut().push(fields.clone());
        let head = self
            .diffs
            .borrow()
            .get(diff_id)
            .and_then(|d| d.last_commit.clone())
            .unwrap_or_default();
        let id = self.fresh_id();
        self.revisions.borrow_mut().insert(
            id.clone(),
            RemoteRevision {
                id: id.clone(),
                title: fields.title.clone(),
                reviewers: fields.reviewers.clone(),
                hashes: vec![(COMMIT_HASH_KIND.to_string(), head)],
                diffs: vec![diff_id.to_string()],
                ..Default::default()
            },
        );
        Ok(Reply::Success(id))
    }

    fn update_revision(&self, revision_id: &str, diff_id: &str) -> Result<Reply<()>> {
        self.record(Call::UpdateRevision {
            revision: revision_id.to_string(),
            diff: diff_id.to_string(),
        });
        if let Some(failed) = self.failure("update_revision") {
            return Ok(failed);
        }
        let head = self
            .diffs
            .borrow()
            .get(diff_id)
            .and_then(|d| d.last_commit.clone())
            .unwrap_or_default();
        let mut revisions = self.revisions.borrow_mut();
        let Some(revision) = revisions.get_mut(revision_id) else {
            return Ok(Reply::Failed {
                code: "ERR-NOT-FOUND".to_string(),
                message: format!("no revision {}", revision_id),
            });
        };
        revision.diffs.push(diff_id.to_string());
        revision.hashes.push((COMMIT_HASH_KIND.to_string(), head));
        Ok(Reply::Success(()))
    }

    fn close_revision(&self, revision_id: &str) -> Result<Reply<()>> {
        self.record(Call::Close {
            revision: revision_id.to_string(),
        });
        if let Some(failed) = self.failure("close_revision") {
            return Ok(failed);
        }
        let mut revisions = self.revisions.borrow_mut();
        match revisions.get_mut(revision_id) {
            Some(r) if r.is_closed() => Ok(Reply::Benign("already closed".to_string())),
            Some(r) => {
                r.status = RevisionStatus::Closed;
                Ok(Reply::Success(()))
            }
            None => Ok(Reply::Failed {
                code: "ERR-NOT-FOUND".to_string(),
                message: format!("no revision {}", revision_id),
            }),
        }
    }

    fn read_diff(&self, diff_id: &str) -> Result<Option<RemoteDiff>> {
        self.record(Call::ReadDiff {
            diff: diff_id.to_string(),
        });
        Ok(self.diffs.borrow().get(diff_id).cloned())
    }

    fn set_diff_property(&self, diff_id: &str, name: &str, value: &str) -> Result<Reply<()>> {
        self.record(Call::SetProperty {
            diff: diff_id.to_string(),
            name: name.to_string(),
        });
        if let Some(failed) = self.failure("set_diff_property") {
            return Ok(failed);
        }
        let value: serde_json::Value = serde_json::from_str(value)?;
        if let Some(diff) = self.diffs.borrow_mut().get_mut(diff_id) {
            diff.properties.insert(name.to_string(), value);
        }
        Ok(Reply::Success(()))
    }

    fn create_inline(&self, comment: &InlineComment) -> Result<Reply<()>> {
        self.record(Call::CreateInline {
            revision: comment.revision_id.clone(),
        });
        if let Some(failed) = self.failure("create_inline") {
            return Ok(failed);
        }
        self.post(
            &comment.revision_id,
            &comment.content,
            Some((comment.diff_id.clone(), comment.path.clone(), comment.line)),
        );
        Ok(Reply::Success(()))
    }

    fn create_comment(&self, comment: &GeneralComment) -> Result<Reply<()>> {
        self.record(Call::CreateComment {
            revision: comment.revision_id.clone(),
        });
        if let Some(failed) = self.failure("create_comment") {
            return Ok(failed);
        }
        self.post(&comment.revision_id, &comment.message, None);
        Ok(Reply::Success(()))
    }

    fn find_user(&self, identity: &str) -> Result<Option<String>> {
        self.record(Call::FindUser {
            identity: identity.to_string(),
        });
        Ok(self.users.borrow().get(identity).cloned())
    }

    fn load_comments(&self, revision: &RemoteRevision) -> Result<Vec<Comment>> {
        self.record(Call::LoadComments {
            revision: revision.id.clone(),
        });
        let diffs = self.diffs.borrow();
        Ok(self
            .comments
            .borrow()
            .iter()
            .filter(|c| c.revision == revision.id && !c.content.is_empty())
            .map(|c| Comment {
                timestamp: c.timestamp.clone(),
                author: c.author.clone(),
                location: c.inline.as_ref().map(|(diff, path, line)| Location {
                    commit: diffs
                        .get(diff)
                        .and_then(|d| d.last_commit.clone())
                        .unwrap_or_default(),
                    path: path.clone(),
                    range: Some(Range { start_line: *line }),
                }),
                description: c.content.clone(),
                resolved: c.resolved,
                ..Default::default()
            })
            .collect())
    }

    fn refresh(&self, _repo: &dyn Repo) -> Result<()> {
        self.record(Call::Refresh);
        Ok(())
    }
}
