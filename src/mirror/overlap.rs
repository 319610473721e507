//! Deciding whether two comments are the same logical comment.
//!
//! The local notes store and the remote review tool share no comment
//! identifiers, so a comment mirrored from one side to the other is
//! recognized by content instead: it carries the original's timestamp and
//! resolution state, and its body is either the original body or a quotation
//! of it produced by [`quote_description`].
//!
//! A quotation looks like this:
//!
//! ```text
//! alice@example.com commented [1450000000]:
//!
//! > first line of the original
//! > second line
//! ```
//!
//! The verb encodes the resolution state (`commented`, `approved`,
//! `requested changes`) so the remote side can hand both the timestamp and
//! the state back through [`parse_quote_header`].

use crate::models::{Comment, CommentThread};

/// Prefix put in front of every quoted line.
const QUOTE_PREFIX: &str = "> ";

fn verb_for(resolved: Option<bool>) -> &'static str {
    match resolved {
        None => "commented",
        Some(true) => "approved",
        Some(false) => "requested changes",
    }
}

/// Render the canonical quotation of a comment's description, used as the
/// body when the comment is mirrored into the other system.
pub fn quote_description(c: &Comment) -> String {
    let mut out = format!("{} {} [{}]:\n", c.author, verb_for(c.resolved), c.timestamp);
    for line in c.description.lines() {
        out.push('\n');
        if line.is_empty() {
            out.push_str(QUOTE_PREFIX.trim_end());
        } else {
            out.push_str(QUOTE_PREFIX);
            out.push_str(line);
        }
    }
    out
}

/// Timestamp and resolution state recovered from a quotation header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteHeader {
    pub timestamp: String,
    pub resolved: Option<bool>,
}

/// Recover the timestamp and resolution state from a body produced by
/// [`quote_description`]. Returns `None` for anything else.
pub fn parse_quote_header(body: &str) -> Option<QuoteHeader> {
    let header = body.lines().next()?;
    let rest = header.strip_suffix("]:")?;
    let (left, timestamp) = rest.rsplit_once(" [")?;
    let resolved = if left.ends_with(" commented") {
        None
    } else if left.ends_with(" approved") {
        Some(true)
    } else if left.ends_with(" requested changes") {
        Some(false)
    } else {
        return None;
    };
    if timestamp.is_empty() {
        return None;
    }
    Some(QuoteHeader {
        timestamp: timestamp.to_string(),
        resolved,
    })
}

/// Whether `quoted`'s body is the quotation of `original`.
fn is_quote_of(quoted: &Comment, original: &Comment) -> bool {
    quoted.description == quote_description(original)
}

/// Whether two comments represent the same logical comment.
///
/// They must share a timestamp and the same resolution state (both absent,
/// or both set to the same value), and either have identical bodies or one
/// body must quote the other. A change in resolution state is a distinct
/// event and never overlaps. The relation is symmetric.
pub fn overlaps(a: &Comment, b: &Comment) -> bool {
    if a.timestamp != b.timestamp || a.resolved != b.resolved {
        return false;
    }
    a.description == b.description || is_quote_of(a, b) || is_quote_of(b, a)
}

/// Whether `c` overlaps any comment in `existing`.
fn overlaps_any<'a, I>(c: &Comment, existing: I) -> bool
where
    I: IntoIterator<Item = &'a Comment>,
{
    existing.into_iter().any(|e| overlaps(c, e))
}

/// Flatten `threads` (parent before children, children in order) and keep
/// only the comments that overlap nothing in `existing`.
///
/// A comment whose parent was filtered out is still returned.
pub fn filter_overlapping(threads: &[CommentThread], existing: &[Comment]) -> Vec<Comment> {
    let mut out = Vec::new();
    for thread in threads {
        collect_new(thread, existing, &mut out);
    }
    out
}

fn collect_new(thread: &CommentThread, existing: &[Comment], out: &mut Vec<Comment>) {
    if !overlaps_any(&thread.comment, existing) {
        out.push(thread.comment.clone());
    }
    for child in &thread.children {
        collect_new(child, existing, out);
    }
}
