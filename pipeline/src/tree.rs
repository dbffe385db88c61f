//! Comment forest normalization.
//!
//! Raw comment records arrive nested (API replies) or flat (tests, cached
//! payloads). Both normalize into an arena of [`CommentNode`] keyed by
//! identifier, with derived depth and stable child order. Unknown parents
//! degrade to the super-root with a warning; cycles and duplicate ids are
//! malformed input and fatal.

use std::collections::{HashMap, VecDeque};
use threadlens_core::{CommentNode, CoreError, InputError, RawComment, RunWarning};
use tracing::{debug, warn};

const REMOVED_MARKERS: &[&str] = &["[deleted]", "[removed]"];

/// Arena-held comment forest. Nodes reference each other by identifier only.
#[derive(Debug, Clone)]
pub struct CommentForest {
    nodes: Vec<CommentNode>,
    index: HashMap<String, usize>,
    /// Top-level comment ids in arrival order
    roots: Vec<String>,
}

impl CommentForest {
    /// Normalize raw records into a forest. `post_id` is the implicit
    /// super-root; comments parented to it (or to nothing) become roots.
    pub fn build(
        post_id: &str,
        raw: &[RawComment],
        warnings: &mut Vec<RunWarning>,
    ) -> Result<Self, CoreError> {
        let flat = flatten(raw);

        let mut index: HashMap<String, usize> = HashMap::with_capacity(flat.len());
        for (i, record) in flat.iter().enumerate() {
            if index.insert(record.id.clone(), i).is_some() {
                return Err(InputError::DuplicateId {
                    comment_id: record.id.clone(),
                }
                .into());
            }
        }

        let mut nodes: Vec<CommentNode> = Vec::with_capacity(flat.len());
        let mut roots: Vec<String> = Vec::new();

        for record in &flat {
            let parent_id = match &record.parent_id {
                None => None,
                Some(p) if p == post_id => None,
                Some(p) if index.contains_key(p) => Some(p.clone()),
                Some(p) => {
                    warn!("Comment {} references unknown parent {}", record.id, p);
                    warnings.push(RunWarning::OrphanComment {
                        comment_id: record.id.clone(),
                    });
                    None
                }
            };

            let body = record.body.trim().to_string();
            let is_removed =
                body.is_empty() || REMOVED_MARKERS.contains(&body.to_lowercase().as_str());

            nodes.push(CommentNode {
                id: record.id.clone(),
                parent_id,
                author: record.author.clone(),
                body,
                score: record.score,
                created_utc: record.created_utc,
                depth: 0,
                children: Vec::new(),
                is_removed,
            });
        }

        // Wire children in arrival order
        for i in 0..nodes.len() {
            match nodes[i].parent_id.clone() {
                Some(parent) => {
                    let child_id = nodes[i].id.clone();
                    let parent_idx = index[&parent];
                    nodes[parent_idx].children.push(child_id);
                }
                None => roots.push(nodes[i].id.clone()),
            }
        }

        // Depth assignment by traversal from the roots. Any node a traversal
        // cannot reach sits on a parent cycle.
        let mut visited = vec![false; nodes.len()];
        let mut queue: VecDeque<(String, usize)> =
            roots.iter().map(|id| (id.clone(), 0)).collect();
        while let Some((id, depth)) = queue.pop_front() {
            let idx = index[&id];
            visited[idx] = true;
            nodes[idx].depth = depth;
            for child in nodes[idx].children.clone() {
                queue.push_back((child, depth + 1));
            }
        }

        if let Some(unreached) = visited.iter().position(|v| !v) {
            return Err(InputError::CycleDetected {
                comment_id: nodes[unreached].id.clone(),
            }
            .into());
        }

        debug!(
            "Built forest: {} nodes, {} roots",
            nodes.len(),
            roots.len()
        );
        Ok(Self {
            nodes,
            index,
            roots,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CommentNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// All nodes in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &CommentNode> {
        self.nodes.iter()
    }

    /// Sibling nodes of `id`: children of the same parent, or the root set
    /// for top-level comments. Excludes `id` itself.
    pub fn siblings(&self, id: &str) -> Vec<&CommentNode> {
        let Some(node) = self.get(id) else {
            return Vec::new();
        };
        let sibling_ids = match &node.parent_id {
            Some(parent) => self.get(parent).map(|p| p.children.as_slice()).unwrap_or(&[]),
            None => self.roots.as_slice(),
        };
        sibling_ids
            .iter()
            .filter(|s| s.as_str() != id)
            .filter_map(|s| self.get(s))
            .collect()
    }

    /// Ancestor chain of `id`, nearest first.
    pub fn ancestors(&self, id: &str) -> Vec<&CommentNode> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|n| n.parent_id.as_deref());
        while let Some(parent_id) = current {
            let Some(parent) = self.get(parent_id) else {
                break;
            };
            chain.push(parent);
            current = parent.parent_id.as_deref();
        }
        chain
    }
}

/// Depth-first flattening of nested records, preserving arrival order and
/// filling in implicit parent links.
fn flatten(raw: &[RawComment]) -> Vec<RawComment> {
    let mut flat = Vec::new();
    let mut stack: Vec<RawComment> = raw.iter().rev().cloned().collect();

    while let Some(mut record) = stack.pop() {
        let replies = std::mem::take(&mut record.replies);
        for mut reply in replies.into_iter().rev() {
            if reply.parent_id.is_none() {
                reply.parent_id = Some(record.id.clone());
            }
            stack.push(reply);
        }
        flat.push(record);
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn comment(id: &str, parent: Option<&str>, body: &str) -> RawComment {
        RawComment {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            author: format!("user_{id}"),
            body: body.to_string(),
            score: 1,
            created_utc: Utc::now(),
            replies: Vec::new(),
        }
    }

    #[test]
    fn test_depth_is_parent_depth_plus_one() {
        let raw = vec![
            comment("a", None, "top level"),
            comment("b", Some("a"), "reply"),
            comment("c", Some("b"), "deeper reply"),
            comment("d", None, "another top level"),
        ];
        let mut warnings = Vec::new();
        let forest = CommentForest::build("post1", &raw, &mut warnings).unwrap();

        assert_eq!(forest.get("a").unwrap().depth, 0);
        assert_eq!(forest.get("b").unwrap().depth, 1);
        assert_eq!(forest.get("c").unwrap().depth, 2);
        assert_eq!(forest.get("d").unwrap().depth, 0);
        assert_eq!(forest.roots(), &["a", "d"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_nested_replies_are_flattened_with_parent_links() {
        let mut top = comment("a", None, "top");
        let mut mid = comment("b", None, "middle");
        mid.replies.push(comment("c", None, "leaf"));
        top.replies.push(mid);

        let mut warnings = Vec::new();
        let forest = CommentForest::build("post1", &[top], &mut warnings).unwrap();

        assert_eq!(forest.get("b").unwrap().parent_id.as_deref(), Some("a"));
        assert_eq!(forest.get("c").unwrap().parent_id.as_deref(), Some("b"));
        assert_eq!(forest.get("c").unwrap().depth, 2);
    }

    #[test]
    fn test_post_parent_means_root() {
        let raw = vec![comment("a", Some("post1"), "parented to the post")];
        let mut warnings = Vec::new();
        let forest = CommentForest::build("post1", &raw, &mut warnings).unwrap();
        assert_eq!(forest.get("a").unwrap().parent_id, None);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unknown_parent_degrades_to_root_with_warning() {
        let raw = vec![
            comment("a", None, "fine"),
            comment("b", Some("ghost"), "orphaned"),
        ];
        let mut warnings = Vec::new();
        let forest = CommentForest::build("post1", &raw, &mut warnings).unwrap();

        assert_eq!(forest.get("b").unwrap().depth, 0);
        assert_eq!(
            warnings,
            vec![RunWarning::OrphanComment {
                comment_id: "b".to_string()
            }]
        );
    }

    #[test]
    fn test_duplicate_id_is_fatal() {
        let raw = vec![comment("a", None, "one"), comment("a", None, "two")];
        let mut warnings = Vec::new();
        let result = CommentForest::build("post1", &raw, &mut warnings);
        assert!(matches!(
            result,
            Err(CoreError::Input(InputError::DuplicateId { .. }))
        ));
    }

    #[test]
    fn test_parent_cycle_is_fatal() {
        let raw = vec![
            comment("a", Some("b"), "chicken"),
            comment("b", Some("a"), "egg"),
        ];
        let mut warnings = Vec::new();
        let result = CommentForest::build("post1", &raw, &mut warnings);
        assert!(matches!(
            result,
            Err(CoreError::Input(InputError::CycleDetected { .. }))
        ));
    }

    #[test]
    fn test_removed_comment_kept_structurally() {
        let raw = vec![
            comment("a", None, "[deleted]"),
            comment("b", Some("a"), "still a meaningful reply"),
        ];
        let mut warnings = Vec::new();
        let forest = CommentForest::build("post1", &raw, &mut warnings).unwrap();

        let removed = forest.get("a").unwrap();
        assert!(removed.is_removed);
        assert_eq!(removed.children, vec!["b".to_string()]);
        assert!(!forest.get("b").unwrap().is_removed);
    }

    #[test]
    fn test_siblings_and_ancestors() {
        let raw = vec![
            comment("a", None, "top"),
            comment("b", Some("a"), "first child"),
            comment("c", Some("a"), "second child"),
            comment("d", Some("b"), "grandchild"),
        ];
        let mut warnings = Vec::new();
        let forest = CommentForest::build("post1", &raw, &mut warnings).unwrap();

        let sibling_ids: Vec<&str> =
            forest.siblings("b").iter().map(|n| n.id.as_str()).collect();
        assert_eq!(sibling_ids, vec!["c"]);

        let ancestor_ids: Vec<&str> =
            forest.ancestors("d").iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ancestor_ids, vec!["b", "a"]);
    }
}
