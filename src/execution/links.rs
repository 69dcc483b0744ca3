use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use url::form_urlencoded::byte_serialize;

fn comment_urn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^urn:li:comment:\((activity|ugcPost):(\d+),(\d+)\)$").expect("static regex")
    })
}

/// Parts of `urn:li:comment:(activity:A,C)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentUrn {
    pub thread_kind: String,
    pub thread_id: String,
    pub comment_id: String,
}

impl CommentUrn {
    pub fn parse(urn: &str) -> Option<Self> {
        let caps = comment_urn_re().captures(urn.trim())?;
        Some(Self {
            thread_kind: caps[1].to_string(),
            thread_id: caps[2].to_string(),
            comment_id: caps[3].to_string(),
        })
    }

    pub fn thread_urn(&self) -> String {
        format!("urn:li:{}:{}", self.thread_kind, self.thread_id)
    }

    pub fn as_urn(&self) -> String {
        format!("urn:li:comment:({}:{},{})", self.thread_kind, self.thread_id, self.comment_id)
    }

    fn dash_urn(&self) -> String {
        format!("urn:li:fsd_comment:({},{})", self.comment_id, self.thread_urn())
    }
}

fn encode(s: &str) -> String {
    byte_serialize(s.as_bytes()).collect()
}

/// Permalink that opens the post scrolled to the comment. Both query values
/// are fully percent-encoded, so parentheses appear as `%28`/`%29`.
pub fn comment_deep_link(base_url: &str, comment_urn: &str) -> Option<String> {
    let urn = CommentUrn::parse(comment_urn)?;
    Some(format!(
        "{}/feed/update/{}/?commentUrn={}&dashCommentUrn={}",
        base_url.trim_end_matches('/'),
        urn.thread_urn(),
        encode(&urn.as_urn()),
        encode(&urn.dash_urn()),
    ))
}

/// The one id present in `after` but not in `before`.
///
/// `None` when nothing new appeared, and also when several did: with other
/// people commenting at the same moment there is no telling which is ours.
pub fn detect_new_comment(before: &BTreeSet<String>, after: &BTreeSet<String>) -> Option<String> {
    let mut added = after.difference(before);
    let first = added.next()?;
    if added.next().is_some() {
        tracing::debug!("several new comments appeared, cannot attribute one");
        return None;
    }
    Some(first.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_comment_detection() {
        assert_eq!(detect_new_comment(&set(&["A", "B"]), &set(&["A", "B", "C"])), Some("C".into()));
        assert_eq!(detect_new_comment(&set(&["A", "B"]), &set(&["A", "B"])), None);
        assert_eq!(detect_new_comment(&set(&["A"]), &set(&["A", "B", "C"])), None);
        assert_eq!(detect_new_comment(&set(&["A", "B"]), &set(&["B", "C"])), Some("C".into()));
    }

    #[test]
    fn test_deep_link_encodes_parentheses() {
        let link = comment_deep_link(
            "https://www.linkedin.com/",
            "urn:li:comment:(activity:7100,42)",
        )
        .unwrap();
        assert!(link.starts_with("https://www.linkedin.com/feed/update/urn:li:activity:7100/?"));
        assert!(link.contains("commentUrn=urn%3Ali%3Acomment%3A%28activity%3A7100%2C42%29"));
        assert!(link.contains(
            "dashCommentUrn=urn%3Ali%3Afsd_comment%3A%2842%2Curn%3Ali%3Aactivity%3A7100%29"
        ));
        let query = link.split_once('?').unwrap().1;
        assert!(!query.contains('(') && !query.contains(')'));
    }

    #[test]
    fn test_ugc_post_threads() {
        let urn = CommentUrn::parse("urn:li:comment:(ugcPost:55,9)").unwrap();
        assert_eq!(urn.thread_urn(), "urn:li:ugcPost:55");
        assert_eq!(urn.as_urn(), "urn:li:comment:(ugcPost:55,9)");
    }

    #[test]
    fn test_malformed_urn_has_no_link() {
        assert!(comment_deep_link("https://www.linkedin.com", "urn:li:comment:42").is_none());
        assert!(CommentUrn::parse("urn:li:comment:(share:1,2)").is_none());
    }
}
