use crate::engine::names::normalize_name;
use crate::page::adapter::{PostRecord, TimeLabel, TimeSource};
use crate::page::time_parse::{parse_time_string_to_hours, parse_time_to_hours};
use crate::page::DomVariant;
use std::collections::BTreeSet;
use url::Url;

/// A post with everything the filter chain and sequencer need, derived once
/// per cycle and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct PostCandidate {
    pub post_id: String,
    pub author_name: Option<String>,
    /// Empty when the author could not be read.
    pub author_normalized_name: String,
    pub author_profile_urn: Option<String>,
    pub author_profile_url: Option<String>,
    pub age_hours: Option<f64>,
    pub is_promoted: bool,
    pub is_company_page: bool,
    pub is_friend_activity: bool,
    pub caption_text: String,
    pub comment_ids_before_submission: BTreeSet<String>,
}

pub fn classify(record: &PostRecord, variant: DomVariant, base_url: &str) -> PostCandidate {
    let author_name = record.author_name.clone();
    let author_normalized_name = author_name.as_deref().map(normalize_name).unwrap_or_default();
    let profile = record
        .author_href
        .as_deref()
        .and_then(|href| resolve_href(href, base_url));

    PostCandidate {
        post_id: record.post_id.clone(),
        author_normalized_name,
        author_name,
        author_profile_urn: profile.as_ref().map(profile_urn),
        author_profile_url: profile.as_ref().map(canonical_profile_url),
        age_hours: record.time_label.as_ref().and_then(|l| age_hours(l, variant)),
        is_promoted: is_promoted(record),
        is_company_page: record.author_href.as_deref().is_some_and(is_company_href),
        is_friend_activity: is_friend_activity(record),
        caption_text: record.caption.clone().unwrap_or_default(),
        comment_ids_before_submission: record.comment_ids.iter().cloned().collect(),
    }
}

/// Hidden long-form text always needs the extended parser. Otherwise the
/// legacy markup keeps the short parser it was written against.
pub fn age_hours(label: &TimeLabel, variant: DomVariant) -> Option<f64> {
    match (label.source, variant) {
        (TimeSource::Hidden, _) | (_, DomVariant::Current) => parse_time_to_hours(&label.text),
        (_, DomVariant::Legacy) => parse_time_string_to_hours(&label.text),
    }
}

/// "promoted" in the sub-description, the fallback label, or anywhere in the
/// actor block, checked in that order.
pub fn is_promoted(record: &PostRecord) -> bool {
    let scopes = &record.promoted;
    [&scopes.primary, &scopes.fallback, &scopes.ancestor]
        .into_iter()
        .flatten()
        .any(|text| text.to_lowercase().contains("promoted"))
}

pub fn is_company_href(href: &str) -> bool {
    href.contains("/company/") || href.contains("/showcase/")
}

/// A secondary header above the author is decisive on its own; profile photos
/// above the author image only count when a header exists at all.
pub fn is_friend_activity(record: &PostRecord) -> bool {
    let f = &record.friend;
    f.header_precedes_actor || (f.header_present && f.photos_before_author > 0)
}

fn resolve_href(href: &str, base_url: &str) -> Option<Url> {
    match Url::parse(href) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(base_url).ok()?;
            base.join(href).ok()
        }
        Err(e) => {
            tracing::debug!(href, error = %e, "unparseable author link");
            None
        }
    }
}

/// Prefer the `miniProfileUrn` query parameter; fall back to the profile path.
fn profile_urn(url: &Url) -> String {
    url.query_pairs()
        .find(|(k, _)| k == "miniProfileUrn")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| url.path().trim_end_matches('/').to_string())
}

fn canonical_profile_url(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.set_fragment(None);
    clean.as_str().trim_end_matches('/').to_string()
}
