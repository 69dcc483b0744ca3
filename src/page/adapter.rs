//! Selector tables and extraction for both markup generations.
//!
//! Every lookup walks an ordered fallback list and degrades to `None`/`false`
//! with a log line. Nothing here returns an error: the host page changes
//! without notice and the run has to keep going.

use super::dom::{self, collapse_ws, first_within, full_text, own_text};
use super::DomVariant;
use regex::Regex;
use scraper::{ElementRef, Html};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Extraction selectors that differ between markup generations.
#[derive(Debug)]
pub struct Selectors {
    pub probe: &'static str,
    pub post_container: &'static [&'static str],
    pub post_id_attr: &'static str,
    pub actor_block: &'static [&'static str],
    pub actor_name: &'static [&'static str],
    pub actor_link: &'static [&'static str],
    pub actor_image: &'static [&'static str],
    pub sub_description: &'static [&'static str],
    pub secondary_header: &'static [&'static str],
    pub caption: &'static [&'static str],
}

pub static CURRENT: Selectors = Selectors {
    probe: ".update-components-actor",
    post_container: &["div.feed-shared-update-v2[data-urn]", "div[data-urn^='urn:li:activity:']"],
    post_id_attr: "data-urn",
    actor_block: &[".update-components-actor", ".update-components-actor__container"],
    actor_name: &[
        ".update-components-actor__title span[aria-hidden='true']",
        ".update-components-actor__name",
        ".update-components-actor__title",
    ],
    actor_link: &[
        "a.update-components-actor__meta-link",
        ".update-components-actor a[href]",
    ],
    actor_image: &[
        ".update-components-actor__avatar img",
        "img.update-components-actor__avatar-image",
    ],
    sub_description: &[
        ".update-components-actor__sub-description span[aria-hidden='true']",
        ".update-components-actor__sub-description",
    ],
    secondary_header: &[".update-components-header", ".update-components-header__text-view"],
    caption: &[
        ".update-components-text",
        ".feed-shared-inline-show-more-text",
        ".feed-shared-update-v2__description",
    ],
};

pub static LEGACY: Selectors = Selectors {
    probe: ".feed-shared-actor",
    post_container: &["div.feed-shared-update-v2[data-id]", "div[data-id^='urn:li:activity:']"],
    post_id_attr: "data-id",
    actor_block: &[".feed-shared-actor", ".feed-shared-actor__container"],
    actor_name: &[".feed-shared-actor__name", ".feed-shared-actor__title"],
    actor_link: &["a.feed-shared-actor__container-link", ".feed-shared-actor a[href]"],
    actor_image: &[".feed-shared-actor__avatar img", "img.feed-shared-actor__avatar-image"],
    sub_description: &[".feed-shared-actor__sub-description"],
    secondary_header: &[".feed-shared-header"],
    caption: &[".feed-shared-text", ".feed-shared-update-v2__description"],
};

// Action controls are shared by both generations; the first match wins.
pub const COMMENT_ITEMS: &[&str] = &[
    "article.comments-comment-entity[data-id]",
    "article.comments-comment-item[data-id]",
];
pub const COMMENT_BUTTON: &[&str] = &["button.comment-button", "button[aria-label*='Comment']"];
pub const EDITOR: &[&str] = &[
    ".comments-comment-box .ql-editor[contenteditable='true']",
    ".comments-comment-texteditor [contenteditable='true']",
];
pub const SUBMIT: &[&str] = &[
    "button.comments-comment-box__submit-button",
    "button.comments-comment-box__submit-button--cr",
];
pub const IDENTITY_MENU: &[&str] = &[
    "button.comment-identity-switcher",
    "button[aria-label*='switch identity']",
];
pub const MODAL: &[&str] = &[".artdeco-modal[role='dialog']", "div[role='dialog']"];
pub const MODAL_PRIMARY: &[&str] = &["button.artdeco-button--primary"];
pub const ADD_PHOTO: &[&str] = &[
    "button[aria-label='Add a photo']",
    "button.comments-comment-box__image-button",
];
pub const FILE_INPUT: &[&str] = &["input[type='file']"];
pub const LIKE_POST: &[&str] = &["button.react-button__trigger", "button[aria-label*='React Like']"];
pub const LIKE_COMMENT: &[&str] = &[
    "button.comments-comment-social-bar__reactions-action",
    "button.comments-comment-item__like",
];
pub const LOAD_MORE: &[&str] = &[
    "button.scaffold-finite-scroll__load-button",
    "button[aria-label*='more feed updates']",
];

const OPTION_CANDIDATES: &str = "label, span, li, p, div, button";

fn short_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(promoted|now|\d+\s*(mo|[mhdwy]))\b").expect("static regex"))
}

fn long_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\d+\s+(minute|hour|day|week|month|year)s?\s+ago").expect("static regex")
    })
}

/// Where a time label was read from. Long-form hidden text always goes
/// through the extended parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    Primary,
    Pattern,
    Hidden,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeLabel {
    pub text: String,
    pub source: TimeSource,
}

/// Texts searched for the "promoted" marker, in priority order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromotedScopes {
    pub primary: Option<String>,
    pub fallback: Option<String>,
    pub ancestor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FriendSignals {
    pub header_present: bool,
    pub header_precedes_actor: bool,
    pub photos_before_author: usize,
}

/// Raw, DOM-free extraction of one post container.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRecord {
    pub post_id: String,
    pub author_name: Option<String>,
    pub author_href: Option<String>,
    pub time_label: Option<TimeLabel>,
    pub promoted: PromotedScopes,
    pub friend: FriendSignals,
    pub caption: Option<String>,
    pub comment_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DomAdapter {
    variant: DomVariant,
}

impl DomAdapter {
    pub fn new(variant: DomVariant) -> Self {
        Self { variant }
    }

    /// Pick the strategy set by structural markers in the document.
    pub fn probe(html: &str) -> Self {
        let doc = dom::parse(html);
        let variant = if dom::first_in_doc(&doc, &[CURRENT.probe]).is_some() {
            DomVariant::Current
        } else if dom::first_in_doc(&doc, &[LEGACY.probe]).is_some() {
            DomVariant::Legacy
        } else {
            tracing::debug!("no actor markers found, assuming current layout");
            DomVariant::Current
        };
        Self { variant }
    }

    pub fn variant(&self) -> DomVariant {
        self.variant
    }

    pub fn selectors(&self) -> &'static Selectors {
        match self.variant {
            DomVariant::Legacy => &LEGACY,
            DomVariant::Current => &CURRENT,
        }
    }

    /// Selector that matches exactly the container of `post_id`.
    pub fn post_scope(&self, post_id: &str) -> String {
        format!("div[{}=\"{}\"]", self.selectors().post_id_attr, post_id)
    }

    /// Scoped selector for a control inside one post.
    pub fn within_post(&self, post_id: &str, css: &str) -> String {
        format!("{} {}", self.post_scope(post_id), css)
    }

    fn containers<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        let sel = self.selectors();
        for css in sel.post_container {
            let Some(s) = dom::selector(css) else { continue };
            let found: Vec<ElementRef<'a>> = doc
                .select(&s)
                .filter(|el| el.value().attr(sel.post_id_attr).is_some())
                .collect();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    /// Post ids in document order.
    pub fn post_ids(&self, html: &str) -> Vec<String> {
        let doc = dom::parse(html);
        let attr = self.selectors().post_id_attr;
        self.containers(&doc)
            .into_iter()
            .filter_map(|el| el.value().attr(attr).map(str::to_string))
            .collect()
    }

    /// Extract every post container in the snapshot.
    pub fn scan(&self, html: &str) -> Vec<PostRecord> {
        let doc = dom::parse(html);
        self.containers(&doc)
            .into_iter()
            .filter_map(|el| self.extract(el))
            .collect()
    }

    fn extract(&self, container: ElementRef<'_>) -> Option<PostRecord> {
        let sel = self.selectors();
        let post_id = container.value().attr(sel.post_id_attr)?.to_string();
        let actor = first_within(container, sel.actor_block);
        if actor.is_none() {
            tracing::debug!(post_id = %post_id, "actor block not found");
        }
        let actor_scope = actor.unwrap_or(container);

        let author_name = first_within(actor_scope, sel.actor_name)
            .map(full_text)
            .map(|t| t.split('•').next().unwrap_or("").trim().to_string())
            .filter(|t| !t.is_empty());
        if author_name.is_none() {
            tracing::debug!(post_id = %post_id, "author name not found");
        }

        let author_href = first_within(actor_scope, sel.actor_link)
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);

        let primary_sub = first_within(actor_scope, sel.sub_description)
            .map(full_text)
            .filter(|t| !t.is_empty());
        let pattern_label = pattern_label(actor_scope);
        let hidden_label = hidden_label(actor_scope);

        let time_label = primary_sub
            .as_ref()
            .filter(|t| short_label().is_match(t.trim()))
            .map(|t| TimeLabel { text: t.clone(), source: TimeSource::Primary })
            .or_else(|| {
                pattern_label
                    .clone()
                    .map(|text| TimeLabel { text, source: TimeSource::Pattern })
            })
            .or_else(|| {
                hidden_label.map(|text| TimeLabel { text, source: TimeSource::Hidden })
            });

        let promoted = PromotedScopes {
            primary: primary_sub,
            fallback: pattern_label,
            ancestor: actor.map(full_text),
        };

        let friend = self.friend_signals(container, actor);

        let caption = first_within(container, sel.caption)
            .map(full_text)
            .filter(|t| !t.is_empty());

        Some(PostRecord {
            post_id,
            author_name,
            author_href,
            time_label,
            promoted,
            friend,
            caption,
            comment_ids: comment_ids_in(container),
        })
    }

    fn friend_signals(&self, container: ElementRef<'_>, actor: Option<ElementRef<'_>>) -> FriendSignals {
        let sel = self.selectors();
        let header = first_within(container, sel.secondary_header);
        let header_pos = header.and_then(|h| dom::position_in(container, h));
        let actor_pos = actor.and_then(|a| dom::position_in(container, a));

        let header_precedes_actor = match (header_pos, actor_pos) {
            (Some(h), Some(a)) => h < a,
            (Some(_), None) => true,
            _ => false,
        };

        let author_image_pos = actor
            .and_then(|a| first_within(a, sel.actor_image))
            .and_then(|img| dom::position_in(container, img))
            .or(actor_pos);

        let photos_before_author = match (author_image_pos, dom::selector("img")) {
            (Some(limit), Some(img_sel)) => container
                .select(&img_sel)
                .filter(|img| looks_like_profile_photo(*img))
                .filter_map(|img| dom::position_in(container, img))
                .filter(|pos| *pos < limit)
                .count(),
            _ => 0,
        };

        FriendSignals {
            header_present: header.is_some(),
            header_precedes_actor,
            photos_before_author,
        }
    }

    /// Comment ids currently rendered under `post_id`, or `None` when the
    /// container itself is gone.
    pub fn comment_ids(&self, html: &str, post_id: &str) -> Option<BTreeSet<String>> {
        let doc = dom::parse(html);
        let scope = dom::first_in_doc(&doc, &[self.post_scope(post_id).as_str()])?;
        Some(comment_ids_in(scope).into_iter().collect())
    }

    /// Scoped selector of the first control in `candidates` present inside
    /// the post, if any.
    pub fn control_in_post(&self, html: &str, post_id: &str, candidates: &[&str]) -> Option<String> {
        let doc = dom::parse(html);
        let scoped: Vec<String> = candidates.iter().map(|c| self.within_post(post_id, c)).collect();
        let refs: Vec<&str> = scoped.iter().map(String::as_str).collect();
        dom::first_matching_selector(&doc, &refs).map(str::to_string)
    }

    /// Scoped selector of a control inside one comment of one post.
    pub fn control_in_comment(
        &self,
        html: &str,
        post_id: &str,
        comment_id: &str,
        candidates: &[&str],
    ) -> Option<String> {
        let doc = dom::parse(html);
        let scoped: Vec<String> = candidates
            .iter()
            .map(|c| format!("{} article[data-id=\"{}\"] {}", self.post_scope(post_id), comment_id, c))
            .collect();
        let refs: Vec<&str> = scoped.iter().map(String::as_str).collect();
        dom::first_matching_selector(&doc, &refs).map(str::to_string)
    }

    /// Document-wide control lookup (modals, feed footer).
    pub fn control_in_doc(&self, html: &str, candidates: &[&str]) -> Option<String> {
        let doc = dom::parse(html);
        dom::first_matching_selector(&doc, candidates).map(str::to_string)
    }

    pub fn modal_open(&self, html: &str) -> bool {
        let doc = dom::parse(html);
        dom::first_in_doc(&doc, MODAL).is_some()
    }

    /// Locate the identity option whose own text contains `profile`
    /// (case-insensitive) and return a path selector for it.
    pub fn identity_option(&self, html: &str, profile: &str) -> Option<String> {
        let needle = profile.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        let doc = dom::parse(html);
        let modal = dom::first_in_doc(&doc, MODAL)?;
        let candidates = dom::selector(OPTION_CANDIDATES)?;
        modal
            .select(&candidates)
            .find(|el| own_text(*el).to_lowercase().contains(&needle))
            .map(dom::css_path)
    }

    /// The modal's Save control: a button reading "Save", else the primary button.
    pub fn modal_save(&self, html: &str) -> Option<String> {
        let doc = dom::parse(html);
        let modal = dom::first_in_doc(&doc, MODAL)?;
        let buttons = dom::selector("button")?;
        modal
            .select(&buttons)
            .find(|b| full_text(*b).eq_ignore_ascii_case("save"))
            .or_else(|| first_within(modal, MODAL_PRIMARY))
            .map(dom::css_path)
    }

    /// Pressed state of the control at `css`; `None` when it is absent.
    pub fn is_pressed(&self, html: &str, css: &str) -> Option<bool> {
        let doc = dom::parse(html);
        let el = dom::first_in_doc(&doc, &[css])?;
        let aria = el.value().attr("aria-pressed") == Some("true");
        let class_active = el
            .value()
            .classes()
            .any(|c| c.ends_with("--active") || c == "active");
        Some(aria || class_active)
    }
}

fn comment_ids_in(scope: ElementRef<'_>) -> Vec<String> {
    let mut ids = Vec::new();
    for css in COMMENT_ITEMS {
        let Some(sel) = dom::selector(css) else { continue };
        for el in scope.select(&sel) {
            if let Some(id) = el.value().attr("data-id") {
                if !ids.iter().any(|existing| existing == id) {
                    ids.push(id.to_string());
                }
            }
        }
    }
    ids
}

/// Regex fallback over short visible labels inside the actor block.
fn pattern_label(scope: ElementRef<'_>) -> Option<String> {
    let sel = dom::selector("span, p, time, div")?;
    scope
        .select(&sel)
        .map(own_text)
        .find(|t| short_label().is_match(t))
}

/// Long-form fallback from screen-reader text ("3 hours ago").
fn hidden_label(scope: ElementRef<'_>) -> Option<String> {
    let sel = dom::selector(".visually-hidden, .a11y-text")?;
    scope
        .select(&sel)
        .map(full_text)
        .find_map(|t| long_label().find(&t).map(|m| collapse_ws(m.as_str())))
}

fn looks_like_profile_photo(img: ElementRef<'_>) -> bool {
    let v = img.value();
    let src = v.attr("src").unwrap_or("");
    let class = v.attr("class").unwrap_or("");
    src.contains("profile-displayphoto")
        || class.contains("EntityPhoto")
        || class.contains("presence-entity__image")
        || class.contains("header__image")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT_POST: &str = r#"<html><body><main>
      <div class="feed-shared-update-v2" data-urn="urn:li:activity:101">
        <div class="update-components-header">
          <img class="update-components-header__image" src="https://media/profile-displayphoto-shrink_100/sam.jpg">
          <span class="update-components-header__text-view">Sam Lee likes this</span>
        </div>
        <div class="update-components-actor">
          <a class="update-components-actor__meta-link" href="https://www.linkedin.com/in/jane-doe?miniProfileUrn=urn%3Ali%3Afs_miniProfile%3AJANE">
            <div class="update-components-actor__avatar"><img class="update-components-actor__avatar-image" src="https://media/profile-displayphoto-shrink_100/jane.jpg"></div>
            <span class="update-components-actor__title"><span aria-hidden="true">Jane Doe</span><span class="visually-hidden">Jane Doe</span></span>
          </a>
          <span class="update-components-actor__sub-description"><span aria-hidden="true">3h • </span><span class="visually-hidden">3 hours ago</span></span>
        </div>
        <div class="update-components-text"><span>Shipping a new release today.</span></div>
        <div class="comments-comments-list">
          <article class="comments-comment-entity" data-id="urn:li:comment:(activity:101,1)"></article>
          <article class="comments-comment-entity" data-id="urn:li:comment:(activity:101,2)"></article>
        </div>
      </div>
    </main></body></html>"#;

    const LEGACY_PROMOTED: &str = r#"<html><body>
      <div class="feed-shared-update-v2" data-id="urn:li:activity:7">
        <div class="feed-shared-actor">
          <a class="feed-shared-actor__container-link" href="https://www.linkedin.com/company/acme/">
            <div class="feed-shared-actor__avatar"><img src="https://media/company-logo_100/acme.png"></div>
            <span class="feed-shared-actor__name">Acme Co</span>
          </a>
          <span class="feed-shared-actor__sub-description">Promoted</span>
        </div>
        <div class="feed-shared-text">Buy our widgets</div>
      </div>
    </body></html>"#;

    #[test]
    fn test_probe_picks_variant_from_structure() {
        assert_eq!(DomAdapter::probe(CURRENT_POST).variant(), DomVariant::Current);
        assert_eq!(DomAdapter::probe(LEGACY_PROMOTED).variant(), DomVariant::Legacy);
        assert_eq!(DomAdapter::probe("<html><body></body></html>").variant(), DomVariant::Current);
    }

    #[test]
    fn test_scan_current_post() {
        let adapter = DomAdapter::probe(CURRENT_POST);
        let posts = adapter.scan(CURRENT_POST);
        assert_eq!(posts.len(), 1);
        let p = &posts[0];
        assert_eq!(p.post_id, "urn:li:activity:101");
        assert_eq!(p.author_name.as_deref(), Some("Jane Doe"));
        assert!(p.author_href.as_deref().unwrap().contains("/in/jane-doe"));
        let label = p.time_label.as_ref().unwrap();
        assert_eq!(label.source, TimeSource::Primary);
        assert!(label.text.starts_with("3h"));
        assert_eq!(p.caption.as_deref(), Some("Shipping a new release today."));
        assert_eq!(p.comment_ids.len(), 2);
        assert!(p.friend.header_present);
        assert!(p.friend.header_precedes_actor);
        assert_eq!(p.friend.photos_before_author, 1);
    }

    #[test]
    fn test_scan_legacy_promoted_company() {
        let adapter = DomAdapter::probe(LEGACY_PROMOTED);
        let posts = adapter.scan(LEGACY_PROMOTED);
        assert_eq!(posts.len(), 1);
        let p = &posts[0];
        assert_eq!(p.post_id, "urn:li:activity:7");
        assert_eq!(p.author_name.as_deref(), Some("Acme Co"));
        assert_eq!(p.promoted.primary.as_deref(), Some("Promoted"));
        assert_eq!(p.time_label.as_ref().map(|l| l.text.as_str()), Some("Promoted"));
        assert!(!p.friend.header_present);
        assert!(p.comment_ids.is_empty());
    }

    #[test]
    fn test_time_falls_back_to_hidden_long_form() {
        let html = r#"<html><body>
          <div class="feed-shared-update-v2" data-urn="urn:li:activity:5">
            <div class="update-components-actor">
              <span class="update-components-actor__title"><span aria-hidden="true">Kim</span></span>
              <span class="visually-hidden">Posted 2 days ago</span>
            </div>
          </div></body></html>"#;
        let posts = DomAdapter::probe(html).scan(html);
        let label = posts[0].time_label.as_ref().unwrap();
        assert_eq!(label.source, TimeSource::Hidden);
        assert_eq!(label.text, "2 days ago");
    }

    #[test]
    fn test_time_pattern_fallback_when_primary_missing() {
        let html = r#"<html><body>
          <div class="feed-shared-update-v2" data-urn="urn:li:activity:6">
            <div class="update-components-actor">
              <span class="update-components-actor__title"><span aria-hidden="true">Kim</span></span>
              <div class="renamed-sub"><span>5d • Edited</span></div>
            </div>
          </div></body></html>"#;
        let posts = DomAdapter::probe(html).scan(html);
        let label = posts[0].time_label.as_ref().unwrap();
        assert_eq!(label.source, TimeSource::Pattern);
        assert!(label.text.starts_with("5d"));
    }

    #[test]
    fn test_missing_fields_degrade_to_none() {
        let html = r#"<html><body><div class="feed-shared-update-v2" data-urn="urn:li:activity:9"></div></body></html>"#;
        let posts = DomAdapter::new(DomVariant::Current).scan(html);
        assert_eq!(posts.len(), 1);
        let p = &posts[0];
        assert_eq!(p.author_name, None);
        assert_eq!(p.time_label, None);
        assert_eq!(p.caption, None);
        assert_eq!(p.friend, FriendSignals::default());
    }

    #[test]
    fn test_comment_ids_and_controls() {
        let adapter = DomAdapter::new(DomVariant::Current);
        let ids = adapter.comment_ids(CURRENT_POST, "urn:li:activity:101").unwrap();
        assert_eq!(ids.len(), 2);
        assert!(adapter.comment_ids(CURRENT_POST, "urn:li:activity:999").is_none());
        assert_eq!(adapter.control_in_post(CURRENT_POST, "urn:li:activity:101", COMMENT_BUTTON), None);
    }

    #[test]
    fn test_identity_option_matches_own_text_only() {
        let html = r#"<html><body>
          <div class="artdeco-modal" role="dialog">
            <div class="options">
              <ul>
                <li><label>Jane Doe</label></li>
                <li><label>Acme Corp</label></li>
              </ul>
            </div>
            <button class="artdeco-button--primary">Save</button>
          </div></body></html>"#;
        let adapter = DomAdapter::new(DomVariant::Current);
        let path = adapter.identity_option(html, "acme").unwrap();
        assert!(path.ends_with("label:nth-child(1)"), "{path}");
        assert!(path.contains("li:nth-child(2)"), "{path}");
        assert!(adapter.modal_save(html).is_some());
        assert!(adapter.identity_option(html, "Globex").is_none());
    }

    #[test]
    fn test_is_pressed() {
        let html = r#"<html><body>
            <button id="a" aria-pressed="true">Like</button>
            <button id="b" class="react-button--active">Like</button>
            <button id="c" aria-pressed="false">Like</button></body></html>"#;
        let adapter = DomAdapter::new(DomVariant::Current);
        assert_eq!(adapter.is_pressed(html, "#a"), Some(true));
        assert_eq!(adapter.is_pressed(html, "#b"), Some(true));
        assert_eq!(adapter.is_pressed(html, "#c"), Some(false));
        assert_eq!(adapter.is_pressed(html, "#d"), None);
    }
}
