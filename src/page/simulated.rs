//! In-process feed that renders either markup generation and reacts to the
//! same selectors a live page would. Backs `--simulate` and the test suite.
//!
//! Interactive elements carry a `data-sim-action` attribute; `click` resolves
//! the selector against the current render and dispatches on that attribute
//! (walking up to the nearest ancestor that has one, like event bubbling).

use super::dom;
use super::{DomVariant, MediaFile, PageDriver};
use crate::config::SimulationConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SITE: &str = "https://www.linkedin.com";
const PROFILE_PHOTO: &str = "https://media.licdn.com/dms/image/profile-displayphoto-shrink_100_100";
const COMPANY_LOGO: &str = "https://media.licdn.com/dms/image/company-logo_100_100";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimComment {
    pub id: u64,
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub liked: bool,
}

/// One post in a simulated feed fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimPost {
    pub activity: u64,
    pub author: String,
    #[serde(default = "default_age")]
    pub age: String,
    #[serde(default)]
    pub promoted: bool,
    #[serde(default)]
    pub company: bool,
    /// Connection whose activity surfaced the post ("Sam likes this").
    #[serde(default)]
    pub friend_activity: Option<String>,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub comments: Vec<SimComment>,
    #[serde(default)]
    pub liked: bool,
}

fn default_age() -> String {
    "1h".to_string()
}

impl SimPost {
    pub fn new(activity: u64, author: &str) -> Self {
        Self {
            activity,
            author: author.to_string(),
            age: default_age(),
            promoted: false,
            company: false,
            friend_activity: None,
            caption: format!("Some thoughts from {author}."),
            comments: Vec::new(),
            liked: false,
        }
    }

    pub fn aged(mut self, age: &str) -> Self {
        self.age = age.to_string();
        self
    }

    pub fn company(mut self) -> Self {
        self.company = true;
        self
    }

    pub fn promoted(mut self) -> Self {
        self.promoted = true;
        self
    }

    pub fn via_friend(mut self, friend: &str) -> Self {
        self.friend_activity = Some(friend.to_string());
        self
    }

    pub fn with_caption(mut self, caption: &str) -> Self {
        self.caption = caption.to_string();
        self
    }

    pub fn with_comment(mut self, id: u64, author: &str, text: &str) -> Self {
        self.comments.push(SimComment {
            id,
            author: author.to_string(),
            text: text.to_string(),
            liked: false,
        });
        self
    }

    pub fn post_id(&self) -> String {
        format!("urn:li:activity:{}", self.activity)
    }

    fn slug(&self) -> String {
        self.author
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
    }
}

pub fn comment_urn(activity: u64, comment: u64) -> String {
    format!("urn:li:comment:(activity:{activity},{comment})")
}

/// Misbehaviours a test can switch on.
#[derive(Debug, Clone, Default)]
pub struct Quirks {
    /// Never render the "show more" button; only scrolling loads posts.
    pub no_load_more_button: bool,
    /// Accept submits but never render the new comment.
    pub swallow_submits: bool,
    /// Post ids whose container disappears when a comment is submitted.
    pub vanish_on_submit: HashSet<String>,
    /// Omit the identity switcher from the post action bar.
    pub no_identity_menu: bool,
    /// A lagged modal or new comment first shows up in the Nth snapshot
    /// after the click that caused it.
    pub render_lag: u32,
    /// Snapshots an open identity dialog stays empty before its options show.
    pub option_lag: u32,
}

#[derive(Debug)]
enum Action {
    LikePost(String),
    OpenComposer(String),
    Editor(String),
    AddPhoto(String),
    FileInput(String),
    Submit(String),
    IdentityMenu,
    IdentityOption(String),
    IdentitySave,
    IdentityCancel,
    LikeComment(String, u64),
    LoadMore,
}

impl Action {
    fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('|');
        let kind = parts.next()?;
        let arg = parts.next().map(str::to_string);
        Some(match kind {
            "like-post" => Action::LikePost(arg?),
            "open-composer" => Action::OpenComposer(arg?),
            "editor" => Action::Editor(arg?),
            "add-photo" => Action::AddPhoto(arg?),
            "file-input" => Action::FileInput(arg?),
            "submit" => Action::Submit(arg?),
            "identity-menu" => Action::IdentityMenu,
            "identity-option" => Action::IdentityOption(arg?),
            "identity-save" => Action::IdentitySave,
            "identity-cancel" => Action::IdentityCancel,
            "like-comment" => Action::LikeComment(arg?, parts.next()?.parse().ok()?),
            "load-more" => Action::LoadMore,
            _ => return None,
        })
    }
}

#[derive(Debug)]
struct PendingComment {
    post_id: String,
    comment: SimComment,
    lag: u32,
}

#[derive(Debug)]
struct FeedState {
    layout: DomVariant,
    posts: Vec<SimPost>,
    visible: usize,
    page_size: usize,
    acting_as: String,
    owner: String,
    managed_pages: Vec<String>,
    quirks: Quirks,

    composers: HashSet<String>,
    drafts: HashMap<String, String>,
    file_inputs: HashSet<String>,
    attachments: HashMap<String, MediaFile>,
    file_picker_enabled: bool,
    native_dialogs: u32,
    modal_lag: Option<u32>,
    option_lag: u32,
    pending_identity: Option<String>,
    pending_comments: Vec<PendingComment>,
    next_comment_id: u64,
    submitted: Vec<(String, String)>,
}

pub struct SimulatedFeed {
    state: Mutex<FeedState>,
}

impl SimulatedFeed {
    pub fn new(layout: DomVariant, posts: Vec<SimPost>) -> Self {
        let page_size = 5;
        let next_comment_id = posts
            .iter()
            .flat_map(|p| p.comments.iter().map(|c| c.id))
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            state: Mutex::new(FeedState {
                layout,
                visible: page_size.min(posts.len()),
                posts,
                page_size,
                acting_as: "Operator".to_string(),
                owner: "Operator".to_string(),
                managed_pages: Vec::new(),
                quirks: Quirks::default(),
                composers: HashSet::new(),
                drafts: HashMap::new(),
                file_inputs: HashSet::new(),
                attachments: HashMap::new(),
                file_picker_enabled: true,
                native_dialogs: 0,
                modal_lag: None,
                option_lag: 0,
                pending_identity: None,
                pending_comments: Vec::new(),
                next_comment_id,
                submitted: Vec::new(),
            }),
        }
    }

    /// Build from the `[simulation]` config section, reading the fixture file
    /// when one is named and falling back to the bundled demo feed.
    pub fn from_config(cfg: &SimulationConfig) -> Result<Self> {
        let posts = match &cfg.feed_path {
            Some(path) => load_fixture(path)?,
            None => demo_posts(),
        };
        Ok(Self::new(cfg.layout, posts)
            .with_page_size(cfg.page_size)
            .with_operator(&cfg.acting_name)
            .with_managed_pages(cfg.managed_pages.clone()))
    }

    fn with_state(self, f: impl FnOnce(&mut FeedState)) -> Self {
        if let Ok(mut st) = self.state.lock() {
            f(&mut st);
        }
        self
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.with_state(|st| {
            st.page_size = page_size.max(1);
            st.visible = st.page_size.min(st.posts.len());
        })
    }

    pub fn with_operator(self, name: &str) -> Self {
        self.with_state(|st| {
            st.owner = name.to_string();
            st.acting_as = name.to_string();
        })
    }

    pub fn with_managed_pages(self, pages: Vec<String>) -> Self {
        self.with_state(|st| st.managed_pages = pages)
    }

    pub fn with_quirks(self, quirks: Quirks) -> Self {
        self.with_state(|st| st.quirks = quirks)
    }

    fn lock(&self) -> Result<MutexGuard<'_, FeedState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("simulated feed state poisoned"))
    }

    /// Comments currently rendered under `post_id`.
    pub fn comments(&self, post_id: &str) -> Vec<SimComment> {
        self.lock()
            .ok()
            .and_then(|st| st.post(post_id).map(|p| p.comments.clone()))
            .unwrap_or_default()
    }

    pub fn post_liked(&self, post_id: &str) -> bool {
        self.lock()
            .ok()
            .and_then(|st| st.post(post_id).map(|p| p.liked))
            .unwrap_or(false)
    }

    pub fn acting_as(&self) -> String {
        self.lock().map(|st| st.acting_as.clone()).unwrap_or_default()
    }

    pub fn native_dialogs_opened(&self) -> u32 {
        self.lock().map(|st| st.native_dialogs).unwrap_or(0)
    }

    pub fn visible_posts(&self) -> usize {
        self.lock().map(|st| st.visible).unwrap_or(0)
    }

    /// Every accepted submit as `(post_id, text)`, including swallowed ones.
    pub fn submitted(&self) -> Vec<(String, String)> {
        self.lock().map(|st| st.submitted.clone()).unwrap_or_default()
    }

    pub fn attachment(&self, post_id: &str) -> Option<MediaFile> {
        self.lock().ok().and_then(|st| st.attachments.get(post_id).cloned())
    }
}

pub fn load_fixture(path: &Path) -> Result<Vec<SimPost>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read feed fixture: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| "Failed to parse feed fixture JSON")
}

/// Small mixed feed used when no fixture is configured.
pub fn demo_posts() -> Vec<SimPost> {
    vec![
        SimPost::new(7100, "Dana Whitfield")
            .aged("2h")
            .with_caption("We just open-sourced our scheduling library.")
            .with_comment(1, "Rui Costa", "Congrats on the launch!"),
        SimPost::new(7101, "Acme Co")
            .company()
            .promoted()
            .with_caption("Upgrade your workflow with Acme Cloud."),
        SimPost::new(7102, "Priya Raman")
            .aged("5h")
            .with_caption("Three lessons from migrating a monolith to services."),
        SimPost::new(7103, "Leo Marchetti")
            .aged("1d")
            .via_friend("Rui Costa")
            .with_caption("Hiring two backend engineers in Lisbon."),
        SimPost::new(7104, "Globex")
            .company()
            .aged("3h")
            .with_caption("Our quarterly engineering report is out."),
        SimPost::new(7105, "Dana Whitfield")
            .aged("6h")
            .with_caption("Follow-up: benchmarks for the scheduler."),
        SimPost::new(7106, "Mina Okafor")
            .aged("45m")
            .with_caption("Reading list for anyone getting into distributed systems."),
        SimPost::new(7107, "Tomás Herrera")
            .aged("2w")
            .with_caption("Looking back at a year of on-call."),
        SimPost::new(7108, "Sara Lindqvist")
            .aged("3mo")
            .with_caption("Slides from my conference talk are up."),
    ]
}

impl FeedState {
    fn post(&self, post_id: &str) -> Option<&SimPost> {
        self.posts.iter().find(|p| p.post_id() == post_id)
    }

    fn post_mut(&mut self, post_id: &str) -> Option<&mut SimPost> {
        self.posts.iter_mut().find(|p| p.post_id() == post_id)
    }

    fn load_page(&mut self) -> bool {
        let before = self.visible;
        self.visible = (self.visible + self.page_size).min(self.posts.len());
        self.visible > before
    }

    fn modal_visible(&self) -> bool {
        self.modal_lag == Some(0)
    }

    /// Advance lagged renders by one frame.
    fn tick(&mut self) {
        if self.modal_visible() {
            self.option_lag = self.option_lag.saturating_sub(1);
        }
        if let Some(lag) = self.modal_lag.as_mut() {
            *lag = lag.saturating_sub(1);
        }
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_comments)
            .into_iter()
            .map(|mut p| {
                p.lag = p.lag.saturating_sub(1);
                p
            })
            .partition(|p| p.lag == 0);
        self.pending_comments = waiting;
        for PendingComment { post_id, comment, .. } in ready {
            if let Some(post) = self.post_mut(&post_id) {
                post.comments.push(comment);
            }
        }
    }

    fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::LikePost(id) => match self.post_mut(&id) {
                Some(post) => {
                    post.liked = !post.liked;
                    true
                }
                None => false,
            },
            Action::OpenComposer(id) => {
                self.composers.insert(id);
                true
            }
            Action::Editor(_) | Action::FileInput(_) => true,
            Action::AddPhoto(id) => {
                self.file_inputs.insert(id);
                if self.file_picker_enabled {
                    self.native_dialogs += 1;
                }
                true
            }
            Action::Submit(id) => {
                let Some(text) = self.drafts.remove(&id).filter(|t| !t.trim().is_empty()) else {
                    return true;
                };
                self.submitted.push((id.clone(), text.clone()));
                self.file_inputs.remove(&id);
                if self.quirks.vanish_on_submit.contains(&id) {
                    self.posts.retain(|p| p.post_id() != id);
                    self.visible = self.visible.min(self.posts.len());
                    return true;
                }
                if self.quirks.swallow_submits {
                    return true;
                }
                let comment = SimComment {
                    id: self.next_comment_id,
                    author: self.acting_as.clone(),
                    text,
                    liked: false,
                };
                self.next_comment_id += 1;
                match self.quirks.render_lag {
                    0 => {
                        if let Some(post) = self.post_mut(&id) {
                            post.comments.push(comment);
                        }
                    }
                    lag => self.pending_comments.push(PendingComment { post_id: id, comment, lag }),
                }
                true
            }
            Action::IdentityMenu => {
                self.modal_lag = Some(self.quirks.render_lag);
                self.option_lag = self.quirks.option_lag;
                self.pending_identity = None;
                true
            }
            Action::IdentityOption(name) => {
                self.pending_identity = Some(name);
                true
            }
            Action::IdentitySave => {
                if let Some(name) = self.pending_identity.take() {
                    self.acting_as = name;
                }
                self.modal_lag = None;
                true
            }
            Action::IdentityCancel => {
                self.pending_identity = None;
                self.modal_lag = None;
                true
            }
            Action::LikeComment(post_id, comment_id) => {
                let Some(post) = self.post_mut(&post_id) else { return false };
                match post.comments.iter_mut().find(|c| c.id == comment_id) {
                    Some(c) => {
                        c.liked = !c.liked;
                        true
                    }
                    None => false,
                }
            }
            Action::LoadMore => {
                self.load_page();
                true
            }
        }
    }

    fn render(&self) -> String {
        let mut out = String::from(
            "<!DOCTYPE html><html><head><title>Feed</title></head><body>\
             <main class=\"scaffold-layout__main\"><div class=\"scaffold-finite-scroll\">\
             <div class=\"scaffold-finite-scroll__content\">",
        );
        for post in self.posts.iter().take(self.visible) {
            match self.layout {
                DomVariant::Current => self.render_current(post, &mut out),
                DomVariant::Legacy => self.render_legacy(post, &mut out),
            }
        }
        out.push_str("</div>");
        if self.visible < self.posts.len() && !self.quirks.no_load_more_button {
            out.push_str(
                "<button class=\"scaffold-finite-scroll__load-button\" \
                 data-sim-action=\"load-more\">Show more feed updates</button>",
            );
        }
        out.push_str("</div></main>");
        if self.modal_visible() {
            self.render_modal(&mut out);
        }
        out.push_str("</body></html>");
        out
    }

    fn profile_href(&self, post: &SimPost) -> String {
        if post.company {
            return format!("{SITE}/company/{}/", post.slug());
        }
        match self.layout {
            DomVariant::Current => format!(
                "{SITE}/in/{}?miniProfileUrn=urn%3Ali%3Afs_miniProfile%3A{}",
                post.slug(),
                post.slug().to_uppercase().replace('-', "")
            ),
            DomVariant::Legacy => format!("{SITE}/in/{}/", post.slug()),
        }
    }

    fn avatar(&self, post: &SimPost) -> String {
        if post.company {
            format!("{COMPANY_LOGO}/{}.png", post.slug())
        } else {
            format!("{PROFILE_PHOTO}/{}.jpg", post.slug())
        }
    }

    fn render_current(&self, post: &SimPost, out: &mut String) {
        let pid = post.post_id();
        out.push_str(&format!(
            "<div class=\"feed-shared-update-v2\" data-urn=\"{pid}\">"
        ));
        if let Some(friend) = &post.friend_activity {
            out.push_str(&format!(
                "<div class=\"update-components-header\">\
                 <img class=\"update-components-header__image\" src=\"{PROFILE_PHOTO}/friend.jpg\">\
                 <span class=\"update-components-header__text-view\">{} likes this</span></div>",
                escape(friend)
            ));
        }
        let sub = if post.promoted {
            "<span aria-hidden=\"true\">Promoted</span>".to_string()
        } else {
            format!(
                "<span aria-hidden=\"true\">{} • </span><span class=\"visually-hidden\">{}</span>",
                escape(&post.age),
                escape(&long_form(&post.age))
            )
        };
        out.push_str(&format!(
            "<div class=\"update-components-actor\">\
             <a class=\"update-components-actor__meta-link\" href=\"{href}\">\
             <div class=\"update-components-actor__avatar\">\
             <img class=\"update-components-actor__avatar-image\" src=\"{img}\"></div>\
             <span class=\"update-components-actor__title\">\
             <span aria-hidden=\"true\">{name}</span><span class=\"visually-hidden\">{name}</span></span></a>\
             <span class=\"update-components-actor__sub-description\">{sub}</span></div>\
             <div class=\"update-components-text\"><span>{caption}</span></div>\
             <div class=\"feed-shared-social-action-bar\">\
             <button class=\"react-button__trigger\" aria-pressed=\"{liked}\" data-sim-action=\"like-post|{pid}\">Like</button>\
             <button class=\"comment-button\" data-sim-action=\"open-composer|{pid}\">Comment</button>{switcher}</div>",
            href = escape(&self.profile_href(post)),
            img = self.avatar(post),
            name = escape(&post.author),
            caption = escape(&post.caption),
            liked = post.liked,
            switcher = self.identity_switcher(&pid),
        ));
        self.render_comment_box(&pid, out);
        out.push_str("<div class=\"comments-comments-list\">");
        for c in &post.comments {
            out.push_str(&format!(
                "<article class=\"comments-comment-entity\" data-id=\"{cid}\">\
                 <span class=\"comments-comment-meta__description-title\">{author}</span>\
                 <span class=\"comments-comment-item__main-content\">{text}</span>\
                 <button class=\"comments-comment-social-bar__reactions-action\" aria-pressed=\"{liked}\" \
                 data-sim-action=\"like-comment|{pid}|{id}\">Like</button></article>",
                cid = comment_urn(post.activity, c.id),
                author = escape(&c.author),
                text = escape(&c.text),
                liked = c.liked,
                id = c.id,
            ));
        }
        out.push_str("</div></div>");
    }

    fn render_legacy(&self, post: &SimPost, out: &mut String) {
        let pid = post.post_id();
        out.push_str(&format!("<div class=\"feed-shared-update-v2\" data-id=\"{pid}\">"));
        if let Some(friend) = &post.friend_activity {
            out.push_str(&format!(
                "<div class=\"feed-shared-header\">\
                 <img class=\"feed-shared-header__image EntityPhoto-circle-1\" src=\"{PROFILE_PHOTO}/friend.jpg\">\
                 <span class=\"feed-shared-header__text\">{} commented on this</span></div>",
                escape(friend)
            ));
        }
        let sub = if post.promoted {
            "Promoted".to_string()
        } else {
            format!("{} • Edited", escape(&post.age))
        };
        out.push_str(&format!(
            "<div class=\"feed-shared-actor\">\
             <a class=\"feed-shared-actor__container-link\" href=\"{href}\">\
             <div class=\"feed-shared-actor__avatar\"><img class=\"feed-shared-actor__avatar-image\" src=\"{img}\"></div>\
             <span class=\"feed-shared-actor__name\">{name}</span></a>\
             <span class=\"feed-shared-actor__sub-description\">{sub}</span></div>\
             <div class=\"feed-shared-text\">{caption}</div>\
             <div class=\"feed-shared-social-actions\">\
             <button class=\"react-button__trigger\" aria-pressed=\"{liked}\" data-sim-action=\"like-post|{pid}\">Like</button>\
             <button class=\"feed-shared-social-action\" aria-label=\"Comment on {name}'s post\" \
             data-sim-action=\"open-composer|{pid}\">Comment</button>{switcher}</div>",
            href = escape(&self.profile_href(post)),
            img = self.avatar(post),
            name = escape(&post.author),
            caption = escape(&post.caption),
            liked = post.liked,
            switcher = self.identity_switcher(&pid),
        ));
        self.render_comment_box(&pid, out);
        out.push_str("<div class=\"comments-comment-list\">");
        for c in &post.comments {
            out.push_str(&format!(
                "<article class=\"comments-comment-item\" data-id=\"{cid}\">\
                 <span class=\"comments-post-meta__name\">{author}</span>\
                 <p class=\"comments-comment-item__main-content\">{text}</p>\
                 <button class=\"comments-comment-item__like\" aria-pressed=\"{liked}\" \
                 data-sim-action=\"like-comment|{pid}|{id}\">Like</button></article>",
                cid = comment_urn(post.activity, c.id),
                author = escape(&c.author),
                text = escape(&c.text),
                liked = c.liked,
                id = c.id,
            ));
        }
        out.push_str("</div></div>");
    }

    /// "Commenting as" toggle in the post's action bar.
    fn identity_switcher(&self, pid: &str) -> String {
        if self.quirks.no_identity_menu {
            return String::new();
        }
        format!(
            "<button class=\"comment-identity-switcher\" data-sim-action=\"identity-menu|{pid}\">\
             <span>{}</span></button>",
            escape(&self.acting_as)
        )
    }

    fn render_comment_box(&self, pid: &str, out: &mut String) {
        if !self.composers.contains(pid) {
            return;
        }
        out.push_str("<div class=\"comments-comment-box\">");
        let draft = self.drafts.get(pid).map(|d| escape(d)).unwrap_or_default();
        out.push_str(&format!(
            "<div class=\"comments-comment-box__form\">\
             <div class=\"ql-editor\" contenteditable=\"true\" data-sim-action=\"editor|{pid}\">{draft}</div>\
             <button aria-label=\"Add a photo\" data-sim-action=\"add-photo|{pid}\">Photo</button>"
        ));
        if self.file_inputs.contains(pid) {
            out.push_str(&format!(
                "<input type=\"file\" accept=\"image/*\" data-sim-action=\"file-input|{pid}\">"
            ));
        }
        if let Some(file) = self.attachments.get(pid) {
            out.push_str(&format!(
                "<span class=\"comments-comment-box__attachment\">{}</span>",
                escape(&file.name)
            ));
        }
        out.push_str(&format!(
            "<button class=\"comments-comment-box__submit-button\" data-sim-action=\"submit|{pid}\">Post</button>\
             </div></div>"
        ));
    }

    fn render_modal(&self, out: &mut String) {
        out.push_str(
            "<div class=\"artdeco-modal\" role=\"dialog\">\
             <h2 class=\"artdeco-modal__header\">Comment as</h2><ul class=\"identity-options\">",
        );
        let names = std::iter::once(&self.owner).chain(self.managed_pages.iter());
        for name in names.filter(|_| self.option_lag == 0) {
            out.push_str(&format!(
                "<li><label data-sim-action=\"identity-option|{n}\">{n}</label></li>",
                n = escape(name)
            ));
        }
        out.push_str(
            "</ul><button class=\"artdeco-button--secondary\" data-sim-action=\"identity-cancel\">Cancel</button>\
             <button class=\"artdeco-button--primary\" data-sim-action=\"identity-save\">Save</button></div>",
        );
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// "3h" -> "3 hours ago", as screen readers get it.
fn long_form(age: &str) -> String {
    let digits: String = age.chars().take_while(char::is_ascii_digit).collect();
    let unit = match &age[digits.len()..] {
        "m" => "minute",
        "h" => "hour",
        "d" => "day",
        "w" => "week",
        "mo" => "month",
        "y" => "year",
        _ => return age.to_string(),
    };
    let plural = if digits == "1" { "" } else { "s" };
    format!("{digits} {unit}{plural} ago")
}

/// The action of the first element matching `selector`, or of its closest
/// ancestor that has one.
fn action_at(html: &str, selector: &str) -> Option<String> {
    let doc = dom::parse(html);
    let el = dom::first_in_doc(&doc, &[selector])?;
    std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .find_map(|e| e.value().attr("data-sim-action").map(str::to_string))
}

#[async_trait]
impl PageDriver for SimulatedFeed {
    async fn snapshot(&self) -> Result<String> {
        let mut st = self.lock()?;
        st.tick();
        Ok(st.render())
    }

    async fn click(&self, selector: &str) -> Result<bool> {
        let mut st = self.lock()?;
        let html = st.render();
        let Some(action) = action_at(&html, selector).and_then(|raw| Action::parse(&raw)) else {
            tracing::debug!(selector, "simulated click hit nothing actionable");
            return Ok(false);
        };
        Ok(st.apply(action))
    }

    async fn insert_text(&self, selector: &str, text: &str) -> Result<bool> {
        let mut st = self.lock()?;
        let html = st.render();
        match action_at(&html, selector).and_then(|raw| Action::parse(&raw)) {
            Some(Action::Editor(post_id)) => {
                st.drafts.insert(post_id, text.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        let mut st = self.lock()?;
        st.load_page();
        Ok(())
    }

    async fn set_file_picker_enabled(&self, enabled: bool) -> Result<()> {
        self.lock()?.file_picker_enabled = enabled;
        Ok(())
    }

    async fn attach_file(&self, selector: &str, file: &MediaFile) -> Result<bool> {
        let mut st = self.lock()?;
        let html = st.render();
        match action_at(&html, selector).and_then(|raw| Action::parse(&raw)) {
            Some(Action::FileInput(post_id)) => {
                st.attachments.insert(post_id, file.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::adapter::{self, DomAdapter, TimeSource};

    fn feed(layout: DomVariant) -> SimulatedFeed {
        SimulatedFeed::new(
            layout,
            vec![
                SimPost::new(1, "Jane Doe").aged("3h").with_comment(10, "Bo", "Nice"),
                SimPost::new(2, "Acme Co").company().promoted(),
                SimPost::new(3, "Kim Park").via_friend("Sam Lee").aged("2d"),
            ],
        )
        .with_page_size(2)
    }

    #[tokio::test]
    async fn test_current_render_is_read_by_adapter() {
        let feed = feed(DomVariant::Current);
        let html = feed.snapshot().await.unwrap();
        let adapter = DomAdapter::probe(&html);
        assert_eq!(adapter.variant(), DomVariant::Current);
        let posts = adapter.scan(&html);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].author_name.as_deref(), Some("Jane Doe"));
        assert_eq!(posts[0].time_label.as_ref().unwrap().source, TimeSource::Primary);
        assert_eq!(posts[0].comment_ids, vec![comment_urn(1, 10)]);
        assert!(posts[1].author_href.as_deref().unwrap().contains("/company/"));
        assert_eq!(posts[1].promoted.primary.as_deref(), Some("Promoted"));
    }

    #[tokio::test]
    async fn test_legacy_render_is_read_by_adapter() {
        let feed = feed(DomVariant::Legacy);
        feed.scroll_to_bottom().await.unwrap();
        let html = feed.snapshot().await.unwrap();
        let adapter = DomAdapter::probe(&html);
        assert_eq!(adapter.variant(), DomVariant::Legacy);
        let posts = adapter.scan(&html);
        assert_eq!(posts.len(), 3);
        assert!(posts[2].friend.header_precedes_actor);
        assert_eq!(posts[2].time_label.as_ref().unwrap().text, "2d • Edited");
    }

    #[tokio::test]
    async fn test_load_more_button_only_while_posts_remain() {
        let feed = feed(DomVariant::Current);
        let adapter = DomAdapter::new(DomVariant::Current);
        let html = feed.snapshot().await.unwrap();
        let button = adapter.control_in_doc(&html, adapter::LOAD_MORE).unwrap();
        assert!(feed.click(&button).await.unwrap());
        assert_eq!(feed.visible_posts(), 3);
        let html = feed.snapshot().await.unwrap();
        assert!(adapter.control_in_doc(&html, adapter::LOAD_MORE).is_none());
    }

    #[tokio::test]
    async fn test_comment_flow_appends_comment() {
        let feed = feed(DomVariant::Legacy);
        let adapter = DomAdapter::new(DomVariant::Legacy);
        let pid = "urn:li:activity:1";
        let html = feed.snapshot().await.unwrap();
        let open = adapter.control_in_post(&html, pid, adapter::COMMENT_BUTTON).unwrap();
        assert!(feed.click(&open).await.unwrap());

        let html = feed.snapshot().await.unwrap();
        let editor = adapter.control_in_post(&html, pid, adapter::EDITOR).unwrap();
        assert!(feed.insert_text(&editor, "Well said").await.unwrap());
        let submit = adapter.control_in_post(&html, pid, adapter::SUBMIT).unwrap();
        assert!(feed.click(&submit).await.unwrap());

        let comments = feed.comments(pid);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[1].text, "Well said");
        assert_eq!(comments[1].author, "Operator");
    }

    #[tokio::test]
    async fn test_click_on_missing_selector_is_false() {
        let feed = feed(DomVariant::Current);
        assert!(!feed.click("button.nope").await.unwrap());
        assert!(!feed.insert_text("div.nope", "x").await.unwrap());
    }

    #[tokio::test]
    async fn test_modal_respects_render_lag() {
        let feed = feed(DomVariant::Current).with_quirks(Quirks { render_lag: 2, ..Default::default() });
        let adapter = DomAdapter::new(DomVariant::Current);
        let pid = "urn:li:activity:1";
        let html = feed.snapshot().await.unwrap();
        let open = adapter.control_in_post(&html, pid, adapter::COMMENT_BUTTON).unwrap();
        feed.click(&open).await.unwrap();
        let html = feed.snapshot().await.unwrap();
        let menu = adapter.control_in_post(&html, pid, adapter::IDENTITY_MENU).unwrap();
        feed.click(&menu).await.unwrap();

        assert!(!adapter.modal_open(&feed.snapshot().await.unwrap()));
        assert!(adapter.modal_open(&feed.snapshot().await.unwrap()));
    }

    #[test]
    fn test_long_form_labels() {
        assert_eq!(long_form("3h"), "3 hours ago");
        assert_eq!(long_form("1d"), "1 day ago");
        assert_eq!(long_form("2mo"), "2 months ago");
        assert_eq!(long_form("weird"), "weird");
    }

    #[test]
    fn test_fixture_json_parses_with_defaults() {
        let posts: Vec<SimPost> =
            serde_json::from_str(r#"[{"activity": 5, "author": "Ana"}]"#).unwrap();
        assert_eq!(posts[0].age, "1h");
        assert!(!posts[0].company);
        assert_eq!(posts[0].post_id(), "urn:li:activity:5");
    }
}
