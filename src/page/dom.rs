//! Small helpers over `scraper` snapshots shared by the adapter and the
//! simulated feed. `Html` is not `Send`, so everything here is synchronous and
//! callers parse, extract owned data, and drop the document before awaiting.

use scraper::{ElementRef, Html, Selector};

pub fn parse(html: &str) -> Html {
    Html::parse_document(html)
}

/// Compile a selector, logging instead of failing on malformed input.
pub fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(css, error = ?e, "invalid selector");
            None
        }
    }
}

pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of the element and all of its descendants, whitespace collapsed.
pub fn full_text(el: ElementRef<'_>) -> String {
    collapse_ws(&el.text().collect::<Vec<_>>().join(" "))
}

/// Text held directly by this element, ignoring descendants. Used for
/// text-matching so a wrapper around several names never matches.
pub fn own_text(el: ElementRef<'_>) -> String {
    let parts: Vec<String> = el
        .children()
        .filter_map(|n| n.value().as_text().map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
        .collect();
    collapse_ws(&parts.join(" "))
}

/// First match of the first selector in `candidates` that matches anything
/// inside `scope`.
pub fn first_within<'a>(scope: ElementRef<'a>, candidates: &[&str]) -> Option<ElementRef<'a>> {
    candidates.iter().find_map(|css| {
        let sel = selector(css)?;
        scope.select(&sel).next()
    })
}

/// Same as [`first_within`] but over the whole document.
pub fn first_in_doc<'a>(doc: &'a Html, candidates: &[&str]) -> Option<ElementRef<'a>> {
    candidates.iter().find_map(|css| {
        let sel = selector(css)?;
        doc.select(&sel).next()
    })
}

/// Like [`first_in_doc`] but also returns which candidate matched.
pub fn first_matching_selector<'c>(doc: &Html, candidates: &[&'c str]) -> Option<&'c str> {
    candidates.iter().copied().find(|css| {
        selector(css).is_some_and(|sel| doc.select(&sel).next().is_some())
    })
}

/// Index of `target` in the document-order walk of `scope`'s subtree.
pub fn position_in(scope: ElementRef<'_>, target: ElementRef<'_>) -> Option<usize> {
    scope
        .descendants()
        .position(|node| node.id() == target.id())
}

/// A structural path (`html > body > div:nth-child(3) > ...`) that selects
/// exactly this element in the snapshot it came from.
pub fn css_path(el: ElementRef<'_>) -> String {
    let mut segments = Vec::new();
    let mut current = Some(el);
    while let Some(node) = current {
        let name = node.value().name();
        let parent = node.parent().and_then(ElementRef::wrap);
        if parent.is_none() {
            segments.push(name.to_string());
            break;
        }
        let index = node
            .prev_siblings()
            .filter(|s| s.value().is_element())
            .count()
            + 1;
        segments.push(format!("{}:nth-child({})", name, index));
        current = parent;
    }
    segments.reverse();
    segments.join(" > ")
}
