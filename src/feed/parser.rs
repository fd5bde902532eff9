use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use thiserror::Error;
use url::Url;

use crate::util::{sanitize, strip_control_chars};

/// SEC-003: Maximum element nesting accepted in a feed document.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ParseError {
    /// XML syntax error reported by the reader (unclosed tag, mismatched end tag...)
    #[error("not well-formed XML: {0}")]
    Malformed(String),

    /// Document ended while elements were still open.
    #[error("unexpected end of document inside <{0}>")]
    Unclosed(String),

    /// No root element at all (empty body, plain text, HTML fragment without markup).
    #[error("document has no root element")]
    NoRoot,

    /// SEC-003: nesting deeper than [`MAX_DEPTH`].
    #[error("nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),
}

/// One entry as found in the document, before identity derivation.
///
/// Text fields are already sanitized to plain text. Every field is optional
/// because real-world feeds omit any of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    /// `description` (RSS) or `summary` (Atom)
    pub summary: Option<String>,
    /// `content:encoded` (RSS) or `content` (Atom)
    pub content: Option<String>,
    /// Publish-or-update timestamp as written in the document
    pub published: Option<String>,
    /// `guid` (RSS) or `id` (Atom)
    pub source_id: Option<String>,
}

impl RawEntry {
    /// Body text: explicit content, else description/summary.
    pub fn body(&self) -> Option<&str> {
        self.content.as_deref().or(self.summary.as_deref())
    }

    /// Excerpt source: description/summary, else content.
    pub fn snippet_source(&self) -> Option<&str> {
        self.summary.as_deref().or(self.content.as_deref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    /// Channel (RSS) or feed (Atom) title
    pub title: Option<String>,
    pub entries: Vec<RawEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Rss,
    Atom,
}

const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";
const RSS1_NS: &[u8] = b"http://purl.org/rss/1.0/";
const RSS090_NS: &[u8] = b"http://my.netscape.com/rdf/simple/0.9/";
const CONTENT_NS: &[u8] = b"http://purl.org/rss/1.0/modules/content/";
const DC_NS: &[u8] = b"http://purl.org/dc/elements/1.1/";

/// Namespace class of an element, after prefix resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ns {
    /// No namespace, or the core RSS 1.0/0.90/Atom vocabulary
    Core,
    /// `content:` module (`content:encoded`)
    Content,
    /// Dublin Core (`dc:date`)
    Dc,
    /// Extensions (media, itunes, ...) and undeclared prefixes
    Other,
}

impl Ns {
    fn classify(resolved: &ResolveResult<'_>) -> Self {
        match resolved {
            ResolveResult::Unbound => Ns::Core,
            ResolveResult::Bound(Namespace(uri)) => match *uri {
                ATOM_NS | RSS1_NS | RSS090_NS => Ns::Core,
                CONTENT_NS => Ns::Content,
                DC_NS => Ns::Dc,
                _ => Ns::Other,
            },
            ResolveResult::Unknown(_) => Ns::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    TextLink,
    Summary,
    Content,
    PubDate,
    DcDate,
    Published,
    Updated,
    SourceId,
}

impl Field {
    /// `media:content`, `itunes:summary` and friends are not entry fields.
    fn resolve(ns: Ns, name: &[u8]) -> Option<Self> {
        match (ns, name) {
            (Ns::Core, b"title") => Some(Field::Title),
            (Ns::Core, b"link") => Some(Field::TextLink),
            (Ns::Core, b"description" | b"summary") => Some(Field::Summary),
            (Ns::Core, b"content") | (Ns::Content, b"encoded") => Some(Field::Content),
            (Ns::Core, b"pubDate") => Some(Field::PubDate),
            (Ns::Dc, b"date") => Some(Field::DcDate),
            (Ns::Core, b"published") => Some(Field::Published),
            (Ns::Core, b"updated") => Some(Field::Updated),
            (Ns::Core, b"guid" | b"id") => Some(Field::SourceId),
            _ => None,
        }
    }
}

/// Accumulates one `<item>`/`<entry>` while the reader walks its children.
#[derive(Debug, Default)]
struct EntryBuilder {
    depth: usize,
    title: Option<String>,
    text_link: Option<String>,
    alternate_link: Option<String>,
    other_link: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    pub_date: Option<String>,
    dc_date: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    source_id: Option<String>,
    /// Field currently being captured, with the depth of its element
    capture: Option<(Field, usize, String)>,
}

impl EntryBuilder {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            ..Self::default()
        }
    }

    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Title => &mut self.title,
            Field::TextLink => &mut self.text_link,
            Field::Summary => &mut self.summary,
            Field::Content => &mut self.content,
            Field::PubDate => &mut self.pub_date,
            Field::DcDate => &mut self.dc_date,
            Field::Published => &mut self.published,
            Field::Updated => &mut self.updated,
            Field::SourceId => &mut self.source_id,
        }
    }

    /// First non-blank value wins for every field.
    fn store(&mut self, field: Field, value: String) {
        if value.trim().is_empty() {
            return;
        }
        let slot = self.slot(field);
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    fn push_atom_link(&mut self, start: &BytesStart<'_>) {
        let mut href = None;
        let mut rel = None;
        for attr in start.attributes().flatten() {
            let value = attr
                .unescape_value()
                .map(Cow::into_owned)
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            match attr.key.local_name().as_ref() {
                b"href" => href = Some(value),
                b"rel" => rel = Some(value),
                _ => {}
            }
        }
        let Some(href) = href.filter(|h| !h.trim().is_empty()) else {
            return;
        };
        let is_alternate = rel.as_deref().map_or(true, |r| r.trim() == "alternate");
        if is_alternate && self.alternate_link.is_none() {
            self.alternate_link = Some(href);
        } else if self.other_link.is_none() {
            self.other_link = Some(href);
        }
    }

    fn finish(self, base: Option<&Url>) -> RawEntry {
        let link = self
            .alternate_link
            .or(self.other_link)
            .or(self.text_link)
            .and_then(|l| clean_token(&l))
            .map(|l| resolve_link(&l, base));

        RawEntry {
            title: self.title.and_then(|t| non_empty(sanitize(&t))),
            link,
            summary: self.summary.and_then(|s| non_empty(sanitize(&s))),
            content: self.content.and_then(|c| non_empty(sanitize(&c))),
            published: self
                .pub_date
                .or(self.dc_date)
                .or(self.published)
                .or(self.updated)
                .and_then(|p| clean_token(&p)),
            source_id: self.source_id.and_then(|id| clean_token(&id)),
        }
    }
}

/// Parses an RSS 2.0 / RSS 1.0 / Atom 1.0 document into raw entries.
///
/// The document family is detected from the elements present: RSS `item`
/// elements are used when any exist, otherwise Atom `entry` elements. A
/// well-formed document with neither yields an empty entry list, not an
/// error. `feed_url` is used to resolve relative entry links.
///
/// # Errors
///
/// Returns [`ParseError`] when the input is not well-formed markup.
///
/// # Security
///
/// quick-xml (0.37) never expands `<!ENTITY>` declarations, so XXE payloads
/// stay inert text. Nesting depth is capped at [`MAX_DEPTH`].
pub fn parse_document(document: &str, feed_url: &str) -> Result<ParsedFeed, ParseError> {
    let mut reader = NsReader::from_str(document);
    reader.config_mut().check_end_names = true;

    let base = Url::parse(feed_url).ok();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut saw_root = false;
    let mut feed_title: Option<String> = None;
    // Feed title being captured, with the depth of its element
    let mut capturing_feed_title: Option<(usize, String)> = None;
    let mut current: Option<(Family, EntryBuilder)> = None;
    let mut rss_items = Vec::new();
    let mut atom_entries = Vec::new();

    loop {
        let (resolved, event) = reader
            .read_resolved_event()
            .map_err(|e| ParseError::Malformed(e.to_string()))?;
        let ns = Ns::classify(&resolved);

        match event {
            Event::Start(start) => {
                saw_root = true;
                let name = start.local_name().as_ref().to_vec();
                let depth = stack.len() + 1;
                if depth > MAX_DEPTH {
                    return Err(ParseError::MaxDepthExceeded(MAX_DEPTH));
                }

                match current.as_mut() {
                    Some((_, entry)) => open_entry_child(entry, &start, ns, &name, depth),
                    None => {
                        if let Some((_, buf)) = capturing_feed_title.as_mut() {
                            buf.push(' ');
                        } else if let Some(family) = entry_family(ns, &name) {
                            current = Some((family, EntryBuilder::new(depth)));
                        } else if ns == Ns::Core
                            && name == b"title"
                            && feed_title.is_none()
                            && stack
                                .last()
                                .is_some_and(|parent| parent == b"channel" || parent == b"feed")
                        {
                            capturing_feed_title = Some((depth, String::new()));
                        }
                    }
                }

                stack.push(name);
            }
            Event::Empty(start) => {
                saw_root = true;
                let name = start.local_name().as_ref().to_vec();
                match current.as_mut() {
                    Some((_, entry)) => {
                        if let Some((_, _, buf)) = entry.capture.as_mut() {
                            buf.push(' ');
                        } else if ns == Ns::Core && name == b"link" && entry.depth == stack.len()
                        {
                            entry.push_atom_link(&start);
                        }
                    }
                    None => match entry_family(ns, &name) {
                        Some(Family::Rss) => rss_items.push(RawEntry::default()),
                        Some(Family::Atom) => atom_entries.push(RawEntry::default()),
                        None => {}
                    },
                }
            }
            Event::End(_) => {
                let depth = stack.len();
                stack.pop();

                if let Some((title_depth, buf)) = capturing_feed_title.as_mut() {
                    if *title_depth == depth {
                        feed_title = clean_token(&sanitize(buf));
                        capturing_feed_title = None;
                    } else {
                        buf.push(' ');
                    }
                    continue;
                }

                let Some((family, entry)) = current.as_mut() else {
                    continue;
                };

                if entry.depth == depth {
                    let family = *family;
                    if let Some((_, entry)) = current.take() {
                        let raw = entry.finish(base.as_ref());
                        match family {
                            Family::Rss => rss_items.push(raw),
                            Family::Atom => atom_entries.push(raw),
                        }
                    }
                } else if entry
                    .capture
                    .as_ref()
                    .is_some_and(|(_, capture_depth, _)| *capture_depth == depth)
                {
                    if let Some((field, _, value)) = entry.capture.take() {
                        entry.store(field, value);
                    }
                } else if let Some((_, _, buf)) = entry.capture.as_mut() {
                    buf.push(' ');
                }
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map(Cow::into_owned)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                append_text(&mut current, &mut capturing_feed_title, &value);
            }
            Event::CData(cdata) => {
                let value = String::from_utf8_lossy(&cdata).into_owned();
                append_text(&mut current, &mut capturing_feed_title, &value);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Unclosed(
            String::from_utf8_lossy(open).into_owned(),
        ));
    }
    if !saw_root {
        return Err(ParseError::NoRoot);
    }

    let entries = if !rss_items.is_empty() {
        rss_items
    } else {
        atom_entries
    };

    tracing::debug!(
        feed = %feed_url,
        entries = entries.len(),
        "Parsed feed document"
    );

    Ok(ParsedFeed {
        title: feed_title,
        entries,
    })
}

fn entry_family(ns: Ns, name: &[u8]) -> Option<Family> {
    match (ns, name) {
        (Ns::Core, b"item") => Some(Family::Rss),
        (Ns::Core, b"entry") => Some(Family::Atom),
        _ => None,
    }
}

fn open_entry_child(
    entry: &mut EntryBuilder,
    start: &BytesStart<'_>,
    ns: Ns,
    name: &[u8],
    depth: usize,
) {
    if let Some((_, _, buf)) = entry.capture.as_mut() {
        // Nested markup inside a captured field (Atom xhtml content)
        buf.push(' ');
        return;
    }
    if depth != entry.depth + 1 {
        return;
    }
    if ns == Ns::Core && name == b"link" {
        entry.push_atom_link(start);
    }
    if let Some(field) = Field::resolve(ns, name) {
        entry.capture = Some((field, depth, String::new()));
    }
}

fn append_text(
    current: &mut Option<(Family, EntryBuilder)>,
    feed_title: &mut Option<(usize, String)>,
    value: &str,
) {
    if let Some((_, title)) = feed_title.as_mut() {
        title.push_str(value);
        return;
    }
    if let Some((_, entry)) = current.as_mut() {
        if let Some((_, _, buf)) = entry.capture.as_mut() {
            buf.push_str(value);
        }
    }
}

fn clean_token(value: &str) -> Option<String> {
    non_empty(strip_control_chars(value).trim().to_string())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn resolve_link(link: &str, base: Option<&Url>) -> String {
    if Url::parse(link).is_ok() {
        return link.to_string();
    }
    base.and_then(|b| b.join(link).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| link.to_string())
}
