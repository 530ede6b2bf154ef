use quick_xml::Reader;
use quick_xml::events::Event;

use super::{FetchError, HttpFetcher};

/// How many item titles are kept from the top of a feed.
const MAX_TITLES: usize = 10;

/// Item count and leading titles of an RSS 2.0 or Atom feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedDigest {
    pub items: usize,
    pub titles: Vec<String>,
}

pub async fn fetch(http: &HttpFetcher, url: &str) -> Result<FeedDigest, FetchError> {
    let body = http.get_text(url.trim()).await?;
    parse_feed(&body)
}

/// Count `<item>` (RSS) or `<entry>` (Atom) elements and collect their titles.
///
/// A document without a root element is a parse error; a well-formed feed
/// with no items is a valid, empty digest.
pub fn parse_feed(xml: &str) -> Result<FeedDigest, FetchError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut digest = FeedDigest::default();
    let mut saw_root = false;
    let mut in_item = false;
    let mut in_title = false;
    let mut title = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                saw_root = true;
                match e.local_name().as_ref() {
                    b"item" | b"entry" => {
                        in_item = true;
                        digest.items += 1;
                    }
                    b"title" if in_item => {
                        in_title = true;
                        title.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                saw_root = true;
                if matches!(e.local_name().as_ref(), b"item" | b"entry") {
                    digest.items += 1;
                }
            }
            Ok(Event::Text(t)) if in_title => {
                let text = t
                    .unescape()
                    .map_err(|err| FetchError::Parse(format!("RSS: {err}")))?;
                title.push_str(&text);
            }
            Ok(Event::CData(c)) if in_title => {
                title.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"title" if in_title => {
                    in_title = false;
                    let trimmed = title.trim();
                    if !trimmed.is_empty() && digest.titles.len() < MAX_TITLES {
                        digest.titles.push(trimmed.to_string());
                    }
                }
                b"item" | b"entry" => in_item = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(FetchError::Parse(format!(
                    "RSS at byte {}: {err}",
                    reader.error_position()
                )));
            }
        }
    }

    if !saw_root {
        return Err(FetchError::Parse("RSS: no root element".to_string()));
    }
    Ok(digest)
}
