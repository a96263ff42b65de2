use chrono::{DateTime, Utc};

/// Compute the identity key used to decide whether an incoming entry is
/// already stored under its feed.
///
/// A provider-assigned guid alone determines identity when present.
/// Otherwise every available weak signal (link, title, publish date as
/// whole seconds) is accumulated into the key, joined with `|`, so that
/// feeds reusing titles across posts do not merge falsely. Entries with
/// no usable signal at all get a random key and are always treated as
/// new.
pub fn item_key(
    guid: Option<&str>,
    link: Option<&str>,
    title: Option<&str>,
    pub_date: Option<DateTime<Utc>>,
) -> String {
    if let Some(guid) = non_empty(guid) {
        return format!("guid:{guid}");
    }

    let mut parts = Vec::with_capacity(3);
    if let Some(link) = non_empty(link) {
        parts.push(format!("link:{link}"));
    }
    if let Some(title) = non_empty(title) {
        parts.push(format!("title:{title}"));
    }
    if let Some(date) = pub_date {
        parts.push(format!("date:{}", date.timestamp()));
    }

    if parts.is_empty() {
        return format!("rand:{}", uuid::Uuid::new_v4());
    }

    parts.join("|")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
