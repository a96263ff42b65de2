pub mod dedup;
pub mod fetcher;
pub mod normalize;
pub mod opml;
pub mod parser;
pub mod validate;

pub use dedup::item_key;
pub use fetcher::{DocumentFetcher, DocumentFetching, FetchedDocument};
pub use normalize::normalize_summary;
pub use opml::{parse_opml, sanitize_feed_urls, SanitizedOpml, SKIPPED_PREVIEW_LIMIT};
pub use parser::parse_feed;
pub use validate::{validate_feed_url, validate_opml_url};
