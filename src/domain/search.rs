use crate::domain::models::{Filter, StudySpot};
use url::Url;

pub const DEFAULT_SEARCH_PHRASE: &str = "study spots";
pub const DEFAULT_REGION: &str = "singapore";
pub const INITIAL_MAP_QUERY: &str = "study spots in Singapore";

const MAPS_EMBED_SEARCH_ENDPOINT: &str = "https://www.google.com/maps/embed/v1/search";
const MAPS_EMBED_PLACE_ENDPOINT: &str = "https://www.google.com/maps/embed/v1/place";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPhrasing {
    pub default_phrase: String,
    pub region: String,
}

impl Default for SearchPhrasing {
    fn default() -> Self {
        Self {
            default_phrase: DEFAULT_SEARCH_PHRASE.to_string(),
            region: DEFAULT_REGION.to_string(),
        }
    }
}

/// Composes the free-text query handed to the maps widget: base text, facet
/// keywords in declaration order, then the region unless already mentioned.
///
/// The query is trimmed first, so whitespace-only input counts as empty and
/// falls back to the default phrase.
pub fn compose_search_query(query: &str, filter: &Filter, phrasing: &SearchPhrasing) -> String {
    let trimmed = query.trim();
    let mut composed = if trimmed.is_empty() {
        phrasing.default_phrase.trim().to_string()
    } else {
        trimmed.to_string()
    };

    for facet in filter.enabled_facets() {
        composed.push(' ');
        composed.push_str(facet.keyword());
    }

    let region = phrasing.region.trim();
    if !region.is_empty() && !composed.to_lowercase().contains(&region.to_lowercase()) {
        composed.push(' ');
        composed.push_str(region);
    }
    composed
}

pub fn search_embed_url(api_key: &str, query: &str) -> Result<String, url::ParseError> {
    embed_url(MAPS_EMBED_SEARCH_ENDPOINT, api_key, query)
}

/// Centers the widget on a saved spot; the region stands in for a missing address.
pub fn place_embed_url(api_key: &str, spot: &StudySpot, region: &str) -> Result<String, url::ParseError> {
    let location = spot
        .address
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(region);
    let query = format!("{} {}", spot.name, location);
    embed_url(MAPS_EMBED_PLACE_ENDPOINT, api_key, &query)
}

fn embed_url(endpoint: &str, api_key: &str, query: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(endpoint)?;
    url.query_pairs_mut()
        .append_pair("key", api_key)
        .append_pair("q", query);
    Ok(url.to_string())
}
