use crate::application::dual_store::DualModeStore;
use crate::domain::models::{Facet, Filter, StudySpot, StudySpotDraft};
use crate::domain::search::{
    INITIAL_MAP_QUERY, SearchPhrasing, compose_search_query, place_embed_url, search_embed_url,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::maps_key::MapsKeySource;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

const SAVED_FROM_SEARCH_NOTE: &str = "Added from search";
const SAVED_MESSAGE: &str = "Spot saved to favorites!";
const SAVED_LOCALLY_MESSAGE: &str = "Spot saved to favorites! Sign in to sync across devices.";
const SAVE_FAILED_MESSAGE: &str = "Failed to save spot. Please try again.";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SaveSpotOutcome {
    pub spot: Option<StudySpot>,
    pub message: String,
}

#[derive(Debug, Default)]
struct FinderState {
    filter: Filter,
    map_url: Option<String>,
}

/// Facet filter, current map URL and the favourite-spots collection.
pub struct SpotFinder {
    key_source: Arc<dyn MapsKeySource>,
    favorites: Arc<DualModeStore<StudySpot>>,
    phrasing: SearchPhrasing,
    state: Mutex<FinderState>,
}

impl SpotFinder {
    pub fn new(
        key_source: Arc<dyn MapsKeySource>,
        favorites: Arc<DualModeStore<StudySpot>>,
        phrasing: SearchPhrasing,
    ) -> Self {
        Self {
            key_source,
            favorites,
            phrasing,
            state: Mutex::new(FinderState::default()),
        }
    }

    pub fn filter(&self) -> Result<Filter, InfraError> {
        Ok(self.lock_state()?.filter)
    }

    pub fn map_url(&self) -> Result<Option<String>, InfraError> {
        Ok(self.lock_state()?.map_url.clone())
    }

    pub fn toggle_facet(&self, facet: Facet) -> Result<Filter, InfraError> {
        let mut state = self.lock_state()?;
        state.filter.toggle(facet);
        Ok(state.filter)
    }

    /// Points the map at the default query. A missing or unreachable key is
    /// logged and leaves the map blank.
    pub async fn initialize(&self) -> Result<Option<String>, InfraError> {
        let key = match self.key_source.fetch_key().await {
            Ok(key) if !key.is_empty() => key,
            Ok(_) => {
                log::warn!("maps key is not configured; map stays blank");
                return self.map_url();
            }
            Err(error) => {
                log::error!("failed to load maps key: {error}");
                return self.map_url();
            }
        };
        let url = search_embed_url(&key, INITIAL_MAP_QUERY).map_err(invalid_url)?;
        self.set_map_url(url)
    }

    pub async fn search(&self, query: &str) -> Result<Option<String>, InfraError> {
        let composed = compose_search_query(query, &self.filter()?, &self.phrasing);
        let Some(key) = self.fetch_key().await? else {
            return self.map_url();
        };
        let url = search_embed_url(&key, &composed).map_err(invalid_url)?;
        self.set_map_url(url)
    }

    pub async fn view_spot(&self, spot_id: &str) -> Result<Option<String>, InfraError> {
        let spot = self
            .favorites
            .list()?
            .into_iter()
            .find(|spot| spot.id == spot_id)
            .ok_or_else(|| InfraError::Validation(format!("Unknown spot: {spot_id}")))?;
        let Some(key) = self.fetch_key().await? else {
            return self.map_url();
        };
        let url = place_embed_url(&key, &spot, &self.phrasing.region).map_err(invalid_url)?;
        self.set_map_url(url)
    }

    /// Stores the spot with the facets currently selected.
    pub async fn save_spot(&self, name: &str, address: Option<&str>) -> Result<SaveSpotOutcome, InfraError> {
        let filter = self.filter()?;
        let draft = StudySpotDraft::new(name, address, filter, Some(SAVED_FROM_SEARCH_NOTE))
            .ok_or_else(|| InfraError::Validation("Please enter a spot name".to_string()))?;

        let synced = self.favorites.is_remote();
        let outcome = match self.favorites.add(draft).await? {
            Some(spot) => SaveSpotOutcome {
                spot: Some(spot),
                message: if synced { SAVED_MESSAGE } else { SAVED_LOCALLY_MESSAGE }.to_string(),
            },
            None => SaveSpotOutcome {
                spot: None,
                message: SAVE_FAILED_MESSAGE.to_string(),
            },
        };
        Ok(outcome)
    }

    pub fn favorites(&self) -> Result<Vec<StudySpot>, InfraError> {
        self.favorites.list()
    }

    /// Re-fetched on every call. `Ok(None)` when the source is unreachable.
    async fn fetch_key(&self) -> Result<Option<String>, InfraError> {
        match self.key_source.fetch_key().await {
            Ok(key) if key.is_empty() => Err(InfraError::Validation(
                "Maps API key is not configured".to_string(),
            )),
            Ok(key) => Ok(Some(key)),
            Err(error) => {
                log::error!("failed to load maps key: {error}");
                Ok(None)
            }
        }
    }

    fn set_map_url(&self, url: String) -> Result<Option<String>, InfraError> {
        let mut state = self.lock_state()?;
        state.map_url = Some(url);
        Ok(state.map_url.clone())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, FinderState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("spot finder lock poisoned: {error}")))
    }
}

fn invalid_url(error: url::ParseError) -> InfraError {
    InfraError::InvalidConfig(format!("invalid maps url: {error}"))
}
