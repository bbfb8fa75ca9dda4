//! Messages between the UI and the background worker
use anyhow::Error;
use zest_player::PlaybackEvent;

// Requests from the UI to the worker
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    LoadCatalog,
    Play { tracks: Vec<String>, start: usize },
    Next,
    Stop,
    TogglePause,
}

// Responses from the worker back to the UI
#[derive(Debug)]
pub enum Response {
    CatalogLoaded(Result<Vec<String>, Error>),
    Playback(PlaybackEvent),
    Failed(String),
}
