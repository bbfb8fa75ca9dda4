/// Ordered track names and the position of the one playing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistCursor {
    tracks: Vec<String>,
    current: usize,
}

impl PlaylistCursor {
    pub fn new(tracks: Vec<String>) -> Self {
        Self { tracks, current: 0 }
    }

    /// Playlist that starts at `start` and wraps around through the tracks
    /// before it, e.g. `[a, b, c]` from `b` plays `b, c, a`.
    pub fn rotated(tracks: &[String], start: usize) -> Self {
        if tracks.is_empty() {
            return Self::default();
        }
        let start = start.min(tracks.len() - 1);
        let mut rotated = tracks[start..].to_vec();
        rotated.extend_from_slice(&tracks[..start]);
        Self::new(rotated)
    }

    pub fn tracks(&self) -> &[String] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn position(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<&str> {
        self.tracks.get(self.current).map(String::as_str)
    }

    /// Move to the next track. Past the end the cursor returns to the start
    /// and `None` is returned: the playlist is exhausted.
    pub fn advance(&mut self) -> Option<&str> {
        self.current += 1;
        if self.current < self.tracks.len() {
            self.current()
        } else {
            self.current = 0;
            None
        }
    }
}

/// Case-insensitive substring search over track names. An empty (or
/// whitespace-only) term matches everything.
pub fn search(catalog: &[String], term: &str) -> Vec<String> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return catalog.to_vec();
    }
    catalog
        .iter()
        .filter(|track| track.to_lowercase().contains(&term))
        .cloned()
        .collect()
}
