use anyhow::Result;
use crossterm::event::KeyCode;
use log::{debug, warn};
use tokio::sync::mpsc;
use zest_player::{PlaybackEvent, SessionId, Termination};

use crate::actions::{Request, Response};
use crate::ui::UIState as UIApp;

pub struct AppController {
    pub ui_app: UIApp,
    req_tx: mpsc::Sender<Request>,
    /// Session of the most recent `Started` event.
    playing: Option<SessionId>,
}

impl AppController {
    pub fn new(req_tx: mpsc::Sender<Request>) -> Self {
        Self {
            ui_app: UIApp::new(),
            req_tx,
            playing: None,
        }
    }

    pub async fn initialize(&mut self) -> Result<()> {
        self.load_catalog();
        Ok(())
    }

    fn load_catalog(&mut self) {
        self.ui_app.is_fetching_catalog = true;
        if self.req_tx.try_send(Request::LoadCatalog).is_err() {
            self.ui_app.is_fetching_catalog = false;
        }
    }

    fn send(&mut self, request: Request) {
        if let Err(e) = self.req_tx.try_send(request) {
            warn!("Worker busy, dropped request: {}", e);
            self.ui_app.status_message = "Player busy, try again".to_string();
        }
    }

    /// Returns `true` when quitting was requested.
    pub async fn handle_key_event(&mut self, key_code: KeyCode) -> Result<bool> {
        if self.ui_app.search_input.is_some() {
            self.handle_search_key(key_code);
            return Ok(false);
        }

        match key_code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Char('Q') => {
                self.ui_app.quit();
                return Ok(true);
            }
            KeyCode::Up => self.ui_app.previous_track(),
            KeyCode::Down => self.ui_app.next_track(),
            KeyCode::Enter => self.play_selected(),
            KeyCode::Char(' ') => self.send(Request::TogglePause),
            KeyCode::Char('n') | KeyCode::Char('N') => self.send(Request::Next),
            KeyCode::Char('s') | KeyCode::Char('S') => self.send(Request::Stop),
            KeyCode::Char('r') | KeyCode::Char('R') => self.load_catalog(),
            KeyCode::Char('/') => {
                self.ui_app.search_input = Some(self.ui_app.filter.clone());
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_search_key(&mut self, key_code: KeyCode) {
        match key_code {
            KeyCode::Esc => self.ui_app.search_input = None,
            KeyCode::Enter => {
                let term = self.ui_app.search_input.take().unwrap_or_default();
                self.ui_app.apply_filter(&term);
                debug!("Filter {:?} matches {} tracks", term, self.ui_app.visible.len());
            }
            KeyCode::Backspace => {
                if let Some(input) = self.ui_app.search_input.as_mut() {
                    input.pop();
                }
            }
            KeyCode::Char(c) => {
                if let Some(input) = self.ui_app.search_input.as_mut() {
                    input.push(c);
                }
            }
            _ => {}
        }
    }

    /// The visible list becomes the playlist, starting at the selection.
    fn play_selected(&mut self) {
        if self.ui_app.selected_track().is_none() {
            return;
        }
        let request = Request::Play {
            tracks: self.ui_app.visible.clone(),
            start: self.ui_app.selected,
        };
        self.send(request);
    }

    pub fn should_quit(&self) -> bool {
        self.ui_app.should_quit
    }

    pub async fn process_response(&mut self, resp: Response) -> Result<()> {
        match resp {
            Response::CatalogLoaded(res) => {
                self.ui_app.is_fetching_catalog = false;
                match res {
                    Ok(catalog) => {
                        self.ui_app.status_message = format!("{} tracks available", catalog.len());
                        self.ui_app.set_catalog(catalog);
                    }
                    Err(e) => {
                        self.ui_app.status_message = format!("Could not load catalog: {}", e);
                    }
                }
            }
            Response::Playback(event) => {
                if let PlaybackEvent::Started { session, track } = &event {
                    self.playing = Some(*session);
                    self.ui_app.status_message = format!("♪ {}", track);
                } else if self.playing != Some(event.session()) {
                    debug!("Ignoring event of superseded session {}", event.session());
                } else if let PlaybackEvent::Ended {
                    termination: Termination::FetchFailed,
                    ..
                } = event
                {
                    self.ui_app.status_message = "Stream interrupted".to_string();
                }
            }
            Response::Failed(message) => {
                self.ui_app.status_message = message;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_with_catalog(tracks: &[&str]) -> (AppController, mpsc::Receiver<Request>) {
        let (tx, rx) = mpsc::channel(8);
        let mut app = AppController::new(tx);
        app.ui_app
            .set_catalog(tracks.iter().map(|s| s.to_string()).collect());
        (app, rx)
    }

    async fn press(app: &mut AppController, keys: &[KeyCode]) {
        for key in keys {
            app.handle_key_event(*key).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_enter_plays_visible_list_from_selection() {
        let (mut app, mut rx) = controller_with_catalog(&["a.mp3", "b.mp3", "c.mp3"]);

        press(&mut app, &[KeyCode::Down, KeyCode::Enter]).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            Request::Play {
                tracks: vec!["a.mp3".into(), "b.mp3".into(), "c.mp3".into()],
                start: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_search_filters_then_plays_matches() {
        let (mut app, mut rx) =
            controller_with_catalog(&["Blue Train.mp3", "So What.mp3", "blue in green.mp3"]);

        press(&mut app, &[KeyCode::Char('/')]).await;
        for c in "BLUX".chars() {
            press(&mut app, &[KeyCode::Char(c)]).await;
        }
        press(&mut app, &[KeyCode::Backspace, KeyCode::Char('E'), KeyCode::Enter]).await;

        assert_eq!(app.ui_app.search_input, None);
        assert_eq!(app.ui_app.filter, "BLUE");
        assert_eq!(app.ui_app.visible.len(), 2);

        press(&mut app, &[KeyCode::Down, KeyCode::Enter]).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            Request::Play {
                tracks: vec!["Blue Train.mp3".into(), "blue in green.mp3".into()],
                start: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_keys_in_search_mode_are_not_commands() {
        let (mut app, mut rx) = controller_with_catalog(&["a.mp3"]);

        let quit = {
            press(&mut app, &[KeyCode::Char('/'), KeyCode::Char('q'), KeyCode::Char('n')]).await;
            app.handle_key_event(KeyCode::Esc).await.unwrap()
        };

        assert!(!quit);
        assert!(!app.should_quit());
        assert_eq!(app.ui_app.search_input, None);
        assert_eq!(app.ui_app.filter, "");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_search_restores_catalog() {
        let (mut app, _rx) = controller_with_catalog(&["a.mp3", "b.mp3"]);
        app.ui_app.apply_filter("a");
        assert_eq!(app.ui_app.visible.len(), 1);

        press(&mut app, &[KeyCode::Char('/'), KeyCode::Backspace, KeyCode::Enter]).await;

        assert_eq!(app.ui_app.visible.len(), 2);
    }

    #[tokio::test]
    async fn test_playback_keys_send_requests() {
        let (mut app, mut rx) = controller_with_catalog(&[]);

        press(&mut app, &[KeyCode::Char(' '), KeyCode::Char('n'), KeyCode::Char('s'), KeyCode::Enter]).await;

        assert_eq!(rx.try_recv().unwrap(), Request::TogglePause);
        assert_eq!(rx.try_recv().unwrap(), Request::Next);
        assert_eq!(rx.try_recv().unwrap(), Request::Stop);
        assert!(rx.try_recv().is_err());
        assert!(!app.handle_key_event(KeyCode::Char('x')).await.unwrap());
        assert!(app.handle_key_event(KeyCode::Char('q')).await.unwrap());
    }

    #[tokio::test]
    async fn test_catalog_response_updates_list() {
        let (mut app, mut rx) = controller_with_catalog(&[]);
        app.initialize().await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), Request::LoadCatalog);
        assert!(app.ui_app.is_fetching_catalog);

        app.process_response(Response::CatalogLoaded(Ok(vec!["x.mp3".into()])))
            .await
            .unwrap();

        assert!(!app.ui_app.is_fetching_catalog);
        assert_eq!(app.ui_app.visible, vec!["x.mp3".to_string()]);
        assert_eq!(app.ui_app.status_message, "1 tracks available");
    }

    #[tokio::test]
    async fn test_late_failure_of_previous_track_keeps_status() {
        let (mut app, _rx) = controller_with_catalog(&["a.mp3", "b.mp3"]);
        let playback = |event| Response::Playback(event);

        app.process_response(playback(PlaybackEvent::Started { session: 1, track: "a.mp3".into() }))
            .await
            .unwrap();
        app.process_response(playback(PlaybackEvent::Started { session: 2, track: "b.mp3".into() }))
            .await
            .unwrap();
        app.process_response(playback(PlaybackEvent::Ended {
            session: 1,
            termination: Termination::FetchFailed,
        }))
        .await
        .unwrap();
        assert_eq!(app.ui_app.status_message, "♪ b.mp3");

        app.process_response(playback(PlaybackEvent::Ended {
            session: 2,
            termination: Termination::FetchFailed,
        }))
        .await
        .unwrap();
        assert_eq!(app.ui_app.status_message, "Stream interrupted");
    }
}
