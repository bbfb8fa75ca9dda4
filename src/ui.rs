use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};
use zest_player::playlist;
use zest_player::{SessionState, StreamController, Termination};

// Layout constants
const HEADER_HEIGHT: u16 = 4;
const SEARCH_HEIGHT: u16 = 3;
const STATUS_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 3;
const MARGIN: u16 = 1;

pub const MAX_VISIBLE_TRACKS: usize = 100;

/// Snapshot of the engine, refreshed once per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub track: Option<String>,
    pub state: SessionState,
    pub duration: f64,
    pub paused: bool,
}

impl Default for PlayerStatus {
    fn default() -> Self {
        Self {
            track: None,
            state: SessionState::Idle,
            duration: 0.0,
            paused: false,
        }
    }
}

impl PlayerStatus {
    pub fn capture(controller: &StreamController) -> Self {
        Self {
            track: controller.current_track(),
            state: controller.state(),
            duration: controller.published_duration(),
            paused: controller.is_paused(),
        }
    }

    fn label(&self) -> &'static str {
        match self.state {
            SessionState::Idle | SessionState::Cancelled => "STOPPED",
            _ if self.paused => "PAUSED",
            SessionState::Fetching(_) | SessionState::Enqueuing(_) => "STREAMING",
            SessionState::Drained(Termination::EndOfTrack) => "PLAYING",
            SessionState::Drained(Termination::FetchFailed) => "INTERRUPTED",
        }
    }
}

pub struct UIState {
    pub catalog: Vec<String>,
    /// Filtered catalog, capped at [`MAX_VISIBLE_TRACKS`].
    pub visible: Vec<String>,
    pub selected: usize,
    pub list_state: ListState,
    pub filter: String,
    /// Text being typed while in search mode.
    pub search_input: Option<String>,
    pub status: PlayerStatus,
    pub status_message: String,
    pub is_fetching_catalog: bool,
    pub should_quit: bool,
}

impl UIState {
    pub fn new() -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            catalog: Vec::new(),
            visible: Vec::new(),
            selected: 0,
            list_state,
            filter: String::new(),
            search_input: None,
            status: PlayerStatus::default(),
            status_message: String::new(),
            is_fetching_catalog: false,
            should_quit: false,
        }
    }

    pub fn set_catalog(&mut self, catalog: Vec<String>) {
        self.catalog = catalog;
        self.refresh_visible();
    }

    pub fn apply_filter(&mut self, term: &str) {
        self.filter = term.trim().to_string();
        self.refresh_visible();
    }

    fn refresh_visible(&mut self) {
        let mut visible = playlist::search(&self.catalog, &self.filter);
        visible.truncate(MAX_VISIBLE_TRACKS);
        self.visible = visible;
        self.select_track(0);
    }

    pub fn selected_track(&self) -> Option<&str> {
        self.visible.get(self.selected).map(String::as_str)
    }

    pub fn select_track(&mut self, index: usize) {
        if index < self.visible.len() {
            self.selected = index;
            self.list_state.select(Some(index));
        } else {
            self.selected = 0;
            self.list_state.select(if self.visible.is_empty() { None } else { Some(0) });
        }
    }

    pub fn next_track(&mut self) {
        if !self.visible.is_empty() {
            self.select_track((self.selected + 1) % self.visible.len());
        }
    }

    pub fn previous_track(&mut self) {
        if !self.visible.is_empty() {
            let prev = if self.selected == 0 {
                self.visible.len() - 1
            } else {
                self.selected - 1
            };
            self.select_track(prev);
        }
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }
}

/// `m:ss`, e.g. `3:07` for 187 seconds.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

pub fn render_ui(f: &mut Frame, app: &mut UIState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(MARGIN)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Length(SEARCH_HEIGHT),
            Constraint::Min(5),
            Constraint::Length(STATUS_HEIGHT),
            Constraint::Length(FOOTER_HEIGHT),
        ])
        .split(f.area());

    render_header(f, chunks[0], app);
    render_search(f, chunks[1], app);
    render_track_list(f, chunks[2], app);
    render_status(f, chunks[3], app);
    render_footer(f, chunks[4], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &UIState) {
    let status = &app.status;
    let track = status.track.as_deref().unwrap_or("nothing");

    let content = vec![
        Line::from(vec![
            Span::styled("ZEST", Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD)),
            Span::styled(" - chunked stream player ", Style::default().fg(Color::Cyan)),
            Span::styled(status.label(), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        ]),
        Line::from(vec![
            Span::styled("Now Playing: ", Style::default()),
            Span::styled(track, Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
            Span::styled(" • ", Style::default().fg(Color::Gray)),
            Span::styled(format_duration(status.duration), Style::default().fg(Color::Green)),
        ]),
    ];

    let header = Paragraph::new(Text::from(content)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta))
            .title("Now Playing"),
    );

    f.render_widget(header, area);
}

fn render_search(f: &mut Frame, area: Rect, app: &UIState) {
    let (text, style, title) = match &app.search_input {
        Some(input) => (
            format!("{}_", input),
            Style::default().fg(Color::Yellow),
            "Search (ENTER apply • ESC cancel)",
        ),
        None if app.filter.is_empty() => (
            "press / to search".to_string(),
            Style::default().fg(Color::DarkGray),
            "Search",
        ),
        None => (app.filter.clone(), Style::default().fg(Color::White), "Search"),
    };

    let search = Paragraph::new(Line::from(Span::styled(text, style))).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(title),
    );

    f.render_widget(search, area);
}

fn render_track_list(f: &mut Frame, area: Rect, app: &mut UIState) {
    let playing = app.status.track.as_deref();
    let items: Vec<ListItem> = app
        .visible
        .iter()
        .map(|track| {
            let item = ListItem::new(track.as_str());
            if Some(track.as_str()) == playing {
                item.style(Style::default().fg(Color::Green).add_modifier(Modifier::DIM))
            } else {
                item
            }
        })
        .collect();

    let title = if app.catalog.len() > app.visible.len() {
        format!("Tracks ({} of {})", app.visible.len(), app.catalog.len())
    } else {
        format!("Tracks ({} total)", app.catalog.len())
    };

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(title),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(" > ");

    f.render_stateful_widget(list, area, &mut app.list_state);
}

fn render_status(f: &mut Frame, area: Rect, app: &UIState) {
    let text = if app.is_fetching_catalog {
        "Fetching catalog…".to_string()
    } else {
        app.status_message.clone()
    };

    let status = Paragraph::new(Text::from(Line::from(vec![Span::styled(
        text,
        Style::default().fg(Color::White),
    )])))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue))
            .title("Status"),
    );

    f.render_widget(status, area);
}

fn render_footer(f: &mut Frame, area: Rect, app: &UIState) {
    let key = |k: &'static str, color: Color| {
        Span::styled(k, Style::default().fg(color).add_modifier(Modifier::BOLD))
    };
    let label = |l: &'static str| Span::styled(l, Style::default().fg(Color::White));

    let line = if app.search_input.is_some() {
        Line::from(vec![
            label("Type to search • "),
            key("ENTER ", Color::Green),
            label("Apply • "),
            key("ESC ", Color::Red),
            label("Cancel"),
        ])
    } else {
        Line::from(vec![
            key("↑/↓ ", Color::Yellow),
            label("Navigate • "),
            key("ENTER ", Color::Green),
            label("Play • "),
            key("SPACE ", Color::Cyan),
            label("Pause/Resume • "),
            key("N ", Color::Cyan),
            label("Next • "),
            key("S ", Color::Cyan),
            label("Stop • "),
            key("/ ", Color::Blue),
            label("Search • "),
            key("R ", Color::Blue),
            label("Reload • "),
            key("Q ", Color::Red),
            label("Quit"),
        ])
    };

    let controls = Paragraph::new(Text::from(vec![line]))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Gray))
                .title("Controls"),
        );

    f.render_widget(controls, area);
}
