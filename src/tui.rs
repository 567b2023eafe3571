use std::{
    io::{self, Stdout},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{debug, info, warn};
use ratatui::{Frame, Terminal};

use crate::{
    config::AppConfig,
    daemon::{
        ensure_daemon, shutdown_daemon, DaemonEvent, DaemonListener, DaemonMonitor, ListenerId,
    },
    model::Transfer,
    parse::OutputParser,
    remote::RemoteClient,
    render::{project, project_notice, scroll_to, DrawList, DrawRow},
    selection::{Navigation, Selection, SelectionPolicy},
};

type Backend = ratatui::backend::CrosstermBackend<Stdout>;

const WAITING_NOTICE: &str = "Waiting for connection to daemon";
const EMPTY_NOTICE: &str = "No active transfers";
const DISCONNECTED_NOTICE: &str = "Lost connection to daemon";

pub fn run(config: AppConfig) -> Result<()> {
    info!("watching {}", config.remote.label());
    let client = RemoteClient::new(&config.remote);
    let started_daemon = if config.remote.manage_daemon {
        ensure_daemon(&client)?
    } else {
        false
    };
    let parser = OutputParser::new().context("failed to build output parser")?;

    let (event_tx, event_rx) = unbounded();
    let mut monitor = DaemonMonitor::new();
    let ui_listener = monitor.add_listener(Box::new(ChannelListener {
        tx: event_tx.clone(),
    }))?;

    let mut terminal = setup_terminal()?;
    let input_handle = spawn_input_thread(event_tx, config.input_tick);
    monitor.start(client.clone(), parser, config.poll_interval);

    let mut app = App::new(config.selection_policy);
    let loop_result = run_loop(&mut terminal, &mut app, event_rx);

    let restored = wind_down(&mut monitor, ui_listener, || restore_terminal(&mut terminal));
    input_handle.join().ok();

    if started_daemon {
        shutdown_daemon(&client);
    }

    loop_result.and(restored)
}

/// Hands the screen back before waiting on the poll thread, which may be
/// blocked on a slow daemon query.
fn wind_down(
    monitor: &mut DaemonMonitor,
    listener: ListenerId,
    restore: impl FnOnce() -> Result<()>,
) -> Result<()> {
    monitor.remove_listener(listener);
    let restored = restore();
    monitor.stop();
    restored
}

fn run_loop(terminal: &mut Terminal<Backend>, app: &mut App, events: Receiver<AppEvent>) -> Result<()> {
    terminal.draw(|f| app.render(f))?;
    debug!("listening for user input");
    while let Ok(event) = events.recv() {
        let redraw = app.process_event(event);
        if app.should_quit {
            break;
        }
        if redraw {
            terminal.draw(|f| app.render(f))?;
        }
    }
    Ok(())
}

fn setup_terminal() -> Result<Terminal<Backend>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<Backend>) -> Result<()> {
    disable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn spawn_input_thread(tx: Sender<AppEvent>, tick_rate: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        let next = match event::poll(tick_rate) {
            Ok(true) => match event::read() {
                Ok(evt) => AppEvent::Input(evt),
                Err(err) => {
                    warn!("input error: {err}");
                    AppEvent::Tick
                }
            },
            Ok(false) | Err(_) => AppEvent::Tick,
        };
        if tx.send(next).is_err() {
            break;
        }
    })
}

/// Forwards daemon events onto the UI thread's channel.
struct ChannelListener {
    tx: Sender<AppEvent>,
}

impl DaemonListener for ChannelListener {
    fn on_updated(&mut self, transfers: &[Transfer]) {
        let _ = self
            .tx
            .send(AppEvent::Daemon(DaemonEvent::Updated(transfers.to_vec())));
    }

    fn on_daemon_stopped(&mut self) {
        let _ = self.tx.send(AppEvent::Daemon(DaemonEvent::DaemonStopped));
    }
}

enum AppEvent {
    Input(Event),
    Tick,
    Daemon(DaemonEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Navigate(Navigation),
    Quit,
}

fn command_for(key: &KeyEvent) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Command::Quit),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char('q') => Some(Command::Quit),
        KeyCode::Char('j') => Some(Command::Navigate(Navigation::Next)),
        KeyCode::Char('k') => Some(Command::Navigate(Navigation::Previous)),
        _ => None,
    }
}

enum DisplayState {
    Waiting,
    Connected(Vec<Transfer>),
    Disconnected,
}

struct App {
    display: DisplayState,
    selection: Selection,
    should_quit: bool,
}

impl App {
    fn new(policy: SelectionPolicy) -> Self {
        Self {
            display: DisplayState::Waiting,
            selection: Selection::new(policy),
            should_quit: false,
        }
    }

    fn render(&self, frame: &mut Frame) {
        let area = frame.size();
        let rows = self.draw_rows(area.width, area.height);
        frame.render_widget(DrawList::new(&rows), area);
    }

    fn draw_rows(&self, width: u16, height: u16) -> Vec<DrawRow> {
        match &self.display {
            DisplayState::Waiting => project_notice(WAITING_NOTICE),
            DisplayState::Disconnected => project_notice(DISCONNECTED_NOTICE),
            DisplayState::Connected(transfers) if transfers.is_empty() => {
                project_notice(EMPTY_NOTICE)
            }
            DisplayState::Connected(transfers) => scroll_to(
                project(transfers, self.selection.selected(), width),
                self.selection.selected_index(),
                height,
            ),
        }
    }

    /// Returns whether the screen needs redrawing.
    fn process_event(&mut self, event: AppEvent) -> bool {
        match event {
            AppEvent::Input(Event::Key(key)) => match command_for(&key) {
                Some(Command::Quit) => {
                    debug!("requested quit");
                    self.should_quit = true;
                    false
                }
                Some(Command::Navigate(direction)) => {
                    debug!("selection {direction:?}");
                    self.selection.navigate(direction)
                }
                None => false,
            },
            AppEvent::Input(Event::Resize(..)) => true,
            AppEvent::Input(_) | AppEvent::Tick => false,
            AppEvent::Daemon(DaemonEvent::Updated(transfers)) => {
                self.selection
                    .list_updated(transfers.iter().map(|t| t.id.clone()).collect());
                self.display = DisplayState::Connected(transfers);
                true
            }
            AppEvent::Daemon(DaemonEvent::DaemonStopped) => {
                self.display = DisplayState::Disconnected;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };

    use ratatui::backend::TestBackend;

    use super::*;
    use crate::{
        model::TransferId,
        remote::{PollSource, RemoteResult},
        render::Paint,
    };

    /// A poll that hangs until released.
    struct Stalled {
        started: Sender<()>,
        release: Receiver<()>,
        finished: Arc<AtomicBool>,
    }

    impl PollSource for Stalled {
        fn poll(&self) -> RemoteResult<String> {
            let _ = self.started.send(());
            let _ = self.release.recv_timeout(Duration::from_secs(5));
            self.finished.store(true, Ordering::SeqCst);
            Ok(String::new())
        }
    }

    fn key(code: KeyCode) -> AppEvent {
        AppEvent::Input(Event::Key(KeyEvent::new(code, KeyModifiers::NONE)))
    }

    fn transfer(id: &str) -> Transfer {
        Transfer {
            id: TransferId::new(id),
            name: format!("t{id}"),
            info: BTreeMap::from([("percent done".to_string(), "50%".to_string())]),
            files: Vec::new(),
        }
    }

    fn updated(ids: &[&str]) -> AppEvent {
        AppEvent::Daemon(DaemonEvent::Updated(ids.iter().map(|id| transfer(id)).collect()))
    }

    fn first_text(rows: &[DrawRow]) -> &str {
        &rows[0].segments[0].text
    }

    #[test]
    fn keys_map_to_commands() {
        let press = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert_eq!(command_for(&press(KeyCode::Char('q'))), Some(Command::Quit));
        assert_eq!(
            command_for(&press(KeyCode::Char('j'))),
            Some(Command::Navigate(Navigation::Next))
        );
        assert_eq!(
            command_for(&press(KeyCode::Char('k'))),
            Some(Command::Navigate(Navigation::Previous))
        );
        assert_eq!(command_for(&press(KeyCode::Char('x'))), None);
        assert_eq!(command_for(&press(KeyCode::Down)), None);
        assert_eq!(
            command_for(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Command::Quit)
        );
    }

    #[test]
    fn notices_follow_connection_state() {
        let mut app = App::new(SelectionPolicy::Revalidate);
        assert_eq!(first_text(&app.draw_rows(80, 24)), WAITING_NOTICE);

        assert!(app.process_event(updated(&[])));
        assert_eq!(first_text(&app.draw_rows(80, 24)), EMPTY_NOTICE);

        assert!(app.process_event(AppEvent::Daemon(DaemonEvent::DaemonStopped)));
        assert_eq!(first_text(&app.draw_rows(80, 24)), DISCONNECTED_NOTICE);
    }

    #[test]
    fn navigation_highlights_selected_block() {
        let mut app = App::new(SelectionPolicy::Revalidate);
        app.process_event(updated(&["1", "2"]));
        assert!(app.process_event(key(KeyCode::Char('k'))));

        let rows = app.draw_rows(80, 24);
        assert_eq!(rows[0].segments[0].paint, Paint::Header);
        assert_eq!(rows[3].segments[0].paint, Paint::SelectedHeader);
        assert_eq!(rows[4].segments[0].paint, Paint::SelectedRow);
    }

    #[test]
    fn quit_sets_flag_without_redraw() {
        let mut app = App::new(SelectionPolicy::Revalidate);
        assert!(!app.process_event(key(KeyCode::Char('q'))));
        assert!(app.should_quit);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut app = App::new(SelectionPolicy::Revalidate);
        app.process_event(updated(&["1"]));
        assert!(!app.process_event(key(KeyCode::Char('z'))));
        assert!(app.selection.selected().is_none());
    }

    #[test]
    fn update_drops_vanished_selection() {
        let mut app = App::new(SelectionPolicy::Revalidate);
        app.process_event(updated(&["1", "2"]));
        app.process_event(key(KeyCode::Char('j')));
        app.process_event(updated(&["2"]));
        assert!(app.selection.selected().is_none());
    }

    #[test]
    fn renders_into_terminal_of_any_size() {
        let mut app = App::new(SelectionPolicy::Revalidate);
        app.process_event(updated(&["1", "2", "3"]));
        app.process_event(key(KeyCode::Char('k')));
        for (width, height) in [(80, 24), (20, 3), (1, 1)] {
            let mut terminal = Terminal::new(TestBackend::new(width, height)).expect("terminal");
            terminal.draw(|f| app.render(f)).expect("draw");
        }
    }

    #[test]
    fn screen_is_restored_before_waiting_on_a_stalled_poll() {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let finished = Arc::new(AtomicBool::new(false));

        let (tx, _rx) = unbounded();
        let mut monitor = DaemonMonitor::new();
        let listener = monitor
            .add_listener(Box::new(ChannelListener { tx }))
            .expect("registered");
        let source = Stalled {
            started: started_tx,
            release: release_rx,
            finished: Arc::clone(&finished),
        };
        let parser = OutputParser::new().expect("pattern compiles");
        monitor.start(source, parser, Duration::from_secs(60));
        started_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("poll in flight");

        let mut poll_done_at_restore = None;
        wind_down(&mut monitor, listener, || {
            poll_done_at_restore = Some(finished.load(Ordering::SeqCst));
            let _ = release_tx.send(());
            Ok(())
        })
        .expect("wind down");

        assert_eq!(poll_done_at_restore, Some(false));
        assert!(finished.load(Ordering::SeqCst));
    }
}
