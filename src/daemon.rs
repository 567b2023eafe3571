use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::{
    model::Transfer,
    parse::OutputParser,
    remote::{PollSource, RemoteClient},
};

const DAEMON_START_GRACE: Duration = Duration::from_secs(3);
const DAEMON_EXIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum DaemonEvent {
    Updated(Vec<Transfer>),
    DaemonStopped,
}

/// Receives poll results. Both handlers default to doing nothing, so a
/// listener only overrides the events it cares about.
pub trait DaemonListener: Send {
    fn on_updated(&mut self, _transfers: &[Transfer]) {}

    fn on_daemon_stopped(&mut self) {}
}

fn dispatch(listener: &mut dyn DaemonListener, event: &DaemonEvent) {
    match event {
        DaemonEvent::Updated(transfers) => listener.on_updated(transfers),
        DaemonEvent::DaemonStopped => listener.on_daemon_stopped(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Box<dyn DaemonListener>)>,
}

impl Listeners {
    fn notify(&mut self, event: &DaemonEvent) {
        for (_, listener) in self.entries.iter_mut() {
            dispatch(listener.as_mut(), event);
        }
    }
}

/// Makes sure a daemon is reachable before polling starts.
///
/// Returns `true` when this process had to start the daemon itself, in
/// which case it is also responsible for stopping it.
pub fn ensure_daemon(client: &RemoteClient) -> Result<bool> {
    debug!("checking for running daemon");
    match client.ping() {
        Ok(()) => Ok(false),
        Err(err) if err.is_not_found() => {
            Err(err).with_context(|| format!("{} is required", client.remote_bin()))
        }
        Err(err) => {
            debug!("daemon not reachable: {err}");
            info!("starting transmission daemon");
            client
                .launch_daemon()
                .context("unable to start the transmission daemon")?;
            thread::sleep(DAEMON_START_GRACE);
            Ok(true)
        }
    }
}

pub fn shutdown_daemon(client: &RemoteClient) {
    info!("stopping transmission daemon");
    match client.request_exit() {
        Ok(()) => thread::sleep(DAEMON_EXIT_GRACE),
        Err(err) => error!("unable to stop daemon: {err}"),
    }
}

/// Polls a [`PollSource`] on its own thread and fans results out to
/// registered listeners in registration order.
pub struct DaemonMonitor {
    listeners: Arc<Mutex<Listeners>>,
    control: Option<Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl DaemonMonitor {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners::default())),
            control: None,
            worker: None,
        }
    }

    pub fn add_listener(&self, listener: Box<dyn DaemonListener>) -> Result<ListenerId> {
        let mut guard = self
            .listeners
            .lock()
            .map_err(|_| anyhow!("listener registry poisoned"))?;
        let id = ListenerId(guard.next_id);
        guard.next_id += 1;
        guard.entries.push((id, listener));
        Ok(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let Ok(mut guard) = self.listeners.lock() else {
            return false;
        };
        let before = guard.entries.len();
        guard.entries.retain(|(entry, _)| *entry != id);
        guard.entries.len() != before
    }

    pub fn start<S>(&mut self, source: S, parser: OutputParser, poll_interval: Duration)
    where
        S: PollSource + Send + 'static,
    {
        if self.worker.is_some() {
            return;
        }
        let (control_tx, control_rx) = bounded(1);
        let listeners = Arc::clone(&self.listeners);
        let handle = thread::spawn(move || {
            poll_loop(source, parser, listeners, control_rx, poll_interval)
        });
        self.control = Some(control_tx);
        self.worker = Some(handle);
    }

    /// Stops polling before the next cycle. An in-flight query is allowed to
    /// finish; its result is discarded.
    pub fn stop(&mut self) {
        self.control.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("poll thread panicked");
            }
        }
    }
}

impl Default for DaemonMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DaemonMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop<S: PollSource>(
    source: S,
    parser: OutputParser,
    listeners: Arc<Mutex<Listeners>>,
    control: Receiver<()>,
    poll_interval: Duration,
) {
    let mut connected = true;
    loop {
        let event = poll_once(&source, &parser, &mut connected);
        if control_closed(&control) {
            break;
        }
        if let Some(event) = event {
            match listeners.lock() {
                Ok(mut guard) => guard.notify(&event),
                Err(_) => {
                    error!("listener registry poisoned; stopping poll loop");
                    break;
                }
            }
        }
        match control.recv_timeout(poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    debug!("poll loop finished");
}

fn control_closed(control: &Receiver<()>) -> bool {
    matches!(
        control.try_recv(),
        Ok(()) | Err(crossbeam_channel::TryRecvError::Disconnected)
    )
}

/// Runs one cycle. Returns `None` when listeners should not hear about it,
/// which is the case for repeated failures during one outage.
fn poll_once<S: PollSource>(
    source: &S,
    parser: &OutputParser,
    connected: &mut bool,
) -> Option<DaemonEvent> {
    debug!("updating transmission data");
    match source.poll() {
        Ok(output) => {
            debug!("fetched data: {output}");
            *connected = true;
            Some(DaemonEvent::Updated(collect_transfers(parser, &output)))
        }
        Err(err) => {
            if !*connected {
                debug!("daemon still unreachable: {err}");
                return None;
            }
            warn!("unable to talk to daemon: {err}");
            *connected = false;
            Some(DaemonEvent::DaemonStopped)
        }
    }
}

/// Keeps every well-formed record; malformed ones are logged and dropped.
pub fn collect_transfers(parser: &OutputParser, output: &str) -> Vec<Transfer> {
    let transfers: Vec<Transfer> = parser
        .parse_output(output)
        .into_iter()
        .filter_map(|record| match record {
            Ok(transfer) => Some(transfer),
            Err(err) => {
                warn!("dropping malformed record: {err}");
                None
            }
        })
        .collect();
    debug!("parsed {} transfers", transfers.len());
    transfers
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, io};

    use crossbeam_channel::unbounded;

    use super::*;
    use crate::remote::{RemoteError, RemoteResult};

    const TIMEOUT: Duration = Duration::from_secs(2);
    const FAST: Duration = Duration::from_millis(5);

    struct Scripted {
        replies: Mutex<VecDeque<RemoteResult<String>>>,
    }

    impl Scripted {
        fn new(replies: Vec<RemoteResult<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    impl PollSource for Scripted {
        fn poll(&self) -> RemoteResult<String> {
            self.replies
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn refused() -> RemoteResult<String> {
        Err(RemoteError::Spawn {
            program: "transmission-remote".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        })
    }

    struct Recorder {
        tag: &'static str,
        tx: Sender<(&'static str, DaemonEvent)>,
    }

    impl DaemonListener for Recorder {
        fn on_updated(&mut self, transfers: &[Transfer]) {
            let _ = self.tx.send((self.tag, DaemonEvent::Updated(transfers.to_vec())));
        }

        fn on_daemon_stopped(&mut self) {
            let _ = self.tx.send((self.tag, DaemonEvent::DaemonStopped));
        }
    }

    struct UpdatesOnly {
        tx: Sender<usize>,
    }

    impl DaemonListener for UpdatesOnly {
        fn on_updated(&mut self, transfers: &[Transfer]) {
            let _ = self.tx.send(transfers.len());
        }
    }

    fn parser() -> OutputParser {
        OutputParser::new().expect("pattern compiles")
    }

    #[test]
    fn notifies_listeners_in_registration_order() {
        let (tx, rx) = unbounded();
        let mut monitor = DaemonMonitor::new();
        monitor.add_listener(Box::new(Recorder { tag: "first", tx: tx.clone() })).expect("registered");
        monitor.add_listener(Box::new(Recorder { tag: "second", tx })).expect("registered");

        let payload = "NAME\n  Id: 1\n  Name: one\n".to_string();
        monitor.start(Scripted::new(vec![Ok(payload)]), parser(), FAST);

        let (tag, event) = rx.recv_timeout(TIMEOUT).expect("first event");
        assert_eq!(tag, "first");
        match event {
            DaemonEvent::Updated(transfers) => assert_eq!(transfers[0].name, "one"),
            other => panic!("unexpected event {other:?}"),
        }
        let (tag, _) = rx.recv_timeout(TIMEOUT).expect("second event");
        assert_eq!(tag, "second");
        monitor.stop();
    }

    #[test]
    fn outage_is_reported_once_then_recovers() {
        let (tx, rx) = unbounded();
        let mut monitor = DaemonMonitor::new();
        monitor.add_listener(Box::new(Recorder { tag: "ui", tx })).expect("registered");
        monitor.start(
            Scripted::new(vec![refused(), refused(), Ok(String::new())]),
            parser(),
            FAST,
        );

        let (_, first) = rx.recv_timeout(TIMEOUT).expect("stopped event");
        assert_eq!(first, DaemonEvent::DaemonStopped);
        let (_, second) = rx.recv_timeout(TIMEOUT).expect("recovery event");
        assert_eq!(second, DaemonEvent::Updated(Vec::new()));
        monitor.stop();
    }

    #[test]
    fn listener_without_stop_handler_is_skipped() {
        let (tx, rx) = unbounded();
        let mut monitor = DaemonMonitor::new();
        monitor.add_listener(Box::new(UpdatesOnly { tx })).expect("registered");
        monitor.start(
            Scripted::new(vec![refused(), Ok("NAME\n  Id: 2\n  Name: two\n".to_string())]),
            parser(),
            FAST,
        );
        assert_eq!(rx.recv_timeout(TIMEOUT).expect("update"), 1);
        monitor.stop();
    }

    #[test]
    fn removed_listener_hears_nothing() {
        let (tx, rx) = unbounded();
        let (keep_tx, keep_rx) = unbounded();
        let mut monitor = DaemonMonitor::new();
        let id = monitor
            .add_listener(Box::new(Recorder { tag: "gone", tx }))
            .expect("registered");
        monitor.add_listener(Box::new(Recorder { tag: "kept", tx: keep_tx })).expect("registered");
        assert!(monitor.remove_listener(id));
        assert!(!monitor.remove_listener(id));

        monitor.start(Scripted::new(Vec::new()), parser(), FAST);
        keep_rx.recv_timeout(TIMEOUT).expect("kept listener notified");
        monitor.stop();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn malformed_records_are_dropped_individually() {
        let output = "NAME\n  Id: 1\n  Name: ok\n\nNAME\n  Id: 2\n  Name: bad\n\nTRANSFER\n  junk\n";
        let transfers = collect_transfers(&parser(), output);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].name, "ok");
    }

    #[test]
    fn stop_ends_loop_before_next_cycle() {
        let (tx, rx) = unbounded();
        let mut monitor = DaemonMonitor::new();
        monitor.add_listener(Box::new(UpdatesOnly { tx })).expect("registered");
        monitor.start(Scripted::new(Vec::new()), parser(), Duration::from_secs(60));
        rx.recv_timeout(TIMEOUT).expect("first poll");
        monitor.stop();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn poisoned_registry_rejects_new_listeners() {
        let monitor = DaemonMonitor::new();
        let listeners = Arc::clone(&monitor.listeners);
        let poisoned = thread::spawn(move || {
            let _guard = listeners.lock().expect("fresh lock");
            panic!("poison the registry");
        })
        .join();
        assert!(poisoned.is_err());

        let (tx, _rx) = unbounded();
        let err = monitor
            .add_listener(Box::new(UpdatesOnly { tx }))
            .expect_err("poisoned registry");
        assert!(err.to_string().contains("poisoned"));
    }
}
