//! Per-session event loop
//!
//! One inbound channel per session. Senders may live on any thread; a single
//! worker thread drains events into the handler in arrival order. The loop
//! stops after `SessionEnded` or once every sender has been dropped.

use std::fmt::Display;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{RuntimeError, SessionEvent};

/// Receives the events of one session.
pub trait SessionEventHandler: Send + Sync {
    type Error: Display;

    fn handle(&self, event: SessionEvent) -> Result<(), Self::Error>;
}

/// Outcome of a finished loop
#[derive(Debug, Clone, Default)]
pub struct LoopReport {
    /// Events handled, including those whose handler failed
    pub handled: usize,
    /// `<event kind>: <error>` for every failed handler
    pub errors: Vec<String>,
    /// Whether the loop stopped on `SessionEnded`
    pub session_ended: bool,
}

impl LoopReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Running event loop for one session
pub struct EventLoop {
    sender: Sender<SessionEvent>,
    worker: JoinHandle<LoopReport>,
}

impl EventLoop {
    /// Start a worker thread draining events into `handler`.
    pub fn spawn<H>(name: &str, handler: Arc<H>) -> Result<Self, RuntimeError>
    where
        H: SessionEventHandler + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(format!("session-{}", name))
            .spawn(move || drain(receiver, handler.as_ref()))?;
        Ok(Self { sender, worker })
    }

    /// A sender that can be moved to another thread.
    pub fn sender(&self) -> Sender<SessionEvent> {
        self.sender.clone()
    }

    /// Queue an event. Returns false if the loop already stopped.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Stop accepting events from this handle and wait for the loop to end.
    pub fn join(self) -> LoopReport {
        drop(self.sender);
        self.worker.join().unwrap_or_else(|_| LoopReport {
            errors: vec!["event loop panicked".to_string()],
            ..Default::default()
        })
    }
}

fn drain<H: SessionEventHandler + ?Sized>(receiver: Receiver<SessionEvent>, handler: &H) -> LoopReport {
    let mut report = LoopReport::default();
    for event in receiver {
        let kind = event.kind();
        let ends_session = matches!(event, SessionEvent::SessionEnded);

        if let Err(e) = handler.handle(event) {
            tracing::error!(event = kind, error = %e, "session event handler failed");
            report.errors.push(format!("{}: {}", kind, e));
        }
        report.handled += 1;

        if ends_session {
            report.session_ended = true;
            break;
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<&'static str>>,
    }

    impl SessionEventHandler for Recorder {
        type Error = String;

        fn handle(&self, event: SessionEvent) -> Result<(), String> {
            let kind = event.kind();
            self.seen.lock().unwrap().push(kind);
            if let SessionEvent::TestStarting { test_id, .. } = &event {
                if test_id == "bad" {
                    return Err("boom".to_string());
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_stops_on_session_ended() {
        let handler = Arc::new(Recorder::default());
        let event_loop = EventLoop::spawn("s1", Arc::clone(&handler)).unwrap();

        let sender = event_loop.sender();
        let producer = thread::spawn(move || {
            sender
                .send(SessionEvent::TestStarting {
                    job_id: "j".to_string(),
                    test_id: "t".to_string(),
                })
                .unwrap();
            sender.send(SessionEvent::SessionEnded).unwrap();
        });
        producer.join().unwrap();

        let report = event_loop.join();
        assert!(report.session_ended);
        assert_eq!(report.handled, 2);
        assert!(report.is_clean());
        assert_eq!(
            *handler.seen.lock().unwrap(),
            vec!["test_starting", "session_ended"]
        );
    }

    #[test]
    fn test_handler_errors_are_reported() {
        let handler = Arc::new(Recorder::default());
        let event_loop = EventLoop::spawn("s2", Arc::clone(&handler)).unwrap();
        assert!(event_loop.send(SessionEvent::TestStarting {
            job_id: "j".to_string(),
            test_id: "bad".to_string(),
        }));

        let report = event_loop.join();
        assert!(!report.session_ended);
        assert_eq!(report.errors, vec!["test_starting: boom"]);
    }
}
