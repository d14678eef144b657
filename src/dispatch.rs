// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The dispatch queue and its consumer thread.
//!
//! Producers admit events without blocking; a single consumer drains them in
//! FIFO order onto the physical output, enforcing a minimum gap between
//! sends so the instrument's relay hardware is never overrun.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use thiserror::Error;
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{error, info, span, warn, Level};

use crate::midi;
use crate::organ::event::DispatchEvent;

/// How long the consumer waits for work before checking the queue again.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// How long stop() waits for the consumer to wind down before abandoning it.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Priority for the dispatch thread, where the platform lets us set one.
const DISPATCH_THREAD_PRIORITY: u8 = 70;

/// Errors surfaced by the dispatcher lifecycle.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher can only be started once, from idle.
    #[error("dispatcher has already been started (currently {0})")]
    AlreadyStarted(State),
    /// The dispatcher can only be stopped while running.
    #[error("dispatcher is not running (currently {0})")]
    NotRunning(State),
    /// The output device failed while starting or stopping.
    #[error("output device error: {0}")]
    Device(String),
    /// The consumer thread died on a transport failure.
    #[error("output transport failed: {0}")]
    Transport(String),
}

/// Lifecycle states of the dispatcher. The only path is idle, running,
/// draining, stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Idle => write!(f, "idle"),
            State::Running => write!(f, "running"),
            State::Draining => write!(f, "draining"),
            State::Stopped => write!(f, "stopped"),
        }
    }
}

/// An element of the dispatch queue.
enum QueueItem {
    Event(DispatchEvent),
    Shutdown,
}

/// A clonable handle for admitting events onto the dispatch queue.
#[derive(Clone)]
pub struct EventSender {
    sender: Sender<QueueItem>,
}

impl EventSender {
    /// Submits an event for dispatch and returns whether it entered the
    /// queue. Events with nothing to send are completed immediately without
    /// queueing; when the queue is full the event is cancelled rather than
    /// blocking the caller.
    pub fn submit(&self, event: DispatchEvent) -> bool {
        if event.payload().is_none() {
            event.complete();
            return false;
        }

        match self.sender.try_send(QueueItem::Event(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(item)) => {
                if let QueueItem::Event(event) = item {
                    warn!(
                        event = format!("{}", event),
                        "Dispatch queue is full, cancelling event."
                    );
                    event.cancel();
                }
                false
            }
            Err(TrySendError::Disconnected(item)) => {
                if let QueueItem::Event(event) = item {
                    warn!(
                        event = format!("{}", event),
                        "Dispatch queue is closed, cancelling event."
                    );
                    event.cancel();
                }
                false
            }
        }
    }
}

/// Owns the dispatch queue and the consumer thread that drains it.
pub struct Dispatcher {
    device: Arc<dyn midi::Device>,
    sender: Sender<QueueItem>,
    receiver: Receiver<QueueItem>,
    min_gap: Duration,
    state: Mutex<State>,
    thread: Mutex<Option<ConsumerHandle>>,
    fault: Arc<Mutex<Option<String>>>,
}

struct ConsumerHandle {
    join_handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given device. At most queue_size events
    /// wait at once; consecutive sends are spaced at least min_gap apart.
    pub fn new(device: Arc<dyn midi::Device>, queue_size: usize, min_gap: Duration) -> Dispatcher {
        // A zero capacity channel would rendezvous instead of queueing.
        let (sender, receiver) = bounded(queue_size.max(1));

        Dispatcher {
            device,
            sender,
            receiver,
            min_gap,
            state: Mutex::new(State::Idle),
            thread: Mutex::new(None),
            fault: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns a handle for submitting events to this dispatcher.
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        *self.state.lock()
    }

    /// Silences the device immediately, bypassing the queue.
    pub fn panic(&self) -> Result<(), DispatchError> {
        self.device
            .panic()
            .map_err(|err| DispatchError::Device(err.to_string()))
    }

    /// Starts the consumer thread. The device is silenced first so the
    /// instrument starts from a known state.
    pub fn start(&self) -> Result<(), DispatchError> {
        let mut state = self.state.lock();
        if *state != State::Idle {
            return Err(DispatchError::AlreadyStarted(*state));
        }

        self.device
            .panic()
            .map_err(|err| DispatchError::Device(err.to_string()))?;
        let output = self
            .device
            .open()
            .map_err(|err| DispatchError::Device(err.to_string()))?;

        let (done_sender, done_receiver) = bounded(1);
        let receiver = self.receiver.clone();
        let min_gap = self.min_gap;
        let fault = self.fault.clone();

        let join_handle = thread::spawn(move || {
            consume(receiver, output, min_gap, fault);
            let _ = done_sender.send(());
        });

        *self.thread.lock() = Some(ConsumerHandle {
            join_handle,
            done: done_receiver,
        });
        *state = State::Running;

        info!(device = self.device.name(), "Dispatcher started.");
        Ok(())
    }

    /// Stops the consumer thread: drains and cancels anything still queued,
    /// signals the consumer, waits for it with a bound, then silences the
    /// device. The consumer observes the signal within one receive timeout
    /// plus one pacing gap, so stopping takes at most that plus the join
    /// timeout. Returns the transport fault if the consumer died on one.
    pub fn stop(&self) -> Result<(), DispatchError> {
        {
            let mut state = self.state.lock();
            if *state != State::Running {
                return Err(DispatchError::NotRunning(*state));
            }
            *state = State::Draining;
        }

        info!(device = self.device.name(), "Stopping dispatcher.");

        // Drain pending events, reconciling their queued counts. The
        // consumer may race us for individual items, which is fine: each
        // item ends up either sent or cancelled, never both.
        let mut drained: usize = 0;
        while let Ok(item) = self.receiver.try_recv() {
            if let QueueItem::Event(event) = item {
                event.cancel();
                drained += 1;
            }
        }
        if drained > 0 {
            info!(drained, "Cancelled queued events during shutdown.");
        }

        if self.sender.try_send(QueueItem::Shutdown).is_err() {
            // The queue refilled while we were draining it. Give up on a
            // graceful handover and silence the device directly.
            warn!("Unable to enqueue the shutdown signal, silencing the device directly.");
            if let Err(err) = self.device.panic() {
                error!(err = format!("{}", err), "Unable to silence the device.");
            }
        }

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            match handle.done.recv_timeout(JOIN_TIMEOUT) {
                Ok(()) => {
                    let _ = handle.join_handle.join();
                }
                Err(_) => {
                    warn!("Dispatch thread did not stop in time, abandoning it.");
                }
            }
        }

        // Always leave the instrument silent, whatever happened above.
        let panic_result = self.device.panic();

        *self.state.lock() = State::Stopped;

        if let Some(fault) = self.fault.lock().take() {
            return Err(DispatchError::Transport(fault));
        }
        panic_result.map_err(|err| DispatchError::Device(err.to_string()))?;

        info!("Dispatcher stopped.");
        Ok(())
    }
}

/// The consumer loop: drains the queue in FIFO order, enforcing the minimum
/// gap between physical sends.
fn consume(
    receiver: Receiver<QueueItem>,
    mut output: Box<dyn midi::Output>,
    min_gap: Duration,
    fault: Arc<Mutex<Option<String>>>,
) {
    let span = span!(Level::INFO, "dispatch");
    let _enter = span.enter();

    if let Ok(priority) = ThreadPriorityValue::try_from(DISPATCH_THREAD_PRIORITY) {
        let _ = set_current_thread_priority(ThreadPriority::Crossplatform(priority));
    }

    info!("Dispatch thread running.");

    let mut last_send: Option<Instant> = None;

    loop {
        match receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(QueueItem::Event(event)) => {
                let payload = match event.payload() {
                    Some(payload) => *payload,
                    None => {
                        // Nothing to put on the wire.
                        event.complete();
                        continue;
                    }
                };

                // Respect the pacing floor between physical sends.
                if let Some(last) = last_send {
                    let elapsed = last.elapsed();
                    if elapsed < min_gap {
                        spin_sleep::sleep(min_gap - elapsed);
                    }
                }

                match output.send(&payload) {
                    Ok(()) => {
                        last_send = Some(Instant::now());
                        event.complete();
                    }
                    Err(err) => {
                        error!(
                            err = format!("{}", err),
                            "Failed to send MIDI event, stopping dispatch."
                        );
                        *fault.lock() = Some(err.to_string());
                        event.cancel();
                        break;
                    }
                }
            }
            Ok(QueueItem::Shutdown) => {
                info!("Shutdown signal received.");
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Leave nothing sounding, whatever the exit path was.
    if let Err(err) = output.panic() {
        warn!(
            err = format!("{}", err),
            "Unable to silence the output connection."
        );
    }

    info!("Dispatch thread exiting.");
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use midly::live::LiveEvent;
    use midly::num::{u4, u7};
    use midly::MidiMessage;

    use super::*;
    use crate::notes::{NoteAction, NoteName};
    use crate::organ::Register;
    use crate::test::eventually;

    fn make_dispatcher(
        queue_size: usize,
        min_gap: Duration,
    ) -> (Dispatcher, crate::midi::test::Device) {
        let mock = crate::midi::test::Device::get("mock dispatch");
        let device: Arc<dyn midi::Device> = Arc::new(mock.clone());
        (Dispatcher::new(device, queue_size, min_gap), mock)
    }

    fn make_register() -> Register {
        Register::new(
            "Swell",
            u4::new(1),
            NoteName::Note(u7::new(36)),
            NoteName::Note(u7::new(93)),
            5,
            false,
            Vec::new(),
        )
    }

    fn sent_key(event: &LiveEvent<'static>) -> (bool, u7) {
        match event {
            LiveEvent::Midi {
                message: MidiMessage::NoteOn { key, .. },
                ..
            } => (true, *key),
            LiveEvent::Midi {
                message: MidiMessage::NoteOff { key, .. },
                ..
            } => (false, *key),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_lifecycle() -> Result<(), Box<dyn Error>> {
        let (dispatcher, mock) = make_dispatcher(8, Duration::ZERO);

        assert_eq!(dispatcher.state(), State::Idle);
        assert!(dispatcher.stop().is_err());

        dispatcher.start()?;
        assert_eq!(dispatcher.state(), State::Running);
        assert!(dispatcher.start().is_err());

        dispatcher.stop()?;
        assert_eq!(dispatcher.state(), State::Stopped);

        // The lifecycle is one way: a stopped dispatcher stays stopped.
        assert!(dispatcher.start().is_err());

        // Silenced on start, on consumer exit and on stop.
        assert_eq!(mock.panic_count(), 3);
        Ok(())
    }

    #[test]
    fn test_dispatch_sends_in_order() -> Result<(), Box<dyn Error>> {
        let (dispatcher, mock) = make_dispatcher(8, Duration::ZERO);
        let register = make_register();
        let sender = dispatcher.sender();
        dispatcher.start()?;

        let c4 = register
            .note(NoteName::Note(u7::new(60)))
            .expect("note should exist");
        let e4 = register
            .note(NoteName::Note(u7::new(64)))
            .expect("note should exist");

        assert!(sender.submit(c4.note_event(NoteAction::Press)));
        assert!(sender.submit(e4.note_event(NoteAction::Press)));
        assert!(sender.submit(c4.note_event(NoteAction::Release)));

        eventually(|| mock.sent_events().len() == 3, "events were not sent");

        let events = mock.sent_events();
        assert_eq!(sent_key(&events[0]), (true, u7::new(60)));
        assert_eq!(sent_key(&events[1]), (true, u7::new(64)));
        assert_eq!(sent_key(&events[2]), (false, u7::new(60)));

        eventually(
            || c4.state().actual_count() == 0 && e4.state().actual_count() == 1,
            "completions were not recorded",
        );

        dispatcher.stop()?;
        Ok(())
    }

    #[test]
    fn test_concurrent_presses_share_one_wire_pair() -> Result<(), Box<dyn Error>> {
        let (dispatcher, mock) = make_dispatcher(8, Duration::ZERO);
        let register = make_register();
        let sender = dispatcher.sender();
        dispatcher.start()?;

        let note = register
            .note(NoteName::Note(u7::new(60)))
            .expect("note should exist");

        // Three writers grab the same note; only the first press makes it
        // to the wire.
        assert!(sender.submit(note.note_event(NoteAction::Press)));
        assert!(!sender.submit(note.note_event(NoteAction::Press)));
        assert!(!sender.submit(note.note_event(NoteAction::Press)));

        // Two of them let go. The note keeps sounding.
        assert!(!sender.submit(note.note_event(NoteAction::Release)));
        assert!(!sender.submit(note.note_event(NoteAction::Release)));

        eventually(
            || note.state().actual_count() == 1,
            "press was not completed",
        );
        assert_eq!(mock.sent_events().len(), 1);

        // The last writer releases and the note finally falls silent.
        assert!(sender.submit(note.note_event(NoteAction::Release)));
        eventually(
            || note.state().actual_count() == 0,
            "release was not completed",
        );

        let events = mock.sent_events();
        assert_eq!(events.len(), 2);
        assert_eq!(sent_key(&events[0]), (true, u7::new(60)));
        assert_eq!(sent_key(&events[1]), (false, u7::new(60)));

        dispatcher.stop()?;
        Ok(())
    }

    #[test]
    fn test_full_queue_cancels_fast() {
        let (dispatcher, _mock) = make_dispatcher(2, Duration::ZERO);
        let register = make_register();
        let sender = dispatcher.sender();
        // The dispatcher is never started, so nothing drains the queue.

        let a = register
            .note(NoteName::Note(u7::new(36)))
            .expect("note should exist");
        let b = register
            .note(NoteName::Note(u7::new(37)))
            .expect("note should exist");
        let c = register
            .note(NoteName::Note(u7::new(38)))
            .expect("note should exist");

        assert!(sender.submit(a.note_event(NoteAction::Press)));
        assert!(sender.submit(b.note_event(NoteAction::Press)));

        let started = Instant::now();
        assert!(!sender.submit(c.note_event(NoteAction::Press)));
        assert!(started.elapsed() < Duration::from_millis(100));

        // The dropped press was reconciled, the queued ones were not.
        assert_eq!(c.state().queued_count(), 0);
        assert_eq!(a.state().queued_count(), 1);
        assert_eq!(b.state().queued_count(), 1);
    }

    #[test]
    fn test_minimum_gap_between_sends() -> Result<(), Box<dyn Error>> {
        let min_gap = Duration::from_millis(20);
        let (dispatcher, mock) = make_dispatcher(8, min_gap);
        let register = make_register();
        let sender = dispatcher.sender();
        dispatcher.start()?;

        for number in [60, 64, 67] {
            let note = register
                .note(NoteName::Note(u7::new(number)))
                .expect("note should exist");
            assert!(sender.submit(note.note_event(NoteAction::Press)));
        }

        eventually(|| mock.sent_events().len() == 3, "events were not sent");

        let instants = mock.sent_instants();
        for pair in instants.windows(2) {
            assert!(
                pair[1].duration_since(pair[0]) >= min_gap,
                "consecutive sends were closer than the pacing floor"
            );
        }

        dispatcher.stop()?;
        Ok(())
    }

    #[test]
    fn test_stop_cancels_queued_events() -> Result<(), Box<dyn Error>> {
        // A gap long enough that the queue still holds events when we stop.
        let (dispatcher, mock) = make_dispatcher(8, Duration::from_millis(200));
        let register = make_register();
        let sender = dispatcher.sender();
        dispatcher.start()?;

        let first = register
            .note(NoteName::Note(u7::new(60)))
            .expect("note should exist");
        let last = register
            .note(NoteName::Note(u7::new(67)))
            .expect("note should exist");

        assert!(sender.submit(first.note_event(NoteAction::Press)));
        assert!(sender.submit(
            register
                .note(NoteName::Note(u7::new(64)))
                .expect("note should exist")
                .note_event(NoteAction::Press)
        ));
        assert!(sender.submit(last.note_event(NoteAction::Press)));

        eventually(
            || first.state().actual_count() == 1,
            "first event was not sent",
        );
        dispatcher.stop()?;

        // The last event was still queued: it was cancelled, not sent.
        assert_eq!(last.state().queued_count(), 0);
        assert_eq!(last.state().actual_count(), 0);
        for event in mock.sent_events() {
            assert_ne!(sent_key(&event), (true, u7::new(67)));
        }

        // The first event went out and stayed accounted for.
        assert_eq!(first.state().queued_count(), 1);
        assert_eq!(first.state().actual_count(), 1);

        assert_eq!(mock.panic_count(), 3);
        Ok(())
    }

    #[test]
    fn test_transport_failure_is_reported_on_stop() -> Result<(), Box<dyn Error>> {
        let (dispatcher, mock) = make_dispatcher(8, Duration::ZERO);
        let register = make_register();
        let sender = dispatcher.sender();
        dispatcher.start()?;
        mock.fail_sends(true);

        let note = register
            .note(NoteName::Note(u7::new(60)))
            .expect("note should exist");
        sender.submit(note.note_event(NoteAction::Press));

        // The consumer hits the transport error and reconciles the event.
        eventually(
            || note.state().queued_count() == 0,
            "failed event was not cancelled",
        );

        match dispatcher.stop() {
            Err(DispatchError::Transport(_)) => {}
            other => panic!("expected a transport error, got {:?}", other),
        }
        Ok(())
    }
}
