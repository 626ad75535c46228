//! Tick loop: the fixed-cadence clock that advances the world and pushes a
//! frame to every session.

use crate::network::{Connections, SendError};
use crate::session::ConnectionHandle;
use crate::world::World;
use log::{debug, warn};
use tokio::time::{interval, Duration, Instant, Interval, MissedTickBehavior};

/// Interval that fires every `period`, skipping ticks it falls behind on.
pub fn tick_interval(period: Duration) -> Interval {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

/// Measures the time between ticks, capped so a stall cannot produce one
/// huge simulation step.
#[derive(Debug)]
pub struct TickClock {
    last: Instant,
    max_delta: f32,
}

impl TickClock {
    pub fn new(max_delta: f32) -> Self {
        Self::starting_at(Instant::now(), max_delta)
    }

    pub fn starting_at(start: Instant, max_delta: f32) -> Self {
        Self {
            last: start,
            max_delta,
        }
    }

    /// Seconds elapsed since the previous call.
    pub fn advance(&mut self, now: Instant) -> f32 {
        let mut dt = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;

        if dt > self.max_delta {
            warn!(
                "Large delta time detected ({:.3}s), capping to {:.3}s",
                dt, self.max_delta
            );
            dt = self.max_delta;
        }
        dt
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sent: usize,
    /// Frames skipped because a peer's queue was full.
    pub dropped: usize,
    /// Sessions closed because their connection was gone.
    pub closed: Vec<ConnectionHandle>,
}

/// Runs one tick: simulate `dt`, then broadcast.
pub fn run_tick(world: &mut World, connections: &mut Connections, dt: f32) -> TickReport {
    world.step(dt);
    broadcast(world, connections)
}

/// Sends every session its frame. A connection that can no longer be
/// written to is treated as closed; the rest still get their frames.
pub fn broadcast(world: &mut World, connections: &mut Connections) -> TickReport {
    let mut report = TickReport::default();

    for (handle, bytes) in world.frames() {
        match connections.send(handle, bytes) {
            Ok(()) => report.sent += 1,
            Err(SendError::Full(_)) => {
                debug!("Dropping frame for {}: outbound queue full", handle);
                report.dropped += 1;
            }
            Err(e) => {
                warn!("{}, closing its session", e);
                report.closed.push(handle);
            }
        }
    }

    for &handle in &report.closed {
        connections.remove(handle);
        world.close(handle);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use assert_approx_eq::assert_approx_eq;
    use shared::PlayerFrame;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn world() -> World {
        World::from_config(&WorldConfig::default())
    }

    fn frame_from(message: Message) -> PlayerFrame {
        match message {
            Message::Binary(data) => PlayerFrame::from_message(&data).unwrap(),
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_clock_measures_elapsed() {
        let start = Instant::now();
        let mut clock = TickClock::starting_at(start, 1.0);

        let dt = clock.advance(start + Duration::from_millis(250));
        assert_approx_eq!(dt, 0.25, 0.001);

        let dt = clock.advance(start + Duration::from_millis(300));
        assert_approx_eq!(dt, 0.05, 0.001);
    }

    #[test]
    fn test_clock_caps_large_delta() {
        let start = Instant::now();
        let mut clock = TickClock::starting_at(start, 0.05);

        let dt = clock.advance(start + Duration::from_secs(2));
        assert_approx_eq!(dt, 0.05);
    }

    #[test]
    fn test_tick_sends_one_frame_to_single_session() {
        let mut world = world();
        let mut connections = Connections::new();
        let handle = ConnectionHandle::next();
        let (tx, mut rx) = mpsc::channel(4);

        world.open(handle).unwrap();
        connections.insert(handle, tx);
        assert_eq!(world.registry().len(), 1);

        let report = run_tick(&mut world, &mut connections, 1.0 / 30.0);

        assert_eq!(report.sent, 1);
        assert!(report.closed.is_empty());
        let frame = frame_from(rx.try_recv().unwrap());
        assert_eq!(frame.tick, world.tick());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_session_skipped_on_next_tick() {
        let mut world = world();
        let mut connections = Connections::new();
        let h1 = ConnectionHandle::next();
        let h2 = ConnectionHandle::next();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);

        world.open(h1).unwrap();
        connections.insert(h1, tx1);
        world.open(h2).unwrap();
        connections.insert(h2, tx2);

        run_tick(&mut world, &mut connections, 1.0 / 30.0);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());

        connections.remove(h1);
        world.close(h1);

        let report = run_tick(&mut world, &mut connections, 1.0 / 30.0);
        assert_eq!(report.sent, 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_send_failure_closes_only_that_session() {
        let mut world = world();
        let mut connections = Connections::new();
        let gone = ConnectionHandle::next();
        let alive = ConnectionHandle::next();
        let (tx_gone, rx_gone) = mpsc::channel(4);
        let (tx_alive, mut rx_alive) = mpsc::channel(4);

        let gone_entity = world.open(gone).unwrap();
        connections.insert(gone, tx_gone);
        world.open(alive).unwrap();
        connections.insert(alive, tx_alive);
        drop(rx_gone);

        let report = run_tick(&mut world, &mut connections, 1.0 / 30.0);

        assert_eq!(report.closed, vec![gone]);
        assert_eq!(report.sent, 1);
        assert!(rx_alive.try_recv().is_ok());
        assert!(world.resolve(gone).is_none());
        assert!(!world.registry().contains(gone_entity));
        assert!(!connections.contains(gone));
        assert_eq!(world.registry().len(), 1);
    }

    #[test]
    fn test_full_queue_drops_frame_but_keeps_session() {
        let mut world = world();
        let mut connections = Connections::new();
        let handle = ConnectionHandle::next();
        let (tx, mut rx) = mpsc::channel(1);

        world.open(handle).unwrap();
        connections.insert(handle, tx);

        run_tick(&mut world, &mut connections, 1.0 / 30.0);
        let report = run_tick(&mut world, &mut connections, 1.0 / 30.0);

        assert_eq!(report.dropped, 1);
        assert!(report.closed.is_empty());
        assert!(world.resolve(handle).is_some());

        // Only the first tick's frame made it into the queue.
        assert_eq!(frame_from(rx.try_recv().unwrap()).tick, 1);
    }

    #[test]
    fn test_tick_with_no_sessions() {
        let mut world = world();
        let mut connections = Connections::new();

        let report = run_tick(&mut world, &mut connections, 1.0 / 30.0);
        assert_eq!(report, TickReport::default());
        assert_eq!(world.tick(), 1);
    }
}
