use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::app::{App, ViewModel};
use crate::event::Event;

const TICK: Duration = Duration::from_secs(1);

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Drive `app` until the UI side hangs up. `render` sees the view after
/// every processed event.
///
/// The countdown ticker only exists while a chat is open; it is dropped as
/// soon as the chat closes, so no tick is delivered after teardown.
pub async fn run(
    app: &mut App,
    mut events: mpsc::Receiver<Event>,
    mut render: impl FnMut(&ViewModel),
) {
    app.update(Event::AppStarted).await;
    render(&app.view());

    let mut ticker: Option<Interval> = None;
    loop {
        match (app.wants_ticks(), ticker.is_some()) {
            (true, false) => {
                let mut interval = interval_at(Instant::now() + TICK, TICK);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker = Some(interval);
                debug!("countdown ticker started");
            }
            (false, true) => {
                ticker = None;
                debug!("countdown ticker stopped");
            }
            _ => {}
        }

        let event = tokio::select! {
            ui = events.recv() => match ui {
                Some(event) => event,
                None => break,
            },
            frame = app.next_realtime_frame() => match frame {
                Some(Ok(frame)) => Event::RealtimeFrame(frame),
                Some(Err(error)) => Event::RealtimeFailed(error),
                None => Event::RealtimeDisconnected,
            },
            () = next_tick(&mut ticker) => Event::TimerTick,
        };

        app.update(event).await;
        render(&app.view());
    }
    info!("event channel closed, runtime stopped");
}
