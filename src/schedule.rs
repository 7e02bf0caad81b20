use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Settings;
use crate::db::Repository;
use crate::engine::{current_profile, Engine};
use crate::model::{RunStatus, RunTrigger};
use crate::render::Renderer;

const CANCEL_POLL: Duration = Duration::from_millis(250);

/// Automatic runs until cancelled. One run at a time: the next sleep starts
/// only after the previous run returned. The profile is re-read every cycle,
/// so a changed scrape frequency applies from the next sleep on.
///
/// Returns the number of runs started.
pub async fn watch<R: Renderer, S: Repository>(engine: &Engine<R>, store: &S, settings: &Settings) -> usize {
    let mut runs = 0;

    while !engine.is_cancelled() {
        let profile = match current_profile(store, settings) {
            Ok(p) => p,
            Err(e) => {
                error!("Cannot read profile, retrying later: {}", e);
                if !sleep_unless_cancelled(engine, Duration::from_secs(settings.retry_delay_secs)).await {
                    break;
                }
                continue;
            }
        };

        let interval = profile.scrape_frequency.interval();
        info!("Next automatic run in {}s ({})", interval.as_secs(), profile.scrape_frequency);
        if !sleep_unless_cancelled(engine, interval).await {
            break;
        }

        runs += 1;
        let outcome = engine
            .run_once(
                store,
                &settings.query_urls,
                &profile,
                settings.auto_max_jobs,
                RunTrigger::Automatic,
            )
            .await;

        if outcome.status == RunStatus::Failed {
            warn!(
                "Automatic run failed, backing off {}s: {}",
                settings.retry_delay_secs,
                outcome.error_message.as_deref().unwrap_or("")
            );
            if !sleep_unless_cancelled(engine, Duration::from_secs(settings.retry_delay_secs)).await {
                break;
            }
        }
    }

    info!("Scheduler stopped after {} run(s)", runs);
    runs
}

/// Sleep in short slices so cancellation is noticed promptly. Returns false
/// when cancelled before the full duration elapsed.
async fn sleep_unless_cancelled<R: Renderer>(engine: &Engine<R>, total: Duration) -> bool {
    let mut left = total;
    while !left.is_zero() {
        if engine.is_cancelled() {
            return false;
        }
        let step = left.min(CANCEL_POLL);
        tokio::time::sleep(step).await;
        left -= step;
    }
    !engine.is_cancelled()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::db::SqliteStore;
    use crate::engine::EngineOptions;
    use crate::error::RenderError;
    use crate::render::Document;

    struct NeverCalled;

    impl Renderer for NeverCalled {
        async fn load(&self, url: &str) -> Result<Document, RenderError> {
            panic!("unexpected load of {}", url);
        }
    }

    #[tokio::test]
    async fn cancelled_scheduler_returns_immediately() {
        let store = SqliteStore::open_in_memory().unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let engine = Engine::new(NeverCalled, EngineOptions::default(), flag);

        let runs = watch(&engine, &store, &Settings::default()).await;
        assert_eq!(runs, 0);
        assert!(store.latest_run().unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_during_sleep_stops_the_loop() {
        let flag = Arc::new(AtomicBool::new(false));
        let engine = Engine::new(NeverCalled, EngineOptions::default(), Arc::clone(&flag));

        let canceller = {
            let flag = Arc::clone(&flag);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                flag.store(true, Ordering::SeqCst);
            })
        };

        assert!(!sleep_unless_cancelled(&engine, Duration::from_secs(3600)).await);
        canceller.await.unwrap();
    }
}
