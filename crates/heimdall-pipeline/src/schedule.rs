//! The scheduler: a long-running tick loop firing ingestion-then-cleaning at
//! declared wall-clock moments.
//!
//! HOURLY at minute 05, DAILY at 00:05, MONTHLY on day 1 at 00:10, QUARTERLY
//! on quarter-start at 00:15. Runs execute inline on the tick loop, so a
//! tick that lands while a run is still executing is dropped (not queued) —
//! at most one writer ever mutates the store. The shutdown signal drains the
//! current run and exits.

use std::collections::HashMap;

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use heimdall_adapters::EnvelopeSource;
use heimdall_core::catalog::UpdateFrequency;
use heimdall_fetch::Shutdown;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::clean::CleaningPipeline;
use crate::ingest::IngestionEngine;
use crate::Result;

pub struct Scheduler<S> {
  engine:   IngestionEngine<S>,
  pipeline: CleaningPipeline,
  shutdown: Shutdown,
}

impl<S: EnvelopeSource + 'static> Scheduler<S> {
  pub fn new(
    engine: IngestionEngine<S>,
    pipeline: CleaningPipeline,
    shutdown: Shutdown,
  ) -> Self {
    Self { engine, pipeline, shutdown }
  }

  /// Tick once a minute until shutdown. Exits cleanly after draining any
  /// in-flight run.
  pub async fn run(&self) -> Result<()> {
    let mut ticker = interval(Duration::from_secs(60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // slot string per frequency, so one wall-clock minute fires at most once
    let mut fired: HashMap<UpdateFrequency, String> = HashMap::new();

    tracing::info!(
      "scheduler started (HOURLY :05, DAILY 00:05, MONTHLY day-1 00:10, QUARTERLY quarter-start 00:15)"
    );

    loop {
      tokio::select! {
        _ = self.shutdown.triggered() => {
          tracing::info!("shutdown signal received; scheduler exiting");
          return Ok(());
        }
        _ = ticker.tick() => {}
      }

      let now = Local::now().naive_local();
      let slot = now.format("%Y-%m-%d %H:%M").to_string();

      for frequency in due_frequencies(now) {
        if fired.get(&frequency).is_some_and(|s| *s == slot) {
          continue;
        }
        fired.insert(frequency, slot.clone());

        tracing::info!(frequency = %frequency, "scheduler tick firing");
        self.fire(frequency).await;

        if self.shutdown.is_triggered() {
          tracing::info!("shutdown signal received; scheduler exiting");
          return Ok(());
        }
      }
    }
  }

  /// One ingestion-then-cleaning sequence. Failures are logged; the
  /// scheduler itself keeps running.
  async fn fire(&self, frequency: UpdateFrequency) {
    let report = match self.engine.ingest(frequency, None).await {
      Ok(report) => report,
      Err(e) => {
        tracing::error!(
          frequency = %frequency,
          error = %e,
          "scheduled ingestion failed"
        );
        return;
      }
    };

    if report.families_with_new_rows.is_empty() {
      tracing::info!(frequency = %frequency, "no new raw rows; skipping clean");
      return;
    }

    self
      .pipeline
      .clean_all(&report.families_with_new_rows, false)
      .await;
  }
}

/// Which frequencies are due at this wall-clock minute.
fn due_frequencies(now: NaiveDateTime) -> Vec<UpdateFrequency> {
  let mut due = Vec::new();

  if now.minute() == 5 {
    due.push(UpdateFrequency::Hourly);
  }
  if now.hour() == 0 && now.minute() == 5 {
    due.push(UpdateFrequency::Daily);
  }
  if now.day() == 1 && now.hour() == 0 && now.minute() == 10 {
    due.push(UpdateFrequency::Monthly);
  }
  if matches!(now.month(), 1 | 4 | 7 | 10)
    && now.day() == 1
    && now.hour() == 0
    && now.minute() == 15
  {
    due.push(UpdateFrequency::Quarterly);
  }

  due
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;

  fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
      .unwrap()
      .and_hms_opt(h, mi, 0)
      .unwrap()
  }

  #[test]
  fn hourly_fires_at_minute_five() {
    assert_eq!(due_frequencies(at(2025, 3, 14, 9, 5)), [UpdateFrequency::Hourly]);
    assert!(due_frequencies(at(2025, 3, 14, 9, 6)).is_empty());
  }

  #[test]
  fn daily_stacks_with_hourly_at_midnight() {
    assert_eq!(
      due_frequencies(at(2025, 3, 14, 0, 5)),
      [UpdateFrequency::Hourly, UpdateFrequency::Daily]
    );
  }

  #[test]
  fn monthly_fires_on_day_one() {
    assert_eq!(due_frequencies(at(2025, 3, 1, 0, 10)), [UpdateFrequency::Monthly]);
    assert!(due_frequencies(at(2025, 3, 2, 0, 10)).is_empty());
  }

  #[test]
  fn quarterly_fires_on_quarter_start_only() {
    assert_eq!(
      due_frequencies(at(2025, 4, 1, 0, 15)),
      [UpdateFrequency::Quarterly]
    );
    assert!(due_frequencies(at(2025, 5, 1, 0, 15)).is_empty());
  }
}
