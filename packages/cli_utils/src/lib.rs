#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing shared by the ticketstat binaries: `indicatif`
//! progress bars behind [`ProgressCallback`], and a logger that pauses
//! while those bars redraw.

pub mod progress;

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;
pub use progress::{NullProgress, ProgressCallback};

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn,ticketstat=info";

const ROWS_WAITING: &str = "{spinner:.cyan} {msg} [{elapsed}]";
const ROWS_COUNTING: &str = "  {msg} {bar:40.cyan/blue} {pos}/{len} rows [{eta}]";
const DATES: &str = "{msg} {bar:40.green/blue} {pos}/{len} days [{elapsed_precise}]";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// [`ProgressCallback`] drawn with an `indicatif` bar.
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Applied by `set_total`, when a spinner learns how long it is.
    sized: ProgressStyle,
}

impl IndicatifProgress {
    /// Bar over the citations of one date.
    ///
    /// Spins while the portal export downloads, then counts rows once the
    /// enricher reports how many there are.
    #[must_use]
    pub fn rows_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.set_style(style(ROWS_WAITING));
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));

        Arc::new(Self {
            bar,
            sized: style(ROWS_COUNTING),
        })
    }

    /// Bar over the dates of a multi-day run.
    #[must_use]
    pub fn dates_bar(multi: &MultiProgress, message: &str, days: u64) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new(days));
        bar.set_style(style(DATES));
        bar.set_message(message.to_string());

        Arc::new(Self {
            bar,
            sized: style(DATES),
        })
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.disable_steady_tick();
        self.bar.set_style(self.sized.clone());
        self.bar.reset();
        self.bar.set_length(total);
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }

    fn finish(&self, msg: &str) {
        self.bar.finish_with_message(msg.to_string());
    }

    fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

/// Installs `pretty_env_logger` behind `indicatif-log-bridge` and returns
/// the [`MultiProgress`] every bar must be added to.
///
/// The filter comes from `RUST_LOG`, falling back to
/// [`DEFAULT_LOG_FILTER`]. Calling this twice keeps the first logger.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
    let logger = pretty_env_logger::formatted_timed_builder()
        .parse_filters(&filter)
        .build();
    let max_level = logger.filter();

    let multi = MultiProgress::new();
    if indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .is_ok()
    {
        log::set_max_level(max_level);
    }

    multi
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hidden(sized: ProgressStyle) -> (ProgressBar, IndicatifProgress) {
        let bar = ProgressBar::hidden();
        let progress = IndicatifProgress {
            bar: bar.clone(),
            sized,
        };
        (bar, progress)
    }

    #[test]
    fn set_total_restarts_count() {
        let (bar, progress) = hidden(style(ROWS_COUNTING));

        progress.inc(3);
        progress.set_total(12);
        assert_eq!(bar.position(), 0);
        assert_eq!(bar.length(), Some(12));

        progress.inc(5);
        assert_eq!(bar.position(), 5);
    }

    #[test]
    fn finish_keeps_message() {
        let (bar, progress) = hidden(style(DATES));

        progress.set_message("2020-03-01");
        progress.finish("40 rows written");

        assert!(bar.is_finished());
        assert_eq!(bar.message(), "40 rows written");
    }

    #[test]
    fn templates_parse() {
        for template in [ROWS_WAITING, ROWS_COUNTING, DATES] {
            assert!(ProgressStyle::with_template(template).is_ok(), "{template}");
        }
    }
}
