use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress display for one batch of series: a total bar plus running
/// saved/skipped tallies, and `[INFO]`/`[WARN]` lines printed above them.
///
/// Hidden entirely when a tracing level was selected instead of the
/// interactive display.
pub(crate) struct BatchBars {
    interactive: bool,
    _multi: Option<MultiProgress>,
    total: ProgressBar,
    saved: ProgressBar,
    skipped: ProgressBar,
}

impl BatchBars {
    pub(crate) fn new(len: usize, interactive: bool) -> anyhow::Result<Self> {
        if !interactive {
            return Ok(Self {
                interactive,
                _multi: None,
                total: ProgressBar::hidden(),
                saved: ProgressBar::hidden(),
                skipped: ProgressBar::hidden(),
            });
        }

        let multi = MultiProgress::new();

        let total = multi.add(
            ProgressBar::new(len as u64).with_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.magenta}\n \
                            {msg:>9.white} |{bar:57.white/grey}| {pos:<2} / {human_len} \
                            ({percent_precise}%) [Time: {elapsed}, Rate: {per_sec}, ETA: {eta}]",
                    )?
                    .progress_chars("## "),
            ),
        );
        total.set_message("series");
        total.enable_steady_tick(Duration::from_millis(100));

        let saved = multi.insert_after(
            &total,
            ProgressBar::new(len as u64).with_style(
                ProgressStyle::default_bar()
                    .template(" {msg:>9.green} |{bar:57.green}| {pos:<2.green}")?
                    .progress_chars("## "),
            ),
        );
        saved.set_message("saved");

        let skipped = multi.insert_after(
            &saved,
            ProgressBar::new(len as u64).with_style(
                ProgressStyle::default_bar()
                    .template(" {msg:>9.red} |{bar:57.red}| {pos:<2.red}")?
                    .progress_chars("## "),
            ),
        );
        skipped.set_message("skipped");

        Ok(Self {
            interactive,
            _multi: Some(multi),
            total,
            saved,
            skipped,
        })
    }

    pub(crate) fn info(&self, msg: &str) {
        if self.interactive {
            self.total.println(format!("{} {msg}", "[INFO]".cyan()));
        }
    }

    pub(crate) fn warn(&self, msg: &str) {
        if self.interactive {
            self.total.println(format!("{} {msg}", "[WARN]".yellow()));
        }
    }

    pub(crate) fn saved(&self) {
        self.total.inc(1);
        self.saved.inc(1);
    }

    pub(crate) fn skipped(&self) {
        self.total.inc(1);
        self.skipped.inc(1);
    }

    pub(crate) fn finish(self) {
        self.total.finish_and_clear();
        self.saved.finish_and_clear();
        self.skipped.finish_and_clear();
    }
}
