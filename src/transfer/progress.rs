//! Per-image progress: one step per config or layer record, whether transferred
//! by this image or awaited from another one.

use crate::image::ImageReference;
use crate::logging::Logger;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

const TITLE_WIDTH: usize = 36;
const BAR_WIDTH: usize = 30;

#[derive(Debug)]
pub struct ImageProgress {
    title: String,
    total: usize,
    completed: AtomicUsize,
    start_time: Instant,
    output: Logger,
}

impl ImageProgress {
    pub fn new(image: &ImageReference, total: usize, output: Logger) -> Self {
        ImageProgress {
            title: image.short_name(),
            total,
            completed: AtomicUsize::new(0),
            start_time: Instant::now(),
            output,
        }
    }

    /// Count one finished step and redraw
    pub fn incr(&self) -> usize {
        let done = (self.completed.fetch_add(1, Ordering::SeqCst) + 1).min(self.total);
        self.output.progress_line(&self.render(done));
        done
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst).min(self.total)
    }

    pub fn finish(&self, failures: usize) {
        let line = format!(
            "{} {}/{} in {}",
            self.title,
            self.completed(),
            self.total,
            self.output.format_duration(self.start_time.elapsed())
        );
        if failures == 0 {
            self.output.success(&line);
        } else {
            self.output
                .warning(&format!("{} ({} failed)", line, failures));
        }
    }

    fn render(&self, done: usize) -> String {
        let filled = if self.total == 0 {
            BAR_WIDTH
        } else {
            done * BAR_WIDTH / self.total
        };
        let title: String = self.title.chars().take(TITLE_WIDTH).collect();
        format!(
            "{:<width$} [{}{}] {}/{} {}",
            title,
            "=".repeat(filled),
            " ".repeat(BAR_WIDTH - filled),
            done,
            self.total,
            self.output.format_duration(self.start_time.elapsed()),
            width = TITLE_WIDTH
        )
    }
}
