use std::io::{self, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use chrono::{Local, SecondsFormat};

use crate::training::EpochInfo;

pub mod style {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const FG_CYAN: &str = "\x1b[36m";
    pub const FG_GREEN: &str = "\x1b[32m";
    pub const FG_MAGENTA: &str = "\x1b[35m";
    pub const FG_BLUE: &str = "\x1b[34m";
    pub const FG_GREY: &str = "\x1b[90m";
}

use style::*;

/// Latest epoch seen by the renderer and how far through the run it is.
#[derive(Debug, Default)]
pub struct StatusLine {
    total_epochs: usize,
    seen: usize,
    last: Option<EpochInfo>,
}

impl StatusLine {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            total_epochs,
            ..Self::default()
        }
    }

    pub fn record(&mut self, info: EpochInfo) {
        self.seen += 1;
        self.last = Some(info);
    }

    pub fn render(&self) -> Option<String> {
        let e = self.last.as_ref()?;
        let mut line = format!(
            "{FG_GREEN}{BOLD}epoch{RESET} {:>6}  {FG_CYAN}{BOLD}rms{RESET} {:>12} \
             {FG_MAGENTA}{BOLD}leaves{RESET} {:>6} {DIM}active{RESET} {:>6}  \
             {DIM}t{RESET} {:>7.3}s",
            self.seen,
            sci(e.rms_error, 6),
            e.leaf_count,
            e.active_leaves,
            e.cpu_seconds
        );
        if let Some(n) = e.needing_split {
            line += &format!("  {DIM}to split{RESET} {n:>4}");
        }
        if self.total_epochs > 0 {
            let done = self.seen as f64 / self.total_epochs as f64;
            line += &format!("  {DIM}[epochs]{RESET} {}", progress_bar(done, 15));
        }
        Some(line)
    }
}

/// Prints `header` once, then repaints one status line from `rx` at most every
/// `repaint` until the sender hangs up.
pub fn render_loop(rx: Receiver<EpochInfo>, header: &[String], repaint: Duration, total_epochs: usize) {
    for line in header {
        println!("{line}");
    }
    println!();
    let _ = io::stdout().flush();

    let mut status = StatusLine::new(total_epochs);
    let mut last_draw = Instant::now();
    loop {
        match rx.recv_timeout(repaint) {
            Ok(info) => status.record(info),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(line) = status.render() {
                    print!("\r{line}\x1B[K\n");
                    let _ = io::stdout().flush();
                }
                return;
            }
        }
        if last_draw.elapsed() >= repaint {
            if let Some(line) = status.render() {
                print!("\r{line}\x1B[K");
                let _ = io::stdout().flush();
            }
            last_draw = Instant::now();
        }
    }
}

/// `[███░░] 60%` for a completed fraction; empty when the fraction is unknown.
pub fn progress_bar(fraction: f64, width: usize) -> String {
    if !fraction.is_finite() {
        return String::new();
    }
    let fraction = fraction.clamp(0.0, 1.0);
    let filled = (fraction * width as f64).round() as usize;
    format!(
        "[{}{}] {:>3.0}%",
        "█".repeat(filled),
        "░".repeat(width - filled),
        fraction * 100.0
    )
}

/// Scientific notation padded to a fixed width; NaN is dimmed.
pub fn sci(x: f64, prec: usize) -> String {
    if x.is_nan() {
        format!("{DIM}NaN{RESET}")
    } else {
        format!("{x:>6.prec$e}")
    }
}

pub fn timestamp() -> String {
    let now = Local::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    format!("{DIM}{now}{RESET}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(needing_split: Option<usize>) -> EpochInfo {
        EpochInfo {
            epoch: 0,
            rms_error: 0.25,
            leaf_count: 3,
            active_leaves: 2,
            splits: 0,
            needing_split,
            cpu_seconds: 0.5,
        }
    }

    #[test]
    fn progress_bar_fills_and_clamps() {
        assert_eq!(progress_bar(0.5, 4), "[██░░]  50%");
        assert_eq!(progress_bar(2.0, 3), "[███] 100%");
        assert_eq!(progress_bar(-1.0, 2), "[░░]   0%");
        assert!(progress_bar(f64::NAN, 4).is_empty());
    }

    #[test]
    fn sci_formats_and_marks_nan() {
        assert_eq!(sci(1234.5, 2), "1.23e3");
        assert_eq!(sci(0.0, 1), " 0.0e0");
        assert!(sci(f64::NAN, 3).contains("NaN"));
    }

    #[test]
    fn status_line_tracks_progress() {
        let mut s = StatusLine::new(4);
        assert!(s.render().is_none());

        s.record(info(None));
        let line = s.render().unwrap();
        assert!(line.contains("2.500000e-1"));
        assert!(line.contains("25%"));
        assert!(!line.contains("to split"));

        s.record(info(Some(1)));
        let line = s.render().unwrap();
        assert!(line.contains("to split"));
        assert!(line.contains("50%"));
    }

    #[test]
    fn unknown_total_has_no_bar() {
        let mut s = StatusLine::new(0);
        s.record(info(None));
        assert!(!s.render().unwrap().contains("[epochs]"));
    }
}
