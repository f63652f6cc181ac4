use std::io::Write;
use std::time::Instant;

const BAR_WIDTH: usize = 50;

/// Console progress bar with elapsed time and ETA, drawn on stderr.
/// Disabled in debug mode, where the control loops log instead.
#[derive(Debug)]
pub struct Progress {
    start: Instant,
    work_size: u64,
    completed: u64,
    enabled: bool,
}

impl Progress {
    /// Return a new progress display over `work_size` units of work.
    pub fn new(work_size: u64, enabled: bool) -> Self {
        Progress {
            start: Instant::now(),
            work_size,
            completed: 0,
            enabled,
        }
    }

    /// Update the number of completed units and redraw.
    pub fn update(&mut self, completed: u64) {
        if !self.enabled || completed == self.completed {
            return;
        }
        self.completed = completed.min(self.work_size);
        self.show();
    }

    fn show(&self) {
        let fraction = self.completed as f64 / self.work_size.max(1) as f64;
        let pos = (BAR_WIDTH as f64 * fraction) as usize;
        let elapsed = self.start.elapsed().as_secs_f64();

        let mut line = String::with_capacity(96);
        line.push('[');
        for i in 0..BAR_WIDTH {
            line.push(match i {
                _ if i < pos => '=',
                _ if i == pos => '>',
                _ => ' ',
            });
        }
        line.push_str(&format!("] {:3} % {} ", (fraction * 100.0) as u32, hms(elapsed)));

        let left = self.work_size - self.completed;
        let rate = self.completed as f64 / elapsed;
        if rate > 0.0 {
            line.push_str(&format!("ETA: {}", hms(left as f64 / rate)));
        } else {
            line.push_str("ETA: --:--:--");
        }

        let mut err = std::io::stderr();
        let _ = write!(err, "{}\r", line);
        if left == 0 {
            let _ = writeln!(err);
        }
        let _ = err.flush();
    }
}

fn hms(seconds: f64) -> String {
    let total = seconds as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    #[test]
    pub fn test_hms() {
        assert_eq!(super::hms(0.0), "00:00:00");
        assert_eq!(super::hms(3723.9), "01:02:03");
    }

    #[test]
    pub fn test_progress_disabled() {
        let mut progress = super::Progress::new(10, false);
        progress.update(5);
        progress.update(10);
    }
}
