use crate::executor::Outcome;

/// End-of-run counters, owned by the driver's collector loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub converted: usize,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Converted => self.converted += 1,
            Outcome::Copied => self.copied += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn any_failed(&self) -> bool {
        self.failed > 0
    }

    pub fn total(&self) -> usize {
        self.converted + self.copied + self.skipped + self.failed
    }

    /// Fixed-order report; always printed, even after failures.
    pub fn print(&self) {
        println!();
        println!("=== RUN COMPLETE ===");
        println!("Converted: {}", self.converted);
        println!("Copied: {}", self.copied);
        println!("Skipped (already exist): {}", self.skipped);
        println!("Failed: {}", self.failed);
    }
}
