//! Progress bars for a patch run.
//!
//! ```text
//!   download [██████████░░░░░░░░░░]  1.20 GiB/2.40 GiB  12.5 MiB/s  ETA 1m
//!    install [████░░░░░░░░░░░░░░░░]  2/10 2023.07.26.0000.0001
//!     slot 0 2023.07.26.0000.0003  512.00 MiB/1.00 GiB  6.20 MiB/s
//!     slot 1 idle
//! ```

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use xivpatch::manager::{format_bytes, ProgressSnapshot, SlotSnapshot};
use xivpatch::patch::PatchCatalog;

const DOWNLOAD_TEMPLATE: &str =
    "{prefix:>10.cyan.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes}  {msg}";
const INSTALL_TEMPLATE: &str = "{prefix:>10.green.bold} [{bar:30.green/white}] {pos}/{len} {msg}";
const SLOT_TEMPLATE: &str = "{prefix:>10.dim} {msg}";

/// Name and size of each patch, by catalog index.
#[derive(Debug, Clone)]
pub struct PatchLabels {
    labels: Vec<(String, u64)>,
}

impl PatchLabels {
    pub fn from_catalog(catalog: &PatchCatalog) -> Self {
        Self {
            labels: catalog
                .iter()
                .map(|task| {
                    (
                        task.descriptor().version_id.clone(),
                        task.descriptor().length,
                    )
                })
                .collect(),
        }
    }

    fn get(&self, index: usize) -> Option<&(String, u64)> {
        self.labels.get(index)
    }
}

/// Text for one download slot.
pub fn slot_line(slot: &SlotSnapshot, labels: &PatchLabels) -> String {
    match slot.task.and_then(|task| labels.get(task)) {
        Some((version, length)) => format!(
            "{}  {}/{}  {}/s",
            version,
            format_bytes(slot.received_bytes),
            format_bytes(*length),
            format_bytes(slot.bytes_per_second as u64)
        ),
        None => "idle".to_string(),
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

/// Live progress display for one run.
pub struct ProgressDisplay {
    _multi: MultiProgress,
    download: ProgressBar,
    install: ProgressBar,
    slots: Vec<ProgressBar>,
    labels: PatchLabels,
}

impl ProgressDisplay {
    pub fn new(snapshot: &ProgressSnapshot, labels: PatchLabels) -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(4));

        let download = multi.add(ProgressBar::new(snapshot.total_bytes));
        download.set_style(style(DOWNLOAD_TEMPLATE));
        download.set_prefix("download");

        let install = multi.add(ProgressBar::new(snapshot.total_patches as u64));
        install.set_style(style(INSTALL_TEMPLATE));
        install.set_prefix("install");

        let slots = snapshot
            .slots
            .iter()
            .map(|slot| {
                let bar = multi.add(ProgressBar::new(0));
                bar.set_style(style(SLOT_TEMPLATE));
                bar.set_prefix(format!("slot {}", slot.slot));
                bar
            })
            .collect();

        let display = Self {
            _multi: multi,
            download,
            install,
            slots,
            labels,
        };
        display.update(snapshot);
        display
    }

    /// Redraw from a fresh snapshot.
    pub fn update(&self, snapshot: &ProgressSnapshot) {
        self.download
            .set_position(snapshot.total_bytes - snapshot.remaining_bytes);
        if snapshot.downloads_done {
            self.download.set_message("done");
        } else {
            self.download.set_message(format!(
                "{}/s",
                format_bytes(snapshot.bytes_per_second() as u64)
            ));
        }

        self.install.set_position(snapshot.counts.completed as u64);
        let current = self
            .labels
            .get(snapshot.install_index)
            .map(|(version, _)| version.clone())
            .unwrap_or_default();
        self.install.set_message(current);

        for (bar, slot) in self.slots.iter().zip(&snapshot.slots) {
            bar.set_message(slot_line(slot, &self.labels));
        }
    }

    /// Remove the bars from the terminal.
    pub fn finish(&self) {
        for bar in &self.slots {
            bar.finish_and_clear();
        }
        self.install.finish_and_clear();
        self.download.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> PatchLabels {
        PatchLabels {
            labels: vec![("2023.07.26.0000.0001".to_string(), 2048)],
        }
    }

    #[test]
    fn test_idle_slot() {
        let slot = SlotSnapshot {
            slot: 0,
            task: None,
            received_bytes: 0,
            bytes_per_second: 0.0,
        };
        assert_eq!(slot_line(&slot, &labels()), "idle");
    }

    #[test]
    fn test_busy_slot() {
        let slot = SlotSnapshot {
            slot: 1,
            task: Some(0),
            received_bytes: 1024,
            bytes_per_second: 512.0,
        };
        assert_eq!(
            slot_line(&slot, &labels()),
            "2023.07.26.0000.0001  1.00 KiB/2.00 KiB  512 B/s"
        );
    }
}
