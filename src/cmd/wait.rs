use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use crossterm::style::{self, Stylize};
use serde_json::json;

use crate::config;
use crate::progress::{Spinner, format_bytes};
use stowage::poller::{DivePoller, PollState, list_dive_files, normalize_image_name};

pub async fn run(image: &str, dir: PathBuf, interval: Duration, attempts: u32) -> Result<()> {
    let cfg = config::get();
    let image_name = normalize_image_name(image);
    let poller = DivePoller::new(dir).with_interval(interval).with_attempts(attempts);
    let budget = poller.budget();
    let mut wait = poller.wait_for(image_name.as_str());

    let spinner = Spinner::new(format!("Waiting for dive scan of {image} ..."));
    loop {
        match wait.tick().await {
            PollState::Waiting { attempt } => {
                spinner.set_message(format!(
                    "Waiting for dive scan of {image} ({attempt}/{attempts}) ..."
                ));
                log_available(&poller.dir, &image_name);
            }
            PollState::Found(file) => {
                spinner.finish(format!(
                    "Dive scan completed! Results saved to {} ({})",
                    style::style(file.path.display()).cyan(),
                    format_bytes(file.size)
                ));
                if cfg.json {
                    let out = json!({
                        "status": "found",
                        "path": file.path.display().to_string(),
                        "size": file.size,
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
                return Ok(());
            }
            PollState::TimedOut { attempts } => {
                spinner.warn(format!(
                    "Dive scan did not complete within {}",
                    format_wait(budget)
                ));
                if cfg.json {
                    let out = json!({ "status": "timed_out", "attempts": attempts });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
                return Ok(());
            }
        }
    }
}

/// What is in the results directory when our image has nothing yet.
fn log_available(dir: &Path, image_name: &str) {
    match list_dive_files(dir) {
        Ok(names) if names.is_empty() => {
            tracing::debug!(image = image_name, dir = %dir.display(), "no dive files yet")
        }
        Ok(names) => {
            tracing::debug!(image = image_name, available = ?names, "no dive files for image")
        }
        Err(err) => tracing::debug!(dir = %dir.display(), error = %err, "cannot list dive files"),
    }
}

fn format_wait(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        60 => "1 minute".to_string(),
        s if s > 0 && s % 60 == 0 => format!("{} minutes", s / 60),
        s => format!("{s}s"),
    }
}
