// ===============================
// src/recorder.rs
// ===============================
//
// JSONL event recorder:
// - every pipeline Event becomes one line in the .jsonl file (append)
// - BufWriter, flushed every second and every 1000 events
// - parent directory is created when missing
// - channel close = final flush + exit
//
// Enable with `RECORD_FILE=/path/to/run.jsonl` (or --record-file).
//
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

async fn open_writer(path: &Path) -> std::io::Result<BufWriter<fs::File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: PathBuf) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            // recording is optional: drain so senders never block, keep the run going
            error!(?e, path = %path.display(), "recorder: open failed, events dropped");
            while rx.recv().await.is_some() {}
            return;
        }
    };
    info!(path = %path.display(), "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                match maybe_ev {
                    Some(ev) => {
                        let mut line = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                error!(?e, "recorder: serialize error, skip event");
                                continue;
                            }
                        };
                        line.push('\n');
                        if let Err(e) = writer.write_all(line.as_bytes()).await {
                            error!(?e, "recorder: write failed, drop event");
                            continue;
                        }

                        since_last_flush += 1;
                        if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                            let _ = writer.flush().await;
                            since_last_flush = 0;
                        }
                    }
                    None => {
                        let _ = writer.flush().await;
                        info!("recorder: channel closed, stopped");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}
