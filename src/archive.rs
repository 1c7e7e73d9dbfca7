//! Position archiver.
//!
//! Drains the decoded position channel into newline-delimited JSON files,
//! one file per UTC day keyed on the fix time. Files are opened in append
//! mode so a restart continues the current day instead of truncating it.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::position::Position;

pub async fn run_archiver(dir: PathBuf, source: flume::Receiver<Position>) -> Result<()> {
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating archive directory {}", dir.display()))?;

    let mut current: Option<(NaiveDate, File)> = None;

    while let Ok(position) = source.recv_async().await {
        let date = position.time.date_naive();
        let file = match &mut current {
            Some((open_date, file)) if *open_date == date => file,
            _ => {
                let path = dir.join(format!("positions-{date}.jsonl"));
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .with_context(|| format!("opening archive file {}", path.display()))?;
                info!(path = %path.display(), "archiving to new daily file");
                &mut current.insert((date, file)).1
            }
        };

        let mut line = serde_json::to_vec(&position).context("serializing position")?;
        line.push(b'\n');
        file.write_all(&line).await.context("writing archive record")?;
        metrics::counter!("archive.positions").increment(1);
    }

    if let Some((_, mut file)) = current {
        file.flush().await.ok();
    }
    info!("position channel closed, archiver exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use uuid::Uuid;

    fn position_at(time: &str) -> Position {
        let mut position = Position::new("test", Uuid::new_v4());
        position.time = NaiveDateTime::parse_from_str(time, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc();
        position.latitude = 1.0;
        position.longitude = 2.0;
        position
    }

    #[tokio::test]
    async fn writes_one_file_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = flume::unbounded();

        let task = tokio::spawn(run_archiver(dir.path().to_path_buf(), rx));

        tx.send_async(position_at("2015-09-17 10:32:24")).await.unwrap();
        tx.send_async(position_at("2015-09-17 11:00:00")).await.unwrap();
        tx.send_async(position_at("2015-09-18 00:00:01")).await.unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let day_one = std::fs::read_to_string(dir.path().join("positions-2015-09-17.jsonl")).unwrap();
        assert_eq!(day_one.lines().count(), 2);
        let day_two = std::fs::read_to_string(dir.path().join("positions-2015-09-18.jsonl")).unwrap();
        assert_eq!(day_two.lines().count(), 1);

        let restored: Position = serde_json::from_str(day_one.lines().next().unwrap()).unwrap();
        assert_eq!(restored.latitude, 1.0);
    }

    #[tokio::test]
    async fn appends_across_restarts() {
        let dir = tempfile::tempdir().unwrap();

        for _ in 0..2 {
            let (tx, rx) = flume::unbounded();
            let task = tokio::spawn(run_archiver(dir.path().to_path_buf(), rx));
            tx.send_async(position_at("2015-09-17 10:32:24")).await.unwrap();
            drop(tx);
            task.await.unwrap().unwrap();
        }

        let content = std::fs::read_to_string(dir.path().join("positions-2015-09-17.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
