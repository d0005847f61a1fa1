use crate::error::Result;
use crate::indexer::scan::ScannedFile;
use crate::model::{IndexReport, IndexedFile, SkippedFile};
use std::any::Any;
use std::path::Path;
use std::thread;

/// Files ingested concurrently per batch.
pub const BATCH_SIZE: usize = 3;

type Attempt = std::result::Result<IndexedFile, String>;

/// Ingest `files` in fixed-size batches.
///
/// Files of one batch run on scoped worker threads; the next batch starts
/// only once every worker (and any retry) of the current one has settled.
/// A single failure abandons the concurrent attempt and every file of that
/// batch is retried one at a time. Files failing their solo retry are
/// recorded in the report and skipped.
pub fn run_batches<F>(files: &[ScannedFile], index_one: F) -> IndexReport
where
    F: Fn(&Path) -> Result<IndexedFile> + Sync,
{
    let mut report = IndexReport::default();
    for (batch_no, batch) in files.chunks(BATCH_SIZE).enumerate() {
        let attempts = run_concurrent(batch, &index_one);
        let failures = attempts.iter().filter(|attempt| attempt.is_err()).count();
        if failures == 0 {
            report.indexed_files += attempts.len();
            tracing::debug!(batch = batch_no, files = batch.len(), "batch indexed");
            continue;
        }

        tracing::warn!(
            batch = batch_no,
            failures,
            "batch failed, retrying {} files individually",
            batch.len()
        );
        for file in batch {
            match run_isolated(file, &index_one) {
                Ok(_) => report.indexed_files += 1,
                Err(reason) => {
                    tracing::warn!(file = %file.rel_path, "skipping file: {reason}");
                    report.skipped.push(SkippedFile {
                        file: file.abs_path.display().to_string(),
                        reason,
                    });
                }
            }
        }
    }
    report
}

fn run_concurrent<F>(batch: &[ScannedFile], index_one: &F) -> Vec<Attempt>
where
    F: Fn(&Path) -> Result<IndexedFile> + Sync,
{
    thread::scope(|scope| {
        let handles: Vec<_> = batch
            .iter()
            .map(|file| scope.spawn(move || index_one(&file.abs_path)))
            .collect();
        handles
            .into_iter()
            .map(|handle| settle(handle.join()))
            .collect()
    })
}

fn run_isolated<F>(file: &ScannedFile, index_one: &F) -> Attempt
where
    F: Fn(&Path) -> Result<IndexedFile> + Sync,
{
    thread::scope(|scope| settle(scope.spawn(|| index_one(&file.abs_path)).join()))
}

fn settle(joined: thread::Result<Result<IndexedFile>>) -> Attempt {
    match joined {
        Ok(Ok(indexed)) => Ok(indexed),
        Ok(Err(err)) => Err(err.to_string()),
        Err(panic) => Err(format!("worker panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn files(names: &[&str]) -> Vec<ScannedFile> {
        names
            .iter()
            .map(|name| ScannedFile {
                rel_path: name.to_string(),
                abs_path: PathBuf::from(format!("/repo/{name}")),
            })
            .collect()
    }

    fn ok(path: &Path) -> Result<IndexedFile> {
        Ok(IndexedFile::indexed(path.display().to_string()))
    }

    #[test]
    fn clean_batches_run_each_file_once() {
        let calls = Mutex::new(Vec::new());
        let report = run_batches(&files(&["a.py", "b.py", "c.py", "d.py"]), |path| {
            calls.lock().unwrap().push(path.to_path_buf());
            ok(path)
        });
        assert_eq!(report.indexed_files, 4);
        assert!(report.skipped.is_empty());
        assert_eq!(calls.lock().unwrap().len(), 4);
    }

    #[test]
    fn failing_file_triggers_solo_retry_of_whole_batch() {
        let calls = Mutex::new(Vec::new());
        let report = run_batches(&files(&["a.py", "bad.py", "c.py", "d.py"]), |path| {
            calls.lock().unwrap().push(path.to_path_buf());
            if path.ends_with("bad.py") {
                return Err(Error::Parse {
                    file: path.to_path_buf(),
                    reason: "invalid syntax".into(),
                });
            }
            ok(path)
        });
        assert_eq!(report.indexed_files, 3);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].file, "/repo/bad.py");
        // Three concurrent attempts, three solo retries, one clean batch.
        assert_eq!(calls.lock().unwrap().len(), 7);
    }

    #[test]
    fn panicking_worker_counts_as_failure() {
        let report = run_batches(&files(&["boom.py", "fine.py"]), |path| {
            if path.ends_with("boom.py") {
                panic!("extractor blew up");
            }
            ok(path)
        });
        assert_eq!(report.indexed_files, 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("extractor blew up"));
    }

    #[test]
    fn empty_input_is_empty_report() {
        let report = run_batches(&[], ok);
        assert_eq!(report, IndexReport::default());
    }
}
