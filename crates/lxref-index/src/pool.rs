//! Bounded worker pool for extraction passes.
//!
//! Workers pull jobs from a shared queue and stream results to the
//! caller over a bounded channel, so a slow merge applies backpressure
//! instead of buffering unboundedly. The caller's merge closure runs on
//! the coordinating thread only; workers never touch the database.

use lxref_core::LxrefError;
use lxref_repo::{BlobReader, SourceRepo};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

/// Run `work` over `jobs` on `workers` threads, feeding each result to
/// `merge` on the calling thread.
///
/// Each worker owns its own blob reader. A merge failure stops the pool
/// and surfaces the error; a raised cancellation flag drains the pool
/// without processing further jobs.
pub fn run_pass<J, R, W, M>(
    repo: &dyn SourceRepo,
    jobs: Vec<J>,
    workers: usize,
    cancel: &AtomicBool,
    work: W,
    mut merge: M,
) -> Result<(), LxrefError>
where
    J: Send,
    R: Send,
    W: Fn(&mut dyn BlobReader, J) -> R + Sync,
    M: FnMut(R) -> Result<(), LxrefError>,
{
    if jobs.is_empty() {
        return Ok(());
    }
    let workers = workers.max(1);
    let queue = Mutex::new(VecDeque::from(jobs));
    let stop = AtomicBool::new(false);
    let (tx, rx) = mpsc::sync_channel::<R>(workers * 2);

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            let stop = &stop;
            let work = &work;
            handles.push(scope.spawn(move || -> Result<(), LxrefError> {
                let mut reader = repo.open_reader()?;
                loop {
                    if cancel.load(Ordering::Relaxed) || stop.load(Ordering::Relaxed) {
                        return Ok(());
                    }
                    let job = queue.lock().pop_front();
                    let Some(job) = job else { return Ok(()) };
                    let result = work(reader.as_mut(), job);
                    // A closed channel means the merge side gave up.
                    if tx.send(result).is_err() {
                        return Ok(());
                    }
                }
            }));
        }
        drop(tx);

        let mut first_error = None;
        for result in rx {
            if first_error.is_none() {
                if let Err(e) = merge(result) {
                    first_error = Some(e);
                    stop.store(true, Ordering::Relaxed);
                }
            }
        }

        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error.get_or_insert(LxrefError::Storage(
                        "extraction worker panicked".to_string(),
                    ));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    })
}
