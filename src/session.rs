//! Runs the pipeline on a background thread so an interactive front end stays responsive.
//!
//! At most one job runs at a time. Progress and the final result come back over a channel.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use anyhow::Context as _;
use crossbeam_channel::{Receiver, Sender};

use crate::{
    error::{AnimathError, AnimathResult},
    llm::TextGenerator,
    pipeline::{Pipeline, PipelineEvent, RunReport},
};

#[derive(Debug)]
pub enum JobMessage {
    Event(PipelineEvent),
    Done(AnimathResult<RunReport>),
}

pub struct Session<G> {
    pipeline: Arc<Pipeline<G>>,
    busy: Arc<AtomicBool>,
}

impl<G: TextGenerator + 'static> Session<G> {
    pub fn new(pipeline: Pipeline<G>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pipeline(&self) -> &Pipeline<G> {
        &self.pipeline
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Starts a job, or fails if one is still running.
    pub fn start(&self, user_input: impl Into<String>) -> AnimathResult<Job> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AnimathError::validation(
                "a render is already in progress; wait for it to finish",
            ));
        }

        let user_input = user_input.into();
        let (tx, rx) = crossbeam_channel::unbounded();
        let pipeline = Arc::clone(&self.pipeline);
        let guard = BusyGuard(Arc::clone(&self.busy));

        let spawned = std::thread::Builder::new()
            .name("animath-worker".to_string())
            .spawn(move || worker(pipeline, user_input, tx, guard));

        // A failed spawn drops the closure, and the guard with it.
        let handle = spawned.context("spawn pipeline worker")?;
        Ok(Job { rx, handle })
    }
}

fn worker<G: TextGenerator>(
    pipeline: Arc<Pipeline<G>>,
    user_input: String,
    tx: Sender<JobMessage>,
    guard: BusyGuard,
) {
    let result = pipeline.run(&user_input, &mut |event| {
        // The receiver may be gone if the front end stopped listening.
        let _ = tx.send(JobMessage::Event(event));
    });
    drop(guard);
    let _ = tx.send(JobMessage::Done(result));
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Job {
    rx: Receiver<JobMessage>,
    handle: JoinHandle<()>,
}

impl Job {
    /// Progress events followed by one `Done`; usable with `crossbeam_channel::select!`.
    pub fn receiver(&self) -> &Receiver<JobMessage> {
        &self.rx
    }

    /// Blocks until the job finishes, forwarding progress events to `on_event`.
    pub fn wait(self, mut on_event: impl FnMut(&PipelineEvent)) -> AnimathResult<RunReport> {
        let mut outcome = None;
        for msg in self.rx.iter() {
            match msg {
                JobMessage::Event(event) => on_event(&event),
                JobMessage::Done(result) => {
                    outcome = Some(result);
                    break;
                }
            }
        }

        if self.handle.join().is_err() {
            return Err(AnimathError::generation("pipeline worker panicked"));
        }
        outcome.unwrap_or_else(|| {
            Err(AnimathError::generation("pipeline worker exited without a result"))
        })
    }
}
