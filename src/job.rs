//! Job definitions for DSP graph nodes.
//!
//! A job is the signal-processing computation attached to a graph node.
//! The scheduler treats it as opaque: it is invoked exactly once per tick
//! with the index of the thread running it.

/// A unit of DSP work attached to a graph node.
///
/// Implementations render one audio period's worth of signal when called.
/// The `thread_index` identifies the executing thread: `0` is the driver
/// (the audio callback thread), `1..=used_helper_threads` are helpers.
/// Nodes that keep per-thread scratch state can use it to index into
/// preallocated buffers.
///
/// Any `FnMut(usize)` closure is a job:
///
/// ```
/// use dspflow::Job;
///
/// let mut phase = 0.0_f32;
/// let mut osc = move |_thread: usize| {
///     phase = (phase + 0.01) % 1.0;
/// };
/// osc.run(0);
/// ```
pub trait Job: Send + 'static {
    /// Renders one tick of this node's DSP work.
    fn run(&mut self, thread_index: usize);
}

impl<F> Job for F
where
    F: FnMut(usize) + Send + 'static,
{
    fn run(&mut self, thread_index: usize) {
        self(thread_index)
    }
}

pub(crate) type BoxedJob = Box<dyn Job>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_is_a_job() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let mut job = move |thread: usize| {
            assert_eq!(thread, 3);
            calls_clone.fetch_add(1, Ordering::SeqCst);
        };
        job.run(3);
        job.run(3);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_boxed_job_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let mut job: BoxedJob = Box::new(move |_thread: usize| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        job.run(0);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
