//! Pure chunked-spread planner: given an iteration count and a chunk count,
//! compute the half-open `[start, end)` range for any chunk index, with
//! surplus iterations spread one-per-chunk across the first chunks.

/// Precomputed chunking of `[0, iterations)` into `number_of_chunks` parts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkedSpread {
    iterations_per_chunk: u32,
    extra_iterations: u32,
    #[cfg(debug_assertions)]
    iterations: u32,
}

impl ChunkedSpread {
    pub(crate) fn new(iterations: u32, number_of_chunks: u32) -> Self {
        debug_assert!(number_of_chunks > 0);
        ChunkedSpread {
            iterations_per_chunk: iterations / number_of_chunks,
            extra_iterations: iterations % number_of_chunks,
            #[cfg(debug_assertions)]
            iterations,
        }
    }

    /// Returns the `[start, stop)` range for `chunk_index`. Callers must only
    /// ask for indices below the chunk count actually scheduled (see
    /// [`ChunkedSpread::chunk_count`]).
    pub(crate) fn chunk_range(&self, chunk_index: u32) -> (u32, u32) {
        let extra_iters = chunk_index.min(self.extra_iterations);
        let plain_iters = chunk_index - extra_iters;
        let has_extra = chunk_index < self.extra_iterations;

        let start = extra_iters * (self.iterations_per_chunk + 1) + plain_iters * self.iterations_per_chunk;
        let stop = start + self.iterations_per_chunk + u32::from(has_extra);

        #[cfg(debug_assertions)]
        debug_assert!(stop <= self.iterations);
        debug_assert!(start < stop, "chunk {chunk_index} has no iterations to do");

        (start, stop)
    }

    /// The number of chunks that actually carry at least one iteration, i.e.
    /// `min(iterations, number_of_chunks)`.
    pub(crate) fn chunk_count(iterations: u32, number_of_chunks: u32) -> u32 {
        iterations.min(number_of_chunks)
    }
}
