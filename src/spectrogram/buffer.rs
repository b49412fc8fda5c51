//! Rolling time–frequency history.

use std::sync::{Arc, Mutex, MutexGuard};

use super::normalizer::NormalizedRow;

/// Fixed `depth x width` ring of normalized rows; row 0 is the most recent.
///
/// Rows live in one flat arena. A push overwrites the oldest slot and moves the
/// head index, so nothing is shifted or reallocated per tick.
#[derive(Debug, Clone)]
pub struct SpectrogramBuffer {
    depth: usize,
    width: usize,
    cells: Vec<f32>,
    /// Slot holding row 0.
    head: usize,
}

impl SpectrogramBuffer {
    pub fn new(depth: usize, width: usize) -> Self {
        Self {
            depth,
            width,
            cells: vec![0.0; depth * width],
            head: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Inserts `row` as the most recent entry, evicting the oldest.
    ///
    /// Rows of a different width are truncated or zero-padded to fit.
    pub fn push(&mut self, row: &NormalizedRow) {
        if self.depth == 0 {
            return;
        }
        self.head = (self.head + self.depth - 1) % self.depth;
        let start = self.head * self.width;
        let slot = &mut self.cells[start..start + self.width];

        let values = row.values();
        let copied = values.len().min(self.width);
        slot[..copied].copy_from_slice(&values[..copied]);
        slot[copied..].fill(0.0);
    }

    /// Zeroes every row.
    pub fn reset(&mut self) {
        self.cells.fill(0.0);
        self.head = 0;
    }

    /// Row `age` steps back in time; `row(0)` is the newest.
    pub fn row(&self, age: usize) -> Option<&[f32]> {
        if age >= self.depth {
            return None;
        }
        let start = ((self.head + age) % self.depth) * self.width;
        Some(&self.cells[start..start + self.width])
    }

    /// Rows from newest to oldest.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        (0..self.depth).filter_map(move |age| self.row(age))
    }

    /// Copy of the whole buffer as `[depth][width]`, newest first.
    pub fn snapshot(&self) -> Vec<Vec<f32>> {
        self.rows().map(<[f32]>::to_vec).collect()
    }
}

/// Buffer handle shared between the pipeline thread and readers.
///
/// Each operation holds the lock for a single row write or a single copy.
#[derive(Debug, Clone)]
pub struct SharedSpectrogram {
    inner: Arc<Mutex<SpectrogramBuffer>>,
}

impl SharedSpectrogram {
    pub fn new(depth: usize, width: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SpectrogramBuffer::new(depth, width))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SpectrogramBuffer> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, row: &NormalizedRow) {
        self.lock().push(row);
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    /// Replaces the buffer with an empty one of new dimensions.
    pub fn resize(&self, depth: usize, width: usize) {
        let mut buffer = self.lock();
        if buffer.depth() != depth || buffer.width() != width {
            *buffer = SpectrogramBuffer::new(depth, width);
        } else {
            buffer.reset();
        }
    }

    pub fn snapshot(&self) -> Vec<Vec<f32>> {
        self.lock().snapshot()
    }

    /// Runs `f` against a consistent view of the buffer.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&SpectrogramBuffer) -> R) -> R {
        f(&self.lock())
    }

    #[cfg(test)]
    pub fn dimensions(&self) -> (usize, usize) {
        let buffer = self.lock();
        (buffer.depth(), buffer.width())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: f32, width: usize) -> NormalizedRow {
        NormalizedRow::from(vec![value; width])
    }

    #[test]
    fn test_new_buffer_is_all_zero() {
        let buffer = SpectrogramBuffer::new(4, 3);
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.iter().all(|r| r == &vec![0.0; 3]));
    }

    #[test]
    fn test_push_orders_by_recency() {
        let mut buffer = SpectrogramBuffer::new(3, 2);
        buffer.push(&row(0.1, 2));
        buffer.push(&row(0.2, 2));

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot[0], vec![0.2, 0.2]);
        assert_eq!(snapshot[1], vec![0.1, 0.1]);
        assert_eq!(snapshot[2], vec![0.0, 0.0]);
    }

    #[test]
    fn test_depth_pushes_keep_oldest_at_tail() {
        let depth = 5;
        let mut buffer = SpectrogramBuffer::new(depth, 4);
        for i in 0..(depth * 2 + 1) {
            buffer.push(&row(i as f32 / 20.0, 4));
        }

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), depth);
        assert_eq!(snapshot[0], vec![10.0 / 20.0; 4]);
        assert_eq!(snapshot[depth - 1], vec![6.0 / 20.0; 4]);
    }

    #[test]
    fn test_reset_zeroes_all_rows() {
        let mut buffer = SpectrogramBuffer::new(3, 5);
        for _ in 0..7 {
            buffer.push(&row(0.9, 5));
        }
        buffer.reset();
        assert_eq!(buffer.snapshot(), vec![vec![0.0; 5]; 3]);
    }

    #[test]
    fn test_mismatched_row_width_is_fitted() {
        let mut buffer = SpectrogramBuffer::new(2, 3);
        buffer.push(&NormalizedRow::from(vec![0.5; 5]));
        assert_eq!(buffer.row(0).unwrap(), &[0.5, 0.5, 0.5]);
        buffer.push(&NormalizedRow::from(vec![0.25]));
        assert_eq!(buffer.row(0).unwrap(), &[0.25, 0.0, 0.0]);
        assert!(buffer.row(2).is_none());
    }

    #[test]
    fn test_shared_snapshot_sees_whole_rows() {
        let shared = SharedSpectrogram::new(8, 64);
        let writer = shared.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..500 {
                writer.push(&row((i % 10) as f32 / 10.0, 64));
            }
        });

        for _ in 0..200 {
            for r in shared.snapshot() {
                assert!(r.iter().all(|v| *v == r[0]), "torn row: {r:?}");
            }
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_shared_resize() {
        let shared = SharedSpectrogram::new(2, 2);
        shared.push(&row(1.0, 2));
        shared.resize(3, 4);
        assert_eq!(shared.dimensions(), (3, 4));
        assert_eq!(shared.snapshot(), vec![vec![0.0; 4]; 3]);
    }
}
