//! Smoothing filters for landmark coordinates and timing data.

pub mod ema;

/// A filter over a stream of values of type `V`.
///
/// Filter parameters live in the implementing type, while the per-stream history lives in
/// [`Filter::State`]. That way one set of parameters can be applied to many independent streams,
/// eg. every coordinate of every hand landmark.
pub trait Filter<V> {
    /// Per-stream filter state.
    type State: Default;

    /// Feeds `value` into the stream described by `state` and returns the filtered value.
    fn filter(&self, state: &mut Self::State, value: V) -> V;
}
