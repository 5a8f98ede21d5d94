//! Exponential Moving Average.

use super::Filter;

/// An Exponential Moving Average (EMA) filter.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f32,
}

impl Ema {
    /// Creates an EMA filter with smoothing factor `alpha`.
    ///
    /// An `alpha` of 1.0 passes values through unchanged, smaller values smooth more strongly.
    ///
    /// # Panics
    ///
    /// Panics if `alpha` is not in range `0.0..=1.0`.
    pub fn new(alpha: f32) -> Self {
        assert!(
            (0.0..=1.0).contains(&alpha),
            "EMA alpha must be between 0 and 1, got {alpha}"
        );
        Self { alpha }
    }
}

/// Filter state of an [`Ema`].
#[derive(Debug, Default, Clone)]
pub struct EmaState {
    last: Option<f32>,
}

impl Filter<f32> for Ema {
    type State = EmaState;

    fn filter(&self, state: &mut EmaState, value: f32) -> f32 {
        let out = match state.last {
            Some(last) => self.alpha * value + (1.0 - self.alpha) * last,
            None => value,
        };
        state.last = Some(out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages() {
        let ema = Ema::new(0.5);
        let mut state = EmaState::default();
        assert_eq!(ema.filter(&mut state, 1.0), 1.0);
        assert_eq!(ema.filter(&mut state, 2.0), 1.5);
        assert_eq!(ema.filter(&mut state, 2.0), 1.75);

        let mut fresh = EmaState::default();
        assert_eq!(ema.filter(&mut fresh, 8.0), 8.0);
    }

    #[test]
    fn passthrough() {
        let ema = Ema::new(1.0);
        let mut state = EmaState::default();
        for v in [3.0, -1.0, 12.5] {
            assert_eq!(ema.filter(&mut state, v), v);
        }
    }

    #[test]
    #[should_panic]
    fn invalid_alpha() {
        Ema::new(1.5);
    }
}
