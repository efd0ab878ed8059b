//! Sample-count weighted exponential average
//!
//! Forgetting is measured in applied samples, not wall-clock time: after
//! `half_life` further samples an old value carries half its original weight.
//! Not synchronized; callers guard it.

/// Combines the arguments of one [`DecayingAverage::apply`] call into a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    /// Sum of all values
    Sum,
    /// `|first - rest...|`, used for error tracking as `apply(actual, predicted)`
    AbsDiff,
}

impl Reducer {
    pub fn reduce(&self, values: &[f64]) -> f64 {
        match self {
            Reducer::Sum => values.iter().sum(),
            Reducer::AbsDiff => match values.split_first() {
                Some((first, rest)) => rest.iter().fold(*first, |d, v| d - v).abs(),
                None => 0.0,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecayingAverage {
    sum: f64,
    count: f64,
    weight: f64,
    reducer: Reducer,
}

impl DecayingAverage {
    /// `weight = 0.5^(1/half_life)`
    pub fn new(half_life: f64, reducer: Reducer) -> Self {
        Self::with_weight(0.5f64.powf(1.0 / half_life), reducer)
    }

    pub fn with_weight(weight: f64, reducer: Reducer) -> Self {
        Self {
            sum: 0.0,
            count: 0.0,
            weight,
            reducer,
        }
    }

    /// Plain decaying mean of single values
    pub fn sum(half_life: f64) -> Self {
        Self::new(half_life, Reducer::Sum)
    }

    /// Decaying mean absolute error of `(actual, predicted)` pairs
    pub fn mae(half_life: f64) -> Self {
        Self::new(half_life, Reducer::AbsDiff)
    }

    pub fn apply(&mut self, values: &[f64]) {
        self.sum *= self.weight;
        self.count *= self.weight;

        self.sum += self.reducer.reduce(values);
        self.count += 1.0;
    }

    pub fn get(&self) -> f64 {
        if self.count == 0.0 {
            return 0.0;
        }
        self.sum / self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_fresh_average_is_zero() {
        let avg = DecayingAverage::sum(720.0);
        assert_eq!(avg.get(), 0.0);
        assert!(avg.is_empty());
    }

    #[test]
    fn test_single_sample_is_returned_exactly() {
        let mut avg = DecayingAverage::sum(720.0);
        avg.apply(&[42.5]);
        assert_eq!(avg.get(), 42.5);
    }

    #[test]
    fn test_half_life_weights_older_samples_down() {
        // half_life 1: each new sample halves the weight of everything before it
        let mut avg = DecayingAverage::sum(1.0);
        avg.apply(&[0.0]);
        avg.apply(&[3.0]);
        // (0 * 0.5 + 3) / (1 * 0.5 + 1) = 2
        assert!((avg.get() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_abs_diff_is_never_negative() {
        let pairs = [
            (60466.03, 94050.91),
            (66456.01, 43771.42),
            (42463.75, 68682.31),
            (6563.702, 15651.93),
            (28303.42, 29310.19),
        ];
        for (a, b) in pairs {
            assert!(Reducer::AbsDiff.reduce(&[a, b]) >= 0.0);
        }
        assert_eq!(Reducer::AbsDiff.reduce(&[]), 0.0);
    }

    #[test]
    fn test_mae_stays_non_negative_under_random_input() {
        let mut rng = rand::thread_rng();
        let mut mae = DecayingAverage::mae(10_000.0);
        for _ in 0..10_000 {
            let actual: f64 = rng.gen::<f64>() * 100_000.0;
            let predicted: f64 = rng.gen::<f64>() * 100_000.0;
            mae.apply(&[actual, predicted]);
            assert!(mae.get() >= 0.0);
        }
    }
}
