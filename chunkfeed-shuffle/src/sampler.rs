//! Down-sampling of record streams
//!
//! Each record is kept independently with probability `1 / rate`. Because the decision
//! does not depend on the record, the surviving distribution is unbiased; only the
//! volume changes. Sampling is meant for training streams only.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use chunkfeed_core::error::{Error, Result};

/// Keeps one in `rate` items, chosen independently at random
#[derive(Debug, Clone)]
pub struct Sampler {
    rate: u32,
    rng: StdRng,
    seen: u64,
    kept: u64,
}

impl Sampler {
    /// Create a sampler keeping each item with probability `1 / rate`
    pub fn new(rate: u32, rng: StdRng) -> Result<Self> {
        if rate == 0 {
            return Err(Error::InvalidConfig(
                "downsample rate must be at least 1".into(),
            ));
        }
        Ok(Self {
            rate,
            rng,
            seen: 0,
            kept: 0,
        })
    }

    /// Create a sampler from an optional seed, falling back to entropy
    pub fn from_seed(rate: u32, seed: Option<u64>) -> Result<Self> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(rate, rng)
    }

    /// A sampler that keeps everything
    pub fn keep_all() -> Self {
        Self {
            rate: 1,
            rng: StdRng::seed_from_u64(0),
            seen: 0,
            kept: 0,
        }
    }

    /// The down-sampling denominator
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Decide whether the next item survives
    pub fn keep(&mut self) -> bool {
        self.seen += 1;
        let keep = self.rate == 1 || self.rng.gen_range(0..self.rate) == 0;
        if keep {
            self.kept += 1;
        }
        keep
    }

    /// Items considered so far
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Items kept so far
    pub fn kept(&self) -> u64 {
        self.kept
    }

    /// Wrap a fallible stream so only sampled items come through
    pub fn sample<I, T>(self, input: I) -> Sampled<I>
    where
        I: Iterator<Item = Result<T>>,
    {
        Sampled {
            input,
            sampler: self,
        }
    }
}

/// Stream adapter applying a [`Sampler`]. Errors always pass through.
pub struct Sampled<I> {
    input: I,
    sampler: Sampler,
}

impl<I> Sampled<I> {
    /// The sampler driving this stream
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Get a reference to the wrapped stream
    pub fn inner(&self) -> &I {
        &self.input
    }
}

impl<I, T> Iterator for Sampled<I>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.input.next()? {
                Ok(item) => {
                    if self.sampler.keep() {
                        return Some(Ok(item));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn rate_one_keeps_everything_in_order() {
        let kept: Vec<u32> = Sampler::keep_all()
            .sample((0..100).map(Ok::<_, Error>))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(kept, (0..100).collect::<Vec<_>>());
    }

    #[test_case(2)]
    #[test_case(16)]
    #[test_case(50)]
    fn retained_fraction_converges(rate: u32) {
        let trials = 200_000u64;
        let mut sampler = Sampler::from_seed(rate, Some(11)).unwrap();
        let kept = (0..trials).filter(|_| sampler.keep()).count() as f64;

        // binomial standard deviation, allow five of them
        let p = 1.0 / f64::from(rate);
        let expected = trials as f64 * p;
        let sigma = (trials as f64 * p * (1.0 - p)).sqrt();
        assert!(
            (kept - expected).abs() < 5.0 * sigma,
            "kept {kept}, expected {expected} +- {}",
            5.0 * sigma
        );
        assert_eq!(sampler.seen(), trials);
    }

    #[test]
    fn surviving_items_keep_relative_order() {
        let kept: Vec<u32> = Sampler::from_seed(4, Some(3))
            .unwrap()
            .sample((0..1000).map(Ok::<_, Error>))
            .collect::<Result<_>>()
            .unwrap();
        assert!(!kept.is_empty());
        assert!(kept.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn errors_are_never_sampled_away() {
        let input = (0..50)
            .map(Ok)
            .chain(std::iter::once(Err(Error::NoUsableChunks { attempted: 1 })));
        let last = Sampler::from_seed(1000, Some(1))
            .unwrap()
            .sample(input)
            .last();
        assert!(matches!(last, Some(Err(Error::NoUsableChunks { .. }))));
    }

    #[test]
    fn zero_rate_is_invalid() {
        let sampler = Sampler::from_seed(0, None);
        assert!(matches!(sampler, Err(Error::InvalidConfig(_))));
    }
}
