use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use super::types::MarketAssumptions;

const RETURN_FLOOR: f64 = -0.95;
const RETURN_CEILING: f64 = 2.5;
const INFLATION_FLOOR: f64 = -0.03;
const INFLATION_CEILING: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSample {
    pub portfolio_return: f64,
    pub inflation: f64,
}

pub fn portfolio_mean(stock_weight: f64, stock_mean: f64, bond_mean: f64) -> f64 {
    let w = stock_weight.clamp(0.0, 1.0);
    w * stock_mean + (1.0 - w) * bond_mean
}

/// Portfolio standard deviation from the two-asset variance formula.
///
/// `sqrt((w*s)^2 + ((1-w)*b)^2 + 2*w*(1-w)*rho*s*b)`; the linear blend of the
/// two deviations overstates risk whenever `rho < 1`.
pub fn portfolio_volatility(stock_weight: f64, stock_std: f64, bond_std: f64, rho: f64) -> f64 {
    let w = stock_weight.clamp(0.0, 1.0);
    let s = stock_std.max(0.0);
    let b = bond_std.max(0.0);
    let rho = rho.clamp(-1.0, 1.0);
    let variance = (w * s).powi(2) + ((1.0 - w) * b).powi(2) + 2.0 * w * (1.0 - w) * rho * s * b;
    variance.max(0.0).sqrt()
}

pub fn stock_weight_at(market: &MarketAssumptions, age: u32) -> f64 {
    let path = &market.glide_path;
    let Some(first) = path.first() else {
        return market.stock_weight.clamp(0.0, 1.0);
    };
    if age <= first.age {
        return first.stock_weight.clamp(0.0, 1.0);
    }
    for pair in path.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if age <= hi.age {
            let span = (hi.age - lo.age).max(1) as f64;
            let t = (age - lo.age) as f64 / span;
            return (lo.stock_weight + (hi.stock_weight - lo.stock_weight) * t).clamp(0.0, 1.0);
        }
    }
    path.last()
        .map(|p| p.stock_weight)
        .unwrap_or(market.stock_weight)
        .clamp(0.0, 1.0)
}

/// Per-path return source. Each simulated path owns exactly one.
pub struct ReturnGenerator<'a> {
    market: &'a MarketAssumptions,
    rng: ChaCha8Rng,
}

impl<'a> ReturnGenerator<'a> {
    pub fn new(market: &'a MarketAssumptions, seed: u64) -> Self {
        Self {
            market,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn sample(&mut self, stock_weight: f64) -> MarketSample {
        let m = self.market;
        let mean = portfolio_mean(stock_weight, m.stock_mean, m.bond_mean);
        let std = portfolio_volatility(stock_weight, m.stock_std, m.bond_std, m.correlation);

        let portfolio_return =
            draw_normal(&mut self.rng, mean, std).clamp(RETURN_FLOOR, RETURN_CEILING);
        let inflation = draw_normal(&mut self.rng, m.inflation_mean, m.inflation_std)
            .clamp(INFLATION_FLOOR, INFLATION_CEILING);

        MarketSample {
            portfolio_return,
            inflation,
        }
    }
}

fn draw_normal(rng: &mut ChaCha8Rng, mean: f64, std: f64) -> f64 {
    // Always consume a draw so zero-volatility inputs keep the stream aligned.
    let z: f64 = StandardNormal.sample(rng);
    mean + std.max(0.0) * z
}

pub fn derive_seed(base_seed: u64, path_index: u32) -> u64 {
    splitmix64(base_seed ^ (((path_index as u64) << 1) | 1))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::GlidePoint;

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    #[test]
    fn volatility_uses_quadratic_combination() {
        let sigma = portfolio_volatility(0.6, 0.18, 0.06, 0.3);
        let linear = 0.6 * 0.18 + 0.4 * 0.06;
        assert_approx_tol(sigma, 0.0137952_f64.sqrt(), 1e-12);
        assert_approx_tol(linear, 0.132, 1e-12);
        assert!(sigma < linear - 0.01);
    }

    #[test]
    fn volatility_matches_linear_blend_only_at_perfect_correlation() {
        let sigma = portfolio_volatility(0.6, 0.18, 0.06, 1.0);
        assert_approx_tol(sigma, 0.132, 1e-12);
    }

    #[test]
    fn mean_is_linear_blend() {
        assert_approx_tol(portfolio_mean(0.6, 0.10, 0.04), 0.076, 1e-12);
    }

    #[test]
    fn zero_volatility_returns_means() {
        let market = MarketAssumptions {
            stock_std: 0.0,
            bond_std: 0.0,
            inflation_std: 0.0,
            ..MarketAssumptions::default()
        };
        let mut generator = ReturnGenerator::new(&market, 9);
        let sample = generator.sample(0.6);
        assert_approx_tol(
            sample.portfolio_return,
            portfolio_mean(0.6, market.stock_mean, market.bond_mean),
            1e-12,
        );
        assert_approx_tol(sample.inflation, market.inflation_mean, 1e-12);
    }

    #[test]
    fn sample_clamps_extreme_values() {
        let market = MarketAssumptions {
            stock_mean: -5.0,
            bond_mean: -5.0,
            stock_std: 0.0,
            bond_std: 0.0,
            inflation_mean: 3.0,
            inflation_std: 0.0,
            ..MarketAssumptions::default()
        };
        let mut generator = ReturnGenerator::new(&market, 1);
        let sample = generator.sample(0.5);
        assert_approx_tol(sample.portfolio_return, RETURN_FLOOR, 1e-12);
        assert_approx_tol(sample.inflation, INFLATION_CEILING, 1e-12);
    }

    #[test]
    fn same_seed_gives_identical_stream() {
        let market = MarketAssumptions::default();
        let mut a = ReturnGenerator::new(&market, 77);
        let mut b = ReturnGenerator::new(&market, 77);
        for _ in 0..20 {
            assert_eq!(a.sample(0.6), b.sample(0.6));
        }
    }

    #[test]
    fn sampled_moments_track_assumptions() {
        let market = MarketAssumptions::default();
        let mut generator = ReturnGenerator::new(&market, 2024);
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| generator.sample(0.6).portfolio_return).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
        let expected_std = portfolio_volatility(0.6, 0.18, 0.06, 0.3);
        assert_approx_tol(mean, portfolio_mean(0.6, 0.10, 0.045), 0.005);
        assert_approx_tol(var.sqrt(), expected_std, 0.005);
    }

    #[test]
    fn glide_path_interpolates_and_clamps() {
        let market = MarketAssumptions {
            glide_path: vec![
                GlidePoint { age: 50, stock_weight: 0.8 },
                GlidePoint { age: 70, stock_weight: 0.4 },
            ],
            ..MarketAssumptions::default()
        };
        assert_approx_tol(stock_weight_at(&market, 40), 0.8, 1e-12);
        assert_approx_tol(stock_weight_at(&market, 60), 0.6, 1e-12);
        assert_approx_tol(stock_weight_at(&market, 90), 0.4, 1e-12);

        let flat = MarketAssumptions::default();
        assert_approx_tol(stock_weight_at(&flat, 60), 0.6, 1e-12);
    }

    #[test]
    fn derive_seed_changes_per_path() {
        assert_ne!(derive_seed(42, 0), derive_seed(42, 1));
        assert_ne!(derive_seed(42, 0), derive_seed(43, 0));
        assert_eq!(derive_seed(42, 5), derive_seed(42, 5));
    }
}
