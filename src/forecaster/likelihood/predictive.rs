//! Discrete predictive distribution: negative binomial, its Poisson limit,
//! and their zero-inflated mixtures.

use serde::{Deserialize, Serialize};

use super::special::ln_gamma;

/// Base means from which quantiles are summed outward from the mode.
const OUTWARD_WALK_MIN_MEAN: f64 = 100.0;

/// Central-window cutoff below the peak log-probability.
const TAIL_LN_CUTOFF: f64 = 40.0;

/// Count-model variant carried per series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CountModel {
    NegativeBinomial,
    /// Mixture with a structural-zero component of probability `pi`.
    ZeroInflated { pi: f64 },
}

impl CountModel {
    pub fn zero_inflation(&self) -> f64 {
        match self {
            CountModel::NegativeBinomial => 0.0,
            CountModel::ZeroInflated { pi } => *pi,
        }
    }
}

impl Default for CountModel {
    fn default() -> Self {
        CountModel::NegativeBinomial
    }
}

/// Family reported on emitted forecasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionFamily {
    Poisson,
    NegativeBinomial,
    ZeroInflatedPoisson,
    ZeroInflatedNegativeBinomial,
}

/// A fully specified predictive count distribution.
///
/// `mean` is the overall mean; with zero inflation the base component has
/// mean `mean / (1 - pi)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predictive {
    mean: f64,
    /// `None` is the Poisson limit.
    dispersion: Option<f64>,
    pi: f64,
}

impl Predictive {
    pub(crate) fn new(mean: f64, dispersion: Option<f64>, pi: f64) -> Self {
        Self {
            mean,
            dispersion,
            pi: pi.clamp(0.0, 1.0 - 1e-9),
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn dispersion(&self) -> Option<f64> {
        self.dispersion
    }

    pub fn zero_inflation(&self) -> f64 {
        self.pi
    }

    pub fn family(&self) -> DistributionFamily {
        match (self.dispersion.is_some(), self.pi > 0.0) {
            (false, false) => DistributionFamily::Poisson,
            (true, false) => DistributionFamily::NegativeBinomial,
            (false, true) => DistributionFamily::ZeroInflatedPoisson,
            (true, true) => DistributionFamily::ZeroInflatedNegativeBinomial,
        }
    }

    fn base_mean(&self) -> f64 {
        self.mean / (1.0 - self.pi)
    }

    fn base_variance(&self) -> f64 {
        let m = self.base_mean();
        match self.dispersion {
            Some(r) => m + m * m / r,
            None => m,
        }
    }

    /// Variance of the full mixture.
    pub fn variance(&self) -> f64 {
        let m = self.base_mean();
        (1.0 - self.pi) * (self.base_variance() + m * m) - self.mean * self.mean
    }

    fn base_ln_pmf(&self, k: u64) -> f64 {
        let m = self.base_mean();
        let k_f = k as f64;
        match self.dispersion {
            Some(r) => {
                ln_gamma(k_f + r) - ln_gamma(r) - ln_gamma(k_f + 1.0)
                    + r * (r / (r + m)).ln()
                    + k_f * (m / (r + m)).ln()
            }
            None => k_f * m.ln() - m - ln_gamma(k_f + 1.0),
        }
    }

    /// ln of the ratio P(k+1)/P(k) for the base component.
    fn base_ln_step(&self, k: u64) -> f64 {
        let m = self.base_mean();
        let k_f = k as f64;
        match self.dispersion {
            Some(r) => ((k_f + r) / (k_f + 1.0)).ln() + (m / (r + m)).ln(),
            None => m.ln() - (k_f + 1.0).ln(),
        }
    }

    pub fn ln_pmf(&self, k: u64) -> f64 {
        let base = self.base_ln_pmf(k);
        if self.pi <= 0.0 {
            base
        } else if k == 0 {
            (self.pi + (1.0 - self.pi) * base.exp()).ln()
        } else {
            (1.0 - self.pi).ln() + base
        }
    }

    pub fn pmf(&self, k: u64) -> f64 {
        self.ln_pmf(k).exp()
    }

    pub fn zero_probability(&self) -> f64 {
        self.pmf(0)
    }

    /// Upper summation bound beyond which remaining mass is negligible.
    fn support_bound(&self) -> u64 {
        let sd = self.base_variance().sqrt();
        (self.base_mean() + 40.0 * sd + 50.0).ceil() as u64
    }

    /// Visit `(k, P(Y = k))` from 0 upward until `visit` returns true or
    /// the support bound is reached.
    fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(u64, f64) -> bool,
    {
        let bound = self.support_bound();
        let mut ln_base = self.base_ln_pmf(0);
        for k in 0..=bound {
            let p = if k == 0 && self.pi > 0.0 {
                self.pi + (1.0 - self.pi) * ln_base.exp()
            } else {
                (1.0 - self.pi) * ln_base.exp()
            };
            if visit(k, p) {
                return;
            }
            ln_base += self.base_ln_step(k);
        }
    }

    /// P(Y <= k).
    pub fn cdf(&self, k: u64) -> f64 {
        let mut total = 0.0;
        self.walk(|j, p| {
            total += p;
            j >= k
        });
        total.min(1.0)
    }

    /// P(Y >= y).
    pub fn survival(&self, y: u64) -> f64 {
        if y == 0 {
            return 1.0;
        }
        (1.0 - self.cdf(y - 1)).max(0.0)
    }

    /// Smallest k with P(Y <= k) >= q.
    pub fn quantile(&self, q: f64) -> u64 {
        self.quantiles(&[q])[0]
    }

    /// Quantiles for several levels in one pmf walk.
    ///
    /// The output is ordered like `levels`; for sorted levels it is
    /// non-decreasing. Large means are summed outward from the mode over
    /// the central window only.
    pub fn quantiles(&self, levels: &[f64]) -> Vec<u64> {
        let mut order: Vec<usize> = (0..levels.len()).collect();
        order.sort_by(|&a, &b| levels[a].total_cmp(&levels[b]));
        if self.base_mean() >= OUTWARD_WALK_MIN_MEAN {
            return self.central_quantiles(levels, &order);
        }

        let bound = self.support_bound();
        let mut out = vec![bound; levels.len()];
        let mut next = 0;
        let mut cdf = 0.0;
        self.walk(|k, p| {
            cdf += p;
            while next < order.len() && cdf >= levels[order[next]] - 1e-12 {
                out[order[next]] = k;
                next += 1;
            }
            next == order.len()
        });
        out
    }

    fn central_quantiles(&self, levels: &[f64], order: &[usize]) -> Vec<u64> {
        let (lo, probs) = self.central_window();
        let hi = lo + probs.len() as u64 - 1;
        // Structural zeros sit below the window unless it reaches zero
        let offset = if lo > 0 { self.pi } else { 0.0 };
        let total = offset + probs.iter().sum::<f64>();

        let mut out = vec![hi; levels.len()];
        let mut next = 0;
        let mut cdf = offset;
        if offset > 0.0 {
            while next < order.len() && offset / total >= levels[order[next]] - 1e-12 {
                out[order[next]] = 0;
                next += 1;
            }
        }
        for (i, p) in probs.iter().enumerate() {
            cdf += p;
            while next < order.len() && cdf / total >= levels[order[next]] - 1e-12 {
                out[order[next]] = lo + i as u64;
                next += 1;
            }
            if next == order.len() {
                break;
            }
        }
        out
    }

    /// Mode of the base component.
    fn base_mode(&self) -> u64 {
        let m = self.base_mean();
        let mode = match self.dispersion {
            Some(r) if r > 1.0 => (r - 1.0) * m / r,
            Some(_) => 0.0,
            None => m,
        };
        mode.floor().max(0.0) as u64
    }

    /// Probabilities of the mixture over `[lo, lo + len)`, walking out from
    /// the mode until each side is `TAIL_LN_CUTOFF` nats below the peak.
    fn central_window(&self) -> (u64, Vec<f64>) {
        let bound = self.support_bound();
        let mode = self.base_mode().min(bound);
        let peak = self.base_ln_pmf(mode);
        let scale = 1.0 - self.pi;
        let mass = |k: u64, ln_p: f64| {
            let p = scale * ln_p.exp();
            if k == 0 {
                p + self.pi
            } else {
                p
            }
        };

        let mut below = Vec::new();
        let mut k = mode;
        let mut ln_p = peak;
        while k > 0 {
            ln_p -= self.base_ln_step(k - 1);
            k -= 1;
            if ln_p < peak - TAIL_LN_CUTOFF {
                k += 1;
                break;
            }
            below.push(mass(k, ln_p));
        }
        let lo = k;

        let mut probs: Vec<f64> = below.into_iter().rev().collect();
        probs.push(mass(mode, peak));
        let mut k = mode;
        let mut ln_p = peak;
        while k < bound {
            ln_p += self.base_ln_step(k);
            k += 1;
            if ln_p < peak - TAIL_LN_CUTOFF {
                break;
            }
            probs.push(mass(k, ln_p));
        }
        (lo, probs)
    }

    /// E[Y | Y >= y]; never below `y`.
    pub fn conditional_mean_at_least(&self, y: u64) -> f64 {
        if y == 0 {
            return self.mean;
        }
        let mut below_mass = 0.0;
        let mut below_moment = 0.0;
        self.walk(|k, p| {
            if k >= y {
                return true;
            }
            below_mass += p;
            below_moment += k as f64 * p;
            false
        });
        let tail = 1.0 - below_mass;
        let y_f = y as f64;
        if tail <= 1e-12 {
            return y_f;
        }
        ((self.mean - below_moment) / tail).max(y_f)
    }

    /// Censoring-aware log contribution of one observed count.
    pub fn ln_contribution(&self, count: u64, censored: bool) -> f64 {
        if censored {
            self.survival(count).max(f64::MIN_POSITIVE).ln()
        } else {
            self.ln_pmf(count)
        }
    }
}
