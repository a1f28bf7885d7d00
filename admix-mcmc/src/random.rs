use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};
use std::collections::VecDeque;

/// Source of the variates drawn by proposal kernels
pub trait RandomSource {
    /// uniform on [0, 1)
    fn uniform01(&mut self) -> f64;

    /// Beta(a, b) variate
    fn beta(&mut self, a: f64, b: f64) -> anyhow::Result<f64>;

    /// uniform index in `0..n` (n > 0)
    fn index(&mut self, n: usize) -> usize {
        let i = (self.uniform01() * n as f64).floor() as usize;
        i.min(n.saturating_sub(1))
    }
}

impl<R: Rng + ?Sized> RandomSource for R {
    fn uniform01(&mut self) -> f64 {
        self.random::<f64>()
    }

    fn beta(&mut self, a: f64, b: f64) -> anyhow::Result<f64> {
        let dist = Beta::new(a, b).map_err(|e| anyhow::anyhow!("Beta({}, {}): {}", a, b, e))?;
        Ok(dist.sample(self))
    }
}

/// Replays queued draws before falling back to a seeded generator.
///
/// Lets tests pin the exact branch, taxon or edge a kernel picks.
pub struct ScriptedDraws {
    uniforms: VecDeque<f64>,
    betas: VecDeque<f64>,
    fallback: SmallRng,
}

impl ScriptedDraws {
    pub fn new(seed: u64) -> Self {
        Self {
            uniforms: VecDeque::new(),
            betas: VecDeque::new(),
            fallback: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn with_uniforms(mut self, values: &[f64]) -> Self {
        self.uniforms.extend(values.iter().copied());
        self
    }

    pub fn with_betas(mut self, values: &[f64]) -> Self {
        self.betas.extend(values.iter().copied());
        self
    }

    pub fn push_uniform(&mut self, u: f64) {
        self.uniforms.push_back(u);
    }

    pub fn push_beta(&mut self, x: f64) {
        self.betas.push_back(x);
    }

    /// draws still waiting in the queues
    pub fn pending(&self) -> usize {
        self.uniforms.len() + self.betas.len()
    }
}

impl RandomSource for ScriptedDraws {
    fn uniform01(&mut self) -> f64 {
        match self.uniforms.pop_front() {
            Some(u) => u,
            None => self.fallback.random::<f64>(),
        }
    }

    fn beta(&mut self, a: f64, b: f64) -> anyhow::Result<f64> {
        match self.betas.pop_front() {
            Some(x) => Ok(x),
            None => self.fallback.beta(a, b),
        }
    }
}

/// log density of Beta(a, b) at `x`
pub fn ln_beta_pdf(x: f64, a: f64, b: f64) -> f64 {
    use special::Gamma;
    if !(x > 0.0 && x < 1.0) {
        return f64::NEG_INFINITY;
    }
    (a + b).ln_gamma().0 - a.ln_gamma().0 - b.ln_gamma().0
        + (a - 1.0) * x.ln()
        + (b - 1.0) * (1.0 - x).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn scripted_values_come_first() -> anyhow::Result<()> {
        let mut draws = ScriptedDraws::new(1).with_uniforms(&[0.25, 0.99]).with_betas(&[0.5]);
        assert_eq!(draws.uniform01(), 0.25);
        assert_eq!(draws.index(4), 3);
        assert_eq!(draws.beta(1.0, 3.0)?, 0.5);
        assert_eq!(draws.pending(), 0);
        let x = draws.beta(2.0, 2.0)?;
        assert!(x > 0.0 && x < 1.0);
        Ok(())
    }

    #[test]
    fn beta_density_matches_closed_forms() {
        // Beta(1, 1) is uniform; Beta(1, 3) has density 3 (1 - x)^2
        assert_abs_diff_eq!(ln_beta_pdf(0.3, 1.0, 1.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            ln_beta_pdf(0.5, 1.0, 3.0),
            (3.0f64 * 0.25).ln(),
            epsilon = 1e-10
        );
        assert_eq!(ln_beta_pdf(0.0, 1.0, 3.0), f64::NEG_INFINITY);
    }
}
