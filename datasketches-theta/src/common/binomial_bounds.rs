// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Approximate binomial confidence bounds for sketches sampled with probability theta.
//!
//! The retained entries of a theta sketch are a Bernoulli sample of the distinct input
//! with success probability theta. These bounds invert that binomial to bracket the
//! true distinct count. Zero and one retained samples are solved in closed form; larger
//! samples use the continuity-corrected classic normal approximation.

use crate::common::NumStdDev;

/// Returns the approximate lower bound on the number of distinct items.
pub(crate) fn lower_bound(
    num_samples: u64,
    theta: f64,
    num_std_dev: NumStdDev,
    no_data_seen: bool,
) -> f64 {
    if no_data_seen {
        return 0.0;
    }
    check_theta(theta);
    let samples = num_samples as f64;
    let estimate = samples / theta;
    let lb = approximate_lower_bound(num_samples, theta, num_std_dev);
    estimate.min(samples.max(lb))
}

/// Returns the approximate upper bound on the number of distinct items.
pub(crate) fn upper_bound(
    num_samples: u64,
    theta: f64,
    num_std_dev: NumStdDev,
    no_data_seen: bool,
) -> f64 {
    if no_data_seen {
        return 0.0;
    }
    check_theta(theta);
    let estimate = num_samples as f64 / theta;
    let ub = approximate_upper_bound(num_samples, theta, num_std_dev);
    estimate.max(ub)
}

fn check_theta(theta: f64) {
    assert!(
        theta > 0.0 && theta <= 1.0,
        "theta must be in (0.0, 1.0], got {theta}"
    );
}

fn approximate_lower_bound(num_samples: u64, theta: f64, num_std_dev: NumStdDev) -> f64 {
    let samples = num_samples as f64;
    if theta == 1.0 {
        return samples;
    }
    match num_samples {
        0 => 0.0,
        1 => {
            let delta = num_std_dev.tail_probability();
            ((-delta).ln_1p() / (-theta).ln_1p()).floor()
        }
        n if n <= 120 && theta > 1.0 - 1e-5 => samples,
        _ => continuous_lower_bound(samples, theta, num_std_dev.value()) - 0.5,
    }
}

fn approximate_upper_bound(num_samples: u64, theta: f64, num_std_dev: NumStdDev) -> f64 {
    let samples = num_samples as f64;
    if theta == 1.0 {
        return samples;
    }
    match num_samples {
        0 => {
            let delta = num_std_dev.tail_probability();
            (delta.ln() / (-theta).ln_1p()).ceil()
        }
        n if n <= 120 && theta > 1.0 - 1e-5 => samples + 1.0,
        _ => continuous_upper_bound(samples, theta, num_std_dev.value()) + 0.5,
    }
}

fn continuous_lower_bound(samples: f64, theta: f64, num_std_dev: f64) -> f64 {
    let n_hat = (samples - 0.5) / theta;
    let b = num_std_dev * ((1.0 - theta) / theta).sqrt();
    let d = 0.5 * b * (b * b + 4.0 * n_hat).sqrt();
    let center = n_hat + 0.5 * (b * b);
    center - d
}

fn continuous_upper_bound(samples: f64, theta: f64, num_std_dev: f64) -> f64 {
    let n_hat = (samples + 0.5) / theta;
    let b = num_std_dev * ((1.0 - theta) / theta).sqrt();
    let d = 0.5 * b * (b * b + 4.0 * n_hat).sqrt();
    let center = n_hat + 0.5 * (b * b);
    center + d
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [NumStdDev; 3] = [NumStdDev::One, NumStdDev::Two, NumStdDev::Three];

    #[test]
    fn test_exact_mode_is_tight() {
        for s in ALL {
            assert_eq!(lower_bound(512, 1.0, s, false), 512.0);
            assert_eq!(upper_bound(512, 1.0, s, false), 512.0);
        }
    }

    #[test]
    fn test_no_data_seen() {
        assert_eq!(lower_bound(0, 0.5, NumStdDev::Two, true), 0.0);
        assert_eq!(upper_bound(0, 0.5, NumStdDev::Two, true), 0.0);
    }

    #[test]
    fn test_zero_samples_has_positive_upper_bound() {
        let ub = upper_bound(0, 0.001, NumStdDev::Two, false);
        assert!(ub > 0.0);
        assert_eq!(lower_bound(0, 0.001, NumStdDev::Two, false), 0.0);
    }

    #[test]
    fn test_tiny_theta_keeps_bounds_finite() {
        let theta = 1e-18;
        let ub = upper_bound(0, theta, NumStdDev::Two, false);
        assert!(ub.is_finite() && ub > 0.0, "{ub}");
        let lb = lower_bound(1, theta, NumStdDev::Two, false);
        assert!(lb.is_finite() && lb >= 1.0, "{lb}");
        assert!(upper_bound(1, theta, NumStdDev::Two, false) >= 1.0 / theta);
    }

    #[test]
    fn test_bounds_widen_with_std_dev() {
        for (samples, theta) in [(1, 0.3), (50, 0.25), (4096, 0.01), (10_000, 0.5)] {
            let estimate = samples as f64 / theta;
            let mut prev_lb = f64::INFINITY;
            let mut prev_ub = f64::NEG_INFINITY;
            for s in ALL {
                let lb = lower_bound(samples, theta, s, false);
                let ub = upper_bound(samples, theta, s, false);
                assert!(lb <= estimate && estimate <= ub);
                assert!(lb <= prev_lb, "lb {lb} > {prev_lb} at {samples}, {theta}");
                assert!(ub >= prev_ub, "ub {ub} < {prev_ub} at {samples}, {theta}");
                prev_lb = lb;
                prev_ub = ub;
            }
        }
    }
}
