//! Special functions used by the count model and the monitor.

/// Natural log of the gamma function (Lanczos, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection
        let pi = std::f64::consts::PI;
        pi.ln() - (pi * x).sin().ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut a = COEFFS[0];
        for (i, &coeff) in COEFFS.iter().enumerate().skip(1) {
            a += coeff / (x + i as f64);
        }
        let t = x + 7.5;
        let sqrt_2pi = (2.0 * std::f64::consts::PI).sqrt();
        (sqrt_2pi * a).ln() + (x + 0.5) * t.ln() - t
    }
}

/// Standard normal CDF (Abramowitz & Stegun 26.2.17).
pub fn normal_cdf(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.231_641_9 * x.abs());
    let d = 0.398_942_280_401_432_7;
    let p = d
        * (-x * x / 2.0).exp()
        * t
        * (0.319_381_530
            + t * (-0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))));

    if x >= 0.0 {
        1.0 - p
    } else {
        p
    }
}

/// Upper-tail probability of a chi-square variate with `dof` degrees of
/// freedom, via the Wilson-Hilferty cube-root approximation.
pub fn chi_square_sf(statistic: f64, dof: f64) -> f64 {
    if statistic <= 0.0 || dof <= 0.0 {
        return 1.0;
    }
    let k = 2.0 / (9.0 * dof);
    let z = ((statistic / dof).cbrt() - (1.0 - k)) / k.sqrt();
    1.0 - normal_cdf(z)
}
