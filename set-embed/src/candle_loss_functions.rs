use candle_core::{Result, Tensor};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Diagonal Gaussian log-density
///
/// llik(i) = -0.5 * sum_p [ (θ(i,p) - μ(i,p))^2 / σ^2(i,p) + log σ^2(i,p) + log 2π ]
///
/// * `theta_np` - observed parameters
/// * `mean_np` - Gaussian mean
/// * `lnvar_np` - Gaussian log variance
///
pub fn gaussian_log_density(theta_np: &Tensor, mean_np: &Tensor, lnvar_np: &Tensor) -> Result<Tensor> {
    let sq_err = theta_np.sub(mean_np)?.sqr()?;
    let prec = lnvar_np.neg()?.exp()?;
    let term = ((sq_err.mul(&prec)? + lnvar_np)? + LN_2PI)?;
    term.sum(theta_np.rank() - 1)? * (-0.5)
}
