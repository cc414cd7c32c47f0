use crate::error::{Result, SetEmbedError};
use candle_core::{DType, Tensor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Aggregation {
    #[default]
    Sum,
    Mean,
}

/// Masked commutative reduction over the trial axis
#[derive(Clone, Copy, Debug, Default)]
pub struct MaskedAggregator {
    aggregation: Aggregation,
}

impl MaskedAggregator {
    pub fn new(aggregation: Aggregation) -> Self {
        Self { aggregation }
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Pool per-trial latents over present slots only
    ///
    /// Absent slots are *selected* out (replaced by the additive
    /// identity) rather than multiplied by zero, so whatever sits there,
    /// NaN included, never reaches the sum. `Mean` divides by the number
    /// of present trials of each set, not by `m`.
    ///
    /// * `h_bmk` - per-trial latents (b x m x k)
    /// * `mask_bm` - presence indicator (b x m), any integer or float dtype
    ///
    /// # Returns pooled latent (b x k)
    pub fn aggregate(&self, h_bmk: &Tensor, mask_bm: &Tensor) -> Result<Tensor> {
        let (bb, mm, kk) = match *h_bmk.dims() {
            [bb, mm, kk] => (bb, mm, kk),
            _ => return Err(SetEmbedError::shape("latent tensor rank", 3, h_bmk.rank())),
        };
        match *mask_bm.dims() {
            [b, _] if b != bb => return Err(SetEmbedError::shape("mask batch size", bb, b)),
            [_, m] if m != mm => {
                return Err(SetEmbedError::invalid(format!(
                    "presence mask has {} slots for {} trials",
                    m, mm
                )))
            }
            [_, _] => {}
            _ => return Err(SetEmbedError::shape("mask rank", 2, mask_bm.rank())),
        }

        let mask_bm = mask_bm.to_dtype(DType::U8)?;
        let counts = mask_bm.to_dtype(DType::F32)?.sum_keepdim(1)?; // b x 1

        let keep_bmk = mask_bm.unsqueeze(2)?.broadcast_as((bb, mm, kk))?.contiguous()?;
        let zeros_bmk = Tensor::zeros((bb, mm, kk), h_bmk.dtype(), h_bmk.device())?;
        let sum_bk = keep_bmk.where_cond(h_bmk, &zeros_bmk)?.sum(1)?;

        match self.aggregation {
            Aggregation::Sum => Ok(sum_bk),
            Aggregation::Mean => {
                let counts_b = counts.flatten_all()?.to_vec1::<f32>()?;
                if let Some(b) = counts_b.iter().position(|&c| c < 1.0) {
                    return Err(SetEmbedError::invalid(format!(
                        "mean over zero present trials (set {} of {})",
                        b, bb
                    )));
                }
                Ok(sum_bk.broadcast_div(&counts.to_dtype(sum_bk.dtype())?)?)
            }
        }
    }
}
