//! Variable-cardinality trial sets and their padded batch layout.
//!
//! A [`TrialSet`] keeps absence explicit: every slot carries a
//! presence flag next to its feature vector, so filler values never
//! have to be interpreted. NaN padding is accepted only at the edge
//! ([`TrialSet::from_nan_padded`], [`IntoTrialSets`]) and is turned
//! into a mask right there.

use crate::error::{Result, SetEmbedError};
use candle_core::{DType, Device, Tensor};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;

#[derive(Clone, Debug, PartialEq)]
pub struct TrialSet {
    feature_dim: usize,
    values: Vec<f32>, // slot-major, `len() * feature_dim`
    present: Vec<bool>,
}

impl TrialSet {
    /// A set where every trial is present
    pub fn new(trials: Vec<Vec<f32>>) -> Result<Self> {
        let present = vec![true; trials.len()];
        Self::with_mask(trials, present)
    }

    /// A set with an explicit presence mask
    ///
    /// * `trials` - one feature vector per slot
    /// * `present` - whether each slot holds a real trial
    pub fn with_mask(trials: Vec<Vec<f32>>, present: Vec<bool>) -> Result<Self> {
        if trials.is_empty() {
            return Err(SetEmbedError::invalid("a trial set needs at least one slot"));
        }
        if present.len() != trials.len() {
            return Err(SetEmbedError::invalid(format!(
                "presence mask has {} entries for {} trials",
                present.len(),
                trials.len()
            )));
        }

        let feature_dim = trials[0].len();
        if feature_dim == 0 {
            return Err(SetEmbedError::invalid("trials must have at least one feature"));
        }

        let mut values = Vec::with_capacity(trials.len() * feature_dim);
        for (i, (trial, &is_present)) in trials.iter().zip(present.iter()).enumerate() {
            if trial.len() != feature_dim {
                return Err(SetEmbedError::shape(
                    "trial feature dim",
                    feature_dim,
                    trial.len(),
                ));
            }
            if is_present && trial.iter().any(|x| x.is_nan()) {
                return Err(SetEmbedError::invalid(format!(
                    "trial {} is marked present but holds NaN",
                    i
                )));
            }
            values.extend_from_slice(trial);
        }

        Ok(Self {
            feature_dim,
            values,
            present,
        })
    }

    /// Read a NaN-padded `slots x feature_dim` block
    ///
    /// A row of all NaN is an absent slot. A row with only some NaN
    /// entries is rejected: the sentinel would sit in a slot that
    /// otherwise looks present.
    pub fn from_nan_padded(rows: ArrayView2<f32>) -> Result<Self> {
        let (nslots, feature_dim) = rows.dim();
        if nslots == 0 || feature_dim == 0 {
            return Err(SetEmbedError::invalid(format!(
                "empty trial block {} x {}",
                nslots, feature_dim
            )));
        }

        let mut values = Vec::with_capacity(nslots * feature_dim);
        let mut present = Vec::with_capacity(nslots);

        for (i, row) in rows.axis_iter(Axis(0)).enumerate() {
            let n_nan = row.iter().filter(|x| x.is_nan()).count();
            if n_nan == feature_dim {
                values.extend(std::iter::repeat_n(0_f32, feature_dim));
                present.push(false);
            } else if n_nan > 0 {
                return Err(SetEmbedError::invalid(format!(
                    "trial {} is partially NaN ({} of {} features)",
                    i, n_nan, feature_dim
                )));
            } else {
                values.extend(row.iter().copied());
                present.push(true);
            }
        }

        Ok(Self {
            feature_dim,
            values,
            present,
        })
    }

    /// number of slots, present or not
    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn num_present(&self) -> usize {
        self.present.iter().filter(|&&p| p).count()
    }

    pub fn present(&self) -> &[bool] {
        &self.present
    }

    /// feature vector stored in slot `i` (filler if absent)
    pub fn trial(&self, i: usize) -> Option<&[f32]> {
        let lb = i * self.feature_dim;
        self.values.get(lb..lb + self.feature_dim)
    }

    pub fn present_trials(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.values
            .chunks(self.feature_dim)
            .zip(self.present.iter())
            .filter_map(|(row, &p)| if p { Some(row) } else { None })
    }

    /// Append absent slots until there are `max_trials` of them
    pub fn padded(&self, max_trials: usize) -> Result<Self> {
        if max_trials < self.len() {
            return Err(SetEmbedError::shape(
                "trial-set length under padding ceiling",
                max_trials,
                self.len(),
            ));
        }
        let extra = max_trials - self.len();
        let mut values = self.values.clone();
        values.extend(std::iter::repeat_n(0_f32, extra * self.feature_dim));
        let mut present = self.present.clone();
        present.extend(std::iter::repeat_n(false, extra));

        Ok(Self {
            feature_dim: self.feature_dim,
            values,
            present,
        })
    }

    /// Drop absent slots
    pub fn compacted(&self) -> Self {
        let values: Vec<f32> = self.present_trials().flatten().copied().collect();
        Self {
            feature_dim: self.feature_dim,
            values,
            present: vec![true; self.num_present()],
        }
    }

    /// Reorder slots so that slot `j` of the result is slot `order[j]`
    pub fn permuted(&self, order: &[usize]) -> Result<Self> {
        if order.len() != self.len() {
            return Err(SetEmbedError::invalid(format!(
                "order has {} entries for {} slots",
                order.len(),
                self.len()
            )));
        }
        let mut seen = vec![false; self.len()];
        for &i in order {
            if i >= self.len() || seen[i] {
                return Err(SetEmbedError::invalid(format!(
                    "{:?} is not a permutation of 0..{}",
                    order,
                    self.len()
                )));
            }
            seen[i] = true;
        }

        let d = self.feature_dim;
        let mut values = Vec::with_capacity(self.values.len());
        for &i in order {
            values.extend_from_slice(&self.values[i * d..(i + 1) * d]);
        }
        let present = order.iter().map(|&i| self.present[i]).collect();

        Ok(Self {
            feature_dim: d,
            values,
            present,
        })
    }
}

///
/// A batch of trial sets laid out as a fixed-shape tensor
///
/// * `values` - `batch x max_trials x feature_dim`, absent slots are 0
/// * `mask` - `batch x max_trials`, `u8` presence indicator
///
#[derive(Clone, Debug)]
pub struct TrialBatch {
    values: Tensor,
    mask: Tensor,
    counts: Vec<usize>,
}

impl TrialBatch {
    /// Pad `sets` to a shared ceiling and stack them
    ///
    /// * `sets` - trial sets sharing one feature dim
    /// * `max_trials` - ceiling; the longest set when `None`
    /// * `device` - target device
    pub fn from_sets(sets: &[TrialSet], max_trials: Option<usize>, device: &Device) -> Result<Self> {
        let first = sets
            .first()
            .ok_or_else(|| SetEmbedError::invalid("empty batch of trial sets"))?;
        let dd = first.feature_dim();

        if let Some(bad) = sets.iter().find(|s| s.feature_dim() != dd) {
            return Err(SetEmbedError::shape(
                "batch feature dim",
                dd,
                bad.feature_dim(),
            ));
        }

        let longest = sets.iter().map(|s| s.len()).max().unwrap_or(0);
        let mm = max_trials.unwrap_or(longest);
        if longest > mm {
            return Err(SetEmbedError::shape("trial-set length", mm, longest));
        }
        if mm == 0 {
            return Err(SetEmbedError::invalid("trial sets without any slot"));
        }

        let nn = sets.len();
        let mut values = vec![0_f32; nn * mm * dd];
        let mut mask = vec![0_u8; nn * mm];

        for (b, set) in sets.iter().enumerate() {
            for (j, &is_present) in set.present().iter().enumerate() {
                if !is_present {
                    continue;
                }
                let lb = (b * mm + j) * dd;
                values[lb..lb + dd].copy_from_slice(&set.values[j * dd..(j + 1) * dd]);
                mask[b * mm + j] = 1;
            }
        }

        let counts = sets.iter().map(|s| s.num_present()).collect();

        Ok(Self {
            values: Tensor::from_vec(values, (nn, mm, dd), device)?,
            mask: Tensor::from_vec(mask, (nn, mm), device)?,
            counts,
        })
    }

    /// A single set without a batch dimension becomes a batch of one
    pub fn from_set(set: &TrialSet, device: &Device) -> Result<Self> {
        Self::from_sets(std::slice::from_ref(set), None, device)
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    pub fn mask(&self) -> &Tensor {
        &self.mask
    }

    pub fn mask_f32(&self) -> Result<Tensor> {
        Ok(self.mask.to_dtype(DType::F32)?)
    }

    /// present trials per set
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn batch_size(&self) -> usize {
        self.counts.len()
    }

    pub fn max_trials(&self) -> usize {
        self.values.dims()[1]
    }

    pub fn feature_dim(&self) -> usize {
        self.values.dims()[2]
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            values: self.values.to_device(device)?,
            mask: self.mask.to_device(device)?,
            counts: self.counts.clone(),
        })
    }
}

///
/// Shape adaptation: dense inputs to trial sets. Rank-2 inputs are a
/// single NaN-padded set, rank-3 inputs a batch of them.
///
pub trait IntoTrialSets {
    fn to_trial_sets(&self) -> Result<Vec<TrialSet>>;
}

impl IntoTrialSets for TrialSet {
    fn to_trial_sets(&self) -> Result<Vec<TrialSet>> {
        Ok(vec![self.clone()])
    }
}

impl IntoTrialSets for [TrialSet] {
    fn to_trial_sets(&self) -> Result<Vec<TrialSet>> {
        Ok(self.to_vec())
    }
}

impl IntoTrialSets for Vec<TrialSet> {
    fn to_trial_sets(&self) -> Result<Vec<TrialSet>> {
        Ok(self.clone())
    }
}

impl IntoTrialSets for Array2<f32> {
    fn to_trial_sets(&self) -> Result<Vec<TrialSet>> {
        Ok(vec![TrialSet::from_nan_padded(self.view())?])
    }
}

impl IntoTrialSets for Array3<f32> {
    fn to_trial_sets(&self) -> Result<Vec<TrialSet>> {
        self.axis_iter(Axis(0))
            .into_par_iter()
            .map(TrialSet::from_nan_padded)
            .collect()
    }
}

impl IntoTrialSets for Tensor {
    fn to_trial_sets(&self) -> Result<Vec<TrialSet>> {
        let x = self.to_dtype(DType::F32)?;
        match *x.dims() {
            [mm, dd] => {
                let flat = x.flatten_all()?.to_vec1::<f32>()?;
                let arr = Array2::from_shape_vec((mm, dd), flat)
                    .map_err(|e| SetEmbedError::invalid(e.to_string()))?;
                arr.to_trial_sets()
            }
            [nn, mm, dd] => {
                let flat = x.flatten_all()?.to_vec1::<f32>()?;
                let arr = Array3::from_shape_vec((nn, mm, dd), flat)
                    .map_err(|e| SetEmbedError::invalid(e.to_string()))?;
                arr.to_trial_sets()
            }
            _ => Err(SetEmbedError::shape("trial tensor rank", 3, x.rank())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn nan_rows_become_absent() -> anyhow::Result<()> {
        let nan = f32::NAN;
        let x = array![[1., 2.], [nan, nan], [3., 4.]];
        let set = TrialSet::from_nan_padded(x.view())?;
        assert_eq!(set.len(), 3);
        assert_eq!(set.num_present(), 2);
        assert_eq!(set.present(), &[true, false, true]);
        let rows: Vec<&[f32]> = set.present_trials().collect();
        assert_eq!(rows, vec![&[1_f32, 2.][..], &[3_f32, 4.][..]]);
        Ok(())
    }

    #[test]
    fn partial_nan_row_is_rejected() {
        let x = array![[1., f32::NAN], [3., 4.]];
        let err = TrialSet::from_nan_padded(x.view()).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn nan_in_present_slot_is_rejected() {
        let err = TrialSet::with_mask(vec![vec![0., f32::NAN]], vec![true]).unwrap_err();
        assert!(err.is_invalid_input());

        // the same filler is fine when the slot is absent
        let set = TrialSet::with_mask(vec![vec![1., 1.], vec![f32::NAN; 2]], vec![true, false]);
        assert!(set.is_ok());
    }

    #[test]
    fn mask_length_mismatch() {
        let err = TrialSet::with_mask(vec![vec![0., 0.], vec![1., 1.]], vec![true]).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn ragged_trials() {
        let err = TrialSet::new(vec![vec![0., 0.], vec![1., 1., 1.]]).unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn pad_compact_permute() -> anyhow::Result<()> {
        let set = TrialSet::new(vec![vec![1., 0.], vec![2., 0.], vec![3., 0.]])?;
        let padded = set.padded(5)?;
        assert_eq!(padded.len(), 5);
        assert_eq!(padded.num_present(), 3);
        assert_eq!(padded.compacted(), set);
        let err = set.padded(2).unwrap_err();
        assert!(err.is_shape_mismatch());
        assert!(err.to_string().contains("expected 2, found 3"));

        let perm = padded.permuted(&[4, 2, 0, 3, 1])?;
        assert_eq!(perm.present(), &[false, true, true, false, true]);
        assert_eq!(perm.trial(1), Some(&[3_f32, 0.][..]));
        assert!(padded.permuted(&[0, 0, 1, 2, 3]).unwrap_err().is_invalid_input());
        assert!(padded.permuted(&[0, 1, 2]).unwrap_err().is_invalid_input());
        Ok(())
    }

    #[test]
    fn batch_layout() -> anyhow::Result<()> {
        let a = TrialSet::new(vec![vec![1., 2.]])?;
        let b = TrialSet::with_mask(vec![vec![3., 4.], vec![9., 9.]], vec![false, true])?;
        let batch = TrialBatch::from_sets(&[a, b], Some(3), &Device::Cpu)?;

        assert_eq!(batch.values().dims(), &[2, 3, 2]);
        assert_eq!(batch.counts(), &[1, 1]);
        assert_eq!(
            batch.mask().to_vec2::<u8>()?,
            vec![vec![1, 0, 0], vec![0, 1, 0]]
        );
        // absent filler never makes it into the tensor
        let v = batch.values().to_vec3::<f32>()?;
        assert_eq!(v[1][0], vec![0., 0.]);
        assert_eq!(v[1][1], vec![9., 9.]);
        Ok(())
    }

    #[test]
    fn batch_rejects_mixed_feature_dims() -> anyhow::Result<()> {
        let a = TrialSet::new(vec![vec![1., 2.]])?;
        let b = TrialSet::new(vec![vec![1., 2., 3.]])?;
        let err = TrialBatch::from_sets(&[a, b], None, &Device::Cpu).unwrap_err();
        assert!(err.is_shape_mismatch());
        Ok(())
    }

    #[test]
    fn batch_rejects_overlong_set() -> anyhow::Result<()> {
        let a = TrialSet::new(vec![vec![1.]; 4])?;
        let err = TrialBatch::from_sets(&[a], Some(3), &Device::Cpu).unwrap_err();
        assert!(err.is_shape_mismatch());
        Ok(())
    }

    #[test]
    fn tensor_rank_adaptation() -> anyhow::Result<()> {
        let nan = f32::NAN;
        let single = Tensor::from_vec(vec![1_f32, 2., nan, nan], (2, 2), &Device::Cpu)?;
        let sets = single.to_trial_sets()?;
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].num_present(), 1);

        let batch = Tensor::from_vec(vec![1_f32, 2., nan, nan, 3., 4., 5., 6.], (2, 2, 2), &Device::Cpu)?;
        let sets = batch.to_trial_sets()?;
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[1].num_present(), 2);

        let flat = Tensor::zeros(4, DType::F32, &Device::Cpu)?;
        assert!(flat.to_trial_sets().unwrap_err().is_shape_mismatch());
        Ok(())
    }
}
