use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder};

/// build a stack of alternating `M` and `A` layers; an empty stack
/// is the identity map
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Activation>>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = module.forward(&x)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn push(&mut self, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(None);
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Fully connected stack `in_dim -> layers[0] -> ... -> out_dim`
///
/// Hidden layers get ReLU; the last linear map is left linear so the
/// output can take either sign. Variables are named
/// `{prefix}.fc.{j}.weight` and `{prefix}.out.weight` under `vs`.
///
/// * `in_dim` - input dim
/// * `layers` - hidden widths (may be empty: a single linear map)
/// * `out_dim` - output dim
/// * `vs` - variable builder
pub fn fc_stack(
    in_dim: usize,
    layers: &[usize],
    out_dim: usize,
    vs: VarBuilder,
) -> Result<StackLayers<Linear>> {
    let (mut fc, prev_dim) = hidden_stack(in_dim, layers, vs.clone())?;
    fc.push(candle_nn::linear(prev_dim, out_dim, vs.pp("out"))?);
    Ok(fc)
}

/// Hidden ReLU stack without a final projection; returns the stack
/// and the width of its last layer (`in_dim` when `layers` is empty)
pub fn hidden_stack(
    in_dim: usize,
    layers: &[usize],
    vs: VarBuilder,
) -> Result<(StackLayers<Linear>, usize)> {
    let mut fc = StackLayers::<Linear>::new();
    let mut prev_dim = in_dim;
    for (j, &next_dim) in layers.iter().enumerate() {
        let _name = format!("fc.{}", j);
        fc.push_with_act(
            candle_nn::linear(prev_dim, next_dim, vs.pp(_name))?,
            Activation::Relu,
        );
        prev_dim = next_dim;
    }
    Ok((fc, prev_dim))
}
