//! Feed-forward value network: tanh hidden layers, linear output, Adam.
//!
//! Gradients are accumulated by `backward_from_output_grad` and applied by
//! `step_adam`; callers own the loss.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::db::StorageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f32>, // outputs x inputs, row-major
    pub biases: Vec<f32>,
}

impl Layer {
    /// Glorot-uniform weights, zero biases.
    fn new<R: Rng + ?Sized>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (inputs + outputs) as f32).sqrt();
        let weights = (0..inputs * outputs).map(|_| rng.gen_range(-limit..limit)).collect();
        Self { inputs, outputs, weights, biases: vec![0.0; outputs] }
    }

    fn affine(&self, x: &[f32]) -> Vec<f32> {
        (0..self.outputs)
            .map(|j| {
                let row = &self.weights[j * self.inputs..(j + 1) * self.inputs];
                self.biases[j] + row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>()
            })
            .collect()
    }

    fn is_consistent(&self) -> bool {
        self.inputs > 0
            && self.outputs > 0
            && self.weights.len() == self.inputs * self.outputs
            && self.biases.len() == self.outputs
    }
}

/// Per-layer buffers shaped like the parameters (grads, Adam moments).
#[derive(Debug, Clone, Default)]
struct Buffers {
    w: Vec<f32>,
    b: Vec<f32>,
}

impl Buffers {
    fn zeros_like(l: &Layer) -> Self {
        Self { w: vec![0.0; l.weights.len()], b: vec![0.0; l.biases.len()] }
    }
}

/// Serialized parameter blob.
#[derive(Serialize, Deserialize)]
struct NetParams {
    layers: Vec<Layer>,
}

#[derive(Debug, Clone)]
pub struct Net {
    layers: Vec<Layer>,
    grads: Vec<Buffers>,
    m: Vec<Buffers>, // Adam first moment
    v: Vec<Buffers>, // Adam second moment
    t: i32,          // Adam step count
}

impl Net {
    /// `sizes` = [input, hidden.., output].
    pub fn new<R: Rng + ?Sized>(sizes: &[usize], rng: &mut R) -> Self {
        let layers = sizes.windows(2).map(|w| Layer::new(w[0], w[1], rng)).collect();
        Self::from_layers(layers)
    }

    fn from_layers(layers: Vec<Layer>) -> Self {
        let zeros: Vec<Buffers> = layers.iter().map(Buffers::zeros_like).collect();
        Self { layers, grads: zeros.clone(), m: zeros.clone(), v: zeros, t: 0 }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// [input, hidden.., output]
    pub fn sizes(&self) -> Vec<usize> {
        let mut s: Vec<usize> = self.layers.iter().map(|l| l.inputs).collect();
        if let Some(last) = self.layers.last() {
            s.push(last.outputs);
        }
        s
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.inputs)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.outputs)
    }

    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        let mut acts = self.forward_cached(x);
        acts.pop().unwrap_or_default()
    }

    /// All activations, input first and output last.
    pub fn forward_cached(&self, x: &[f32]) -> Vec<Vec<f32>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(x.to_vec());
        let last = self.layers.len().saturating_sub(1);
        for (i, layer) in self.layers.iter().enumerate() {
            let mut z = layer.affine(&acts[i]);
            if i < last {
                z.iter_mut().for_each(|v| *v = v.tanh());
            }
            acts.push(z);
        }
        acts
    }

    pub fn zero_grad(&mut self) {
        for g in &mut self.grads {
            g.w.iter_mut().for_each(|x| *x = 0.0);
            g.b.iter_mut().for_each(|x| *x = 0.0);
        }
    }

    /// Accumulate parameter gradients for one sample given dL/d(output).
    pub fn backward_from_output_grad(&mut self, acts: &[Vec<f32>], d_out: &[f32]) {
        let mut delta = d_out.to_vec();
        for l in (0..self.layers.len()).rev() {
            let layer = &self.layers[l];
            let input = &acts[l];
            let grad = &mut self.grads[l];
            for j in 0..layer.outputs {
                let d = delta[j];
                if d == 0.0 {
                    continue;
                }
                grad.b[j] += d;
                let row = &mut grad.w[j * layer.inputs..(j + 1) * layer.inputs];
                for (g, &a) in row.iter_mut().zip(input) {
                    *g += d * a;
                }
            }
            if l == 0 {
                break;
            }
            // input of layer l is tanh output of layer l-1
            let mut prev = vec![0.0f32; layer.inputs];
            for (j, &d) in delta.iter().enumerate() {
                if d == 0.0 {
                    continue;
                }
                let row = &layer.weights[j * layer.inputs..(j + 1) * layer.inputs];
                for (p, &w) in prev.iter_mut().zip(row) {
                    *p += w * d;
                }
            }
            for (p, &a) in prev.iter_mut().zip(input) {
                *p *= 1.0 - a * a;
            }
            delta = prev;
        }
    }

    pub fn grad_l2_sum_all(&self) -> f32 {
        self.grads.iter().flat_map(|g| g.w.iter().chain(&g.b)).map(|x| x * x).sum()
    }

    pub fn non_finite_any(&self) -> bool {
        self.layers
            .iter()
            .flat_map(|l| l.weights.iter().chain(&l.biases))
            .any(|x| !x.is_finite())
    }

    /// Scale factor that brings the global grad norm under `max_norm`.
    pub fn clip_grad_norm(&self, max_norm: f32) -> f32 {
        let norm = self.grad_l2_sum_all().sqrt();
        if norm > max_norm && norm > 0.0 { max_norm / norm } else { 1.0 }
    }

    pub fn step_adam(&mut self, lr: f32, beta1: f32, beta2: f32, eps: f32, scale: f32) {
        self.t += 1;
        let bc1 = 1.0 - beta1.powi(self.t);
        let bc2 = 1.0 - beta2.powi(self.t);

        for (l, layer) in self.layers.iter_mut().enumerate() {
            let g = &self.grads[l];
            let m = &mut self.m[l];
            let v = &mut self.v[l];
            adam_update(&mut layer.weights, &g.w, &mut m.w, &mut v.w, lr, beta1, beta2, eps, scale, bc1, bc2);
            adam_update(&mut layer.biases, &g.b, &mut m.b, &mut v.b, lr, beta1, beta2, eps, scale, bc1, bc2);
        }
    }

    /// Hard copy of parameters. Optimizer state is left alone.
    pub fn copy_from(&mut self, other: &Net) {
        if self.sizes() == other.sizes() {
            for (dst, src) in self.layers.iter_mut().zip(&other.layers) {
                dst.weights.copy_from_slice(&src.weights);
                dst.biases.copy_from_slice(&src.biases);
            }
        } else {
            *self = Self::from_layers(other.layers.clone());
        }
    }

    pub fn to_json(&self) -> Result<String, StorageError> {
        let params = NetParams { layers: self.layers.clone() };
        Ok(serde_json::to_string(&params)?)
    }

    /// Parse a parameter blob; the layer shapes must match `expected_sizes`.
    pub fn from_json(json: &str, expected_sizes: &[usize]) -> Result<Self, StorageError> {
        let params: NetParams = serde_json::from_str(json)?;
        if !params.layers.iter().all(Layer::is_consistent) {
            return Err(StorageError::Corrupt("layer dimensions do not match parameter counts".into()));
        }
        let net = Self::from_layers(params.layers);
        if net.sizes() != expected_sizes {
            return Err(StorageError::Corrupt(format!(
                "architecture {:?} does not match expected {:?}",
                net.sizes(),
                expected_sizes
            )));
        }
        Ok(net)
    }

    #[cfg(test)]
    pub(crate) fn output_layer_mut(&mut self) -> Option<&mut Layer> {
        self.layers.last_mut()
    }
}

#[allow(clippy::too_many_arguments)]
fn adam_update(
    p: &mut [f32],
    g: &[f32],
    m: &mut [f32],
    v: &mut [f32],
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    scale: f32,
    bc1: f32,
    bc2: f32,
) {
    for i in 0..p.len() {
        let gi = g[i] * scale;
        m[i] = beta1 * m[i] + (1.0 - beta1) * gi;
        v[i] = beta2 * v[i] + (1.0 - beta2) * gi * gi;
        let m_hat = m[i] / bc1;
        let v_hat = v[i] / bc2;
        p[i] -= lr * m_hat / (v_hat.sqrt() + eps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn net(sizes: &[usize]) -> Net {
        Net::new(sizes, &mut StdRng::seed_from_u64(7))
    }

    fn half_sq_loss(n: &Net, x: &[f32], y: &[f32]) -> f32 {
        n.forward(x).iter().zip(y).map(|(o, t)| 0.5 * (o - t) * (o - t)).sum()
    }

    #[test]
    fn shapes_follow_sizes() {
        let n = net(&[145, 128, 128, 100]);
        assert_eq!(n.sizes(), vec![145, 128, 128, 100]);
        assert_eq!(n.forward(&[0.1; 145]).len(), 100);
        let acts = n.forward_cached(&[0.5; 145]);
        assert_eq!(acts.len(), 4);
        assert!(acts[1].iter().all(|a| (-1.0..=1.0).contains(a)));
    }

    #[test]
    fn forward_is_deterministic() {
        let n = net(&[4, 8, 3]);
        assert_eq!(n.forward(&[1.0, 2.0, 3.0, 4.0]), n.forward(&[1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut n = net(&[3, 5, 2]);
        let x = [0.3, -0.7, 0.5];
        let y = [1.0, -1.0];

        let acts = n.forward_cached(&x);
        let out = acts.last().unwrap().clone();
        let d_out: Vec<f32> = out.iter().zip(&y).map(|(o, t)| o - t).collect();
        n.zero_grad();
        n.backward_from_output_grad(&acts, &d_out);

        let h = 1e-3;
        for (l, idx) in [(0usize, 4usize), (1, 3)] {
            let analytic = n.grads[l].w[idx];
            let mut plus = n.clone();
            plus.layers[l].weights[idx] += h;
            let mut minus = n.clone();
            minus.layers[l].weights[idx] -= h;
            let numeric = (half_sq_loss(&plus, &x, &y) - half_sq_loss(&minus, &x, &y)) / (2.0 * h);
            assert!((analytic - numeric).abs() < 1e-2, "layer {l}: {analytic} vs {numeric}");
        }
    }

    #[test]
    fn adam_steps_reduce_loss() {
        let mut n = net(&[2, 8, 1]);
        let x = [0.5, -0.5];
        let y = [3.0];
        let before = half_sq_loss(&n, &x, &y);
        for _ in 0..200 {
            let acts = n.forward_cached(&x);
            let d: Vec<f32> = acts.last().unwrap().iter().zip(&y).map(|(o, t)| o - t).collect();
            n.zero_grad();
            n.backward_from_output_grad(&acts, &d);
            n.step_adam(0.01, 0.9, 0.999, 1e-8, 1.0);
        }
        assert!(half_sq_loss(&n, &x, &y) < before * 0.1);
    }

    #[test]
    fn json_round_trip_is_exact() {
        let n = net(&[6, 4, 3]);
        let back = Net::from_json(&n.to_json().unwrap(), &[6, 4, 3]).unwrap();
        assert_eq!(back.layers(), n.layers());
    }

    #[test]
    fn wrong_architecture_is_rejected() {
        let n = net(&[6, 4, 3]);
        let json = n.to_json().unwrap();
        assert!(matches!(Net::from_json(&json, &[6, 5, 3]), Err(StorageError::Corrupt(_))));
        assert!(matches!(Net::from_json("{not json", &[6, 4, 3]), Err(StorageError::Serde(_))));
    }

    #[test]
    fn copy_from_replaces_parameters() {
        let a = net(&[3, 4, 2]);
        let mut b = Net::new(&[3, 4, 2], &mut StdRng::seed_from_u64(99));
        assert_ne!(a.layers(), b.layers());
        b.copy_from(&a);
        assert_eq!(a.layers(), b.layers());
    }
}
