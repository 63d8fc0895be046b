//! Merging t-digest for streaming quantile estimation.
//!
//! Points are buffered and periodically merged into a sorted centroid list
//! whose sizes are bounded by the k1 (arcsine) scale function, so the tails
//! keep small centroids and extreme quantiles stay accurate.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Centroid {
    mean: f64,
    weight: f64,
}

impl Centroid {
    fn absorb(&mut self, other: &Centroid) {
        self.weight += other.weight;
        self.mean += (other.mean - self.mean) * other.weight / self.weight;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TDigest {
    delta: u32,
    buffer_size: usize,
    centroids: Vec<Centroid>,
    buffer: Vec<f64>,
    merged_weight: f64,
    min: f64,
    max: f64,
}

impl TDigest {
    pub fn new(delta: u32, buffer_size: u32) -> Self {
        let delta = delta.max(10);
        let buffer_size = (buffer_size as usize).max(50);
        Self {
            delta,
            buffer_size,
            centroids: Vec::with_capacity(delta as usize),
            buffer: Vec::with_capacity(buffer_size),
            merged_weight: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Add one observation. NaN is ignored.
    pub fn add(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.buffer.push(value);
        if self.buffer.len() >= self.buffer_size {
            self.flush();
        }
    }

    pub fn count(&self) -> f64 {
        self.merged_weight + self.buffer.len() as f64
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0.0
    }

    /// Merge buffered points into the centroid list.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let incoming = self
            .buffer
            .drain(..)
            .map(|v| Centroid {
                mean: v,
                weight: 1.0,
            })
            .collect::<Vec<_>>();
        self.compress(incoming);
    }

    fn compress(&mut self, incoming: Vec<Centroid>) {
        let mut all = std::mem::take(&mut self.centroids);
        let incoming_weight = incoming.iter().map(|c| c.weight).sum::<f64>();
        all.extend(incoming);
        all.sort_by(|a, b| a.mean.total_cmp(&b.mean));

        let total = self.merged_weight + incoming_weight;
        let delta_norm = self.delta as f64 / (2.0 * PI);
        let k = |q: f64| delta_norm * (2.0 * q - 1.0).asin();
        let q_of = |k: f64| ((k / delta_norm).sin() + 1.0) / 2.0;

        let mut out: Vec<Centroid> = Vec::with_capacity(self.delta as usize);
        let mut weight_so_far = 0.0;
        let mut weight_limit = -1.0;
        for c in all {
            let weight = weight_so_far + c.weight;
            let absorbed = match out.last_mut() {
                Some(last) if weight <= weight_limit => {
                    last.absorb(&c);
                    true
                }
                _ => false,
            };
            if !absorbed {
                let quantile = weight_so_far / total;
                let next_limit = total * q_of((k(quantile) + 1.0).min(k(1.0)));
                // limits must grow until the last centroid
                weight_limit = if next_limit <= weight_limit {
                    total
                } else {
                    next_limit
                };
                out.push(c);
            }
            weight_so_far = weight;
        }
        self.centroids = out;
        self.merged_weight = total;
    }

    /// Estimate quantile `q` in `[0, 1]`; `None` when empty or `q` is out of range.
    pub fn quantile(&mut self, q: f64) -> Option<f64> {
        self.flush();
        if !(0.0..=1.0).contains(&q) || self.centroids.is_empty() {
            return None;
        }
        let td = &self.centroids;
        let total = self.merged_weight;
        let index = q * total;
        if index <= 1.0 {
            return Some(self.min);
        }
        if index >= total - 1.0 {
            return Some(self.max);
        }

        let mut ci = 0;
        let mut weight_sum = 0.0;
        while ci < td.len() {
            weight_sum += td[ci].weight;
            if index <= weight_sum {
                break;
            }
            ci += 1;
        }
        let ci = ci.min(td.len() - 1);

        let mut diff = index + td[ci].weight / 2.0 - weight_sum;
        if td[ci].weight == 1.0 && diff.abs() < 0.5 {
            return Some(td[ci].mean);
        }

        let (left, right) = if diff > 0.0 {
            if ci == td.len() - 1 {
                let c = &td[ci];
                return Some(lerp(c.mean, self.max, diff / (c.weight / 2.0)));
            }
            (ci, ci + 1)
        } else {
            if ci == 0 {
                let c = &td[0];
                return Some(lerp(self.min, c.mean, diff / (c.weight / 2.0) + 1.0));
            }
            diff += td[ci - 1].weight / 2.0 + td[ci].weight / 2.0;
            (ci - 1, ci)
        };
        diff /= td[left].weight / 2.0 + td[right].weight / 2.0;
        Some(lerp(td[left].mean, td[right].mean, diff))
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + t * (b - a)
}
