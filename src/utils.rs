/// Index of the largest value; ties keep the first one seen.
pub fn argmax(v: &[f32]) -> usize {
    let mut best_i = 0;
    let mut best_v = f32::NEG_INFINITY;
    for (i, &x) in v.iter().enumerate() {
        if x > best_v {
            best_v = x;
            best_i = i;
        }
    }
    best_i
}

/// Argmax restricted to `candidates` (codes into `v`). Out-of-range codes are skipped.
pub fn argmax_over(v: &[f32], candidates: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for &c in candidates {
        let Some(&x) = v.get(c) else { continue };
        match best {
            Some((_, bv)) if x <= bv => {}
            _ => best = Some((c, x)),
        }
    }
    best.map(|(c, _)| c)
}

pub fn has_non_finite(xs: &[f32]) -> bool {
    xs.iter().any(|&v| !v.is_finite())
}

/// min / max / mean of a slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

pub fn vec_stats(xs: &[f32]) -> Stats {
    if xs.is_empty() {
        return Stats { min: 0.0, max: 0.0, mean: 0.0 };
    }
    let mut mn = xs[0];
    let mut mx = xs[0];
    let mut sum = 0.0f32;
    for &v in xs {
        mn = mn.min(v);
        mx = mx.max(v);
        sum += v;
    }
    Stats { min: mn, max: mx, mean: sum / xs.len() as f32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_keeps_first_of_ties() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(argmax(&[-5.0]), 0);
    }

    #[test]
    fn argmax_over_ignores_codes_outside_candidates() {
        let q = [9.0, 1.0, 4.0, 4.0];
        assert_eq!(argmax_over(&q, &[1, 2, 3]), Some(2));
        assert_eq!(argmax_over(&q, &[7]), None);
        assert_eq!(argmax_over(&q, &[]), None);
    }

    #[test]
    fn stats_of_empty_slice_are_zero() {
        let s = vec_stats(&[]);
        assert_eq!(s, Stats { min: 0.0, max: 0.0, mean: 0.0 });
        let s = vec_stats(&[1.0, -1.0, 3.0]);
        assert_eq!(s.min, -1.0);
        assert_eq!(s.max, 3.0);
        assert!((s.mean - 1.0).abs() < 1e-6);
    }
}
