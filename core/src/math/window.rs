use std::f32::consts::PI;

/// Symmetric Hamming window of `length` taps.
pub fn hamming(length: usize) -> Vec<f32> {
    match length {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (length - 1) as f32;
            (0..length)
                .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / denom).cos())
                .collect()
        }
    }
}
