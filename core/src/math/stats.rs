/// Power floor used when a bin carries no energy at all.
pub const POWER_FLOOR_DBFS: f32 = -200.0;

pub struct StatsHelper;

impl StatsHelper {
    /// Linear power (1.0 = full scale) to dBFS, clamped at [`POWER_FLOOR_DBFS`].
    pub fn to_dbfs(power: f32) -> f32 {
        if power > 0.0 {
            (10.0 * power.log10()).max(POWER_FLOOR_DBFS)
        } else {
            POWER_FLOOR_DBFS
        }
    }

    /// Index of the largest value; the lowest index wins a tie.
    pub fn argmax(values: &[f32]) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, &value) in values.iter().enumerate() {
            match best {
                Some((_, current)) if value <= current => {}
                _ => best = Some((idx, value)),
            }
        }
        best.map(|(idx, _)| idx)
    }
}
