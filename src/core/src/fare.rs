use serde::{Deserialize, Serialize};

/// Tariff used for upfront fare estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareSchedule {
    pub base: f64,
    pub per_km: f64,
    pub per_minute: f64,
    /// Floor applied after the distance and time components.
    pub minimum: f64,
    pub currency: String,
}

impl Default for FareSchedule {
    fn default() -> Self {
        Self {
            base: 2.5,
            per_km: 1.2,
            per_minute: 0.25,
            minimum: 6.0,
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareEstimate {
    pub distance_km: f64,
    pub duration_min: f64,
    pub amount: f64,
    pub currency: String,
}

impl FareSchedule {
    /// Price a trip, rounded to cents and never below `minimum`.
    ///
    /// Negative or non-finite inputs count as zero.
    pub fn estimate(&self, distance_km: f64, duration_min: f64) -> FareEstimate {
        let distance_km = sanitize(distance_km);
        let duration_min = sanitize(duration_min);
        let raw = self.base + self.per_km * distance_km + self.per_minute * duration_min;
        let amount = round_cents(raw.max(self.minimum));
        FareEstimate {
            distance_km,
            duration_min,
            amount,
            currency: self.currency.clone(),
        }
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
