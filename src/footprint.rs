use serde::{Deserialize, Serialize};

const CHARS_PER_TOKEN: i64 = 4;

pub const DEFAULT_WATER_L_PER_KWH: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelSize {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnergyMix {
    Renewables,
    GlobalAvg,
    #[default]
    #[serde(rename = "USAvg")]
    UsAvg,
    Coal,
}

impl ModelSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Small => "Small",
            ModelSize::Medium => "Medium",
            ModelSize::Large => "Large",
        }
    }

    // unknown stored labels degrade to the default variant
    pub fn parse_lossy(s: &str) -> ModelSize {
        match s {
            "Small" => ModelSize::Small,
            "Medium" => ModelSize::Medium,
            "Large" => ModelSize::Large,
            _ => ModelSize::Medium,
        }
    }
}

impl EnergyMix {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnergyMix::Renewables => "Renewables",
            EnergyMix::GlobalAvg => "GlobalAvg",
            EnergyMix::UsAvg => "USAvg",
            EnergyMix::Coal => "Coal",
        }
    }

    pub fn parse_lossy(s: &str) -> EnergyMix {
        match s {
            "Renewables" => EnergyMix::Renewables,
            "GlobalAvg" => EnergyMix::GlobalAvg,
            "USAvg" => EnergyMix::UsAvg,
            "Coal" => EnergyMix::Coal,
            _ => EnergyMix::UsAvg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub model_size: ModelSize,
    pub energy_mix: EnergyMix,
    pub water_factor: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_size: ModelSize::default(),
            energy_mix: EnergyMix::default(),
            water_factor: DEFAULT_WATER_L_PER_KWH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub energy_wh: f64,
    pub carbon_gco2: f64,
    pub water_l: f64,
}

// Wh consumed per 1000 tokens, by model size class.
fn energy_wh_per_kilotoken(size: ModelSize) -> f64 {
    match size {
        ModelSize::Small => 0.005,
        ModelSize::Medium => 0.025,
        ModelSize::Large => 0.09,
    }
}

// gCO2e emitted per kWh, by grid mix.
fn carbon_intensity_g_per_kwh(mix: EnergyMix) -> f64 {
    match mix {
        EnergyMix::Renewables => 20.0,
        EnergyMix::GlobalAvg => 450.0,
        EnergyMix::UsAvg => 400.0,
        EnergyMix::Coal => 820.0,
    }
}

// one token per four characters, at least one for non-empty input
pub fn estimate_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count() as i64;
    (chars / CHARS_PER_TOKEN).max(1)
}

pub fn calculate(total_tokens: i64, settings: &Settings) -> Footprint {
    let kilotokens = total_tokens as f64 / 1000.0;
    let energy_wh = kilotokens * energy_wh_per_kilotoken(settings.model_size);
    let energy_kwh = energy_wh / 1000.0;
    let carbon_gco2 = energy_kwh * carbon_intensity_g_per_kwh(settings.energy_mix);
    let water_l = energy_kwh * settings.water_factor;
    Footprint { energy_wh, carbon_gco2, water_l }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(model_size: ModelSize, energy_mix: EnergyMix, water_factor: f64) -> Settings {
        Settings { model_size, energy_mix, water_factor }
    }

    #[test]
    fn estimate_empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_divides_by_four_with_floor_of_one() {
        assert_eq!(estimate_tokens(&"a".repeat(100)), 25);
        assert_eq!(estimate_tokens("Hello world"), 2);
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens("a"), 1);
    }

    #[test]
    fn zero_tokens_zero_footprint() {
        let zero = Footprint { energy_wh: 0.0, carbon_gco2: 0.0, water_l: 0.0 };
        assert_eq!(calculate(0, &Settings::default()), zero);
        assert_eq!(calculate(0, &settings(ModelSize::Large, EnergyMix::Coal, 9.0)), zero);
    }

    #[test]
    fn thousand_tokens_medium_on_us_grid() {
        let f = calculate(1000, &settings(ModelSize::Medium, EnergyMix::UsAvg, 1.1));
        assert!((f.energy_wh - 0.025).abs() < 1e-5);
        assert!((f.carbon_gco2 - 0.01).abs() < 1e-5);
        assert!((f.water_l - 0.0000275).abs() < 1e-7);
    }

    #[test]
    fn energy_is_monotonic_in_model_size() {
        for t in [1, 37, 1000, 250_000] {
            let small = calculate(t, &settings(ModelSize::Small, EnergyMix::UsAvg, 1.1));
            let medium = calculate(t, &settings(ModelSize::Medium, EnergyMix::UsAvg, 1.1));
            let large = calculate(t, &settings(ModelSize::Large, EnergyMix::UsAvg, 1.1));
            assert!(small.energy_wh < medium.energy_wh);
            assert!(medium.energy_wh < large.energy_wh);
        }
    }

    #[test]
    fn footprint_is_linear_in_token_count() {
        let s = settings(ModelSize::Large, EnergyMix::GlobalAvg, 1.8);
        for t in [1, 500, 12_345] {
            let once = calculate(t, &s);
            let twice = calculate(2 * t, &s);
            assert!((twice.energy_wh - 2.0 * once.energy_wh).abs() < 1e-9);
            assert!((twice.carbon_gco2 - 2.0 * once.carbon_gco2).abs() < 1e-9);
            assert!((twice.water_l - 2.0 * once.water_l).abs() < 1e-9);
        }
    }

    #[test]
    fn unknown_stored_labels_fall_back_to_defaults() {
        assert_eq!(ModelSize::parse_lossy("Gigantic"), ModelSize::Medium);
        assert_eq!(EnergyMix::parse_lossy(""), EnergyMix::UsAvg);

        let s = settings(
            ModelSize::parse_lossy("???"),
            EnergyMix::parse_lossy("???"),
            1.1,
        );
        let f = calculate(1000, &s);
        assert!((f.energy_wh - 0.025).abs() < 1e-9);
        assert!((f.carbon_gco2 - 0.01).abs() < 1e-9);
    }

    #[test]
    fn labels_roundtrip_through_as_str() {
        for size in [ModelSize::Small, ModelSize::Medium, ModelSize::Large] {
            assert_eq!(ModelSize::parse_lossy(size.as_str()), size);
        }
        for mix in [
            EnergyMix::Renewables,
            EnergyMix::GlobalAvg,
            EnergyMix::UsAvg,
            EnergyMix::Coal,
        ] {
            assert_eq!(EnergyMix::parse_lossy(mix.as_str()), mix);
        }
    }
}
