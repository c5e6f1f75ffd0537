use crate::collectors::CollectError;
use crate::config::BatteryConfig;
use crate::snapshot::BatteryStat;
use ::battery::units::ratio::percent;
use ::battery::units::time::second;
use ::battery::{Manager, State};
use tracing::debug;

/// Reads the first battery the OS reports. `Ok(None)` when there is none.
pub fn read_battery() -> Result<Option<BatteryStat>, CollectError> {
    let manager = Manager::new().map_err(|err| CollectError::failed("battery", err.to_string()))?;
    let mut batteries = manager
        .batteries()
        .map_err(|err| CollectError::failed("battery", err.to_string()))?;

    let Some(first) = batteries.next() else {
        return Ok(None);
    };
    let battery = first.map_err(|err| CollectError::failed("battery", err.to_string()))?;
    let extra = batteries.count();
    if extra > 0 {
        debug!(extra, "multiple batteries present, reporting the first");
    }

    let state = battery.state();
    let seconds = |t: Option<::battery::units::Time>| {
        t.map(|t| t.get::<second>())
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(|s| s.round() as u64)
    };

    Ok(Some(BatteryStat {
        percent: battery.state_of_charge().get::<percent>() as f64,
        power_plugged: plugged(state),
        state: state_name(state).to_string(),
        estimated_time_remaining: match state {
            State::Discharging => seconds(battery.time_to_empty()),
            _ => None,
        },
        time_to_full: match state {
            State::Charging => seconds(battery.time_to_full()),
            _ => None,
        },
        health_percent: Some(battery.state_of_health().get::<percent>() as f64),
        cycle_count: battery.cycle_count(),
        low_battery: false,
    }))
}

fn plugged(state: State) -> bool {
    matches!(state, State::Charging | State::Full)
}

fn state_name(state: State) -> &'static str {
    match state {
        State::Charging => "charging",
        State::Discharging => "discharging",
        State::Full => "full",
        State::Empty => "empty",
        _ => "unknown",
    }
}

/// Seconds to full charge from the configured charger wattage and capacity.
pub fn estimate_charge_seconds(current_percent: f64, cfg: &BatteryConfig) -> Option<u64> {
    if cfg.battery_capacity_mwh <= 0.0 || cfg.charger_wattage <= 0.0 {
        return None;
    }
    let remaining = (100.0 - current_percent).max(0.0);
    let rate_per_hour = cfg.charger_wattage * 1000.0 / cfg.battery_capacity_mwh;
    let hours = remaining / rate_per_hour;
    hours
        .is_finite()
        .then(|| (hours * 3600.0).round() as u64)
}
