//! Declarative validator/executor table for Fleet vehicle commands
//!
//! Each command the `POST /api/1/vehicles/{vin}/command/{name}` surface
//! accepts maps to a [`FleetCommand`]: an optional synchronous validator, an
//! optional executor that resolves the body into a [`VehicleAction`], and an
//! optional `check_error` hook remapping "already in the target state"
//! rejections to success.
//!
//! Validation runs on the HTTP task before the command is enqueued; the
//! orchestrator trusts the body shape and only re-extracts values.

use std::time::Duration;

use tracing::warn;

use crate::args::CommandArgs;
use crate::error::{BridgeError, Result};
use crate::vehicle::{ClimateKeeperMode, Level, SeatPosition, VehicleAction};

/// One entry of the Fleet command table
pub struct FleetCommand {
    /// Synchronous body validator; `None` means any body is accepted
    pub validate: Option<fn(CommandArgs) -> Result<()>>,
    /// Resolves the validated body into a vehicle verb; `None` marks a
    /// command that never executes (not implemented / not supported via BLE)
    pub build: Option<fn(CommandArgs) -> Result<VehicleAction>>,
    /// Returns `true` when a vehicle rejection should count as success
    pub check_error: Option<fn(&BridgeError) -> bool>,
}

impl FleetCommand {
    const fn action_only() -> Self {
        Self {
            validate: None,
            build: None,
            check_error: None,
        }
    }
}

fn not_implemented(_: CommandArgs) -> Result<()> {
    Err(BridgeError::Validation("not implemented".to_string()))
}

fn not_supported_via_ble(_: CommandArgs) -> Result<()> {
    Err(BridgeError::Validation("not supported via BLE".to_string()))
}

const NOT_IMPLEMENTED: FleetCommand = FleetCommand {
    validate: Some(not_implemented),
    build: None,
    check_error: None,
};

const NOT_SUPPORTED_VIA_BLE: FleetCommand = FleetCommand {
    validate: Some(not_supported_via_ble),
    build: None,
    check_error: None,
};

fn require_pin(args: CommandArgs, key: &str) -> Result<String> {
    let pin = args.require_str(key)?;
    if pin.len() != 4 {
        return Err(BridgeError::Validation(format!(
            "invalid '{key}' length: {}",
            pin.len()
        )));
    }
    Ok(pin.to_string())
}

/// Look up the table entry for a Fleet command name
pub fn spec(name: &str) -> Option<FleetCommand> {
    let spec = match name {
        "actuate_trunk" => FleetCommand {
            validate: Some(|args| {
                let which_trunk = args.require_str("which_trunk")?;
                if which_trunk != "front" && which_trunk != "rear" {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'which_trunk' value: {which_trunk}"
                    )));
                }
                Ok(())
            }),
            build: Some(|args| match args.require_str("which_trunk")? {
                "front" => Ok(VehicleAction::OpenFrunk),
                "rear" => Ok(VehicleAction::ActuateTrunk),
                other => Err(BridgeError::Validation(format!(
                    "invalid 'which_trunk' value: {other}"
                ))),
            }),
            check_error: None,
        },
        "add_charge_schedule" => NOT_IMPLEMENTED,
        "add_precondition_schedule" => NOT_IMPLEMENTED,
        "adjust_volume" => FleetCommand {
            validate: Some(|args| {
                let volume = args.require_f64("volume")?;
                if !(0.0..=11.0).contains(&volume) {
                    return Err(BridgeError::Validation(
                        "invalid 'volume' (should be in [0, 11])".to_string(),
                    ));
                }
                Ok(())
            }),
            build: Some(|args| {
                let mut volume = args.require_f64("volume")? as f32;
                if volume > 10.0 {
                    warn!("volume greater than 10 can not be set via BLE, clamping to 10");
                    volume = 10.0;
                }
                Ok(VehicleAction::SetVolume(volume))
            }),
            check_error: None,
        },
        "auto_conditioning_start" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::ClimateOn)),
            ..FleetCommand::action_only()
        },
        "auto_conditioning_stop" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::ClimateOff)),
            ..FleetCommand::action_only()
        },
        "cancel_software_update" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::CancelSoftwareUpdate)),
            ..FleetCommand::action_only()
        },
        "charge_max_range" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::ChargeMaxRange)),
            ..FleetCommand::action_only()
        },
        "charge_port_door_close" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::ChargePortClose)),
            ..FleetCommand::action_only()
        },
        "charge_port_door_open" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::ChargePortOpen)),
            ..FleetCommand::action_only()
        },
        "charge_standard" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::ChargeStandardRange)),
            ..FleetCommand::action_only()
        },
        "charge_start" => FleetCommand {
            validate: None,
            build: Some(|_| Ok(VehicleAction::ChargeStart)),
            // Already charging (or finished charging) counts as done.
            check_error: Some(|err| {
                let reason = err.to_string();
                reason.contains("is_charging") || reason.contains("complete")
            }),
        },
        "charge_stop" => FleetCommand {
            validate: None,
            build: Some(|_| Ok(VehicleAction::ChargeStop)),
            check_error: Some(|err| err.to_string().contains("not_charging")),
        },
        "clear_pin_to_drive_admin" => FleetCommand {
            build: Some(|_| {
                Ok(VehicleAction::SetPinToDrive {
                    enable: false,
                    pin: String::new(),
                })
            }),
            ..FleetCommand::action_only()
        },
        "door_lock" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::Lock)),
            ..FleetCommand::action_only()
        },
        "door_unlock" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::Unlock)),
            ..FleetCommand::action_only()
        },
        "erase_user_data" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::EraseGuestData)),
            ..FleetCommand::action_only()
        },
        "flash_lights" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::FlashLights)),
            ..FleetCommand::action_only()
        },
        "guest_mode" => FleetCommand {
            validate: Some(|args| args.require_bool("enable").map(|_| ())),
            build: Some(|args| Ok(VehicleAction::SetGuestMode(args.require_bool("enable")?))),
            check_error: None,
        },
        "honk_horn" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::HonkHorn)),
            ..FleetCommand::action_only()
        },
        "media_next_fav" => NOT_IMPLEMENTED,
        "media_next_track" => NOT_IMPLEMENTED,
        "media_prev_fav" => NOT_IMPLEMENTED,
        "media_prev_track" => NOT_IMPLEMENTED,
        "media_toggle_playback" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::ToggleMediaPlayback)),
            ..FleetCommand::action_only()
        },
        "media_volume_up" => NOT_IMPLEMENTED,
        "media_volume_down" => NOT_IMPLEMENTED,
        "navigation_gps_request" => NOT_IMPLEMENTED,
        "navigation_request" => NOT_IMPLEMENTED,
        "navigation_sc_request" => NOT_IMPLEMENTED,
        "navigation_waypoints_request" => NOT_IMPLEMENTED,
        "remote_auto_seat_climate_request" => FleetCommand {
            validate: Some(|args| {
                args.require_bool("auto_climate_on")?;
                let position = args.require_i64("auto_seat_position")?;
                if !(1..=2).contains(&position) {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'auto_seat_position' value: {position}"
                    )));
                }
                Ok(())
            }),
            build: Some(|args| {
                let on = args.require_bool("auto_climate_on")?;
                let seat = match args.require_i64("auto_seat_position")? {
                    1 => SeatPosition::FrontLeft,
                    2 => SeatPosition::FrontRight,
                    other => {
                        return Err(BridgeError::Validation(format!(
                            "invalid 'auto_seat_position' value: {other}"
                        )))
                    }
                };
                Ok(VehicleAction::AutoSeatAndClimate { seat, on })
            }),
            check_error: None,
        },
        "remote_auto_steering_wheel_heat_climate_request" => NOT_SUPPORTED_VIA_BLE,
        "remote_boombox" => NOT_SUPPORTED_VIA_BLE,
        "remote_seat_cooler_request" => FleetCommand {
            validate: Some(|args| {
                let level = args.require_i64("seat_cooler_level")?;
                if Level::from_index(level).is_none() {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'seat_cooler_level' value: {level}"
                    )));
                }
                let position = args.require_i64("seat_position")?;
                match SeatPosition::from_index(position) {
                    Some(SeatPosition::FrontLeft) | Some(SeatPosition::FrontRight) => Ok(()),
                    _ => Err(BridgeError::Validation(format!(
                        "invalid 'seat_position' value: {position}"
                    ))),
                }
            }),
            build: Some(|args| {
                let level = Level::from_index(args.require_i64("seat_cooler_level")?)
                    .ok_or_else(|| BridgeError::Validation("invalid 'seat_cooler_level'".into()))?;
                let seat = SeatPosition::from_index(args.require_i64("seat_position")?)
                    .ok_or_else(|| BridgeError::Validation("invalid 'seat_position'".into()))?;
                Ok(VehicleAction::SetSeatCooler { level, seat })
            }),
            check_error: None,
        },
        "remote_seat_heater_request" => FleetCommand {
            validate: Some(|args| {
                let heater = args.require_i64("heater")?;
                if SeatPosition::from_index(heater).is_none() {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'heater' value: {heater}"
                    )));
                }
                let level = args.require_i64("level")?;
                if Level::from_index(level).is_none() {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'level' value: {level}"
                    )));
                }
                Ok(())
            }),
            build: Some(|args| {
                let seat = SeatPosition::from_index(args.require_i64("heater")?)
                    .ok_or_else(|| BridgeError::Validation("invalid 'heater'".into()))?;
                let level = Level::from_index(args.require_i64("level")?)
                    .ok_or_else(|| BridgeError::Validation("invalid 'level'".into()))?;
                Ok(VehicleAction::SetSeatHeater { seat, level })
            }),
            check_error: None,
        },
        "remote_start_drive" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::RemoteDrive)),
            ..FleetCommand::action_only()
        },
        "remote_steering_wheel_heat_level_request" => NOT_SUPPORTED_VIA_BLE,
        "remote_steering_wheel_heater_request" => FleetCommand {
            validate: Some(|args| args.require_bool("on").map(|_| ())),
            build: Some(|args| {
                Ok(VehicleAction::SetSteeringWheelHeater(
                    args.require_bool("on")?,
                ))
            }),
            check_error: None,
        },
        "remove_charge_schedule" => NOT_IMPLEMENTED,
        "remove_precondition_schedule" => NOT_IMPLEMENTED,
        "reset_pin_to_drive_pin" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::ResetPin)),
            ..FleetCommand::action_only()
        },
        "reset_valet_pin" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::ResetValetPin)),
            ..FleetCommand::action_only()
        },
        "schedule_software_update" => FleetCommand {
            validate: Some(|args| {
                let sec = args.require_f64("offset_sec")?;
                if sec < 0.0 {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'offset_sec' value: {sec}"
                    )));
                }
                Ok(())
            }),
            build: Some(|args| {
                let sec = args.require_f64("offset_sec")?;
                Ok(VehicleAction::ScheduleSoftwareUpdate(Duration::from_secs(
                    sec as u64,
                )))
            }),
            check_error: None,
        },
        "set_bioweapon_mode" => FleetCommand {
            validate: Some(|args| {
                args.require_bool("manual_override")?;
                args.require_bool("on")?;
                Ok(())
            }),
            build: Some(|args| {
                Ok(VehicleAction::SetBioweaponDefenseMode {
                    on: args.require_bool("on")?,
                    manual_override: args.require_bool("manual_override")?,
                })
            }),
            check_error: None,
        },
        "set_cabin_overheat_protection" => FleetCommand {
            validate: Some(|args| {
                args.require_bool("fan_only")?;
                args.require_bool("on")?;
                Ok(())
            }),
            build: Some(|args| {
                Ok(VehicleAction::SetCabinOverheatProtection {
                    on: args.require_bool("on")?,
                    fan_only: args.require_bool("fan_only")?,
                })
            }),
            check_error: None,
        },
        "set_charge_limit" => FleetCommand {
            validate: Some(|args| {
                let percent = args.require_i64("percent")?;
                if !(50..=100).contains(&percent) {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'percent' value: {percent}"
                    )));
                }
                Ok(())
            }),
            build: Some(|args| {
                Ok(VehicleAction::ChangeChargeLimit(
                    args.require_i64("percent")? as i32,
                ))
            }),
            check_error: None,
        },
        "set_charging_amps" => FleetCommand {
            validate: Some(|args| {
                let charging_amps = args.require_i64("charging_amps")?;
                if !(0..=48).contains(&charging_amps) {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'charging_amps' value: {charging_amps}"
                    )));
                }
                Ok(())
            }),
            build: Some(|args| {
                Ok(VehicleAction::SetChargingAmps(
                    args.require_i64("charging_amps")? as i32,
                ))
            }),
            check_error: None,
        },
        "set_climate_keeper_mode" => FleetCommand {
            validate: Some(|args| {
                let mode = args.require_i64("climate_keeper_mode")?;
                if ClimateKeeperMode::from_index(mode).is_none() {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'climate_keeper_mode' value: {mode}"
                    )));
                }
                Ok(())
            }),
            build: Some(|args| {
                let mode = ClimateKeeperMode::from_index(args.require_i64("climate_keeper_mode")?)
                    .ok_or_else(|| {
                        BridgeError::Validation("invalid 'climate_keeper_mode'".into())
                    })?;
                Ok(VehicleAction::SetClimateKeeperMode(mode))
            }),
            check_error: None,
        },
        "set_cop_temp" => FleetCommand {
            validate: Some(|args| {
                // The wire level starts at 0 for "unspecified"; the Fleet
                // value is shifted by one so 0 means Low.
                let cop_temp = args.require_i64("cop_temp")? + 1;
                match Level::from_index(cop_temp) {
                    Some(level) if level >= Level::Low => Ok(()),
                    _ => Err(BridgeError::Validation(format!(
                        "invalid 'cop_temp' value: {cop_temp}"
                    ))),
                }
            }),
            build: Some(|args| {
                let level = Level::from_index(args.require_i64("cop_temp")? + 1)
                    .ok_or_else(|| BridgeError::Validation("invalid 'cop_temp'".into()))?;
                Ok(VehicleAction::SetCabinOverheatProtectionTemperature(level))
            }),
            check_error: None,
        },
        "set_pin_to_drive" => FleetCommand {
            validate: Some(|args| {
                args.require_bool("enable")?;
                require_pin(args, "password")?;
                Ok(())
            }),
            build: Some(|args| {
                Ok(VehicleAction::SetPinToDrive {
                    enable: args.require_bool("enable")?,
                    pin: require_pin(args, "password")?,
                })
            }),
            check_error: None,
        },
        "set_preconditioning_max" => FleetCommand {
            validate: Some(|args| {
                args.require_bool("on")?;
                args.require_bool("manual_override")?;
                Ok(())
            }),
            build: Some(|args| {
                Ok(VehicleAction::SetPreconditioningMax {
                    on: args.require_bool("on")?,
                    manual_override: args.require_bool("manual_override")?,
                })
            }),
            check_error: None,
        },
        "set_scheduled_charging" => FleetCommand {
            validate: Some(|args| {
                args.require_bool("enable")?;
                let time = args.require_f64("time")?;
                if !(0.0..=(24.0 * 60.0 - 1.0)).contains(&time) {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'time' value: {time}"
                    )));
                }
                Ok(())
            }),
            build: Some(|args| {
                Ok(VehicleAction::ScheduleCharging {
                    enable: args.require_bool("enable")?,
                    offset: Duration::from_secs(args.require_f64("time")? as u64 * 60),
                })
            }),
            check_error: None,
        },
        "set_scheduled_departure" => NOT_IMPLEMENTED,
        "set_sentry_mode" => FleetCommand {
            validate: Some(|args| args.require_bool("on").map(|_| ())),
            build: Some(|args| Ok(VehicleAction::SetSentryMode(args.require_bool("on")?))),
            check_error: None,
        },
        "set_temps" => FleetCommand {
            validate: Some(|args| {
                // Always Celsius, regardless of the car's region.
                args.require_f64("driver_temp")?;
                args.require_f64("passenger_temp")?;
                Ok(())
            }),
            build: Some(|args| {
                Ok(VehicleAction::ChangeClimateTemp {
                    driver: args.require_f64("driver_temp")? as f32,
                    passenger: args.require_f64("passenger_temp")? as f32,
                })
            }),
            check_error: None,
        },
        "set_valet_mode" => FleetCommand {
            validate: Some(|args| {
                args.require_bool("on")?;
                require_pin(args, "password")?;
                Ok(())
            }),
            build: Some(|args| {
                if args.require_bool("on")? {
                    Ok(VehicleAction::EnableValetMode {
                        pin: require_pin(args, "password")?,
                    })
                } else {
                    Ok(VehicleAction::DisableValetMode)
                }
            }),
            check_error: None,
        },
        "set_vehicle_name" => FleetCommand {
            validate: Some(|args| args.require_str("vehicle_name").map(|_| ())),
            build: Some(|args| {
                Ok(VehicleAction::SetVehicleName(
                    args.require_str("vehicle_name")?.to_string(),
                ))
            }),
            check_error: None,
        },
        "speed_limit_activate" => FleetCommand {
            validate: Some(|args| require_pin(args, "pin").map(|_| ())),
            build: Some(|args| {
                Ok(VehicleAction::ActivateSpeedLimit {
                    pin: require_pin(args, "pin")?,
                })
            }),
            check_error: None,
        },
        "speed_limit_clear_pin" => FleetCommand {
            validate: Some(|args| require_pin(args, "pin").map(|_| ())),
            build: Some(|args| {
                Ok(VehicleAction::ClearSpeedLimitPin {
                    pin: require_pin(args, "pin")?,
                })
            }),
            check_error: None,
        },
        "speed_limit_clear_pin_admin" => NOT_SUPPORTED_VIA_BLE,
        "speed_limit_deactivate" => FleetCommand {
            validate: Some(|args| require_pin(args, "pin").map(|_| ())),
            build: Some(|args| {
                Ok(VehicleAction::DeactivateSpeedLimit {
                    pin: require_pin(args, "pin")?,
                })
            }),
            check_error: None,
        },
        "speed_limit_set_limit" => FleetCommand {
            validate: Some(|args| {
                let limit_mph = args.require_f64("limit_mph")?;
                if !(50.0..=90.0).contains(&limit_mph) {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'limit_mph' value: {limit_mph}"
                    )));
                }
                Ok(())
            }),
            build: Some(|args| {
                Ok(VehicleAction::SpeedLimitSetLimitMph(
                    args.require_f64("limit_mph")?,
                ))
            }),
            check_error: None,
        },
        "sun_roof_control" => NOT_IMPLEMENTED,
        "trigger_homelink" => FleetCommand {
            validate: Some(|args| {
                let lat = args.opt_f64_checked("lat")?.unwrap_or(0.0);
                if !(-90.0..=90.0).contains(&lat) {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'lat' value: {lat}"
                    )));
                }
                let lon = args.opt_f64_checked("lon")?.unwrap_or(0.0);
                if !(-180.0..=180.0).contains(&lon) {
                    return Err(BridgeError::Validation(format!(
                        "invalid 'lon' value: {lon}"
                    )));
                }
                // The official API requires a token; over BLE it is unused.
                Ok(())
            }),
            build: Some(|args| {
                Ok(VehicleAction::TriggerHomelink {
                    lat: args.opt_f64("lat", 0.0) as f32,
                    lon: args.opt_f64("lon", 0.0) as f32,
                })
            }),
            check_error: None,
        },
        "upcoming_calendar_entries" => NOT_IMPLEMENTED,
        "wake_up" => FleetCommand {
            build: Some(|_| Ok(VehicleAction::Wakeup)),
            ..FleetCommand::action_only()
        },
        "window_control" => FleetCommand {
            validate: Some(|args| {
                // lat/lon are accepted for parity with the official API but
                // are not needed for either operation over BLE.
                let state = args.require_str("command")?;
                args.opt_f64_checked("lat")?;
                args.opt_f64_checked("lon")?;
                match state {
                    "vent" | "close" => Ok(()),
                    other => Err(BridgeError::Validation(format!(
                        "invalid 'command' value: {other}"
                    ))),
                }
            }),
            build: Some(|args| match args.require_str("command")? {
                "vent" => Ok(VehicleAction::VentWindows),
                "close" => Ok(VehicleAction::CloseWindows),
                other => Err(BridgeError::Validation(format!(
                    "invalid 'command' value: {other}"
                ))),
            }),
            check_error: None,
        },
        _ => return None,
    };
    Some(spec)
}

/// Validate a command body synchronously. Unknown names are rejected.
pub fn validate(name: &str, body: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
    let spec = spec(name).ok_or_else(|| BridgeError::UnsupportedCommand(name.to_string()))?;
    match spec.validate {
        Some(validate) => validate(CommandArgs(body)),
        None => Ok(()),
    }
}

/// Resolve a validated body into the vehicle verb to dispatch
pub fn build_action(
    name: &str,
    body: &serde_json::Map<String, serde_json::Value>,
) -> Result<VehicleAction> {
    let spec = spec(name).ok_or_else(|| BridgeError::UnsupportedCommand(name.to_string()))?;
    match spec.build {
        Some(build) => build(CommandArgs(body)),
        None => Err(BridgeError::Validation("not implemented".to_string())),
    }
}

/// Whether a vehicle rejection for `name` should be remapped to success
pub fn remaps_to_success(name: &str, err: &BridgeError) -> bool {
    spec(name)
        .and_then(|spec| spec.check_error)
        .is_some_and(|check| check(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_unknown_command_rejected() {
        let err = validate("open_sesame", &body(json!({}))).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedCommand(_)));
    }

    #[test]
    fn test_argless_commands_accept_any_body() {
        for name in ["flash_lights", "honk_horn", "door_lock", "charge_start"] {
            validate(name, &body(json!({}))).unwrap();
            validate(name, &body(json!({"extra": 1}))).unwrap();
        }
    }

    #[test]
    fn test_set_charge_limit_range() {
        validate("set_charge_limit", &body(json!({"percent": 80}))).unwrap();
        validate("set_charge_limit", &body(json!({"percent": 50}))).unwrap();
        validate("set_charge_limit", &body(json!({"percent": 100}))).unwrap();
        assert!(validate("set_charge_limit", &body(json!({"percent": 120}))).is_err());
        assert!(validate("set_charge_limit", &body(json!({"percent": 49}))).is_err());
        assert!(validate("set_charge_limit", &body(json!({}))).is_err());
    }

    #[test]
    fn test_set_charge_limit_builds_action() {
        let action = build_action("set_charge_limit", &body(json!({"percent": 80}))).unwrap();
        assert_eq!(action, VehicleAction::ChangeChargeLimit(80));
        // Numeric string coercion carries through to the executor.
        let action = build_action("set_charge_limit", &body(json!({"percent": "80"}))).unwrap();
        assert_eq!(action, VehicleAction::ChangeChargeLimit(80));
    }

    #[test]
    fn test_set_charging_amps_range() {
        validate("set_charging_amps", &body(json!({"charging_amps": 0}))).unwrap();
        validate("set_charging_amps", &body(json!({"charging_amps": 48}))).unwrap();
        assert!(validate("set_charging_amps", &body(json!({"charging_amps": 49}))).is_err());
        assert!(validate("set_charging_amps", &body(json!({"charging_amps": -1}))).is_err());
    }

    #[test]
    fn test_adjust_volume_clamps_over_ten() {
        validate("adjust_volume", &body(json!({"volume": 11}))).unwrap();
        assert!(validate("adjust_volume", &body(json!({"volume": 12}))).is_err());
        let action = build_action("adjust_volume", &body(json!({"volume": 11}))).unwrap();
        assert_eq!(action, VehicleAction::SetVolume(10.0));
    }

    #[test]
    fn test_pin_commands_require_four_characters() {
        for (name, key) in [
            ("set_pin_to_drive", "password"),
            ("set_valet_mode", "password"),
            ("speed_limit_activate", "pin"),
            ("speed_limit_deactivate", "pin"),
            ("speed_limit_clear_pin", "pin"),
        ] {
            let mut args = body(json!({"enable": true, "on": true}));
            args.insert(key.to_string(), json!("1234"));
            validate(name, &args).unwrap();
            args.insert(key.to_string(), json!("123"));
            assert!(validate(name, &args).is_err(), "{name} accepted a short pin");
        }
    }

    #[test]
    fn test_window_control_commands() {
        validate("window_control", &body(json!({"command": "vent"}))).unwrap();
        let action = build_action("window_control", &body(json!({"command": "close"}))).unwrap();
        assert_eq!(action, VehicleAction::CloseWindows);
        assert!(validate("window_control", &body(json!({"command": "open"}))).is_err());
    }

    #[test]
    fn test_actuate_trunk_selects_verb() {
        let front = build_action("actuate_trunk", &body(json!({"which_trunk": "front"}))).unwrap();
        assert_eq!(front, VehicleAction::OpenFrunk);
        let rear = build_action("actuate_trunk", &body(json!({"which_trunk": "rear"}))).unwrap();
        assert_eq!(rear, VehicleAction::ActuateTrunk);
        assert!(validate("actuate_trunk", &body(json!({"which_trunk": "middle"}))).is_err());
    }

    #[test]
    fn test_speed_limit_set_limit_bounds() {
        validate("speed_limit_set_limit", &body(json!({"limit_mph": 65}))).unwrap();
        assert!(validate("speed_limit_set_limit", &body(json!({"limit_mph": 49}))).is_err());
        assert!(validate("speed_limit_set_limit", &body(json!({"limit_mph": 91}))).is_err());
    }

    #[test]
    fn test_trigger_homelink_bounds() {
        validate("trigger_homelink", &body(json!({"lat": 52.1, "lon": 9.9}))).unwrap();
        validate("trigger_homelink", &body(json!({}))).unwrap();
        assert!(validate("trigger_homelink", &body(json!({"lat": 95.0}))).is_err());
        assert!(validate("trigger_homelink", &body(json!({"lon": -181.0}))).is_err());
    }

    #[test]
    fn test_set_cop_temp_level_shift() {
        // 0 maps to Low, 2 to High.
        validate("set_cop_temp", &body(json!({"cop_temp": 0}))).unwrap();
        validate("set_cop_temp", &body(json!({"cop_temp": 2}))).unwrap();
        assert!(validate("set_cop_temp", &body(json!({"cop_temp": 3}))).is_err());
        assert!(validate("set_cop_temp", &body(json!({"cop_temp": -1}))).is_err());
        let action = build_action("set_cop_temp", &body(json!({"cop_temp": 0}))).unwrap();
        assert_eq!(
            action,
            VehicleAction::SetCabinOverheatProtectionTemperature(Level::Low)
        );
    }

    #[test]
    fn test_not_implemented_commands_fail_validation() {
        for name in [
            "add_charge_schedule",
            "media_next_track",
            "navigation_request",
            "sun_roof_control",
            "set_scheduled_departure",
        ] {
            let err = validate(name, &body(json!({}))).unwrap_err();
            assert!(err.to_string().contains("not implemented"), "{name}");
        }
    }

    #[test]
    fn test_ble_unsupported_commands_fail_validation() {
        for name in [
            "remote_boombox",
            "speed_limit_clear_pin_admin",
            "remote_steering_wheel_heat_level_request",
        ] {
            let err = validate(name, &body(json!({}))).unwrap_err();
            assert!(err.to_string().contains("not supported via BLE"), "{name}");
        }
    }

    #[test]
    fn test_charge_error_translation() {
        let already = BridgeError::VehicleRejected("car could not execute command: is_charging".into());
        assert!(remaps_to_success("charge_start", &already));
        let complete = BridgeError::VehicleRejected("charging complete".into());
        assert!(remaps_to_success("charge_start", &complete));
        let stopped = BridgeError::VehicleRejected("car could not execute command: not_charging".into());
        assert!(remaps_to_success("charge_stop", &stopped));
        assert!(!remaps_to_success("charge_start", &stopped));
        assert!(!remaps_to_success("flash_lights", &already));
    }

    #[test]
    fn test_set_scheduled_charging_minutes() {
        validate(
            "set_scheduled_charging",
            &body(json!({"enable": true, "time": 120})),
        )
        .unwrap();
        assert!(validate(
            "set_scheduled_charging",
            &body(json!({"enable": true, "time": 24.0 * 60.0})),
        )
        .is_err());
        let action = build_action(
            "set_scheduled_charging",
            &body(json!({"enable": true, "time": 90})),
        )
        .unwrap();
        assert_eq!(
            action,
            VehicleAction::ScheduleCharging {
                enable: true,
                offset: Duration::from_secs(90 * 60),
            }
        );
    }

    #[test]
    fn test_seat_heater_bounds() {
        validate(
            "remote_seat_heater_request",
            &body(json!({"heater": 0, "level": 3})),
        )
        .unwrap();
        assert!(validate(
            "remote_seat_heater_request",
            &body(json!({"heater": 7, "level": 2})),
        )
        .is_err());
        assert!(validate(
            "remote_seat_heater_request",
            &body(json!({"heater": 1, "level": 4})),
        )
        .is_err());
    }

    #[test]
    fn test_seat_cooler_front_row_only() {
        validate(
            "remote_seat_cooler_request",
            &body(json!({"seat_cooler_level": 2, "seat_position": 1})),
        )
        .unwrap();
        assert!(validate(
            "remote_seat_cooler_request",
            &body(json!({"seat_cooler_level": 2, "seat_position": 3})),
        )
        .is_err());
    }
}
