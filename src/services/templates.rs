use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::services::sms::NotificationType;

// ============================================================================
// SMS message templates
// ============================================================================
//
// Every renderer is a pure function of its params: no clock, no randomness,
// no I/O. The copy is product text and changes only deliberately; tests pin
// it verbatim.

/// Params for watering confirmations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WateringParams {
    #[serde(alias = "plantName")]
    pub plant_name: String,
    #[serde(default, alias = "nextWateringDate")]
    pub next_watering_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceParams {
    #[serde(alias = "farmName")]
    pub farm_name: String,
    #[serde(alias = "taskDescription")]
    pub task_description: String,
    #[serde(alias = "dueDate")]
    pub due_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TankAlertParams {
    #[serde(alias = "farmName")]
    pub farm_name: String,
    pub percentage: f64,
    #[serde(default, alias = "estimatedDays")]
    pub estimated_days: Option<f64>,
}

/// Params for temperature alerts. `is_high` is decided by the caller, which
/// knows which threshold tripped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureParams {
    #[serde(alias = "farmName")]
    pub farm_name: String,
    pub temperature: f64,
    #[serde(alias = "plantNames")]
    pub plant_names: String,
    #[serde(alias = "minTemp")]
    pub min_temp: f64,
    #[serde(alias = "maxTemp")]
    pub max_temp: f64,
    #[serde(alias = "isHigh")]
    pub is_high: bool,
}

/// Params for humidity alerts. Direction is derived inside the renderer by
/// comparing the reading against the recommended minimum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumidityParams {
    #[serde(alias = "farmName")]
    pub farm_name: String,
    pub humidity: f64,
    #[serde(alias = "plantNames")]
    pub plant_names: String,
    #[serde(alias = "minHumidity")]
    pub min_humidity: f64,
    #[serde(alias = "maxHumidity")]
    pub max_humidity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationParams {
    pub code: String,
}

pub fn watering_confirmation(p: &WateringParams) -> String {
    let next_info = p
        .next_watering_date
        .as_deref()
        .map(|d| format!("\n\nNext watering: {d}"))
        .unwrap_or_default();
    format!(
        "🌱 Your {} was just watered!{}\n\n— Plante",
        p.plant_name, next_info
    )
}

pub fn maintenance_reminder(p: &MaintenanceParams) -> String {
    format!(
        "🔔 Maintenance reminder for {}\n\nTask: {}\nDue: {}\n\nOpen Plante to mark as complete.\n\n— Plante",
        p.farm_name, p.task_description, p.due_date
    )
}

/// One renderer for all three tank severities: the wording is banded on the
/// percentage itself so a stale caller-side type can never overstate the
/// urgency.
pub fn tank_level_alert(p: &TankAlertParams) -> String {
    if p.percentage <= 5.0 {
        return format!(
            "🚨 URGENT: Water tank nearly empty!\n\n{} needs water immediately. Your plants may be at risk.\n\n— Plante",
            p.farm_name
        );
    }

    if p.percentage <= 10.0 {
        return format!(
            "🚨 Water tank critically low at {}%\n\nPlease refill your water tank soon to keep your plants healthy.\n\n— Plante",
            p.percentage
        );
    }

    let days_info = p
        .estimated_days
        .map(|d| format!(" has about {d} days of water remaining"))
        .unwrap_or_default();
    format!(
        "⚠️ Water tank at {}%\n\nYour {}{}.\n\n— Plante",
        p.percentage, p.farm_name, days_info
    )
}

pub fn temperature_alert(p: &TemperatureParams) -> String {
    let status = if p.is_high { "Too hot" } else { "Too cold" };
    let action = if p.is_high {
        "Consider moving to a cooler location or increasing airflow."
    } else {
        "Move away from cold drafts or windows."
    };

    format!(
        "🌡️ Temperature alert for {}\n\nCurrent: {}°F — {} for {}\nRecommended: {}°F - {}°F\n\n{}\n\n— Plante",
        p.farm_name, p.temperature, status, p.plant_names, p.min_temp, p.max_temp, action
    )
}

pub fn humidity_alert(p: &HumidityParams) -> String {
    let is_low = p.humidity < p.min_humidity;
    let status = if is_low { "Too dry" } else { "Too humid" };
    let action = if is_low {
        "Consider misting your plants or using a humidifier."
    } else {
        "Increase ventilation or reduce watering frequency."
    };

    format!(
        "💧 Humidity alert for {}\n\nCurrent: {}% — {} for {}\nRecommended: {}% - {}%\n\n{}\n\n— Plante",
        p.farm_name, p.humidity, status, p.plant_names, p.min_humidity, p.max_humidity, action
    )
}

pub fn verification_code(code: &str) -> String {
    format!("Your Plante verification code is: {code}\n\nThis code expires in 10 minutes.")
}

/// Render the message for a notification type from a JSON params bag.
///
/// `weekly_pulse` and `farm_action` bodies are authored by their callers and
/// have no template; asking for one is treated the same as an unknown type.
pub fn render_message(ntype: NotificationType, params: &serde_json::Value) -> AppResult<String> {
    let message = match ntype {
        NotificationType::Watering => watering_confirmation(&parse_params(ntype, params)?),
        NotificationType::Maintenance => maintenance_reminder(&parse_params(ntype, params)?),
        NotificationType::TankLow | NotificationType::TankCritical | NotificationType::TankEmpty => {
            tank_level_alert(&parse_params(ntype, params)?)
        }
        NotificationType::TempHigh | NotificationType::TempLow => {
            temperature_alert(&parse_params(ntype, params)?)
        }
        NotificationType::HumidityAlert => humidity_alert(&parse_params(ntype, params)?),
        NotificationType::Verification => {
            let p: VerificationParams = parse_params(ntype, params)?;
            verification_code(&p.code)
        }
        NotificationType::WeeklyPulse | NotificationType::FarmAction => {
            return Err(AppError::UnknownNotificationType(
                ntype.as_str().to_string(),
            ))
        }
    };

    Ok(message)
}

fn parse_params<T: DeserializeOwned>(
    ntype: NotificationType,
    params: &serde_json::Value,
) -> AppResult<T> {
    serde_json::from_value(params.clone()).map_err(|e| {
        AppError::BadRequest(format!("Invalid params for {}: {}", ntype.as_str(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn watering_with_and_without_next_date() {
        let with = watering_confirmation(&WateringParams {
            plant_name: "Basil".to_string(),
            next_watering_date: Some("Friday".to_string()),
        });
        assert_eq!(
            with,
            "🌱 Your Basil was just watered!\n\nNext watering: Friday\n\n— Plante"
        );

        let without = watering_confirmation(&WateringParams {
            plant_name: "Basil".to_string(),
            next_watering_date: None,
        });
        assert_eq!(without, "🌱 Your Basil was just watered!\n\n— Plante");
    }

    #[test]
    fn maintenance_copy() {
        let msg = maintenance_reminder(&MaintenanceParams {
            farm_name: "Kitchen Garden".to_string(),
            task_description: "Clean the pump filter".to_string(),
            due_date: "2026-03-01".to_string(),
        });
        assert_eq!(
            msg,
            "🔔 Maintenance reminder for Kitchen Garden\n\nTask: Clean the pump filter\nDue: 2026-03-01\n\nOpen Plante to mark as complete.\n\n— Plante"
        );
    }

    #[test]
    fn tank_bands_at_the_boundaries() {
        let p = |percentage| TankAlertParams {
            farm_name: "Kitchen Garden".to_string(),
            percentage,
            estimated_days: None,
        };

        // 5 is still urgent and carries no percentage.
        let urgent = tank_level_alert(&p(5.0));
        assert!(urgent.starts_with("🚨 URGENT: Water tank nearly empty!"));
        assert!(!urgent.contains('%'));

        // 10 is the top of the critical band.
        let critical = tank_level_alert(&p(10.0));
        assert!(critical.contains("critically low at 10%"));

        // Above 10 it is a plain warning with the percentage.
        let low = tank_level_alert(&p(20.0));
        assert_eq!(
            low,
            "⚠️ Water tank at 20%\n\nYour Kitchen Garden.\n\n— Plante"
        );

        let with_days = tank_level_alert(&TankAlertParams {
            farm_name: "Kitchen Garden".to_string(),
            percentage: 20.0,
            estimated_days: Some(3.0),
        });
        assert_eq!(
            with_days,
            "⚠️ Water tank at 20%\n\nYour Kitchen Garden has about 3 days of water remaining.\n\n— Plante"
        );
    }

    #[test]
    fn temperature_wording_follows_is_high() {
        let base = TemperatureParams {
            farm_name: "Balcony".to_string(),
            temperature: 92.5,
            plant_names: "Basil, Mint".to_string(),
            min_temp: 60.0,
            max_temp: 85.0,
            is_high: true,
        };

        let hot = temperature_alert(&base);
        assert!(hot.contains("Current: 92.5°F — Too hot for Basil, Mint"));
        assert!(hot.contains("Recommended: 60°F - 85°F"));
        assert!(hot.contains("cooler location"));

        let cold = temperature_alert(&TemperatureParams {
            temperature: 48.0,
            is_high: false,
            ..base
        });
        assert!(cold.contains("Too cold"));
        assert!(cold.contains("cold drafts"));
    }

    #[test]
    fn humidity_direction_is_derived_from_min() {
        let base = HumidityParams {
            farm_name: "Balcony".to_string(),
            humidity: 25.0,
            plant_names: "Fern".to_string(),
            min_humidity: 40.0,
            max_humidity: 60.0,
        };

        let dry = humidity_alert(&base);
        assert!(dry.contains("Too dry"));
        assert!(dry.contains("misting"));

        let humid = humidity_alert(&HumidityParams {
            humidity: 75.0,
            ..base.clone()
        });
        assert!(humid.contains("Too humid"));
        assert!(humid.contains("ventilation"));

        // Exactly at the minimum is not dry.
        let at_min = humidity_alert(&HumidityParams {
            humidity: 40.0,
            ..base
        });
        assert!(at_min.contains("Too humid"));
    }

    #[test]
    fn verification_copy_embeds_the_code() {
        assert_eq!(
            verification_code("123456"),
            "Your Plante verification code is: 123456\n\nThis code expires in 10 minutes."
        );
    }

    #[test]
    fn renderers_are_deterministic() {
        let params = json!({"farm_name": "Kitchen Garden", "percentage": 20, "estimated_days": 3});
        let a = render_message(NotificationType::TankLow, &params).unwrap();
        let b = render_message(NotificationType::TankLow, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dispatch_accepts_camel_case_params() {
        let msg = render_message(
            NotificationType::Watering,
            &json!({"plantName": "Basil", "nextWateringDate": "Friday"}),
        )
        .unwrap();
        assert!(msg.contains("Next watering: Friday"));
    }

    #[test]
    fn dispatch_rejects_bad_params_and_untemplated_types() {
        let err = render_message(NotificationType::TankLow, &json!({"farm_name": "X"}));
        assert!(matches!(err, Err(AppError::BadRequest(_))));

        let err = render_message(NotificationType::WeeklyPulse, &json!({}));
        assert!(matches!(err, Err(AppError::UnknownNotificationType(_))));

        let err = render_message(NotificationType::FarmAction, &json!({}));
        assert!(matches!(err, Err(AppError::UnknownNotificationType(_))));
    }
}
