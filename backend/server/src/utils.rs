use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::{
    error::AppError::{self, MalformedPayload},
    models::DecorationType,
    tree::allocator::{MAX_SIZE, MIN_SIZE},
};

pub fn parse_json<T: DeserializeOwned>(bytes: Bytes) -> Result<T, AppError> {
    serde_json::from_slice(&bytes).map_err(|_| MalformedPayload)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn validate_position(field: &'static str, value: f64) -> Result<f64, AppError> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(AppError::invalid(field, format!("{value} is outside 0-100")));
    }

    Ok(value)
}

pub fn validate_size(value: f64) -> Result<f64, AppError> {
    if !value.is_finite() || !(MIN_SIZE..=MAX_SIZE).contains(&value) {
        return Err(AppError::invalid(
            "size",
            format!("{value} is outside {MIN_SIZE}-{MAX_SIZE}"),
        ));
    }

    Ok(value)
}

pub fn validate_decoration_type(value: &str) -> Result<DecorationType, AppError> {
    value
        .parse()
        .map_err(|_| AppError::invalid("decoration_type", format!("unknown type '{value}'")))
}

/// Accepts `#RGB` and `#RRGGBB`.
pub fn validate_color(value: &str) -> Result<String, AppError> {
    let digits = value.strip_prefix('#').unwrap_or("");
    let valid = matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit());

    if !valid {
        return Err(AppError::invalid("color", format!("'{value}' is not a hex color")));
    }

    Ok(value.to_uppercase())
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), AppError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(AppError::invalid("latitude", format!("{latitude} is outside -90-90")));
    }

    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::invalid(
            "longitude",
            format!("{longitude} is outside -180-180"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: AppError) -> &'static str {
        match err {
            AppError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(36.666_666), 36.67);
        assert_eq!(round2(15.0), 15.0);
        assert_eq!(round2(49.994), 49.99);
    }

    #[test]
    fn test_position_bounds() {
        assert_eq!(validate_position("position_x", 0.0).unwrap(), 0.0);
        assert_eq!(validate_position("position_y", 100.0).unwrap(), 100.0);
        assert_eq!(field_of(validate_position("position_x", 100.5).unwrap_err()), "position_x");
        assert_eq!(field_of(validate_position("position_y", -1.0).unwrap_err()), "position_y");
        assert_eq!(field_of(validate_position("position_y", f64::NAN).unwrap_err()), "position_y");
    }

    #[test]
    fn test_decoration_type_names() {
        assert_eq!(validate_decoration_type("garland").unwrap(), DecorationType::Garland);
        assert_eq!(field_of(validate_decoration_type("reindeer").unwrap_err()), "decoration_type");
    }

    #[test]
    fn test_color_format() {
        assert_eq!(validate_color("#fbbf24").unwrap(), "#FBBF24");
        assert_eq!(validate_color("#abc").unwrap(), "#ABC");
        assert_eq!(field_of(validate_color("red").unwrap_err()), "color");
        assert_eq!(field_of(validate_color("#12345G").unwrap_err()), "color");
    }

    #[test]
    fn test_size_and_coordinates() {
        assert!(validate_size(1.0).is_ok());
        assert_eq!(field_of(validate_size(2.0).unwrap_err()), "size");
        assert!(validate_coordinates(19.07, 72.87).is_ok());
        assert_eq!(field_of(validate_coordinates(91.0, 0.0).unwrap_err()), "latitude");
        assert_eq!(field_of(validate_coordinates(0.0, -181.0).unwrap_err()), "longitude");
    }
}
