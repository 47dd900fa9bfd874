//! Manual positioner control outside a scan.
//!
//! These helpers are meant for the operator aligning the antenna before a
//! session; they must not be used while a session is driving the positioner.

use tracing::info;

use crate::error::PositionerError;
use crate::hardware::Positioner;

/// Move the azimuth axis, keeping elevation. Returns the reported position.
///
/// With `relative` the angle is added to the current azimuth; otherwise it is
/// the absolute target.
pub async fn jog_azimuth(
    positioner: &dyn Positioner,
    angle: f64,
    relative: bool,
) -> Result<(f64, f64), PositionerError> {
    if relative {
        info!(by = angle, "Jogging azimuth");
        positioner.move_by(angle, 0.0).await?;
    } else {
        let (azimuth, elevation) = positioner.current_position().await?;
        info!(from = azimuth, to = angle, "Jogging azimuth");
        positioner.move_to(angle, elevation).await?;
    }
    positioner.current_position().await
}

/// Move the elevation axis, keeping azimuth. Returns the reported position.
pub async fn jog_elevation(
    positioner: &dyn Positioner,
    angle: f64,
    relative: bool,
) -> Result<(f64, f64), PositionerError> {
    if relative {
        info!(by = angle, "Jogging elevation");
        positioner.move_by(0.0, angle).await?;
    } else {
        let (azimuth, elevation) = positioner.current_position().await?;
        info!(from = elevation, to = angle, "Jogging elevation");
        positioner.move_to(azimuth, angle).await?;
    }
    positioner.current_position().await
}

/// Move both axes back to (0°, 0°).
pub async fn return_to_zero(positioner: &dyn Positioner) -> Result<(f64, f64), PositionerError> {
    info!("Returning positioner to zero");
    positioner.move_to(0.0, 0.0).await?;
    positioner.current_position().await
}

/// Make the current position the new (0°, 0°). Returns the reported position.
pub async fn set_zero(positioner: &dyn Positioner) -> Result<(f64, f64), PositionerError> {
    let (azimuth, elevation) = positioner.current_position().await?;
    info!(azimuth, elevation, "Setting positioner zero");
    positioner.set_zero().await?;
    positioner.current_position().await
}
