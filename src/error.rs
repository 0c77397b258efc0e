use thiserror::Error;

/// Rejections raised while validating or importing geofence geometry.
///
/// Messages name the violated constraint so they can be shown to the
/// operator as-is.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("{field}: {reason}")]
    InvalidGeometry { field: String, reason: String },

    #[error("malformed CSV at line {line}: {reason}")]
    MalformedCsv { line: usize, reason: String },

    #[error("polygon needs at least 3 points, found {found}")]
    InsufficientPoints { found: usize },
}

impl GeometryError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        GeometryError::InvalidGeometry {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Telemetry channel failures. None of these are fatal: the dashboard keeps
/// running on the last fetched snapshot.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("telemetry channel unavailable")]
    Unavailable,

    #[error("channel transport error: {0}")]
    Transport(String),

    #[error("failed to encode channel payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to decode channel record: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no vehicle tracks device {0}")]
    UnknownDevice(String),
}

/// Failures of the external vehicle, trip and geofence collaborators.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to decode record: {0}")]
    Decode(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("geofence {0} not found")]
    NotFound(uuid::Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_geometry_names_the_constraint() {
        let err = GeometryError::invalid("radius_km", "radius must be greater than 0");
        assert_eq!(err.to_string(), "radius_km: radius must be greater than 0");
    }

    #[test]
    fn test_insufficient_points_message() {
        let err = GeometryError::InsufficientPoints { found: 2 };
        assert_eq!(err.to_string(), "polygon needs at least 3 points, found 2");
    }
}
