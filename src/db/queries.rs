pub const SELECT_VEHICLES_FOR_ORG: &str = r#"
SELECT v.vehicle_id::text AS vehicle_id,
       v.organization_id::text AS organization_id,
       v.name,
       v.entity_type,
       v.device_id,
       s.ignition_on,
       s.last_point_at,
       s.last_lat,
       s.last_lng,
       s.last_speed
FROM vehicles v
LEFT JOIN trip_current_state s ON s.device_id = v.device_id
WHERE v.organization_id::text = $1
ORDER BY v.name, v.vehicle_id;
"#;

pub const SELECT_TRIPS_FOR_DAY: &str = r#"
SELECT trip_id, device_id, start_time, start_lat, start_lng, end_time, end_lat, end_lng, distance_meters
FROM trips
WHERE device_id = $1 AND start_time >= $2 AND start_time < $3
ORDER BY start_time;
"#;

pub const SELECT_TRIP_POINTS: &str = r#"
SELECT point_id, trip_id, device_id, timestamp, lat, lng, speed, heading
FROM trip_points
WHERE trip_id = ANY($1)
ORDER BY trip_id, timestamp, point_id;
"#;

pub const SELECT_TRIP_ALERTS: &str = r#"
SELECT alert_id, trip_id, timestamp, lat, lon, alert_type::text AS alert_type, severity, metadata
FROM trip_alerts
WHERE trip_id = ANY($1)
ORDER BY trip_id, timestamp;
"#;

pub const INSERT_GEOFENCE: &str = r#"
INSERT INTO geofences (geofence_id, organization_id, name, geofence_type, metadata, is_active, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, true, NOW(), NOW())
RETURNING geofence_id, organization_id, name, geofence_type, metadata, is_active, created_at, updated_at;
"#;

pub const UPDATE_GEOFENCE: &str = r#"
UPDATE geofences
SET name = $2,
    geofence_type = $3,
    metadata = $4,
    updated_at = NOW()
WHERE geofence_id = $1
RETURNING geofence_id, organization_id, name, geofence_type, metadata, is_active, created_at, updated_at;
"#;

pub const SET_GEOFENCE_ACTIVE: &str = r#"
UPDATE geofences
SET is_active = $2,
    updated_at = NOW()
WHERE geofence_id = $1
RETURNING geofence_id, organization_id, name, geofence_type, metadata, is_active, created_at, updated_at;
"#;

pub const DELETE_GEOFENCE: &str = r#"
DELETE FROM geofences WHERE geofence_id = $1;
"#;

pub const SELECT_GEOFENCES_FOR_ORG: &str = r#"
SELECT geofence_id, organization_id, name, geofence_type, metadata, is_active, created_at, updated_at
FROM geofences
WHERE organization_id = $1
ORDER BY created_at;
"#;
