pub const SELECT_DEVICES_BY_EXTERNAL_IDS: &str = r#"
SELECT id, external_id, name, created_at, last_seen_at, last_lat, last_lon
FROM devices
WHERE external_id = ANY($1);
"#;

pub const SELECT_DEVICE_BY_EXTERNAL_ID: &str = r#"
SELECT id, external_id, name, created_at, last_seen_at, last_lat, last_lon
FROM devices
WHERE external_id = $1;
"#;

pub const SELECT_ALL_DEVICES: &str = r#"
SELECT id, external_id, name, created_at, last_seen_at, last_lat, last_lon
FROM devices
ORDER BY external_id;
"#;

pub const INSERT_DEVICES: &str = r#"
INSERT INTO devices (id, external_id, name, created_at, last_seen_at, last_lat, last_lon)
SELECT * FROM UNNEST(
    $1::uuid[], $2::text[], $3::text[], $4::timestamptz[], $5::timestamptz[], $6::float8[], $7::float8[]
)
ON CONFLICT (external_id) DO NOTHING;
"#;

// The WHERE guard keeps last_seen_at monotonic under concurrent batches.
pub const UPDATE_DEVICE_POSITIONS: &str = r#"
UPDATE devices AS d
SET last_seen_at = u.last_seen_at,
    last_lat = u.last_lat,
    last_lon = u.last_lon
FROM UNNEST($1::uuid[], $2::timestamptz[], $3::float8[], $4::float8[])
    AS u(id, last_seen_at, last_lat, last_lon)
WHERE d.id = u.id
  AND (d.last_seen_at IS NULL OR d.last_seen_at < u.last_seen_at);
"#;

pub const SELECT_LOCATION_KEYS_IN_RANGE: &str = r#"
SELECT device_id, timestamp
FROM locations
WHERE device_id = ANY($1)
  AND timestamp >= $2
  AND timestamp <= $3;
"#;

pub const INSERT_LOCATIONS: &str = r#"
INSERT INTO locations (id, device_id, timestamp, lat, lon, speed, heading, accuracy, ingested_at)
SELECT * FROM UNNEST(
    $1::uuid[], $2::uuid[], $3::timestamptz[], $4::float8[], $5::float8[],
    $6::float4[], $7::float4[], $8::float4[], $9::timestamptz[]
)
ON CONFLICT (device_id, timestamp) DO NOTHING
RETURNING device_id, timestamp;
"#;

pub const SELECT_LATEST_LOCATIONS: &str = r#"
SELECT DISTINCT ON (device_id)
    id, device_id, timestamp, lat, lon, speed, heading, accuracy, ingested_at
FROM locations
WHERE device_id = ANY($1)
ORDER BY device_id, timestamp DESC;
"#;

pub const SELECT_LOCATION_PAGE: &str = r#"
SELECT id, device_id, timestamp, lat, lon, speed, heading, accuracy, ingested_at
FROM locations
WHERE device_id = $1
  AND ($2::timestamptz IS NULL OR timestamp >= $2)
  AND ($3::timestamptz IS NULL OR timestamp <= $3)
  AND ($4::timestamptz IS NULL OR timestamp > $4)
ORDER BY timestamp ASC
LIMIT $5;
"#;
