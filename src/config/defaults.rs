//! Fixed pipeline constants not exposed as environment tunables

/// Default African cyclone basin (tight South-Indian / Mozambique Channel box)
pub const BASIN_SOUTH: f64 = -35.0;
pub const BASIN_NORTH: f64 = 0.0;
pub const BASIN_WEST: f64 = 20.0;
pub const BASIN_EAST: f64 = 80.0;

/// Regional alert catch-all for basin-wide events (South Indian Ocean)
pub const REGIONAL_SOUTH: f64 = -30.0;
pub const REGIONAL_NORTH: f64 = 0.0;
pub const REGIONAL_WEST: f64 = 30.0;
pub const REGIONAL_EAST: f64 = 80.0;

/// Minimum flood polygon area worth reporting (km^2)
pub const MIN_FLOOD_AREA_KM2: f64 = 0.1;

/// Landslide risk cells within this many degrees collapse to one representative
pub const LANDSLIDE_CLUSTER_DEG: f64 = 0.5;

/// Maximum landslide risks retained per assessment, sorted by score
pub const LANDSLIDE_TOP_N: usize = 50;

/// Floods with water fraction above this are also surfaced as waterlogged zones
pub const WATERLOGGED_FRACTION: f64 = 0.7;

/// Lookback windows for the unified query (hours)
pub const LOOKBACK_CYCLONES_HOURS: i64 = 24;
pub const LOOKBACK_FLOODS_HOURS: i64 = 48;
pub const LOOKBACK_LANDSLIDES_HOURS: i64 = 24;
pub const LOOKBACK_WATERLOGGED_HOURS: i64 = 72;

/// Scheduler sleeps in chunks so cancellation is observed within a minute
pub const SLEEP_CHUNK_SECS: u64 = 60;

/// Soft budget for a full cycle; exceedance is logged, not killed (seconds)
pub const CYCLE_BUDGET_SECS: u64 = 600;

/// Per-recipient retry backoff within a single dispatch (seconds)
pub const DISPATCH_BACKOFF_SECS: [u64; 2] = [1, 5];

/// Knots per meter-per-second
pub const MS_TO_KT: f64 = 1.9438;
