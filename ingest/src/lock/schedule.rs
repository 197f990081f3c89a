use chrono::{DateTime, TimeDelta, Utc};

/// Width in seconds of the grid denied messages are rescheduled onto.
pub const RESCHEDULE_GRID_SECS: i64 = 15;

/// Returns when a denied message for `segment` should be delivered again.
///
/// Times are aligned to the next [`RESCHEDULE_GRID_SECS`] grid point, so first segments of competing
/// batches arrive together. Other segments arrive one second later.
pub fn next_delivery_time(now: DateTime<Utc>, segment: u32) -> DateTime<Utc> {
    let grid_point = next_grid_point(now, TimeDelta::seconds(RESCHEDULE_GRID_SECS));

    if segment == 1 {
        grid_point
    } else {
        grid_point + TimeDelta::seconds(1)
    }
}

/// Rounds `now` up to a multiple of `grid`. Times already on the grid are returned unchanged.
fn next_grid_point(now: DateTime<Utc>, grid: TimeDelta) -> DateTime<Utc> {
    let grid_micros = grid.num_microseconds().unwrap_or(i64::MAX).max(1);
    let now_micros = now.timestamp_micros();

    let remainder = now_micros.rem_euclid(grid_micros);
    if remainder == 0 {
        return now;
    }

    now + TimeDelta::microseconds(grid_micros - remainder)
}
