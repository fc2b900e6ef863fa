use time::OffsetDateTime;
use time::macros::offset;

/// Daily counters are scoped to the calendar date in a fixed UTC-8
/// reference timezone, matching the upstream quota reset schedule.
pub fn usage_day() -> String {
    usage_day_at(OffsetDateTime::now_utc())
}

pub fn usage_day_at(instant: OffsetDateTime) -> String {
    let local = instant.to_offset(offset!(-8));
    format!(
        "{:04}-{:02}-{:02}",
        local.year(),
        local.month() as u8,
        local.day()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn day_boundary_follows_reference_offset() {
        // 07:59 UTC is still the previous day at UTC-8.
        assert_eq!(usage_day_at(datetime!(2026-08-23 07:59 UTC)), "2026-08-22");
        assert_eq!(usage_day_at(datetime!(2026-08-23 08:00 UTC)), "2026-08-23");
    }
}
